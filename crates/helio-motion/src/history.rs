//! Per-camera motion history
//!
//! The motion vector pass reprojects the current frame through the camera's
//! previous view-projection. That matrix lives here, one record per camera,
//! owned by the [`MotionRenderer`](crate::MotionRenderer) and handed to the
//! passes by reference every frame.

use crate::camera::{CameraId, CaptureFlags};
use glam::Mat4;
use std::collections::HashMap;

/// View-projection history of a single camera
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MotionHistory {
    previous_view_projection: Option<Mat4>,
    frames_recorded: u64,
}

impl MotionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// View-projection recorded at the end of the previous frame, if any
    pub fn previous_view_projection(&self) -> Option<Mat4> {
        self.previous_view_projection
    }

    /// Previous view-projection, or `current` on the camera's first frame so
    /// reprojection yields no camera motion instead of reading garbage
    pub fn previous_or(&self, current: Mat4) -> Mat4 {
        self.previous_view_projection.unwrap_or(current)
    }

    /// True until the first [`end_frame`](Self::end_frame)
    pub fn is_first_frame(&self) -> bool {
        self.previous_view_projection.is_none()
    }

    /// Number of frames recorded for this camera
    pub fn frames_recorded(&self) -> u64 {
        self.frames_recorded
    }

    /// Record this frame's view-projection for the next frame
    pub fn end_frame(&mut self, view_projection: Mat4) {
        self.previous_view_projection = Some(view_projection);
        self.frames_recorded += 1;
    }
}

/// Everything the motion passes persist for one camera
#[derive(Clone, Debug, Default)]
pub struct CameraMotionState {
    pub history: MotionHistory,
    capture: CaptureFlags,
}

impl CameraMotionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture flags currently requested for this camera
    pub fn capture(&self) -> CaptureFlags {
        self.capture
    }

    /// Request capture flags; returns true if all of them were already active
    pub fn request_capture(&mut self, flags: CaptureFlags) -> bool {
        let already = self.capture.contains(flags);
        self.capture |= flags;
        already
    }
}

/// Map from camera identity to its persistent motion state
#[derive(Debug, Default)]
pub struct MotionHistoryStore {
    cameras: HashMap<CameraId, CameraMotionState>,
}

impl MotionHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the state for `id`, creating it on first registration
    pub fn register(&mut self, id: CameraId) -> &mut CameraMotionState {
        self.cameras.entry(id).or_insert_with(|| {
            log::debug!("Registering motion history for camera {:?}", id);
            CameraMotionState::new()
        })
    }

    /// Drop a camera's state; its next frame starts without history
    pub fn remove(&mut self, id: CameraId) -> Option<CameraMotionState> {
        let removed = self.cameras.remove(&id);
        if removed.is_some() {
            log::debug!("Removed motion history for camera {:?}", id);
        }
        removed
    }

    pub fn get(&self, id: CameraId) -> Option<&CameraMotionState> {
        self.cameras.get(&id)
    }

    pub fn get_mut(&mut self, id: CameraId) -> Option<&mut CameraMotionState> {
        self.cameras.get_mut(&id)
    }

    pub fn contains(&self, id: CameraId) -> bool {
        self.cameras.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn first_frame_falls_back_to_current_matrix() {
        let history = MotionHistory::new();
        let current = Mat4::from_translation(Vec3::X);
        assert!(history.is_first_frame());
        assert_eq!(history.previous_view_projection(), None);
        assert_eq!(history.previous_or(current), current);
    }

    #[test]
    fn end_frame_records_the_matrix_for_the_next_frame() {
        let mut history = MotionHistory::new();
        let frame_a = Mat4::from_translation(Vec3::X);
        let frame_b = Mat4::from_translation(Vec3::Y);

        history.end_frame(frame_a);
        assert_eq!(history.previous_or(frame_b), frame_a);

        history.end_frame(frame_b);
        assert_eq!(history.previous_view_projection(), Some(frame_b));
        assert_eq!(history.frames_recorded(), 2);
    }

    #[test]
    fn capture_request_reports_whether_it_was_active() {
        let mut state = CameraMotionState::new();
        let flags = CaptureFlags::DEPTH | CaptureFlags::MOTION_VECTORS;
        assert!(!state.request_capture(flags));
        assert!(state.request_capture(flags));
        assert!(state.request_capture(CaptureFlags::DEPTH));
        assert_eq!(state.capture(), flags);
    }

    #[test]
    fn store_keeps_cameras_apart() {
        let mut store = MotionHistoryStore::new();
        store.register(CameraId(1)).history.end_frame(Mat4::IDENTITY);
        store.register(CameraId(2));

        assert_eq!(store.len(), 2);
        assert!(!store.get(CameraId(1)).unwrap().history.is_first_frame());
        assert!(store.get(CameraId(2)).unwrap().history.is_first_frame());

        assert!(store.remove(CameraId(1)).is_some());
        assert!(!store.contains(CameraId(1)));
        assert!(store.register(CameraId(1)).history.is_first_frame());
    }
}
