//! Pooling for temporary render targets
//!
//! Passes acquire targets by handle in `configure` and release them in
//! `frame_cleanup`. Released targets go back to a per-key free list so the
//! next frame reuses them without allocating.
//!
//! Idle age is measured against the pool's own frame tick, advanced once per
//! rendered camera by the owning context. Camera history counts are per camera
//! and would make one camera's frames evict another camera's targets.

use crate::command::TargetDescriptor;
use crate::graph::ResourceHandle;
use crate::{Error, Result};
use std::collections::HashMap;

/// Frames an unused target is kept before being dropped
const MAX_AGE: u64 = 60;

/// Key for target pool lookup
#[derive(Hash, Eq, PartialEq, Copy, Clone, Debug)]
pub struct TargetKey {
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    pub depth_bits: u32,
}

impl TargetKey {
    pub fn from_descriptor(desc: &TargetDescriptor) -> Self {
        Self {
            width: desc.width,
            height: desc.height,
            format: desc.format,
            depth_bits: desc.depth_bits,
        }
    }

    pub fn to_descriptor(&self) -> TargetDescriptor {
        TargetDescriptor::new(self.width, self.height, self.format).with_depth_bits(self.depth_bits)
    }
}

/// Acquire / release counters
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub acquisitions: u64,
    pub releases: u64,
    /// Targets actually allocated (acquisitions minus reuses)
    pub created: u64,
}

impl PoolStats {
    /// Targets acquired and not yet released
    pub fn outstanding(&self) -> u64 {
        self.acquisitions - self.releases
    }
}

/// Pool for reusing render targets of any backend type
pub struct TargetPool<T> {
    available: HashMap<TargetKey, Vec<(T, u64)>>,
    leased: HashMap<ResourceHandle, (TargetKey, T)>,
    stats: PoolStats,
    frame: u64,
}

impl<T> TargetPool<T> {
    pub fn new() -> Self {
        Self {
            available: HashMap::new(),
            leased: HashMap::new(),
            stats: PoolStats::default(),
            frame: 0,
        }
    }

    /// Advance the frame tick and drop free targets idle for too long
    pub fn begin_frame(&mut self) {
        self.frame += 1;
        self.cleanup_old();
    }

    /// Frames begun since the pool was created
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Lease a target for `handle`, reusing a free one or calling `create`
    pub fn acquire(
        &mut self,
        handle: ResourceHandle,
        desc: &TargetDescriptor,
        create: impl FnOnce(&TargetKey) -> T,
    ) -> Result<&mut T> {
        if self.leased.contains_key(&handle) {
            return Err(Error::Resource(format!(
                "Target {:?} acquired twice without release",
                handle
            )));
        }

        let key = TargetKey::from_descriptor(desc);
        let target = match self.available.get_mut(&key).and_then(Vec::pop) {
            Some((target, _)) => {
                log::trace!("Reusing pooled target {:?}", key);
                target
            }
            None => {
                log::debug!("Creating new pooled target {:?}", key);
                self.stats.created += 1;
                create(&key)
            }
        };
        self.stats.acquisitions += 1;

        let (_, target) = self.leased.entry(handle).or_insert((key, target));
        Ok(target)
    }

    /// Return the target leased to `handle` to the free list
    pub fn release(&mut self, handle: ResourceHandle) -> Result<()> {
        let (key, target) = self.leased.remove(&handle).ok_or_else(|| {
            Error::Resource(format!("Target {:?} released without being acquired", handle))
        })?;
        self.stats.releases += 1;
        self.available
            .entry(key)
            .or_default()
            .push((target, self.frame));
        Ok(())
    }

    pub fn get(&self, handle: ResourceHandle) -> Option<&T> {
        self.leased.get(&handle).map(|(_, target)| target)
    }

    pub fn get_mut(&mut self, handle: ResourceHandle) -> Option<&mut T> {
        self.leased.get_mut(&handle).map(|(_, target)| target)
    }

    /// Descriptor a leased target was created with
    pub fn descriptor(&self, handle: ResourceHandle) -> Option<TargetDescriptor> {
        self.leased.get(&handle).map(|(key, _)| key.to_descriptor())
    }

    pub fn is_leased(&self, handle: ResourceHandle) -> bool {
        self.leased.contains_key(&handle)
    }

    pub fn leased_count(&self) -> usize {
        self.leased.len()
    }

    /// Drop free targets that haven't been used in a while
    pub fn cleanup_old(&mut self) {
        let current = self.frame;
        self.available.retain(|_key, targets| {
            targets.retain(|(_, last_frame)| current.saturating_sub(*last_frame) < MAX_AGE);
            !targets.is_empty()
        });
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    /// Targets held by the pool, leased or free
    pub fn live_count(&self) -> usize {
        self.leased.len() + self.available.values().map(Vec::len).sum::<usize>()
    }
}

impl<T> Default for TargetPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc() -> TargetDescriptor {
        TargetDescriptor::new(16, 8, wgpu::TextureFormat::Rg16Float).with_depth_bits(32)
    }

    #[test]
    fn released_targets_are_reused() {
        let mut pool: TargetPool<u32> = TargetPool::new();
        let handle = ResourceHandle::named("a");
        let mut next = 0;

        pool.acquire(handle, &desc(), |_| { next += 1; next }).unwrap();
        pool.release(handle).unwrap();
        let reused = *pool.acquire(handle, &desc(), |_| 99).unwrap();

        assert_eq!(reused, 1);
        assert_eq!(pool.stats(), PoolStats { acquisitions: 2, releases: 1, created: 1 });
        assert_eq!(pool.stats().outstanding(), 1);
    }

    #[test]
    fn double_acquire_is_an_error() {
        let mut pool: TargetPool<u32> = TargetPool::new();
        let handle = ResourceHandle::named("a");
        pool.acquire(handle, &desc(), |_| 0).unwrap();
        assert!(matches!(pool.acquire(handle, &desc(), |_| 0), Err(Error::Resource(_))));
    }

    #[test]
    fn release_without_acquire_is_an_error() {
        let mut pool: TargetPool<u32> = TargetPool::new();
        assert!(matches!(
            pool.release(ResourceHandle::named("a")),
            Err(Error::Resource(_))
        ));
    }

    #[test]
    fn different_descriptors_do_not_share_targets() {
        let mut pool: TargetPool<u32> = TargetPool::new();
        let handle = ResourceHandle::named("a");
        pool.acquire(handle, &desc(), |_| 1).unwrap();
        pool.release(handle).unwrap();

        let other = desc().with_depth_bits(16);
        assert_eq!(*pool.acquire(handle, &other, |_| 2).unwrap(), 2);
        assert_eq!(pool.descriptor(handle), Some(other));
    }

    #[test]
    fn old_free_targets_are_dropped() {
        let mut pool: TargetPool<u32> = TargetPool::new();
        let handle = ResourceHandle::named("a");
        pool.acquire(handle, &desc(), |_| 1).unwrap();
        pool.release(handle).unwrap();

        for _ in 0..10 {
            pool.begin_frame();
        }
        assert_eq!(pool.live_count(), 1);
        for _ in 0..MAX_AGE {
            pool.begin_frame();
        }
        assert_eq!(pool.live_count(), 0);
    }

    #[test]
    fn interleaved_users_keep_their_targets() {
        let mut pool: TargetPool<u32> = TargetPool::new();
        let first = ResourceHandle::named("first");
        let second = ResourceHandle::named("second");
        let small = desc();
        let large = TargetDescriptor::new(32, 16, wgpu::TextureFormat::Rg16Float);

        for _ in 0..MAX_AGE + 10 {
            pool.begin_frame();
            pool.acquire(first, &small, |_| 1).unwrap();
            pool.release(first).unwrap();
        }
        for _ in 0..10 {
            pool.begin_frame();
            pool.acquire(first, &small, |_| 1).unwrap();
            pool.release(first).unwrap();
            pool.begin_frame();
            pool.acquire(second, &large, |_| 2).unwrap();
            pool.release(second).unwrap();
        }

        assert_eq!(pool.stats().created, 2);
        assert_eq!(pool.frame(), MAX_AGE + 30);
    }
}
