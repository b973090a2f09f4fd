//! Render graph for the motion passes
//!
//! Passes are ordered by the host lifecycle event they attach to and, within
//! an event, by the resources they read and write. Every executed frame runs
//! `configure` then `execute` for each pass, and `frame_cleanup` for all of
//! them no matter how the frame went.

mod pass;
mod resource;

pub use pass::{AsAny, ConfigureContext, PassContext, RenderPass, RenderPassEvent};
pub use resource::{PassId, ResourceHandle};

use crate::command::{CommandBuffer, TargetDescriptor};
use crate::context::{RenderContext, RenderingData};
use crate::history::CameraMotionState;
use crate::{Error, Result};
use std::collections::{HashMap, HashSet, VecDeque};

/// Render graph for pass ordering and per-frame lifecycle
pub struct RenderGraph {
    passes: Vec<PassNode>,
    execution_order: Vec<usize>,
    built: bool,
}

struct PassNode {
    pass: Box<dyn RenderPass>,
    reads: Vec<ResourceHandle>,
    writes: Vec<ResourceHandle>,
    creates: Vec<ResourceHandle>,
}

impl PassNode {
    fn produces(&self, resource: ResourceHandle) -> bool {
        self.writes.contains(&resource) || self.creates.contains(&resource)
    }
}

impl RenderGraph {
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            execution_order: Vec::new(),
            built: false,
        }
    }

    /// Add a pass to the graph
    pub fn add_pass(&mut self, pass: impl RenderPass + 'static) -> PassId {
        let id = PassId(self.passes.len());

        let mut builder = PassResourceBuilder::new();
        pass.declare_resources(&mut builder);

        self.passes.push(PassNode {
            pass: Box::new(pass),
            reads: builder.reads,
            writes: builder.writes,
            creates: builder.creates,
        });
        self.built = false;
        id
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Pass names in execution order (empty until built)
    pub fn execution_order(&self) -> Vec<&str> {
        self.execution_order
            .iter()
            .map(|&idx| self.passes[idx].pass.name())
            .collect()
    }

    /// Get a pass by concrete type
    pub fn pass<T: RenderPass + 'static>(&self) -> Option<&T> {
        self.passes
            .iter()
            .find_map(|node| node.pass.as_any().downcast_ref::<T>())
    }

    /// Get a mutable pass by concrete type
    pub fn pass_mut<T: RenderPass + 'static>(&mut self) -> Option<&mut T> {
        self.passes
            .iter_mut()
            .find_map(|node| node.pass.as_any_mut().downcast_mut::<T>())
    }

    /// Build the graph - resolve dependencies and determine execution order
    pub fn build(&mut self) -> Result<()> {
        log::info!("Building motion render graph with {} passes", self.passes.len());

        // Group passes by event, keeping insertion order inside each group
        let mut by_event: Vec<usize> = (0..self.passes.len()).collect();
        by_event.sort_by_key(|&i| self.passes[i].pass.event());

        let mut order = Vec::with_capacity(self.passes.len());
        let mut start = 0;
        while start < by_event.len() {
            let event = self.passes[by_event[start]].pass.event();
            let end = by_event[start..]
                .iter()
                .position(|&i| self.passes[i].pass.event() != event)
                .map_or(by_event.len(), |offset| start + offset);
            order.extend(self.sort_group(&by_event[start..end])?);
            start = end;
        }

        self.check_cross_event_reads(&order)?;

        for (i, &pass_idx) in order.iter().enumerate() {
            log::debug!(
                "  Pass {}: {} ({:?})",
                i,
                self.passes[pass_idx].pass.name(),
                self.passes[pass_idx].pass.event()
            );
        }

        self.execution_order = order;
        self.built = true;
        log::info!("Motion render graph built successfully");
        Ok(())
    }

    /// Topologically sort passes sharing an event (Kahn's algorithm, FIFO)
    fn sort_group(&self, group: &[usize]) -> Result<Vec<usize>> {
        let mut resource_writers: HashMap<ResourceHandle, Vec<usize>> = HashMap::new();
        for (local, &pass_idx) in group.iter().enumerate() {
            let pass = &self.passes[pass_idx];
            for &resource in pass.writes.iter().chain(&pass.creates) {
                resource_writers.entry(resource).or_default().push(local);
            }
        }

        let mut in_degree = vec![0; group.len()];
        let mut adj_list: Vec<Vec<usize>> = vec![Vec::new(); group.len()];
        for (local, &pass_idx) in group.iter().enumerate() {
            let mut seen = HashSet::new();
            for resource in &self.passes[pass_idx].reads {
                let Some(writers) = resource_writers.get(resource) else {
                    continue;
                };
                for &writer in writers {
                    // A pass reading what it writes itself (in-place effects) is no edge
                    if writer != local && seen.insert(writer) {
                        adj_list[writer].push(local);
                        in_degree[local] += 1;
                    }
                }
            }
        }

        let mut queue: VecDeque<usize> = (0..group.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(group.len());
        while let Some(node) = queue.pop_front() {
            order.push(group[node]);
            for &neighbor in &adj_list[node] {
                in_degree[neighbor] -= 1;
                if in_degree[neighbor] == 0 {
                    queue.push_back(neighbor);
                }
            }
        }

        if order.len() != group.len() {
            return Err(Error::Graph(
                "Cyclic dependency detected in render graph".to_string(),
            ));
        }
        Ok(order)
    }

    /// A pass must not read a resource only produced by a later event
    fn check_cross_event_reads(&self, order: &[usize]) -> Result<()> {
        for (position, &reader) in order.iter().enumerate() {
            for &resource in &self.passes[reader].reads {
                let produced_later = order[position + 1..]
                    .iter()
                    .any(|&later| self.passes[later].produces(resource));
                let produced_before = order[..=position]
                    .iter()
                    .any(|&earlier| self.passes[earlier].produces(resource));
                if produced_later && !produced_before {
                    return Err(Error::Graph(format!(
                        "Pass '{}' reads {:?} before any pass writes it",
                        self.passes[reader].pass.name(),
                        resource
                    )));
                }
            }
        }
        Ok(())
    }

    /// Run one camera's frame through every pass
    pub fn execute(
        &mut self,
        render: &mut dyn RenderContext,
        rendering: &RenderingData,
        camera_state: &mut CameraMotionState,
    ) -> Result<()> {
        if !self.built {
            return Err(Error::Graph("Render graph executed before build".to_string()));
        }

        log::trace!(
            "Executing motion graph for camera {:?} (frame {})",
            rendering.camera.id,
            rendering.frame
        );

        let target = rendering.camera.target_descriptor();
        let mut result: Result<()> = Ok(());

        for &pass_idx in &self.execution_order {
            let pass = self.passes[pass_idx].pass.as_mut();
            log::trace!("  Executing pass: {}", pass.name());

            // Nothing downstream may run on top of a failed pass
            if let Err(err) = run_pass(pass, render, rendering, camera_state, &target) {
                log::warn!("Pass '{}' failed: {}", pass.name(), err);
                result = Err(err);
                break;
            }
        }

        let mut cmd = CommandBuffer::new("frame cleanup");
        for &pass_idx in &self.execution_order {
            let pass = self.passes[pass_idx].pass.as_mut();
            if let Err(err) = pass.frame_cleanup(Some(&mut cmd)) {
                log::warn!("Cleanup of pass '{}' failed: {}", pass.name(), err);
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        let flushed = render.execute_command_buffer(&mut cmd);

        result.and(flushed)
    }
}

fn run_pass(
    pass: &mut dyn RenderPass,
    render: &mut dyn RenderContext,
    rendering: &RenderingData,
    camera_state: &mut CameraMotionState,
    target: &TargetDescriptor,
) -> Result<()> {
    let mut cmd = CommandBuffer::new(pass.name().to_string());
    pass.configure(&mut ConfigureContext {
        cmd: &mut cmd,
        target,
        rendering,
        camera_state: &mut *camera_state,
    })?;
    if !cmd.is_empty() {
        render.execute_command_buffer(&mut cmd)?;
    }

    pass.execute(&mut PassContext {
        render,
        rendering,
        camera_state: &*camera_state,
    })
}

/// Builder for declaring pass resource dependencies
pub struct PassResourceBuilder {
    reads: Vec<ResourceHandle>,
    writes: Vec<ResourceHandle>,
    creates: Vec<ResourceHandle>,
}

impl PassResourceBuilder {
    fn new() -> Self {
        Self {
            reads: Vec::new(),
            writes: Vec::new(),
            creates: Vec::new(),
        }
    }

    /// Declare that this pass reads a resource
    pub fn read(&mut self, resource: ResourceHandle) -> &mut Self {
        self.reads.push(resource);
        self
    }

    /// Declare that this pass writes to a resource
    pub fn write(&mut self, resource: ResourceHandle) -> &mut Self {
        self.writes.push(resource);
        self
    }

    /// Declare that this pass creates a transient resource
    pub fn create(&mut self, resource: ResourceHandle) -> &mut Self {
        self.creates.push(resource);
        self
    }
}

impl Default for RenderGraph {
    fn default() -> Self {
        Self::new()
    }
}
