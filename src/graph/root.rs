//! The built render pass graph.
//!
//! [`RenderPassRoot`] resolves the dependencies declared by [`RendererStep`]s into a tree of pass instances. The step
//! that presents becomes the root, every step it transitively depends on becomes an offscreen pass. A step that is a
//! dependency of several other steps is instanced once and linked under each of its dependents.
//!
//! Each frame, [`RenderPassRoot::render`] records the whole tree into the command buffer of the acquired swapchain
//! image, children before their parents. A pass reachable through several parents is rendered only once per frame.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use ash::vk;
use petgraph::dot::Dot;
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use petgraph::{Direction, Graph};

use crate::core::traits::GpuDevice;
use crate::graph::framebuffer::Framebuffer;
use crate::graph::instance::PassInstance;
use crate::graph::step::{RecordContext, RendererStep};
use crate::wsi::Swapchain;
use crate::{Context, Device, Error, Fence, Semaphore};

/// Stable handle to a pass instance in a [`RenderPassRoot`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct PassHandle(NodeIndex);

fn step_key(step: &Arc<RendererStep>) -> usize {
    Arc::as_ptr(step) as usize
}

/// See the module level documentation.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct RenderPassRoot<D: GpuDevice = Device> {
    // Edges point from parent to child, weighted by the child's position in the parent's dependency list.
    graph: Graph<PassInstance<D>, u32>,
    root: NodeIndex,
    #[derivative(Debug = "ignore")]
    steps: HashMap<usize, NodeIndex>,
}

impl<D: GpuDevice> RenderPassRoot<D> {
    /// Build the graph for `present_step` and allocate all render targets at the swapchain resolution.
    /// # Errors
    /// * Fails if `present_step` has no presentable attachment.
    /// * Fails if the declared dependencies contain a cycle.
    /// * Fails if any render pass or render target cannot be created.
    pub fn new(ctx: &Context<D>, present_step: &Arc<RendererStep>, swapchain: &dyn Swapchain) -> Result<Self> {
        if !present_step.infos().has_present_attachment() {
            return Err(Error::NoPresentAttachment(present_step.name().to_owned()).into());
        }

        let mut graph = Graph::new();
        let mut steps = HashMap::new();
        let mut order = Vec::new();
        let mut stack = vec![present_step.clone()];
        while let Some(step) = stack.pop() {
            let key = step_key(&step);
            if steps.contains_key(&key) {
                continue;
            }
            let render_pass = ctx.render_pass(step.infos())?;
            let instance = if key == step_key(present_step) {
                PassInstance::present_root(step.clone(), render_pass)
            } else {
                PassInstance::offscreen(step.clone(), render_pass)
            };
            steps.insert(key, graph.add_node(instance));
            stack.extend(step.dependencies().iter().rev().cloned());
            order.push(step);
        }

        let node_of = |step: &Arc<RendererStep>| steps.get(&step_key(step)).copied().ok_or(Error::NodeNotFound);
        for parent in &order {
            let parent_node = node_of(parent)?;
            for (ordinal, dependency) in parent.dependencies().iter().enumerate() {
                graph.add_edge(parent_node, node_of(dependency)?, ordinal as u32);
            }
        }

        if petgraph::algo::is_cyclic_directed(&graph) {
            return Err(Error::Uncategorized("Render step dependencies contain a cycle.").into());
        }

        let root = node_of(present_step)?;
        let mut this = RenderPassRoot {
            graph,
            root,
            steps,
        };
        debug!(
            "Built render pass graph for `{}`: {} passes, {} distinct render passes",
            present_step.name(),
            this.instance_count(),
            this.graph
                .node_weights()
                .map(|instance| Arc::as_ptr(instance.render_pass()))
                .collect::<HashSet<_>>()
                .len()
        );
        this.resize(ctx, swapchain)?;
        Ok(this)
    }

    /// Handle of the root pass.
    pub fn root(&self) -> PassHandle {
        PassHandle(self.root)
    }

    /// Number of pass instances, including the root.
    pub fn instance_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of offscreen pass instances.
    pub fn offscreen_count(&self) -> usize {
        self.graph
            .node_weights()
            .filter(|instance| !instance.is_root())
            .count()
    }

    /// Get a pass instance.
    pub fn instance(&self, handle: PassHandle) -> Option<&PassInstance<D>> {
        self.graph.node_weight(handle.0)
    }

    /// Find the instance of a step.
    pub fn find(&self, step: &Arc<RendererStep>) -> Option<PassHandle> {
        self.steps.get(&step_key(step)).copied().map(PassHandle)
    }

    /// Children of a pass, in the order their steps were declared as dependencies.
    pub fn children(&self, handle: PassHandle) -> Vec<PassHandle> {
        let mut edges = self
            .graph
            .edges_directed(handle.0, Direction::Outgoing)
            .map(|edge| (*edge.weight(), edge.target()))
            .collect::<Vec<_>>();
        edges.sort_by_key(|(ordinal, _)| *ordinal);
        edges.into_iter().map(|(_, node)| PassHandle(node)).collect()
    }

    fn instance_mut(&mut self, handle: PassHandle) -> Result<&mut PassInstance<D>> {
        Ok(self.graph.node_weight_mut(handle.0).ok_or(Error::NodeNotFound)?)
    }

    /// Rebuild the root framebuffers for a new swapchain and propagate the new resolution to every pass.
    /// Offscreen passes already at this resolution are left untouched.
    pub fn resize(&mut self, ctx: &Context<D>, swapchain: &dyn Swapchain) -> Result<()> {
        let extent = swapchain.extent();
        let root = self.root();
        self.instance_mut(root)?.rebuild_present(ctx, swapchain)?;
        for child in self.children(root) {
            self.resize_pass(ctx, child, extent)?;
        }
        Ok(())
    }

    /// Resize an offscreen pass and its subtree. Children are always visited, even if this pass is already at
    /// `extent`.
    pub fn resize_pass(&mut self, ctx: &Context<D>, handle: PassHandle, extent: vk::Extent2D) -> Result<()> {
        for child in self.children(handle) {
            self.resize_pass(ctx, child, extent)?;
        }
        self.instance_mut(handle)?.resize_offscreen(ctx, extent)?;
        Ok(())
    }

    fn new_frame(&mut self, handle: PassHandle) -> Result<()> {
        self.instance_mut(handle)?.rendered = false;
        for child in self.children(handle) {
            self.new_frame(child)?;
        }
        Ok(())
    }

    fn render_pass_instance(
        &mut self,
        ctx: &Context<D>,
        handle: PassHandle,
        swapchain_image: usize,
        cmd: vk::CommandBuffer,
        executed: &mut Vec<PassHandle>,
    ) -> Result<()> {
        if self.instance_mut(handle)?.rendered {
            return Ok(());
        }
        for child in self.children(handle) {
            self.render_pass_instance(ctx, child, swapchain_image, cmd, executed)?;
        }

        let instance = self.instance(handle).ok_or(Error::NodeNotFound)?;
        let framebuffer = instance
            .framebuffer(swapchain_image)
            .ok_or(Error::Uncategorized("Pass was rendered before its render targets were allocated."))?;
        let extent = instance
            .resolution()
            .ok_or(Error::Uncategorized("Pass was rendered before its render targets were allocated."))?;
        // SAFETY: The render pass object is kept alive by the instance.
        let render_pass = unsafe { instance.render_pass().handle() };
        let clear_values = instance.step().infos().clear_values();
        let device = ctx.device();
        device.cmd_begin_render_pass(
            cmd,
            render_pass,
            framebuffer,
            vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            },
            clear_values.as_slice(),
        );
        let recorded = instance.step().record(&RecordContext {
            name: instance.step().name(),
            command_buffer: cmd,
            render_pass,
            extent,
            image_index: ctx.current_image(),
            swapchain_image,
        });
        device.cmd_end_render_pass(cmd);
        recorded?;

        self.instance_mut(handle)?.rendered = true;
        executed.push(handle);
        Ok(())
    }

    /// Record the frame rendering to the acquired swapchain image `swapchain_image` into the command buffer of its
    /// framebuffer. The in-flight image of `ctx` is passed on to the record callbacks.
    /// Returns the passes in the order they were recorded.
    /// # Errors
    /// * Fails if `swapchain_image` is not an image of the swapchain the graph was last resized for.
    pub fn render(&mut self, ctx: &Context<D>, swapchain_image: usize) -> Result<Vec<PassHandle>> {
        let root = self.root();
        self.new_frame(root)?;

        let framebuffer = self.framebuffer(swapchain_image)?;
        let cmd = framebuffer.command_buffer();
        // SAFETY: The command buffer is owned by the root framebuffer, which lives until the next resize.
        let handle = unsafe { cmd.handle() };
        cmd.begin(true)?;

        let mut executed = Vec::with_capacity(self.instance_count());
        self.render_pass_instance(ctx, root, swapchain_image, handle, &mut executed)?;

        self.framebuffer(swapchain_image)?.command_buffer().end()?;
        Ok(executed)
    }

    /// Submit the frame recorded by [`RenderPassRoot::render`] for `swapchain_image`. The submission waits on `wait`
    /// (usually the image acquire semaphore) and signals `fence` and the semaphore returned by
    /// [`RenderPassRoot::render_finished`] for the same image.
    pub fn submit(&self, swapchain_image: usize, wait: &[vk::Semaphore], fence: Option<&Fence<D>>) -> Result<()> {
        let framebuffer = self.framebuffer(swapchain_image)?;
        // SAFETY: The semaphore outlives the submission since the framebuffer is only destroyed through the
        // deletion queue.
        let signal = unsafe { framebuffer.render_finished().handle() };
        framebuffer
            .command_buffer()
            .submit(wait, std::slice::from_ref(&signal), fence)
    }

    /// The semaphore signaled when rendering to swapchain image `swapchain_image` completed. Present after waiting
    /// on this.
    pub fn render_finished(&self, swapchain_image: usize) -> Option<&Semaphore<D>> {
        self.framebuffer(swapchain_image)
            .ok()
            .map(|framebuffer| framebuffer.render_finished())
    }

    fn framebuffer(&self, swapchain_image: usize) -> Result<&Framebuffer<D>> {
        let target = self
            .instance(self.root())
            .and_then(|root| root.present_target())
            .ok_or(Error::NodeNotFound)?;
        let framebuffers = target.framebuffers();
        Ok(framebuffers
            .get(swapchain_image)
            .ok_or(Error::SwapchainImageOutOfRange {
                image: swapchain_image,
                count: framebuffers.len(),
            })?)
    }

    /// Export the graph in graphviz `dot` format. Edges point from a pass to the passes it depends on.
    pub fn to_dot(&self) -> String {
        let graph = self
            .graph
            .map(|_, instance| instance.step().name().to_owned(), |_, ordinal| *ordinal);
        format!("{}", Dot::new(&graph))
    }
}
