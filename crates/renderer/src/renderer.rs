//! Main renderer orchestration.
//!
//! This module provides the main [`Renderer`] struct that coordinates
//! all device resources and rendering operations.

use ash::vk;
use glam::Mat4;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use minirender_rhi::RhiResult;
use minirender_rhi::backend::{GpuDevice, GpuInstance, RenderPassBegin};
use minirender_rhi::command::CommandBuffer;
use minirender_rhi::device::{DeviceConfig, DeviceContext};
use minirender_rhi::pipeline::{PipelineConfig, create_graphics_pipeline, create_pipeline_layout};
use minirender_rhi::render_pass::{
    RenderPassConfig, create_framebuffers, create_render_pass, destroy_framebuffers,
};
use minirender_rhi::swapchain::Swapchain;
use minirender_rhi::vertex::Vertex;

use crate::config::{RendererConfig, TransformDelivery};
use crate::depth_buffer::{DepthBuffer, choose_depth_format};
use crate::error::{RendererError, RendererResult};
use crate::frame::FrameManager;
use crate::mesh::Mesh;
use crate::ubo::{ModelPush, UboViewProjection, UniformBinding};

/// Result of one [`Renderer::draw`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawOutcome {
    /// The frame was submitted and presented.
    Presented { image_index: u32, slot: usize },
    /// The swapchain no longer matched the surface. It has been recreated
    /// when the surface has a drawable size; nothing was presented.
    SwapchainOutOfDate,
}

/// Everything sized or formatted after the swapchain.
struct Presentation {
    swapchain: Swapchain,
    depth: Option<DepthBuffer>,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
}

impl Presentation {
    fn new(
        ctx: &DeviceContext,
        framebuffer_extent: vk::Extent2D,
        depth_format: Option<vk::Format>,
    ) -> RhiResult<Self> {
        let device = ctx.device().as_ref();
        let swapchain = Swapchain::new(ctx, framebuffer_extent, vk::SwapchainKHR::null())?;

        let depth = match create_depth(ctx, swapchain.extent(), depth_format) {
            Ok(depth) => depth,
            Err(e) => {
                swapchain.destroy();
                return Err(e);
            }
        };

        let render_pass = match create_render_pass(
            device,
            &RenderPassConfig {
                color_format: swapchain.format(),
                depth_format,
            },
        ) {
            Ok(render_pass) => render_pass,
            Err(e) => {
                if let Some(depth) = depth {
                    depth.destroy(device);
                }
                swapchain.destroy();
                return Err(e);
            }
        };

        let mut presentation = Self {
            swapchain,
            depth,
            render_pass,
            framebuffers: Vec::new(),
        };
        if let Err(e) = presentation.create_framebuffers(device) {
            presentation.destroy(device);
            return Err(e);
        }
        Ok(presentation)
    }

    fn create_framebuffers(&mut self, device: &dyn GpuDevice) -> RhiResult<()> {
        self.framebuffers = create_framebuffers(
            device,
            self.render_pass,
            self.swapchain.image_views(),
            self.depth.as_ref().map(DepthBuffer::image_view),
            self.swapchain.extent(),
        )?;
        Ok(())
    }

    fn destroy_framebuffers(&mut self, device: &dyn GpuDevice) {
        destroy_framebuffers(device, std::mem::take(&mut self.framebuffers));
    }

    fn destroy_depth(&mut self, device: &dyn GpuDevice) {
        if let Some(depth) = self.depth.take() {
            depth.destroy(device);
        }
    }

    /// Destroys framebuffers, render pass, depth resource, then the swapchain.
    fn destroy(mut self, device: &dyn GpuDevice) {
        self.destroy_framebuffers(device);
        device.destroy_render_pass(self.render_pass);
        self.destroy_depth(device);
        self.swapchain.destroy();
    }
}

fn create_depth(
    ctx: &DeviceContext,
    extent: vk::Extent2D,
    depth_format: Option<vk::Format>,
) -> RhiResult<Option<DepthBuffer>> {
    depth_format
        .map(|format| {
            DepthBuffer::new(
                ctx.device().as_ref(),
                ctx.memory_properties(),
                extent,
                format,
            )
        })
        .transpose()
}

/// Pipeline layout plus the graphics pipeline built against it.
struct GraphicsPipeline {
    layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
}

impl GraphicsPipeline {
    fn new(
        device: &dyn GpuDevice,
        config: &PipelineConfig,
        set_layout: vk::DescriptorSetLayout,
        delivery: TransformDelivery,
        render_pass: vk::RenderPass,
        shaders: &ShaderCode,
    ) -> RhiResult<Self> {
        let layout = create_pipeline_layout(device, set_layout, delivery)?;
        let pipeline = match create_graphics_pipeline(
            device,
            config,
            layout,
            render_pass,
            &shaders.vertex,
            &shaders.fragment,
        ) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                device.destroy_pipeline_layout(layout);
                return Err(e);
            }
        };
        Ok(Self { layout, pipeline })
    }

    /// Destroys the pipeline, then its layout.
    fn destroy(self, device: &dyn GpuDevice) {
        device.destroy_pipeline(self.pipeline);
        device.destroy_pipeline_layout(self.layout);
    }
}

/// SPIR-V kept around to rebuild the pipeline for a new render pass.
struct ShaderCode {
    vertex: Vec<u8>,
    fragment: Vec<u8>,
}

/// Main renderer that owns every device resource.
///
/// # Resource Destruction Order
///
/// [`Renderer::destroy`] waits for the device to go idle, then destroys:
/// 1. Descriptor pool and set layout, then the uniform buffers
/// 2. Mesh buffers
/// 3. Per-slot sync objects, then the command pool
/// 4. Framebuffers
/// 5. Pipeline and pipeline layout
/// 6. Render pass
/// 7. Depth resource
/// 8. Swapchain image views and swapchain
/// 9. Surface, device and instance
///
/// There is no `Drop` impl: dropping a renderer without calling
/// [`Renderer::destroy`] leaks it and the owned wrappers log the leak.
pub struct Renderer {
    ctx: DeviceContext,
    config: RendererConfig,
    depth_format: Option<vk::Format>,
    pipeline_config: PipelineConfig,
    shaders: ShaderCode,
    presentation: Presentation,
    binding: UniformBinding,
    pipeline: GraphicsPipeline,
    frames: FrameManager,
    meshes: Vec<Mesh>,
    view_projection: UboViewProjection,
    /// Size the next swapchain should match.
    framebuffer_extent: vk::Extent2D,
    /// Flag indicating swapchain needs recreation.
    resize_requested: bool,
}

impl Renderer {
    /// Brings up the device and every resource needed to draw.
    ///
    /// Takes ownership of `instance` and `surface`: they are destroyed on
    /// failure or by [`Renderer::destroy`].
    ///
    /// # Errors
    ///
    /// Returns the first failure. Everything created before it is destroyed.
    pub fn new(
        instance: Arc<dyn GpuInstance>,
        surface: vk::SurfaceKHR,
        framebuffer_extent: vk::Extent2D,
        config: RendererConfig,
        vert_spv: &[u8],
        frag_spv: &[u8],
    ) -> RendererResult<Self> {
        info!(
            "Initializing renderer on {} backend ({}x{})",
            instance.backend_name(),
            framebuffer_extent.width,
            framebuffer_extent.height
        );

        let device_config = DeviceConfig {
            enable_validation: config.enable_validation,
        };
        let ctx = match DeviceContext::new(instance.clone(), surface, &device_config) {
            Ok(ctx) => ctx,
            Err(e) => {
                instance.destroy_surface(surface);
                instance.destroy();
                return Err(e.into());
            }
        };

        let shaders = ShaderCode {
            vertex: vert_spv.to_vec(),
            fragment: frag_spv.to_vec(),
        };

        match Self::create_resources(&ctx, &config, &shaders, framebuffer_extent) {
            Ok((depth_format, pipeline_config, presentation, binding, pipeline, frames)) => {
                info!(
                    "Renderer ready: {} swapchain images, {} upload, {:?} transforms, depth {}",
                    presentation.swapchain.image_count(),
                    config.upload_strategy.name(),
                    config.transform_delivery,
                    if depth_format.is_some() { "on" } else { "off" }
                );
                Ok(Self {
                    ctx,
                    config,
                    depth_format,
                    pipeline_config,
                    shaders,
                    presentation,
                    binding,
                    pipeline,
                    frames,
                    meshes: Vec::new(),
                    view_projection: UboViewProjection::default(),
                    framebuffer_extent,
                    resize_requested: false,
                })
            }
            Err(e) => {
                ctx.destroy();
                Err(e.into())
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn create_resources(
        ctx: &DeviceContext,
        config: &RendererConfig,
        shaders: &ShaderCode,
        framebuffer_extent: vk::Extent2D,
    ) -> RhiResult<(
        Option<vk::Format>,
        PipelineConfig,
        Presentation,
        UniformBinding,
        GraphicsPipeline,
        FrameManager,
    )> {
        let device = ctx.device();

        let depth_format = config
            .depth
            .then(|| choose_depth_format(ctx.instance().as_ref(), ctx.physical_device().device))
            .transpose()?;

        let presentation = Presentation::new(ctx, framebuffer_extent, depth_format)?;
        let image_count = presentation.swapchain.image_count();

        let binding = match UniformBinding::new(
            device.clone(),
            ctx.memory_properties(),
            ctx.physical_device().min_uniform_buffer_offset_alignment(),
            config.transform_delivery,
            image_count,
        ) {
            Ok(binding) => binding,
            Err(e) => {
                presentation.destroy(device.as_ref());
                return Err(e);
            }
        };

        let pipeline_config = PipelineConfig::new(config.front_face, depth_format.is_some());
        let pipeline = match GraphicsPipeline::new(
            device.as_ref(),
            &pipeline_config,
            binding.set_layout(),
            config.transform_delivery,
            presentation.render_pass,
            shaders,
        ) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                binding.destroy();
                presentation.destroy(device.as_ref());
                return Err(e);
            }
        };

        let frames =
            match FrameManager::new(device.clone(), ctx.queue_families().graphics, image_count) {
                Ok(frames) => frames,
                Err(e) => {
                    binding.destroy();
                    pipeline.destroy(device.as_ref());
                    presentation.destroy(device.as_ref());
                    return Err(e);
                }
            };

        Ok((
            depth_format,
            pipeline_config,
            presentation,
            binding,
            pipeline,
            frames,
        ))
    }

    // =========================================================================
    // Scene
    // =========================================================================

    /// Uploads a mesh and returns its index.
    ///
    /// # Errors
    ///
    /// Returns [`RendererError::TooManyObjects`] when the dynamic model buffer
    /// is full, or the upload failure.
    pub fn add_mesh(&mut self, vertices: &[Vertex], indices: Option<&[u32]>) -> RendererResult<usize> {
        if let Some(max) = self.binding.max_objects()
            && self.meshes.len() >= max as usize
        {
            return Err(RendererError::TooManyObjects { max });
        }

        let mesh = Mesh::new(
            &self.ctx,
            self.ctx.graphics_queue(),
            self.frames.command_pool(),
            vertices,
            indices,
            self.config.upload_strategy,
        )?;
        self.meshes.push(mesh);

        let index = self.meshes.len() - 1;
        debug!("Added mesh {}", index);
        Ok(index)
    }

    /// Sets the model transform of mesh `index`.
    pub fn update_model(&mut self, index: usize, model: Mat4) -> RendererResult<()> {
        let count = self.meshes.len();
        let mesh = self
            .meshes
            .get_mut(index)
            .ok_or(RendererError::MeshIndexOutOfRange { index, count })?;
        mesh.set_model(model);
        Ok(())
    }

    /// Stores the view-projection written to each acquired image's buffer.
    pub fn set_view_projection(&mut self, view_projection: UboViewProjection) {
        self.view_projection = view_projection;
    }

    /// Records a new framebuffer size. The swapchain is recreated after the
    /// next presented frame.
    pub fn request_resize(&mut self, framebuffer_extent: vk::Extent2D) {
        debug!(
            "Resize requested: {}x{}",
            framebuffer_extent.width, framebuffer_extent.height
        );
        self.framebuffer_extent = framebuffer_extent;
        self.resize_requested = true;
    }

    // =========================================================================
    // Frame Loop
    // =========================================================================

    /// Renders and presents one frame.
    ///
    /// # Errors
    ///
    /// Out-of-date and suboptimal swapchains are handled here; every other
    /// failure is returned and should be treated as fatal.
    pub fn draw(&mut self) -> RendererResult<DrawOutcome> {
        let (image_index, _suboptimal) = match self.frames.acquire(&self.presentation.swapchain) {
            Ok(acquired) => acquired,
            Err(e) if e.is_out_of_date() => {
                warn!("Swapchain out of date on acquire; recreating");
                self.recreate_swapchain()?;
                return Ok(DrawOutcome::SwapchainOutOfDate);
            }
            Err(e) => return Err(e.into()),
        };

        self.frames.wait_for_slot(image_index)?;
        self.update_uniforms(image_index)?;

        let cmd = self.frames.begin_recording()?;
        self.record(cmd, image_index)?;
        self.frames.end_recording()?;

        self.frames.submit(self.ctx.graphics_queue())?;
        let slot = self.frames.current_slot();

        let presented = self.frames.present(
            &self.presentation.swapchain,
            self.ctx.present_queue(),
            image_index,
        );
        self.frames.advance();
        trace!("Frame {} drawn on slot {}", self.frames.frames_drawn(), slot);

        let outcome = match presented {
            Ok(suboptimal) => {
                if suboptimal || self.resize_requested {
                    if suboptimal {
                        warn!("Swapchain suboptimal on present; recreating");
                    }
                    self.recreate_swapchain()?;
                }
                DrawOutcome::Presented { image_index, slot }
            }
            Err(e) if e.is_out_of_date() => {
                warn!("Swapchain out of date on present; recreating");
                self.recreate_swapchain()?;
                DrawOutcome::SwapchainOutOfDate
            }
            Err(e) => return Err(e.into()),
        };
        Ok(outcome)
    }

    fn update_uniforms(&self, image_index: u32) -> RhiResult<()> {
        self.binding
            .update_view_projection(image_index, &self.view_projection)?;
        if self.binding.delivery().is_dynamic_uniform() {
            for (i, mesh) in self.meshes.iter().enumerate() {
                self.binding.update_model(image_index, i, &mesh.model())?;
            }
        }
        Ok(())
    }

    fn record(&self, cmd: &CommandBuffer, image_index: u32) -> RhiResult<()> {
        let extent = self.presentation.swapchain.extent();
        let framebuffer = self
            .presentation
            .framebuffers
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| {
                minirender_rhi::RhiError::InvalidUsage(format!(
                    "No framebuffer for swapchain image {}",
                    image_index
                ))
            })?;
        let descriptor_set = self.binding.descriptor_set(image_index)?;
        let layout = self.pipeline.layout;

        cmd.begin_render_pass(&RenderPassBegin {
            render_pass: self.presentation.render_pass,
            framebuffer,
            extent,
            clear_color: self.config.clear_color,
            clear_depth: self.depth_format.map(|_| 1.0),
        });
        cmd.bind_pipeline(self.pipeline.pipeline);
        cmd.set_viewport(extent);
        cmd.set_scissor(extent);

        for (i, mesh) in self.meshes.iter().enumerate() {
            mesh.bind(cmd);
            match self.binding.delivery() {
                TransformDelivery::PushConstants => {
                    cmd.push_constants(
                        layout,
                        vk::ShaderStageFlags::VERTEX,
                        0,
                        &ModelPush {
                            model: mesh.model(),
                        },
                    );
                    cmd.bind_descriptor_sets(layout, 0, &[descriptor_set], &[]);
                }
                TransformDelivery::DynamicUniform { .. } => {
                    cmd.bind_descriptor_sets(
                        layout,
                        0,
                        &[descriptor_set],
                        &[self.binding.dynamic_offset(i)],
                    );
                }
            }
            mesh.draw(cmd);
        }

        cmd.end_render_pass();
        Ok(())
    }

    /// Rebuilds the swapchain and everything that depends on it.
    ///
    /// Returns false without doing anything while the framebuffer has a zero
    /// dimension (a minimized window).
    pub fn recreate_swapchain(&mut self) -> RendererResult<bool> {
        let extent = self.framebuffer_extent;
        if extent.width == 0 || extent.height == 0 {
            debug!("Skipping swapchain recreation for zero-sized framebuffer");
            return Ok(false);
        }

        self.ctx.wait_idle()?;
        let device = self.ctx.device().clone();
        let device = device.as_ref();

        let old_format = self.presentation.swapchain.format();
        let old_count = self.presentation.swapchain.image_count();

        self.presentation.destroy_framebuffers(device);
        self.presentation.destroy_depth(device);
        self.presentation.swapchain.recreate(&self.ctx, extent)?;

        let new_extent = self.presentation.swapchain.extent();
        self.presentation.depth = create_depth(&self.ctx, new_extent, self.depth_format)?;

        let format = self.presentation.swapchain.format();
        if format != old_format {
            info!(
                "Swapchain format changed from {:?} to {:?}; rebuilding render pass",
                old_format, format
            );
            let render_pass = create_render_pass(
                device,
                &RenderPassConfig {
                    color_format: format,
                    depth_format: self.depth_format,
                },
            )?;
            let pipeline = match create_graphics_pipeline(
                device,
                &self.pipeline_config,
                self.pipeline.layout,
                render_pass,
                &self.shaders.vertex,
                &self.shaders.fragment,
            ) {
                Ok(pipeline) => pipeline,
                Err(e) => {
                    device.destroy_render_pass(render_pass);
                    return Err(e.into());
                }
            };
            device.destroy_pipeline(self.pipeline.pipeline);
            device.destroy_render_pass(self.presentation.render_pass);
            self.pipeline.pipeline = pipeline;
            self.presentation.render_pass = render_pass;
        }

        self.presentation.create_framebuffers(device)?;

        let image_count = self.presentation.swapchain.image_count();
        if image_count != old_count {
            self.binding
                .rebuild(self.ctx.memory_properties(), image_count)?;
        }
        self.frames.reset_image_tracking(image_count);
        self.resize_requested = false;

        info!(
            "Swapchain recreated: {}x{}, {} images",
            new_extent.width, new_extent.height, image_count
        );
        Ok(true)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[inline]
    pub fn context(&self) -> &DeviceContext {
        &self.ctx
    }

    #[inline]
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    #[inline]
    pub fn swapchain(&self) -> &Swapchain {
        &self.presentation.swapchain
    }

    #[inline]
    pub fn depth_buffer(&self) -> Option<&DepthBuffer> {
        self.presentation.depth.as_ref()
    }

    #[inline]
    pub fn render_pass(&self) -> vk::RenderPass {
        self.presentation.render_pass
    }

    #[inline]
    pub fn framebuffers(&self) -> &[vk::Framebuffer] {
        &self.presentation.framebuffers
    }

    #[inline]
    pub fn pipeline(&self) -> vk::Pipeline {
        self.pipeline.pipeline
    }

    #[inline]
    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline.layout
    }

    #[inline]
    pub fn uniforms(&self) -> &UniformBinding {
        &self.binding
    }

    #[inline]
    pub fn frames(&self) -> &FrameManager {
        &self.frames
    }

    #[inline]
    pub fn meshes(&self) -> &[Mesh] {
        &self.meshes
    }

    #[inline]
    pub fn view_projection(&self) -> &UboViewProjection {
        &self.view_projection
    }

    /// Width over height of the current swapchain.
    pub fn aspect_ratio(&self) -> f32 {
        let extent = self.presentation.swapchain.extent();
        extent.width as f32 / extent.height.max(1) as f32
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Waits for the device to go idle and destroys everything.
    pub fn destroy(self) {
        info!("Shutting down renderer...");

        let Self {
            ctx,
            mut presentation,
            binding,
            pipeline,
            frames,
            meshes,
            ..
        } = self;

        if let Err(e) = ctx.wait_idle() {
            warn!("Device wait idle failed during shutdown: {}", e);
        }

        let device = ctx.device().clone();
        binding.destroy();
        for mesh in meshes {
            mesh.destroy_buffers(device.as_ref());
        }
        frames.destroy();
        presentation.destroy_framebuffers(device.as_ref());
        pipeline.destroy(device.as_ref());
        presentation.destroy(device.as_ref());
        drop(device);

        ctx.destroy();
        info!("Renderer shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minirender_rhi::headless::HeadlessInstance;
    use minirender_rhi::shader::SPIRV_MAGIC;

    fn spirv() -> Vec<u8> {
        [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect()
    }

    fn renderer(config: RendererConfig) -> (Arc<HeadlessInstance>, Renderer) {
        let instance = HeadlessInstance::new_default();
        let extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let surface = instance.create_surface(extent);
        let renderer = Renderer::new(instance.clone(), surface, extent, config, &spirv(), &spirv())
            .unwrap();
        (instance, renderer)
    }

    #[test]
    fn test_draw_without_meshes() {
        let (instance, mut renderer) = renderer(RendererConfig::default());
        let outcome = renderer.draw().unwrap();
        assert_eq!(
            outcome,
            DrawOutcome::Presented {
                image_index: 0,
                slot: 0
            }
        );
        assert_eq!(renderer.frames().current_slot(), 1);

        renderer.destroy();
        assert!(instance.is_destroyed());
    }

    #[test]
    fn test_depth_off_has_no_depth_buffer() {
        let (_instance, renderer) = renderer(RendererConfig::default().with_depth(false));
        assert!(renderer.depth_buffer().is_none());
        assert_eq!(renderer.framebuffers().len(), 3);
        renderer.destroy();
    }

    #[test]
    fn test_update_model_out_of_range() {
        let (_instance, mut renderer) = renderer(RendererConfig::default());
        let err = renderer.update_model(0, Mat4::IDENTITY).unwrap_err();
        assert!(matches!(
            err,
            RendererError::MeshIndexOutOfRange { index: 0, count: 0 }
        ));
        renderer.destroy();
    }

    #[test]
    fn test_aspect_ratio() {
        let (_instance, renderer) = renderer(RendererConfig::default());
        assert!((renderer.aspect_ratio() - 800.0 / 600.0).abs() < 1e-6);
        renderer.destroy();
    }
}
