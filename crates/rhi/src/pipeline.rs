//! Graphics pipeline management.
//!
//! This module creates the pipeline layout and the single graphics pipeline
//! the renderer draws with.
//!
//! # Overview
//!
//! - [`TransformDelivery`] picks how per-object model matrices reach the
//!   vertex shader, which decides the pipeline layout's push constant range
//! - [`PipelineConfig`] holds the fixed-function state
//! - [`create_graphics_pipeline`] wraps the SPIR-V blobs in shader modules,
//!   creates the pipeline and destroys the modules again
//!
//! Viewport and scissor are dynamic, so a pipeline survives swapchain resizes
//! as long as the surface format stays the same.
//!
//! # Example
//!
//! ```no_run
//! use minirender_rhi::backend::GpuDevice;
//! use minirender_rhi::pipeline::{
//!     PipelineConfig, TransformDelivery, create_graphics_pipeline, create_pipeline_layout,
//! };
//! use minirender_rhi::vk;
//!
//! # fn example(
//! #     device: &dyn GpuDevice,
//! #     set_layout: vk::DescriptorSetLayout,
//! #     render_pass: vk::RenderPass,
//! #     vert: &[u8],
//! #     frag: &[u8],
//! # ) -> Result<(), minirender_rhi::RhiError> {
//! let layout = create_pipeline_layout(device, set_layout, TransformDelivery::PushConstants)?;
//! let config = PipelineConfig::default();
//! let pipeline = create_graphics_pipeline(device, &config, layout, render_pass, vert, frag)?;
//! # Ok(())
//! # }
//! ```

use ash::vk;
use tracing::{debug, info};

use crate::backend::{GpuDevice, GraphicsPipelineDesc};
use crate::error::RhiResult;
use crate::shader::{ENTRY_POINT, Shader, ShaderStage};
use crate::vertex::Vertex;

/// Size in bytes of one model matrix.
pub const MODEL_MATRIX_SIZE: u32 = std::mem::size_of::<glam::Mat4>() as u32;

/// How per-object model matrices are delivered to the vertex shader.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransformDelivery {
    /// A 64-byte push constant range at offset 0, pushed before each draw.
    #[default]
    PushConstants,
    /// One dynamic uniform buffer per swapchain image holding up to
    /// `max_objects` aligned matrices, selected by dynamic offset.
    DynamicUniform { max_objects: u32 },
}

impl TransformDelivery {
    /// Returns true if model matrices travel through a dynamic uniform buffer.
    #[inline]
    pub fn is_dynamic_uniform(self) -> bool {
        matches!(self, TransformDelivery::DynamicUniform { .. })
    }

    /// Push constant ranges the pipeline layout needs.
    pub fn push_constant_ranges(self) -> Vec<vk::PushConstantRange> {
        match self {
            TransformDelivery::PushConstants => vec![vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::VERTEX,
                offset: 0,
                size: MODEL_MATRIX_SIZE,
            }],
            TransformDelivery::DynamicUniform { .. } => Vec::new(),
        }
    }
}

/// Front face winding order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrontFace {
    /// Counter-clockwise winding is front-facing.
    #[default]
    CounterClockwise,
    /// Clockwise winding is front-facing.
    Clockwise,
}

impl FrontFace {
    /// Converts to Vulkan front face.
    pub fn to_vk(self) -> vk::FrontFace {
        match self {
            FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
            FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
        }
    }
}

/// Color blend attachment configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorBlendAttachment {
    /// Enable blending for this attachment.
    pub blend_enable: bool,
    pub src_color_blend_factor: vk::BlendFactor,
    pub dst_color_blend_factor: vk::BlendFactor,
    pub color_blend_op: vk::BlendOp,
    pub src_alpha_blend_factor: vk::BlendFactor,
    pub dst_alpha_blend_factor: vk::BlendFactor,
    pub alpha_blend_op: vk::BlendOp,
    pub color_write_mask: vk::ColorComponentFlags,
}

impl Default for ColorBlendAttachment {
    fn default() -> Self {
        Self::alpha_blend()
    }
}

impl ColorBlendAttachment {
    /// Creates a blend attachment with alpha blending enabled.
    ///
    /// Uses standard alpha blending: `src * src_alpha + dst * (1 - src_alpha)`,
    /// while the destination alpha takes the source alpha unchanged.
    pub fn alpha_blend() -> Self {
        Self {
            blend_enable: true,
            src_color_blend_factor: vk::BlendFactor::SRC_ALPHA,
            dst_color_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            color_blend_op: vk::BlendOp::ADD,
            src_alpha_blend_factor: vk::BlendFactor::ONE,
            dst_alpha_blend_factor: vk::BlendFactor::ZERO,
            alpha_blend_op: vk::BlendOp::ADD,
            color_write_mask: vk::ColorComponentFlags::RGBA,
        }
    }

    /// Converts to Vulkan pipeline color blend attachment state.
    pub fn to_vk(&self) -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState {
            blend_enable: self.blend_enable.into(),
            src_color_blend_factor: self.src_color_blend_factor,
            dst_color_blend_factor: self.dst_color_blend_factor,
            color_blend_op: self.color_blend_op,
            src_alpha_blend_factor: self.src_alpha_blend_factor,
            dst_alpha_blend_factor: self.dst_alpha_blend_factor,
            alpha_blend_op: self.alpha_blend_op,
            color_write_mask: self.color_write_mask,
        }
    }
}

/// Fixed-function state of the graphics pipeline.
///
/// Defaults:
///
/// - Vertex input: [`Vertex`] at binding 0
/// - Primitive topology: Triangle list, no primitive restart
/// - Polygon mode: Fill, line width 1
/// - Cull mode: Back-face culling
/// - Front face: Counter-clockwise
/// - Multisampling: 1 sample
/// - Blending: [`ColorBlendAttachment::alpha_blend`]
/// - Depth: test `LESS` with writes
/// - Dynamic states: Viewport and Scissor
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub vertex_binding: vk::VertexInputBindingDescription,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub line_width: f32,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: FrontFace,
    pub samples: vk::SampleCountFlags,
    pub color_blend: ColorBlendAttachment,
    /// Enables depth test and writes. The render pass must have a depth attachment.
    pub depth_test: bool,
    pub depth_compare_op: vk::CompareOp,
    pub dynamic_states: Vec<vk::DynamicState>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            vertex_binding: Vertex::binding_description(),
            vertex_attributes: Vertex::attribute_descriptions().to_vec(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            line_width: 1.0,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: FrontFace::CounterClockwise,
            samples: vk::SampleCountFlags::TYPE_1,
            color_blend: ColorBlendAttachment::alpha_blend(),
            depth_test: true,
            depth_compare_op: vk::CompareOp::LESS,
            dynamic_states: vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
        }
    }
}

impl PipelineConfig {
    /// Default state with the given winding and depth setting.
    pub fn new(front_face: FrontFace, depth_test: bool) -> Self {
        Self {
            front_face,
            depth_test,
            ..Default::default()
        }
    }
}

/// Creates a pipeline layout with one descriptor set layout and the push
/// constant ranges `delivery` needs.
pub fn create_pipeline_layout(
    device: &dyn GpuDevice,
    set_layout: vk::DescriptorSetLayout,
    delivery: TransformDelivery,
) -> RhiResult<vk::PipelineLayout> {
    let push_constant_ranges = delivery.push_constant_ranges();
    let layout = device.create_pipeline_layout(&[set_layout], &push_constant_ranges)?;

    debug!(
        "Created pipeline layout with {} push constant range(s)",
        push_constant_ranges.len()
    );
    Ok(layout)
}

/// Creates the graphics pipeline from SPIR-V vertex and fragment bytecode.
///
/// Both shader modules are destroyed before returning, whether or not
/// pipeline creation succeeded.
///
/// # Errors
///
/// Returns [`RhiError::ShaderError`](crate::RhiError::ShaderError) for blobs
/// that are not SPIR-V, or the backend error if pipeline creation fails.
pub fn create_graphics_pipeline(
    device: &dyn GpuDevice,
    config: &PipelineConfig,
    layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
    vert_spv: &[u8],
    frag_spv: &[u8],
) -> RhiResult<vk::Pipeline> {
    let vertex_shader = Shader::from_spirv_bytes(device, vert_spv, ShaderStage::Vertex)?;
    let fragment_shader = match Shader::from_spirv_bytes(device, frag_spv, ShaderStage::Fragment) {
        Ok(shader) => shader,
        Err(e) => {
            vertex_shader.destroy(device);
            return Err(e);
        }
    };

    let vertex_bindings = [config.vertex_binding];
    let result = device.create_graphics_pipeline(&GraphicsPipelineDesc {
        vertex_shader: vertex_shader.handle(),
        fragment_shader: fragment_shader.handle(),
        entry_point: ENTRY_POINT,
        vertex_bindings: &vertex_bindings,
        vertex_attributes: &config.vertex_attributes,
        topology: config.topology,
        polygon_mode: config.polygon_mode,
        cull_mode: config.cull_mode,
        front_face: config.front_face.to_vk(),
        line_width: config.line_width,
        samples: config.samples,
        color_blend: config.color_blend.to_vk(),
        depth_compare: config.depth_test.then_some(config.depth_compare_op),
        dynamic_states: &config.dynamic_states,
        extent: vk::Extent2D::default(),
        layout,
        render_pass,
        subpass: 0,
    });

    // Modules are only needed during creation
    fragment_shader.destroy(device);
    vertex_shader.destroy(device);

    let pipeline = result?;
    info!(
        "Graphics pipeline created (front face {:?}, depth {})",
        config.front_face,
        if config.depth_test { "on" } else { "off" }
    );
    Ok(pipeline)
}
