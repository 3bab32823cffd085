use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk;
use ash::vk::Handle;
use tracing::{debug, info, trace, warn};

use super::{
    DeviceEvent, DrawRecord, FailPoint, HeadlessAdapter, ObjectKind, RenderPassBeginRecord,
    Shared, lock,
};
use crate::backend::{
    BufferDesc, DescriptorBinding, DescriptorBufferWrite, FramebufferDesc, GpuDevice,
    GraphicsPipelineDesc, ImageDesc, ImageViewDesc, PresentDesc, RenderPassBegin, RenderPassDesc,
    SubmitDesc, SwapchainDesc,
};
use crate::error::{RhiError, RhiResult, SubmissionOp};

/// Alignment and size granularity of buffer memory requirements.
const BUFFER_ALIGNMENT: vk::DeviceSize = 256;

/// Upper bound on push constant bytes, matching the reported device limit.
const MAX_PUSH_CONSTANTS_SIZE: u32 = 128;

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Snapshot of a buffer for inspection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferInfo {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub memory: Option<vk::DeviceMemory>,
    pub memory_flags: Option<vk::MemoryPropertyFlags>,
}

/// Owned copy of the state a graphics pipeline was created with.
#[derive(Clone, Debug)]
pub struct PipelineInfo {
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub line_width: f32,
    pub samples: vk::SampleCountFlags,
    pub color_blend: vk::PipelineColorBlendAttachmentState,
    pub depth_compare: Option<vk::CompareOp>,
    pub dynamic_states: Vec<vk::DynamicState>,
    pub layout: vk::PipelineLayout,
    pub render_pass: vk::RenderPass,
    pub entry_point: String,
}

/// Snapshot of a swapchain for inspection.
#[derive(Clone, Debug)]
pub struct SwapchainInfo {
    pub surface: vk::SurfaceKHR,
    pub extent: vk::Extent2D,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub sharing_mode: vk::SharingMode,
    pub queue_family_indices: Vec<u32>,
    pub images: Vec<vk::Image>,
    /// Set once the swapchain was passed as `old_swapchain` to a new one.
    pub retired: bool,
}

struct BufferRecord {
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    binding: Option<(u64, vk::DeviceSize)>,
}

struct MemoryRecord {
    flags: vk::MemoryPropertyFlags,
    data: Vec<u8>,
}

struct ImageRecord {
    desc: ImageDesc,
    bound: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CommandBufferState {
    Initial,
    Recording,
    Executable,
    Invalid,
}

#[derive(Clone, Debug)]
enum Command {
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: Vec<vk::BufferCopy>,
    },
    BeginRenderPass(RenderPassBeginRecord),
    EndRenderPass,
    BindPipeline(vk::Pipeline),
    SetViewport,
    SetScissor,
    BindVertexBuffers(Vec<vk::Buffer>),
    BindIndexBuffer(vk::Buffer, vk::IndexType),
    BindDescriptorSets {
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: Vec<vk::DescriptorSet>,
        dynamic_offsets: Vec<u32>,
    },
    PushConstants {
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: Vec<u8>,
    },
    Draw {
        vertex_count: u32,
        first_vertex: u32,
    },
    DrawIndexed {
        index_count: u32,
        first_index: u32,
    },
}

struct CommandBufferRecord {
    pool: u64,
    state: CommandBufferState,
    one_time: bool,
    commands: Vec<Command>,
}

struct SwapchainRecord {
    info: SwapchainInfo,
    next_image: u32,
    acquired: HashSet<u32>,
}

struct LayoutRecord {
    set_layouts: Vec<vk::DescriptorSetLayout>,
    push_constant_ranges: Vec<vk::PushConstantRange>,
}

struct PoolRecord {
    max_sets: u32,
    sizes: Vec<vk::DescriptorPoolSize>,
    used: HashMap<vk::DescriptorType, u32>,
    sets: Vec<u64>,
}

struct SetRecord {
    layout: vk::DescriptorSetLayout,
    writes: HashMap<u32, DescriptorBufferWrite>,
}

#[derive(Default)]
struct State {
    objects: HashMap<u64, ObjectKind>,
    buffers: HashMap<u64, BufferRecord>,
    memories: HashMap<u64, MemoryRecord>,
    images: HashMap<u64, ImageRecord>,
    swapchain_images: HashSet<u64>,
    views: HashSet<u64>,
    swapchains: HashMap<u64, SwapchainRecord>,
    render_passes: HashMap<u64, RenderPassDesc>,
    framebuffers: HashMap<u64, u64>,
    shader_modules: HashSet<u64>,
    pipeline_layouts: HashMap<u64, LayoutRecord>,
    pipelines: HashMap<u64, PipelineInfo>,
    set_layouts: HashMap<u64, Vec<DescriptorBinding>>,
    pools: HashMap<u64, PoolRecord>,
    sets: HashMap<u64, SetRecord>,
    command_pools: HashMap<u64, u32>,
    command_buffers: HashMap<u64, CommandBufferRecord>,
    fences: HashMap<u64, bool>,
    semaphores: HashMap<u64, bool>,
    fail_points: Vec<FailPoint>,
    validation_errors: Vec<String>,
    destroyed: bool,
}

impl State {
    fn take_fail(&mut self, point: FailPoint) -> bool {
        match self.fail_points.iter().position(|p| *p == point) {
            Some(index) => {
                self.fail_points.remove(index);
                true
            }
            None => false,
        }
    }

    fn report(&mut self, message: String) {
        warn!("headless validation: {}", message);
        self.validation_errors.push(message);
    }

    fn memory_slice(&self, buffer: vk::Buffer) -> Option<&[u8]> {
        let record = self.buffers.get(&buffer.as_raw())?;
        let (memory, offset) = record.binding?;
        let memory = self.memories.get(&memory)?;
        let start = offset as usize;
        memory.data.get(start..start + record.size as usize)
    }
}

/// Headless logical device. See the [module docs](super) for what it simulates.
pub struct HeadlessDevice {
    adapter: HeadlessAdapter,
    queues: HashMap<(u32, u32), vk::Queue>,
    validation: bool,
    shared: Arc<Shared>,
    state: Mutex<State>,
}

impl HeadlessDevice {
    /// Creates a stand-alone device on the default adapter with every queue family enabled.
    pub fn new_default() -> Arc<Self> {
        Self::new(HeadlessAdapter::default())
    }

    /// Creates a stand-alone device on `adapter` with every queue family enabled.
    pub fn new(adapter: HeadlessAdapter) -> Arc<Self> {
        let families: Vec<u32> = (0..adapter.queue_families.len() as u32).collect();
        Self::with_shared(adapter, &families, false, Shared::new())
    }

    pub(crate) fn with_shared(
        adapter: HeadlessAdapter,
        queue_families: &[u32],
        validation: bool,
        shared: Arc<Shared>,
    ) -> Arc<Self> {
        let mut queues = HashMap::new();
        for &family in queue_families {
            let count = adapter
                .queue_families
                .get(family as usize)
                .map_or(0, |props| props.queue_count);
            for index in 0..count {
                queues.insert((family, index), vk::Queue::from_raw(shared.next_handle()));
            }
        }

        shared.push(DeviceEvent::DeviceCreated { validation });
        info!(
            "Headless device created on '{}' ({} queue(s), validation: {})",
            adapter.name,
            queues.len(),
            validation
        );

        Arc::new(Self {
            adapter,
            queues,
            validation,
            shared,
            state: Mutex::new(State::default()),
        })
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    fn create_object(&self, state: &mut State, kind: ObjectKind) -> u64 {
        let raw = self.shared.next_handle();
        state.objects.insert(raw, kind);
        self.shared.push(DeviceEvent::Created { kind, handle: raw });
        trace!("headless create {:?} {:#x}", kind, raw);
        raw
    }

    /// Forgets an object. Null handles are ignored, as Vulkan allows.
    fn destroy_object(&self, state: &mut State, kind: ObjectKind, raw: u64) -> bool {
        if raw == 0 {
            return false;
        }
        if state.objects.get(&raw) != Some(&kind) {
            state.report(format!("destroy of unknown {:?} {:#x}", kind, raw));
            return false;
        }
        state.objects.remove(&raw);
        self.shared.push(DeviceEvent::Destroyed { kind, handle: raw });
        trace!("headless destroy {:?} {:#x}", kind, raw);
        true
    }

    fn has_queue(&self, queue: vk::Queue) -> bool {
        self.queues.values().any(|q| *q == queue)
    }

    fn record(&self, command_buffer: vk::CommandBuffer, command: Command) {
        let mut state = self.state();
        let recording = state
            .command_buffers
            .get(&command_buffer.as_raw())
            .is_some_and(|r| r.state == CommandBufferState::Recording);
        if !recording {
            state.report(format!(
                "command recorded into {:?} which is not recording",
                command_buffer
            ));
            return;
        }
        if let Some(record) = state.command_buffers.get_mut(&command_buffer.as_raw()) {
            record.commands.push(command);
        }
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Snapshot of the shared event log.
    pub fn events(&self) -> Vec<DeviceEvent> {
        self.shared.events()
    }

    pub fn clear_events(&self) {
        self.shared.clear_events();
    }

    /// Makes the next operation of the given kind fail.
    pub fn fail_next(&self, point: FailPoint) {
        self.state().fail_points.push(point);
    }

    /// Number of live objects, excluding command buffers and descriptor sets.
    pub fn live_objects(&self) -> usize {
        self.state().objects.len()
    }

    pub fn live_objects_of(&self, kind: ObjectKind) -> usize {
        self.state().objects.values().filter(|k| **k == kind).count()
    }

    pub fn live_command_buffers(&self) -> usize {
        self.state().command_buffers.len()
    }

    /// Misuse detected in calls that cannot return an error.
    pub fn validation_errors(&self) -> Vec<String> {
        self.state().validation_errors.clone()
    }

    pub fn buffer_info(&self, buffer: vk::Buffer) -> Option<BufferInfo> {
        let state = self.state();
        let record = state.buffers.get(&buffer.as_raw())?;
        let memory = record.binding.map(|(memory, _)| memory);
        Some(BufferInfo {
            size: record.size,
            usage: record.usage,
            memory: memory.map(vk::DeviceMemory::from_raw),
            memory_flags: memory.and_then(|m| state.memories.get(&m).map(|r| r.flags)),
        })
    }

    /// Reads a buffer's bytes straight from its backing memory, whatever the
    /// memory type. This is the only way to observe device-local contents.
    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Option<Vec<u8>> {
        self.state().memory_slice(buffer).map(<[u8]>::to_vec)
    }

    pub fn pipeline_info(&self, pipeline: vk::Pipeline) -> Option<PipelineInfo> {
        self.state().pipelines.get(&pipeline.as_raw()).cloned()
    }

    pub fn pipeline_layout_info(
        &self,
        layout: vk::PipelineLayout,
    ) -> Option<(Vec<vk::DescriptorSetLayout>, Vec<vk::PushConstantRange>)> {
        self.state()
            .pipeline_layouts
            .get(&layout.as_raw())
            .map(|r| (r.set_layouts.clone(), r.push_constant_ranges.clone()))
    }

    pub fn render_pass_info(&self, render_pass: vk::RenderPass) -> Option<RenderPassDesc> {
        self.state().render_passes.get(&render_pass.as_raw()).cloned()
    }

    pub fn set_layout_bindings(
        &self,
        layout: vk::DescriptorSetLayout,
    ) -> Option<Vec<DescriptorBinding>> {
        self.state().set_layouts.get(&layout.as_raw()).cloned()
    }

    /// Returns `(max_sets, pool_sizes)` of a descriptor pool.
    pub fn descriptor_pool_info(
        &self,
        pool: vk::DescriptorPool,
    ) -> Option<(u32, Vec<vk::DescriptorPoolSize>)> {
        self.state()
            .pools
            .get(&pool.as_raw())
            .map(|r| (r.max_sets, r.sizes.clone()))
    }

    pub fn descriptor_write(
        &self,
        set: vk::DescriptorSet,
        binding: u32,
    ) -> Option<DescriptorBufferWrite> {
        self.state()
            .sets
            .get(&set.as_raw())
            .and_then(|r| r.writes.get(&binding).copied())
    }

    pub fn swapchain_info(&self, swapchain: vk::SwapchainKHR) -> Option<SwapchainInfo> {
        self.state()
            .swapchains
            .get(&swapchain.as_raw())
            .map(|r| r.info.clone())
    }

    pub fn fence_signaled(&self, fence: vk::Fence) -> Option<bool> {
        self.state().fences.get(&fence.as_raw()).copied()
    }

    pub fn is_destroyed(&self) -> bool {
        self.state().destroyed
    }

    pub fn validation_enabled(&self) -> bool {
        self.validation
    }

    pub fn adapter(&self) -> &HeadlessAdapter {
        &self.adapter
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Runs a command buffer's commands against device memory.
    fn execute(&self, state: &mut State, command_buffer: u64) -> RhiResult<Vec<DeviceEvent>> {
        let commands = state
            .command_buffers
            .get(&command_buffer)
            .map(|r| r.commands.clone())
            .unwrap_or_default();

        let invalid = |message: String| Err(RhiError::InvalidUsage(message));

        let mut events = Vec::new();
        let mut in_render_pass = false;
        let mut pipeline: Option<vk::Pipeline> = None;
        let mut vertex_buffer: Option<vk::Buffer> = None;
        let mut index_buffer: Option<vk::Buffer> = None;
        let mut sets: Vec<vk::DescriptorSet> = Vec::new();
        let mut dynamic_offsets: Vec<u32> = Vec::new();
        let mut push_constants: Option<Vec<u8>> = None;
        let mut viewport_set = false;
        let mut scissor_set = false;

        for command in commands {
            match command {
                Command::CopyBuffer { src, dst, regions } => {
                    if in_render_pass {
                        return invalid("copy inside a render pass".to_string());
                    }
                    self.execute_copy(state, src, dst, &regions)?;
                    for region in regions {
                        events.push(DeviceEvent::CopyExecuted {
                            src,
                            dst,
                            size: region.size,
                        });
                    }
                }
                Command::BeginRenderPass(begin) => {
                    if in_render_pass {
                        return invalid("render pass begun twice".to_string());
                    }
                    if !state.render_passes.contains_key(&begin.render_pass.as_raw())
                        || !state.framebuffers.contains_key(&begin.framebuffer.as_raw())
                    {
                        return invalid("render pass or framebuffer is not alive".to_string());
                    }
                    in_render_pass = true;
                    events.push(DeviceEvent::RenderPassExecuted { begin });
                }
                Command::EndRenderPass => {
                    if !in_render_pass {
                        return invalid("end of a render pass that was not begun".to_string());
                    }
                    in_render_pass = false;
                }
                Command::BindPipeline(p) => {
                    if !state.pipelines.contains_key(&p.as_raw()) {
                        return invalid(format!("bind of unknown pipeline {:?}", p));
                    }
                    pipeline = Some(p);
                }
                Command::SetViewport => viewport_set = true,
                Command::SetScissor => scissor_set = true,
                Command::BindVertexBuffers(buffers) => {
                    for buffer in &buffers {
                        self.check_buffer_usage(
                            state,
                            *buffer,
                            vk::BufferUsageFlags::VERTEX_BUFFER,
                        )?;
                    }
                    vertex_buffer = buffers.first().copied();
                }
                Command::BindIndexBuffer(buffer, index_type) => {
                    self.check_buffer_usage(state, buffer, vk::BufferUsageFlags::INDEX_BUFFER)?;
                    if index_type != vk::IndexType::UINT32 {
                        return invalid(format!("unsupported index type {:?}", index_type));
                    }
                    index_buffer = Some(buffer);
                }
                Command::BindDescriptorSets {
                    layout,
                    first_set,
                    sets: bound,
                    dynamic_offsets: offsets,
                } => {
                    self.check_descriptor_bind(state, layout, &bound, &offsets)?;
                    if first_set != 0 {
                        return invalid("only set 0 is supported".to_string());
                    }
                    sets = bound;
                    dynamic_offsets = offsets;
                }
                Command::PushConstants {
                    layout,
                    stages,
                    offset,
                    data,
                } => {
                    let covered = state.pipeline_layouts.get(&layout.as_raw()).is_some_and(|l| {
                        l.push_constant_ranges.iter().any(|r| {
                            r.stage_flags.contains(stages)
                                && offset >= r.offset
                                && offset as usize + data.len() <= (r.offset + r.size) as usize
                        })
                    });
                    if !covered {
                        return invalid(format!(
                            "push constants [{}, {}) not covered by layout {:?}",
                            offset,
                            offset as usize + data.len(),
                            layout
                        ));
                    }
                    let mut bytes = push_constants.take().unwrap_or_default();
                    let end = offset as usize + data.len();
                    if bytes.len() < end {
                        bytes.resize(end, 0);
                    }
                    bytes[offset as usize..end].copy_from_slice(&data);
                    push_constants = Some(bytes);
                }
                Command::Draw {
                    vertex_count,
                    first_vertex,
                } => {
                    let (p, vb) = self.check_draw_state(
                        state,
                        in_render_pass,
                        pipeline,
                        vertex_buffer,
                        &sets,
                        viewport_set,
                        scissor_set,
                    )?;
                    let capacity = self.vertex_capacity(state, p, vb);
                    if (first_vertex + vertex_count) as u64 > capacity {
                        return invalid(format!(
                            "draw of {} vertices overruns a buffer holding {}",
                            vertex_count, capacity
                        ));
                    }
                    events.push(DeviceEvent::DrawExecuted(DrawRecord {
                        pipeline: p,
                        vertex_buffer: vb,
                        index_buffer: None,
                        element_count: vertex_count,
                        descriptor_sets: sets.clone(),
                        dynamic_offsets: dynamic_offsets.clone(),
                        push_constants: push_constants.clone(),
                    }));
                }
                Command::DrawIndexed {
                    index_count,
                    first_index,
                } => {
                    let (p, vb) = self.check_draw_state(
                        state,
                        in_render_pass,
                        pipeline,
                        vertex_buffer,
                        &sets,
                        viewport_set,
                        scissor_set,
                    )?;
                    let Some(ib) = index_buffer else {
                        return invalid("indexed draw without an index buffer".to_string());
                    };
                    let indices: Vec<u32> = state
                        .memory_slice(ib)
                        .map(|bytes| {
                            bytes
                                .chunks_exact(4)
                                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                                .collect()
                        })
                        .unwrap_or_default();
                    let range = first_index as usize..(first_index + index_count) as usize;
                    let Some(used) = indices.get(range) else {
                        return invalid(format!(
                            "indexed draw of {} indices overruns the index buffer",
                            index_count
                        ));
                    };
                    let capacity = self.vertex_capacity(state, p, vb);
                    if let Some(bad) = used.iter().find(|i| **i as u64 >= capacity) {
                        return invalid(format!(
                            "index {} out of range for {} vertices",
                            bad, capacity
                        ));
                    }
                    events.push(DeviceEvent::DrawExecuted(DrawRecord {
                        pipeline: p,
                        vertex_buffer: vb,
                        index_buffer: Some(ib),
                        element_count: index_count,
                        descriptor_sets: sets.clone(),
                        dynamic_offsets: dynamic_offsets.clone(),
                        push_constants: push_constants.clone(),
                    }));
                }
            }
        }

        if in_render_pass {
            return invalid("command buffer ended inside a render pass".to_string());
        }
        Ok(events)
    }

    fn execute_copy(
        &self,
        state: &mut State,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) -> RhiResult<()> {
        self.check_buffer_usage(state, src, vk::BufferUsageFlags::TRANSFER_SRC)?;
        self.check_buffer_usage(state, dst, vk::BufferUsageFlags::TRANSFER_DST)?;

        for region in regions {
            let bytes = state
                .memory_slice(src)
                .and_then(|s| {
                    s.get(region.src_offset as usize..(region.src_offset + region.size) as usize)
                })
                .map(<[u8]>::to_vec)
                .ok_or_else(|| RhiError::InvalidUsage("copy reads past the source".to_string()))?;

            let (memory, offset, size) = state
                .buffers
                .get(&dst.as_raw())
                .and_then(|r| r.binding.map(|(m, o)| (m, o, r.size)))
                .ok_or_else(|| RhiError::InvalidUsage("copy into unbound buffer".to_string()))?;
            if region.dst_offset + region.size > size {
                return Err(RhiError::InvalidUsage(
                    "copy writes past the destination".to_string(),
                ));
            }
            let start = (offset + region.dst_offset) as usize;
            if let Some(target) = state
                .memories
                .get_mut(&memory)
                .and_then(|m| m.data.get_mut(start..start + bytes.len()))
            {
                target.copy_from_slice(&bytes);
            }
        }
        Ok(())
    }

    fn check_buffer_usage(
        &self,
        state: &State,
        buffer: vk::Buffer,
        usage: vk::BufferUsageFlags,
    ) -> RhiResult<()> {
        match state.buffers.get(&buffer.as_raw()) {
            Some(record) if record.binding.is_none() => Err(RhiError::InvalidUsage(format!(
                "buffer {:?} used without bound memory",
                buffer
            ))),
            Some(record) if record.usage.contains(usage) => Ok(()),
            Some(record) => Err(RhiError::InvalidUsage(format!(
                "buffer {:?} with usage {:?} used as {:?}",
                buffer, record.usage, usage
            ))),
            None => Err(RhiError::InvalidUsage(format!(
                "use of unknown buffer {:?}",
                buffer
            ))),
        }
    }

    fn check_descriptor_bind(
        &self,
        state: &State,
        layout: vk::PipelineLayout,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) -> RhiResult<()> {
        if !state.pipeline_layouts.contains_key(&layout.as_raw()) {
            return Err(RhiError::InvalidUsage(format!(
                "descriptor bind with unknown layout {:?}",
                layout
            )));
        }

        let mut dynamic_writes = Vec::new();
        for set in sets {
            let record = state.sets.get(&set.as_raw()).ok_or_else(|| {
                RhiError::InvalidUsage(format!("bind of unknown descriptor set {:?}", set))
            })?;
            let bindings = state
                .set_layouts
                .get(&record.layout.as_raw())
                .cloned()
                .unwrap_or_default();
            for binding in bindings {
                let write = record.writes.get(&binding.binding).ok_or_else(|| {
                    RhiError::InvalidUsage(format!(
                        "descriptor set {:?} binding {} was never written",
                        set, binding.binding
                    ))
                })?;
                if binding.descriptor_type == vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC {
                    dynamic_writes.push(*write);
                }
            }
        }

        if dynamic_writes.len() != dynamic_offsets.len() {
            return Err(RhiError::InvalidUsage(format!(
                "{} dynamic offsets supplied for {} dynamic bindings",
                dynamic_offsets.len(),
                dynamic_writes.len()
            )));
        }

        let alignment = self.adapter.min_uniform_buffer_offset_alignment.max(1);
        for (write, offset) in dynamic_writes.iter().zip(dynamic_offsets) {
            let offset = *offset as vk::DeviceSize;
            if offset % alignment != 0 {
                return Err(RhiError::InvalidUsage(format!(
                    "dynamic offset {} is not a multiple of {}",
                    offset, alignment
                )));
            }
            let size = state
                .buffers
                .get(&write.buffer.as_raw())
                .map_or(0, |b| b.size);
            if write.offset + offset + write.range > size {
                return Err(RhiError::InvalidUsage(format!(
                    "dynamic offset {} overruns a {} byte buffer",
                    offset, size
                )));
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn check_draw_state(
        &self,
        state: &State,
        in_render_pass: bool,
        pipeline: Option<vk::Pipeline>,
        vertex_buffer: Option<vk::Buffer>,
        sets: &[vk::DescriptorSet],
        viewport_set: bool,
        scissor_set: bool,
    ) -> RhiResult<(vk::Pipeline, vk::Buffer)> {
        if !in_render_pass {
            return Err(RhiError::InvalidUsage("draw outside a render pass".to_string()));
        }
        let pipeline =
            pipeline.ok_or_else(|| RhiError::InvalidUsage("draw without a pipeline".to_string()))?;
        let vertex_buffer = vertex_buffer
            .ok_or_else(|| RhiError::InvalidUsage("draw without a vertex buffer".to_string()))?;

        if let Some(info) = state.pipelines.get(&pipeline.as_raw()) {
            if info.dynamic_states.contains(&vk::DynamicState::VIEWPORT) && !viewport_set {
                return Err(RhiError::InvalidUsage("dynamic viewport never set".to_string()));
            }
            if info.dynamic_states.contains(&vk::DynamicState::SCISSOR) && !scissor_set {
                return Err(RhiError::InvalidUsage("dynamic scissor never set".to_string()));
            }
            let required_sets = state
                .pipeline_layouts
                .get(&info.layout.as_raw())
                .map_or(0, |l| l.set_layouts.len());
            if sets.len() < required_sets {
                return Err(RhiError::InvalidUsage(format!(
                    "draw with {} of {} descriptor sets bound",
                    sets.len(),
                    required_sets
                )));
            }
        }
        Ok((pipeline, vertex_buffer))
    }

    fn vertex_capacity(&self, state: &State, pipeline: vk::Pipeline, buffer: vk::Buffer) -> u64 {
        let stride = state
            .pipelines
            .get(&pipeline.as_raw())
            .and_then(|p| p.vertex_bindings.first().map(|b| b.stride))
            .unwrap_or(1)
            .max(1) as u64;
        state
            .buffers
            .get(&buffer.as_raw())
            .map_or(0, |b| b.size / stride)
    }
}

impl GpuDevice for HeadlessDevice {
    fn get_queue(&self, queue_family: u32, index: u32) -> vk::Queue {
        self.queues
            .get(&(queue_family, index))
            .copied()
            .unwrap_or_else(vk::Queue::null)
    }

    // =========================================================================
    // Buffers and memory
    // =========================================================================

    fn create_buffer(&self, desc: &BufferDesc) -> RhiResult<vk::Buffer> {
        let mut state = self.state();
        if state.take_fail(FailPoint::CreateBuffer) {
            return Err(RhiError::VulkanError(vk::Result::ERROR_OUT_OF_HOST_MEMORY));
        }
        if desc.size == 0 {
            return Err(RhiError::InvalidUsage("buffer size must be non-zero".to_string()));
        }
        let raw = self.create_object(&mut state, ObjectKind::Buffer);
        state.buffers.insert(
            raw,
            BufferRecord {
                size: desc.size,
                usage: desc.usage,
                binding: None,
            },
        );
        Ok(vk::Buffer::from_raw(raw))
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        let state = self.state();
        match state.buffers.get(&buffer.as_raw()) {
            Some(record) => vk::MemoryRequirements {
                size: record.size.div_ceil(BUFFER_ALIGNMENT) * BUFFER_ALIGNMENT,
                alignment: BUFFER_ALIGNMENT,
                memory_type_bits: self.adapter.buffer_type_bits(),
            },
            None => vk::MemoryRequirements::default(),
        }
    }

    fn allocate_memory(
        &self,
        size: vk::DeviceSize,
        memory_type_index: u32,
    ) -> RhiResult<vk::DeviceMemory> {
        let mut state = self.state();
        if state.take_fail(FailPoint::AllocateMemory) {
            return Err(RhiError::VulkanError(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        }
        let flags = self
            .adapter
            .memory_types
            .get(memory_type_index as usize)
            .copied()
            .ok_or_else(|| {
                RhiError::InvalidUsage(format!("memory type {} does not exist", memory_type_index))
            })?;
        if size == 0 {
            return Err(RhiError::InvalidUsage("allocation size must be non-zero".to_string()));
        }
        let raw = self.create_object(&mut state, ObjectKind::Memory);
        state.memories.insert(
            raw,
            MemoryRecord {
                flags,
                data: vec![0; size as usize],
            },
        );
        Ok(vk::DeviceMemory::from_raw(raw))
    }

    fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> RhiResult<()> {
        let mut state = self.state();
        if state.take_fail(FailPoint::BindBufferMemory) {
            return Err(RhiError::VulkanError(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        }
        let memory_len = state
            .memories
            .get(&memory.as_raw())
            .map(|m| m.data.len() as vk::DeviceSize)
            .ok_or_else(|| RhiError::InvalidHandle(format!("unknown memory {:?}", memory)))?;
        let record = state
            .buffers
            .get_mut(&buffer.as_raw())
            .ok_or_else(|| RhiError::InvalidHandle(format!("unknown buffer {:?}", buffer)))?;
        if record.binding.is_some() {
            return Err(RhiError::InvalidUsage(format!("buffer {:?} already bound", buffer)));
        }
        if offset + record.size > memory_len {
            return Err(RhiError::InvalidUsage(format!(
                "buffer of {} bytes does not fit memory of {} bytes at offset {}",
                record.size, memory_len, offset
            )));
        }
        record.binding = Some((memory.as_raw(), offset));
        Ok(())
    }

    fn write_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> RhiResult<()> {
        let mut state = self.state();
        let record = state
            .memories
            .get_mut(&memory.as_raw())
            .ok_or_else(|| RhiError::InvalidHandle(format!("unknown memory {:?}", memory)))?;
        if !record.flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            return Err(RhiError::VulkanError(vk::Result::ERROR_MEMORY_MAP_FAILED));
        }
        let start = offset as usize;
        let target = record
            .data
            .get_mut(start..start + data.len())
            .ok_or_else(|| RhiError::InvalidUsage("mapped write out of bounds".to_string()))?;
        target.copy_from_slice(data);
        self.shared.push(DeviceEvent::MemoryWrite {
            memory,
            offset,
            len: data.len(),
        });
        Ok(())
    }

    fn read_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        len: usize,
    ) -> RhiResult<Vec<u8>> {
        let state = self.state();
        let record = state
            .memories
            .get(&memory.as_raw())
            .ok_or_else(|| RhiError::InvalidHandle(format!("unknown memory {:?}", memory)))?;
        if !record.flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            return Err(RhiError::VulkanError(vk::Result::ERROR_MEMORY_MAP_FAILED));
        }
        let start = offset as usize;
        record
            .data
            .get(start..start + len)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| RhiError::InvalidUsage("mapped read out of bounds".to_string()))
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let mut state = self.state();
        if self.destroy_object(&mut state, ObjectKind::Buffer, buffer.as_raw()) {
            state.buffers.remove(&buffer.as_raw());
        }
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        let mut state = self.state();
        if self.destroy_object(&mut state, ObjectKind::Memory, memory.as_raw()) {
            state.memories.remove(&memory.as_raw());
        }
    }

    // =========================================================================
    // Images
    // =========================================================================

    fn create_image(&self, desc: &ImageDesc) -> RhiResult<vk::Image> {
        let mut state = self.state();
        if state.take_fail(FailPoint::CreateImage) {
            return Err(RhiError::VulkanError(vk::Result::ERROR_OUT_OF_HOST_MEMORY));
        }
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(RhiError::InvalidUsage("image extent must be non-zero".to_string()));
        }
        let raw = self.create_object(&mut state, ObjectKind::Image);
        state.images.insert(
            raw,
            ImageRecord {
                desc: *desc,
                bound: false,
            },
        );
        Ok(vk::Image::from_raw(raw))
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        let state = self.state();
        match state.images.get(&image.as_raw()) {
            Some(record) => {
                let texel = match record.desc.format {
                    vk::Format::D32_SFLOAT_S8_UINT => 8,
                    _ => 4,
                };
                let size = record.desc.extent.width as u64 * record.desc.extent.height as u64 * texel;
                vk::MemoryRequirements {
                    size: size.div_ceil(BUFFER_ALIGNMENT) * BUFFER_ALIGNMENT,
                    alignment: BUFFER_ALIGNMENT,
                    memory_type_bits: self.adapter.image_type_bits(),
                }
            }
            None => vk::MemoryRequirements::default(),
        }
    }

    fn bind_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        _offset: vk::DeviceSize,
    ) -> RhiResult<()> {
        let mut state = self.state();
        if state.take_fail(FailPoint::BindImageMemory) {
            return Err(RhiError::VulkanError(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        }
        if !state.memories.contains_key(&memory.as_raw()) {
            return Err(RhiError::InvalidHandle(format!("unknown memory {:?}", memory)));
        }
        let record = state
            .images
            .get_mut(&image.as_raw())
            .ok_or_else(|| RhiError::InvalidHandle(format!("unknown image {:?}", image)))?;
        record.bound = true;
        Ok(())
    }

    fn create_image_view(&self, desc: &ImageViewDesc) -> RhiResult<vk::ImageView> {
        let mut state = self.state();
        if state.take_fail(FailPoint::CreateImageView) {
            return Err(RhiError::VulkanError(vk::Result::ERROR_OUT_OF_HOST_MEMORY));
        }
        let raw_image = desc.image.as_raw();
        let usable = state.swapchain_images.contains(&raw_image)
            || state.images.get(&raw_image).is_some_and(|i| i.bound);
        if !usable {
            return Err(RhiError::InvalidUsage(format!(
                "view of unknown or unbound image {:?}",
                desc.image
            )));
        }
        let raw = self.create_object(&mut state, ObjectKind::ImageView);
        state.views.insert(raw);
        Ok(vk::ImageView::from_raw(raw))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        let mut state = self.state();
        if self.destroy_object(&mut state, ObjectKind::ImageView, view.as_raw()) {
            state.views.remove(&view.as_raw());
        }
    }

    fn destroy_image(&self, image: vk::Image) {
        let mut state = self.state();
        if self.destroy_object(&mut state, ObjectKind::Image, image.as_raw()) {
            state.images.remove(&image.as_raw());
        }
    }

    // =========================================================================
    // Swapchain
    // =========================================================================

    fn create_swapchain(&self, desc: &SwapchainDesc<'_>) -> RhiResult<vk::SwapchainKHR> {
        let surface_extent = self
            .shared
            .surfaces()
            .get(&desc.surface.as_raw())
            .copied()
            .ok_or(RhiError::VulkanError(vk::Result::ERROR_SURFACE_LOST_KHR))?;

        let adapter = &self.adapter;
        if desc.min_image_count < adapter.min_image_count
            || (adapter.max_image_count > 0 && desc.min_image_count > adapter.max_image_count)
        {
            return Err(RhiError::InvalidUsage(format!(
                "image count {} outside [{}, {}]",
                desc.min_image_count, adapter.min_image_count, adapter.max_image_count
            )));
        }
        if !adapter.variable_extent && desc.extent != surface_extent {
            return Err(RhiError::InvalidUsage(format!(
                "swapchain extent {:?} differs from surface extent {:?}",
                desc.extent, surface_extent
            )));
        }
        if desc.sharing_mode == vk::SharingMode::CONCURRENT && desc.queue_family_indices.len() < 2
        {
            return Err(RhiError::InvalidUsage(
                "concurrent sharing needs at least two queue families".to_string(),
            ));
        }

        let mut state = self.state();
        if desc.old_swapchain != vk::SwapchainKHR::null() {
            let old = state
                .swapchains
                .get_mut(&desc.old_swapchain.as_raw())
                .ok_or_else(|| {
                    RhiError::InvalidHandle(format!("unknown old swapchain {:?}", desc.old_swapchain))
                })?;
            old.info.retired = true;
        }

        let raw = self.create_object(&mut state, ObjectKind::Swapchain);
        let images: Vec<vk::Image> = (0..desc.min_image_count)
            .map(|_| vk::Image::from_raw(self.shared.next_handle()))
            .collect();
        for image in &images {
            state.swapchain_images.insert(image.as_raw());
        }
        let queue_family_indices = if desc.sharing_mode == vk::SharingMode::CONCURRENT {
            desc.queue_family_indices.to_vec()
        } else {
            Vec::new()
        };

        state.swapchains.insert(
            raw,
            SwapchainRecord {
                info: SwapchainInfo {
                    surface: desc.surface,
                    extent: desc.extent,
                    surface_format: desc.surface_format,
                    present_mode: desc.present_mode,
                    sharing_mode: desc.sharing_mode,
                    queue_family_indices,
                    images,
                    retired: false,
                },
                next_image: 0,
                acquired: HashSet::new(),
            },
        );
        debug!(
            "Headless swapchain created: {}x{}, {} images",
            desc.extent.width, desc.extent.height, desc.min_image_count
        );
        Ok(vk::SwapchainKHR::from_raw(raw))
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RhiResult<Vec<vk::Image>> {
        self.state()
            .swapchains
            .get(&swapchain.as_raw())
            .map(|r| r.info.images.clone())
            .ok_or_else(|| RhiError::InvalidHandle(format!("unknown swapchain {:?}", swapchain)))
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout: u64,
        semaphore: vk::Semaphore,
    ) -> RhiResult<(u32, bool)> {
        let out_of_date = RhiError::Submission {
            op: SubmissionOp::Acquire,
            result: vk::Result::ERROR_OUT_OF_DATE_KHR,
        };

        let surface_extents = self.shared.surfaces().clone();
        let mut state = self.state();
        if state.take_fail(FailPoint::AcquireOutOfDate) {
            return Err(out_of_date);
        }

        let record = state
            .swapchains
            .get(&swapchain.as_raw())
            .ok_or_else(|| RhiError::InvalidHandle(format!("unknown swapchain {:?}", swapchain)))?;
        let current = surface_extents.get(&record.info.surface.as_raw()).copied();
        if record.info.retired || (!self.adapter.variable_extent && current != Some(record.info.extent))
        {
            return Err(out_of_date);
        }

        match state.semaphores.get(&semaphore.as_raw()) {
            Some(false) => {}
            Some(true) => {
                return Err(RhiError::InvalidUsage(format!(
                    "acquire signals {:?} which already has a pending signal",
                    semaphore
                )));
            }
            None => {
                return Err(RhiError::InvalidHandle(format!(
                    "unknown semaphore {:?}",
                    semaphore
                )));
            }
        }
        state.semaphores.insert(semaphore.as_raw(), true);

        let record = state
            .swapchains
            .get_mut(&swapchain.as_raw())
            .ok_or_else(|| RhiError::InvalidHandle(format!("unknown swapchain {:?}", swapchain)))?;
        let image_count = record.info.images.len() as u32;
        let image_index = record.next_image;
        record.next_image = (record.next_image + 1) % image_count.max(1);
        record.acquired.insert(image_index);

        self.shared.push(DeviceEvent::Acquire {
            swapchain,
            image_index,
            semaphore,
        });
        Ok((image_index, false))
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state();
        if self.destroy_object(&mut state, ObjectKind::Swapchain, swapchain.as_raw())
            && let Some(record) = state.swapchains.remove(&swapchain.as_raw())
        {
            for image in record.info.images {
                state.swapchain_images.remove(&image.as_raw());
            }
        }
    }

    // =========================================================================
    // Render passes, framebuffers and pipelines
    // =========================================================================

    fn create_render_pass(&self, desc: &RenderPassDesc) -> RhiResult<vk::RenderPass> {
        let attachment_count = desc.attachments.len() as u32;
        let refs_valid = desc.color_attachment.attachment < attachment_count
            && desc
                .depth_attachment
                .is_none_or(|d| d.attachment < attachment_count);
        if !refs_valid {
            return Err(RhiError::InvalidUsage(
                "render pass references a missing attachment".to_string(),
            ));
        }
        let mut state = self.state();
        let raw = self.create_object(&mut state, ObjectKind::RenderPass);
        state.render_passes.insert(raw, desc.clone());
        Ok(vk::RenderPass::from_raw(raw))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        let mut state = self.state();
        if self.destroy_object(&mut state, ObjectKind::RenderPass, render_pass.as_raw()) {
            state.render_passes.remove(&render_pass.as_raw());
        }
    }

    fn create_framebuffer(&self, desc: &FramebufferDesc<'_>) -> RhiResult<vk::Framebuffer> {
        let mut state = self.state();
        let expected = state
            .render_passes
            .get(&desc.render_pass.as_raw())
            .map(|rp| rp.attachments.len())
            .ok_or_else(|| {
                RhiError::InvalidHandle(format!("unknown render pass {:?}", desc.render_pass))
            })?;
        if desc.attachments.len() != expected {
            return Err(RhiError::InvalidUsage(format!(
                "framebuffer has {} attachments, render pass expects {}",
                desc.attachments.len(),
                expected
            )));
        }
        if let Some(view) = desc
            .attachments
            .iter()
            .find(|v| !state.views.contains(&v.as_raw()))
        {
            return Err(RhiError::InvalidHandle(format!("unknown image view {:?}", view)));
        }
        let raw = self.create_object(&mut state, ObjectKind::Framebuffer);
        state.framebuffers.insert(raw, desc.render_pass.as_raw());
        Ok(vk::Framebuffer::from_raw(raw))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        let mut state = self.state();
        if self.destroy_object(&mut state, ObjectKind::Framebuffer, framebuffer.as_raw()) {
            state.framebuffers.remove(&framebuffer.as_raw());
        }
    }

    fn create_shader_module(&self, code: &[u32]) -> RhiResult<vk::ShaderModule> {
        if code.first() != Some(&SPIRV_MAGIC) {
            return Err(RhiError::ShaderError(
                "bytecode does not start with the SPIR-V magic number".to_string(),
            ));
        }
        let mut state = self.state();
        let raw = self.create_object(&mut state, ObjectKind::ShaderModule);
        state.shader_modules.insert(raw);
        Ok(vk::ShaderModule::from_raw(raw))
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        let mut state = self.state();
        if self.destroy_object(&mut state, ObjectKind::ShaderModule, module.as_raw()) {
            state.shader_modules.remove(&module.as_raw());
        }
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> RhiResult<vk::PipelineLayout> {
        let mut state = self.state();
        if let Some(layout) = set_layouts
            .iter()
            .find(|l| !state.set_layouts.contains_key(&l.as_raw()))
        {
            return Err(RhiError::InvalidHandle(format!(
                "unknown descriptor set layout {:?}",
                layout
            )));
        }
        for range in push_constant_ranges {
            if range.size == 0
                || range.size % 4 != 0
                || range.offset % 4 != 0
                || range.offset + range.size > MAX_PUSH_CONSTANTS_SIZE
            {
                return Err(RhiError::InvalidUsage(format!(
                    "invalid push constant range {:?}",
                    range
                )));
            }
        }
        let raw = self.create_object(&mut state, ObjectKind::PipelineLayout);
        state.pipeline_layouts.insert(
            raw,
            LayoutRecord {
                set_layouts: set_layouts.to_vec(),
                push_constant_ranges: push_constant_ranges.to_vec(),
            },
        );
        Ok(vk::PipelineLayout::from_raw(raw))
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        let mut state = self.state();
        if self.destroy_object(&mut state, ObjectKind::PipelineLayout, layout.as_raw()) {
            state.pipeline_layouts.remove(&layout.as_raw());
        }
    }

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDesc<'_>,
    ) -> RhiResult<vk::Pipeline> {
        let mut state = self.state();
        if state.take_fail(FailPoint::CreateGraphicsPipeline) {
            return Err(RhiError::VulkanError(vk::Result::ERROR_INITIALIZATION_FAILED));
        }
        for module in [desc.vertex_shader, desc.fragment_shader] {
            if !state.shader_modules.contains(&module.as_raw()) {
                return Err(RhiError::InvalidHandle(format!(
                    "unknown shader module {:?}",
                    module
                )));
            }
        }
        if !state.pipeline_layouts.contains_key(&desc.layout.as_raw()) {
            return Err(RhiError::InvalidHandle(format!(
                "unknown pipeline layout {:?}",
                desc.layout
            )));
        }
        let has_depth = state
            .render_passes
            .get(&desc.render_pass.as_raw())
            .map(|rp| rp.depth_attachment.is_some())
            .ok_or_else(|| {
                RhiError::InvalidHandle(format!("unknown render pass {:?}", desc.render_pass))
            })?;
        if desc.depth_compare.is_some() && !has_depth {
            return Err(RhiError::InvalidUsage(
                "depth test enabled on a render pass without depth".to_string(),
            ));
        }

        let raw = self.create_object(&mut state, ObjectKind::Pipeline);
        state.pipelines.insert(
            raw,
            PipelineInfo {
                vertex_bindings: desc.vertex_bindings.to_vec(),
                vertex_attributes: desc.vertex_attributes.to_vec(),
                topology: desc.topology,
                polygon_mode: desc.polygon_mode,
                cull_mode: desc.cull_mode,
                front_face: desc.front_face,
                line_width: desc.line_width,
                samples: desc.samples,
                color_blend: desc.color_blend,
                depth_compare: desc.depth_compare,
                dynamic_states: desc.dynamic_states.to_vec(),
                layout: desc.layout,
                render_pass: desc.render_pass,
                entry_point: desc.entry_point.to_string_lossy().into_owned(),
            },
        );
        Ok(vk::Pipeline::from_raw(raw))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        let mut state = self.state();
        if self.destroy_object(&mut state, ObjectKind::Pipeline, pipeline.as_raw()) {
            state.pipelines.remove(&pipeline.as_raw());
        }
    }

    // =========================================================================
    // Descriptors
    // =========================================================================

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBinding],
    ) -> RhiResult<vk::DescriptorSetLayout> {
        let mut state = self.state();
        let raw = self.create_object(&mut state, ObjectKind::DescriptorSetLayout);
        state.set_layouts.insert(raw, bindings.to_vec());
        Ok(vk::DescriptorSetLayout::from_raw(raw))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        let mut state = self.state();
        if self.destroy_object(&mut state, ObjectKind::DescriptorSetLayout, layout.as_raw()) {
            state.set_layouts.remove(&layout.as_raw());
        }
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<vk::DescriptorPool> {
        if max_sets == 0 {
            return Err(RhiError::InvalidUsage("descriptor pool with zero sets".to_string()));
        }
        let mut state = self.state();
        let raw = self.create_object(&mut state, ObjectKind::DescriptorPool);
        state.pools.insert(
            raw,
            PoolRecord {
                max_sets,
                sizes: pool_sizes.to_vec(),
                used: HashMap::new(),
                sets: Vec::new(),
            },
        );
        Ok(vk::DescriptorPool::from_raw(raw))
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut state = self.state();
        if self.destroy_object(&mut state, ObjectKind::DescriptorPool, pool.as_raw())
            && let Some(record) = state.pools.remove(&pool.as_raw())
        {
            for set in record.sets {
                state.sets.remove(&set);
            }
        }
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> RhiResult<Vec<vk::DescriptorSet>> {
        let mut state = self.state();

        let mut needed: HashMap<vk::DescriptorType, u32> = HashMap::new();
        for layout in layouts {
            let bindings = state.set_layouts.get(&layout.as_raw()).ok_or_else(|| {
                RhiError::InvalidHandle(format!("unknown descriptor set layout {:?}", layout))
            })?;
            for binding in bindings {
                *needed.entry(binding.descriptor_type).or_default() += binding.count;
            }
        }

        let record = state
            .pools
            .get(&pool.as_raw())
            .ok_or_else(|| RhiError::InvalidHandle(format!("unknown descriptor pool {:?}", pool)))?;
        if record.sets.len() + layouts.len() > record.max_sets as usize {
            return Err(RhiError::VulkanError(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
        }
        for (ty, count) in &needed {
            let capacity: u32 = record
                .sizes
                .iter()
                .filter(|s| s.ty == *ty)
                .map(|s| s.descriptor_count)
                .sum();
            let used = record.used.get(ty).copied().unwrap_or(0);
            if used + count > capacity {
                return Err(RhiError::VulkanError(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
            }
        }

        let handles: Vec<u64> = layouts.iter().map(|_| self.shared.next_handle()).collect();
        for (raw, layout) in handles.iter().zip(layouts) {
            state.sets.insert(
                *raw,
                SetRecord {
                    layout: *layout,
                    writes: HashMap::new(),
                },
            );
        }
        if let Some(record) = state.pools.get_mut(&pool.as_raw()) {
            for (ty, count) in needed {
                *record.used.entry(ty).or_default() += count;
            }
            record.sets.extend(&handles);
        }
        Ok(handles.into_iter().map(vk::DescriptorSet::from_raw).collect())
    }

    fn update_descriptor_sets(&self, writes: &[DescriptorBufferWrite]) {
        let mut state = self.state();
        for write in writes {
            let expected = state.sets.get(&write.set.as_raw()).and_then(|set| {
                state
                    .set_layouts
                    .get(&set.layout.as_raw())
                    .and_then(|b| b.iter().find(|b| b.binding == write.binding).copied())
            });
            let Some(binding) = expected else {
                state.report(format!(
                    "write to missing binding {} of set {:?}",
                    write.binding, write.set
                ));
                continue;
            };
            if binding.descriptor_type != write.descriptor_type {
                state.report(format!(
                    "binding {} is {:?}, written as {:?}",
                    write.binding, binding.descriptor_type, write.descriptor_type
                ));
                continue;
            }
            let fits = state.buffers.get(&write.buffer.as_raw()).is_some_and(|b| {
                b.usage.contains(vk::BufferUsageFlags::UNIFORM_BUFFER)
                    && write.offset + write.range <= b.size
            });
            if !fits {
                state.report(format!(
                    "descriptor write points at an unusable buffer {:?}",
                    write.buffer
                ));
                continue;
            }
            if let Some(set) = state.sets.get_mut(&write.set.as_raw()) {
                set.writes.insert(write.binding, *write);
            }
        }
    }

    // =========================================================================
    // Command pools and recording
    // =========================================================================

    fn create_command_pool(
        &self,
        queue_family: u32,
        _flags: vk::CommandPoolCreateFlags,
    ) -> RhiResult<vk::CommandPool> {
        if !self.queues.keys().any(|(family, _)| *family == queue_family) {
            return Err(RhiError::InvalidUsage(format!(
                "command pool for queue family {} with no queue",
                queue_family
            )));
        }
        let mut state = self.state();
        let raw = self.create_object(&mut state, ObjectKind::CommandPool);
        state.command_pools.insert(raw, queue_family);
        Ok(vk::CommandPool::from_raw(raw))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut state = self.state();
        if self.destroy_object(&mut state, ObjectKind::CommandPool, pool.as_raw()) {
            state.command_pools.remove(&pool.as_raw());
            state
                .command_buffers
                .retain(|_, record| record.pool != pool.as_raw());
        }
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> RhiResult<Vec<vk::CommandBuffer>> {
        let mut state = self.state();
        if !state.command_pools.contains_key(&pool.as_raw()) {
            return Err(RhiError::InvalidHandle(format!("unknown command pool {:?}", pool)));
        }
        let buffers = (0..count)
            .map(|_| {
                let raw = self.shared.next_handle();
                state.command_buffers.insert(
                    raw,
                    CommandBufferRecord {
                        pool: pool.as_raw(),
                        state: CommandBufferState::Initial,
                        one_time: false,
                        commands: Vec::new(),
                    },
                );
                vk::CommandBuffer::from_raw(raw)
            })
            .collect();
        Ok(buffers)
    }

    fn free_command_buffers(&self, pool: vk::CommandPool, command_buffers: &[vk::CommandBuffer]) {
        let mut state = self.state();
        for cb in command_buffers {
            let owned = state
                .command_buffers
                .get(&cb.as_raw())
                .is_some_and(|r| r.pool == pool.as_raw());
            if owned {
                state.command_buffers.remove(&cb.as_raw());
            } else {
                state.report(format!("free of {:?} not allocated from {:?}", cb, pool));
            }
        }
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
        let mut state = self.state();
        let record = state
            .command_buffers
            .get_mut(&command_buffer.as_raw())
            .ok_or_else(|| {
                RhiError::InvalidHandle(format!("unknown command buffer {:?}", command_buffer))
            })?;
        record.state = CommandBufferState::Initial;
        record.commands.clear();
        Ok(())
    }

    fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> RhiResult<()> {
        let mut state = self.state();
        let record = state
            .command_buffers
            .get_mut(&command_buffer.as_raw())
            .ok_or_else(|| {
                RhiError::InvalidHandle(format!("unknown command buffer {:?}", command_buffer))
            })?;
        if record.state == CommandBufferState::Recording {
            return Err(RhiError::InvalidUsage(format!(
                "{:?} is already recording",
                command_buffer
            )));
        }
        record.state = CommandBufferState::Recording;
        record.one_time = flags.contains(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        record.commands.clear();
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
        let mut state = self.state();
        let record = state
            .command_buffers
            .get_mut(&command_buffer.as_raw())
            .ok_or_else(|| {
                RhiError::InvalidHandle(format!("unknown command buffer {:?}", command_buffer))
            })?;
        if record.state != CommandBufferState::Recording {
            return Err(RhiError::InvalidUsage(format!(
                "end of {:?} which is not recording",
                command_buffer
            )));
        }
        record.state = CommandBufferState::Executable;
        Ok(())
    }

    fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        self.record(
            command_buffer,
            Command::CopyBuffer {
                src,
                dst,
                regions: regions.to_vec(),
            },
        );
    }

    fn cmd_begin_render_pass(&self, command_buffer: vk::CommandBuffer, begin: &RenderPassBegin) {
        self.record(command_buffer, Command::BeginRenderPass(begin.into()));
    }

    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        self.record(command_buffer, Command::EndRenderPass);
    }

    fn cmd_bind_pipeline(&self, command_buffer: vk::CommandBuffer, pipeline: vk::Pipeline) {
        self.record(command_buffer, Command::BindPipeline(pipeline));
    }

    fn cmd_set_viewport(&self, command_buffer: vk::CommandBuffer, _viewport: vk::Viewport) {
        self.record(command_buffer, Command::SetViewport);
    }

    fn cmd_set_scissor(&self, command_buffer: vk::CommandBuffer, _scissor: vk::Rect2D) {
        self.record(command_buffer, Command::SetScissor);
    }

    fn cmd_bind_vertex_buffers(
        &self,
        command_buffer: vk::CommandBuffer,
        _first_binding: u32,
        buffers: &[vk::Buffer],
        _offsets: &[vk::DeviceSize],
    ) {
        self.record(command_buffer, Command::BindVertexBuffers(buffers.to_vec()));
    }

    fn cmd_bind_index_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        _offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        self.record(command_buffer, Command::BindIndexBuffer(buffer, index_type));
    }

    fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        self.record(
            command_buffer,
            Command::BindDescriptorSets {
                layout,
                first_set,
                sets: sets.to_vec(),
                dynamic_offsets: dynamic_offsets.to_vec(),
            },
        );
    }

    fn cmd_push_constants(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        self.record(
            command_buffer,
            Command::PushConstants {
                layout,
                stages,
                offset,
                data: data.to_vec(),
            },
        );
    }

    fn cmd_draw(
        &self,
        command_buffer: vk::CommandBuffer,
        vertex_count: u32,
        _instance_count: u32,
        first_vertex: u32,
        _first_instance: u32,
    ) {
        self.record(
            command_buffer,
            Command::Draw {
                vertex_count,
                first_vertex,
            },
        );
    }

    fn cmd_draw_indexed(
        &self,
        command_buffer: vk::CommandBuffer,
        index_count: u32,
        _instance_count: u32,
        first_index: u32,
        _vertex_offset: i32,
        _first_instance: u32,
    ) {
        self.record(
            command_buffer,
            Command::DrawIndexed {
                index_count,
                first_index,
            },
        );
    }

    // =========================================================================
    // Synchronization and queues
    // =========================================================================

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore> {
        let mut state = self.state();
        let raw = self.create_object(&mut state, ObjectKind::Semaphore);
        state.semaphores.insert(raw, false);
        Ok(vk::Semaphore::from_raw(raw))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut state = self.state();
        if self.destroy_object(&mut state, ObjectKind::Semaphore, semaphore.as_raw()) {
            state.semaphores.remove(&semaphore.as_raw());
        }
    }

    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence> {
        let mut state = self.state();
        let raw = self.create_object(&mut state, ObjectKind::Fence);
        state.fences.insert(raw, signaled);
        Ok(vk::Fence::from_raw(raw))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state();
        if self.destroy_object(&mut state, ObjectKind::Fence, fence.as_raw()) {
            state.fences.remove(&fence.as_raw());
        }
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> RhiResult<()> {
        let signaled = self
            .state()
            .fences
            .get(&fence.as_raw())
            .copied()
            .ok_or_else(|| RhiError::InvalidHandle(format!("unknown fence {:?}", fence)))?;
        self.shared.push(DeviceEvent::FenceWait { fence });
        match (signaled, timeout) {
            (true, _) => Ok(()),
            (false, 0) => Err(RhiError::VulkanError(vk::Result::TIMEOUT)),
            (false, _) => Err(RhiError::InvalidUsage(format!(
                "wait on {:?} which has no pending submission",
                fence
            ))),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()> {
        let mut state = self.state();
        let signaled = state
            .fences
            .get_mut(&fence.as_raw())
            .ok_or_else(|| RhiError::InvalidHandle(format!("unknown fence {:?}", fence)))?;
        *signaled = false;
        self.shared.push(DeviceEvent::FenceReset { fence });
        Ok(())
    }

    fn fence_status(&self, fence: vk::Fence) -> RhiResult<bool> {
        self.fence_signaled(fence)
            .ok_or_else(|| RhiError::InvalidHandle(format!("unknown fence {:?}", fence)))
    }

    fn queue_submit(
        &self,
        queue: vk::Queue,
        submit: &SubmitDesc<'_>,
        fence: vk::Fence,
    ) -> RhiResult<()> {
        let mut state = self.state();
        if state.take_fail(FailPoint::QueueSubmit) {
            return Err(RhiError::Submission {
                op: SubmissionOp::Submit,
                result: vk::Result::ERROR_DEVICE_LOST,
            });
        }
        if !self.has_queue(queue) {
            return Err(RhiError::InvalidHandle(format!("unknown queue {:?}", queue)));
        }
        if fence != vk::Fence::null() {
            match state.fences.get(&fence.as_raw()) {
                Some(false) => {}
                Some(true) => {
                    return Err(RhiError::InvalidUsage(format!(
                        "submit with {:?} still signalled",
                        fence
                    )));
                }
                None => return Err(RhiError::InvalidHandle(format!("unknown fence {:?}", fence))),
            }
        }
        if submit.wait_semaphores.len() != submit.wait_stages.len() {
            return Err(RhiError::InvalidUsage(
                "each wait semaphore needs a wait stage".to_string(),
            ));
        }
        for semaphore in submit.wait_semaphores {
            if state.semaphores.get(&semaphore.as_raw()) != Some(&true) {
                return Err(RhiError::InvalidUsage(format!(
                    "submit waits on {:?} which will never be signalled",
                    semaphore
                )));
            }
        }
        for semaphore in submit.signal_semaphores {
            if state.semaphores.get(&semaphore.as_raw()) != Some(&false) {
                return Err(RhiError::InvalidUsage(format!(
                    "submit signals {:?} which is unknown or already signalled",
                    semaphore
                )));
            }
        }
        for cb in submit.command_buffers {
            let executable = state
                .command_buffers
                .get(&cb.as_raw())
                .is_some_and(|r| r.state == CommandBufferState::Executable);
            if !executable {
                return Err(RhiError::InvalidUsage(format!(
                    "submit of {:?} which is not executable",
                    cb
                )));
            }
        }

        self.shared.push(DeviceEvent::Submit {
            queue,
            command_buffers: submit.command_buffers.to_vec(),
            wait_semaphores: submit.wait_semaphores.to_vec(),
            wait_stages: submit.wait_stages.to_vec(),
            signal_semaphores: submit.signal_semaphores.to_vec(),
            fence,
        });

        for cb in submit.command_buffers {
            let events = self.execute(&mut state, cb.as_raw())?;
            for event in events {
                self.shared.push(event);
            }
            if let Some(record) = state.command_buffers.get_mut(&cb.as_raw())
                && record.one_time
            {
                record.state = CommandBufferState::Invalid;
            }
        }

        for semaphore in submit.wait_semaphores {
            state.semaphores.insert(semaphore.as_raw(), false);
        }
        for semaphore in submit.signal_semaphores {
            state.semaphores.insert(semaphore.as_raw(), true);
        }
        if fence != vk::Fence::null() {
            state.fences.insert(fence.as_raw(), true);
        }
        Ok(())
    }

    fn queue_present(&self, queue: vk::Queue, present: &PresentDesc<'_>) -> RhiResult<bool> {
        let surface_extents = self.shared.surfaces().clone();
        let mut state = self.state();
        if !self.has_queue(queue) {
            return Err(RhiError::InvalidHandle(format!("unknown queue {:?}", queue)));
        }
        for semaphore in present.wait_semaphores {
            if state.semaphores.get(&semaphore.as_raw()) != Some(&true) {
                return Err(RhiError::InvalidUsage(format!(
                    "present waits on {:?} which will never be signalled",
                    semaphore
                )));
            }
        }

        let record = state
            .swapchains
            .get_mut(&present.swapchain.as_raw())
            .ok_or_else(|| {
                RhiError::InvalidHandle(format!("unknown swapchain {:?}", present.swapchain))
            })?;
        if !record.acquired.remove(&present.image_index) {
            return Err(RhiError::InvalidUsage(format!(
                "present of image {} which was not acquired",
                present.image_index
            )));
        }
        let current = surface_extents.get(&record.info.surface.as_raw()).copied();
        let stale = record.info.retired
            || (!self.adapter.variable_extent && current != Some(record.info.extent));

        for semaphore in present.wait_semaphores {
            state.semaphores.insert(semaphore.as_raw(), false);
        }
        self.shared.push(DeviceEvent::Present {
            queue,
            swapchain: present.swapchain,
            image_index: present.image_index,
            wait_semaphores: present.wait_semaphores.to_vec(),
        });

        if stale || state.take_fail(FailPoint::PresentOutOfDate) {
            return Err(RhiError::Submission {
                op: SubmissionOp::Present,
                result: vk::Result::ERROR_OUT_OF_DATE_KHR,
            });
        }
        Ok(state.take_fail(FailPoint::PresentSuboptimal))
    }

    fn queue_wait_idle(&self, queue: vk::Queue) -> RhiResult<()> {
        if !self.has_queue(queue) {
            return Err(RhiError::InvalidHandle(format!("unknown queue {:?}", queue)));
        }
        self.shared.push(DeviceEvent::QueueWaitIdle { queue });
        Ok(())
    }

    fn wait_idle(&self) -> RhiResult<()> {
        self.shared.push(DeviceEvent::DeviceWaitIdle);
        Ok(())
    }

    fn destroy(&self) {
        let mut state = self.state();
        if state.destroyed {
            return;
        }
        if !state.objects.is_empty() {
            let mut kinds: Vec<_> = state.objects.values().map(|k| format!("{:?}", k)).collect();
            kinds.sort();
            warn!(
                "Headless device destroyed with {} live object(s): {:?}",
                kinds.len(),
                kinds
            );
        }
        state.destroyed = true;
        self.shared.push(DeviceEvent::DeviceDestroyed);
        info!("Headless device destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_buffer(device: &HeadlessDevice, size: u64, usage: vk::BufferUsageFlags) -> vk::Buffer {
        let buffer = device.create_buffer(&BufferDesc { size, usage }).unwrap();
        let reqs = device.buffer_memory_requirements(buffer);
        let memory = device.allocate_memory(reqs.size, 1).unwrap();
        device.bind_buffer_memory(buffer, memory, 0).unwrap();
        buffer
    }

    #[test]
    fn test_device_local_memory_is_not_mappable() {
        let device = HeadlessDevice::new_default();
        let memory = device.allocate_memory(256, 0).unwrap();
        assert!(device.write_memory(memory, 0, &[1, 2, 3]).is_err());
        assert!(device.read_memory(memory, 0, 3).is_err());
    }

    #[test]
    fn test_copy_executes_at_submit() {
        let device = HeadlessDevice::new_default();
        let queue = device.get_queue(0, 0);
        let src = host_buffer(&device, 4, vk::BufferUsageFlags::TRANSFER_SRC);
        let dst = host_buffer(&device, 4, vk::BufferUsageFlags::TRANSFER_DST);
        let src_memory = device.buffer_info(src).unwrap().memory.unwrap();
        device.write_memory(src_memory, 0, &[9, 8, 7, 6]).unwrap();

        let pool = device
            .create_command_pool(0, vk::CommandPoolCreateFlags::empty())
            .unwrap();
        let cb = device.allocate_command_buffers(pool, 1).unwrap()[0];
        device
            .begin_command_buffer(cb, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
            .unwrap();
        device.cmd_copy_buffer(
            cb,
            src,
            dst,
            &[vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: 4,
            }],
        );
        device.end_command_buffer(cb).unwrap();
        assert_eq!(device.buffer_contents(dst).unwrap(), vec![0, 0, 0, 0]);

        let cbs = [cb];
        device
            .queue_submit(
                queue,
                &SubmitDesc {
                    command_buffers: &cbs,
                    ..Default::default()
                },
                vk::Fence::null(),
            )
            .unwrap();
        assert_eq!(device.buffer_contents(dst).unwrap(), vec![9, 8, 7, 6]);

        // One-time buffers cannot be resubmitted without re-recording.
        assert!(
            device
                .queue_submit(
                    queue,
                    &SubmitDesc {
                        command_buffers: &cbs,
                        ..Default::default()
                    },
                    vk::Fence::null(),
                )
                .is_err()
        );
    }

    #[test]
    fn test_submit_with_signalled_fence_is_rejected() {
        let device = HeadlessDevice::new_default();
        let queue = device.get_queue(0, 0);
        let fence = device.create_fence(true).unwrap();
        let result = device.queue_submit(queue, &SubmitDesc::default(), fence);
        assert!(matches!(result, Err(RhiError::InvalidUsage(_))));

        device.reset_fence(fence).unwrap();
        device
            .queue_submit(queue, &SubmitDesc::default(), fence)
            .unwrap();
        assert_eq!(device.fence_signaled(fence), Some(true));
    }

    #[test]
    fn test_wait_on_idle_fence_is_reported() {
        let device = HeadlessDevice::new_default();
        let fence = device.create_fence(false).unwrap();
        assert!(device.wait_for_fence(fence, u64::MAX).is_err());
        assert!(matches!(
            device.wait_for_fence(fence, 0),
            Err(RhiError::VulkanError(vk::Result::TIMEOUT))
        ));
    }

    #[test]
    fn test_semaphore_must_be_signalled_before_wait() {
        let device = HeadlessDevice::new_default();
        let queue = device.get_queue(0, 0);
        let semaphore = device.create_semaphore().unwrap();
        let waits = [semaphore];
        let stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = SubmitDesc {
            wait_semaphores: &waits,
            wait_stages: &stages,
            ..Default::default()
        };
        assert!(device.queue_submit(queue, &submit, vk::Fence::null()).is_err());
    }

    #[test]
    fn test_descriptor_pool_capacity() {
        let device = HeadlessDevice::new_default();
        let layout = device
            .create_descriptor_set_layout(&[DescriptorBinding {
                binding: 0,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                count: 1,
                stages: vk::ShaderStageFlags::VERTEX,
            }])
            .unwrap();
        let pool = device
            .create_descriptor_pool(
                2,
                &[vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::UNIFORM_BUFFER,
                    descriptor_count: 2,
                }],
            )
            .unwrap();
        assert_eq!(
            device
                .allocate_descriptor_sets(pool, &[layout, layout])
                .unwrap()
                .len(),
            2
        );
        assert!(device.allocate_descriptor_sets(pool, &[layout]).is_err());
    }

    #[test]
    fn test_live_object_tracking() {
        let device = HeadlessDevice::new_default();
        let semaphore = device.create_semaphore().unwrap();
        let fence = device.create_fence(false).unwrap();
        assert_eq!(device.live_objects(), 2);
        device.destroy_semaphore(semaphore);
        device.destroy_fence(fence);
        assert_eq!(device.live_objects(), 0);

        // Destroying twice is reported rather than silently accepted.
        device.destroy_fence(fence);
        assert_eq!(device.validation_errors().len(), 1);
    }

    #[test]
    fn test_shader_module_requires_spirv_magic() {
        let device = HeadlessDevice::new_default();
        assert!(device.create_shader_module(&[0xdead_beef]).is_err());
        assert!(device.create_shader_module(&[SPIRV_MAGIC, 0]).is_ok());
    }
}
