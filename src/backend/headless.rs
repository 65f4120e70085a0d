//! Recording backend without a GPU
//!
//! Every call is appended to a command log and every created resource is
//! tracked until destroyed, so frame sequences and resource lifecycles can be
//! checked in tests.

use crate::backend::traits::*;
use crate::backend::types::*;
use std::collections::{HashMap, HashSet};

/// A recorded backend call
#[derive(Debug, Clone)]
pub enum Command {
    BeginFrame,
    EndFrame,
    BeginRenderPass(RenderPassDescriptor),
    EndRenderPass,
    SetPipeline(RenderPipelineHandle),
    SetBindGroup { index: u32, bind_group: BindGroupHandle },
    SetVertexBuffer { slot: u32, buffer: BufferHandle },
    SetIndexBuffer { buffer: BufferHandle, format: IndexFormat },
    SetViewport { x: f32, y: f32, width: f32, height: f32 },
    DrawIndexed { indices: std::ops::Range<u32>, base_vertex: i32, instances: std::ops::Range<u32> },
    CopyTexture { src: TextureHandle, dst: TextureHandle, copy: TextureCopy },
    WriteBuffer { buffer: BufferHandle, offset: u64, data: Vec<u8> },
    WriteTexture { texture: TextureHandle, width: u32, height: u32 },
}

/// Backend that records instead of rendering
pub struct HeadlessBackend {
    width: u32,
    height: u32,
    max_texture_dimension: u32,
    next_id: u64,
    frame_open: bool,
    pass_open: bool,
    /// Remaining successful creations before every create call fails
    creation_budget: Option<usize>,

    commands: Vec<Command>,
    buffers: HashSet<u64>,
    textures: HashMap<u64, TextureDescriptor>,
    texture_views: HashSet<u64>,
    samplers: HashSet<u64>,
    bind_group_layouts: HashSet<u64>,
    bind_groups: HashSet<u64>,
    render_pipelines: HashMap<u64, RenderPipelineDescriptor>,
}

impl HeadlessBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            max_texture_dimension: 8192,
            next_id: 1,
            frame_open: false,
            pass_open: false,
            creation_budget: None,
            commands: Vec::new(),
            buffers: HashSet::new(),
            textures: HashMap::new(),
            texture_views: HashSet::new(),
            samplers: HashSet::new(),
            bind_group_layouts: HashSet::new(),
            bind_groups: HashSet::new(),
            render_pipelines: HashMap::new(),
        }
    }

    /// Let `count` resource creations succeed, then fail every later one
    pub fn fail_after(mut self, count: usize) -> Self {
        self.creation_budget = Some(count);
        self
    }

    pub fn with_max_texture_dimension(mut self, max: u32) -> Self {
        self.max_texture_dimension = max;
        self
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Drain the command log
    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    /// Number of resources created and not yet destroyed
    pub fn live_resource_count(&self) -> usize {
        self.buffers.len()
            + self.textures.len()
            + self.texture_views.len()
            + self.samplers.len()
            + self.bind_group_layouts.len()
            + self.bind_groups.len()
            + self.render_pipelines.len()
    }

    pub fn texture_descriptor(&self, texture: TextureHandle) -> Option<&TextureDescriptor> {
        self.textures.get(&texture.0)
    }

    pub fn pipeline_descriptor(&self, pipeline: RenderPipelineHandle) -> Option<&RenderPipelineDescriptor> {
        self.render_pipelines.get(&pipeline.0)
    }

    fn allocate(&mut self, what: &str) -> BackendResult<u64> {
        if let Some(budget) = self.creation_budget.as_mut() {
            if *budget == 0 {
                return Err(BackendError::InitializationFailed(format!(
                    "{} creation refused by headless backend",
                    what
                )));
            }
            *budget -= 1;
        }
        let id = self.next_id;
        self.next_id += 1;
        Ok(id)
    }

    fn record(&mut self, command: Command) {
        self.commands.push(command);
    }

    fn record_in_pass(&mut self, command: Command) {
        if self.pass_open {
            self.commands.push(command);
        } else {
            log::warn!("{:?} recorded outside a render pass, ignored", command);
        }
    }
}

impl GraphicsBackend for HeadlessBackend {
    fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.width = width.min(self.max_texture_dimension);
            self.height = height.min(self.max_texture_dimension);
        }
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn begin_frame(&mut self) -> BackendResult<FrameContext> {
        self.frame_open = true;
        let swapchain_view = TextureViewHandle(self.next_id);
        self.next_id += 1;
        self.record(Command::BeginFrame);
        Ok(FrameContext {
            swapchain_view,
            width: self.width,
            height: self.height,
        })
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        self.frame_open = false;
        self.record(Command::EndFrame);
        Ok(())
    }

    fn swapchain_format(&self) -> TextureFormat {
        TextureFormat::Bgra8Unorm
    }

    fn max_texture_dimension(&self) -> u32 {
        self.max_texture_dimension
    }

    fn create_buffer(&mut self, _desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        let id = self.allocate("buffer")?;
        self.buffers.insert(id);
        Ok(BufferHandle(id))
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        _data: &[u8],
    ) -> BackendResult<BufferHandle> {
        self.create_buffer(desc)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        self.record(Command::WriteBuffer {
            buffer,
            offset,
            data: data.to_vec(),
        });
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.width > self.max_texture_dimension || desc.height > self.max_texture_dimension {
            return Err(BackendError::TextureCreationFailed(format!(
                "{}x{} exceeds the device limit of {}",
                desc.width, desc.height, self.max_texture_dimension
            )));
        }
        let id = self.allocate("texture")?;
        self.textures.insert(id, desc.clone());
        Ok(TextureHandle(id))
    }

    fn create_texture_view(&mut self, texture: TextureHandle) -> BackendResult<TextureViewHandle> {
        if !self.textures.contains_key(&texture.0) {
            return Err(BackendError::TextureCreationFailed("Texture not found".into()));
        }
        let id = self.allocate("texture view")?;
        self.texture_views.insert(id);
        Ok(TextureViewHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, _data: &[u8], width: u32, height: u32) {
        self.record(Command::WriteTexture {
            texture,
            width,
            height,
        });
    }

    fn create_sampler(&mut self, _desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        let id = self.allocate("sampler")?;
        self.samplers.insert(id);
        Ok(SamplerHandle(id))
    }

    fn create_bind_group_layout(
        &mut self,
        _entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle> {
        let id = self.allocate("bind group layout")?;
        self.bind_group_layouts.insert(id);
        Ok(BindGroupLayoutHandle(id))
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        _entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        if !self.bind_group_layouts.contains(&layout.0) {
            return Err(BackendError::PipelineCreationFailed("Layout not found".into()));
        }
        let id = self.allocate("bind group")?;
        self.bind_groups.insert(id);
        Ok(BindGroupHandle(id))
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle> {
        let id = self.allocate("render pipeline")?;
        self.render_pipelines.insert(id, desc.clone());
        Ok(RenderPipelineHandle(id))
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        self.pass_open = true;
        self.record(Command::BeginRenderPass(desc.clone()));
    }

    fn end_render_pass(&mut self) {
        if self.pass_open {
            self.pass_open = false;
            self.record(Command::EndRenderPass);
        }
    }

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        self.record_in_pass(Command::SetPipeline(pipeline));
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle) {
        self.record_in_pass(Command::SetBindGroup { index, bind_group });
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, _offset: u64) {
        self.record_in_pass(Command::SetVertexBuffer { slot, buffer });
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, _offset: u64, format: IndexFormat) {
        self.record_in_pass(Command::SetIndexBuffer { buffer, format });
    }

    fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32, _min_depth: f32, _max_depth: f32) {
        self.record_in_pass(Command::SetViewport { x, y, width, height });
    }

    fn draw_indexed(
        &mut self,
        indices: std::ops::Range<u32>,
        base_vertex: i32,
        instances: std::ops::Range<u32>,
    ) {
        self.record_in_pass(Command::DrawIndexed {
            indices,
            base_vertex,
            instances,
        });
    }

    fn copy_texture_to_texture(&mut self, src: TextureHandle, dst: TextureHandle, copy: TextureCopy) {
        if self.pass_open {
            log::warn!("copy_texture_to_texture called inside a render pass, ignored");
            return;
        }
        self.record(Command::CopyTexture { src, dst, copy });
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.0);
    }

    fn destroy_texture_view(&mut self, view: TextureViewHandle) {
        self.texture_views.remove(&view.0);
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        self.samplers.remove(&sampler.0);
    }

    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle) {
        self.bind_groups.remove(&bind_group.0);
    }

    fn destroy_bind_group_layout(&mut self, layout: BindGroupLayoutHandle) {
        self.bind_group_layouts.remove(&layout.0);
    }

    fn destroy_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        self.render_pipelines.remove(&pipeline.0);
    }
}
