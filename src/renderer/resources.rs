//! GPU resources owned by the panorama renderer

use super::shaders::{MIRROR_SHADER, SPHERE_SHADER};
use crate::backend::*;
use crate::resources::{GpuTexture, Mesh, TextureData};
use crate::stereo::Eye;

const TARGET_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;
const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

/// A handle created during initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerEntry {
    Buffer(BufferHandle),
    Texture(TextureHandle),
    TextureView(TextureViewHandle),
    Sampler(SamplerHandle),
    BindGroupLayout(BindGroupLayoutHandle),
    BindGroup(BindGroupHandle),
    RenderPipeline(RenderPipelineHandle),
}

macro_rules! ledger_from {
    ($($handle:ident => $variant:ident),* $(,)?) => {
        $(impl From<$handle> for LedgerEntry {
            fn from(handle: $handle) -> Self {
                LedgerEntry::$variant(handle)
            }
        })*
    };
}

ledger_from! {
    BufferHandle => Buffer,
    TextureHandle => Texture,
    TextureViewHandle => TextureView,
    SamplerHandle => Sampler,
    BindGroupLayoutHandle => BindGroupLayout,
    BindGroupHandle => BindGroup,
    RenderPipelineHandle => RenderPipeline,
}

/// Every GPU handle created for a [`RenderResources`], in creation order.
///
/// Released in reverse order, so dependents go before what they reference.
#[derive(Debug, Default)]
pub struct ResourceLedger {
    entries: Vec<LedgerEntry>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a handle and hand it back
    pub fn track<H: Copy + Into<LedgerEntry>>(&mut self, handle: H) -> H {
        self.entries.push(handle.into());
        handle
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Destroy every tracked handle
    pub fn release<B: GraphicsBackend>(&mut self, backend: &mut B) {
        while let Some(entry) = self.entries.pop() {
            match entry {
                LedgerEntry::Buffer(h) => backend.destroy_buffer(h),
                LedgerEntry::Texture(h) => backend.destroy_texture(h),
                LedgerEntry::TextureView(h) => backend.destroy_texture_view(h),
                LedgerEntry::Sampler(h) => backend.destroy_sampler(h),
                LedgerEntry::BindGroupLayout(h) => backend.destroy_bind_group_layout(h),
                LedgerEntry::BindGroup(h) => backend.destroy_bind_group(h),
                LedgerEntry::RenderPipeline(h) => backend.destroy_render_pipeline(h),
            }
        }
    }
}

impl Drop for ResourceLedger {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            log::warn!(
                "{} GPU resources dropped without being released",
                self.entries.len()
            );
        }
    }
}

/// Multisampled color and depth target resolved into a single-sample texture
#[derive(Debug, Clone, Copy)]
pub struct OffscreenTarget {
    pub width: u32,
    pub height: u32,
    /// Multisampled color, absent when rendering single-sampled
    pub msaa: Option<(TextureHandle, TextureViewHandle)>,
    pub resolve: TextureHandle,
    pub resolve_view: TextureViewHandle,
    pub depth_view: TextureViewHandle,
}

impl OffscreenTarget {
    fn create<B: GraphicsBackend>(
        backend: &mut B,
        ledger: &mut ResourceLedger,
        label: &str,
        width: u32,
        height: u32,
        samples: u32,
    ) -> BackendResult<Self> {
        let msaa = if samples > 1 {
            let texture = ledger.track(backend.create_texture(&TextureDescriptor {
                label: Some(format!("{} msaa", label)),
                width,
                height,
                sample_count: samples,
                format: TARGET_FORMAT,
                usage: TextureUsage::RENDER_ATTACHMENT,
            })?);
            let view = ledger.track(backend.create_texture_view(texture)?);
            Some((texture, view))
        } else {
            None
        };

        let resolve = ledger.track(backend.create_texture(&TextureDescriptor {
            label: Some(format!("{} resolve", label)),
            width,
            height,
            sample_count: 1,
            format: TARGET_FORMAT,
            usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_SRC | TextureUsage::TEXTURE_BINDING,
        })?);
        let resolve_view = ledger.track(backend.create_texture_view(resolve)?);

        let depth = ledger.track(backend.create_texture(&TextureDescriptor {
            label: Some(format!("{} depth", label)),
            width,
            height,
            sample_count: samples,
            format: DEPTH_FORMAT,
            usage: TextureUsage::RENDER_ATTACHMENT,
        })?);
        let depth_view = ledger.track(backend.create_texture_view(depth)?);

        Ok(Self {
            width,
            height,
            msaa,
            resolve,
            resolve_view,
            depth_view,
        })
    }

    /// Pass descriptor clearing color and depth, resolving when multisampled
    pub fn pass_descriptor(&self, label: &str, clear_color: [f32; 4]) -> RenderPassDescriptor {
        let (view, resolve_target) = match self.msaa {
            Some((_, msaa_view)) => (msaa_view, Some(self.resolve_view)),
            None => (self.resolve_view, None),
        };
        RenderPassDescriptor {
            label: Some(label.to_string()),
            color_attachments: vec![ColorAttachment {
                view,
                resolve_target,
                load_op: LoadOp::Clear(clear_color),
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: Some(DepthStencilAttachment {
                view: self.depth_view,
                depth_load_op: LoadOp::Clear([1.0; 4]),
                depth_store_op: StoreOp::Discard,
                depth_clear_value: 1.0,
            }),
        }
    }
}

/// Offscreen target plus the transform uniform drawn into it
#[derive(Debug, Clone, Copy)]
pub struct EyeTarget {
    pub target: OffscreenTarget,
    pub uniform: BufferHandle,
    pub transform_bind_group: BindGroupHandle,
}

impl EyeTarget {
    fn create<B: GraphicsBackend>(
        backend: &mut B,
        ledger: &mut ResourceLedger,
        transform_layout: BindGroupLayoutHandle,
        label: &str,
        width: u32,
        height: u32,
        samples: u32,
    ) -> BackendResult<Self> {
        let target = OffscreenTarget::create(backend, ledger, label, width, height, samples)?;
        let uniform = ledger.track(backend.create_buffer(&BufferDescriptor {
            label: Some(format!("{} transform", label)),
            size: std::mem::size_of::<TransformUniform>() as u64,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
        })?);
        let transform_bind_group = ledger.track(backend.create_bind_group(
            transform_layout,
            &[(
                0,
                BindGroupEntry::Buffer {
                    buffer: uniform,
                    offset: 0,
                    size: None,
                },
            )],
        )?);
        Ok(Self {
            target,
            uniform,
            transform_bind_group,
        })
    }
}

/// Side-by-side texture holding both eyes, submitted to the compositor
#[derive(Debug, Clone, Copy)]
pub struct CompositeTexture {
    pub texture: TextureHandle,
    pub view: TextureViewHandle,
    pub width: u32,
    pub height: u32,
}

/// Which targets to build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetLayout {
    /// Two eye targets of this size and a composite twice as wide
    Stereo { eye_width: u32, eye_height: u32 },
    /// One flat preview target
    Preview { width: u32, height: u32 },
}

/// Settings the resources are built from
#[derive(Debug, Clone, Copy)]
pub struct ResourceSettings {
    pub layout: TargetLayout,
    pub msaa_samples: u32,
}

/// Uploaded mesh buffers
#[derive(Debug, Clone, Copy)]
pub struct MeshBuffers {
    pub vertex: BufferHandle,
    pub index: BufferHandle,
    pub index_count: u32,
}

impl MeshBuffers {
    fn upload<B: GraphicsBackend>(
        backend: &mut B,
        ledger: &mut ResourceLedger,
        mesh: &Mesh,
    ) -> BackendResult<Self> {
        let vertex = ledger.track(backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{} vertices", mesh.name)),
                size: mesh.vertex_bytes().len() as u64,
                usage: BufferUsage::VERTEX,
            },
            mesh.vertex_bytes(),
        )?);
        let index = ledger.track(backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{} indices", mesh.name)),
                size: mesh.index_bytes().len() as u64,
                usage: BufferUsage::INDEX,
            },
            mesh.index_bytes(),
        )?);
        Ok(Self {
            vertex,
            index,
            index_count: mesh.index_count() as u32,
        })
    }

    pub fn bind<B: GraphicsBackend>(&self, backend: &mut B) {
        backend.set_vertex_buffer(0, self.vertex, 0);
        backend.set_index_buffer(self.index, 0, IndexFormat::Uint32);
    }
}

/// All GPU state of the panorama renderer.
///
/// Built by [`RenderResources::create`] and released by
/// [`RenderResources::destroy`]; if creation fails partway, whatever was
/// already created is released before the error is returned.
#[derive(Debug)]
pub struct RenderResources {
    pub sphere_pipeline: RenderPipelineHandle,
    pub mirror_pipeline: RenderPipelineHandle,
    pub sphere: MeshBuffers,
    pub quad: MeshBuffers,
    pub panorama_bind_group: BindGroupHandle,
    /// Both eyes in stereo, a single preview target otherwise
    pub targets: Vec<EyeTarget>,
    pub composite: Option<CompositeTexture>,
    /// Copy of the composite shown in the window, stereo only
    pub mirror_copy: Option<CompositeTexture>,
    /// Samples the mirror copy in stereo, the preview target otherwise
    pub mirror_bind_group: BindGroupHandle,
    ledger: ResourceLedger,
}

impl RenderResources {
    pub fn create<B: GraphicsBackend>(
        backend: &mut B,
        settings: &ResourceSettings,
        sphere: &Mesh,
        panorama: &TextureData,
    ) -> BackendResult<Self> {
        let mut ledger = ResourceLedger::new();
        match Self::build(backend, &mut ledger, settings, sphere, panorama) {
            Ok(mut resources) => {
                log::debug!("Created {} GPU resources", ledger.len());
                resources.ledger = std::mem::take(&mut ledger);
                Ok(resources)
            }
            Err(e) => {
                log::error!("GPU resource creation failed, releasing {} handles: {}", ledger.len(), e);
                ledger.release(backend);
                Err(e)
            }
        }
    }

    fn build<B: GraphicsBackend>(
        backend: &mut B,
        ledger: &mut ResourceLedger,
        settings: &ResourceSettings,
        sphere: &Mesh,
        panorama: &TextureData,
    ) -> BackendResult<Self> {
        let samples = settings.msaa_samples.max(1);

        let transform_layout = ledger.track(backend.create_bind_group_layout(&[BindGroupLayoutEntry {
            binding: 0,
            visibility: ShaderStageFlags::VERTEX_FRAGMENT,
            ty: BindingType::UniformBuffer,
        }])?);
        let texture_layout = ledger.track(backend.create_bind_group_layout(&[
            BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStageFlags::FRAGMENT,
                ty: BindingType::Texture,
            },
            BindGroupLayoutEntry {
                binding: 1,
                visibility: ShaderStageFlags::FRAGMENT,
                ty: BindingType::Sampler,
            },
        ])?);

        let sphere_pipeline = ledger.track(backend.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("Sphere Pipeline".into()),
            shader: SPHERE_SHADER.to_string(),
            vertex_layouts: vec![Vertex::layout()],
            bind_group_layouts: vec![transform_layout, texture_layout],
            primitive_topology: sphere.topology.primitive_topology(),
            // Seen from inside, so neither winding may be dropped
            cull_mode: CullMode::None,
            depth_stencil: Some(DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: CompareFunction::Less,
            }),
            color_format: TARGET_FORMAT,
            sample_count: samples,
        })?);

        let mirror_pipeline = ledger.track(backend.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("Mirror Pipeline".into()),
            shader: MIRROR_SHADER.to_string(),
            vertex_layouts: vec![Vertex::layout()],
            bind_group_layouts: vec![texture_layout],
            primitive_topology: PrimitiveTopology::TriangleList,
            cull_mode: CullMode::None,
            depth_stencil: None,
            color_format: backend.swapchain_format(),
            sample_count: 1,
        })?);

        let sampler = ledger.track(backend.create_sampler(&SamplerDescriptor {
            label: Some("Panorama Sampler".into()),
            address_mode_u: AddressMode::Repeat,
            ..Default::default()
        })?);

        let sphere_buffers = MeshBuffers::upload(backend, ledger, sphere)?;
        let quad_buffers = MeshBuffers::upload(backend, ledger, &Mesh::quad())?;

        let panorama_texture = GpuTexture::create(backend, panorama)?;
        ledger.track(panorama_texture.handle);
        ledger.track(panorama_texture.view);
        let panorama_bind_group = ledger.track(backend.create_bind_group(
            texture_layout,
            &[
                (0, BindGroupEntry::Texture(panorama_texture.view)),
                (1, BindGroupEntry::Sampler(sampler)),
            ],
        )?);

        let (targets, composite) = match settings.layout {
            TargetLayout::Stereo { eye_width, eye_height } => {
                let left = EyeTarget::create(backend, ledger, transform_layout, "Left Eye", eye_width, eye_height, samples)?;
                let right = EyeTarget::create(backend, ledger, transform_layout, "Right Eye", eye_width, eye_height, samples)?;

                let composite_width = eye_width * 2;
                let texture = ledger.track(backend.create_texture(&TextureDescriptor {
                    label: Some("Eye Composite".into()),
                    width: composite_width,
                    height: eye_height,
                    sample_count: 1,
                    format: TARGET_FORMAT,
                    // Never sampled: its last use in a frame is as a copy source,
                    // which leaves it in the layout the compositor reads from
                    usage: TextureUsage::COPY_DST | TextureUsage::COPY_SRC,
                })?);
                let view = ledger.track(backend.create_texture_view(texture)?);
                let composite = CompositeTexture {
                    texture,
                    view,
                    width: composite_width,
                    height: eye_height,
                };

                let mirror_texture = ledger.track(backend.create_texture(&TextureDescriptor {
                    label: Some("Composite Mirror".into()),
                    width: composite_width,
                    height: eye_height,
                    sample_count: 1,
                    format: TARGET_FORMAT,
                    usage: TextureUsage::COPY_DST | TextureUsage::TEXTURE_BINDING,
                })?);
                let mirror_view = ledger.track(backend.create_texture_view(mirror_texture)?);
                let mirror_copy = CompositeTexture {
                    texture: mirror_texture,
                    view: mirror_view,
                    width: composite_width,
                    height: eye_height,
                };
                (vec![left, right], Some((composite, mirror_copy)))
            }
            TargetLayout::Preview { width, height } => {
                let preview = EyeTarget::create(backend, ledger, transform_layout, "Preview", width, height, samples)?;
                (vec![preview], None)
            }
        };

        let mirror_source = match (&composite, targets.first()) {
            (Some((_, mirror_copy)), _) => mirror_copy.view,
            (None, Some(preview)) => preview.target.resolve_view,
            (None, None) => {
                return Err(BackendError::TextureCreationFailed(
                    "no render target to mirror".into(),
                ))
            }
        };
        let mirror_bind_group = ledger.track(backend.create_bind_group(
            texture_layout,
            &[
                (0, BindGroupEntry::Texture(mirror_source)),
                (1, BindGroupEntry::Sampler(sampler)),
            ],
        )?);

        Ok(Self {
            sphere_pipeline,
            mirror_pipeline,
            sphere: sphere_buffers,
            quad: quad_buffers,
            panorama_bind_group,
            targets,
            composite: composite.map(|(composite, _)| composite),
            mirror_copy: composite.map(|(_, mirror_copy)| mirror_copy),
            mirror_bind_group,
            ledger: ResourceLedger::new(),
        })
    }

    /// Target rendered for `eye`; the preview target stands in for both
    pub fn target_for(&self, eye: Eye) -> Option<&EyeTarget> {
        self.targets.get(eye.index()).or_else(|| self.targets.first())
    }

    /// Number of GPU handles owned
    pub fn handle_count(&self) -> usize {
        self.ledger.len()
    }

    pub fn destroy<B: GraphicsBackend>(mut self, backend: &mut B) {
        log::debug!("Releasing {} GPU resources", self.ledger.len());
        self.ledger.release(backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::build_sphere;

    fn stereo_settings() -> ResourceSettings {
        ResourceSettings {
            layout: TargetLayout::Stereo {
                eye_width: 320,
                eye_height: 200,
            },
            msaa_samples: 4,
        }
    }

    fn panorama() -> TextureData {
        TextureData::checkerboard(64, 32, [255; 4], [0, 0, 0, 255])
    }

    #[test]
    fn stereo_builds_two_targets_and_composite() {
        let mut backend = HeadlessBackend::new(640, 480);
        let mesh = build_sphere(2.0, 16, 8).unwrap();
        let resources = RenderResources::create(&mut backend, &stereo_settings(), &mesh, &panorama()).unwrap();

        assert_eq!(resources.targets.len(), 2);
        let composite = resources.composite.unwrap();
        assert_eq!((composite.width, composite.height), (640, 200));
        let desc = backend.texture_descriptor(composite.texture).unwrap();
        assert_eq!(desc.sample_count, 1);
        assert_eq!(desc.format, TextureFormat::Rgba8Unorm);
        assert!(desc.usage.contains(TextureUsage::COPY_SRC));
        assert!(!desc.usage.contains(TextureUsage::TEXTURE_BINDING));

        let mirror = resources.mirror_copy.unwrap();
        assert_eq!((mirror.width, mirror.height), (640, 200));
        let mirror_desc = backend.texture_descriptor(mirror.texture).unwrap();
        assert!(mirror_desc.usage.contains(TextureUsage::TEXTURE_BINDING));
        assert_eq!(resources.sphere.index_count as usize, mesh.index_count());

        resources.destroy(&mut backend);
        assert_eq!(backend.live_resource_count(), 0);
    }

    #[test]
    fn eye_targets_are_multisampled() {
        let mut backend = HeadlessBackend::new(640, 480);
        let mesh = build_sphere(2.0, 16, 8).unwrap();
        let resources = RenderResources::create(&mut backend, &stereo_settings(), &mesh, &panorama()).unwrap();

        for eye in &resources.targets {
            let (msaa, _) = eye.target.msaa.unwrap();
            assert_eq!(backend.texture_descriptor(msaa).unwrap().sample_count, 4);
            assert_eq!(backend.texture_descriptor(eye.target.resolve).unwrap().sample_count, 1);
            let pass = eye.target.pass_descriptor("eye", [0.0; 4]);
            assert_eq!(pass.color_attachments[0].resolve_target, Some(eye.target.resolve_view));
        }
        resources.destroy(&mut backend);
    }

    #[test]
    fn single_sample_preview_skips_resolve() {
        let mut backend = HeadlessBackend::new(640, 480);
        let mesh = build_sphere(2.0, 16, 8).unwrap();
        let settings = ResourceSettings {
            layout: TargetLayout::Preview { width: 320, height: 240 },
            msaa_samples: 1,
        };
        let resources = RenderResources::create(&mut backend, &settings, &mesh, &panorama()).unwrap();

        assert_eq!(resources.targets.len(), 1);
        assert!(resources.composite.is_none());
        let target = resources.targets[0].target;
        assert!(target.msaa.is_none());
        let pass = target.pass_descriptor("preview", [0.0; 4]);
        assert_eq!(pass.color_attachments[0].view, target.resolve_view);
        assert!(pass.color_attachments[0].resolve_target.is_none());

        assert!(std::ptr::eq(
            resources.target_for(Eye::Right).unwrap(),
            resources.target_for(Eye::Left).unwrap()
        ));
        resources.destroy(&mut backend);
        assert_eq!(backend.live_resource_count(), 0);
    }

    #[test]
    fn strip_mesh_gets_strip_pipeline() {
        let mut backend = HeadlessBackend::new(640, 480);
        let mesh = crate::resources::build_sphere_with(
            &crate::resources::SphereOptions::new(2.0, 16, 8)
                .with_topology(crate::resources::MeshTopology::TriangleStrip),
        )
        .unwrap();
        let resources = RenderResources::create(&mut backend, &stereo_settings(), &mesh, &panorama()).unwrap();
        let desc = backend.pipeline_descriptor(resources.sphere_pipeline).unwrap();
        assert_eq!(desc.primitive_topology, PrimitiveTopology::TriangleStrip);
        resources.destroy(&mut backend);
    }

    #[test]
    fn failure_at_every_step_releases_everything() {
        let mesh = build_sphere(2.0, 16, 8).unwrap();
        let total = {
            let mut backend = HeadlessBackend::new(640, 480);
            let resources = RenderResources::create(&mut backend, &stereo_settings(), &mesh, &panorama()).unwrap();
            let count = resources.handle_count();
            resources.destroy(&mut backend);
            count
        };

        for budget in 0..total {
            let mut backend = HeadlessBackend::new(640, 480).fail_after(budget);
            let result = RenderResources::create(&mut backend, &stereo_settings(), &mesh, &panorama());
            assert!(result.is_err(), "creation with budget {} should fail", budget);
            assert_eq!(backend.live_resource_count(), 0, "leak with budget {}", budget);
        }
    }

    #[test]
    fn ledger_releases_in_reverse_order() {
        let mut backend = HeadlessBackend::new(64, 64);
        let mut ledger = ResourceLedger::new();
        let texture = ledger.track(backend.create_texture(&TextureDescriptor::default()).unwrap());
        ledger.track(backend.create_texture_view(texture).unwrap());
        assert_eq!(ledger.len(), 2);
        ledger.release(&mut backend);
        assert!(ledger.is_empty());
        assert_eq!(backend.live_resource_count(), 0);
    }
}
