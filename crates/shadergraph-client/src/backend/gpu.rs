//! wgpu rendering backend.
//!
//! Every pass is a full-screen triangle. Fragment programs go through
//! [`reflect::compile_fragment`](super::reflect::compile_fragment); bind
//! group layouts, uniform buffers and samplers are derived from the
//! reflection. Vertex stages come from the same GLSL front end. The frame is
//! an offscreen RGBA8 texture that can be read back after
//! [`RenderBackend::end_frame`].

use std::borrow::Cow;
use std::collections::HashMap;

use shadergraph_core::{Extent, TextureFilter, TextureFormat};
use wgpu::util::DeviceExt;

use super::reflect::{self, Reflection};
use super::{
    BackendError, DrawCall, ProgramDesc, ProgramId, ProgramInfo, ProgramTarget, RenderBackend,
    TextureId, TextureUpload, UniformData,
};
use crate::pool::TextureKey;

/// Format of the frame texture.
pub const FRAME_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

fn wgpu_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba16f => wgpu::TextureFormat::Rgba16Float,
    }
}

// ---------------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------------

/// A wgpu device without a surface.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: wgpu::AdapterInfo,
}

impl GpuContext {
    pub fn headless() -> Result<Self, BackendError> {
        pollster::block_on(Self::request())
    }

    async fn request() -> Result<Self, BackendError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| BackendError::Device("no suitable GPU adapter".to_string()))?;

        let adapter_info = adapter.get_info();
        tracing::info!("GPU adapter: {} ({:?})", adapter_info.name, adapter_info.backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("shadergraph Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::Device(e.to_string()))?;

        Ok(Self {
            device,
            queue,
            adapter_info,
        })
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    key: TextureKey,
}

struct GpuProgram {
    label: String,
    pipeline: wgpu::RenderPipeline,
    layouts: Vec<wgpu::BindGroupLayout>,
    reflection: Reflection,
    target: ProgramTarget,
}

struct FrameTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    extent: Extent,
}

/// A built-in vertex stage: the device module plus its naga IR, kept for
/// checking fragment varyings against it.
struct VertexStage {
    module: wgpu::ShaderModule,
    ir: naga::Module,
}

impl VertexStage {
    fn new(device: &wgpu::Device, label: &str, source: &str) -> Result<Self, BackendError> {
        let ir = reflect::compile_vertex(label, source)?;
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Glsl {
                shader: Cow::Borrowed(source),
                stage: wgpu::naga::ShaderStage::Vertex,
                defines: Default::default(),
            },
        });
        Ok(Self { module, ir })
    }
}

pub struct WgpuBackend {
    gpu: GpuContext,
    offscreen_vertex: VertexStage,
    frame_vertex: VertexStage,
    linear: wgpu::Sampler,
    nearest: wgpu::Sampler,
    placeholder: wgpu::TextureView,
    textures: HashMap<TextureId, GpuTexture>,
    programs: HashMap<ProgramId, GpuProgram>,
    frame: Option<FrameTarget>,
    encoder: Option<wgpu::CommandEncoder>,
    next_id: u64,
}

impl WgpuBackend {
    pub fn new(gpu: GpuContext) -> Result<Self, BackendError> {
        let offscreen_vertex = VertexStage::new(&gpu.device, "Offscreen Triangle", reflect::VERTEX_OFFSCREEN)?;
        let frame_vertex = VertexStage::new(&gpu.device, "Frame Triangle", reflect::VERTEX_FRAME)?;
        let sampler = |label: &str, filter: wgpu::FilterMode| {
            gpu.device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                mag_filter: filter,
                min_filter: filter,
                ..Default::default()
            })
        };
        let linear = sampler("Linear Sampler", wgpu::FilterMode::Linear);
        let nearest = sampler("Nearest Sampler", wgpu::FilterMode::Nearest);
        let placeholder = gpu
            .device
            .create_texture(&wgpu::TextureDescriptor {
                label: Some("Unbound Input"),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            })
            .create_view(&wgpu::TextureViewDescriptor::default());

        Ok(Self {
            gpu,
            offscreen_vertex,
            frame_vertex,
            linear,
            nearest,
            placeholder,
            textures: HashMap::new(),
            programs: HashMap::new(),
            frame: None,
            encoder: None,
            next_id: 0,
        })
    }

    pub fn headless() -> Result<Self, BackendError> {
        Self::new(GpuContext::headless()?)
    }

    pub fn context(&self) -> &GpuContext {
        &self.gpu
    }

    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn sampler_for(&self, filter: TextureFilter) -> &wgpu::Sampler {
        match filter {
            TextureFilter::Linear => &self.linear,
            TextureFilter::Nearest => &self.nearest,
        }
    }

    fn ensure_frame(&mut self, extent: Extent) {
        if self.frame.as_ref().is_some_and(|f| f.extent == extent) {
            return;
        }
        let texture = self.gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Frame"),
            size: wgpu::Extent3d {
                width: extent.width,
                height: extent.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: FRAME_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        tracing::debug!("Frame target resized to {}", extent);
        self.frame = Some(FrameTarget { texture, view, extent });
    }

    /// Copies the last completed frame to the CPU, top row first.
    pub fn read_frame(&mut self) -> Result<image::RgbaImage, BackendError> {
        let frame = self
            .frame
            .as_ref()
            .ok_or_else(|| BackendError::Device("no frame has been rendered".to_string()))?;
        let Extent { width, height } = frame.extent;
        let unpadded = 4 * width;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = unpadded.div_ceil(align) * align;

        let buffer = self.gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Frame Readback"),
            size: (padded * height) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &frame.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.gpu.queue.submit(std::iter::once(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.gpu.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| BackendError::Device(e.to_string()))?
            .map_err(|e| BackendError::Device(e.to_string()))?;

        let mut pixels = Vec::with_capacity((unpadded * height) as usize);
        {
            let data = slice.get_mapped_range();
            for row in data.chunks(padded as usize) {
                pixels.extend_from_slice(&row[..unpadded as usize]);
            }
        }
        buffer.unmap();

        image::RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| BackendError::Device("readback size mismatch".to_string()))
    }

    fn bind_group_layouts(&self, label: &str, reflection: &Reflection) -> Vec<wgpu::BindGroupLayout> {
        (0..reflection.group_count())
            .map(|group| {
                let mut entries = Vec::new();
                for block in reflection.blocks.iter().filter(|b| b.group == group) {
                    entries.push(wgpu::BindGroupLayoutEntry {
                        binding: block.binding,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    });
                }
                for texture in reflection.textures.iter().filter(|t| t.group == group) {
                    entries.push(wgpu::BindGroupLayoutEntry {
                        binding: texture.binding,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    });
                }
                for sampler in reflection.samplers.iter().filter(|s| s.group == group) {
                    entries.push(wgpu::BindGroupLayoutEntry {
                        binding: sampler.binding,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    });
                }
                self.gpu
                    .device
                    .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                        label: Some(&format!("{} Group {}", label, group)),
                        entries: &entries,
                    })
            })
            .collect()
    }

    fn create_pipeline(
        &self,
        desc: &ProgramDesc<'_>,
        fragment: &str,
        layouts: &[wgpu::BindGroupLayout],
    ) -> wgpu::RenderPipeline {
        let device = &self.gpu.device;
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(desc.label),
            source: wgpu::ShaderSource::Glsl {
                shader: Cow::Borrowed(fragment),
                stage: wgpu::naga::ShaderStage::Fragment,
                defines: Default::default(),
            },
        });
        let layout_refs: Vec<&wgpu::BindGroupLayout> = layouts.iter().collect();
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(desc.label),
            bind_group_layouts: &layout_refs,
            push_constant_ranges: &[],
        });
        let (vertex, targets): (&VertexStage, Vec<Option<wgpu::ColorTargetState>>) = match &desc.target {
            ProgramTarget::Offscreen(formats) => (
                &self.offscreen_vertex,
                formats
                    .iter()
                    .map(|f| {
                        Some(wgpu::ColorTargetState {
                            format: wgpu_format(*f),
                            blend: None,
                            write_mask: wgpu::ColorWrites::ALL,
                        })
                    })
                    .collect(),
            ),
            ProgramTarget::Frame => (
                &self.frame_vertex,
                vec![Some(wgpu::ColorTargetState {
                    format: FRAME_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            ),
        };

        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(desc.label),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &vertex.module,
                entry_point: Some("main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: Some("main"),
                targets: &targets,
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    }
}

/// Writes `value` into a std140 block image at `offset`.
fn write_uniform(block: &mut [u8], offset: u32, value: &UniformData) {
    let bytes: &[u8] = bytemuck::cast_slice(value.as_slice());
    let start = offset as usize;
    if let Some(dst) = block.get_mut(start..start + bytes.len()) {
        dst.copy_from_slice(bytes);
    }
}

impl TextureUpload for WgpuBackend {
    fn upload_rgba8(&mut self, texture: TextureId, extent: Extent, pixels: &[u8]) -> Result<(), BackendError> {
        let target = self.textures.get(&texture).ok_or(BackendError::UnknownTexture(texture))?;
        if target.key.format != TextureFormat::Rgba8 {
            return Err(BackendError::Upload(format!("cannot upload rgba8 pixels into {}", target.key)));
        }
        if target.key.extent() != extent || pixels.len() != (extent.width * extent.height * 4) as usize {
            return Err(BackendError::Upload(format!(
                "{} bytes for {} into {}",
                pixels.len(),
                extent,
                target.key
            )));
        }
        self.gpu.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * extent.width),
                rows_per_image: Some(extent.height),
            },
            wgpu::Extent3d {
                width: extent.width,
                height: extent.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }
}

impl RenderBackend for WgpuBackend {
    fn compile_program(&mut self, desc: &ProgramDesc<'_>) -> Result<ProgramInfo, BackendError> {
        let compiled = reflect::compile_fragment(desc.label, desc.fragment)?;
        let vertex = match desc.target {
            ProgramTarget::Offscreen(_) => &self.offscreen_vertex,
            ProgramTarget::Frame => &self.frame_vertex,
        };
        reflect::check_varyings(desc.label, &vertex.ir, &compiled.module)?;
        let layouts = self.bind_group_layouts(desc.label, &compiled.reflection);

        self.gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self.create_pipeline(desc, &compiled.source, &layouts);
        if let Some(err) = pollster::block_on(self.gpu.device.pop_error_scope()) {
            return Err(BackendError::Compile {
                label: desc.label.to_string(),
                log: format!("ERROR: {}", err),
            });
        }

        let id = ProgramId(self.next());
        let uniforms = compiled.reflection.uniform_kinds();
        self.programs.insert(
            id,
            GpuProgram {
                label: desc.label.to_string(),
                pipeline,
                layouts,
                reflection: compiled.reflection,
                target: desc.target.clone(),
            },
        );
        Ok(ProgramInfo { id, uniforms })
    }

    fn create_texture(&mut self, key: &TextureKey, label: &str) -> Result<TextureId, BackendError> {
        let texture = self.gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: key.width,
                height: key.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu_format(key.format),
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let id = TextureId(self.next());
        self.textures.insert(id, GpuTexture { texture, view, key: *key });
        Ok(id)
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        if let Some(t) = self.textures.remove(&texture) {
            t.texture.destroy();
        }
    }

    fn clear_texture(&mut self, texture: TextureId) -> Result<(), BackendError> {
        let target = self.textures.get(&texture).ok_or(BackendError::UnknownTexture(texture))?;
        let mut owned = None;
        let encoder = match self.encoder.as_mut() {
            Some(encoder) => encoder,
            None => owned.insert(self.gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Clear Encoder"),
            })),
        };
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Clear"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &target.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        if let Some(encoder) = owned {
            self.gpu.queue.submit(std::iter::once(encoder.finish()));
        }
        Ok(())
    }

    fn begin_frame(&mut self, extent: Extent) -> Result<(), BackendError> {
        if self.encoder.is_some() {
            return Err(BackendError::Device("begin_frame called twice".to_string()));
        }
        self.ensure_frame(extent);
        self.encoder = Some(self.gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Frame Encoder"),
        }));
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> Result<(), BackendError> {
        let program = self
            .programs
            .get(&call.program)
            .ok_or(BackendError::UnknownProgram(call.program))?;

        let mut views = Vec::with_capacity(call.targets.len().max(1));
        if call.targets.is_empty() {
            let frame = self
                .frame
                .as_ref()
                .ok_or_else(|| BackendError::Device("draw outside of a frame".to_string()))?;
            views.push(&frame.view);
        } else {
            for id in call.targets {
                let target = self.textures.get(id).ok_or(BackendError::UnknownTexture(*id))?;
                if target.key.extent() != call.extent {
                    return Err(BackendError::Device(format!(
                        "\"{}\" renders {} into {}",
                        call.label,
                        call.extent,
                        target.key
                    )));
                }
                views.push(&target.view);
            }
        }
        let expected = match &program.target {
            ProgramTarget::Offscreen(formats) => formats.len(),
            ProgramTarget::Frame => 1,
        };
        if views.len() != expected {
            return Err(BackendError::Device(format!(
                "\"{}\" draws {} targets but \"{}\" writes {}",
                call.label,
                views.len(),
                program.label,
                expected
            )));
        }

        let reflection = &program.reflection;
        let buffers: Vec<(u32, u32, wgpu::Buffer)> = reflection
            .blocks
            .iter()
            .map(|block| {
                let mut data = vec![0u8; (block.size.max(16) as usize).next_multiple_of(16)];
                for (name, value) in call.uniforms {
                    if let Some(member) = block.members.get(name) {
                        if member.kind == value.kind() {
                            write_uniform(&mut data, member.offset, value);
                        }
                    }
                }
                let buffer = self.gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(call.label),
                    contents: &data,
                    usage: wgpu::BufferUsages::UNIFORM,
                });
                (block.group, block.binding, buffer)
            })
            .collect();

        let bound_texture = |name: &str| {
            call.textures
                .iter()
                .find(|b| b.uniform == name)
                .and_then(|b| self.textures.get(&b.texture))
        };

        let mut bind_groups = Vec::with_capacity(program.layouts.len());
        for (group, layout) in program.layouts.iter().enumerate() {
            let group = group as u32;
            let mut entries = Vec::new();
            for (_, binding, buffer) in buffers.iter().filter(|(g, _, _)| *g == group) {
                entries.push(wgpu::BindGroupEntry {
                    binding: *binding,
                    resource: buffer.as_entire_binding(),
                });
            }
            for slot in reflection.textures.iter().filter(|t| t.group == group) {
                let view = bound_texture(&slot.name).map_or(&self.placeholder, |t| &t.view);
                entries.push(wgpu::BindGroupEntry {
                    binding: slot.binding,
                    resource: wgpu::BindingResource::TextureView(view),
                });
            }
            for slot in reflection.samplers.iter().filter(|s| s.group == group) {
                let filter = reflection
                    .sampler_texture(&slot.name)
                    .and_then(|name| bound_texture(name))
                    .map_or(TextureFilter::Linear, |t| t.key.filter);
                entries.push(wgpu::BindGroupEntry {
                    binding: slot.binding,
                    resource: wgpu::BindingResource::Sampler(self.sampler_for(filter)),
                });
            }
            bind_groups.push(self.gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(call.label),
                layout,
                entries: &entries,
            }));
        }

        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| BackendError::Device("draw outside of a frame".to_string()))?;
        let attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = views
            .iter()
            .map(|&view| {
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(call.label),
            color_attachments: &attachments,
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&program.pipeline);
        for (index, group) in bind_groups.iter().enumerate() {
            pass.set_bind_group(index as u32, group, &[]);
        }
        pass.draw(0..3, 0..1);
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), BackendError> {
        let encoder = self
            .encoder
            .take()
            .ok_or_else(|| BackendError::Device("end_frame without begin_frame".to_string()))?;
        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{TextureBinding, UniformKind};

    const SOLID: &str = "#version 300 es
precision highp float;
uniform vec4 uColor;
out vec4 fragColor;
void main() { fragColor = uColor; }
";

    // Needs an adapter; passes vacuously on machines without one.
    #[test]
    fn test_offscreen_pass_then_present_reads_back() {
        let Ok(mut backend) = WgpuBackend::headless() else {
            return;
        };
        let solid = backend
            .compile_program(&ProgramDesc {
                label: "solid",
                fragment: SOLID,
                target: ProgramTarget::Offscreen(vec![TextureFormat::Rgba8]),
            })
            .unwrap();
        assert_eq!(solid.uniform_kind("uColor"), Some(&UniformKind::Vec4));
        let present = backend
            .compile_program(&ProgramDesc {
                label: "present",
                fragment: crate::runtime::PRESENT_FRAGMENT,
                target: ProgramTarget::Frame,
            })
            .unwrap();

        let extent = Extent::new(4, 2);
        let key = TextureKey {
            format: TextureFormat::Rgba8,
            width: extent.width,
            height: extent.height,
            filter: TextureFilter::Nearest,
        };
        let target = backend.create_texture(&key, "out").unwrap();

        backend.begin_frame(extent).unwrap();
        backend
            .draw(&DrawCall {
                label: "solid",
                program: solid.id,
                targets: &[target],
                extent,
                uniforms: &[("uColor".to_string(), UniformData::Vec4([1.0, 0.0, 0.0, 1.0]))],
                textures: &[],
            })
            .unwrap();
        backend
            .draw(&DrawCall {
                label: "present",
                program: present.id,
                targets: &[],
                extent,
                uniforms: &[],
                textures: &[TextureBinding {
                    uniform: "uSrc".to_string(),
                    unit: 0,
                    texture: target,
                }],
            })
            .unwrap();
        backend.end_frame().unwrap();

        let frame = backend.read_frame().unwrap();
        assert_eq!(frame.dimensions(), (4, 2));
        assert_eq!(frame.get_pixel(0, 0).0, [255, 0, 0, 255]);
        assert_eq!(frame.get_pixel(3, 1).0, [255, 0, 0, 255]);
    }

    // Needs an adapter; passes vacuously on machines without one.
    #[test]
    fn test_pass_reading_uv_builds_a_pipeline() {
        let Ok(mut backend) = WgpuBackend::headless() else {
            return;
        };
        let uv = "#version 300 es
precision highp float;
uniform float uTime;
in vec2 vUv;
out vec4 fragColor;
void main() { fragColor = vec4(vUv, uTime, 1.0); }
";
        let info = backend
            .compile_program(&ProgramDesc {
                label: "uv",
                fragment: uv,
                target: ProgramTarget::Offscreen(vec![TextureFormat::Rgba8]),
            })
            .unwrap();
        assert_eq!(info.uniform_kind("uTime"), Some(&UniformKind::Float));
    }
}
