//! wgpu viewport runtime: render surface, depth and shadow targets, the
//! forward/shadow/grid pipelines, and the per-frame render path driven by the
//! scene engine's draw list.

use std::sync::Arc;

use anyhow::{Context, Result};
use bytemuck::{Pod, Zeroable, bytes_of, cast_slice};
use glam::{Mat4, Vec3};
use wgpu::SurfaceError;
use wgpu::util::DeviceExt;
use winit::{dpi::PhysicalSize, window::Window};

use fitroom_scene::engine::DrawItem;
use fitroom_scene::{Color, FitParams, SceneEngine};

use crate::gpu::{MeshVertex, WgpuResources};
use crate::shaders::{GRID_SHADER_SOURCE, MESH_SHADER_SOURCE, SHADOW_SHADER_SOURCE};

const SHADOW_MAP_SIZE: u32 = 1024;
const MODEL_UNIFORM_STRIDE: u64 = 256;
const INITIAL_MODEL_CAPACITY: usize = 64;

const KEY_LIGHT_POSITION: Vec3 = Vec3::new(5.0, 10.0, 7.5);
const FILL_LIGHT_POSITION: Vec3 = Vec3::new(-5.0, 5.0, -7.5);
const KEY_INTENSITY: f32 = 1.0;
const FILL_INTENSITY: f32 = 0.5;
const AMBIENT_INTENSITY: f32 = 0.5;

/// 0x2a2a2a in linear light.
const BACKGROUND: wgpu::Color = wgpu::Color {
    r: 0.0231,
    g: 0.0231,
    b: 0.0231,
    a: 1.0,
};

const GRID_SIZE: f32 = 10.0;
const GRID_DIVISIONS: u32 = 10;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct FrameUniforms {
    view_proj: [[f32; 4]; 4],
    light_view_proj: [[f32; 4]; 4],
    key_dir: [f32; 4],
    fill_dir: [f32; 4],
    ambient: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ModelUniforms {
    model: [[f32; 4]; 4],
    color: [f32; 4],
    misc: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct GridVertex {
    position: [f32; 3],
    color: [f32; 3],
}

fn grid_vertices() -> Vec<GridVertex> {
    let center = Color::from_hex("#444444")
        .map(|c| c.to_linear())
        .unwrap_or([0.05; 3]);
    let minor = Color::from_hex("#222222")
        .map(|c| c.to_linear())
        .unwrap_or([0.015; 3]);
    let half = GRID_SIZE * 0.5;
    let step = GRID_SIZE / GRID_DIVISIONS as f32;

    let mut vertices = Vec::with_capacity(((GRID_DIVISIONS + 1) * 4) as usize);
    for line in 0..=GRID_DIVISIONS {
        let offset = -half + line as f32 * step;
        let color = if line * 2 == GRID_DIVISIONS { center } else { minor };
        vertices.push(GridVertex {
            position: [offset, 0.0, -half],
            color,
        });
        vertices.push(GridVertex {
            position: [offset, 0.0, half],
            color,
        });
        vertices.push(GridVertex {
            position: [-half, 0.0, offset],
            color,
        });
        vertices.push(GridVertex {
            position: [half, 0.0, offset],
            color,
        });
    }
    vertices
}

fn light_view_projection() -> Mat4 {
    let projection = Mat4::orthographic_rh(-6.0, 6.0, -6.0, 6.0, 0.1, 30.0);
    let view = Mat4::look_at_rh(KEY_LIGHT_POSITION, Vec3::ZERO, Vec3::Y);
    projection * view
}

pub struct ViewerState {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: Arc<wgpu::Device>,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    size: PhysicalSize<u32>,
    depth_view: wgpu::TextureView,
    _shadow_texture: wgpu::Texture,
    shadow_view: wgpu::TextureView,
    frame_buffer: wgpu::Buffer,
    frame_bind_group: wgpu::BindGroup,
    model_layout: wgpu::BindGroupLayout,
    model_buffer: wgpu::Buffer,
    model_bind_group: wgpu::BindGroup,
    model_capacity: usize,
    shadow_bind_group: wgpu::BindGroup,
    pipeline_opaque: wgpu::RenderPipeline,
    pipeline_double_sided: wgpu::RenderPipeline,
    pipeline_garment: wgpu::RenderPipeline,
    pipeline_shadow: wgpu::RenderPipeline,
    pipeline_grid: wgpu::RenderPipeline,
    grid_vertex_buffer: wgpu::Buffer,
    grid_vertex_count: u32,
    engine: SceneEngine<WgpuResources>,
    dragging: bool,
    last_cursor: Option<(f64, f64)>,
    torn_down: bool,
}

impl ViewerState {
    pub async fn new(window: Arc<Window>, params: FitParams, fov: f32) -> Result<Self> {
        let size = window.inner_size();

        let instance = wgpu::Instance::default();
        let surface = instance
            .create_surface(window.clone())
            .context("creating wgpu surface")?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: Some(&surface),
            })
            .await
            .context("requesting wgpu adapter")?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("fitroom-device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .context("requesting wgpu device")?;
        let device = Arc::new(device);

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|format| format.is_srgb())
            .unwrap_or(surface_caps.formats[0]);
        let present_mode = surface_caps
            .present_modes
            .iter()
            .copied()
            .find(|mode| *mode == wgpu::PresentMode::Mailbox)
            .unwrap_or(wgpu::PresentMode::Fifo);
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Opaque);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 1,
        };

        let depth_view = create_depth_view(&device, config.width, config.height);

        let shadow_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("shadow-map"),
            size: wgpu::Extent3d {
                width: SHADOW_MAP_SIZE,
                height: SHADOW_MAP_SIZE,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Depth32Float,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let shadow_view = shadow_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let shadow_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("shadow-sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            compare: Some(wgpu::CompareFunction::LessEqual),
            ..Default::default()
        });

        let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("frame-bind-group-layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let frame_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("frame-uniform-buffer"),
            size: std::mem::size_of::<FrameUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let frame_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("frame-bind-group"),
            layout: &frame_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: frame_buffer.as_entire_binding(),
            }],
        });

        let model_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("model-bind-group-layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: wgpu::BufferSize::new(
                        std::mem::size_of::<ModelUniforms>() as u64
                    ),
                },
                count: None,
            }],
        });
        let (model_buffer, model_bind_group) =
            create_model_buffer(&device, &model_layout, INITIAL_MODEL_CAPACITY);

        let shadow_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("shadow-bind-group-layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Depth,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison),
                    count: None,
                },
            ],
        });
        let shadow_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("shadow-bind-group"),
            layout: &shadow_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&shadow_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&shadow_sampler),
                },
            ],
        });

        let mesh_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("mesh-shader"),
            source: wgpu::ShaderSource::Wgsl(MESH_SHADER_SOURCE.into()),
        });
        let shadow_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("shadow-shader"),
            source: wgpu::ShaderSource::Wgsl(SHADOW_SHADER_SOURCE.into()),
        });
        let grid_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("grid-shader"),
            source: wgpu::ShaderSource::Wgsl(GRID_SHADER_SOURCE.into()),
        });

        let mesh_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("mesh-pipeline-layout"),
            bind_group_layouts: &[&frame_layout, &model_layout, &shadow_layout],
            push_constant_ranges: &[],
        });
        let shadow_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("shadow-pipeline-layout"),
                bind_group_layouts: &[&frame_layout, &model_layout],
                push_constant_ranges: &[],
            });
        let grid_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("grid-pipeline-layout"),
            bind_group_layouts: &[&frame_layout],
            push_constant_ranges: &[],
        });

        let vertex_layout = wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<MeshVertex>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3],
        };

        let pipeline_opaque = build_mesh_pipeline(
            &device,
            &mesh_layout,
            &mesh_shader,
            vertex_layout.clone(),
            surface_format,
            "mesh-pipeline-opaque",
            Some(wgpu::Face::Back),
            false,
            0,
        );
        let pipeline_double_sided = build_mesh_pipeline(
            &device,
            &mesh_layout,
            &mesh_shader,
            vertex_layout.clone(),
            surface_format,
            "mesh-pipeline-double-sided",
            None,
            false,
            0,
        );
        // The garment shell renders both faces, blended, with a negative
        // depth bias so it never z-fights the avatar surface underneath.
        let pipeline_garment = build_mesh_pipeline(
            &device,
            &mesh_layout,
            &mesh_shader,
            vertex_layout.clone(),
            surface_format,
            "mesh-pipeline-garment",
            None,
            true,
            -1,
        );

        let pipeline_shadow = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("shadow-pipeline"),
            layout: Some(&shadow_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shadow_shader,
                entry_point: "vs_main",
                buffers: &[vertex_layout.clone()],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: None,
            primitive: wgpu::PrimitiveState {
                cull_mode: Some(wgpu::Face::Back),
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: wgpu::TextureFormat::Depth32Float,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState {
                    constant: 2,
                    slope_scale: 2.0,
                    clamp: 0.0,
                },
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });

        let pipeline_grid = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("grid-pipeline"),
            layout: Some(&grid_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &grid_shader,
                entry_point: "vs_main",
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<GridVertex>() as u64,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3],
                }],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &grid_shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::LineList,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: wgpu::TextureFormat::Depth32Float,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });

        let grid = grid_vertices();
        let grid_vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("grid-vertex-buffer"),
            contents: cast_slice(&grid),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let mut engine = SceneEngine::new(WgpuResources::new(device.clone()), params);
        engine.camera_mut().fov_y_degrees = fov;
        engine.camera_mut().set_viewport(config.width, config.height);

        let state = Self {
            window,
            surface,
            device,
            queue,
            config,
            size,
            depth_view,
            _shadow_texture: shadow_texture,
            shadow_view,
            frame_buffer,
            frame_bind_group,
            model_layout,
            model_buffer,
            model_bind_group,
            model_capacity: INITIAL_MODEL_CAPACITY,
            shadow_bind_group,
            pipeline_opaque,
            pipeline_double_sided,
            pipeline_garment,
            pipeline_shadow,
            pipeline_grid,
            grid_vertex_buffer,
            grid_vertex_count: grid.len() as u32,
            engine,
            dragging: false,
            last_cursor: None,
            torn_down: false,
        };
        state.surface.configure(&state.device, &state.config);
        Ok(state)
    }

    pub fn window(&self) -> &Window {
        self.window.as_ref()
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    pub fn engine(&self) -> &SceneEngine<WgpuResources> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut SceneEngine<WgpuResources> {
        &mut self.engine
    }

    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }
        self.size = new_size;
        self.config.width = new_size.width;
        self.config.height = new_size.height;
        self.surface.configure(&self.device, &self.config);
        self.depth_view = create_depth_view(&self.device, new_size.width, new_size.height);
        self.engine
            .camera_mut()
            .set_viewport(new_size.width, new_size.height);
    }

    pub fn mouse_button(&mut self, pressed: bool) {
        self.dragging = pressed;
        if !pressed {
            self.last_cursor = None;
        }
    }

    pub fn cursor_moved(&mut self, x: f64, y: f64) {
        if self.dragging {
            if let Some((last_x, last_y)) = self.last_cursor {
                let height = self.size.height.max(1) as f32;
                let scale = std::f32::consts::TAU / height;
                let delta_yaw = -((x - last_x) as f32) * scale;
                let delta_pitch = -((y - last_y) as f32) * scale;
                self.engine.orbit_mut().rotate(delta_yaw, delta_pitch);
            }
        }
        self.last_cursor = Some((x, y));
    }

    pub fn wheel(&mut self, delta_lines: f32) {
        self.engine.orbit_mut().zoom(0.95f32.powf(delta_lines));
    }

    /// Release the engine's installations and stop rendering; later frame
    /// ticks are no-ops.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.engine.teardown();
        self.torn_down = true;
    }

    fn ensure_model_capacity(&mut self, required: usize) {
        if required <= self.model_capacity {
            return;
        }
        let mut capacity = self.model_capacity;
        while capacity < required {
            capacity *= 2;
        }
        let (buffer, bind_group) = create_model_buffer(&self.device, &self.model_layout, capacity);
        self.model_buffer = buffer;
        self.model_bind_group = bind_group;
        self.model_capacity = capacity;
    }

    pub fn render(&mut self) -> Result<(), SurfaceError> {
        if self.torn_down || self.config.width == 0 || self.config.height == 0 {
            return Ok(());
        }

        self.engine.orbit_mut().update();

        let view_proj = self.engine.camera().projection() * self.engine.orbit().view();
        let frame = FrameUniforms {
            view_proj: view_proj.to_cols_array_2d(),
            light_view_proj: light_view_projection().to_cols_array_2d(),
            key_dir: [
                KEY_LIGHT_POSITION.normalize().x,
                KEY_LIGHT_POSITION.normalize().y,
                KEY_LIGHT_POSITION.normalize().z,
                KEY_INTENSITY,
            ],
            fill_dir: [
                FILL_LIGHT_POSITION.normalize().x,
                FILL_LIGHT_POSITION.normalize().y,
                FILL_LIGHT_POSITION.normalize().z,
                FILL_INTENSITY,
            ],
            ambient: [AMBIENT_INTENSITY, AMBIENT_INTENSITY, AMBIENT_INTENSITY, 0.0],
        };
        self.queue
            .write_buffer(&self.frame_buffer, 0, bytes_of(&frame));

        let items = self.engine.draw_items();
        self.ensure_model_capacity(items.len().max(1));

        // Bucket draws by pipeline; each remembers its uniform slot.
        let mut opaque: Vec<(usize, DrawItem)> = Vec::new();
        let mut double_sided: Vec<(usize, DrawItem)> = Vec::new();
        let mut blended: Vec<(usize, DrawItem)> = Vec::new();
        let mut casters: Vec<(usize, DrawItem)> = Vec::new();
        let mut uniform_bytes = vec![0u8; items.len().max(1) * MODEL_UNIFORM_STRIDE as usize];

        for (slot, item) in items.iter().enumerate() {
            let Some(material) = self.engine.resources().material(item.material) else {
                continue;
            };
            let uniforms = ModelUniforms {
                model: item.model.to_cols_array_2d(),
                color: {
                    let linear = material.color.to_linear();
                    [linear[0], linear[1], linear[2], 1.0]
                },
                misc: [
                    material.params.alpha_test,
                    if item.receive_shadow { 1.0 } else { 0.0 },
                    0.0,
                    0.0,
                ],
            };
            let at = slot * MODEL_UNIFORM_STRIDE as usize;
            uniform_bytes[at..at + std::mem::size_of::<ModelUniforms>()]
                .copy_from_slice(bytes_of(&uniforms));

            if material.params.transparent && material.params.depth_bias {
                blended.push((slot, *item));
            } else if material.params.double_sided {
                double_sided.push((slot, *item));
            } else {
                opaque.push((slot, *item));
            }
            if item.cast_shadow {
                casters.push((slot, *item));
            }
        }
        self.queue.write_buffer(&self.model_buffer, 0, &uniform_bytes);

        let frame_texture = self.surface.get_current_texture()?;
        let surface_view = frame_texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("fitroom-encoder"),
            });

        {
            let mut shadow_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("shadow-pass"),
                color_attachments: &[],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.shadow_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            shadow_pass.set_pipeline(&self.pipeline_shadow);
            shadow_pass.set_bind_group(0, &self.frame_bind_group, &[]);
            for (slot, item) in &casters {
                let Some(geometry) = self.engine.resources().geometry(item.geometry) else {
                    continue;
                };
                let offset = (*slot as u64 * MODEL_UNIFORM_STRIDE) as u32;
                shadow_pass.set_bind_group(1, &self.model_bind_group, &[offset]);
                shadow_pass.set_vertex_buffer(0, geometry.vertex_buffer.slice(..));
                shadow_pass
                    .set_index_buffer(geometry.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                shadow_pass.draw_indexed(0..geometry.index_count, 0, 0..1);
            }
        }

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("forward-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &surface_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(BACKGROUND),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            pass.set_pipeline(&self.pipeline_grid);
            pass.set_bind_group(0, &self.frame_bind_group, &[]);
            pass.set_vertex_buffer(0, self.grid_vertex_buffer.slice(..));
            pass.draw(0..self.grid_vertex_count, 0..1);

            for (pipeline, bucket) in [
                (&self.pipeline_opaque, &opaque),
                (&self.pipeline_double_sided, &double_sided),
                (&self.pipeline_garment, &blended),
            ] {
                if bucket.is_empty() {
                    continue;
                }
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &self.frame_bind_group, &[]);
                pass.set_bind_group(2, &self.shadow_bind_group, &[]);
                for (slot, item) in bucket {
                    let Some(geometry) = self.engine.resources().geometry(item.geometry) else {
                        continue;
                    };
                    let offset = (*slot as u64 * MODEL_UNIFORM_STRIDE) as u32;
                    pass.set_bind_group(1, &self.model_bind_group, &[offset]);
                    pass.set_vertex_buffer(0, geometry.vertex_buffer.slice(..));
                    pass.set_index_buffer(
                        geometry.index_buffer.slice(..),
                        wgpu::IndexFormat::Uint32,
                    );
                    pass.draw_indexed(0..geometry.index_count, 0, 0..1);
                }
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        frame_texture.present();
        Ok(())
    }
}

fn create_depth_view(device: &wgpu::Device, width: u32, height: u32) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("depth-texture"),
        size: wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Depth32Float,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

fn create_model_buffer(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    capacity: usize,
) -> (wgpu::Buffer, wgpu::BindGroup) {
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("model-uniform-buffer"),
        size: capacity as u64 * MODEL_UNIFORM_STRIDE,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("model-bind-group"),
        layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: &buffer,
                offset: 0,
                size: wgpu::BufferSize::new(std::mem::size_of::<ModelUniforms>() as u64),
            }),
        }],
    });
    (buffer, bind_group)
}

#[allow(clippy::too_many_arguments)]
fn build_mesh_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    shader: &wgpu::ShaderModule,
    vertex_layout: wgpu::VertexBufferLayout<'_>,
    format: wgpu::TextureFormat,
    label: &str,
    cull_mode: Option<wgpu::Face>,
    blend: bool,
    depth_bias: i32,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: "vs_main",
            buffers: &[vertex_layout],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: "fs_main",
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: if blend {
                    Some(wgpu::BlendState::ALPHA_BLENDING)
                } else {
                    None
                },
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        primitive: wgpu::PrimitiveState {
            cull_mode,
            ..Default::default()
        },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: wgpu::TextureFormat::Depth32Float,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::Less,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState {
                constant: depth_bias,
                slope_scale: depth_bias as f32,
                clamp: 0.0,
            },
        }),
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
    })
}
