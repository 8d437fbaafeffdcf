//! GPU renderer for a [`Screen`].
//!
//! Every plot gets a pipeline compiled from its generated WGSL, cached by
//! source so identical plots share it. Syncing walks the scene tree at the
//! screen's framerate and leaves behind a frame plan of viewport-bound draw
//! calls that `render` replays on every redraw.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use glam::{Vec2, Vec4};
use iced::futures::FutureExt;
use iced::widget::shader::Viewport;
use iced::{Rectangle, wgpu::util::DeviceExt, wgpu::*};
use log::{debug, warn};

use crate::atlas::ContextId;
use crate::camera::SceneCamera;
use crate::diagnostics::format_shader_error;
use crate::geometry::{BufferId, Geometry};
use crate::line::shader::{COLORMAP_BINDING, LineShader, PATTERN_BINDING, VertexInput};
use crate::picking::{self, PICK_FORMAT, PickResult, PickWindow, PickingPass};
use crate::plot::{Plot, PlotId};
use crate::scene::{DeviceRect, SceneId};
use crate::screen::Screen;
use crate::uniform::{TextureData, Uniform};

pub struct RenderParams<'a> {
    pub encoder: &'a mut CommandEncoder,
    pub target: &'a TextureView,
    pub bounds: Rectangle<u32>,
}

/// Color and id pipelines built from one generated source.
struct LinePipelines {
    color: RenderPipeline,
    pick: RenderPipeline,
    bind_group_layout: BindGroupLayout,
}

/// One vertex buffer slot: every field read through one view of a geometry
/// buffer.
struct SlotLayout {
    buffer: &'static str,
    view: &'static str,
    /// Byte offset of the view into the buffer.
    offset: u64,
    stride: u64,
    attributes: Vec<VertexAttribute>,
}

fn vertex_format(components: usize) -> VertexFormat {
    match components {
        1 => VertexFormat::Float32,
        2 => VertexFormat::Float32x2,
        3 => VertexFormat::Float32x3,
        _ => VertexFormat::Float32x4,
    }
}

/// Groups `inputs` by the buffer view feeding them. Fields of one view share a
/// slot so a polyline never needs more than six.
fn slot_layouts(inputs: &[VertexInput], geometry: &Geometry) -> Option<Vec<SlotLayout>> {
    let mut slots: Vec<SlotLayout> = Vec::new();
    for input in inputs {
        let buffer = geometry.buffer(input.buffer)?;
        let view = buffer.views().iter().find(|v| v.name == input.view)?;
        let field = buffer.fields().iter().find(|f| f.name == input.field)?;
        let attribute = VertexAttribute {
            offset: (field.offset * 4) as u64,
            shader_location: input.location,
            format: vertex_format(input.components),
        };
        match slots
            .iter_mut()
            .find(|s| s.buffer == input.buffer && s.view == input.view)
        {
            Some(slot) => slot.attributes.push(attribute),
            None => slots.push(SlotLayout {
                buffer: input.buffer,
                view: input.view,
                offset: (view.offset * 4) as u64,
                stride: (buffer.view_stride() * 4) as u64,
                attributes: vec![attribute],
            }),
        }
    }
    Some(slots)
}

fn texture_entry(binding: u32) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::VERTEX_FRAGMENT,
        ty: BindingType::Texture {
            sample_type: TextureSampleType::Float { filterable: false },
            view_dimension: TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32, visibility: ShaderStages) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

struct GpuBuffer {
    id: BufferId,
    buffer: Buffer,
}

struct GpuTexture {
    source: Arc<TextureData>,
    texture: Texture,
    view: TextureView,
}

/// Texels of `data` converted to `channels` per texel. Single channel data
/// widens to opaque gray, rgba narrows to its red channel.
fn texels(data: &TextureData, channels: u32) -> Vec<f32> {
    if data.channels == channels {
        return data.data.clone();
    }
    data.data
        .chunks_exact(data.channels.max(1) as usize)
        .flat_map(|texel| {
            let v = texel[0];
            if channels == 1 {
                vec![v]
            } else {
                vec![v, v, v, 1.0]
            }
        })
        .collect()
}

fn upload_texture(
    slot: &mut Option<GpuTexture>,
    device: &Device,
    queue: &Queue,
    source: Option<&Arc<TextureData>>,
    format: TextureFormat,
    channels: u32,
) {
    let Some(source) = source else {
        if let Some(old) = slot.take() {
            old.texture.destroy();
        }
        return;
    };
    if slot.as_ref().is_some_and(|t| Arc::ptr_eq(&t.source, source)) {
        return;
    }
    let size = Extent3d {
        width: source.width.max(1),
        height: source.height.max(1),
        depth_or_array_layers: 1,
    };
    let texture = device.create_texture(&TextureDescriptor {
        label: Some("plot texture"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: TextureDimension::D2,
        format,
        usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
        view_formats: &[],
    });
    let mut data = texels(source, channels);
    data.resize((size.width * size.height * channels) as usize, 0.0);
    queue.write_texture(
        TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: Origin3d::ZERO,
            aspect: TextureAspect::All,
        },
        bytemuck::cast_slice(&data),
        TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(size.width * channels * 4),
            rows_per_image: Some(size.height),
        },
        size,
    );
    let view = texture.create_view(&TextureViewDescriptor::default());
    if let Some(old) = slot.replace(GpuTexture {
        source: Arc::clone(source),
        texture,
        view,
    }) {
        old.texture.destroy();
    }
}

fn sampler_uniform<'a>(plot: &'a Plot, name: &str) -> Option<&'a Arc<TextureData>> {
    match plot.uniforms().get(name) {
        Some(Uniform::Sampler(data)) => Some(data),
        _ => None,
    }
}

/// Everything the GPU holds for one plot.
#[derive(Default)]
struct PlotResources {
    pipelines: Option<Arc<LinePipelines>>,
    buffers: HashMap<String, GpuBuffer>,
    /// Buffer name and byte offset per vertex slot.
    slots: Vec<(&'static str, u64)>,
    uniform: Option<Buffer>,
    pattern: Option<GpuTexture>,
    colormap: Option<GpuTexture>,
    bind_group: Option<BindGroup>,
    instances: u32,
}

impl PlotResources {
    /// Writes dirty buffers, reallocating those whose host side grew.
    fn upload_buffers(&mut self, device: &Device, queue: &Queue, geometry: &mut Geometry) {
        for (name, buffer) in geometry.buffers_mut() {
            let dirty = buffer.take_dirty();
            let size = (buffer.data().len() * 4) as u64;
            match self.buffers.get(name) {
                Some(gpu) if gpu.id == buffer.id() && gpu.buffer.size() == size => {
                    if dirty && size > 0 {
                        queue.write_buffer(&gpu.buffer, 0, bytemuck::cast_slice(buffer.data()));
                    }
                }
                _ => {
                    let gpu = GpuBuffer {
                        id: buffer.id(),
                        buffer: device.create_buffer_init(&util::BufferInitDescriptor {
                            label: Some("plot vertex buffer"),
                            contents: bytemuck::cast_slice(buffer.data()),
                            usage: BufferUsages::VERTEX | BufferUsages::COPY_DST,
                        }),
                    };
                    if let Some(old) = self.buffers.insert(name.clone(), gpu) {
                        old.buffer.destroy();
                    }
                }
            }
        }
    }

    fn upload_uniforms(&mut self, device: &Device, queue: &Queue, bytes: &[u8]) {
        let size = bytes.len() as u64;
        if self.uniform.as_ref().is_none_or(|b| b.size() != size) {
            if let Some(old) = self.uniform.take() {
                old.destroy();
            }
            self.uniform = Some(device.create_buffer(&BufferDescriptor {
                label: Some("plot uniforms"),
                size,
                usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
        }
        if let Some(uniform) = &self.uniform {
            queue.write_buffer(uniform, 0, bytes);
        }
    }

    /// Rebuilds the bind group. Fails when a texture the shader declares has
    /// no data.
    fn bind(&mut self, device: &Device, shader: &LineShader) -> bool {
        let (Some(pipelines), Some(uniform)) = (&self.pipelines, &self.uniform) else {
            return false;
        };
        let mut entries = vec![BindGroupEntry {
            binding: 0,
            resource: uniform.as_entire_binding(),
        }];
        for (wanted, binding, texture) in [
            (shader.pattern, PATTERN_BINDING, &self.pattern),
            (shader.colormap, COLORMAP_BINDING, &self.colormap),
        ] {
            if !wanted {
                continue;
            }
            let Some(texture) = texture else {
                return false;
            };
            entries.push(BindGroupEntry {
                binding,
                resource: BindingResource::TextureView(&texture.view),
            });
        }
        self.bind_group = Some(device.create_bind_group(&BindGroupDescriptor {
            label: Some("plot bind group"),
            layout: &pipelines.bind_group_layout,
            entries: &entries,
        }));
        true
    }

    fn draw(&self, pass: &mut RenderPass<'_>, pick: bool) {
        if self.instances == 0 {
            return;
        }
        let (Some(pipelines), Some(bind_group)) = (&self.pipelines, &self.bind_group) else {
            return;
        };
        pass.set_pipeline(if pick {
            &pipelines.pick
        } else {
            &pipelines.color
        });
        pass.set_bind_group(0, bind_group, &[]);
        for (slot, (name, offset)) in self.slots.iter().enumerate() {
            let Some(gpu) = self.buffers.get(*name) else {
                return;
            };
            if *offset >= gpu.buffer.size() {
                return;
            }
            pass.set_vertex_buffer(slot as u32, gpu.buffer.slice(*offset..));
        }
        pass.draw(0..4, 0..self.instances);
    }

    fn destroy(self) {
        for gpu in self.buffers.into_values() {
            gpu.buffer.destroy();
        }
        if let Some(uniform) = self.uniform {
            uniform.destroy();
        }
        for texture in [self.pattern, self.colormap].into_iter().flatten() {
            texture.texture.destroy();
        }
    }
}

struct ClearPipeline {
    pipeline: RenderPipeline,
    bind_group_layout: BindGroupLayout,
}

struct ClearUniform {
    buffer: Buffer,
    bind_group: BindGroup,
}

enum DrawCall {
    Clear { rect: DeviceRect, scene: SceneId },
    Plot { rect: DeviceRect, plot: PlotId },
}

impl DrawCall {
    fn rect(&self) -> DeviceRect {
        match self {
            DrawCall::Clear { rect, .. } | DrawCall::Plot { rect, .. } => *rect,
        }
    }
}

/// One scene's slice of the frame plan, collected before any plot is touched
/// mutably.
struct ScenePlan {
    id: SceneId,
    rect: DeviceRect,
    background: Option<Vec4>,
    plots: Vec<PlotId>,
}

pub struct SceneRenderer {
    format: TextureFormat,
    context: ContextId,
    /// Keyed by generated source; `None` marks a source that failed to
    /// compile so it is not retried every frame.
    pipelines: HashMap<String, Option<Arc<LinePipelines>>>,
    clear: Option<ClearPipeline>,
    clear_uniforms: HashMap<SceneId, ClearUniform>,
    plots: HashMap<PlotId, PlotResources>,
    frame: Vec<DrawCall>,
    /// Plot drawn with object id `i + 1`.
    objects: Vec<PlotId>,
    picking: PickingPass,
    /// Top-left of the widget in device pixels.
    origin: Vec2,
}

impl SceneRenderer {
    pub fn new(format: TextureFormat) -> Self {
        Self {
            format,
            context: ContextId::next(),
            pipelines: HashMap::new(),
            clear: None,
            clear_uniforms: HashMap::new(),
            plots: HashMap::new(),
            frame: Vec::new(),
            objects: Vec::new(),
            picking: PickingPass::default(),
            origin: Vec2::ZERO,
        }
    }

    /// Brings the GPU up to date with `screen`: frees released plots, syncs
    /// the frame plan when a render is due and services picking.
    pub fn prepare(
        &mut self,
        device: &Device,
        queue: &Queue,
        screen: &mut Screen,
        bounds: &Rectangle,
        viewport: &Viewport,
    ) {
        if screen.is_disposed() {
            self.destroy(screen);
            return;
        }
        let scale = viewport.scale_factor();
        self.origin = Vec2::new(bounds.x * scale, bounds.y * scale);

        for id in screen.registry_mut().take_released() {
            if let Some(resources) = self.plots.remove(&id) {
                resources.destroy();
            }
        }
        let (width, height) = screen.pick_size();
        self.picking.set_size(width, height);

        if screen.take_render_due() {
            self.ensure_clear_pipeline(device);
            self.sync(device, queue, screen);
        }
        // registers this device's atlas copy on first use, then keeps it current
        screen
            .atlas()
            .write()
            .get_texture(self.context, device, queue);
        self.service_picking(device, queue, screen);
    }

    fn sync(&mut self, device: &Device, queue: &Queue, screen: &mut Screen) {
        let canvas = screen.canvas_size();
        let px_per_unit = screen.px_per_unit();
        let plan: Vec<ScenePlan> = match screen.root() {
            Some(root) => screen
                .registry()
                .draw_order(root)
                .into_iter()
                .filter_map(|list| {
                    Some(ScenePlan {
                        id: list.scene.id.clone(),
                        rect: list.scene.device_viewport(canvas, px_per_unit)?,
                        background: list.scene.clear.then_some(list.scene.background),
                        plots: list.plots.iter().map(|p| p.id().clone()).collect(),
                    })
                })
                .collect(),
            None => Vec::new(),
        };

        self.frame.clear();
        self.objects.clear();
        let mut errors = Vec::new();
        let mut scenes = HashSet::new();
        for scene in plan {
            if let Some(background) = scene.background {
                self.sync_clear(device, queue, &scene.id, background);
                self.frame.push(DrawCall::Clear {
                    rect: scene.rect,
                    scene: scene.id.clone(),
                });
            }
            for id in scene.plots {
                let object_id = self.objects.len() as u32 + 1;
                let Some((plot, camera)) = screen.registry_mut().plot_with_camera_mut(&id) else {
                    continue;
                };
                if self.sync_plot(device, queue, plot, camera, object_id, px_per_unit, &mut errors)
                {
                    self.objects.push(id.clone());
                    self.frame.push(DrawCall::Plot {
                        rect: scene.rect,
                        plot: id,
                    });
                }
            }
            scenes.insert(scene.id);
        }
        self.clear_uniforms.retain(|id, uniform| {
            let live = scenes.contains(id);
            if !live {
                uniform.buffer.destroy();
            }
            live
        });
        for report in errors {
            screen.report_shader_error(report);
        }
    }

    /// Uploads one plot. Returns whether it can be drawn this frame.
    #[allow(clippy::too_many_arguments)]
    fn sync_plot(
        &mut self,
        device: &Device,
        queue: &Queue,
        plot: &mut Plot,
        camera: &SceneCamera,
        object_id: u32,
        px_per_unit: f32,
        errors: &mut Vec<String>,
    ) -> bool {
        // nothing to draw until every stream has matching data
        if plot.instance_count() == 0 {
            return false;
        }
        let shader = plot.shader();
        let inputs = shader.vertex_inputs();
        let Some(slots) = slot_layouts(&inputs, plot.kind().line().geometry()) else {
            warn!("plot {} is missing a buffer its shader reads", plot.id());
            return false;
        };
        let Some(pipelines) = self.line_pipelines(device, &shader, &slots, errors) else {
            if let Some(resources) = self.plots.remove(plot.id()) {
                resources.destroy();
            }
            return false;
        };

        let resources = self.plots.entry(plot.id().clone()).or_default();
        resources.pipelines = Some(pipelines);
        resources.upload_buffers(device, queue, plot.kind_mut().line_mut().geometry_mut());
        resources.slots = slots.iter().map(|s| (s.buffer, s.offset)).collect();
        upload_texture(
            &mut resources.pattern,
            device,
            queue,
            sampler_uniform(plot, "pattern"),
            TextureFormat::R32Float,
            1,
        );
        upload_texture(
            &mut resources.colormap,
            device,
            queue,
            sampler_uniform(plot, "colormap"),
            TextureFormat::Rgba32Float,
            4,
        );

        let mut bytes = shader.uniforms.pack(plot.uniforms(), camera);
        shader
            .uniforms
            .write_f32(&mut bytes, "object_id", object_id as f32);
        shader
            .uniforms
            .write_f32(&mut bytes, "px_per_unit", px_per_unit);
        resources.upload_uniforms(device, queue, &bytes);
        resources.instances = plot.instance_count() as u32;
        if !resources.bind(device, &shader) {
            debug!("plot {} has no texture bound for its shader", plot.id());
            return false;
        }
        true
    }

    /// Pipelines for `shader`, compiled on first use. Compile errors are
    /// formatted into `errors` and the source is remembered as broken.
    fn line_pipelines(
        &mut self,
        device: &Device,
        shader: &LineShader,
        slots: &[SlotLayout],
        errors: &mut Vec<String>,
    ) -> Option<Arc<LinePipelines>> {
        let source = shader.source();
        if let Some(cached) = self.pipelines.get(&source) {
            return cached.clone();
        }

        device.push_error_scope(ErrorFilter::Validation);
        let module = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("line shader"),
            source: ShaderSource::Wgsl(source.as_str().into()),
        });
        let mut entries = vec![uniform_entry(0, ShaderStages::VERTEX_FRAGMENT)];
        if shader.pattern {
            entries.push(texture_entry(PATTERN_BINDING));
        }
        if shader.colormap {
            entries.push(texture_entry(COLORMAP_BINDING));
        }
        let bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("line bgl"),
            entries: &entries,
        });
        let layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("line layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let buffers: Vec<VertexBufferLayout> = slots
            .iter()
            .map(|slot| VertexBufferLayout {
                array_stride: slot.stride,
                step_mode: VertexStepMode::Instance,
                attributes: &slot.attributes,
            })
            .collect();
        let build = |label: &str, entry_point: &str, format: TextureFormat, blend| {
            device.create_render_pipeline(&RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&layout),
                vertex: VertexState {
                    module: &module,
                    entry_point: Some("vs_main"),
                    compilation_options: PipelineCompilationOptions::default(),
                    buffers: &buffers,
                },
                fragment: Some(FragmentState {
                    module: &module,
                    entry_point: Some(entry_point),
                    compilation_options: PipelineCompilationOptions::default(),
                    targets: &[Some(ColorTargetState {
                        format,
                        blend,
                        write_mask: ColorWrites::ALL,
                    })],
                }),
                primitive: PrimitiveState {
                    topology: PrimitiveTopology::TriangleStrip,
                    strip_index_format: None,
                    front_face: FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: None,
                multisample: MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        };
        let color = build(
            "line pipeline",
            "fs_main",
            self.format,
            Some(BlendState::ALPHA_BLENDING),
        );
        let pick = build("line pick pipeline", "fs_pick", PICK_FORMAT, None);

        // Native backends resolve the scope immediately; where they do not the
        // pipelines are taken as valid.
        let pipelines = match device.pop_error_scope().now_or_never().flatten() {
            Some(err) => {
                errors.push(format_shader_error(&source, &err.to_string()));
                None
            }
            None => Some(Arc::new(LinePipelines {
                color,
                pick,
                bind_group_layout,
            })),
        };
        self.pipelines.insert(source, pipelines.clone());
        pipelines
    }

    pub fn ensure_clear_pipeline(&mut self, device: &Device) {
        if self.clear.is_some() {
            return;
        }
        let shader = device.create_shader_module(include_wgsl!("shaders/clear.wgsl"));
        let bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("clear bgl"),
            entries: &[uniform_entry(0, ShaderStages::FRAGMENT)],
        });
        let layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("clear layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("clear pipeline"),
            layout: Some(&layout),
            vertex: VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                compilation_options: PipelineCompilationOptions::default(),
                buffers: &[],
            },
            fragment: Some(FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                compilation_options: PipelineCompilationOptions::default(),
                targets: &[Some(ColorTargetState {
                    format: self.format,
                    blend: None,
                    write_mask: ColorWrites::ALL,
                })],
            }),
            primitive: PrimitiveState {
                topology: PrimitiveTopology::TriangleStrip,
                strip_index_format: None,
                front_face: FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: MultisampleState::default(),
            multiview: None,
            cache: None,
        });
        self.clear = Some(ClearPipeline {
            pipeline,
            bind_group_layout,
        });
    }

    fn sync_clear(&mut self, device: &Device, queue: &Queue, scene: &SceneId, background: Vec4) {
        let Some(clear) = &self.clear else {
            return;
        };
        let uniform = self.clear_uniforms.entry(scene.clone()).or_insert_with(|| {
            let buffer = device.create_buffer(&BufferDescriptor {
                label: Some("clear uniform"),
                size: std::mem::size_of::<Vec4>() as u64,
                usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let bind_group = device.create_bind_group(&BindGroupDescriptor {
                label: Some("clear bind group"),
                layout: &clear.bind_group_layout,
                entries: &[BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                }],
            });
            ClearUniform { buffer, bind_group }
        });
        queue.write_buffer(&uniform.buffer, 0, bytemuck::bytes_of(&background.to_array()));
    }

    /// Publishes a finished readback and starts the next pending query.
    fn service_picking(&mut self, device: &Device, queue: &Queue, screen: &Screen) {
        if let Some(readback) = self.picking.poll(device) {
            let registry = screen.registry();
            let hits = picking::resolve(
                &readback.query,
                &readback.window,
                &readback.texels,
                &readback.objects,
                |id, instance| registry.find_plot(id).and_then(|p| p.pick_index(instance)),
            );
            screen.picks().publish(PickResult {
                seq: readback.seq,
                query: readback.query,
                hits,
            });
        }
        if self.picking.is_busy() {
            return;
        }
        let Some((seq, query)) = screen.picks().take_request() else {
            return;
        };
        let size = self.picking.size();
        let Some(window) = PickWindow::new(&query, screen.px_per_unit(), size) else {
            screen.picks().publish(PickResult {
                seq,
                query,
                hits: Vec::new(),
            });
            return;
        };
        let Some(target) = self.picking.target(device).cloned() else {
            return;
        };

        let mut encoder = device.create_command_encoder(&CommandEncoderDescriptor {
            label: Some("pick encoder"),
        });
        {
            let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("pick pass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &target,
                    resolve_target: None,
                    ops: Operations {
                        load: LoadOp::Clear(Color::TRANSPARENT),
                        store: StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            let extent = Rectangle {
                x: 0,
                y: 0,
                width: size.0,
                height: size.1,
            };
            self.encode(&mut pass, Vec2::ZERO, extent, true);
        }
        self.picking.start_readback(
            device,
            queue,
            encoder,
            seq,
            query,
            window,
            self.objects.clone(),
        );
    }

    /// Replays the frame plan. `origin` shifts scene viewports into the
    /// target and every draw is scissored to `clip`.
    fn encode(&self, pass: &mut RenderPass<'_>, origin: Vec2, clip: Rectangle<u32>, pick: bool) {
        for call in &self.frame {
            if pick && matches!(call, DrawCall::Clear { .. }) {
                continue;
            }
            let rect = call.rect();
            let x = rect.x + origin.x;
            let y = rect.y + origin.y;
            let Some(scissor) = scissor_rect(x, y, rect.width, rect.height, clip) else {
                continue;
            };
            if pick {
                // The id target is exactly canvas sized, keep the viewport inside it.
                let width = rect.width.min(clip.width as f32 - x);
                let height = rect.height.min(clip.height as f32 - y);
                pass.set_viewport(x, y, width, height, 0.0, 1.0);
            } else {
                pass.set_viewport(x, y, rect.width, rect.height, 0.0, 1.0);
            }
            pass.set_scissor_rect(scissor.x, scissor.y, scissor.width, scissor.height);
            match call {
                DrawCall::Clear { scene, .. } => {
                    let (Some(clear), Some(uniform)) = (&self.clear, self.clear_uniforms.get(scene))
                    else {
                        continue;
                    };
                    pass.set_pipeline(&clear.pipeline);
                    pass.set_bind_group(0, &uniform.bind_group, &[]);
                    pass.draw(0..4, 0..1);
                }
                DrawCall::Plot { plot, .. } => {
                    if let Some(resources) = self.plots.get(plot) {
                        resources.draw(pass, pick);
                    }
                }
            }
        }
    }

    pub fn render(&self, params: RenderParams) {
        if self.frame.is_empty() {
            return;
        }
        let mut pass = params.encoder.begin_render_pass(&RenderPassDescriptor {
            label: Some("remote_plot scenes"),
            color_attachments: &[Some(RenderPassColorAttachment {
                view: params.target,
                resolve_target: None,
                ops: Operations {
                    load: LoadOp::Load,
                    store: StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        self.encode(&mut pass, self.origin, params.bounds, false);
    }

    /// Frees every GPU resource and this renderer's atlas upload.
    pub fn destroy(&mut self, screen: &Screen) {
        for (_, resources) in self.plots.drain() {
            resources.destroy();
        }
        for (_, uniform) in self.clear_uniforms.drain() {
            uniform.buffer.destroy();
        }
        self.pipelines.clear();
        self.frame.clear();
        self.objects.clear();
        self.picking.destroy();
        screen.atlas().write().release_context(self.context);
        debug!("renderer for screen {} destroyed", screen.id());
    }
}

/// Intersection of a viewport with `clip`, in whole pixels.
fn scissor_rect(
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    clip: Rectangle<u32>,
) -> Option<Rectangle<u32>> {
    let x0 = (x.max(0.0) as u32).max(clip.x);
    let y0 = (y.max(0.0) as u32).max(clip.y);
    let x1 = ((x + width).max(0.0).ceil() as u32).min(clip.x + clip.width);
    let y1 = ((y + height).max(0.0).ceil() as u32).min(clip.y + clip.height);
    (x1 > x0 && y1 > y0).then(|| Rectangle {
        x: x0,
        y: y0,
        width: x1 - x0,
        height: y1 - y0,
    })
}
