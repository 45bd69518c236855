use std::sync::atomic::{
    AtomicBool,
    Ordering,
};

use bevy::{
    prelude::*,
    asset::load_internal_asset,
    core_pipeline::core_3d::graph::{
        Core3d,
        Node3d,
    },
    ecs::query::QueryItem,
    pbr::ViewShadowBindings,
    render::{
        ExtractSchedule,
        MainWorld,
        Render,
        RenderApp,
        RenderSet,
        render_asset::RenderAssets,
        render_graph::{
            NodeRunError,
            RenderGraphApp,
            RenderGraphContext,
            RenderLabel,
            ViewNode,
            ViewNodeRunner,
        },
        render_resource::*,
        renderer::{
            RenderContext,
            RenderDevice,
            render_system,
        },
        sync_world::MainEntity,
        texture::GpuImage,
    },
};
use bytemuck::{
    Pod,
    Zeroable,
};

use crate::{
    cascade::CASCADE_COUNT,
    controller::VarianceEstimator,
    readback::{
        ReadbackResult,
        ReadbackTicket,
        TEXEL_SIZE,
    },
};


pub const VARIANCE_SHADER_HANDLE: Handle<Shader> = Handle::weak_from_u128(126457389120563479);
pub const VARIANCE_KERNEL: &str = "estimate_variance";

pub const VARIANCE_TARGET_FORMAT: TextureFormat = TextureFormat::Rgba32Float;
const STAGING_BYTES_PER_ROW: u32 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;


#[derive(Default)]
pub struct VarianceEstimatorPlugin;

impl Plugin for VarianceEstimatorPlugin {
    fn build(&self, app: &mut App) {
        // headless apps run without the shader asset collection
        if app.world().contains_resource::<Assets<Shader>>() {
            load_internal_asset!(
                app,
                VARIANCE_SHADER_HANDLE,
                "variance.wgsl",
                Shader::from_wgsl
            );
        }

        let (sender, receiver) = flume::unbounded();

        app.init_resource::<VarianceJobQueue>();

        let render_pipeline = if let Some(render_app) = app.get_sub_app_mut(RenderApp) {
            render_app
                .insert_resource(VarianceCompletionSender(sender.clone()))
                .init_resource::<ExtractedVarianceJobs>()
                .init_resource::<PreparedVarianceJobs>()
                .add_systems(ExtractSchedule, extract_variance_jobs)
                .add_systems(
                    Render,
                    (
                        prepare_variance_jobs.in_set(RenderSet::PrepareResources),
                        map_variance_readbacks
                            .after(render_system)
                            .in_set(RenderSet::Render),
                    ),
                );

            render_app
                .add_render_graph_node::<ViewNodeRunner<VarianceEstimatorNode>>(
                    Core3d,
                    VarianceEstimatorLabel,
                )
                .add_render_graph_edges(
                    Core3d,
                    (
                        Node3d::EndMainPass,
                        VarianceEstimatorLabel,
                        Node3d::Tonemapping,
                    ),
                );

            true
        } else {
            false
        };

        app.insert_resource(VarianceReadbackChannel {
            sender,
            receiver,
        });
        app.insert_resource(VarianceEstimatorSupport {
            render_pipeline,
        });
    }

    fn finish(&self, app: &mut App) {
        if let Some(render_app) = app.get_sub_app_mut(RenderApp) {
            render_app.init_resource::<VarianceEstimatorPipeline>();
        }
    }
}


/// Whether the estimator can run in this app; checked when an optimizer activates.
#[derive(Resource, Clone, Copy, Debug)]
pub struct VarianceEstimatorSupport {
    pub render_pipeline: bool,
}


#[derive(Clone, Debug, PartialEq)]
pub struct VarianceCompletion {
    pub camera: Entity,
    pub ticket: ReadbackTicket,
    pub result: ReadbackResult,
}


/// Main world end of the render to main completion channel.
#[derive(Resource)]
pub struct VarianceReadbackChannel {
    sender: flume::Sender<VarianceCompletion>,
    receiver: flume::Receiver<VarianceCompletion>,
}

impl VarianceReadbackChannel {
    pub fn sender(&self) -> flume::Sender<VarianceCompletion> {
        self.sender.clone()
    }

    /// Never blocks; yields whatever completed since the last drain.
    pub fn drain(&self) -> impl Iterator<Item = VarianceCompletion> + '_ {
        self.receiver.try_iter()
    }
}


#[derive(Resource)]
struct VarianceCompletionSender(flume::Sender<VarianceCompletion>);


#[derive(Clone, Debug, PartialEq)]
pub struct VarianceJobRequest {
    pub camera: Entity,
    pub target: AssetId<Image>,
    /// `None` for a readback without a fresh dispatch.
    pub sample_count: Option<u32>,
    pub ticket: Option<ReadbackTicket>,
}


#[derive(Resource, Debug, Default)]
pub struct VarianceJobQueue {
    pub jobs: Vec<VarianceJobRequest>,
    next_ticket: u64,
}

impl VarianceJobQueue {
    fn next_ticket(&mut self) -> ReadbackTicket {
        self.next_ticket += 1;
        ReadbackTicket(self.next_ticket)
    }
}


/// Estimator backed by the render world. The atlas is the shadow-casting
/// directional light whose shadow map the camera's view binds.
pub struct GpuVarianceEstimator<'a> {
    pub camera: Entity,
    pub atlas: Option<Entity>,
    pub queue: &'a mut VarianceJobQueue,
}

impl VarianceEstimator for GpuVarianceEstimator<'_> {
    type Atlas = Entity;
    type Target = Handle<Image>;

    fn shadow_atlas(&self) -> Option<Entity> {
        self.atlas
    }

    fn dispatch(
        &mut self,
        _atlas: &Entity,
        sample_count: u32,
        target: &Handle<Image>,
    ) {
        self.queue.jobs.push(VarianceJobRequest {
            camera: self.camera,
            target: target.id(),
            sample_count: Some(sample_count),
            ticket: None,
        });
    }

    fn request_readback(&mut self, target: &Handle<Image>) -> ReadbackTicket {
        let ticket = self.queue.next_ticket();
        let target = target.id();

        let unclaimed = self.queue.jobs.iter_mut()
            .rev()
            .find(|job| job.target == target && job.ticket.is_none());

        match unclaimed {
            Some(job) => job.ticket = Some(ticket),
            None => self.queue.jobs.push(VarianceJobRequest {
                camera: self.camera,
                target,
                sample_count: None,
                ticket: Some(ticket),
            }),
        }

        ticket
    }
}


pub fn variance_target_image() -> Image {
    let mut image = Image::new_fill(
        Extent3d {
            width: 1,
            height: 1,
            depth_or_array_layers: 1,
        },
        TextureDimension::D2,
        &[0u8; TEXEL_SIZE],
        VARIANCE_TARGET_FORMAT,
        bevy::asset::RenderAssetUsages::RENDER_WORLD,
    );

    image.texture_descriptor.usage = TextureUsages::STORAGE_BINDING
        | TextureUsages::TEXTURE_BINDING
        | TextureUsages::COPY_SRC
        | TextureUsages::COPY_DST;

    image
}


#[derive(Resource, Default)]
struct ExtractedVarianceJobs(Vec<VarianceJobRequest>);

fn extract_variance_jobs(
    mut extracted: ResMut<ExtractedVarianceJobs>,
    mut main_world: ResMut<MainWorld>,
) {
    if let Some(mut queue) = main_world.get_resource_mut::<VarianceJobQueue>() {
        extracted.0.append(&mut queue.jobs);
    }
}


#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct VarianceParams {
    sample_count: u32,
    cascade_count: u32,
    seed: u32,
    _pad: u32,
}


struct PreparedVarianceJob {
    camera: Entity,
    target: AssetId<Image>,
    params: Option<Buffer>,
    staging: Option<Buffer>,
    ticket: Option<ReadbackTicket>,
    encoded: AtomicBool,
}


#[derive(Resource, Default)]
struct PreparedVarianceJobs(Vec<PreparedVarianceJob>);

fn prepare_variance_jobs(
    render_device: Res<RenderDevice>,
    mut extracted: ResMut<ExtractedVarianceJobs>,
    mut prepared: ResMut<PreparedVarianceJobs>,
) {
    for job in extracted.0.drain(..) {
        let params = job.sample_count.map(|sample_count| {
            let params = VarianceParams {
                sample_count,
                cascade_count: CASCADE_COUNT as u32,
                seed: job.ticket.map_or(0, |ticket| ticket.0 as u32),
                _pad: 0,
            };

            render_device.create_buffer_with_data(&BufferInitDescriptor {
                label: Some("shadow_variance_params"),
                contents: bytemuck::bytes_of(&params),
                usage: BufferUsages::UNIFORM,
            })
        });

        let staging = job.ticket.map(|_| {
            render_device.create_buffer(&BufferDescriptor {
                label: Some("shadow_variance_staging"),
                size: u64::from(STAGING_BYTES_PER_ROW),
                usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        });

        prepared.0.push(PreparedVarianceJob {
            camera: job.camera,
            target: job.target,
            params,
            staging,
            ticket: job.ticket,
            encoded: AtomicBool::new(false),
        });
    }
}


#[derive(Resource)]
pub struct VarianceEstimatorPipeline {
    pub pipeline: CachedComputePipelineId,
    pub bind_group_layout: BindGroupLayout,
}

impl FromWorld for VarianceEstimatorPipeline {
    fn from_world(world: &mut World) -> Self {
        let render_device = world.resource::<RenderDevice>();

        let bind_group_layout = render_device.create_bind_group_layout(
            Some("shadow_variance_bind_group_layout"),
            &[
                BindGroupLayoutEntry {
                    binding: 0,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::Texture {
                        sample_type: TextureSampleType::Depth,
                        view_dimension: TextureViewDimension::D2Array,
                        multisampled: false,
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 1,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::StorageTexture {
                        access: StorageTextureAccess::WriteOnly,
                        format: VARIANCE_TARGET_FORMAT,
                        view_dimension: TextureViewDimension::D2,
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 2,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: BufferSize::new(std::mem::size_of::<VarianceParams>() as u64),
                    },
                    count: None,
                },
            ],
        );

        let pipeline_cache = world.resource::<PipelineCache>();
        let pipeline = pipeline_cache.queue_compute_pipeline(ComputePipelineDescriptor {
            label: Some("shadow_variance_pipeline".into()),
            layout: vec![bind_group_layout.clone()],
            push_constant_ranges: vec![],
            shader: VARIANCE_SHADER_HANDLE,
            shader_defs: vec![],
            entry_point: VARIANCE_KERNEL.into(),
            zero_initialize_workgroup_memory: true,
        });

        Self {
            pipeline,
            bind_group_layout,
        }
    }
}


#[derive(Debug, Hash, PartialEq, Eq, Clone, RenderLabel)]
pub struct VarianceEstimatorLabel;


#[derive(Default)]
pub struct VarianceEstimatorNode;

impl ViewNode for VarianceEstimatorNode {
    type ViewQuery = (
        &'static MainEntity,
        Option<&'static ViewShadowBindings>,
    );

    fn run<'w>(
        &self,
        _graph: &mut RenderGraphContext,
        render_context: &mut RenderContext<'w>,
        (main_entity, shadow_bindings): QueryItem<'w, Self::ViewQuery>,
        world: &'w World,
    ) -> Result<(), NodeRunError> {
        let prepared = world.resource::<PreparedVarianceJobs>();
        let camera = main_entity.id();

        let jobs = prepared.0.iter()
            .filter(|job| job.camera == camera)
            .collect::<Vec<_>>();
        if jobs.is_empty() {
            return Ok(());
        }

        let pipeline_cache = world.resource::<PipelineCache>();
        let variance_pipeline = world.resource::<VarianceEstimatorPipeline>();
        let gpu_images = world.resource::<RenderAssets<GpuImage>>();

        for job in jobs {
            let Some(target) = gpu_images.get(job.target) else {
                debug!(?camera, "shadow variance target not yet uploaded");
                continue;
            };

            if let Some(params) = job.params.as_ref() {
                let Some(shadow_bindings) = shadow_bindings else {
                    debug!(?camera, "view has no shadow bindings; skipping variance dispatch");
                    continue;
                };

                let Some(pipeline) = pipeline_cache.get_compute_pipeline(variance_pipeline.pipeline) else {
                    debug!(?camera, "shadow variance pipeline not ready");
                    continue;
                };

                let bind_group = render_context.render_device().create_bind_group(
                    Some("shadow_variance_bind_group"),
                    &variance_pipeline.bind_group_layout,
                    &[
                        BindGroupEntry {
                            binding: 0,
                            resource: BindingResource::TextureView(
                                &shadow_bindings.directional_light_depth_texture_view,
                            ),
                        },
                        BindGroupEntry {
                            binding: 1,
                            resource: BindingResource::TextureView(&target.texture_view),
                        },
                        BindGroupEntry {
                            binding: 2,
                            resource: params.as_entire_binding(),
                        },
                    ],
                );

                let mut pass = render_context
                    .command_encoder()
                    .begin_compute_pass(&ComputePassDescriptor {
                        label: Some("shadow_variance_pass"),
                        timestamp_writes: None,
                    });

                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &*bind_group, &[]);
                pass.dispatch_workgroups(1, 1, 1);
            }

            let Some(staging) = job.staging.as_ref() else {
                continue;
            };

            let texture: &wgpu::Texture = &target.texture;
            let staging_buffer: &wgpu::Buffer = staging;

            render_context.command_encoder().copy_texture_to_buffer(
                wgpu::TexelCopyTextureInfo {
                    texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::TexelCopyBufferInfo {
                    buffer: staging_buffer,
                    layout: wgpu::TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(STAGING_BYTES_PER_ROW),
                        rows_per_image: None,
                    },
                },
                Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
            );

            job.encoded.store(true, Ordering::Relaxed);
        }

        Ok(())
    }
}


// every ticketed job completes exactly once, with an error if it never reached the encoder
fn map_variance_readbacks(
    mut prepared: ResMut<PreparedVarianceJobs>,
    completion_sender: Res<VarianceCompletionSender>,
    render_device: Res<RenderDevice>,
) {
    for job in prepared.0.drain(..) {
        let Some(ticket) = job.ticket else {
            continue;
        };

        let camera = job.camera;
        let sender = completion_sender.0.clone();

        match job.staging {
            Some(staging) if job.encoded.load(Ordering::Relaxed) => {
                let buffer = staging.clone();

                staging.slice(..).map_async(MapMode::Read, move |mapped| {
                    let result = match mapped {
                        Ok(()) => {
                            let view = buffer.slice(..).get_mapped_range();
                            let result = ReadbackResult::from_texel_rows(
                                &view,
                                1,
                                STAGING_BYTES_PER_ROW as usize,
                            );
                            drop(view);
                            buffer.unmap();
                            result
                        },
                        Err(err) => {
                            debug!(?err, "shadow variance staging buffer failed to map");
                            ReadbackResult::error()
                        },
                    };

                    let _ = sender.send(VarianceCompletion {
                        camera,
                        ticket,
                        result,
                    });
                });
            },
            _ => {
                let _ = sender.send(VarianceCompletion {
                    camera,
                    ticket,
                    result: ReadbackResult::error(),
                });
            },
        }
    }

    // callbacks mapped on earlier frames also fire from this poll
    let _ = render_device.poll(wgpu::Maintain::Poll);
}
