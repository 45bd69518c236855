use std::fmt;

use bevy::prelude::*;

use crate::{
    cascade::CascadeStates,
    controller::{
        ReadbackOutcome,
        ShadowVarianceController,
        TickOutcome,
    },
    effects::ShadowEffects,
    error::{
        ShadowVarianceError,
        ShadowVarianceResult,
    },
    readback::VarianceSample,
    render::{
        GpuVarianceEstimator,
        VARIANCE_KERNEL,
        VARIANCE_SHADER_HANDLE,
        VarianceEstimatorSupport,
        VarianceJobQueue,
        VarianceReadbackChannel,
        variance_target_image,
    },
    settings::ShadowVarianceSettings,
    splits::CascadeSplits,
};


/// Adapts cascaded shadow detail for the camera it is attached to.
#[derive(
    Component,
    Clone,
    Copy,
    Debug,
    Default,
    Reflect,
)]
#[reflect(Component)]
#[require(ShadowVarianceSettings)]
pub struct ShadowVarianceOptimizer;


/// Inserted instead of a runtime when activation preconditions fail.
#[derive(Component, Clone, Debug, Reflect)]
#[reflect(Component)]
pub struct ShadowVarianceDisabled {
    pub reason: String,
}


#[derive(Component, Debug, Deref, DerefMut)]
pub struct ShadowVarianceRuntime(pub ShadowVarianceController<Handle<Image>>);


/// Read-only snapshot for inspectors and the debug overlay.
#[derive(
    Component,
    Clone,
    Debug,
    Default,
    PartialEq,
    Reflect,
)]
#[reflect(Component)]
pub struct ShadowVarianceReport {
    pub low_to_mid: f32,
    pub mid_to_high: f32,
    pub last_variance: VarianceSample,
    pub states: CascadeStates,
    pub splits: CascadeSplits,
    pub pending: bool,
    pub frame: u64,
}

impl fmt::Display for ShadowVarianceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [x, y, z, w] = self.last_variance.0;

        writeln!(f, "Low→Mid Thr: {:.3}", self.low_to_mid)?;
        writeln!(f, "Mid→High Thr: {:.3}", self.mid_to_high)?;
        writeln!(f, "Vars: {x:.4}, {y:.4}")?;
        write!(f, "      {z:.4}, {w:.4}")
    }
}


pub fn check_preconditions(
    support: Option<&VarianceEstimatorSupport>,
    shaders: Option<&Assets<Shader>>,
    settings: &ShadowVarianceSettings,
) -> ShadowVarianceResult<()> {
    if !support.is_some_and(|support| support.render_pipeline) {
        return Err(ShadowVarianceError::UnsupportedRenderPipeline);
    }

    if !shaders.is_some_and(|shaders| shaders.contains(&VARIANCE_SHADER_HANDLE)) {
        return Err(ShadowVarianceError::EstimatorKernelMissing(VARIANCE_KERNEL));
    }

    settings.validate()
}


#[allow(clippy::type_complexity)]
pub fn activate_shadow_variance(
    mut commands: Commands,
    optimizers: Query<
        (
            Entity,
            &ShadowVarianceSettings,
            Has<Camera>,
        ),
        Added<ShadowVarianceOptimizer>,
    >,
    support: Option<Res<VarianceEstimatorSupport>>,
    shaders: Option<Res<Assets<Shader>>>,
    mut images: Option<ResMut<Assets<Image>>>,
) {
    for (entity, settings, is_camera) in optimizers.iter() {
        let checked = if is_camera {
            check_preconditions(support.as_deref(), shaders.as_deref(), settings)
        } else {
            Err(ShadowVarianceError::InvalidSettings(
                "optimizer must be attached to a camera".to_string(),
            ))
        };

        let images = match (checked, images.as_deref_mut()) {
            (Ok(()), Some(images)) => images,
            (Ok(()), None) => {
                disable(&mut commands, entity, ShadowVarianceError::UnsupportedRenderPipeline);
                continue;
            },
            (Err(err), _) => {
                disable(&mut commands, entity, err);
                continue;
            },
        };

        if settings.debug_mode && !settings.thresholds_ordered() {
            warn!(
                ?entity,
                low_to_mid = settings.low_to_mid,
                mid_to_high = settings.mid_to_high,
                "shadow variance thresholds are not increasing",
            );
        }

        let target = images.add(variance_target_image());

        commands.entity(entity)
            .remove::<ShadowVarianceDisabled>()
            .insert((
                ShadowVarianceRuntime(ShadowVarianceController::new(target)),
                ShadowVarianceReport::default(),
            ));

        if settings.debug_mode {
            info!(?entity, samples = settings.sample_count, "shadow variance optimizer initialized");
        }
    }
}

fn disable(
    commands: &mut Commands,
    entity: Entity,
    err: ShadowVarianceError,
) {
    error!(?entity, "{err}; disabling shadow variance optimizer");

    commands.entity(entity)
        .remove::<(ShadowVarianceRuntime, ShadowVarianceReport)>()
        .insert(ShadowVarianceDisabled {
            reason: err.to_string(),
        });
}


pub fn deactivate_shadow_variance(
    mut commands: Commands,
    mut removed: RemovedComponents<ShadowVarianceOptimizer>,
    mut runtimes: Query<(&ShadowVarianceSettings, &mut ShadowVarianceRuntime)>,
    mut images: Option<ResMut<Assets<Image>>>,
) {
    for entity in removed.read() {
        // a despawned camera drops its runtime and the target handle with it
        let Ok((settings, mut runtime)) = runtimes.get_mut(entity) else {
            continue;
        };

        if let (Some(target), Some(images)) = (runtime.deactivate(), images.as_deref_mut()) {
            images.remove(&target);
        }

        commands.entity(entity)
            .remove::<(ShadowVarianceRuntime, ShadowVarianceReport)>();

        if settings.debug_mode {
            debug!(?entity, "shadow variance optimizer deactivated");
        }
    }
}


pub fn tick_shadow_variance(
    mut optimizers: Query<
        (
            Entity,
            &Camera,
            &ShadowVarianceSettings,
            &mut ShadowVarianceRuntime,
        ),
        With<ShadowVarianceOptimizer>,
    >,
    lights: Query<(Entity, &DirectionalLight)>,
    mut queue: ResMut<VarianceJobQueue>,
) {
    let atlas = lights.iter()
        .find(|(_, light)| light.shadows_enabled)
        .map(|(entity, _)| entity);

    for (camera_entity, camera, settings, mut runtime) in optimizers.iter_mut() {
        if !camera.is_active {
            continue;
        }

        let mut estimator = GpuVarianceEstimator {
            camera: camera_entity,
            atlas,
            queue: &mut queue,
        };

        let outcome = runtime.tick(settings, &mut estimator);
        if settings.debug_mode && outcome == TickOutcome::AtlasUnavailable {
            trace!(?camera_entity, "no shadow-casting directional light");
        }
    }
}


pub fn receive_variance_readbacks(
    channel: Option<Res<VarianceReadbackChannel>>,
    mut optimizers: Query<(&ShadowVarianceSettings, Option<&mut ShadowVarianceRuntime>)>,
    mut effects: ShadowEffects,
) {
    let Some(channel) = channel else {
        return;
    };

    for completion in channel.drain() {
        // a despawned camera has nothing left to report to
        let Ok((settings, runtime)) = optimizers.get_mut(completion.camera) else {
            continue;
        };

        let Some(mut runtime) = runtime else {
            if settings.debug_mode {
                debug!(camera = ?completion.camera, "dropping variance readback for inactive camera");
            }
            continue;
        };

        let outcome = runtime.complete_readback(
            completion.ticket,
            completion.result,
            settings,
            &mut effects,
        );

        if settings.debug_mode && outcome == ReadbackOutcome::Ignored {
            debug!(camera = ?completion.camera, ticket = ?completion.ticket, "ignoring stale variance readback");
        }
    }
}


pub fn update_shadow_variance_reports(
    mut reports: Query<(
        &ShadowVarianceSettings,
        &ShadowVarianceRuntime,
        &mut ShadowVarianceReport,
    )>,
) {
    for (settings, runtime, mut report) in reports.iter_mut() {
        let next = ShadowVarianceReport {
            low_to_mid: settings.low_to_mid,
            mid_to_high: settings.mid_to_high,
            last_variance: *runtime.last_sample(),
            states: *runtime.states(),
            splits: *runtime.splits(),
            pending: runtime.is_pending(),
            frame: runtime.frame_counter(),
        };

        report.set_if_neq(next);
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preconditions_require_render_pipeline() {
        let settings = ShadowVarianceSettings::default();

        assert!(matches!(
            check_preconditions(None, None, &settings),
            Err(ShadowVarianceError::UnsupportedRenderPipeline),
        ));

        let unsupported = VarianceEstimatorSupport {
            render_pipeline: false,
        };
        assert!(matches!(
            check_preconditions(Some(&unsupported), None, &settings),
            Err(ShadowVarianceError::UnsupportedRenderPipeline),
        ));
    }

    #[test]
    fn preconditions_require_kernel() {
        let support = VarianceEstimatorSupport {
            render_pipeline: true,
        };
        let shaders = Assets::<Shader>::default();

        assert!(matches!(
            check_preconditions(Some(&support), Some(&shaders), &ShadowVarianceSettings::default()),
            Err(ShadowVarianceError::EstimatorKernelMissing(VARIANCE_KERNEL)),
        ));
    }

    #[test]
    fn report_renders_overlay_text() {
        let report = ShadowVarianceReport {
            low_to_mid: 0.05,
            mid_to_high: 0.1,
            last_variance: VarianceSample([0.2, 0.2, 0.01, 0.0]),
            ..default()
        };

        assert_eq!(
            report.to_string(),
            "Low→Mid Thr: 0.050\nMid→High Thr: 0.100\nVars: 0.2000, 0.2000\n      0.0100, 0.0000",
        );
    }
}
