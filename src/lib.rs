use bevy::{
    prelude::*,
    pbr::SimulationLightSystems,
};

pub use cascade::{
    CASCADE_COUNT,
    CascadeDetail,
    CascadeStates,
    CascadeThresholds,
};
pub use controller::{
    CascadeEffects,
    ShadowVarianceController,
    VarianceEstimator,
};
pub use effects::{
    CascadeSplitSettings,
    ShadowDetailKeywords,
};
pub use error::{
    ShadowVarianceError,
    ShadowVarianceResult,
};
pub use optimizer::{
    ShadowVarianceDisabled,
    ShadowVarianceOptimizer,
    ShadowVarianceReport,
    ShadowVarianceRuntime,
};
pub use readback::{
    ReadbackResult,
    ReadbackTicket,
    VarianceSample,
};
pub use settings::ShadowVarianceSettings;
pub use splits::CascadeSplits;

use render::VarianceEstimatorPlugin;

pub mod cascade;
pub mod controller;
pub mod effects;
pub mod error;
pub mod optimizer;
pub mod readback;
pub mod render;
pub mod settings;
pub mod splits;
pub mod throttle;
pub mod utils;


#[derive(Debug, Hash, PartialEq, Eq, Clone, SystemSet)]
pub enum ShadowVarianceSystems {
    Receive,
    Tick,
    ApplySplits,
}


#[derive(Default)]
pub struct ShadowVariancePlugin;

impl Plugin for ShadowVariancePlugin {
    fn build(&self, app: &mut App) {
        app.register_type::<ShadowVarianceSettings>();
        app.register_type::<ShadowVarianceOptimizer>();
        app.register_type::<ShadowVarianceDisabled>();
        app.register_type::<ShadowVarianceReport>();
        app.register_type::<CascadeSplitSettings>();

        app.init_resource::<ShadowDetailKeywords>();
        app.init_resource::<CascadeSplitSettings>();

        app.add_plugins(VarianceEstimatorPlugin);

        app.add_systems(
            PreUpdate,
            optimizer::receive_variance_readbacks.in_set(ShadowVarianceSystems::Receive),
        );

        app.add_systems(
            PostUpdate,
            (
                // removal is processed first so a same-frame re-insert reactivates
                (
                    optimizer::deactivate_shadow_variance,
                    optimizer::activate_shadow_variance,
                    optimizer::tick_shadow_variance,
                    optimizer::update_shadow_variance_reports,
                )
                    .chain()
                    .in_set(ShadowVarianceSystems::Tick),
                effects::apply_cascade_splits
                    .in_set(ShadowVarianceSystems::ApplySplits)
                    .before(SimulationLightSystems::UpdateDirectionalLightCascades),
            ),
        );
    }
}
