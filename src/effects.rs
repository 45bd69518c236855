use std::collections::BTreeSet;

use bevy::{
    prelude::*,
    ecs::system::SystemParam,
    pbr::CascadeShadowConfig,
};

use crate::{
    cascade::CASCADE_COUNT,
    controller::CascadeEffects,
    splits::CascadeSplits,
};


/// Global set of enabled per-cascade detail keywords.
#[derive(
    Resource,
    Clone,
    Debug,
    Default,
    PartialEq,
)]
pub struct ShadowDetailKeywords {
    enabled: BTreeSet<String>,
}

impl ShadowDetailKeywords {
    pub fn enable(&mut self, name: &str) {
        self.enabled.insert(name.to_string());
    }

    pub fn disable(&mut self, name: &str) {
        self.enabled.remove(name);
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled.contains(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.enabled.iter().map(String::as_str)
    }
}


/// Normalized cascade boundaries consumed by shadow-casting directional lights.
/// `None` until the first completed estimation round.
#[derive(
    Resource,
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Reflect,
)]
#[reflect(Resource)]
pub struct CascadeSplitSettings(pub Option<CascadeSplits>);


#[derive(SystemParam)]
pub struct ShadowEffects<'w> {
    keywords: ResMut<'w, ShadowDetailKeywords>,
    splits: ResMut<'w, CascadeSplitSettings>,
}

// deref mutably only on change, extraction follows change ticks
impl CascadeEffects for ShadowEffects<'_> {
    fn enable_feature_flag(&mut self, name: &str) {
        if !self.keywords.is_enabled(name) {
            self.keywords.enable(name);
        }
    }

    fn disable_feature_flag(&mut self, name: &str) {
        if self.keywords.is_enabled(name) {
            self.keywords.disable(name);
        }
    }

    fn write_splits(&mut self, splits: CascadeSplits) {
        self.splits.0 = Some(splits);
    }
}


/// Rewrites the cascade bounds of shadow-casting directional lights, keeping each
/// light's far bound as the shadow distance. Every light is rewritten when the
/// splits change; lights spawned or edited later pick up the current splits.
pub fn apply_cascade_splits(
    splits: Res<CascadeSplitSettings>,
    mut lights: Query<(Entity, Ref<DirectionalLight>, &mut CascadeShadowConfig)>,
) {
    let Some(current) = splits.0 else {
        return;
    };

    for (entity, light, mut config) in lights.iter_mut() {
        if !light.shadows_enabled {
            continue;
        }

        if !splits.is_changed() && !light.is_changed() && !config.is_added() {
            continue;
        }

        if config.bounds.len() != CASCADE_COUNT {
            debug!(?entity, cascades = config.bounds.len(), "skipping cascade config with unexpected cascade count");
            continue;
        }

        let Some(&max_distance) = config.bounds.last() else {
            continue;
        };

        let bounds = current.to_cascade_bounds(max_distance);
        if config.bounds != bounds {
            config.bounds = bounds;
        }
    }
}
