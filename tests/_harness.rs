use bevy::{
    prelude::*,
    asset::AssetPlugin,
};

use bevy_shadow_variance::ShadowVariancePlugin;


// headless: no render sub-app, so every test drives readback completions by hand
pub struct TestHarness {
    pub render_pipeline: bool,
}

pub fn test_harness_app(
    harness: TestHarness,
) -> App {
    let mut app = App::new();

    app.add_plugins((
        MinimalPlugins,
        AssetPlugin::default(),
    ));
    app.init_asset::<Shader>();
    app.init_asset::<Image>();

    app.add_plugins(ShadowVariancePlugin);

    if harness.render_pipeline {
        app.insert_resource(bevy_shadow_variance::render::VarianceEstimatorSupport {
            render_pipeline: true,
        });
    }

    app
}
