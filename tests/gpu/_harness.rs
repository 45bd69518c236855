use bevy::prelude::*;

use bevy_shadow_variance::ShadowVariancePlugin;

// windowed binary rather than #[test]: the render sub-app needs the main thread and a surface

#[derive(Resource)]
pub struct TestHarness {
    pub resolution: (f32, f32),
    pub max_frames: u32,
}

pub fn test_harness_app(harness: TestHarness) -> App {
    let mut app = App::new();

    app.insert_resource(ClearColor(Color::srgb_u8(0, 0, 0)));
    app.add_plugins(DefaultPlugins.set(WindowPlugin {
        primary_window: Some(Window {
            mode: bevy::window::WindowMode::Windowed,
            present_mode: bevy::window::PresentMode::AutoVsync,
            prevent_default_event_handling: false,
            resolution: harness.resolution.into(),
            title: "bevy_shadow_variance pipeline test".to_string(),
            ..default()
        }),
        ..default()
    }));

    app.add_plugins(ShadowVariancePlugin);

    app.insert_resource(harness);

    app
}
