use bevy::{
    prelude::*,
    app::AppExit,
    core_pipeline::tonemapping::Tonemapping,
    pbr::CascadeShadowConfigBuilder,
};
use bevy_args::{
    BevyArgsPlugin,
    parse_args,
};
use bevy_inspector_egui::{
    bevy_egui::EguiPlugin,
    quick::WorldInspectorPlugin,
};
use bevy_panorbit_camera::{
    PanOrbitCamera,
    PanOrbitCameraPlugin,
};
use rand::Rng;

use bevy_shadow_variance::{
    CASCADE_COUNT,
    ShadowVarianceDisabled,
    ShadowVarianceOptimizer,
    ShadowVariancePlugin,
    ShadowVarianceReport,
    ShadowVarianceSettings,
    utils::{
        ShadowVarianceViewer,
        ViewerScene,
        setup_hooks,
    },
};


fn viewer_settings(config: &ShadowVarianceViewer) -> ShadowVarianceSettings {
    if !config.settings_file.is_empty() {
        match ShadowVarianceSettings::load(&config.settings_file) {
            Ok(settings) => {
                info!("loaded optimizer settings from {}", config.settings_file);
                return settings;
            },
            Err(err) => error!("{err}; falling back to command line settings"),
        }
    }

    ShadowVarianceSettings {
        frames_per_dispatch: config.frames_per_dispatch,
        sample_count: config.sample_count,
        debug_mode: config.debug_mode,
        ..default()
    }
}


fn setup_scene(
    mut commands: Commands,
    config: Res<ShadowVarianceViewer>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    commands.spawn((
        Mesh3d(meshes.add(Plane3d::default().mesh().size(200.0, 200.0))),
        MeshMaterial3d(materials.add(StandardMaterial {
            base_color: Color::srgb(0.35, 0.38, 0.32),
            perceptual_roughness: 0.9,
            ..default()
        })),
        Name::new("ground"),
    ));

    let (occluders, extent) = match config.scene {
        ViewerScene::Ground => (0, 0.0),
        ViewerScene::Scatter => (config.occluder_count, 60.0),
        ViewerScene::Forest => (config.occluder_count * 4, 20.0),
    };

    let occluder_mesh = meshes.add(Cuboid::new(1.0, 1.0, 1.0));
    let occluder_material = materials.add(StandardMaterial {
        base_color: Color::srgb(0.8, 0.7, 0.6),
        ..default()
    });

    let mut rng = rand::thread_rng();
    for i in 0..occluders {
        let height = rng.gen_range(0.5..6.0);
        let position = Vec3::new(
            rng.gen_range(-extent..extent),
            height / 2.0,
            rng.gen_range(-extent..extent),
        );

        commands.spawn((
            Mesh3d(occluder_mesh.clone()),
            MeshMaterial3d(occluder_material.clone()),
            Transform::from_translation(position)
                .with_scale(Vec3::new(rng.gen_range(0.5..2.0), height, rng.gen_range(0.5..2.0)))
                .with_rotation(Quat::from_rotation_y(rng.gen_range(0.0..std::f32::consts::TAU))),
            Name::new(format!("occluder_{i}")),
        ));
    }

    commands.spawn((
        DirectionalLight {
            illuminance: light_consts::lux::OVERCAST_DAY,
            shadows_enabled: true,
            ..default()
        },
        Transform::from_xyz(10.0, 20.0, 8.0).looking_at(Vec3::ZERO, Vec3::Y),
        CascadeShadowConfigBuilder {
            num_cascades: CASCADE_COUNT,
            maximum_distance: 120.0,
            ..default()
        }.build(),
        Name::new("sun"),
    ));

    commands.spawn((
        Camera3d::default(),
        Transform::from_translation(Vec3::new(0.0, 8.0, 30.0)).looking_at(Vec3::ZERO, Vec3::Y),
        Tonemapping::None,
        PanOrbitCamera {
            allow_upside_down: true,
            ..default()
        },
        ShadowVarianceOptimizer,
        viewer_settings(&config),
        Name::new("camera"),
    ));
}


#[derive(Component)]
struct VarianceOverlay;

fn setup_overlay(mut commands: Commands) {
    commands.spawn((
        Text::new(""),
        TextFont {
            font_size: 18.0,
            ..default()
        },
        TextColor(Color::WHITE),
        Node {
            position_type: PositionType::Absolute,
            top: Val::Px(12.0),
            left: Val::Px(12.0),
            ..default()
        },
        VarianceOverlay,
    ));
}

fn update_overlay(
    optimizers: Query<(
        &ShadowVarianceSettings,
        Option<&ShadowVarianceReport>,
        Option<&ShadowVarianceDisabled>,
    )>,
    mut overlay: Query<&mut Text, With<VarianceOverlay>>,
) {
    let Ok(mut text) = overlay.single_mut() else {
        return;
    };

    let Some((settings, report, disabled)) = optimizers.iter().next() else {
        return;
    };

    text.0 = if !settings.debug_mode {
        String::new()
    } else if let Some(disabled) = disabled {
        format!("optimizer disabled: {}", disabled.reason)
    } else if let Some(report) = report {
        format!("{report}\nsplits: {}", report.splits)
    } else {
        String::new()
    };
}


fn press_d_toggle_debug(
    keys: Res<ButtonInput<KeyCode>>,
    mut settings: Query<&mut ShadowVarianceSettings>,
) {
    if keys.just_pressed(KeyCode::KeyD) {
        for mut settings in settings.iter_mut() {
            settings.debug_mode = !settings.debug_mode;
            info!("shadow variance debug mode: {}", settings.debug_mode);
        }
    }
}

fn press_arrows_adjust_thresholds(
    keys: Res<ButtonInput<KeyCode>>,
    mut settings: Query<&mut ShadowVarianceSettings>,
) {
    let step = if keys.just_pressed(KeyCode::ArrowUp) {
        0.01
    } else if keys.just_pressed(KeyCode::ArrowDown) {
        -0.01
    } else {
        return;
    };

    for mut settings in settings.iter_mut() {
        settings.low_to_mid = (settings.low_to_mid + step).clamp(0.0, 1.0);
        settings.mid_to_high = (settings.mid_to_high + step).clamp(0.0, 1.0);
    }
}

fn press_s_save_settings(
    keys: Res<ButtonInput<KeyCode>>,
    config: Res<ShadowVarianceViewer>,
    settings: Query<&ShadowVarianceSettings>,
) {
    if !keys.just_pressed(KeyCode::KeyS) {
        return;
    }

    let path = if config.settings_file.is_empty() {
        "shadow_variance_settings.json"
    } else {
        config.settings_file.as_str()
    };

    for settings in settings.iter() {
        match settings.save(path) {
            Ok(()) => info!("saved optimizer settings to {path}"),
            Err(err) => error!("{err}"),
        }
    }
}


fn viewer_app() {
    let config = parse_args::<ShadowVarianceViewer>();
    let mut app = App::new();

    #[cfg(target_arch = "wasm32")]
    let primary_window = Some(Window {
        fit_canvas_to_parent: true,
        mode: bevy::window::WindowMode::Windowed,
        present_mode: bevy::window::PresentMode::AutoVsync,
        prevent_default_event_handling: true,
        title: config.name.clone(),
        ..default()
    });

    #[cfg(not(target_arch = "wasm32"))]
    let primary_window = Some(Window {
        mode: bevy::window::WindowMode::Windowed,
        present_mode: bevy::window::PresentMode::AutoVsync,
        prevent_default_event_handling: false,
        resolution: (config.width, config.height).into(),
        title: config.name.clone(),
        ..default()
    });

    app.insert_resource(ClearColor(Color::srgb_u8(20, 24, 32)));
    app.add_plugins(
        DefaultPlugins
            .set(WindowPlugin {
                primary_window,
                ..default()
            }),
    );
    app.add_plugins(BevyArgsPlugin::<ShadowVarianceViewer>::default());
    app.add_plugins(PanOrbitCameraPlugin);

    if config.editor {
        app.add_plugins(EguiPlugin {
            enable_multipass_for_primary_context: true,
        });
        app.add_plugins(WorldInspectorPlugin::new());
    }

    if config.press_esc_close {
        app.add_systems(Update, esc_close);
    }

    if config.show_overlay {
        app.add_systems(Startup, setup_overlay);
        app.add_systems(Update, update_overlay);
    }

    app.add_plugins(ShadowVariancePlugin);
    app.add_systems(Startup, setup_scene);
    app.add_systems(Update, (
        press_d_toggle_debug,
        press_arrows_adjust_thresholds,
        press_s_save_settings,
    ));

    app.run();
}


pub fn esc_close(
    keys: Res<ButtonInput<KeyCode>>,
    mut exit: EventWriter<AppExit>,
) {
    if keys.just_pressed(KeyCode::Escape) {
        exit.write(AppExit::Success);
    }
}


pub fn main() {
    setup_hooks();
    viewer_app();
}
