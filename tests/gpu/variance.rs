use bevy::{
    prelude::*,
    app::AppExit,
    core_pipeline::tonemapping::Tonemapping,
    diagnostic::FrameCount,
    pbr::{
        CascadeShadowConfig,
        CascadeShadowConfigBuilder,
    },
};

use bevy_shadow_variance::{
    CASCADE_COUNT,
    CascadeSplitSettings,
    ShadowVarianceDisabled,
    ShadowVarianceSystems,
    ShadowVarianceOptimizer,
    ShadowVarianceReport,
    ShadowVarianceRuntime,
    ShadowVarianceSettings,
};

use _harness::{TestHarness, test_harness_app};

mod _harness;


const MAX_DISTANCE: f32 = 60.0;

#[derive(Component)]
struct Sun;


// run with `cargo run --bin test_variance --features testing`
fn main() {
    let mut app = test_harness_app(TestHarness {
        resolution: (512.0, 512.0),
        max_frames: 600,
    });

    app.add_systems(Startup, setup);
    // after the splits reach the light's cascade config
    app.add_systems(
        PostUpdate,
        check_round_trip.after(ShadowVarianceSystems::ApplySplits),
    );

    app.run();
}

fn setup(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    let material = materials.add(StandardMaterial::default());

    commands.spawn((
        Mesh3d(meshes.add(Plane3d::default().mesh().size(100.0, 100.0))),
        MeshMaterial3d(material.clone()),
    ));

    let cube = meshes.add(Cuboid::new(1.0, 3.0, 1.0));
    for i in 0..16 {
        let x = (i % 4) as f32 * 4.0 - 6.0;
        let z = (i / 4) as f32 * 4.0 - 6.0;

        commands.spawn((
            Mesh3d(cube.clone()),
            MeshMaterial3d(material.clone()),
            Transform::from_xyz(x, 1.5, z),
        ));
    }

    commands.spawn((
        DirectionalLight {
            shadows_enabled: true,
            ..default()
        },
        Transform::from_xyz(8.0, 16.0, 6.0).looking_at(Vec3::ZERO, Vec3::Y),
        CascadeShadowConfigBuilder {
            num_cascades: CASCADE_COUNT,
            maximum_distance: MAX_DISTANCE,
            ..default()
        }.build(),
        Sun,
    ));

    commands.spawn((
        Camera3d::default(),
        Transform::from_xyz(0.0, 6.0, 18.0).looking_at(Vec3::ZERO, Vec3::Y),
        Tonemapping::None,
        ShadowVarianceOptimizer,
        ShadowVarianceSettings {
            frames_per_dispatch: 1,
            debug_mode: true,
            ..default()
        },
    ));
}

fn check_round_trip(
    harness: Res<TestHarness>,
    frame_count: Res<FrameCount>,
    splits: Res<CascadeSplitSettings>,
    optimizers: Query<(
        Option<&ShadowVarianceRuntime>,
        Option<&ShadowVarianceReport>,
        Option<&ShadowVarianceDisabled>,
    )>,
    lights: Query<&CascadeShadowConfig, With<Sun>>,
    mut exit: EventWriter<AppExit>,
) {
    let Ok((runtime, report, disabled)) = optimizers.single() else {
        return;
    };

    if let Some(disabled) = disabled {
        panic!("optimizer disabled on a gpu backend: {}", disabled.reason);
    }

    // splits are only written by a readback that decoded successfully
    let Some(current) = splits.0 else {
        assert!(
            frame_count.0 < harness.max_frames,
            "no variance readback completed within {} frames",
            harness.max_frames,
        );
        return;
    };

    let runtime = runtime.expect("runtime stays attached after a completed round");
    assert!(runtime.is_active());

    let report = report.expect("report attached");
    assert!(report.last_variance.0.iter().all(|v| v.is_finite() && *v >= 0.0));

    let [a, b, c] = current.0;
    assert!(0.0 < a && a < b && b < c && c < 1.0, "splits out of order: {current}");

    let config = lights.single().expect("sun");
    assert_eq!(config.bounds.len(), CASCADE_COUNT);
    assert!((config.bounds[0] - a * MAX_DISTANCE).abs() < 1e-2, "{:?}", config.bounds);

    info!(frame = frame_count.0, "variance round trip completed: {current}");
    exit.write(AppExit::Success);
}
