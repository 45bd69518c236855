use bevy::{
    prelude::*,
    pbr::CascadeShadowConfig,
};

use bevy_shadow_variance::{
    CascadeDetail,
    CascadeSplitSettings,
    CascadeSplits,
    ReadbackResult,
    ReadbackTicket,
    ShadowDetailKeywords,
    ShadowVarianceDisabled,
    ShadowVarianceOptimizer,
    ShadowVarianceReport,
    ShadowVarianceRuntime,
    ShadowVarianceSettings,
    render::{
        VarianceCompletion,
        VarianceJobQueue,
        VarianceReadbackChannel,
    },
};

use _harness::{
    TestHarness,
    test_harness_app,
};

mod _harness;


fn test_settings(frames_per_dispatch: u32) -> ShadowVarianceSettings {
    ShadowVarianceSettings {
        frames_per_dispatch,
        debug_mode: false,
        ..default()
    }
}

fn spawn_scene(app: &mut App, settings: ShadowVarianceSettings) -> (Entity, Entity) {
    let camera = app.world_mut()
        .spawn((
            Camera3d::default(),
            ShadowVarianceOptimizer,
            settings,
        ))
        .id();

    let light = app.world_mut()
        .spawn(DirectionalLight {
            shadows_enabled: true,
            ..default()
        })
        .id();

    (camera, light)
}

fn latest_ticket(app: &App) -> ReadbackTicket {
    app.world()
        .resource::<VarianceJobQueue>()
        .jobs
        .last()
        .and_then(|job| job.ticket)
        .expect("a ticketed job")
}

fn complete(app: &App, camera: Entity, ticket: ReadbackTicket, variance: [f32; 4]) {
    app.world()
        .resource::<VarianceReadbackChannel>()
        .sender()
        .send(VarianceCompletion {
            camera,
            ticket,
            result: ReadbackResult::texels(vec![variance]),
        })
        .expect("channel open");
}


#[test]
fn test_disabled_without_render_pipeline() {
    let mut app = test_harness_app(TestHarness {
        render_pipeline: false,
    });

    let (camera, _) = spawn_scene(&mut app, test_settings(1));
    app.update();

    let disabled = app.world().get::<ShadowVarianceDisabled>(camera).expect("disabled marker");
    assert!(disabled.reason.contains("render pipeline"));
    assert!(app.world().get::<ShadowVarianceRuntime>(camera).is_none());
    assert!(app.world().resource::<VarianceJobQueue>().jobs.is_empty());
}


#[test]
fn test_disabled_on_invalid_settings() {
    let mut app = test_harness_app(TestHarness {
        render_pipeline: true,
    });

    let (camera, _) = spawn_scene(&mut app, ShadowVarianceSettings {
        sample_count: 0,
        ..test_settings(1)
    });
    app.update();

    assert!(app.world().get::<ShadowVarianceDisabled>(camera).is_some());
    assert!(app.world().get::<ShadowVarianceRuntime>(camera).is_none());
}


#[test]
fn test_disabled_without_camera() {
    let mut app = test_harness_app(TestHarness {
        render_pipeline: true,
    });

    let entity = app.world_mut().spawn(ShadowVarianceOptimizer).id();
    app.update();

    assert!(app.world().get::<ShadowVarianceSettings>(entity).is_some());
    assert!(app.world().get::<ShadowVarianceDisabled>(entity).is_some());
}


#[test]
fn test_dispatch_follows_frame_cadence() {
    let mut app = test_harness_app(TestHarness {
        render_pipeline: true,
    });

    spawn_scene(&mut app, test_settings(3));

    app.update();
    app.update();
    assert!(app.world().resource::<VarianceJobQueue>().jobs.is_empty());

    app.update();
    let queue = app.world().resource::<VarianceJobQueue>();
    assert_eq!(queue.jobs.len(), 1);
    assert_eq!(queue.jobs[0].sample_count, Some(16));

    for _ in 0..6 {
        app.update();
    }
    assert_eq!(app.world().resource::<VarianceJobQueue>().jobs.len(), 1);
}


#[test]
fn test_no_dispatch_without_shadow_casting_light() {
    let mut app = test_harness_app(TestHarness {
        render_pipeline: true,
    });

    let (camera, light) = spawn_scene(&mut app, test_settings(1));
    app.world_mut().get_mut::<DirectionalLight>(light).unwrap().shadows_enabled = false;

    for _ in 0..4 {
        app.update();
    }

    assert!(app.world().resource::<VarianceJobQueue>().jobs.is_empty());
    let report = app.world().get::<ShadowVarianceReport>(camera).expect("report");
    assert!(!report.pending);
    assert_eq!(report.frame, 4);
}


#[test]
fn test_readback_drives_keywords_and_light_cascades() {
    let mut app = test_harness_app(TestHarness {
        render_pipeline: true,
    });

    let (camera, light) = spawn_scene(&mut app, test_settings(1));
    let max_distance = *app.world()
        .get::<CascadeShadowConfig>(light)
        .unwrap()
        .bounds
        .last()
        .unwrap();

    app.update();
    complete(&app, camera, latest_ticket(&app), [0.2, 0.2, 0.01, 0.0]);
    app.update();

    let report = app.world().get::<ShadowVarianceReport>(camera).unwrap();
    assert_eq!(
        report.states.0,
        [CascadeDetail::Mid, CascadeDetail::Mid, CascadeDetail::Low, CascadeDetail::Low],
    );
    assert_eq!(report.last_variance.0, [0.2, 0.2, 0.01, 0.0]);

    let splits = app.world().resource::<CascadeSplitSettings>().0.expect("splits written");
    assert_eq!(splits, CascadeSplits::from_states(&report.states));

    let bounds = &app.world().get::<CascadeShadowConfig>(light).unwrap().bounds;
    assert_eq!(bounds.len(), 4);
    assert_eq!(bounds[3], max_distance);
    assert!((bounds[0] - 0.1 * max_distance).abs() < 1e-3);
    assert!((bounds[2] - splits.0[2] * max_distance).abs() < 1e-3);

    assert_eq!(app.world().resource::<ShadowDetailKeywords>().iter().count(), 0);

    complete(&app, camera, latest_ticket(&app), [0.01, 0.2, 0.01, 0.0]);
    app.update();

    let keywords = app.world().resource::<ShadowDetailKeywords>();
    assert!(keywords.is_enabled("SHADOWS_CASCADE_LOW_DETAIL_0"));
    assert!(!keywords.is_enabled("SHADOWS_CASCADE_LOW_DETAIL_1"));

    let report = app.world().get::<ShadowVarianceReport>(camera).unwrap();
    assert_eq!(report.states.get(1), CascadeDetail::High);
}


#[test]
fn test_stale_ticket_changes_nothing() {
    let mut app = test_harness_app(TestHarness {
        render_pipeline: true,
    });

    let (camera, _) = spawn_scene(&mut app, test_settings(1));

    app.update();
    let ticket = latest_ticket(&app);
    complete(&app, camera, ReadbackTicket(ticket.0 + 100), [0.2; 4]);
    app.update();

    assert_eq!(app.world().resource::<CascadeSplitSettings>().0, None);
    let report = app.world().get::<ShadowVarianceReport>(camera).unwrap();
    assert!(report.pending);
    assert_eq!(report.states.0, [CascadeDetail::Low; 4]);
}


#[test]
fn test_removing_optimizer_releases_target_and_drops_late_results() {
    let mut app = test_harness_app(TestHarness {
        render_pipeline: true,
    });

    let (camera, _) = spawn_scene(&mut app, test_settings(1));
    app.update();

    let target = app.world()
        .get::<ShadowVarianceRuntime>(camera)
        .and_then(|runtime| runtime.target().cloned())
        .expect("variance target");
    assert!(app.world().resource::<Assets<Image>>().contains(&target));

    let ticket = latest_ticket(&app);
    app.world_mut().entity_mut(camera).remove::<ShadowVarianceOptimizer>();
    app.update();

    assert!(app.world().get::<ShadowVarianceRuntime>(camera).is_none());
    assert!(app.world().get::<ShadowVarianceReport>(camera).is_none());
    assert!(!app.world().resource::<Assets<Image>>().contains(&target));

    complete(&app, camera, ticket, [0.2; 4]);
    app.update();

    assert_eq!(app.world().resource::<CascadeSplitSettings>().0, None);
}


#[test]
fn test_reinserting_optimizer_in_one_frame_reactivates() {
    let mut app = test_harness_app(TestHarness {
        render_pipeline: true,
    });

    let (camera, _) = spawn_scene(&mut app, test_settings(1));
    app.update();

    let old_target = app.world()
        .get::<ShadowVarianceRuntime>(camera)
        .and_then(|runtime| runtime.target().cloned())
        .expect("variance target");

    app.world_mut().entity_mut(camera).remove::<ShadowVarianceOptimizer>();
    app.world_mut().entity_mut(camera).insert(ShadowVarianceOptimizer);
    app.update();
    app.update();

    let runtime = app.world().get::<ShadowVarianceRuntime>(camera).expect("runtime after re-insert");
    assert!(runtime.is_active());
    assert!(runtime.outstanding().is_some());
    assert_ne!(runtime.target(), Some(&old_target));
    assert!(app.world().get::<ShadowVarianceDisabled>(camera).is_none());
    assert!(app.world().get::<ShadowVarianceReport>(camera).is_some());
    assert!(!app.world().resource::<Assets<Image>>().contains(&old_target));

    // the round issued before removal belongs to the old runtime
    let ticket = app.world().resource::<VarianceJobQueue>().jobs[0].ticket.expect("ticket");
    complete(&app, camera, ticket, [0.2; 4]);
    app.update();
    assert_eq!(app.world().resource::<CascadeSplitSettings>().0, None);

    complete(&app, camera, latest_ticket(&app), [0.2; 4]);
    app.update();
    assert!(app.world().resource::<CascadeSplitSettings>().0.is_some());
}


#[test]
fn test_lights_added_later_pick_up_current_splits() {
    let mut app = test_harness_app(TestHarness {
        render_pipeline: true,
    });

    let (camera, _) = spawn_scene(&mut app, test_settings(1));

    app.update();
    complete(&app, camera, latest_ticket(&app), [0.01, 0.2, 0.2, 0.2]);
    app.update();

    let splits = app.world().resource::<CascadeSplitSettings>().0.expect("splits written");
    assert!((splits.0[0] - 0.12).abs() < 1e-6);

    let late_light = app.world_mut()
        .spawn(DirectionalLight {
            shadows_enabled: true,
            ..default()
        })
        .id();
    let unshadowed_light = app.world_mut()
        .spawn(DirectionalLight {
            shadows_enabled: false,
            ..default()
        })
        .id();
    let default_bounds = app.world().get::<CascadeShadowConfig>(unshadowed_light).unwrap().bounds.clone();

    for _ in 0..3 {
        app.update();
    }

    let assert_split_bounds = |light: Entity, app: &App| {
        let max_distance = *default_bounds.last().unwrap();
        let bounds = &app.world().get::<CascadeShadowConfig>(light).unwrap().bounds;
        assert_eq!(bounds.len(), 4);
        for (bound, expected) in bounds.iter().zip(splits.to_cascade_bounds(max_distance)) {
            assert!((bound - expected).abs() < 1e-3, "{bounds:?}");
        }
    };

    assert_split_bounds(late_light, &app);
    assert_eq!(app.world().get::<CascadeShadowConfig>(unshadowed_light).unwrap().bounds, default_bounds);

    app.world_mut().get_mut::<DirectionalLight>(unshadowed_light).unwrap().shadows_enabled = true;
    app.update();

    assert_split_bounds(unshadowed_light, &app);
}
