use bevy::prelude::*;
use bevy_args::{
    Deserialize,
    Parser,
    Serialize,
};
use clap::ValueEnum;


#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    ValueEnum,
)]
pub enum ViewerScene {
    /// Flat ground with randomly scattered occluders.
    #[default]
    Scatter,
    /// Only a ground plane; cascades settle at low detail.
    Ground,
    /// Dense occluder field close to the camera.
    Forest,
}


#[derive(
    Debug,
    Resource,
    Serialize,
    Deserialize,
    Parser,
)]
#[command(about = "bevy_shadow_variance viewer", version, long_about = None)]
pub struct ShadowVarianceViewer {
    #[arg(long, default_value = "true")]
    pub editor: bool,

    #[arg(long, default_value = "true")]
    pub press_esc_close: bool,

    #[arg(long, default_value = "true")]
    pub show_overlay: bool,

    #[arg(long, default_value = "1920.0")]
    pub width: f32,

    #[arg(long, default_value = "1080.0")]
    pub height: f32,

    #[arg(long, default_value = "bevy_shadow_variance")]
    pub name: String,

    /// json file with optimizer settings, overrides the flags below
    #[arg(long, default_value = "")]
    pub settings_file: String,

    #[arg(long, default_value = "3")]
    pub frames_per_dispatch: u32,

    #[arg(long, default_value = "16")]
    pub sample_count: u32,

    #[arg(long, default_value = "true")]
    pub debug_mode: bool,

    #[arg(long, value_enum, default_value_t = ViewerScene::Scatter)]
    pub scene: ViewerScene,

    #[arg(long, default_value = "64")]
    pub occluder_count: usize,
}

impl Default for ShadowVarianceViewer {
    fn default() -> ShadowVarianceViewer {
        ShadowVarianceViewer {
            editor: true,
            press_esc_close: true,
            show_overlay: true,
            width: 1920.0,
            height: 1080.0,
            name: "bevy_shadow_variance".to_string(),
            settings_file: "".to_string(),
            frames_per_dispatch: 3,
            sample_count: 16,
            debug_mode: true,
            scene: ViewerScene::Scatter,
            occluder_count: 64,
        }
    }
}


pub fn setup_hooks() {
    #[cfg(debug_assertions)]
    #[cfg(target_arch = "wasm32")]
    {
        console_error_panic_hook::set_once();
    }
}
