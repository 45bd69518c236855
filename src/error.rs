use std::path::PathBuf;

use thiserror::Error;


pub type ShadowVarianceResult<T> = std::result::Result<T, ShadowVarianceError>;


#[derive(Debug, Error)]
pub enum ShadowVarianceError {
    /// The render sub-app needed for the estimator is not running.
    #[error("render pipeline unavailable; shadow variance estimation requires the render app")]
    UnsupportedRenderPipeline,

    #[error("variance estimator kernel `{0}` could not be resolved")]
    EstimatorKernelMissing(&'static str),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("shadow atlas not yet bound")]
    AtlasUnavailable,

    #[error("gpu readback reported an error")]
    Transport,

    #[error("gpu readback returned {elements} elements")]
    MalformedResult {
        elements: usize,
    },

    #[error("failed to access settings file {path:?}: {source}")]
    SettingsIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings: {0}")]
    SettingsFormat(#[from] serde_json::Error),
}

impl ShadowVarianceError {
    /// Recoverable conditions stall adaptation for a round; the rest disable the optimizer.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::AtlasUnavailable
                | Self::Transport
                | Self::MalformedResult { .. }
        )
    }
}
