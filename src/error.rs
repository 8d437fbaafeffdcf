use thiserror::Error;

use crate::{plot::PlotId, scene::SceneId};

/// Errors raised while applying host messages.
///
/// Every variant is a protocol violation: the host and renderer disagree about
/// the shape of the scene graph. Stale references (deleting an id twice, asking
/// the atlas for a glyph it never saw) are logged and are not errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("sequence number {0} was already submitted")]
    DuplicateSequence(u64),
    #[error("invalid sequence number: {0}")]
    InvalidSequence(String),
    #[error("unknown camera space `{0}`")]
    UnknownSpace(String),
    #[error("unknown plot type `{0}`")]
    UnknownPlotType(String),
    #[error("plot {plot} has no buffer named `{name}`")]
    UnknownBuffer { plot: PlotId, name: String },
    #[error("scene {0} does not exist")]
    UnknownScene(SceneId),
    #[error("scene {0} already exists")]
    DuplicateScene(SceneId),
    #[error("plot {0} already exists")]
    DuplicatePlot(PlotId),
    #[error("invalid value for `{name}`: {reason}")]
    InvalidValue { name: String, reason: String },
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidValue {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
