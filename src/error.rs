use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Teloxide request error: {0}")]
    Teloxide(#[from] teloxide::RequestError),

    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),
}

/// Terminal failure of the retrieval executor: either no strategy could run
/// at all, or every strategy in the ordered list has been exhausted.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("failed to launch {bin}: {source}")]
    Launch {
        bin: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{kind}: {detail}")]
    Exhausted { kind: FailureKind, detail: String },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureKind {
    Blocked,
    Network,
    Unsupported,
    Postprocess,
    Unknown,
}

impl FailureKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Blocked => "blocked by source",
            Self::Network => "network error",
            Self::Unsupported => "unsupported URL",
            Self::Postprocess => "post-processing failed",
            Self::Unknown => "download error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
