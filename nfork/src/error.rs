use thiserror::Error;

/// Errors surfaced by the administrative surface. Data-plane failures are
/// classified and recorded instead (see `classify`); they never use this type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] http::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Validation(String),

    #[error("unknown inbound '{0}'")]
    UnknownInbound(String),

    #[error("unknown outbound '{outbound}' for inbound '{inbound}'")]
    UnknownOutbound { inbound: String, outbound: String },

    #[error("inbound '{0}' already exists")]
    InboundExists(String),

    #[error("can't remove active outbound '{outbound}' for inbound '{inbound}'")]
    RemoveActive { inbound: String, outbound: String },

    #[error("unable to listen on '{listen}': {source}")]
    Bind {
        listen: String,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
