//! Error types for quarto-cite-gateway

use crate::key::ItemKey;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid item key: '{0}'")]
    InvalidKey(String),

    #[error("No item found for key '{0}'")]
    ItemNotFound(ItemKey),

    #[error("Item '{0}' is neither registered locally nor present in the library")]
    UnknownItem(String),

    #[error("Style not found: {0}")]
    StyleNotFound(String),

    #[error("No citation engine has been instantiated")]
    NoActiveEngine,

    #[error("Citation engine error: {0}")]
    Engine(String),

    #[error("Citation engine protocol error: {0}")]
    EngineProtocol(String),

    #[error("Invalid citation cluster: {0}")]
    InvalidCitation(String),

    #[error("Invalid local item: {0}")]
    InvalidItem(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Host error: {0}")]
    Host(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(
        "Gateway config version {found} is newer than supported version {supported}. Please upgrade quarto-cite-gateway."
    )]
    ConfigVersionTooNew { found: u32, supported: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
