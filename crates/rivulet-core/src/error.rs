use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while describing a graph: all of them surface before any
/// record moves.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad engine config or node attribute; the message names the setting.
    #[error("configuration: {0}")]
    Config(String),

    /// Unknown data type, arity mismatch or a value that does not fit a field.
    #[error("schema: {0}")]
    Schema(String),

    /// Unknown key field, empty key, or keys that cannot be compared.
    #[error("record key: {0}")]
    Key(String),

    #[error("fingerprint: {0}")]
    Hash(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Hash(e.to_string())
    }
}
