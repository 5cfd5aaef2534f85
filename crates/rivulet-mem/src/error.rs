use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The shared run budget could not grant the bytes.
    #[error("memory budget refused {requested} bytes for '{tag}' ({used} of {capacity} bytes in use)")]
    BudgetRefused {
        tag: &'static str,
        requested: usize,
        capacity: usize,
        used: usize,
    },

    #[error("spill storage: {0}")]
    Storage(String),

    /// Framing or I/O problem in a replay buffer file.
    #[error("spill buffer: {0}")]
    Buffer(String),

    #[error("unknown spill codec '{0}'")]
    UnknownCodec(String),

    #[error("spill codec '{0}' is not compiled in; enable the '{0}' feature")]
    CodecDisabled(&'static str),

    #[error("{codec} codec: {msg}")]
    Codec { codec: &'static str, msg: String },

    #[error("spill segment '{0}' failed its checksum")]
    ChecksumMismatch(String),
}
