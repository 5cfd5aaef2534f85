//! Node lifecycle + common interfaces.
//!
//! The driver in `rivulet-exec` (or a test) calls, in order:
//! `init` → `pre_execute` → `execute` → `post_execute` → `free`.
//! `init` validates attributes and builds record keys before any record is
//! read, so configuration errors never surface mid-stream.

use rivulet_core::schema::Schema;
use thiserror::Error;

use crate::context::NodeContext;
use crate::port::NodeIo;

pub type Result<T> = std::result::Result<T, OpError>;

#[derive(Debug, Error)]
pub enum OpError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("input ordering violation: {0}")]
    OrderViolation(String),

    #[error("resource error: {0}")]
    Resource(String),

    #[error("transform failed: {0}")]
    Transform(String),

    #[error("port error: {0}")]
    Port(String),

    #[error("execution error: {0}")]
    Exec(String),

    /// Raised by `NodeContext::checkpoint`; the driver reports it as
    /// [`Outcome::Aborted`], never as a failure.
    #[error("cancelled")]
    Cancelled,
}

impl From<rivulet_core::error::Error> for OpError {
    fn from(e: rivulet_core::error::Error) -> Self {
        use rivulet_core::error::Error as E;
        match e {
            E::Config(m) | E::Key(m) | E::Schema(m) => OpError::Config(m),
            other => OpError::Exec(other.to_string()),
        }
    }
}

impl From<rivulet_mem::error::Error> for OpError {
    fn from(e: rivulet_mem::error::Error) -> Self {
        OpError::Resource(e.to_string())
    }
}

impl From<rivulet_io::Error> for OpError {
    fn from(e: rivulet_io::Error) -> Self {
        OpError::Resource(e.to_string())
    }
}

/// How a completed `execute` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Finished,
    Aborted,
}

/// Port schemas of one node, fixed at construction.
#[derive(Debug, Clone, Default)]
pub struct PortSchemas {
    pub inputs: Vec<Schema>,
    pub outputs: Vec<Schema>,
}

impl PortSchemas {
    pub fn new(inputs: Vec<Schema>, outputs: Vec<Schema>) -> Self {
        Self { inputs, outputs }
    }

    pub fn input(&self, idx: usize) -> Result<&Schema> {
        self.inputs
            .get(idx)
            .ok_or_else(|| OpError::Config(format!("input port {idx} is not connected")))
    }

    pub fn output(&self, idx: usize) -> Result<&Schema> {
        self.outputs
            .get(idx)
            .ok_or_else(|| OpError::Config(format!("output port {idx} is not connected")))
    }

    /// Fail unless the port counts fall within the given bounds.
    pub fn expect(&self, inputs: (usize, usize), outputs: (usize, usize)) -> Result<()> {
        let n_in = self.inputs.len();
        let n_out = self.outputs.len();
        if n_in < inputs.0 || n_in > inputs.1 {
            return Err(OpError::Config(format!(
                "expected {}..={} input ports, got {n_in}",
                inputs.0, inputs.1
            )));
        }
        if n_out < outputs.0 || n_out > outputs.1 {
            return Err(OpError::Config(format!(
                "expected {}..={} output ports, got {n_out}",
                outputs.0, outputs.1
            )));
        }
        Ok(())
    }
}

/// Trait that all graph nodes implement.
///
/// Invariants:
/// - Large in-memory state (hash tables, sort buffers) is accounted against
///   the run's budget through `ctx.budget()`.
/// - `execute` reads its inputs to EOF (or until cancelled) and calls
///   `io.broadcast_eof()` exactly once on success.
/// - `free` is idempotent and removes every temp file the node created.
pub trait Node: Send {
    /// Stable component type, e.g. `HASH_JOIN`.
    fn component_type(&self) -> &'static str;

    fn ports(&self) -> &PortSchemas;

    fn init(&mut self, ctx: &NodeContext) -> Result<()>;

    /// Per-run reset. Runs before every `execute`.
    fn pre_execute(&mut self, _ctx: &NodeContext) -> Result<()> {
        Ok(())
    }

    fn execute(&mut self, io: &mut NodeIo, ctx: &NodeContext) -> Result<Outcome>;

    fn post_execute(&mut self, _ctx: &NodeContext) -> Result<()> {
        Ok(())
    }

    fn free(&mut self);

    /// Bytes this node wrote to temp storage during the last `execute`.
    fn spilled_bytes(&self) -> u64 {
        0
    }
}

/// Turn the body of an `execute` into its outcome.
///
/// Cancellation, and any error raised while the run is being cancelled
/// (a peer closing its ports mid-stream), becomes `Aborted`. On success EOF
/// is broadcast to every output.
pub fn finish(io: &mut NodeIo, ctx: &NodeContext, body: Result<()>) -> Result<Outcome> {
    match body {
        Ok(()) => {
            io.broadcast_eof()?;
            Ok(Outcome::Finished)
        }
        Err(OpError::Cancelled) => Ok(Outcome::Aborted),
        Err(_) if ctx.is_cancelled() => Ok(Outcome::Aborted),
        Err(e) => Err(e),
    }
}
