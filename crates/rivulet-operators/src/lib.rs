#![forbid(unsafe_code)]
//! rivulet-operators: streaming join, grouping and sorting nodes.
//!
//! Every node runs single-threaded on its own thread, reads records from
//! bounded input ports and writes to output ports. Anything that can grow
//! with the input (hash tables, sort buffers, replay files) is accounted
//! against the run's `MemoryBudgetImpl` and spills through `rivulet-mem`.

pub mod context;
pub mod port;
pub mod registry;
pub mod traits;
pub mod transform;

pub mod group;
pub mod hash_index;

pub mod denormalize;
pub mod join;
pub mod sort;

pub use context::{CancelToken, NodeContext};
pub use port::{channel, InputPort, NodeIo, OutputPort};
pub use registry::Registry;
pub use traits::{Node, OpError, Outcome, PortSchemas, Result};
pub use transform::{Emit, GroupTransform, RecordTransform, TransformError, TransformSpec};
