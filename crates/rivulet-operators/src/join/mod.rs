//! Two-input (and N-input) joining nodes.

pub mod cross;
pub mod foreign_key;
pub mod hash;
pub mod intersection;
pub mod merge;

pub use cross::CrossJoin;
pub use foreign_key::CheckForeignKey;
pub use hash::{HashJoin, JoinType};
pub use intersection::DataIntersection;

use crate::port::OutputPort;
use crate::transform::{settle, Emit, TransformResult};
use crate::traits::Result;

/// Settle a transform result and write the record, if any, to `out`.
pub(crate) fn write_emit(
    out: &mut dyn OutputPort,
    node: &str,
    res: TransformResult<Emit>,
) -> Result<()> {
    if let Some(record) = settle(node, res)?.and_then(Emit::into_record) {
        out.write(record)?;
    }
    Ok(())
}
