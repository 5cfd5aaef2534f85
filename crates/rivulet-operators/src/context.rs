//! Per-run context handed to every node.
//!
//! Built once per run by the driver and cloned into each node thread: the
//! memory budget, the spill storage backend, the temp-directory rotation, the
//! cancel flag and the engine config. There is no global state beyond this.

use std::cell::Cell;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use rivulet_core::config::EngineConfig;
use rivulet_core::id::{RunId, SpillId};
use rivulet_io::{build_storage, TempSpace};
use rivulet_mem::{Codec, MemoryBudgetImpl, SpillBuffer, SpillManager, Storage};

use crate::traits::{OpError, Result};

/// Shared cancellation flag, polled by nodes at every checkpoint.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Clone)]
pub struct NodeContext {
    node: String,
    config: Arc<EngineConfig>,
    budget: MemoryBudgetImpl,
    storage: Arc<dyn Storage>,
    temp: TempSpace,
    cancel: CancelToken,
    spill_seq: Arc<AtomicU64>,
    since_yield: Cell<usize>,
}

impl NodeContext {
    pub fn new(
        node: impl Into<String>,
        config: Arc<EngineConfig>,
        budget: MemoryBudgetImpl,
        storage: Arc<dyn Storage>,
        temp: TempSpace,
        cancel: CancelToken,
    ) -> Self {
        Self {
            node: node.into(),
            config,
            budget,
            storage,
            temp,
            cancel,
            spill_seq: Arc::new(AtomicU64::new(0)),
            since_yield: Cell::new(0),
        }
    }

    /// A self-contained context: own budget, storage and temp space built
    /// from `config`. For running a single node outside a pipeline.
    pub fn standalone(node: impl Into<String>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let budget = MemoryBudgetImpl::new(config.mem_cap_bytes);
        let storage = build_storage(&config)?;
        let temp = TempSpace::from_config(&config, RunId::random())?;
        Ok(Self::new(
            node,
            Arc::new(config),
            budget,
            storage,
            temp,
            CancelToken::new(),
        ))
    }

    /// Same run resources, different node name.
    pub fn for_node(&self, node: impl Into<String>) -> Self {
        let mut ctx = self.clone();
        ctx.node = node.into();
        ctx.since_yield = Cell::new(0);
        ctx
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn budget(&self) -> &MemoryBudgetImpl {
        &self.budget
    }

    pub fn temp(&self) -> &TempSpace {
        &self.temp
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Called after every processed record: fails with `Cancelled` once the
    /// run is cancelled, and yields the thread every `yield_interval` calls.
    pub fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(OpError::Cancelled);
        }
        let n = self.since_yield.get() + 1;
        if n >= self.config.yield_interval.max(1) {
            self.since_yield.set(0);
            std::thread::yield_now();
        } else {
            self.since_yield.set(n);
        }
        Ok(())
    }

    fn next_spill_id(&self) -> SpillId {
        SpillId::new(self.spill_seq.fetch_add(1, Ordering::Relaxed))
    }

    /// A fresh segment manager rooted in this node's temp directory.
    pub fn spill_manager(&self) -> Result<SpillManager> {
        let codec = Codec::parse(&self.config.spill_codec)?;
        let root = self.temp.node_dir(&self.node)?;
        Ok(SpillManager::new(
            Arc::clone(&self.storage),
            codec,
            path_string(root)?,
            self.next_spill_id(),
        ))
    }

    /// A fresh replay buffer in the next temp directory.
    pub fn spill_buffer(&self) -> Result<SpillBuffer> {
        let dir = self.temp.next_dir()?;
        Ok(SpillBuffer::create_in(dir)?)
    }
}

fn path_string(path: PathBuf) -> Result<String> {
    path.into_os_string()
        .into_string()
        .map_err(|p| OpError::Resource(format!("temp path is not UTF-8: {p:?}")))
}
