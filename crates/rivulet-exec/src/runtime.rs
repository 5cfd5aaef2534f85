//! Runtime: wire nodes into a graph, run it to completion, return a report.
//!
//! A `Pipeline` owns the nodes and the port endpoints between them. `run`
//! builds the per-run resources (memory budget, spill storage, temp space,
//! cancel token), initializes every node, then hands the graph to the
//! scheduler. Node configuration errors surface before any record moves.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use rivulet_core::attributes::Attributes;
use rivulet_core::config::EngineConfig;
use rivulet_core::hash::{hash_serde, Hash256};
use rivulet_core::id::RunId;
use rivulet_core::schema::Schema;
use rivulet_core::types::Record;

use rivulet_io::{build_storage, TempSpace};
use rivulet_mem::{MemoryBudgetImpl, PeakTracker};

use rivulet_operators::port::{channel, NullOutput, VecInput, VecOutput};
use rivulet_operators::registry::Registry;
use rivulet_operators::{CancelToken, InputPort, Node, NodeContext, NodeIo, OpError, OutputPort, PortSchemas};

use crate::report::RunReport;
use crate::scheduler::{run_tasks, NodeTask};
use crate::{adapters, metrics};

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("operator registry: {0}")]
    Registry(String),
    #[error("invalid graph: {0}")]
    Invalid(String),
    #[error("node '{node}' failed: {source}")]
    Node {
        node: String,
        #[source]
        source: OpError,
    },
    #[error("engine config: {0}")]
    Config(#[from] rivulet_core::error::Error),
    #[error("io: {0}")]
    Io(#[from] rivulet_io::Error),
    #[error("hashing error: {0}")]
    Hash(String),
}

pub type Result<T> = std::result::Result<T, ExecError>;

struct Slot {
    name: String,
    node: Box<dyn Node>,
    attrs: Option<Attributes>,
    inputs: Vec<Option<Box<dyn InputPort>>>,
    outputs: Vec<Option<Box<dyn OutputPort>>>,
}

#[derive(Debug, Clone, Serialize)]
struct Edge {
    from: String,
    from_port: usize,
    to: String,
    to_port: usize,
}

#[derive(Serialize)]
struct Fingerprint<'a> {
    config: &'a EngineConfig,
    nodes: Vec<(&'a str, &'a str, Option<&'a Attributes>)>,
    edges: &'a [Edge],
}

pub struct Pipeline {
    config: EngineConfig,
    registry: Registry,
    slots: Vec<Slot>,
    index: HashMap<String, usize>,
    edges: Vec<Edge>,
    cancel: CancelToken,
}

impl Pipeline {
    /// Empty graph with the built-in operators and file adapters registered.
    pub fn new(config: EngineConfig) -> Self {
        let mut registry = Registry::new();
        adapters::register(&mut registry);
        Self::with_registry(config, registry)
    }

    pub fn with_registry(config: EngineConfig, registry: Registry) -> Self {
        Self {
            config,
            registry,
            slots: Vec::new(),
            index: HashMap::new(),
            edges: Vec::new(),
            cancel: CancelToken::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Token that cancels the run when triggered from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn add_node(&mut self, name: impl Into<String>, node: Box<dyn Node>) -> Result<()> {
        self.push(name.into(), node, None)
    }

    /// Build a node through the registry and add it.
    pub fn add_component(
        &mut self,
        name: impl Into<String>,
        component_type: &str,
        attrs: &Attributes,
        ports: PortSchemas,
    ) -> Result<()> {
        let name = name.into();
        if !self.registry.contains(component_type) {
            return Err(ExecError::Registry(format!(
                "unknown component type '{component_type}' for node '{name}'"
            )));
        }
        let node = self
            .registry
            .make(component_type, attrs, ports)
            .map_err(|source| ExecError::Node {
                node: name.clone(),
                source,
            })?;
        self.push(name, node, Some(attrs.clone()))
    }

    fn push(&mut self, name: String, node: Box<dyn Node>, attrs: Option<Attributes>) -> Result<()> {
        if self.index.contains_key(&name) {
            return Err(ExecError::Invalid(format!("duplicate node name '{name}'")));
        }
        let ports = node.ports();
        let inputs = (0..ports.inputs.len()).map(|_| None).collect();
        let outputs = (0..ports.outputs.len()).map(|_| None).collect();
        self.index.insert(name.clone(), self.slots.len());
        self.slots.push(Slot {
            name,
            node,
            attrs,
            inputs,
            outputs,
        });
        Ok(())
    }

    fn slot(&self, name: &str) -> Result<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| ExecError::Invalid(format!("no node named '{name}'")))
    }

    fn input_schema(&self, node: usize, port: usize) -> Result<&Schema> {
        let slot = &self.slots[node];
        match slot.inputs.get(port) {
            Some(None) => Ok(&slot.node.ports().inputs[port]),
            Some(Some(_)) => Err(ExecError::Invalid(format!(
                "input port {port} of '{}' is already connected",
                slot.name
            ))),
            None => Err(ExecError::Invalid(format!(
                "'{}' has no input port {port}",
                slot.name
            ))),
        }
    }

    fn output_schema(&self, node: usize, port: usize) -> Result<&Schema> {
        let slot = &self.slots[node];
        match slot.outputs.get(port) {
            Some(None) => Ok(&slot.node.ports().outputs[port]),
            Some(Some(_)) => Err(ExecError::Invalid(format!(
                "output port {port} of '{}' is already connected",
                slot.name
            ))),
            None => Err(ExecError::Invalid(format!(
                "'{}' has no output port {port}",
                slot.name
            ))),
        }
    }

    /// Connect `from`'s output port to `to`'s input port with a bounded
    /// channel. Field types must line up position by position.
    pub fn connect(&mut self, from: &str, from_port: usize, to: &str, to_port: usize) -> Result<()> {
        let (src, dst) = (self.slot(from)?, self.slot(to)?);
        if src == dst {
            return Err(ExecError::Invalid(format!("'{from}' cannot feed itself")));
        }
        check_edge_schemas(
            self.output_schema(src, from_port)?,
            self.input_schema(dst, to_port)?,
        )
        .map_err(|msg| ExecError::Invalid(format!("{from}.{from_port} -> {to}.{to_port}: {msg}")))?;

        let (tx, rx) = channel(self.config.port_capacity);
        self.slots[src].outputs[from_port] = Some(Box::new(tx));
        self.slots[dst].inputs[to_port] = Some(Box::new(rx));
        self.edges.push(Edge {
            from: from.to_string(),
            from_port,
            to: to.to_string(),
            to_port,
        });
        Ok(())
    }

    pub fn attach_input(&mut self, node: &str, port: usize, input: Box<dyn InputPort>) -> Result<()> {
        let idx = self.slot(node)?;
        self.input_schema(idx, port)?;
        self.slots[idx].inputs[port] = Some(input);
        Ok(())
    }

    pub fn attach_output(&mut self, node: &str, port: usize, output: Box<dyn OutputPort>) -> Result<()> {
        let idx = self.slot(node)?;
        self.output_schema(idx, port)?;
        self.slots[idx].outputs[port] = Some(output);
        Ok(())
    }

    /// Feed an in-memory record list into an input port.
    pub fn feed(&mut self, node: &str, port: usize, records: Vec<Record>) -> Result<()> {
        self.attach_input(node, port, Box::new(VecInput::new(records)))
    }

    /// Capture an output port in memory; read it back after `run`.
    pub fn drain(&mut self, node: &str, port: usize) -> Result<VecOutput> {
        let out = VecOutput::new();
        self.attach_output(node, port, Box::new(out.clone()))?;
        Ok(out)
    }

    /// Check the wiring: every input port attached and no cycles.
    pub fn validate(&self) -> Result<()> {
        for slot in &self.slots {
            if let Some(port) = slot.inputs.iter().position(Option::is_none) {
                return Err(ExecError::Invalid(format!(
                    "input port {port} of '{}' is not connected",
                    slot.name
                )));
            }
        }
        self.check_acyclic()
    }

    fn check_acyclic(&self) -> Result<()> {
        let mut indegree = vec![0usize; self.slots.len()];
        let mut next: Vec<Vec<usize>> = vec![Vec::new(); self.slots.len()];
        for edge in &self.edges {
            let (a, b) = (self.slot(&edge.from)?, self.slot(&edge.to)?);
            next[a].push(b);
            indegree[b] += 1;
        }
        let mut ready: VecDeque<usize> = (0..self.slots.len()).filter(|&i| indegree[i] == 0).collect();
        let mut seen = 0;
        while let Some(i) = ready.pop_front() {
            seen += 1;
            for &j in &next[i] {
                indegree[j] -= 1;
                if indegree[j] == 0 {
                    ready.push_back(j);
                }
            }
        }
        if seen != self.slots.len() {
            return Err(ExecError::Invalid("graph contains a cycle".into()));
        }
        Ok(())
    }

    /// Fingerprint of the engine config, nodes, attributes and edges.
    pub fn config_hash(&self) -> Result<Hash256> {
        let fp = Fingerprint {
            config: &self.config,
            nodes: self
                .slots
                .iter()
                .map(|s| (s.name.as_str(), s.node.component_type(), s.attrs.as_ref()))
                .collect(),
            edges: &self.edges,
        };
        hash_serde(&fp).map_err(|e| ExecError::Hash(e.to_string()))
    }

    /// Validate the wiring and initialize every node without running it.
    pub fn check(mut self) -> Result<()> {
        self.validate()?;
        self.config.validate()?;
        let root = NodeContext::standalone("check", self.config.clone())
            .map_err(|source| ExecError::Node {
                node: "check".into(),
                source,
            })?;
        let result = init_all(&mut self.slots, &root);
        for slot in &mut self.slots {
            slot.node.free();
        }
        cleanup(root.temp());
        result
    }

    /// Run the graph to completion. A node failure cancels the run and is
    /// returned as `ExecError::Node`; the report is still emitted to metrics.
    pub fn run(self) -> Result<RunReport> {
        let (report, failure) = self.launch()?;
        match failure {
            Some((node, source)) => Err(ExecError::Node { node, source }),
            None => Ok(report),
        }
    }

    /// Like `run`, but node failures only show up in the report.
    pub fn run_to_report(self) -> Result<RunReport> {
        Ok(self.launch()?.0)
    }

    fn launch(mut self) -> Result<(RunReport, Option<(String, OpError)>)> {
        self.validate()?;
        self.config.validate()?;
        let config_hash = self.config_hash()?;

        let run_id = RunId::random();
        let storage = build_storage(&self.config)?;
        let temp = TempSpace::from_config(&self.config, run_id)?;
        let budget = MemoryBudgetImpl::new(self.config.mem_cap_bytes);
        let root = NodeContext::new(
            "pipeline",
            Arc::new(self.config.clone()),
            budget,
            storage,
            temp.clone(),
            self.cancel.clone(),
        );

        #[cfg(feature = "tracing")]
        tracing::info!(run = %run_id, nodes = self.slots.len(), config = %config_hash.short(), "run starting");

        if let Err(e) = init_all(&mut self.slots, &root) {
            for slot in &mut self.slots {
                slot.node.free();
            }
            cleanup(&temp);
            return Err(e);
        }

        let tasks = self
            .slots
            .into_iter()
            .map(|slot| NodeTask {
                io: NodeIo::new(
                    slot.inputs.into_iter().flatten().collect(),
                    slot.outputs
                        .into_iter()
                        .map(|out| match out {
                            Some(port) => port,
                            None => Box::new(NullOutput::default()),
                        })
                        .collect(),
                ),
                name: slot.name,
                node: slot.node,
            })
            .collect();

        let report = RunReport::new(run_id, config_hash);
        let peak = PeakTracker::new();
        let outcomes = run_tasks(tasks, &root, &peak);
        cleanup(&temp);

        let mut failure = None;
        let mut nodes = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            metrics::emit_node(&outcome.report);
            if let (None, Some(e)) = (&failure, outcome.error) {
                failure = Some((outcome.report.name.clone(), e));
            }
            nodes.push(outcome.report);
        }
        let report = report.finish(peak.peak(), nodes);
        metrics::emit_run(&report);
        Ok((report, failure))
    }
}

fn init_all(slots: &mut [Slot], root: &NodeContext) -> Result<()> {
    for slot in slots {
        let ctx = root.for_node(&slot.name);
        slot.node.init(&ctx).map_err(|source| ExecError::Node {
            node: slot.name.clone(),
            source,
        })?;
    }
    Ok(())
}

fn check_edge_schemas(out: &Schema, input: &Schema) -> std::result::Result<(), String> {
    if out.len() != input.len() {
        return Err(format!("{} fields feed a port expecting {}", out.len(), input.len()));
    }
    for (a, b) in out.fields.iter().zip(&input.fields) {
        if a.data_type != b.data_type {
            return Err(format!(
                "field '{}' is {:?} but '{}' expects {:?}",
                a.name, a.data_type, b.name, b.data_type
            ));
        }
    }
    Ok(())
}

fn cleanup(temp: &TempSpace) {
    if let Err(_e) = temp.cleanup() {
        #[cfg(feature = "tracing")]
        tracing::warn!(error = %_e, "failed to remove temp space");
    }
}
