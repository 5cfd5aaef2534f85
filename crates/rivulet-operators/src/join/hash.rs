//! HashJoin: index the slave input in memory, stream the driver past it.
//!
//! Ports:
//! - input 0: driver, input 1: slave
//! - output 0: transform results
//! - output 1 (optional): driver records without a match, inner joins only
//!
//! The slave input is read to EOF before the first driver record is touched.

use rivulet_core::attributes::Attributes;
use rivulet_core::key::RecordKey;

use crate::context::NodeContext;
use crate::hash_index::HashIndex;
use crate::port::NodeIo;
use crate::transform::{RecordTransform, TransformSpec};
use crate::traits::{finish, Node, OpError, Outcome, PortSchemas, Result};

use super::write_emit;

pub const COMPONENT_TYPE: &str = "HASH_JOIN";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    LeftOuter,
    FullOuter,
}

impl JoinType {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inner" => Ok(JoinType::Inner),
            "leftouter" | "left_outer" | "left" => Ok(JoinType::LeftOuter),
            "fullouter" | "full_outer" | "full" => Ok(JoinType::FullOuter),
            other => Err(OpError::Config(format!("unknown joinType '{other}'"))),
        }
    }

    fn is_outer(self) -> bool {
        self != JoinType::Inner
    }
}

pub struct HashJoin {
    ports: PortSchemas,
    join_key: String,
    slave_key: Option<String>,
    join_type: JoinType,
    allow_duplicates: bool,
    table_size: Option<usize>,
    equal_null: bool,
    spec: Option<TransformSpec<dyn RecordTransform>>,

    keys: Option<(RecordKey, RecordKey)>,
    transform: Option<Box<dyn RecordTransform>>,
    index: Option<HashIndex>,
}

impl HashJoin {
    pub fn from_attributes(attrs: &Attributes, ports: PortSchemas) -> Result<Self> {
        ports.expect((2, 2), (1, 2))?;
        let join_type = match attrs.get("joinType") {
            Some(t) => JoinType::parse(t)?,
            None if attrs.get_bool("leftOuterJoin", false)? => JoinType::LeftOuter,
            None => JoinType::Inner,
        };
        if join_type.is_outer() && ports.outputs.len() > 1 {
            return Err(OpError::Config(
                "the unmatched-driver output is only available for inner joins".into(),
            ));
        }
        Ok(Self {
            join_key: attrs.require("joinKey")?.to_string(),
            slave_key: attrs.get("slaveOverrideKey").map(str::to_string),
            join_type,
            allow_duplicates: attrs.get_bool("allowSlaveDuplicates", false)?,
            table_size: attrs.get_parsed("hashTableSize")?,
            equal_null: attrs.get_bool("equalNULL", true)?,
            spec: Some(TransformSpec::from_attribute(attrs.get("transform"))),
            ports,
            keys: None,
            transform: None,
            index: None,
        })
    }

    pub fn with_transform(mut self, spec: TransformSpec<dyn RecordTransform>) -> Self {
        self.spec = Some(spec);
        self
    }

    pub fn join_type(&self) -> JoinType {
        self.join_type
    }

    fn run(&mut self, io: &mut NodeIo, ctx: &NodeContext) -> Result<()> {
        let node = ctx.node();
        let (driver_key, _) = self.keys.as_ref().ok_or_else(not_initialized)?;
        let transform = self.transform.as_mut().ok_or_else(not_initialized)?;
        let index = self.index.as_mut().ok_or_else(not_initialized)?;

        while let Some(record) = io.inputs[1].read()? {
            index.insert(record)?;
            ctx.checkpoint()?;
        }
        tracing::debug!(
            node,
            records = index.len(),
            keys = index.key_count(),
            bytes = index.bytes(),
            "slave side indexed"
        );

        let index = &*index;
        let reject_port = io.has_output(1);
        while let Some(driver) = io.inputs[0].read()? {
            let hits = index.matches(driver_key, &driver);
            if hits.is_empty() {
                if self.join_type.is_outer() {
                    let res = transform.transform(&[Some(&driver), None]);
                    write_emit(io.outputs[0].as_mut(), node, res)?;
                } else if reject_port {
                    io.outputs[1].write(driver)?;
                }
            } else {
                for &idx in hits {
                    let slave = index.record(idx);
                    let res = transform.transform(&[Some(&driver), Some(slave)]);
                    write_emit(io.outputs[0].as_mut(), node, res)?;
                    if self.join_type == JoinType::FullOuter {
                        index.mark_used(idx);
                    }
                }
            }
            ctx.checkpoint()?;
        }

        if self.join_type == JoinType::FullOuter {
            let mut leftover = 0u64;
            for slave in index.unmatched() {
                let res = transform.transform(&[None, Some(slave)]);
                write_emit(io.outputs[0].as_mut(), node, res)?;
                leftover += 1;
                ctx.checkpoint()?;
            }
            tracing::debug!(node, leftover, "unmatched slave records emitted");
        }
        Ok(())
    }
}

fn not_initialized() -> OpError {
    OpError::Exec("hash join used before init".into())
}

impl Node for HashJoin {
    fn component_type(&self) -> &'static str {
        COMPONENT_TYPE
    }

    fn ports(&self) -> &PortSchemas {
        &self.ports
    }

    fn init(&mut self, _ctx: &NodeContext) -> Result<()> {
        let driver_schema = self.ports.input(0)?;
        let slave_schema = self.ports.input(1)?;
        let driver_key =
            RecordKey::parse(driver_schema, &self.join_key)?.with_equal_null(self.equal_null);
        let slave_spec = self.slave_key.as_deref().unwrap_or(&self.join_key);
        let slave_key = RecordKey::parse(slave_schema, slave_spec)?.with_equal_null(self.equal_null);
        driver_key.check_compatible(&slave_key)?;

        if let Some(spec) = self.spec.take() {
            self.transform =
                Some(spec.build(&[driver_schema, slave_schema], self.ports.output(0)?)?);
        }
        if let Some(reject) = self.ports.outputs.get(1) {
            if reject.len() != driver_schema.len() {
                return Err(OpError::Config(
                    "unmatched-driver output must have the driver schema".into(),
                ));
            }
        }
        // probing only needs equality
        self.keys = Some((driver_key.ascending(), slave_key.ascending()));
        Ok(())
    }

    fn pre_execute(&mut self, ctx: &NodeContext) -> Result<()> {
        let (_, slave_key) = self.keys.as_ref().ok_or_else(not_initialized)?;
        let guard = ctx.budget().empty_guard("hash_join");
        self.index = Some(HashIndex::new(
            slave_key.clone(),
            self.allow_duplicates,
            self.table_size.unwrap_or(ctx.config().hash_table_size),
            guard,
        ));
        Ok(())
    }

    fn execute(&mut self, io: &mut NodeIo, ctx: &NodeContext) -> Result<Outcome> {
        io.require(2, 1)?;
        let body = self.run(io, ctx);
        finish(io, ctx, body)
    }

    fn free(&mut self) {
        self.index = None;
    }
}
