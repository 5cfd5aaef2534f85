//! DataIntersection: split two key-sorted inputs three ways.
//!
//! Ports:
//! - input 0: A, input 1: B, both sorted by the join key
//! - output 0: A records with no B partner
//! - output 1: transform results for matched pairs
//! - output 2: B records with no A partner

use rivulet_core::attributes::Attributes;
use rivulet_core::key::RecordKey;

use crate::context::NodeContext;
use crate::port::NodeIo;
use crate::transform::{RecordTransform, TransformSpec};
use crate::traits::{finish, Node, OpError, Outcome, PortSchemas, Result};

use super::merge::{CoGroup, Step};
use super::write_emit;

pub const COMPONENT_TYPE: &str = "DATA_INTERSECTION";

pub struct DataIntersection {
    ports: PortSchemas,
    join_key: String,
    slave_key: Option<String>,
    equal_null: bool,
    spec: Option<TransformSpec<dyn RecordTransform>>,

    transform: Option<Box<dyn RecordTransform>>,
    merge: Option<CoGroup>,
    counts: [u64; 3],
}

impl DataIntersection {
    pub fn from_attributes(attrs: &Attributes, ports: PortSchemas) -> Result<Self> {
        ports.expect((2, 2), (3, 3))?;
        Ok(Self {
            join_key: attrs.require("joinKey")?.to_string(),
            slave_key: attrs.get("slaveOverrideKey").map(str::to_string),
            equal_null: attrs.get_bool("equalNULL", true)?,
            spec: Some(TransformSpec::from_attribute(attrs.get("transform"))),
            ports,
            transform: None,
            merge: None,
            counts: [0; 3],
        })
    }

    pub fn with_transform(mut self, spec: TransformSpec<dyn RecordTransform>) -> Self {
        self.spec = Some(spec);
        self
    }

    fn run(&mut self, io: &mut NodeIo, ctx: &NodeContext) -> Result<()> {
        let node = ctx.node();
        let merge = self.merge.as_mut().ok_or_else(not_initialized)?;
        let transform = self.transform.as_mut().ok_or_else(not_initialized)?;
        let (left, right) = io.inputs.split_at_mut(1);
        let (a_in, b_in) = (&mut *left[0], &mut *right[0]);
        loop {
            match merge.next(a_in, b_in)? {
                Step::AOnly(a) => {
                    io.outputs[0].write(a)?;
                    self.counts[0] += 1;
                }
                Step::Matched(a, b) => {
                    let res = transform.transform(&[Some(&a), b.as_ref()]);
                    write_emit(io.outputs[1].as_mut(), node, res)?;
                    self.counts[1] += 1;
                }
                Step::BOnly(b) => {
                    io.outputs[2].write(b)?;
                    self.counts[2] += 1;
                }
                Step::Done => break,
            }
            ctx.checkpoint()?;
        }
        tracing::debug!(
            node,
            a_only = self.counts[0],
            matched = self.counts[1],
            b_only = self.counts[2],
            "intersection complete"
        );
        Ok(())
    }
}

fn not_initialized() -> OpError {
    OpError::Exec("intersection used before init".into())
}

impl Node for DataIntersection {
    fn component_type(&self) -> &'static str {
        COMPONENT_TYPE
    }

    fn ports(&self) -> &PortSchemas {
        &self.ports
    }

    fn init(&mut self, _ctx: &NodeContext) -> Result<()> {
        let a_schema = self.ports.input(0)?;
        let b_schema = self.ports.input(1)?;
        let a_key = RecordKey::parse(a_schema, &self.join_key)?.with_equal_null(self.equal_null);
        let b_spec = self.slave_key.as_deref().unwrap_or(&self.join_key);
        let b_key = RecordKey::parse(b_schema, b_spec)?.with_equal_null(self.equal_null);
        self.merge = Some(CoGroup::new(a_key, b_key)?);
        if let Some(spec) = self.spec.take() {
            self.transform = Some(spec.build(&[a_schema, b_schema], self.ports.output(1)?)?);
        }
        Ok(())
    }

    fn pre_execute(&mut self, _ctx: &NodeContext) -> Result<()> {
        self.counts = [0; 3];
        if let Some(merge) = self.merge.as_mut() {
            merge.reset();
        }
        Ok(())
    }

    fn execute(&mut self, io: &mut NodeIo, ctx: &NodeContext) -> Result<Outcome> {
        io.require(2, 3)?;
        let body = self.run(io, ctx);
        finish(io, ctx, body)
    }

    fn free(&mut self) {
        if let Some(merge) = self.merge.as_mut() {
            merge.reset();
        }
    }
}
