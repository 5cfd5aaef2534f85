//! CheckForeignKey: verify foreign records against a sorted primary-key list.
//!
//! Ports:
//! - input 0: foreign records sorted by `foreignKey`
//! - input 1: primary keys sorted by `primaryKey`
//! - output 0: every foreign record; unmatched ones carry `defaultForeignKey`
//! - output 1 (optional): unmatched foreign records as read
//!
//! One primary record may be referenced by any number of foreign records, so
//! the primary side only advances when it sorts strictly before the foreign
//! side.

use rivulet_core::attributes::Attributes;
use rivulet_core::key::{split_key_spec, RecordKey};
use rivulet_core::types::Scalar;

use crate::context::NodeContext;
use crate::port::NodeIo;
use crate::traits::{finish, Node, OpError, Outcome, PortSchemas, Result};

use super::merge::{CoGroup, Step};

pub const COMPONENT_TYPE: &str = "CHECK_FOREIGN_KEY";

pub struct CheckForeignKey {
    ports: PortSchemas,
    foreign_key: String,
    primary_key: String,
    default_key: String,
    equal_null: bool,

    foreign: Option<RecordKey>,
    defaults: Vec<Scalar>,
    merge: Option<CoGroup>,
    replaced: u64,
}

impl CheckForeignKey {
    pub fn from_attributes(attrs: &Attributes, ports: PortSchemas) -> Result<Self> {
        ports.expect((2, 2), (1, 2))?;
        Ok(Self {
            foreign_key: attrs.require("foreignKey")?.to_string(),
            primary_key: attrs.require("primaryKey")?.to_string(),
            default_key: attrs.require("defaultForeignKey")?.to_string(),
            equal_null: attrs.get_bool("equalNULL", true)?,
            ports,
            foreign: None,
            defaults: Vec::new(),
            merge: None,
            replaced: 0,
        })
    }

    fn run(&mut self, io: &mut NodeIo, ctx: &NodeContext) -> Result<()> {
        let foreign = self.foreign.as_ref().ok_or_else(not_initialized)?;
        let merge = self.merge.as_mut().ok_or_else(not_initialized)?;
        let rejects = io.has_output(1);
        let (left, right) = io.inputs.split_at_mut(1);
        let (foreign_in, primary_in) = (&mut *left[0], &mut *right[0]);
        loop {
            match merge.next(foreign_in, primary_in)? {
                Step::AOnly(mut record) => {
                    if rejects {
                        io.outputs[1].write(record.clone())?;
                    }
                    foreign.assign(&mut record, &self.defaults)?;
                    io.outputs[0].write(record)?;
                    self.replaced += 1;
                }
                Step::Matched(record, _) => io.outputs[0].write(record)?,
                Step::BOnly(_) => {}
                Step::Done => break,
            }
            ctx.checkpoint()?;
        }
        tracing::debug!(node = ctx.node(), replaced = self.replaced, "foreign keys checked");
        Ok(())
    }
}

fn not_initialized() -> OpError {
    OpError::Exec("foreign key check used before init".into())
}

impl Node for CheckForeignKey {
    fn component_type(&self) -> &'static str {
        COMPONENT_TYPE
    }

    fn ports(&self) -> &PortSchemas {
        &self.ports
    }

    fn init(&mut self, _ctx: &NodeContext) -> Result<()> {
        let foreign_schema = self.ports.input(0)?;
        let foreign =
            RecordKey::parse(foreign_schema, &self.foreign_key)?.with_equal_null(self.equal_null);
        let primary =
            RecordKey::parse(self.ports.input(1)?, &self.primary_key)?.with_equal_null(self.equal_null);

        let values = split_key_spec(&self.default_key);
        if values.len() != foreign.len() {
            return Err(OpError::Config(format!(
                "defaultForeignKey has {} values but the foreign key has {} fields",
                values.len(),
                foreign.len()
            )));
        }
        self.defaults = foreign
            .fields()
            .iter()
            .zip(values)
            .map(|(f, v)| Scalar::parse(v, f.data_type))
            .collect::<std::result::Result<_, _>>()?;

        for (idx, schema) in self.ports.outputs.iter().enumerate() {
            if schema.len() != foreign_schema.len() {
                return Err(OpError::Config(format!(
                    "output {idx} must have the foreign input's schema"
                )));
            }
        }

        self.merge = Some(CoGroup::new(foreign.clone(), primary)?.retain_b_on_match());
        self.foreign = Some(foreign);
        Ok(())
    }

    fn pre_execute(&mut self, _ctx: &NodeContext) -> Result<()> {
        self.replaced = 0;
        if let Some(merge) = self.merge.as_mut() {
            merge.reset();
        }
        Ok(())
    }

    fn execute(&mut self, io: &mut NodeIo, ctx: &NodeContext) -> Result<Outcome> {
        io.require(2, 1)?;
        let body = self.run(io, ctx);
        finish(io, ctx, body)
    }

    fn free(&mut self) {
        if let Some(merge) = self.merge.as_mut() {
            merge.reset();
        }
    }
}
