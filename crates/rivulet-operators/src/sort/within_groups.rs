//! SortWithinGroups: re-sort each group of a group-sorted input by a
//! secondary key.
//!
//! Attributes: `groupKey`, `sortKey` (per-field direction), `bufferCapacity`,
//! `numberOfTapes`, `order` (of the groups), `equalNULL`. Buffer capacity and
//! tape count default to the engine config.

use rivulet_core::attributes::Attributes;
use rivulet_core::key::RecordKey;

use crate::context::NodeContext;
use crate::group::{Boundary, GroupDetector, OrderMode};
use crate::port::{NodeIo, OutputPort};
use crate::traits::{finish, Node, OpError, Outcome, PortSchemas, Result};

use super::external::ExternalSorter;

pub const COMPONENT_TYPE: &str = "SORT_WITHIN_GROUPS";

pub struct SortWithinGroups {
    ports: PortSchemas,
    group_key: String,
    sort_key: String,
    capacity: Option<usize>,
    tapes: Option<usize>,
    order: OrderMode,
    equal_null: bool,

    detector: Option<GroupDetector>,
    sort: Option<RecordKey>,
    sorter: Option<ExternalSorter>,
    spilled: u64,
}

impl SortWithinGroups {
    pub fn from_attributes(attrs: &Attributes, ports: PortSchemas) -> Result<Self> {
        ports.expect((1, 1), (1, 1))?;
        let tapes = attrs.get_parsed::<usize>("numberOfTapes")?;
        if matches!(tapes, Some(t) if t < 2) {
            return Err(OpError::Config("numberOfTapes must be at least 2".into()));
        }
        let capacity = attrs.get_parsed::<usize>("bufferCapacity")?;
        if capacity == Some(0) {
            return Err(OpError::Config("bufferCapacity must be positive".into()));
        }
        Ok(Self {
            group_key: attrs.require("groupKey")?.to_string(),
            sort_key: attrs.require("sortKey")?.to_string(),
            capacity,
            tapes,
            order: OrderMode::parse(attrs.get("order").unwrap_or("auto"))?,
            equal_null: attrs.get_bool("equalNULL", true)?,
            ports,
            detector: None,
            sort: None,
            sorter: None,
            spilled: 0,
        })
    }

    fn run(&mut self, io: &mut NodeIo, ctx: &NodeContext) -> Result<()> {
        let detector = self.detector.as_mut().ok_or_else(not_initialized)?;
        let sorter = self.sorter.as_mut().ok_or_else(not_initialized)?;
        let mut groups = 0u64;
        while let Some(record) = io.inputs[0].read()? {
            if detector.observe(&record)? == Boundary::New {
                flush_group(sorter, io.outputs[0].as_mut(), ctx)?;
                groups += 1;
            }
            sorter.put(record, ctx)?;
            ctx.checkpoint()?;
        }
        if !sorter.is_empty() {
            flush_group(sorter, io.outputs[0].as_mut(), ctx)?;
            groups += 1;
        }
        self.spilled = sorter.spilled_bytes();
        tracing::debug!(node = ctx.node(), groups, spilled = self.spilled, "groups sorted");
        Ok(())
    }
}

fn flush_group(sorter: &mut ExternalSorter, out: &mut dyn OutputPort, ctx: &NodeContext) -> Result<()> {
    tracing::trace!(node = ctx.node(), records = sorter.len(), runs = sorter.run_count(), "sorting group");
    sorter.drain(ctx, |record| out.write(record))
}

fn not_initialized() -> OpError {
    OpError::Exec("sort within groups used before init".into())
}

impl Node for SortWithinGroups {
    fn component_type(&self) -> &'static str {
        COMPONENT_TYPE
    }

    fn ports(&self) -> &PortSchemas {
        &self.ports
    }

    fn init(&mut self, _ctx: &NodeContext) -> Result<()> {
        let input = self.ports.input(0)?;
        if self.ports.output(0)?.len() != input.len() {
            return Err(OpError::Config("output must have the input's schema".into()));
        }
        let group = RecordKey::parse(input, &self.group_key)?.with_equal_null(self.equal_null);
        self.detector = Some(GroupDetector::new(group, self.order));
        self.sort = Some(RecordKey::parse(input, &self.sort_key)?);
        Ok(())
    }

    fn pre_execute(&mut self, ctx: &NodeContext) -> Result<()> {
        let sort = self.sort.clone().ok_or_else(not_initialized)?;
        let cfg = ctx.config();
        if let Some(detector) = self.detector.as_mut() {
            detector.reset();
        }
        if let Some(old) = self.sorter.as_mut() {
            old.reset();
        }
        self.sorter = Some(ExternalSorter::new(
            sort,
            self.capacity.unwrap_or(cfg.sort_buffer_capacity),
            self.tapes.unwrap_or(cfg.sort_tapes),
            cfg.spill_chunk_rows,
            ctx.budget().empty_guard("sort_within_groups"),
        ));
        self.spilled = 0;
        Ok(())
    }

    fn execute(&mut self, io: &mut NodeIo, ctx: &NodeContext) -> Result<Outcome> {
        io.require(1, 1)?;
        let body = self.run(io, ctx);
        finish(io, ctx, body)
    }

    fn free(&mut self) {
        if let Some(mut sorter) = self.sorter.take() {
            sorter.reset();
        }
    }

    fn spilled_bytes(&self) -> u64 {
        self.spilled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{VecInput, VecOutput};
    use rivulet_core::config::EngineConfig;
    use rivulet_core::schema::{DataType, Field, Schema};
    use rivulet_core::types::{Record, Scalar};

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("g", DataType::Utf8, false),
            Field::new("v", DataType::Int64, true),
        ])
    }

    fn r(g: &str, v: i64) -> Record {
        Record::new(vec![Scalar::Str(g.into()), Scalar::I64(v)])
    }

    fn run(attrs: Attributes, records: Vec<Record>) -> Result<(Vec<String>, u64)> {
        let dir = tempfile::tempdir().unwrap();
        let cfg = EngineConfig {
            temp_dirs: vec![dir.path().to_string_lossy().into_owned()],
            spill_chunk_rows: 2,
            ..Default::default()
        };
        let ctx = NodeContext::standalone("swg", cfg).unwrap();
        let mut node =
            SortWithinGroups::from_attributes(&attrs, PortSchemas::new(vec![schema()], vec![schema()]))?;
        let out = VecOutput::new();
        let mut io = NodeIo::new(vec![Box::new(VecInput::new(records))], vec![Box::new(out.clone())]);
        node.init(&ctx)?;
        node.pre_execute(&ctx)?;
        node.execute(&mut io, &ctx)?;
        let spilled = node.spilled_bytes();
        node.free();
        let rows = out
            .records()
            .iter()
            .map(|r| format!("{}{}", r.values()[0].render(), r.values()[1].render()))
            .collect();
        Ok((rows, spilled))
    }

    fn input() -> Vec<Record> {
        vec![r("a", 3), r("a", 1), r("a", 2), r("b", 9), r("c", 5), r("c", 4)]
    }

    #[test]
    fn sorts_each_group_in_place() {
        let attrs = Attributes::new().with("groupKey", "g").with("sortKey", "v");
        let (rows, spilled) = run(attrs, input()).unwrap();
        assert_eq!(rows, vec!["a1", "a2", "a3", "b9", "c4", "c5"]);
        assert_eq!(spilled, 0);
    }

    #[test]
    fn spilling_gives_the_same_output() {
        let attrs = Attributes::new()
            .with("groupKey", "g")
            .with("sortKey", "v(d)")
            .with("bufferCapacity", "1")
            .with("numberOfTapes", "2");
        let (rows, spilled) = run(attrs, input()).unwrap();
        assert_eq!(rows, vec!["a3", "a2", "a1", "b9", "c5", "c4"]);
        assert!(spilled > 0);
    }

    #[test]
    fn rejects_bad_tape_count() {
        let attrs = Attributes::new()
            .with("groupKey", "g")
            .with("sortKey", "v")
            .with("numberOfTapes", "1");
        assert!(matches!(run(attrs, vec![]), Err(OpError::Config(_))));
    }

    #[test]
    fn unsorted_groups_are_fatal() {
        let attrs = Attributes::new()
            .with("groupKey", "g")
            .with("sortKey", "v")
            .with("order", "ascending");
        let err = run(attrs, vec![r("b", 1), r("a", 1)]).unwrap_err();
        assert!(matches!(err, OpError::OrderViolation(_)));
    }
}
