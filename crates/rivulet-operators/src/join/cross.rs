//! CrossJoin: every combination of the master record with one record of each
//! slave input.
//!
//! Ports: input 0 is the master, inputs 1..=N are slaves. Without a transform
//! each combination is written to output 0 as the field-wise concatenation
//! of the tuple; a transform sees the whole tuple and may route its result
//! to one output or to all of them.
//!
//! Each slave port is read exactly once. On the first pass through a slave,
//! its records are appended to a replay buffer in the temp space; every later
//! pass replays from there. Only one record per slave is held in memory.

use rivulet_core::attributes::Attributes;
use rivulet_core::types::Record;
use rivulet_mem::{SpillBuffer, SpillReplay};

use crate::context::NodeContext;
use crate::port::NodeIo;
use crate::transform::{settle, Emit, RecordTransform, TransformSpec};
use crate::traits::{finish, Node, OpError, Outcome, PortSchemas, Result};

pub const COMPONENT_TYPE: &str = "CROSS_JOIN";

enum Slave {
    /// First pass: reading the live port, recording as we go.
    Filling(SpillBuffer),
    Replaying(SpillReplay),
}

pub struct CrossJoin {
    ports: PortSchemas,
    spec: Option<TransformSpec<dyn RecordTransform>>,

    transform: Option<Box<dyn RecordTransform>>,
    slaves: Vec<Option<Slave>>,
    combinations: u64,
    spilled: u64,
}

impl CrossJoin {
    pub fn from_attributes(attrs: &Attributes, ports: PortSchemas) -> Result<Self> {
        ports.expect((2, usize::MAX), (1, usize::MAX))?;
        Ok(Self {
            spec: Some(TransformSpec::from_attribute(attrs.get("transform"))),
            ports,
            transform: None,
            slaves: Vec::new(),
            combinations: 0,
            spilled: 0,
        })
    }

    pub fn with_transform(mut self, spec: TransformSpec<dyn RecordTransform>) -> Self {
        self.spec = Some(spec);
        self
    }

    fn run(&mut self, io: &mut NodeIo, ctx: &NodeContext) -> Result<()> {
        let mut tuple = Vec::with_capacity(self.slaves.len() + 1);
        while let Some(master) = io.inputs[0].read()? {
            tuple.push(master);
            self.expand(1, &mut tuple, io, ctx)?;
            tuple.clear();
        }
        // slaves never reached (empty master, or an empty slave before them)
        for level in 1..=self.slaves.len() {
            if let Some(Slave::Filling(buffer)) = self.slaves[level - 1].as_mut() {
                while let Some(record) = io.inputs[level].read()? {
                    buffer.append(&record)?;
                    ctx.checkpoint()?;
                }
            }
        }
        self.spilled = self.slaves.iter().flatten().map(Slave::bytes).sum();
        tracing::debug!(
            node = ctx.node(),
            combinations = self.combinations,
            spilled = self.spilled,
            "cross join finished"
        );
        Ok(())
    }

    fn expand(
        &mut self,
        level: usize,
        tuple: &mut Vec<Record>,
        io: &mut NodeIo,
        ctx: &NodeContext,
    ) -> Result<()> {
        if level > self.slaves.len() {
            return self.emit(tuple, io, ctx);
        }
        let state = self.slaves[level - 1]
            .take()
            .ok_or_else(|| OpError::Exec(format!("slave {level} state lost")))?;
        let state = match state {
            Slave::Filling(mut buffer) => {
                while let Some(record) = io.inputs[level].read()? {
                    buffer.append(&record)?;
                    tuple.push(record);
                    self.expand(level + 1, tuple, io, ctx)?;
                    tuple.pop();
                }
                tracing::trace!(node = ctx.node(), slave = level, records = buffer.len(), "slave buffered");
                Slave::Replaying(buffer.seal()?)
            }
            Slave::Replaying(mut replay) => {
                replay.rewind()?;
                while let Some(record) = replay.next_record()? {
                    tuple.push(record);
                    self.expand(level + 1, tuple, io, ctx)?;
                    tuple.pop();
                }
                Slave::Replaying(replay)
            }
        };
        self.slaves[level - 1] = Some(state);
        Ok(())
    }

    fn emit(&mut self, tuple: &[Record], io: &mut NodeIo, ctx: &NodeContext) -> Result<()> {
        self.combinations += 1;
        match self.transform.as_mut() {
            None => {
                let values = tuple.iter().flat_map(|r| r.values().iter().cloned()).collect();
                io.outputs[0].write(Record::new(values))?;
            }
            Some(transform) => {
                let refs: Vec<Option<&Record>> = tuple.iter().map(Some).collect();
                match settle(ctx.node(), transform.transform(&refs))? {
                    None | Some(Emit::Skip) => {}
                    Some(Emit::Port(port, record)) => {
                        let out = io.outputs.get_mut(port).ok_or_else(|| {
                            OpError::Transform(format!("transform routed to missing output {port}"))
                        })?;
                        out.write(record)?;
                    }
                    Some(Emit::All(record)) => {
                        if let Some((last, rest)) = io.outputs.split_last_mut() {
                            for out in rest {
                                out.write(record.clone())?;
                            }
                            last.write(record)?;
                        }
                    }
                }
            }
        }
        ctx.checkpoint()
    }
}

impl Slave {
    fn bytes(&self) -> u64 {
        match self {
            Slave::Filling(b) => b.bytes(),
            Slave::Replaying(r) => r.bytes(),
        }
    }
}

impl Node for CrossJoin {
    fn component_type(&self) -> &'static str {
        COMPONENT_TYPE
    }

    fn ports(&self) -> &PortSchemas {
        &self.ports
    }

    fn init(&mut self, _ctx: &NodeContext) -> Result<()> {
        let inputs: Vec<_> = self.ports.inputs.iter().collect();
        let out = self.ports.output(0)?;
        match self.spec.take() {
            Some(TransformSpec::Default) | None => {
                let width: usize = inputs.iter().map(|s| s.len()).sum();
                if self.transform.is_none() && out.len() != width {
                    return Err(OpError::Config(format!(
                        "output 0 has {} fields but the concatenated inputs have {width}",
                        out.len()
                    )));
                }
            }
            Some(spec) => self.transform = Some(spec.build(&inputs, out)?),
        }
        Ok(())
    }

    fn pre_execute(&mut self, ctx: &NodeContext) -> Result<()> {
        let n = self.ports.inputs.len() - 1;
        self.slaves = (0..n)
            .map(|_| ctx.spill_buffer().map(|b| Some(Slave::Filling(b))))
            .collect::<Result<_>>()?;
        self.combinations = 0;
        self.spilled = 0;
        Ok(())
    }

    fn execute(&mut self, io: &mut NodeIo, ctx: &NodeContext) -> Result<Outcome> {
        io.require(self.ports.inputs.len(), 1)?;
        let body = self.run(io, ctx);
        finish(io, ctx, body)
    }

    fn free(&mut self) {
        self.slaves.clear();
    }

    fn spilled_bytes(&self) -> u64 {
        self.spilled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{InputPort, OutputPort, VecInput, VecOutput};
    use crate::transform::{TransformError, TransformResult};
    use rivulet_core::config::EngineConfig;
    use rivulet_core::schema::{DataType, Field, Schema};
    use rivulet_core::types::Scalar;
    use std::sync::atomic::Ordering;

    fn one(name: &str) -> Schema {
        Schema::new(vec![Field::new(name, DataType::Utf8, true)])
    }

    fn recs(prefix: &str, n: usize) -> Vec<Record> {
        (1..=n)
            .map(|i| Record::new(vec![Scalar::Str(format!("{prefix}{i}"))]))
            .collect()
    }

    fn ctx(dir: &tempfile::TempDir) -> NodeContext {
        let cfg = EngineConfig {
            temp_dirs: vec![dir.path().to_string_lossy().into_owned()],
            ..Default::default()
        };
        NodeContext::standalone("cross", cfg).unwrap()
    }

    fn render(out: &VecOutput) -> Vec<String> {
        out.records()
            .iter()
            .map(|r| r.values().iter().map(|v| v.render()).collect::<Vec<_>>().join(","))
            .collect()
    }

    #[test]
    fn combinations_in_master_major_order() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(&dir);
        let ports = PortSchemas::new(vec![one("r"), one("s")], vec![Schema::concat(&[&one("r"), &one("s")])]);
        let mut node = CrossJoin::from_attributes(&Attributes::new(), ports).unwrap();
        let slave = VecInput::new(recs("s", 3));
        let reads = slave.counter();
        let out = VecOutput::new();
        let mut io = NodeIo::new(
            vec![Box::new(VecInput::new(recs("r", 2))), Box::new(slave)],
            vec![Box::new(out.clone())],
        );
        node.init(&ctx).unwrap();
        node.pre_execute(&ctx).unwrap();
        assert_eq!(node.execute(&mut io, &ctx).unwrap(), Outcome::Finished);
        assert_eq!(
            render(&out),
            vec!["r1,s1", "r1,s2", "r1,s3", "r2,s1", "r2,s2", "r2,s3"]
        );
        assert_eq!(reads.load(Ordering::Relaxed), 3);
        assert!(node.spilled_bytes() > 0);
        node.free();
    }

    #[test]
    fn replayed_slave_keeps_infinite_floats() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(&dir);
        let slave_schema = Schema::new(vec![Field::new("x", DataType::Float64, true)]);
        let out_schema = Schema::concat(&[&one("r"), &slave_schema]);
        let ports = PortSchemas::new(vec![one("r"), slave_schema], vec![out_schema]);
        let mut node = CrossJoin::from_attributes(&Attributes::new(), ports).unwrap();
        let slave = VecInput::new(vec![
            Record::new(vec![Scalar::F64(f64::INFINITY)]),
            Record::new(vec![Scalar::F64(f64::NAN)]),
        ]);
        let out = VecOutput::new();
        let mut io = NodeIo::new(
            vec![Box::new(VecInput::new(recs("r", 2))), Box::new(slave)],
            vec![Box::new(out.clone())],
        );
        node.init(&ctx).unwrap();
        node.pre_execute(&ctx).unwrap();
        assert_eq!(node.execute(&mut io, &ctx).unwrap(), Outcome::Finished);
        assert_eq!(render(&out), vec!["r1,inf", "r1,NaN", "r2,inf", "r2,NaN"]);
        node.free();
    }

    #[test]
    fn three_way_product_reads_each_slave_once() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(&dir);
        let schemas = vec![one("a"), one("b"), one("c")];
        let out_schema = Schema::concat(&[&schemas[0], &schemas[1], &schemas[2]]);
        let ports = PortSchemas::new(schemas, vec![out_schema]);
        let mut node = CrossJoin::from_attributes(&Attributes::new(), ports).unwrap();
        let b = VecInput::new(recs("b", 4));
        let c = VecInput::new(recs("c", 5));
        let (b_reads, c_reads) = (b.counter(), c.counter());
        let out = VecOutput::new();
        let mut io = NodeIo::new(
            vec![Box::new(VecInput::new(recs("a", 3))), Box::new(b), Box::new(c)],
            vec![Box::new(out.clone())],
        );
        node.init(&ctx).unwrap();
        node.pre_execute(&ctx).unwrap();
        node.execute(&mut io, &ctx).unwrap();
        assert_eq!(out.records().len(), 3 * 4 * 5);
        assert_eq!(b_reads.load(Ordering::Relaxed), 4);
        assert_eq!(c_reads.load(Ordering::Relaxed), 5);
        assert_eq!(io.inputs[2].records_read(), 5);
    }

    #[test]
    fn empty_master_still_drains_slaves() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(&dir);
        let ports = PortSchemas::new(vec![one("r"), one("s")], vec![Schema::concat(&[&one("r"), &one("s")])]);
        let mut node = CrossJoin::from_attributes(&Attributes::new(), ports).unwrap();
        let slave = VecInput::new(recs("s", 7));
        let reads = slave.counter();
        let out = VecOutput::new();
        let mut io = NodeIo::new(
            vec![Box::new(VecInput::new(vec![])), Box::new(slave)],
            vec![Box::new(out.clone())],
        );
        node.init(&ctx).unwrap();
        node.pre_execute(&ctx).unwrap();
        node.execute(&mut io, &ctx).unwrap();
        assert!(out.records().is_empty());
        assert!(out.saw_eof());
        assert_eq!(reads.load(Ordering::Relaxed), 7);
    }

    #[test]
    fn transform_routes_and_skips() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(&dir);
        let both = Schema::concat(&[&one("r"), &one("s")]);
        let ports = PortSchemas::new(vec![one("r"), one("s")], vec![both.clone(), both]);
        let router = |t: &[Option<&Record>]| -> TransformResult<Emit> {
            let s = t[1].map(|r| r.values()[0].render()).unwrap_or_default();
            let joined = Record::new(vec![t[0].unwrap().values()[0].clone(), Scalar::Str(s.clone())]);
            match s.as_str() {
                "s1" => Ok(Emit::Port(1, joined)),
                "s2" => Err(TransformError::SkipRow("not wanted".into())),
                _ => Ok(Emit::All(joined)),
            }
        };
        let mut node = CrossJoin::from_attributes(&Attributes::new(), ports)
            .unwrap()
            .with_transform(TransformSpec::Plugin(Box::new(router)));
        let (o0, o1) = (VecOutput::new(), VecOutput::new());
        let mut io = NodeIo::new(
            vec![Box::new(VecInput::new(recs("r", 1))), Box::new(VecInput::new(recs("s", 3)))],
            vec![Box::new(o0.clone()) as Box<dyn OutputPort>, Box::new(o1.clone())],
        );
        node.init(&ctx).unwrap();
        node.pre_execute(&ctx).unwrap();
        node.execute(&mut io, &ctx).unwrap();
        assert_eq!(render(&o0), vec!["r1,s3"]);
        assert_eq!(render(&o1), vec!["r1,s1", "r1,s3"]);
    }

    #[test]
    fn output_width_is_checked_without_transform() {
        let dir = tempfile::tempdir().unwrap();
        let ports = PortSchemas::new(vec![one("r"), one("s")], vec![one("r")]);
        let mut node = CrossJoin::from_attributes(&Attributes::new(), ports).unwrap();
        assert!(matches!(node.init(&ctx(&dir)), Err(OpError::Config(_))));
    }
}
