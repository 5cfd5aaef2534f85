//! Denormalizer: collapse each group of a sorted input into one record.
//!
//! Groups are either consecutive records with equal `key` (order checked per
//! `order`), or fixed-size chunks of `groupSize` records. A trailing partial
//! chunk is still emitted at EOF.

use rivulet_core::attributes::Attributes;
use rivulet_core::key::RecordKey;

use crate::context::NodeContext;
use crate::group::{Boundary, GroupDetector, OrderMode};
use crate::port::{NodeIo, OutputPort};
use crate::transform::{settle, GroupTransform, TransformSpec};
use crate::traits::{finish, Node, OpError, Outcome, PortSchemas, Result};

pub const COMPONENT_TYPE: &str = "DENORMALIZER";

#[derive(Debug, Clone)]
enum Grouping {
    Key { spec: String, order: OrderMode },
    Size(usize),
}

pub struct Denormalizer {
    ports: PortSchemas,
    grouping: Grouping,
    equal_null: bool,
    spec: Option<TransformSpec<dyn GroupTransform>>,

    detector: Option<GroupDetector>,
    transform: Option<Box<dyn GroupTransform>>,
    groups: u64,
}

impl Denormalizer {
    pub fn from_attributes(attrs: &Attributes, ports: PortSchemas) -> Result<Self> {
        ports.expect((1, 1), (1, 1))?;
        let grouping = match (attrs.get("key"), attrs.get_parsed::<usize>("groupSize")?) {
            (Some(_), Some(_)) => {
                return Err(OpError::Config(
                    "'key' and 'groupSize' are mutually exclusive".into(),
                ))
            }
            (None, None) => {
                return Err(OpError::Config("one of 'key' or 'groupSize' is required".into()))
            }
            (None, Some(0)) => return Err(OpError::Config("groupSize must be positive".into())),
            (None, Some(n)) => Grouping::Size(n),
            (Some(key), None) => Grouping::Key {
                spec: key.to_string(),
                order: OrderMode::parse(attrs.get("order").unwrap_or("auto"))?,
            },
        };
        Ok(Self {
            grouping,
            equal_null: attrs.get_bool("equalNULL", true)?,
            spec: Some(TransformSpec::from_attribute(attrs.get("transform"))),
            ports,
            detector: None,
            transform: None,
            groups: 0,
        })
    }

    pub fn with_transform(mut self, spec: TransformSpec<dyn GroupTransform>) -> Self {
        self.spec = Some(spec);
        self
    }

    fn run(&mut self, io: &mut NodeIo, ctx: &NodeContext) -> Result<()> {
        let node = ctx.node();
        let transform = self.transform.as_mut().ok_or_else(not_initialized)?;
        let mut in_group = 0usize;
        while let Some(record) = io.inputs[0].read()? {
            let closes = match (&self.grouping, self.detector.as_mut()) {
                (Grouping::Key { .. }, Some(detector)) => {
                    detector.observe(&record)? == Boundary::New
                }
                (Grouping::Key { .. }, None) => return Err(not_initialized()),
                (Grouping::Size(_), _) => false,
            };
            if closes {
                close_group(transform.as_mut(), io.outputs[0].as_mut(), node, in_group)?;
                self.groups += 1;
                in_group = 0;
            }
            settle(node, transform.append(&record))?;
            in_group += 1;
            if let Grouping::Size(size) = self.grouping {
                if in_group == size {
                    close_group(transform.as_mut(), io.outputs[0].as_mut(), node, in_group)?;
                    self.groups += 1;
                    in_group = 0;
                }
            }
            ctx.checkpoint()?;
        }
        if in_group > 0 {
            close_group(transform.as_mut(), io.outputs[0].as_mut(), node, in_group)?;
            self.groups += 1;
        }
        tracing::debug!(node, groups = self.groups, "denormalizer finished");
        Ok(())
    }
}

fn close_group(
    transform: &mut dyn GroupTransform,
    out: &mut dyn OutputPort,
    node: &str,
    size: usize,
) -> Result<()> {
    tracing::trace!(node, size, "group closed");
    let result = settle(node, transform.finish_group())?.flatten();
    transform.clean();
    if let Some(record) = result {
        out.write(record)?;
    }
    Ok(())
}

fn not_initialized() -> OpError {
    OpError::Exec("denormalizer used before init".into())
}

impl Node for Denormalizer {
    fn component_type(&self) -> &'static str {
        COMPONENT_TYPE
    }

    fn ports(&self) -> &PortSchemas {
        &self.ports
    }

    fn init(&mut self, _ctx: &NodeContext) -> Result<()> {
        let input = self.ports.input(0)?;
        if let Grouping::Key { spec, order } = &self.grouping {
            let key = RecordKey::parse(input, spec)?.with_equal_null(self.equal_null);
            self.detector = Some(GroupDetector::new(key, *order));
        }
        if let Some(spec) = self.spec.take() {
            self.transform = Some(spec.build(input, self.ports.output(0)?)?);
        }
        Ok(())
    }

    fn pre_execute(&mut self, _ctx: &NodeContext) -> Result<()> {
        self.groups = 0;
        if let Some(detector) = self.detector.as_mut() {
            detector.reset();
        }
        if let Some(transform) = self.transform.as_mut() {
            transform.clean();
        }
        Ok(())
    }

    fn execute(&mut self, io: &mut NodeIo, ctx: &NodeContext) -> Result<Outcome> {
        io.require(1, 1)?;
        let body = self.run(io, ctx);
        finish(io, ctx, body)
    }

    fn free(&mut self) {
        if let Some(transform) = self.transform.as_mut() {
            transform.clean();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{VecInput, VecOutput};
    use crate::transform::TransformResult;
    use rivulet_core::config::EngineConfig;
    use rivulet_core::schema::{DataType, Field, Schema};
    use rivulet_core::types::{Record, Scalar};

    fn input() -> Schema {
        Schema::new(vec![
            Field::new("key", DataType::Utf8, true),
            Field::new("amount", DataType::Int64, true),
        ])
    }

    fn output() -> Schema {
        Schema::new(vec![
            Field::new("key", DataType::Utf8, true),
            Field::new("count", DataType::Int64, false),
        ])
    }

    fn r(k: &str, a: i64) -> Record {
        Record::new(vec![Scalar::Str(k.into()), Scalar::I64(a)])
    }

    fn run(node: &mut Denormalizer, records: Vec<Record>) -> Result<Vec<String>> {
        let dir = tempfile::tempdir().unwrap();
        let cfg = EngineConfig {
            temp_dirs: vec![dir.path().to_string_lossy().into_owned()],
            ..Default::default()
        };
        let ctx = NodeContext::standalone("denorm", cfg).unwrap();
        let out = VecOutput::new();
        let mut io = NodeIo::new(vec![Box::new(VecInput::new(records))], vec![Box::new(out.clone())]);
        node.init(&ctx)?;
        node.pre_execute(&ctx)?;
        node.execute(&mut io, &ctx)?;
        Ok(out
            .records()
            .iter()
            .map(|r| format!("{}:{}", r.values()[0].render(), r.values()[1].render()))
            .collect())
    }

    fn ports() -> PortSchemas {
        PortSchemas::new(vec![input()], vec![output()])
    }

    #[test]
    fn one_record_per_key_group() {
        let attrs = Attributes::new().with("key", "key");
        let mut node = Denormalizer::from_attributes(&attrs, ports()).unwrap();
        let got = run(&mut node, vec![r("a", 1), r("a", 2), r("b", 3), r("c", 4), r("c", 5)]).unwrap();
        assert_eq!(got, vec!["a:2", "b:1", "c:2"]);
    }

    #[test]
    fn group_size_mode_emits_partial_tail() {
        let attrs = Attributes::new().with("groupSize", "2");
        let mut node = Denormalizer::from_attributes(&attrs, ports()).unwrap();
        let got = run(&mut node, vec![r("a", 1), r("b", 2), r("c", 3)]).unwrap();
        assert_eq!(got, vec!["a:2", "c:1"]);
    }

    #[test]
    fn key_and_size_are_exclusive() {
        let both = Attributes::new().with("key", "key").with("groupSize", "3");
        assert!(matches!(
            Denormalizer::from_attributes(&both, ports()),
            Err(OpError::Config(_))
        ));
        assert!(Denormalizer::from_attributes(&Attributes::new(), ports()).is_err());
    }

    #[test]
    fn order_violation_is_fatal() {
        let attrs = Attributes::new().with("key", "key").with("order", "ascending");
        let mut node = Denormalizer::from_attributes(&attrs, ports()).unwrap();
        let err = run(&mut node, vec![r("b", 1), r("a", 2)]).unwrap_err();
        assert!(matches!(err, OpError::OrderViolation(_)));
    }

    struct Sum {
        key: Option<Scalar>,
        total: i64,
    }

    impl GroupTransform for Sum {
        fn append(&mut self, record: &Record) -> TransformResult<()> {
            self.key.get_or_insert_with(|| record.values()[0].clone());
            if let Scalar::I64(v) = record.values()[1] {
                self.total += v;
            }
            Ok(())
        }

        fn finish_group(&mut self) -> TransformResult<Option<Record>> {
            if self.total == 0 {
                return Ok(None);
            }
            let key = self.key.clone().unwrap_or(Scalar::Null);
            Ok(Some(Record::new(vec![key, Scalar::I64(self.total)])))
        }

        fn clean(&mut self) {
            self.key = None;
            self.total = 0;
        }
    }

    #[test]
    fn plugin_transform_may_suppress_groups() {
        let attrs = Attributes::new().with("key", "key");
        let mut node = Denormalizer::from_attributes(&attrs, ports())
            .unwrap()
            .with_transform(TransformSpec::Plugin(Box::new(Sum { key: None, total: 0 })));
        let got = run(&mut node, vec![r("a", 1), r("a", 2), r("b", 0), r("c", 5)]).unwrap();
        assert_eq!(got, vec!["a:3", "c:5"]);
    }
}
