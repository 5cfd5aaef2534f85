//! User transforms: the callback invoked with matched record tuples.
//!
//! A node never knows where its transform came from. [`TransformSpec`] picks
//! one at configuration time:
//! - `Plugin`: compiled Rust code (any [`RecordTransform`] / [`GroupTransform`];
//!   closures work for record transforms).
//! - `Mapping`: a small field-mapping script from the `transform` attribute.
//! - `Default`: generated from the port schemas (fields matched by name).
//!
//! Record mapping script, entries separated by `;` or newlines:
//! ```text
//! id = $0.id; name = $0.name; val = $1.val; source = "batch"
//! ```
//! Group mapping script (Denormalizer):
//! ```text
//! key = first(key); items = count(); total = sum(amount); last_seen = last(ts)
//! ```

use std::cmp::Ordering;

use rivulet_core::schema::{DataType, Schema};
use rivulet_core::types::{scalar_cmp, Record, Scalar};
use thiserror::Error;

use crate::traits::{OpError, Result};

#[derive(Debug, Clone, Error)]
pub enum TransformError {
    /// Drop this one combination and keep going.
    #[error("row skipped: {0}")]
    SkipRow(String),

    /// Fail the node's run.
    #[error("{0}")]
    Fatal(String),
}

pub type TransformResult<T> = std::result::Result<T, TransformError>;

/// What a record transform wants written.
#[derive(Debug, Clone, PartialEq)]
pub enum Emit {
    /// Suppress output for this tuple.
    Skip,
    /// Write to one output port.
    Port(usize, Record),
    /// Write to every output port.
    All(Record),
}

impl Emit {
    /// The record regardless of routing; for nodes with a single data output.
    pub fn into_record(self) -> Option<Record> {
        match self {
            Emit::Skip => None,
            Emit::Port(_, r) | Emit::All(r) => Some(r),
        }
    }
}

/// Called once per matched tuple. Missing sides (outer joins) are `None`.
pub trait RecordTransform: Send {
    fn init(&mut self, _inputs: &[&Schema], _output: &Schema) -> TransformResult<()> {
        Ok(())
    }

    fn transform(&mut self, inputs: &[Option<&Record>]) -> TransformResult<Emit>;
}

impl<F> RecordTransform for F
where
    F: FnMut(&[Option<&Record>]) -> TransformResult<Emit> + Send,
{
    fn transform(&mut self, inputs: &[Option<&Record>]) -> TransformResult<Emit> {
        self(inputs)
    }
}

/// Stateful per-group accumulator.
pub trait GroupTransform: Send {
    fn init(&mut self, _input: &Schema, _output: &Schema) -> TransformResult<()> {
        Ok(())
    }

    fn append(&mut self, record: &Record) -> TransformResult<()>;

    /// The aggregate for the group just closed; `None` writes nothing.
    fn finish_group(&mut self) -> TransformResult<Option<Record>>;

    /// Reset state for the next group.
    fn clean(&mut self);
}

pub enum TransformSpec<T: ?Sized> {
    Plugin(Box<T>),
    Mapping(String),
    Default,
}

impl<T: ?Sized> TransformSpec<T> {
    /// `Mapping` when the `transform` attribute is set, `Default` otherwise.
    pub fn from_attribute(script: Option<&str>) -> Self {
        match script {
            Some(s) => TransformSpec::Mapping(s.to_string()),
            None => TransformSpec::Default,
        }
    }
}

impl TransformSpec<dyn RecordTransform> {
    pub fn build(self, inputs: &[&Schema], output: &Schema) -> Result<Box<dyn RecordTransform>> {
        let mut transform: Box<dyn RecordTransform> = match self {
            TransformSpec::Plugin(t) => t,
            TransformSpec::Mapping(script) => {
                Box::new(FieldMapping::compile(&script, inputs, output)?)
            }
            TransformSpec::Default => Box::new(FieldMapping::by_name(inputs, output)?),
        };
        transform
            .init(inputs, output)
            .map_err(|e| OpError::Config(format!("transform init: {e}")))?;
        Ok(transform)
    }
}

impl TransformSpec<dyn GroupTransform> {
    pub fn build(self, input: &Schema, output: &Schema) -> Result<Box<dyn GroupTransform>> {
        let mut transform: Box<dyn GroupTransform> = match self {
            TransformSpec::Plugin(t) => t,
            TransformSpec::Mapping(script) => {
                Box::new(GroupMapping::compile(&script, input, output)?)
            }
            TransformSpec::Default => Box::new(GroupMapping::by_name(input, output)?),
        };
        transform
            .init(input, output)
            .map_err(|e| OpError::Config(format!("transform init: {e}")))?;
        Ok(transform)
    }
}

/// Run a transform step: `SkipRow` is logged and becomes `None`, `Fatal`
/// becomes a node error.
pub(crate) fn settle<T>(node: &str, res: TransformResult<T>) -> Result<Option<T>> {
    match res {
        Ok(v) => Ok(Some(v)),
        Err(TransformError::SkipRow(msg)) => {
            tracing::warn!(node, reason = %msg, "transform skipped a row");
            Ok(None)
        }
        Err(TransformError::Fatal(msg)) => Err(OpError::Transform(msg)),
    }
}

/// Convert `value` to `target`, widening numbers and reparsing text.
pub fn coerce(value: &Scalar, target: DataType) -> TransformResult<Scalar> {
    use Scalar::*;
    let out = match (value, target) {
        (Null, _) => Null,
        (v, t) if v.data_type() == Some(t) => v.clone(),
        (I32(i), DataType::Int64) => I64(i64::from(*i)),
        (I64(i), DataType::Int32) => I32(i32::try_from(*i).map_err(|_| {
            TransformError::Fatal(format!("value {i} does not fit Int32"))
        })?),
        (I32(i), DataType::Float64) => F64(f64::from(*i)),
        (I64(i), DataType::Float64) => F64(*i as f64),
        (F32(f), DataType::Float64) => F64(f64::from(*f)),
        (F64(f), DataType::Float32) => F32(*f as f32),
        (v, DataType::Utf8) => Str(v.render()),
        (v, t) => Scalar::parse(&v.render(), t)
            .map_err(|e| TransformError::Fatal(e.to_string()))?,
    };
    Ok(out)
}

#[derive(Debug, Clone)]
enum FieldSource {
    /// First present input in the list wins.
    Fields(Vec<(usize, usize)>),
    Literal(Scalar),
}

/// Builds each output field from input fields or literals.
#[derive(Debug, Clone)]
pub struct FieldMapping {
    sources: Vec<FieldSource>,
    types: Vec<DataType>,
}

impl FieldMapping {
    /// Default mapping: every output field takes the same-named field of the
    /// first input that is present. `name_<n>` also matches field `name` of
    /// input `n`, which is how `Schema::concat` renames clashes.
    pub fn by_name(inputs: &[&Schema], output: &Schema) -> Result<Self> {
        let mut sources = Vec::with_capacity(output.len());
        for field in &output.fields {
            let mut candidates = Vec::new();
            for (pos, schema) in inputs.iter().enumerate() {
                if let Some(idx) = schema.index_of(&field.name) {
                    candidates.push((pos, idx));
                }
            }
            if let Some((base, suffix)) = field.name.rsplit_once('_') {
                if let Ok(pos) = suffix.parse::<usize>() {
                    if let Some(idx) = inputs.get(pos).and_then(|s| s.index_of(base)) {
                        candidates.insert(0, (pos, idx));
                    }
                }
            }
            if candidates.is_empty() {
                return Err(OpError::Config(format!(
                    "output field '{}' has no input field of that name; configure a transform",
                    field.name
                )));
            }
            sources.push(FieldSource::Fields(candidates));
        }
        Ok(Self {
            sources,
            types: output.fields.iter().map(|f| f.data_type).collect(),
        })
    }

    pub fn compile(script: &str, inputs: &[&Schema], output: &Schema) -> Result<Self> {
        let mut sources: Vec<FieldSource> =
            vec![FieldSource::Literal(Scalar::Null); output.len()];
        for (target, expr) in script_entries(script)? {
            let out_idx = output.require(target)?;
            sources[out_idx] = if let Some(lit) = literal(expr) {
                FieldSource::Literal(Scalar::parse(lit, output.fields[out_idx].data_type)?)
            } else if expr.eq_ignore_ascii_case("null") {
                FieldSource::Literal(Scalar::Null)
            } else {
                let (pos, name) = input_ref(expr)?;
                let schema = inputs.get(pos).ok_or_else(|| {
                    OpError::Config(format!("mapping '{target}': no input {pos}"))
                })?;
                FieldSource::Fields(vec![(pos, schema.require(name)?)])
            };
        }
        Ok(Self {
            sources,
            types: output.fields.iter().map(|f| f.data_type).collect(),
        })
    }

    fn apply(&self, inputs: &[Option<&Record>]) -> TransformResult<Record> {
        let mut values = Vec::with_capacity(self.sources.len());
        for (source, ty) in self.sources.iter().zip(&self.types) {
            let value = match source {
                FieldSource::Literal(v) => v.clone(),
                FieldSource::Fields(candidates) => candidates
                    .iter()
                    .find_map(|(pos, idx)| inputs.get(*pos).copied().flatten().and_then(|r| r.get(*idx)))
                    .map(|v| coerce(v, *ty))
                    .transpose()?
                    .unwrap_or(Scalar::Null),
            };
            values.push(value);
        }
        Ok(Record::new(values))
    }
}

impl RecordTransform for FieldMapping {
    fn transform(&mut self, inputs: &[Option<&Record>]) -> TransformResult<Emit> {
        Ok(Emit::All(self.apply(inputs)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Aggregate {
    First,
    Last,
    Count,
    Sum,
    Min,
    Max,
}

#[derive(Debug, Clone)]
struct GroupColumn {
    agg: Aggregate,
    input: usize,
    ty: DataType,
    acc: Option<Scalar>,
    count: u64,
}

/// Group accumulator driven by a `first/last/count/sum/min/max` script.
#[derive(Debug, Clone)]
pub struct GroupMapping {
    columns: Vec<GroupColumn>,
}

impl GroupMapping {
    /// Default: output fields named like input fields take the group's first
    /// value; an output field named `count` not found in the input counts.
    pub fn by_name(input: &Schema, output: &Schema) -> Result<Self> {
        let mut columns = Vec::with_capacity(output.len());
        for field in &output.fields {
            let (agg, idx) = match input.index_of(&field.name) {
                Some(idx) => (Aggregate::First, idx),
                None if field.name == "count" => (Aggregate::Count, 0),
                None => {
                    return Err(OpError::Config(format!(
                        "output field '{}' has no input field of that name; configure a transform",
                        field.name
                    )))
                }
            };
            columns.push(GroupColumn::new(agg, idx, field.data_type));
        }
        Ok(Self { columns })
    }

    pub fn compile(script: &str, input: &Schema, output: &Schema) -> Result<Self> {
        let mut slots: Vec<Option<GroupColumn>> = vec![None; output.len()];
        for (target, expr) in script_entries(script)? {
            let out_idx = output.require(target)?;
            let (func, arg) = match expr.split_once('(') {
                Some((f, rest)) => {
                    let arg = rest.strip_suffix(')').ok_or_else(|| {
                        OpError::Config(format!("mapping '{target}': unterminated call '{expr}'"))
                    })?;
                    (f.trim().to_ascii_lowercase(), arg.trim())
                }
                None => ("first".to_string(), expr),
            };
            let agg = match func.as_str() {
                "first" => Aggregate::First,
                "last" => Aggregate::Last,
                "count" => Aggregate::Count,
                "sum" => Aggregate::Sum,
                "min" => Aggregate::Min,
                "max" => Aggregate::Max,
                other => {
                    return Err(OpError::Config(format!(
                        "mapping '{target}': unknown aggregate '{other}'"
                    )))
                }
            };
            let idx = if agg == Aggregate::Count {
                0
            } else {
                let name = arg.strip_prefix("$0.").unwrap_or(arg);
                input.require(name)?
            };
            slots[out_idx] = Some(GroupColumn::new(agg, idx, output.fields[out_idx].data_type));
        }
        let columns = slots
            .into_iter()
            .zip(&output.fields)
            .map(|(slot, field)| {
                slot.ok_or_else(|| {
                    OpError::Config(format!("mapping leaves output field '{}' unset", field.name))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { columns })
    }
}

impl GroupColumn {
    fn new(agg: Aggregate, input: usize, ty: DataType) -> Self {
        Self {
            agg,
            input,
            ty,
            acc: None,
            count: 0,
        }
    }

    fn feed(&mut self, record: &Record) -> TransformResult<()> {
        self.count += 1;
        let value = record.get(self.input).unwrap_or(&Scalar::Null);
        match self.agg {
            Aggregate::Count => {}
            Aggregate::First => {
                if self.count == 1 {
                    self.acc = Some(value.clone());
                }
            }
            Aggregate::Last => self.acc = Some(value.clone()),
            Aggregate::Min | Aggregate::Max if value.is_null() => {}
            Aggregate::Min | Aggregate::Max => {
                let keep = match &self.acc {
                    None => true,
                    Some(cur) => {
                        let ord = scalar_cmp(value, cur);
                        (self.agg == Aggregate::Min && ord == Ordering::Less)
                            || (self.agg == Aggregate::Max && ord == Ordering::Greater)
                    }
                };
                if keep {
                    self.acc = Some(value.clone());
                }
            }
            Aggregate::Sum => {
                if !value.is_null() {
                    self.acc = Some(add(self.acc.take(), value)?);
                }
            }
        }
        Ok(())
    }

    fn result(&self) -> TransformResult<Scalar> {
        match self.agg {
            Aggregate::Count => coerce(&Scalar::I64(self.count as i64), self.ty),
            _ => match &self.acc {
                Some(v) => coerce(v, self.ty),
                None => Ok(Scalar::Null),
            },
        }
    }

    fn clear(&mut self) {
        self.acc = None;
        self.count = 0;
    }
}

fn add(acc: Option<Scalar>, value: &Scalar) -> TransformResult<Scalar> {
    use Scalar::*;
    let as_int = |v: &Scalar| match v {
        I32(i) => Some(i64::from(*i)),
        I64(i) => Some(*i),
        _ => None,
    };
    let as_float = |v: &Scalar| match v {
        I32(i) => Some(f64::from(*i)),
        I64(i) => Some(*i as f64),
        F32(f) => Some(f64::from(*f)),
        F64(f) => Some(*f),
        _ => None,
    };
    let Some(acc) = acc else {
        return match value {
            I32(_) | I64(_) | F32(_) | F64(_) => Ok(value.clone()),
            other => Err(TransformError::Fatal(format!("cannot sum {other:?}"))),
        };
    };
    if let (Some(a), Some(b)) = (as_int(&acc), as_int(value)) {
        return a
            .checked_add(b)
            .map(I64)
            .ok_or_else(|| TransformError::Fatal("integer overflow in sum".into()));
    }
    match (as_float(&acc), as_float(value)) {
        (Some(a), Some(b)) => Ok(F64(a + b)),
        _ => Err(TransformError::Fatal(format!("cannot sum {value:?}"))),
    }
}

impl GroupTransform for GroupMapping {
    fn append(&mut self, record: &Record) -> TransformResult<()> {
        for col in &mut self.columns {
            col.feed(record)?;
        }
        Ok(())
    }

    fn finish_group(&mut self) -> TransformResult<Option<Record>> {
        let values = self
            .columns
            .iter()
            .map(GroupColumn::result)
            .collect::<TransformResult<Vec<_>>>()?;
        Ok(Some(Record::new(values)))
    }

    fn clean(&mut self) {
        for col in &mut self.columns {
            col.clear();
        }
    }
}

fn script_entries(script: &str) -> Result<Vec<(&str, &str)>> {
    script
        .split(|c| c == ';' || c == '\n')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(|entry| {
            let (target, expr) = entry
                .split_once('=')
                .ok_or_else(|| OpError::Config(format!("mapping entry '{entry}' lacks '='")))?;
            Ok((target.trim(), expr.trim()))
        })
        .collect()
}

fn literal(expr: &str) -> Option<&str> {
    expr.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| expr.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
}

/// `$1.val` or `1.val` → (1, "val").
fn input_ref(expr: &str) -> Result<(usize, &str)> {
    let body = expr.strip_prefix('$').unwrap_or(expr);
    let (pos, name) = body
        .split_once('.')
        .ok_or_else(|| OpError::Config(format!("expected '$<input>.<field>', got '{expr}'")))?;
    let pos = pos
        .trim()
        .parse::<usize>()
        .map_err(|_| OpError::Config(format!("bad input index in '{expr}'")))?;
    Ok((pos, name.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivulet_core::schema::Field;

    fn driver() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ])
    }

    fn slave() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Int32, false),
            Field::new("val", DataType::Utf8, true),
        ])
    }

    fn out() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
            Field::new("val", DataType::Utf8, true),
        ])
    }

    #[test]
    fn default_mapping_coalesces_by_name() {
        let mut t = TransformSpec::<dyn RecordTransform>::Default
            .build(&[&driver(), &slave()], &out())
            .unwrap();
        let d = Record::new(vec![Scalar::I64(2), Scalar::Str("b".into())]);
        let s = Record::new(vec![Scalar::I32(2), Scalar::Str("X".into())]);
        let joined = t.transform(&[Some(&d), Some(&s)]).unwrap().into_record().unwrap();
        assert_eq!(
            joined.values(),
            &[Scalar::I64(2), Scalar::Str("b".into()), Scalar::Str("X".into())]
        );

        // driver side missing: id comes from the slave, widened
        let only_slave = t.transform(&[None, Some(&s)]).unwrap().into_record().unwrap();
        assert_eq!(only_slave.values()[0], Scalar::I64(2));
        assert_eq!(only_slave.values()[1], Scalar::Null);
    }

    #[test]
    fn default_mapping_understands_concat_renames() {
        let concat = Schema::concat(&[&driver(), &slave()]);
        assert_eq!(concat.field_names(), vec!["id", "name", "id_1", "val"]);
        let mut t = TransformSpec::<dyn RecordTransform>::Default
            .build(&[&driver(), &slave()], &concat)
            .unwrap();
        let d = Record::new(vec![Scalar::I64(1), Scalar::Str("a".into())]);
        let s = Record::new(vec![Scalar::I32(7), Scalar::Str("v".into())]);
        let r = t.transform(&[Some(&d), Some(&s)]).unwrap().into_record().unwrap();
        assert_eq!(r.values()[2], Scalar::I32(7));
    }

    #[test]
    fn script_mapping_with_literal() {
        let mut t = TransformSpec::<dyn RecordTransform>::Mapping(
            "id = $1.id; val = $1.val; name = \"joined\"".into(),
        )
        .build(&[&driver(), &slave()], &out())
        .unwrap();
        let d = Record::new(vec![Scalar::I64(1), Scalar::Str("a".into())]);
        let s = Record::new(vec![Scalar::I32(1), Scalar::Str("v".into())]);
        let r = t.transform(&[Some(&d), Some(&s)]).unwrap().into_record().unwrap();
        assert_eq!(
            r.values(),
            &[Scalar::I64(1), Scalar::Str("joined".into()), Scalar::Str("v".into())]
        );
    }

    #[test]
    fn bad_scripts_are_config_errors() {
        let inputs = [&driver(), &slave()];
        for script in ["id $0.id", "nope = $0.id", "id = $5.id", "id = $0.missing"] {
            let err = TransformSpec::<dyn RecordTransform>::Mapping(script.into())
                .build(&inputs, &out())
                .err()
                .unwrap();
            assert!(matches!(err, OpError::Config(_)), "{script}: {err}");
        }
    }

    #[test]
    fn closures_are_plugins() {
        let spec: TransformSpec<dyn RecordTransform> =
            TransformSpec::Plugin(Box::new(|inputs: &[Option<&Record>]| {
                match inputs[1] {
                    Some(_) => Ok(Emit::Skip),
                    None => Err(TransformError::SkipRow("no slave".into())),
                }
            }));
        let mut t = spec.build(&[&driver(), &slave()], &out()).unwrap();
        let d = Record::new(vec![Scalar::I64(1), Scalar::Null]);
        assert_eq!(t.transform(&[Some(&d), Some(&d)]).unwrap(), Emit::Skip);
        assert!(settle("n", t.transform(&[Some(&d), None])).unwrap().is_none());
    }

    #[test]
    fn group_mapping_aggregates() {
        let input = Schema::new(vec![
            Field::new("key", DataType::Utf8, false),
            Field::new("amount", DataType::Int32, true),
        ]);
        let output = Schema::new(vec![
            Field::new("key", DataType::Utf8, false),
            Field::new("n", DataType::Int64, false),
            Field::new("total", DataType::Int64, true),
            Field::new("top", DataType::Int32, true),
        ]);
        let mut g = TransformSpec::<dyn GroupTransform>::Mapping(
            "key = first(key); n = count(); total = sum(amount); top = max(amount)".into(),
        )
        .build(&input, &output)
        .unwrap();
        for amount in [Some(3), None, Some(5)] {
            let rec = Record::new(vec![
                Scalar::Str("k".into()),
                amount.map(Scalar::I32).unwrap_or(Scalar::Null),
            ]);
            g.append(&rec).unwrap();
        }
        let agg = g.finish_group().unwrap().unwrap();
        assert_eq!(
            agg.values(),
            &[Scalar::Str("k".into()), Scalar::I64(3), Scalar::I64(8), Scalar::I32(5)]
        );
        g.clean();
        let empty = g.finish_group().unwrap().unwrap();
        assert_eq!(empty.values()[1], Scalar::I64(0));
    }

    #[test]
    fn default_group_mapping_counts() {
        let input = Schema::new(vec![Field::new("key", DataType::Utf8, false)]);
        let output = Schema::new(vec![
            Field::new("key", DataType::Utf8, false),
            Field::new("count", DataType::Int64, false),
        ]);
        let mut g = TransformSpec::<dyn GroupTransform>::Default
            .build(&input, &output)
            .unwrap();
        g.append(&Record::new(vec![Scalar::Str("a".into())])).unwrap();
        g.append(&Record::new(vec![Scalar::Str("a".into())])).unwrap();
        let agg = g.finish_group().unwrap().unwrap();
        assert_eq!(agg.values(), &[Scalar::Str("a".into()), Scalar::I64(2)]);
    }
}
