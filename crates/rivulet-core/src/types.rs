//! Scalar values and the row-oriented `Record` that flows through ports.
//!
//! Records are plain owned values. Anything an operator keeps across loop
//! iterations is either moved out of the port or cloned; nothing aliases a
//! reader's buffer.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::{DataType, Schema};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Null,
    Bool(bool),
    I32(i32),
    I64(i64),
    F32(#[serde(with = "f32_bits")] f32),
    F64(#[serde(with = "f64_bits")] f64),
    Str(String),
    Bin(Vec<u8>),
    /// Milliseconds since the Unix epoch.
    Date64(i64),
}

// Floats serialize as their IEEE bit pattern: JSON has no NaN or infinity,
// and spilled records must read back bit-identical.
mod f32_bits {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &f32, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_u32(v.to_bits())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<f32, D::Error> {
        u32::deserialize(d).map(f32::from_bits)
    }
}

mod f64_bits {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &f64, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_u64(v.to_bits())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<f64, D::Error> {
        u64::deserialize(d).map(f64::from_bits)
    }
}

impl Scalar {
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Scalar::Null => None,
            Scalar::Bool(_) => Some(DataType::Boolean),
            Scalar::I32(_) => Some(DataType::Int32),
            Scalar::I64(_) => Some(DataType::Int64),
            Scalar::F32(_) => Some(DataType::Float32),
            Scalar::F64(_) => Some(DataType::Float64),
            Scalar::Str(_) => Some(DataType::Utf8),
            Scalar::Bin(_) => Some(DataType::Binary),
            Scalar::Date64(_) => Some(DataType::Date64),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// Parse a textual value into the given type. Empty text is NULL.
    pub fn parse(text: &str, data_type: DataType) -> Result<Scalar> {
        if text.is_empty() {
            return Ok(Scalar::Null);
        }
        let bad = |e: &dyn std::fmt::Display| {
            Error::Schema(format!("cannot parse '{text}' as {data_type:?}: {e}"))
        };
        let v = match data_type {
            DataType::Boolean => Scalar::Bool(text.trim().parse::<bool>().map_err(|e| bad(&e))?),
            DataType::Int32 => Scalar::I32(text.trim().parse::<i32>().map_err(|e| bad(&e))?),
            DataType::Int64 => Scalar::I64(text.trim().parse::<i64>().map_err(|e| bad(&e))?),
            DataType::Float32 => Scalar::F32(text.trim().parse::<f32>().map_err(|e| bad(&e))?),
            DataType::Float64 => Scalar::F64(text.trim().parse::<f64>().map_err(|e| bad(&e))?),
            DataType::Utf8 => Scalar::Str(text.to_string()),
            DataType::Binary => Scalar::Bin(text.as_bytes().to_vec()),
            DataType::Date64 => Scalar::Date64(text.trim().parse::<i64>().map_err(|e| bad(&e))?),
        };
        Ok(v)
    }

    /// Textual form used by the CSV writer. NULL renders as the empty string.
    pub fn render(&self) -> String {
        match self {
            Scalar::Null => String::new(),
            Scalar::Bool(b) => b.to_string(),
            Scalar::I32(i) => i.to_string(),
            Scalar::I64(i) => i.to_string(),
            Scalar::F32(f) => f.to_string(),
            Scalar::F64(f) => f.to_string(),
            Scalar::Str(s) => s.clone(),
            Scalar::Bin(b) => String::from_utf8_lossy(b).into_owned(),
            Scalar::Date64(ms) => ms.to_string(),
        }
    }

    /// Rough in-memory size, used for budget accounting.
    pub fn approx_bytes(&self) -> usize {
        let inline = std::mem::size_of::<Scalar>();
        match self {
            Scalar::Str(s) => inline + s.len(),
            Scalar::Bin(b) => inline + b.len(),
            _ => inline,
        }
    }
}

/// One row: an ordered sequence of nullable values matching some schema.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    values: Vec<Scalar>,
}

impl Record {
    pub fn new(values: Vec<Scalar>) -> Self {
        Self { values }
    }

    /// A record of `width` NULLs.
    pub fn nulls(width: usize) -> Self {
        Self {
            values: vec![Scalar::Null; width],
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Scalar> {
        self.values.get(idx)
    }

    pub fn set(&mut self, idx: usize, value: Scalar) -> Result<()> {
        let width = self.values.len();
        let slot = self.values.get_mut(idx).ok_or_else(|| {
            Error::Schema(format!("field index {idx} out of range for record of width {width}"))
        })?;
        *slot = value;
        Ok(())
    }

    pub fn values(&self) -> &[Scalar] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Scalar> {
        self.values
    }

    /// Field-wise concatenation. A missing part contributes `width` NULLs.
    pub fn concat(parts: &[(Option<&Record>, usize)]) -> Record {
        let total = parts.iter().map(|(_, w)| *w).sum();
        let mut values = Vec::with_capacity(total);
        for (part, width) in parts {
            match part {
                Some(rec) => values.extend(rec.values.iter().cloned()),
                None => values.extend(std::iter::repeat(Scalar::Null).take(*width)),
            }
        }
        Record { values }
    }

    /// Check width and per-field types against `schema`.
    pub fn conforms_to(&self, schema: &Schema) -> Result<()> {
        if self.values.len() != schema.len() {
            return Err(Error::Schema(format!(
                "record has {} fields, schema expects {}",
                self.values.len(),
                schema.len()
            )));
        }
        for (value, field) in self.values.iter().zip(&schema.fields) {
            match value.data_type() {
                None if !field.nullable => {
                    return Err(Error::Schema(format!("NULL in non-nullable field '{}'", field.name)))
                }
                Some(dt) if dt != field.data_type => {
                    return Err(Error::Schema(format!(
                        "field '{}' expects {:?}, got {:?}",
                        field.name, field.data_type, dt
                    )))
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn approx_bytes(&self) -> usize {
        std::mem::size_of::<Record>() + self.values.iter().map(Scalar::approx_bytes).sum::<usize>()
    }
}

impl From<Vec<Scalar>> for Record {
    fn from(values: Vec<Scalar>) -> Self {
        Record::new(values)
    }
}

/// Compare two non-null scalars.
///
/// Integer widths compare numerically with each other, as do floats; NaN sorts
/// after every other float. Values of unrelated types order by type rank so the
/// result stays a total order.
pub fn scalar_cmp(a: &Scalar, b: &Scalar) -> Ordering {
    use Scalar::*;

    match (a, b) {
        (Null, Null) => Ordering::Equal,
        (Null, _) => Ordering::Less,
        (_, Null) => Ordering::Greater,
        (Bool(x), Bool(y)) => x.cmp(y),
        (I32(x), I32(y)) => x.cmp(y),
        (I64(x), I64(y)) => x.cmp(y),
        (I32(x), I64(y)) => (*x as i64).cmp(y),
        (I64(x), I32(y)) => x.cmp(&(*y as i64)),
        (F32(x), F32(y)) => float_cmp(*x as f64, *y as f64),
        (F64(x), F64(y)) => float_cmp(*x, *y),
        (F32(x), F64(y)) => float_cmp(*x as f64, *y),
        (F64(x), F32(y)) => float_cmp(*x, *y as f64),
        (Str(x), Str(y)) => x.cmp(y),
        (Bin(x), Bin(y)) => x.cmp(y),
        (Date64(x), Date64(y)) => x.cmp(y),
        _ => scalar_type_order(a).cmp(&scalar_type_order(b)),
    }
}

fn float_cmp(x: f64, y: f64) -> Ordering {
    if x.is_nan() && y.is_nan() {
        Ordering::Equal
    } else if x.is_nan() {
        Ordering::Greater
    } else if y.is_nan() {
        Ordering::Less
    } else {
        x.partial_cmp(&y).unwrap_or(Ordering::Equal)
    }
}

/// Numeric rank of a scalar's type for mixed-type comparisons.
///
/// Widths of the same numeric family share a rank.
pub(crate) fn scalar_type_order(s: &Scalar) -> u8 {
    use Scalar::*;
    match s {
        Null => 0,
        Bool(_) => 1,
        I32(_) | I64(_) => 2,
        F32(_) | F64(_) => 4,
        Str(_) => 6,
        Bin(_) => 7,
        Date64(_) => 8,
    }
}

/// Feed a scalar into a hasher, widening numbers so that equal values of
/// different widths hash identically.
pub(crate) fn hash_scalar(scalar: &Scalar, hasher: &mut blake3::Hasher) {
    use Scalar::*;

    // Write type discriminant first
    hasher.update(&[scalar_type_order(scalar)]);

    match scalar {
        Null => {}
        Bool(b) => {
            hasher.update(&[*b as u8]);
        }
        I32(i) => {
            hasher.update(&(*i as i64).to_le_bytes());
        }
        I64(i) => {
            hasher.update(&i.to_le_bytes());
        }
        F32(f) => {
            hasher.update(&canonical_float_bits(*f as f64).to_le_bytes());
        }
        F64(f) => {
            hasher.update(&canonical_float_bits(*f).to_le_bytes());
        }
        Str(s) => {
            hasher.update(&(s.len() as u64).to_le_bytes());
            hasher.update(s.as_bytes());
        }
        Bin(b) => {
            hasher.update(&(b.len() as u64).to_le_bytes());
            hasher.update(b);
        }
        Date64(ms) => {
            hasher.update(&ms.to_le_bytes());
        }
    }
}

// -0.0 == 0.0 and all NaNs compare equal, so they must hash alike too.
fn canonical_float_bits(f: f64) -> u64 {
    if f.is_nan() {
        f64::NAN.to_bits()
    } else if f == 0.0 {
        0
    } else {
        f.to_bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_finite_floats_survive_json() {
        let values = vec![
            Scalar::F64(f64::NAN),
            Scalar::F64(f64::INFINITY),
            Scalar::F64(-0.0),
            Scalar::F32(f32::NEG_INFINITY),
        ];
        let back: Vec<Scalar> = serde_json::from_slice(&serde_json::to_vec(&values).unwrap()).unwrap();
        let bits: Vec<u64> = back
            .iter()
            .map(|v| match v {
                Scalar::F64(f) => f.to_bits(),
                Scalar::F32(f) => u64::from(f.to_bits()),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(
            bits,
            vec![
                f64::NAN.to_bits(),
                f64::INFINITY.to_bits(),
                (-0.0f64).to_bits(),
                u64::from(f32::NEG_INFINITY.to_bits()),
            ]
        );
    }

    #[test]
    fn mixed_width_integers_compare_numerically() {
        assert_eq!(scalar_cmp(&Scalar::I32(5), &Scalar::I64(5)), Ordering::Equal);
        assert_eq!(scalar_cmp(&Scalar::I64(-1), &Scalar::I32(3)), Ordering::Less);
    }

    #[test]
    fn nan_sorts_last() {
        assert_eq!(
            scalar_cmp(&Scalar::F64(f64::NAN), &Scalar::F64(1e300)),
            Ordering::Greater
        );
    }

    #[test]
    fn concat_pads_missing_parts_with_nulls() {
        let a = Record::new(vec![Scalar::I64(1), Scalar::Str("a".into())]);
        let out = Record::concat(&[(Some(&a), 2), (None, 1)]);
        assert_eq!(
            out.values(),
            &[Scalar::I64(1), Scalar::Str("a".into()), Scalar::Null]
        );
    }

    #[test]
    fn parse_empty_is_null() {
        assert_eq!(Scalar::parse("", DataType::Int64).unwrap(), Scalar::Null);
        assert_eq!(Scalar::parse("42", DataType::Int32).unwrap(), Scalar::I32(42));
        assert!(Scalar::parse("x", DataType::Int32).is_err());
    }

    #[test]
    fn conforms_to_checks_types_and_nullability() {
        use crate::schema::Field;
        let schema = Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ]);
        assert!(Record::new(vec![Scalar::I64(1), Scalar::Null]).conforms_to(&schema).is_ok());
        assert!(Record::new(vec![Scalar::Null, Scalar::Null]).conforms_to(&schema).is_err());
        assert!(Record::new(vec![Scalar::I32(1), Scalar::Null]).conforms_to(&schema).is_err());
    }
}
