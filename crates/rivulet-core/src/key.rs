//! `RecordKey`: ordered subset of a schema's fields used for comparing,
//! grouping and hashing records.
//!
//! A key is resolved against one schema at construction and never changes
//! afterwards. Two keys built over different schemas (driver vs. slave of a
//! join) compare position by position via [`RecordKey::compare_with`]; call
//! [`RecordKey::check_compatible`] once during `init` to reject mismatched
//! arity or types before any record is read.
//!
//! NULL handling:
//! - ordering: NULL sorts before every value (after, for descending fields);
//!   NULL vs NULL is `Equal` so sortedness checks stay consistent.
//! - equality: with `equal_null = false` a NULL in any key field makes the
//!   records unequal, even to another NULL. With `equal_null = true` NULL
//!   equals NULL (and nothing else).

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::{DataType, Schema};
use crate::types::{hash_scalar, scalar_cmp, Record, Scalar};

/// Separators accepted between key field names.
pub const KEY_DELIMITERS: &[char] = &[';', ',', ':', '|'];

/// One resolved key position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyField {
    pub name: String,
    pub index: usize,
    pub data_type: DataType,
    pub ascending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordKey {
    fields: Vec<KeyField>,
    equal_null: bool,
}

impl RecordKey {
    /// Build a key from a delimited spec such as `"customer;date(d)"`.
    ///
    /// Each entry may carry a direction suffix: `(a)`, `(asc)`, `(d)`, `(desc)`.
    /// NULL-equality defaults to `true`; see [`RecordKey::with_equal_null`].
    pub fn parse(schema: &Schema, spec: &str) -> Result<Self> {
        let entries = split_key_spec(spec);
        if entries.is_empty() {
            return Err(Error::Key(format!("empty key specification '{spec}'")));
        }
        let mut parsed = Vec::with_capacity(entries.len());
        for entry in entries {
            parsed.push(parse_key_entry(entry)?);
        }
        let named: Vec<(&str, bool)> = parsed.iter().map(|(n, asc)| (n.as_str(), *asc)).collect();
        Self::with_directions(schema, &named)
    }

    /// All-ascending key over `names`.
    pub fn from_names(schema: &Schema, names: &[&str]) -> Result<Self> {
        let named: Vec<(&str, bool)> = names.iter().map(|n| (*n, true)).collect();
        Self::with_directions(schema, &named)
    }

    pub fn with_directions(schema: &Schema, fields: &[(&str, bool)]) -> Result<Self> {
        if fields.is_empty() {
            return Err(Error::Key("a key needs at least one field".into()));
        }
        let mut resolved = Vec::with_capacity(fields.len());
        for (name, ascending) in fields {
            let index = schema
                .index_of(name)
                .ok_or_else(|| Error::Key(format!("unknown key field '{name}'")))?;
            let data_type = schema.fields[index].data_type;
            resolved.push(KeyField {
                name: (*name).to_string(),
                index,
                data_type,
                ascending: *ascending,
            });
        }
        Ok(Self {
            fields: resolved,
            equal_null: true,
        })
    }

    pub fn with_equal_null(mut self, equal_null: bool) -> Self {
        self.equal_null = equal_null;
        self
    }

    /// Same fields, every direction forced to ascending. Used where only
    /// equality matters (hash probing).
    pub fn ascending(&self) -> Self {
        let mut out = self.clone();
        for f in &mut out.fields {
            f.ascending = true;
        }
        out
    }

    pub fn fields(&self) -> &[KeyField] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn equal_null(&self) -> bool {
        self.equal_null
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Reject a pairing whose arity or per-position types disagree.
    pub fn check_compatible(&self, other: &RecordKey) -> Result<()> {
        if self.fields.len() != other.fields.len() {
            return Err(Error::Key(format!(
                "key arity mismatch: [{}] has {} fields, [{}] has {}",
                self.field_names().join(","),
                self.fields.len(),
                other.field_names().join(","),
                other.fields.len()
            )));
        }
        for (pos, (a, b)) in self.fields.iter().zip(&other.fields).enumerate() {
            if !a.data_type.is_key_compatible(&b.data_type) {
                return Err(Error::Key(format!(
                    "key position {pos}: '{}' is {:?} but '{}' is {:?}",
                    a.name, a.data_type, b.name, b.data_type
                )));
            }
        }
        Ok(())
    }

    /// Three-way comparison of two records of this key's schema.
    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        self.compare_with(a, self, b)
    }

    /// Compare `a` (this key's schema) with `b` (described by `other`).
    ///
    /// Directions come from `self`.
    pub fn compare_with(&self, a: &Record, other: &RecordKey, b: &Record) -> Ordering {
        for (fa, fb) in self.fields.iter().zip(&other.fields) {
            let ord = scalar_cmp(value_at(a, fa.index), value_at(b, fb.index));
            let ord = if fa.ascending { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Key equality; direction flags do not matter here.
    pub fn equals(&self, a: &Record, b: &Record) -> bool {
        self.equals_with(a, self, b)
    }

    pub fn equals_with(&self, a: &Record, other: &RecordKey, b: &Record) -> bool {
        for (fa, fb) in self.fields.iter().zip(&other.fields) {
            let va = value_at(a, fa.index);
            let vb = value_at(b, fb.index);
            if va.is_null() || vb.is_null() {
                if !self.equal_null || !(va.is_null() && vb.is_null()) {
                    return false;
                }
                continue;
            }
            if scalar_cmp(va, vb) != Ordering::Equal {
                return false;
            }
        }
        true
    }

    /// True when any key field of `record` is NULL.
    pub fn has_null(&self, record: &Record) -> bool {
        self.fields.iter().any(|f| value_at(record, f.index).is_null())
    }

    /// Hash consistent with [`RecordKey::equals`] (and across compatible keys).
    pub fn hash_code(&self, record: &Record) -> u64 {
        let mut hasher = blake3::Hasher::new();
        for f in &self.fields {
            hash_scalar(value_at(record, f.index), &mut hasher);
        }
        fold_digest(hasher.finalize())
    }

    /// Materialize the key fields of `record` into an owned value.
    pub fn values(&self, record: &Record) -> KeyValues {
        KeyValues(
            self.fields
                .iter()
                .map(|f| value_at(record, f.index).clone())
                .collect(),
        )
    }

    /// Overwrite this key's fields in `record` with `values` (positionally).
    pub fn assign(&self, record: &mut Record, values: &[Scalar]) -> Result<()> {
        if values.len() != self.fields.len() {
            return Err(Error::Key(format!(
                "expected {} key values, got {}",
                self.fields.len(),
                values.len()
            )));
        }
        for (f, v) in self.fields.iter().zip(values) {
            record
                .set(f.index, v.clone())
                .map_err(|e| Error::Key(e.to_string()))?;
        }
        Ok(())
    }
}

fn value_at<'r>(record: &'r Record, idx: usize) -> &'r Scalar {
    const NULL: &Scalar = &Scalar::Null;
    record.get(idx).unwrap_or(NULL)
}

fn fold_digest(hash: blake3::Hash) -> u64 {
    let bytes = hash.as_bytes();
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(word)
}

pub fn split_key_spec(spec: &str) -> Vec<&str> {
    spec.split(KEY_DELIMITERS)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_key_entry(entry: &str) -> Result<(String, bool)> {
    let Some(open) = entry.find('(') else {
        return Ok((entry.to_string(), true));
    };
    let name = entry[..open].trim();
    let suffix = entry[open + 1..]
        .strip_suffix(')')
        .ok_or_else(|| Error::Key(format!("unterminated direction in '{entry}'")))?;
    let ascending = match suffix.trim().to_ascii_lowercase().as_str() {
        "a" | "asc" | "ascending" => true,
        "d" | "desc" | "descending" => false,
        other => {
            return Err(Error::Key(format!(
                "unknown direction '{other}' for key field '{name}'"
            )))
        }
    };
    if name.is_empty() {
        return Err(Error::Key(format!("missing field name in '{entry}'")));
    }
    Ok((name.to_string(), ascending))
}

/// Owned copy of a record's key fields. Used as the hash-index key so entries
/// stay valid regardless of what happens to the source record.
///
/// Equality is positional [`scalar_cmp`] equality with NULL == NULL; callers
/// that must not match NULL keys filter them out before touching an index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyValues(pub Vec<Scalar>);

impl KeyValues {
    pub fn has_null(&self) -> bool {
        self.0.iter().any(Scalar::is_null)
    }

    pub fn hash_code(&self) -> u64 {
        let mut hasher = blake3::Hasher::new();
        for v in &self.0 {
            hash_scalar(v, &mut hasher);
        }
        fold_digest(hasher.finalize())
    }
}

impl PartialEq for KeyValues {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self
                .0
                .iter()
                .zip(&other.0)
                .all(|(a, b)| scalar_cmp(a, b) == Ordering::Equal)
    }
}

impl Eq for KeyValues {}

impl Hash for KeyValues {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash_code());
    }
}
