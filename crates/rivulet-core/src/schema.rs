//! Record schemas: ordered, named, typed, nullable fields.
//!
//! A schema is fixed for the lifetime of a port. Operators resolve field names
//! to positions once (at `init`) and work with indices afterwards.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Int32,
    Int64,
    Float32,
    Float64,
    Utf8,
    Binary,
    Date64,
}

impl DataType {
    /// Whether values of `self` and `other` can sit at the same key position.
    ///
    /// Integer widths compare with each other, as do float widths.
    pub fn is_key_compatible(&self, other: &DataType) -> bool {
        use DataType::*;
        matches!(
            (self, other),
            (Int32 | Int64, Int32 | Int64) | (Float32 | Float64, Float32 | Float64)
        ) || self == other
    }

    pub fn parse(s: &str) -> Result<Self> {
        let dt = match s.trim().to_ascii_lowercase().as_str() {
            "boolean" | "bool" => DataType::Boolean,
            "int32" | "integer" | "int" => DataType::Int32,
            "int64" | "long" => DataType::Int64,
            "float32" | "float" => DataType::Float32,
            "float64" | "double" | "number" => DataType::Float64,
            "utf8" | "string" => DataType::Utf8,
            "binary" | "bytes" => DataType::Binary,
            "date64" | "date" => DataType::Date64,
            other => return Err(Error::Schema(format!("unknown data type '{other}'"))),
        };
        Ok(dt)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, idx: usize) -> Option<&Field> {
        self.fields.get(idx)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Like [`Schema::index_of`] but reports a schema error for unknown names.
    pub fn require(&self, name: &str) -> Result<usize> {
        self.index_of(name).ok_or_else(|| {
            Error::Schema(format!(
                "field '{name}' not found (available: {})",
                self.field_names().join(", ")
            ))
        })
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Field-wise concatenation used for default join/cross outputs.
    ///
    /// Clashing names from later schemas get a `_<n>` suffix where `n` is the
    /// position of the contributing schema.
    pub fn concat(parts: &[&Schema]) -> Schema {
        let mut fields: Vec<Field> = Vec::new();
        for (pos, part) in parts.iter().enumerate() {
            for f in &part.fields {
                let mut field = f.clone();
                if fields.iter().any(|existing| existing.name == field.name) {
                    field.name = format!("{}_{}", field.name, pos);
                }
                fields.push(field);
            }
        }
        Schema { fields }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concat_renames_clashing_fields() {
        let a = Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ]);
        let b = Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("val", DataType::Utf8, true),
        ]);
        let out = Schema::concat(&[&a, &b]);
        assert_eq!(out.field_names(), vec!["id", "name", "id_1", "val"]);
    }

    #[test]
    fn key_compatibility_widens_numbers_only() {
        assert!(DataType::Int32.is_key_compatible(&DataType::Int64));
        assert!(DataType::Float64.is_key_compatible(&DataType::Float32));
        assert!(!DataType::Int64.is_key_compatible(&DataType::Utf8));
        assert!(!DataType::Float64.is_key_compatible(&DataType::Int64));
    }

    #[test]
    fn require_reports_unknown_field() {
        let s = Schema::new(vec![Field::new("id", DataType::Int64, false)]);
        let err = s.require("missing").unwrap_err();
        assert!(err.to_string().contains("missing"));
    }
}
