//! Streaming NDJSON writer: one JSON object per record, keyed by field name.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde_json::{Map, Value};

use rivulet_core::schema::Schema;
use rivulet_core::types::{Record, Scalar};

use crate::error::Result;

pub struct JsonlWriter<W: Write> {
    writer: BufWriter<W>,
    // field order is kept stable across records
    columns: Vec<String>,
}

impl JsonlWriter<File> {
    pub fn to_path(path: impl AsRef<Path>, schema: &Schema) -> Result<Self> {
        let f = File::create(path.as_ref())?;
        Ok(Self::to_writer(f, schema))
    }
}

impl<W: Write> JsonlWriter<W> {
    pub fn to_writer(writer: W, schema: &Schema) -> Self {
        Self {
            writer: BufWriter::new(writer),
            columns: schema.field_names().into_iter().map(str::to_string).collect(),
        }
    }

    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        let mut obj = Map::new();
        for (name, value) in self.columns.iter().zip(record.values()) {
            obj.insert(name.clone(), scalar_to_json(value));
        }
        serde_json::to_writer(&mut self.writer, &Value::Object(obj))?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

fn scalar_to_json(v: &Scalar) -> Value {
    use Scalar::*;
    match v {
        Null => Value::Null,
        Bool(b) => Value::Bool(*b),
        I32(i) => Value::from(*i),
        I64(i) => Value::from(*i),
        F32(f) => Value::from(*f as f64),
        F64(f) => Value::from(*f),
        Str(s) => Value::String(s.clone()),
        Bin(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
        Date64(ms) => Value::from(*ms),
    }
}
