//! `Record` → CSV writer. NULL renders as an empty cell.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use rivulet_core::schema::Schema;
use rivulet_core::types::Record;

use crate::error::Result;

pub struct CsvRecordWriter<W: Write> {
    writer: csv::Writer<W>,
    written: u64,
}

impl CsvRecordWriter<File> {
    pub fn to_path(path: impl AsRef<Path>, schema: &Schema, headers: bool) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path.as_ref())?;
        Self::to_writer(file, schema, headers)
    }
}

impl<W: Write> CsvRecordWriter<W> {
    pub fn to_writer(writer: W, schema: &Schema, headers: bool) -> Result<Self> {
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
        if headers {
            writer.write_record(schema.field_names())?;
        }
        Ok(Self { writer, written: 0 })
    }

    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        self.writer
            .write_record(record.values().iter().map(|v| v.render()))?;
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn finish(mut self) -> Result<W> {
        self.writer.flush()?;
        self.writer
            .into_inner()
            .map_err(|e| crate::error::Error::Io(e.into_error()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivulet_core::schema::{DataType, Field};
    use rivulet_core::types::Scalar;

    #[test]
    fn renders_header_and_nulls() {
        let schema = Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("val", DataType::Utf8, true),
        ]);
        let mut w = CsvRecordWriter::to_writer(Vec::new(), &schema, true).unwrap();
        w.write_record(&Record::new(vec![Scalar::I64(2), Scalar::Str("X".into())]))
            .unwrap();
        w.write_record(&Record::new(vec![Scalar::I64(3), Scalar::Null]))
            .unwrap();
        assert_eq!(w.written(), 2);
        let out = String::from_utf8(w.finish().unwrap()).unwrap();
        assert_eq!(out, "id,val\n2,X\n3,\n");
    }
}
