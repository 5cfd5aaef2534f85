//! CSV → `Record` reader bound to a declared schema.
//!
//! Columns are matched by position. With headers enabled the header row is
//! checked against the schema's field names. Empty cells are NULL.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use rivulet_core::schema::Schema;
use rivulet_core::types::{Record, Scalar};

use crate::error::{Error, Result};

pub struct CsvRecordReader<R: Read> {
    reader: csv::Reader<R>,
    schema: Schema,
    row: csv::StringRecord,
    line: u64,
}

impl CsvRecordReader<File> {
    pub fn from_path(path: impl AsRef<Path>, schema: Schema, has_headers: bool) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::from_reader(file, schema, has_headers)
    }
}

impl<R: Read> CsvRecordReader<R> {
    pub fn from_reader(reader: R, schema: Schema, has_headers: bool) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(has_headers)
            .flexible(false)
            .from_reader(reader);
        if has_headers {
            let headers = reader.headers()?;
            let names: Vec<&str> = headers.iter().map(str::trim).collect();
            if names != schema.field_names() {
                return Err(Error::Config(format!(
                    "csv header [{}] does not match schema [{}]",
                    names.join(","),
                    schema.field_names().join(",")
                )));
            }
        }
        Ok(Self {
            reader,
            schema,
            row: csv::StringRecord::new(),
            line: 0,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Next record, or `None` at end of input.
    pub fn read_record(&mut self) -> Result<Option<Record>> {
        if !self.reader.read_record(&mut self.row)? {
            return Ok(None);
        }
        self.line += 1;
        if self.row.len() != self.schema.len() {
            return Err(Error::Config(format!(
                "csv row {} has {} fields, schema expects {}",
                self.line,
                self.row.len(),
                self.schema.len()
            )));
        }
        let mut values = Vec::with_capacity(self.schema.len());
        for (cell, field) in self.row.iter().zip(&self.schema.fields) {
            values.push(Scalar::parse(cell, field.data_type)?);
        }
        let record = Record::new(values);
        record.conforms_to(&self.schema)?;
        Ok(Some(record))
    }
}

impl<R: Read> Iterator for CsvRecordReader<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}
