//! File reader/writer nodes for the edges of a graph.
//!
//! These are ordinary `Node`s so the driver treats them like any other
//! component: `CSV_READER` has one output port, `FILE_WRITER` one input port.

use std::fs::File;

use rivulet_core::attributes::Attributes;
use rivulet_io::readers::CsvRecordReader;
use rivulet_io::writers::{CsvRecordWriter, JsonlWriter};
use rivulet_operators::traits::finish;
use rivulet_operators::{Node, NodeContext, NodeIo, OpError, Outcome, PortSchemas, Registry, Result};

pub const CSV_READER: &str = "CSV_READER";
pub const FILE_WRITER: &str = "FILE_WRITER";

/// Add the file adapters to `registry`.
pub fn register(registry: &mut Registry) {
    registry.register(CSV_READER, make_reader);
    registry.register(FILE_WRITER, make_writer);
}

fn make_reader(attrs: &Attributes, ports: PortSchemas) -> Result<Box<dyn Node>> {
    Ok(Box::new(CsvSource::from_attributes(attrs, ports)?))
}

fn make_writer(attrs: &Attributes, ports: PortSchemas) -> Result<Box<dyn Node>> {
    Ok(Box::new(FileSink::from_attributes(attrs, ports)?))
}

/// Streams a CSV file into output port 0, parsed against that port's schema.
pub struct CsvSource {
    ports: PortSchemas,
    path: String,
    header: bool,
}

impl CsvSource {
    pub fn from_attributes(attrs: &Attributes, ports: PortSchemas) -> Result<Self> {
        ports.expect((0, 0), (1, 1))?;
        Ok(Self {
            path: attrs.require("fileURL")?.to_string(),
            header: attrs.get_bool("header", true)?,
            ports,
        })
    }

    fn run(&mut self, io: &mut NodeIo, ctx: &NodeContext) -> Result<()> {
        let schema = self.ports.output(0)?.clone();
        let mut reader = CsvRecordReader::from_path(&self.path, schema, self.header)?;
        while let Some(record) = reader.read_record()? {
            io.outputs[0].write(record)?;
            ctx.checkpoint()?;
        }
        Ok(())
    }
}

impl Node for CsvSource {
    fn component_type(&self) -> &'static str {
        CSV_READER
    }

    fn ports(&self) -> &PortSchemas {
        &self.ports
    }

    fn init(&mut self, _ctx: &NodeContext) -> Result<()> {
        if !std::path::Path::new(&self.path).is_file() {
            return Err(OpError::Config(format!("input file '{}' not found", self.path)));
        }
        Ok(())
    }

    fn execute(&mut self, io: &mut NodeIo, ctx: &NodeContext) -> Result<Outcome> {
        io.require(0, 1)?;
        let body = self.run(io, ctx);
        finish(io, ctx, body)
    }

    fn free(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Csv,
    Jsonl,
}

enum Writer {
    Csv(CsvRecordWriter<File>),
    Jsonl(JsonlWriter<File>),
}

/// Writes input port 0 to a file as CSV (NULL as an empty cell) or JSONL.
pub struct FileSink {
    ports: PortSchemas,
    path: String,
    format: Format,
    header: bool,
}

impl FileSink {
    pub fn from_attributes(attrs: &Attributes, ports: PortSchemas) -> Result<Self> {
        ports.expect((1, 1), (0, 0))?;
        let path = attrs.require("fileURL")?.to_string();
        let format = match attrs.get("format") {
            Some(f) if f.eq_ignore_ascii_case("csv") => Format::Csv,
            Some(f) if f.eq_ignore_ascii_case("jsonl") => Format::Jsonl,
            Some(other) => {
                return Err(OpError::Config(format!("unknown output format '{other}'")))
            }
            None if path.ends_with(".jsonl") => Format::Jsonl,
            None => Format::Csv,
        };
        Ok(Self {
            path,
            format,
            header: attrs.get_bool("header", true)?,
            ports,
        })
    }

    fn run(&mut self, io: &mut NodeIo, ctx: &NodeContext) -> Result<()> {
        let schema = self.ports.input(0)?;
        let mut writer = match self.format {
            Format::Csv => Writer::Csv(CsvRecordWriter::to_path(&self.path, schema, self.header)?),
            Format::Jsonl => Writer::Jsonl(JsonlWriter::to_path(&self.path, schema)?),
        };
        while let Some(record) = io.inputs[0].read()? {
            match &mut writer {
                Writer::Csv(w) => w.write_record(&record)?,
                Writer::Jsonl(w) => w.write_record(&record)?,
            }
            ctx.checkpoint()?;
        }
        match writer {
            Writer::Csv(w) => {
                w.finish()?;
            }
            Writer::Jsonl(mut w) => w.flush()?,
        }
        Ok(())
    }
}

impl Node for FileSink {
    fn component_type(&self) -> &'static str {
        FILE_WRITER
    }

    fn ports(&self) -> &PortSchemas {
        &self.ports
    }

    fn init(&mut self, _ctx: &NodeContext) -> Result<()> {
        Ok(())
    }

    fn execute(&mut self, io: &mut NodeIo, ctx: &NodeContext) -> Result<Outcome> {
        io.require(1, 0)?;
        let body = self.run(io, ctx);
        finish(io, ctx, body)
    }

    fn free(&mut self) {}
}
