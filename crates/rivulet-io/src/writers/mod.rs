//! Streaming record writers.

pub mod csv;
pub mod jsonl;

pub use self::csv::CsvRecordWriter;
pub use self::jsonl::JsonlWriter;
