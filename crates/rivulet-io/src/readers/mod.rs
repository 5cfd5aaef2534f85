//! Record readers for the edges of a graph.

pub mod csv;

pub use self::csv::CsvRecordReader;
