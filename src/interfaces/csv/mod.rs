pub mod operation_reader;
pub mod record_writer;
