pub mod batch_writer;
pub mod contracts_db;
