pub mod models;
pub mod store;
pub mod writer;

pub use store::Storage;
pub use writer::IngestWriter;
