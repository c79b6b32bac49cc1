pub mod memory_store;
pub mod pg_store;
pub mod record_store;

pub use memory_store::MemoryRecordStore;
pub use pg_store::PgRecordStore;
pub use record_store::RecordStore;
