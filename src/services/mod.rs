pub mod chunk_coordinator;
pub mod chunk_ledger;
pub mod chunk_store;
pub mod error;
pub mod file_ops;
pub mod finalizer;
pub mod keyed_locks;
pub mod owner;
pub mod range_reader;
pub mod stream_coordinator;
pub mod stream_ledger;
pub mod stream_writer;
pub mod task_queue;
