pub mod chunk_handlers;
pub mod health_handlers;
pub mod media_handlers;
pub mod tus_handlers;
