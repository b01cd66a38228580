//! Resumable upload service: tus-style stream uploads, chunk-indexed
//! uploads, finalization into durable storage, and ranged file reads.

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
