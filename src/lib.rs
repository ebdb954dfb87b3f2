// Library root. Exposes internals for integration tests and the binary.
// The binary entry point is src/main.rs.

pub mod app;
pub mod capabilities;
pub mod config;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod logger;
pub mod rag;
pub mod relationships;
pub mod store;
