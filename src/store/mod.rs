//! SQLite-backed collections sharing one database file.
//!
//! Every store is a cheap `Clone` over [`Database`] and opens a fresh
//! connection per call; the async layer drives them via `spawn_blocking`.

pub mod core;
pub mod encounters;
pub mod incidents;
pub mod relationships;
pub mod statutes;
pub mod vector;

pub use self::core::Database;
