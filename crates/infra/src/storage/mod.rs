//! Durable storage adapters

pub mod sqlite;

pub use sqlite::SqliteStorageAdapter;
