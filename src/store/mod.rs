//! Persistence layer — libSQL-backed storage for chat messages, cursors,
//! settings and client profiles.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::Database;
