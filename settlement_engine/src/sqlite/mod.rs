//! SQLite backend for the settlement engine.
//!
//! Migrations live in `migrations/` and are embedded into the binary. Call [`SqliteDatabase::migrate`] once at
//! startup.
mod sqlite_impl;

pub mod db;
pub use sqlite_impl::SqliteDatabase;
