//! Row structs and DTOs.
//!
//! Each submodule contains a `FromRow` entity struct matching the database
//! row, plus the input DTOs its repository accepts.

pub mod file;
pub mod scan_cache;
pub mod server;
pub mod status;
pub mod task;
