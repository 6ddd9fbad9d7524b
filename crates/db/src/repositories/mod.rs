//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` as the first argument.

pub mod file_repo;
pub mod scan_cache_repo;
pub mod server_repo;
pub mod task_repo;

pub use file_repo::FileRepo;
pub use scan_cache_repo::ScanCacheRepo;
pub use server_repo::ServerRepo;
pub use task_repo::TaskRepo;
