//! Naming rules for cache keys, staging directories, buckets and object keys.
//!
//! Every place that derives a name from a host, a remote path or a date goes
//! through these functions so the scanner, the download worker and the
//! upload worker agree on them.

use std::path::{Component, Path, PathBuf};

use chrono::NaiveDate;

/// Prefix of every bucket created for a remote server.
pub const BUCKET_PREFIX: &str = "server-";

/// Change cache key for one remote directory: `"{host}:{path}"`.
pub fn cache_key(host: &str, remote_path: &str) -> String {
    format!("{host}:{remote_path}")
}

/// Object key of a file inside its bucket: `"{remote_path}/{YYYY-MM-DD}/{filename}"`.
pub fn object_key(remote_path: &str, date: NaiveDate, filename: &str) -> String {
    format!("{remote_path}/{}/{filename}", date.format("%Y-%m-%d"))
}

/// Bucket that receives every file pulled from `host`.
///
/// Dots become hyphens (`10.0.0.5` -> `server-10-0-0-5`). Any other
/// character S3 does not accept in bucket names is replaced the same way.
pub fn bucket_name(host: &str) -> String {
    let sanitized: String = host
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    format!("{BUCKET_PREFIX}{sanitized}")
}

/// Final location recorded on the status record: `"{bucket}/{object_key}"`.
pub fn object_path(bucket: &str, object_key: &str) -> String {
    format!("{bucket}/{object_key}")
}

/// Staging directory relative to the staging root:
/// `{host}/{remote_path without leading '/'}/{YYYY-MM-DD}`.
///
/// Only normal path components of `remote_path` are kept, so `..` and
/// absolute prefixes cannot move the result outside the staging root.
pub fn staging_relative(host: &str, remote_path: &str, date: NaiveDate) -> PathBuf {
    let mut dir = PathBuf::from(sanitize_segment(host));
    for component in Path::new(remote_path).components() {
        if let Component::Normal(part) = component {
            dir.push(part);
        }
    }
    dir.push(date.format("%Y-%m-%d").to_string());
    dir
}

fn sanitize_segment(segment: &str) -> String {
    if segment == "." || segment == ".." {
        return "_".to_string();
    }
    segment
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect()
}
