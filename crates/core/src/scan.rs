//! Aggregate result of one scan pass.

use serde::Serialize;

/// Counters reported at the end of every scan. Individual file failures do
/// not show up here; they live on the file status records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    /// Active server rows loaded for this scan.
    pub servers_total: usize,
    /// Distinct connection identities among those rows.
    pub groups_total: usize,
    /// Groups whose session connected.
    pub groups_processed: usize,
    /// Paths listed successfully.
    pub paths_scanned: usize,
    /// Download tasks put on the download queue.
    pub files_enqueued: usize,
    /// Configuration, connection, listing and enqueue failures.
    pub errors: usize,
}

impl ScanSummary {
    pub fn is_clean(&self) -> bool {
        self.errors == 0
    }
}
