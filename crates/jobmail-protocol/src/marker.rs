//! Marker-file filter for the emitting side.
//!
//! A filesystem watcher on each compute node reports every created file;
//! only files whose name starts with `RELION_JOB_EXIT` become notices.

use std::path::Path;

use chrono::Local;
use jobmail_core::MARKER_PREFIX;

use crate::notice::RawJobNotice;

/// Returns true if a file name looks like a RELION exit marker.
pub fn is_exit_marker(file_name: &str) -> bool {
    file_name.starts_with(MARKER_PREFIX)
}

/// Local timestamp in ISO-8601 form with microseconds, e.g.
/// `2024-03-01T10:15:00.123456`.
pub fn local_timestamp() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// Builds a notice for a freshly created marker file.
///
/// Returns `None` if the path has no file name or the name is not an exit
/// marker.
pub fn notice_for_marker(path: &Path, nodename: &str) -> Option<RawJobNotice> {
    let file_name = path.file_name()?.to_str()?;
    if !is_exit_marker(file_name) {
        return None;
    }

    Some(RawJobNotice::new(
        path.to_string_lossy(),
        nodename,
        local_timestamp(),
    ))
}
