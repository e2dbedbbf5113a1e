//! Job completion events.
//!
//! A [`JobEvent`] describes one RELION job that wrote its exit marker on an
//! origin node. Only `path`, `nodename` and `time` travel over the wire and
//! into the queue file; the status and job number are derived from `path`
//! when the event is constructed, so a value of this type is always
//! well-formed.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Prefix of the marker file RELION writes when a job exits.
pub const MARKER_PREFIX: &str = "RELION_JOB_EXIT";

/// Width of a job directory name such as `job042`.
const JOB_DIR_LEN: usize = 6;

/// Terminal status of a job, encoded in the marker file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Success,
    Failure,
    Aborted,
}

impl JobStatus {
    /// Parses the suffix that follows `RELION_JOB_EXIT_` in a marker name.
    pub fn from_marker_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "SUCCESS" => Some(Self::Success),
            "FAILURE" => Some(Self::Failure),
            "ABORTED" => Some(Self::Aborted),
            _ => None,
        }
    }

    /// Returns the status as it appears in the marker name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One finished job reported by an origin node.
///
/// Equality compares all five fields. `status` and `job_number` are a pure
/// function of `path`, so two events are equal exactly when their path,
/// node name and time are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobEvent {
    path: String,
    nodename: String,
    time: String,
    status: JobStatus,
    job_number: u32,
}

impl JobEvent {
    /// Builds an event, validating the marker path.
    ///
    /// # Errors
    ///
    /// - `DomainError::MissingField` if any of the three fields is empty
    /// - `DomainError::InvalidFieldValue` if the marker name does not start
    ///   with `RELION_JOB_EXIT_` followed by a known status, or if the parent
    ///   directory is not `job` followed by exactly three digits
    pub fn new(
        path: impl Into<String>,
        nodename: impl Into<String>,
        time: impl Into<String>,
    ) -> DomainResult<Self> {
        let path = path.into();
        let nodename = nodename.into();
        let time = time.into();

        if path.is_empty() {
            return Err(DomainError::missing("path"));
        }
        if nodename.is_empty() {
            return Err(DomainError::missing("nodename"));
        }
        if time.is_empty() {
            return Err(DomainError::missing("time"));
        }

        let (dir, file_name) = split_path(&path);
        let status = parse_status(file_name)?;
        let job_number = parse_job_number(basename(dir))?;

        Ok(Self {
            path,
            nodename,
            time,
            status,
            job_number,
        })
    }

    /// Absolute path of the marker file on the origin node.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Origin host identifier.
    pub fn nodename(&self) -> &str {
        &self.nodename
    }

    /// ISO-8601 timestamp assigned by the origin node.
    pub fn time(&self) -> &str {
        &self.time
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn job_number(&self) -> u32 {
        self.job_number
    }

    /// Directory containing the marker file, i.e. the job directory.
    pub fn job_dir(&self) -> &str {
        split_path(&self.path).0
    }
}

/// Splits a `/`-separated path into (directory, file name).
fn split_path(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some((dir, name)) => (dir, name),
        None => ("", path),
    }
}

fn basename(path: &str) -> &str {
    split_path(path).1
}

fn parse_status(file_name: &str) -> DomainResult<JobStatus> {
    let expected = "RELION_JOB_EXIT_{SUCCESS|FAILURE|ABORTED}";
    let suffix = file_name
        .strip_prefix(MARKER_PREFIX)
        .and_then(|rest| rest.strip_prefix('_'))
        .ok_or_else(|| DomainError::invalid("marker name", file_name, expected))?;

    JobStatus::from_marker_suffix(suffix)
        .ok_or_else(|| DomainError::invalid("job status", suffix, expected))
}

fn parse_job_number(dir_name: &str) -> DomainResult<u32> {
    let expected = "job followed by three digits";
    let digits = dir_name
        .strip_prefix("job")
        .filter(|_| dir_name.len() == JOB_DIR_LEN)
        .filter(|d| d.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| DomainError::invalid("job directory", dir_name, expected))?;

    digits
        .parse()
        .map_err(|_| DomainError::invalid("job directory", dir_name, expected))
}
