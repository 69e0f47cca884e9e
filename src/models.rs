//
// models.rs
// Dicom-Courier-rs
//
// Defines the serializable records exchanged with the capture and UI collaborators:
// patient/study data, destination settings, queue items, summaries and status events.
//
// Dicom-Courier-rs contributors - October 2026

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ErrorKind};

/// AE titles are at most 16 characters on the wire.
const AE_TITLE_MAX: usize = 16;

/// Patient demographics bound into a dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatientRecord {
    /// `Family^Given` display name.
    pub name: String,
    pub id: String,
    /// `YYYYMMDD` or empty.
    pub birth_date: String,
    /// `M`, `F`, `O` or empty.
    pub sex: String,
}

/// Optional study-level display strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudyRecord {
    pub accession_number: String,
    pub study_description: String,
    pub referring_physician: String,
    pub performing_physician: String,
    pub institution: String,
}

/// Remote storage destination, re-read on every delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DestinationConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub called_ae_title: String,
    pub calling_ae_title: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub use_tls: bool,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "localhost".to_string(),
            port: 104,
            called_ae_title: "ORTHANC".to_string(),
            calling_ae_title: "SMARTBOX".to_string(),
            timeout_seconds: 30,
            max_retries: 3,
            retry_delay_seconds: 5,
            use_tls: false,
        }
    }
}

impl DestinationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_seconds)
    }

    /// Attempts allowed before an item is given up; zero means a single attempt.
    pub fn attempt_limit(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Per-attempt deadline: the configured timeout under `cap`, never below one second.
    pub fn attempt_deadline(&self, cap: Duration) -> Duration {
        self.timeout().min(cap).max(Duration::from_secs(1))
    }

    /// Reject settings no association could be opened with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| Err(ConfigError::InvalidDestination(reason.to_string()));
        if self.host.trim().is_empty() {
            return invalid("host is empty");
        }
        if self.port == 0 {
            return invalid("port must be between 1 and 65535");
        }
        for (field, title) in [
            ("called_ae_title", &self.called_ae_title),
            ("calling_ae_title", &self.calling_ae_title),
        ] {
            let title = title.trim();
            if title.is_empty() || title.len() > AE_TITLE_MAX || !title.is_ascii() {
                return invalid(&format!("{} must be 1 to 16 ASCII characters", field));
            }
        }
        Ok(())
    }
}

impl fmt::Display for DestinationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{} (as {})",
            self.called_ae_title, self.host, self.port, self.calling_ae_title
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Uploading,
    Success,
    Failed,
    Cancelled,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Uploading => "uploading",
            Status::Success => "success",
            Status::Failed => "failed",
            Status::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Status::Pending),
            "uploading" => Ok(Status::Uploading),
            "success" => Ok(Status::Success),
            "failed" => Ok(Status::Failed),
            "cancelled" => Ok(Status::Cancelled),
            other => Err(format!("unknown status `{}`", other)),
        }
    }
}

/// Delivery priority; higher variants are served first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Normal,
    High,
    Emergency,
}

/// Patient fields copied onto a queue item for display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatientSummary {
    pub patient_name: String,
    pub patient_id: String,
    pub study_date: String,
}

/// One pending or finished delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub file_path: PathBuf,
    #[serde(default)]
    pub patient_name: String,
    #[serde(default)]
    pub patient_id: String,
    #[serde(default)]
    pub study_date: String,
    pub status: Status,
    #[serde(default)]
    pub priority: Priority,
    pub added_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attempt_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

/// Point-in-time counts over the whole queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSummary {
    pub total: usize,
    pub pending: usize,
    pub uploading: usize,
    pub success: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub processing: bool,
}

/// Pushed to subscribers on every status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub item_id: String,
    /// `None` when the item was just registered.
    pub old_status: Option<Status>,
    pub new_status: Status,
    pub error_kind: Option<ErrorKind>,
}
