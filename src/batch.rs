//
// batch.rs
// Dicom-Courier-rs
//
// Registers every DICOM file found under a directory with the delivery queue.
//
// Dicom-Courier-rs contributors - October 2026

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use dicom::core::Tag;
use dicom::dictionary_std::tags;
use dicom::object::open_file;
use serde::Serialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::QueueError;
use crate::models::{PatientSummary, Priority};
use crate::queue::DeliveryQueue;

#[derive(Debug, Default, Serialize)]
pub struct BatchReport {
    pub enqueued: Vec<String>,
    pub skipped: Vec<SkippedFile>,
}

#[derive(Debug, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// `.dcm` files below `dir`, in path order.
pub fn find_dicom_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
        })
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// Read the display fields a queue item carries from a stored file.
///
/// Any conformant file is accepted, not only the ones this crate writes.
pub fn summary_of(path: &Path) -> Result<PatientSummary> {
    let object = open_file(path)
        .with_context(|| format!("Not a readable DICOM file: {}", path.display()))?;
    // absent or non-text elements leave the field empty
    let text = |tag: Tag| {
        object
            .element(tag)
            .ok()
            .and_then(|e| e.to_str().ok())
            .map(|v| v.trim_end_matches([' ', '\0']).to_string())
            .unwrap_or_default()
    };
    Ok(PatientSummary {
        patient_name: text(tags::PATIENT_NAME),
        patient_id: text(tags::PATIENT_ID),
        study_date: text(tags::STUDY_DATE),
    })
}

/// Enqueue every readable file under `dir`; unreadable ones are reported, not fatal.
pub async fn enqueue_directory(
    queue: &DeliveryQueue,
    dir: &Path,
    priority: Priority,
) -> Result<BatchReport> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    let files = find_dicom_files(dir);
    info!(dir = %dir.display(), count = files.len(), "registering directory");

    let mut report = BatchReport::default();
    for path in files {
        let summary = match summary_of(&path) {
            Ok(summary) => summary,
            Err(e) => {
                warn!(path = %path.display(), "skipping: {:#}", e);
                report.skipped.push(SkippedFile {
                    path,
                    reason: format!("{:#}", e),
                });
                continue;
            }
        };
        match queue.enqueue(&path, summary, priority).await {
            Ok(id) => report.enqueued.push(id),
            Err(e @ QueueError::QueueFull { .. }) => {
                return Err(e).context(format!(
                    "Stopped after {} file(s)",
                    report.enqueued.len()
                ))
            }
            Err(e) => report.skipped.push(SkippedFile {
                path,
                reason: e.to_string(),
            }),
        }
    }
    Ok(report)
}
