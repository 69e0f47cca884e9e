//
// config.rs
// Dicom-Courier-rs
//
// Application configuration stored as JSON: destination, queue tunables, output
// directory and the emergency patient templates.
//
// Dicom-Courier-rs contributors - October 2026

use std::path::{Path, PathBuf};

use chrono::{DateTime, Days, Local, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::models::{DestinationConfig, PatientRecord, StudyRecord};
use crate::queue::QueueSettings;
use crate::storage::write_atomically;
use crate::uid::DEFAULT_UID_ROOT;

pub const DEFAULT_CONFIG_PATH: &str = "courier.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub destination: DestinationConfig,
    pub queue: QueueSettings,
    pub output_dir: PathBuf,
    /// Register every created file with the queue.
    pub auto_enqueue: bool,
    pub log_level: String,
    pub uid_root: String,
    pub emergency_templates: Vec<PatientTemplate>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            destination: DestinationConfig::default(),
            queue: QueueSettings::default(),
            output_dir: PathBuf::from("captures"),
            auto_enqueue: true,
            log_level: "info".to_string(),
            uid_root: DEFAULT_UID_ROOT.to_string(),
            emergency_templates: default_templates(),
        }
    }
}

impl AppConfig {
    /// Read `path`, falling back to defaults when it does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match std::fs::read(path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        // pretty so the file stays hand-editable
        let json = serde_json::to_vec_pretty(self)?;
        write_atomically(path.as_ref(), &json)?;
        Ok(())
    }

    pub fn template(&self, id: &str) -> Result<&PatientTemplate, ConfigError> {
        self.emergency_templates
            .iter()
            .find(|t| t.id == id)
            .ok_or_else(|| ConfigError::UnknownTemplate(id.to_string()))
    }
}

/// Preset patient for captures made before the real patient is known.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatientTemplate {
    pub id: String,
    pub display_name: String,
    pub patient_name: String,
    pub patient_id: String,
    pub sex: String,
    /// Absolute `YYYYMMDD` or relative `TODAY-<n><Y|M|D>`.
    pub birth_date: String,
    pub study_description: String,
}

impl PatientTemplate {
    /// Resolve the template at `now`; ids and accession numbers get a time suffix.
    pub fn instantiate(
        &self,
        now: DateTime<Local>,
    ) -> Result<(PatientRecord, StudyRecord), ConfigError> {
        let patient = PatientRecord {
            name: self.patient_name.clone(),
            id: format!("{}-{}", self.patient_id, now.format("%H%M%S")),
            birth_date: resolve_date(&self.birth_date, now.date_naive())?,
            sex: self.sex.clone(),
        };
        let study = StudyRecord {
            // 14 characters, inside the SH limit of 16
            accession_number: format!("EMRG{}", now.format("%y%m%d%H%M")),
            study_description: self.study_description.clone(),
            ..StudyRecord::default()
        };
        Ok((patient, study))
    }
}

/// Turn `TODAY-40Y`, `TODAY-6M`, `TODAY-10D` or `TODAY` into `YYYYMMDD`.
/// Absolute dates and empty strings pass through.
pub fn resolve_date(value: &str, today: NaiveDate) -> Result<String, ConfigError> {
    let invalid = || ConfigError::InvalidRelativeDate(value.to_string());
    let value = value.trim();
    if value.is_empty() || (value.len() == 8 && value.bytes().all(|b| b.is_ascii_digit())) {
        return Ok(value.to_string());
    }
    let Some(offset) = value.strip_prefix("TODAY") else {
        return Err(invalid());
    };
    if offset.is_empty() {
        return Ok(today.format("%Y%m%d").to_string());
    }
    let offset = offset.strip_prefix('-').ok_or_else(invalid)?;
    if offset.len() < 2 {
        return Err(invalid());
    }
    // `<n><unit>`, the unit is the last character
    let (amount, unit) = offset.split_at(offset.len() - 1);
    let amount: u32 = amount.parse().map_err(|_| invalid())?;
    let date = match unit {
        "Y" => today.checked_sub_months(Months::new(amount.saturating_mul(12))),
        "M" => today.checked_sub_months(Months::new(amount)),
        "D" => today.checked_sub_days(Days::new(u64::from(amount))),
        _ => None,
    }
    // before the start of the calendar, or an unknown unit
    .ok_or_else(invalid)?;
    Ok(date.format("%Y%m%d").to_string())
}

fn default_templates() -> Vec<PatientTemplate> {
    let template = |id: &str, display: &str, name: &str, pid: &str, sex: &str, birth: &str, desc: &str| {
        PatientTemplate {
            id: id.to_string(),
            display_name: display.to_string(),
            patient_name: name.to_string(),
            patient_id: pid.to_string(),
            sex: sex.to_string(),
            birth_date: birth.to_string(),
            study_description: desc.to_string(),
        }
    };
    vec![
        template(
            "emergency-male",
            "Emergency male",
            "Emergency^Male",
            "EMERGENCY-M",
            "M",
            "TODAY-40Y",
            "Emergency examination",
        ),
        template(
            "emergency-female",
            "Emergency female",
            "Emergency^Female",
            "EMERGENCY-F",
            "F",
            "TODAY-40Y",
            "Emergency examination",
        ),
        template(
            "emergency-child",
            "Emergency child",
            "Emergency^Child",
            "EMERGENCY-C",
            "O",
            "TODAY-10Y",
            "Emergency examination child",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(!path.exists());
        assert_eq!(config.destination.port, 104);
        assert_eq!(config.queue.capacity, 1000);
        assert_eq!(config.emergency_templates.len(), 3);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.json");
        std::fs::write(
            &path,
            r#"{"destination": {"enabled": true, "host": "pacs.local"}, "log_level": "debug", "theme": "dark"}"#,
        )
        .unwrap();
        let config = AppConfig::load(&path).unwrap();
        assert!(config.destination.enabled);
        assert_eq!(config.destination.host, "pacs.local");
        assert_eq!(config.destination.called_ae_title, "ORTHANC");
        assert_eq!(config.log_level, "debug");
        assert!(config.auto_enqueue);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg").join("courier.json");
        let mut config = AppConfig::default();
        config.destination.max_retries = 7;
        config.queue.tick_interval_ms = 250;
        config.save(&path).unwrap();
        assert_eq!(AppConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(AppConfig::load(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn relative_dates_resolve() {
        let today = day(2025, 6, 15);
        assert_eq!(resolve_date("TODAY-40Y", today).unwrap(), "19850615");
        assert_eq!(resolve_date("TODAY-6M", today).unwrap(), "20241215");
        assert_eq!(resolve_date("TODAY-10D", today).unwrap(), "20250605");
        assert_eq!(resolve_date("TODAY", today).unwrap(), "20250615");
        assert_eq!(resolve_date("19700101", today).unwrap(), "19700101");
        assert_eq!(resolve_date("", today).unwrap(), "");
        // leap day clamps to the end of February
        assert_eq!(resolve_date("TODAY-1Y", day(2024, 2, 29)).unwrap(), "20230228");
    }

    #[test]
    fn malformed_relative_dates_are_rejected() {
        let today = day(2025, 6, 15);
        for bad in ["TODAY-Y", "TODAY+4Y", "TODAY-4W", "YESTERDAY", "1970-01-01"] {
            assert!(
                matches!(resolve_date(bad, today), Err(ConfigError::InvalidRelativeDate(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn template_instantiates_patient_and_study() {
        let config = AppConfig::default();
        let now = Local.with_ymd_and_hms(2025, 6, 15, 8, 30, 5).unwrap();
        let (patient, study) = config
            .template("emergency-child")
            .unwrap()
            .instantiate(now)
            .unwrap();
        assert_eq!(patient.id, "EMERGENCY-C-083005");
        assert_eq!(patient.birth_date, "20150615");
        assert_eq!(patient.sex, "O");
        assert_eq!(study.accession_number, "EMRG2506150830");
        assert!(study.accession_number.len() <= 16);
        assert!(matches!(
            config.template("nope"),
            Err(ConfigError::UnknownTemplate(_))
        ));
    }
}
