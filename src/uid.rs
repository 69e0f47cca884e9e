//
// uid.rs
// Dicom-Courier-rs
//
// Generates dotted-numeric unique identifiers from an organizational root,
// a millisecond timestamp, the process id and a per-process counter.
//
// Dicom-Courier-rs contributors - October 2026

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

use crate::error::UidError;

/// Default organizational root for identifiers minted by this crate.
pub const DEFAULT_UID_ROOT: &str = "1.2.826.0.1.3680043.10.1137";

/// Hard length limit of the UI value representation.
pub const MAX_UID_LEN: usize = 64;

// leaves room for millis (13), pid (10), a 6-digit counter and 3 dots
const MAX_ROOT_LEN: usize = MAX_UID_LEN - 32;

/// Mints identifiers of the form `<root>.<millis>.<pid>.<counter>`.
///
/// The counter is shared by the generator instance, so concurrent calls
/// never produce the same value even within the same millisecond.
#[derive(Debug)]
pub struct UidGenerator {
    root: String,
    counter: AtomicU64,
}

impl UidGenerator {
    pub fn new(root: impl Into<String>) -> Result<Self, UidError> {
        let root = root.into();
        if !is_valid_uid(&root) {
            return Err(UidError::InvalidRoot(root));
        }
        if root.len() > MAX_ROOT_LEN {
            return Err(UidError::TooLong(root));
        }
        Ok(Self {
            root,
            counter: AtomicU64::new(0),
        })
    }

    pub fn new_uid(&self) -> Result<String, UidError> {
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let millis = Utc::now().timestamp_millis().max(1);
        let uid = format!(
            "{}.{}.{}.{}",
            self.root,
            millis,
            std::process::id().max(1),
            sequence
        );
        if uid.len() > MAX_UID_LEN {
            return Err(UidError::TooLong(uid));
        }
        Ok(uid)
    }

    /// Implementation Class UID advertised in the file meta segment.
    pub fn implementation_class_uid(&self) -> String {
        format!("{}.0.1", self.root)
    }
}

impl Default for UidGenerator {
    fn default() -> Self {
        Self {
            root: DEFAULT_UID_ROOT.to_string(),
            counter: AtomicU64::new(0),
        }
    }
}

/// Dotted numeric components, no empty component, no leading zero.
pub fn is_valid_uid(uid: &str) -> bool {
    !uid.is_empty()
        && uid.len() <= MAX_UID_LEN
        && uid.split('.').all(|part| {
            !part.is_empty()
                && part.bytes().all(|b| b.is_ascii_digit())
                && (part == "0" || !part.starts_with('0'))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn uids_are_valid_and_bounded() {
        let generator = UidGenerator::default();
        let uid = generator.new_uid().unwrap();
        assert!(uid.starts_with(DEFAULT_UID_ROOT));
        assert!(uid.len() <= MAX_UID_LEN);
        assert!(is_valid_uid(&uid));
    }

    #[test]
    fn concurrent_calls_never_collide() {
        let generator = Arc::new(UidGenerator::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let generator = Arc::clone(&generator);
                std::thread::spawn(move || {
                    (0..500)
                        .map(|_| generator.new_uid().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for uid in handle.join().unwrap() {
                assert!(seen.insert(uid));
            }
        }
        assert_eq!(seen.len(), 4000);
    }

    #[test]
    fn bad_roots_are_rejected() {
        assert!(UidGenerator::new("1.2.03").is_err());
        assert!(UidGenerator::new("1..2").is_err());
        assert!(UidGenerator::new("1.2.a").is_err());
        assert!(UidGenerator::new("1.2.3.4.5.6.7.8.9.10.11.12.13.14.15.16").is_err());
        assert!(UidGenerator::new("1.2.3").is_ok());
    }

    #[test]
    fn implementation_uid_derives_from_root() {
        let generator = UidGenerator::new("1.2.3").unwrap();
        assert_eq!(generator.implementation_class_uid(), "1.2.3.0.1");
    }
}
