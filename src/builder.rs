//
// builder.rs
// Dicom-Courier-rs
//
// Assembles a captured image plus patient/study records into a complete
// Secondary Capture (or Video Photographic) file, native or encapsulated.
//
// Dicom-Courier-rs contributors - October 2026

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate};
use dicom::core::{Tag, VR};
use dicom::dictionary_std::tags;
use tracing::debug;

use crate::codec::TagValue;
use crate::dataset::{Dataset, PixelData, TransferSyntax};
use crate::error::BuildError;
use crate::models::{PatientRecord, StudyRecord};
use crate::storage::write_atomically;
use crate::uid::UidGenerator;

pub const SECONDARY_CAPTURE: &str = "1.2.840.10008.5.1.4.1.1.7";
pub const MULTIFRAME_GRAYSCALE_BYTE_SC: &str = "1.2.840.10008.5.1.4.1.1.7.2";
pub const MULTIFRAME_GRAYSCALE_WORD_SC: &str = "1.2.840.10008.5.1.4.1.1.7.3";
pub const MULTIFRAME_TRUE_COLOR_SC: &str = "1.2.840.10008.5.1.4.1.1.7.4";
pub const VIDEO_PHOTOGRAPHIC: &str = "1.2.840.10008.5.1.4.1.1.77.1.4.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Photometric {
    Monochrome2,
    Rgb,
    YbrFull,
    YbrFull422,
    YbrPartial420,
}

impl Photometric {
    pub fn as_str(self) -> &'static str {
        match self {
            Photometric::Monochrome2 => "MONOCHROME2",
            Photometric::Rgb => "RGB",
            Photometric::YbrFull => "YBR_FULL",
            Photometric::YbrFull422 => "YBR_FULL_422",
            Photometric::YbrPartial420 => "YBR_PARTIAL_420",
        }
    }

    /// Whether this interpretation may describe `samples` samples stored under `ts`.
    pub fn fits(self, ts: TransferSyntax, samples: u16) -> bool {
        use Photometric::*;
        match (ts, samples) {
            (_, 1) if ts.is_video() => false,
            (_, 1) => self == Monochrome2,
            (TransferSyntax::ImplicitVrLittleEndian | TransferSyntax::ExplicitVrLittleEndian, 3) => {
                matches!(self, Rgb | YbrFull)
            }
            (TransferSyntax::JpegBaseline, 3) => matches!(self, YbrFull422 | YbrFull),
            (TransferSyntax::Mpeg2MainProfile | TransferSyntax::Mpeg4HighProfile, 3) => {
                self == YbrPartial420
            }
            _ => false,
        }
    }
}

impl fmt::Display for Photometric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Geometry and sample layout of the image being stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSpec {
    pub rows: u32,
    pub columns: u32,
    pub samples_per_pixel: u16,
    pub bits_allocated: u16,
    pub bits_stored: u16,
    /// 0 = unsigned, 1 = two's complement.
    pub pixel_representation: u16,
    pub photometric: Photometric,
    pub frames: u32,
}

impl ImageSpec {
    /// Interleaved 8-bit RGB, as delivered by most capture devices.
    pub fn rgb8(width: u32, height: u32) -> Self {
        Self {
            rows: height,
            columns: width,
            samples_per_pixel: 3,
            bits_allocated: 8,
            bits_stored: 8,
            pixel_representation: 0,
            photometric: Photometric::Rgb,
            frames: 1,
        }
    }

    pub fn monochrome(width: u32, height: u32, bits: u16) -> Self {
        Self {
            samples_per_pixel: 1,
            bits_allocated: bits,
            bits_stored: bits,
            photometric: Photometric::Monochrome2,
            ..Self::rgb8(width, height)
        }
    }

    /// Colour JPEG baseline stream with subsampled chroma.
    pub fn jpeg_color(width: u32, height: u32) -> Self {
        Self {
            photometric: Photometric::YbrFull422,
            ..Self::rgb8(width, height)
        }
    }

    /// MPEG video stream with `frames` frames.
    pub fn video(width: u32, height: u32, frames: u32) -> Self {
        Self {
            photometric: Photometric::YbrPartial420,
            frames,
            ..Self::rgb8(width, height)
        }
    }

    pub fn with_bits_stored(mut self, bits_stored: u16) -> Self {
        self.bits_stored = bits_stored;
        self
    }

    pub fn high_bit(&self) -> u16 {
        self.bits_stored.saturating_sub(1)
    }

    /// Byte length of the uncompressed sample buffer.
    pub fn native_len(&self) -> Option<usize> {
        (self.rows as usize)
            .checked_mul(self.columns as usize)?
            .checked_mul(self.samples_per_pixel as usize)?
            .checked_mul((self.bits_allocated / 8) as usize)?
            .checked_mul(self.frames as usize)
    }

    fn validate(&self, ts: TransferSyntax) -> Result<(), BuildError> {
        if self.rows == 0
            || self.columns == 0
            || self.frames == 0
            || self.rows > u32::from(u16::MAX)
            || self.columns > u32::from(u16::MAX)
            || !matches!(self.samples_per_pixel, 1 | 3)
        {
            return Err(BuildError::InvalidDimensions {
                rows: self.rows,
                columns: self.columns,
                samples_per_pixel: self.samples_per_pixel,
            });
        }

        let depth_ok = matches!(self.bits_allocated, 8 | 16)
            && self.bits_stored >= 1
            && self.bits_stored <= self.bits_allocated
            && (!ts.is_encapsulated() || self.bits_allocated == 8);
        if !depth_ok {
            return Err(BuildError::InvalidBitDepth {
                bits_allocated: self.bits_allocated,
                bits_stored: self.bits_stored,
            });
        }

        if !self.photometric.fits(ts, self.samples_per_pixel) {
            return Err(BuildError::InconsistentPhotometricInterpretation {
                photometric: self.photometric.to_string(),
                transfer_syntax: ts.name().to_string(),
                samples_per_pixel: self.samples_per_pixel,
            });
        }
        Ok(())
    }

    fn sop_class_uid(&self, ts: TransferSyntax) -> &'static str {
        if ts.is_video() {
            VIDEO_PHOTOGRAPHIC
        } else if self.frames <= 1 {
            SECONDARY_CAPTURE
        } else if self.samples_per_pixel == 3 {
            MULTIFRAME_TRUE_COLOR_SC
        } else if self.bits_allocated == 8 {
            MULTIFRAME_GRAYSCALE_BYTE_SC
        } else {
            MULTIFRAME_GRAYSCALE_WORD_SC
        }
    }
}

/// Image samples handed over by the capture side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PixelPayload {
    /// Raw interleaved samples.
    Native(Vec<u8>),
    /// Pre-compressed fragments produced by an external encoder.
    Encapsulated(Vec<Vec<u8>>),
}

/// Fixed descriptive attributes of the capture station.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    pub modality: String,
    pub manufacturer: String,
    pub series_description: String,
    pub implementation_version_name: String,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            modality: "OT".to_string(),
            manufacturer: "DICOM-COURIER".to_string(),
            series_description: "Capture".to_string(),
            implementation_version_name: "COURIER_1_0".to_string(),
        }
    }
}

/// Serialized file plus the identifiers minted for it.
#[derive(Debug, Clone)]
pub struct BuiltFile {
    pub bytes: Vec<u8>,
    pub sop_class_uid: &'static str,
    pub sop_instance_uid: String,
    pub study_instance_uid: String,
    pub series_instance_uid: String,
}

pub struct DatasetBuilder {
    uids: Arc<UidGenerator>,
    options: BuildOptions,
}

impl DatasetBuilder {
    pub fn new(uids: Arc<UidGenerator>) -> Self {
        Self {
            uids,
            options: BuildOptions::default(),
        }
    }

    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    /// Build the file bytes, stamping dates and times with the current local time.
    pub fn build_file(
        &self,
        payload: &PixelPayload,
        image: &ImageSpec,
        patient: &PatientRecord,
        study: &StudyRecord,
        ts: TransferSyntax,
    ) -> Result<BuiltFile, BuildError> {
        self.build_file_at(payload, image, patient, study, ts, Local::now())
    }

    pub fn build_file_at(
        &self,
        payload: &PixelPayload,
        image: &ImageSpec,
        patient: &PatientRecord,
        study: &StudyRecord,
        ts: TransferSyntax,
        captured_at: DateTime<Local>,
    ) -> Result<BuiltFile, BuildError> {
        image.validate(ts)?;
        validate_patient(patient)?;
        let pixel_data = pixel_data(payload, image, ts)?;

        let sop_class_uid = image.sop_class_uid(ts);
        let sop_instance_uid = self.uids.new_uid()?;
        let study_instance_uid = self.uids.new_uid()?;
        let series_instance_uid = self.uids.new_uid()?;

        // group length is computed when the file is serialized
        let meta = vec![
            TagValue::new(tags::FILE_META_INFORMATION_VERSION, VR::OB, vec![0x00, 0x01]),
            TagValue::uid(tags::MEDIA_STORAGE_SOP_CLASS_UID, sop_class_uid),
            TagValue::uid(tags::MEDIA_STORAGE_SOP_INSTANCE_UID, &sop_instance_uid),
            TagValue::uid(tags::TRANSFER_SYNTAX_UID, ts.uid()),
            TagValue::uid(
                tags::IMPLEMENTATION_CLASS_UID,
                &self.uids.implementation_class_uid(),
            ),
            TagValue::text(
                tags::IMPLEMENTATION_VERSION_NAME,
                VR::SH,
                &self.options.implementation_version_name,
            ),
        ];

        let date = captured_at.format("%Y%m%d").to_string();
        let time = captured_at.format("%H%M%S").to_string();
        let text = |tag: Tag, vr: VR, value: &str| TagValue::text(tag, vr, value);

        let mut main = vec![
            // identification
            text(tags::SPECIFIC_CHARACTER_SET, VR::CS, "ISO_IR 192"),
            text(tags::IMAGE_TYPE, VR::CS, "ORIGINAL\\PRIMARY"),
            TagValue::uid(tags::SOP_CLASS_UID, sop_class_uid),
            TagValue::uid(tags::SOP_INSTANCE_UID, &sop_instance_uid),
            text(tags::STUDY_DATE, VR::DA, &date),
            text(tags::CONTENT_DATE, VR::DA, &date),
            text(tags::STUDY_TIME, VR::TM, &time),
            text(tags::CONTENT_TIME, VR::TM, &time),
            text(tags::ACCESSION_NUMBER, VR::SH, &study.accession_number),
            text(tags::MODALITY, VR::CS, &self.options.modality),
            text(tags::CONVERSION_TYPE, VR::CS, "DI"),
            text(tags::MANUFACTURER, VR::LO, &self.options.manufacturer),
            text(tags::INSTITUTION_NAME, VR::LO, &study.institution),
            text(tags::REFERRING_PHYSICIAN_NAME, VR::PN, &study.referring_physician),
            text(tags::STUDY_DESCRIPTION, VR::LO, &study.study_description),
            text(tags::SERIES_DESCRIPTION, VR::LO, &self.options.series_description),
            text(tags::PERFORMING_PHYSICIAN_NAME, VR::PN, &study.performing_physician),
            // patient
            text(tags::PATIENT_NAME, VR::PN, &patient.name),
            text(tags::PATIENT_ID, VR::LO, &patient.id),
            text(tags::PATIENT_BIRTH_DATE, VR::DA, &patient.birth_date),
            text(tags::PATIENT_SEX, VR::CS, &patient.sex),
            // study and series
            TagValue::uid(tags::STUDY_INSTANCE_UID, &study_instance_uid),
            TagValue::uid(tags::SERIES_INSTANCE_UID, &series_instance_uid),
            text(tags::STUDY_ID, VR::SH, "1"),
            text(tags::SERIES_NUMBER, VR::IS, "1"),
            text(tags::INSTANCE_NUMBER, VR::IS, "1"),
            // image pixel
            TagValue::u16(tags::SAMPLES_PER_PIXEL, image.samples_per_pixel),
            text(tags::PHOTOMETRIC_INTERPRETATION, VR::CS, image.photometric.as_str()),
        ];
        if image.samples_per_pixel > 1 {
            main.push(TagValue::u16(tags::PLANAR_CONFIGURATION, 0));
        }
        if image.frames > 1 || ts.is_video() {
            main.push(text(tags::NUMBER_OF_FRAMES, VR::IS, &image.frames.to_string()));
        }
        // validate() keeps both dimensions within u16
        main.extend([
            TagValue::u16(tags::ROWS, image.rows as u16),
            TagValue::u16(tags::COLUMNS, image.columns as u16),
            TagValue::u16(tags::BITS_ALLOCATED, image.bits_allocated),
            TagValue::u16(tags::BITS_STORED, image.bits_stored),
            TagValue::u16(tags::HIGH_BIT, image.high_bit()),
            TagValue::u16(tags::PIXEL_REPRESENTATION, image.pixel_representation),
        ]);

        let dataset = Dataset {
            meta,
            main,
            pixel_data,
        };
        let bytes = dataset.to_bytes()?;
        debug!(
            sop_instance_uid = %sop_instance_uid,
            transfer_syntax = ts.uid(),
            size = bytes.len(),
            "built dataset"
        );

        Ok(BuiltFile {
            bytes,
            sop_class_uid,
            sop_instance_uid,
            study_instance_uid,
            series_instance_uid,
        })
    }

    /// Build and write to `path`; nothing is left at `path` unless every step succeeded.
    pub fn write_file(
        &self,
        path: &Path,
        payload: &PixelPayload,
        image: &ImageSpec,
        patient: &PatientRecord,
        study: &StudyRecord,
        ts: TransferSyntax,
    ) -> Result<BuiltFile, BuildError> {
        let built = self.build_file(payload, image, patient, study, ts)?;
        write_atomically(path, &built.bytes)?;
        Ok(built)
    }
}

/// DA and CS values must be well formed before they reach the file.
fn validate_patient(patient: &PatientRecord) -> Result<(), BuildError> {
    let birth_date = patient.birth_date.as_str();
    let is_date = birth_date.len() == 8 && NaiveDate::parse_from_str(birth_date, "%Y%m%d").is_ok();
    if !birth_date.is_empty() && !is_date {
        return Err(BuildError::InvalidBirthDate(birth_date.to_string()));
    }
    if !matches!(patient.sex.as_str(), "" | "M" | "F" | "O") {
        return Err(BuildError::InvalidSex(patient.sex.clone()));
    }
    Ok(())
}

fn pixel_data(
    payload: &PixelPayload,
    image: &ImageSpec,
    ts: TransferSyntax,
) -> Result<PixelData, BuildError> {
    match (payload, ts.is_encapsulated()) {
        (PixelPayload::Native(samples), false) => {
            let expected = image.native_len().ok_or(BuildError::InvalidDimensions {
                rows: image.rows,
                columns: image.columns,
                samples_per_pixel: image.samples_per_pixel,
            })?;
            if samples.len() != expected {
                return Err(BuildError::PixelSizeMismatch {
                    expected,
                    actual: samples.len(),
                });
            }
            let vr = if image.bits_allocated > 8 { VR::OW } else { VR::OB };
            Ok(PixelData::Native(TagValue::new(
                tags::PIXEL_DATA,
                vr,
                samples.clone(),
            )))
        }
        (PixelPayload::Encapsulated(fragments), true) => {
            if fragments.is_empty() || fragments.iter().all(Vec::is_empty) {
                return Err(BuildError::EmptyEncapsulatedPayload);
            }
            Ok(PixelData::Encapsulated {
                fragments: fragments.clone(),
            })
        }
        (PixelPayload::Native(_), true) => Err(BuildError::UnsupportedTransferSyntax(format!(
            "{} requires pre-compressed fragments",
            ts.name()
        ))),
        (PixelPayload::Encapsulated(_), false) => Err(BuildError::UnsupportedTransferSyntax(
            format!("{} cannot carry compressed fragments", ts.name()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn builder() -> DatasetBuilder {
        DatasetBuilder::new(Arc::new(UidGenerator::default()))
    }

    fn patient() -> PatientRecord {
        PatientRecord {
            name: "Doe^Jane".into(),
            id: "PAT-001".into(),
            birth_date: "19800101".into(),
            sex: "F".into(),
        }
    }

    #[test]
    fn malformed_demographics_are_rejected() {
        let build = |patient: &PatientRecord| {
            builder().build_file(
                &PixelPayload::Native(vec![0; 4]),
                &ImageSpec::monochrome(2, 2, 8),
                patient,
                &StudyRecord::default(),
                TransferSyntax::ExplicitVrLittleEndian,
            )
        };
        for birth_date in ["1980-01-01", "19801301", "TODAY-40Y", "1980010"] {
            let patient = PatientRecord {
                birth_date: birth_date.into(),
                ..patient()
            };
            assert!(matches!(
                build(&patient),
                Err(BuildError::InvalidBirthDate(_))
            ));
        }
        let bad_sex = PatientRecord {
            sex: "female".into(),
            ..patient()
        };
        assert!(matches!(build(&bad_sex), Err(BuildError::InvalidSex(_))));

        let unknown = PatientRecord {
            birth_date: String::new(),
            sex: String::new(),
            ..patient()
        };
        assert!(build(&unknown).is_ok());
    }

    #[test]
    fn native_rgb_builds_and_parses() {
        let image = ImageSpec::rgb8(4, 2);
        let payload = PixelPayload::Native(vec![0x7F; 4 * 2 * 3]);
        let at = Local.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();
        let built = builder()
            .build_file_at(
                &payload,
                &image,
                &patient(),
                &StudyRecord::default(),
                TransferSyntax::ExplicitVrLittleEndian,
                at,
            )
            .unwrap();

        let parsed = Dataset::parse(&built.bytes).unwrap();
        assert_eq!(parsed.text(tags::STUDY_DATE), Some("20250304"));
        assert_eq!(parsed.text(tags::STUDY_TIME), Some("050607"));
        assert_eq!(parsed.text(tags::PATIENT_NAME), Some("Doe^Jane"));
        assert_eq!(parsed.text(tags::PHOTOMETRIC_INTERPRETATION), Some("RGB"));
        assert_eq!(parsed.u16(tags::ROWS), Some(2));
        assert_eq!(parsed.u16(tags::COLUMNS), Some(4));
        assert_eq!(parsed.u16(tags::HIGH_BIT), Some(7));
        assert_eq!(parsed.text(tags::SOP_INSTANCE_UID), Some(built.sop_instance_uid.as_str()));
        assert_eq!(
            parsed.text(tags::MEDIA_STORAGE_SOP_INSTANCE_UID),
            Some(built.sop_instance_uid.as_str())
        );
        match parsed.pixel_data {
            PixelData::Native(element) => assert_eq!(element.bytes.len(), 24),
            other => panic!("unexpected pixel data {:?}", other),
        }
    }

    #[test]
    fn three_identifiers_are_distinct() {
        let built = builder()
            .build_file(
                &PixelPayload::Native(vec![0; 4]),
                &ImageSpec::monochrome(2, 2, 8),
                &patient(),
                &StudyRecord::default(),
                TransferSyntax::ImplicitVrLittleEndian,
            )
            .unwrap();
        assert_ne!(built.sop_instance_uid, built.study_instance_uid);
        assert_ne!(built.study_instance_uid, built.series_instance_uid);
        assert_eq!(built.sop_class_uid, SECONDARY_CAPTURE);
    }

    #[test]
    fn wrong_buffer_size_is_rejected() {
        for len in [0usize, 23, 25, 48] {
            let err = builder()
                .build_file(
                    &PixelPayload::Native(vec![0; len]),
                    &ImageSpec::rgb8(4, 2),
                    &patient(),
                    &StudyRecord::default(),
                    TransferSyntax::ExplicitVrLittleEndian,
                )
                .unwrap_err();
            assert!(matches!(
                err,
                BuildError::PixelSizeMismatch { expected: 24, .. }
            ));
        }
    }

    #[test]
    fn sixteen_bit_high_bit_follows_bits_stored() {
        let image = ImageSpec::monochrome(2, 2, 16).with_bits_stored(12);
        let built = builder()
            .build_file(
                &PixelPayload::Native(vec![0; 8]),
                &image,
                &patient(),
                &StudyRecord::default(),
                TransferSyntax::ExplicitVrLittleEndian,
            )
            .unwrap();
        let parsed = Dataset::parse(&built.bytes).unwrap();
        assert_eq!(parsed.u16(tags::BITS_STORED), Some(12));
        assert_eq!(parsed.u16(tags::HIGH_BIT), Some(11));
        match parsed.pixel_data {
            PixelData::Native(element) => assert_eq!(element.vr, VR::OW),
            other => panic!("unexpected pixel data {:?}", other),
        }
    }

    #[test]
    fn bits_stored_above_allocated_is_rejected() {
        let image = ImageSpec::monochrome(2, 2, 8).with_bits_stored(9);
        let err = builder()
            .build_file(
                &PixelPayload::Native(vec![0; 4]),
                &image,
                &patient(),
                &StudyRecord::default(),
                TransferSyntax::ExplicitVrLittleEndian,
            )
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidBitDepth { .. }));
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        let err = builder()
            .build_file(
                &PixelPayload::Native(vec![]),
                &ImageSpec::rgb8(0, 10),
                &patient(),
                &StudyRecord::default(),
                TransferSyntax::ExplicitVrLittleEndian,
            )
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidDimensions { .. }));
    }

    #[test]
    fn rgb_with_jpeg_is_inconsistent() {
        let err = builder()
            .build_file(
                &PixelPayload::Encapsulated(vec![vec![0xFF, 0xD8]]),
                &ImageSpec::rgb8(8, 8),
                &patient(),
                &StudyRecord::default(),
                TransferSyntax::JpegBaseline,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            BuildError::InconsistentPhotometricInterpretation { .. }
        ));

        let err = builder()
            .build_file(
                &PixelPayload::Native(vec![0; 8 * 8 * 3]),
                &ImageSpec::jpeg_color(8, 8),
                &patient(),
                &StudyRecord::default(),
                TransferSyntax::ExplicitVrLittleEndian,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            BuildError::InconsistentPhotometricInterpretation { .. }
        ));
    }

    #[test]
    fn payload_kind_must_match_transfer_syntax() {
        let err = builder()
            .build_file(
                &PixelPayload::Native(vec![0; 8 * 8 * 3]),
                &ImageSpec::jpeg_color(8, 8),
                &patient(),
                &StudyRecord::default(),
                TransferSyntax::JpegBaseline,
            )
            .unwrap_err();
        assert!(matches!(err, BuildError::UnsupportedTransferSyntax(_)));

        let err = builder()
            .build_file(
                &PixelPayload::Encapsulated(vec![]),
                &ImageSpec::jpeg_color(8, 8),
                &patient(),
                &StudyRecord::default(),
                TransferSyntax::JpegBaseline,
            )
            .unwrap_err();
        assert!(matches!(err, BuildError::EmptyEncapsulatedPayload));
    }

    #[test]
    fn video_uses_video_photographic_class() {
        let built = builder()
            .build_file(
                &PixelPayload::Encapsulated(vec![vec![0, 0, 1, 0xB3]]),
                &ImageSpec::video(720, 576, 25),
                &patient(),
                &StudyRecord::default(),
                TransferSyntax::Mpeg2MainProfile,
            )
            .unwrap();
        assert_eq!(built.sop_class_uid, VIDEO_PHOTOGRAPHIC);
        let parsed = Dataset::parse(&built.bytes).unwrap();
        assert_eq!(parsed.text(tags::NUMBER_OF_FRAMES), Some("25"));
        assert_eq!(
            parsed.text(tags::PHOTOMETRIC_INTERPRETATION),
            Some("YBR_PARTIAL_420")
        );
    }

    #[test]
    fn failed_build_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.dcm");
        let result = builder().write_file(
            &path,
            &PixelPayload::Native(vec![0; 3]),
            &ImageSpec::rgb8(4, 2),
            &patient(),
            &StudyRecord::default(),
            TransferSyntax::ExplicitVrLittleEndian,
        );
        assert!(result.is_err());
        assert!(!path.exists());
        assert!(!dir.path().join("out.dcm.tmp").exists());
    }
}
