//
// capture.rs
// Dicom-Courier-rs
//
// Turns a still image or an already-encoded video stream handed over by the capture
// side into the payload, geometry and transfer syntax the dataset builder expects.
//
// Dicom-Courier-rs contributors - October 2026

use std::fs;
use std::io::Cursor;
use std::path::Path;

use anyhow::{bail, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage, ImageFormat};

use crate::builder::{ImageSpec, PixelPayload};
use crate::dataset::TransferSyntax;

const JPEG_QUALITY: u8 = 90;

/// How a still image should be stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StillEncoding {
    /// Uncompressed samples, explicit VR.
    Explicit,
    /// Uncompressed samples, implicit VR.
    Implicit,
    /// JPEG baseline; JPEG input passes through untouched.
    Jpeg,
}

/// Everything the builder needs besides the patient and study records.
#[derive(Debug, Clone)]
pub struct Capture {
    pub payload: PixelPayload,
    pub image: ImageSpec,
    pub transfer_syntax: TransferSyntax,
}

/// Load a still image (PNG, JPEG, BMP, ...) from disk.
pub fn still_from_file(path: &Path, encoding: StillEncoding) -> Result<Capture> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    still_from_bytes(&bytes, encoding)
        .with_context(|| format!("Failed to prepare {}", path.display()))
}

pub fn still_from_bytes(bytes: &[u8], encoding: StillEncoding) -> Result<Capture> {
    let format = image::guess_format(bytes).context("Unrecognized image format")?;
    let decoded =
        image::load_from_memory_with_format(bytes, format).context("Failed to decode image")?;

    match encoding {
        StillEncoding::Explicit => native(&decoded, TransferSyntax::ExplicitVrLittleEndian),
        StillEncoding::Implicit => native(&decoded, TransferSyntax::ImplicitVrLittleEndian),
        StillEncoding::Jpeg => {
            let gray = matches!(decoded.color(), ColorType::L8 | ColorType::La8);
            let stream = if format == ImageFormat::Jpeg {
                bytes.to_vec()
            } else {
                encode_jpeg(&decoded, gray)?
            };
            let image = if gray {
                ImageSpec::monochrome(decoded.width(), decoded.height(), 8)
            } else {
                ImageSpec::jpeg_color(decoded.width(), decoded.height())
            };
            Ok(Capture {
                payload: PixelPayload::Encapsulated(vec![stream]),
                image,
                transfer_syntax: TransferSyntax::JpegBaseline,
            })
        }
    }
}

/// Wrap an MPEG stream produced by an external encoder. Geometry cannot be
/// read from the stream here and must be supplied.
pub fn video_from_file(
    path: &Path,
    transfer_syntax: TransferSyntax,
    width: u32,
    height: u32,
    frames: u32,
) -> Result<Capture> {
    if !transfer_syntax.is_video() {
        bail!("{} is not a video transfer syntax", transfer_syntax.name());
    }
    let stream = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    if stream.is_empty() {
        bail!("Video stream {} is empty", path.display());
    }
    Ok(Capture {
        payload: PixelPayload::Encapsulated(vec![stream]),
        image: ImageSpec::video(width, height, frames),
        transfer_syntax,
    })
}

fn native(image: &DynamicImage, transfer_syntax: TransferSyntax) -> Result<Capture> {
    let (width, height) = (image.width(), image.height());
    let (spec, samples) = match image.color() {
        ColorType::L8 | ColorType::La8 => (
            ImageSpec::monochrome(width, height, 8),
            image.to_luma8().into_raw(),
        ),
        ColorType::L16 | ColorType::La16 => (
            ImageSpec::monochrome(width, height, 16),
            image
                .to_luma16()
                .into_raw()
                .into_iter()
                .flat_map(u16::to_le_bytes)
                .collect(),
        ),
        _ => (ImageSpec::rgb8(width, height), image.to_rgb8().into_raw()),
    };
    Ok(Capture {
        payload: PixelPayload::Native(samples),
        image: spec,
        transfer_syntax,
    })
}

fn encode_jpeg(image: &DynamicImage, gray: bool) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY);
    if gray {
        encoder.encode_image(&image.to_luma8())
    } else {
        encoder.encode_image(&image.to_rgb8())
    }
    .context("Failed to encode JPEG")?;
    Ok(buffer.into_inner())
}
