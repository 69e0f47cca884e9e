//
// dataset.rs
// Dicom-Courier-rs
//
// In-memory file layout: preamble, DICM magic, explicit VR meta group, main dataset
// in the declared VR mode and a single trailing pixel data element.
//
// Dicom-Courier-rs contributors - October 2026

use dicom::core::{Tag, VR};
use dicom::dictionary_std::tags;

use crate::codec::{
    self, TagValue, VrMode, ITEM, SEQUENCE_DELIMITATION_ITEM, UNDEFINED_LENGTH,
};
use crate::error::CodecError;

pub const PREAMBLE_LEN: usize = 128;
pub const MAGIC: &[u8; 4] = b"DICM";

const META_GROUP: u16 = 0x0002;

/// Transfer syntaxes this crate can write and read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferSyntax {
    ImplicitVrLittleEndian,
    ExplicitVrLittleEndian,
    JpegBaseline,
    Mpeg2MainProfile,
    Mpeg4HighProfile,
}

impl TransferSyntax {
    pub const ALL: [TransferSyntax; 5] = [
        TransferSyntax::ImplicitVrLittleEndian,
        TransferSyntax::ExplicitVrLittleEndian,
        TransferSyntax::JpegBaseline,
        TransferSyntax::Mpeg2MainProfile,
        TransferSyntax::Mpeg4HighProfile,
    ];

    pub fn uid(self) -> &'static str {
        match self {
            TransferSyntax::ImplicitVrLittleEndian => "1.2.840.10008.1.2",
            TransferSyntax::ExplicitVrLittleEndian => "1.2.840.10008.1.2.1",
            TransferSyntax::JpegBaseline => "1.2.840.10008.1.2.4.50",
            TransferSyntax::Mpeg2MainProfile => "1.2.840.10008.1.2.4.100",
            TransferSyntax::Mpeg4HighProfile => "1.2.840.10008.1.2.4.102",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TransferSyntax::ImplicitVrLittleEndian => "Implicit VR Little Endian",
            TransferSyntax::ExplicitVrLittleEndian => "Explicit VR Little Endian",
            TransferSyntax::JpegBaseline => "JPEG Baseline (Process 1)",
            TransferSyntax::Mpeg2MainProfile => "MPEG2 Main Profile @ Main Level",
            TransferSyntax::Mpeg4HighProfile => "MPEG-4 AVC/H.264 High Profile",
        }
    }

    /// Look a UID up, ignoring value padding.
    pub fn from_uid(uid: &str) -> Option<Self> {
        let uid = uid.trim_end_matches(['\0', ' ']);
        Self::ALL.into_iter().find(|ts| ts.uid() == uid)
    }

    pub fn vr_mode(self) -> VrMode {
        match self {
            TransferSyntax::ImplicitVrLittleEndian => VrMode::Implicit,
            _ => VrMode::Explicit,
        }
    }

    pub fn is_encapsulated(self) -> bool {
        matches!(
            self,
            TransferSyntax::JpegBaseline
                | TransferSyntax::Mpeg2MainProfile
                | TransferSyntax::Mpeg4HighProfile
        )
    }

    pub fn is_video(self) -> bool {
        matches!(
            self,
            TransferSyntax::Mpeg2MainProfile | TransferSyntax::Mpeg4HighProfile
        )
    }
}

/// Terminating pixel data element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PixelData {
    /// Raw samples with a defined length.
    Native(TagValue),
    /// Compressed fragments framed as items after an empty offset table.
    Encapsulated { fragments: Vec<Vec<u8>> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    /// Group 0002 elements, without the group length (computed on write).
    pub meta: Vec<TagValue>,
    pub main: Vec<TagValue>,
    pub pixel_data: PixelData,
}

impl Dataset {
    pub fn element(&self, tag: Tag) -> Option<&TagValue> {
        self.meta
            .iter()
            .chain(self.main.iter())
            .find(|e| e.tag == tag)
    }

    pub fn text(&self, tag: Tag) -> Option<&str> {
        self.element(tag).and_then(TagValue::as_text)
    }

    pub fn u16(&self, tag: Tag) -> Option<u16> {
        self.element(tag).and_then(TagValue::as_u16)
    }

    pub fn transfer_syntax(&self) -> Result<TransferSyntax, CodecError> {
        let uid = self.text(tags::TRANSFER_SYNTAX_UID).unwrap_or_default();
        TransferSyntax::from_uid(uid)
            .ok_or_else(|| CodecError::UnsupportedTransferSyntax(uid.to_string()))
    }

    /// Serialize the full file: preamble, magic, meta group and main dataset.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let ts = self.transfer_syntax()?;
        let mode = ts.vr_mode();

        // the meta group is always explicit VR little endian
        let mut meta = Vec::with_capacity(256);
        for element in &self.meta {
            codec::write_element(&mut meta, VrMode::Explicit, element.tag, element.vr, &element.bytes)?;
        }

        let mut out = Vec::with_capacity(PREAMBLE_LEN + MAGIC.len() + meta.len() + 1024);
        out.resize(PREAMBLE_LEN, 0);
        out.extend_from_slice(MAGIC);
        codec::write_element(
            &mut out,
            VrMode::Explicit,
            tags::FILE_META_INFORMATION_GROUP_LENGTH,
            VR::UL,
            &(meta.len() as u32).to_le_bytes(),
        )?;
        out.extend_from_slice(&meta);

        self.write_body(&mut out, mode)?;
        Ok(out)
    }

    fn write_body(&self, out: &mut Vec<u8>, mode: VrMode) -> Result<(), CodecError> {
        for element in &self.main {
            codec::write_element(out, mode, element.tag, element.vr, &element.bytes)?;
        }

        match &self.pixel_data {
            PixelData::Native(element) => {
                codec::write_element(out, mode, element.tag, element.vr, &element.bytes)?;
            }
            PixelData::Encapsulated { fragments } => {
                write_encapsulated_header(out, mode);
                // empty basic offset table
                codec::write_item(out, ITEM, &[])?;
                for fragment in fragments {
                    codec::write_item(out, ITEM, fragment)?;
                }
                codec::write_item(out, SEQUENCE_DELIMITATION_ITEM, &[])?;
            }
        }
        Ok(())
    }

    /// Parse a file laid out by [`Dataset::to_bytes`].
    pub fn parse(bytes: &[u8]) -> Result<Self, CodecError> {
        let body_start = PREAMBLE_LEN + MAGIC.len();
        if bytes.len() < body_start {
            return Err(CodecError::TruncatedStream {
                needed: body_start,
                available: bytes.len(),
            });
        }
        if &bytes[PREAMBLE_LEN..body_start] != MAGIC {
            return Err(CodecError::MissingMagic);
        }

        let mut pos = body_start;
        let mut meta = Vec::new();
        while pos < bytes.len() && codec::peek_tag(&bytes[pos..])?.group() == META_GROUP {
            let (element, used) = codec::decode(&bytes[pos..])?;
            pos += used;
            if element.tag != tags::FILE_META_INFORMATION_GROUP_LENGTH {
                meta.push(element);
            }
        }

        let uid = meta
            .iter()
            .find(|e| e.tag == tags::TRANSFER_SYNTAX_UID)
            .and_then(TagValue::as_text)
            .unwrap_or_default();
        let mode = TransferSyntax::from_uid(uid)
            .ok_or_else(|| CodecError::UnsupportedTransferSyntax(uid.to_string()))?
            .vr_mode();

        let mut main = Vec::new();
        while pos < bytes.len() {
            let header = codec::read_header(&bytes[pos..], mode)?;
            // pixel data is the last element we write
            if header.tag == tags::PIXEL_DATA {
                let pixel_data = if header.is_undefined_length() {
                    read_fragments(&bytes[pos + header.header_len..])?
                } else {
                    PixelData::Native(codec::read_element(&bytes[pos..], mode)?.0)
                };
                return Ok(Dataset {
                    meta,
                    main,
                    pixel_data,
                });
            }
            let (element, used) = codec::read_element(&bytes[pos..], mode)?;
            pos += used;
            main.push(element);
        }

        Err(CodecError::MissingPixelData)
    }
}

fn write_encapsulated_header(out: &mut Vec<u8>, mode: VrMode) {
    out.extend_from_slice(&tags::PIXEL_DATA.group().to_le_bytes());
    out.extend_from_slice(&tags::PIXEL_DATA.element().to_le_bytes());
    if mode == VrMode::Explicit {
        out.extend_from_slice(&VR::OB.to_bytes());
        out.extend_from_slice(&[0, 0]);
    }
    out.extend_from_slice(&UNDEFINED_LENGTH.to_le_bytes());
}

fn read_fragments(stream: &[u8]) -> Result<PixelData, CodecError> {
    let mut pos = 0;
    let mut fragments = Vec::new();
    let mut seen_offset_table = false;
    loop {
        let (tag, len) = codec::read_item_header(&stream[pos..])?;
        pos += 8;
        if tag == SEQUENCE_DELIMITATION_ITEM {
            return Ok(PixelData::Encapsulated { fragments });
        }
        if tag != ITEM {
            return Err(CodecError::UnexpectedItem { tag });
        }
        let remaining = stream.len() - pos;
        if len as usize > remaining {
            return Err(CodecError::LengthOverflow {
                tag,
                declared: len,
                remaining,
            });
        }
        let value = &stream[pos..pos + len as usize];
        pos += len as usize;
        // the first item is the offset table, not a fragment
        if seen_offset_table {
            fragments.push(value.to_vec());
        } else {
            seen_offset_table = true;
        }
    }
}
