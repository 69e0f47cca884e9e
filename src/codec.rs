//
// codec.rs
// Dicom-Courier-rs
//
// Little endian data element codec: length-field layout per VR, padding rules,
// fixed-width numeric validation and encapsulation item framing.
//
// Dicom-Courier-rs contributors - October 2026

use std::borrow::Cow;

use dicom::core::{Tag, VR};
use dicom::dictionary_std::tags;

use crate::error::CodecError;

/// Item tag used for the offset table and every pixel data fragment.
pub const ITEM: Tag = Tag(0xFFFE, 0xE000);
/// Terminates an undefined-length pixel data element.
pub const SEQUENCE_DELIMITATION_ITEM: Tag = Tag(0xFFFE, 0xE0DD);
/// Length sentinel announcing an encapsulated (fragmented) value.
pub const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;

const MAX_SHORT_LENGTH: usize = 0xFFFE;

/// Whether the VR travels on the wire next to the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VrMode {
    Explicit,
    Implicit,
}

/// One data element: tag, value representation and value bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagValue {
    pub tag: Tag,
    pub vr: VR,
    pub bytes: Vec<u8>,
}

impl TagValue {
    pub fn new(tag: Tag, vr: VR, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            tag,
            vr,
            bytes: bytes.into(),
        }
    }

    pub fn text(tag: Tag, vr: VR, value: &str) -> Self {
        Self::new(tag, vr, value.as_bytes())
    }

    pub fn uid(tag: Tag, value: &str) -> Self {
        Self::new(tag, VR::UI, value.as_bytes())
    }

    pub fn u16(tag: Tag, value: u16) -> Self {
        Self::new(tag, VR::US, value.to_le_bytes())
    }

    pub fn u32(tag: Tag, value: u32) -> Self {
        Self::new(tag, VR::UL, value.to_le_bytes())
    }

    /// Text value with the trailing padding removed.
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes)
            .ok()
            .map(|s| s.trim_end_matches([' ', '\0']))
    }

    pub fn as_u16(&self) -> Option<u16> {
        match self.bytes.as_slice() {
            [a, b] => Some(u16::from_le_bytes([*a, *b])),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self.bytes.as_slice() {
            [a, b, c, d] => Some(u32::from_le_bytes([*a, *b, *c, *d])),
            _ => None,
        }
    }
}

/// Layout of the explicit VR length field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthField {
    /// 2-byte length directly after the VR.
    Short,
    /// 2 reserved bytes followed by a 4-byte length.
    Long,
}

pub fn length_field(vr: VR) -> LengthField {
    match vr {
        VR::OB
        | VR::OD
        | VR::OF
        | VR::OL
        | VR::OW
        | VR::SQ
        | VR::UC
        | VR::UN
        | VR::UR
        | VR::UT => LengthField::Long,
        _ => LengthField::Short,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueRule {
    /// Character data, odd lengths padded with the given byte.
    Padded(u8),
    /// Arrays of fixed-width numbers.
    Fixed(usize),
    /// Opaque values that must already be even.
    Even,
}

fn value_rule(vr: VR) -> ValueRule {
    match vr {
        VR::AE
        | VR::AS
        | VR::CS
        | VR::DA
        | VR::DS
        | VR::DT
        | VR::IS
        | VR::LO
        | VR::LT
        | VR::PN
        | VR::SH
        | VR::ST
        | VR::TM
        | VR::UC
        | VR::UR
        | VR::UT => ValueRule::Padded(b' '),
        // UIDs and byte streams pad with NUL, never with a space
        VR::UI | VR::OB | VR::UN => ValueRule::Padded(0x00),
        VR::US | VR::SS | VR::OW => ValueRule::Fixed(2),
        VR::UL | VR::SL | VR::FL | VR::AT | VR::OF | VR::OL => ValueRule::Fixed(4),
        VR::FD | VR::OD => ValueRule::Fixed(8),
        // SQ, OV, SV, UV and anything newer
        _ => ValueRule::Even,
    }
}

fn check_width(tag: Tag, vr: VR, len: usize) -> Result<(), CodecError> {
    match value_rule(vr) {
        ValueRule::Fixed(width) if len % width != 0 => Err(CodecError::InvalidVrLength {
            tag,
            vr,
            len,
            reason: "not a multiple of the element width",
        }),
        ValueRule::Even if len % 2 != 0 => Err(CodecError::InvalidVrLength {
            tag,
            vr,
            len,
            reason: "odd length",
        }),
        _ => Ok(()),
    }
}

fn prepare_value(tag: Tag, vr: VR, value: &[u8]) -> Result<Cow<'_, [u8]>, CodecError> {
    check_width(tag, vr, value.len())?;
    match value_rule(vr) {
        ValueRule::Padded(pad) if value.len() % 2 != 0 => {
            let mut padded = Vec::with_capacity(value.len() + 1);
            padded.extend_from_slice(value);
            padded.push(pad);
            Ok(Cow::Owned(padded))
        }
        _ => Ok(Cow::Borrowed(value)),
    }
}

fn put_tag(out: &mut Vec<u8>, tag: Tag) {
    out.extend_from_slice(&tag.group().to_le_bytes());
    out.extend_from_slice(&tag.element().to_le_bytes());
}

/// Append one element to `out`, returning the number of bytes written.
pub fn write_element(
    out: &mut Vec<u8>,
    mode: VrMode,
    tag: Tag,
    vr: VR,
    value: &[u8],
) -> Result<usize, CodecError> {
    let value = prepare_value(tag, vr, value)?;
    let start = out.len();
    put_tag(out, tag);

    match mode {
        VrMode::Implicit => {
            // no VR on the wire, always a 4-byte length
            let len = long_length(tag, vr, value.len())?;
            out.extend_from_slice(&len.to_le_bytes());
        }
        VrMode::Explicit => {
            out.extend_from_slice(&vr.to_bytes());
            match length_field(vr) {
                LengthField::Short => {
                    if value.len() > MAX_SHORT_LENGTH {
                        return Err(CodecError::InvalidVrLength {
                            tag,
                            vr,
                            len: value.len(),
                            reason: "exceeds the 2-byte length field",
                        });
                    }
                    out.extend_from_slice(&(value.len() as u16).to_le_bytes());
                }
                LengthField::Long => {
                    let len = long_length(tag, vr, value.len())?;
                    // reserved
                    out.extend_from_slice(&[0, 0]);
                    out.extend_from_slice(&len.to_le_bytes());
                }
            }
        }
    }

    out.extend_from_slice(&value);
    Ok(out.len() - start)
}

fn long_length(tag: Tag, vr: VR, len: usize) -> Result<u32, CodecError> {
    match u32::try_from(len) {
        // FFFFFFFFH is reserved for undefined length
        Ok(len) if len != UNDEFINED_LENGTH => Ok(len),
        _ => Err(CodecError::InvalidVrLength {
            tag,
            vr,
            len,
            reason: "exceeds the 4-byte length field",
        }),
    }
}

/// Encode one element in explicit VR little endian.
pub fn encode(tag: Tag, vr: VR, value: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(12 + value.len() + 1);
    write_element(&mut out, VrMode::Explicit, tag, vr, value)?;
    Ok(out)
}

/// Encode one element in implicit VR little endian.
pub fn encode_implicit(tag: Tag, vr: VR, value: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(8 + value.len() + 1);
    write_element(&mut out, VrMode::Implicit, tag, vr, value)?;
    Ok(out)
}

/// Append an item (tag, 4-byte length, raw bytes). Odd fragments get a trailing zero.
pub fn write_item(out: &mut Vec<u8>, tag: Tag, value: &[u8]) -> Result<usize, CodecError> {
    let start = out.len();
    let padded_len = value.len() + value.len() % 2;
    let len = long_length(tag, VR::OB, padded_len)?;
    put_tag(out, tag);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(value);
    if value.len() % 2 != 0 {
        out.push(0);
    }
    Ok(out.len() - start)
}

/// Decoded element header; `header_len` bytes precede the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementHeader {
    pub tag: Tag,
    pub vr: VR,
    pub length: u32,
    pub header_len: usize,
}

impl ElementHeader {
    pub fn is_undefined_length(&self) -> bool {
        self.length == UNDEFINED_LENGTH
    }
}

fn need(stream: &[u8], needed: usize) -> Result<(), CodecError> {
    if stream.len() < needed {
        return Err(CodecError::TruncatedStream {
            needed,
            available: stream.len(),
        });
    }
    Ok(())
}

fn read_u16(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

fn read_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

/// Peek the tag at the start of `stream`.
pub fn peek_tag(stream: &[u8]) -> Result<Tag, CodecError> {
    need(stream, 4)?;
    Ok(Tag(read_u16(stream), read_u16(&stream[2..])))
}

pub fn read_header(stream: &[u8], mode: VrMode) -> Result<ElementHeader, CodecError> {
    let tag = peek_tag(stream)?;
    match mode {
        VrMode::Implicit => {
            need(stream, 8)?;
            Ok(ElementHeader {
                tag,
                vr: implicit_vr(tag),
                length: read_u32(&stream[4..]),
                header_len: 8,
            })
        }
        VrMode::Explicit => {
            need(stream, 8)?;
            let bytes = [stream[4], stream[5]];
            let vr = VR::from_binary(bytes).ok_or(CodecError::UnknownVr { tag, bytes })?;
            match length_field(vr) {
                LengthField::Short => Ok(ElementHeader {
                    tag,
                    vr,
                    length: u32::from(read_u16(&stream[6..])),
                    header_len: 8,
                }),
                LengthField::Long => {
                    need(stream, 12)?;
                    Ok(ElementHeader {
                        tag,
                        vr,
                        length: read_u32(&stream[8..]),
                        header_len: 12,
                    })
                }
            }
        }
    }
}

/// Read an item header (tag + 4-byte length); items never carry a VR.
pub fn read_item_header(stream: &[u8]) -> Result<(Tag, u32), CodecError> {
    need(stream, 8)?;
    Ok((peek_tag(stream)?, read_u32(&stream[4..])))
}

/// Decode one defined-length element, returning it with the bytes consumed.
pub fn read_element(stream: &[u8], mode: VrMode) -> Result<(TagValue, usize), CodecError> {
    let header = read_header(stream, mode)?;
    if header.is_undefined_length() {
        return Err(CodecError::UndefinedLength { tag: header.tag });
    }
    let remaining = stream.len() - header.header_len;
    let len = header.length as usize;
    if len > remaining {
        return Err(CodecError::LengthOverflow {
            tag: header.tag,
            declared: header.length,
            remaining,
        });
    }
    check_width(header.tag, header.vr, len)?;
    let start = header.header_len;
    let value = stream[start..start + len].to_vec();
    Ok((TagValue::new(header.tag, header.vr, value), start + len))
}

/// Decode one explicit VR little endian element.
pub fn decode(stream: &[u8]) -> Result<(TagValue, usize), CodecError> {
    read_element(stream, VrMode::Explicit)
}

/// Decode one implicit VR little endian element, looking the VR up by tag.
pub fn decode_implicit(stream: &[u8]) -> Result<(TagValue, usize), CodecError> {
    read_element(stream, VrMode::Implicit)
}

/// VR of the attributes this crate writes, for reading implicit VR datasets.
pub fn implicit_vr(tag: Tag) -> VR {
    // group length
    if tag.element() == 0x0000 {
        return VR::UL;
    }
    match tag {
        tags::SPECIFIC_CHARACTER_SET
        | tags::IMAGE_TYPE
        | tags::MODALITY
        | tags::CONVERSION_TYPE
        | tags::PATIENT_SEX
        | tags::PHOTOMETRIC_INTERPRETATION => VR::CS,
        tags::SOP_CLASS_UID
        | tags::SOP_INSTANCE_UID
        | tags::STUDY_INSTANCE_UID
        | tags::SERIES_INSTANCE_UID
        | tags::AFFECTED_SOP_CLASS_UID
        | tags::AFFECTED_SOP_INSTANCE_UID => VR::UI,
        tags::STUDY_DATE | tags::CONTENT_DATE | tags::PATIENT_BIRTH_DATE => VR::DA,
        tags::STUDY_TIME | tags::CONTENT_TIME => VR::TM,
        tags::ACCESSION_NUMBER | tags::STUDY_ID => VR::SH,
        tags::MANUFACTURER
        | tags::INSTITUTION_NAME
        | tags::STUDY_DESCRIPTION
        | tags::SERIES_DESCRIPTION
        | tags::PATIENT_ID
        | tags::ERROR_COMMENT => VR::LO,
        tags::REFERRING_PHYSICIAN_NAME
        | tags::PERFORMING_PHYSICIAN_NAME
        | tags::PATIENT_NAME => VR::PN,
        tags::SERIES_NUMBER | tags::INSTANCE_NUMBER | tags::NUMBER_OF_FRAMES => VR::IS,
        tags::SAMPLES_PER_PIXEL
        | tags::PLANAR_CONFIGURATION
        | tags::ROWS
        | tags::COLUMNS
        | tags::BITS_ALLOCATED
        | tags::BITS_STORED
        | tags::HIGH_BIT
        | tags::PIXEL_REPRESENTATION
        | tags::COMMAND_FIELD
        | tags::MESSAGE_ID
        | tags::PRIORITY
        | tags::MESSAGE_ID_BEING_RESPONDED_TO
        | tags::COMMAND_DATA_SET_TYPE
        | tags::STATUS => VR::US,
        tags::PIXEL_DATA => VR::OW,
        _ => VR::UN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_length_vr_layout() {
        let bytes = encode(tags::MODALITY, VR::CS, b"OT").unwrap();
        assert_eq!(
            bytes,
            vec![0x08, 0x00, 0x60, 0x00, b'C', b'S', 0x02, 0x00, b'O', b'T']
        );
    }

    #[test]
    fn long_length_vr_has_reserved_field() {
        let bytes = encode(tags::PIXEL_DATA, VR::OB, &[1, 2, 3, 4]).unwrap();
        assert_eq!(&bytes[4..6], b"OB");
        assert_eq!(&bytes[6..8], &[0, 0]);
        assert_eq!(&bytes[8..12], &4u32.to_le_bytes());
        assert_eq!(bytes.len(), 16);
    }

    #[test]
    fn odd_text_is_space_padded_and_uid_null_padded() {
        let name = encode(tags::PATIENT_NAME, VR::PN, b"Doe^Jo").unwrap();
        assert_eq!(name.len() % 2, 0);
        let odd = encode(tags::PATIENT_NAME, VR::PN, b"Doe^Joe").unwrap();
        assert_eq!(odd.len() % 2, 0);
        assert_eq!(*odd.last().unwrap(), b' ');

        let uid = encode(tags::SOP_CLASS_UID, VR::UI, b"1.2.3").unwrap();
        assert_eq!(uid.len() % 2, 0);
        assert_eq!(*uid.last().unwrap(), 0x00);
        assert_eq!(&uid[6..8], &6u16.to_le_bytes());
    }

    #[test]
    fn numeric_width_is_enforced() {
        let err = encode(tags::ROWS, VR::US, &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, CodecError::InvalidVrLength { .. }));
        let err = encode(Tag(0x0002, 0x0000), VR::UL, &[1, 2]).unwrap_err();
        assert!(matches!(err, CodecError::InvalidVrLength { .. }));
        assert!(encode(tags::ROWS, VR::US, &[1, 0, 2, 0]).is_ok());
    }

    #[test]
    fn short_length_field_rejects_large_values() {
        let value = vec![b'A'; 70_000];
        let err = encode(tags::STUDY_DESCRIPTION, VR::LO, &value).unwrap_err();
        assert!(matches!(err, CodecError::InvalidVrLength { .. }));
        assert!(encode(tags::PIXEL_DATA, VR::OB, &value).is_ok());
    }

    #[test]
    fn explicit_round_trip_across_vr_classes() {
        let cases = [
            TagValue::text(tags::PATIENT_NAME, VR::PN, "Doe^John"),
            TagValue::uid(tags::SOP_CLASS_UID, "1.2.840.10008.5.1.4.1.1.7"),
            TagValue::u16(tags::ROWS, 1080),
            TagValue::u32(Tag(0x0002, 0x0000), 196),
            TagValue::new(tags::PIXEL_DATA, VR::OW, vec![0u8; 64]),
            TagValue::new(Tag(0x0009, 0x0010), VR::UN, vec![7u8, 9]),
        ];
        for case in cases {
            let bytes = encode(case.tag, case.vr, &case.bytes).unwrap();
            let (decoded, used) = decode(&bytes).unwrap();
            assert_eq!(decoded, case);
            assert_eq!(used, bytes.len());
        }
    }

    #[test]
    fn implicit_round_trip_uses_dictionary_vr() {
        let bytes = encode_implicit(tags::COLUMNS, VR::US, &1920u16.to_le_bytes()).unwrap();
        assert_eq!(bytes.len(), 10);
        let (decoded, used) = decode_implicit(&bytes).unwrap();
        assert_eq!(used, 10);
        assert_eq!(decoded.vr, VR::US);
        assert_eq!(decoded.as_u16(), Some(1920));
    }

    #[test]
    fn truncated_header_is_reported() {
        let bytes = encode(tags::MODALITY, VR::CS, b"OT").unwrap();
        let err = decode(&bytes[..5]).unwrap_err();
        assert_eq!(
            err,
            CodecError::TruncatedStream {
                needed: 8,
                available: 5
            }
        );
    }

    #[test]
    fn declared_length_beyond_buffer_overflows() {
        let bytes = encode(tags::STUDY_DESCRIPTION, VR::LO, b"CHEST XRAY").unwrap();
        let err = decode(&bytes[..bytes.len() - 2]).unwrap_err();
        assert!(matches!(
            err,
            CodecError::LengthOverflow {
                declared: 10,
                remaining: 8,
                ..
            }
        ));
    }

    #[test]
    fn unknown_vr_is_rejected() {
        let mut bytes = encode(tags::MODALITY, VR::CS, b"OT").unwrap();
        bytes[4] = b'Z';
        bytes[5] = b'Z';
        assert!(matches!(
            decode(&bytes).unwrap_err(),
            CodecError::UnknownVr { .. }
        ));
    }

    #[test]
    fn items_pad_odd_fragments() {
        let mut out = Vec::new();
        let written = write_item(&mut out, ITEM, &[0xFF, 0xD8, 0xFF]).unwrap();
        assert_eq!(written, 12);
        let (tag, len) = read_item_header(&out).unwrap();
        assert_eq!(tag, ITEM);
        assert_eq!(len, 4);
        assert_eq!(out[11], 0);
    }

    #[test]
    fn text_accessor_strips_padding() {
        let bytes = encode(tags::SOP_INSTANCE_UID, VR::UI, b"1.2.345").unwrap();
        let (value, _) = decode(&bytes).unwrap();
        assert_eq!(value.as_text(), Some("1.2.345"));
    }
}
