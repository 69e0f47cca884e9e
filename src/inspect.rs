//
// inspect.rs
// Dicom-Courier-rs
//
// Renders a human-readable listing of a created file: meta group, main dataset
// and a summary of the pixel data, with names from the standard dictionary.
//
// Dicom-Courier-rs contributors - October 2026

use std::fmt::Write;
use std::path::Path;

use anyhow::{Context, Result};
use dicom::core::dictionary::DataDictionary;
use dicom::core::{Tag, VR};
use dicom::dictionary_std::StandardDataDictionary;

use crate::codec::TagValue;
use crate::dataset::{Dataset, PixelData};

/// Print the listing of `path` to stdout.
pub fn inspect_file(path: &Path, max_value_len: usize) -> Result<()> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    println!("{}", inspect_to_string(&bytes, max_value_len)?);
    Ok(())
}

pub fn inspect_to_string(bytes: &[u8], max_value_len: usize) -> Result<String> {
    // only files in the layout this crate writes are listed
    let dataset = Dataset::parse(bytes).context("Failed to parse DICOM file")?;
    let transfer_syntax = dataset.transfer_syntax()?;

    let mut out = String::new();
    let _ = writeln!(out, "# Transfer syntax: {}", transfer_syntax.name());
    let _ = writeln!(out, "# File meta information");
    for element in &dataset.meta {
        write_element(&mut out, element, max_value_len);
    }
    let _ = writeln!(out, "# Dataset");
    for element in &dataset.main {
        write_element(&mut out, element, max_value_len);
    }

    // pixel data is summarized, never dumped
    let tag = format_tag(dicom::dictionary_std::tags::PIXEL_DATA);
    match &dataset.pixel_data {
        PixelData::Native(value) => {
            let _ = writeln!(
                out,
                "{} PixelData {} [native: {} bytes]",
                tag,
                value.vr,
                value.bytes.len()
            );
        }
        PixelData::Encapsulated { fragments } => {
            let total: usize = fragments.iter().map(Vec::len).sum();
            let _ = writeln!(
                out,
                "{} PixelData OB [encapsulated: {} fragment(s), {} bytes]",
                tag,
                fragments.len(),
                total
            );
        }
    }
    Ok(out)
}

fn write_element(out: &mut String, element: &TagValue, max_value_len: usize) {
    let _ = writeln!(
        out,
        "{} {} {} {}",
        format_tag(element.tag),
        tag_name(element.tag),
        element.vr,
        preview(element, max_value_len)
    );
}

fn preview(element: &TagValue, max_value_len: usize) -> String {
    match element.vr {
        VR::US if element.bytes.len() == 2 => element
            .as_u16()
            .map(|v| v.to_string())
            .unwrap_or_default(),
        VR::UL if element.bytes.len() == 4 => element
            .as_u32()
            .map(|v| v.to_string())
            .unwrap_or_default(),
        // binary
        VR::OB | VR::OW | VR::OD | VR::OF | VR::OL | VR::UN | VR::SQ => {
            format!("{} bytes", element.bytes.len())
        }
        _ => match element.as_text() {
            Some(text) => truncate(text, max_value_len),
            None => format!("{} bytes", element.bytes.len()),
        },
    }
}

fn truncate(input: &str, limit: usize) -> String {
    // cut on a char boundary
    match input.char_indices().nth(limit) {
        None => input.to_string(),
        Some((cut, _)) => format!("{}…", &input[..cut]),
    }
}

fn format_tag(tag: Tag) -> String {
    format!("({:04X},{:04X})", tag.group(), tag.element())
}

fn tag_name(tag: Tag) -> String {
    StandardDataDictionary
        .by_tag(tag)
        .map(|e| e.alias.to_string())
        .unwrap_or_else(|| "UnknownTag".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("abc", 5), "abc");
        assert_eq!(truncate("Müller^Hans", 2), "Mü…");
    }

    #[test]
    fn names_come_from_the_dictionary() {
        assert_eq!(tag_name(Tag(0x0010, 0x0010)), "PatientName");
        assert_eq!(tag_name(Tag(0x0009, 0x0001)), "UnknownTag");
        assert_eq!(format_tag(Tag(0x7FE0, 0x0010)), "(7FE0,0010)");
    }

    #[test]
    fn numbers_and_binary_values_are_summarized() {
        let rows = TagValue::u16(Tag(0x0028, 0x0010), 480);
        assert_eq!(preview(&rows, 8), "480");
        let version = TagValue::new(Tag(0x0002, 0x0001), VR::OB, vec![0, 1]);
        assert_eq!(preview(&version, 8), "2 bytes");
        let name = TagValue::text(Tag(0x0010, 0x0010), VR::PN, "DOE^JOHN ");
        assert_eq!(preview(&name, 64), "DOE^JOHN");
    }
}
