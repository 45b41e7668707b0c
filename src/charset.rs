//! Charset detection and conversion for XML byte streams.
//!
//! Detection follows the usual XML sniffing ladder: byte order marks first,
//! then the byte patterns a 16-bit encoded `<?` produces without a BOM, then
//! the `encoding=` attribute of the XML declaration. Only encodings the
//! converter can actually handle are reported.

use encoding::DecoderTrap;
use encoding::label::encoding_from_whatwg_label;
use memchr::memmem;

use crate::err::ConversionError;

pub const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
pub const UTF16_LE_BOM: &[u8] = &[0xFF, 0xFE];
pub const UTF16_BE_BOM: &[u8] = &[0xFE, 0xFF];

/// The declaration has to appear at the very start of the document, so only
/// this much of the buffer is ever inspected.
const DECLARATION_SCAN_LIMIT: usize = 1024;

/// Inspects the head of `data` for a charset marker and returns the detected
/// charset name, uppercased. Returns `None` when the bytes carry no usable
/// evidence; absence of a BOM and a declaration is not treated as proof of
/// UTF-8.
pub fn detect_xml_charset(data: &[u8]) -> Option<String> {
    if data.starts_with(UTF8_BOM) {
        return Some("UTF-8".to_owned());
    }
    if data.starts_with(UTF16_BE_BOM) {
        return Some("UTF-16BE".to_owned());
    }
    if data.starts_with(UTF16_LE_BOM) {
        return Some("UTF-16LE".to_owned());
    }
    // A 16-bit document without a BOM still betrays itself by the encoding
    // of the `<?` that opens the declaration.
    if data.starts_with(&[0x00, 0x3C, 0x00, 0x3F]) {
        return Some("UTF-16BE".to_owned());
    }
    if data.starts_with(&[0x3C, 0x00, 0x3F, 0x00]) {
        return Some("UTF-16LE".to_owned());
    }
    declared_charset(data)
}

/// Extracts the `encoding=` pseudo-attribute from an XML declaration.
fn declared_charset(data: &[u8]) -> Option<String> {
    let head = &data[..data.len().min(DECLARATION_SCAN_LIMIT)];
    let rest = head.strip_prefix(b"<?xml")?;
    // `<?xml-stylesheet` is a processing instruction, not a declaration.
    if !rest.first()?.is_ascii_whitespace() {
        return None;
    }
    let declaration = match memmem::find(rest, b"?>") {
        Some(end) => &rest[..end],
        None => rest,
    };

    let at = memmem::find(declaration, b"encoding")?;
    if !declaration[..at]
        .last()
        .is_some_and(|b| b.is_ascii_whitespace())
    {
        return None;
    }
    let mut tail = declaration[at + b"encoding".len()..]
        .iter()
        .copied()
        .skip_while(|b| b.is_ascii_whitespace());
    if tail.next() != Some(b'=') {
        return None;
    }
    let mut tail = tail.skip_while(|b| b.is_ascii_whitespace());
    let quote = match tail.next() {
        Some(q @ (b'"' | b'\'')) => q,
        _ => return None,
    };

    let mut name = String::new();
    for b in tail {
        if b == quote {
            return (!name.is_empty()).then(|| name.to_ascii_uppercase());
        }
        if !(b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b':')) {
            return None;
        }
        name.push(char::from(b));
    }
    None
}

/// Converts `data` from `charset` into a UTF-8 string.
///
/// Conversion is strict: any byte sequence that is invalid in the source
/// charset fails the whole conversion rather than being replaced, so a wrong
/// charset guess cannot silently corrupt the document. A conversion that
/// consumes a non-empty input and produces nothing is treated the same way.
pub fn to_utf8(charset: &str, data: &[u8]) -> Result<String, ConversionError> {
    let codec = encoding_from_whatwg_label(charset)
        .ok_or_else(|| ConversionError::new(charset, "no converter for this charset"))?;
    let decoded = codec
        .decode(data, DecoderTrap::Strict)
        .map_err(|message| ConversionError::new(charset, message))?;
    if decoded.is_empty() && !data.is_empty() {
        return Err(ConversionError::new(charset, "conversion produced no output"));
    }
    Ok(decoded)
}
