//! Charset candidate chain for [`EncodingMode::Auto`](crate::EncodingMode::Auto).
//!
//! Candidates are tried in a fixed order until one yields a well-formed
//! document: the caller's suggested charset, the charset detected from the
//! payload (BOM or XML declaration), plain UTF-8, the configured fallback
//! codec, and finally a byte-preserving raw pass. Whenever a candidate other
//! than the suggestion wins, the substitution is logged so misdeclared feeds
//! remain diagnosable.

use std::borrow::Cow;

use log::{debug, warn};

use crate::charset;
use crate::document::ParserSettings;
use crate::engine::{ParseEncoding, XmlEngine};
use crate::entities::{repair_entities, repair_entities_str};
use crate::err::XmlError;
use crate::tree::XmlTree;

/// A successfully parsed tree plus the charset that produced it.
///
/// `used_charset` is empty when the raw pass won, since the byte values were
/// preserved without any declared interpretation.
#[derive(Debug)]
pub(crate) struct Resolution {
    pub tree: XmlTree,
    pub used_charset: String,
}

pub(crate) struct CharsetResolver<'a, E> {
    engine: &'a E,
    settings: &'a ParserSettings,
    source: &'a str,
}

impl<'a, E: XmlEngine> CharsetResolver<'a, E> {
    pub(crate) fn new(engine: &'a E, settings: &'a ParserSettings, source: &'a str) -> Self {
        CharsetResolver {
            engine,
            settings,
            source,
        }
    }

    /// Runs the candidate chain over `data`. `suggested` is the caller's
    /// charset hint, already uppercased; empty means no hint.
    pub(crate) fn resolve(&self, data: &[u8], suggested: &str) -> Result<Resolution, XmlError> {
        // The raw repair of `data` is shared between the UTF-8 and raw trials.
        let mut repaired_raw: Option<Cow<'_, [u8]>> = None;
        let mut tried: Vec<String> = Vec::new();

        if !suggested.is_empty() {
            tried.push(suggested.to_owned());
            match self.try_named(data, &mut repaired_raw, suggested) {
                Ok(tree) => {
                    return Ok(Resolution {
                        tree,
                        used_charset: suggested.to_owned(),
                    });
                }
                Err(e) => debug!(
                    "suggested charset {:?} failed for {}: {}",
                    suggested,
                    self.target(),
                    e
                ),
            }
        }

        let detected = charset::detect_xml_charset(data).unwrap_or_default();
        if !detected.is_empty() && detected != suggested {
            tried.push(detected.clone());
            match self.try_named(data, &mut repaired_raw, &detected) {
                Ok(tree) => {
                    self.warn_substitution(&detected, suggested, "");
                    return Ok(Resolution {
                        tree,
                        used_charset: detected,
                    });
                }
                Err(e) => debug!(
                    "detected charset {:?} failed for {}: {}",
                    detected,
                    self.target(),
                    e
                ),
            }
        }

        // Plain UTF-8, unless one of the hints already named it (retrying the
        // exact same decode could not succeed).
        if suggested != "UTF-8" && detected != "UTF-8" && std::str::from_utf8(data).is_ok() {
            tried.push("UTF-8".to_owned());
            match self.try_named(data, &mut repaired_raw, "UTF-8") {
                Ok(tree) => {
                    self.warn_substitution("UTF-8", suggested, &detected);
                    return Ok(Resolution {
                        tree,
                        used_charset: "UTF-8".to_owned(),
                    });
                }
                Err(e) => debug!("UTF-8 failed for {}: {}", self.target(), e),
            }
        }

        let fallback = self.settings.fallback_codec.name().to_ascii_uppercase();
        tried.push(fallback.clone());
        match self.try_named(data, &mut repaired_raw, &fallback) {
            Ok(tree) => {
                self.warn_substitution(&fallback, suggested, &detected);
                return Ok(Resolution {
                    tree,
                    used_charset: fallback,
                });
            }
            Err(e) => debug!(
                "fallback charset {:?} failed for {}: {}",
                fallback,
                self.target(),
                e
            ),
        }

        // Last resort: map bytes straight to code points so the caller still
        // gets a tree when the payload is structurally sound.
        tried.push("raw".to_owned());
        let repaired: &[u8] = repaired_raw.get_or_insert_with(|| repair_entities(data));
        match self.engine.parse(repaired, ParseEncoding::Raw) {
            Ok(tree) => {
                if !suggested.is_empty() {
                    warn!(
                        "Processed {} as unknown encoding instead of suggested charset \"{}\"",
                        self.target(),
                        suggested
                    );
                } else if !detected.is_empty() {
                    warn!(
                        "Processed {} as unknown encoding instead of detected charset \"{}\"",
                        self.target(),
                        detected
                    );
                } else {
                    warn!("Processed {} as unknown encoding", self.target());
                }
                Ok(Resolution {
                    tree,
                    used_charset: String::new(),
                })
            }
            Err(source) => Err(XmlError::ExhaustedCharsets {
                tried: tried.join(", "),
                source,
            }),
        }
    }

    /// Decodes `data` as `charset`, repairs stray ampersands and hands the
    /// result to the engine. `"UTF-8"` skips the decode and parses the
    /// repaired bytes directly.
    fn try_named<'d>(
        &self,
        data: &'d [u8],
        repaired_raw: &mut Option<Cow<'d, [u8]>>,
        charset: &str,
    ) -> Result<XmlTree, XmlError> {
        if charset == "UTF-8" {
            let repaired: &[u8] = repaired_raw.get_or_insert_with(|| repair_entities(data));
            Ok(self.engine.parse(repaired, ParseEncoding::Utf8)?)
        } else {
            let converted = charset::to_utf8(charset, data)?;
            let repaired = repair_entities_str(&converted);
            Ok(self.engine.parse(repaired.as_bytes(), ParseEncoding::Utf8)?)
        }
    }

    fn warn_substitution(&self, used: &str, suggested: &str, detected: &str) {
        if !suggested.is_empty() {
            warn!(
                "\"{}\" charset was used instead of suggested charset \"{}\" for {}",
                used,
                suggested,
                self.target()
            );
        } else if !detected.is_empty() {
            warn!(
                "\"{}\" charset was used instead of detected charset \"{}\" for {}",
                used,
                detected,
                self.target()
            );
        }
    }

    fn target(&self) -> String {
        if self.source.is_empty() {
            "XML data".to_owned()
        } else {
            format!("file \"{}\"", self.source)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::QuickXmlEngine;
    use crate::err::Result;
    use encoding::EncoderTrap;
    use encoding::all::{UTF_16LE, WINDOWS_1251};
    use encoding::types::Encoding;
    use pretty_assertions::assert_eq;

    fn resolve(data: &[u8], suggested: &str) -> Result<Resolution> {
        resolve_with(data, suggested, ParserSettings::default())
    }

    fn resolve_with(data: &[u8], suggested: &str, settings: ParserSettings) -> Result<Resolution> {
        let engine = QuickXmlEngine;
        CharsetResolver::new(&engine, &settings, "").resolve(data, suggested)
    }

    fn cp1251(text: &str) -> Vec<u8> {
        WINDOWS_1251
            .encode(text, EncoderTrap::Strict)
            .expect("sample text must be representable in windows-1251")
    }

    #[test]
    fn parses_plain_utf8_without_hints() {
        let resolution = resolve(b"<a>x</a>", "").unwrap();

        assert_eq!(resolution.used_charset, "UTF-8");
        assert_eq!(resolution.tree.root.name, "a");
        assert_eq!(resolution.tree.root.text(), "x");
    }

    #[test]
    fn suggested_charset_wins_over_declaration() {
        let data = b"<?xml version=\"1.0\" encoding=\"windows-1251\"?><a>ok</a>";

        let resolution = resolve(data, "WINDOWS-1252").unwrap();

        assert_eq!(resolution.used_charset, "WINDOWS-1252");
        assert_eq!(resolution.tree.root.text(), "ok");
    }

    #[test]
    fn detected_declaration_is_used_without_suggestion() {
        let data = cp1251("<?xml version=\"1.0\" encoding=\"windows-1251\"?><a>привет</a>");

        let resolution = resolve(&data, "").unwrap();

        assert_eq!(resolution.used_charset, "WINDOWS-1251");
        assert_eq!(resolution.tree.root.text(), "привет");
    }

    #[test]
    fn bom_detection_feeds_utf16() {
        let mut data = vec![0xFF, 0xFE];
        for unit in "<a>hi</a>".encode_utf16() {
            data.extend_from_slice(&unit.to_le_bytes());
        }

        let resolution = resolve(&data, "").unwrap();

        assert_eq!(resolution.used_charset, "UTF-16LE");
        assert_eq!(resolution.tree.root.text(), "hi");
    }

    #[test]
    fn fallback_codec_rescues_undeclared_legacy_bytes() {
        let resolution = resolve(b"<a>caf\xE9</a>", "").unwrap();

        assert_eq!(resolution.used_charset, "WINDOWS-1252");
        assert_eq!(resolution.tree.root.text(), "café");
    }

    #[test]
    fn utf8_retry_is_skipped_when_suggestion_already_named_it() {
        let resolution = resolve(b"<a>caf\xE9</a>", "UTF-8").unwrap();

        assert_eq!(resolution.used_charset, "WINDOWS-1252");
        assert_eq!(resolution.tree.root.text(), "café");
    }

    #[test]
    fn raw_fallback_reports_empty_charset() {
        // Nine bytes cannot decode as UTF-16 and 0xE9 is not valid UTF-8, so
        // only the raw pass is left.
        let settings = ParserSettings::new().fallback_codec(UTF_16LE);

        let resolution = resolve_with(b"<a>\xE9x</a>", "", settings).unwrap();

        assert_eq!(resolution.used_charset, "");
        assert_eq!(resolution.tree.root.text(), "\u{e9}x");
    }

    #[test]
    fn default_fallback_rescues_control_range_bytes() {
        // The windows-1252 table maps all 256 bytes (0x81 decodes to U+0081),
        // so under default settings the fallback wins before the raw pass.
        let resolution = resolve(b"<a>\x81</a>", "").unwrap();

        assert_eq!(resolution.used_charset, "WINDOWS-1252");
        assert_eq!(resolution.tree.root.text(), "\u{81}");
    }

    #[test]
    fn repairs_entities_after_conversion() {
        let data = cp1251("<?xml version=\"1.0\" encoding=\"windows-1251\"?><r>пока & привет</r>");

        let resolution = resolve(&data, "").unwrap();

        assert_eq!(resolution.tree.root.text(), "пока & привет");
    }

    #[test]
    fn charset_exhaustion_reports_every_attempt() {
        let data = b"<?xml version=\"1.0\" encoding=\"windows-1251\"?><a>";

        let err = resolve(data, "WINDOWS-1251").unwrap_err();

        match err {
            XmlError::ExhaustedCharsets { tried, source } => {
                assert_eq!(tried, "WINDOWS-1251, UTF-8, WINDOWS-1252, raw");
                assert!(!source.message.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
