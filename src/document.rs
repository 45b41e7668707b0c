//! The top-level document type.
//!
//! [`XmlDocument`] owns the whole load/parse/save lifecycle and keeps exactly
//! one of three states at all times: nothing loaded, a parsed tree, or a
//! recorded error. A failed load never leaves a half-built tree behind and a
//! successful one always clears any earlier error.

use std::fmt;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use encoding::EncodingRef;
use log::debug;

use crate::engine::{ParseEncoding, QuickXmlEngine, XmlEngine};
use crate::entities::repair_entities;
use crate::err::{Result, XmlError};
use crate::resolver::CharsetResolver;
use crate::tree::{XmlElement, XmlTree};

/// How [`XmlDocument::parse`] treats the input bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncodingMode {
    /// Resolve the charset by walking the candidate chain.
    #[default]
    Auto,
    /// Force UTF-8, skipping detection and conversion entirely.
    Utf8,
    /// Force the raw path: bytes are widened 1:1 without any conversion.
    Raw,
}

#[derive(Clone)]
pub struct ParserSettings {
    /// Tried as the last conversion candidate when nothing else worked,
    /// standing in for the charset of the surrounding environment.
    pub(crate) fallback_codec: EncodingRef,
    pub(crate) indent: bool,
}

impl Default for ParserSettings {
    fn default() -> Self {
        ParserSettings {
            fallback_codec: encoding::all::WINDOWS_1252,
            indent: true,
        }
    }
}

impl ParserSettings {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn fallback_codec(mut self, codec: EncodingRef) -> Self {
        self.fallback_codec = codec;
        self
    }

    /// Sets whether saved documents are indented.
    pub fn indent(mut self, indent: bool) -> Self {
        self.indent = indent;
        self
    }

    pub fn should_indent(&self) -> bool {
        self.indent
    }
}

impl fmt::Debug for ParserSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParserSettings")
            .field("fallback_codec", &self.fallback_codec.name())
            .field("indent", &self.indent)
            .finish()
    }
}

pub struct XmlDocument<E: XmlEngine = QuickXmlEngine> {
    engine: E,
    settings: ParserSettings,
    /// Path of the last file load, used in log messages. Empty for buffers.
    source: String,
    suggested_charset: String,
    used_charset: String,
    tree: Option<XmlTree>,
    error: Option<String>,
}

impl XmlDocument<QuickXmlEngine> {
    pub fn new() -> Self {
        Self::with_engine(QuickXmlEngine)
    }

    /// A document that will try `charset` as the first candidate on the next
    /// auto-detected parse.
    pub fn with_suggested_charset(charset: &str) -> Self {
        let mut document = Self::new();
        document.set_suggested_charset(charset);
        document
    }

    /// Attempts to load a document from a given path, failing if the file
    /// cannot be read or no charset candidate yields well-formed XML.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let mut document = Self::new();
        document.load_file(path)?;
        Ok(document)
    }

    pub fn from_buffer(data: &[u8]) -> Result<Self> {
        let mut document = Self::new();
        document.parse(data, EncodingMode::Auto)?;
        Ok(document)
    }
}

impl Default for XmlDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: XmlEngine> XmlDocument<E> {
    pub fn with_engine(engine: E) -> Self {
        XmlDocument {
            engine,
            settings: ParserSettings::default(),
            source: String::new(),
            suggested_charset: String::new(),
            used_charset: String::new(),
            tree: None,
            error: None,
        }
    }

    pub fn with_configuration(mut self, settings: ParserSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Reads and parses `path` with automatic charset resolution.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.load_file_with_encoding(path, EncodingMode::Auto)
    }

    /// [`load_file`](Self::load_file) with `charset` as the first candidate.
    /// Callers pass the charset advertised out of band, typically by an HTTP
    /// `Content-Type` header.
    pub fn load_file_with_charset(
        &mut self,
        path: impl AsRef<Path>,
        charset: &str,
    ) -> Result<()> {
        self.set_suggested_charset(charset);
        self.load_file_with_encoding(path, EncodingMode::Auto)
    }

    pub fn load_file_with_encoding(
        &mut self,
        path: impl AsRef<Path>,
        mode: EncodingMode,
    ) -> Result<()> {
        let path = path.as_ref();
        self.source = path.display().to_string();
        debug!("loading XML document from {}", self.source);

        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(source) => {
                return Err(self.record_failure(XmlError::FailedToOpenFile {
                    source,
                    path: path.to_path_buf(),
                }));
            }
        };
        if data.is_empty() {
            return Err(self.record_failure(XmlError::EmptyFile {
                path: path.to_path_buf(),
            }));
        }
        self.parse(&data, mode)
    }

    /// Drains `reader` and parses the collected bytes.
    pub fn load_from_reader<R: Read>(&mut self, reader: &mut R, mode: EncodingMode) -> Result<()> {
        self.source.clear();
        let mut data = Vec::new();
        if let Err(source) = reader.read_to_end(&mut data) {
            return Err(self.record_failure(XmlError::Io { source }));
        }
        self.parse(&data, mode)
    }

    /// Parses `data`, replacing whatever the document held before. On failure
    /// the document is left empty with the error recorded.
    pub fn parse(&mut self, data: &[u8], mode: EncodingMode) -> Result<()> {
        self.tree = None;
        self.error = None;
        self.used_charset.clear();

        match mode {
            EncodingMode::Utf8 | EncodingMode::Raw => {
                // A forced encoding overrides any charset hint.
                self.suggested_charset.clear();
                let repaired = repair_entities(data);
                let encoding = if mode == EncodingMode::Utf8 {
                    ParseEncoding::Utf8
                } else {
                    ParseEncoding::Raw
                };
                match self.engine.parse(&repaired, encoding) {
                    Ok(tree) => {
                        if mode == EncodingMode::Utf8 {
                            self.used_charset.push_str("UTF-8");
                        }
                        self.tree = Some(tree);
                        Ok(())
                    }
                    Err(e) => Err(self.record_failure(e.into())),
                }
            }
            EncodingMode::Auto => {
                let outcome = CharsetResolver::new(&self.engine, &self.settings, &self.source)
                    .resolve(data, &self.suggested_charset);
                match outcome {
                    Ok(resolution) => {
                        self.used_charset = resolution.used_charset;
                        self.tree = Some(resolution.tree);
                        Ok(())
                    }
                    Err(e) => Err(self.record_failure(e)),
                }
            }
        }
    }

    /// [`parse`](Self::parse) with `charset` as the first candidate.
    pub fn parse_with_charset(&mut self, data: &[u8], charset: &str) -> Result<()> {
        self.set_suggested_charset(charset);
        self.parse(data, EncodingMode::Auto)
    }

    /// Serializes the parsed tree as UTF-8 text.
    pub fn render(&self) -> Result<String> {
        let tree = self.tree.as_ref().ok_or(XmlError::NothingToSave)?;
        self.engine.render(tree, self.settings.should_indent())
    }

    /// Writes the rendered document to `path`, replacing the file's previous
    /// contents entirely, and flushes before reporting success.
    pub fn save_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let rendered = self.render()?;
        let path = path.as_ref();
        debug!("saving XML document to {}", path.display());

        let mut file = File::create(path).map_err(|source| XmlError::FailedToOpenFile {
            source,
            path: path.to_path_buf(),
        })?;
        file.write_all(rendered.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    pub fn tree(&self) -> Option<&XmlTree> {
        self.tree.as_ref()
    }

    pub fn root(&self) -> Option<&XmlElement> {
        self.tree.as_ref().map(|tree| &tree.root)
    }

    /// Replaces the document content with a programmatically built tree.
    pub fn set_tree(&mut self, tree: XmlTree) {
        self.tree = Some(tree);
        self.error = None;
    }

    /// The charset that produced the current tree. Empty when nothing is
    /// loaded or when only the raw no-conversion fallback succeeded.
    pub fn used_charset(&self) -> &str {
        &self.used_charset
    }

    pub fn suggested_charset(&self) -> &str {
        &self.suggested_charset
    }

    pub fn set_suggested_charset(&mut self, charset: &str) {
        self.suggested_charset = charset.to_ascii_uppercase();
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    fn record_failure(&mut self, error: XmlError) -> XmlError {
        self.tree = None;
        self.used_charset.clear();
        self.error = Some(error.to_string());
        error
    }
}
