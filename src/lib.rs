//! Fault-tolerant XML loading for feeds that lie about themselves.
//!
//! Real-world XML regularly arrives with a wrong or missing charset
//! declaration and with raw `&` characters in text. [`XmlDocument`] absorbs
//! both: payloads are run through a chain of charset candidates until one
//! yields a well-formed document, and stray ampersands are rewritten to
//! `&amp;` before parsing. The charset that finally worked is kept on the
//! document so callers can see what their data really was.
//!
//! ```
//! use lenient_xml::{EncodingMode, XmlDocument};
//!
//! let mut document = XmlDocument::new();
//! document.parse(
//!     b"<feed><title>news &amp; weather & sport</title></feed>",
//!     EncodingMode::Auto,
//! )?;
//!
//! let title = document
//!     .root()
//!     .and_then(|root| root.first_child_element("title"))
//!     .map(|title| title.text());
//! assert_eq!(title.as_deref(), Some("news & weather & sport"));
//! assert_eq!(document.used_charset(), "UTF-8");
//! # Ok::<(), lenient_xml::XmlError>(())
//! ```

pub mod charset;
pub mod document;
pub mod engine;
pub mod entities;
pub mod err;
mod resolver;
pub mod tree;

pub use document::{EncodingMode, ParserSettings, XmlDocument};
pub use engine::{ParseEncoding, QuickXmlEngine, XmlEngine};
pub use err::{ConversionError, ParseError, Result, XmlError};
pub use tree::{XmlAttribute, XmlDeclaration, XmlElement, XmlNode, XmlTree};
