//! Adapter between the document model and `quick-xml`.
//!
//! The engine is stateless: every [`XmlEngine::parse`] call builds a fresh
//! tree and nothing is carried over from previous calls, so a failed attempt
//! never contaminates a later one. That property is what allows the charset
//! resolver to retry the same engine with different candidate decodings.

use std::io::Write;

use log::trace;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesPI, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::err::{ParseError, XmlError};
use crate::tree::{XmlAttribute, XmlDeclaration, XmlElement, XmlNode, XmlTree};

/// How the raw bytes handed to [`XmlEngine::parse`] should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseEncoding {
    /// The bytes must be valid UTF-8; a violation is a [`ParseError`].
    Utf8,
    /// No interpretation at all: every byte is widened 1:1 to the char with
    /// the same value. Total, so only structural errors can fail the parse.
    Raw,
}

pub trait XmlEngine {
    fn parse(&self, data: &[u8], encoding: ParseEncoding) -> Result<XmlTree, ParseError>;
    fn render(&self, tree: &XmlTree, indent: bool) -> Result<String, XmlError>;
}

/// The default engine, backed by `quick-xml`.
#[derive(Debug, Default, Clone, Copy)]
pub struct QuickXmlEngine;

impl XmlEngine for QuickXmlEngine {
    fn parse(&self, data: &[u8], encoding: ParseEncoding) -> Result<XmlTree, ParseError> {
        trace!("parsing {} bytes as {:?}", data.len(), encoding);
        match encoding {
            ParseEncoding::Utf8 => {
                let text = std::str::from_utf8(data).map_err(|e| {
                    ParseError::new(e.valid_up_to() as u64, format!("invalid UTF-8: {e}"))
                })?;
                parse_document_text(text)
            }
            ParseEncoding::Raw => {
                let widened: String = data.iter().map(|&b| char::from(b)).collect();
                parse_document_text(&widened)
            }
        }
    }

    fn render(&self, tree: &XmlTree, indent: bool) -> Result<String, XmlError> {
        let mut writer = if indent {
            Writer::new_with_indent(Vec::new(), b' ', 2)
        } else {
            Writer::new(Vec::new())
        };

        if let Some(declaration) = &tree.declaration {
            let event = BytesDecl::new(
                declaration.version.as_str(),
                declaration.encoding.as_deref(),
                declaration.standalone.as_deref(),
            );
            writer
                .write_event(Event::Decl(event))
                .map_err(|e| XmlError::XmlOutputError {
                    message: e.to_string(),
                })?;
        }
        write_element(&mut writer, &tree.root)?;

        String::from_utf8(writer.into_inner()).map_err(|e| XmlError::XmlOutputError {
            message: e.to_string(),
        })
    }
}

fn parse_document_text(text: &str) -> Result<XmlTree, ParseError> {
    // A BOM that survived charset conversion decodes to U+FEFF.
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut declaration: Option<XmlDeclaration> = None;
    let mut root: Option<XmlElement> = None;
    let mut stack: Vec<XmlElement> = Vec::new();

    loop {
        let offset = reader.buffer_position() as u64;
        match reader.read_event() {
            Ok(Event::Decl(decl)) => {
                if declaration.is_some() || root.is_some() || !stack.is_empty() {
                    return Err(ParseError::new(
                        offset,
                        "XML declaration is only allowed at the start of the document",
                    ));
                }
                declaration = Some(declaration_from_event(&decl));
            }
            Ok(Event::Start(start)) => {
                if stack.is_empty() && root.is_some() {
                    return Err(ParseError::new(offset, "multiple root elements"));
                }
                stack.push(element_from_start(&start, offset)?);
            }
            Ok(Event::Empty(start)) => {
                if stack.is_empty() && root.is_some() {
                    return Err(ParseError::new(offset, "multiple root elements"));
                }
                let element = element_from_start(&start, offset)?;
                attach(element, &mut stack, &mut root);
            }
            Ok(Event::End(end)) => {
                let Some(element) = stack.pop() else {
                    return Err(ParseError::new(
                        offset,
                        "close tag without a matching open tag",
                    ));
                };
                let name = text_from_bytes(end.name().as_ref(), offset)?;
                if name != element.name {
                    return Err(ParseError::new(
                        offset,
                        format!(
                            "mismatched close tag: expected </{}>, found </{}>",
                            element.name, name
                        ),
                    ));
                }
                attach(element, &mut stack, &mut root);
            }
            Ok(Event::Text(text)) => {
                let value = text
                    .unescape()
                    .map_err(|e| ParseError::new(offset, e.to_string()))?;
                if value.is_empty() {
                    continue;
                }
                match stack.last_mut() {
                    Some(parent) => parent.children.push(XmlNode::Text(value.into_owned())),
                    None => {
                        return Err(ParseError::new(
                            offset,
                            "character data outside of the document element",
                        ));
                    }
                }
            }
            Ok(Event::CData(cdata)) => {
                let value = text_from_bytes(&cdata.into_inner(), offset)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(XmlNode::CData(value)),
                    None => {
                        return Err(ParseError::new(
                            offset,
                            "character data outside of the document element",
                        ));
                    }
                }
            }
            Ok(Event::Comment(comment)) => {
                // Prolog and epilog comments are accepted and dropped.
                if let Some(parent) = stack.last_mut() {
                    let value = text_from_bytes(comment.as_ref(), offset)?;
                    parent.children.push(XmlNode::Comment(value));
                }
            }
            Ok(Event::PI(pi)) => {
                if let Some(parent) = stack.last_mut() {
                    let mut value = text_from_bytes(pi.target(), offset)?;
                    value.push_str(&text_from_bytes(pi.content(), offset)?);
                    parent.children.push(XmlNode::ProcessingInstruction(value));
                }
            }
            Ok(Event::DocType(_)) => {
                if root.is_some() || !stack.is_empty() {
                    return Err(ParseError::new(offset, "unexpected DOCTYPE"));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ParseError::new(
                    reader.buffer_position() as u64,
                    e.to_string(),
                ));
            }
        }
    }

    let offset = reader.buffer_position() as u64;
    if let Some(open) = stack.last() {
        return Err(ParseError::new(
            offset,
            format!("unexpected end of document: <{}> is never closed", open.name),
        ));
    }
    match root {
        Some(root) => Ok(XmlTree { declaration, root }),
        None => Err(ParseError::new(offset, "document contains no root element")),
    }
}

fn attach(element: XmlElement, stack: &mut Vec<XmlElement>, root: &mut Option<XmlElement>) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(XmlNode::Element(element)),
        None => *root = Some(element),
    }
}

fn element_from_start(start: &BytesStart<'_>, offset: u64) -> Result<XmlElement, ParseError> {
    let mut element = XmlElement::new(text_from_bytes(start.name().as_ref(), offset)?);
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|e| ParseError::new(offset, e.to_string()))?;
        let name = text_from_bytes(attribute.key.as_ref(), offset)?;
        let value = attribute
            .unescape_value()
            .map_err(|e| ParseError::new(offset, e.to_string()))?
            .into_owned();
        element.attributes.push(XmlAttribute { name, value });
    }
    Ok(element)
}

fn declaration_from_event(decl: &BytesDecl<'_>) -> XmlDeclaration {
    let version = decl
        .version()
        .ok()
        .map(|v| String::from_utf8_lossy(&v).into_owned())
        .unwrap_or_else(|| "1.0".to_owned());
    let encoding = decl
        .encoding()
        .and_then(|r| r.ok())
        .map(|v| String::from_utf8_lossy(&v).into_owned());
    let standalone = decl
        .standalone()
        .and_then(|r| r.ok())
        .map(|v| String::from_utf8_lossy(&v).into_owned());
    XmlDeclaration {
        version,
        encoding,
        standalone,
    }
}

fn text_from_bytes(bytes: &[u8], offset: u64) -> Result<String, ParseError> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|e| ParseError::new(offset, format!("invalid UTF-8: {e}")))
}

fn write_element<W: Write>(writer: &mut Writer<W>, element: &XmlElement) -> Result<(), XmlError> {
    let xml_output = |e: std::io::Error| XmlError::XmlOutputError {
        message: e.to_string(),
    };

    let mut start = BytesStart::new(element.name.as_str());
    for attribute in &element.attributes {
        start.push_attribute((attribute.name.as_str(), attribute.value.as_str()));
    }

    if element.children.is_empty() {
        return writer.write_event(Event::Empty(start)).map_err(xml_output);
    }

    writer.write_event(Event::Start(start)).map_err(xml_output)?;
    for child in &element.children {
        match child {
            XmlNode::Element(child) => write_element(writer, child)?,
            XmlNode::Text(value) => writer
                .write_event(Event::Text(BytesText::new(value)))
                .map_err(xml_output)?,
            XmlNode::CData(value) => writer
                .write_event(Event::CData(BytesCData::new(value)))
                .map_err(xml_output)?,
            XmlNode::Comment(value) => writer
                .write_event(Event::Comment(BytesText::from_escaped(value.as_str())))
                .map_err(xml_output)?,
            XmlNode::ProcessingInstruction(value) => writer
                .write_event(Event::PI(BytesPI::new(value.as_str())))
                .map_err(xml_output)?,
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new(element.name.as_str())))
        .map_err(xml_output)
}
