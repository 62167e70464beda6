//! Generic XML element tree backed by `quick-xml`.
//!
//! XMLTV feeds carry many optional children (`desc`, `icon`, `rating`, ...)
//! that the repair engine never inspects, so documents are held as a plain
//! element tree and written back element by element.

use std::borrow::Cow;
use std::sync::LazyLock;

use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesCData, BytesEnd, BytesPI, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use regex::{Captures, Regex};

use crate::error::XmltvError;

/// Matches every `&` together with an optional well-formed reference after it.
#[allow(clippy::expect_used)]
static AMPERSAND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[0-9]+;|#x[0-9a-fA-F]+;|amp;|lt;|gt;|quot;|apos;)?")
        .expect("failed to compile ampersand regex")
});

/// A node in the element tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Child element.
    Element(Element),
    /// Character data with references already resolved.
    Text(String),
    /// `<![CDATA[...]]>` section.
    CData(String),
    /// `<!-- ... -->` comment.
    Comment(String),
    /// `<?target data?>` processing instruction, content without delimiters.
    ProcessingInstruction(String),
}

/// An XML element with ordered attributes and children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Tag name.
    pub name: String,
    /// Attributes in document order, values unescaped.
    pub attributes: Vec<(String, String)>,
    /// Child nodes in document order.
    pub children: Vec<Node>,
}

/// A parsed XML document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Content of the `<!DOCTYPE ...>` declaration, if any.
    pub doctype: Option<String>,
    /// Root element.
    pub root: Element,
}

impl Element {
    /// Creates an empty element.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Builder-style attribute setter.
    #[must_use]
    pub fn with_attr(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    /// Builder-style text child.
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    /// Builder-style element child.
    #[must_use]
    pub fn with_child(mut self, child: Self) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    /// Returns the value of the attribute named `key`.
    #[must_use]
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Replaces the attribute value, or appends it when missing.
    pub fn set_attr(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some(slot) = self.attributes.iter_mut().find(|(k, _)| k == key) {
            slot.1 = value;
        } else {
            self.attributes.push((String::from(key), value));
        }
    }

    /// Iterates over direct child elements.
    pub fn child_elements(&self) -> impl Iterator<Item = &Self> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(el) => Some(el),
            _ => None,
        })
    }

    /// Returns the first direct child element named `name`.
    #[must_use]
    pub fn first_child(&self, name: &str) -> Option<&Self> {
        self.child_elements().find(|el| el.name == name)
    }

    /// Concatenated text and CDATA content of direct children.
    #[must_use]
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(t) | Node::CData(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Parses a complete XML document into an element tree.
///
/// Whitespace-only text is discarded. Predefined entities and character
/// references are resolved. Processing instructions inside the root are kept.
///
/// # Errors
///
/// Returns `XmltvError::Parse` if the input is not well-formed, references
/// an undefined entity, or has no single root element.
pub fn parse_document(xml: &str) -> Result<Document, XmltvError> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;
    let mut doctype: Option<String> = None;
    let mut text = String::new();

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => {
                return Err(XmltvError::Parse(format!(
                    "{e} (near byte {})",
                    reader.buffer_position()
                )));
            }
        };

        match event {
            Event::Start(e) => {
                flush_text(&mut stack, &mut text);
                stack.push(open_element(&e)?);
            }
            Event::Empty(e) => {
                flush_text(&mut stack, &mut text);
                let element = open_element(&e)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                flush_text(&mut stack, &mut text);
                let element = stack
                    .pop()
                    .ok_or_else(|| XmltvError::Parse(String::from("unbalanced end tag")))?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(e) => {
                if !stack.is_empty() {
                    text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Event::GeneralRef(e) => {
                if !stack.is_empty() {
                    let name = String::from_utf8_lossy(&e);
                    if !push_reference(&mut text, &name) {
                        return Err(XmltvError::Parse(format!(
                            "undefined entity &{name}; (near byte {})",
                            reader.buffer_position()
                        )));
                    }
                }
            }
            Event::CData(e) => {
                flush_text(&mut stack, &mut text);
                if let Some(parent) = stack.last_mut() {
                    parent
                        .children
                        .push(Node::CData(String::from_utf8_lossy(&e).into_owned()));
                }
            }
            Event::Comment(e) => {
                flush_text(&mut stack, &mut text);
                if let Some(parent) = stack.last_mut() {
                    parent
                        .children
                        .push(Node::Comment(String::from_utf8_lossy(&e).into_owned()));
                }
            }
            Event::PI(e) => {
                flush_text(&mut stack, &mut text);
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(Node::ProcessingInstruction(
                        String::from_utf8_lossy(&e).into_owned(),
                    ));
                } else {
                    tracing::debug!("Processing instruction outside the root dropped");
                }
            }
            Event::DocType(e) => {
                doctype = Some(String::from_utf8_lossy(&e).trim().to_owned());
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(XmltvError::Parse(format!(
            "unexpected end of input inside <{}>",
            open.name
        )));
    }

    let root = root.ok_or_else(|| XmltvError::Parse(String::from("document has no root element")))?;
    Ok(Document { doctype, root })
}

/// Builds an element (without children) from a start tag.
fn open_element(start: &BytesStart<'_>) -> Result<Element, XmltvError> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut element = Element::new(name);
    for attr in start.attributes() {
        let attr = attr.map_err(|e| XmltvError::Parse(format!("<{}>: {e}", element.name)))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| XmltvError::Parse(format!("<{}> attribute {key}: {e}", element.name)))?;
        element.attributes.push((key, value.into_owned()));
    }
    Ok(element)
}

/// Appends a finished element to its parent, or installs it as root.
fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), XmltvError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(Node::Element(element));
        return Ok(());
    }
    if root.is_some() {
        return Err(XmltvError::Parse(format!(
            "multiple root elements (second: <{}>)",
            element.name
        )));
    }
    *root = Some(element);
    Ok(())
}

/// Moves pending character data into the current element.
fn flush_text(stack: &mut [Element], text: &mut String) {
    if text.trim().is_empty() {
        text.clear();
        return;
    }
    if let Some(parent) = stack.last_mut() {
        parent.children.push(Node::Text(std::mem::take(text)));
    } else {
        text.clear();
    }
}

/// Resolves `&name;` into `text`. Only character references and the five
/// predefined entities are defined; returns false for anything else.
#[must_use]
fn push_reference(text: &mut String, name: &str) -> bool {
    if let Some(ch) = resolve_char_reference(name) {
        text.push(ch);
    } else if let Some(value) = resolve_predefined_entity(name) {
        text.push_str(value);
    } else {
        return false;
    }
    true
}

/// Resolves `#123` / `#x7B` character references.
fn resolve_char_reference(name: &str) -> Option<char> {
    let digits = name.strip_prefix('#')?;
    let code = if let Some(hex) = digits.strip_prefix('x').or_else(|| digits.strip_prefix('X')) {
        u32::from_str_radix(hex, 16).ok()?
    } else {
        digits.parse::<u32>().ok()?
    };
    char::from_u32(code)
}

/// Serializes a document with an XML declaration and two-space indentation.
///
/// # Errors
///
/// Returns `XmltvError::Serialize` if writing fails.
pub fn write_document(doc: &Document) -> Result<String, XmltvError> {
    let mut head = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    if let Some(ref doctype) = doc.doctype {
        head.push_str("<!DOCTYPE ");
        head.push_str(doctype);
        head.push_str(">\n");
    }

    let mut writer = Writer::new_with_indent(head.into_bytes(), b' ', 2);
    write_element(&mut writer, &doc.root)?;

    let mut out = writer.into_inner();
    out.push(b'\n');
    String::from_utf8(out).map_err(|e| XmltvError::Serialize(e.to_string()))
}

/// Writes one element and its subtree.
fn write_element(writer: &mut Writer<Vec<u8>>, element: &Element) -> Result<(), XmltvError> {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if element.children.is_empty() {
        return emit(writer, Event::Empty(start));
    }

    emit(writer, Event::Start(start))?;
    for child in &element.children {
        match child {
            Node::Element(el) => write_element(writer, el)?,
            Node::Text(t) => emit(writer, Event::Text(BytesText::new(t)))?,
            Node::CData(t) => emit(writer, Event::CData(BytesCData::new(t.as_str())))?,
            Node::Comment(t) => emit(writer, Event::Comment(BytesText::from_escaped(t.as_str())))?,
            Node::ProcessingInstruction(t) => emit(writer, Event::PI(BytesPI::new(t.as_str())))?,
        }
    }
    emit(writer, Event::End(BytesEnd::new(element.name.as_str())))
}

/// Writes a single event, mapping the writer error.
fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), XmltvError> {
    writer
        .write_event(event)
        .map_err(|e| XmltvError::Serialize(e.to_string()))
}

/// Escapes `&` characters that do not start a predefined entity or a
/// character reference. Returns the repaired text and the number of fixes.
///
/// Several upstream feeds embed raw URLs (`?a=1&b=2`) in descriptions,
/// which makes the whole document unparsable.
#[must_use]
pub fn escape_bare_ampersands(xml: &str) -> (String, usize) {
    let mut fixed: usize = 0;
    let repaired = AMPERSAND_RE.replace_all(xml, |caps: &Captures<'_>| {
        if caps.get(1).is_some() {
            Cow::Owned(caps[0].to_owned())
        } else {
            fixed = fixed.saturating_add(1);
            Cow::Borrowed("&amp;")
        }
    });
    (repaired.into_owned(), fixed)
}
