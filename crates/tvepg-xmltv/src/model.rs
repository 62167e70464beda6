//! XMLTV view over the element tree.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Serialize;

use crate::error::XmltvError;
use crate::timestamp::parse_timestamp;
use crate::xml::{Document, Element, Node, parse_document, write_document};

/// Root element name of an XMLTV document.
pub const TV_TAG: &str = "tv";
/// Channel element name.
pub const CHANNEL_TAG: &str = "channel";
/// Programme element name.
pub const PROGRAMME_TAG: &str = "programme";

/// A `<channel>` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    /// Channel identifier (`id` attribute).
    pub id: String,
    /// `display-name` texts in document order; the first is preferred.
    pub display_names: Vec<String>,
}

/// Snapshot of the fields of a `<programme>` entry the repair engine reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Programme {
    /// Referenced channel identifier (`channel` attribute).
    pub channel: String,
    /// `start` attribute, empty when missing.
    pub start: String,
    /// `stop` attribute, empty when missing.
    pub stop: String,
    /// First `title` child text.
    pub title: Option<String>,
    /// First `sub-title` child text.
    pub sub_title: Option<String>,
}

impl Channel {
    /// Reads a channel from a `<channel>` element.
    #[must_use]
    pub fn from_element(element: &Element) -> Self {
        Self {
            id: element.attr("id").unwrap_or_default().to_owned(),
            display_names: element
                .child_elements()
                .filter(|el| el.name == "display-name")
                .map(Element::text)
                .collect(),
        }
    }
}

impl Programme {
    /// Reads a programme from a `<programme>` element.
    #[must_use]
    pub fn from_element(element: &Element) -> Self {
        Self {
            channel: element.attr("channel").unwrap_or_default().to_owned(),
            start: element.attr("start").unwrap_or_default().to_owned(),
            stop: element.attr("stop").unwrap_or_default().to_owned(),
            title: element.first_child("title").map(Element::text),
            sub_title: element.first_child("sub-title").map(Element::text),
        }
    }
}

/// Channel id to preferred display name lookup, for log output.
#[derive(Debug, Clone, Default)]
pub struct ChannelDirectory {
    names: HashMap<String, String>,
}

impl ChannelDirectory {
    /// Builds the lookup from channel entries. The first entry per id wins.
    #[must_use]
    pub fn from_channels(channels: &[Channel]) -> Self {
        let mut names = HashMap::with_capacity(channels.len());
        for channel in channels {
            if let Some(name) = channel.display_names.first() {
                names
                    .entry(channel.id.clone())
                    .or_insert_with(|| name.clone());
            }
        }
        Self { names }
    }

    /// Preferred display name, falling back to the id itself.
    #[must_use]
    pub fn name_of<'a>(&'a self, id: &'a str) -> &'a str {
        self.names.get(id).map_or(id, String::as_str)
    }
}

/// Programme coverage of one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    /// Channel identifier.
    pub id: String,
    /// Preferred display name, or the id when the channel has none.
    pub name: String,
    /// Programmes referencing the channel.
    pub programmes: usize,
    /// Earliest parsable `start` value.
    pub first_start: Option<String>,
    /// Latest parsable `stop` value.
    pub last_stop: Option<String>,
}

impl ChannelStats {
    fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_owned(),
            name: name.to_owned(),
            programmes: 0,
            first_start: None,
            last_stop: None,
        }
    }

    fn record(&mut self, programme: &Programme) {
        self.programmes = self.programmes.saturating_add(1);
        if extends(self.first_start.as_deref(), &programme.start, Ordering::Less) {
            self.first_start = Some(programme.start.clone());
        }
        if extends(self.last_stop.as_deref(), &programme.stop, Ordering::Greater) {
            self.last_stop = Some(programme.stop.clone());
        }
    }
}

/// True when `candidate` parses and sorts `direction` of `current`
/// (or `current` is unset or unparsable).
fn extends(current: Option<&str>, candidate: &str, direction: Ordering) -> bool {
    let Ok(candidate) = parse_timestamp(candidate) else {
        return false;
    };
    current
        .and_then(|value| parse_timestamp(value).ok())
        .is_none_or(|current| candidate.cmp_instant(&current) == direction)
}

/// An XML document whose root element is `<tv>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmltvDocument {
    document: Document,
}

impl XmltvDocument {
    /// Parses XMLTV text.
    ///
    /// # Errors
    ///
    /// Returns `XmltvError::Parse` for malformed XML and
    /// `XmltvError::UnexpectedRoot` when the root is not `<tv>`.
    pub fn parse(xml: &str) -> Result<Self, XmltvError> {
        Self::from_document(parse_document(xml)?)
    }

    /// Wraps an already parsed document.
    ///
    /// # Errors
    ///
    /// Returns `XmltvError::UnexpectedRoot` when the root is not `<tv>`.
    pub fn from_document(document: Document) -> Result<Self, XmltvError> {
        if document.root.name != TV_TAG {
            return Err(XmltvError::UnexpectedRoot(document.root.name));
        }
        Ok(Self { document })
    }

    /// Creates an empty `<tv>` document with the given root attributes.
    #[must_use]
    pub fn empty(attributes: Vec<(String, String)>) -> Self {
        let mut root = Element::new(TV_TAG);
        root.attributes = attributes;
        Self {
            document: Document {
                doctype: None,
                root,
            },
        }
    }

    /// Serializes the document.
    ///
    /// # Errors
    ///
    /// Returns `XmltvError::Serialize` if writing fails.
    pub fn to_xml_string(&self) -> Result<String, XmltvError> {
        write_document(&self.document)
    }

    /// The `<tv>` root element.
    #[must_use]
    pub const fn root(&self) -> &Element {
        &self.document.root
    }

    /// Mutable access to the `<tv>` root element.
    pub const fn root_mut(&mut self) -> &mut Element {
        &mut self.document.root
    }

    /// Doctype carried over from the source, if any.
    #[must_use]
    pub fn doctype(&self) -> Option<&str> {
        self.document.doctype.as_deref()
    }

    /// All `<channel>` entries in document order.
    #[must_use]
    pub fn channels(&self) -> Vec<Channel> {
        self.elements_named(CHANNEL_TAG)
            .map(Channel::from_element)
            .collect()
    }

    /// All `<programme>` entries in document order.
    #[must_use]
    pub fn programmes(&self) -> Vec<Programme> {
        self.elements_named(PROGRAMME_TAG)
            .map(Programme::from_element)
            .collect()
    }

    /// Number of `<channel>` elements.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.elements_named(CHANNEL_TAG).count()
    }

    /// Number of `<programme>` elements.
    #[must_use]
    pub fn programme_count(&self) -> usize {
        self.elements_named(PROGRAMME_TAG).count()
    }

    /// Channel display-name lookup for this document.
    #[must_use]
    pub fn channel_directory(&self) -> ChannelDirectory {
        ChannelDirectory::from_channels(&self.channels())
    }

    /// Per-channel programme counts and time coverage.
    ///
    /// Declared channels come first in document order, followed by channel
    /// ids that only appear on programmes, in order of first use.
    #[must_use]
    pub fn channel_stats(&self) -> Vec<ChannelStats> {
        let directory = self.channel_directory();
        let mut stats: Vec<ChannelStats> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for channel in self.channels() {
            index.entry(channel.id.clone()).or_insert_with(|| {
                let slot = stats.len();
                stats.push(ChannelStats::new(&channel.id, directory.name_of(&channel.id)));
                slot
            });
        }

        for programme in self.programmes() {
            let slot = *index.entry(programme.channel.clone()).or_insert_with(|| {
                let slot = stats.len();
                stats.push(ChannelStats::new(&programme.channel, &programme.channel));
                slot
            });
            if let Some(entry) = stats.get_mut(slot) {
                entry.record(&programme);
            }
        }
        stats
    }

    /// Iterates over `<programme>` elements mutably.
    pub fn programme_elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.document
            .root
            .children
            .iter_mut()
            .filter_map(|node| match node {
                Node::Element(el) if el.name == PROGRAMME_TAG => Some(el),
                _ => None,
            })
    }

    fn elements_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.document
            .root
            .child_elements()
            .filter(move |el| el.name == name)
    }
}
