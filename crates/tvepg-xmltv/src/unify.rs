//! Concatenation of several XMLTV documents under one `<tv>` root.

use serde::Serialize;
use tracing::instrument;

use crate::model::{CHANNEL_TAG, PROGRAMME_TAG, XmltvDocument};
use crate::xml::Node;

/// Value of `source-info-name` on merged documents.
pub const MULTIPLE_SOURCES: &str = "multiple-sources";

/// Generator attributes stamped on the merged root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorInfo {
    /// `generator-info-name` attribute.
    pub name: String,
    /// `generator-info-url` attribute.
    pub url: String,
}

impl Default for GeneratorInfo {
    fn default() -> Self {
        Self {
            name: String::from(env!("CARGO_PKG_NAME")),
            url: String::from(env!("CARGO_PKG_REPOSITORY")),
        }
    }
}

/// Counts of a merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    /// Documents merged.
    pub sources: usize,
    /// `<channel>` elements in the result.
    pub channels: usize,
    /// `<programme>` elements in the result.
    pub programmes: usize,
}

/// Appends every root child of every input, in input order, under a fresh
/// `<tv>` root. Channel ids are not deduplicated.
#[must_use]
#[instrument(skip_all, fields(sources = docs.len()))]
pub fn merge_documents(
    docs: Vec<XmltvDocument>,
    generator: &GeneratorInfo,
) -> (XmltvDocument, MergeSummary) {
    let mut merged = XmltvDocument::empty(vec![
        (String::from("generator-info-name"), generator.name.clone()),
        (String::from("generator-info-url"), generator.url.clone()),
        (
            String::from("source-info-name"),
            String::from(MULTIPLE_SOURCES),
        ),
    ]);
    let mut summary = MergeSummary {
        sources: docs.len(),
        ..MergeSummary::default()
    };

    for mut doc in docs {
        let children = std::mem::take(&mut doc.root_mut().children);
        for node in children {
            if let Node::Element(ref el) = node {
                if el.name == CHANNEL_TAG {
                    summary.channels = summary.channels.saturating_add(1);
                } else if el.name == PROGRAMME_TAG {
                    summary.programmes = summary.programmes.saturating_add(1);
                }
            }
            merged.root_mut().children.push(node);
        }
    }

    tracing::info!(
        sources = summary.sources,
        channels = summary.channels,
        programmes = summary.programmes,
        "Merged XMLTV sources"
    );
    (merged, summary)
}
