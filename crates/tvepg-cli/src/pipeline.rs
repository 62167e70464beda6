//! Feed loading, output writing and the multi-source `fetch` run.

use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use tracing::instrument;
use tvepg_fetch::{LocalEpgFetch, read_local};
use tvepg_xmltv::xml::escape_bare_ampersands;
use tvepg_xmltv::{
    ChannelStats, RepairError, RepairOptions, RepairReport, XmltvDocument, repair_document,
};
use url::Url;

use crate::config::SourceConfig;

/// Where a feed is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// HTTP(S) URL.
    Remote(Url),
    /// File on disk (plain or gzip).
    Local(PathBuf),
}

impl Input {
    /// Treats `http://` and `https://` values as URLs, anything else as a path.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let lower = value.to_ascii_lowercase();
        if (lower.starts_with("http://") || lower.starts_with("https://"))
            && let Ok(url) = Url::parse(value)
        {
            return Self::Remote(url);
        }
        Self::Local(PathBuf::from(value))
    }

    /// Whether reading this input hits the network.
    #[must_use]
    pub const fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

impl fmt::Display for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(url) => write!(f, "{url}"),
            Self::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Reads the decoded text of a feed.
///
/// # Errors
///
/// Returns an error if the download, file read or decoding fails.
pub async fn load_text(fetcher: &(impl LocalEpgFetch + Sync), input: &Input) -> Result<String> {
    match input {
        Input::Remote(url) => fetcher.fetch(url).await,
        Input::Local(path) => read_local(path),
    }
}

/// Parses feed text, optionally escaping bare `&` characters first.
///
/// # Errors
///
/// Returns an error if the text is not an XMLTV document.
pub fn parse_feed(text: &str, escape_ampersands: bool, label: &str) -> Result<XmltvDocument> {
    let doc = if escape_ampersands {
        let (fixed, count) = escape_bare_ampersands(text);
        if count > 0 {
            tracing::info!(source = label, count, "Escaped bare ampersands");
        }
        XmltvDocument::parse(&fixed)
    } else {
        XmltvDocument::parse(text)
    }
    .with_context(|| format!("failed to parse {label}"))?;

    tracing::info!(
        source = label,
        channels = doc.channel_count(),
        programmes = doc.programme_count(),
        "Loaded XMLTV document"
    );
    Ok(doc)
}

/// Loads and parses a feed.
///
/// # Errors
///
/// Returns an error if loading or parsing fails.
#[instrument(skip_all, fields(input = %input))]
pub async fn load_document(
    fetcher: &(impl LocalEpgFetch + Sync),
    input: &Input,
    escape_ampersands: bool,
) -> Result<XmltvDocument> {
    let text = load_text(fetcher, input)
        .await
        .with_context(|| format!("failed to load {input}"))?;
    parse_feed(&text, escape_ampersands, &input.to_string())
}

/// Whether `path` names a gzip file (`.gz`, any case).
#[must_use]
pub fn is_gzip_path(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
}

/// Serializes a document to `path`, creating parent directories if needed.
/// A `.gz` path is written gzip-compressed.
///
/// # Errors
///
/// Returns an error if serialization or the write fails.
pub fn write_document(doc: &XmltvDocument, path: &Path) -> Result<()> {
    let xml = doc
        .to_xml_string()
        .with_context(|| format!("failed to serialize {}", path.display()))?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    let compressed = is_gzip_path(path);
    if compressed {
        let file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder
            .write_all(xml.as_bytes())
            .with_context(|| format!("failed to write {}", path.display()))?;
        encoder
            .finish()
            .with_context(|| format!("failed to finish {}", path.display()))?;
    } else {
        std::fs::write(path, xml).with_context(|| format!("failed to write {}", path.display()))?;
    }

    tracing::info!(
        path = %path.display(),
        compressed,
        channels = doc.channel_count(),
        programmes = doc.programme_count(),
        "Wrote XMLTV document"
    );
    Ok(())
}

/// Repair counters plus per-channel coverage of the written document.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentReport {
    /// Repair counters.
    #[serde(flatten)]
    pub report: RepairReport,
    /// Per-channel programme counts and time coverage.
    pub channels: Vec<ChannelStats>,
}

/// Logs the per-channel table at debug level.
pub fn log_channel_stats(label: &str, stats: &[ChannelStats]) {
    for channel in stats {
        tracing::debug!(
            source = label,
            channel = %channel.id,
            name = %channel.name,
            programmes = channel.programmes,
            first_start = channel.first_start.as_deref().unwrap_or("-"),
            last_stop = channel.last_stop.as_deref().unwrap_or("-"),
            "Channel coverage"
        );
    }
}

/// Result of one source in a `fetch` run.
#[derive(Debug, Clone, Serialize)]
pub struct SourceOutcome {
    /// Source name.
    pub name: String,
    /// Whether the output was written.
    pub succeeded: bool,
    /// Error chain, when the source failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Repair counters, when repair ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<RepairReport>,
    /// Programmes written.
    pub programmes: usize,
    /// Per-channel coverage of the written document.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<ChannelStats>,
}

/// Aggregated result of a `fetch` run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Sources attempted.
    pub total: usize,
    /// Sources whose output was written.
    pub succeeded: usize,
    /// Repair counters summed over all sources.
    pub report: RepairReport,
    /// Per-source outcomes in configuration order.
    pub sources: Vec<SourceOutcome>,
}

impl RunSummary {
    /// True when sources were attempted and none succeeded.
    #[must_use]
    pub const fn all_failed(&self) -> bool {
        self.total > 0 && self.succeeded == 0
    }
}

/// Processes sources one after another. A failing source is logged and
/// recorded; the others still run. `delay` is slept between two remote
/// sources.
#[instrument(skip_all, fields(sources = sources.len()))]
pub async fn run_sources(
    fetcher: &(impl LocalEpgFetch + Sync),
    sources: &[SourceConfig],
    options: &RepairOptions,
    delay: Duration,
) -> RunSummary {
    let mut summary = RunSummary {
        total: sources.len(),
        ..RunSummary::default()
    };
    let mut remote_done = false;

    for source in sources {
        let is_remote = source.input().is_ok_and(|i| i.is_remote());
        if is_remote && remote_done && !delay.is_zero() {
            tracing::debug!(?delay, "Waiting before next remote source");
            tokio::time::sleep(delay).await;
        }
        remote_done |= is_remote;

        let outcome = match process_source(fetcher, source, options).await {
            Ok((report, channels)) => {
                let programmes = channels.iter().map(|c| c.programmes).sum();
                tracing::info!(
                    source = %source.name,
                    programmes,
                    channels = channels.len(),
                    "Source processed"
                );
                summary.succeeded = summary.succeeded.saturating_add(1);
                SourceOutcome {
                    name: source.name.clone(),
                    succeeded: true,
                    error: None,
                    report,
                    programmes,
                    channels,
                }
            }
            Err(e) => {
                let error = format!("{e:#}");
                tracing::warn!(source = %source.name, %error, "Source failed");
                let report = e.downcast_ref::<RepairError>().map(|err| match err {
                    RepairError::EmptyResult(report) => *report,
                });
                SourceOutcome {
                    name: source.name.clone(),
                    succeeded: false,
                    error: Some(error),
                    report,
                    programmes: 0,
                    channels: Vec::new(),
                }
            }
        };
        if let Some(report) = outcome.report {
            summary.report += report;
        }
        summary.sources.push(outcome);
    }

    tracing::info!(
        input = summary.report.input_programmes,
        invalid = summary.report.invalid_timestamps,
        rollover_fixes = summary.report.rollover_fixes,
        end_of_day_fixes = summary.report.end_of_day_fixes,
        merges = summary.report.merges,
        output = summary.report.output_programmes,
        "{}/{} sources succeeded",
        summary.succeeded,
        summary.total
    );
    summary
}

/// Loads, repairs and writes one source.
async fn process_source(
    fetcher: &(impl LocalEpgFetch + Sync),
    source: &SourceConfig,
    options: &RepairOptions,
) -> Result<(Option<RepairReport>, Vec<ChannelStats>)> {
    let input = source.input()?;
    let mut doc = load_document(fetcher, &input, source.escape_ampersands).await?;

    let report = if source.repair {
        Some(
            repair_document(&mut doc, options)
                .with_context(|| format!("repair of {} failed", source.name))?,
        )
    } else {
        None
    };

    write_document(&doc, &source.output)?;
    let channels = doc.channel_stats();
    log_channel_stats(&source.name, &channels);
    Ok((report, channels))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::indexing_slicing)]

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    use tvepg_fetch::{GZIP_MAGIC, decode_body};

    use super::*;

    /// Mock fetcher serving canned bodies by URL.
    struct MockFetcher {
        bodies: HashMap<String, String>,
        calls: AtomicU32,
    }

    impl MockFetcher {
        fn new(bodies: &[(&str, &str)]) -> Self {
            Self {
                bodies: bodies
                    .iter()
                    .map(|(url, body)| (String::from(*url), String::from(*body)))
                    .collect(),
                calls: AtomicU32::new(0),
            }
        }
    }

    impl LocalEpgFetch for MockFetcher {
        async fn fetch(&self, url: &Url) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.bodies
                .get(url.as_str())
                .cloned()
                .with_context(|| format!("{url} returned HTTP 404 Not Found"))
        }
    }

    const SPLIT_FEED: &str = r#"<tv>
  <channel id="C1"><display-name>One</display-name></channel>
  <programme start="20240101235000 +0800" stop="20240102000000 +0800" channel="C1"><title>News</title></programme>
  <programme start="20240102000000 +0800" stop="20240102003000 +0800" channel="C1"><title>News</title></programme>
</tv>"#;

    const INVALID_FEED: &str = r#"<tv>
  <programme start="bad" stop="bad" channel="C1"><title>X</title></programme>
</tv>"#;

    fn remote(name: &str, url: &str, output: &Path) -> SourceConfig {
        SourceConfig {
            name: String::from(name),
            url: Some(String::from(url)),
            path: None,
            output: output.to_path_buf(),
            repair: true,
            escape_ampersands: false,
        }
    }

    fn local(name: &str, path: &Path, output: &Path) -> SourceConfig {
        SourceConfig {
            name: String::from(name),
            url: None,
            path: Some(path.to_path_buf()),
            output: output.to_path_buf(),
            repair: true,
            escape_ampersands: false,
        }
    }

    #[test]
    fn test_input_parse() {
        // Arrange & Act & Assert
        assert!(Input::parse("https://example.com/epg.xml").is_remote());
        assert!(Input::parse("HTTP://example.com/epg.xml").is_remote());
        assert_eq!(
            Input::parse("feeds/epg.xml.gz"),
            Input::Local(PathBuf::from("feeds/epg.xml.gz"))
        );
        assert!(!Input::parse("ftp://example.com/epg.xml").is_remote());
    }

    #[test]
    fn test_parse_feed_escapes_when_asked() {
        // Arrange
        let text = r#"<tv><programme start="20240101100000" stop="20240101110000" channel="C1"><title>A & B</title></programme></tv>"#;

        // Act
        let strict = parse_feed(text, false, "test");
        let lenient = parse_feed(text, true, "test").unwrap();

        // Assert
        assert!(strict.is_err());
        assert_eq!(lenient.programmes()[0].title.as_deref(), Some("A & B"));
    }

    #[test]
    fn test_write_document_creates_parent() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("epg.xml");
        let doc = XmltvDocument::parse(SPLIT_FEED).unwrap();

        // Act
        write_document(&doc, &path).unwrap();

        // Assert
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("<?xml"));
        assert_eq!(XmltvDocument::parse(&written).unwrap(), doc);
    }

    #[test]
    fn test_write_document_gzips_gz_path() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("epg.xml.gz");
        let doc = XmltvDocument::parse(SPLIT_FEED).unwrap();

        // Act
        write_document(&doc, &path).unwrap();

        // Assert
        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(&GZIP_MAGIC));
        let text = decode_body(&bytes).unwrap();
        assert_eq!(XmltvDocument::parse(&text).unwrap(), doc);
    }

    #[test]
    fn test_is_gzip_path() {
        // Arrange & Act & Assert
        assert!(is_gzip_path(Path::new("out/epg.xml.gz")));
        assert!(is_gzip_path(Path::new("EPG.XML.GZ")));
        assert!(!is_gzip_path(Path::new("out/epg.xml")));
        assert!(!is_gzip_path(Path::new("out/gz")));
    }

    #[test]
    fn test_document_report_flattens_counters() {
        // Arrange
        let mut doc = XmltvDocument::parse(SPLIT_FEED).unwrap();
        let report = repair_document(&mut doc, &RepairOptions::default()).unwrap();

        // Act
        let json = serde_json::to_value(DocumentReport {
            report,
            channels: doc.channel_stats(),
        })
        .unwrap();

        // Assert
        assert_eq!(json["merges"], 1);
        assert_eq!(json["channels"][0]["id"], "C1");
        assert_eq!(json["channels"][0]["name"], "One");
        assert_eq!(json["channels"][0]["programmes"], 1);
        assert_eq!(json["channels"][0]["first_start"], "20240101235000 +0800");
        assert_eq!(json["channels"][0]["last_stop"], "20240102003000 +0800");
    }

    #[tokio::test]
    async fn test_run_sources_isolates_failures() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let invalid_path = dir.path().join("invalid.xml");
        std::fs::write(&invalid_path, INVALID_FEED).unwrap();
        let fetcher = MockFetcher::new(&[("https://example.com/ok.xml", SPLIT_FEED)]);
        let sources = vec![
            remote("ok", "https://example.com/ok.xml", &dir.path().join("ok.xml")),
            remote(
                "missing",
                "https://example.com/missing.xml",
                &dir.path().join("missing.xml"),
            ),
            local("invalid", &invalid_path, &dir.path().join("invalid-out.xml")),
        ];

        // Act
        let summary = run_sources(
            &fetcher,
            &sources,
            &RepairOptions::default(),
            Duration::ZERO,
        )
        .await;

        // Assert
        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 1);
        assert!(!summary.all_failed());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);

        assert!(summary.sources[0].succeeded);
        assert_eq!(summary.sources[0].programmes, 1);
        assert_eq!(summary.sources[0].channels.len(), 1);
        assert_eq!(summary.sources[0].channels[0].programmes, 1);
        assert!(summary.sources[1].channels.is_empty());
        assert!(dir.path().join("ok.xml").exists());

        assert!(!summary.sources[1].succeeded);
        assert!(summary.sources[1].error.as_deref().unwrap().contains("404"));
        assert!(!dir.path().join("missing.xml").exists());

        assert!(!summary.sources[2].succeeded);
        assert_eq!(summary.sources[2].report.unwrap().invalid_timestamps, 1);
        assert!(!dir.path().join("invalid-out.xml").exists());

        assert_eq!(summary.report.merges, 1);
        assert_eq!(summary.report.invalid_timestamps, 1);
        assert_eq!(summary.report.input_programmes, 3);
    }

    #[tokio::test]
    async fn test_run_sources_without_repair_keeps_programmes() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let feed = dir.path().join("feed.xml");
        std::fs::write(&feed, SPLIT_FEED).unwrap();
        let mut source = local("raw", &feed, &dir.path().join("raw.xml"));
        source.repair = false;
        let fetcher = MockFetcher::new(&[]);

        // Act
        let summary = run_sources(
            &fetcher,
            &[source],
            &RepairOptions::default(),
            Duration::ZERO,
        )
        .await;

        // Assert
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.sources[0].programmes, 2);
        assert!(summary.sources[0].report.is_none());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_sources_all_failed() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MockFetcher::new(&[]);
        let sources = vec![remote(
            "gone",
            "https://example.com/gone.xml",
            &dir.path().join("gone.xml"),
        )];

        // Act
        let summary = run_sources(
            &fetcher,
            &sources,
            &RepairOptions::default(),
            Duration::ZERO,
        )
        .await;

        // Assert
        assert!(summary.all_failed());
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["succeeded"], 0);
        assert_eq!(json["sources"][0]["name"], "gone");
    }

    #[tokio::test]
    async fn test_run_sources_waits_between_remote_sources() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MockFetcher::new(&[
            ("https://example.com/a.xml", SPLIT_FEED),
            ("https://example.com/b.xml", SPLIT_FEED),
        ]);
        let sources = vec![
            remote("a", "https://example.com/a.xml", &dir.path().join("a.xml")),
            remote("b", "https://example.com/b.xml", &dir.path().join("b.xml")),
        ];

        // Act
        let start = std::time::Instant::now();
        let summary = run_sources(
            &fetcher,
            &sources,
            &RepairOptions::default(),
            Duration::from_millis(50),
        )
        .await;

        // Assert
        assert_eq!(summary.succeeded, 2);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
