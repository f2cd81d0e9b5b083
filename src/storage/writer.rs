use chrono::{DateTime, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::feed::{display_title, CanonicalItem};
use crate::util::sanitize_xml_text;

const DC_NAMESPACE: &str = "http://purl.org/dc/elements/1.1/";
const STATE_NAMESPACE: &str = "urn:x-paperfeed:state";
/// Channel-level marker for an expanded DBLP volume. Feed readers ignore
/// elements in unknown namespaces.
pub(super) const VOLUME_ELEMENT: &str = "pf:volume";

/// Fatal output failure. The previous output file is left untouched.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("failed to serialize feed: {0}")]
    Serialize(String),
    #[error("failed to write '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Channel-level metadata of the output feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub title: String,
    pub link: String,
    pub description: String,
    pub language: String,
    pub generator: String,
}

impl Default for ChannelInfo {
    fn default() -> Self {
        Self {
            title: "My Customized Papers".to_string(),
            link: "https://example.org/paperfeed".to_string(),
            description: "Aggregated research papers".to_string(),
            language: "en-US".to_string(),
            generator: concat!("paperfeed ", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Serializes `items` (already ordered) as an RSS 2.0 document.
///
/// `volumes` are written as channel-level [`VOLUME_ELEMENT`] markers so the
/// next run knows which DBLP volumes were already expanded. Every text field passes through [`sanitize_xml_text`], so the output is
/// well-formed XML 1.0 whatever the sources contained. Identical inputs and
/// `built_at` give byte-identical output.
pub fn render_rss(
    channel: &ChannelInfo,
    items: &[CanonicalItem],
    volumes: &[String],
    built_at: DateTime<Utc>,
) -> Result<String, WriteError> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    emit(&mut writer, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut rss = BytesStart::new("rss");
    rss.push_attribute(("version", "2.0"));
    rss.push_attribute(("xmlns:dc", DC_NAMESPACE));
    rss.push_attribute(("xmlns:pf", STATE_NAMESPACE));
    emit(&mut writer, Event::Start(rss))?;
    emit(&mut writer, Event::Start(BytesStart::new("channel")))?;

    text_element(&mut writer, "title", &channel.title)?;
    text_element(&mut writer, "link", &channel.link)?;
    text_element(&mut writer, "description", &channel.description)?;
    text_element(&mut writer, "language", &channel.language)?;
    text_element(&mut writer, "lastBuildDate", &built_at.to_rfc2822())?;
    text_element(&mut writer, "generator", &channel.generator)?;
    for volume in volumes {
        text_element(&mut writer, VOLUME_ELEMENT, volume)?;
    }

    for item in items {
        write_item(&mut writer, item)?;
    }

    emit(&mut writer, Event::End(BytesEnd::new("channel")))?;
    emit(&mut writer, Event::End(BytesEnd::new("rss")))?;

    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).map_err(|e| WriteError::Serialize(e.to_string()))
}

fn write_item(writer: &mut Writer<Cursor<Vec<u8>>>, item: &CanonicalItem) -> Result<(), WriteError> {
    emit(writer, Event::Start(BytesStart::new("item")))?;

    text_element(writer, "title", &display_title(item))?;
    text_element(writer, "link", &item.link)?;

    let mut guid = BytesStart::new("guid");
    guid.push_attribute(("isPermaLink", "false"));
    emit(writer, Event::Start(guid))?;
    emit(writer, Event::Text(BytesText::new(&sanitize_xml_text(item.identity()))))?;
    emit(writer, Event::End(BytesEnd::new("guid")))?;

    text_element(writer, "pubDate", &item.pub_date.to_rfc2822())?;
    text_element(writer, "description", &item.summary)?;

    if !item.source_url.is_empty() {
        let mut source = BytesStart::new("source");
        source.push_attribute(("url", sanitize_xml_text(&item.source_url).as_ref()));
        emit(writer, Event::Start(source))?;
        emit(writer, Event::Text(BytesText::new(&sanitize_xml_text(&item.source_title))))?;
        emit(writer, Event::End(BytesEnd::new("source")))?;
    }

    for author in &item.authors {
        text_element(writer, "dc:creator", author)?;
    }

    emit(writer, Event::End(BytesEnd::new("item")))
}

fn text_element(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    name: &str,
    text: &str,
) -> Result<(), WriteError> {
    emit(writer, Event::Start(BytesStart::new(name)))?;
    emit(writer, Event::Text(BytesText::new(&sanitize_xml_text(text))))?;
    emit(writer, Event::End(BytesEnd::new(name)))
}

fn emit(writer: &mut Writer<Cursor<Vec<u8>>>, event: Event<'_>) -> Result<(), WriteError> {
    writer
        .write_event(event)
        .map_err(|e| WriteError::Serialize(e.to_string()))
}

/// Replaces `path` with `content` atomically.
///
/// Writes to a temporary file next to the destination, syncs it to disk and
/// renames it over the destination, so readers never observe a partial file.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<(), WriteError> {
    use std::io::Write;
    use std::time::{SystemTime, UNIX_EPOCH};

    // SEC-009: Randomized temp filename to prevent TOCTOU race conditions
    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = path.with_extension(format!("tmp.{:016x}", random_suffix));

    let io_error = |source| WriteError::Io {
        path: temp_path.clone(),
        source,
    };

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)
        .map_err(io_error)?;

    let written = file
        .write_all(content)
        .and_then(|()| file.sync_all());
    drop(file);
    if let Err(source) = written {
        let _ = std::fs::remove_file(&temp_path);
        return Err(io_error(source));
    }

    std::fs::rename(&temp_path, path).map_err(|source| {
        let _ = std::fs::remove_file(&temp_path);
        WriteError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Renders and atomically writes the output feed.
#[derive(Debug, Clone)]
pub struct FeedWriter {
    path: PathBuf,
    channel: ChannelInfo,
}

impl FeedWriter {
    pub fn new(path: impl Into<PathBuf>, channel: ChannelInfo) -> Self {
        Self {
            path: path.into(),
            channel,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(
        &self,
        items: &[CanonicalItem],
        volumes: &[String],
        built_at: DateTime<Utc>,
    ) -> Result<(), WriteError> {
        let content = render_rss(&self.channel, items, volumes, built_at)?;
        write_atomic(&self.path, content.as_bytes())?;
        tracing::info!(
            path = %self.path.display(),
            items = items.len(),
            volumes = volumes.len(),
            "Wrote feed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::test_item;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn built_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn test_render_channel_and_item_fields() {
        let mut item = test_item("A", "Fuzzing <compilers> & more", 2);
        item.summary = "abstract".to_string();
        item.authors = vec!["Ada Lovelace".to_string(), "Alan Turing".to_string()];

        let xml = render_rss(&ChannelInfo::default(), &[item], &[], built_at()).unwrap();

        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("xmlns:dc=\"http://purl.org/dc/elements/1.1/\""));
        assert!(xml.contains("<title>My Customized Papers</title>"));
        assert!(xml.contains("<language>en-US</language>"));
        assert!(xml.contains("<lastBuildDate>Thu, 2 Jan 2025 03:04:05 +0000</lastBuildDate>"));
        assert!(xml.contains("<title>[EJ 2024] Fuzzing &lt;compilers&gt; &amp; more</title>"));
        assert!(xml.contains("<guid isPermaLink=\"false\">A</guid>"));
        assert!(xml.contains("<pubDate>Tue, 2 Jan 2024 12:00:00 +0000</pubDate>"));
        assert!(xml.contains("<source url=\"https://example.org/feed.xml\">Example Journal</source>"));
        assert!(xml.contains("<dc:creator>Alan Turing</dc:creator>"));
    }

    #[test]
    fn test_render_volume_markers_in_channel() {
        let volumes = vec!["https://dblp.org/db/conf/x/x2024.xml".to_string()];
        let xml = render_rss(&ChannelInfo::default(), &[], &volumes, built_at()).unwrap();
        assert!(xml.contains("xmlns:pf=\"urn:x-paperfeed:state\""));
        assert!(xml.contains("<pf:volume>https://dblp.org/db/conf/x/x2024.xml</pf:volume>"));
    }

    #[test]
    fn test_render_strips_illegal_characters() {
        let mut item = test_item("A", "bad\u{0}title\u{1b}", 2);
        item.summary = "sum\u{ffff}mary".to_string();
        let xml = render_rss(&ChannelInfo::default(), &[item], &[], built_at()).unwrap();

        assert!(!xml.chars().any(crate::util::is_forbidden_xml_char));
        assert!(xml.contains("badtitle</title>"));
        assert!(xml.contains("<description>summary</description>"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let items = vec![test_item("A", "one", 2), test_item("B", "two", 1)];
        let first = render_rss(&ChannelInfo::default(), &items, &[], built_at()).unwrap();
        let second = render_rss(&ChannelInfo::default(), &items, &[], built_at()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_write_atomic_replaces_file_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.xml");
        std::fs::write(&path, "old").unwrap();

        write_atomic(&path, b"new").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_write_into_missing_directory_fails_and_keeps_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("feed.xml");
        let err = FeedWriter::new(&path, ChannelInfo::default())
            .write(&[], &[], built_at())
            .unwrap_err();
        assert!(matches!(err, WriteError::Io { .. }));
        assert!(!path.exists());
    }
}
