use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::writer::VOLUME_ELEMENT;
use crate::feed::{strip_display_prefix, CanonicalItem};
use crate::util::collapse_whitespace;

#[derive(Debug, Error)]
pub enum PersistedFeedError {
    #[error("failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("XML parse error: {0}")]
    XmlParse(String),
}

/// Everything a previous run left in its output file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PersistedFeed {
    pub items: Vec<CanonicalItem>,
    /// Keys of DBLP volumes already expanded, newest first.
    pub volumes: Vec<String>,
}

#[derive(Debug, Default)]
struct ItemFields {
    title: String,
    link: String,
    guid: String,
    pub_date: Option<String>,
    description: String,
    source_url: String,
    source_title: String,
    authors: Vec<String>,
}

/// Loads the previous output feed.
///
/// A missing file is an empty feed. An unreadable or corrupt file is logged
/// and also treated as empty, so the run rebuilds from fresh items.
pub async fn load_persisted(path: &Path) -> PersistedFeed {
    match read_persisted(path).await {
        Ok(feed) => {
            tracing::info!(
                path = %path.display(),
                items = feed.items.len(),
                volumes = feed.volumes.len(),
                "Loaded existing feed"
            );
            feed
        }
        Err(e) => {
            tracing::warn!(error = %e, "Existing feed is unreadable; ignoring old items");
            PersistedFeed::default()
        }
    }
}

async fn read_persisted(path: &Path) -> Result<PersistedFeed, PersistedFeedError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(PersistedFeed::default()),
        Err(source) => {
            return Err(PersistedFeedError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    parse_persisted(&bytes)
}

/// Parses a feed previously written by [`super::render_rss`].
///
/// Title prefixes added on output are removed and every field is sanitized,
/// so items compare equal to their freshly parsed counterparts. Items
/// without a readable `pubDate` are skipped. Text is read untrimmed so
/// descriptions survive byte for byte; identifier fields are trimmed.
pub fn parse_persisted(bytes: &[u8]) -> Result<PersistedFeed, PersistedFeedError> {
    // SEC-002: quick-xml (0.37) never expands <!ENTITY> declarations; only the
    // five XML builtins resolve.
    let mut reader = Reader::from_reader(bytes);

    let mut buf = Vec::new();
    let mut feed = PersistedFeed::default();
    let mut current: Option<ItemFields> = None;
    let mut field: Option<Vec<u8>> = None;
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"item" => current = Some(ItemFields::default()),
                name if current.is_some() => {
                    if name == b"source" {
                        if let Some(fields) = current.as_mut() {
                            fields.source_url = source_url(&e, &reader)?;
                        }
                    }
                    field = Some(name.to_vec());
                    text.clear();
                }
                name if name == VOLUME_ELEMENT.as_bytes() => {
                    field = Some(name.to_vec());
                    text.clear();
                }
                _ => {}
            },
            Ok(Event::Empty(e)) if current.is_some() && e.name().as_ref() == b"source" => {
                if let Some(fields) = current.as_mut() {
                    fields.source_url = source_url(&e, &reader)?;
                }
            }
            Ok(Event::Text(t)) if field.is_some() => {
                let unescaped = t
                    .unescape()
                    .map_err(|e| PersistedFeedError::XmlParse(e.to_string()))?;
                text.push_str(&unescaped);
            }
            Ok(Event::CData(c)) if field.is_some() => {
                text.push_str(&String::from_utf8_lossy(&c.into_inner()));
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"item" {
                    if let Some(fields) = current.take() {
                        if let Some(item) = into_item(fields) {
                            feed.items.push(item);
                        }
                    }
                } else if let Some(name) = field.take() {
                    let value = std::mem::take(&mut text);
                    match current.as_mut() {
                        Some(fields) => apply_field(fields, &name, value),
                        None => {
                            let key = value.trim();
                            if !key.is_empty() && !feed.volumes.iter().any(|v| v == key) {
                                feed.volumes.push(key.to_string());
                            }
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(PersistedFeedError::XmlParse(format!(
                    "error at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(feed)
}

fn source_url(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Result<String, PersistedFeedError> {
    let value = e
        .try_get_attribute("url")
        .map_err(|e| PersistedFeedError::XmlParse(e.to_string()))?;
    match value {
        Some(attr) => attr
            .decode_and_unescape_value(reader.decoder())
            .map(|v| v.trim().to_string())
            .map_err(|e| PersistedFeedError::XmlParse(e.to_string())),
        None => Ok(String::new()),
    }
}

fn apply_field(fields: &mut ItemFields, name: &[u8], value: String) {
    match name {
        b"title" => fields.title = collapse_whitespace(&value),
        b"link" => fields.link = value.trim().to_string(),
        b"guid" => fields.guid = value.trim().to_string(),
        b"pubDate" => fields.pub_date = Some(value),
        b"description" => fields.description = value,
        b"source" => fields.source_title = collapse_whitespace(&value),
        b"dc:creator" => {
            let author = collapse_whitespace(&value);
            if !author.is_empty() {
                fields.authors.push(author);
            }
        }
        _ => {}
    }
}

fn into_item(fields: ItemFields) -> Option<CanonicalItem> {
    let pub_date = fields
        .pub_date
        .as_deref()
        .and_then(|d| DateTime::parse_from_rfc2822(d.trim()).ok())
        .map(|d| d.with_timezone(&Utc));
    let Some(pub_date) = pub_date else {
        tracing::warn!(guid = %fields.guid, "Skipping existing item without a valid pubDate");
        return None;
    };

    let mut item = CanonicalItem {
        guid: fields.guid,
        link: fields.link,
        title: fields.title,
        summary: fields.description,
        pub_date,
        source_url: fields.source_url,
        source_title: fields.source_title,
        authors: fields.authors,
    };
    strip_display_prefix(&mut item);
    item.sanitize();
    Some(item)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::test_item;
    use crate::storage::{render_rss, ChannelInfo};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_reads_back_rendered_feed() {
        let mut a = test_item("A", "Fuzzing & friends", 3);
        a.summary = "An <b>abstract</b>.".to_string();
        a.authors = vec!["Ada Lovelace".to_string()];
        let mut b = test_item("B", "Plain", 1);
        b.source_title.clear();
        b.source_url.clear();

        let volumes = vec![
            "https://dblp.org/db/conf/x/x2024.xml".to_string(),
            "https://dblp.org/db/journals/y/y5.xml#nr2".to_string(),
        ];
        let xml = render_rss(
            &ChannelInfo::default(),
            &[a.clone(), b.clone()],
            &volumes,
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        )
        .unwrap();
        let feed = parse_persisted(xml.as_bytes()).unwrap();

        assert_eq!(feed.items, vec![a, b]);
        assert_eq!(feed.volumes, volumes);
    }

    #[test]
    fn test_description_whitespace_survives_round_trip() {
        let mut item = test_item("A", "Padded", 3);
        item.summary = "  leading\n  indented line\ntrailing  ".to_string();
        let xml = render_rss(
            &ChannelInfo::default(),
            &[item.clone()],
            &[],
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        )
        .unwrap();
        let feed = parse_persisted(xml.as_bytes()).unwrap();
        assert_eq!(feed.items[0].summary, item.summary);
    }

    #[test]
    fn test_identifier_fields_are_trimmed() {
        let xml = r#"<rss version="2.0"><channel>
<item><title> Spaced </title><guid>
  X  </guid><link> https://example.org/x </link>
<pubDate>
  Mon, 1 Jan 2024 00:00:00 +0000
</pubDate><source url=" https://example.org/feed.xml "> Venue </source></item>
</channel></rss>"#;
        let item = &parse_persisted(xml.as_bytes()).unwrap().items[0];
        assert_eq!(item.guid, "X");
        assert_eq!(item.link, "https://example.org/x");
        assert_eq!(item.title, "Spaced");
        assert_eq!(item.source_url, "https://example.org/feed.xml");
        assert_eq!(item.source_title, "Venue");
    }

    #[test]
    fn test_item_without_pub_date_is_skipped() {
        let xml = r#"<rss version="2.0"><channel>
<item><title>No date</title><guid>X</guid></item>
<item><title>Dated</title><guid>Y</guid><pubDate>Mon, 1 Jan 2024 00:00:00 +0000</pubDate></item>
</channel></rss>"#;
        let items = parse_persisted(xml.as_bytes()).unwrap().items;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].guid, "Y");
    }

    #[test]
    fn test_corrupt_document_is_an_error() {
        let xml = "<rss><channel><item><title>cut</titl></item>";
        assert!(matches!(
            parse_persisted(xml.as_bytes()),
            Err(PersistedFeedError::XmlParse(_))
        ));
    }

    #[test]
    fn test_entity_declarations_not_expanded() {
        let xml = r#"<?xml version="1.0"?>
<!DOCTYPE rss [<!ENTITY xxe SYSTEM "file:///etc/passwd">]>
<rss version="2.0"><channel>
<item><title>&xxe;</title><guid>X</guid><pubDate>Mon, 1 Jan 2024 00:00:00 +0000</pubDate></item>
</channel></rss>"#;
        match parse_persisted(xml.as_bytes()) {
            Ok(feed) => assert!(feed.items.iter().all(|i| !i.title.contains("root:"))),
            Err(_) => {}
        }
    }

    #[tokio::test]
    async fn test_missing_and_corrupt_files_load_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("none.xml");
        assert_eq!(load_persisted(&missing).await, PersistedFeed::default());

        let corrupt = dir.path().join("corrupt.xml");
        std::fs::write(&corrupt, "<rss><channel><item><title>x</wrong>").unwrap();
        assert_eq!(load_persisted(&corrupt).await, PersistedFeed::default());
    }
}
