use chrono::{DateTime, TimeZone, Utc};
use feed_rs::parser;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::sync::OnceLock;
use thiserror::Error;

use crate::feed::types::{CanonicalItem, FeedSource, SourceKind};
use crate::util::collapse_whitespace;

const DBLP_BASE_URL: &str = "https://dblp.org";
/// DBLP record elements that describe an individual paper.
const DBLP_RECORD_TAGS: &[&[u8]] = &[b"article", b"inproceedings", b"incollection"];

/// A document- or entry-level parse failure.
///
/// Entry failures skip only that entry; the rest of the document is kept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("document is not a readable feed: {0}")]
    Document(String),
    #[error("entry {index} skipped: {reason}")]
    Entry { index: usize, reason: String },
}

/// Result of parsing one document: whatever could be recovered plus the
/// failures encountered along the way.
#[derive(Debug, Default)]
pub struct ParsedFeed {
    /// Channel/feed title, if the document has one.
    pub title: Option<String>,
    pub items: Vec<CanonicalItem>,
    pub errors: Vec<ParseError>,
}

/// Parses an RSS 2.0 or Atom document into canonical items.
///
/// Dispatches on `source.kind` for kind-specific cleanup. Entries without a
/// title and a link are skipped with a [`ParseError::Entry`]; entries without
/// any date are stamped with `fetched_at`.
pub fn parse_feed(bytes: &[u8], source: &FeedSource, fetched_at: DateTime<Utc>) -> ParsedFeed {
    // An empty id means "the source gave none"; guid then falls back to the link.
    let feed = match parser::Builder::new()
        .id_generator(|_links, _title, _uri| String::new())
        .build()
        .parse(bytes)
    {
        Ok(feed) => feed,
        Err(e) => {
            return ParsedFeed {
                errors: vec![ParseError::Document(e.to_string())],
                ..ParsedFeed::default()
            }
        }
    };

    let title = feed
        .title
        .map(|t| collapse_whitespace(&t.content))
        .filter(|t| !t.is_empty());
    let source_title = title.clone().unwrap_or_default();

    let mut items = Vec::with_capacity(feed.entries.len());
    let mut errors = Vec::new();

    for (index, entry) in feed.entries.into_iter().enumerate() {
        let link = entry
            .links
            .iter()
            .find(|l| l.rel.as_deref().map_or(true, |rel| rel == "alternate"))
            .or_else(|| entry.links.first())
            .map(|l| l.href.trim().to_string())
            .unwrap_or_default();
        let item_title = entry
            .title
            .map(|t| collapse_whitespace(&t.content))
            .unwrap_or_default();

        if item_title.is_empty() && link.is_empty() {
            errors.push(ParseError::Entry {
                index,
                reason: "entry has neither title nor link".to_string(),
            });
            continue;
        }

        let summary = entry
            .summary
            .map(|s| s.content)
            .or_else(|| entry.content.and_then(|c| c.body))
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        let summary = match source.kind {
            SourceKind::Arxiv => strip_arxiv_announcement(&summary).into_owned(),
            SourceKind::Static | SourceKind::DblpStream => summary,
        };

        let pub_date = entry.published.or(entry.updated).unwrap_or(fetched_at);
        let guid = generate_guid(Some(entry.id.as_str()), &link, &item_title, pub_date);
        let authors = entry
            .authors
            .into_iter()
            .map(|p| collapse_whitespace(&p.name))
            .filter(|n| !n.is_empty())
            .collect();

        items.push(CanonicalItem {
            guid,
            link,
            title: item_title,
            summary,
            pub_date,
            source_url: source.url.clone(),
            source_title: source_title.clone(),
            authors,
        });
    }

    ParsedFeed {
        title,
        items,
        errors,
    }
}

/// Where a DBLP volume/event page came from and how to date its records.
#[derive(Debug, Clone)]
pub struct VolumeContext {
    /// Human-facing page URL (`.html`), used as the last-resort link.
    pub page_url: String,
    /// Identity of the volume; stored as every record's `source_url`.
    pub source_url: String,
    /// Venue name inherited from the stream feed.
    pub source_title: String,
    /// Journal issue number from a `#nrN` fragment; other issues are skipped.
    pub issue: Option<String>,
    /// Announcement date of the volume in the stream feed.
    pub announced: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct DblpRecord {
    key: String,
    title: String,
    authors: Vec<String>,
    ee: Option<String>,
    url: Option<String>,
    year: Option<i32>,
    number: Option<String>,
}

/// Parses a DBLP volume/event XML export into canonical items.
///
/// DBLP records carry no abstract and no date. `pub_date` is synthesized from
/// the volume's announcement date, then the record's `<year>`, then the fetch
/// time. `link` is the first `<ee>` (usually a DOI), then the DBLP page.
pub fn parse_dblp_volume(bytes: &[u8], ctx: &VolumeContext) -> ParsedFeed {
    let mut reader = Reader::from_reader(bytes);
    // Titles contain inline markup (<i>, <sub>); keep inner whitespace and
    // collapse it afterwards.
    reader.config_mut().trim_text(false);

    let mut buf = Vec::new();
    let mut items = Vec::new();
    let mut errors = Vec::new();

    let mut record: Option<DblpRecord> = None;
    let mut record_index = 0usize;
    let mut depth = 0usize;
    let mut field: Option<Vec<u8>> = None;
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if record.is_some() {
                    depth += 1;
                    if depth == 1 {
                        field = Some(e.name().as_ref().to_vec());
                        text.clear();
                    }
                } else if DBLP_RECORD_TAGS.contains(&e.name().as_ref()) {
                    let key = e
                        .try_get_attribute("key")
                        .ok()
                        .flatten()
                        .and_then(|a| a.decode_and_unescape_value(reader.decoder()).ok())
                        .map(|v| v.trim().to_string())
                        .unwrap_or_default();
                    record = Some(DblpRecord {
                        key,
                        ..DblpRecord::default()
                    });
                    depth = 0;
                }
            }
            Ok(Event::Text(t)) if field.is_some() => {
                let unescaped = t
                    .unescape_with(resolve_entity)
                    .unwrap_or_else(|_| Cow::Owned(String::from_utf8_lossy(&t).into_owned()));
                text.push_str(&unescaped);
            }
            Ok(Event::CData(c)) if field.is_some() => {
                text.push_str(&String::from_utf8_lossy(&c.into_inner()));
            }
            Ok(Event::End(_)) if record.is_some() => {
                if depth == 0 {
                    if let Some(rec) = record.take() {
                        match record_to_item(rec, ctx) {
                            Ok(Some(item)) => items.push(item),
                            Ok(None) => {}
                            Err(reason) => errors.push(ParseError::Entry {
                                index: record_index,
                                reason,
                            }),
                        }
                        record_index += 1;
                    }
                } else {
                    if depth == 1 {
                        if let (Some(rec), Some(name)) = (record.as_mut(), field.take()) {
                            apply_field(rec, &name, collapse_whitespace(&text));
                        }
                    }
                    depth -= 1;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                // The reader cannot resume after a syntax error; keep what was
                // already recovered.
                errors.push(ParseError::Document(format!(
                    "XML error at byte {}: {}",
                    reader.buffer_position(),
                    e
                )));
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    ParsedFeed {
        title: Some(ctx.source_title.clone()).filter(|t| !t.is_empty()),
        items,
        errors,
    }
}

fn apply_field(rec: &mut DblpRecord, name: &[u8], value: String) {
    if value.is_empty() {
        return;
    }
    match name {
        b"title" => rec.title = value,
        b"author" => rec.authors.push(value),
        b"ee" => {
            if rec.ee.is_none() {
                rec.ee = Some(value);
            }
        }
        b"url" => rec.url = Some(value),
        b"year" => rec.year = value.parse().ok(),
        b"number" => rec.number = Some(value),
        _ => {}
    }
}

/// Returns `Ok(None)` for records belonging to a different journal issue.
fn record_to_item(rec: DblpRecord, ctx: &VolumeContext) -> Result<Option<CanonicalItem>, String> {
    if let Some(issue) = &ctx.issue {
        if rec.number.as_deref() != Some(issue.as_str()) {
            return Ok(None);
        }
    }

    // DBLP titles end with a period.
    let title = rec.title.strip_suffix('.').unwrap_or(&rec.title).to_string();
    if title.is_empty() {
        return Err(format!("DBLP record '{}' has no title", rec.key));
    }

    let link = rec
        .ee
        .or_else(|| rec.url.map(|u| format!("{}/{}", DBLP_BASE_URL, u.trim_start_matches('/'))))
        .unwrap_or_else(|| ctx.page_url.clone());

    let guid = if rec.key.is_empty() {
        link.clone()
    } else {
        format!("dblp:{}", rec.key)
    };

    let pub_date = ctx
        .announced
        .or_else(|| {
            rec.year
                .and_then(|y| Utc.with_ymd_and_hms(y, 1, 1, 0, 0, 0).single())
        })
        .unwrap_or(ctx.fetched_at);

    Ok(Some(CanonicalItem {
        guid,
        link,
        title,
        summary: String::new(),
        pub_date,
        source_url: ctx.source_url.clone(),
        source_title: ctx.source_title.clone(),
        authors: rec.authors,
    }))
}

/// Removes the `arXiv:ID Announce Type: new Abstract:` preamble that arXiv
/// category feeds prepend to every description.
fn strip_arxiv_announcement(summary: &str) -> Cow<'_, str> {
    static PREAMBLE: OnceLock<Regex> = OnceLock::new();
    let re = PREAMBLE.get_or_init(|| {
        Regex::new(r"(?s)^\s*arXiv:\S+\s+Announce Type:\s*\S+\s*Abstract:\s*")
            .expect("arXiv preamble pattern is valid")
    });
    re.replace(summary, "")
}

/// Picks the item identity: the source's own id, then the link, then a hash.
fn generate_guid(existing: Option<&str>, link: &str, title: &str, published: DateTime<Utc>) -> String {
    if let Some(guid) = existing {
        let trimmed = guid.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    if !link.is_empty() {
        return link.to_string();
    }

    let input = format!("{}|{}", title, published.timestamp());
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}

/// Resolves the XML builtins plus the Latin-1 named entities DBLP declares in
/// its DTD (quick-xml never reads DTD entity declarations).
fn resolve_entity(name: &str) -> Option<&'static str> {
    if let Some(builtin) = quick_xml::escape::resolve_predefined_entity(name) {
        return Some(builtin);
    }
    let resolved = match name {
        "nbsp" => "\u{a0}",
        "reg" => "®",
        "times" => "×",
        "Agrave" => "À",
        "Aacute" => "Á",
        "Acirc" => "Â",
        "Atilde" => "Ã",
        "Auml" => "Ä",
        "Aring" => "Å",
        "AElig" => "Æ",
        "Ccedil" => "Ç",
        "Egrave" => "È",
        "Eacute" => "É",
        "Ecirc" => "Ê",
        "Euml" => "Ë",
        "Igrave" => "Ì",
        "Iacute" => "Í",
        "Icirc" => "Î",
        "Iuml" => "Ï",
        "ETH" => "Ð",
        "Ntilde" => "Ñ",
        "Ograve" => "Ò",
        "Oacute" => "Ó",
        "Ocirc" => "Ô",
        "Otilde" => "Õ",
        "Ouml" => "Ö",
        "Oslash" => "Ø",
        "Ugrave" => "Ù",
        "Uacute" => "Ú",
        "Ucirc" => "Û",
        "Uuml" => "Ü",
        "Yacute" => "Ý",
        "THORN" => "Þ",
        "szlig" => "ß",
        "agrave" => "à",
        "aacute" => "á",
        "acirc" => "â",
        "atilde" => "ã",
        "auml" => "ä",
        "aring" => "å",
        "aelig" => "æ",
        "ccedil" => "ç",
        "egrave" => "è",
        "eacute" => "é",
        "ecirc" => "ê",
        "euml" => "ë",
        "igrave" => "ì",
        "iacute" => "í",
        "icirc" => "î",
        "iuml" => "ï",
        "eth" => "ð",
        "ntilde" => "ñ",
        "ograve" => "ò",
        "oacute" => "ó",
        "ocirc" => "ô",
        "otilde" => "õ",
        "ouml" => "ö",
        "oslash" => "ø",
        "ugrave" => "ù",
        "uacute" => "ú",
        "ucirc" => "û",
        "uuml" => "ü",
        "yacute" => "ý",
        "thorn" => "þ",
        "yuml" => "ÿ",
        _ => return None,
    };
    Some(resolved)
}
