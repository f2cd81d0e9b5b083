//! Boolean keyword filter.
//!
//! A [`QuerySet`] is an OR of [`KeywordQuery`]s; a query is an AND of
//! [`KeywordTerm`]s, each matched as a raw substring of
//! `title + " " + summary`.

use crate::feed::CanonicalItem;

/// One substring condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordTerm {
    /// Stored lower-cased unless `case_sensitive`.
    pub text: String,
    pub case_sensitive: bool,
}

impl KeywordTerm {
    /// Parses a single term; a leading `=` marks it case-sensitive.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (text, case_sensitive) = match raw.strip_prefix('=') {
            Some(rest) => (rest.trim().to_string(), true),
            None => (raw.to_lowercase(), false),
        };
        if text.is_empty() {
            return None;
        }
        Some(Self {
            text,
            case_sensitive,
        })
    }
}

/// All terms must match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordQuery {
    pub terms: Vec<KeywordTerm>,
}

impl KeywordQuery {
    /// Parses one query line.
    ///
    /// A line containing the standalone token `AND` is split on it, so each
    /// segment may be a multi-word phrase. Otherwise every whitespace-separated
    /// word is its own term. Returns `None` for lines without terms.
    pub fn parse(line: &str) -> Option<Self> {
        let terms: Vec<KeywordTerm> = match split_on_and(line) {
            Some(segments) => segments.into_iter().filter_map(KeywordTerm::parse).collect(),
            None => line.split_whitespace().filter_map(KeywordTerm::parse).collect(),
        };

        if terms.is_empty() {
            None
        } else {
            Some(Self { terms })
        }
    }

    fn matches_prepared(&self, text: &str, lowered: &str) -> bool {
        self.terms.iter().all(|term| {
            if term.case_sensitive {
                text.contains(&term.text)
            } else {
                lowered.contains(&term.text)
            }
        })
    }
}

/// Splits `line` on standalone `AND` tokens, keeping each segment as
/// written. Returns `None` when the line has no such token.
fn split_on_and(line: &str) -> Option<Vec<&str>> {
    let mut segments = Vec::new();
    let mut start = 0;

    for (idx, token) in line.match_indices("AND") {
        let end = idx + token.len();
        let standalone = line[..idx].chars().next_back().map_or(true, char::is_whitespace)
            && line[end..].chars().next().map_or(true, char::is_whitespace);
        if standalone {
            segments.push(&line[start..idx]);
            start = end;
        }
    }

    if segments.is_empty() {
        return None;
    }
    segments.push(&line[start..]);
    Some(segments)
}

/// Any query may match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuerySet {
    queries: Vec<KeywordQuery>,
}

impl QuerySet {
    /// Builds a query set from configured lines.
    ///
    /// Blank lines and `#` comments are ignored.
    ///
    /// ```
    /// use paperfeed::filter::QuerySet;
    ///
    /// let queries = QuerySet::parse(["LLM AND static analysis", "=SAST"]);
    /// assert!(queries.matches("Static Analysis with llm agents", ""));
    /// assert!(!queries.matches("sast pipelines", ""));
    /// ```
    pub fn parse<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let queries = lines
            .into_iter()
            .filter_map(|line| {
                let line = line.as_ref().trim();
                if line.is_empty() || line.starts_with('#') {
                    None
                } else {
                    KeywordQuery::parse(line)
                }
            })
            .collect();
        Self { queries }
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub fn queries(&self) -> &[KeywordQuery] {
        &self.queries
    }

    /// True iff at least one query has every term present.
    pub fn matches(&self, title: &str, summary: &str) -> bool {
        let text = format!("{} {}", title, summary);
        let lowered = text.to_lowercase();
        self.queries
            .iter()
            .any(|q| q.matches_prepared(&text, &lowered))
    }

    pub fn matches_item(&self, item: &CanonicalItem) -> bool {
        self.matches(&item.title, &item.summary)
    }
}
