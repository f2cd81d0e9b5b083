use std::borrow::Cow;

/// Returns true for code points that XML 1.0 forbids in character data.
///
/// XML 1.0 allows `#x9 | #xA | #xD | [#x20-#xD7FF] | [#xE000-#xFFFD] | [#x10000-#x10FFFF]`.
/// Surrogates cannot occur in a Rust `str`, which leaves the C0 controls
/// (minus tab/LF/CR) and the two noncharacters U+FFFE and U+FFFF.
#[inline]
pub fn is_forbidden_xml_char(c: char) -> bool {
    matches!(
        c,
        '\u{0}'..='\u{8}' | '\u{b}' | '\u{c}' | '\u{e}'..='\u{1f}' | '\u{fffe}' | '\u{ffff}'
    )
}

/// Removes every character that is illegal in XML 1.0 text content.
///
/// Preserves: tab (0x09), newline (0x0A), carriage return (0x0D), and every
/// other allowed code point, including markup characters (escaping is the
/// serializer's job).
///
/// Returns `Cow::Borrowed` when the input is already clean (the common case),
/// so `sanitize_xml_text(sanitize_xml_text(x)) == sanitize_xml_text(x)` costs
/// a single scan.
pub fn sanitize_xml_text(s: &str) -> Cow<'_, str> {
    // Fast path: forbidden chars are either ASCII controls or U+FFFE/U+FFFF,
    // whose UTF-8 encodings start with 0xEF.
    let needs_strip = s
        .bytes()
        .any(|b| (b < 0x20 && b != 0x09 && b != 0x0a && b != 0x0d) || b == 0xef)
        && s.chars().any(is_forbidden_xml_char);

    if !needs_strip {
        return Cow::Borrowed(s);
    }

    Cow::Owned(s.chars().filter(|&c| !is_forbidden_xml_char(c)).collect())
}

/// Collapses runs of whitespace into single spaces and trims the ends.
///
/// Feed titles frequently arrive with embedded newlines and indentation.
pub fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for word in s.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}
