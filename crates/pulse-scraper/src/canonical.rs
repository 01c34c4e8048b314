//! Turns fetched content into stable canonical text and a content hash.
//!
//! HTML is reduced to its visible text in document order. Headings and list
//! items keep a `# ` / `- ` marker so structure survives. Text that varies
//! between otherwise identical fetches (dates, clock times, relative times,
//! session and nonce tokens) is replaced by fixed placeholders before hashing.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use sha2::{Digest, Sha256};

use crate::types::{CanonicalContent, ContentFormat, RawContent};

/// Default cap on canonical text size: 200 KiB.
pub const DEFAULT_MAX_BYTES: usize = 200 * 1024;

const TIME_PLACEHOLDER: &str = "[time]";
const TOKEN_PLACEHOLDER: &str = "[token]";

const DROPPED_ELEMENTS: &[&str] = &[
    "head", "script", "style", "noscript", "template", "svg", "iframe", "canvas", "object",
];
const AD_CONTAINERS: &[&str] = &["div", "aside", "section", "ins", "figure"];
/// Whole `class`/`id` tokens that mark a container as an ad or consent banner.
const AD_MARKERS: &[&str] = &[
    "ad",
    "ads",
    "adsbygoogle",
    "ad-slot",
    "ad-container",
    "ad-banner",
    "advert",
    "advertisement",
    "sponsored",
    "promo-banner",
    "cookie-banner",
    "cookie-consent",
];

// ---------------------------------------------------------------------------
// Markup patterns
// ---------------------------------------------------------------------------

static COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"));

static DROPPED_ELEMENT_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    DROPPED_ELEMENTS
        .iter()
        .map(|tag| {
            Regex::new(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}\s*>")).expect("valid regex")
        })
        .collect()
});

/// Opening and closing tag patterns per ad container element.
static AD_CONTAINER_RES: LazyLock<Vec<(Regex, Regex)>> = LazyLock::new(|| {
    AD_CONTAINERS
        .iter()
        .map(|tag| {
            (
                Regex::new(&format!(r"(?i)<{tag}\b([^>]*)>")).expect("valid regex"),
                Regex::new(&format!(r"(?i)</{tag}\s*>")).expect("valid regex"),
            )
        })
        .collect()
});

static MARKER_ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:^|\s)(?:class|id)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid regex")
});

static VOID_DROPPED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<(?:input|meta|link|img|source|track)\b[^>]*>").expect("valid regex"));

static HEADING_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<h[1-6]\b[^>]*>").expect("valid regex"));
static LIST_ITEM_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<(?:li|dt)\b[^>]*>").expect("valid regex"));
static CELL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</?(?:td|th)\b[^>]*>").expect("valid regex"));
static BLOCK_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)</?(?:p|div|section|article|header|footer|main|nav|aside|ul|ol|dl|dd|table|thead|tbody|tfoot|tr|br|hr|h[1-6]|li|dt|blockquote|pre|form|fieldset|figure|figcaption|details|summary|body|html|title|label|option|button)\b[^>]*>",
    )
    .expect("valid regex")
});
static ANY_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));
static ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]{2,8});").expect("valid regex"));

// ---------------------------------------------------------------------------
// Noise patterns
// ---------------------------------------------------------------------------

static ISO_TIMESTAMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b\d{4}-\d{2}-\d{2}(?:[T ]\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?(?:Z|[+-]\d{2}:?\d{2})?)?\b",
    )
    .expect("valid regex")
});
static NUMERIC_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{1,2}/\d{1,2}/(?:\d{4}|\d{2})\b|\b\d{1,2}\.\d{1,2}\.\d{4}\b").expect("valid regex")
});
static MONTH_FIRST_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:jan|feb|mar|apr|may|jun|jul|aug|sep|sept|oct|nov|dec)[a-z]*\.?\s+\d{1,2}(?:st|nd|rd|th)?,?\s+\d{4}\b",
    )
    .expect("valid regex")
});
static DAY_FIRST_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b\d{1,2}(?:st|nd|rd|th)?\s+(?:jan|feb|mar|apr|may|jun|jul|aug|sep|sept|oct|nov|dec)[a-z]*\.?,?\s+\d{4}\b",
    )
    .expect("valid regex")
});
static CLOCK_TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b\d{1,2}:\d{2}(?::\d{2})?(?:\s*[ap]\.?m\.?)?(?:\s*(?:utc|gmt|[a-z][sd]t))?\b")
        .expect("valid regex")
});
// Clock times joined into a range ("9:00-17:00", "9:00 am to 5:00 pm") are kept.
static RANGE_TAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:-|–|to|until)\s*\d{1,2}:\d{2}").expect("valid regex")
});
static RANGE_HEAD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\d{1,2}:\d{2}(?:\s*[ap]\.?m\.?)?\s*(?:-|–|to|until)\s*$")
        .expect("valid regex")
});
static RELATIVE_TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:\d+|an?)\s+(?:second|sec|minute|min|hour|hr|day|week|month|year)s?\s+ago\b")
        .expect("valid regex")
});
static QUERY_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)([?&;](?:nonce|token|csrf|_csrf|csrf_token|authenticity_token|sid|session|sessionid|phpsessid|jsessionid|_ga|cb|ts|timestamp|utm_[a-z]+|fbclid|gclid|mc_eid)=)[^&\s#]*",
    )
    .expect("valid regex")
});
static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\b")
        .expect("valid regex")
});
static LONG_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Za-z0-9_]{24,}\b").expect("valid regex"));
static INLINE_SPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\u{a0}\u{200b}\r\f\v]+").expect("valid regex"));

/// Canonicalize fetched content.
///
/// Deterministic: the same input always yields the same text, hash and
/// truncation flag. Text longer than `max_bytes` is cut at the last line
/// break inside the cap.
#[must_use]
pub fn canonicalize(raw: &RawContent, max_bytes: usize) -> CanonicalContent {
    let visible = match raw.format {
        ContentFormat::Html => html_to_text(&raw.body),
        ContentFormat::Text => raw.body.clone(),
    };
    let denoised = strip_noise(&visible);
    let normalized = normalize_whitespace(&denoised);
    let (text, truncated) = truncate_on_line(normalized, max_bytes);
    let hash = content_hash(&text);
    CanonicalContent {
        text,
        hash,
        truncated,
    }
}

/// SHA-256 hex digest of canonical text.
#[must_use]
pub fn content_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

/// Visible text of an HTML document with headings and list items marked.
pub(crate) fn html_to_text(html: &str) -> String {
    let mut doc = COMMENT_RE.replace_all(html, "").into_owned();
    for re in DROPPED_ELEMENT_RES.iter() {
        doc = re.replace_all(&doc, "").into_owned();
    }
    doc = drop_ad_containers(doc);
    doc = VOID_DROPPED_RE.replace_all(&doc, "").into_owned();
    doc = HEADING_OPEN_RE.replace_all(&doc, "\n# ").into_owned();
    doc = LIST_ITEM_OPEN_RE.replace_all(&doc, "\n- ").into_owned();
    doc = CELL_RE.replace_all(&doc, " ").into_owned();
    doc = BLOCK_TAG_RE.replace_all(&doc, "\n").into_owned();
    doc = ANY_TAG_RE.replace_all(&doc, "").into_owned();
    decode_entities(&doc)
}

/// Remove containers whose `class` or `id` carries an ad marker token,
/// together with everything up to the first matching close tag.
fn drop_ad_containers(mut doc: String) -> String {
    for (open, close) in AD_CONTAINER_RES.iter() {
        let mut from = 0;
        while let Some(caps) = open.captures_at(&doc, from) {
            let Some(tag) = caps.get(0) else { break };
            let (start, end) = (tag.start(), tag.end());
            let marked = caps.get(1).is_some_and(|attrs| is_ad_marked(attrs.as_str()));
            let close_end = if marked {
                close.find_at(&doc, end).map(|m| m.end())
            } else {
                None
            };
            match close_end {
                Some(stop) => {
                    doc.replace_range(start..stop, "");
                    from = start;
                }
                None => from = end,
            }
        }
    }
    doc
}

fn is_ad_marked(attrs: &str) -> bool {
    MARKER_ATTR_RE.captures_iter(attrs).any(|caps| {
        let value = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
        value
            .split_whitespace()
            .any(|token| AD_MARKERS.iter().any(|marker| token.eq_ignore_ascii_case(marker)))
    })
}

fn decode_entities(text: &str) -> String {
    ENTITY_RE
        .replace_all(text, |caps: &Captures<'_>| {
            let name = &caps[1];
            decode_entity(name).unwrap_or_else(|| caps[0].to_owned())
        })
        .into_owned()
}

fn decode_entity(name: &str) -> Option<String> {
    if let Some(num) = name.strip_prefix('#') {
        let code = if let Some(hex) = num.strip_prefix(['x', 'X']) {
            u32::from_str_radix(hex, 16).ok()?
        } else {
            num.parse::<u32>().ok()?
        };
        return char::from_u32(code).map(String::from);
    }
    let decoded = match name {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => " ",
        "ndash" | "mdash" => "-",
        "hellip" => "...",
        "lsquo" | "rsquo" => "'",
        "ldquo" | "rdquo" => "\"",
        "copy" => "(c)",
        "reg" => "(r)",
        "trade" => "(tm)",
        "euro" => "€",
        "pound" => "£",
        "yen" => "¥",
        "cent" => "¢",
        "times" => "x",
        "middot" | "bull" => "·",
        _ => return None,
    };
    Some(decoded.to_owned())
}

/// Replace volatile substrings with fixed placeholders.
pub(crate) fn strip_noise(text: &str) -> String {
    let mut out = QUERY_TOKEN_RE
        .replace_all(text, format!("${{1}}{TOKEN_PLACEHOLDER}").as_str())
        .into_owned();
    out = UUID_RE.replace_all(&out, TOKEN_PLACEHOLDER).into_owned();
    out = LONG_TOKEN_RE
        .replace_all(&out, |caps: &Captures<'_>| {
            let token = &caps[0];
            let has_digit = token.bytes().any(|b| b.is_ascii_digit());
            let has_alpha = token.bytes().any(|b| b.is_ascii_alphabetic());
            if has_digit && has_alpha {
                TOKEN_PLACEHOLDER.to_owned()
            } else {
                token.to_owned()
            }
        })
        .into_owned();
    for re in [
        &*ISO_TIMESTAMP_RE,
        &*MONTH_FIRST_DATE_RE,
        &*DAY_FIRST_DATE_RE,
        &*NUMERIC_DATE_RE,
        &*RELATIVE_TIME_RE,
    ] {
        out = re.replace_all(&out, TIME_PLACEHOLDER).into_owned();
    }
    strip_clock_times(&out)
}

fn strip_clock_times(text: &str) -> String {
    CLOCK_TIME_RE
        .replace_all(text, |caps: &Captures<'_>| {
            let Some(time) = caps.get(0) else {
                return String::new();
            };
            if is_time_range(&text[..time.start()], &text[time.end()..]) {
                time.as_str().to_owned()
            } else {
                TIME_PLACEHOLDER.to_owned()
            }
        })
        .into_owned()
}

fn is_time_range(before: &str, after: &str) -> bool {
    let mut head = before.len().saturating_sub(32);
    while !before.is_char_boundary(head) {
        head += 1;
    }
    RANGE_TAIL_RE.is_match(after) || RANGE_HEAD_RE.is_match(&before[head..])
}

/// Collapse runs of inline whitespace, trim lines, drop blank and
/// marker-only lines.
fn normalize_whitespace(text: &str) -> String {
    text.lines()
        .map(|line| INLINE_SPACE_RE.replace_all(line, " ").trim().to_owned())
        .filter(|line| !line.is_empty() && line != "#" && line != "-")
        .collect::<Vec<_>>()
        .join("\n")
}

/// Cut `text` to at most `max_bytes`, preferring the last newline inside the
/// cap so the kept prefix is the same on every fetch of the same page.
fn truncate_on_line(mut text: String, max_bytes: usize) -> (String, bool) {
    if text.len() <= max_bytes {
        return (text, false);
    }
    let mut cut = max_bytes;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    if let Some(newline) = text[..cut].rfind('\n') {
        cut = newline;
    }
    text.truncate(cut);
    (text, true)
}

#[cfg(test)]
#[path = "canonical_test.rs"]
mod tests;
