//! Inline sealing of one element of an HTML page
//!
//! The first `<div>` or `<article>` whose class list contains the private
//! class is sealed whole, the element itself included. Its children are then
//! replaced by an empty placeholder that carries the envelope in a
//! `data-envelope` attribute, and the rest of the page is left byte for byte
//! as it was.

use crate::error::{ErrorCategory, ErrorKind, PagelockError, Result};
use crate::kdf::KdfParams;
use crate::seal;
use regex::Regex;

/// Class marking the element to seal when none is given
pub const DEFAULT_PRIVATE_CLASS: &str = "pagelock-private-body";

/// Class of the placeholder left in place of the sealed children
pub const PLACEHOLDER_CLASS: &str = "pagelock-locked";

// Quoted attribute values may contain '>'.
const TAG_PATTERN: &str = r#"(?i)<(/?)(div|article)\b((?:[^>"']|"[^"]*"|'[^']*')*)>"#;
const CLASS_PATTERN: &str = r#"(?i)\bclass\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#;
const ENVELOPE_PATTERN: &str = r#"\bdata-envelope\s*=\s*"([0-9A-Za-z+/=]*)""#;

/// Byte offsets of the private element within a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementSpan {
    /// Start of the opening tag
    pub outer_start: usize,
    /// End of the opening tag
    pub inner_start: usize,
    /// Start of the closing tag
    pub inner_end: usize,
    /// End of the closing tag
    pub outer_end: usize,
}

/// Locate the first `<div>` or `<article>` carrying `class`.
///
/// Tags are matched by name and nesting depth only; the page is not
/// otherwise validated.
pub fn find_private_element(html: &str, class: &str) -> Result<ElementSpan> {
    let tags = pattern(TAG_PATTERN)?;
    let classes = pattern(CLASS_PATTERN)?;

    let mut matches = tags.captures_iter(html);
    let (name, outer_start, inner_start) = loop {
        let Some(cap) = matches.next() else {
            return Err(not_found(format!(
                "no <div> or <article> with class \"{}\" found",
                class
            )));
        };
        let Some(whole) = cap.get(0) else { continue };
        if !cap[1].is_empty() || is_self_closing(&cap[3]) {
            continue;
        }
        if has_class(&classes, &cap[3], class) {
            break (cap[2].to_ascii_lowercase(), whole.start(), whole.end());
        }
    };

    let mut depth = 1usize;
    for cap in matches {
        let Some(whole) = cap.get(0) else { continue };
        if !cap[2].eq_ignore_ascii_case(&name) || is_self_closing(&cap[3]) {
            continue;
        }
        if cap[1].is_empty() {
            depth += 1;
            continue;
        }
        depth -= 1;
        if depth == 0 {
            return Ok(ElementSpan {
                outer_start,
                inner_start,
                inner_end: whole.start(),
                outer_end: whole.end(),
            });
        }
    }

    Err(not_found(format!(
        "<{}> with class \"{}\" is never closed",
        name, class
    )))
}

/// Seal the private element of `html` and return the rewritten page.
pub fn seal_inline(html: &str, passphrase: &str, params: KdfParams, class: &str) -> Result<String> {
    let span = find_private_element(html, class)?;
    let envelope = seal::seal(passphrase, &html[span.outer_start..span.outer_end], params)?;

    let mut page = String::with_capacity(html.len() + envelope.len());
    page.push_str(&html[..span.inner_start]);
    page.push_str(&placeholder(&envelope));
    page.push_str(&html[span.inner_end..]);
    Ok(page)
}

/// The element that stands in for sealed content.
pub fn placeholder(envelope: &str) -> String {
    format!(
        "<div class=\"{}\" data-envelope=\"{}\"></div>",
        PLACEHOLDER_CLASS, envelope
    )
}

/// The envelope carried by the first placeholder in `html`, if any.
pub fn extract_envelope(html: &str) -> Result<Option<&str>> {
    let envelopes = pattern(ENVELOPE_PATTERN)?;
    Ok(envelopes
        .captures(html)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str()))
}

fn has_class(classes: &Regex, attributes: &str, class: &str) -> bool {
    classes.captures_iter(attributes).any(|cap| {
        let value = cap
            .get(1)
            .or_else(|| cap.get(2))
            .or_else(|| cap.get(3))
            .map_or("", |m| m.as_str());
        value.split_ascii_whitespace().any(|c| c == class)
    })
}

fn is_self_closing(attributes: &str) -> bool {
    attributes.trim_end().ends_with('/')
}

fn pattern(re: &str) -> Result<Regex> {
    Regex::new(re)
        .map_err(|e| PagelockError::new(ErrorCategory::Internal, format!("bad pattern: {}", e)))
}

fn not_found(msg: String) -> PagelockError {
    PagelockError::with_kind(ErrorCategory::User, ErrorKind::PrivateElementNotFound, msg)
}
