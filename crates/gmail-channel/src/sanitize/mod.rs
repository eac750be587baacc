//! Email body sanitizer
//!
//! Turns HTML (or already-plain) email bodies into clean plain text for the
//! agent. The pipeline is pure and total: every stage is a string transform
//! that cannot fail, and plain text passes through unchanged apart from
//! whitespace normalization.
//!
//! Stages, in order:
//! 1. drop `<style>`/`<script>`/`<head>` blocks and comments
//! 2. drop tracking pixels
//! 3. `<br>` and block-level tags become newlines
//! 4. anchors become `text (url)`
//! 5. strip remaining tags
//! 6. decode entities
//! 7. drop footer noise
//! 8. cut at the `--` signature separator (optional)
//! 9. trim lines and collapse blank runs

mod entities;
mod html;

pub use entities::{decode_entities, escape_html};
pub use html::{is_safe_href, sanitize_html, strip_tags};

use regex::{Captures, Regex};
use std::sync::OnceLock;

/// Options for [`sanitize_with`]
#[derive(Debug, Clone, Copy)]
pub struct SanitizeOptions {
    /// Discard everything after a `--` signature separator line
    pub strip_signature: bool,
}

impl Default for SanitizeOptions {
    fn default() -> Self {
        Self {
            strip_signature: true,
        }
    }
}

/// Sanitize an email body with default options
pub fn sanitize(input: &str) -> String {
    sanitize_with(input, SanitizeOptions::default())
}

/// Sanitize an email body
pub fn sanitize_with(input: &str, options: SanitizeOptions) -> String {
    let text = input.replace("\r\n", "\n").replace('\r', "\n");
    let text = html::remove_junk_blocks(&text);
    let text = html::remove_tracking_pixels(&text);
    let text = block_tags_to_newlines(&text);
    let text = render_links(&text);
    let text = html::strip_tags(&text);
    let text = decode_entities(&text);
    let text = scrub_markup_remnants(&text);
    let text = remove_footer_noise(&text);
    let text = if options.strip_signature {
        strip_signature(&text)
    } else {
        text
    };
    normalize_whitespace(&text)
}

fn block_tag_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(
            r"(?i)<br\s*/?>|</?(?:p|div|tr|li|ul|ol|table|h[1-6]|blockquote|section|article|header|footer|pre|hr)\b[^>]*>",
        )
        .expect("valid block tag regex")
    })
}

fn anchor_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"(?is)<a\b([^>]*)>(.*?)</a\s*>").expect("valid anchor regex"))
}

fn data_uri_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"(?i)\bdata:\S+").expect("valid data uri regex"))
}

fn footer_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(
            r"(?i)^(?:sent from my \w+(?:[ -]\w+){0,3}|sent from (?:mail|outlook|yahoo mail|gmail) for \w+(?:[ -]\w+){0,2}|get outlook for \w+(?:[ -]\w+){0,2}|.*\bunsubscribe\b.*|.*\b(?:confidentiality notice|this (?:e-?mail|message)(?: and any attachments)? (?:is|are|may be|contains?) (?:strictly )?(?:confidential|privileged))\b.*|©.*|(?:\(c\)|copyright)\s*(?:©|\(c\))?\s*\d{4}\b.*)$",
        )
        .expect("valid footer regex")
    })
}

fn block_tags_to_newlines(html: &str) -> String {
    block_tag_regex().replace_all(html, "\n").into_owned()
}

fn render_links(html: &str) -> String {
    anchor_regex()
        .replace_all(html, |caps: &Captures<'_>| {
            let href = html::attributes(&caps[1])
                .into_iter()
                .find(|(k, _)| k == "href")
                .map(|(_, v)| decode_entities(v.trim()))
                .unwrap_or_default();
            let text = decode_entities(html::strip_tags(&caps[2]).trim());
            render_link(&text, &href)
        })
        .into_owned()
}

fn render_link(text: &str, href: &str) -> String {
    let href = href.trim();
    let lower = href.to_lowercase();
    let show_text_only = href.is_empty()
        || lower.starts_with("mailto:")
        || !is_safe_href(href)
        || same_target(text, href);

    if show_text_only {
        text.to_string()
    } else if text.is_empty() {
        href.to_string()
    } else {
        format!("{} ({})", text, href)
    }
}

fn same_target(text: &str, href: &str) -> bool {
    let strip = |s: &str| {
        let s = s.trim().to_lowercase();
        let s = s
            .strip_prefix("https://")
            .or_else(|| s.strip_prefix("http://"))
            .map(str::to_string)
            .unwrap_or(s);
        s.trim_end_matches('/').to_string()
    };
    text.trim().eq_ignore_ascii_case(href.trim()) || strip(text) == strip(href)
}

/// Nothing that could be read back as markup survives
fn scrub_markup_remnants(text: &str) -> String {
    let text = data_uri_regex().replace_all(text, "");
    text.replace(['<', '>'], "")
}

fn remove_footer_noise(text: &str) -> String {
    text.lines()
        .filter(|line| !footer_regex().is_match(line.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn strip_signature(text: &str) -> String {
    let mut kept = Vec::new();
    for line in text.lines() {
        if line.trim() == "--" {
            break;
        }
        kept.push(line);
    }
    kept.join("\n")
}

fn normalize_whitespace(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut blank_run = 0;
    for line in text.lines().map(str::trim) {
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push(line);
    }
    out.join("\n").trim().to_string()
}
