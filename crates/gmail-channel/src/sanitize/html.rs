//! Tag-level HTML helpers shared by the text pipeline and the safe-HTML scrubber

use regex::{Captures, Regex};
use std::sync::OnceLock;

use super::entities::{decode_entities, escape_html};

fn junk_block_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(
            r"(?is)<style\b[^>]*>.*?</style\s*>|<script\b[^>]*>.*?</script\s*>|<head\b[^>]*>.*?</head\s*>|<!--.*?-->",
        )
        .expect("valid junk block regex")
    })
}

fn img_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"(?is)<img\b[^>]*>").expect("valid img regex"))
}

fn attr_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r#"(?s)([a-zA-Z_:][-a-zA-Z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
            .expect("valid attribute regex")
    })
}

fn tag_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?s)<(/?)([a-zA-Z][a-zA-Z0-9]*)\b([^>]*)>").expect("valid tag regex")
    })
}

fn markup_decl_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"(?s)<[!?][^>]*>").expect("valid declaration regex"))
}

/// Remove `<style>`, `<script>`, `<head>` blocks and comments
pub fn remove_junk_blocks(html: &str) -> String {
    junk_block_regex().replace_all(html, "").into_owned()
}

/// Remove 1x1 images, hidden images and base64 data-URI images
pub fn remove_tracking_pixels(html: &str) -> String {
    img_regex()
        .replace_all(html, |caps: &Captures<'_>| {
            if is_tracking_pixel(&caps[0]) {
                String::new()
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

fn is_tracking_pixel(tag: &str) -> bool {
    let attrs = attributes(tag);
    let get = |name: &str| {
        attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    };

    let tiny = |value: Option<&str>| {
        value
            .map(|v| v.trim().trim_end_matches("px").trim())
            .and_then(|v| v.parse::<f32>().ok())
            .is_some_and(|n| n <= 1.0)
    };
    if tiny(get("width")) && tiny(get("height")) {
        return true;
    }

    if let Some(style) = get("style") {
        let style: String = style.to_lowercase().chars().filter(|c| !c.is_whitespace()).collect();
        if style.contains("display:none") || style.contains("visibility:hidden") {
            return true;
        }
        if (style.contains("width:1px") || style.contains("width:0"))
            && (style.contains("height:1px") || style.contains("height:0"))
        {
            return true;
        }
    }

    get("src").is_some_and(|src| src.trim().to_lowercase().starts_with("data:"))
}

/// Parse the attributes of a single tag into lowercase name/value pairs
pub fn attributes(tag: &str) -> Vec<(String, String)> {
    attr_regex()
        .captures_iter(tag)
        .map(|caps| {
            let name = caps[1].to_lowercase();
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            (name, value)
        })
        .collect()
}

/// Remove every tag and markup declaration, keeping text content
pub fn strip_tags(html: &str) -> String {
    let without_decls = markup_decl_regex().replace_all(html, "");
    tag_regex().replace_all(&without_decls, "").into_owned()
}

const SAFE_TAGS: &[&str] = &[
    "a", "b", "blockquote", "br", "code", "div", "em", "h1", "h2", "h3", "h4", "h5", "h6", "hr",
    "i", "li", "ol", "p", "pre", "s", "span", "strong", "sub", "sup", "table", "tbody", "td",
    "th", "thead", "tr", "u", "ul",
];

const VOID_TAGS: &[&str] = &["br", "hr"];

/// Whether an href is safe to keep in rendered HTML
pub fn is_safe_href(href: &str) -> bool {
    let lower = href.trim().to_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("mailto:")
}

/// Scrub HTML down to a small set of formatting tags
///
/// Scripts, styles, comments, tracking pixels, unknown tags and every
/// attribute except a safe `href` on anchors are removed.
pub fn sanitize_html(html: &str) -> String {
    let cleaned = remove_tracking_pixels(&remove_junk_blocks(html));
    let cleaned = markup_decl_regex().replace_all(&cleaned, "");

    let rebuilt = tag_regex().replace_all(&cleaned, |caps: &Captures<'_>| {
        let closing = !caps[1].is_empty();
        let name = caps[2].to_lowercase();
        if !SAFE_TAGS.contains(&name.as_str()) {
            return String::new();
        }
        if closing {
            return if VOID_TAGS.contains(&name.as_str()) {
                String::new()
            } else {
                format!("</{}>", name)
            };
        }
        if name == "a" {
            let href = attributes(&caps[3])
                .into_iter()
                .find(|(k, _)| k == "href")
                .map(|(_, v)| decode_entities(&v))
                .filter(|v| is_safe_href(v));
            return match href {
                Some(href) => format!("<a href=\"{}\">", escape_html(href.trim())),
                None => "<a>".to_string(),
            };
        }
        format!("<{}>", name)
    });

    // Stray angle brackets between the tags we emitted are text
    let mut out = String::with_capacity(rebuilt.len());
    let mut last = 0;
    for m in tag_regex().find_iter(&rebuilt) {
        out.push_str(&escape_angles(&rebuilt[last..m.start()]));
        out.push_str(m.as_str());
        last = m.end();
    }
    out.push_str(&escape_angles(&rebuilt[last..]));
    out.trim().to_string()
}

fn escape_angles(text: &str) -> String {
    text.replace('<', "&lt;").replace('>', "&gt;")
}
