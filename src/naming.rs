use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use kuchiki::NodeRef;
use regex::Regex;

use crate::document::{element_children, is_tag, non_empty_attr};
use crate::source::SourceDescriptor;

const MAX_NAME_LEN: usize = 50;
const MAX_TITLE_LEN: usize = 30;

const NAME_ATTRIBUTES: &[&str] = &[
    "data-icon-id",
    "data-lucide",
    "data-feather",
    "data-icon",
    "data-name",
];

// Icon-library naming conventions, tried in order against each text source.
const ICON_PATTERNS: &[&str] = &[
    r"(?i)fa[srb]?\s+fa-([a-z0-9-]+)",
    r"(?i)fa-([a-z0-9-]+)",
    r"(?i)lucide-([a-z0-9-]+)",
    r"(?i)feather-([a-z0-9-]+)",
    r"(?i)bi-([a-z0-9-]+)",
    r"(?i)hero(?:icon)?-([a-z0-9-]+)",
    r"(?i)material-icons?[_-]([a-z0-9-]+)",
    r"(?i)icon-([a-z0-9-]+)",
    r"(?i)([a-z0-9-]+)-icon",
    r"(?i)^([a-z0-9-]+)[-_]icon$",
    r"(?i)^icon[-_]([a-z0-9-]+)$",
];

const UTILITY_WORDS: &[&str] = &[
    "svg", "icon", "inline", "block", "flex", "hidden", "w", "h", "mr", "ml", "mt", "mb", "p",
    "text",
];

fn icon_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        ICON_PATTERNS
            .iter()
            .filter_map(|pattern| Regex::new(pattern).ok())
            .collect()
    })
}

pub fn derive_name(element: &NodeRef) -> Option<String> {
    for attribute in NAME_ATTRIBUTES {
        if let Some(name) = non_empty_attr(element, attribute).and_then(|v| sanitize_name(&v)) {
            return Some(name);
        }
    }

    let title = title_text(element);
    let class = non_empty_attr(element, "class");
    let sources = [
        non_empty_attr(element, "id"),
        non_empty_attr(element, "aria-label"),
        title.clone(),
        class.clone(),
    ];
    for source in sources.iter().flatten() {
        for pattern in icon_patterns() {
            let captured = pattern
                .captures(source)
                .and_then(|caps| caps.get(1))
                .and_then(|m| sanitize_name(m.as_str()));
            if captured.is_some() {
                return captured;
            }
        }
    }

    if let Some(name) = title.and_then(|t| sanitize_name(&t)) {
        return Some(name);
    }

    class.as_deref().and_then(class_token)
}

fn title_text(element: &NodeRef) -> Option<String> {
    let title = element_children(element).find(|child| is_tag(child, "title"))?;
    let text = title.text_contents().trim().to_string();
    if text.is_empty() || text.chars().count() >= MAX_TITLE_LEN {
        return None;
    }
    Some(text)
}

fn class_token(class: &str) -> Option<String> {
    class
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|token| token.len() > 2)
        .filter(|token| !UTILITY_WORDS.contains(&token.to_ascii_lowercase().as_str()))
        .filter(|token| !token.starts_with(|c: char| c.is_ascii_digit()))
        .find_map(sanitize_name)
}

pub fn sanitize_name(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.to_lowercase().chars() {
        let ch = if ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_' {
            ch
        } else {
            '-'
        };
        if ch == '-' && out.ends_with('-') {
            continue;
        }
        out.push(ch);
    }
    let trimmed = out.trim_matches('-');
    let truncated: String = trimmed.chars().take(MAX_NAME_LEN).collect();
    if truncated.is_empty() {
        None
    } else {
        Some(truncated)
    }
}

pub fn resolve_name(descriptor: &SourceDescriptor) -> String {
    derive_name(&descriptor.element)
        .or_else(|| descriptor.fragment.as_deref().and_then(sanitize_name))
        .or_else(|| descriptor.url().and_then(url_stem))
        .unwrap_or_else(timestamp_name)
}

fn url_stem(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next()?;
    let file = path.rsplit('/').next()?;
    let lower = file.to_ascii_lowercase();
    let stem = [".svg", ".png", ".jpg", ".jpeg"]
        .iter()
        .find_map(|ext| lower.strip_suffix(ext).map(|s| &file[..s.len()]))
        .unwrap_or(file);
    let decoded = percent_encoding::percent_decode_str(stem).decode_utf8_lossy();
    sanitize_name(&decoded)
}

fn timestamp_name() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("svg-icon-{millis}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Payload, SourceKind};
    use kuchiki::traits::TendrilSink;

    fn element(html: &str) -> NodeRef {
        let doc = kuchiki::parse_html().one(html);
        doc.select_first("#t").expect("fixture").as_node().clone()
    }

    fn name_of(html: &str) -> Option<String> {
        derive_name(&element(html))
    }

    #[test]
    fn data_attribute_beats_class_pattern() {
        assert_eq!(
            name_of(r#"<i id="t" data-icon="home-solid" class="fa fa-star"></i>"#).as_deref(),
            Some("home-solid")
        );
        assert_eq!(
            name_of(r#"<i id="t" data-lucide="Arrow Right" data-icon="x"></i>"#).as_deref(),
            Some("arrow-right")
        );
    }

    #[test]
    fn library_patterns_in_order() {
        assert_eq!(name_of(r#"<i id="t" class="fas fa-user-circle"></i>"#).as_deref(), Some("user-circle"));
        assert_eq!(name_of(r#"<svg id="t" class="lucide lucide-bell"></svg>"#).as_deref(), Some("bell"));
        assert_eq!(name_of(r#"<i id="t" class="bi bi-trash3"></i>"#).as_deref(), Some("trash3"));
        assert_eq!(name_of(r#"<span id="t" class="material-icons_search"></span>"#).as_deref(), Some("search"));
        assert_eq!(name_of(r#"<svg id="t" class="cart-icon"></svg>"#).as_deref(), Some("cart"));
        assert_eq!(name_of(r#"<svg id="t" aria-label="icon-download"></svg>"#).as_deref(), Some("download"));
    }

    #[test]
    fn class_token_fallback_skips_utility_words() {
        assert_eq!(
            name_of(r#"<svg id="t" class="w-6 h-6 inline-block 2xl shrink logo"></svg>"#).as_deref(),
            Some("shrink")
        );
        assert_eq!(name_of(r#"<svg id="t" class="w-4 h-4 mr-2"></svg>"#), None);
    }

    #[test]
    fn short_title_ranks_above_class_words() {
        assert_eq!(
            name_of(r#"<svg id="t"><title>Close dialog</title></svg>"#).as_deref(),
            Some("close-dialog")
        );
        assert_eq!(
            name_of(r#"<svg id="t" class="brand-logo"><title>Close</title></svg>"#).as_deref(),
            Some("close")
        );
        assert_eq!(
            name_of(r#"<svg id="t" class="brand-logo"><title>A very long descriptive title for screen readers</title></svg>"#)
                .as_deref(),
            Some("brand")
        );
        assert_eq!(
            name_of(r#"<svg id="t"><title>A very long descriptive title for screen readers</title></svg>"#),
            None
        );
    }

    #[test]
    fn sanitizes_and_truncates() {
        assert_eq!(sanitize_name("My Icon!! (v2)").as_deref(), Some("my-icon-v2"));
        assert_eq!(sanitize_name("--a__b--").as_deref(), Some("a__b"));
        assert_eq!(sanitize_name("!!!"), None);
        let long = "a".repeat(100);
        assert_eq!(sanitize_name(&long).map(|n| n.len()), Some(50));
    }

    #[test]
    fn resolve_name_uses_url_stem_then_timestamp() {
        let img = element(r#"<img id="t" src="x">"#);
        let by_url = SourceDescriptor {
            kind: SourceKind::Image,
            payload: Payload::Url("https://cdn.test/assets/Brand%20Logo.SVG?v=3".to_string()),
            element: img.clone(),
            fragment: None,
        };
        assert_eq!(resolve_name(&by_url), "brand-logo");

        let sprite = SourceDescriptor {
            kind: SourceKind::Sprite,
            payload: Payload::Url("https://cdn.test/sprite.svg".to_string()),
            element: img.clone(),
            fragment: Some("icon_Cart".to_string()),
        };
        assert_eq!(resolve_name(&sprite), "icon_cart");

        let inline = SourceDescriptor {
            kind: SourceKind::Inline,
            payload: Payload::Content("<svg/>".to_string()),
            element: img,
            fragment: None,
        };
        assert!(resolve_name(&inline).starts_with("svg-icon-"));
    }
}
