use std::sync::Arc;

use kuchiki::NodeRef;

use crate::document::{is_tag, serialize_svg_element, serialize_svg_node_with};
use crate::normalize::clean_paint;
use crate::session::ExtractionSession;
use crate::sprite::{discover_sprite_urls, spawn_enrichment};

const COMPUTED_PAINT: &[&str] = &[
    "fill",
    "fill-opacity",
    "fill-rule",
    "stroke",
    "stroke-width",
    "stroke-linecap",
    "stroke-linejoin",
    "stroke-dasharray",
    "stroke-opacity",
    "opacity",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackTier {
    RenderedSerialize,
    ComputedStyleSerialize,
}

impl FallbackTier {
    pub fn as_str(self) -> &'static str {
        match self {
            FallbackTier::RenderedSerialize => "rendered_serialize",
            FallbackTier::ComputedStyleSerialize => "computed_style_serialize",
        }
    }
}

pub(crate) struct Recovery {
    pub content: String,
    pub tier: FallbackTier,
    pub sprites_scheduled: usize,
}

// Background enrichment is scheduled on the way but never awaited.
pub(crate) fn recover(
    session: &ExtractionSession<'_>,
    element: &NodeRef,
    unresolved: &[String],
) -> Option<Recovery> {
    let svg = if is_tag(element, "svg") {
        element.clone()
    } else {
        session.document.closest(element, "svg")?
    };

    if let Some(content) = rendered_serialize(session, &svg, unresolved) {
        return Some(Recovery {
            content,
            tier: FallbackTier::RenderedSerialize,
            sprites_scheduled: 0,
        });
    }

    let sprites_scheduled = schedule_enrichment(session, unresolved);

    Some(Recovery {
        content: computed_style_serialize(session, &svg),
        tier: FallbackTier::ComputedStyleSerialize,
        sprites_scheduled,
    })
}

fn rendered_serialize(
    session: &ExtractionSession<'_>,
    svg: &NodeRef,
    unresolved: &[String],
) -> Option<String> {
    let definitions: Vec<NodeRef> = unresolved
        .iter()
        .filter_map(|id| session.document.find_in_closed_roots(id))
        .collect();
    if definitions.is_empty() {
        return None;
    }

    let styles = session.styles;
    let paint_use = |node: &NodeRef, tag: &str| {
        if tag != "use" {
            return None;
        }
        let mut attrs = Vec::new();
        if let Some(fill) = styles.computed_fill(node) {
            attrs.push(("fill".to_string(), clean_paint(&fill)));
        }
        if let Some(stroke) = styles.computed_stroke(node) {
            attrs.push(("stroke".to_string(), clean_paint(&stroke)));
        }
        Some(attrs)
    };
    let markup = serialize_svg_node_with(svg, &paint_use);
    let body = markup.strip_suffix("</svg>")?;

    let mut out = String::with_capacity(markup.len() + 64);
    out.push_str(body);
    out.push_str("<defs>");
    for definition in &definitions {
        out.push_str(&serialize_svg_element(definition));
    }
    out.push_str("</defs></svg>");
    Some(out)
}

fn schedule_enrichment(session: &ExtractionSession<'_>, unresolved: &[String]) -> usize {
    if !session.options.sprite_enrichment || unresolved.is_empty() {
        return 0;
    }
    let Some(fetcher) = session.fetcher.as_ref() else {
        return 0;
    };
    let mut urls = discover_sprite_urls(session.document);
    for known in session.sprites.known_urls() {
        if !urls.contains(&known) {
            urls.push(known);
        }
    }
    if urls.is_empty() {
        return 0;
    }
    spawn_enrichment(
        Arc::clone(fetcher),
        session.sprites.clone(),
        urls,
        unresolved.to_vec(),
    )
}

pub(crate) fn computed_style_serialize(session: &ExtractionSession<'_>, svg: &NodeRef) -> String {
    let styles = session.styles;
    let with_paint = |node: &NodeRef, _tag: &str| {
        let attrs: Vec<(String, String)> = COMPUTED_PAINT
            .iter()
            .filter_map(|property| {
                let value = styles.computed(node, property)?;
                let value = if property == &"fill" || property == &"stroke" {
                    clean_paint(&value)
                } else {
                    value
                };
                Some((property.to_string(), value))
            })
            .collect();
        Some(attrs)
    };
    serialize_svg_node_with(svg, &with_paint)
}
