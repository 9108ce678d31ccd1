use std::sync::OnceLock;

use kuchiki::NodeRef;
use regex::Regex;

use crate::datauri::{decode_svg_data_uri, is_svg_data_uri};
use crate::document::{element_children, href, is_tag, non_empty_attr, serialize_svg_node, tag_name};
use crate::locate::points_to_svg_file;
use crate::normalize::{loses_content, normalize};
use crate::session::ExtractionSession;
use crate::style::PseudoTarget;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CssSource {
    BackgroundImage,
    Mask,
    ClipPath,
    Cursor,
    BorderImage,
    Filter,
    ListStyleImage,
    ShapeOutside,
}

impl CssSource {
    pub const ALL: [CssSource; 8] = [
        CssSource::BackgroundImage,
        CssSource::Mask,
        CssSource::ClipPath,
        CssSource::Cursor,
        CssSource::BorderImage,
        CssSource::Filter,
        CssSource::ListStyleImage,
        CssSource::ShapeOutside,
    ];

    // Longhand first, then the shorthands that can carry the same `url()`.
    fn properties(self) -> &'static [&'static str] {
        match self {
            CssSource::BackgroundImage => &["background-image", "background"],
            CssSource::Mask => &["mask-image", "mask", "-webkit-mask-image", "-webkit-mask"],
            CssSource::ClipPath => &["clip-path"],
            CssSource::Cursor => &["cursor"],
            CssSource::BorderImage => &["border-image-source", "border-image"],
            CssSource::Filter => &["filter"],
            CssSource::ListStyleImage => &["list-style-image", "list-style"],
            CssSource::ShapeOutside => &["shape-outside"],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CssSource::BackgroundImage => "background-image",
            CssSource::Mask => "mask",
            CssSource::ClipPath => "clip-path",
            CssSource::Cursor => "cursor",
            CssSource::BorderImage => "border-image",
            CssSource::Filter => "filter",
            CssSource::ListStyleImage => "list-style-image",
            CssSource::ShapeOutside => "shape-outside",
        }
    }
}

const PSEUDO_PROPERTIES: &[&str] = &[
    "content",
    "background-image",
    "background",
    "mask-image",
    "mask",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Inline,
    UseResolved,
    Image,
    DataUri,
    Object,
    Embed,
    Picture,
    Iframe,
    Css(CssSource),
    PseudoElement(PseudoTarget),
    Sprite,
}

impl SourceKind {
    pub fn label(self) -> String {
        match self {
            SourceKind::Inline => "inline".to_string(),
            SourceKind::UseResolved => "use".to_string(),
            SourceKind::Image => "img".to_string(),
            SourceKind::DataUri => "data-uri".to_string(),
            SourceKind::Object => "object".to_string(),
            SourceKind::Embed => "embed".to_string(),
            SourceKind::Picture => "picture".to_string(),
            SourceKind::Iframe => "iframe".to_string(),
            SourceKind::Css(css) => format!("css:{}", css.as_str()),
            SourceKind::PseudoElement(target) => format!("pseudo:{}", target.as_str()),
            SourceKind::Sprite => "sprite".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Content(String),
    Url(String),
}

#[derive(Debug, Clone)]
pub struct SourceDescriptor {
    pub kind: SourceKind,
    pub payload: Payload,
    pub element: NodeRef,
    pub fragment: Option<String>,
}

impl SourceDescriptor {
    fn new(kind: SourceKind, payload: Payload, element: &NodeRef) -> Self {
        Self {
            kind,
            payload,
            element: element.clone(),
            fragment: None,
        }
    }

    pub fn content(&self) -> Option<&str> {
        match &self.payload {
            Payload::Content(content) => Some(content),
            Payload::Url(_) => None,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match &self.payload {
            Payload::Url(url) => Some(url),
            Payload::Content(_) => None,
        }
    }
}

pub fn classify(session: &ExtractionSession<'_>, element: &NodeRef) -> Option<SourceDescriptor> {
    let tag = tag_name(element)?;
    let by_tag = match tag.as_str() {
        "svg" => classify_inline(session, element),
        "use" => classify_use(session, element),
        "img" => return classify_image(session, element).or_else(|| classify_css(session, element)),
        "object" => attr_reference(session, element, "data", SourceKind::Object),
        "embed" => attr_reference(session, element, "src", SourceKind::Embed),
        "iframe" => attr_reference(session, element, "src", SourceKind::Iframe),
        "picture" => classify_picture(session, element),
        _ => session
            .document
            .closest(element, "svg")
            .and_then(|svg| classify_inline(session, &svg)),
    };
    by_tag.or_else(|| classify_css(session, element))
}

pub(crate) fn references_svg(session: &ExtractionSession<'_>, element: &NodeRef) -> bool {
    let tag_reference = match tag_name(element).as_deref() {
        Some("img") => non_empty_attr(element, "src"),
        Some("object") => non_empty_attr(element, "data"),
        Some("embed") | Some("iframe") => non_empty_attr(element, "src"),
        Some("picture") => picture_candidate(element),
        _ => None,
    };
    if tag_reference
        .map(|r| is_svg_data_uri(&r) || points_to_svg_file(&r))
        .unwrap_or(false)
    {
        return true;
    }
    css_candidates(session, element).next().is_some()
}

fn classify_inline(session: &ExtractionSession<'_>, svg: &NodeRef) -> Option<SourceDescriptor> {
    if let Some(external) = external_use(svg) {
        if let Some(mut descriptor) = classify_use(session, &external) {
            descriptor.element = svg.clone();
            return Some(descriptor);
        }
    }
    if has_local_use(svg) && !loses_content(session, svg) {
        match normalize(session, svg) {
            Ok(doc) if !doc.is_empty() => {
                return Some(SourceDescriptor::new(
                    SourceKind::UseResolved,
                    Payload::Content(doc.to_markup()),
                    svg,
                ));
            }
            Ok(_) => log::debug!("<use> expansion produced no shapes"),
            Err(err) => log::debug!("<use> expansion incomplete: {err}"),
        }
    }
    Some(SourceDescriptor::new(
        SourceKind::Inline,
        Payload::Content(serialize_svg_node(svg)),
        svg,
    ))
}

pub(crate) fn external_use(element: &NodeRef) -> Option<NodeRef> {
    element.inclusive_descendants().filter(|n| is_tag(n, "use")).find(|n| {
        href(n)
            .map(|h| !h.starts_with('#') && points_to_svg_file(&h))
            .unwrap_or(false)
    })
}

pub(crate) fn has_local_use(svg: &NodeRef) -> bool {
    svg.descendants()
        .filter(|n| is_tag(n, "use"))
        .any(|n| href(&n).map(|h| h.starts_with('#')).unwrap_or(false))
}

fn classify_use(session: &ExtractionSession<'_>, use_el: &NodeRef) -> Option<SourceDescriptor> {
    let reference = href(use_el)?;
    if !reference.starts_with('#') && points_to_svg_file(&reference) {
        return url_descriptor(session, use_el, SourceKind::Sprite, &reference);
    }
    let svg = session.document.closest(use_el, "svg")?;
    classify_inline(session, &svg)
}

fn classify_image(session: &ExtractionSession<'_>, img: &NodeRef) -> Option<SourceDescriptor> {
    let src = non_empty_attr(img, "src")?;
    if is_svg_data_uri(&src) {
        return data_descriptor(img, SourceKind::DataUri, &src);
    }
    if points_to_svg_file(&src) {
        return url_descriptor(session, img, SourceKind::Image, &src);
    }
    None
}

fn attr_reference(
    session: &ExtractionSession<'_>,
    element: &NodeRef,
    attribute: &str,
    kind: SourceKind,
) -> Option<SourceDescriptor> {
    let value = non_empty_attr(element, attribute)?;
    if is_svg_data_uri(&value) {
        return data_descriptor(element, kind, &value);
    }
    if points_to_svg_file(&value) || is_svg_mime(element) {
        return url_descriptor(session, element, kind, &value);
    }
    None
}

fn is_svg_mime(element: &NodeRef) -> bool {
    non_empty_attr(element, "type")
        .map(|t| t.to_ascii_lowercase().contains("svg"))
        .unwrap_or(false)
}

fn classify_picture(
    session: &ExtractionSession<'_>,
    picture: &NodeRef,
) -> Option<SourceDescriptor> {
    let candidate = picture_candidate(picture)?;
    if is_svg_data_uri(&candidate) {
        return data_descriptor(picture, SourceKind::Picture, &candidate);
    }
    url_descriptor(session, picture, SourceKind::Picture, &candidate)
}

// First `<source>` candidate typed or named as SVG, else the fallback `<img>`.
fn picture_candidate(picture: &NodeRef) -> Option<String> {
    for child in element_children(picture) {
        if is_tag(&child, "source") {
            let Some(srcset) = non_empty_attr(&child, "srcset") else {
                continue;
            };
            let first = first_srcset_url(&srcset)?;
            if is_svg_mime(&child) || points_to_svg_file(&first) || is_svg_data_uri(&first) {
                return Some(first);
            }
        } else if is_tag(&child, "img") {
            if let Some(src) = non_empty_attr(&child, "src") {
                if points_to_svg_file(&src) || is_svg_data_uri(&src) {
                    return Some(src);
                }
            }
        }
    }
    None
}

fn first_srcset_url(srcset: &str) -> Option<String> {
    let trimmed = srcset.trim();
    if is_svg_data_uri(trimmed) {
        return trimmed.split_whitespace().next().map(|s| s.to_string());
    }
    trimmed
        .split(',')
        .next()
        .and_then(|candidate| candidate.split_whitespace().next())
        .map(|s| s.to_string())
}

fn classify_css(session: &ExtractionSession<'_>, element: &NodeRef) -> Option<SourceDescriptor> {
    for (kind, url) in css_candidates(session, element) {
        let descriptor = if is_svg_data_uri(&url) {
            data_descriptor(element, kind, &url)
        } else {
            url_descriptor(session, element, kind, &url)
        };
        if descriptor.is_some() {
            return descriptor;
        }
    }
    None
}

fn css_candidates<'s>(
    session: &'s ExtractionSession<'_>,
    element: &'s NodeRef,
) -> impl Iterator<Item = (SourceKind, String)> + 's {
    let own = CssSource::ALL.into_iter().flat_map(move |source| {
        source.properties().iter().filter_map(move |property| {
            let value = session.styles.computed(element, property)?;
            svg_url_in(&value).map(|url| (SourceKind::Css(source), url))
        })
    });
    let pseudo = [PseudoTarget::Before, PseudoTarget::After]
        .into_iter()
        .flat_map(move |target| {
            PSEUDO_PROPERTIES.iter().filter_map(move |property| {
                let value = session.styles.pseudo(element, target, property)?;
                svg_url_in(&value).map(|url| (SourceKind::PseudoElement(target), url))
            })
        });
    own.chain(pseudo)
}

fn css_url_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^)"'\s]*))\s*\)"#).ok()
    })
    .as_ref()
}

// First `url()` in a CSS value that targets SVG; a data URI beats a file URL.
pub(crate) fn svg_url_in(value: &str) -> Option<String> {
    let mut file_url = None;
    for caps in css_url_regex()?.captures_iter(value) {
        let Some(raw) = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)) else {
            continue;
        };
        let raw = raw.as_str().trim();
        if is_svg_data_uri(raw) {
            return Some(raw.to_string());
        }
        if file_url.is_none() && points_to_svg_file(raw) {
            file_url = Some(raw.to_string());
        }
    }
    file_url
}

fn data_descriptor(element: &NodeRef, kind: SourceKind, uri: &str) -> Option<SourceDescriptor> {
    match decode_svg_data_uri(uri) {
        Ok(content) => Some(SourceDescriptor::new(kind, Payload::Content(content), element)),
        Err(err) => {
            log::warn!("dropping {} source: {err}", kind.label());
            None
        }
    }
}

fn url_descriptor(
    session: &ExtractionSession<'_>,
    element: &NodeRef,
    kind: SourceKind,
    raw: &str,
) -> Option<SourceDescriptor> {
    let resolved = session.document.resolve_url(raw);
    let (url, fragment) = match resolved.split_once('#') {
        Some((url, fragment)) => (url.to_string(), Some(fragment.to_string())),
        None => (resolved, None),
    };
    if url.is_empty() {
        return None;
    }
    let mut descriptor = SourceDescriptor::new(kind, Payload::Url(url), element);
    descriptor.fragment = fragment.filter(|f| !f.is_empty());
    Some(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::HostDocument;
    use crate::session::ExtractOptions;
    use crate::style::CascadeResolver;
    use base64::Engine;

    fn classify_in(html: &str, selector: &str) -> Option<SourceDescriptor> {
        let doc = HostDocument::parse_html(html)
            .with_base_url("https://example.com/app/")
            .unwrap();
        let styles = CascadeResolver::new(&doc);
        let session = ExtractionSession::new(&doc, &styles, ExtractOptions::default(), 1);
        let element = doc.select_first(selector).expect("fixture element");
        classify(&session, &element)
    }

    #[test]
    fn plain_inline_svg_is_serialized() {
        let d = classify_in(r##"<svg id="s" viewBox="0 0 4 4"><rect width="4" height="4"/></svg>"##, "#s")
            .unwrap();
        assert_eq!(d.kind, SourceKind::Inline);
        let content = d.content().unwrap();
        assert!(content.starts_with("<svg"), "{content}");
        assert!(content.contains("<rect"), "{content}");
    }

    #[test]
    fn svg_with_local_use_is_resolved_before_serializing() {
        let d = classify_in(
            r##"<svg style="display:none"><symbol id="x" viewBox="0 0 10 10"><circle cx="5" cy="5" r="4"/></symbol></svg>
               <svg id="s"><use href="#x"/></svg>"##,
            "#s",
        )
        .unwrap();
        assert_eq!(d.kind, SourceKind::UseResolved);
        let content = d.content().unwrap();
        assert!(content.contains("<circle"), "{content}");
        assert!(!content.contains("<use"), "{content}");
    }

    #[test]
    fn use_with_gradient_paint_is_not_rebuilt() {
        let d = classify_in(
            r##"<svg style="display:none"><symbol id="x" viewBox="0 0 10 10"><circle cx="5" cy="5" r="4"/></symbol></svg>
               <svg id="s"><defs><linearGradient id="g"><stop offset="0" stop-color="red"/></linearGradient></defs><use href="#x" fill="url(#g)"/></svg>"##,
            "#s",
        )
        .unwrap();
        assert_eq!(d.kind, SourceKind::Inline);
        let content = d.content().unwrap().to_ascii_lowercase();
        assert!(content.contains("<lineargradient id=\"g\""), "{content}");

        let d = classify_in(
            r##"<svg style="display:none"><symbol id="x"><text>A</text></symbol></svg>
               <svg id="s"><use href="#x"/></svg>"##,
            "#s",
        )
        .unwrap();
        assert_eq!(d.kind, SourceKind::Inline);
    }

    #[test]
    fn img_data_uri_is_decoded_and_bad_data_is_dropped() {
        let b64 = base64::engine::general_purpose::STANDARD.encode("<svg/>");
        let html = format!(
            r##"<img id="good" src="data:image/svg+xml;base64,{b64}"><img id="bad" src="data:image/svg+xml;base64,%%%">"##
        );
        let d = classify_in(&html, "#good").unwrap();
        assert_eq!(d.kind, SourceKind::DataUri);
        assert_eq!(d.content(), Some("<svg/>"));
        assert!(classify_in(&html, "#bad").is_none());
    }

    #[test]
    fn img_url_is_resolved_but_not_fetched() {
        let d = classify_in(r##"<img id="i" src="../icons/home.svg">"##, "#i").unwrap();
        assert_eq!(d.kind, SourceKind::Image);
        assert_eq!(d.url(), Some("https://example.com/icons/home.svg"));
    }

    #[test]
    fn object_embed_iframe_and_picture() {
        let html = r##"
            <object id="o" data="/a.svg" type="image/svg+xml"></object>
            <embed id="e" src="/b.svg">
            <iframe id="f" src="/c.svg"></iframe>
            <picture id="p"><source srcset="/d.webp 1x" type="image/webp"><source srcset="/d.svg 1x, /d2.svg 2x"><img src="/d.png"></picture>
        "##;
        assert_eq!(classify_in(html, "#o").unwrap().kind, SourceKind::Object);
        assert_eq!(classify_in(html, "#e").unwrap().kind, SourceKind::Embed);
        assert_eq!(classify_in(html, "#f").unwrap().kind, SourceKind::Iframe);
        let picture = classify_in(html, "#p").unwrap();
        assert_eq!(picture.kind, SourceKind::Picture);
        assert_eq!(picture.url(), Some("https://example.com/d.svg"));
    }

    #[test]
    fn external_use_is_a_sprite_reference() {
        let d = classify_in(
            r##"<svg><use id="u" href="/static/sprite.svg#icon-cart"/></svg>"##,
            "#u",
        )
        .unwrap();
        assert_eq!(d.kind, SourceKind::Sprite);
        assert_eq!(d.url(), Some("https://example.com/static/sprite.svg"));
        assert_eq!(d.fragment.as_deref(), Some("icon-cart"));
    }

    #[test]
    fn svg_wrapping_an_external_use_is_a_sprite_reference() {
        let d = classify_in(
            r##"<svg id="s" class="icon-cart"><use href="sprite.svg#cart"/></svg>"##,
            "#s",
        )
        .unwrap();
        assert_eq!(d.kind, SourceKind::Sprite);
        assert_eq!(d.url(), Some("https://example.com/app/sprite.svg"));
        assert_eq!(d.fragment.as_deref(), Some("cart"));
        assert!(is_tag(&d.element, "svg"));
    }

    #[test]
    fn css_properties_are_checked_in_order() {
        let html = r##"<html><head><style>
            .a { cursor: url(/cur.svg), auto; mask-image: url(/mask.svg); }
            .b { list-style-image: url('/bullet.svg'); }
            .c::after { content: url("/after.svg"); }
        </style></head><body>
            <div id="a" class="a"></div><ul id="b" class="b"></ul><span id="c" class="c"></span>
        </body></html>"##;
        let a = classify_in(html, "#a").unwrap();
        assert_eq!(a.kind, SourceKind::Css(CssSource::Mask));
        assert_eq!(a.url(), Some("https://example.com/mask.svg"));
        let b = classify_in(html, "#b").unwrap();
        assert_eq!(b.kind, SourceKind::Css(CssSource::ListStyleImage));
        let c = classify_in(html, "#c").unwrap();
        assert_eq!(c.kind, SourceKind::PseudoElement(PseudoTarget::After));
    }

    #[test]
    fn data_uri_preferred_over_file_url_in_one_value() {
        let value = r#"url("/fallback.svg"), url("data:image/svg+xml,%3Csvg%2F%3E")"#;
        assert_eq!(
            svg_url_in(value).as_deref(),
            Some("data:image/svg+xml,%3Csvg%2F%3E")
        );
        assert_eq!(svg_url_in("url(#clip)"), None);
        assert_eq!(svg_url_in("url(/img/a.png)"), None);
        assert_eq!(svg_url_in("url(a.svg)").as_deref(), Some("a.svg"));
    }

    #[test]
    fn plain_div_is_not_a_source() {
        assert!(classify_in(r##"<div id="d"><span>text</span></div>"##, "#d").is_none());
    }
}
