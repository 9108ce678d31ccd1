use kuchiki::NodeRef;

use crate::datauri::is_svg_data_uri;
use crate::document::{descendants_breadth_first, element_children, is_tag, non_empty_attr};
use crate::session::ExtractionSession;
use crate::source::references_svg;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x && y >= self.y && x < self.x + self.width && y < self.y + self.height
    }
}

// Topmost-element-at-point query. `skip` marks elements that must be treated as
// transparent to the pointer.
pub trait HitTester {
    fn element_at(&self, x: f32, y: f32, skip: &dyn Fn(&NodeRef) -> bool) -> Option<NodeRef>;
}

// Caller-supplied border boxes in paint order (later boxes paint on top).
#[derive(Default)]
pub struct BoxLayout {
    boxes: Vec<(NodeRef, Rect)>,
}

impl BoxLayout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, node: NodeRef, rect: Rect) {
        self.boxes.push((node, rect));
    }

    pub fn bounds(&self, node: &NodeRef) -> Option<Rect> {
        self.boxes
            .iter()
            .rev()
            .find(|(candidate, _)| candidate == node)
            .map(|(_, rect)| *rect)
    }
}

impl HitTester for BoxLayout {
    fn element_at(&self, x: f32, y: f32, skip: &dyn Fn(&NodeRef) -> bool) -> Option<NodeRef> {
        self.boxes
            .iter()
            .rev()
            .filter(|(_, rect)| rect.contains(x, y))
            .map(|(node, _)| node)
            .find(|node| !skip(node))
            .cloned()
    }
}

const CAPTURE_UI_ID: &str = "svag-action-popup";
const CAPTURE_UI_CLASS: &str = "svag-notification";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocateStep {
    Target,
    Ancestor,
    HitTest,
    Descendant,
    DescendantImage,
    Sibling,
    BoundedScan,
    CssSource,
}

impl LocateStep {
    pub fn as_str(self) -> &'static str {
        match self {
            LocateStep::Target => "target",
            LocateStep::Ancestor => "ancestor",
            LocateStep::HitTest => "hit_test",
            LocateStep::Descendant => "descendant",
            LocateStep::DescendantImage => "descendant_image",
            LocateStep::Sibling => "sibling",
            LocateStep::BoundedScan => "bounded_scan",
            LocateStep::CssSource => "css_source",
        }
    }
}

pub fn locate(
    session: &ExtractionSession<'_>,
    x: f32,
    y: f32,
    target: &NodeRef,
) -> Option<NodeRef> {
    locate_with_step(session, x, y, target).map(|(node, _)| node)
}

pub(crate) fn locate_with_step(
    session: &ExtractionSession<'_>,
    x: f32,
    y: f32,
    target: &NodeRef,
) -> Option<(NodeRef, LocateStep)> {
    target.as_element()?;
    let document = session.document;
    if is_capture_ui(target) || document.ancestors(target).iter().any(is_capture_ui) {
        return None;
    }

    if is_tag(target, "svg") {
        return Some((target.clone(), LocateStep::Target));
    }

    if let Some(svg) = document.closest(target, "svg") {
        return Some((svg, LocateStep::Ancestor));
    }

    if let Some(hit_tester) = session.hit_tester {
        let skip = |node: &NodeRef| {
            node == target
                || node.ancestors().any(|a| &a == target)
                || session
                    .styles
                    .computed(node, "pointer-events")
                    .map(|v| v.eq_ignore_ascii_case("none"))
                    .unwrap_or(false)
        };
        if let Some(hit) = hit_tester.element_at(x, y, &skip) {
            if is_tag(&hit, "svg") {
                return Some((hit, LocateStep::HitTest));
            }
            if let Some(svg) = document.closest(&hit, "svg") {
                return Some((svg, LocateStep::HitTest));
            }
        }
    }

    let descendants = descendants_breadth_first(target);
    if let Some(svg) = descendants.iter().find(|n| is_tag(n, "svg")) {
        return Some((svg.clone(), LocateStep::Descendant));
    }

    if let Some(img) = descendants.iter().find(|n| is_svg_image(n)) {
        return Some((img.clone(), LocateStep::DescendantImage));
    }

    if let Some(parent) = target.parent() {
        if let Some(svg) = element_children(&parent).find(|n| is_tag(n, "svg")) {
            return Some((svg, LocateStep::Sibling));
        }
    }

    if let Some(svg) = bounded_scan(session, target) {
        return Some((svg, LocateStep::BoundedScan));
    }

    if references_svg(session, target) {
        return Some((target.clone(), LocateStep::CssSource));
    }

    None
}

fn bounded_scan(session: &ExtractionSession<'_>, target: &NodeRef) -> Option<NodeRef> {
    let limit = session.options.descendant_scan_limit;
    let mut stack: Vec<NodeRef> = Vec::new();
    let push_children = |node: &NodeRef, stack: &mut Vec<NodeRef>| {
        let mut children: Vec<NodeRef> = element_children(node).collect();
        if let Some(root) = session.document.open_shadow_root(node) {
            children.extend(element_children(&root.content));
        }
        stack.extend(children.into_iter().rev());
    };
    push_children(target, &mut stack);
    let mut visited = 0usize;
    while let Some(node) = stack.pop() {
        visited += 1;
        if visited > limit {
            break;
        }
        if is_tag(&node, "svg") {
            return Some(node);
        }
        push_children(&node, &mut stack);
    }
    None
}

fn is_svg_image(node: &NodeRef) -> bool {
    if !is_tag(node, "img") {
        return false;
    }
    non_empty_attr(node, "src")
        .map(|src| is_svg_data_uri(&src) || points_to_svg_file(&src))
        .unwrap_or(false)
}

pub(crate) fn points_to_svg_file(url: &str) -> bool {
    url.to_ascii_lowercase().contains(".svg")
}

fn is_capture_ui(node: &NodeRef) -> bool {
    if node.as_element().is_none() {
        return false;
    }
    if non_empty_attr(node, "id").as_deref() == Some(CAPTURE_UI_ID) {
        return true;
    }
    non_empty_attr(node, "class")
        .map(|class| class.split_whitespace().any(|c| c == CAPTURE_UI_CLASS))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::HostDocument;
    use crate::session::ExtractOptions;
    use crate::style::CascadeResolver;

    fn with_session<R>(html: &str, f: impl FnOnce(&HostDocument, &ExtractionSession<'_>) -> R) -> R {
        let doc = HostDocument::parse_html(html);
        let styles = CascadeResolver::new(&doc);
        let session = ExtractionSession::new(&doc, &styles, ExtractOptions::default(), 1);
        f(&doc, &session)
    }

    #[test]
    fn target_svg_and_ancestor_svg_win_first() {
        with_session(
            r##"<div id="wrap"><svg id="icon"><g><path id="p" d="M0 0"/></g></svg></div>"##,
            |doc, session| {
                let svg = doc.select_first("#icon").unwrap();
                let path = doc.select_first("#p").unwrap();
                let (found, step) = locate_with_step(session, 0.0, 0.0, &svg).unwrap();
                assert_eq!(found, svg);
                assert_eq!(step, LocateStep::Target);
                let (found, step) = locate_with_step(session, 0.0, 0.0, &path).unwrap();
                assert_eq!(found, svg);
                assert_eq!(step, LocateStep::Ancestor);
            },
        );
    }

    #[test]
    fn hit_test_looks_through_the_target() {
        let doc = HostDocument::parse_html(
            r##"<div id="under"><svg id="icon"><rect id="r" width="10" height="10"/></svg></div>
               <div id="overlay"></div>"##,
        );
        let styles = CascadeResolver::new(&doc);
        let overlay = doc.select_first("#overlay").unwrap();
        let rect = doc.select_first("#r").unwrap();
        let mut layout = BoxLayout::new();
        layout.push(rect.clone(), Rect::new(0.0, 0.0, 10.0, 10.0));
        layout.push(overlay.clone(), Rect::new(0.0, 0.0, 100.0, 100.0));
        let session = ExtractionSession::new(&doc, &styles, ExtractOptions::default(), 1)
            .with_hit_tester(&layout);

        let (found, step) = locate_with_step(&session, 5.0, 5.0, &overlay).unwrap();
        assert_eq!(step, LocateStep::HitTest);
        assert_eq!(found, doc.select_first("#icon").unwrap());
        assert!(locate(&session, 50.0, 50.0, &overlay).is_none());
    }

    #[test]
    fn descendant_then_image_then_sibling() {
        with_session(
            r##"<button id="b"><span><svg id="inner"></svg></span></button>
               <a id="a"><img src="data:image/png;base64,AA"/><img id="logo" src="/img/logo.SVG?v=2"/></a>
               <div><span id="label">Share</span><svg id="sib"></svg></div>"##,
            |doc, session| {
                let button = doc.select_first("#b").unwrap();
                let (found, step) = locate_with_step(session, 0.0, 0.0, &button).unwrap();
                assert_eq!((found, step), (doc.select_first("#inner").unwrap(), LocateStep::Descendant));

                let anchor = doc.select_first("#a").unwrap();
                let (found, step) = locate_with_step(session, 0.0, 0.0, &anchor).unwrap();
                assert_eq!((found, step), (doc.select_first("#logo").unwrap(), LocateStep::DescendantImage));

                let label = doc.select_first("#label").unwrap();
                let (found, step) = locate_with_step(session, 0.0, 0.0, &label).unwrap();
                assert_eq!((found, step), (doc.select_first("#sib").unwrap(), LocateStep::Sibling));
            },
        );
    }

    #[test]
    fn bounded_scan_enters_open_shadow_roots() {
        with_session(
            r##"<my-icon id="host"><template shadowrootmode="open"><svg id="shadowed"></svg></template></my-icon>"##,
            |doc, session| {
                let host = doc.select_first("#host").unwrap();
                let (found, step) = locate_with_step(session, 0.0, 0.0, &host).unwrap();
                assert_eq!(step, LocateStep::BoundedScan);
                assert_eq!(non_empty_attr(&found, "id").as_deref(), Some("shadowed"));
            },
        );
    }

    #[test]
    fn css_bearing_target_is_returned_as_is() {
        with_session(
            r##"<html><head><style>.logo { background-image: url("/brand/logo.svg"); }</style></head>
               <body><div id="d" class="logo"></div><div id="plain"></div></body></html>"##,
            |doc, session| {
                let div = doc.select_first("#d").unwrap();
                let (found, step) = locate_with_step(session, 0.0, 0.0, &div).unwrap();
                assert_eq!(found, div);
                assert_eq!(step, LocateStep::CssSource);
                let plain = doc.select_first("#plain").unwrap();
                assert!(locate(session, 0.0, 0.0, &plain).is_none());
            },
        );
    }

    #[test]
    fn capture_ui_is_never_located() {
        with_session(
            r##"<div id="svag-action-popup"><span class="svag-action-icon"><svg id="own"></svg></span></div>"##,
            |doc, session| {
                let own = doc.select_first("#own").unwrap();
                assert!(locate(session, 0.0, 0.0, &own).is_none());
            },
        );
    }
}
