use kuchiki::NodeRef;

use crate::document::{
    SVG_NS, attr, element_children, escape_xml_attr, href, is_tag, non_empty_attr,
    parse_svg_fragment, tag_name,
};
use crate::error::ExtractError;
use crate::session::ExtractionSession;

// Content the shape rebuild cannot carry.
pub(crate) const UNPORTABLE_TAGS: &[&str] = &[
    "text",
    "image",
    "foreignobject",
    "lineargradient",
    "radialgradient",
    "pattern",
    "mask",
    "clippath",
    "filter",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeKind {
    Path,
    Circle,
    Rect,
    Ellipse,
    Line,
    Polygon,
    Polyline,
    Group,
}

impl ShapeKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "path" => Some(ShapeKind::Path),
            "circle" => Some(ShapeKind::Circle),
            "rect" => Some(ShapeKind::Rect),
            "ellipse" => Some(ShapeKind::Ellipse),
            "line" => Some(ShapeKind::Line),
            "polygon" => Some(ShapeKind::Polygon),
            "polyline" => Some(ShapeKind::Polyline),
            "g" => Some(ShapeKind::Group),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            ShapeKind::Path => "path",
            ShapeKind::Circle => "circle",
            ShapeKind::Rect => "rect",
            ShapeKind::Ellipse => "ellipse",
            ShapeKind::Line => "line",
            ShapeKind::Polygon => "polygon",
            ShapeKind::Polyline => "polyline",
            ShapeKind::Group => "g",
        }
    }

    fn geometry(self) -> &'static [&'static str] {
        match self {
            ShapeKind::Path => &["d"],
            ShapeKind::Circle => &["cx", "cy", "r"],
            ShapeKind::Rect => &["x", "y", "width", "height", "rx", "ry"],
            ShapeKind::Ellipse => &["cx", "cy", "rx", "ry"],
            ShapeKind::Line => &["x1", "y1", "x2", "y2"],
            ShapeKind::Polygon | ShapeKind::Polyline => &["points"],
            ShapeKind::Group => &[],
        }
    }
}

const VERBATIM_ATTRIBUTES: &[&str] = &[
    "fill-rule",
    "clip-rule",
    "stroke-linecap",
    "stroke-linejoin",
    "stroke-dasharray",
    "stroke-dashoffset",
    "stroke-miterlimit",
];

#[derive(Debug, Clone, PartialEq)]
pub struct ShapeNode {
    pub kind: ShapeKind,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<ShapeNode>,
}

impl ShapeNode {
    pub fn new(kind: ShapeKind) -> Self {
        Self {
            kind,
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attrs.iter_mut().find(|(key, _)| key == name) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((name.to_string(), value)),
        }
    }

    fn write(&self, out: &mut String) {
        out.push('<');
        out.push_str(self.kind.tag());
        for (name, value) in &self.attrs {
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            escape_xml_attr(value, out);
            out.push('"');
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for child in &self.children {
            child.write(out);
        }
        out.push_str("</");
        out.push_str(self.kind.tag());
        out.push('>');
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CleanSvgDocument {
    pub view_box: String,
    pub shapes: Vec<ShapeNode>,
}

impl CleanSvgDocument {
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    pub fn to_markup(&self) -> String {
        let mut out = String::new();
        out.push_str("<svg xmlns=\"");
        out.push_str(SVG_NS);
        out.push_str("\" viewBox=\"");
        escape_xml_attr(&self.view_box, &mut out);
        out.push_str("\">");
        for shape in &self.shapes {
            shape.write(&mut out);
        }
        out.push_str("</svg>");
        out
    }
}

pub fn normalize(
    session: &ExtractionSession<'_>,
    element: &NodeRef,
) -> Result<CleanSvgDocument, ExtractError> {
    let (document, unresolved) = normalize_collecting(session, element, None, None);
    match unresolved.into_iter().next() {
        Some(id) => Err(ExtractError::UnresolvedReference(id)),
        None => Ok(document),
    }
}

// Inherited paint is what an enclosing `<use>` passes down.
pub(crate) fn normalize_collecting(
    session: &ExtractionSession<'_>,
    element: &NodeRef,
    inherited_fill: Option<&str>,
    inherited_stroke: Option<&str>,
) -> (CleanSvgDocument, Vec<String>) {
    let mut walk = ShapeWalk::new(session);
    let shapes = if ShapeKind::from_tag(&tag_name(element).unwrap_or_default())
        .is_some_and(|kind| kind != ShapeKind::Group)
    {
        walk.shape(element, inherited_fill, inherited_stroke)
            .into_iter()
            .collect()
    } else {
        walk.extract_shapes(element, inherited_fill, inherited_stroke)
    };
    let view_box = view_box_for(element, walk.first_symbol_view_box.as_deref());
    for id in &walk.unresolved {
        session.record_unresolved(id);
    }
    (CleanSvgDocument { view_box, shapes }, walk.unresolved)
}

// True when rebuilding `svg` would drop something it depends on: unportable elements or
// `url()` paint, in `svg` itself or in any local `<use>` target it reaches.
pub(crate) fn loses_content(session: &ExtractionSession<'_>, svg: &NodeRef) -> bool {
    let walk = ShapeWalk::new(session);
    let mut seen: Vec<String> = Vec::new();
    let mut pending = vec![svg.clone()];
    while let Some(root) = pending.pop() {
        for node in root.inclusive_descendants() {
            if UNPORTABLE_TAGS.iter().any(|tag| is_tag(&node, tag)) {
                return true;
            }
            if node.as_element().is_some() && paints_with_url(session, &node) {
                return true;
            }
            if !is_tag(&node, "use") {
                continue;
            }
            let Some(id) = href(&node).and_then(|h| h.strip_prefix('#').map(str::to_string))
            else {
                continue;
            };
            if seen.contains(&id) {
                continue;
            }
            if let Some(target) = walk.lookup(&id) {
                pending.push(target);
            }
            seen.push(id);
        }
    }
    false
}

fn paints_with_url(session: &ExtractionSession<'_>, node: &NodeRef) -> bool {
    let styles = session.styles;
    [styles.computed_fill(node), styles.computed_stroke(node)]
        .iter()
        .flatten()
        .any(|paint| paint.trim_start().to_ascii_lowercase().starts_with("url("))
}

struct ShapeWalk<'s, 'a> {
    session: &'s ExtractionSession<'a>,
    use_depth: usize,
    expanding: Vec<String>,
    unresolved: Vec<String>,
    first_symbol_view_box: Option<String>,
}

impl<'s, 'a> ShapeWalk<'s, 'a> {
    fn new(session: &'s ExtractionSession<'a>) -> Self {
        Self {
            session,
            use_depth: 0,
            expanding: Vec::new(),
            unresolved: Vec::new(),
            first_symbol_view_box: None,
        }
    }

    // Direct children of `container` only, in document order. Nested groups are reached
    // through recursion, never through a descendant query.
    fn extract_shapes(
        &mut self,
        container: &NodeRef,
        inherited_fill: Option<&str>,
        inherited_stroke: Option<&str>,
    ) -> Vec<ShapeNode> {
        let mut out = Vec::new();
        for child in element_children(container) {
            if is_tag(&child, "use") {
                out.extend(self.expand_use(&child, inherited_fill, inherited_stroke));
            } else if let Some(shape) = self.shape(&child, inherited_fill, inherited_stroke) {
                out.push(shape);
            }
        }
        out
    }

    fn shape(
        &mut self,
        node: &NodeRef,
        inherited_fill: Option<&str>,
        inherited_stroke: Option<&str>,
    ) -> Option<ShapeNode> {
        let kind = ShapeKind::from_tag(&tag_name(node)?)?;
        let mut shape = ShapeNode::new(kind);
        for name in kind.geometry() {
            if let Some(value) = attr(node, name) {
                shape.set(name, value);
            }
        }
        if let Some(transform) = non_empty_attr(node, "transform") {
            shape.set("transform", transform);
        }

        if kind == ShapeKind::Group {
            shape.children = self.extract_shapes(node, inherited_fill, inherited_stroke);
            return Some(shape);
        }

        self.bake_paint(node, &mut shape, inherited_fill, inherited_stroke);
        for name in VERBATIM_ATTRIBUTES {
            if let Some(value) = non_empty_attr(node, name) {
                shape.set(name, value);
            }
        }
        Some(shape)
    }

    fn bake_paint(
        &self,
        node: &NodeRef,
        shape: &mut ShapeNode,
        inherited_fill: Option<&str>,
        inherited_stroke: Option<&str>,
    ) {
        let styles = self.session.styles;
        let computed_fill = styles.computed_fill(node);
        let computed_stroke = styles.computed_stroke(node);

        let fill = painted(computed_fill.as_deref()).or_else(|| painted(inherited_fill));
        let stroke = painted(computed_stroke.as_deref()).or_else(|| painted(inherited_stroke));

        match (&fill, &stroke) {
            (Some(fill), _) => shape.set("fill", clean_paint(fill)),
            (None, None) => shape.set("fill", "currentColor"),
            (None, Some(_)) => {
                if computed_fill.as_deref().is_some_and(is_none_paint) {
                    shape.set("fill", "none");
                }
            }
        }

        match &stroke {
            Some(stroke) => shape.set("stroke", clean_paint(stroke)),
            None => {
                if let Some(raw) = non_empty_attr(node, "stroke") {
                    shape.set("stroke", raw.trim());
                }
            }
        }

        // An explicit width is kept even without a stroke; a styled one only with a stroke.
        let width = non_empty_attr(node, "stroke-width").or_else(|| {
            stroke
                .as_ref()
                .and_then(|_| styles.computed_stroke_width(node))
        });
        if let Some(width) = width {
            shape.set("stroke-width", width.trim());
        }
    }

    fn expand_use(
        &mut self,
        use_el: &NodeRef,
        inherited_fill: Option<&str>,
        inherited_stroke: Option<&str>,
    ) -> Vec<ShapeNode> {
        let Some(reference) = href(use_el) else {
            return Vec::new();
        };
        let Some(id) = reference.strip_prefix('#') else {
            // External sprite: only resolvable by fetching, which the fallback chain handles.
            let fragment = reference.split_once('#').map(|(_, f)| f).unwrap_or_default();
            if !fragment.is_empty() {
                self.unresolved.push(fragment.to_string());
            }
            return Vec::new();
        };
        if self.expanding.iter().any(|open| open == id) {
            log::debug!("<use> cycle through #{id} cut");
            return Vec::new();
        }
        if self.use_depth >= self.session.options.max_use_depth {
            log::debug!("<use> depth limit reached at #{id}");
            return Vec::new();
        }
        let Some(target) = self.lookup(id) else {
            if !self.unresolved.iter().any(|known| known == id) {
                self.unresolved.push(id.to_string());
            }
            return Vec::new();
        };

        if self.first_symbol_view_box.is_none() {
            self.first_symbol_view_box = view_box_attr(&target);
        }

        let styles = self.session.styles;
        let use_fill = styles.computed_fill(use_el);
        let use_stroke = styles.computed_stroke(use_el);
        let fill = painted(use_fill.as_deref())
            .or_else(|| painted(inherited_fill))
            .map(str::to_string);
        let stroke = painted(use_stroke.as_deref())
            .or_else(|| painted(inherited_stroke))
            .map(str::to_string);

        self.use_depth += 1;
        self.expanding.push(id.to_string());
        let shapes = match ShapeKind::from_tag(&tag_name(&target).unwrap_or_default()) {
            Some(kind) if kind != ShapeKind::Group => self
                .shape(&target, fill.as_deref(), stroke.as_deref())
                .into_iter()
                .collect(),
            _ => self.extract_shapes(&target, fill.as_deref(), stroke.as_deref()),
        };
        self.expanding.pop();
        self.use_depth -= 1;

        match use_transform(use_el) {
            Some(transform) if !shapes.is_empty() => {
                let mut group = ShapeNode::new(ShapeKind::Group);
                group.set("transform", transform);
                group.children = shapes;
                vec![group]
            }
            _ => shapes,
        }
    }

    fn lookup(&self, id: &str) -> Option<NodeRef> {
        let document = self.session.document;
        if let Some(found) = document.find_by_id(id, self.session.options.shadow_search_limit) {
            return Some(found);
        }
        if let Some(found) = document.scan_svg_subtrees(id) {
            log::debug!("#{id} found by subtree scan");
            return Some(found);
        }
        let markup = self.session.sprites.symbol(id)?;
        let wrapper = parse_svg_fragment(&markup)?;
        let found = wrapper
            .inclusive_descendants()
            .find(|node| attr(node, "id").as_deref() == Some(id));
        if found.is_some() {
            log::debug!("#{id} found in sprite cache");
        }
        found
    }
}

fn painted(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty() && !is_none_paint(v))
}

fn is_none_paint(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("none")
}

pub(crate) fn clean_paint(value: &str) -> String {
    let value = value.trim();
    if value.eq_ignore_ascii_case("currentcolor") {
        return "currentColor".to_string();
    }
    match value.strip_prefix('#') {
        Some(rest) => format!("#{}", rest.trim_start_matches('#')),
        None => value.to_string(),
    }
}

fn use_transform(use_el: &NodeRef) -> Option<String> {
    let transform = non_empty_attr(use_el, "transform").map(|t| t.trim().to_string());
    let x = non_empty_attr(use_el, "x").map(|v| strip_units(&v)).unwrap_or_default();
    let y = non_empty_attr(use_el, "y").map(|v| strip_units(&v)).unwrap_or_default();
    let offset = |v: &str| v.parse::<f64>().map(|n| n != 0.0).unwrap_or(false);
    let translate = if offset(&x) || offset(&y) {
        let x = if x.is_empty() { "0".to_string() } else { x };
        let y = if y.is_empty() { "0".to_string() } else { y };
        Some(format!("translate({x} {y})"))
    } else {
        None
    };
    match (transform, translate) {
        (Some(t), Some(tr)) => Some(format!("{t} {tr}")),
        (Some(t), None) => Some(t),
        (None, Some(tr)) => Some(tr),
        (None, None) => None,
    }
}

fn view_box_attr(node: &NodeRef) -> Option<String> {
    non_empty_attr(node, "viewBox")
        .or_else(|| non_empty_attr(node, "viewbox"))
        .map(|v| v.trim().to_string())
}

fn view_box_for(element: &NodeRef, first_symbol: Option<&str>) -> String {
    if let Some(own) = view_box_attr(element) {
        return own;
    }
    if let Some(symbol) = first_symbol {
        return symbol.to_string();
    }
    let dimension = |name: &str| {
        non_empty_attr(element, name)
            .map(|v| strip_units(&v))
            .filter(|v| v.parse::<f64>().map(|n| n > 0.0).unwrap_or(false))
            .unwrap_or_else(|| "24".to_string())
    };
    format!("0 0 {} {}", dimension("width"), dimension("height"))
}

fn strip_units(value: &str) -> String {
    value
        .trim()
        .trim_end_matches(|c: char| c.is_ascii_alphabetic() || c == '%')
        .trim()
        .to_string()
}
