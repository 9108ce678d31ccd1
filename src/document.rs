use kuchiki::traits::TendrilSink;
use kuchiki::{NodeData, NodeRef};
use percent_encoding::percent_decode_str;
use url::Url;

use crate::error::ExtractError;

pub(crate) const SVG_NS: &str = "http://www.w3.org/2000/svg";
pub(crate) const XLINK_NS: &str = "http://www.w3.org/1999/xlink";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowMode {
    Open,
    Closed,
}

#[derive(Clone)]
pub struct ShadowRoot {
    pub host: NodeRef,
    pub content: NodeRef,
    pub mode: ShadowMode,
}

pub struct HostDocument {
    root: NodeRef,
    base_url: Option<Url>,
    shadow_roots: Vec<ShadowRoot>,
}

impl HostDocument {
    pub fn parse_html(html: &str) -> Self {
        Self::from_root(kuchiki::parse_html().one(html))
    }

    pub fn from_root(root: NodeRef) -> Self {
        let shadow_roots = collect_shadow_roots(&root);
        Self {
            root,
            base_url: None,
            shadow_roots,
        }
    }

    pub fn with_base_url(mut self, base: &str) -> Result<Self, ExtractError> {
        let url = Url::parse(base)
            .map_err(|err| ExtractError::InvalidConfiguration(format!("base url {base}: {err}")))?;
        self.base_url = Some(url);
        Ok(self)
    }

    pub fn root(&self) -> &NodeRef {
        &self.root
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    pub fn select_first(&self, selector: &str) -> Option<NodeRef> {
        self.root
            .select_first(selector)
            .ok()
            .map(|found| found.as_node().clone())
    }

    pub fn shadow_roots(&self) -> &[ShadowRoot] {
        &self.shadow_roots
    }

    pub fn open_shadow_root(&self, host: &NodeRef) -> Option<&ShadowRoot> {
        self.shadow_roots
            .iter()
            .find(|root| root.mode == ShadowMode::Open && &root.host == host)
    }

    pub fn parent(&self, node: &NodeRef) -> Option<NodeRef> {
        let parent = node.parent()?;
        if matches!(parent.data(), NodeData::DocumentFragment) {
            if let Some(root) = self.shadow_roots.iter().find(|r| r.content == parent) {
                return Some(root.host.clone());
            }
        }
        Some(parent)
    }

    pub fn ancestors(&self, node: &NodeRef) -> Vec<NodeRef> {
        let mut out = Vec::new();
        let mut current = self.parent(node);
        while let Some(parent) = current {
            current = self.parent(&parent);
            out.push(parent);
        }
        out
    }

    pub fn closest(&self, node: &NodeRef, tag: &str) -> Option<NodeRef> {
        self.ancestors(node).into_iter().find(|n| is_tag(n, tag))
    }

    // Visits at most `limit` nodes over the light tree and open shadow trees.
    pub fn find_by_id(&self, id: &str, limit: usize) -> Option<NodeRef> {
        if id.is_empty() {
            return None;
        }
        let mut stack = vec![self.root.clone()];
        let mut visited = 0usize;
        while let Some(node) = stack.pop() {
            visited += 1;
            if visited > limit {
                log::debug!("id lookup for #{id} stopped after {limit} nodes");
                return None;
            }
            if node.as_element().is_some() && attr(&node, "id").as_deref() == Some(id) {
                return Some(node);
            }
            if let Some(root) = self.open_shadow_root(&node) {
                stack.push(root.content.clone());
            }
            let children: Vec<NodeRef> = node.children().collect();
            stack.extend(children.into_iter().rev());
        }
        None
    }

    pub fn scan_svg_subtrees(&self, id: &str) -> Option<NodeRef> {
        let wanted = percent_decode_str(id).decode_utf8_lossy().trim().to_string();
        if wanted.is_empty() {
            return None;
        }
        let containers = self.root.inclusive_descendants().filter(|n| {
            is_tag(n, "svg") || is_tag(n, "defs")
        });
        for container in containers {
            for node in container.descendants() {
                if let Some(found) = attr(&node, "id") {
                    if found.trim() == wanted {
                        return Some(node);
                    }
                }
            }
        }
        None
    }

    // Closed roots are rendered by the page but invisible to id lookups.
    pub fn find_in_closed_roots(&self, id: &str) -> Option<NodeRef> {
        self.shadow_roots
            .iter()
            .filter(|root| root.mode == ShadowMode::Closed)
            .flat_map(|root| root.content.descendants())
            .find(|node| attr(node, "id").as_deref() == Some(id))
    }

    pub fn resolve_url(&self, raw: &str) -> String {
        let raw = raw.trim();
        if raw.starts_with("data:") {
            return raw.to_string();
        }
        match &self.base_url {
            Some(base) => base
                .join(raw)
                .map(|u| u.to_string())
                .unwrap_or_else(|_| raw.to_string()),
            None => raw.to_string(),
        }
    }
}

fn collect_shadow_roots(root: &NodeRef) -> Vec<ShadowRoot> {
    let mut out = Vec::new();
    let mut pending = vec![root.clone()];
    while let Some(tree) = pending.pop() {
        for node in tree.descendants() {
            let Some(element) = node.as_element() else {
                continue;
            };
            if element.name.local.as_ref() != "template" {
                continue;
            }
            let mode = {
                let attrs = element.attributes.borrow();
                attrs
                    .get("shadowrootmode")
                    .or_else(|| attrs.get("shadowroot"))
                    .map(|m| m.trim().to_ascii_lowercase())
            };
            let mode = match mode.as_deref() {
                Some("open") => ShadowMode::Open,
                Some("closed") => ShadowMode::Closed,
                _ => continue,
            };
            let (Some(host), Some(content)) = (node.parent(), element.template_contents.clone())
            else {
                continue;
            };
            pending.push(content.clone());
            out.push(ShadowRoot {
                host,
                content,
                mode,
            });
        }
    }
    out
}

pub(crate) fn tag_name(node: &NodeRef) -> Option<String> {
    node.as_element()
        .map(|el| el.name.local.as_ref().to_ascii_lowercase())
}

pub(crate) fn is_tag(node: &NodeRef, tag: &str) -> bool {
    node.as_element()
        .map(|el| el.name.local.as_ref().eq_ignore_ascii_case(tag))
        .unwrap_or(false)
}

// Attribute by local name in any namespace; a non-namespaced attribute wins over e.g.
// `xlink:href`.
pub(crate) fn attr(node: &NodeRef, name: &str) -> Option<String> {
    let element = node.as_element()?;
    let attrs = element.attributes.borrow();
    let mut namespaced = None;
    for (key, value) in attrs.map.iter() {
        if key.local.as_ref() != name {
            continue;
        }
        if key.ns.is_empty() {
            return Some(value.value.clone());
        }
        if namespaced.is_none() {
            namespaced = Some(value.value.clone());
        }
    }
    namespaced
}

pub(crate) fn non_empty_attr(node: &NodeRef, name: &str) -> Option<String> {
    attr(node, name).filter(|v| !v.trim().is_empty())
}

pub(crate) fn href(node: &NodeRef) -> Option<String> {
    non_empty_attr(node, "href").map(|h| h.trim().to_string())
}

pub(crate) fn element_children(node: &NodeRef) -> impl Iterator<Item = NodeRef> {
    node.children().filter(|child| child.as_element().is_some())
}

pub(crate) fn descendants_breadth_first(node: &NodeRef) -> Vec<NodeRef> {
    let mut out = Vec::new();
    let mut queue: std::collections::VecDeque<NodeRef> = element_children(node).collect();
    while let Some(next) = queue.pop_front() {
        queue.extend(element_children(&next));
        out.push(next);
    }
    out
}

// Serializes an element subtree as XML. kuchiki's own serializer emits HTML, which is not
// always well-formed XML.
pub(crate) fn serialize_svg_node(node: &NodeRef) -> String {
    let mut out = String::new();
    write_svg_xml(node, &mut out, true, &|_, _| None);
    out
}

pub(crate) fn serialize_svg_node_with(
    node: &NodeRef,
    extra: &dyn Fn(&NodeRef, &str) -> Option<Vec<(String, String)>>,
) -> String {
    let mut out = String::new();
    write_svg_xml(node, &mut out, true, extra);
    out
}

pub(crate) fn serialize_svg_element(node: &NodeRef) -> String {
    let mut out = String::new();
    write_svg_xml(node, &mut out, false, &|_, _| None);
    out
}

fn write_svg_xml(
    node: &NodeRef,
    out: &mut String,
    is_root: bool,
    extra: &dyn Fn(&NodeRef, &str) -> Option<Vec<(String, String)>>,
) {
    match node.data() {
        NodeData::Element(el) => {
            let tag = el.name.local.as_ref();
            let added = extra(node, tag).unwrap_or_default();
            out.push('<');
            out.push_str(tag);

            let attrs = el.attributes.borrow();
            let mut has_xmlns = false;
            let mut has_xlink_ns = false;
            let mut uses_xlink = false;
            for (k, v) in attrs.map.iter() {
                let key = k.local.as_ref();
                let qualified = match &v.prefix {
                    Some(prefix) => format!("{}:{}", prefix.as_ref(), key),
                    None => key.to_string(),
                };
                if added.iter().any(|(name, _)| name == &qualified) {
                    continue;
                }
                if qualified == "xmlns" {
                    has_xmlns = true;
                }
                if qualified == "xmlns:xlink" {
                    has_xlink_ns = true;
                }
                if k.ns.as_ref() == XLINK_NS {
                    uses_xlink = true;
                }
                out.push(' ');
                out.push_str(&qualified);
                out.push_str("=\"");
                escape_xml_attr(&v.value, out);
                out.push('"');
            }
            for (name, value) in &added {
                out.push(' ');
                out.push_str(name);
                out.push_str("=\"");
                escape_xml_attr(value, out);
                out.push('"');
            }
            if is_root && !has_xmlns {
                out.push_str(" xmlns=\"");
                out.push_str(SVG_NS);
                out.push('"');
            }
            if uses_xlink && !has_xlink_ns {
                out.push_str(" xmlns:xlink=\"");
                out.push_str(XLINK_NS);
                out.push('"');
            }

            out.push('>');

            for child in node.children() {
                write_svg_xml(&child, out, false, extra);
            }

            out.push_str("</");
            out.push_str(tag);
            out.push('>');
        }
        NodeData::Text(t) => {
            escape_xml_text(&t.borrow(), out);
        }
        _ => {}
    }
}

pub(crate) fn escape_xml_attr(input: &str, out: &mut String) {
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
}

fn escape_xml_text(input: &str, out: &mut String) {
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
}

pub(crate) fn parse_svg_fragment(markup: &str) -> Option<NodeRef> {
    let head = markup.trim_start();
    let standalone = ["<svg", "<?xml", "<!"]
        .iter()
        .any(|prefix| head.starts_with(prefix));
    let wrapped = if standalone {
        markup.to_string()
    } else {
        format!("<svg xmlns=\"{SVG_NS}\">{markup}</svg>")
    };
    let doc = kuchiki::parse_html().one(wrapped);
    let svg = doc.select_first("svg").ok()?.as_node().clone();
    Some(svg)
}
