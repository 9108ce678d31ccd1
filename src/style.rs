use std::rc::Rc;

use kuchiki::{NodeData, NodeRef, Selector, Selectors, Specificity};
use lightningcss::properties::Property;
use lightningcss::rules::{CssRule, CssRuleList};
use lightningcss::stylesheet::{ParserOptions, PrinterOptions, StyleAttribute, StyleSheet};
use lightningcss::traits::ToCss;

use crate::document::HostDocument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PseudoTarget {
    Before,
    After,
}

impl PseudoTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            PseudoTarget::Before => "::before",
            PseudoTarget::After => "::after",
        }
    }
}

// Computed-style capability. Implementations answer with the value the host would render
// with, or `None` when the property is not set anywhere (no initial values are invented).
pub trait StyleResolver {
    fn computed(&self, node: &NodeRef, property: &str) -> Option<String>;

    fn pseudo(&self, node: &NodeRef, target: PseudoTarget, property: &str) -> Option<String>;

    fn computed_fill(&self, node: &NodeRef) -> Option<String> {
        self.computed(node, "fill")
    }

    fn computed_stroke(&self, node: &NodeRef) -> Option<String> {
        self.computed(node, "stroke")
    }

    fn computed_stroke_width(&self, node: &NodeRef) -> Option<String> {
        self.computed(node, "stroke-width")
    }
}

const PRESENTATION_ATTRIBUTES: &[&str] = &[
    "fill",
    "fill-opacity",
    "fill-rule",
    "stroke",
    "stroke-width",
    "stroke-linecap",
    "stroke-linejoin",
    "stroke-dasharray",
    "stroke-dashoffset",
    "stroke-miterlimit",
    "stroke-opacity",
    "opacity",
    "color",
    "clip-path",
    "mask",
    "filter",
    "cursor",
    "visibility",
    "pointer-events",
];

const INHERITED_PROPERTIES: &[&str] = &[
    "fill",
    "fill-opacity",
    "fill-rule",
    "stroke",
    "stroke-width",
    "stroke-linecap",
    "stroke-linejoin",
    "stroke-dasharray",
    "stroke-dashoffset",
    "stroke-miterlimit",
    "stroke-opacity",
    "color",
    "cursor",
    "list-style-image",
    "list-style",
    "visibility",
    "pointer-events",
];

pub(crate) fn is_inherited(property: &str) -> bool {
    INHERITED_PROPERTIES.contains(&property)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Origin {
    Presentation,
    Rule,
    Inline,
    ImportantRule,
    ImportantInline,
}

struct RuleEntry {
    selector: Rc<Selector>,
    pseudo: Option<PseudoTarget>,
    specificity: Specificity,
    order: usize,
    important: bool,
    declarations: Vec<(String, String)>,
}

pub struct CascadeResolver {
    rules: Vec<RuleEntry>,
    shadow_links: Vec<(NodeRef, NodeRef)>,
}

impl CascadeResolver {
    pub fn new(document: &HostDocument) -> Self {
        Self::with_css(document, "")
    }

    pub fn with_css(document: &HostDocument, extra_css: &str) -> Self {
        let mut css = String::new();
        let mut trees = vec![document.root().clone()];
        trees.extend(document.shadow_roots().iter().map(|r| r.content.clone()));
        for tree in &trees {
            if let Ok(styles) = tree.select("style") {
                for style in styles {
                    css.push_str(&style.as_node().text_contents());
                    css.push('\n');
                }
            }
        }
        css.push_str(extra_css);

        let mut rules = Vec::new();
        let mut order = 0usize;
        match StyleSheet::parse(&css, ParserOptions::default()) {
            Ok(sheet) => append_rule_list(&sheet.rules, &mut rules, &mut order),
            Err(err) => log::warn!("page stylesheet ignored: {err}"),
        }

        let shadow_links = document
            .shadow_roots()
            .iter()
            .map(|root| (root.content.clone(), root.host.clone()))
            .collect();

        Self {
            rules,
            shadow_links,
        }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    fn parent(&self, node: &NodeRef) -> Option<NodeRef> {
        let parent = node.parent()?;
        if matches!(parent.data(), NodeData::DocumentFragment) {
            return self
                .shadow_links
                .iter()
                .find(|(content, _)| content == &parent)
                .map(|(_, host)| host.clone());
        }
        match parent.data() {
            NodeData::Element(_) => Some(parent),
            _ => None,
        }
    }

    fn cascaded(
        &self,
        node: &NodeRef,
        pseudo: Option<PseudoTarget>,
        property: &str,
    ) -> Option<String> {
        let element = node.clone().into_element_ref()?;
        let mut best: Option<(Origin, Option<Specificity>, usize, String)> = None;
        let mut offer = |origin: Origin, rank: Option<Specificity>, order: usize, value: &str| {
            let candidate = (origin, rank, order, value.to_string());
            let replace = match &best {
                None => true,
                Some((o, r, n, _)) => (origin, rank, order) >= (*o, *r, *n),
            };
            if replace {
                best = Some(candidate);
            }
        };

        if pseudo.is_none() && PRESENTATION_ATTRIBUTES.contains(&property) {
            let attrs = element.attributes.borrow();
            if let Some(value) = attrs.get(property) {
                offer(Origin::Presentation, None, 0, value.trim());
            }
        }

        for rule in &self.rules {
            if rule.pseudo != pseudo {
                continue;
            }
            let Some((_, value)) = rule.declarations.iter().rev().find(|(n, _)| n == property)
            else {
                continue;
            };
            if !rule.selector.matches(&element) {
                continue;
            }
            let origin = if rule.important {
                Origin::ImportantRule
            } else {
                Origin::Rule
            };
            offer(origin, Some(rule.specificity), rule.order, value);
        }

        if pseudo.is_none() {
            let inline = element.attributes.borrow().get("style").map(|s| s.to_string());
            if let Some(inline) = inline {
                if let Ok(parsed) = StyleAttribute::parse(&inline, ParserOptions::default()) {
                    let block = &parsed.declarations;
                    for (name, value) in declared(&block.declarations) {
                        if name == property {
                            offer(Origin::Inline, None, usize::MAX, &value);
                        }
                    }
                    for (name, value) in declared(&block.important_declarations) {
                        if name == property {
                            offer(Origin::ImportantInline, None, usize::MAX, &value);
                        }
                    }
                }
            }
        }

        best.map(|(_, _, _, value)| value)
    }

    fn resolve(&self, node: &NodeRef, property: &str) -> Option<String> {
        let mut current = Some(node.clone());
        while let Some(node) = current {
            match self.cascaded(&node, None, property) {
                Some(value) if value.eq_ignore_ascii_case("inherit") => {}
                Some(value) if value.eq_ignore_ascii_case("initial") => return None,
                Some(value) if value.eq_ignore_ascii_case("unset") => {
                    if !is_inherited(property) {
                        return None;
                    }
                }
                Some(value) => return Some(value),
                None => {
                    if !is_inherited(property) {
                        return None;
                    }
                }
            }
            current = self.parent(&node);
        }
        None
    }
}

impl StyleResolver for CascadeResolver {
    fn computed(&self, node: &NodeRef, property: &str) -> Option<String> {
        self.resolve(node, property)
    }

    fn pseudo(&self, node: &NodeRef, target: PseudoTarget, property: &str) -> Option<String> {
        match self.cascaded(node, Some(target), property) {
            Some(value) if value.eq_ignore_ascii_case("inherit") => self.resolve(node, property),
            Some(value) => Some(value),
            None if is_inherited(property) => self.resolve(node, property),
            None => None,
        }
    }
}

fn append_rule_list(rules: &CssRuleList, out: &mut Vec<RuleEntry>, order: &mut usize) {
    for rule in &rules.0 {
        match rule {
            CssRule::Style(style) => {
                let normal = declared(&style.declarations.declarations);
                let important = declared(&style.declarations.important_declarations);
                let selectors = style
                    .selectors
                    .to_css_string(PrinterOptions::default())
                    .unwrap_or_default();
                for selector in selectors.split(',') {
                    let (selector_text, pseudo) = split_pseudo_element(selector.trim());
                    let Ok(compiled) = Selectors::compile(selector_text) else {
                        log::debug!("unsupported selector skipped: {selector}");
                        continue;
                    };
                    for compiled in compiled.0 {
                        let compiled = Rc::new(compiled);
                        let specificity = compiled.specificity();
                        if !normal.is_empty() {
                            out.push(RuleEntry {
                                selector: compiled.clone(),
                                pseudo,
                                specificity,
                                order: *order,
                                important: false,
                                declarations: normal.clone(),
                            });
                        }
                        if !important.is_empty() {
                            out.push(RuleEntry {
                                selector: compiled,
                                pseudo,
                                specificity,
                                order: *order,
                                important: true,
                                declarations: important.clone(),
                            });
                        }
                    }
                }
                *order += 1;
            }
            CssRule::Media(media) => {
                let query = media
                    .query
                    .to_css_string(PrinterOptions::default())
                    .unwrap_or_default()
                    .to_ascii_lowercase();
                if query.trim() == "print" {
                    continue;
                }
                append_rule_list(&media.rules, out, order);
            }
            _ => {}
        }
    }
}

fn split_pseudo_element(selector: &str) -> (&str, Option<PseudoTarget>) {
    let lower = selector.to_ascii_lowercase();
    for (suffix, target) in [
        ("::before", PseudoTarget::Before),
        ("::after", PseudoTarget::After),
        (":before", PseudoTarget::Before),
        (":after", PseudoTarget::After),
    ] {
        if lower.ends_with(suffix) {
            let base = selector[..selector.len() - suffix.len()].trim_end();
            let base = if base.is_empty() { "*" } else { base };
            return (base, Some(target));
        }
    }
    (selector, None)
}

fn declared(props: &[Property]) -> Vec<(String, String)> {
    props
        .iter()
        .filter_map(|property| {
            let name = property.property_id().name().to_ascii_lowercase();
            let value = property
                .value_to_css_string(PrinterOptions::default())
                .ok()?;
            Some((name, value))
        })
        .collect()
}
