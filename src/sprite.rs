use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use kuchiki::NodeRef;

use crate::document::{HostDocument, href, is_tag, non_empty_attr};
use crate::error::ExtractError;
use crate::fetch::{Fetcher, parse_xml};
use crate::locate::points_to_svg_file;

#[derive(Default)]
struct SpriteState {
    urls: Vec<String>,
    claimed: HashSet<String>,
    sheets: HashMap<String, HashMap<String, String>>,
    symbols: HashMap<String, String>,
}

// Sheets are indexed per URL; `symbols` is the id-only view over every sheet, first writer
// wins. Entries are only ever added.
#[derive(Clone, Default)]
pub struct SpriteCache {
    inner: Arc<RwLock<SpriteState>>,
}

impl SpriteCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn symbol(&self, id: &str) -> Option<String> {
        let state = self.inner.read().ok()?;
        state.symbols.get(id).cloned()
    }

    pub fn insert_symbol(&self, id: &str, markup: &str) {
        if let Ok(mut state) = self.inner.write() {
            state
                .symbols
                .entry(id.to_string())
                .or_insert_with(|| markup.to_string());
        }
    }

    fn sheet_symbol(&self, url: &str, id: &str) -> Option<String> {
        let state = self.inner.read().ok()?;
        state.sheets.get(url)?.get(id).cloned()
    }

    fn record_sheet(&self, url: &str, entries: &[(String, String)]) {
        let Ok(mut state) = self.inner.write() else {
            return;
        };
        let sheet = state.sheets.entry(url.to_string()).or_default();
        for (id, markup) in entries {
            sheet.entry(id.clone()).or_insert_with(|| markup.clone());
        }
        for (id, markup) in entries {
            state
                .symbols
                .entry(id.clone())
                .or_insert_with(|| markup.clone());
        }
    }

    pub fn known_urls(&self) -> Vec<String> {
        self.inner
            .read()
            .map(|state| state.urls.clone())
            .unwrap_or_default()
    }

    pub fn symbol_count(&self) -> usize {
        self.inner
            .read()
            .map(|state| state.symbols.len())
            .unwrap_or(0)
    }

    fn claim(&self, url: &str) -> bool {
        let Ok(mut state) = self.inner.write() else {
            return false;
        };
        if !state.claimed.insert(url.to_string()) {
            return false;
        }
        state.urls.push(url.to_string());
        true
    }
}

pub fn discover_sprite_urls(document: &HostDocument) -> Vec<String> {
    let mut trees: Vec<NodeRef> = vec![document.root().clone()];
    trees.extend(document.shadow_roots().iter().map(|root| root.content.clone()));

    let mut found: Vec<String> = Vec::new();
    let mut push = |raw: &str| {
        let resolved = document.resolve_url(raw);
        let url = match resolved.split_once('#') {
            Some((url, _)) => url.to_string(),
            None => resolved,
        };
        if !url.is_empty() && !found.contains(&url) {
            found.push(url);
        }
    };

    for tree in &trees {
        for node in tree.descendants() {
            if is_tag(&node, "use") {
                if let Some(reference) = href(&node) {
                    if !reference.starts_with('#') && points_to_svg_file(&reference) {
                        push(&reference);
                    }
                }
            } else if is_tag(&node, "img") || is_tag(&node, "object") {
                let source = non_empty_attr(&node, "src").or_else(|| non_empty_attr(&node, "data"));
                if let Some(source) = source {
                    let lower = source.to_ascii_lowercase();
                    if points_to_svg_file(&source)
                        && (lower.contains("sprite") || lower.contains("icon"))
                    {
                        push(&source);
                    }
                }
            } else if is_tag(&node, "link") {
                let rel = non_empty_attr(&node, "rel").unwrap_or_default().to_ascii_lowercase();
                let hinted = rel
                    .split_whitespace()
                    .any(|r| r == "preload" || r == "prefetch");
                if let (true, Some(target)) = (hinted, href(&node)) {
                    if points_to_svg_file(&target) {
                        push(&target);
                    }
                }
            }
        }
    }
    found
}

pub fn find_fragment(text: &str, id: &str) -> Result<Option<String>, ExtractError> {
    let doc = parse_xml(text)?;
    let input = doc.input_text();
    Ok(doc
        .descendants()
        .find(|node| node.is_element() && node.attribute("id") == Some(id))
        .and_then(|node| input.get(node.range()))
        .map(|markup| markup.to_string()))
}

fn index_sprite(text: &str, wanted: &[String]) -> Result<Vec<(String, String)>, ExtractError> {
    let doc = parse_xml(text)?;
    let input = doc.input_text();
    let mut out = Vec::new();
    for node in doc.descendants().filter(|n| n.is_element()) {
        let Some(id) = node.attribute("id") else {
            continue;
        };
        let is_symbol = node.tag_name().name() == "symbol";
        if !is_symbol && !wanted.iter().any(|w| w == id) {
            continue;
        }
        if let Some(markup) = input.get(node.range()) {
            out.push((id.to_string(), markup.to_string()));
        }
    }
    Ok(out)
}

// Looked up in the sheet at `url` only; another sheet's symbol with the same id never answers.
pub(crate) fn fetch_symbol(
    fetcher: &dyn Fetcher,
    cache: &SpriteCache,
    url: &str,
    id: &str,
) -> Result<Option<String>, ExtractError> {
    // Sheets are indexed by symbol plus the ids asked for, so a miss refetches.
    if let Some(markup) = cache.sheet_symbol(url, id) {
        return Ok(Some(markup));
    }
    let text = fetcher.get_text(url)?;
    let wanted = [id.to_string()];
    let entries = index_sprite(&text, &wanted)?;
    cache.claim(url);
    cache.record_sheet(url, &entries);
    Ok(entries
        .into_iter()
        .find(|(entry_id, _)| entry_id == id)
        .map(|(_, markup)| markup))
}

// Returns the number of sheets scheduled; the caller never waits on them.
pub(crate) fn spawn_enrichment(
    fetcher: Arc<dyn Fetcher>,
    cache: SpriteCache,
    urls: Vec<String>,
    wanted: Vec<String>,
) -> usize {
    let pending: Vec<String> = urls.into_iter().filter(|url| cache.claim(url)).collect();
    let scheduled = pending.len();
    for url in pending {
        let fetcher = Arc::clone(&fetcher);
        let cache = cache.clone();
        let wanted = wanted.clone();
        rayon::spawn(move || enrich_from(fetcher.as_ref(), &cache, &url, &wanted));
    }
    scheduled
}

fn enrich_from(fetcher: &dyn Fetcher, cache: &SpriteCache, url: &str, wanted: &[String]) {
    let entries = match fetcher.get_text(url).and_then(|text| index_sprite(&text, wanted)) {
        Ok(entries) => entries,
        Err(err) => {
            log::debug!("sprite enrichment skipped {url}: {err}");
            return;
        }
    };
    let hits = entries
        .iter()
        .filter(|(id, _)| wanted.iter().any(|w| w == id))
        .count();
    cache.record_sheet(url, &entries);
    log::debug!(
        "sprite {url}: {} definitions cached, {hits} of {} wanted",
        entries.len(),
        wanted.len()
    );
}
