use std::cell::RefCell;
use std::sync::Arc;
use std::time::Duration;

use crate::document::HostDocument;
use crate::fetch::Fetcher;
use crate::locate::HitTester;
use crate::sprite::SpriteCache;
use crate::style::StyleResolver;

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub descendant_scan_limit: usize,
    pub shadow_search_limit: usize,
    pub max_use_depth: usize,
    pub fetch_timeout: Duration,
    pub sprite_enrichment: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            descendant_scan_limit: 50,
            shadow_search_limit: 10_000,
            max_use_depth: 16,
            fetch_timeout: Duration::from_secs(5),
            sprite_enrichment: true,
        }
    }
}

pub struct ExtractionSession<'a> {
    pub(crate) document: &'a HostDocument,
    pub(crate) styles: &'a dyn StyleResolver,
    pub(crate) hit_tester: Option<&'a dyn HitTester>,
    pub(crate) options: ExtractOptions,
    pub(crate) sprites: SpriteCache,
    pub(crate) fetcher: Option<Arc<dyn Fetcher>>,
    unresolved: RefCell<Vec<String>>,
    generation: u64,
}

impl<'a> ExtractionSession<'a> {
    pub(crate) fn new(
        document: &'a HostDocument,
        styles: &'a dyn StyleResolver,
        options: ExtractOptions,
        generation: u64,
    ) -> Self {
        Self {
            document,
            styles,
            hit_tester: None,
            options,
            sprites: SpriteCache::new(),
            fetcher: None,
            unresolved: RefCell::new(Vec::new()),
            generation,
        }
    }

    pub(crate) fn with_network(mut self, sprites: SpriteCache, fetcher: Arc<dyn Fetcher>) -> Self {
        self.sprites = sprites;
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_hit_tester(mut self, hit_tester: &'a dyn HitTester) -> Self {
        self.hit_tester = Some(hit_tester);
        self
    }

    pub fn document(&self) -> &HostDocument {
        self.document
    }

    pub fn styles(&self) -> &dyn StyleResolver {
        self.styles
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn unresolved_references(&self) -> Vec<String> {
        self.unresolved.borrow().clone()
    }

    pub(crate) fn record_unresolved(&self, id: &str) {
        let mut unresolved = self.unresolved.borrow_mut();
        if !unresolved.iter().any(|known| known == id) {
            unresolved.push(id.to_string());
        }
    }
}
