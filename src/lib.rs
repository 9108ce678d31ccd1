mod datauri;
mod debug;
mod document;
mod error;
mod fallback;
mod fetch;
mod locate;
mod naming;
mod normalize;
mod session;
mod source;
mod sprite;
mod style;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use kuchiki::NodeRef;

pub use datauri::decode_svg_data_uri;
use debug::DebugLogger;
pub use document::{HostDocument, ShadowMode, ShadowRoot};
pub use error::ExtractError;
pub use fallback::FallbackTier;
#[cfg(feature = "http")]
pub use fetch::HttpFetcher;
pub use fetch::{Fetcher, OfflineFetcher};
pub use locate::{BoxLayout, HitTester, LocateStep, Rect, locate};
pub use naming::{derive_name, resolve_name, sanitize_name};
pub use normalize::{CleanSvgDocument, ShapeKind, ShapeNode, normalize};
pub use session::{ExtractOptions, ExtractionSession};
pub use source::{CssSource, Payload, SourceDescriptor, SourceKind, classify};
pub use sprite::{SpriteCache, discover_sprite_urls, find_fragment};
pub use style::{CascadeResolver, PseudoTarget, StyleResolver};

#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub content: String,
    pub name: String,
    pub size_bytes: usize,
    pub kind: SourceKind,
}

impl Extraction {
    pub fn size_kb(&self) -> String {
        format!("{:.1}", self.size_bytes as f64 / 1024.0)
    }

    pub fn file_name(&self) -> String {
        format!("{}.svg", self.name)
    }
}

pub struct Extractor {
    options: ExtractOptions,
    fetcher: Arc<dyn Fetcher>,
    sprites: SpriteCache,
    debug: Option<Arc<DebugLogger>>,
    generation: AtomicU64,
}

#[derive(Clone)]
pub struct ExtractorBuilder {
    options: ExtractOptions,
    fetcher: Option<Arc<dyn Fetcher>>,
    sprite_cache: Option<SpriteCache>,
    debug_path: Option<PathBuf>,
}

impl Extractor {
    pub fn builder() -> ExtractorBuilder {
        ExtractorBuilder::new()
    }

    pub fn options(&self) -> &ExtractOptions {
        &self.options
    }

    pub fn sprite_cache(&self) -> &SpriteCache {
        &self.sprites
    }

    // Opens a session for one user gesture. Each call bumps the generation, so results
    // produced under an older session can be recognized as stale.
    pub fn session<'a>(
        &self,
        document: &'a HostDocument,
        styles: &'a dyn StyleResolver,
    ) -> ExtractionSession<'a> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        ExtractionSession::new(document, styles, self.options.clone(), generation)
            .with_network(self.sprites.clone(), Arc::clone(&self.fetcher))
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    pub fn inspect(
        &self,
        session: &ExtractionSession<'_>,
        x: f32,
        y: f32,
        target: &NodeRef,
    ) -> Option<SourceDescriptor> {
        let Some((candidate, step)) = locate::locate_with_step(session, x, y, target) else {
            self.trace("locate", &[("result", "miss")]);
            return None;
        };
        self.trace("locate", &[("step", step.as_str())]);

        let descriptor = classify(session, &candidate);
        match &descriptor {
            Some(found) => {
                let kind = found.kind.label();
                let payload = if found.url().is_some() { "url" } else { "content" };
                self.trace("classify", &[("kind", kind.as_str()), ("payload", payload)]);
            }
            None => self.trace("classify", &[("result", "none")]),
        }
        descriptor
    }

    // Every failure is logged and ends as `None`.
    pub fn materialize(
        &self,
        session: &ExtractionSession<'_>,
        descriptor: &SourceDescriptor,
    ) -> Option<Extraction> {
        let result = self.content_for(session, descriptor);
        let extraction = match result {
            Ok(content) => {
                let name = resolve_name(descriptor);
                self.trace("name", &[("name", name.as_str())]);
                Some(Extraction {
                    size_bytes: content.len(),
                    content,
                    name,
                    kind: descriptor.kind,
                })
            }
            Err(err) => {
                log::warn!("extraction of {} source failed: {err}", descriptor.kind.label());
                let message = err.to_string();
                self.trace("error", &[("error", err.label()), ("message", message.as_str())]);
                None
            }
        };
        if let Some(logger) = self.debug.as_deref() {
            logger.emit_summary("materialize");
        }
        extraction
    }

    pub fn extract(
        &self,
        session: &ExtractionSession<'_>,
        x: f32,
        y: f32,
        target: &NodeRef,
    ) -> Option<Extraction> {
        let descriptor = self.inspect(session, x, y, target)?;
        self.materialize(session, &descriptor)
    }

    fn content_for(
        &self,
        session: &ExtractionSession<'_>,
        descriptor: &SourceDescriptor,
    ) -> Result<String, ExtractError> {
        match (&descriptor.kind, &descriptor.payload) {
            (SourceKind::Inline, Payload::Content(serialized)) => {
                Ok(self.normalize_inline(session, &descriptor.element, serialized))
            }
            (SourceKind::Sprite, Payload::Url(url)) => self.fetch_sprite(session, descriptor, url),
            (_, Payload::Content(content)) => Ok(content.clone()),
            (_, Payload::Url(url)) => self.fetch_document(session, descriptor, url),
        }
    }

    fn normalize_inline(
        &self,
        session: &ExtractionSession<'_>,
        svg: &NodeRef,
        serialized: &str,
    ) -> String {
        if normalize::loses_content(session, svg) {
            self.trace("normalize", &[("result", "computed_style")]);
            return fallback::computed_style_serialize(session, svg);
        }

        let (clean, unresolved) = normalize::normalize_collecting(session, svg, None, None);
        if unresolved.is_empty() {
            if clean.is_empty() {
                self.trace("normalize", &[("result", "empty")]);
                return serialized.to_string();
            }
            self.count("shapes", clean.shapes.len() as u64);
            return clean.to_markup();
        }

        self.count("unresolved", unresolved.len() as u64);
        match fallback::recover(session, svg, &unresolved) {
            Some(recovery) => {
                self.trace("fallback", &[("tier", recovery.tier.as_str())]);
                self.count("sprites_scheduled", recovery.sprites_scheduled as u64);
                recovery.content
            }
            None => serialized.to_string(),
        }
    }

    fn fetch_sprite(
        &self,
        session: &ExtractionSession<'_>,
        descriptor: &SourceDescriptor,
        url: &str,
    ) -> Result<String, ExtractError> {
        let Some(id) = descriptor.fragment.as_deref() else {
            return self.fetch_document(session, descriptor, url);
        };
        let symbol = sprite::fetch_symbol(self.fetcher.as_ref(), &self.sprites, url, id)?
            .ok_or_else(|| ExtractError::UnresolvedReference(id.to_string()))?;
        self.trace("fetch", &[("url", url), ("fragment", id)]);
        let user = source::external_use(&descriptor.element)
            .unwrap_or_else(|| descriptor.element.clone());
        self.symbol_document(session, &symbol, id, Some(&user))
            .ok_or_else(|| ExtractError::Decode(format!("#{id} has no drawable shapes")))
    }

    fn fetch_document(
        &self,
        session: &ExtractionSession<'_>,
        descriptor: &SourceDescriptor,
        url: &str,
    ) -> Result<String, ExtractError> {
        let text = self.fetcher.get_text(url)?;
        self.trace("fetch", &[("url", url)]);
        if let Some(id) = descriptor.fragment.as_deref() {
            if let Some(symbol) = find_fragment(&text, id)? {
                if let Some(markup) = self.symbol_document(session, &symbol, id, None) {
                    return Ok(markup);
                }
            }
        }
        fetch::ensure_svg_document(&text)?;
        Ok(text)
    }

    fn symbol_document(
        &self,
        session: &ExtractionSession<'_>,
        markup: &str,
        id: &str,
        user: Option<&NodeRef>,
    ) -> Option<String> {
        let wrapper = document::parse_svg_fragment(markup)?;
        let symbol = wrapper
            .inclusive_descendants()
            .find(|node| document::attr(node, "id").as_deref() == Some(id))?;
        let fill = user.and_then(|u| session.styles.computed_fill(u));
        let stroke = user.and_then(|u| session.styles.computed_stroke(u));
        let (clean, _) =
            normalize::normalize_collecting(session, &symbol, fill.as_deref(), stroke.as_deref());
        if clean.is_empty() {
            return None;
        }
        Some(clean.to_markup())
    }

    fn trace(&self, stage: &str, fields: &[(&str, &str)]) {
        if let Some(logger) = self.debug.as_deref() {
            logger.event(stage, fields);
            logger.increment(stage, 1);
        }
    }

    fn count(&self, key: &str, amount: u64) {
        if let Some(logger) = self.debug.as_deref() {
            logger.increment(key, amount);
        }
    }
}

impl Default for ExtractorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractorBuilder {
    pub fn new() -> Self {
        Self {
            options: ExtractOptions::default(),
            fetcher: None,
            sprite_cache: None,
            debug_path: None,
        }
    }

    // Descendants visited by the locator's bounded scan.
    pub fn descendant_scan_limit(mut self, limit: usize) -> Self {
        self.options.descendant_scan_limit = limit;
        self
    }

    // Node visits allowed per id lookup across shadow trees.
    pub fn shadow_search_limit(mut self, limit: usize) -> Self {
        self.options.shadow_search_limit = limit;
        self
    }

    pub fn max_use_depth(mut self, depth: usize) -> Self {
        self.options.max_use_depth = depth;
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.options.fetch_timeout = timeout;
        self
    }

    // Fetch candidate sprite sheets in the background when a reference stays unresolved.
    pub fn sprite_enrichment(mut self, enabled: bool) -> Self {
        self.options.sprite_enrichment = enabled;
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    // Share discovered sprite symbols between extractors.
    pub fn sprite_cache(mut self, cache: SpriteCache) -> Self {
        self.sprite_cache = Some(cache);
        self
    }

    // Enable debug logging to a JSONL file for stage-by-stage inspection.
    pub fn debug_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.debug_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<Extractor, ExtractError> {
        if self.options.descendant_scan_limit == 0 {
            return Err(ExtractError::InvalidConfiguration(
                "descendant_scan_limit must be > 0".to_string(),
            ));
        }
        if self.options.shadow_search_limit == 0 {
            return Err(ExtractError::InvalidConfiguration(
                "shadow_search_limit must be > 0".to_string(),
            ));
        }
        if self.options.max_use_depth == 0 {
            return Err(ExtractError::InvalidConfiguration(
                "max_use_depth must be > 0".to_string(),
            ));
        }
        if self.options.fetch_timeout.is_zero() {
            return Err(ExtractError::InvalidConfiguration(
                "fetch_timeout must be > 0".to_string(),
            ));
        }
        let debug = if let Some(path) = self.debug_path {
            Some(Arc::new(DebugLogger::new(path)?))
        } else {
            None
        };
        let fetcher = self
            .fetcher
            .unwrap_or_else(|| fetch::default_fetcher(self.options.fetch_timeout));
        Ok(Extractor {
            options: self.options,
            fetcher,
            sprites: self.sprite_cache.unwrap_or_default(),
            debug,
            generation: AtomicU64::new(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapFetcher {
        pages: HashMap<String, String>,
    }

    impl MapFetcher {
        fn new(pages: &[(&str, &str)]) -> Arc<Self> {
            Arc::new(Self {
                pages: pages
                    .iter()
                    .map(|(url, body)| (url.to_string(), body.to_string()))
                    .collect(),
            })
        }
    }

    impl Fetcher for MapFetcher {
        fn get_text(&self, url: &str) -> Result<String, ExtractError> {
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| ExtractError::network(url, "status 404"))
        }
    }

    const LOGO: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 4 4"><rect width="4" height="4"/></svg>"#;
    const SHEET: &str = r##"<svg xmlns="http://www.w3.org/2000/svg"><symbol id="cart" viewBox="0 0 20 20"><path d="M2 2h16"/></symbol></svg>"##;

    fn extractor() -> Extractor {
        Extractor::builder()
            .fetcher(MapFetcher::new(&[
                ("https://example.com/img/logo.svg", LOGO),
                ("https://example.com/img/page.svg", "<html><body></body></html>"),
                ("https://example.com/sprite.svg", SHEET),
            ]))
            .sprite_enrichment(false)
            .build()
            .unwrap()
    }

    fn page(html: &str) -> HostDocument {
        HostDocument::parse_html(html)
            .with_base_url("https://example.com/")
            .unwrap()
    }

    #[test]
    fn use_bearing_icon_is_extracted_end_to_end() {
        let doc = page(
            r##"<html><body>
              <svg style="display:none"><symbol id="x" viewBox="0 0 10 10"><circle cx="5" cy="5" r="4"/></symbol></svg>
              <button><svg class="icon-star" fill="red"><use id="u" href="#x"/></svg></button>
            </body></html>"##,
        );
        let styles = CascadeResolver::new(&doc);
        let extractor = extractor();
        let session = extractor.session(&doc, &styles);
        let target = doc.select_first("#u").unwrap();
        let extraction = extractor.extract(&session, 0.0, 0.0, &target).unwrap();
        assert_eq!(extraction.kind, SourceKind::UseResolved);
        assert_eq!(extraction.name, "star");
        assert_eq!(extraction.file_name(), "star.svg");
        assert!(extraction.content.contains("viewBox=\"0 0 10 10\""));
        assert!(extraction.content.contains("<circle cx=\"5\" cy=\"5\" r=\"4\" fill=\"red\"/>"));
        assert_eq!(extraction.size_bytes, extraction.content.len());
    }

    #[test]
    fn gradient_painted_use_keeps_its_definitions() {
        let doc = page(
            r##"<html><body>
              <svg style="display:none"><symbol id="x" viewBox="0 0 10 10"><circle cx="5" cy="5" r="4"/></symbol></svg>
              <svg id="s"><defs><linearGradient id="g"><stop offset="1"/></linearGradient></defs><use id="u" href="#x" fill="url(#g)"/></svg>
            </body></html>"##,
        );
        let styles = CascadeResolver::new(&doc);
        let extractor = extractor();
        let session = extractor.session(&doc, &styles);
        let target = doc.select_first("#u").unwrap();
        let extraction = extractor.extract(&session, 0.0, 0.0, &target).unwrap();
        assert_eq!(extraction.kind, SourceKind::Inline);
        let content = extraction.content.to_ascii_lowercase();
        assert!(content.contains("<lineargradient id=\"g\""), "{content}");
        assert!(content.contains("<use"), "{content}");
    }

    #[test]
    fn image_url_is_fetched_on_commit_only() {
        let doc = page(r##"<a id="a"><img src="/img/logo.svg"></a>"##);
        let styles = CascadeResolver::new(&doc);
        let extractor = extractor();
        let session = extractor.session(&doc, &styles);
        let target = doc.select_first("#a").unwrap();
        let descriptor = extractor.inspect(&session, 0.0, 0.0, &target).unwrap();
        assert_eq!(descriptor.url(), Some("https://example.com/img/logo.svg"));
        let extraction = extractor.materialize(&session, &descriptor).unwrap();
        assert_eq!(extraction.content, LOGO);
        assert_eq!(extraction.name, "logo");
    }

    #[test]
    fn external_sprite_symbol_is_rebuilt_with_use_paint() {
        let doc = page(r##"<svg id="s"><use href="/sprite.svg#cart" stroke="navy"/></svg>"##);
        let styles = CascadeResolver::new(&doc);
        let extractor = extractor();
        let session = extractor.session(&doc, &styles);
        let target = doc.select_first("#s").unwrap();
        let extraction = extractor.extract(&session, 0.0, 0.0, &target).unwrap();
        assert_eq!(extraction.kind, SourceKind::Sprite);
        assert_eq!(extraction.name, "cart");
        assert!(extraction.content.contains("viewBox=\"0 0 20 20\""), "{}", extraction.content);
        assert!(extraction.content.contains("stroke=\"navy\""), "{}", extraction.content);
        assert!(extractor.sprite_cache().symbol("cart").is_some());
    }

    #[test]
    fn failures_end_as_none() {
        let doc = page(
            r##"<img id="missing" src="/img/gone.svg"><img id="html" src="/img/page.svg">
               <img id="bad" src="data:image/svg+xml;base64,!!!"><div id="plain"></div>"##,
        );
        let styles = CascadeResolver::new(&doc);
        let extractor = extractor();
        let session = extractor.session(&doc, &styles);
        for id in ["#missing", "#html", "#bad", "#plain"] {
            let target = doc.select_first(id).unwrap();
            assert!(extractor.extract(&session, 0.0, 0.0, &target).is_none(), "{id}");
        }
    }

    #[test]
    fn unresolved_reference_still_yields_content() {
        let doc = page(r##"<svg id="s" viewBox="0 0 8 8"><use href="#nowhere"/><circle r="2"/></svg>"##);
        let styles = CascadeResolver::new(&doc);
        let extractor = extractor();
        let session = extractor.session(&doc, &styles);
        let target = doc.select_first("#s").unwrap();
        let extraction = extractor.extract(&session, 0.0, 0.0, &target).unwrap();
        assert_eq!(extraction.kind, SourceKind::Inline);
        assert!(extraction.content.contains("<circle"));
        assert_eq!(session.unresolved_references(), vec!["nowhere".to_string()]);
    }

    #[test]
    fn size_is_reported_in_kib_with_one_decimal() {
        let extraction = Extraction {
            content: "x".repeat(1434),
            name: "a".to_string(),
            size_bytes: 1434,
            kind: SourceKind::Inline,
        };
        assert_eq!(extraction.size_kb(), "1.4");
    }

    #[test]
    fn newer_session_makes_older_generation_stale() {
        let doc = page("<p></p>");
        let styles = CascadeResolver::new(&doc);
        let extractor = extractor();
        let first = extractor.session(&doc, &styles).generation();
        assert!(extractor.is_current(first));
        let second = extractor.session(&doc, &styles).generation();
        assert!(!extractor.is_current(first));
        assert!(extractor.is_current(second));
    }

    #[test]
    fn builder_rejects_zero_limits() {
        for builder in [
            Extractor::builder().descendant_scan_limit(0),
            Extractor::builder().shadow_search_limit(0),
            Extractor::builder().max_use_depth(0),
            Extractor::builder().fetch_timeout(Duration::ZERO),
        ] {
            assert!(matches!(
                builder.build(),
                Err(ExtractError::InvalidConfiguration(_))
            ));
        }
    }

    #[test]
    fn debug_log_records_stages_and_summary() {
        let path = std::env::temp_dir().join(format!("svgpick-trace-{}.jsonl", std::process::id()));
        let extractor = Extractor::builder()
            .fetcher(Arc::new(OfflineFetcher))
            .debug_log(&path)
            .build()
            .unwrap();
        let doc = page(r##"<svg id="s"><path d="M0 0h2"/></svg>"##);
        let styles = CascadeResolver::new(&doc);
        let session = extractor.session(&doc, &styles);
        let target = doc.select_first("#s").unwrap();
        assert!(extractor.extract(&session, 0.0, 0.0, &target).is_some());
        let trace = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert!(trace.contains("\"type\":\"extract.locate\",\"step\":\"target\""), "{trace}");
        assert!(trace.contains("\"type\":\"extract.classify\",\"kind\":\"inline\""), "{trace}");
        assert!(trace.contains("\"type\":\"extract.summary\",\"context\":\"materialize\""), "{trace}");
    }
}
