use std::sync::Arc;
use std::time::Duration;

use crate::error::ExtractError;

// Plain GET of a text body. Implementations must apply their own bounded timeout.
pub trait Fetcher: Send + Sync {
    fn get_text(&self, url: &str) -> Result<String, ExtractError>;
}

#[cfg(feature = "http")]
pub struct HttpFetcher {
    timeout: Duration,
}

#[cfg(feature = "http")]
impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[cfg(feature = "http")]
impl Fetcher for HttpFetcher {
    fn get_text(&self, url: &str) -> Result<String, ExtractError> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ExtractError::network(url, "unsupported scheme"));
        }
        let response = ureq::get(url)
            .set("accept", "image/svg+xml,text/xml;q=0.9,*/*;q=0.5")
            .timeout(self.timeout)
            .call()
            .map_err(|err| match err {
                ureq::Error::Status(code, _) => {
                    ExtractError::network(url, format!("status {code}"))
                }
                other => ExtractError::network(url, other),
            })?;
        response
            .into_string()
            .map_err(|err| ExtractError::network(url, err))
    }
}

pub struct OfflineFetcher;

impl Fetcher for OfflineFetcher {
    fn get_text(&self, url: &str) -> Result<String, ExtractError> {
        Err(ExtractError::network(url, "network access disabled"))
    }
}

pub(crate) fn default_fetcher(timeout: Duration) -> Arc<dyn Fetcher> {
    #[cfg(feature = "http")]
    {
        Arc::new(HttpFetcher::new(timeout))
    }
    #[cfg(not(feature = "http"))]
    {
        let _ = timeout;
        Arc::new(OfflineFetcher)
    }
}

pub(crate) fn ensure_svg_document(text: &str) -> Result<(), ExtractError> {
    let doc = parse_xml(text)?;
    if doc.root_element().tag_name().name() == "svg" {
        Ok(())
    } else {
        Err(ExtractError::NotSvg)
    }
}

// DTDs are allowed; exported icon files often carry one.
pub(crate) fn parse_xml(text: &str) -> Result<roxmltree::Document<'_>, ExtractError> {
    let options = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..roxmltree::ParsingOptions::default()
    };
    roxmltree::Document::parse_with_options(text.trim_start_matches('\u{feff}'), options)
        .map_err(|err| ExtractError::Decode(format!("svg parse: {err}")))
}
