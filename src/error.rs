use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("decode error: {0}")]
    Decode(String),
    #[error("fetch of {url} failed: {message}")]
    Network { url: String, message: String },
    #[error("unresolved <use> reference: #{0}")]
    UnresolvedReference(String),
    #[error("content is not an svg document")]
    NotSvg,
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractError {
    pub(crate) fn network(url: &str, message: impl ToString) -> Self {
        ExtractError::Network {
            url: url.to_string(),
            message: message.to_string(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExtractError::Decode(_) => "decode",
            ExtractError::Network { .. } => "network",
            ExtractError::UnresolvedReference(_) => "unresolved_reference",
            ExtractError::NotSvg => "not_svg",
            ExtractError::InvalidConfiguration(_) => "invalid_configuration",
            ExtractError::Io(_) => "io",
        }
    }
}
