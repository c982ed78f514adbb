/// Failure to install a style. Raised synchronously by the constructors and by every setter that
/// recompiles the style, and never caught by the decoder itself.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Missing or empty configuration, such as a precompiled style set without a style asset.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Style text could not be parsed. `details` holds the message of the underlying parser.
    #[error("{message}: {details}")]
    Parse { message: String, details: String },

    /// A declared asset could not be loaded.
    #[error("Asset error: {0}")]
    Asset(String),

    /// Style asset name has a suffix that no front-end understands.
    #[error("Unsupported style format: {0}")]
    UnsupportedFormat(String),
}

impl Error {
    pub(crate) fn parse(message: &str, details: impl ToString) -> Self {
        Self::Parse {
            message: message.to_owned(),
            details: details.to_string(),
        }
    }
}
