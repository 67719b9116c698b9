use thiserror::Error;

#[derive(Debug, Error)]
pub enum LabelError {
    /// Rejected before any drawing begins.
    #[error("invalid input: {0}")]
    Input(String),
    /// Encoder-level failure; there is no usable output.
    #[error("render error: {reason}")]
    Render { reason: String },
    #[error("asset error: {0}")]
    Asset(String),
    #[error("pdf error: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl LabelError {
    pub(crate) fn render(reason: impl Into<String>) -> Self {
        LabelError::Render {
            reason: reason.into(),
        }
    }

    pub(crate) fn input(message: impl Into<String>) -> Self {
        LabelError::Input(message.into())
    }
}

/// Failure confined to a single template element. The compositor logs it and moves on.
#[derive(Debug, Error)]
pub enum ElementDrawError {
    #[error("image element has no filename")]
    MissingFilename,
    #[error("field {field} is missing or not a positive number")]
    MalformedField { field: &'static str },
    #[error("image asset not found: {0}")]
    MissingAsset(String),
    #[error("image asset {name} could not be decoded: {reason}")]
    UndecodableImage { name: String, reason: String },
    #[error("asset name escapes the image directory: {0}")]
    InvalidAssetName(String),
    #[error("barcode rendering failed: {0}")]
    Barcode(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
