//! Response body encodings.

/// Body encoding of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    /// Structured JSON.
    Json,
    /// OpenMetrics exposition text.
    Text,
}

impl ResponseFormat {
    /// `Content-Type` header value.
    #[must_use]
    pub const fn content_type(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Text => "text/plain; version=0.0.4; charset=utf-8",
        }
    }
}
