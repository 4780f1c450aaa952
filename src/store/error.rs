#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The store could not be reached or the call itself failed.
    SourceUnavailable(String),
    /// The store answered with data that does not fit the expected shape.
    MalformedResponse(String),
}

impl GatewayError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::SourceUnavailable(_) => "source_unavailable",
            GatewayError::MalformedResponse(_) => "malformed_response",
        }
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayError::SourceUnavailable(e) => write!(f, "record store unavailable: {e}"),
            GatewayError::MalformedResponse(e) => write!(f, "malformed store response: {e}"),
        }
    }
}

impl std::error::Error for GatewayError {}
