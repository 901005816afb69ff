use thiserror::Error;

/// Errors returned by the Magento REST client.
#[derive(Debug, Error)]
pub enum MagentoError {
    /// Network or TLS failure from the underlying HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote API answered with a non-2xx status. The response body is
    /// captured (truncated) so callers can surface it in error messages.
    #[error("Magento API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body could not be deserialized into the expected type.
    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// The connection's base URL is not a valid absolute URL.
    #[error("invalid store URL \"{store_url}\": {reason}")]
    InvalidStoreUrl { store_url: String, reason: String },
}
