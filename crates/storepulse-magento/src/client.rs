//! HTTP client for the Magento 2 REST API.
//!
//! Wraps `reqwest` with Magento-specific URL construction (`searchCriteria`
//! pagination and `updated_at` filters), bearer-token auth, and typed error
//! handling. One client is shared across stores; each request carries a
//! [`StoreAuth`] naming the store's base URL and access token.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{header, Client, Url};
use serde::Deserialize;

use storepulse_core::DataType;

use crate::error::MagentoError;

/// Cap on how much of an error response body is carried in [`MagentoError::Status`].
const MAX_ERROR_BODY_LEN: usize = 2048;

/// Per-store credentials for a single request.
#[derive(Debug, Clone)]
pub struct StoreAuth {
    pub base_url: String,
    pub access_token: String,
}

/// One page of results from a paged Magento listing endpoint.
#[derive(Debug)]
pub struct Page {
    /// Raw item objects; parsing into typed records happens in
    /// `storepulse_core::raw`, not here.
    pub items: Vec<serde_json::Value>,
    /// Upstream's claimed total for the whole query. Display-only — callers
    /// must not trust it as a loop bound.
    pub total_count: i64,
}

/// A Magento store view, as returned by the store-views listing used for
/// connection tests.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreView {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    items: Vec<serde_json::Value>,
    #[serde(default)]
    total_count: i64,
}

/// Client for the Magento 2 REST API.
pub struct MagentoClient {
    client: Client,
}

impl MagentoClient {
    /// Creates a new client with the given request timeout and user agent.
    ///
    /// # Errors
    ///
    /// Returns [`MagentoError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed.
    pub fn new(timeout_secs: u64, user_agent: &str) -> Result<Self, MagentoError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }

    /// Fetches one page of orders or products.
    ///
    /// Builds `GET {base}/rest/V1/{orders|products}` with
    /// `searchCriteria[pageSize]` / `searchCriteria[currentPage]` and, when
    /// `since` is given, an `updated_at gt <since>` filter group
    /// (exclusive greater-than, so already-seen records are not refetched).
    ///
    /// # Errors
    ///
    /// - [`MagentoError::InvalidStoreUrl`] if the base URL does not parse.
    /// - [`MagentoError::Http`] on network failure.
    /// - [`MagentoError::Status`] on a non-2xx response, with the body captured.
    /// - [`MagentoError::Deserialize`] if the body is not the expected shape.
    pub async fn fetch_page(
        &self,
        auth: &StoreAuth,
        data_type: DataType,
        page: i64,
        page_size: i64,
        since: Option<DateTime<Utc>>,
    ) -> Result<Page, MagentoError> {
        let url = build_page_url(&auth.base_url, data_type, page, page_size, since)?;
        let body = self.request_json(&url, &auth.access_token).await?;

        let response: ListResponse =
            serde_json::from_value(body).map_err(|e| MagentoError::Deserialize {
                context: format!("{data_type} page {page}"),
                source: e,
            })?;

        Ok(Page {
            items: response.items,
            total_count: response.total_count,
        })
    }

    /// Performs a minimal read-only call (`GET /rest/V1/store/storeViews`) to
    /// verify the base URL and token. No side effects; the parsed view list
    /// is returned so callers can persist it.
    ///
    /// # Errors
    ///
    /// Same taxonomy as [`MagentoClient::fetch_page`]; any error means the
    /// connection is not usable.
    pub async fn test_connection(&self, auth: &StoreAuth) -> Result<Vec<StoreView>, MagentoError> {
        let url = endpoint_url(&auth.base_url, "rest/V1/store/storeViews")?;
        let body = self.request_json(&url, &auth.access_token).await?;

        serde_json::from_value(body).map_err(|e| MagentoError::Deserialize {
            context: "store/storeViews".to_string(),
            source: e,
        })
    }

    /// Sends an authenticated GET request and parses the response body as JSON.
    ///
    /// Non-2xx responses are read to completion so the body can be attached
    /// to [`MagentoError::Status`].
    async fn request_json(
        &self,
        url: &Url,
        access_token: &str,
    ) -> Result<serde_json::Value, MagentoError> {
        tracing::debug!(url = %url, "magento request");
        let response = self
            .client
            .get(url.clone())
            .header(header::AUTHORIZATION, format!("Bearer {access_token}"))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(MagentoError::Status {
                status: status.as_u16(),
                body: truncate_error_body(body),
            });
        }

        serde_json::from_str(&body).map_err(|e| MagentoError::Deserialize {
            context: url.to_string(),
            source: e,
        })
    }
}

/// Caps an error body at [`MAX_ERROR_BODY_LEN`] bytes, backing the cut up to
/// the nearest char boundary so multi-byte UTF-8 never splits.
fn truncate_error_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY_LEN {
        let mut cut = MAX_ERROR_BODY_LEN;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

/// Resolves `path` against the store base URL.
///
/// Normalises the base to end with exactly one slash so `Url::join` appends
/// rather than replacing the last path segment.
fn endpoint_url(base_url: &str, path: &str) -> Result<Url, MagentoError> {
    let normalised = format!("{}/", base_url.trim_end_matches('/'));
    let base = Url::parse(&normalised).map_err(|e| MagentoError::InvalidStoreUrl {
        store_url: base_url.to_string(),
        reason: e.to_string(),
    })?;
    base.join(path).map_err(|e| MagentoError::InvalidStoreUrl {
        store_url: base_url.to_string(),
        reason: e.to_string(),
    })
}

/// Builds the full paged-listing URL with `searchCriteria` query parameters.
fn build_page_url(
    base_url: &str,
    data_type: DataType,
    page: i64,
    page_size: i64,
    since: Option<DateTime<Utc>>,
) -> Result<Url, MagentoError> {
    let path = match data_type {
        DataType::Orders => "rest/V1/orders",
        DataType::Products => "rest/V1/products",
    };
    let mut url = endpoint_url(base_url, path)?;
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("searchCriteria[pageSize]", &page_size.to_string());
        pairs.append_pair("searchCriteria[currentPage]", &page.to_string());
        if let Some(since) = since {
            // Magento filter groups: field / value / condition_type triplet.
            pairs.append_pair(
                "searchCriteria[filter_groups][0][filters][0][field]",
                "updated_at",
            );
            pairs.append_pair(
                "searchCriteria[filter_groups][0][filters][0][value]",
                &since.format("%Y-%m-%d %H:%M:%S").to_string(),
            );
            pairs.append_pair(
                "searchCriteria[filter_groups][0][filters][0][condition_type]",
                "gt",
            );
        }
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn page_url_includes_pagination_params() {
        let url = build_page_url("https://shop.example.com", DataType::Orders, 3, 100, None)
            .expect("url should build");
        assert!(url.path().ends_with("rest/V1/orders"), "path: {url}");
        let query = url.query().expect("query string");
        assert!(query.contains("searchCriteria%5BpageSize%5D=100"), "{query}");
        assert!(
            query.contains("searchCriteria%5BcurrentPage%5D=3"),
            "{query}"
        );
        assert!(!query.contains("filter_groups"), "{query}");
    }

    #[test]
    fn page_url_includes_since_filter_when_present() {
        let since = Utc.with_ymd_and_hms(2025, 4, 3, 12, 30, 0).unwrap();
        let url = build_page_url(
            "https://shop.example.com",
            DataType::Orders,
            1,
            50,
            Some(since),
        )
        .expect("url should build");
        let query = url.query().expect("query string");
        assert!(query.contains("updated_at"), "{query}");
        assert!(query.contains("2025-04-03+12%3A30%3A00"), "{query}");
        assert!(query.contains("condition_type%5D=gt"), "{query}");
    }

    #[test]
    fn trailing_slash_on_base_url_is_normalised() {
        let a = build_page_url("https://shop.example.com/", DataType::Products, 1, 10, None)
            .expect("url should build");
        let b = build_page_url("https://shop.example.com", DataType::Products, 1, 10, None)
            .expect("url should build");
        assert_eq!(a, b);
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let err = build_page_url("not a url", DataType::Orders, 1, 10, None).unwrap_err();
        assert!(matches!(err, MagentoError::InvalidStoreUrl { .. }));
    }

    #[test]
    fn error_body_truncation_respects_char_boundaries() {
        let short = truncate_error_body("tiny".to_string());
        assert_eq!(short, "tiny");

        // 'é' is two bytes; placing it so the byte cap lands inside it must
        // not panic, and the result must stay valid UTF-8.
        let awkward = format!("{}é tail", "a".repeat(MAX_ERROR_BODY_LEN - 1));
        let cut = truncate_error_body(awkward);
        assert_eq!(cut.len(), MAX_ERROR_BODY_LEN - 1);
        assert!(cut.chars().all(|c| c == 'a'));

        let long = "x".repeat(MAX_ERROR_BODY_LEN * 2);
        assert_eq!(truncate_error_body(long).len(), MAX_ERROR_BODY_LEN);
    }
}
