use crate::ebay::config::{ENDUSER_CTX, MARKETPLACE_ID, ROOT};
use crate::http::build_client;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EbayBrowseError {
    #[error("search request failed: {0}")]
    Request(String),
    #[error("search returned HTTP {0}")]
    Status(u16),
    #[error("invalid search response: {0}")]
    Deserialize(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemPrice {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemSummary {
    #[serde(default)]
    pub price: Option<ItemPrice>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    #[serde(default)]
    pub item_summaries: Option<Vec<ItemSummary>>,
}

/// Thin client for the marketplace Browse search API.
pub struct BrowseClient {
    base_url: String,
    marketplace: String,
    enduser_ctx: String,
    http: Client,
}

impl BrowseClient {
    pub fn from_env() -> Self {
        Self::new(ROOT.clone(), MARKETPLACE_ID.clone(), ENDUSER_CTX.clone())
    }

    pub fn new(
        base_url: impl Into<String>,
        marketplace: impl Into<String>,
        enduser_ctx: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            marketplace: marketplace.into(),
            enduser_ctx: enduser_ctx.into(),
            http: build_client(),
        }
    }

    /// Fixed-price listings matching `query`, cheapest first.
    pub async fn search_item_summaries(
        &self,
        query: &str,
        limit: u32,
        access_token: &str,
    ) -> Result<SearchResponse, EbayBrowseError> {
        let url = format!("{}/buy/browse/v1/item_summary/search", self.base_url);
        let limit = limit.to_string();
        let response = self
            .http
            .get(url)
            .query(&[
                ("q", query),
                ("limit", limit.as_str()),
                ("filter", "buyingOptions:{FIXED_PRICE}"),
                ("sort", "price"),
            ])
            .bearer_auth(access_token)
            .header("X-EBAY-C-MARKETPLACE-ID", &self.marketplace)
            .header("X-EBAY-C-ENDUSERCTX", &self.enduser_ctx)
            .send()
            .await
            .map_err(|err| EbayBrowseError::Request(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EbayBrowseError::Status(status.as_u16()));
        }

        response
            .json()
            .await
            .map_err(|err| EbayBrowseError::Deserialize(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn sends_marketplace_headers_and_query() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/buy/browse/v1/item_summary/search")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("q".into(), "pokemon Charizard 4 102".into()),
                Matcher::UrlEncoded("limit".into(), "50".into()),
                Matcher::UrlEncoded("sort".into(), "price".into()),
            ]))
            .match_header("X-EBAY-C-MARKETPLACE-ID", "EBAY_FR")
            .match_header("Authorization", "Bearer tok")
            .with_status(200)
            .with_body(r#"{"itemSummaries":[{"price":{"value":"12.50","currency":"EUR"}}]}"#)
            .create_async()
            .await;
        let client = BrowseClient::new(server.url(), "EBAY_FR", "contextualLocation=country=FR");

        let response = client
            .search_item_summaries("pokemon Charizard 4 102", 50, "tok")
            .await
            .expect("search");
        let items = response.item_summaries.expect("items");
        assert_eq!(items.len(), 1);
        assert_eq!(
            items[0].price.as_ref().and_then(|p| p.value.as_deref()),
            Some("12.50")
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_status_is_surfaced() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/buy/browse/v1/item_summary/search")
            .match_query(Matcher::Any)
            .with_status(429)
            .create_async()
            .await;
        let client = BrowseClient::new(server.url(), "EBAY_FR", "contextualLocation=country=FR");

        let err = client
            .search_item_summaries("pokemon Pikachu 58 102", 50, "tok")
            .await
            .expect_err("should fail");
        assert!(matches!(err, EbayBrowseError::Status(429)));
    }

    #[tokio::test]
    async fn empty_body_deserializes_to_no_items() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/buy/browse/v1/item_summary/search")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"total":0}"#)
            .create_async()
            .await;
        let client = BrowseClient::new(server.url(), "EBAY_FR", "contextualLocation=country=FR");

        let response = client
            .search_item_summaries("pokemon Mew 8 102", 50, "tok")
            .await
            .expect("search");
        assert!(response.item_summaries.is_none());
    }
}
