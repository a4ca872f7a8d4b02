use crate::error::ApiError;
use crate::model::{
    Asset, LedgerEntry, MarketType, PortfolioSummary, PortfolioView, Transaction, TransactionType,
};
use log::debug;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::collections::HashMap;

pub const DEFAULT_CLOSES_PATH: &str = "/all_assets_last3closes.csv";

/// Client for the portfolio backend. Cheap to clone.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    closes_path: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str, closes_path: &str) -> Self {
        ApiClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            closes_path: closes_path.to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        build: impl FnOnce(RequestBuilder) -> RequestBuilder,
    ) -> Result<Response, ApiError> {
        let url = self.url(path);
        debug!("{method} {url}");

        let response = build(self.client.request(method, &url))
            .send()
            .await
            .map_err(|source| ApiError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status { url, status });
        }
        Ok(response)
    }

    async fn json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let url = response.url().to_string();
        response
            .json::<T>()
            .await
            .map_err(|source| ApiError::Decode { url, source })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.send(Method::GET, path, |r| r).await?;
        Self::json(response).await
    }

    pub async fn market_types(&self) -> Result<Vec<MarketType>, ApiError> {
        self.get_json("/api/market-types").await
    }

    pub async fn assets(&self) -> Result<Vec<Asset>, ApiError> {
        self.get_json("/api/assets").await
    }

    pub async fn assets_by_market(&self, market: &str) -> Result<Vec<Asset>, ApiError> {
        self.get_json(&format!("/api/assets/market/{market}")).await
    }

    pub async fn asset(&self, ticker: &str) -> Result<Asset, ApiError> {
        self.get_json(&format!("/api/assets/{ticker}")).await
    }

    pub async fn portfolio(&self, user_id: i64) -> Result<PortfolioView, ApiError> {
        self.get_json(&format!("/api/portfolio/{user_id}")).await
    }

    /// Share of portfolio value per market type, in percent.
    pub async fn distribution(&self, user_id: i64) -> Result<HashMap<String, f64>, ApiError> {
        self.get_json(&format!("/api/portfolio/{user_id}/portfolio-distribution"))
            .await
    }

    pub async fn summary(&self) -> Result<PortfolioSummary, ApiError> {
        self.get_json("/api/portfolio/summary").await
    }

    pub async fn portfolio_assets(&self) -> Result<Vec<Asset>, ApiError> {
        self.get_json("/api/portfolio/assets").await
    }

    pub async fn ledger(&self) -> Result<Vec<LedgerEntry>, ApiError> {
        self.get_json("/api/portfolio/transactions").await
    }

    pub async fn transaction_history(&self, user_id: i64) -> Result<Vec<Transaction>, ApiError> {
        let response = self
            .send(Method::GET, "/api/transactions/history", |r| {
                r.query(&[("userId", user_id)])
            })
            .await?;
        Self::json(response).await
    }

    pub async fn buy(
        &self,
        user_id: i64,
        ticker: &str,
        amount: f64,
        price: f64,
    ) -> Result<Transaction, ApiError> {
        let response = self
            .send(Method::POST, "/api/transactions/buy", |r| {
                r.query(&[
                    ("userId", user_id.to_string()),
                    ("ticker", ticker.to_string()),
                    ("amount", amount.to_string()),
                    ("price", price.to_string()),
                ])
            })
            .await?;
        Self::json(response).await
    }

    pub async fn sell(
        &self,
        user_id: i64,
        asset_id: i64,
        amount: f64,
        price: f64,
    ) -> Result<Transaction, ApiError> {
        let response = self
            .send(Method::POST, "/api/transactions/sell", |r| {
                r.query(&[
                    ("userId", user_id.to_string()),
                    ("assetId", asset_id.to_string()),
                    ("amount", amount.to_string()),
                    ("price", price.to_string()),
                ])
            })
            .await?;
        Self::json(response).await
    }

    pub async fn edit_transaction(
        &self,
        user_id: i64,
        transaction_id: i64,
        amount: f64,
        price: f64,
        kind: TransactionType,
    ) -> Result<Transaction, ApiError> {
        let path = format!("/api/transactions/{transaction_id}/edit");
        let response = self
            .send(Method::PUT, &path, |r| {
                r.query(&[
                    ("userId", user_id.to_string()),
                    ("amount", amount.to_string()),
                    ("price", price.to_string()),
                    ("type", kind.as_str().to_string()),
                ])
            })
            .await?;
        Self::json(response).await
    }

    pub async fn delete_transaction(
        &self,
        user_id: i64,
        transaction_id: i64,
    ) -> Result<(), ApiError> {
        let path = format!("/api/transactions/{transaction_id}");
        self.send(Method::DELETE, &path, |r| r.query(&[("userId", user_id)]))
            .await?;
        Ok(())
    }

    /// Raw text of the recent closes CSV.
    pub async fn closes_csv(&self) -> Result<String, ApiError> {
        let response = self.send(Method::GET, &self.closes_path, |r| r).await?;
        let url = response.url().to_string();
        response
            .text()
            .await
            .map_err(|source| ApiError::Decode { url, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const ASSET_JSON: &str = r#"{"id": 1, "ticker": "AAPL", "name": "Apple", "closePrice": 190.0}"#;

    #[tokio::test]
    async fn test_asset_by_ticker() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/assets/AAPL")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(ASSET_JSON)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url(), DEFAULT_CLOSES_PATH);
        let asset = client.asset("AAPL").await.unwrap();

        mock.assert_async().await;
        assert_eq!(asset.name, "Apple");
        assert_eq!(asset.close_price, Some(190.0));
    }

    #[tokio::test]
    async fn test_non_success_status_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/assets/NOPE")
            .with_status(404)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url(), DEFAULT_CLOSES_PATH);
        let err = client.asset("NOPE").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_bad_body_is_a_decode_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/market-types")
            .with_status(200)
            .with_body("<html>")
            .create_async()
            .await;

        let client = ApiClient::new(&server.url(), DEFAULT_CLOSES_PATH);
        let err = client.market_types().await.unwrap_err();
        assert!(matches!(err, ApiError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_closes_csv_uses_configured_path() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/data/closes.csv")
            .with_status(200)
            .with_body("Symbol,Category,Close_1\nAAPL,stocks,1\n")
            .create_async()
            .await;

        let client = ApiClient::new(&format!("{}/", server.url()), "/data/closes.csv");
        let text = client.closes_csv().await.unwrap();

        mock.assert_async().await;
        assert!(text.starts_with("Symbol"));
    }

    #[tokio::test]
    async fn test_buy_sends_query_parameters() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/transactions/buy")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("userId".into(), "1".into()),
                Matcher::UrlEncoded("ticker".into(), "AAPL".into()),
                Matcher::UrlEncoded("amount".into(), "2.5".into()),
                Matcher::UrlEncoded("price".into(), "190".into()),
            ]))
            .with_status(200)
            .with_body(format!(
                r#"{{"id": 11, "type": "BUY", "amount": 2.5, "price": 190.0, "asset": {ASSET_JSON}}}"#
            ))
            .create_async()
            .await;

        let client = ApiClient::new(&server.url(), DEFAULT_CLOSES_PATH);
        let tx = client.buy(1, "AAPL", 2.5, 190.0).await.unwrap();

        mock.assert_async().await;
        assert_eq!(tx.id, 11);
        assert_eq!(tx.kind, TransactionType::Buy);
    }

    #[tokio::test]
    async fn test_edit_and_delete() {
        let mut server = mockito::Server::new_async().await;
        let edit = server
            .mock("PUT", "/api/transactions/4/edit")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("userId".into(), "1".into()),
                Matcher::UrlEncoded("type".into(), "SELL".into()),
            ]))
            .with_status(200)
            .with_body(format!(
                r#"{{"id": 4, "type": "SELL", "amount": 1.0, "price": 3.0, "asset": {ASSET_JSON}}}"#
            ))
            .create_async()
            .await;
        let delete = server
            .mock("DELETE", "/api/transactions/4")
            .match_query(Matcher::UrlEncoded("userId".into(), "1".into()))
            .with_status(200)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url(), DEFAULT_CLOSES_PATH);
        let tx = client
            .edit_transaction(1, 4, 1.0, 3.0, TransactionType::Sell)
            .await
            .unwrap();
        client.delete_transaction(1, 4).await.unwrap();

        edit.assert_async().await;
        delete.assert_async().await;
        assert_eq!(tx.kind, TransactionType::Sell);
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_a_transport_error() {
        let client = ApiClient::new("http://127.0.0.1:9", DEFAULT_CLOSES_PATH);
        let err = client.assets().await.unwrap_err();
        assert!(matches!(err, ApiError::Transport { .. }));
    }
}
