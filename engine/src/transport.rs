//! The RPC boundary between the client replica and the server.
//!
//! Network calls are the only suspension points of a sync pass, so this is
//! the only async seam in the crate. Implementations must leave no trace on
//! failure: the controller treats any `Err` as "not attempted".

use crate::{
    error::Result,
    protocol::{
        CatalogResponse, PushRequest, PushResponse, SyncCategoriesRequest,
        SyncCategoriesResponse, SyncInventoryRequest, SyncInventoryResponse, SyncOrdersRequest,
        SyncOrdersResponse,
    },
};
use std::future::Future;

/// A sync transport handles communication with the authoritative replica.
pub trait SyncTransport: Send + Sync {
    /// Push categories and receive the full server list.
    fn sync_categories(
        &self,
        request: &SyncCategoriesRequest,
    ) -> impl Future<Output = Result<SyncCategoriesResponse>> + Send;

    /// Record inventory transactions as stock deltas.
    fn sync_inventory(
        &self,
        request: &SyncInventoryRequest,
    ) -> impl Future<Output = Result<SyncInventoryResponse>> + Send;

    /// Create orders and items from flat lists and return the id map.
    fn sync_orders(
        &self,
        request: &SyncOrdersRequest,
    ) -> impl Future<Output = Result<SyncOrdersResponse>> + Send;

    /// Authoritative end-of-day push.
    fn push(&self, request: &PushRequest) -> impl Future<Output = Result<PushResponse>> + Send;

    /// Current catalog and stock snapshot.
    fn pull_catalog(&self) -> impl Future<Output = Result<CatalogResponse>> + Send;
}

#[cfg(feature = "http")]
pub use http::HttpTransport;

#[cfg(feature = "http")]
mod http {
    use super::SyncTransport;
    use crate::{error::Result, protocol::*, Error};
    use serde::{de::DeserializeOwned, Serialize};
    use std::time::Duration;

    const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// JSON over HTTP against the possync server.
    #[derive(Debug, Clone)]
    pub struct HttpTransport {
        base_url: String,
        client: reqwest::Client,
    }

    impl HttpTransport {
        pub fn new(base_url: impl Into<String>) -> Result<Self> {
            let client = reqwest::Client::builder()
                .timeout(DEFAULT_TIMEOUT)
                .build()
                .map_err(transport_error)?;
            Ok(Self::with_client(base_url, client))
        }

        pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
            let base_url = base_url.into().trim_end_matches('/').to_string();
            Self { base_url, client }
        }

        pub fn base_url(&self) -> &str {
            &self.base_url
        }

        async fn post<Req, Res>(&self, path: &str, body: &Req) -> Result<Res>
        where
            Req: Serialize + ?Sized,
            Res: DeserializeOwned,
        {
            let url = format!("{}{}", self.base_url, path);
            tracing::debug!(%url, "POST");
            let response = self
                .client
                .post(&url)
                .json(body)
                .send()
                .await
                .map_err(transport_error)?;
            decode(response).await
        }

        async fn get<Res: DeserializeOwned>(&self, path: &str) -> Result<Res> {
            let url = format!("{}{}", self.base_url, path);
            tracing::debug!(%url, "GET");
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(transport_error)?;
            decode(response).await
        }
    }

    async fn decode<Res: DeserializeOwned>(response: reqwest::Response) -> Result<Res> {
        let status = response.status();
        if status.is_success() {
            return response.json().await.map_err(|e| Error::Codec(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            Err(Error::Rejected(format!("{status}: {body}")))
        } else {
            Err(Error::Transport {
                message: format!("{status}: {body}"),
                retryable: true,
            })
        }
    }

    fn transport_error(e: reqwest::Error) -> Error {
        Error::Transport {
            retryable: e.is_timeout() || e.is_connect() || e.is_request(),
            message: e.to_string(),
        }
    }

    impl SyncTransport for HttpTransport {
        async fn sync_categories(
            &self,
            request: &SyncCategoriesRequest,
        ) -> Result<SyncCategoriesResponse> {
            self.post("/api/sync/category", request).await
        }

        async fn sync_inventory(
            &self,
            request: &SyncInventoryRequest,
        ) -> Result<SyncInventoryResponse> {
            self.post("/api/sync/inventory", request).await
        }

        async fn sync_orders(&self, request: &SyncOrdersRequest) -> Result<SyncOrdersResponse> {
            self.post("/api/sync/orders", request).await
        }

        async fn push(&self, request: &PushRequest) -> Result<PushResponse> {
            self.post("/api/sync/push", request).await
        }

        async fn pull_catalog(&self) -> Result<CatalogResponse> {
            self.get("/api/sync/catalog").await
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn base_url_is_trimmed() {
            let transport = HttpTransport::with_client("http://till:3000/", reqwest::Client::new());
            assert_eq!(transport.base_url(), "http://till:3000");
        }
    }
}
