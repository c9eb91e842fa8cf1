//! Session snapshot fetching
//!
//! After every successful open the live channel asks a [`SessionDataFetcher`]
//! for the full session state, so anything missed while disconnected is
//! recovered.

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use reqwest::{header, Client};

use crate::config::ClientConfig;
use crate::store::Snapshot;

/// Source of full session snapshots
pub trait SessionDataFetcher: Send + Sync {
    fn fetch(&self, session_id: &str) -> BoxFuture<'static, Result<Snapshot>>;
}

/// Fetches snapshots from the backend REST API
#[derive(Debug, Clone)]
pub struct HttpSnapshotFetcher {
    config: ClientConfig,
    client: Client,
}

impl HttpSnapshotFetcher {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self { config, client })
    }
}

impl SessionDataFetcher for HttpSnapshotFetcher {
    fn fetch(&self, session_id: &str) -> BoxFuture<'static, Result<Snapshot>> {
        let client = self.client.clone();
        let url = self.config.snapshot_url(session_id);
        let session_id = session_id.to_string();

        Box::pin(async move {
            let url = url?;
            tracing::debug!(%url, "fetching session snapshot");

            let response = client
                .get(url)
                .header(header::ACCEPT, "application/json")
                .send()
                .await
                .with_context(|| format!("snapshot request for {} failed", session_id))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("snapshot request for {} failed: {} - {}", session_id, status, body);
            }

            let retrospective = response
                .json::<serde_json::Value>()
                .await
                .with_context(|| format!("snapshot for {} is not valid JSON", session_id))?;

            Ok(Snapshot::new(retrospective))
        })
    }
}
