//! Race discovery collaborators
//!
//! [`RaceDiscovery`] answers two questions: which races in a category are
//! active right now, and where to connect for a given race. The default
//! [`HttpRaceDiscovery`] asks the server's public JSON endpoints.

use crate::error::{BotError, Result};
use crate::types::{RaceStatus, RaceSummary, StatusValue};
use crate::utils::build_uri;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Source of active races
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RaceDiscovery: Send + Sync {
    /// Races currently listed for a category
    async fn list_active(&self, category: &str) -> Result<Vec<RaceSummary>>;

    /// WebSocket URL the bot should connect to for a race
    async fn room_url(&self, race: &RaceSummary) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct CategoryData {
    #[serde(default)]
    current_races: Vec<ListedRace>,
}

#[derive(Debug, Deserialize)]
struct ListedRace {
    name: String,
    status: StatusValue<RaceStatus>,
    #[serde(default)]
    data_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RaceDetail {
    #[serde(default)]
    websocket_bot_url: Option<String>,
}

/// Discovery over the server's HTTP API
#[derive(Debug, Clone)]
pub struct HttpRaceDiscovery {
    client: reqwest::Client,
    host: String,
    secure: bool,
}

impl HttpRaceDiscovery {
    pub fn new(host: impl Into<String>, secure: bool, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| BotError::ConfigurationError {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            host: host.into(),
            secure,
        })
    }

    fn http_url(&self, path: &str) -> String {
        build_uri(if self.secure { "https" } else { "http" }, &self.host, path)
    }

    fn ws_url(&self, path: &str) -> String {
        build_uri(if self.secure { "wss" } else { "ws" }, &self.host, path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| BotError::Discovery {
                message: format!("Request to {} failed: {}", url, e),
            })?;

        let body = response.text().await.map_err(|e| BotError::Discovery {
            message: format!("Failed to read response from {}: {}", url, e),
        })?;

        serde_json::from_str(&body).map_err(|e| {
            BotError::Discovery {
                message: format!("Unexpected response from {}: {}", url, e),
            }
            .into()
        })
    }
}

fn summaries(data: CategoryData) -> Vec<RaceSummary> {
    data.current_races
        .into_iter()
        .map(|race| RaceSummary {
            slug: race.name,
            status: race.status.value,
            data_url: race.data_url,
        })
        .collect()
}

#[async_trait]
impl RaceDiscovery for HttpRaceDiscovery {
    async fn list_active(&self, category: &str) -> Result<Vec<RaceSummary>> {
        let url = self.http_url(&format!("/{}/data", category));
        let data: CategoryData = self.get_json(&url).await?;
        Ok(summaries(data))
    }

    async fn room_url(&self, race: &RaceSummary) -> Result<String> {
        let data_url = race
            .data_url
            .clone()
            .unwrap_or_else(|| format!("/{}/data", race.slug));

        let detail: RaceDetail = self.get_json(&self.http_url(&data_url)).await?;
        let path = detail
            .websocket_bot_url
            .ok_or_else(|| BotError::Discovery {
                message: format!("Race {} has no bot websocket URL", race.slug),
            })?;

        Ok(self.ws_url(&path))
    }
}
