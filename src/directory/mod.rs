//! Participant directory.
//!
//! Resolves user ids to public profiles over the backend's REST API. A
//! conversation can only be addressed once its peer has been resolved here.

use crate::identity::{Credential, Participant, UserId};
use crate::utils::{ConfigError, DirectoryConfig, DirectoryError, Result};
use async_trait::async_trait;
use reqwest::{header::AUTHORIZATION, Client, StatusCode, Url};
use std::collections::BTreeMap;
use std::time::Duration;

/// Looks up participants by id or by search query
#[async_trait]
pub trait Directory: Send + Sync {
    /// Resolve one participant; `NotFound` on a non-success status
    async fn find_participant(&self, id: &UserId) -> Result<Participant>;

    /// Search participants by free-text query
    async fn search(&self, query: &str) -> Result<Vec<Participant>>;
}

/// Directory backed by the REST API
#[derive(Debug, Clone)]
pub struct HttpDirectory {
    client: Client,
    base_url: Url,
    credential: Credential,
    auth_scheme: String,
}

impl HttpDirectory {
    /// Create a directory client rooted at `base_url`
    pub fn new(base_url: impl Into<String>, credential: Credential, config: &DirectoryConfig) -> Result<Self> {
        let base_url = base_url.into();
        let base = Url::parse(&base_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or(ConfigError::InvalidValue {
                field: "server.api_base_url".to_string(),
                value: base_url,
            })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(DirectoryError::from)?;

        Ok(Self {
            client,
            base_url: base,
            credential,
            auth_scheme: config.auth_scheme.trim().to_string(),
        })
    }

    fn authorization(&self) -> String {
        if self.auth_scheme.is_empty() {
            self.credential.as_str().to_string()
        } else {
            format!("{} {}", self.auth_scheme, self.credential.as_str())
        }
    }

    /// Base URL extended by `segments`, each percent-encoded as one path segment
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| DirectoryError::Unavailable {
                reason: format!("{} cannot carry a path", self.base_url),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get(&self, url: Url, query: &[(&str, &str)]) -> Result<reqwest::Response> {
        log::debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .header(AUTHORIZATION, self.authorization())
            .query(query)
            .send()
            .await
            .map_err(DirectoryError::from)?;
        Ok(response)
    }
}

#[async_trait]
impl Directory for HttpDirectory {
    async fn find_participant(&self, id: &UserId) -> Result<Participant> {
        let response = self.get(self.endpoint(&["user", id.as_str()])?, &[]).await?;

        let status = response.status();
        if !status.is_success() {
            log::debug!("Directory lookup for {} returned {}", id, status);
            return Err(DirectoryError::NotFound {
                id: id.to_string(),
                status: status.as_u16(),
            }
            .into());
        }

        let participant = response
            .json::<Participant>()
            .await
            .map_err(DirectoryError::from)?;
        Ok(participant)
    }

    async fn search(&self, query: &str) -> Result<Vec<Participant>> {
        let response = self
            .get(self.endpoint(&["searchuser"])?, &[("q", query)])
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(DirectoryError::Unavailable {
                reason: format!("search returned {status}"),
            }
            .into());
        }

        let body: serde_json::Value = response.json().await.map_err(DirectoryError::from)?;
        let serde_json::Value::Array(entries) = body else {
            log::warn!("Unexpected search result format: {}", body);
            return Ok(Vec::new());
        };

        Ok(entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value::<Participant>(entry) {
                Ok(participant) => Some(participant),
                Err(e) => {
                    log::warn!("Skipping malformed search entry: {}", e);
                    None
                }
            })
            .collect())
    }
}

/// Fixed in-memory directory, for offline runs
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    participants: BTreeMap<UserId, Participant>,
}

impl StaticDirectory {
    /// Build a directory from a fixed participant list
    pub fn new(participants: impl IntoIterator<Item = Participant>) -> Self {
        Self {
            participants: participants
                .into_iter()
                .map(|participant| (participant.id.clone(), participant))
                .collect(),
        }
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn find_participant(&self, id: &UserId) -> Result<Participant> {
        self.participants.get(id).cloned().ok_or_else(|| {
            DirectoryError::NotFound {
                id: id.to_string(),
                status: StatusCode::NOT_FOUND.as_u16(),
            }
            .into()
        })
    }

    async fn search(&self, query: &str) -> Result<Vec<Participant>> {
        let query = query.to_lowercase();
        Ok(self
            .participants
            .values()
            .filter(|participant| participant.display_name.to_lowercase().contains(&query))
            .cloned()
            .collect())
    }
}
