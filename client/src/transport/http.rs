//! HTTP persistence against the marksync records API.

use async_trait::async_trait;
use marksync_engine::{Record, RecordId};
use reqwest::{Response, StatusCode};

use crate::error::{ClientError, Result};
use crate::persistence::{ensure_owner, Persistence};

/// Records API client. The bearer token is the owner identity.
#[derive(Debug, Clone)]
pub struct HttpPersistence {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPersistence {
    /// Create a client for the API at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Create a client reusing an existing `reqwest::Client`.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn records_url(&self) -> String {
        format!("{}/records", self.base_url)
    }
}

/// Map non-success statuses to client errors.
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    match status {
        StatusCode::FORBIDDEN => Err(ClientError::Forbidden(body)),
        _ => Err(ClientError::Status {
            status: status.as_u16(),
            body,
        }),
    }
}

#[async_trait]
impl Persistence for HttpPersistence {
    async fn insert(&self, owner_id: &str, record: &Record) -> Result<Record> {
        ensure_owner(owner_id, record)?;

        let response = self
            .client
            .post(self.records_url())
            .bearer_auth(owner_id)
            .json(record)
            .send()
            .await?;
        let stored: Record = check(response).await?.json().await?;

        ensure_owner(owner_id, &stored)?;
        Ok(stored)
    }

    async fn delete(&self, owner_id: &str, id: &RecordId) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/{}", self.records_url(), id))
            .bearer_auth(owner_id)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn query(&self, owner_id: &str) -> Result<Vec<Record>> {
        let response = self
            .client
            .get(self.records_url())
            .query(&[("owner", owner_id)])
            .bearer_auth(owner_id)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marksync_engine::RecordDraft;

    #[test]
    fn base_url_is_normalized() {
        let persistence = HttpPersistence::new("http://localhost:3000/");
        assert_eq!(persistence.records_url(), "http://localhost:3000/records");
    }

    #[tokio::test]
    async fn insert_checks_owner_before_sending() {
        // Unroutable URL: the call must fail before any request is made.
        let persistence = HttpPersistence::new("http://127.0.0.1:9");
        let record = Record::from_draft("a", "bob", RecordDraft::new("A", "https://a.test"), 1);

        let err = persistence.insert("alice", &record).await.unwrap_err();
        assert!(matches!(err, ClientError::OwnerMismatch { .. }));
    }
}
