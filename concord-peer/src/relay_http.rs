use std::time::Duration;

use serde::{Deserialize, Serialize};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Typed client for the rendezvous relay's HTTP API. Every call is bounded
/// by a 10 second timeout; timeouts and connection errors are recoverable.
#[derive(Debug, Clone)]
pub struct RelayApi {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayInfo {
    pub relay_peer_id: String,
    #[serde(default)]
    pub relay_addrs: Vec<String>,
    pub external_relay_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub code: String,
    pub relay_peer_id: String,
    pub relay_addr: String,
    pub circuit_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupResponse {
    pub peer_id: String,
    pub relay_addr: String,
    pub circuit_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    pub from: String,
    pub channel_id: String,
    pub data: String,
    pub ts: i64,
}

#[derive(Debug, Deserialize)]
struct PollResponse {
    #[serde(default)]
    messages: Vec<QueuedMessage>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest<'a> {
    to: &'a str,
    from: &'a str,
    channel_id: &'a str,
    data: &'a str,
}

impl RelayApi {
    pub fn new(base_url: String) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn info(&self) -> Result<RelayInfo, reqwest::Error> {
        self.client
            .get(format!("{}/info", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    pub async fn register(&self, peer_id: &str) -> Result<RegisterResponse, reqwest::Error> {
        self.client
            .get(format!("{}/register", self.base_url))
            .query(&[("peerId", peer_id)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    pub async fn lookup(&self, code: &str) -> Result<LookupResponse, reqwest::Error> {
        self.client
            .get(format!("{}/lookup", self.base_url))
            .query(&[("code", code)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    pub async fn send(
        &self,
        to: &str,
        from: &str,
        channel_id: &str,
        data: &str,
    ) -> Result<(), reqwest::Error> {
        self.client
            .post(format!("{}/send", self.base_url))
            .json(&SendRequest {
                to,
                from,
                channel_id,
                data,
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn poll(
        &self,
        peer_id: &str,
        since_ms: i64,
    ) -> Result<Vec<QueuedMessage>, reqwest::Error> {
        let since = since_ms.to_string();
        let response: PollResponse = self
            .client
            .get(format!("{}/poll", self.base_url))
            .query(&[("peerId", peer_id), ("since", since.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.messages)
    }
}
