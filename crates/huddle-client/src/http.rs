use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use huddle_sync::config::DEFAULT_REQUEST_TIMEOUT;
use huddle_sync::{MessagingBackend, Result, SyncError};
use huddle_types::api::{
    ChannelSummary, CreateMessageRequest, MessagesPageResponse, UpdateMessageRequest, WireMessage,
};
use huddle_types::{ChannelId, Message, MessageId, Page, PageRequest};

/// REST client for the messaging backend. Every request carries the
/// session's bearer token and gives up after `DEFAULT_REQUEST_TIMEOUT`.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SyncError::RequestFailed(format!("building http client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.token)
    }

    // -- Channel directory --

    pub async fn list_channels(&self) -> Result<Vec<ChannelSummary>> {
        let builder = self.client.get(self.url("/channels"));
        let response = send(self.authed(builder), SyncError::RequestFailed).await?;
        decode(response, SyncError::RequestFailed).await
    }

    /// Join as a member (`POST /channels/{id}/join`). Not the same as the
    /// topic subscription on the gateway.
    pub async fn join_channel(&self, channel_id: &ChannelId) -> Result<()> {
        let url = self.url(&format!("/channels/{}/join", channel_id));
        send(self.authed(self.client.post(url)), SyncError::RequestFailed).await?;
        Ok(())
    }

    pub async fn leave_channel(&self, channel_id: &ChannelId) -> Result<()> {
        let url = self.url(&format!("/channels/{}/leave", channel_id));
        send(self.authed(self.client.post(url)), SyncError::RequestFailed).await?;
        Ok(())
    }
}

impl MessagingBackend for HttpBackend {
    async fn fetch_page(&self, channel_id: &ChannelId, request: PageRequest) -> Result<Page> {
        debug!(
            "GET history {} (limit {}, skip {})",
            channel_id, request.limit, request.skip
        );
        let url = self.url(&format!("/messages/channel/{}", channel_id));
        let builder = self
            .client
            .get(url)
            .query(&[("limit", request.limit), ("skip", request.skip)]);
        let response = send(self.authed(builder), SyncError::HistoryFetchFailed).await?;
        let body: MessagesPageResponse = decode(response, SyncError::HistoryFetchFailed).await?;
        Ok(body.into_page(channel_id))
    }

    async fn create_message(&self, channel_id: &ChannelId, content: &str) -> Result<Message> {
        let builder = self
            .client
            .post(self.url("/messages"))
            .json(&CreateMessageRequest { content, channel_id });
        let response = send(self.authed(builder), SyncError::RequestFailed).await?;
        let wire: WireMessage = decode(response, SyncError::RequestFailed).await?;
        Ok(wire.into_message(channel_id))
    }

    async fn update_message(
        &self,
        channel_id: &ChannelId,
        id: &MessageId,
        content: &str,
    ) -> Result<Message> {
        let builder = self
            .client
            .put(self.url(&format!("/messages/{}", id)))
            .json(&UpdateMessageRequest { content });
        let response = send(self.authed(builder), SyncError::RequestFailed).await?;
        let wire: WireMessage = decode(response, SyncError::RequestFailed).await?;
        Ok(wire.into_message(channel_id))
    }

    async fn delete_message(&self, id: &MessageId) -> Result<()> {
        let builder = self.client.delete(self.url(&format!("/messages/{}", id)));
        send(self.authed(builder), SyncError::RequestFailed).await?;
        Ok(())
    }
}

/// Send a request; transport failures and non-2xx statuses become `err`
/// with the status line and body.
async fn send(request: RequestBuilder, err: fn(String) -> SyncError) -> Result<Response> {
    let response = request.send().await.map_err(|e| err(e.to_string()))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(err(format!("{}: {}", status, body.trim())))
}

async fn decode<T: DeserializeOwned>(
    response: Response,
    err: fn(String) -> SyncError,
) -> Result<T> {
    response
        .json()
        .await
        .map_err(|e| err(format!("malformed response: {}", e)))
}
