//! HTTP side of the client.
//!
//! History, send and user listing go through the REST routes. The realtime
//! channel only ever carries pushes.

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use murmur_shared::{Message, MessageContent, User, UserId};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

#[async_trait]
pub trait ChatApi: Send + Sync {
    /// The user owning the session token.
    async fn current_user(&self) -> Result<User>;

    /// Every user except the caller.
    async fn list_users(&self) -> Result<Vec<User>>;

    /// Conversation history with `peer`, oldest first.
    async fn list_messages(&self, peer: &UserId) -> Result<Vec<Message>>;

    /// Persist a message to `peer`. The server pushes it to the peer if online.
    async fn send_message(&self, peer: &UserId, content: &MessageContent) -> Result<Message>;
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

pub struct HttpChatApi {
    http: reqwest::Client,
    base: Url,
    token: String,
}

impl HttpChatApi {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            base: config.server_url.clone(),
            token: config.require_token()?.to_string(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::Config(format!("{} cannot be a base URL", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        let url = self.endpoint(segments)?;
        tracing::trace!(%url, "GET");
        let response = self.http.get(url).bearer_auth(&self.token).send().await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|e| ClientError::Protocol(e.to_string()));
    }

    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status.to_string(),
    };
    Err(match status {
        StatusCode::BAD_REQUEST | StatusCode::PAYLOAD_TOO_LARGE => ClientError::Validation(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ClientError::Auth(message),
        StatusCode::NOT_FOUND => ClientError::NotFound(message),
        s if s.is_server_error() => ClientError::Unavailable(message),
        _ => ClientError::Protocol(format!("{status}: {message}")),
    })
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn current_user(&self) -> Result<User> {
        self.get(&["api", "auth", "check"]).await
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        self.get(&["api", "messages", "users"]).await
    }

    async fn list_messages(&self, peer: &UserId) -> Result<Vec<Message>> {
        self.get(&["api", "messages", peer.as_str()]).await
    }

    async fn send_message(&self, peer: &UserId, content: &MessageContent) -> Result<Message> {
        let url = self.endpoint(&["api", "messages", "send", peer.as_str()])?;
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(content)
            .send()
            .await?;
        decode(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_escapes_peer_id() {
        let config = ClientConfig::new(Url::parse("http://localhost:5001").unwrap(), "t");
        let api = HttpChatApi::new(&config).unwrap();
        let url = api.endpoint(&["api", "messages", "a/b c"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:5001/api/messages/a%2Fb%20c");
    }

    #[test]
    fn test_requires_token() {
        let config = ClientConfig::from_lookup(|_| None).unwrap();
        assert!(matches!(HttpChatApi::new(&config), Err(ClientError::Auth(_))));
    }
}
