//! Backend REST client.
//!
//! [`ChatApi`] is the seam the session depends on; [`HttpApi`] is the reqwest
//! implementation used by the binary.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::ApiError;
use crate::models::{ChatReply, Conversation, ConversationId, Document, DocumentId, Message};

pub const DEFAULT_CONVERSATION_TITLE: &str = "New Conversation";

/// Calls the chat session needs from the backend.
pub trait ChatApi: Send + Sync + 'static {
    fn get_messages(
        &self,
        conversation_id: ConversationId,
    ) -> impl Future<Output = Result<Vec<Message>, ApiError>> + Send;

    fn send_message(
        &self,
        conversation_id: ConversationId,
        content: &str,
    ) -> impl Future<Output = Result<ChatReply, ApiError>> + Send;
}

#[derive(Serialize)]
struct CreateConversation<'a> {
    title: &'a str,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    content: &'a str,
}

#[derive(Debug, Clone)]
pub struct HttpApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpApi {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ApiError::Request)?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Websocket origin for the realtime channel.
    pub fn ws_base_url(&self) -> String {
        ws_base_url(&self.base_url)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ApiError> {
        let resp = Self::check(resp).await?;
        resp.json::<T>().await.map_err(ApiError::from_reqwest)
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        })
    }

    pub async fn create_conversation(&self, title: &str) -> Result<Conversation, ApiError> {
        let resp = self
            .client
            .post(self.url("/conversations"))
            .json(&CreateConversation { title })
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        Self::decode(resp).await
    }

    pub async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        let resp = self
            .client
            .get(self.url("/conversations"))
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        Self::decode(resp).await
    }

    pub async fn get_conversation(&self, id: ConversationId) -> Result<Conversation, ApiError> {
        let resp = self
            .client
            .get(self.url(&format!("/conversations/{id}")))
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        Self::decode(resp).await
    }

    pub async fn delete_conversation(&self, id: ConversationId) -> Result<(), ApiError> {
        let resp = self
            .client
            .delete(self.url(&format!("/conversations/{id}")))
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        Self::check(resp).await?;
        Ok(())
    }

    pub async fn list_documents(&self) -> Result<Vec<Document>, ApiError> {
        let resp = self
            .client
            .get(self.url("/documents"))
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        Self::decode(resp).await
    }

    /// Upload a file as the multipart field `file`.
    pub async fn upload_document(&self, path: &Path) -> Result<Document, ApiError> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        debug!(file = %file_name, size = bytes.len(), "uploading document");

        let form = Form::new().part("file", Part::bytes(bytes).file_name(file_name));
        let resp = self
            .client
            .post(self.url("/documents/upload"))
            .multipart(form)
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        Self::decode(resp).await
    }

    pub async fn delete_document(&self, id: DocumentId) -> Result<(), ApiError> {
        let resp = self
            .client
            .delete(self.url(&format!("/documents/{id}")))
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        Self::check(resp).await?;
        Ok(())
    }
}

impl ChatApi for HttpApi {
    async fn get_messages(&self, conversation_id: ConversationId) -> Result<Vec<Message>, ApiError> {
        let resp = self
            .client
            .get(self.url(&format!("/conversations/{conversation_id}/messages")))
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        Self::decode(resp).await
    }

    async fn send_message(
        &self,
        conversation_id: ConversationId,
        content: &str,
    ) -> Result<ChatReply, ApiError> {
        let resp = self
            .client
            .post(self.url(&format!("/conversations/{conversation_id}/chat")))
            .json(&SendMessage { content })
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;
        Self::decode(resp).await
    }
}

/// Derive the websocket origin from the REST base URL:
/// `http(s)` becomes `ws(s)` and a trailing `/api` segment is dropped.
pub fn ws_base_url(api_base: &str) -> String {
    let trimmed = api_base.trim_end_matches('/');
    let swapped = if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        trimmed.to_string()
    };
    swapped
        .strip_suffix("/api")
        .map(str::to_string)
        .unwrap_or(swapped)
}

/// Case-insensitive title filter used by conversation listings.
pub fn filter_by_title<'a>(
    conversations: &'a [Conversation],
    needle: &str,
) -> impl Iterator<Item = &'a Conversation> {
    let needle = needle.to_lowercase();
    conversations
        .iter()
        .filter(move |c| c.title.to_lowercase().contains(&needle))
}
