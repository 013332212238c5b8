pub mod chat;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Local, Utc};
use std::path::Path;
use tracing::info;

use chat_sync::api::{DEFAULT_CONVERSATION_TITLE, HttpApi, filter_by_title};
use chat_sync::{ApiError, Conversation, Document};

use crate::config::ClientConfig;

pub(crate) fn connect_api(config: &ClientConfig) -> Result<HttpApi> {
    HttpApi::new(&config.api.base_url, config.api.timeout)
        .context("Failed to build HTTP client")
}

/// Turn a backend error into something the user can act on.
pub(crate) fn explain(err: ApiError, config: &ClientConfig) -> anyhow::Error {
    match err {
        ApiError::Unavailable => anyhow!(
            "cannot reach the backend at {} (is it running?)",
            config.api.base_url
        ),
        ApiError::Status { status: 404, .. } => anyhow!("not found"),
        other => other.into(),
    }
}

pub async fn list_conversations(config: &ClientConfig, search: Option<&str>) -> Result<()> {
    let api = connect_api(config)?;
    let mut conversations = api
        .list_conversations()
        .await
        .map_err(|e| explain(e, config))?;
    sort_recent(&mut conversations);

    let shown: Vec<&Conversation> = match search {
        Some(needle) => filter_by_title(&conversations, needle).collect(),
        None => conversations.iter().collect(),
    };

    if shown.is_empty() {
        match search {
            Some(needle) => println!("No conversations matching {:?}.", needle),
            None => println!("No conversations yet. Start one with `ragchat chat`."),
        }
        return Ok(());
    }

    println!("{:<8} {:<40} {}", "ID", "TITLE", "UPDATED");
    println!("{}", "-".repeat(70));
    for c in &shown {
        println!(
            "{:<8} {:<40} {}",
            c.id,
            truncate(&c.title, 40),
            format_time(c.updated_at.or(c.created_at))
        );
    }
    println!("\n{} conversation(s)", shown.len());
    Ok(())
}

pub async fn create_conversation(config: &ClientConfig, title: Option<&str>) -> Result<()> {
    let api = connect_api(config)?;
    let conversation = api
        .create_conversation(title.unwrap_or(DEFAULT_CONVERSATION_TITLE))
        .await
        .map_err(|e| explain(e, config))?;
    info!(conversation_id = conversation.id, "conversation created");
    println!("Created conversation {} ({})", conversation.id, conversation.title);
    Ok(())
}

pub async fn delete_conversation(config: &ClientConfig, id: i64) -> Result<()> {
    let api = connect_api(config)?;
    api.delete_conversation(id)
        .await
        .map_err(|e| explain(e, config))
        .with_context(|| format!("Failed to delete conversation {id}"))?;
    println!("Deleted conversation {id}");
    Ok(())
}

pub async fn list_documents(config: &ClientConfig) -> Result<()> {
    let api = connect_api(config)?;
    let documents = api
        .list_documents()
        .await
        .map_err(|e| explain(e, config))?;

    if documents.is_empty() {
        println!("No documents uploaded.");
        return Ok(());
    }

    println!(
        "{:<8} {:<36} {:<6} {:>7} {:<11} {}",
        "ID", "FILENAME", "TYPE", "CHUNKS", "STATUS", "UPLOADED"
    );
    println!("{}", "-".repeat(90));
    for d in &documents {
        println!(
            "{:<8} {:<36} {:<6} {:>7} {:<11} {}",
            d.id,
            truncate(&d.original_filename, 36),
            d.file_type.as_deref().unwrap_or("-"),
            d.chunk_count.map(|n| n.to_string()).unwrap_or_else(|| "-".into()),
            document_status(d),
            format_time(d.uploaded_at)
        );
    }
    println!("\n{} document(s)", documents.len());
    Ok(())
}

pub async fn upload_document(config: &ClientConfig, path: &Path) -> Result<()> {
    if !path.is_file() {
        return Err(anyhow!("{} is not a file", path.display()));
    }
    let api = connect_api(config)?;
    let document = api
        .upload_document(path)
        .await
        .map_err(|e| explain(e, config))
        .with_context(|| format!("Failed to upload {}", path.display()))?;
    info!(document_id = document.id, "document uploaded");
    println!(
        "Uploaded {} as document {} ({})",
        document.original_filename,
        document.id,
        document_status(&document)
    );
    Ok(())
}

pub async fn delete_document(config: &ClientConfig, id: i64) -> Result<()> {
    let api = connect_api(config)?;
    api.delete_document(id)
        .await
        .map_err(|e| explain(e, config))
        .with_context(|| format!("Failed to delete document {id}"))?;
    println!("Deleted document {id}");
    Ok(())
}

/// Most recently touched first; conversations without timestamps sink.
fn sort_recent(conversations: &mut [Conversation]) {
    conversations.sort_by(|a, b| {
        let a = a.updated_at.or(a.created_at);
        let b = b.updated_at.or(b.created_at);
        b.cmp(&a)
    });
}

fn document_status(d: &Document) -> &'static str {
    if d.processed { "ready" } else { "processing" }
}

fn format_time(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Cut to `max` characters, marking the cut with an ellipsis.
pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max.saturating_sub(1)).collect();
    format!("{kept}…")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn conversation(id: i64, updated: Option<i64>) -> Conversation {
        Conversation {
            id,
            title: format!("c{id}"),
            created_at: None,
            updated_at: updated.map(|s| Utc.timestamp_opt(s, 0).unwrap()),
            messages: Vec::new(),
        }
    }

    #[test]
    fn sort_recent_puts_newest_first() {
        let mut list = vec![
            conversation(1, Some(100)),
            conversation(2, None),
            conversation(3, Some(300)),
        ];
        sort_recent(&mut list);
        let ids: Vec<i64> = list.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("Überweisung prüfen", 6), "Überw…");
        assert_eq!(truncate("abc", 3), "abc");
    }

    #[test]
    fn missing_time_renders_dash() {
        assert_eq!(format_time(None), "-");
    }
}
