//! Conversation persistence.
//!
//! [`ConversationStore`] is the only owner of [`Conversation`] records.
//! Two implementations are provided: an in-memory store backed by a
//! `DashMap`, and a PostgreSQL store with messages kept as a JSONB array.

use crate::api::models::{Conversation, ConversationUpdate, Message, Role};
use crate::core::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::{FromRow, PgPool};

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create(
        &self,
        title: String,
        messages: Vec<Message>,
        model: Option<String>,
        provider: Option<String>,
    ) -> Result<Conversation>;

    async fn get(&self, id: &str) -> Result<Option<Conversation>>;

    /// Conversations ordered by `updated_at`, most recent first.
    async fn list(&self, skip: usize, limit: usize) -> Result<Vec<Conversation>>;

    async fn update(&self, id: &str, update: ConversationUpdate) -> Result<Option<Conversation>>;

    async fn delete(&self, id: &str) -> Result<bool>;

    async fn append_messages(&self, id: &str, messages: Vec<Message>)
        -> Result<Option<Conversation>>;

    /// Append one completed chat turn: the turn's new input followed by the
    /// assistant reply. Also records the model and provider that answered.
    async fn append_turn(
        &self,
        id: &str,
        request_messages: &[Message],
        reply: &str,
        model: &str,
        provider: &str,
    ) -> Result<Option<Conversation>>;
}

/// The messages a chat turn adds to a conversation.
///
/// Clients resend the whole context on every turn, so only the messages
/// after the last assistant message are new; the reply follows them.
pub fn turn_messages(request_messages: &[Message], reply: &str) -> Vec<Message> {
    let start = request_messages
        .iter()
        .rposition(|m| m.role == Role::Assistant)
        .map(|i| i + 1)
        .unwrap_or(0);

    let mut messages = request_messages[start..].to_vec();
    messages.push(Message::assistant(reply));
    messages
}

fn new_conversation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
pub struct InMemoryConversationStore {
    conversations: DashMap<String, Conversation>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    fn modify<F>(&self, id: &str, apply: F) -> Option<Conversation>
    where
        F: FnOnce(&mut Conversation),
    {
        let mut entry = self.conversations.get_mut(id)?;
        apply(entry.value_mut());
        entry.updated_at = Utc::now();
        Some(entry.value().clone())
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn create(
        &self,
        title: String,
        messages: Vec<Message>,
        model: Option<String>,
        provider: Option<String>,
    ) -> Result<Conversation> {
        let now = Utc::now();
        let conversation = Conversation {
            id: new_conversation_id(),
            title,
            messages,
            created_at: now,
            updated_at: now,
            model,
            provider,
        };
        self.conversations
            .insert(conversation.id.clone(), conversation.clone());
        Ok(conversation)
    }

    async fn get(&self, id: &str) -> Result<Option<Conversation>> {
        Ok(self.conversations.get(id).map(|c| c.value().clone()))
    }

    async fn list(&self, skip: usize, limit: usize) -> Result<Vec<Conversation>> {
        let mut all: Vec<Conversation> = self
            .conversations
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(all.into_iter().skip(skip).take(limit).collect())
    }

    async fn update(&self, id: &str, update: ConversationUpdate) -> Result<Option<Conversation>> {
        Ok(self.modify(id, |c| {
            if let Some(title) = update.title {
                c.title = title;
            }
            if let Some(messages) = update.messages {
                c.messages = messages;
            }
            if let Some(model) = update.model {
                c.model = Some(model);
            }
            if let Some(provider) = update.provider {
                c.provider = Some(provider);
            }
        }))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.conversations.remove(id).is_some())
    }

    async fn append_messages(
        &self,
        id: &str,
        messages: Vec<Message>,
    ) -> Result<Option<Conversation>> {
        Ok(self.modify(id, |c| c.messages.extend(messages)))
    }

    async fn append_turn(
        &self,
        id: &str,
        request_messages: &[Message],
        reply: &str,
        model: &str,
        provider: &str,
    ) -> Result<Option<Conversation>> {
        let messages = turn_messages(request_messages, reply);
        Ok(self.modify(id, |c| {
            c.messages.extend(messages);
            c.model = Some(model.to_string());
            c.provider = Some(provider.to_string());
        }))
    }
}

// ============================================================================
// PostgreSQL store
// ============================================================================

#[derive(Debug, FromRow)]
struct ConversationRow {
    id: String,
    title: String,
    messages: sqlx::types::Json<Vec<Message>>,
    model: Option<String>,
    provider: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ConversationRow> for Conversation {
    fn from(row: ConversationRow) -> Self {
        Conversation {
            id: row.id,
            title: row.title,
            messages: row.messages.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
            model: row.model,
            provider: row.provider,
        }
    }
}

const RETURNING: &str = "RETURNING id, title, messages, model, provider, created_at, updated_at";

pub struct PgConversationStore {
    pool: PgPool,
}

impl PgConversationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn create(
        &self,
        title: String,
        messages: Vec<Message>,
        model: Option<String>,
        provider: Option<String>,
    ) -> Result<Conversation> {
        let row = sqlx::query_as::<_, ConversationRow>(&format!(
            r#"
            INSERT INTO conversations (id, title, messages, model, provider, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
            {}
            "#,
            RETURNING
        ))
        .bind(new_conversation_id())
        .bind(&title)
        .bind(sqlx::types::Json(&messages))
        .bind(&model)
        .bind(&provider)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn get(&self, id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query_as::<_, ConversationRow>(
            r#"
            SELECT id, title, messages, model, provider, created_at, updated_at
            FROM conversations
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn list(&self, skip: usize, limit: usize) -> Result<Vec<Conversation>> {
        let rows = sqlx::query_as::<_, ConversationRow>(
            r#"
            SELECT id, title, messages, model, provider, created_at, updated_at
            FROM conversations
            ORDER BY updated_at DESC, id
            OFFSET $1
            LIMIT $2
            "#,
        )
        .bind(skip as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn update(&self, id: &str, update: ConversationUpdate) -> Result<Option<Conversation>> {
        let row = sqlx::query_as::<_, ConversationRow>(&format!(
            r#"
            UPDATE conversations
            SET title = COALESCE($2, title),
                messages = COALESCE($3, messages),
                model = COALESCE($4, model),
                provider = COALESCE($5, provider),
                updated_at = NOW()
            WHERE id = $1
            {}
            "#,
            RETURNING
        ))
        .bind(id)
        .bind(&update.title)
        .bind(update.messages.as_ref().map(sqlx::types::Json))
        .bind(&update.model)
        .bind(&update.provider)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM conversations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_messages(
        &self,
        id: &str,
        messages: Vec<Message>,
    ) -> Result<Option<Conversation>> {
        let row = sqlx::query_as::<_, ConversationRow>(&format!(
            r#"
            UPDATE conversations
            SET messages = messages || $2::jsonb,
                updated_at = NOW()
            WHERE id = $1
            {}
            "#,
            RETURNING
        ))
        .bind(id)
        .bind(sqlx::types::Json(&messages))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn append_turn(
        &self,
        id: &str,
        request_messages: &[Message],
        reply: &str,
        model: &str,
        provider: &str,
    ) -> Result<Option<Conversation>> {
        let messages = turn_messages(request_messages, reply);
        let row = sqlx::query_as::<_, ConversationRow>(&format!(
            r#"
            UPDATE conversations
            SET messages = messages || $2::jsonb,
                model = $3,
                provider = $4,
                updated_at = NOW()
            WHERE id = $1
            {}
            "#,
            RETURNING
        ))
        .bind(id)
        .bind(sqlx::types::Json(&messages))
        .bind(model)
        .bind(provider)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }
}
