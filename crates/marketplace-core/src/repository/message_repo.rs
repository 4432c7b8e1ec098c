//! 会话与消息仓储
//!
//! 会话参与者按 (较小 id, 较大 id) 存储，同一对用户只有一个会话

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::traits::MessageRepositoryTrait;
use crate::error::Result;
use crate::models::{Conversation, ConversationSummary, Message};

pub struct MessageRepository {
    pool: PgPool,
}

impl MessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        let conversation = sqlx::query_as::<_, Conversation>(
            r#"
            SELECT id, participant_a, participant_b, listing_id, last_message_at, created_at
            FROM conversations
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(conversation)
    }

    /// 查找或创建会话；已有会话时更新商品上下文
    pub async fn find_or_create_conversation(
        &self,
        user_a: Uuid,
        user_b: Uuid,
        listing_id: Option<Uuid>,
    ) -> Result<Conversation> {
        let (a, b) = Conversation::ordered_pair(user_a, user_b);
        let conversation = sqlx::query_as::<_, Conversation>(
            r#"
            INSERT INTO conversations (id, participant_a, participant_b, listing_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (participant_a, participant_b)
            DO UPDATE SET listing_id = COALESCE(EXCLUDED.listing_id, conversations.listing_id)
            RETURNING id, participant_a, participant_b, listing_id, last_message_at, created_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(a)
        .bind(b)
        .bind(listing_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(conversation)
    }

    /// 用户的会话列表，附对方信息、最后一条消息与未读数
    pub async fn list_conversations(&self, user_id: Uuid) -> Result<Vec<ConversationSummary>> {
        let items = sqlx::query_as::<_, ConversationSummary>(
            r#"
            SELECT c.id,
                   u.id AS other_user_id,
                   u.full_name AS other_user_name,
                   u.role AS other_user_role,
                   c.listing_id,
                   (SELECT m.body FROM messages m
                    WHERE m.conversation_id = c.id
                    ORDER BY m.created_at DESC LIMIT 1) AS last_message,
                   c.last_message_at,
                   (SELECT COUNT(*) FROM messages m
                    WHERE m.conversation_id = c.id
                      AND m.sender_id <> $1
                      AND m.read_at IS NULL) AS unread_count
            FROM conversations c
            JOIN users u
              ON u.id = CASE WHEN c.participant_a = $1 THEN c.participant_b ELSE c.participant_a END
            WHERE c.participant_a = $1 OR c.participant_b = $1
            ORDER BY c.last_message_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// 消息按时间倒序分页
    pub async fn list_messages(
        &self,
        conversation_id: Uuid,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<Message>, i64)> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE conversation_id = $1")
                .bind(conversation_id)
                .fetch_one(&self.pool)
                .await?;

        let items = sqlx::query_as::<_, Message>(
            r#"
            SELECT id, conversation_id, sender_id, body, read_at, created_at
            FROM messages
            WHERE conversation_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(conversation_id)
        .bind(page_size)
        .bind((page.max(1) - 1) * page_size)
        .fetch_all(&self.pool)
        .await?;

        Ok((items, total))
    }

    pub async fn create_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        body: &str,
    ) -> Result<Message> {
        let mut tx = self.pool.begin().await?;

        let message = sqlx::query_as::<_, Message>(
            r#"
            INSERT INTO messages (id, conversation_id, sender_id, body)
            VALUES ($1, $2, $3, $4)
            RETURNING id, conversation_id, sender_id, body, read_at, created_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(conversation_id)
        .bind(sender_id)
        .bind(body)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE conversations SET last_message_at = $2 WHERE id = $1")
            .bind(conversation_id)
            .bind(message.created_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(message)
    }

    pub async fn mark_read(&self, conversation_id: Uuid, reader_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE messages SET read_at = NOW()
            WHERE conversation_id = $1 AND sender_id <> $2 AND read_at IS NULL
            "#,
        )
        .bind(conversation_id)
        .bind(reader_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl MessageRepositoryTrait for MessageRepository {
    async fn find_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        self.find_conversation(id).await
    }

    async fn find_or_create_conversation(
        &self,
        user_a: Uuid,
        user_b: Uuid,
        listing_id: Option<Uuid>,
    ) -> Result<Conversation> {
        self.find_or_create_conversation(user_a, user_b, listing_id)
            .await
    }

    async fn list_conversations(&self, user_id: Uuid) -> Result<Vec<ConversationSummary>> {
        self.list_conversations(user_id).await
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<Message>, i64)> {
        self.list_messages(conversation_id, page, page_size).await
    }

    async fn create_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        body: &str,
    ) -> Result<Message> {
        self.create_message(conversation_id, sender_id, body).await
    }

    async fn mark_read(&self, conversation_id: Uuid, reader_id: Uuid) -> Result<u64> {
        self.mark_read(conversation_id, reader_id).await
    }
}
