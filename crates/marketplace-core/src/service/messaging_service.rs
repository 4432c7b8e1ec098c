//! 站内私信
//!
//! 消息落库后推送给在线的接收方；正在输入状态只做转发，不落库。

use std::sync::Arc;

use tracing::{debug, instrument};
use uuid::Uuid;

use super::dto::{SendMessageRequest, StartConversationRequest};
use super::{normalize_page, validate_request};
use crate::error::{MarketError, Result};
use crate::models::{Conversation, ConversationSummary, Message, Page};
use crate::notification::{RealtimeEvent, RealtimePublisher, TypingEvent};
use crate::repository::{MessageRepositoryTrait, UserRepositoryTrait};

pub struct MessagingService {
    messages: Arc<dyn MessageRepositoryTrait>,
    users: Arc<dyn UserRepositoryTrait>,
    realtime: Arc<dyn RealtimePublisher>,
}

impl MessagingService {
    pub fn new(
        messages: Arc<dyn MessageRepositoryTrait>,
        users: Arc<dyn UserRepositoryTrait>,
        realtime: Arc<dyn RealtimePublisher>,
    ) -> Self {
        Self {
            messages,
            users,
            realtime,
        }
    }

    /// 发起会话，同一对用户复用已有会话
    #[instrument(skip(self, req), fields(user_id = %user_id, participant_id = %req.participant_id))]
    pub async fn start(
        &self,
        user_id: Uuid,
        req: StartConversationRequest,
    ) -> Result<Conversation> {
        validate_request(&req)?;
        if req.participant_id == user_id {
            return Err(MarketError::Validation(
                "participantId: 不能给自己发消息".to_string(),
            ));
        }
        let other = self
            .users
            .find_by_id(req.participant_id)
            .await?
            .ok_or(MarketError::UserNotFound(req.participant_id))?;
        if !other.is_active() {
            return Err(MarketError::Forbidden("对方账号已停用".to_string()));
        }

        let conversation = self
            .messages
            .find_or_create_conversation(user_id, req.participant_id, req.listing_id)
            .await?;

        if let Some(body) = req.message.as_deref().map(str::trim).filter(|b| !b.is_empty()) {
            self.deliver(&conversation, user_id, body).await?;
        }
        Ok(conversation)
    }

    pub async fn conversations(&self, user_id: Uuid) -> Result<Vec<ConversationSummary>> {
        self.messages.list_conversations(user_id).await
    }

    /// 会话消息（按时间倒序分页），同时将对方消息标记为已读
    pub async fn messages(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        page: i64,
        page_size: i64,
    ) -> Result<Page<Message>> {
        self.participant_conversation(user_id, conversation_id).await?;
        let (page, page_size) = normalize_page(page, page_size);
        let (items, total) = self
            .messages
            .list_messages(conversation_id, page, page_size)
            .await?;
        if page == 1 {
            self.messages.mark_read(conversation_id, user_id).await?;
        }
        Ok(Page::new(items, total, page, page_size))
    }

    #[instrument(skip(self, req), fields(user_id = %user_id, conversation_id = %conversation_id))]
    pub async fn send(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        req: SendMessageRequest,
    ) -> Result<Message> {
        validate_request(&req)?;
        let body = req.body.trim();
        if body.is_empty() {
            return Err(MarketError::Validation("body: 消息不能为空".to_string()));
        }
        let conversation = self.participant_conversation(user_id, conversation_id).await?;
        self.deliver(&conversation, user_id, body).await
    }

    async fn deliver(&self, conversation: &Conversation, sender_id: Uuid, body: &str) -> Result<Message> {
        let message = self
            .messages
            .create_message(conversation.id, sender_id, body)
            .await?;
        let recipient = conversation.other_participant(sender_id);
        let event = RealtimeEvent::NewMessage(message.clone());
        let delivered = self.realtime.publish(recipient, &event);
        // 发送方的其它连接同步显示
        self.realtime.publish(sender_id, &event);
        debug!(delivered, "消息已发送");
        Ok(message)
    }

    /// 转发正在输入状态，返回送达的连接数
    pub async fn typing(&self, user_id: Uuid, conversation_id: Uuid, is_typing: bool) -> Result<usize> {
        let conversation = self.participant_conversation(user_id, conversation_id).await?;
        let event = RealtimeEvent::Typing(TypingEvent {
            conversation_id,
            sender_id: user_id,
            is_typing,
        });
        Ok(self
            .realtime
            .publish(conversation.other_participant(user_id), &event))
    }

    pub async fn mark_read(&self, user_id: Uuid, conversation_id: Uuid) -> Result<u64> {
        self.participant_conversation(user_id, conversation_id).await?;
        self.messages.mark_read(conversation_id, user_id).await
    }

    /// 非参与者一律视为会话不存在
    async fn participant_conversation(&self, user_id: Uuid, conversation_id: Uuid) -> Result<Conversation> {
        self.messages
            .find_conversation(conversation_id)
            .await?
            .filter(|c| c.includes(user_id))
            .ok_or(MarketError::ConversationNotFound(conversation_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserRole;
    use crate::models::fixtures::sample_user;
    use crate::notification::realtime::MockRealtimePublisher;
    use crate::repository::{MockMessageRepositoryTrait, MockUserRepositoryTrait};
    use chrono::Utc;

    fn conversation(a: Uuid, b: Uuid) -> Conversation {
        let (participant_a, participant_b) = Conversation::ordered_pair(a, b);
        Conversation {
            id: Uuid::new_v4(),
            participant_a,
            participant_b,
            listing_id: None,
            last_message_at: Utc::now(),
            created_at: Utc::now(),
        }
    }

    fn message(conversation_id: Uuid, sender_id: Uuid, body: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            body: body.to_string(),
            read_at: None,
            created_at: Utc::now(),
        }
    }

    fn service(
        messages: MockMessageRepositoryTrait,
        users: MockUserRepositoryTrait,
        realtime: MockRealtimePublisher,
    ) -> MessagingService {
        MessagingService::new(Arc::new(messages), Arc::new(users), Arc::new(realtime))
    }

    #[tokio::test]
    async fn test_cannot_message_self() {
        let user = Uuid::new_v4();
        let svc = service(
            MockMessageRepositoryTrait::new(),
            MockUserRepositoryTrait::new(),
            MockRealtimePublisher::new(),
        );
        let err = svc
            .start(
                user,
                StartConversationRequest {
                    participant_id: user,
                    listing_id: None,
                    message: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::Validation(_)));
    }

    #[tokio::test]
    async fn test_start_with_first_message_pushes_to_recipient() {
        let buyer = Uuid::new_v4();
        let farmer = sample_user(UserRole::Farmer);
        let farmer_id = farmer.id;
        let conv = conversation(buyer, farmer_id);
        let conv_id = conv.id;

        let mut users = MockUserRepositoryTrait::new();
        users
            .expect_find_by_id()
            .returning(move |_| Ok(Some(farmer.clone())));
        let mut messages = MockMessageRepositoryTrait::new();
        messages
            .expect_find_or_create_conversation()
            .returning(move |_, _, _| Ok(conv.clone()));
        messages
            .expect_create_message()
            .withf(move |c, s, b| *c == conv_id && *s == buyer && b == "Is the maize dry?")
            .times(1)
            .returning(|c, s, b| Ok(message(c, s, b)));

        let mut realtime = MockRealtimePublisher::new();
        realtime
            .expect_publish()
            .withf(move |user, event| *user == farmer_id && event.name() == "new_message")
            .times(1)
            .returning(|_, _| 1);
        realtime
            .expect_publish()
            .withf(move |user, _| *user == buyer)
            .times(1)
            .returning(|_, _| 0);

        let svc = service(messages, users, realtime);
        let started = svc
            .start(
                buyer,
                StartConversationRequest {
                    participant_id: farmer_id,
                    listing_id: None,
                    message: Some("  Is the maize dry?  ".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(started.id, conv_id);
    }

    #[tokio::test]
    async fn test_outsider_cannot_read_conversation() {
        let conv = conversation(Uuid::new_v4(), Uuid::new_v4());
        let conv_id = conv.id;
        let mut messages = MockMessageRepositoryTrait::new();
        messages
            .expect_find_conversation()
            .returning(move |_| Ok(Some(conv.clone())));
        messages.expect_list_messages().never();

        let svc = service(
            messages,
            MockUserRepositoryTrait::new(),
            MockRealtimePublisher::new(),
        );
        let err = svc
            .messages(Uuid::new_v4(), conv_id, 1, 20)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::ConversationNotFound(_)));
    }

    #[tokio::test]
    async fn test_typing_relayed_to_other_participant() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let conv = conversation(a, b);
        let conv_id = conv.id;

        let mut messages = MockMessageRepositoryTrait::new();
        messages
            .expect_find_conversation()
            .returning(move |_| Ok(Some(conv.clone())));
        let mut realtime = MockRealtimePublisher::new();
        realtime
            .expect_publish()
            .withf(move |user, event| *user == b && event.name() == "typing")
            .times(1)
            .returning(|_, _| 2);

        let svc = service(messages, MockUserRepositoryTrait::new(), realtime);
        assert_eq!(svc.typing(a, conv_id, true).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_first_page_marks_read() {
        let a = Uuid::new_v4();
        let conv = conversation(a, Uuid::new_v4());
        let conv_id = conv.id;

        let mut messages = MockMessageRepositoryTrait::new();
        messages
            .expect_find_conversation()
            .returning(move |_| Ok(Some(conv.clone())));
        messages
            .expect_list_messages()
            .returning(move |c, _, _| Ok((vec![message(c, a, "hello")], 1)));
        messages
            .expect_mark_read()
            .withf(move |c, r| *c == conv_id && *r == a)
            .times(1)
            .returning(|_, _| Ok(0));

        let svc = service(
            messages,
            MockUserRepositoryTrait::new(),
            MockRealtimePublisher::new(),
        );
        let page = svc.messages(a, conv_id, 1, 20).await.unwrap();
        assert_eq!(page.total, 1);
    }
}
