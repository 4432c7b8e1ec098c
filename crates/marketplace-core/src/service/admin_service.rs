//! 审计日志
//!
//! 管理员与农技员的写操作由 HTTP 中间件异步记录，写入失败只打印日志。

use std::sync::Arc;

use tracing::{debug, error};
use uuid::Uuid;

use super::normalize_page;
use crate::error::Result;
use crate::models::{AuditFilter, AuditLog, NewAuditLog, Page};
use crate::repository::AuditRepositoryTrait;

/// 超出该长度的 User-Agent 截断后保存
const MAX_USER_AGENT_LEN: usize = 255;

#[derive(Clone)]
pub struct AdminService {
    audits: Arc<dyn AuditRepositoryTrait>,
}

impl AdminService {
    pub fn new(audits: Arc<dyn AuditRepositoryTrait>) -> Self {
        Self { audits }
    }

    pub async fn record(&self, mut log: NewAuditLog) -> Result<()> {
        if let Some(agent) = log.user_agent.as_mut()
            && agent.len() > MAX_USER_AGENT_LEN
        {
            let mut cut = MAX_USER_AGENT_LEN;
            while !agent.is_char_boundary(cut) {
                cut -= 1;
            }
            agent.truncate(cut);
        }
        self.audits.record(&log).await?;
        debug!(module = %log.module, action = %log.action, "审计日志已记录");
        Ok(())
    }

    /// 后台写入，不阻塞请求
    pub fn record_async(&self, log: NewAuditLog) {
        let service = self.clone();
        tokio::spawn(async move {
            let action = log.action.clone();
            if let Err(e) = service.record(log).await {
                error!(action = %action, error = %e, "写入审计日志失败");
            }
        });
    }

    pub async fn list_audit_logs(
        &self,
        actor_id: Option<Uuid>,
        module: Option<String>,
        page: i64,
        page_size: i64,
    ) -> Result<Page<AuditLog>> {
        let (page, page_size) = normalize_page(page, page_size);
        let filter = AuditFilter {
            actor_id,
            module: module.filter(|m| !m.is_empty()),
            page,
            page_size,
        };
        let (items, total) = self.audits.list(&filter).await?;
        Ok(Page::new(items, total, page, page_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MockAuditRepositoryTrait;

    #[tokio::test]
    async fn test_record_truncates_user_agent() {
        let mut audits = MockAuditRepositoryTrait::new();
        audits
            .expect_record()
            .withf(|log| log.user_agent.as_ref().is_some_and(|ua| ua.len() == MAX_USER_AGENT_LEN))
            .times(1)
            .returning(|_| Ok(()));

        let service = AdminService::new(Arc::new(audits));
        service
            .record(NewAuditLog {
                actor_id: Uuid::new_v4(),
                actor_role: "admin".to_string(),
                module: "users".to_string(),
                action: "PATCH /api/admin/users/{id}/status".to_string(),
                user_agent: Some("x".repeat(400)),
                ..Default::default()
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_list_ignores_empty_module() {
        let mut audits = MockAuditRepositoryTrait::new();
        audits
            .expect_list()
            .withf(|f| f.module.is_none() && f.page == 1 && f.page_size == 20)
            .returning(|_| Ok((vec![], 0)));

        let service = AdminService::new(Arc::new(audits));
        let page = service
            .list_audit_logs(None, Some(String::new()), 0, 0)
            .await
            .unwrap();
        assert_eq!(page.total, 0);
    }
}
