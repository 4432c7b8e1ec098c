//! 农户实地认证服务
//!
//! 状态流转：`pending → in_review → approved | rejected`，管理员可以直接审核 `pending`。
//! 审核通过后在同一事务内标记农户已认证，并上架其暂停中的商品。

use std::sync::Arc;

use sqlx::PgPool;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::dto::{SubmitVerificationRequest, VerificationDecisionRequest};
use super::{MAX_PAGE_SIZE, normalize_page, validate_request};
use crate::error::{MarketError, Result};
use crate::models::{
    NewVerification, Page, UserFilter, UserRole, UserStatus, Verification, VerificationStatus,
    VerificationView,
};
use crate::notification::{NotificationBuilder, NotificationService};
use crate::repository::{
    ListingRepository, UserRepository, UserRepositoryTrait, VerificationRepository,
    VerificationRepositoryTrait,
};

/// 审核人能否对当前状态的申请做出决定
pub fn can_decide(verification: &Verification, reviewer_id: Uuid, role: UserRole) -> Result<()> {
    match (verification.status, role) {
        (VerificationStatus::Pending, UserRole::Admin) => Ok(()),
        (VerificationStatus::InReview, UserRole::Admin) => Ok(()),
        (VerificationStatus::InReview, UserRole::FieldOfficer) => {
            if verification.officer_id == Some(reviewer_id) {
                Ok(())
            } else {
                Err(MarketError::Forbidden("该申请已由其他农技员认领".to_string()))
            }
        }
        (VerificationStatus::Pending, UserRole::FieldOfficer) => Err(
            MarketError::InvalidVerificationState("请先认领后再审核".to_string()),
        ),
        (status, UserRole::Admin | UserRole::FieldOfficer) => Err(
            MarketError::InvalidVerificationState(format!("申请已{}，不能重复审核", status)),
        ),
        _ => Err(MarketError::Forbidden("仅农技员或管理员可审核".to_string())),
    }
}

/// 去掉空白项与重复项，保持原有顺序
fn normalize_crops(crops: Vec<String>) -> Vec<String> {
    let mut seen = Vec::with_capacity(crops.len());
    for crop in crops {
        let crop = crop.trim().to_string();
        if !crop.is_empty() && !seen.iter().any(|c: &String| c.eq_ignore_ascii_case(&crop)) {
            seen.push(crop);
        }
    }
    seen
}

pub struct VerificationService {
    pool: PgPool,
    verifications: Arc<dyn VerificationRepositoryTrait>,
    users: Arc<dyn UserRepositoryTrait>,
    notifications: NotificationService,
}

impl VerificationService {
    pub fn new(
        pool: PgPool,
        verifications: Arc<dyn VerificationRepositoryTrait>,
        users: Arc<dyn UserRepositoryTrait>,
        notifications: NotificationService,
    ) -> Self {
        Self {
            pool,
            verifications,
            users,
            notifications,
        }
    }

    /// 农户提交认证申请
    #[instrument(skip(self, req), fields(farmer_id = %farmer_id))]
    pub async fn submit(
        &self,
        farmer_id: Uuid,
        req: SubmitVerificationRequest,
    ) -> Result<Verification> {
        validate_request(&req)?;
        let farmer = self
            .users
            .find_by_id(farmer_id)
            .await?
            .ok_or(MarketError::UserNotFound(farmer_id))?;
        if farmer.role != UserRole::Farmer {
            return Err(MarketError::Forbidden("仅农户可以申请认证".to_string()));
        }
        if farmer.is_verified {
            return Err(MarketError::InvalidVerificationState(
                "农户已通过认证".to_string(),
            ));
        }
        if let Some(latest) = self.verifications.latest_for_farmer(farmer_id).await?
            && latest.status.is_open()
        {
            return Err(MarketError::VerificationInProgress);
        }

        let crops = normalize_crops(req.crops);
        if crops.is_empty() {
            return Err(MarketError::Validation("crops: 至少填写一种作物".to_string()));
        }

        let verification = self
            .verifications
            .create(&NewVerification {
                farmer_id,
                farm_name: req.farm_name.trim().to_string(),
                farm_size_hectares: req.farm_size_hectares,
                farm_location: req.farm_location.trim().to_string(),
                crops,
                document_urls: req.document_urls,
            })
            .await?;
        info!(verification_id = %verification.id, "认证申请已提交");

        let reviewers = self.reviewer_ids().await?;
        self.notifications.notify_all_async(
            reviewers
                .into_iter()
                .map(|id| {
                    NotificationBuilder::verification_submitted(
                        id,
                        verification.id,
                        &verification.farm_name,
                    )
                })
                .collect(),
        );
        Ok(verification)
    }

    /// 优先通知农技员，没有农技员时通知管理员
    async fn reviewer_ids(&self) -> Result<Vec<Uuid>> {
        for role in [UserRole::FieldOfficer, UserRole::Admin] {
            let filter = UserFilter {
                role: Some(role),
                status: Some(UserStatus::Active),
                query: None,
                page: 1,
                page_size: MAX_PAGE_SIZE,
            };
            let (users, _) = self.users.list(&filter).await?;
            if !users.is_empty() {
                return Ok(users.into_iter().map(|u| u.id).collect());
            }
        }
        warn!("没有可接收认证申请的审核人");
        Ok(Vec::new())
    }

    pub async fn latest_for_farmer(&self, farmer_id: Uuid) -> Result<Option<Verification>> {
        self.verifications.latest_for_farmer(farmer_id).await
    }

    /// 审核队列
    pub async fn queue(
        &self,
        status: Option<VerificationStatus>,
        page: i64,
        page_size: i64,
    ) -> Result<Page<VerificationView>> {
        let (page, page_size) = normalize_page(page, page_size);
        let (items, total) = self.verifications.list(status, page, page_size).await?;
        Ok(Page::new(items, total, page, page_size))
    }

    pub async fn detail(&self, id: Uuid) -> Result<VerificationView> {
        self.verifications
            .find_view(id)
            .await?
            .ok_or(MarketError::VerificationNotFound(id))
    }

    /// 农技员认领申请
    #[instrument(skip(self))]
    pub async fn claim(&self, officer_id: Uuid, id: Uuid) -> Result<Verification> {
        let mut tx = self.pool.begin().await?;
        let current = VerificationRepository::lock_in_tx(&mut tx, id)
            .await?
            .ok_or(MarketError::VerificationNotFound(id))?;
        if current.status != VerificationStatus::Pending {
            return Err(MarketError::InvalidVerificationState(format!(
                "申请状态为 {}，不能认领",
                current.status
            )));
        }
        let claimed = VerificationRepository::update_in_tx(
            &mut tx,
            id,
            VerificationStatus::InReview,
            officer_id,
            None,
        )
        .await?;
        tx.commit().await?;

        info!(verification_id = %id, "认证申请已认领");
        Ok(claimed)
    }

    /// 审核决定
    #[instrument(skip(self, req), fields(verification_id = %id, approve = req.approve))]
    pub async fn decide(
        &self,
        reviewer_id: Uuid,
        role: UserRole,
        id: Uuid,
        req: VerificationDecisionRequest,
    ) -> Result<Verification> {
        validate_request(&req)?;
        let notes = req.notes.as_deref().map(str::trim).filter(|n| !n.is_empty());

        let mut tx = self.pool.begin().await?;
        let current = VerificationRepository::lock_in_tx(&mut tx, id)
            .await?
            .ok_or(MarketError::VerificationNotFound(id))?;
        can_decide(&current, reviewer_id, role)?;

        let status = if req.approve {
            VerificationStatus::Approved
        } else {
            VerificationStatus::Rejected
        };
        let decided =
            VerificationRepository::update_in_tx(&mut tx, id, status, reviewer_id, notes).await?;

        let mut activated = 0;
        if req.approve {
            UserRepository::set_verified_in_tx(&mut tx, decided.farmer_id, true).await?;
            activated =
                ListingRepository::activate_paused_for_farmer_in_tx(&mut tx, decided.farmer_id)
                    .await?;
        }
        tx.commit().await?;

        info!(
            farmer_id = %decided.farmer_id,
            status = %decided.status,
            listings_activated = activated,
            "认证审核完成"
        );
        self.notifications
            .notify_async(NotificationBuilder::verification_decided(
                decided.farmer_id,
                decided.id,
                req.approve,
                notes,
            ));
        Ok(decided)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::sample_user;
    use crate::repository::{
        MockNotificationRepositoryTrait, MockUserRepositoryTrait, MockVerificationRepositoryTrait,
    };
    use chrono::Utc;
    use rust_decimal::Decimal;
    use sqlx::types::Json;

    fn verification(farmer_id: Uuid, status: VerificationStatus, officer: Option<Uuid>) -> Verification {
        Verification {
            id: Uuid::new_v4(),
            farmer_id,
            officer_id: officer,
            farm_name: "Obi Family Farm".to_string(),
            farm_size_hectares: Decimal::new(35, 1),
            farm_location: "Zaria, Kaduna".to_string(),
            crops: Json(vec!["maize".to_string()]),
            document_urls: Json(vec![]),
            status,
            officer_notes: None,
            submitted_at: Utc::now(),
            reviewed_at: None,
        }
    }

    fn request() -> SubmitVerificationRequest {
        SubmitVerificationRequest {
            farm_name: "Obi Family Farm".to_string(),
            farm_size_hectares: Decimal::new(35, 1),
            farm_location: "Zaria, Kaduna".to_string(),
            crops: vec!["Maize".to_string(), " maize ".to_string(), "Sorghum".to_string()],
            document_urls: vec![],
        }
    }

    fn service(
        verifications: MockVerificationRepositoryTrait,
        users: MockUserRepositoryTrait,
        notification_repo: MockNotificationRepositoryTrait,
    ) -> VerificationService {
        let users = Arc::new(users);
        VerificationService::new(
            PgPool::connect_lazy("postgres://localhost/agricompass_test").unwrap(),
            Arc::new(verifications),
            users.clone(),
            NotificationService::new(Arc::new(notification_repo), users),
        )
    }

    #[test]
    fn test_can_decide_rules() {
        let officer = Uuid::new_v4();
        let in_review = verification(Uuid::new_v4(), VerificationStatus::InReview, Some(officer));
        assert!(can_decide(&in_review, officer, UserRole::FieldOfficer).is_ok());
        assert!(matches!(
            can_decide(&in_review, Uuid::new_v4(), UserRole::FieldOfficer),
            Err(MarketError::Forbidden(_))
        ));
        assert!(can_decide(&in_review, Uuid::new_v4(), UserRole::Admin).is_ok());

        let pending = verification(Uuid::new_v4(), VerificationStatus::Pending, None);
        assert!(can_decide(&pending, Uuid::new_v4(), UserRole::Admin).is_ok());
        assert!(matches!(
            can_decide(&pending, officer, UserRole::FieldOfficer),
            Err(MarketError::InvalidVerificationState(_))
        ));

        let approved = verification(Uuid::new_v4(), VerificationStatus::Approved, Some(officer));
        assert!(matches!(
            can_decide(&approved, officer, UserRole::Admin),
            Err(MarketError::InvalidVerificationState(_))
        ));
        assert!(matches!(
            can_decide(&in_review, officer, UserRole::Farmer),
            Err(MarketError::Forbidden(_))
        ));
    }

    #[test]
    fn test_normalize_crops() {
        let crops = normalize_crops(vec![
            "Maize".to_string(),
            " maize".to_string(),
            "".to_string(),
            "Yam ".to_string(),
        ]);
        assert_eq!(crops, vec!["Maize".to_string(), "Yam".to_string()]);
    }

    #[tokio::test]
    async fn test_submit_rejects_open_request() {
        let farmer = sample_user(UserRole::Farmer);
        let farmer_id = farmer.id;

        let mut users = MockUserRepositoryTrait::new();
        users
            .expect_find_by_id()
            .returning(move |_| Ok(Some(farmer.clone())));
        let mut verifications = MockVerificationRepositoryTrait::new();
        verifications.expect_latest_for_farmer().returning(move |id| {
            Ok(Some(verification(id, VerificationStatus::InReview, None)))
        });
        verifications.expect_create().never();

        let svc = service(verifications, users, MockNotificationRepositoryTrait::new());
        let err = svc.submit(farmer_id, request()).await.unwrap_err();
        assert!(matches!(err, MarketError::VerificationInProgress));
    }

    #[tokio::test]
    async fn test_submit_after_rejection_notifies_officers() {
        let farmer = sample_user(UserRole::Farmer);
        let farmer_id = farmer.id;
        let officer = sample_user(UserRole::FieldOfficer);
        let officer_id = officer.id;

        let mut users = MockUserRepositoryTrait::new();
        users
            .expect_find_by_id()
            .returning(move |_| Ok(Some(farmer.clone())));
        users
            .expect_list()
            .withf(|f| f.role == Some(UserRole::FieldOfficer))
            .returning(move |_| Ok((vec![officer.clone()], 1)));

        let mut verifications = MockVerificationRepositoryTrait::new();
        verifications.expect_latest_for_farmer().returning(move |id| {
            Ok(Some(verification(id, VerificationStatus::Rejected, None)))
        });
        verifications
            .expect_create()
            .withf(|new| new.crops == vec!["Maize".to_string(), "Sorghum".to_string()])
            .times(1)
            .returning(|new| {
                Ok(verification(new.farmer_id, VerificationStatus::Pending, None))
            });

        let mut notification_repo = MockNotificationRepositoryTrait::new();
        notification_repo
            .expect_create()
            .withf(move |n| n.user_id == officer_id)
            .returning(|_| Err(MarketError::Internal("offline".to_string())));

        let svc = service(verifications, users, notification_repo);
        let created = svc.submit(farmer_id, request()).await.unwrap();
        assert_eq!(created.status, VerificationStatus::Pending);
    }

    #[tokio::test]
    async fn test_buyer_cannot_submit() {
        let buyer = sample_user(UserRole::Buyer);
        let buyer_id = buyer.id;
        let mut users = MockUserRepositoryTrait::new();
        users
            .expect_find_by_id()
            .returning(move |_| Ok(Some(buyer.clone())));

        let svc = service(
            MockVerificationRepositoryTrait::new(),
            users,
            MockNotificationRepositoryTrait::new(),
        );
        let err = svc.submit(buyer_id, request()).await.unwrap_err();
        assert!(matches!(err, MarketError::Forbidden(_)));
    }
}
