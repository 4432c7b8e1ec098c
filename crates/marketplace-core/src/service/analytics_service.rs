//! 仪表盘统计
//!
//! 按角色返回不同的统计视图。管理员仪表盘全站聚合，结果缓存一分钟。

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{instrument, warn};
use uuid::Uuid;

use agri_shared::cache::{Cache, CacheKey};

use super::listing_service::ListingService;
use crate::error::Result;
use crate::models::{
    AdminDashboard, BuyerDashboard, FarmerDashboard, OfficerDashboard, OrderFilter, UserRole,
};
use crate::repository::{AnalyticsRepository, OrderRepositoryTrait, WalletRepositoryTrait};

const ADMIN_DASHBOARD_TTL: Duration = Duration::from_secs(60);
const TOP_LISTINGS: i64 = 5;
const RECENT_ORDERS: i64 = 5;

/// 当前用户的仪表盘
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "role", content = "data", rename_all = "snake_case")]
pub enum Dashboard {
    Farmer(FarmerDashboard),
    Buyer(BuyerDashboard),
    FieldOfficer(OfficerDashboard),
    Admin(AdminDashboard),
}

pub struct AnalyticsService {
    analytics: AnalyticsRepository,
    orders: Arc<dyn OrderRepositoryTrait>,
    wallets: Arc<dyn WalletRepositoryTrait>,
    listings: Arc<ListingService>,
    cache: Option<Arc<Cache>>,
}

impl AnalyticsService {
    pub fn new(
        analytics: AnalyticsRepository,
        orders: Arc<dyn OrderRepositoryTrait>,
        wallets: Arc<dyn WalletRepositoryTrait>,
        listings: Arc<ListingService>,
    ) -> Self {
        Self {
            analytics,
            orders,
            wallets,
            listings,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub async fn dashboard(&self, user_id: Uuid, role: UserRole) -> Result<Dashboard> {
        Ok(match role {
            UserRole::Farmer => Dashboard::Farmer(self.farmer(user_id).await?),
            UserRole::Buyer => Dashboard::Buyer(self.buyer(user_id).await?),
            UserRole::FieldOfficer => Dashboard::FieldOfficer(self.officer(user_id).await?),
            UserRole::Admin => Dashboard::Admin(self.admin().await?),
        })
    }

    #[instrument(skip(self))]
    pub async fn farmer(&self, farmer_id: Uuid) -> Result<FarmerDashboard> {
        let (
            (gross_revenue, net_revenue),
            pending_payout,
            active_listings,
            orders_by_status,
            top_listings,
            monthly_revenue,
        ) = tokio::try_join!(
            self.analytics.farmer_revenue(farmer_id),
            self.analytics.farmer_pending_payout(farmer_id),
            self.analytics.farmer_active_listings(farmer_id),
            self.analytics.orders_by_status(None, Some(farmer_id)),
            self.analytics.farmer_top_listings(farmer_id, TOP_LISTINGS),
            self.analytics.farmer_monthly_revenue(farmer_id),
        )?;
        let (wallet, rating) = tokio::try_join!(
            self.wallets.find_wallet(farmer_id),
            self.listings.farmer_rating(farmer_id),
        )?;

        Ok(FarmerDashboard {
            net_revenue,
            gross_revenue,
            pending_payout,
            wallet_balance: wallet.map(|w| w.balance).unwrap_or_default(),
            active_listings,
            orders_by_status,
            top_listings,
            monthly_revenue,
            rating,
        })
    }

    #[instrument(skip(self))]
    pub async fn buyer(&self, buyer_id: Uuid) -> Result<BuyerDashboard> {
        let recent = OrderFilter {
            buyer_id: Some(buyer_id),
            page: 1,
            page_size: RECENT_ORDERS,
            ..Default::default()
        };
        let ((total_spent, in_escrow), orders_by_status, (recent_orders, _)) = tokio::try_join!(
            self.analytics.buyer_spend(buyer_id),
            self.analytics.orders_by_status(Some(buyer_id), None),
            self.orders.list_views(&recent),
        )?;

        Ok(BuyerDashboard {
            total_spent,
            in_escrow,
            orders_by_status,
            recent_orders,
        })
    }

    pub async fn officer(&self, officer_id: Uuid) -> Result<OfficerDashboard> {
        self.analytics.officer_stats(officer_id).await
    }

    #[instrument(skip(self))]
    pub async fn admin(&self) -> Result<AdminDashboard> {
        let key = CacheKey::admin_dashboard();
        if let Some(cache) = &self.cache {
            match cache.get::<AdminDashboard>(&key).await {
                Ok(Some(dashboard)) => return Ok(dashboard),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "读取仪表盘缓存失败"),
            }
        }

        let (
            users_by_role,
            verified_farmers,
            (gmv, platform_fees),
            escrow_held,
            orders_by_status,
            (pending_withdrawals, pending_withdrawal_amount),
            pending_verifications,
        ) = tokio::try_join!(
            self.analytics.users_by_role(),
            self.analytics.verified_farmers(),
            self.analytics.platform_totals(),
            self.analytics.escrow_held(),
            self.analytics.orders_by_status(None, None),
            self.analytics.pending_withdrawals(),
            self.analytics.pending_verifications(),
        )?;

        let dashboard = AdminDashboard {
            users_by_role,
            verified_farmers,
            gmv,
            platform_fees,
            escrow_held,
            orders_by_status,
            pending_withdrawals,
            pending_withdrawal_amount,
            pending_verifications,
        };

        if let Some(cache) = &self.cache
            && let Err(e) = cache.set(&key, &dashboard, ADMIN_DASHBOARD_TTL).await
        {
            warn!(error = %e, "写入仪表盘缓存失败");
        }
        Ok(dashboard)
    }
}
