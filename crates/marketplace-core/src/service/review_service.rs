//! 评价服务：买家对已完成订单打分，每单一次

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};
use uuid::Uuid;

use super::dto::CreateReviewRequest;
use super::listing_service::ListingService;
use super::{normalize_page, validate_request};
use crate::error::{MarketError, Result};
use crate::models::{OrderStatus, Page, RatingSummary, Review, ReviewView};
use crate::notification::{NotificationBuilder, NotificationService};
use crate::repository::{OrderRepositoryTrait, ReviewRepositoryTrait};

pub struct ReviewService {
    reviews: Arc<dyn ReviewRepositoryTrait>,
    orders: Arc<dyn OrderRepositoryTrait>,
    listings: Arc<ListingService>,
    notifications: NotificationService,
}

impl ReviewService {
    pub fn new(
        reviews: Arc<dyn ReviewRepositoryTrait>,
        orders: Arc<dyn OrderRepositoryTrait>,
        listings: Arc<ListingService>,
        notifications: NotificationService,
    ) -> Self {
        Self {
            reviews,
            orders,
            listings,
            notifications,
        }
    }

    #[instrument(skip(self, req), fields(buyer_id = %buyer_id, order_id = %req.order_id))]
    pub async fn create(&self, buyer_id: Uuid, req: CreateReviewRequest) -> Result<Review> {
        validate_request(&req)?;
        let order = self
            .orders
            .find_by_id(req.order_id)
            .await?
            .filter(|o| o.buyer_id == buyer_id)
            .ok_or_else(|| MarketError::OrderNotFound(req.order_id.to_string()))?;
        if order.status != OrderStatus::Completed {
            return Err(MarketError::ReviewNotAllowed);
        }
        if self.reviews.find_by_order(order.id).await?.is_some() {
            return Err(MarketError::AlreadyReviewed);
        }

        let comment = req
            .comment
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        let review = self
            .reviews
            .create(&Review {
                id: Uuid::now_v7(),
                order_id: order.id,
                listing_id: order.listing_id,
                farmer_id: order.farmer_id,
                buyer_id,
                rating: req.rating,
                comment,
                created_at: Utc::now(),
            })
            .await?;
        info!(rating = review.rating, "评价已提交");

        self.listings.invalidate_rating(order.farmer_id).await;
        self.listings.invalidate(order.listing_id).await;
        self.notifications.notify_async(NotificationBuilder::new_review(
            order.farmer_id,
            &order.order_no,
            review.rating,
        ));
        Ok(review)
    }

    pub async fn list_for_listing(
        &self,
        listing_id: Uuid,
        page: i64,
        page_size: i64,
    ) -> Result<Page<ReviewView>> {
        let (page, page_size) = normalize_page(page, page_size);
        let (items, total) = self
            .reviews
            .list_for_listing(listing_id, page, page_size)
            .await?;
        Ok(Page::new(items, total, page, page_size))
    }

    pub async fn farmer_summary(&self, farmer_id: Uuid) -> Result<RatingSummary> {
        self.listings.farmer_rating(farmer_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::sample_order;
    use crate::repository::{
        MockListingRepositoryTrait, MockNotificationRepositoryTrait, MockOrderRepositoryTrait,
        MockReviewRepositoryTrait, MockUserRepositoryTrait,
    };

    fn service(
        reviews: MockReviewRepositoryTrait,
        orders: MockOrderRepositoryTrait,
        notification_repo: MockNotificationRepositoryTrait,
    ) -> ReviewService {
        let reviews: Arc<dyn ReviewRepositoryTrait> = Arc::new(reviews);
        let users = Arc::new(MockUserRepositoryTrait::new());
        let listings = ListingService::new(
            Arc::new(MockListingRepositoryTrait::new()),
            users.clone(),
            reviews.clone(),
        );
        ReviewService::new(
            reviews,
            Arc::new(orders),
            Arc::new(listings),
            NotificationService::new(Arc::new(notification_repo), users),
        )
    }

    fn request(order_id: Uuid, rating: i16) -> CreateReviewRequest {
        CreateReviewRequest {
            order_id,
            rating,
            comment: Some("  Fresh and well packed  ".to_string()),
        }
    }

    fn orders_returning(order: crate::models::Order) -> MockOrderRepositoryTrait {
        let mut orders = MockOrderRepositoryTrait::new();
        orders
            .expect_find_by_id()
            .returning(move |_| Ok(Some(order.clone())));
        orders
    }

    #[tokio::test]
    async fn test_only_completed_orders_can_be_reviewed() {
        let buyer = Uuid::new_v4();
        let order = sample_order(buyer, Uuid::new_v4(), OrderStatus::Delivered);
        let order_id = order.id;

        let svc = service(
            MockReviewRepositoryTrait::new(),
            orders_returning(order),
            MockNotificationRepositoryTrait::new(),
        );
        let err = svc.create(buyer, request(order_id, 5)).await.unwrap_err();
        assert!(matches!(err, MarketError::ReviewNotAllowed));
    }

    #[tokio::test]
    async fn test_other_buyer_cannot_review() {
        let order = sample_order(Uuid::new_v4(), Uuid::new_v4(), OrderStatus::Completed);
        let order_id = order.id;
        let svc = service(
            MockReviewRepositoryTrait::new(),
            orders_returning(order),
            MockNotificationRepositoryTrait::new(),
        );
        let err = svc
            .create(Uuid::new_v4(), request(order_id, 4))
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::OrderNotFound(_)));
    }

    #[tokio::test]
    async fn test_second_review_rejected() {
        let buyer = Uuid::new_v4();
        let order = sample_order(buyer, Uuid::new_v4(), OrderStatus::Completed);
        let order_id = order.id;
        let existing = Review {
            id: Uuid::new_v4(),
            order_id,
            listing_id: order.listing_id,
            farmer_id: order.farmer_id,
            buyer_id: buyer,
            rating: 3,
            comment: None,
            created_at: Utc::now(),
        };

        let mut reviews = MockReviewRepositoryTrait::new();
        reviews
            .expect_find_by_order()
            .returning(move |_| Ok(Some(existing.clone())));
        reviews.expect_create().never();

        let svc = service(reviews, orders_returning(order), MockNotificationRepositoryTrait::new());
        let err = svc.create(buyer, request(order_id, 5)).await.unwrap_err();
        assert!(matches!(err, MarketError::AlreadyReviewed));
    }

    #[tokio::test]
    async fn test_review_created_and_farmer_notified() {
        let buyer = Uuid::new_v4();
        let farmer = Uuid::new_v4();
        let order = sample_order(buyer, farmer, OrderStatus::Completed);
        let order_id = order.id;

        let mut reviews = MockReviewRepositoryTrait::new();
        reviews.expect_find_by_order().returning(|_| Ok(None));
        reviews
            .expect_create()
            .withf(move |r| {
                r.farmer_id == farmer
                    && r.rating == 5
                    && r.comment.as_deref() == Some("Fresh and well packed")
            })
            .times(1)
            .returning(|r| Ok(r.clone()));

        let mut notification_repo = MockNotificationRepositoryTrait::new();
        notification_repo
            .expect_create()
            .withf(move |n| n.user_id == farmer)
            .returning(|_| Err(MarketError::Internal("offline".to_string())));

        let svc = service(reviews, orders_returning(order), notification_repo);
        let review = svc.create(buyer, request(order_id, 5)).await.unwrap();
        assert_eq!(review.order_id, order_id);
    }

    #[tokio::test]
    async fn test_rating_out_of_range() {
        let svc = service(
            MockReviewRepositoryTrait::new(),
            MockOrderRepositoryTrait::new(),
            MockNotificationRepositoryTrait::new(),
        );
        let err = svc
            .create(Uuid::new_v4(), request(Uuid::new_v4(), 6))
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::Validation(_)));
    }
}
