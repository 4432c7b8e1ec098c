//! 评价 API 处理器

use axum::{
    Json,
    extract::{Path, Query, State},
};
use uuid::Uuid;

use agri_marketplace::dto::CreateReviewRequest;
use agri_marketplace::models::{RatingSummary, Review, ReviewView};

use crate::{
    auth::CurrentUser,
    dto::{ApiResponse, PageResponse, PaginationParams},
    error::Result,
    state::AppState,
};

/// 买家评价已完成订单，每单一次
///
/// POST /api/reviews
pub async fn create_review(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CreateReviewRequest>,
) -> Result<Json<ApiResponse<Review>>> {
    let review = state.reviews.create(user.id, req).await?;
    Ok(Json(ApiResponse::success(review)))
}

/// GET /api/listings/{id}/reviews
pub async fn listing_reviews(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(page): Query<PaginationParams>,
) -> Result<Json<ApiResponse<PageResponse<ReviewView>>>> {
    let result = state
        .reviews
        .list_for_listing(id, page.page, page.page_size)
        .await?;
    Ok(Json(ApiResponse::success(result.into())))
}

/// GET /api/farmers/{id}/rating
pub async fn farmer_rating(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<RatingSummary>>> {
    let summary = state.reviews.farmer_summary(id).await?;
    Ok(Json(ApiResponse::success(summary)))
}
