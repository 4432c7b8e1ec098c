//! 商品 API 处理器
//!
//! 公开搜索、详情与报价；农户发布与维护自己的商品。

use axum::{
    Json,
    extract::{Path, Query, State},
};
use tracing::info;
use uuid::Uuid;

use agri_marketplace::dto::{
    CreateListingRequest, ListingDetail, QuoteRequest, ReplaceTiersRequest,
    SetListingStatusRequest, UpdateListingRequest,
};
use agri_marketplace::models::{Listing, ListingStatus, PricingTier};
use agri_marketplace::pricing::PriceQuote;

use crate::{
    auth::CurrentUser,
    dto::{ApiResponse, ListingQuery, PageResponse, PaginationParams, StatusQuery},
    error::Result,
    state::AppState,
};

/// 搜索在售商品
///
/// GET /api/listings
pub async fn search_listings(
    State(state): State<AppState>,
    Query(page): Query<PaginationParams>,
    Query(query): Query<ListingQuery>,
) -> Result<Json<ApiResponse<PageResponse<Listing>>>> {
    let result = state.listings.search(query.into_filter(page)).await?;
    Ok(Json(ApiResponse::success(result.into())))
}

/// 商品详情
///
/// GET /api/listings/{id}
///
/// 非在售商品仅对所属农户可见。
pub async fn get_listing(
    State(state): State<AppState>,
    viewer: Option<CurrentUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<ListingDetail>>> {
    let detail = state
        .listings
        .detail(id, viewer.map(|user| user.id))
        .await?;
    Ok(Json(ApiResponse::success(detail)))
}

/// 按数量报价
///
/// GET /api/listings/{id}/quote?quantity=
pub async fn quote_listing(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(req): Query<QuoteRequest>,
) -> Result<Json<ApiResponse<PriceQuote>>> {
    let quote = state.listings.quote(id, req.quantity).await?;
    Ok(Json(ApiResponse::success(quote)))
}

/// 发布商品
///
/// POST /api/listings
pub async fn create_listing(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<CreateListingRequest>,
) -> Result<Json<ApiResponse<Listing>>> {
    let listing = state.listings.create(user.id, req).await?;
    info!(listing_id = %listing.id, farmer_id = %user.id, "商品已发布");
    Ok(Json(ApiResponse::success(listing)))
}

/// 编辑商品
///
/// PATCH /api/listings/{id}
pub async fn update_listing(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateListingRequest>,
) -> Result<Json<ApiResponse<Listing>>> {
    let listing = state.listings.update(user.id, id, req).await?;
    Ok(Json(ApiResponse::success(listing)))
}

/// 上下架
///
/// PATCH /api/listings/{id}/status
pub async fn set_listing_status(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<SetListingStatusRequest>,
) -> Result<Json<ApiResponse<Listing>>> {
    let listing = state.listings.set_status(user.id, id, req.status).await?;
    info!(listing_id = %id, status = %listing.status, "商品状态已变更");
    Ok(Json(ApiResponse::success(listing)))
}

/// 整体替换阶梯价
///
/// PUT /api/listings/{id}/tiers
pub async fn replace_tiers(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<ReplaceTiersRequest>,
) -> Result<Json<ApiResponse<Vec<PricingTier>>>> {
    let tiers = state.listings.replace_tiers(user.id, id, req.tiers).await?;
    info!(listing_id = %id, tiers = tiers.len(), "阶梯价已更新");
    Ok(Json(ApiResponse::success(tiers)))
}

/// 农户自己的商品
///
/// GET /api/farmer/listings?status=
pub async fn my_listings(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(page): Query<PaginationParams>,
    Query(filter): Query<StatusQuery<ListingStatus>>,
) -> Result<Json<ApiResponse<PageResponse<Listing>>>> {
    let result = state
        .listings
        .farmer_listings(user.id, filter.status, page.page, page.page_size)
        .await?;
    Ok(Json(ApiResponse::success(result.into())))
}
