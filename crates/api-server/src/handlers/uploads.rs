//! 上传签名 API 处理器
//!
//! 客户端拿到签名后直传 Cloudinary，服务端不经手文件内容。

use axum::{Json, extract::State};
use chrono::Utc;

use agri_marketplace::MarketError;
use agri_marketplace::integrations::{UploadPurpose, UploadSignature};

use crate::{
    auth::CurrentUser,
    dto::{ApiResponse, UploadSignatureRequest},
    error::Result,
    state::AppState,
};

/// POST /api/uploads/signature
pub async fn upload_signature(
    State(state): State<AppState>,
    _user: CurrentUser,
    Json(req): Json<UploadSignatureRequest>,
) -> Result<Json<ApiResponse<UploadSignature>>> {
    let signer = state
        .uploads
        .as_ref()
        .ok_or(MarketError::NotConfigured("cloudinary"))?;
    let purpose: UploadPurpose = req.purpose.parse()?;
    Ok(Json(ApiResponse::success(signer.sign_upload(purpose, Utc::now()))))
}
