//! JWT Token 处理
//!
//! 会话 Token 同时携带 CSRF 值，浏览器端通过 `/api/auth/csrf` 取回后放入请求头

use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use agri_marketplace::models::UserRole;
use agri_shared::config::AuthConfig;
use agri_shared::crypto::random_token;

use crate::error::ApiError;

/// CSRF 随机值字节数
const CSRF_TOKEN_BYTES: usize = 32;

/// JWT Claims（Token 载荷）
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// 用户 ID
    pub sub: Uuid,
    pub email: String,
    pub role: UserRole,
    /// 双提交 CSRF 值
    pub csrf: String,
    /// Token 唯一标识，注销时加入黑名单
    pub jti: String,
    /// 签发时间
    pub iat: i64,
    /// 过期时间
    pub exp: i64,
    /// 签发者
    pub iss: String,
}

impl Claims {
    /// 距离过期的剩余秒数
    pub fn remaining_secs(&self) -> i64 {
        (self.exp - Utc::now().timestamp()).max(0)
    }
}

/// 签发结果
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: Claims,
}

/// JWT 管理器
#[derive(Clone)]
pub struct JwtManager {
    issuer: String,
    ttl_secs: i64,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtManager {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            issuer: config.jwt_issuer.clone(),
            ttl_secs: config.session_ttl_seconds,
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        }
    }

    /// 签发会话 Token，每次登录生成新的 CSRF 值与 jti
    pub fn generate_token(
        &self,
        user_id: Uuid,
        email: &str,
        role: UserRole,
    ) -> Result<IssuedToken, ApiError> {
        let now = Utc::now();
        let exp = now + Duration::seconds(self.ttl_secs);

        let claims = Claims {
            sub: user_id,
            email: email.to_string(),
            role,
            csrf: random_token(CSRF_TOKEN_BYTES),
            jti: Uuid::now_v7().to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            iss: self.issuer.clone(),
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| ApiError::Internal(format!("JWT 生成失败: {}", e)))?;

        Ok(IssuedToken { token, claims })
    }

    /// 验证并解析 JWT Token
    pub fn verify_token(&self, token: &str) -> Result<Claims, ApiError> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.issuer]);

        let token_data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(
            |e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    ApiError::Unauthorized("登录已过期".to_string())
                }
                jsonwebtoken::errors::ErrorKind::InvalidToken => {
                    ApiError::Unauthorized("无效的 Token".to_string())
                }
                _ => ApiError::Unauthorized(format!("Token 验证失败: {}", e)),
            },
        )?;

        Ok(token_data.claims)
    }

    pub fn ttl_secs(&self) -> i64 {
        self.ttl_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> JwtManager {
        JwtManager::new(&AuthConfig::default())
    }

    #[test]
    fn test_generate_and_verify_token() {
        let manager = manager();
        let user_id = Uuid::new_v4();

        let issued = manager
            .generate_token(user_id, "ada@farm.ng", UserRole::Farmer)
            .unwrap();

        let claims = manager.verify_token(&issued.token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.role, UserRole::Farmer);
        assert_eq!(claims.iss, "agricompass");
        assert_eq!(claims.csrf, issued.claims.csrf);
        // 无填充 base64url：32 字节对应 43 个字符
        assert_eq!(claims.csrf.len(), (CSRF_TOKEN_BYTES * 4).div_ceil(3));
        assert!(
            claims
                .csrf
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
        assert!(claims.remaining_secs() > 0);
    }

    #[test]
    fn test_each_session_gets_fresh_csrf_and_jti() {
        let manager = manager();
        let user_id = Uuid::new_v4();
        let a = manager
            .generate_token(user_id, "ada@farm.ng", UserRole::Buyer)
            .unwrap();
        let b = manager
            .generate_token(user_id, "ada@farm.ng", UserRole::Buyer)
            .unwrap();
        assert_ne!(a.claims.csrf, b.claims.csrf);
        assert_ne!(a.claims.jti, b.claims.jti);
    }

    #[test]
    fn test_invalid_token() {
        let result = manager().verify_token("invalid.token.here");
        assert!(matches!(result, Err(ApiError::Unauthorized(_))));
    }

    #[test]
    fn test_wrong_secret_or_issuer_rejected() {
        let issued = manager()
            .generate_token(Uuid::new_v4(), "ada@farm.ng", UserRole::Admin)
            .unwrap();

        let other = JwtManager::new(&AuthConfig {
            jwt_secret: "another-secret-for-tests".to_string(),
            ..AuthConfig::default()
        });
        assert!(other.verify_token(&issued.token).is_err());

        let other_issuer = JwtManager::new(&AuthConfig {
            jwt_issuer: "someone-else".to_string(),
            ..AuthConfig::default()
        });
        assert!(other_issuer.verify_token(&issued.token).is_err());
    }

    #[test]
    fn test_expired_token() {
        let manager = JwtManager::new(&AuthConfig {
            session_ttl_seconds: -120,
            ..AuthConfig::default()
        });
        let issued = manager
            .generate_token(Uuid::new_v4(), "ada@farm.ng", UserRole::Buyer)
            .unwrap();
        match manager.verify_token(&issued.token) {
            Err(ApiError::Unauthorized(msg)) => assert_eq!(msg, "登录已过期"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
