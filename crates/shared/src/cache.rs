//! Redis 访问层
//!
//! 值统一以 JSON 存储。除详情与评分缓存外，还承载会话黑名单、停用标记、
//! 限流窗口计数与 Paystack 回调去重；调用方对 Redis 故障按失败放行处理。

use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, info, instrument};

use crate::config::RedisConfig;
use crate::error::Result;

#[derive(Clone)]
pub struct Cache {
    client: Client,
}

/// Redis 的 EX 参数不接受 0
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

impl Cache {
    /// 只解析地址，首次使用时才建立连接
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())?;
        info!(url = %redact_url(&config.url), "Redis 客户端已创建");
        Ok(Self { client })
    }

    async fn conn(&self) -> Result<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let raw: Option<String> = self.conn().await?.get(key).await?;
        raw.map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(Into::into)
    }

    #[instrument(skip(self, value))]
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let json = serde_json::to_string(value)?;
        let _: () = self.conn().await?.set_ex(key, json, ttl_secs(ttl)).await?;
        Ok(())
    }

    /// SET NX EX；返回 false 表示键已存在
    pub async fn set_nx<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<bool> {
        let json = serde_json::to_string(value)?;
        let mut conn = self.conn().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(json)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        let _: () = self.conn().await?.del(key).await?;
        Ok(())
    }

    /// 以 SCAN 遍历删除匹配的键，不阻塞 Redis
    #[instrument(skip(self))]
    pub async fn delete_pattern(&self, pattern: &str) -> Result<u64> {
        let mut conn = self.conn().await?;
        let mut cursor = 0u64;
        let mut removed = 0u64;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await?;
            if !keys.is_empty() {
                let n: u64 = conn.del(&keys).await?;
                removed += n;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        debug!(pattern, removed, "按模式清理缓存");
        Ok(removed)
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.conn().await?.exists(key).await?)
    }

    pub async fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        Ok(self.conn().await?.incr(key, delta).await?)
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let _: () = self.conn().await?.expire(key, ttl_secs(ttl) as i64).await?;
        Ok(())
    }

    /// 窗口计数：INCR 与 EXPIRE 在同一事务内执行，返回累计次数。
    /// 键名需自带窗口编号，每次命中刷新过期不会延长窗口
    pub async fn incr_window(&self, key: &str, window: Duration) -> Result<i64> {
        let mut conn = self.conn().await?;
        let (count,): (i64,) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs(window))
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }
}

/// 日志中隐藏连接串里的密码
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme), Some(at)) if at > scheme => {
            format!("{}://***{}", &url[..scheme], &url[at..])
        }
        _ => url.to_string(),
    }
}

/// 缓存键
pub struct CacheKey;

impl CacheKey {
    pub fn listing_detail(listing_id: &str) -> String {
        format!("listing:detail:{listing_id}")
    }

    pub fn farmer_rating(farmer_id: &str) -> String {
        format!("farmer:rating:{farmer_id}")
    }

    pub fn admin_dashboard() -> String {
        "analytics:admin".to_string()
    }

    /// 已注销的 JWT（按 jti）
    pub fn revoked_session(jti: &str) -> String {
        format!("auth:revoked:{jti}")
    }

    /// 停用标记存在期间，该用户的所有会话失效
    pub fn suspended_user(user_id: &str) -> String {
        format!("auth:suspended:{user_id}")
    }

    pub fn webhook_event(event: &str, reference: &str) -> String {
        format!("webhook:paystack:{event}:{reference}")
    }

    pub fn rate_window(tier: &str, subject: &str) -> String {
        format!("ratelimit:{tier}:{subject}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_namespaced() {
        assert_eq!(CacheKey::listing_detail("123"), "listing:detail:123");
        assert_eq!(CacheKey::revoked_session("abc"), "auth:revoked:abc");
        assert_eq!(CacheKey::suspended_user("u1"), "auth:suspended:u1");
        assert_eq!(
            CacheKey::webhook_event("charge.success", "AGR-1"),
            "webhook:paystack:charge.success:AGR-1"
        );
        assert_eq!(CacheKey::rate_window("auth", "ip:1.2.3.4"), "ratelimit:auth:ip:1.2.3.4");
    }

    #[test]
    fn test_ttl_never_zero() {
        assert_eq!(ttl_secs(Duration::from_millis(300)), 1);
        assert_eq!(ttl_secs(Duration::from_secs(90)), 90);
    }

    #[test]
    fn test_redact_url() {
        assert_eq!(
            redact_url("redis://:s3cret@cache.internal:6379/0"),
            "redis://***@cache.internal:6379/0"
        );
        assert_eq!(redact_url("redis://localhost:6379"), "redis://localhost:6379");
    }

    #[tokio::test]
    #[ignore] // 需要 Redis
    async fn test_set_nx_dedup() {
        let cache = Cache::new(&RedisConfig::default()).unwrap();
        let key = format!("test:nx:{}", uuid::Uuid::new_v4());
        assert!(cache.set_nx(&key, &1, Duration::from_secs(5)).await.unwrap());
        assert!(!cache.set_nx(&key, &2, Duration::from_secs(5)).await.unwrap());
        assert_eq!(cache.incr_window(&format!("{key}:w"), Duration::from_secs(5)).await.unwrap(), 1);
        cache.delete(&key).await.unwrap();
    }
}
