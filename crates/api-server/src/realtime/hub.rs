//! 进程内连接表
//!
//! 一个用户可同时打开多个连接（多标签页）。推送尽力而为：
//! 发送队列已满时丢弃该条消息，连接已关闭时移除连接。

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use agri_marketplace::notification::{RealtimeEvent, RealtimePublisher};
use agri_shared::observability::metrics;

/// 单连接发送队列长度
const OUTBOUND_BUFFER: usize = 64;
/// 单用户默认最大连接数
const DEFAULT_MAX_PER_USER: usize = 5;

struct Connection {
    id: u64,
    tx: mpsc::Sender<String>,
}

/// 注册成功后返回给连接任务
pub struct Registration {
    pub connection_id: u64,
    pub receiver: mpsc::Receiver<String>,
}

pub struct RealtimeHub {
    connections: DashMap<Uuid, Vec<Connection>>,
    next_id: AtomicU64,
    total: AtomicUsize,
    max_per_user: usize,
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PER_USER)
    }
}

impl RealtimeHub {
    pub fn new(max_per_user: usize) -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            total: AtomicUsize::new(0),
            max_per_user,
        }
    }

    /// 升级前的快速检查
    pub fn can_accept(&self, user_id: Uuid) -> bool {
        self.user_connections(user_id) < self.max_per_user
    }

    /// 注册连接，超过单用户上限时返回 None
    pub fn register(&self, user_id: Uuid) -> Option<Registration> {
        let mut entry = self.connections.entry(user_id).or_default();
        entry.retain(|c| !c.tx.is_closed());
        if entry.len() >= self.max_per_user {
            warn!(user_id = %user_id, limit = self.max_per_user, "WebSocket 连接数超限");
            return None;
        }

        let (tx, receiver) = mpsc::channel(OUTBOUND_BUFFER);
        let connection_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        entry.push(Connection {
            id: connection_id,
            tx,
        });
        drop(entry);

        let total = self.total.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_ws_connections(total);
        debug!(user_id = %user_id, connection_id, total, "WebSocket 连接已注册");

        Some(Registration {
            connection_id,
            receiver,
        })
    }

    pub fn unregister(&self, user_id: Uuid, connection_id: u64) {
        let removed = match self.connections.get_mut(&user_id) {
            Some(mut conns) => {
                let before = conns.len();
                conns.retain(|c| c.id != connection_id);
                before - conns.len()
            }
            None => 0,
        };
        self.connections.remove_if(&user_id, |_, conns| conns.is_empty());

        if removed > 0 {
            let total = self
                .total
                .fetch_sub(removed, Ordering::SeqCst)
                .saturating_sub(removed);
            metrics::set_ws_connections(total);
            debug!(user_id = %user_id, connection_id, total, "WebSocket 连接已注销");
        }
    }

    pub fn user_connections(&self, user_id: Uuid) -> usize {
        self.connections
            .get(&user_id)
            .map(|conns| conns.iter().filter(|c| !c.tx.is_closed()).count())
            .unwrap_or(0)
    }

    pub fn connection_count(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn online_users(&self) -> usize {
        self.connections.len()
    }
}

impl RealtimePublisher for RealtimeHub {
    fn publish(&self, user_id: Uuid, event: &RealtimeEvent) -> usize {
        let Some(mut conns) = self.connections.get_mut(&user_id) else {
            return 0;
        };

        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(event = event.name(), error = %e, "实时事件序列化失败");
                return 0;
            }
        };

        let mut delivered = 0;
        conns.retain(|conn| match conn.tx.try_send(payload.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(user_id = %user_id, connection_id = conn.id, "发送队列已满，丢弃事件");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });

        debug!(user_id = %user_id, event = event.name(), delivered, "实时事件已推送");
        delivered
    }

    fn is_online(&self, user_id: Uuid) -> bool {
        self.user_connections(user_id) > 0
    }
}
