use crate::monitor::DashboardState;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// 默认的过期时间：连续错过几个采样周期即视为过期
pub const DEFAULT_STALE_TTL_SECONDS: u64 = 3;

/// 缓存中的一帧以及它的发布时间
struct Published {
    state: Arc<DashboardState>,
    at: Instant,
}

/// 读取结果：状态帧与是否过期
#[derive(Debug, Clone)]
pub struct CachedDashboard {
    pub state: Arc<DashboardState>,
    pub stale: bool,
}

/// 采样任务与显示层之间的状态缓存
///
/// 采样任务是唯一的写入者，读取方只拿到不可变的快照。
pub struct DashboardCache {
    current: RwLock<Option<Published>>,
    ttl: Duration,
}

impl DashboardCache {
    /// 创建新的缓存实例
    #[inline]
    pub fn new(ttl: Duration) -> Self {
        Self {
            current: RwLock::new(None),
            ttl,
        }
    }

    /// 读取最近一帧，尚未发布时返回 None
    pub fn get(&self) -> Option<CachedDashboard> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().map(|published| CachedDashboard {
            state: Arc::clone(&published.state),
            stale: published.at.elapsed() > self.ttl,
        })
    }

    /// 发布新的一帧
    pub fn publish(&self, state: DashboardState) {
        let published = Published {
            state: Arc::new(state),
            at: Instant::now(),
        };
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = Some(published);
    }

    #[inline]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// 缓存类型别名
pub type CacheRef = Arc<DashboardCache>;

/// 创建缓存实例的便捷函数
#[inline]
pub fn create_cache(ttl_seconds: u64) -> CacheRef {
    Arc::new(DashboardCache::new(Duration::from_secs(ttl_seconds)))
}
