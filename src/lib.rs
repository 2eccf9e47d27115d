//! 资源监视器库
//!
//! 周期性读取 /proc 中的 CPU 与内存统计，维护滚动曲线，
//! 并在详情页被访问时抓取一份进程快照。

pub mod cache;
pub mod history;
pub mod monitor;
pub mod procs;
pub mod server;
pub mod stats;

// 重新导出主要的公共类型
pub use cache::{DashboardCache, create_cache};
pub use monitor::{DashboardState, MetricKind, Monitor, run_ticker};
pub use procs::{FetchOutcome, SnapshotConfig, fetch_process_snapshot};
pub use server::{Config, StatusServer};
pub use stats::{CpuSampler, MemorySampler, Reading};
