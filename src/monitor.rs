use crate::cache::CacheRef;
use crate::history::HistorySeries;
use crate::stats::{CpuSampler, MemorySampler, MemoryUsage, Reading};
use log::{debug, info};
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// 默认采样周期
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(1000);

/// 被监视的指标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Cpu,
    Memory,
}

impl MetricKind {
    pub const ALL: [MetricKind; 2] = [MetricKind::Cpu, MetricKind::Memory];

    #[inline]
    pub fn title(&self) -> &'static str {
        match self {
            MetricKind::Cpu => "CPU Usage",
            MetricKind::Memory => "Memory Usage",
        }
    }

    /// URL 中使用的名字
    #[inline]
    pub fn slug(&self) -> &'static str {
        match self {
            MetricKind::Cpu => "cpu",
            MetricKind::Memory => "memory",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.slug() == slug)
    }
}

/// 一个指标的显示状态：仪表值、最近读数与曲线
#[derive(Debug, Clone)]
pub struct MonitorItem {
    pub kind: MetricKind,
    pub last_value: u8,
    pub last_reading: Reading,
    pub history: HistorySeries,
}

impl MonitorItem {
    pub fn new(kind: MetricKind) -> Self {
        Self {
            kind,
            last_value: 0,
            last_reading: Reading::WarmingUp,
            history: HistorySeries::default(),
        }
    }

    #[inline]
    pub fn title(&self) -> &'static str {
        self.kind.title()
    }

    /// 仪表下方的 “N%” 文本
    #[inline]
    pub fn value_label(&self) -> String {
        format!("{}%", self.last_value)
    }

    fn record(&mut self, reading: Reading) {
        self.last_value = reading.display_value();
        self.last_reading = reading;
        self.history.push(self.last_value);
    }
}

/// 发布给显示层的一帧状态
#[derive(Debug, Clone)]
pub struct DashboardState {
    pub cpu: MonitorItem,
    pub memory: MonitorItem,
    pub memory_usage: MemoryUsage,
    pub tick: u64,
}

impl DashboardState {
    #[inline]
    pub fn item(&self, kind: MetricKind) -> &MonitorItem {
        match kind {
            MetricKind::Cpu => &self.cpu,
            MetricKind::Memory => &self.memory,
        }
    }
}

/// 持有采样器与曲线的监视器，只由采样任务使用
#[derive(Debug)]
pub struct Monitor {
    cpu_sampler: CpuSampler,
    memory_sampler: MemorySampler,
    cpu: MonitorItem,
    memory: MonitorItem,
    ticks: u64,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Monitor {
    pub fn new() -> Self {
        Self {
            cpu_sampler: CpuSampler::new(),
            memory_sampler: MemorySampler::new(),
            cpu: MonitorItem::new(MetricKind::Cpu),
            memory: MonitorItem::new(MetricKind::Memory),
            ticks: 0,
        }
    }

    #[inline]
    pub fn item(&self, kind: MetricKind) -> &MonitorItem {
        match kind {
            MetricKind::Cpu => &self.cpu,
            MetricKind::Memory => &self.memory,
        }
    }

    /// 一个采样周期：读取两个数据源，更新仪表值与曲线
    pub async fn tick(&mut self) -> DashboardState {
        let cpu = self.cpu_sampler.sample().await;
        let memory = self.memory_sampler.sample().await;
        self.record(cpu, memory)
    }

    /// 记录一组读数并生成新的状态帧
    pub fn record(&mut self, cpu: Reading, memory: Reading) -> DashboardState {
        self.cpu.record(cpu);
        self.memory.record(memory);
        self.ticks += 1;

        debug!(
            "第 {} 次采样: CPU {:?}, 内存 {:?}",
            self.ticks, cpu, memory
        );

        self.state()
    }

    pub fn state(&self) -> DashboardState {
        DashboardState {
            cpu: self.cpu.clone(),
            memory: self.memory.clone(),
            memory_usage: self.memory_sampler.usage(),
            tick: self.ticks,
        }
    }
}

/// 周期性采样并把结果发布到缓存，直到任务被取消
pub async fn run_ticker(mut monitor: Monitor, cache: CacheRef, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("采样任务启动，周期 {period:?}");

    loop {
        interval.tick().await;
        let state = monitor.tick().await;
        cache.publish(state);
    }
}
