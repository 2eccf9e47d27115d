use log::{debug, warn};

/// 内核 CPU 统计来源
pub const PROC_STAT: &str = "/proc/stat";
/// 内核内存统计来源
pub const PROC_MEMINFO: &str = "/proc/meminfo";

/// `/proc/stat` 汇总行中的 8 个累计计数器（单位：时钟滴答）
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CpuCounters {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuCounters {
    /// 空闲时间 = idle + iowait
    #[inline]
    pub fn idle_time(&self) -> u64 {
        self.idle.saturating_add(self.iowait)
    }

    /// 全部 8 个计数器之和
    #[inline]
    pub fn total_time(&self) -> u64 {
        [
            self.user,
            self.nice,
            self.system,
            self.idle,
            self.iowait,
            self.irq,
            self.softirq,
            self.steal,
        ]
        .iter()
        .fold(0u64, |acc, v| acc.saturating_add(*v))
    }
}

/// 系统资源采样错误类型
#[derive(Debug)]
pub enum StatsError {
    /// 数据源无法打开或读取
    SourceUnavailable(std::io::Error),
    /// 字段缺失或无法解析
    MalformedSample(String),
    /// 两次采样之间没有经过任何时钟滴答
    DegenerateInterval,
}

/// 错误类别，便于在状态快照中保存
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsErrorKind {
    SourceUnavailable,
    MalformedSample,
    DegenerateInterval,
}

impl StatsError {
    #[inline]
    pub fn kind(&self) -> StatsErrorKind {
        match self {
            StatsError::SourceUnavailable(_) => StatsErrorKind::SourceUnavailable,
            StatsError::MalformedSample(_) => StatsErrorKind::MalformedSample,
            StatsError::DegenerateInterval => StatsErrorKind::DegenerateInterval,
        }
    }
}

impl From<std::io::Error> for StatsError {
    #[inline]
    fn from(error: std::io::Error) -> Self {
        StatsError::SourceUnavailable(error)
    }
}

impl std::fmt::Display for StatsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatsError::SourceUnavailable(e) => write!(f, "数据源不可用: {e}"),
            StatsError::MalformedSample(s) => write!(f, "采样格式错误: {s}"),
            StatsError::DegenerateInterval => write!(f, "采样间隔内没有经过任何时钟滴答"),
        }
    }
}

impl std::error::Error for StatsError {}

pub type Result<T> = std::result::Result<T, StatsError>;

/// 一次采样的可观察结果
///
/// 显示层只关心 [`Reading::display_value`]，失败与预热都显示为 0，
/// 但调用方仍可区分“0% 负载”与“读不到负载”。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reading {
    /// 有效的使用率百分比 (0-100)
    Percent(u8),
    /// 第一次 CPU 采样，仅建立基线
    #[default]
    WarmingUp,
    /// 采样失败，下一个周期会自动重试
    Failed(StatsErrorKind),
}

impl Reading {
    /// 显示用的百分比，非有效读数一律为 0
    #[inline]
    pub fn display_value(&self) -> u8 {
        match self {
            Reading::Percent(v) => *v,
            Reading::WarmingUp | Reading::Failed(_) => 0,
        }
    }

    #[inline]
    pub fn is_known(&self) -> bool {
        matches!(self, Reading::Percent(_))
    }
}

/// 记录失败原因并转换为对应的读数
fn settle(source: &str, error: StatsError) -> Reading {
    match &error {
        StatsError::DegenerateInterval => debug!("{source}: {error}"),
        _ => warn!("{source}: {error}"),
    }
    Reading::Failed(error.kind())
}

/// 解析 `/proc/stat` 的第一行（`cpu` 汇总行）
///
/// 行格式由内核固定：标签 `cpu` 后跟至少 8 个无符号整数，
/// 之后的 guest/guest_nice 等字段被忽略。
pub fn parse_cpu_counters(content: &str) -> Result<CpuCounters> {
    let first_line = content
        .lines()
        .next()
        .ok_or_else(|| StatsError::MalformedSample("/proc/stat 内容为空".to_string()))?;

    let mut parts = first_line.split_whitespace();
    match parts.next() {
        Some("cpu") => {}
        other => {
            return Err(StatsError::MalformedSample(format!(
                "期望 cpu 汇总行，实际行首为 {other:?}"
            )));
        }
    }

    let mut fields = [0u64; 8];
    for (index, slot) in fields.iter_mut().enumerate() {
        let raw = parts.next().ok_or_else(|| {
            StatsError::MalformedSample(format!("cpu 汇总行只有 {index} 个计数器"))
        })?;
        *slot = raw
            .parse()
            .map_err(|e| StatsError::MalformedSample(format!("无法解析计数器 {raw:?}: {e}")))?;
    }

    let [user, nice, system, idle, iowait, irq, softirq, steal] = fields;
    Ok(CpuCounters {
        user,
        nice,
        system,
        idle,
        iowait,
        irq,
        softirq,
        steal,
    })
}

/// CPU 使用率采样器（增量算法）
///
/// 上一次的计数器快照保存在采样器自身中，由调用方持有，
/// 多个采样器之间互不影响。
#[derive(Debug, Default, Clone)]
pub struct CpuSampler {
    prev: Option<CpuCounters>,
}

impl CpuSampler {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 上一次成功解析的快照
    #[inline]
    pub fn baseline(&self) -> Option<CpuCounters> {
        self.prev
    }

    /// 与上一次快照比较，计算使用率
    ///
    /// 第一次调用只建立基线并返回 `Ok(None)`。
    /// 每次调用都会把 `current` 记为新的基线。
    pub fn observe(&mut self, current: CpuCounters) -> Result<Option<u8>> {
        let Some(prev) = self.prev.replace(current) else {
            return Ok(None);
        };

        let total = current.total_time();
        let prev_total = prev.total_time();
        if total < prev_total {
            return Err(StatsError::MalformedSample(format!(
                "CPU 计数器回退: {prev_total} -> {total}"
            )));
        }

        let total_diff = total - prev_total;
        if total_diff == 0 {
            return Err(StatsError::DegenerateInterval);
        }

        let idle_diff = current
            .idle_time()
            .saturating_sub(prev.idle_time())
            .min(total_diff);

        // 整数截断除法，结果必然落在 [0, 100]
        let busy = u128::from(total_diff - idle_diff);
        let percent = busy * 100 / u128::from(total_diff);
        Ok(Some(percent as u8))
    }

    /// 解析 `/proc/stat` 内容后计算使用率
    pub fn observe_str(&mut self, content: &str) -> Result<Option<u8>> {
        let current = parse_cpu_counters(content)?;
        self.observe(current)
    }

    /// 读取 `/proc/stat` 并采样，失败时不报错而是返回对应读数
    pub async fn sample(&mut self) -> Reading {
        self.sample_from(PROC_STAT).await
    }

    pub(crate) async fn sample_from(&mut self, path: &str) -> Reading {
        let outcome = match tokio::fs::read_to_string(path).await {
            Ok(content) => self.observe_str(&content),
            Err(e) => Err(StatsError::from(e)),
        };

        match outcome {
            Ok(Some(percent)) => Reading::Percent(percent),
            Ok(None) => {
                debug!("CPU 基线已建立，等待下一次采样");
                Reading::WarmingUp
            }
            Err(e) => settle(path, e),
        }
    }
}

/// `/proc/meminfo` 中需要的两个字段（单位：kB）
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInfo {
    pub total_kb: u64,
    pub available_kb: u64,
}

/// 按标签解析 `/proc/meminfo`
///
/// 两个键的先后顺序不作假设，两者都找到后立即停止扫描。
pub fn parse_meminfo(content: &str) -> Result<MemoryInfo> {
    let mut total = None;
    let mut available = None;

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };

        let slot = match key {
            "MemTotal:" => &mut total,
            "MemAvailable:" => &mut available,
            _ => continue,
        };
        *slot = Some(value.parse::<u64>().map_err(|e| {
            StatsError::MalformedSample(format!("无法解析 {key} 的值 {value:?}: {e}"))
        })?);

        if total.is_some() && available.is_some() {
            break;
        }
    }

    let total_kb =
        total.ok_or_else(|| StatsError::MalformedSample("缺少 MemTotal 字段".to_string()))?;
    let available_kb = available
        .ok_or_else(|| StatsError::MalformedSample("缺少 MemAvailable 字段".to_string()))?;

    if available_kb > total_kb {
        return Err(StatsError::MalformedSample(format!(
            "MemAvailable ({available_kb} kB) 大于 MemTotal ({total_kb} kB)"
        )));
    }

    Ok(MemoryInfo {
        total_kb,
        available_kb,
    })
}

/// 最近一次内存采样得到的绝对值（单位：kB）
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    pub total_kb: u64,
    pub used_kb: u64,
}

impl MemoryUsage {
    /// “已用/总量 MB” 文本，在显示时才换算为 MB
    pub fn label(&self) -> String {
        format!("{}/{} MB", self.used_kb / 1024, self.total_kb / 1024)
    }
}

/// 内存使用率采样器
///
/// 每次采样都重新读取，除了供显示的 `total_kb`/`used_kb` 外不保留历史。
#[derive(Debug, Default, Clone)]
pub struct MemorySampler {
    usage: MemoryUsage,
}

impl MemorySampler {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn usage(&self) -> MemoryUsage {
        self.usage
    }

    /// 由解析结果计算使用率，并更新显示用的绝对值
    pub fn observe(&mut self, info: MemoryInfo) -> Result<u8> {
        if info.total_kb == 0 {
            self.usage.total_kb = 0;
            return Err(StatsError::MalformedSample("MemTotal 为 0".to_string()));
        }

        let Some(used_kb) = info.total_kb.checked_sub(info.available_kb) else {
            self.usage.total_kb = 0;
            return Err(StatsError::MalformedSample(format!(
                "MemAvailable ({} kB) 大于 MemTotal ({} kB)",
                info.available_kb, info.total_kb
            )));
        };

        self.usage = MemoryUsage {
            total_kb: info.total_kb,
            used_kb,
        };

        let percent = u128::from(used_kb) * 100 / u128::from(info.total_kb);
        Ok(percent as u8)
    }

    /// 解析 `/proc/meminfo` 内容后计算使用率
    ///
    /// 失败时 `total_kb` 归零，`used_kb` 保持上一次的值。
    pub fn observe_str(&mut self, content: &str) -> Result<u8> {
        match parse_meminfo(content) {
            Ok(info) => self.observe(info),
            Err(e) => {
                self.usage.total_kb = 0;
                Err(e)
            }
        }
    }

    /// 读取 `/proc/meminfo` 并采样
    pub async fn sample(&mut self) -> Reading {
        self.sample_from(PROC_MEMINFO).await
    }

    pub(crate) async fn sample_from(&mut self, path: &str) -> Reading {
        let outcome = match tokio::fs::read_to_string(path).await {
            Ok(content) => self.observe_str(&content),
            Err(e) => {
                self.usage.total_kb = 0;
                Err(StatsError::from(e))
            }
        };

        match outcome {
            Ok(percent) => Reading::Percent(percent),
            Err(e) => settle(path, e),
        }
    }
}
