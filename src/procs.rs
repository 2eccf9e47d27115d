use crate::monitor::MetricKind;
use log::{debug, warn};
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{ChildStdout, Command};

/// 没有捕获到任何输出时显示的占位文本
pub const EMPTY_SNAPSHOT_TEXT: &str = "无法获取进程信息";

/// 默认最多保留的行数
pub const DEFAULT_MAX_LINES: usize = 20;
/// 默认缓冲区容量（字节）
pub const DEFAULT_CAPACITY_BYTES: usize = 4096;
/// 默认的命令执行超时
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// 要执行的进程列表命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ProcessCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl ProcessCommand {
    /// 按指定列降序排列的 `ps` 命令
    pub fn ps_sorted_by(column: &str) -> Self {
        Self::new(
            "ps",
            [
                "-eo".to_string(),
                "pid,user,%cpu,%mem,comm".to_string(),
                format!("--sort=-{column}"),
            ],
        )
    }
}

impl Default for ProcessCommand {
    fn default() -> Self {
        Self::ps_sorted_by("%cpu")
    }
}

impl std::fmt::Display for ProcessCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// 进程快照配置
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    /// CPU 详情页使用的命令
    pub command: ProcessCommand,
    /// 内存详情页使用的命令
    pub memory_command: ProcessCommand,
    pub max_lines: usize,
    pub capacity_bytes: usize,
    pub timeout: Duration,
}

impl Default for SnapshotConfig {
    #[inline]
    fn default() -> Self {
        Self {
            command: ProcessCommand::default(),
            memory_command: ProcessCommand::ps_sorted_by("%mem"),
            max_lines: DEFAULT_MAX_LINES,
            capacity_bytes: DEFAULT_CAPACITY_BYTES,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl SnapshotConfig {
    /// 指定指标的详情页所用的配置，`command` 换成该指标对应的命令
    pub fn for_metric(&self, kind: MetricKind) -> SnapshotConfig {
        let command = match kind {
            MetricKind::Cpu => self.command.clone(),
            MetricKind::Memory => self.memory_command.clone(),
        };
        SnapshotConfig {
            command,
            ..self.clone()
        }
    }
}

/// 有界的整行容器
///
/// 超出行数或字节容量的行整行丢弃，不会在行中间截断。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessListing {
    lines: Vec<String>,
    max_lines: usize,
    capacity_bytes: usize,
    len_bytes: usize,
}

impl ProcessListing {
    pub fn new(max_lines: usize, capacity_bytes: usize) -> Self {
        Self {
            lines: Vec::with_capacity(max_lines.min(64)),
            max_lines,
            capacity_bytes,
            len_bytes: 0,
        }
    }

    /// 追加一整行（包含换行符）；放不下时返回 false，内容保持不变
    pub fn try_push(&mut self, line: String) -> bool {
        if self.is_full() || self.len_bytes + line.len() > self.capacity_bytes {
            return false;
        }
        self.len_bytes += line.len();
        self.lines.push(line);
        true
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.lines.len() >= self.max_lines
    }

    #[inline]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    #[inline]
    pub fn len_bytes(&self) -> usize {
        self.len_bytes
    }

    /// 按原始顺序拼接的文本
    pub fn text(&self) -> String {
        self.lines.concat()
    }
}

/// 一次进程快照的结果
#[derive(Debug)]
pub enum FetchOutcome {
    Captured(ProcessListing),
    TimedOut,
    SpawnFailed(io::Error),
    ReadFailed(io::Error),
}

impl FetchOutcome {
    /// 供显示的文本，永远不为空
    pub fn display_text(&self) -> String {
        match self {
            FetchOutcome::Captured(listing) if listing.len_bytes() >= 2 => listing.text(),
            _ => EMPTY_SNAPSHOT_TEXT.to_string(),
        }
    }

    #[inline]
    pub fn is_captured(&self) -> bool {
        matches!(self, FetchOutcome::Captured(_))
    }
}

/// 执行进程列表命令并捕获前 N 行输出
///
/// 启动、读取与回收子进程的全过程受 `config.timeout` 约束，
/// 超时后子进程随句柄一起被结束。
pub async fn fetch_process_snapshot(config: &SnapshotConfig) -> FetchOutcome {
    let mut child = match Command::new(&config.command.program)
        .args(&config.command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            warn!("无法启动进程列表命令 `{}`: {e}", config.command);
            return FetchOutcome::SpawnFailed(e);
        }
    };

    let Some(stdout) = child.stdout.take() else {
        return FetchOutcome::ReadFailed(io::Error::other("子进程缺少标准输出"));
    };

    // 超时后 future 连同子进程句柄一起被丢弃
    let run = async move {
        let (listing, reached_eof) =
            capture(stdout, config.max_lines, config.capacity_bytes).await?;
        if !reached_eof {
            // 输出被截断，子进程可能仍阻塞在写管道上
            if let Err(e) = child.start_kill() {
                debug!("结束进程列表命令失败（可能已退出）: {e}");
            }
        }
        child.wait().await?;
        Ok::<_, io::Error>(listing)
    };

    match tokio::time::timeout(config.timeout, run).await {
        Ok(Ok(listing)) => {
            debug!(
                "进程快照: {} 行, {} 字节",
                listing.lines().len(),
                listing.len_bytes()
            );
            FetchOutcome::Captured(listing)
        }
        Ok(Err(e)) => {
            warn!("读取进程列表输出失败: {e}");
            FetchOutcome::ReadFailed(e)
        }
        Err(_) => {
            warn!(
                "进程列表命令 `{}` 超过 {:?} 未完成",
                config.command, config.timeout
            );
            FetchOutcome::TimedOut
        }
    }
}

/// 逐行读取输出，返回捕获的内容以及是否读到了结尾
async fn capture(
    stdout: ChildStdout,
    max_lines: usize,
    capacity_bytes: usize,
) -> io::Result<(ProcessListing, bool)> {
    let mut reader = BufReader::new(stdout);
    let mut listing = ProcessListing::new(max_lines, capacity_bytes);
    let mut buf = Vec::with_capacity(256);

    loop {
        if listing.is_full() {
            return Ok((listing, false));
        }
        buf.clear();
        // 每次最多读取剩余容量加一个字节，超长行不会整行进入内存
        let limit = (capacity_bytes - listing.len_bytes() + 1) as u64;
        let read = (&mut reader).take(limit).read_until(b'\n', &mut buf).await?;
        if read == 0 {
            return Ok((listing, true));
        }
        if read as u64 == limit && buf.last() != Some(&b'\n') {
            return Ok((listing, false));
        }
        let line = String::from_utf8_lossy(&buf).into_owned();
        if !listing.try_push(line) {
            return Ok((listing, false));
        }
    }
}
