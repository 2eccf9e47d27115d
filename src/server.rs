use crate::cache::{CacheRef, DEFAULT_STALE_TTL_SECONDS};
use crate::history::HistorySeries;
use crate::monitor::{DEFAULT_TICK_INTERVAL, DashboardState, MetricKind, MonitorItem};
use crate::procs::{SnapshotConfig, fetch_process_snapshot};
use crate::stats::Reading;
use anyhow::{Context, Result};
use hyper::http::StatusCode;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server};
use log::{error, info, warn};
use std::convert::Infallible;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

/// 曲线图的宽高（SVG 坐标）
const CHART_WIDTH: usize = 380;
const CHART_HEIGHT: usize = 100;

/// 状态服务器
pub struct StatusServer {
    cache: CacheRef,
    snapshot: Arc<SnapshotConfig>,
}

impl StatusServer {
    /// 创建新的状态服务器实例
    #[inline]
    pub fn new(cache: CacheRef, snapshot: SnapshotConfig) -> Self {
        Self {
            cache,
            snapshot: Arc::new(snapshot),
        }
    }

    /// 运行服务器，直到 `shutdown` 完成
    pub async fn run(self, addr: SocketAddr, shutdown: impl Future<Output = ()>) -> Result<()> {
        let Self { cache, snapshot } = self;

        let make_svc = make_service_fn(move |_conn| {
            let cache = cache.clone();
            let snapshot = snapshot.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    Self::handle_request(req, cache.clone(), snapshot.clone())
                }))
            }
        });

        let server = Server::try_bind(&addr)
            .with_context(|| format!("无法绑定地址 {addr}"))?
            .http1_keepalive(true)
            .http1_half_close(false)
            .tcp_keepalive(Some(Duration::from_secs(10)))
            .tcp_nodelay(true)
            .serve(make_svc)
            .with_graceful_shutdown(shutdown);

        info!("服务器运行在: http://{addr}");

        server.await.map_err(|e| {
            error!("服务器错误: {e}");
            anyhow::anyhow!("服务器运行错误: {e}")
        })?;

        Ok(())
    }

    /// 处理 HTTP 请求
    async fn handle_request(
        req: Request<Body>,
        cache: CacheRef,
        snapshot: Arc<SnapshotConfig>,
    ) -> std::result::Result<Response<Body>, Infallible> {
        if *req.method() != Method::GET {
            return Ok(Self::serve_404());
        }

        let path = req.uri().path();
        let response = match path {
            "/" => Self::serve_dashboard(&cache),
            "/health" => Self::serve_health(),
            _ => match path.strip_prefix("/detail/").and_then(MetricKind::from_slug) {
                Some(kind) => Self::serve_detail(&cache, &snapshot, kind).await,
                None => Self::serve_404(),
            },
        };
        Ok(response)
    }

    /// 构造带内容类型的响应
    fn respond(status: StatusCode, content_type: &'static str, body: String) -> Response<Body> {
        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        let headers = response.headers_mut();
        headers.insert(
            hyper::header::CONTENT_TYPE,
            hyper::header::HeaderValue::from_static(content_type),
        );
        headers.insert(
            hyper::header::CACHE_CONTROL,
            hyper::header::HeaderValue::from_static("no-cache"),
        );
        response
    }

    /// 提供健康检查端点
    #[inline]
    fn serve_health() -> Response<Body> {
        Self::respond(StatusCode::OK, "text/plain", "OK".to_string())
    }

    /// 提供 404 页面
    #[inline]
    fn serve_404() -> Response<Body> {
        warn!("请求了不存在的页面");
        Self::respond(
            StatusCode::NOT_FOUND,
            "text/plain; charset=utf-8",
            "页面未找到".to_string(),
        )
    }

    /// 提供错误页面
    #[inline]
    fn serve_error(message: String, status: StatusCode) -> Response<Body> {
        Self::respond(status, "text/plain; charset=utf-8", message)
    }

    /// 提供仪表盘主页
    fn serve_dashboard(cache: &CacheRef) -> Response<Body> {
        let Some(cached) = cache.get() else {
            return Self::serve_error(
                "尚未完成首次采样".to_string(),
                StatusCode::SERVICE_UNAVAILABLE,
            );
        };

        let html = Self::render_dashboard(&cached.state, cached.stale);
        Self::respond(StatusCode::OK, "text/html; charset=utf-8", html)
    }

    /// 提供详情页，只有详情页被访问时才会执行进程快照
    async fn serve_detail(
        cache: &CacheRef,
        snapshot: &SnapshotConfig,
        kind: MetricKind,
    ) -> Response<Body> {
        let Some(cached) = cache.get() else {
            return Self::serve_error(
                "尚未完成首次采样".to_string(),
                StatusCode::SERVICE_UNAVAILABLE,
            );
        };

        let outcome = fetch_process_snapshot(&snapshot.for_metric(kind)).await;
        let html = Self::render_detail(
            cached.state.item(kind),
            &outcome.display_text(),
            cached.stale,
        );
        Self::respond(StatusCode::OK, "text/html; charset=utf-8", html)
    }

    /// 渲染仪表盘模板
    pub fn render_dashboard(state: &DashboardState, stale: bool) -> String {
        let template = include_str!("../templates/index.html");

        let mut result = String::with_capacity(template.len() + 2048);
        result.push_str(template);
        result = result.replace("{status}", status_text(stale));
        result = result.replace("{tick}", &state.tick.to_string());
        result = result.replace("{cpu_percent}", &state.cpu.last_value.to_string());
        result = result.replace("{cpu_note}", reading_note(&state.cpu.last_reading));
        result = result.replace("{cpu_chart}", &render_chart_svg(&state.cpu.history));
        result = result.replace("{memory_percent}", &state.memory.last_value.to_string());
        result = result.replace("{memory_note}", reading_note(&state.memory.last_reading));
        result = result.replace("{memory_chart}", &render_chart_svg(&state.memory.history));
        result = result.replace("{memory_label}", &state.memory_usage.label());

        result
    }

    /// 渲染详情页模板
    pub fn render_detail(item: &MonitorItem, processes: &str, stale: bool) -> String {
        let template = include_str!("../templates/detail.html");

        let mut result = String::with_capacity(template.len() + processes.len() + 1024);
        result.push_str(template);
        result = result.replace("{title}", item.title());
        result = result.replace("{status}", status_text(stale));
        result = result.replace("{value_label}", &item.value_label());
        result = result.replace("{note}", reading_note(&item.last_reading));
        result = result.replace("{chart}", &render_chart_svg(&item.history));
        result = result.replace("{processes}", &escape_html(processes));

        result
    }
}

fn status_text(stale: bool) -> &'static str {
    if stale { "数据已过期" } else { "实时" }
}

/// 非有效读数的说明文字
fn reading_note(reading: &Reading) -> &'static str {
    match reading {
        Reading::Percent(_) => "",
        Reading::WarmingUp => "（预热中）",
        Reading::Failed(_) => "（读取失败）",
    }
}

/// 把滚动序列画成 SVG 折线，最新的点在最右侧
pub fn render_chart_svg(series: &HistorySeries) -> String {
    let slots = series.capacity().max(2) - 1;
    let step = CHART_WIDTH / slots;
    let offset = series.capacity().saturating_sub(series.len());

    let points = series
        .points()
        .enumerate()
        .map(|(i, v)| {
            let x = (offset + i) * step;
            let y = CHART_HEIGHT - usize::from(v.min(100));
            format!("{x},{y}")
        })
        .collect::<Vec<_>>()
        .join(" ");

    format!(
        "<svg viewBox=\"0 0 {CHART_WIDTH} {CHART_HEIGHT}\" width=\"{CHART_WIDTH}\" height=\"{CHART_HEIGHT}\" \
         preserveAspectRatio=\"none\"><polyline fill=\"none\" stroke=\"#e53935\" stroke-width=\"2\" \
         points=\"{points}\"/></svg>"
    )
}

/// 转义 HTML 特殊字符
pub fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// 配置结构
#[derive(Debug, Clone)]
pub struct Config {
    /// 服务端绑定地址
    pub bind_address: String,
    /// 服务端端口
    pub port: u16,
    /// 采样周期
    pub tick_interval: Duration,
    /// 状态过期时间（秒）
    pub stale_ttl_seconds: u64,
    /// 进程快照设置
    pub snapshot: SnapshotConfig,
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self {
            bind_address: "::".to_string(),
            port: 8080,
            tick_interval: DEFAULT_TICK_INTERVAL,
            stale_ttl_seconds: DEFAULT_STALE_TTL_SECONDS,
            snapshot: SnapshotConfig::default(),
        }
    }
}

impl Config {
    /// 构建服务器地址
    pub fn address(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .bind_address
            .parse()
            .with_context(|| format!("无效的绑定地址: {}", self.bind_address))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::create_cache;
    use crate::monitor::Monitor;
    use crate::procs::{EMPTY_SNAPSHOT_TEXT, ProcessCommand};
    use crate::stats::{MemoryInfo, StatsErrorKind};
    use hyper::{Body, Request, StatusCode};

    fn create_test_state(cpu: u8, memory: u8) -> DashboardState {
        let mut monitor = Monitor::new();
        monitor.record(Reading::Percent(cpu), Reading::Percent(memory))
    }

    fn shell_snapshot(script: &str) -> Arc<SnapshotConfig> {
        Arc::new(SnapshotConfig {
            command: ProcessCommand::new("sh", ["-c", script]),
            memory_command: ProcessCommand::new("sh", ["-c", script]),
            ..SnapshotConfig::default()
        })
    }

    async fn get(path: &str, cache: CacheRef, snapshot: Arc<SnapshotConfig>) -> Response<Body> {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        StatusServer::handle_request(request, cache, snapshot)
            .await
            .unwrap()
    }

    async fn body_text(response: Response<Body>) -> String {
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.bind_address, "::");
        assert_eq!(config.port, 8080);
        assert_eq!(config.tick_interval, Duration::from_millis(1000));
        assert_eq!(config.stale_ttl_seconds, 3);
    }

    #[test]
    fn test_config_address() {
        let config = Config::default();
        assert_eq!(config.address().unwrap().to_string(), "[::]:8080");

        let config = Config {
            bind_address: "127.0.0.1".to_string(),
            port: 9000,
            ..Config::default()
        };
        assert_eq!(config.address().unwrap().to_string(), "127.0.0.1:9000");

        let config = Config {
            bind_address: "not-an-ip".to_string(),
            ..Config::default()
        };
        assert!(config.address().is_err());
    }

    #[tokio::test]
    async fn test_serve_health() {
        let response = StatusServer::serve_health();
        assert_eq!(response.status(), StatusCode::OK);

        let headers = response.headers();
        assert_eq!(headers.get("content-type").unwrap(), "text/plain");

        assert_eq!(body_text(response).await, "OK");
    }

    #[tokio::test]
    async fn test_serve_404() {
        let response = StatusServer::serve_404();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/plain; charset=utf-8"
        );
        assert_eq!(body_text(response).await, "页面未找到");
    }

    #[tokio::test]
    async fn test_serve_error() {
        let message = "测试错误".to_string();
        let response =
            StatusServer::serve_error(message.clone(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, message);
    }

    #[test]
    fn test_render_dashboard() {
        let mut monitor = Monitor::new();
        let mut memory = crate::stats::MemorySampler::new();
        memory
            .observe(MemoryInfo {
                total_kb: 2048 * 1024,
                available_kb: 512 * 1024,
            })
            .unwrap();
        let mut state = monitor.record(Reading::Percent(42), Reading::Percent(75));
        state.memory_usage = memory.usage();

        let html = StatusServer::render_dashboard(&state, false);
        assert!(html.contains("CPU Usage"));
        assert!(html.contains("Memory Usage"));
        assert!(html.contains("value=\"42\""));
        assert!(html.contains("42%"));
        assert!(html.contains("75%"));
        assert!(html.contains("1536/2048 MB"));
        assert!(html.contains("/detail/cpu"));
        assert!(html.contains("实时"));
        assert!(html.contains("<polyline"));
        assert!(!html.contains("{cpu_percent}"));
    }

    #[test]
    fn test_render_dashboard_notes() {
        let mut monitor = Monitor::new();
        let state = monitor.record(
            Reading::WarmingUp,
            Reading::Failed(StatsErrorKind::SourceUnavailable),
        );
        let html = StatusServer::render_dashboard(&state, true);
        assert!(html.contains("预热中"));
        assert!(html.contains("读取失败"));
        assert!(html.contains("数据已过期"));
    }

    #[test]
    fn test_render_detail_escapes_processes() {
        let state = create_test_state(55, 10);
        let html = StatusServer::render_detail(&state.cpu, "  1 <init> & co\n", false);
        assert!(html.contains("CPU Usage"));
        assert!(html.contains("55%"));
        assert!(html.contains("  1 &lt;init&gt; &amp; co\n"));
        assert!(html.contains("Time (seconds ago)"));
    }

    #[test]
    fn test_render_chart_svg() {
        let mut series = HistorySeries::new(20);
        series.push(0);
        series.push(100);
        let svg = render_chart_svg(&series);
        // 两个点落在最右侧两个位置
        assert!(svg.contains("points=\"360,100 380,0\""));

        let empty = render_chart_svg(&HistorySeries::new(20));
        assert!(empty.contains("points=\"\""));
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("主机<>&\"'"), "主机&lt;&gt;&amp;&quot;&#39;");
        assert_eq!(escape_html("plain"), "plain");
    }

    #[tokio::test]
    async fn test_handle_request_before_first_tick() {
        let response = get("/", create_cache(10), shell_snapshot("true")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = get("/detail/cpu", create_cache(10), shell_snapshot("true")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_handle_request_root() {
        let cache = create_cache(10);
        cache.publish(create_test_state(80, 30));

        let response = get("/", cache, shell_snapshot("true")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains("80%"));
        assert!(html.contains("30%"));
    }

    #[tokio::test]
    async fn test_handle_request_health() {
        let response = get("/health", create_cache(10), shell_snapshot("true")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "OK");
    }

    #[tokio::test]
    async fn test_handle_request_detail_runs_snapshot() {
        let cache = create_cache(10);
        cache.publish(create_test_state(20, 65));

        let snapshot = shell_snapshot("printf '  PID COMMAND\\n    1 init\\n'");
        let response = get("/detail/memory", cache, snapshot).await;
        assert_eq!(response.status(), StatusCode::OK);

        let html = body_text(response).await;
        assert!(html.contains("Memory Usage"));
        assert!(html.contains("65%"));
        assert!(html.contains("  PID COMMAND\n    1 init\n"));
    }

    #[tokio::test]
    async fn test_detail_pages_use_their_own_command() {
        let cache = create_cache(10);
        cache.publish(create_test_state(20, 65));

        let snapshot = Arc::new(SnapshotConfig {
            command: ProcessCommand::new("sh", ["-c", "echo by-cpu"]),
            memory_command: ProcessCommand::new("sh", ["-c", "echo by-mem"]),
            ..SnapshotConfig::default()
        });

        let html = body_text(get("/detail/cpu", cache.clone(), snapshot.clone()).await).await;
        assert!(html.contains("by-cpu"));
        assert!(!html.contains("by-mem"));

        let html = body_text(get("/detail/memory", cache, snapshot).await).await;
        assert!(html.contains("by-mem"));
        assert!(!html.contains("by-cpu"));
    }

    #[tokio::test]
    async fn test_handle_request_detail_empty_snapshot() {
        let cache = create_cache(10);
        cache.publish(create_test_state(20, 65));

        let response = get("/detail/cpu", cache, shell_snapshot("true")).await;
        let html = body_text(response).await;
        assert!(html.contains(EMPTY_SNAPSHOT_TEXT));
    }

    #[tokio::test]
    async fn test_handle_request_404() {
        let cache = create_cache(10);
        cache.publish(create_test_state(1, 1));

        let response = get("/notfound", cache.clone(), shell_snapshot("true")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = get("/detail/gpu", cache, shell_snapshot("true")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_handle_request_post_method() {
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .body(Body::empty())
            .unwrap();

        let response =
            StatusServer::handle_request(request, create_cache(10), shell_snapshot("true"))
                .await
                .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
