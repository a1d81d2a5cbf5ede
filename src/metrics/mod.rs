//! Prometheus metrics for the broker failover checker
//!
//! Loop and failover counters, exposed on `/metrics` for Prometheus scraping.

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::OnceLock;

/// Global metrics registry
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Get the global metrics instance
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

/// Failover checker metrics collection
pub struct Metrics {
    /// Registry for all metrics
    pub registry: Registry,

    // Loop metrics
    /// Ticks by outcome (checked, follower, error, panic)
    pub ticks_total: IntCounterVec,
    /// Workers currently holding suspicion state
    pub tracked_workers: IntGauge,

    // Failover metrics
    /// Workers confirmed failed
    pub failovers_total: IntCounter,
    /// Machine registry toggles by target state
    pub machine_toggles_total: IntCounterVec,
    /// Side-effect failures by step
    pub step_errors_total: IntCounterVec,
}

impl Metrics {
    /// Create a new metrics collection
    pub fn new() -> Self {
        let registry = Registry::new();

        let ticks_total = IntCounterVec::new(
            Opts::new("failover_ticks_total", "Total number of check ticks by outcome"),
            &["outcome"],
        )
        .unwrap();

        let tracked_workers = IntGauge::new(
            "failover_tracked_workers",
            "Current number of workers holding suspicion state",
        )
        .unwrap();

        let failovers_total = IntCounter::new(
            "failover_confirmed_total",
            "Total number of workers confirmed failed",
        )
        .unwrap();

        let machine_toggles_total = IntCounterVec::new(
            Opts::new(
                "failover_machine_toggles_total",
                "Total number of machine registry toggles by target state",
            ),
            &["state"], // enabled, disabled
        )
        .unwrap();

        let step_errors_total = IntCounterVec::new(
            Opts::new(
                "failover_step_errors_total",
                "Total number of failed failover side effects by step",
            ),
            &["step"],
        )
        .unwrap();

        registry.register(Box::new(ticks_total.clone())).unwrap();
        registry
            .register(Box::new(tracked_workers.clone()))
            .unwrap();
        registry
            .register(Box::new(failovers_total.clone()))
            .unwrap();
        registry
            .register(Box::new(machine_toggles_total.clone()))
            .unwrap();
        registry
            .register(Box::new(step_errors_total.clone()))
            .unwrap();

        Self {
            registry,
            ticks_total,
            tracked_workers,
            failovers_total,
            machine_toggles_total,
            step_errors_total,
        }
    }

    /// Record the outcome of one tick
    pub fn record_tick(&self, outcome: &str) {
        self.ticks_total.with_label_values(&[outcome]).inc();
    }

    pub fn set_tracked_workers(&self, count: usize) {
        self.tracked_workers.set(count as i64);
    }

    pub fn record_failover(&self) {
        self.failovers_total.inc();
    }

    pub fn record_machine_toggle(&self, state: &str) {
        self.machine_toggles_total.with_label_values(&[state]).inc();
    }

    pub fn record_step_error(&self, step: &str) {
        self.step_errors_total.with_label_values(&[step]).inc();
    }

    /// Get metrics as Prometheus text format
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the response for a scrape request path
///
/// Only `/metrics` is served; anything else is a 404.
fn scrape_response(path: &str) -> (http::StatusCode, String) {
    match path {
        "/metrics" => (http::StatusCode::OK, metrics().gather()),
        _ => (http::StatusCode::NOT_FOUND, String::new()),
    }
}

/// Serve `/metrics` for Prometheus until the listener fails
pub async fn start_metrics_server(addr: &str) -> anyhow::Result<()> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response};
    use hyper_util::rt::TokioIo;
    use std::convert::Infallible;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;
    use tracing::{debug, info};

    async fn scrape(
        req: Request<hyper::body::Incoming>,
    ) -> Result<Response<Full<Bytes>>, Infallible> {
        let (status, body) = scrape_response(req.uri().path());
        let mut response = Response::new(Full::new(Bytes::from(body)));
        *response.status_mut() = status;
        if status.is_success() {
            response.headers_mut().insert(
                http::header::CONTENT_TYPE,
                http::HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
            );
        }
        Ok(response)
    }

    let addr: SocketAddr = addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Serving failover metrics");

    loop {
        let (stream, peer) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(scrape))
                .await
            {
                debug!(peer = %peer, error = %e, "Metrics scrape connection closed with error");
            }
        });
    }
}
