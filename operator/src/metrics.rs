use hyper::{
    header::CONTENT_TYPE,
    service::{make_service_fn, service_fn},
    Body, Request, Response, Server,
};
use lazy_static::lazy_static;
use prometheus::{
    labels, opts, register_counter, register_counter_vec, register_gauge_vec, register_histogram_vec,
};
use prometheus::{Counter, Encoder, GaugeVec, HistogramVec, TextEncoder};

use crate::util::metrics::prefix;

lazy_static! {
    /// Request duration per method and resource type, as named in spec §6.
    pub static ref REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        format!("{}_request_duration_seconds", prefix()),
        "Duration of Kubernetes API requests issued by the operator.",
        &["method", "kind"]
    )
    .unwrap();

    /// Counts exceptions raised out of any reconcile handler.
    pub static ref HANDLER_EXCEPTION_COUNTER: prometheus::CounterVec = register_counter_vec!(
        format!("{}_handler_exception_counter", prefix()),
        "Number of exceptions raised by reconcile handlers.",
        &["kind"]
    )
    .unwrap();

    /// Pool gauges, named exactly as spec §6 lists them.
    pub static ref POOL_MIN_AVAILABLE: GaugeVec = register_gauge_vec!(
        format!("{}_pool_min_available", prefix()),
        "Configured minAvailable for a ResourcePool.",
        &["name", "namespace"]
    )
    .unwrap();
    pub static ref POOL_AVAILABLE: GaugeVec = register_gauge_vec!(
        format!("{}_pool_available", prefix()),
        "Current count of unbound, healthy handles for a ResourcePool.",
        &["name", "namespace"]
    )
    .unwrap();
    pub static ref POOL_USED_TOTAL: prometheus::CounterVec = register_counter_vec!(
        format!("{}_pool_used_total", prefix()),
        "Total handles drawn from a ResourcePool over its lifetime.",
        &["name", "namespace"]
    )
    .unwrap();
    pub static ref POOL_STATE: GaugeVec = register_gauge_vec!(
        format!("{}_pool_state", prefix()),
        "1 for the pool's current aggregate state, labeled by state name.",
        &["name", "namespace", "state"]
    )
    .unwrap();

    static ref HTTP_COUNTER: Counter = register_counter!(opts!(
        format!("{}_http_requests_total", prefix()),
        "Number of HTTP requests made to the metrics server.",
        labels! {"handler" => "all",}
    ))
    .unwrap();
    static ref HTTP_REQ_HISTOGRAM: HistogramVec = register_histogram_vec!(
        format!("{}_http_request_duration_seconds", prefix()),
        "Metrics server HTTP request latencies in seconds.",
        &["handler"]
    )
    .unwrap();
}

async fn serve_req(_req: Request<Body>) -> Result<Response<Body>, hyper::Error> {
    let encoder = TextEncoder::new();
    HTTP_COUNTER.inc();
    let timer = HTTP_REQ_HISTOGRAM.with_label_values(&["all"]).start_timer();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer).unwrap();
    let response = Response::builder()
        .status(200)
        .header(CONTENT_TYPE, encoder.format_type())
        .body(Body::from(buffer))
        .unwrap();
    timer.observe_duration();
    Ok(response)
}

/// Runs the prometheus metrics server on the given port, per `$METRICS_PORT`.
pub async fn run_server(port: u16) {
    let addr = ([0, 0, 0, 0], port).into();
    tracing::info!(%addr, "metrics server listening");

    let serve_future = Server::bind(&addr).serve(make_service_fn(|_| async {
        Ok::<_, hyper::Error>(service_fn(serve_req))
    }));

    if let Err(err) = serve_future.await {
        panic!("metrics server error: {}", err);
    }

    panic!("metrics server exited");
}
