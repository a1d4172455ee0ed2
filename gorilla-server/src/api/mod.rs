//! HTTP API endpoints

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use gorilla_core::storage::Storage;
use gorilla_core::{GorillaError, Point, SeriesKey, Timestamp};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state
pub type AppState = Arc<Storage>;

type ApiResult<T> = Result<T, (StatusCode, Json<ErrorResponse>)>;

/// Create the API router
pub fn create_router(storage: Arc<Storage>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(health))
        .route("/ping", get(ping))

        // Data
        .route("/write", post(write))
        .route("/read", get(read))
        .route("/flush", post(flush))

        // Stats
        .route("/stats", get(stats))
        .route("/metrics", get(metrics))

        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(storage)
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct WriteRequest {
    pub keyspace: String,
    pub series: String,
    pub points: Vec<Point>,
}

#[derive(Debug, Serialize)]
pub struct WriteResponse {
    pub written: usize,
}

#[derive(Debug, Deserialize)]
pub struct ReadParams {
    pub keyspace: String,
    pub series: String,
    pub start: Timestamp,
    pub end: Timestamp,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadResponse {
    pub keyspace: String,
    pub series: String,
    pub points: Vec<Point>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub series_count: usize,
    pub points_written: u64,
    pub points_read: u64,
    pub rotations: u64,
    pub repairs: u64,
    pub series: Vec<SerieStatsResponse>,
}

#[derive(Debug, Serialize)]
pub struct SerieStatsResponse {
    pub keyspace: String,
    pub series: String,
    pub ready: bool,
    pub hot_points: usize,
    pub resident_blocks: usize,
    pub points_added: u64,
    pub repairs: u64,
    pub rotations: u64,
    pub reads: u64,
    pub read_through_blocks: u64,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl ToString) -> (StatusCode, Json<ErrorResponse>) {
    (status, Json(ErrorResponse { error: error.to_string() }))
}

fn status_for(err: &GorillaError) -> StatusCode {
    match err {
        GorillaError::ReadTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        GorillaError::Config(_) | GorillaError::InvalidFormat(_) => StatusCode::BAD_REQUEST,
        e if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn check_key(keyspace: &str, series: &str) -> ApiResult<()> {
    SeriesKey::new(keyspace, series)
        .validate()
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, e))
}

/// Escape a Prometheus label value
fn escape_label(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

/// Run a blocking storage call off the async runtime
async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> gorilla_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(error_response(status_for(&e), e)),
        Err(e) => Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, e)),
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: gorilla_core::VERSION.to_string(),
    })
}

async fn ping() -> &'static str {
    "pong"
}

async fn write(
    State(storage): State<AppState>,
    Json(req): Json<WriteRequest>,
) -> ApiResult<Json<WriteResponse>> {
    check_key(&req.keyspace, &req.series)?;

    let written = blocking(move || storage.write_batch(&req.keyspace, &req.series, &req.points)).await?;
    Ok(Json(WriteResponse { written }))
}

async fn read(
    State(storage): State<AppState>,
    Query(params): Query<ReadParams>,
) -> ApiResult<Json<ReadResponse>> {
    check_key(&params.keyspace, &params.series)?;

    let ReadParams { keyspace, series, start, end } = params;
    let (keyspace, series, points) = blocking(move || {
        let points = storage.read(&keyspace, &series, start, end)?;
        Ok((keyspace, series, points))
    })
    .await?;

    Ok(Json(ReadResponse { keyspace, series, points }))
}

async fn flush(State(storage): State<AppState>) -> ApiResult<StatusCode> {
    blocking(move || storage.flush_all()).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn stats(State(storage): State<AppState>) -> Json<StatsResponse> {
    let stats = storage.stats();
    Json(StatsResponse {
        series_count: stats.series_count,
        points_written: stats.points_written,
        points_read: stats.points_read,
        rotations: stats.rotations,
        repairs: stats.repairs,
        series: stats.series.into_iter().map(|s| SerieStatsResponse {
            keyspace: s.key.keyspace,
            series: s.key.series,
            ready: s.ready,
            hot_points: s.hot_points,
            resident_blocks: s.resident_blocks,
            points_added: s.points_added,
            repairs: s.repairs,
            rotations: s.rotations,
            reads: s.reads,
            read_through_blocks: s.read_through_blocks,
        }).collect(),
    })
}

async fn metrics(State(storage): State<AppState>) -> String {
    let stats = storage.stats();

    // Prometheus format
    let mut output = String::new();
    output.push_str("# HELP gorilla_series_total Number of cached series\n");
    output.push_str("# TYPE gorilla_series_total gauge\n");
    output.push_str(&format!("gorilla_series_total {}\n", stats.series_count));

    output.push_str("# HELP gorilla_points_written_total Points accepted\n");
    output.push_str("# TYPE gorilla_points_written_total counter\n");
    output.push_str(&format!("gorilla_points_written_total {}\n", stats.points_written));

    output.push_str("# HELP gorilla_points_read_total Points returned by reads\n");
    output.push_str("# TYPE gorilla_points_read_total counter\n");
    output.push_str(&format!("gorilla_points_read_total {}\n", stats.points_read));

    output.push_str("# HELP gorilla_rotations_total Hot buckets compressed into blocks\n");
    output.push_str("# TYPE gorilla_rotations_total counter\n");
    output.push_str(&format!("gorilla_rotations_total {}\n", stats.rotations));

    output.push_str("# HELP gorilla_repairs_total Out-of-order points merged into blocks\n");
    output.push_str("# TYPE gorilla_repairs_total counter\n");
    output.push_str(&format!("gorilla_repairs_total {}\n", stats.repairs));

    for s in stats.series {
        output.push_str(&format!(
            "gorilla_serie_hot_points{{keyspace=\"{}\",series=\"{}\"}} {}\n",
            escape_label(&s.key.keyspace),
            escape_label(&s.key.series),
            s.hot_points
        ));
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use gorilla_core::{ManualClock, MemoryPersistence, SerieConfig};
    use std::time::Duration;
    use tower::ServiceExt;

    const T0: i64 = 6000;

    fn test_router() -> Router {
        let config = SerieConfig {
            bucket_width: 60,
            max_blocks: 4,
            retention_timeout: 60,
            read_timeout: Duration::from_secs(5),
            init_retry_delay: Duration::from_millis(10),
        };
        let storage = Storage::new(
            Arc::new(MemoryPersistence::new()),
            config,
            Arc::new(ManualClock::new(T0)),
        )
        .unwrap();
        create_router(Arc::new(storage))
    }

    async fn body_string(body: Body) -> String {
        let bytes = to_bytes(body, usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn write_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/write")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_and_ping() {
        let app = test_router();

        let res = app
            .clone()
            .oneshot(Request::get("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_string(res.into_body()).await, "pong");

        let res = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(body_string(res.into_body()).await.contains("\"status\":\"ok\""));
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let app = test_router();

        let body = r#"{"keyspace":"ks","series":"ts","points":[
            {"timestamp":6001,"value":1.5},
            {"timestamp":6002,"value":2.5}
        ]}"#;
        let res = app.clone().oneshot(write_request(body)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_string(res.into_body()).await, r#"{"written":2}"#);

        let res = app
            .clone()
            .oneshot(
                Request::get("/read?keyspace=ks&series=ts&start=6000&end=6059")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let read: ReadResponse = serde_json::from_str(&body_string(res.into_body()).await).unwrap();
        assert_eq!(read.points, vec![Point::new(6001, 1.5), Point::new(6002, 2.5)]);

        let res = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let metrics = body_string(res.into_body()).await;
        assert!(metrics.contains("gorilla_points_written_total 2"));
        assert!(metrics.contains("gorilla_points_read_total 2"));
    }

    #[tokio::test]
    async fn test_write_rejects_bad_keys() {
        let app = test_router();
        for body in [
            r#"{"keyspace":"","series":"ts","points":[]}"#,
            r#"{"keyspace":"ks","series":"a/b","points":[{"timestamp":6001,"value":1.0}]}"#,
            r#"{"keyspace":"..","series":"ts","points":[]}"#,
        ] {
            let res = app.clone().oneshot(write_request(body)).await.unwrap();
            assert_eq!(res.status(), StatusCode::BAD_REQUEST, "{body}");
        }

        let res = app
            .oneshot(Request::get("/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let stats: serde_json::Value = serde_json::from_str(&body_string(res.into_body()).await).unwrap();
        assert_eq!(stats["series_count"], 0);
    }

    #[tokio::test]
    async fn test_write_rejects_out_of_range_timestamp() {
        let app = test_router();
        let body = r#"{"keyspace":"ks","series":"ts","points":[{"timestamp":9223372036854775807,"value":1.0}]}"#;
        let res = app.oneshot(write_request(body)).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_escape_label() {
        assert_eq!(escape_label("cpu"), "cpu");
        assert_eq!(escape_label("a\"b"), "a\\\"b");
        assert_eq!(escape_label("a\\b"), "a\\\\b");
        assert_eq!(escape_label("line\nbreak"), "line\\nbreak");
    }

    #[tokio::test]
    async fn test_metrics_escapes_labels() {
        let app = test_router();
        let body = r#"{"keyspace":"ks","series":"say \"hi\"\nnow","points":[{"timestamp":6001,"value":1.0}]}"#;
        let res = app.clone().oneshot(write_request(body)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let metrics = body_string(res.into_body()).await;
        assert!(metrics.contains(r#"gorilla_serie_hot_points{keyspace="ks",series="say \"hi\"\nnow"} 1"#));
        assert!(metrics.lines().all(|l| l.starts_with('#') || l.starts_with("gorilla_")));
    }

    #[tokio::test]
    async fn test_flush_and_stats() {
        let app = test_router();

        let body = r#"{"keyspace":"ks","series":"ts","points":[{"timestamp":6010,"value":4.0}]}"#;
        app.clone().oneshot(write_request(body)).await.unwrap();

        let res = app
            .clone()
            .oneshot(Request::post("/flush").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NO_CONTENT);

        let res = app
            .oneshot(Request::get("/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let stats: serde_json::Value = serde_json::from_str(&body_string(res.into_body()).await).unwrap();
        assert_eq!(stats["series_count"], 1);
        assert_eq!(stats["series"][0]["hot_points"], 1);
    }

    #[test]
    fn test_status_mapping() {
        let timeout = GorillaError::ReadTimeout {
            keyspace: "ks".into(),
            series: "ts".into(),
            waited: Duration::from_secs(1),
        };
        assert_eq!(status_for(&timeout), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            status_for(&GorillaError::Persistence("down".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&GorillaError::Compression("bad".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
