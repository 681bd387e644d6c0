use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use kurator_engine::{PipelineError, ProcessConfig, RunDispatcher, RunRequest, RunSummary};

/// Build the HTTP router. `GET /` and `GET /run` both trigger a run and
/// block until it finishes.
pub fn router(dispatcher: Arc<RunDispatcher>) -> Router {
    Router::new()
        .route("/", get(trigger_run))
        .route("/run", get(trigger_run))
        .with_state(dispatcher)
}

async fn trigger_run(
    State(dispatcher): State<Arc<RunDispatcher>>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, String) {
    let request = RunRequest::from_query(&params);
    respond(dispatcher.dispatch(&request).await)
}

fn respond(result: Result<RunSummary, PipelineError>) -> (StatusCode, String) {
    match result {
        Ok(summary) => (StatusCode::OK, summary.status_line()),
        Err(PipelineError::RunFailed(summary)) => (StatusCode::OK, summary.status_line()),
        Err(PipelineError::Configuration(msg)) => {
            tracing::warn!("Rejected run request: {msg}");
            (StatusCode::BAD_REQUEST, format!("bad request: {msg}"))
        }
        Err(e) => {
            tracing::error!("Run could not start: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Execute the `serve` command: listen for run requests until interrupted.
pub async fn execute(process: ProcessConfig) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], process.port));
    let dispatcher = Arc::new(RunDispatcher::new(process));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(%addr, output = %dispatcher.process().output, "Listening for run requests");

    axum::serve(listener, router(dispatcher))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use kurator_engine::config::SourceConfig;
    use std::io::Write;
    use tower::ServiceExt;

    fn app(records: &tempfile::NamedTempFile, output: &str) -> Router {
        let process = ProcessConfig {
            output: output.to_string(),
            source: SourceConfig::JsonLines {
                path: records.path().to_path_buf(),
            },
            ..ProcessConfig::default()
        };
        router(Arc::new(RunDispatcher::new(process)))
    }

    fn records() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for id in ["a", "b", "c"] {
            writeln!(
                file,
                r#"{{"id":"{id}","scientificName":"Acer rubrum","basisOfRecord":"PreservedSpecimen"}}"#
            )
            .unwrap();
        }
        file
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_run_returns_summary() {
        let records = records();
        let (status, body) = get(
            app(&records, ":memory:"),
            "/run?limit=2&rq=%7B%7D&authority=GLOBALNAMES&workflow=default&tax=false",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("completed"), "{body}");
        assert!(body.contains("2 passed"), "{body}");
    }

    #[tokio::test]
    async fn test_root_path_also_triggers_run() {
        let records = records();
        let (status, body) = get(
            app(&records, ":memory:"),
            "/?authority=IPNI&tax=TRUE",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("3 passed"), "{body}");
    }

    #[tokio::test]
    async fn test_missing_tax_is_bad_request() {
        let records = records();
        let (status, body) = get(app(&records, ":memory:"), "/run?authority=IPNI").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("tax"));
    }

    #[tokio::test]
    async fn test_unparseable_tax_is_bad_request() {
        let records = records();
        let (status, _) = get(
            app(&records, ":memory:"),
            "/run?authority=IPNI&tax=maybe",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unusable_output_is_server_error() {
        let records = records();
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().display().to_string();
        let (status, body) = get(
            app(&records, &output),
            "/run?authority=IPNI&tax=false",
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.contains("chain construction failed"), "{body}");
    }

    #[test]
    fn test_failed_run_is_still_ok() {
        use kurator_engine::FailureReason;
        use kurator_types::{RunId, RunStats, RunStatus};

        let summary = RunSummary {
            run_id: RunId::new("r"),
            status: RunStatus::Failed,
            stats: RunStats::default(),
            failure: Some(FailureReason::SourceFailed("timeout".into())),
            elapsed: std::time::Duration::from_millis(3),
            peak_in_flight: 0,
            trails: Vec::new(),
        };
        let (status, body) = respond(Err(PipelineError::RunFailed(Box::new(summary))));
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("source failed: timeout"));
    }
}
