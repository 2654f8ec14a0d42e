//! HTTP surface of the daemon: a single `POST /run` endpoint.
//!
//! Validation failures answer 400 with plain text before any resource is
//! acquired; pipeline failures answer 500; timeouts are normal 200 responses
//! carrying the 124 sentinel. Other methods on the route get 405 from the
//! router.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use ember_core::RunRequest;
use ember_vmm::Executor;
use std::net::SocketAddr;
use std::sync::Arc;

/// Create the application router.
pub fn router(executor: Arc<Executor>) -> Router {
    Router::new().route("/run", post(run)).with_state(executor)
}

/// Bind and serve until ctrl-c.
pub async fn serve(addr: SocketAddr, executor: Arc<Executor>) -> anyhow::Result<()> {
    let app = router(executor);

    tracing::info!("emberd listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Received shutdown signal, stopping server...");
        })
        .await?;

    Ok(())
}

/// POST /run
async fn run(State(executor): State<Arc<Executor>>, body: Bytes) -> Response {
    let request: RunRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(_) => return (StatusCode::BAD_REQUEST, "invalid JSON").into_response(),
    };

    let spec = match request.normalize() {
        Ok(spec) => spec,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    match executor.execute(&spec).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use ember_vmm::VmConfig;
    use http_body_util::BodyExt;
    use std::path::Path;
    use tower::ServiceExt;

    // Validation short-circuits before any resource acquisition, so these
    // tests run without firecracker; the bogus paths would only matter once
    // a VM is actually started.
    fn test_router(data_dir: &Path) -> Router {
        let executor = Executor::new(VmConfig {
            firecracker_bin: "/no/such/firecracker".into(),
            kernel_image: "/no/such/vmlinux".into(),
            rootfs_image: "/no/such/rootfs.ext4".into(),
            data_dir: data_dir.to_path_buf(),
        });
        router(Arc::new(executor))
    }

    async fn post_run(data_dir: &Path, body: &str) -> (StatusCode, String) {
        let response = test_router(data_dir)
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/run")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    #[tokio::test]
    async fn test_invalid_json_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = post_run(dir.path(), "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "invalid JSON");
    }

    #[tokio::test]
    async fn test_empty_cmd_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = post_run(dir.path(), r#"{"cmd": ""}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "cmd is required");
    }

    #[tokio::test]
    async fn test_unsafe_file_name_is_rejected_before_any_vm() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = post_run(
            dir.path(),
            r#"{"cmd": "sh x.sh", "files": {"../../etc/passwd": "oops"}}"#,
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("path traversal"), "body was {body:?}");
        // No per-execution directory was ever created.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_absolute_file_name_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = post_run(
            dir.path(),
            r#"{"cmd": "sh x.sh", "files": {"/etc/passwd": "oops"}}"#,
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("absolute paths"), "body was {body:?}");
    }

    #[tokio::test]
    async fn test_non_post_method_not_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let response = test_router(dir.path())
            .oneshot(
                Request::builder()
                    .method(Method::GET)
                    .uri("/run")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
