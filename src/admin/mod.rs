//! Operational HTTP surface.
//!
//! # Routes
//! - `GET /health`: aggregate verdict, 503 when unhealthy
//! - `GET /metrics`: cache, breaker and pool snapshot as JSON
//! - `GET /admin/status`: version, uptime and registries
//! - `POST /admin/breakers/reset[?name=]`: force breakers closed

pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::gateway::ResilientClient;
use self::handlers::*;

#[allow(deprecated)]
pub fn admin_router(client: Arc<ResilientClient>, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/metrics", get(get_metrics))
        .route("/admin/status", get(get_status))
        .route("/admin/breakers/reset", post(reset_breakers))
        .with_state(client)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
}

/// Serve the admin router until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> std::io::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Admin server starting");
    axum::serve(listener, router).with_graceful_shutdown(shutdown).await?;
    tracing::info!("Admin server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::GuardConfig;
    use crate::pool::transport::HttpConnector;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn router() -> (Arc<ResilientClient>, Router) {
        let config = GuardConfig::default();
        let client = Arc::new(ResilientClient::new(
            &config,
            Arc::new(HttpConnector::new(&config.pool)),
            None,
        ));
        (client.clone(), admin_router(client, Duration::from_secs(5)))
    }

    async fn body_json(res: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(res.into_body(), 1024 * 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_verdict() {
        let (client, app) = router();
        let res = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await["status"], "healthy");

        let breaker = client.breakers().breaker("claude");
        for _ in 0..5 {
            breaker.record_failure();
        }
        let res = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(res).await["status"], "unhealthy");
    }

    #[tokio::test]
    async fn test_reset_breakers() {
        let (client, app) = router();
        let breaker = client.breakers().breaker("claude");
        for _ in 0..5 {
            breaker.record_failure();
        }

        let res = app
            .clone()
            .oneshot(
                Request::post("/admin/breakers/reset?name=missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = app
            .oneshot(Request::post("/admin/breakers/reset").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await["reset"], "all");
        assert!(client.breakers().health_status().healthy);
    }

    #[tokio::test]
    async fn test_metrics_and_status() {
        let (_client, app) = router();
        let res = app
            .clone()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let json = body_json(res).await;
        assert_eq!(json["cache"]["hits"], 0);
        assert_eq!(json["pool"]["total_requests"], 0);

        let res = app
            .oneshot(Request::get("/admin/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(res).await;
        assert_eq!(json["status"], "operational");
        assert!(json["retry_policies"].as_array().unwrap().len() >= 5);
    }
}
