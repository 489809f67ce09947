//! Router assembly and server lifecycle.

use std::sync::Arc;

use axum::{extract::State, response::Json, routing::get, Router};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::backend::{Backend, SharedBackend};
use crate::config::Config;
use crate::storage::create_storage;

use super::config as config_api;
use super::creds as creds_api;
use super::leases as leases_api;
use super::roles as roles_api;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub backend: SharedBackend,
    /// Cancelled on shutdown; per-request tokens are children of it
    pub shutdown: CancellationToken,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    storage_persistent: bool,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        storage_persistent: state.backend.storage().is_persistent(),
    })
}

/// Build the router over `state`.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(config_api::routes())
        .merge(roles_api::routes())
        .merge(creds_api::routes())
        .merge(leases_api::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let storage = create_storage(config.storage_type, config.data_dir.clone()).await?;
    tracing::info!(
        storage_type = ?config.storage_type,
        data_dir = %config.data_dir.display(),
        persistent = storage.is_persistent(),
        "Storage initialized"
    );

    let backend = Arc::new(Backend::new(storage, config.backend_options()));
    let shutdown = CancellationToken::new();

    let state = Arc::new(AppState {
        config: config.clone(),
        backend,
        shutdown: shutdown.clone(),
    });

    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.cancel();
        })
        .await?;

    Ok(())
}

/// Wait for SIGTERM/SIGINT.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, cancelling in-flight Grafana Cloud requests");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_support;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_app() -> (Router, Arc<AppState>) {
        let state = Arc::new(AppState {
            config: Config::default(),
            backend: Arc::new(test_support::backend()),
            shutdown: CancellationToken::new(),
        });
        (app(Arc::clone(&state)), state)
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        call_raw(app, method, uri, body.map(|body| body.to_string())).await
    }

    /// Send `body` verbatim as `application/json`, parsed or not.
    async fn call_raw(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<String>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (app, _) = test_app();
        let (status, body) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["storage_persistent"], false);
    }

    #[tokio::test]
    async fn config_lifecycle() {
        let (app, _) = test_app();

        let (status, _) = call(&app, "GET", "/config", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(
            &app,
            "POST",
            "/config",
            Some(json!({"organisation": "acme", "key": "K"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0], "missing url in configuration");

        let (status, _) = call(
            &app,
            "POST",
            "/config",
            Some(json!({"organisation": "acme", "key": "K", "url": "http://x/"})),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        // Second write is an update and may omit mandatory fields.
        let (status, _) = call(&app, "POST", "/config", Some(json!({"user": "1234"}))).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = call(&app, "GET", "/config", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"organisation": "acme", "key": "K", "url": "http://x/", "user": "1234"})
        );

        let (status, _) = call(&app, "DELETE", "/config", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&app, "GET", "/config", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn role_lifecycle() {
        let (app, _) = test_app();

        let (status, body) = call(
            &app,
            "POST",
            "/roles/viewer-role",
            Some(json!({"gc_role": "Viewer", "ttl": "2m", "max_ttl": 3600})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"gc_role": "Viewer", "ttl": 120, "max_ttl": 3600}));

        let (status, body) = call(
            &app,
            "POST",
            "/roles/viewer-role",
            Some(json!({"max_ttl": 60})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0], "ttl cannot be greater than max_ttl");

        let (status, body) = call(
            &app,
            "POST",
            "/roles/bad",
            Some(json!({"gc_role": "Superuser"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["errors"][0].as_str().unwrap().contains("Superuser"));

        let (_, body) = call(&app, "GET", "/roles", None).await;
        assert_eq!(body, json!({"keys": ["viewer-role"]}));

        let (status, body) = call(&app, "GET", "/roles/viewer-role", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ttl"], 120);

        let (status, _) = call(&app, "DELETE", "/roles/viewer-role", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&app, "GET", "/roles/viewer-role", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn issue_renew_revoke() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orgs/acme/api-keys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 7,
                "name": "viewer-role_x",
                "role": "Viewer",
                "token": "glc_secret"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path_regex(r"^/orgs/acme/api-keys/viewer-role_[0-9a-f-]{36}$"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let (app, state) = test_app();
        test_support::configure(&state.backend, &server.uri()).await;
        test_support::add_role(&state.backend, "viewer-role", "Viewer", 120, 3600).await;

        let (status, body) = call(&app, "POST", "/creds/viewer-role", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["token"], "glc_secret");
        assert_eq!(body["data"]["user"], "1234");
        assert_eq!(body["lease"]["secret_type"], "grafana_cloud_key");
        assert_eq!(body["lease"]["ttl"], 120);
        assert_eq!(body["lease"]["max_ttl"], 3600);
        let internal_data = body["lease"]["internal_data"].clone();
        assert_eq!(internal_data["role"], "viewer-role");

        let (status, body) = call(
            &app,
            "POST",
            "/leases",
            Some(json!({"operation": "renew", "internal_data": internal_data})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["lease"], json!({"ttl": 120, "max_ttl": 3600}));

        let (status, _) = call(
            &app,
            "POST",
            "/leases",
            Some(json!({"operation": "revoke", "internal_data": internal_data})),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn creds_for_missing_role_is_404() {
        let (app, state) = test_app();
        test_support::configure(&state.backend, "http://127.0.0.1:1/").await;

        let (status, body) = call(&app, "GET", "/creds/missing-role", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["errors"][0].as_str().unwrap().contains("missing-role"));
    }

    #[tokio::test]
    async fn lease_event_without_metadata_is_400() {
        let (app, _) = test_app();
        let (status, body) = call(
            &app,
            "POST",
            "/leases",
            Some(json!({"operation": "revoke", "internal_data": {"role": "viewer"}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0], "secret is missing name internal data");
    }

    #[tokio::test]
    async fn remote_failures_are_generic_500s() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("upstream exploded"))
            .mount(&server)
            .await;

        let (app, state) = test_app();
        test_support::configure(&state.backend, &server.uri()).await;
        test_support::add_role(&state.backend, "viewer-role", "Viewer", 120, 3600).await;

        let (status, body) = call(&app, "POST", "/creds/viewer-role", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body["errors"][0].as_str().unwrap().contains("exploded"));
    }

    #[tokio::test]
    async fn malformed_bodies_use_error_envelope() {
        let (app, _) = test_app();

        let (status, body) = call_raw(&app, "POST", "/config", Some("not json".to_string())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["errors"][0].is_string());

        let (status, body) = call(
            &app,
            "POST",
            "/roles/viewer-role",
            Some(json!({"gc_role": "Viewer", "ttl": 1.5})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["errors"][0].is_string());

        let (status, body) =
            call(&app, "POST", "/roles/viewer-role", Some(json!({"gc_role": 5}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["errors"][0].is_string());

        let (status, _) = call(&app, "GET", "/roles/viewer-role", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn lease_event_with_damaged_internal_data_is_400() {
        let (app, _) = test_app();

        let (status, body) =
            call(&app, "POST", "/leases", Some(json!({"operation": "renew"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0], "secret is missing role internal data");

        let (status, body) = call(
            &app,
            "POST",
            "/leases",
            Some(json!({"operation": "revoke", "internal_data": {"name": 5}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0], "secret is missing name internal data");
    }

    #[tokio::test]
    async fn invalidate_resets_client_for_config_key() {
        let (app, state) = test_app();
        let cache = state.backend.client_cache();

        let (status, _) = call(&app, "POST", "/invalidate", Some(json!({"key": "roles/x"}))).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(cache.generation(), 0);

        let (status, _) = call(&app, "POST", "/invalidate", Some(json!({"key": "config"}))).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(cache.generation(), 1);

        let (status, body) = call(&app, "POST", "/invalidate", Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["errors"][0].is_string());
    }
}
