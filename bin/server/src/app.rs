//! Router assembly.

use crate::auth::{auth_middleware, AppState};
use crate::routes::{endpoints, health, runs, triggers, webhooks};
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::{middleware, Router};
use tower_http::trace::TraceLayer;

/// Maximum accepted request body, webhook payloads included.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Builds the control-plane router for one listener.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/health", get(health::health))
        .route("/v1/version", get(health::version))
        .route("/metrics", get(health::metrics))
        .route("/v1/trigger/{workflow}", post(runs::trigger_workflow))
        .route("/v1/runs", get(runs::list_runs))
        .route("/v1/runs/{id}", get(runs::get_run))
        .route("/v1/runs/{id}/cancel", post(runs::cancel_run))
        .route("/webhooks/{*rest}", post(webhooks::handle_webhook))
        .route("/v1/endpoints/{name}", post(endpoints::invoke_endpoint))
        .route("/v1/triggers", get(triggers::list_triggers))
        .route("/v1/triggers/{name}", post(endpoints::invoke_endpoint))
        .route("/v1/triggers/webhooks", post(triggers::create_webhook))
        .route(
            "/v1/triggers/webhooks/{*path}",
            delete(triggers::delete_webhook),
        )
        .route("/v1/triggers/schedules", post(triggers::create_schedule))
        .route(
            "/v1/triggers/schedules/{name}",
            delete(triggers::delete_schedule),
        )
        .route("/v1/triggers/endpoints", post(triggers::create_endpoint))
        .route(
            "/v1/triggers/endpoints/{name}",
            delete(triggers::delete_endpoint),
        )
        .route(
            "/v1/triggers/file-watchers",
            post(triggers::create_file_watch),
        )
        .route(
            "/v1/triggers/file-watchers/{name}",
            delete(triggers::delete_file_watch),
        )
        .route(
            "/v1/triggers/poll",
            get(triggers::poll_status).post(triggers::create_poll_trigger),
        )
        .route(
            "/v1/triggers/poll/{id}",
            delete(triggers::delete_poll_trigger),
        )
        .route(
            "/v1/triggers/poll/{id}/reset",
            post(triggers::reset_poll_trigger),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Backend, Config};
    use crate::controller::Controller;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use conductor_auth::ApiKey;
    use conductor_trigger::signature::hmac_sha256_hex;
    use serde_json::{json, Value as JsonValue};
    use std::sync::Arc;
    use tower::ServiceExt;

    struct TestServer {
        router: Router,
        controller: Arc<Controller>,
        _workflows: tempfile::TempDir,
    }

    async fn test_server(mutate: impl FnOnce(&mut Config)) -> TestServer {
        let workflows = tempfile::tempdir().unwrap();
        for name in ["ci.yaml", "deploy.yaml", "nightly.yaml"] {
            std::fs::write(workflows.path().join(name), b"steps: []").unwrap();
        }

        let mut config = Config::default();
        config.controller.backend = Backend::Memory;
        config.controller.workflows_dir = workflows.path().to_path_buf();
        mutate(&mut config);
        config.validate().unwrap();

        let controller = Controller::build(config).await.unwrap();
        let router = build_router(AppState {
            controller: Arc::clone(&controller),
            local: false,
        });
        TestServer {
            router,
            controller,
            _workflows: workflows,
        }
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, JsonValue) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            JsonValue::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null)
        };
        (status, body)
    }

    fn post_json(uri: &str, body: JsonValue) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_is_open_and_reports_state() {
        let server = test_server(|_| {}).await;
        let (status, body) = send(&server.router, Request::get("/v1/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["draining"], false);
    }

    #[tokio::test]
    async fn version_reports_package_version() {
        let server = test_server(|_| {}).await;
        let (status, body) =
            send(&server.router, Request::get("/v1/version").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn trigger_submits_and_run_is_fetchable() {
        let server = test_server(|_| {}).await;

        let (status, body) = send(
            &server.router,
            post_json("/v1/trigger/ci.yaml", json!({"pr": 42})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["workflow"], "ci.yaml");
        assert_eq!(body["status"], "pending");
        let run_id = body["run_id"].as_str().unwrap().to_string();

        // The submitted record is fetchable with inputs preserved
        let (status, body) = send(
            &server.router,
            Request::get(format!("/v1/runs/{run_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"].as_str().unwrap(), run_id.trim_start_matches("run_"));
        assert_eq!(body["inputs"]["pr"], 42);
    }

    #[tokio::test]
    async fn unknown_workflow_is_404() {
        let server = test_server(|_| {}).await;
        let (status, body) = send(
            &server.router,
            post_json("/v1/trigger/missing.yaml", json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("missing.yaml"));
    }

    #[tokio::test]
    async fn unknown_run_is_404() {
        let server = test_server(|_| {}).await;
        let (status, _) = send(
            &server.router,
            Request::get("/v1/runs/run_01J00000000000000000000000")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &server.router,
            Request::post("/v1/runs/not-an-id/cancel")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn draining_rejects_submissions_with_retry_after() {
        let server = test_server(|_| {}).await;
        server.controller.runner.start_draining();

        let response = server
            .router
            .clone()
            .oneshot(post_json("/v1/trigger/ci.yaml", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            "10"
        );
    }

    #[tokio::test]
    async fn auth_enforced_when_enabled() {
        let server = test_server(|config| {
            config.auth.enabled = true;
            config.auth.api_keys = vec![ApiKey {
                key: "secret-key".to_string(),
                name: "ci".to_string(),
                scopes: Vec::new(),
                expires_at: None,
            }];
        })
        .await;

        // Missing credential
        let (status, _) = send(
            &server.router,
            post_json("/v1/trigger/ci.yaml", json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        // Wrong credential
        let (status, _) = send(
            &server.router,
            Request::post("/v1/trigger/ci.yaml")
                .header(header::AUTHORIZATION, "Bearer wrong")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        // Bearer works
        let (status, _) = send(
            &server.router,
            Request::post("/v1/trigger/ci.yaml")
                .header(header::AUTHORIZATION, "Bearer secret-key")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        // X-API-Key works
        let (status, _) = send(
            &server.router,
            Request::post("/v1/trigger/ci.yaml")
                .header("x-api-key", "secret-key")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        // Health stays open
        let (status, _) = send(
            &server.router,
            Request::get("/v1/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn api_key_query_parameter_is_rejected() {
        let server = test_server(|config| {
            config.auth.enabled = true;
            config.auth.api_keys = vec![ApiKey {
                key: "secret-key".to_string(),
                name: "ci".to_string(),
                scopes: Vec::new(),
                expires_at: None,
            }];
        })
        .await;

        let (status, body) = send(
            &server.router,
            Request::get("/v1/runs?api_key=secret-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].as_str().unwrap().contains("query parameter"));
    }

    #[tokio::test]
    async fn github_webhook_signature_flow() {
        std::env::set_var("APP_TEST_HOOK_SECRET", "test-secret");
        let server = test_server(|config| {
            config.webhooks = vec![conductor_trigger::WebhookRoute {
                path: "/webhooks/github".to_string(),
                source: conductor_trigger::WebhookSource::Github,
                workflow: "ci.yaml".to_string(),
                events: Vec::new(),
                secret: Some("${APP_TEST_HOOK_SECRET}".to_string()),
                input_map: std::collections::HashMap::new(),
            }];
        })
        .await;

        let body = br#"{"action":"opened"}"#;
        let signature = format!("sha256={}", hmac_sha256_hex("test-secret", body));

        let (status, response) = send(
            &server.router,
            Request::post("/webhooks/github")
                .header("X-Hub-Signature-256", &signature)
                .header("X-GitHub-Event", "pull_request")
                .body(Body::from(body.as_slice()))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(response["run_id"].as_str().is_some());

        // Flip the last hex character: 401
        let mut tampered = signature.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == '0' { '1' } else { '0' });
        let (status, _) = send(
            &server.router,
            Request::post("/webhooks/github")
                .header("X-Hub-Signature-256", &tampered)
                .body(Body::from(body.as_slice()))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn catch_all_webhook_submits_named_workflow() {
        let server = test_server(|_| {}).await;
        let (status, body) = send(
            &server.router,
            post_json("/webhooks/generic/ci.yaml", json!({"event": "ping"})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["workflow"], "ci.yaml");
    }

    #[tokio::test]
    async fn endpoint_invocation_merges_inputs_and_rate_limits() {
        let server = test_server(|config| {
            config.endpoints = vec![conductor_trigger::Endpoint {
                name: "deploy".to_string(),
                workflow: "deploy.yaml".to_string(),
                inputs: [("env".to_string(), json!("staging"))].into_iter().collect(),
                scopes: Vec::new(),
                rate_limit: Some("2/minute".to_string()),
                timeout_secs: None,
                public: false,
            }];
        })
        .await;

        for _ in 0..2 {
            let (status, _) = send(
                &server.router,
                post_json("/v1/endpoints/deploy", json!({"version": "1.2.3"})),
            )
            .await;
            assert_eq!(status, StatusCode::ACCEPTED);
        }

        let response = server
            .router
            .clone()
            .oneshot(post_json("/v1/endpoints/deploy", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key(header::RETRY_AFTER));
    }

    #[tokio::test]
    async fn endpoint_alias_under_triggers_path() {
        let server = test_server(|config| {
            config.endpoints = vec![conductor_trigger::Endpoint {
                name: "deploy".to_string(),
                workflow: "deploy.yaml".to_string(),
                inputs: std::collections::HashMap::new(),
                scopes: Vec::new(),
                rate_limit: None,
                timeout_secs: None,
                public: false,
            }];
        })
        .await;

        let (status, _) = send(&server.router, post_json("/v1/triggers/deploy", json!({}))).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (status, _) = send(&server.router, post_json("/v1/triggers/unknown", json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn trigger_crud_roundtrip() {
        let server = test_server(|_| {}).await;

        // Create
        let (status, body) = send(
            &server.router,
            post_json(
                "/v1/triggers/schedules",
                json!({"name": "nightly", "cron": "0 0 * * *", "workflow": "nightly.yaml"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["id"], "nightly");

        // Duplicate is a conflict
        let (status, _) = send(
            &server.router,
            post_json(
                "/v1/triggers/schedules",
                json!({"name": "nightly", "cron": "0 0 * * *", "workflow": "nightly.yaml"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        // Listed
        let (status, body) = send(
            &server.router,
            Request::get("/v1/triggers?type=schedule")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["schedules"][0]["name"], "nightly");

        // Removed, then absent
        let (status, _) = send(
            &server.router,
            Request::delete("/v1/triggers/schedules/nightly")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = send(
            &server.router,
            Request::get("/v1/triggers?type=schedule")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["schedules"].as_array().unwrap().len(), 0);

        // Deleting again is a 404
        let (status, _) = send(
            &server.router,
            Request::delete("/v1/triggers/schedules/nightly")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_cron_in_crud_is_400() {
        let server = test_server(|_| {}).await;
        let (status, _) = send(
            &server.router,
            post_json(
                "/v1/triggers/schedules",
                json!({"name": "broken", "cron": "61 * * * *", "workflow": "nightly.yaml"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_triggers_accepts_poll_type() {
        let server = test_server(|_| {}).await;
        let (status, body) = send(
            &server.router,
            Request::get("/v1/triggers?type=poll")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.get("poll").is_some());

        let (status, _) = send(
            &server.router,
            Request::get("/v1/triggers?type=bogus")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn metrics_render_in_text_format() {
        let server = test_server(|_| {}).await;

        // Drive one run through so counters exist
        let (status, _) = send(&server.router, post_json("/v1/trigger/ci.yaml", json!({}))).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let response = server
            .router
            .clone()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("conductor_active_runs"));
    }
}
