//! HTTP API (axum).
//!
//! すべての応答は JSON envelope:
//! - 成功: `{"success": true, "data": ...}`
//! - 失敗: `{"success": false, "error": "..."}`
//!
//! Endpoints:
//! - GET    /health                   - liveness + dispatcher の空き（認証なし）
//! - POST   /agents                   - agent 登録
//! - GET    /agents/{id}              - agent（usage_count / rating を含む）
//! - PATCH  /agents/{id}              - 有効 / 無効の切り替え（作成者のみ）
//! - GET    /agents/{id}/reviews      - レビュー一覧（新しい順、page / limit）
//! - POST   /agents/{id}/reviews      - レビュー作成
//! - GET    /agents/{id}/stats        - agent の実行集計（作成者のみ、range / since）
//! - PUT    /reviews/{id}             - レビュー更新（本人のみ）
//! - DELETE /reviews/{id}             - レビュー削除（本人のみ）
//! - POST   /reviews/{id}/response    - 作成者の返信
//! - POST   /executions               - agent 実行
//! - POST   /payments                 - 決済
//! - POST   /payments/{id}/refund     - 返金
//! - POST   /notifications            - 通知
//! - GET    /records                  - 自分の record 一覧
//! - GET    /records/stats            - 自分の集計（range=today|week|month|year, since=RFC 3339）
//! - GET    /records/{id}             - ポーリング
//! - POST   /records/{id}/cancel      - キャンセル

mod auth;
mod catalog;
mod records;
mod response;

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use self::auth::{CurrentActor, ORGANIZATION_HEADER, USER_HEADER};
pub use self::response::{ApiError, Envelope};

use crate::app::{App, Catalog, Dispatcher, Runtime};

/// Shared state of every handler.
#[derive(Clone)]
pub struct ApiState {
    pub runtime: Arc<Runtime>,
    pub catalog: Arc<Catalog>,
    pub dispatcher: Arc<Dispatcher>,
}

impl ApiState {
    pub fn from_app(app: &App) -> Self {
        Self {
            runtime: Arc::clone(&app.runtime),
            catalog: Arc::clone(&app.catalog),
            dispatcher: Arc::clone(app.dispatcher()),
        }
    }
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/agents", post(catalog::register_agent))
        .route(
            "/agents/{id}",
            get(catalog::get_agent).patch(catalog::update_agent),
        )
        .route(
            "/agents/{id}/reviews",
            get(catalog::list_reviews).post(catalog::create_review),
        )
        .route("/agents/{id}/stats", get(catalog::agent_stats))
        .route(
            "/reviews/{id}",
            put(catalog::update_review).delete(catalog::delete_review),
        )
        .route("/reviews/{id}/response", post(catalog::respond_to_review))
        .route("/executions", post(records::create_execution))
        .route("/payments", post(records::create_payment))
        .route("/payments/{id}/refund", post(records::refund_payment))
        .route("/notifications", post(records::send_notification))
        .route("/records", get(records::list_records))
        .route("/records/stats", get(records::record_stats))
        .route("/records/{id}", get(records::get_record))
        .route("/records/{id}/cancel", post(records::cancel_record))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// GET /health
async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    response::ok(json!({
        "status": "ok",
        "queue_available": state.dispatcher.available(),
        "in_flight": state.dispatcher.in_flight(),
    }))
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        axum::Json(json!({"success": false, "error": "not found"})),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{AppBuilder, RuntimeConfig};
    use crate::domain::UserId;
    use crate::impls::SimulationConfig;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;
    use ulid::Ulid;

    struct TestServer {
        app: App,
        router: Router,
    }

    impl TestServer {
        fn start() -> Self {
            let app = AppBuilder::new(RuntimeConfig::default())
                .with_builtin_handlers(SimulationConfig::instant())
                .build()
                .unwrap();
            let router = router(ApiState::from_app(&app));
            Self { app, router }
        }

        async fn call(
            &self,
            method: Method,
            uri: &str,
            user: Option<UserId>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut req = Request::builder().method(method).uri(uri);
            if let Some(user) = user {
                req = req.header(USER_HEADER, user.to_string());
            }
            let req = match body {
                Some(body) => req
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string())),
                None => req.body(Body::empty()),
            }
            .unwrap();

            let resp = self.router.clone().oneshot(req).await.unwrap();
            let status = resp.status();
            let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
                .await
                .unwrap();
            (status, serde_json::from_slice(&bytes).unwrap())
        }

        async fn wait_terminal(&self, user: UserId, id: &str) -> Value {
            for _ in 0..200 {
                let (_, body) = self
                    .call(Method::GET, &format!("/records/{id}"), Some(user), None)
                    .await;
                let status = body["data"]["status"].as_str().unwrap_or_default();
                if matches!(status, "completed" | "failed" | "cancelled") {
                    return body["data"].clone();
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("record {id} never reached a terminal state");
        }

        async fn register_agent(&self, user: UserId, is_public: bool) -> String {
            let (status, body) = self
                .call(
                    Method::POST,
                    "/agents",
                    Some(user),
                    Some(json!({"name": "summarizer", "is_public": is_public})),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);
            body["data"]["id"].as_str().unwrap().to_string()
        }
    }

    fn user() -> UserId {
        UserId::from_ulid(Ulid::new())
    }

    #[tokio::test]
    async fn health_needs_no_identity() {
        let server = TestServer::start();
        let (status, body) = server.call(Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["status"], "ok");
        server.app.shutdown().await;
    }

    #[tokio::test]
    async fn missing_identity_is_401_with_envelope() {
        let server = TestServer::start();
        let (status, body) = server.call(Method::GET, "/records", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
        assert!(body["error"].is_string());
        server.app.shutdown().await;
    }

    #[tokio::test]
    async fn execution_is_created_then_polled_to_completion() {
        let server = TestServer::start();
        let alice = user();
        let agent_id = server.register_agent(alice, false).await;

        let (status, body) = server
            .call(
                Method::POST,
                "/executions",
                Some(alice),
                Some(json!({"agent_id": agent_id, "input": {"x": 1}})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["status"], "running");
        assert_eq!(body["data"]["kind"], "execution");
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let record = server.wait_terminal(alice, &id).await;
        assert_eq!(record["status"], "completed");
        assert_eq!(record["output"]["data"], json!({"x": 1}));

        // usage は終端書き込みの直後に加算されるので少し待つ
        let mut usage = Value::Null;
        for _ in 0..100 {
            let (_, agent) = server
                .call(Method::GET, &format!("/agents/{agent_id}"), Some(alice), None)
                .await;
            usage = agent["data"]["usage_count"].clone();
            if usage == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(usage, 1);

        let (status, _) = server
            .call(Method::GET, &format!("/records/{id}"), Some(user()), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        server.app.shutdown().await;
    }

    #[tokio::test]
    async fn private_agent_cannot_be_run_by_others() {
        let server = TestServer::start();
        let agent_id = server.register_agent(user(), false).await;

        let (status, body) = server
            .call(
                Method::POST,
                "/executions",
                Some(user()),
                Some(json!({"agent_id": agent_id})),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["success"], false);
        server.app.shutdown().await;
    }

    #[tokio::test]
    async fn payment_validation_and_refund_flow() {
        let server = TestServer::start();
        let alice = user();

        let (status, _) = server
            .call(
                Method::POST,
                "/payments",
                Some(alice),
                Some(json!({"provider": "bitcoin", "amount": 10.0})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = server
            .call(
                Method::POST,
                "/payments",
                Some(alice),
                Some(json!({"provider": "stripe", "amount": 25.0, "description": "pro plan"})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["status"], "pending");
        let payment_id = body["data"]["id"].as_str().unwrap().to_string();
        let payment = server.wait_terminal(alice, &payment_id).await;
        assert!(
            payment["output"]["provider_id"]
                .as_str()
                .unwrap()
                .starts_with("pi_")
        );

        let refund_uri = format!("/payments/{payment_id}/refund");
        let (status, _) = server
            .call(Method::POST, &refund_uri, Some(user()), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = server
            .call(
                Method::POST,
                &refund_uri,
                Some(alice),
                Some(json!({"reason": "changed my mind"})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["kind"], "refund");
        assert_eq!(body["data"]["input"]["amount"], -25.0);

        let (status, body) = server
            .call(Method::POST, &refund_uri, Some(alice), None)
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);
        server.app.shutdown().await;
    }

    #[tokio::test]
    async fn cancel_of_terminal_record_conflicts() {
        let server = TestServer::start();
        let alice = user();
        let (_, body) = server
            .call(
                Method::POST,
                "/notifications",
                Some(alice),
                Some(json!({"channel": "in_app", "title": "hi", "message": "there"})),
            )
            .await;
        let id = body["data"]["id"].as_str().unwrap().to_string();
        let done = server.wait_terminal(alice, &id).await;
        assert_eq!(done["status"], "completed");

        let (status, body) = server
            .call(Method::POST, &format!("/records/{id}/cancel"), Some(alice), None)
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);
        server.app.shutdown().await;
    }

    #[tokio::test]
    async fn reviews_drive_agent_rating() {
        let server = TestServer::start();
        let agent_id = server.register_agent(user(), true).await;
        let reviews = format!("/agents/{agent_id}/reviews");
        let bob = user();

        let (status, _) = server
            .call(Method::POST, &reviews, Some(bob), Some(json!({"rating": 7})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = server
            .call(Method::POST, &reviews, Some(bob), Some(json!({"rating": 4})))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let review_id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, _) = server
            .call(Method::POST, &reviews, Some(bob), Some(json!({"rating": 5})))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        server
            .call(Method::POST, &reviews, Some(user()), Some(json!({"rating": 2})))
            .await;
        let (_, agent) = server
            .call(Method::GET, &format!("/agents/{agent_id}"), Some(bob), None)
            .await;
        assert_eq!(agent["data"]["rating"], 3.0);
        assert_eq!(agent["data"]["review_count"], 2);

        let (status, _) = server
            .call(
                Method::DELETE,
                &format!("/reviews/{review_id}"),
                Some(user()),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = server
            .call(Method::DELETE, &format!("/reviews/{review_id}"), Some(bob), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        let (_, agent) = server
            .call(Method::GET, &format!("/agents/{agent_id}"), Some(bob), None)
            .await;
        assert_eq!(agent["data"]["rating"], 2.0);
        assert_eq!(agent["data"]["review_count"], 1);
        server.app.shutdown().await;
    }

    #[tokio::test]
    async fn lists_and_stats_are_scoped_to_the_caller() {
        let server = TestServer::start();
        let alice = user();
        for channel in ["in_app", "email", "sms"] {
            server
                .call(
                    Method::POST,
                    "/notifications",
                    Some(alice),
                    Some(json!({"channel": channel, "title": "t", "message": "m"})),
                )
                .await;
        }
        server
            .call(
                Method::POST,
                "/notifications",
                Some(user()),
                Some(json!({"channel": "in_app", "title": "t", "message": "m"})),
            )
            .await;

        let (status, body) = server
            .call(
                Method::GET,
                "/records?kind=notification&limit=2",
                Some(alice),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["total"], 3);
        assert_eq!(body["data"]["items"].as_array().unwrap().len(), 2);

        let (status, _) = server
            .call(Method::GET, "/records?status=bogus", Some(alice), None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = server
            .call(Method::GET, "/records/stats", Some(alice), None)
            .await;
        assert_eq!(body["data"]["total"], 3);

        let (_, body) = server
            .call(Method::GET, "/records/stats?range=today", Some(alice), None)
            .await;
        assert_eq!(body["data"]["total"], 3);
        let (status, body) = server
            .call(
                Method::GET,
                "/records/stats?since=2999-01-01T00:00:00Z",
                Some(alice),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["total"], 0);
        let (status, _) = server
            .call(Method::GET, "/records/stats?range=decade", Some(alice), None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        server.app.shutdown().await;
    }

    #[tokio::test]
    async fn agent_reviews_page_and_creator_sees_stats() {
        let server = TestServer::start();
        let creator = user();
        let agent_id = server.register_agent(creator, true).await;
        let reviews = format!("/agents/{agent_id}/reviews");

        let mut review_ids = Vec::new();
        for rating in [3, 5] {
            let (_, body) = server
                .call(Method::POST, &reviews, Some(user()), Some(json!({"rating": rating})))
                .await;
            review_ids.push(body["data"]["id"].as_str().unwrap().to_string());
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        let (status, body) = server
            .call(Method::GET, &format!("{reviews}?limit=1"), Some(user()), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["total"], 2);
        assert_eq!(body["data"]["items"][0]["id"], review_ids[1].as_str());

        let respond = format!("/reviews/{}/response", review_ids[0]);
        let (status, _) = server
            .call(Method::POST, &respond, Some(user()), Some(json!({"response": "hi"})))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, body) = server
            .call(Method::POST, &respond, Some(creator), Some(json!({"response": "thanks"})))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["response"], "thanks");

        let (status, _) = server
            .call(
                Method::POST,
                "/executions",
                Some(user()),
                Some(json!({"agent_id": agent_id, "input": {}})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let stats = format!("/agents/{agent_id}/stats");
        let (status, _) = server.call(Method::GET, &stats, Some(user()), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, body) = server.call(Method::GET, &stats, Some(creator), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["total"], 1);
        server.app.shutdown().await;
    }

    #[tokio::test]
    async fn malformed_and_unknown_ids() {
        let server = TestServer::start();
        let alice = user();
        let (status, _) = server
            .call(Method::GET, "/records/not-an-id", Some(alice), None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let missing = crate::domain::RecordId::from_ulid(Ulid::new());
        let (status, body) = server
            .call(Method::GET, &format!("/records/{missing}"), Some(alice), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        server.app.shutdown().await;
    }
}
