//! REST endpoints for onboarding state and its mutators.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::debug;

use super::manager::OnboardingEngine;
use super::state::Step;
use crate::error::OnboardingError;

/// Shared state for onboarding routes.
#[derive(Clone)]
pub struct OnboardingRouteState {
    pub engine: Arc<OnboardingEngine>,
}

#[derive(Debug, Deserialize)]
struct StatusQuery {
    /// Route the caller is rendering; overrides the engine's active route.
    route: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AdvanceRequest {
    step: Step,
}

#[derive(Debug, Deserialize)]
struct ActionsRequest {
    performed: bool,
}

fn error_response(err: OnboardingError) -> Response {
    let status = match err {
        OnboardingError::InvalidTransition { .. } => StatusCode::CONFLICT,
        OnboardingError::Disposed => StatusCode::GONE,
    };
    (status, Json(serde_json::json!({"error": err.to_string()}))).into_response()
}

/// GET /api/onboarding/status
///
/// Returns the current step, status, and whether onboarding should show.
async fn get_status(
    State(state): State<OnboardingRouteState>,
    Query(query): Query<StatusQuery>,
) -> impl IntoResponse {
    let engine = &state.engine;
    let current = match query.route {
        Some(route) => engine
            .subscribe()
            .borrow()
            .for_route(&route, engine.getting_started_path()),
        None => engine.state(),
    };
    Json(current)
}

/// POST /api/onboarding/step
async fn advance_step(
    State(state): State<OnboardingRouteState>,
    Json(req): Json<AdvanceRequest>,
) -> Response {
    debug!(step = %req.step, "Advance step requested");
    match state.engine.advance_step(req.step) {
        Ok(_) => (StatusCode::OK, Json(state.engine.state())).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/onboarding/actions
async fn set_actions(
    State(state): State<OnboardingRouteState>,
    Json(req): Json<ActionsRequest>,
) -> Response {
    match state.engine.set_aux_action(req.performed) {
        Ok(()) => (StatusCode::OK, Json(state.engine.state())).into_response(),
        Err(e) => error_response(e),
    }
}

/// Build the onboarding REST routes.
pub fn onboarding_routes(state: OnboardingRouteState) -> Router {
    Router::new()
        .route("/api/onboarding/status", get(get_status))
        .route("/api/onboarding/step", post(advance_step))
        .route("/api/onboarding/actions", post(set_actions))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use rust_decimal_macros::dec;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::channels::{LedgerChannels, LocalLedger};
    use crate::config::OnboardingConfig;
    use crate::onboarding::model::Identity;
    use crate::onboarding::state::StepStatus;
    use crate::store::{CompletionStore, MemoryCompletionStore};

    async fn setup() -> (Router, Arc<OnboardingEngine>, Arc<LocalLedger>) {
        let ledger = LocalLedger::new();
        let store: Arc<dyn CompletionStore> = Arc::new(MemoryCompletionStore::new());
        let engine = Arc::new(OnboardingEngine::new(
            OnboardingConfig::default(),
            Arc::clone(&ledger) as Arc<dyn LedgerChannels>,
            store,
        ));
        let app = onboarding_routes(OnboardingRouteState {
            engine: Arc::clone(&engine),
        });
        (app, engine, ledger)
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn status_reports_logged_out() {
        let (app, engine, _ledger) = setup().await;
        engine.start(Identity::logged_out()).await;

        let response = app
            .oneshot(Request::get("/api/onboarding/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["current_step"], "logged_out");
        assert_eq!(json["show_onboarding"], true);
        assert_eq!(json["aux_actions_performed"], false);
    }

    #[tokio::test]
    async fn status_applies_route_override() {
        let (app, engine, ledger) = setup().await;
        ledger.set_balance("X", dec!(0), None).await;
        engine.start(Identity::logged_in("X")).await;
        let mut rx = engine.subscribe();
        rx.wait_for(|s| s.status == StepStatus::Resolved).await.unwrap();

        let response = app
            .oneshot(
                Request::get("/api/onboarding/status?route=/get-started")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["current_step"], "has_no_tokens");
        assert_eq!(json["show_onboarding"], false);
    }

    #[tokio::test]
    async fn advance_step_conflict_on_skip() {
        let (app, engine, _ledger) = setup().await;
        engine.start(Identity::logged_out()).await;

        let response = app
            .clone()
            .oneshot(post_json("/api/onboarding/step", serde_json::json!({"step": "done"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app
            .oneshot(post_json(
                "/api/onboarding/step",
                serde_json::json!({"step": "has_no_tokens"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["current_step"], "has_no_tokens");
    }

    #[tokio::test]
    async fn actions_flag_round_trips() {
        let (app, engine, _ledger) = setup().await;
        engine.start(Identity::logged_out()).await;

        let response = app
            .oneshot(post_json(
                "/api/onboarding/actions",
                serde_json::json!({"performed": true}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["aux_actions_performed"], true);
        assert!(engine.state().aux_actions_performed);
    }

    #[tokio::test]
    async fn disposed_engine_is_gone() {
        let (app, engine, _ledger) = setup().await;
        engine.start(Identity::logged_out()).await;
        engine.dispose();

        let response = app
            .oneshot(post_json(
                "/api/onboarding/actions",
                serde_json::json!({"performed": true}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::GONE);
    }
}
