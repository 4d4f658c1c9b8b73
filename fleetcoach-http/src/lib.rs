//! HTTP front for the coaching orchestrator.
//!
//! Authentication happens in front of this service: the authenticating proxy
//! forwards the caller's uid in `x-fleetcoach-uid`. Requests without it are
//! anonymous, which only the ingestion, analytics and speech routes accept.
//! Every other route answers 401 before its path or body is parsed.

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{DefaultBodyLimit, FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use fleetcoach_analytics::FleetAnalytics;
use fleetcoach_core::config::SpeechConfig;
use fleetcoach_core::{
    BeginCoaching, Caller, CoachError, CoachReply, CoachingOrchestrator, DriverTurn, PollSummary,
};
use fleetcoach_types::{
    Action, ActionId, ActionStatus, CoachingSession, Driver, OutcomeKind, SessionId,
    SessionStatus,
};
use serde::{Deserialize, Serialize};
use tower_http::{services::ServeDir, trace::TraceLayer};

pub const CALLER_HEADER: &str = "x-fleetcoach-uid";

/// WebM clips of a few minutes, base64 encoded.
const MAX_AUDIO_BODY: usize = 25 * 1024 * 1024;

#[derive(Clone)]
struct AppState {
    coach: Arc<CoachingOrchestrator>,
}

/// The caller identity forwarded by the proxy. Must precede `Path` and
/// `Json` in a handler's arguments.
struct RequireCaller(Caller);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for RequireCaller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(CALLER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|uid| RequireCaller(Caller::new(uid)))
            .ok_or(ApiError(CoachError::Unauthenticated))
    }
}

struct ApiError(CoachError);

impl From<CoachError> for ApiError {
    fn from(e: CoachError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoachError::Unauthenticated => StatusCode::UNAUTHORIZED,
            CoachError::NotFound(_) => StatusCode::NOT_FOUND,
            CoachError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CoachError::InvalidState(_) => StatusCode::CONFLICT,
            CoachError::UpstreamUnavailable(_) | CoachError::MalformedUpstreamResponse { .. } => {
                StatusCode::BAD_GATEWAY
            }
            CoachError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self.0, "request failed");
        }
        (
            status,
            Json(serde_json::json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Build the router. When `audio` has a path-style public base, stored
/// audio is served from it.
pub fn router(coach: Arc<CoachingOrchestrator>, audio: Option<&SpeechConfig>) -> Router {
    let mut app = Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/sessions", post(begin_coaching))
        .route("/v1/sessions/:id", get(get_session))
        .route("/v1/sessions/:id/turns", post(driver_respond))
        .route("/v1/sessions/:id/end", post(end_session))
        .route(
            "/v1/transcribe",
            post(transcribe).layer(DefaultBodyLimit::max(MAX_AUDIO_BODY)),
        )
        .route("/v1/tts", post(tts_proxy))
        .route("/v1/poll", post(poll_telemetry))
        .route("/v1/analytics", get(fleet_analytics))
        .route("/v1/actions", get(list_actions))
        .route("/v1/actions/:id/resolve", post(resolve_action))
        .route("/v1/drivers", get(drivers))
        .with_state(AppState { coach });

    if let Some(speech) = audio {
        let base = speech.public_base.trim_end_matches('/');
        if base.starts_with('/') && base.len() > 1 {
            app = app.nest_service(base, ServeDir::new(&speech.audio_dir));
        }
    }

    app.layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BeginRequest {
    driver_id: String,
    #[serde(default)]
    driver_name: Option<String>,
    #[serde(default)]
    device_name: Option<String>,
    #[serde(default)]
    fleet_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BeginResponse {
    session_id: SessionId,
    session: CoachingSession,
}

async fn begin_coaching(
    State(state): State<AppState>,
    RequireCaller(caller): RequireCaller,
    Json(req): Json<BeginRequest>,
) -> ApiResult<BeginResponse> {
    let session = state
        .coach
        .begin_session(
            Some(&caller),
            BeginCoaching {
                driver_id: req.driver_id,
                driver_name: req.driver_name,
                device_name: req.device_name,
                fleet_id: req.fleet_id,
            },
        )
        .await?;
    Ok(Json(BeginResponse {
        session_id: session.id,
        session,
    }))
}

async fn get_session(
    State(state): State<AppState>,
    RequireCaller(caller): RequireCaller,
    Path(id): Path<SessionId>,
) -> ApiResult<CoachingSession> {
    Ok(Json(state.coach.session(Some(&caller), id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RespondRequest {
    driver_text: String,
    #[serde(default)]
    driver_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RespondResponse {
    message: String,
    audio_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    video_ref: Option<String>,
    status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    action_id: Option<ActionId>,
}

impl From<CoachReply> for RespondResponse {
    fn from(r: CoachReply) -> Self {
        Self {
            message: r.message,
            audio_ref: r.audio_ref,
            video_ref: r.video_ref,
            status: r.status,
            action_id: r.action_id,
        }
    }
}

async fn driver_respond(
    State(state): State<AppState>,
    RequireCaller(caller): RequireCaller,
    Path(id): Path<SessionId>,
    Json(req): Json<RespondRequest>,
) -> ApiResult<RespondResponse> {
    let reply = state
        .coach
        .continue_session(
            Some(&caller),
            DriverTurn {
                session_id: id,
                driver_text: req.driver_text,
                driver_name: req.driver_name,
            },
        )
        .await?;
    Ok(Json(reply.into()))
}

#[derive(Debug, Deserialize)]
struct EndRequest {
    outcome: OutcomeKind,
}

async fn end_session(
    State(state): State<AppState>,
    RequireCaller(caller): RequireCaller,
    Path(id): Path<SessionId>,
    Json(req): Json<EndRequest>,
) -> ApiResult<CoachingSession> {
    Ok(Json(
        state
            .coach
            .end_session(Some(&caller), id, req.outcome)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
struct TranscribeRequest {
    /// Base64 WebM/Opus.
    audio: String,
    #[serde(default)]
    language: Option<String>,
}

#[derive(Debug, Serialize)]
struct TranscribeResponse {
    transcript: String,
}

async fn transcribe(
    State(state): State<AppState>,
    RequireCaller(caller): RequireCaller,
    Json(req): Json<TranscribeRequest>,
) -> ApiResult<TranscribeResponse> {
    let audio = STANDARD
        .decode(req.audio.trim())
        .map_err(|e| CoachError::InvalidRequest(format!("audio is not base64: {e}")))?;
    let transcript = state
        .coach
        .transcribe(Some(&caller), &audio, req.language.as_deref())
        .await?;
    Ok(Json(TranscribeResponse { transcript }))
}

#[derive(Debug, Deserialize)]
struct TtsRequest {
    text: String,
    #[serde(default)]
    language: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TtsResponse {
    audio_ref: String,
}

async fn tts_proxy(
    State(state): State<AppState>,
    Json(req): Json<TtsRequest>,
) -> ApiResult<TtsResponse> {
    let audio_ref = state
        .coach
        .tts_proxy(&req.text, req.language.as_deref())
        .await?;
    Ok(Json(TtsResponse { audio_ref }))
}

async fn poll_telemetry(State(state): State<AppState>) -> ApiResult<PollSummary> {
    Ok(Json(state.coach.poll_telemetry().await?))
}

async fn fleet_analytics(State(state): State<AppState>) -> Json<FleetAnalytics> {
    Json(state.coach.fleet_analytics().await)
}

#[derive(Debug, Deserialize)]
struct ActionFilter {
    #[serde(default)]
    status: Option<ActionStatus>,
}

async fn list_actions(
    State(state): State<AppState>,
    RequireCaller(caller): RequireCaller,
    Query(filter): Query<ActionFilter>,
) -> ApiResult<Vec<Action>> {
    Ok(Json(
        state
            .coach
            .list_actions(Some(&caller), filter.status)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
struct ResolveRequest {
    resolution: ActionStatus,
}

async fn resolve_action(
    State(state): State<AppState>,
    RequireCaller(caller): RequireCaller,
    Path(id): Path<ActionId>,
    Json(req): Json<ResolveRequest>,
) -> ApiResult<Action> {
    Ok(Json(
        state
            .coach
            .resolve_action(Some(&caller), id, req.resolution)
            .await?,
    ))
}

async fn drivers(
    State(state): State<AppState>,
    RequireCaller(caller): RequireCaller,
) -> ApiResult<Vec<Driver>> {
    Ok(Json(state.coach.drivers(Some(&caller)).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use fleetcoach_analytics::NullAnalytics;
    use fleetcoach_core::{Collaborators, OrchestratorSettings};
    use fleetcoach_narrative::TemplateNarrative;
    use fleetcoach_speech::{FsAudioStore, NullSpeech};
    use fleetcoach_store::MemoryStore;
    use fleetcoach_telemetry::NullTelemetryClient;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    fn app() -> Router {
        let audio_dir = std::env::temp_dir().join("fleetcoach-http-tests");
        let coach = CoachingOrchestrator::new(
            Collaborators {
                store: Arc::new(MemoryStore::new()),
                telemetry: Arc::new(NullTelemetryClient),
                narrative: Arc::new(TemplateNarrative),
                synthesizer: Arc::new(NullSpeech),
                recognizer: Arc::new(NullSpeech),
                audio: Arc::new(FsAudioStore::new(audio_dir, "/audio")),
                analytics: Arc::new(NullAnalytics),
                audit: None,
            },
            OrchestratorSettings::default(),
        );
        router(Arc::new(coach), None)
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        uid: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(uid) = uid {
            req = req.header(CALLER_HEADER, uid);
        }
        let req = match body {
            Some(b) => req
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, value)
    }

    #[tokio::test]
    async fn healthz_answers() {
        let (status, body) = call(&app(), "GET", "/healthz", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!("ok"));
    }

    #[tokio::test]
    async fn coaching_requires_a_caller() {
        let (status, body) = call(
            &app(),
            "POST",
            "/v1/sessions",
            None,
            Some(json!({"driverId": "d1"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "caller is not authenticated");
    }

    #[tokio::test]
    async fn anonymous_request_is_401_before_path_or_body_is_read() {
        let app = app();
        for uri in ["/v1/sessions", "/v1/sessions/not-a-uuid/turns", "/v1/transcribe"] {
            let req = Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from("not json"))
                .unwrap();
            let resp = app.clone().oneshot(req).await.unwrap();
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{uri}");
        }
    }

    #[tokio::test]
    async fn session_round_trip_over_http() {
        let app = app();
        let (status, body) = call(
            &app,
            "POST",
            "/v1/sessions",
            Some("sup-1"),
            Some(json!({"driverId": "d1", "driverName": "Sam Rivera"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let id = body["sessionId"].as_str().unwrap().to_string();
        assert_eq!(body["session"]["status"], "ready");

        let (status, body) = call(
            &app,
            "POST",
            &format!("/v1/sessions/{id}/turns"),
            Some("sup-1"),
            Some(json!({"driverText": "Traffic was heavy."})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "in_progress");
        assert_eq!(body["audioRef"], Value::Null);
        assert!(body.get("actionId").is_none());

        let (status, body) = call(
            &app,
            "POST",
            &format!("/v1/sessions/{id}/end"),
            Some("sup-1"),
            Some(json!({"outcome": "disputed"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "disputed");
        assert_eq!(body["transcript"].as_array().unwrap().len(), 3);

        let (status, _) = call(
            &app,
            "POST",
            &format!("/v1/sessions/{id}/turns"),
            Some("sup-1"),
            Some(json!({"driverText": "wait"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn unknown_session_is_404() {
        let uri = format!("/v1/sessions/{}", Uuid::new_v4());
        let (status, _) = call(&app(), "GET", &uri, Some("sup-1"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_action_is_404() {
        let uri = format!("/v1/actions/{}/resolve", Uuid::new_v4());
        let (status, _) = call(
            &app(),
            "POST",
            &uri,
            Some("sup-1"),
            Some(json!({"resolution": "reviewed"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn tts_validates_then_reports_speech_outage() {
        let app = app();
        let (status, _) = call(&app, "POST", "/v1/tts", None, Some(json!({"text": ""}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = call(&app, "POST", "/v1/tts", None, Some(json!({"text": "Hello"}))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn transcribe_rejects_bad_base64() {
        let (status, _) = call(
            &app(),
            "POST",
            "/v1/transcribe",
            Some("sup-1"),
            Some(json!({"audio": "%%%"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn anonymous_poll_and_analytics() {
        let app = app();
        let (status, body) = call(&app, "POST", "/v1/poll", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"total": 0, "new": 0}));

        let (status, body) = call(&app, "GET", "/v1/analytics", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summary"]["fleet"]["totalTrips"], 0);
    }

    #[tokio::test]
    async fn actions_and_drivers_start_empty() {
        let app = app();
        let (status, body) = call(&app, "GET", "/v1/actions?status=pending", Some("sup-1"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
        let (status, _) = call(&app, "GET", "/v1/drivers", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
