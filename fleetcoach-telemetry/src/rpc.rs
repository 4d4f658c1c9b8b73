//! JSON-RPC client for the telemetry platform.

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::{
    Device, ExceptionSearch, LogRecord, RawExceptionEvent, RoadSpeed, Rule, SampleWindow,
    TelemetryClient, TelemetryError, User,
};

const REQUEST_TIMEOUT: StdDuration = StdDuration::from_secs(30);
const INQUIRY_SERVICE: &str = "dna-planet-orchestration";
/// Samples per log-record window; the nearest one is picked afterwards.
const LOG_RECORDS_PER_WINDOW: usize = 5;

#[derive(Clone, Debug)]
pub struct TelemetryCredentials {
    /// Host name (`my.geotab.com`) or a full base URL (`http://127.0.0.1:8080`).
    pub server: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

#[derive(Clone, Debug)]
struct Session {
    server: String,
    credentials: Value,
}

enum Failure {
    InvalidSession,
    Other(TelemetryError),
}

impl From<TelemetryError> for Failure {
    fn from(e: TelemetryError) -> Self {
        Failure::Other(e)
    }
}

#[derive(Deserialize)]
struct Envelope {
    result: Option<Value>,
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    name: String,
}

#[derive(Deserialize)]
struct AuthResult {
    credentials: Value,
    #[serde(default)]
    path: Option<String>,
}

/// Authenticates lazily, caches the session, and re-authenticates once when
/// the platform rejects it.
pub struct HttpTelemetryClient {
    http: reqwest::Client,
    credentials: TelemetryCredentials,
    session: Mutex<Option<Session>>,
}

impl HttpTelemetryClient {
    pub fn new(credentials: TelemetryCredentials) -> Result<Self, TelemetryError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TelemetryError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            credentials,
            session: Mutex::new(None),
        })
    }

    async fn session(&self) -> Result<Session, TelemetryError> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            return Ok(session.clone());
        }
        let session = self.authenticate().await?;
        *guard = Some(session.clone());
        Ok(session)
    }

    async fn authenticate(&self) -> Result<Session, TelemetryError> {
        let c = &self.credentials;
        let params = json!({
            "database": c.database,
            "userName": c.username,
            "password": c.password,
        });
        let raw = match self.post(&c.server, "Authenticate", params).await {
            Ok(v) => v,
            Err(Failure::InvalidSession) => {
                return Err(TelemetryError::Api("authentication rejected".into()))
            }
            Err(Failure::Other(e)) => return Err(e),
        };
        let auth: AuthResult =
            serde_json::from_value(raw).map_err(|e| TelemetryError::Decode(e.to_string()))?;
        // The platform may redirect a database to another host.
        let server = match auth.path.as_deref() {
            Some(path) if !path.is_empty() && path != "ThisServer" => path.to_string(),
            _ => c.server.clone(),
        };
        tracing::info!(%server, database = %c.database, "telemetry session established");
        Ok(Session {
            server,
            credentials: auth.credentials,
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, TelemetryError> {
        let session = self.session().await?;
        let raw = match self
            .post(&session.server, method, with_credentials(params.clone(), &session))
            .await
        {
            Ok(v) => v,
            Err(Failure::InvalidSession) => {
                tracing::info!(method, "telemetry session rejected, re-authenticating");
                *self.session.lock().await = None;
                let session = self.session().await?;
                match self
                    .post(&session.server, method, with_credentials(params, &session))
                    .await
                {
                    Ok(v) => v,
                    Err(Failure::InvalidSession) => {
                        return Err(TelemetryError::Api("session rejected after re-authentication".into()))
                    }
                    Err(Failure::Other(e)) => return Err(e),
                }
            }
            Err(Failure::Other(e)) => return Err(e),
        };
        serde_json::from_value(raw).map_err(|e| TelemetryError::Decode(format!("{method}: {e}")))
    }

    async fn post(&self, server: &str, method: &str, params: Value) -> Result<Value, Failure> {
        let body = json!({ "method": method, "params": params });
        let resp = self
            .http
            .post(endpoint(server))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        if !resp.status().is_success() {
            return Err(TelemetryError::Transport(format!("HTTP status: {}", resp.status())).into());
        }
        let envelope: Envelope = resp
            .json()
            .await
            .map_err(|e| TelemetryError::Decode(e.to_string()))?;
        if let Some(err) = envelope.error {
            if err.errors.iter().any(|d| d.name == "InvalidUserException") {
                return Err(Failure::InvalidSession);
            }
            return Err(TelemetryError::Api(err.message).into());
        }
        Ok(envelope.result.unwrap_or(Value::Null))
    }

    async fn multi_call<T: DeserializeOwned>(
        &self,
        calls: Vec<Value>,
    ) -> Result<Vec<Vec<T>>, TelemetryError> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }
        let results: Vec<Option<Vec<T>>> = self
            .call("ExecuteMultiCall", json!({ "calls": calls }))
            .await?;
        Ok(results.into_iter().map(Option::unwrap_or_default).collect())
    }

    async fn get<T: DeserializeOwned>(&self, type_name: &str) -> Result<Vec<T>, TelemetryError> {
        self.call("Get", json!({ "typeName": type_name })).await
    }
}

fn endpoint(server: &str) -> String {
    if server.starts_with("http://") || server.starts_with("https://") {
        format!("{}/apiv1", server.trim_end_matches('/'))
    } else {
        format!("https://{server}/apiv1")
    }
}

fn transport_error(e: reqwest::Error) -> Failure {
    if e.is_timeout() {
        Failure::Other(TelemetryError::Timeout)
    } else {
        Failure::Other(TelemetryError::Transport(e.to_string()))
    }
}

fn with_credentials(mut params: Value, session: &Session) -> Value {
    if let Value::Object(map) = &mut params {
        map.insert("credentials".into(), session.credentials.clone());
    }
    params
}

fn exception_search(search: &ExceptionSearch) -> Value {
    let mut inner = json!({ "fromDate": search.from });
    if let Some(device_id) = &search.device_id {
        inner["deviceSearch"] = json!({ "id": device_id });
    }
    json!({
        "typeName": "ExceptionEvent",
        "search": inner,
        "resultsLimit": search.limit,
    })
}

fn log_record_call(w: &SampleWindow) -> Value {
    json!({
        "method": "Get",
        "params": {
            "typeName": "LogRecord",
            "search": {
                "deviceSearch": { "id": w.device_id },
                "fromDate": w.from,
                "toDate": w.to,
            },
            "resultsLimit": LOG_RECORDS_PER_WINDOW,
        }
    })
}

fn road_speed_call(w: &SampleWindow) -> Value {
    json!({
        "method": "GetRoadMaxSpeeds",
        "params": {
            "deviceSearch": { "id": w.device_id },
            "fromDate": w.from,
            "toDate": w.to,
        }
    })
}

#[async_trait]
impl TelemetryClient for HttpTelemetryClient {
    async fn exception_events(
        &self,
        search: ExceptionSearch,
    ) -> Result<Vec<RawExceptionEvent>, TelemetryError> {
        self.call("Get", exception_search(&search)).await
    }

    async fn devices(&self) -> Result<Vec<Device>, TelemetryError> {
        self.get("Device").await
    }

    async fn users(&self) -> Result<Vec<User>, TelemetryError> {
        self.get("User").await
    }

    async fn rules(&self) -> Result<Vec<Rule>, TelemetryError> {
        self.get("Rule").await
    }

    async fn log_records(
        &self,
        windows: &[SampleWindow],
    ) -> Result<Vec<Vec<LogRecord>>, TelemetryError> {
        self.multi_call(windows.iter().map(log_record_call).collect())
            .await
    }

    async fn road_max_speeds(
        &self,
        windows: &[SampleWindow],
    ) -> Result<Vec<Vec<RoadSpeed>>, TelemetryError> {
        self.multi_call(windows.iter().map(road_speed_call).collect())
            .await
    }

    async fn ace(&self, function: &str, parameters: Value) -> Result<Value, TelemetryError> {
        self.call(
            "GetAceResults",
            json!({
                "serviceName": INQUIRY_SERVICE,
                "functionName": function,
                "customerData": true,
                "functionParameters": parameters,
            }),
        )
        .await
    }
}
