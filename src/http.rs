//! HTTP/JSON control surface and websocket event stream (§6 "Wire/control
//! surface"), built on the same web stack (`axum` + `tower-http`) used
//! elsewhere in this ecosystem for a thin JSON surface over per-device
//! resources. Not the core's responsibility (§1), but the core must be
//! callable to satisfy it.

use crate::errors::CommandError;
use crate::registry::{AxisRegistry, SharedAxis};
use crate::servo::{AxisState, SpeedInput};
use crate::units::{AnglePosition, AstronomicalPosition};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct AppState {
    pub registry: AxisRegistry,
    pub states: broadcast::Sender<AxisState>,
}

impl IntoResponse for CommandError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, self.to_string()).into_response()
    }
}

pub fn routes(state: AppState) -> Router {
    let axis_routes = Router::new()
        .route("/", get(get_axis))
        .route("/target_raw", put(put_target_raw))
        .route("/target_raw/relative", put(put_target_raw_relative))
        .route("/target_angle", put(put_target_angle))
        .route("/target_angle/relative", put(put_target_angle_relative))
        .route(
            "/target_astronomical",
            put(put_target_astronomical),
        )
        .route(
            "/target_astronomical/relative",
            put(put_target_astronomical_relative),
        )
        .route("/sync_raw", put(put_sync_raw))
        .route("/sync_angle", put(put_sync_angle))
        .route("/sync_astronomical", put(put_sync_astronomical))
        .route("/tracking", put(put_tracking))
        .route("/run_speed", put(put_run_speed))
        .route("/halt", put(put_halt))
        .route("/resume", put(put_resume))
        .route("/reset", get(get_reset))
        .route("/events", get(axis_events));

    Router::new()
        .route("/axes", get(list_axes))
        .nest("/axes/:name", axis_routes)
        .with_state(state)
}

async fn lookup(state: &AppState, name: &str) -> Result<SharedAxis, CommandError> {
    state.registry.get(name)
}

async fn list_axes(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.registry.names())
}

async fn get_axis(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<AxisState>, CommandError> {
    let axis = lookup(&state, &name).await?;
    Ok(Json(axis.lock().await.state()))
}

#[derive(Debug, Deserialize)]
struct RawValue {
    value: i64,
}

async fn put_target_raw(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<RawValue>,
) -> Result<Json<AxisState>, CommandError> {
    let axis = lookup(&state, &name).await?;
    let mut axis = axis.lock().await;
    axis.set_target_raw(body.value);
    Ok(Json(axis.state()))
}

async fn put_target_raw_relative(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<RawValue>,
) -> Result<Json<AxisState>, CommandError> {
    let axis = lookup(&state, &name).await?;
    let mut axis = axis.lock().await;
    axis.goto_relative_raw(body.value);
    Ok(Json(axis.state()))
}

#[derive(Debug, Deserialize)]
struct SexagesimalAngle {
    #[serde(rename = "deg")]
    degrees: i32,
    #[serde(rename = "min")]
    minutes: i32,
    #[serde(rename = "sec")]
    seconds: f64,
}

fn validate_finite(seconds: f64) -> Result<(), CommandError> {
    if seconds.is_finite() {
        Ok(())
    } else {
        Err(CommandError::InvalidInput(
            "seconds must be a finite number".to_string(),
        ))
    }
}

impl From<SexagesimalAngle> for AnglePosition {
    fn from(a: SexagesimalAngle) -> Self {
        AnglePosition::new(a.degrees, a.minutes, a.seconds)
    }
}

async fn put_target_angle(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<SexagesimalAngle>,
) -> Result<Json<AxisState>, CommandError> {
    validate_finite(body.seconds)?;
    let axis = lookup(&state, &name).await?;
    let mut axis = axis.lock().await;
    axis.set_target_angle(body.into());
    Ok(Json(axis.state()))
}

async fn put_target_angle_relative(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<SexagesimalAngle>,
) -> Result<Json<AxisState>, CommandError> {
    validate_finite(body.seconds)?;
    let axis = lookup(&state, &name).await?;
    let mut axis = axis.lock().await;
    axis.goto_relative_angle(body.into());
    Ok(Json(axis.state()))
}

#[derive(Debug, Deserialize)]
struct SexagesimalAstronomical {
    #[serde(rename = "hr")]
    hours: i32,
    #[serde(rename = "min")]
    minutes: i32,
    #[serde(rename = "sec")]
    seconds: f64,
}

impl From<SexagesimalAstronomical> for AstronomicalPosition {
    fn from(a: SexagesimalAstronomical) -> Self {
        AstronomicalPosition::new(a.hours, a.minutes, a.seconds)
    }
}

async fn put_target_astronomical(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<SexagesimalAstronomical>,
) -> Result<Json<AxisState>, CommandError> {
    validate_finite(body.seconds)?;
    let axis = lookup(&state, &name).await?;
    let mut axis = axis.lock().await;
    axis.set_target_astronomical(body.into());
    Ok(Json(axis.state()))
}

async fn put_target_astronomical_relative(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<SexagesimalAstronomical>,
) -> Result<Json<AxisState>, CommandError> {
    validate_finite(body.seconds)?;
    let axis = lookup(&state, &name).await?;
    let mut axis = axis.lock().await;
    axis.goto_relative_astronomical(body.into());
    Ok(Json(axis.state()))
}

async fn put_sync_raw(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<RawValue>,
) -> Result<Json<AxisState>, CommandError> {
    let axis = lookup(&state, &name).await?;
    let mut axis = axis.lock().await;
    axis.sync_raw(body.value);
    Ok(Json(axis.state()))
}

async fn put_sync_angle(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<SexagesimalAngle>,
) -> Result<Json<AxisState>, CommandError> {
    validate_finite(body.seconds)?;
    let axis = lookup(&state, &name).await?;
    let mut axis = axis.lock().await;
    axis.sync_angle(body.into());
    Ok(Json(axis.state()))
}

async fn put_sync_astronomical(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<SexagesimalAstronomical>,
) -> Result<Json<AxisState>, CommandError> {
    validate_finite(body.seconds)?;
    let axis = lookup(&state, &name).await?;
    let mut axis = axis.lock().await;
    axis.sync_astronomical(body.into());
    Ok(Json(axis.state()))
}

#[derive(Debug, Deserialize)]
struct TrackingBody {
    tracking: bool,
}

async fn put_tracking(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<TrackingBody>,
) -> Result<Json<AxisState>, CommandError> {
    let axis = lookup(&state, &name).await?;
    let mut axis = axis.lock().await;
    axis.set_tracking(body.tracking);
    Ok(Json(axis.state()))
}

async fn put_run_speed(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<SexagesimalAngle>,
) -> Result<Json<AxisState>, CommandError> {
    validate_finite(body.seconds)?;
    let axis = lookup(&state, &name).await?;
    let mut axis = axis.lock().await;
    let angle: AnglePosition = body.into();
    axis.set_run_speed(SpeedInput::Angle(angle));
    Ok(Json(axis.state()))
}

async fn put_halt(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<AxisState>, CommandError> {
    let axis = lookup(&state, &name).await?;
    let mut axis = axis.lock().await;
    axis.halt();
    Ok(Json(axis.state()))
}

async fn put_resume(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<AxisState>, CommandError> {
    let axis = lookup(&state, &name).await?;
    let mut axis = axis.lock().await;
    axis.resume();
    Ok(Json(axis.state()))
}

async fn get_reset(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<AxisState>, CommandError> {
    let axis = lookup(&state, &name).await?;
    let mut axis = axis.lock().await;
    axis.reset();
    Ok(Json(axis.state()))
}

/// Upgrades to a websocket that rebroadcasts every tick's state dictionary
/// for this axis, filtering the shared broadcast channel by axis name.
async fn axis_events(
    upgrade: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, CommandError> {
    lookup(&state, &name).await?;
    let receiver = state.states.subscribe();
    Ok(upgrade.on_upgrade(move |socket| stream_axis_events(socket, name, receiver)))
}

async fn stream_axis_events(
    mut socket: WebSocket,
    name: String,
    mut receiver: broadcast::Receiver<AxisState>,
) {
    loop {
        match receiver.recv().await {
            Ok(axis_state) if axis_state.name == name => {
                let Ok(body) = serde_json::to_string(&axis_state) else {
                    continue;
                };
                if socket.send(Message::Text(body.into())).await.is_err() {
                    return;
                }
            }
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AxisConfig, ServerConfig};

    fn test_state() -> AppState {
        let config = ServerConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            com_settings: Default::default(),
            state_file: "state.json".into(),
            axes: vec![AxisConfig {
                name: "ra".to_string(),
                ..Default::default()
            }],
            dry_run: true,
        };
        let (states, _rx) = broadcast::channel(8);
        AppState {
            registry: AxisRegistry::from_config(&config),
            states,
        }
    }

    #[tokio::test]
    async fn unknown_axis_yields_not_found() {
        let state = test_state();
        let err = lookup(&state, "dec").await.unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn put_target_raw_updates_setpoint() {
        let state = test_state();
        let axis = lookup(&state, "ra").await.unwrap();
        axis.lock().await.update(0, std::time::Instant::now());
        let result = put_target_raw(
            State(state.clone()),
            Path("ra".to_string()),
            Json(RawValue { value: 12_345 }),
        )
        .await
        .unwrap();
        assert_eq!(result.0.target_raw, 12_345);
    }

    #[tokio::test]
    async fn malformed_seconds_rejected() {
        let body = SexagesimalAngle {
            degrees: 1,
            minutes: 0,
            seconds: f64::NAN,
        };
        assert!(validate_finite(body.seconds).is_err());
    }
}
