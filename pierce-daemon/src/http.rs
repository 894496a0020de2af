//! `axum` HTTP surface: `/resource`, `/gateway`, `/proxy`, `/app`,
//! `/upgrade` all answer with the `{code, message, data}` envelope; `/metrics`
//! answers with Prometheus plain text instead.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header::CONTENT_TYPE, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use pierce_portmap::{PortmapApp, PortmapResource};
use pierce_upgrade::UpgradeClient;

use crate::supervisor::Supervisor;

#[derive(Clone)]
pub struct ApiState {
    supervisor: Arc<Supervisor>,
    upgrade: Arc<UpgradeClient>,
}

/// The envelope every non-metrics endpoint replies with.
#[derive(Serialize)]
struct Envelope<T: Serialize> {
    code: i32,
    message: String,
    data: Option<T>,
}

impl<T: Serialize> Envelope<T> {
    fn ok(data: T) -> Self {
        Self {
            code: 0,
            message: "ok".to_string(),
            data: Some(data),
        }
    }

    fn ok_empty() -> Envelope<()> {
        Envelope {
            code: 0,
            message: "ok".to_string(),
            data: None,
        }
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

struct ApiError(pierce_core::Error);

impl From<pierce_core::Error> for ApiError {
    fn from(e: pierce_core::Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Envelope::<()> {
            code: 1,
            message: self.0.to_string(),
            data: None,
        };
        (StatusCode::OK, Json(body)).into_response()
    }
}

pub fn router(supervisor: Arc<Supervisor>) -> Router {
    let state = ApiState {
        supervisor,
        upgrade: Arc::new(UpgradeClient::new(upgrade_os_arch_tag())),
    };

    Router::new()
        .route("/resource", get(list_resources).post(add_resource))
        .route("/resource/:id", axum::routing::delete(del_resource))
        .route("/app", get(list_apps).post(add_app))
        .route("/app/:id", axum::routing::put(update_app).delete(del_app))
        .route("/gateway", get(list_gateways).post(add_gateway))
        .route("/gateway/:id", axum::routing::delete(del_gateway))
        .route("/gateway/:id/ping", get(ping_gateway))
        .route("/proxy/tun/start", post(start_tun))
        .route("/proxy/tun/stop", post(stop_tun))
        .route("/upgrade", get(query_upgrade))
        .route("/metrics", get(metrics))
        .with_state(state)
}

fn upgrade_os_arch_tag() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}

async fn list_resources(State(s): State<ApiState>) -> Result<Envelope<Vec<PortmapResource>>, ApiError> {
    Ok(Envelope::ok(s.supervisor.get_resources()))
}

async fn add_resource(
    State(s): State<ApiState>,
    Json(resource): Json<PortmapResource>,
) -> Result<Envelope<()>, ApiError> {
    s.supervisor.add_resource(resource)?;
    Ok(Envelope::ok_empty())
}

async fn del_resource(State(s): State<ApiState>, Path(id): Path<u64>) -> Result<Envelope<()>, ApiError> {
    s.supervisor.del_resource(id)?;
    Ok(Envelope::ok_empty())
}

async fn list_apps(State(s): State<ApiState>) -> Result<Envelope<Vec<PortmapApp>>, ApiError> {
    Ok(Envelope::ok(s.supervisor.get_apps()))
}

async fn add_app(State(s): State<ApiState>, Json(app): Json<PortmapApp>) -> Result<Envelope<u64>, ApiError> {
    let id = s.supervisor.add_app(app).await?;
    Ok(Envelope::ok(id))
}

async fn update_app(
    State(s): State<ApiState>,
    Path(_id): Path<u64>,
    Json(app): Json<PortmapApp>,
) -> Result<Envelope<()>, ApiError> {
    s.supervisor.update_app(app).await?;
    Ok(Envelope::ok_empty())
}

async fn del_app(State(s): State<ApiState>, Path(id): Path<u64>) -> Result<Envelope<()>, ApiError> {
    s.supervisor.del_app(id)?;
    Ok(Envelope::ok_empty())
}

#[derive(Deserialize)]
struct AddGatewayReq {
    peer: u64,
    token: u64,
}

async fn list_gateways(
    State(s): State<ApiState>,
) -> Result<Envelope<Vec<crate::proxy_client::SocksOutbound>>, ApiError> {
    Ok(Envelope::ok(s.supervisor.list_proxy_gateways()))
}

async fn add_gateway(
    State(s): State<ApiState>,
    Json(req): Json<AddGatewayReq>,
) -> Result<Envelope<u64>, ApiError> {
    let id = s.supervisor.add_proxy_gateway(req.peer, req.token).await?;
    Ok(Envelope::ok(id))
}

async fn del_gateway(State(s): State<ApiState>, Path(id): Path<u64>) -> Result<Envelope<()>, ApiError> {
    s.supervisor.del_proxy_gateway(id)?;
    Ok(Envelope::ok_empty())
}

async fn ping_gateway(State(s): State<ApiState>, Path(id): Path<u64>) -> Result<Envelope<u64>, ApiError> {
    let rtt = s.supervisor.ping_proxy_gateway(id).await?;
    Ok(Envelope::ok(rtt.as_millis() as u64))
}

#[derive(Deserialize)]
struct TunStartReq {
    device: String,
    gateway_idx: u64,
}

async fn start_tun(State(s): State<ApiState>, Json(req): Json<TunStartReq>) -> Result<Envelope<()>, ApiError> {
    s.supervisor.start_tun_proxy(&req.device, req.gateway_idx)?;
    Ok(Envelope::ok_empty())
}

async fn stop_tun(State(s): State<ApiState>) -> Result<Envelope<()>, ApiError> {
    s.supervisor.stop_tun_proxy()?;
    Ok(Envelope::ok_empty())
}

#[derive(Deserialize)]
struct UpgradeQuery {
    server: String,
    program: String,
}

async fn query_upgrade(
    State(s): State<ApiState>,
    axum::extract::Query(q): axum::extract::Query<UpgradeQuery>,
) -> Result<Envelope<pierce_upgrade::VersionInfo>, ApiError> {
    let info = s
        .upgrade
        .query_latest_version(&q.server, &q.program)
        .await
        .map_err(|e| pierce_core::Error::ResolveFailed(e.to_string()))?;
    Ok(Envelope::ok(info))
}

async fn metrics(State(s): State<ApiState>) -> impl IntoResponse {
    let body = s.supervisor.metrics().render();
    let mut resp = body.into_response();
    resp.headers_mut().insert(
        CONTENT_TYPE,
        "text/plain; version=0.0.4; charset=utf-8".parse().unwrap(),
    );
    resp
}
