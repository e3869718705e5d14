//! HTTP endpoint handlers.
//!
//! Status codes follow one rule set everywhere: 200 success, 400 validation,
//! 404 missing/expired, 503 subsystem disabled, 500 resource exhaustion.
//! Errors carry a JSON body of the form `{"error": <reason>}`.

use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::AppState;
use crate::directory::LobbyAdvertisement;
use crate::protocol::types::LobbyId;

/// Resolved client IP: first `X-Forwarded-For` hop when present, else the
/// socket peer address. IPv4-mapped IPv6 addresses are unmapped.
pub struct ClientAddr(pub Option<IpAddr>);

impl<S> FromRequestParts<S> for ClientAddr
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.ip());
        Ok(Self(resolve_client_ip(&parts.headers, peer)))
    }
}

pub(crate) fn resolve_client_ip(headers: &HeaderMap, peer: Option<IpAddr>) -> Option<IpAddr> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|first_hop| first_hop.trim().parse::<IpAddr>().ok());
    forwarded.or(peer).map(|ip| ip.to_canonical())
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn parse_uuid(raw: &str, what: &str) -> Result<Uuid, Response> {
    Uuid::parse_str(raw)
        .map_err(|_| error_response(StatusCode::BAD_REQUEST, format!("invalid {what}")))
}

// ===========================================================================
// Health
// ===========================================================================

pub async fn health(State(state): State<AppState>) -> Response {
    let body = json!({
        "status": "ok",
        "timestamp": chrono::Utc::now(),
        "startedAt": state.started_at,
        "punchServerRunning": state.punch.is_some(),
        "punchServerPort": state.punch.as_ref().map(|p| p.port()),
        "relayServerRunning": state.relay.is_some(),
        "relayServerPort": state.relay.as_ref().map(|r| r.port()),
        "relayActiveSessions": state.relay.as_ref().map_or(0, |r| r.active_sessions()),
    });
    Json(body).into_response()
}

// ===========================================================================
// Lobby directory
// ===========================================================================

pub async fn list_lobbies(State(state): State<AppState>) -> Response {
    Json(state.directory.list()).into_response()
}

pub async fn advertise_lobby(
    State(state): State<AppState>,
    client_addr: ClientAddr,
    Json(ad): Json<LobbyAdvertisement>,
) -> Response {
    if ad.lobby_id.is_nil() {
        return error_response(StatusCode::BAD_REQUEST, "LobbyId must not be empty");
    }
    if ad.lobby_name.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "LobbyName must not be empty");
    }
    if ad.port == 0 {
        return error_response(StatusCode::BAD_REQUEST, "Port must not be zero");
    }

    state.directory.purge_stale();
    let entry = state.directory.upsert(ad, client_addr.0);
    tracing::debug!(lobby_id = %entry.lobby_id, address = %entry.address, "Lobby heartbeat");
    Json(entry).into_response()
}

pub async fn remove_lobby(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let lobby_id = match parse_uuid(&id, "lobby id") {
        Ok(id) => id,
        Err(response) => return response,
    };
    let removed = state.directory.remove(&lobby_id);
    if removed {
        // The alias dies with the lobby.
        state.codes.release_lobby(&lobby_id);
        tracing::info!(%lobby_id, "Lobby removed from directory");
    }
    Json(json!({ "removed": removed })).into_response()
}

// ===========================================================================
// Short codes
// ===========================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AllocateCodeRequest {
    pub lobby_id: LobbyId,
}

pub async fn allocate_code(
    State(state): State<AppState>,
    Json(request): Json<AllocateCodeRequest>,
) -> Response {
    if request.lobby_id.is_nil() {
        return error_response(StatusCode::BAD_REQUEST, "LobbyId must not be empty");
    }
    if state.directory.get(&request.lobby_id).is_none() {
        return error_response(StatusCode::NOT_FOUND, "lobby not found");
    }
    match state.codes.allocate(request.lobby_id) {
        Ok(code) => Json(json!({ "Code": code, "LobbyId": request.lobby_id })).into_response(),
        Err(err) => {
            tracing::error!(lobby_id = %request.lobby_id, error = %err, "Short code allocation failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

pub async fn lookup_code(State(state): State<AppState>, Path(code): Path<String>) -> Response {
    let lobby_id = match state.codes.lookup(&code) {
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err.to_string()),
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "unknown code"),
        Ok(Some(lobby_id)) => lobby_id,
    };

    match state.directory.get(&lobby_id) {
        Some(entry) => Json(entry).into_response(),
        None => {
            // The lobby behind the code is gone; the stale alias goes too.
            let _ = state.codes.release_code(&code);
            error_response(StatusCode::NOT_FOUND, "lobby expired or removed")
        }
    }
}

pub async fn release_code(State(state): State<AppState>, Path(code): Path<String>) -> Response {
    match state.codes.release_code(&code) {
        Ok(released) => Json(json!({ "released": released })).into_response(),
        Err(err) => error_response(StatusCode::BAD_REQUEST, err.to_string()),
    }
}

// ===========================================================================
// NAT punch
// ===========================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PunchRegisterRequest {
    pub lobby_id: LobbyId,
    #[serde(default)]
    pub internal_endpoint: Option<String>,
    #[serde(default)]
    pub external_port: Option<u16>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PunchRequestBody {
    pub lobby_id: LobbyId,
    #[serde(default)]
    pub client_internal_endpoint: Option<String>,
    #[serde(default)]
    pub client_port: Option<u16>,
    #[serde(default)]
    pub client_token: Option<String>,
}

fn punch_unavailable() -> Response {
    error_response(StatusCode::SERVICE_UNAVAILABLE, "punch server not running")
}

pub async fn punch_info(State(state): State<AppState>) -> Response {
    match &state.punch {
        Some(punch) => Json(json!({
            "Available": true,
            "Address": state.config.advertised_address().unwrap_or_default(),
            "Port": punch.port(),
            "Message": "send registration datagrams to this endpoint",
        }))
        .into_response(),
        None => Json(json!({
            "Available": false,
            "Address": "",
            "Port": 0,
            "Message": "punch server not running",
        }))
        .into_response(),
    }
}

pub async fn punch_register(
    State(state): State<AppState>,
    client_addr: ClientAddr,
    Json(request): Json<PunchRegisterRequest>,
) -> Response {
    let Some(punch) = &state.punch else {
        return punch_unavailable();
    };
    if request.lobby_id.is_nil() {
        return error_response(StatusCode::BAD_REQUEST, "LobbyId must not be empty");
    }
    let internal = match parse_endpoint(request.internal_endpoint.as_deref()) {
        Ok(endpoint) => endpoint,
        Err(response) => return response,
    };

    punch.register_host(
        request.lobby_id,
        internal,
        request.external_port,
        client_addr.0,
    );
    Json(json!({ "registered": true, "lobbyId": request.lobby_id })).into_response()
}

pub async fn punch_request(
    State(state): State<AppState>,
    client_addr: ClientAddr,
    Json(request): Json<PunchRequestBody>,
) -> Response {
    let Some(punch) = &state.punch else {
        return punch_unavailable();
    };
    if request.lobby_id.is_nil() {
        return error_response(StatusCode::BAD_REQUEST, "LobbyId must not be empty");
    }
    let internal = match parse_endpoint(request.client_internal_endpoint.as_deref()) {
        Ok(endpoint) => endpoint,
        Err(response) => return response,
    };

    let result = punch
        .request_punch(
            request.lobby_id,
            internal,
            request.client_port,
            request.client_token,
            client_addr.0,
        )
        .await;

    let message = if result.introduced {
        "introduction sent".to_string()
    } else if result.host_registered {
        "waiting for host UDP registration".to_string()
    } else {
        "Host not registered; punch request queued".to_string()
    };
    Json(json!({
        "Success": true,
        "PunchToken": result.token,
        "Message": message,
    }))
    .into_response()
}

pub async fn punch_unregister(
    State(state): State<AppState>,
    Path(lobby_id): Path<String>,
) -> Response {
    let Some(punch) = &state.punch else {
        return punch_unavailable();
    };
    let lobby_id = match parse_uuid(&lobby_id, "lobby id") {
        Ok(id) => id,
        Err(response) => return response,
    };
    Json(json!({ "unregistered": punch.unregister_host(&lobby_id) })).into_response()
}

fn parse_endpoint(raw: Option<&str>) -> Result<Option<SocketAddr>, Response> {
    match raw {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw.trim().parse::<SocketAddr>().map(Some).map_err(|_| {
            error_response(
                StatusCode::BAD_REQUEST,
                format!("malformed endpoint `{raw}`"),
            )
        }),
    }
}

// ===========================================================================
// Relay
// ===========================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RelayAllocateRequest {
    pub lobby_id: LobbyId,
}

fn relay_unavailable() -> Response {
    error_response(StatusCode::SERVICE_UNAVAILABLE, "relay server not running")
}

pub async fn relay_info(State(state): State<AppState>) -> Response {
    match &state.relay {
        Some(relay) => Json(json!({
            "Available": true,
            "Address": state.config.advertised_address().unwrap_or_default(),
            "Port": relay.port(),
            "Message": "allocate a session, then register both peers",
        }))
        .into_response(),
        None => Json(json!({
            "Available": false,
            "Address": "",
            "Port": 0,
            "Message": "relay server not running",
        }))
        .into_response(),
    }
}

pub async fn relay_allocate(
    State(state): State<AppState>,
    Json(request): Json<RelayAllocateRequest>,
) -> Response {
    let Some(relay) = &state.relay else {
        return relay_unavailable();
    };
    if request.lobby_id.is_nil() {
        return error_response(StatusCode::BAD_REQUEST, "LobbyId must not be empty");
    }

    let session_id = relay.allocate(request.lobby_id);
    Json(json!({
        "Success": true,
        "SessionId": session_id,
        "RelayAddress": state.config.advertised_address().unwrap_or_default(),
        "RelayPort": relay.port(),
        "Message": "register host and client against this session",
    }))
    .into_response()
}

pub async fn relay_release(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    let Some(relay) = &state.relay else {
        return relay_unavailable();
    };
    let session_id = match parse_uuid(&session_id, "session id") {
        Ok(id) => id,
        Err(response) => return response,
    };
    Json(json!({ "released": relay.release(&session_id).await })).into_response()
}

pub async fn relay_stats(State(state): State<AppState>) -> Response {
    match &state.relay {
        Some(relay) => Json(relay.stats()).into_response(),
        None => relay_unavailable(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_xff(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", value.parse().unwrap());
        headers
    }

    #[test]
    fn forwarded_for_first_hop_wins() {
        let headers = headers_with_xff("203.0.113.5, 10.0.0.1");
        let peer: IpAddr = "192.0.2.1".parse().unwrap();
        assert_eq!(
            resolve_client_ip(&headers, Some(peer)),
            Some("203.0.113.5".parse().unwrap())
        );
    }

    #[test]
    fn falls_back_to_peer_address() {
        let peer: IpAddr = "192.0.2.1".parse().unwrap();
        assert_eq!(
            resolve_client_ip(&HeaderMap::new(), Some(peer)),
            Some(peer)
        );
    }

    #[test]
    fn garbage_forwarded_header_is_ignored() {
        let headers = headers_with_xff("not-an-ip");
        let peer: IpAddr = "192.0.2.1".parse().unwrap();
        assert_eq!(resolve_client_ip(&headers, Some(peer)), Some(peer));
    }

    #[test]
    fn mapped_ipv6_is_unmapped() {
        let peer: IpAddr = "::ffff:203.0.113.9".parse().unwrap();
        assert_eq!(
            resolve_client_ip(&HeaderMap::new(), Some(peer)),
            Some("203.0.113.9".parse().unwrap())
        );
    }

    #[test]
    fn no_source_yields_none() {
        assert_eq!(resolve_client_ip(&HeaderMap::new(), None), None);
    }

    #[test]
    fn endpoint_parsing() {
        assert_eq!(parse_endpoint(None).unwrap(), None);
        assert_eq!(parse_endpoint(Some("  ")).unwrap(), None);
        assert_eq!(
            parse_endpoint(Some("10.0.0.5:7777")).unwrap(),
            Some("10.0.0.5:7777".parse().unwrap())
        );
        assert!(parse_endpoint(Some("not-an-endpoint")).is_err());
    }
}
