//! Inbound HTTP transport (spec.md §6): `GET /` returns the current signed
//! advertisement; `POST /` accepts a payment event and returns a session or
//! notice event. Grounded on the teacher's `connection_server.rs`
//! (`axum::Router` + `tower_http::cors::CorsLayer` + `SocketAddr` bind +
//! `axum::serve`), generalized from the teacher's NWC connection handshake
//! into payment intake.

use crate::http::relay::LocalRelay;
use crate::merchant::{IntakeOutcome, Merchant};
use crate::protocol::{self, EventKind};
use crate::valve::{GateControl, StatsProbe};
use crate::wallet::MintBackend;
use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use nostr::Event;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

pub struct ServerState<B: MintBackend, G: GateControl, S: StatsProbe> {
    pub merchant: Arc<Merchant<B, G, S>>,
    pub advertisement: Arc<tokio::sync::RwLock<Event>>,
    pub relay: Arc<LocalRelay>,
}

impl<B: MintBackend, G: GateControl, S: StatsProbe> Clone for ServerState<B, G, S> {
    fn clone(&self) -> Self {
        Self {
            merchant: self.merchant.clone(),
            advertisement: self.advertisement.clone(),
            relay: self.relay.clone(),
        }
    }
}

pub fn router<B, G, S>(state: ServerState<B, G, S>) -> Router
where
    B: MintBackend + 'static,
    G: GateControl + 'static,
    S: StatsProbe + 'static,
{
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any);

    Router::new()
        .route("/", get(get_advertisement::<B, G, S>).post(post_payment::<B, G, S>))
        .layer(cors)
        .with_state(state)
}

pub async fn serve<B, G, S>(addr: SocketAddr, state: ServerState<B, G, S>) -> std::io::Result<()>
where
    B: MintBackend + 'static,
    G: GateControl + 'static,
    S: StatsProbe + 'static,
{
    let app = router(state);
    tracing::info!(%addr, "merchant http server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

async fn get_advertisement<B, G, S>(State(state): State<ServerState<B, G, S>>) -> Response
where
    B: MintBackend,
    G: GateControl,
    S: StatsProbe,
{
    let event = state.advertisement.read().await.clone();
    Json(protocol::serialize(&event)).into_response()
}

async fn post_payment<B, G, S>(
    State(state): State<ServerState<B, G, S>>,
    body: String,
) -> Response
where
    B: MintBackend,
    G: GateControl,
    S: StatsProbe,
{
    let value: serde_json::Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(_) => {
            return error_notice(&state, StatusCode::BAD_REQUEST, protocol::NoticeCode::InvalidEvent)
                .await
        }
    };

    let payment_event = match protocol::parse(&value) {
        Ok(e) => e,
        Err(_) => {
            return error_notice(&state, StatusCode::BAD_REQUEST, protocol::NoticeCode::InvalidEvent)
                .await
        }
    };

    if protocol::validate_structural(&payment_event, EventKind::Payment).is_err() {
        return error_notice(&state, StatusCode::BAD_REQUEST, protocol::NoticeCode::InvalidEvent)
            .await;
    }

    match state.merchant.purchase_session(&payment_event).await {
        IntakeOutcome::Session(session_event) => {
            state.relay.publish(session_event.clone()).await;
            (StatusCode::OK, Json(protocol::serialize(&session_event))).into_response()
        }
        IntakeOutcome::Notice(notice_event) => {
            state.relay.publish(notice_event.clone()).await;
            (StatusCode::BAD_REQUEST, Json(protocol::serialize(&notice_event))).into_response()
        }
    }
}

async fn error_notice<B: MintBackend, G: GateControl, S: StatsProbe>(
    state: &ServerState<B, G, S>,
    status: StatusCode,
    code: protocol::NoticeCode,
) -> Response {
    let event = match protocol::build_notice_event(
        protocol::Level::Error,
        code,
        None,
        state.merchant.keys(),
    ) {
        Ok(e) => e,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to build notice: {e}"),
            )
                .into_response()
        }
    };
    (status, Json(protocol::serialize(&event))).into_response()
}
