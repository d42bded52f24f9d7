//! Persistent subscription sessions over WebSocket.
//!
//! Auth rides a `token` query parameter (the WS handshake cannot carry an
//! Authorization header from browsers). A session is one reader task and
//! one writer loop: the reader forwards client frames into a control
//! channel, the writer owns the socket sink and multiplexes hub events,
//! `pong` replies, the idle deadline, token expiry, and server shutdown.
//! Dropping the hub subscriptions at the end of the session is the
//! unsubscribe.

use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::alert_rules;
use crate::auth::Role;
use crate::hub::{self, Envelope};
use crate::metrics::Metrics;
use crate::repo;
use crate::state::AppState;

/// Outbound queue depth between the hub forwarders and the socket writer.
const OUTBOUND_QUEUE: usize = 256;

#[derive(Deserialize)]
pub struct SubscribeParams {
    pub token: String,
    pub since: Option<DateTime<Utc>>,
}

pub async fn subscribe(
    ws: WebSocketUpgrade,
    Query(params): Query<SubscribeParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session(socket, state, params))
}

enum ClientSignal {
    Ping,
    Activity,
    Closed,
}

/// Build the single-frame JSON for an event: the payload object with
/// `event_type` and `timestamp` folded in.
fn frame(event_type: &str, timestamp: DateTime<Utc>, payload: &serde_json::Value) -> String {
    let mut obj = match payload {
        serde_json::Value::Object(map) => map.clone(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("data".into(), other.clone());
            map
        }
    };
    obj.insert("event_type".into(), serde_json::Value::String(event_type.to_string()));
    obj.insert("timestamp".into(), serde_json::json!(timestamp));
    serde_json::Value::Object(obj).to_string()
}

/// Channels a session of the given role may subscribe to.
fn session_channels(role: Role, sub: &str) -> Vec<String> {
    match role {
        Role::Tourist => vec![hub::tourist_channel(sub), hub::CH_BROADCASTS_ALL.to_string()],
        Role::Authority => vec![hub::CH_ALERTS_AUTHORITY.to_string()],
        Role::Admin => {
            vec![hub::CH_ALERTS_AUTHORITY.to_string(), hub::CH_ADMIN_SYSTEM.to_string()]
        }
    }
}

async fn close_with(socket_tx: &mut (impl SinkExt<Message> + Unpin), code: u16, reason: &'static str) {
    let _ = socket_tx
        .send(Message::Close(Some(CloseFrame { code, reason: reason.into() })))
        .await;
}

async fn session(socket: WebSocket, state: AppState, params: SubscribeParams) {
    Metrics::bump(&state.metrics.ws_opened);
    let (mut sink, mut stream) = socket.split();

    // Authenticate before anything flows. The handshake has already
    // succeeded, so a bad token is a policy-violation close, not an HTTP 401.
    let claims = match state.jwt.verify(&params.token) {
        Ok(claims) => claims,
        Err(_) => {
            Metrics::bump(&state.metrics.ws_auth_failures);
            close_with(&mut sink, close_code::POLICY, "authentication failed").await;
            return;
        }
    };
    let session_id = uuid::Uuid::new_v4();
    info!(%session_id, sub = %claims.sub, role = ?claims.role, "session_subscribed");

    // Replay the gap before going live: alerts created after `since` that
    // this session's channels would have carried.
    if let Some(since) = params.since {
        let replay = match claims.role {
            Role::Tourist => {
                repo::alerts::created_since_for_tourist(&state.db, &claims.sub, since).await
            }
            _ => repo::alerts::created_since(&state.db, since).await,
        };
        match replay {
            Ok(rows) => {
                for alert in rows {
                    let body =
                        frame("alert_created", alert.created_at, &alert_rules::alert_event(&alert));
                    if sink.send(Message::Text(body)).await.is_err() {
                        Metrics::bump(&state.metrics.ws_closed);
                        return;
                    }
                    Metrics::bump(&state.metrics.ws_replayed);
                }
            }
            Err(e) => warn!(%session_id, error = %e, "session_replay_failed"),
        }
    }

    // Hub subscriptions feed one bounded outbound queue; a forwarder task
    // per channel keeps `Subscription::recv` drained without blocking
    // publishers.
    let (event_tx, mut event_rx) = mpsc::channel::<Envelope>(OUTBOUND_QUEUE);
    let mut forwarders = Vec::new();
    for channel in session_channels(claims.role, &claims.sub) {
        let mut subscription = state.hub.subscribe(&channel);
        let tx = event_tx.clone();
        forwarders.push(tokio::spawn(async move {
            while let Some(envelope) = subscription.recv().await {
                if tx.send(envelope).await.is_err() {
                    break;
                }
            }
            if subscription.dropped() > 0 {
                warn!(
                    channel = %subscription.channel,
                    dropped = subscription.dropped(),
                    "session_subscription_lossy"
                );
            }
        }));
    }
    drop(event_tx);

    // Reader: client frames become control signals. The literal `ping`
    // text frame is the liveness probe, distinct from protocol-level ping.
    let (signal_tx, mut signal_rx) = mpsc::channel::<ClientSignal>(16);
    let reader = tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            let signal = match msg {
                Ok(Message::Text(text)) if text == "ping" => ClientSignal::Ping,
                Ok(Message::Close(_)) | Err(_) => ClientSignal::Closed,
                Ok(_) => ClientSignal::Activity,
            };
            let stop = matches!(signal, ClientSignal::Closed);
            if signal_tx.send(signal).await.is_err() || stop {
                break;
            }
        }
        let _ = signal_tx.send(ClientSignal::Closed).await;
    });

    let idle_after = Duration::from_secs(state.config.session_idle_secs);
    let idle = tokio::time::sleep(idle_after);
    tokio::pin!(idle);

    // Hard deadline at token expiry: no frames flow past it.
    let expiry_in = (claims.exp - Utc::now().timestamp()).max(0) as u64;
    let expiry = tokio::time::sleep(Duration::from_secs(expiry_in));
    tokio::pin!(expiry);

    let mut shutdown = state.shutdown.clone();

    loop {
        tokio::select! {
            maybe_event = event_rx.recv() => {
                let Some(envelope) = maybe_event else { break };
                let body = frame(&envelope.event_type, envelope.timestamp, &envelope.payload);
                if sink.send(Message::Text(body)).await.is_err() {
                    break;
                }
                idle.as_mut().reset(tokio::time::Instant::now() + idle_after);
            }
            maybe_signal = signal_rx.recv() => {
                match maybe_signal {
                    Some(ClientSignal::Ping) => {
                        if sink.send(Message::Text("pong".into())).await.is_err() {
                            break;
                        }
                        idle.as_mut().reset(tokio::time::Instant::now() + idle_after);
                    }
                    Some(ClientSignal::Activity) => {
                        idle.as_mut().reset(tokio::time::Instant::now() + idle_after);
                    }
                    Some(ClientSignal::Closed) | None => break,
                }
            }
            _ = &mut idle => {
                Metrics::bump(&state.metrics.ws_closed_idle);
                close_with(&mut sink, close_code::ERROR, "idle timeout").await;
                break;
            }
            _ = &mut expiry => {
                Metrics::bump(&state.metrics.ws_auth_failures);
                close_with(&mut sink, close_code::POLICY, "token expired").await;
                break;
            }
            _ = shutdown.changed() => {
                close_with(&mut sink, close_code::AWAY, "server shutting down").await;
                break;
            }
        }
    }

    // Dropping the forwarders drops their hub subscriptions — that is the
    // unsubscribe, well inside the 1-second bound.
    for f in &forwarders {
        f.abort();
    }
    reader.abort();
    Metrics::bump(&state.metrics.ws_closed);
    info!(%session_id, "session_closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frame_folds_event_type_and_timestamp_in() {
        let ts = Utc::now();
        let body = frame("alert_created", ts, &json!({ "alert": { "id": 1 } }));
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["event_type"], "alert_created");
        assert_eq!(parsed["alert"]["id"], 1);
        assert!(parsed["timestamp"].is_string());
    }

    #[test]
    fn frame_wraps_non_object_payloads() {
        let body = frame("note", Utc::now(), &json!("plain"));
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["data"], "plain");
    }

    #[test]
    fn tourist_channels_are_private_plus_broadcasts() {
        let channels = session_channels(Role::Tourist, "T1");
        assert_eq!(channels, vec!["alerts.tourist.T1".to_string(), "broadcasts.all".to_string()]);
    }

    #[test]
    fn authority_gets_the_fanout_channel() {
        assert_eq!(session_channels(Role::Authority, "A1"), vec!["alerts.authority".to_string()]);
        let admin = session_channels(Role::Admin, "root");
        assert!(admin.contains(&"alerts.authority".to_string()));
        assert!(admin.contains(&"admin.system".to_string()));
    }

    #[test]
    fn close_codes_match_protocol_contract() {
        assert_eq!(close_code::NORMAL, 1000);
        assert_eq!(close_code::AWAY, 1001);
        assert_eq!(close_code::POLICY, 1008);
        assert_eq!(close_code::ERROR, 1011);
    }
}
