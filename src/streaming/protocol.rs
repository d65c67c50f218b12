//! Wire types for the streaming surface: the typed envelope clients receive
//! and the control commands they may send back.

use crate::broker::AccountState;
use crate::candle::Candle;
use crate::ids::ClientId;
use crate::order::Order;
use crate::playback::PlaybackState;
use crate::position::Position;
use crate::statistics::Statistics;
use crate::trade::Trade;
use serde::{Deserialize, Serialize};

/// Outbound message kinds, tagged so clients can deserialize `data` based on `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EnvelopeKind {
    CandleUpdate { candle: Candle, price: f64 },
    TradeEvent(TradeEventPayload),
    StatisticsUpdate(Statistics),
    BacktestState { state: PlaybackState, reason: Option<String> },
    Pong { timestamp: i64 },
    ControlResponse { accepted: bool, message: String },
}

/// Describes what happened to produce a `trade_event`: an order executed
/// and opened a position, a pending order was parked, an order was
/// cancelled, a position closed into a trade, or a margin call swept
/// several positions closed at once.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TradeEventPayload {
    OrderExecuted { order: Order },
    OrderPendingCreated { order: Order },
    OrderCancelled { order_id: String },
    PositionOpened { position: Position },
    PositionClosed { trade: Trade, account: AccountState },
    MarginCall { closed: Vec<Trade>, account: AccountState },
}

/// The envelope every client receives: `{type, data, timestamp, clientId?}`
/// per §4.5/§6. `kind` is flattened so the wire shape matches the spec
/// exactly instead of nesting a second object under it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub kind: EnvelopeKind,
    pub timestamp: i64,
    #[serde(rename = "clientId", skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl Envelope {
    pub fn new(kind: EnvelopeKind, timestamp: i64) -> Self {
        Self { kind, timestamp, client_id: None }
    }

    pub fn for_client(mut self, client_id: &ClientId) -> Self {
        self.client_id = Some(client_id.0.clone());
        self
    }
}

/// Control commands a connected client may send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlCommand {
    Ping { data: Option<PingData> },
    Play { speed: Option<f64> },
    Pause,
    SpeedChange { speed: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingData {
    pub timestamp: i64,
}

/// Implemented by whatever owns the Playback Controller (the Backtester),
/// so the hub can dispatch ingress commands without holding a back-pointer
/// into the facade (§9's cyclic-reference note).
pub trait ControlSink: Send + Sync {
    fn play(&self, speed: Option<f64>);
    fn pause(&self);
    fn set_speed(&self, speed: f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serializes_flattened_type_and_data() {
        let env = Envelope::new(EnvelopeKind::Pong { timestamp: 42 }, 1000);
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["type"], "pong");
        assert_eq!(json["data"]["timestamp"], 42);
        assert_eq!(json["timestamp"], 1000);
        assert!(json.get("clientId").is_none());
    }

    #[test]
    fn control_command_parses_play_with_speed() {
        let json = r#"{"type":"play","speed":2.0}"#;
        let cmd: ControlCommand = serde_json::from_str(json).unwrap();
        matches!(cmd, ControlCommand::Play { speed: Some(s) } if (s - 2.0).abs() < 1e-9);
    }

    #[test]
    fn control_command_parses_bare_pause() {
        let json = r#"{"type":"pause"}"#;
        let cmd: ControlCommand = serde_json::from_str(json).unwrap();
        assert!(matches!(cmd, ControlCommand::Pause));
    }
}
