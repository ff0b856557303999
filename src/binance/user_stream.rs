// =============================================================================
// User-Data Stream — order / position / account updates over WebSocket
// =============================================================================
//
// The gateway owns the listen key: it is created on connect and kept alive
// every 30 minutes. Parsed events fan out to subscribers on a broadcast
// channel; a lagging subscriber drops events rather than blocking the stream.
// The caller wraps `run_user_stream` in a reconnect loop.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use tokio::sync::broadcast;
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};

use crate::binance::client::FuturesClient;

/// Keepalive cadence for the listen key (Binance expires keys at 60 min).
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// One parsed user-data event.
#[derive(Debug, Clone)]
pub enum UserStreamEvent {
    /// ORDER_TRADE_UPDATE: an order changed state.
    OrderUpdate {
        symbol: String,
        order_id: u64,
        status: String,
        filled_qty: f64,
        avg_price: f64,
        realized_pnl: f64,
        commission: f64,
    },
    /// ACCOUNT_UPDATE: balances and/or positions changed.
    AccountUpdate {
        wallet_balance: Option<f64>,
        positions: Vec<(String, f64)>,
    },
    /// listenKeyExpired: the caller must reconnect.
    Expired,
}

pub type UserStreamSender = broadcast::Sender<UserStreamEvent>;

pub fn channel() -> (UserStreamSender, broadcast::Receiver<UserStreamEvent>) {
    broadcast::channel(256)
}

/// Connect and pump the user-data stream until the socket drops or the listen
/// key expires. Run inside a reconnect loop:
///
/// ```ignore
/// tokio::spawn(async move {
///     loop {
///         if let Err(e) = user_stream::run_user_stream(&client, &tx, &heartbeat).await {
///             error!(error = %e, "user stream error — reconnecting in 5s");
///         }
///         tokio::time::sleep(Duration::from_secs(5)).await;
///     }
/// });
/// ```
pub async fn run_user_stream(
    client: &Arc<FuturesClient>,
    tx: &UserStreamSender,
    heartbeat: &Arc<crate::supervisor::Heartbeat>,
) -> Result<()> {
    let listen_key = client
        .start_user_stream()
        .await
        .context("failed to obtain listen key")?;

    let url = format!("{}/ws/{}", client.ws_base_url(), listen_key);
    info!("user-data stream connecting");

    let (ws, _) = connect_async(&url)
        .await
        .context("user stream websocket connect failed")?;
    let (_, mut read) = ws.split();

    info!("user-data stream connected");

    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
    keepalive.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            _ = keepalive.tick() => {
                if let Err(e) = client.keepalive_user_stream().await {
                    warn!(error = %e, "listen key keepalive failed");
                }
            }
            msg = read.next() => {
                let Some(msg) = msg else {
                    anyhow::bail!("user stream closed by peer");
                };
                let msg = msg.context("user stream read error")?;
                heartbeat.beat();

                if !msg.is_text() {
                    continue;
                }
                let text = msg.into_text().context("non-utf8 user stream frame")?;
                let value: serde_json::Value = match serde_json::from_str(&text) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(error = %e, "unparseable user stream frame");
                        continue;
                    }
                };

                if let Some(event) = parse_event(&value) {
                    let expired = matches!(event, UserStreamEvent::Expired);
                    // Fire-and-forget: no subscribers is fine.
                    let _ = tx.send(event);
                    if expired {
                        anyhow::bail!("listen key expired");
                    }
                }
            }
        }
    }
}

/// Parse one raw frame into a typed event. Unknown event types yield `None`.
fn parse_event(value: &serde_json::Value) -> Option<UserStreamEvent> {
    match value.get("e").and_then(|e| e.as_str())? {
        "ORDER_TRADE_UPDATE" => {
            let o = value.get("o")?;
            Some(UserStreamEvent::OrderUpdate {
                symbol: o.get("s")?.as_str()?.to_string(),
                order_id: o.get("i").and_then(|v| v.as_u64()).unwrap_or(0),
                status: o
                    .get("X")
                    .and_then(|v| v.as_str())
                    .unwrap_or("UNKNOWN")
                    .to_string(),
                filled_qty: str_field(o, "z"),
                avg_price: str_field(o, "ap"),
                realized_pnl: str_field(o, "rp"),
                commission: str_field(o, "n"),
            })
        }
        "ACCOUNT_UPDATE" => {
            let a = value.get("a")?;
            let wallet_balance = a
                .get("B")
                .and_then(|b| b.as_array())
                .and_then(|balances| {
                    balances
                        .iter()
                        .find(|b| b.get("a").and_then(|x| x.as_str()) == Some("USDT"))
                })
                .map(|b| str_field(b, "wb"));
            let positions = a
                .get("P")
                .and_then(|p| p.as_array())
                .map(|entries| {
                    entries
                        .iter()
                        .filter_map(|p| {
                            let symbol = p.get("s")?.as_str()?.to_string();
                            Some((symbol, str_field(p, "pa")))
                        })
                        .collect()
                })
                .unwrap_or_default();
            Some(UserStreamEvent::AccountUpdate {
                wallet_balance,
                positions,
            })
        }
        "listenKeyExpired" => Some(UserStreamEvent::Expired),
        other => {
            debug!(event = other, "ignoring user stream event type");
            None
        }
    }
}

fn str_field(value: &serde_json::Value, key: &str) -> f64 {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_order_trade_update() {
        let frame = serde_json::json!({
            "e": "ORDER_TRADE_UPDATE",
            "o": {
                "s": "BTCUSDT", "i": 987, "X": "FILLED",
                "z": "0.5", "ap": "50000.5", "rp": "12.34", "n": "0.25"
            }
        });
        match parse_event(&frame).unwrap() {
            UserStreamEvent::OrderUpdate {
                symbol,
                order_id,
                status,
                filled_qty,
                avg_price,
                realized_pnl,
                commission,
            } => {
                assert_eq!(symbol, "BTCUSDT");
                assert_eq!(order_id, 987);
                assert_eq!(status, "FILLED");
                assert!((filled_qty - 0.5).abs() < 1e-9);
                assert!((avg_price - 50000.5).abs() < 1e-9);
                assert!((realized_pnl - 12.34).abs() < 1e-9);
                assert!((commission - 0.25).abs() < 1e-9);
            }
            other => panic!("wrong event: {other:?}"),
        }
    }

    #[test]
    fn parses_account_update() {
        let frame = serde_json::json!({
            "e": "ACCOUNT_UPDATE",
            "a": {
                "B": [{"a": "USDT", "wb": "10250.75"}],
                "P": [{"s": "ETHUSDT", "pa": "-1.5"}]
            }
        });
        match parse_event(&frame).unwrap() {
            UserStreamEvent::AccountUpdate {
                wallet_balance,
                positions,
            } => {
                assert!((wallet_balance.unwrap() - 10250.75).abs() < 1e-9);
                assert_eq!(positions, vec![("ETHUSDT".to_string(), -1.5)]);
            }
            other => panic!("wrong event: {other:?}"),
        }
    }

    #[test]
    fn expired_key_event() {
        let frame = serde_json::json!({"e": "listenKeyExpired"});
        assert!(matches!(parse_event(&frame), Some(UserStreamEvent::Expired)));
    }

    #[test]
    fn unknown_event_ignored() {
        let frame = serde_json::json!({"e": "MARGIN_CALL"});
        assert!(parse_event(&frame).is_none());
        assert!(parse_event(&serde_json::json!({})).is_none());
    }
}
