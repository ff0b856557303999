// =============================================================================
// Gateway Error Taxonomy — typed failures for every exchange operation
// =============================================================================
//
// Binance reports failures as `{"code": <negative int>, "msg": "..."}` bodies.
// Numeric codes are folded into a closed enum so callers can match on the
// failure class instead of string-scraping.
// =============================================================================

use thiserror::Error;

/// Every exchange-gateway operation returns this taxonomy.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("insufficient margin: {0}")]
    InsufficientMargin(String),

    #[error("precision/filter violation: {0}")]
    Precision(String),

    #[error("reduce-only order rejected: {0}")]
    ReduceOnlyRejected(String),

    #[error("position already closed: {0}")]
    PositionClosed(String),

    #[error("network timeout: {0}")]
    NetworkTimeout(String),

    #[error("exchange error {code}: {msg}")]
    Unknown { code: i64, msg: String },
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    /// Transient failures worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::NetworkTimeout(_))
    }

    /// Failures that should trigger a symbol-filter cache refresh followed by
    /// a single retry.
    pub fn is_filter_related(&self) -> bool {
        matches!(self, Self::Precision(_))
    }
}

/// Map a Binance error body `{code, msg}` onto the gateway taxonomy.
pub fn map_exchange_error(code: i64, msg: &str) -> GatewayError {
    let msg = msg.to_string();
    match code {
        // Request-weight or order-rate ceilings.
        -1003 | -1015 => GatewayError::RateLimited(msg),
        // Timestamp drift, bad key, bad signature, unauthorized.
        -1021 | -1022 | -2014 | -2015 => GatewayError::Auth(msg),
        // Margin is insufficient.
        -2019 => GatewayError::InsufficientMargin(msg),
        // LOT_SIZE / PRICE_FILTER / MIN_NOTIONAL / precision violations.
        -1013 | -1111 | -4014 => GatewayError::Precision(msg),
        // ReduceOnly rejections.
        -2022 => GatewayError::ReduceOnlyRejected(msg),
        // Order would not change position / position no longer exists.
        -4061 => GatewayError::PositionClosed(msg),
        _ => GatewayError::Unknown { code, msg },
    }
}

/// Parse an error body if the JSON carries the `{code, msg}` shape.
pub fn from_body(body: &serde_json::Value) -> Option<GatewayError> {
    let code = body.get("code")?.as_i64()?;
    if code >= 0 {
        return None;
    }
    let msg = body.get("msg").and_then(|m| m.as_str()).unwrap_or("");
    Some(map_exchange_error(code, msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_map_to_classes() {
        assert!(matches!(map_exchange_error(-1003, "banned"), GatewayError::RateLimited(_)));
        assert!(matches!(map_exchange_error(-2015, "bad key"), GatewayError::Auth(_)));
        assert!(matches!(
            map_exchange_error(-2019, "margin"),
            GatewayError::InsufficientMargin(_)
        ));
        assert!(matches!(map_exchange_error(-1111, "precision"), GatewayError::Precision(_)));
        assert!(matches!(
            map_exchange_error(-2022, "reduceonly"),
            GatewayError::ReduceOnlyRejected(_)
        ));
        assert!(matches!(map_exchange_error(-4061, "closed"), GatewayError::PositionClosed(_)));
    }

    #[test]
    fn unrecognized_code_is_unknown() {
        match map_exchange_error(-9999, "???") {
            GatewayError::Unknown { code, .. } => assert_eq!(code, -9999),
            other => panic!("expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn retryability() {
        assert!(map_exchange_error(-1003, "").is_retryable());
        assert!(GatewayError::NetworkTimeout("t/o".into()).is_retryable());
        assert!(!map_exchange_error(-2019, "").is_retryable());
        assert!(!map_exchange_error(-1111, "").is_retryable());
    }

    #[test]
    fn filter_related_flag() {
        assert!(map_exchange_error(-1111, "").is_filter_related());
        assert!(map_exchange_error(-1013, "").is_filter_related());
        assert!(!map_exchange_error(-2019, "").is_filter_related());
    }

    #[test]
    fn from_body_parses_error_shape() {
        let body = serde_json::json!({"code": -2019, "msg": "Margin is insufficient."});
        assert!(matches!(from_body(&body), Some(GatewayError::InsufficientMargin(_))));

        let ok = serde_json::json!({"orderId": 42});
        assert!(from_body(&ok).is_none());
    }
}
