// src/domain/idempotency.rs
// Deterministic client order id derivation. The id doubles as the
// exchange-facing idempotency token and the local duplicate-submission key.

use chrono::Utc;

/// Maximum client order id length accepted by all supported exchanges.
const MAX_CLIENT_ORDER_ID_LEN: usize = 36;

/// Derive the client order id for one logical submission.
///
/// With a signal id the result is fully deterministic for
/// (user, signal, symbol), so a re-delivered signal maps onto the same id.
/// Without one the id is timestamp-based and unique per call.
pub fn generate_client_order_id(
    user_id: &str,
    signal_id: Option<&str>,
    symbol: &str,
    timestamp_ms: Option<i64>,
) -> String {
    let user_prefix: String = user_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(8)
        .collect();
    let symbol_part: String = symbol
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_uppercase();

    let id = match signal_id {
        Some(signal) => {
            let signal_part: String = signal
                .chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .take(12)
                .collect();
            format!("{}-{}-{}", user_prefix, signal_part, symbol_part)
        }
        None => {
            let ts = timestamp_ms.unwrap_or_else(|| Utc::now().timestamp_millis());
            format!("{}-{}-{}", user_prefix, symbol_part, ts)
        }
    };

    id.chars().take(MAX_CLIENT_ORDER_ID_LEN).collect()
}

/// Suffix a leg label onto a base client order id, keeping the exchange
/// length limit. Used for DCA/SL/TP legs sharing one logical submission.
pub fn leg_client_order_id(base: &str, suffix: &str) -> String {
    let mut id: String = base
        .chars()
        .take(MAX_CLIENT_ORDER_ID_LEN - suffix.len() - 1)
        .collect();
    id.push('-');
    id.push_str(suffix);
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_ids_are_deterministic() {
        let a = generate_client_order_id("user-123456", Some("sig-42"), "BTC/USDT", Some(1));
        let b = generate_client_order_id("user-123456", Some("sig-42"), "BTC/USDT", Some(2));
        assert_eq!(a, b, "timestamp must not influence signal-based ids");
        assert_eq!(a, "user1234-sig42-BTCUSDT");
    }

    #[test]
    fn timestamp_ids_differ_per_timestamp() {
        let a = generate_client_order_id("user-123456", None, "BTC/USDT", Some(1000));
        let b = generate_client_order_id("user-123456", None, "BTC/USDT", Some(1001));
        assert_ne!(a, b);
        assert!(a.starts_with("user1234-BTCUSDT-"));
    }

    #[test]
    fn ids_respect_exchange_length_limit() {
        let id = generate_client_order_id(
            "a-very-long-user-identifier",
            Some("a-very-long-signal-identifier"),
            "SOMEVERYLONGSYMBOL/USDT",
            None,
        );
        assert!(id.len() <= 36, "id too long: {}", id);
    }

    #[test]
    fn leg_ids_keep_suffix_and_limit() {
        let base = generate_client_order_id("user-123456", Some("sig42"), "BTC/USDT", None);
        let leg = leg_client_order_id(&base, "D2");
        assert!(leg.ends_with("-D2"));
        assert!(leg.len() <= 36);
    }
}
