// src/application/guard.rs
// The single entry check consulted before any exchange call. Policy-store
// lookup failures fail OPEN so a transient outage does not halt the fleet.

use std::sync::Arc;

use crate::domain::repository::GuardStore;

#[derive(Debug, Clone, PartialEq)]
pub enum GuardDecision {
    Allowed,
    Denied { reason: String },
}

pub struct GuardGate {
    store: Arc<dyn GuardStore>,
}

impl GuardGate {
    pub fn new(store: Arc<dyn GuardStore>) -> Self {
        Self { store }
    }

    /// Evaluate, in order: the global kill switch, the per-user trading
    /// flag, then an optional feature flag.
    pub fn check(&self, user_id: &str, feature_key: Option<&str>) -> GuardDecision {
        match self.store.kill_switch_enabled() {
            Ok(true) => {
                return GuardDecision::Denied {
                    reason: "Trading is disabled platform-wide".to_string(),
                }
            }
            Ok(false) => {}
            Err(e) => {
                log::warn!("kill switch lookup failed, allowing trade: {}", e);
            }
        }

        match self.store.user_trading_status(user_id) {
            Ok(Some(status)) if !status.enabled => {
                return GuardDecision::Denied {
                    reason: status
                        .reason
                        .unwrap_or_else(|| "Trading is disabled for this account".to_string()),
                }
            }
            Ok(_) => {}
            Err(e) => {
                log::warn!("user trading status lookup failed, allowing trade: {}", e);
            }
        }

        if let Some(key) = feature_key {
            match self.store.feature_enabled(key) {
                Ok(Some(false)) => {
                    return GuardDecision::Denied {
                        reason: format!("Feature '{}' is disabled", key),
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    log::warn!("feature flag '{}' lookup failed, allowing trade: {}", key, e);
                }
            }
        }

        GuardDecision::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::{ErrorKind, ExecutionError, ExecutionResult};
    use crate::domain::repository::UserTradingStatus;

    struct FakeGuardStore {
        kill_switch: ExecutionResult<bool>,
        user_status: ExecutionResult<Option<UserTradingStatus>>,
        feature: ExecutionResult<Option<bool>>,
    }

    impl Default for FakeGuardStore {
        fn default() -> Self {
            Self {
                kill_switch: Ok(false),
                user_status: Ok(None),
                feature: Ok(None),
            }
        }
    }

    impl GuardStore for FakeGuardStore {
        fn kill_switch_enabled(&self) -> ExecutionResult<bool> {
            self.kill_switch.clone()
        }

        fn user_trading_status(&self, _user_id: &str) -> ExecutionResult<Option<UserTradingStatus>> {
            self.user_status.clone()
        }

        fn feature_enabled(&self, _key: &str) -> ExecutionResult<Option<bool>> {
            self.feature.clone()
        }
    }

    fn gate(store: FakeGuardStore) -> GuardGate {
        GuardGate::new(Arc::new(store))
    }

    #[test]
    fn allows_by_default() {
        assert_eq!(gate(FakeGuardStore::default()).check("u1", None), GuardDecision::Allowed);
    }

    #[test]
    fn kill_switch_denies_everyone() {
        let store = FakeGuardStore {
            kill_switch: Ok(true),
            // Even a healthy per-user record does not override the switch.
            user_status: Ok(Some(UserTradingStatus { enabled: true, reason: None })),
            ..Default::default()
        };
        match gate(store).check("u1", None) {
            GuardDecision::Denied { reason } => assert!(reason.contains("platform-wide")),
            other => panic!("expected denial, got {:?}", other),
        }
    }

    #[test]
    fn disabled_user_is_denied_with_admin_reason() {
        let store = FakeGuardStore {
            user_status: Ok(Some(UserTradingStatus {
                enabled: false,
                reason: Some("risk review".to_string()),
            })),
            ..Default::default()
        };
        assert_eq!(
            gate(store).check("u1", None),
            GuardDecision::Denied { reason: "risk review".to_string() }
        );
    }

    #[test]
    fn disabled_feature_flag_denies() {
        let store = FakeGuardStore {
            feature: Ok(Some(false)),
            ..Default::default()
        };
        match gate(store).check("u1", Some("smart_trades")) {
            GuardDecision::Denied { reason } => assert!(reason.contains("smart_trades")),
            other => panic!("expected denial, got {:?}", other),
        }
    }

    #[test]
    fn undefined_feature_flag_allows() {
        let store = FakeGuardStore::default();
        assert_eq!(gate(store).check("u1", Some("unknown")), GuardDecision::Allowed);
    }

    #[test]
    fn lookup_failures_fail_open() {
        let store = FakeGuardStore {
            kill_switch: Err(ExecutionError::new(ErrorKind::DatabaseError)),
            user_status: Err(ExecutionError::new(ErrorKind::DatabaseError)),
            feature: Err(ExecutionError::new(ErrorKind::DatabaseError)),
        };
        assert_eq!(gate(store).check("u1", Some("any")), GuardDecision::Allowed);
    }
}
