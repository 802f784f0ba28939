// src/infrastructure/guard.rs
// Read-only SQLite view over the externally-owned policy tables consulted
// by the guard gate.

use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Mutex;

use crate::domain::errors::ExecutionResult;
use crate::domain::repository::{GuardStore, UserTradingStatus};

const KILL_SWITCH_KEY: &str = "trading_kill_switch";

pub struct SqliteGuardStore {
    conn: Mutex<Connection>,
}

impl SqliteGuardStore {
    pub fn open(path: &str) -> ExecutionResult<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open(path)?),
        })
    }

    pub fn open_in_memory() -> ExecutionResult<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    /// Create the policy tables when they are absent. The tables belong to
    /// the admin surface; this exists for local development and tests.
    pub fn bootstrap(&self) -> ExecutionResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS platform_settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS user_trading_status (
                user_id TEXT PRIMARY KEY,
                enabled INTEGER NOT NULL,
                reason TEXT
            );
            CREATE TABLE IF NOT EXISTS feature_flags (
                flag_key TEXT PRIMARY KEY,
                enabled INTEGER NOT NULL
            );",
        )?;
        Ok(())
    }

    #[cfg(test)]
    fn set_setting(&self, key: &str, value: &str) {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO platform_settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )
        .unwrap();
    }
}

impl GuardStore for SqliteGuardStore {
    fn kill_switch_enabled(&self) -> ExecutionResult<bool> {
        let conn = self.conn.lock().unwrap();
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM platform_settings WHERE key = ?1",
                params![KILL_SWITCH_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(matches!(
            value.as_deref().map(str::to_lowercase).as_deref(),
            Some("true") | Some("1") | Some("on")
        ))
    }

    fn user_trading_status(&self, user_id: &str) -> ExecutionResult<Option<UserTradingStatus>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(i64, Option<String>)> = conn
            .query_row(
                "SELECT enabled, reason FROM user_trading_status WHERE user_id = ?1",
                params![user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row.map(|(enabled, reason)| UserTradingStatus {
            enabled: enabled != 0,
            reason,
        }))
    }

    fn feature_enabled(&self, key: &str) -> ExecutionResult<Option<bool>> {
        let conn = self.conn.lock().unwrap();
        let enabled: Option<i64> = conn
            .query_row(
                "SELECT enabled FROM feature_flags WHERE flag_key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(enabled.map(|e| e != 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteGuardStore {
        let store = SqliteGuardStore::open_in_memory().unwrap();
        store.bootstrap().unwrap();
        store
    }

    #[test]
    fn kill_switch_defaults_off() {
        assert!(!store().kill_switch_enabled().unwrap());
    }

    #[test]
    fn kill_switch_reads_truthy_values() {
        let s = store();
        s.set_setting(KILL_SWITCH_KEY, "true");
        assert!(s.kill_switch_enabled().unwrap());
        s.set_setting(KILL_SWITCH_KEY, "off");
        assert!(!s.kill_switch_enabled().unwrap());
        s.set_setting(KILL_SWITCH_KEY, "1");
        assert!(s.kill_switch_enabled().unwrap());
    }

    #[test]
    fn user_status_roundtrip() {
        let s = store();
        assert!(s.user_trading_status("u1").unwrap().is_none());

        {
            let conn = s.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO user_trading_status (user_id, enabled, reason) VALUES ('u1', 0, 'risk hold')",
                [],
            )
            .unwrap();
        }
        let status = s.user_trading_status("u1").unwrap().unwrap();
        assert!(!status.enabled);
        assert_eq!(status.reason.as_deref(), Some("risk hold"));
    }

    #[test]
    fn feature_flags_distinguish_undefined_from_disabled() {
        let s = store();
        assert_eq!(s.feature_enabled("smart_trades").unwrap(), None);

        {
            let conn = s.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO feature_flags (flag_key, enabled) VALUES ('smart_trades', 0)",
                [],
            )
            .unwrap();
        }
        assert_eq!(s.feature_enabled("smart_trades").unwrap(), Some(false));
    }

    #[test]
    fn missing_tables_surface_as_errors_for_fail_open_handling() {
        // No bootstrap: the policy tables do not exist, the lookup errors,
        // and the gate above treats that as Allowed.
        let s = SqliteGuardStore::open_in_memory().unwrap();
        assert!(s.kill_switch_enabled().is_err());
        assert!(s.user_trading_status("u1").is_err());
    }
}
