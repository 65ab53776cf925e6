//! Best-effort scalar cache, string key to string value.
//!
//! The shell stores view state here (selected row, panel sizes). No
//! invariants beyond last-write-wins; it is intentionally outside
//! [`clear_all_data`](super::gateway::StoreGateway::clear_all_data).

use rusqlite::OptionalExtension;

use crate::error::{StoreError, StoreResult};
use crate::store::gateway::StoreGateway;

impl StoreGateway {
    pub async fn set_pref(&self, key: &str, value: &str) -> StoreResult<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO prefs (key, value) VALUES (?1, ?2)",
                [&key, &value],
            )
            .map_err(|e| pref_failed("set_pref", e))?;
            Ok(())
        })
        .await
    }

    pub async fn get_pref(&self, key: &str) -> StoreResult<Option<String>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.query_row("SELECT value FROM prefs WHERE key = ?1", [&key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|e| pref_failed("get_pref", e))
        })
        .await
    }

    pub async fn remove_pref(&self, key: &str) -> StoreResult<()> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM prefs WHERE key = ?1", [&key])
                .map_err(|e| pref_failed("remove_pref", e))?;
            Ok(())
        })
        .await
    }
}

fn pref_failed(op: &'static str, err: rusqlite::Error) -> StoreError {
    StoreError::OperationFailed {
        op,
        message: format!("store 'prefs': {err}"),
    }
}
