//! PostgreSQL storage for workflows and executions.
//!
//! [`PgStore`] implements the scheduler's store traits:
//! - Workflows keep their graph, trigger, settings and audit log as JSONB
//! - Executions carry a `version` for optimistic saves and a
//!   `claimed_until` lease for polling

mod execution;
mod workflow;

use sqlx::PgPool;
use waypoint_scheduler::StoreError;

/// Workflow and execution store backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Creates a new store.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn backend(error: sqlx::Error) -> StoreError {
    StoreError::Backend {
        reason: error.to_string(),
    }
}

fn corrupt(id: &str, reason: impl ToString) -> StoreError {
    StoreError::Corrupt {
        id: id.to_string(),
        reason: reason.to_string(),
    }
}

fn to_json<T: serde::Serialize + ?Sized>(
    id: &str,
    value: &T,
) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(value).map_err(|e| corrupt(id, e))
}

fn from_json<T: serde::de::DeserializeOwned>(
    id: &str,
    value: serde_json::Value,
) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|e| corrupt(id, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slices_encode_as_arrays() {
        let entries: &[u32] = &[1, 2];
        assert_eq!(to_json("wf", entries).unwrap(), serde_json::json!([1, 2]));
    }
}
