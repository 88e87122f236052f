// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! Persisted procedure records and the WAL payload that carries them.
//!
//! Every record is a full snapshot of the procedure, so replay only ever
//! needs the latest one per id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProcedureResult;
use crate::id::ProcedureId;
use crate::state::{ProcedureFailure, ProcedureState};

/// Durable view of one procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureRecord {
    /// Procedure identity.
    pub id: ProcedureId,
    /// Type tag used to find a loader on recovery.
    pub type_name: String,
    /// Current lifecycle state.
    pub state: ProcedureState,
    /// Procedure dump as of the last persisted step.
    pub data: Value,
    /// Steps whose progress has been persisted.
    pub step: u32,
    /// Retries made so far.
    pub retry_count: u32,
    /// Final output, set on `Completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Cause, set on `Failed` and while `Retrying`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ProcedureFailure>,
    /// When the record was produced.
    pub updated_at: DateTime<Utc>,
}

impl ProcedureRecord {
    /// A fresh `Pending` record.
    pub fn pending(id: ProcedureId, type_name: impl Into<String>, data: Value) -> Self {
        Self {
            id,
            type_name: type_name.into(),
            state: ProcedureState::Pending,
            data,
            step: 0,
            retry_count: 0,
            output: None,
            failure: None,
            updated_at: Utc::now(),
        }
    }

    /// Copy of this record moved to `state`, stamped now.
    pub fn with_state(&self, state: ProcedureState) -> Self {
        Self {
            state,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }
}

/// What a single WAL entry written by the procedure store holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogRecord {
    /// The procedure moved to `record.state`.
    Transition { record: ProcedureRecord },
    /// Step progress persisted without a state change.
    Progress { record: ProcedureRecord },
    /// Every live procedure at the time of writing. Replay restarts here.
    Checkpoint { records: Vec<ProcedureRecord> },
}

impl LogRecord {
    /// Serialize to WAL payload bytes.
    pub fn encode(&self) -> ProcedureResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse WAL payload bytes.
    pub fn decode(bytes: &[u8]) -> ProcedureResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Whether this entry records a state transition.
    pub fn is_transition(&self) -> bool {
        matches!(self, Self::Transition { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_survives_encoding() {
        let mut record =
            ProcedureRecord::pending(ProcedureId::new(), "create_table", json!({ "table": "t1" }))
                .with_state(ProcedureState::Retrying);
        record.retry_count = 2;
        record.failure = Some(ProcedureFailure::Step {
            message: "region busy".into(),
        });

        let bytes = LogRecord::Transition {
            record: record.clone(),
        }
        .encode()
        .unwrap();
        let LogRecord::Transition { record: decoded } = LogRecord::decode(&bytes).unwrap() else {
            panic!("Expected a transition record");
        };

        assert_eq!(decoded.id, record.id);
        assert_eq!(decoded.type_name, "create_table");
        assert_eq!(decoded.state, ProcedureState::Retrying);
        assert_eq!(decoded.retry_count, 2);
        assert_eq!(decoded.data, json!({ "table": "t1" }));
        assert_eq!(decoded.failure, record.failure);
    }

    #[test]
    fn test_payload_is_tagged_json() {
        let record = ProcedureRecord::pending(ProcedureId::new(), "noop", Value::Null);
        let bytes = LogRecord::Progress { record }.encode().unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["type"], "progress");
        assert_eq!(value["record"]["state"], "pending");
        assert!(value["record"].get("output").is_none());
    }

    #[test]
    fn test_garbage_payload_rejected() {
        assert!(LogRecord::decode(b"\x00\x01not json").is_err());
    }
}
