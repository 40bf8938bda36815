use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEventKind {
    Created,
    Updated,
    Deleted,
}

/// Change notifications shared between views of the same backend.
///
/// Subscribers use these to refresh their own copies; the payload carries
/// identifiers only, never the changed record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    CostCenterChanged {
        id: Uuid,
        kind: LedgerEventKind,
    },
    JournalEntryChanged {
        id: Uuid,
        kind: LedgerEventKind,
    },
    ImportCompleted {
        model: String,
        status: String,
        successful_rows: u64,
        error_rows: u64,
        occurred_at: DateTime<Utc>,
    },
}

impl LedgerEvent {
    pub fn import_completed(
        model: impl Into<String>,
        status: impl Into<String>,
        successful_rows: u64,
        error_rows: u64,
    ) -> Self {
        Self::ImportCompleted {
            model: model.into(),
            status: status.into(),
            successful_rows,
            error_rows,
            occurred_at: Utc::now(),
        }
    }
}
