//! Core data model.
//!
//! A work item is one unit of backlog: a stable id (usually a file path),
//! a category for filtering and reporting, a priority tier, and a lifecycle
//! status. Workers are the process identities that claim items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// A unit of work tracked by the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Stable identifier derived from the work source. Immutable.
    pub id: ItemId,

    /// Grouping label used for claim filters and reporting. Immutable.
    pub category: String,

    /// Claim ordering. Only external reclassification changes it.
    pub priority_tier: PriorityTier,

    /// Current lifecycle status.
    pub status: Status,

    /// Worker holding the item. Set only while `status` is `InProgress`.
    pub owner: Option<String>,

    /// When the current owner claimed the item. Set and cleared with `owner`.
    pub claimed_at: Option<DateTime<Utc>>,

    pub completed_at: Option<DateTime<Utc>>,

    /// Worker that finished the item, kept for attribution after `owner` clears.
    pub completed_by: Option<String>,

    /// Failures so far. Reaching the configured maximum makes the item `Failed`.
    pub retry_count: u32,

    /// Diagnostic from the most recent failure. Survives permanent failure.
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Newtype for work item IDs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Ordinal priority used to order claim candidates. Most urgent sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    Urgent,
    Normal,
    Low,
}

impl PriorityTier {
    /// Storage rank. Lower ranks are claimed first.
    pub fn rank(self) -> i64 {
        match self {
            PriorityTier::Urgent => 0,
            PriorityTier::Normal => 1,
            PriorityTier::Low => 2,
        }
    }

    pub fn from_rank(rank: i64) -> Result<Self> {
        match rank {
            0 => Ok(PriorityTier::Urgent),
            1 => Ok(PriorityTier::Normal),
            2 => Ok(PriorityTier::Low),
            _ => Err(Error::Other(format!("unknown priority rank: {rank}"))),
        }
    }

    pub const ALL: [PriorityTier; 3] = [PriorityTier::Urgent, PriorityTier::Normal, PriorityTier::Low];
}

impl std::fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PriorityTier::Urgent => "urgent",
            PriorityTier::Normal => "normal",
            PriorityTier::Low => "low",
        };
        f.pad(s)
    }
}

impl std::str::FromStr for PriorityTier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "urgent" | "high" => Ok(PriorityTier::Urgent),
            "normal" | "medium" => Ok(PriorityTier::Normal),
            "low" => Ok(PriorityTier::Low),
            _ => Err(Error::Other(format!("unknown priority tier: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a work item.
///
/// `Pending -> InProgress` happens only through the claim compare-and-swap.
/// `InProgress` returns to `Pending` on a retryable failure or a stale-claim
/// reset, and ends in `Completed` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Waiting for a worker.
    Pending,
    /// Held by exactly one worker.
    InProgress,
    /// Done successfully. Terminal.
    Completed,
    /// Exhausted retries. Terminal.
    Failed,
}

impl Status {
    pub const ALL: [Status; 4] = [
        Status::Pending,
        Status::InProgress,
        Status::Completed,
        Status::Failed,
    ];

    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: Status) -> bool {
        use Status::*;
        matches!(
            (self, to),
            (Pending, InProgress)
                | (InProgress, Pending)     // retryable failure or stale reset
                | (InProgress, Completed)
                | (InProgress, Failed)
        )
    }

    /// Is this a terminal state?
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::InProgress => "in_progress",
            Status::Completed => "completed",
            Status::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Status::Pending),
            "in_progress" => Ok(Status::InProgress),
            "completed" => Ok(Status::Completed),
            "failed" => Ok(Status::Failed),
            _ => Err(Error::Other(format!("unknown status: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// A worker process identity and its running counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub id: String,
    pub status: WorkerStatus,
    pub current_item: Option<ItemId>,
    pub processed_count: u64,
    pub failed_count: u64,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Working,
}

impl WorkerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerStatus::Idle => "idle",
            WorkerStatus::Working => "working",
        }
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for WorkerStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "idle" => Ok(WorkerStatus::Idle),
            "working" => Ok(WorkerStatus::Working),
            _ => Err(Error::Other(format!("unknown worker status: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

/// Append-only note describing an external side effect on a work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRecord {
    pub id: i64,
    pub item_id: ItemId,
    pub worker_id: String,
    pub source: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// An audit entry supplied with a completion, before it is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Where the side effect came from (e.g., "docs-index", "rag").
    pub source: String,
    pub description: String,
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// What a worker reports when it finishes with a claimed item.
#[derive(Debug, Clone, Default)]
pub struct Outcome {
    pub(crate) error: Option<String>,
    pub(crate) reclassify: Option<PriorityTier>,
    pub(crate) audit: Vec<AuditEntry>,
}

impl Outcome {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// New priority tier produced by the work. Applied only on success.
    pub fn reclassify(mut self, tier: PriorityTier) -> Self {
        self.reclassify = Some(tier);
        self
    }

    pub fn audit(mut self, source: impl Into<String>, description: impl Into<String>) -> Self {
        self.audit.push(AuditEntry {
            source: source.into(),
            description: description.into(),
        });
        self
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Where a reported item ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Completion {
    Completed,
    /// Back in the pending pool for any worker to reclaim.
    Retrying { retry_count: u32 },
    /// Retries exhausted. The item will never be claimed again.
    PermanentlyFailed { retry_count: u32 },
}

/// Result of registering an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Inserted,
    /// Already tracked; nothing was changed.
    AlreadyExists,
}
