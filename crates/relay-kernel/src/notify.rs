use relay_contracts::Status;

/// State change emitted by the registry after it commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Created { id: String },
    Superseded { id: String },
    Evicted { id: String },
    Decided { id: String, status: Status },
    Expired { id: String },
    Removed { id: String },
}

impl Change {
    pub fn id(&self) -> &str {
        match self {
            Change::Created { id }
            | Change::Superseded { id }
            | Change::Evicted { id }
            | Change::Decided { id, .. }
            | Change::Expired { id }
            | Change::Removed { id } => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Change::Created { .. } => "created",
            Change::Superseded { .. } => "superseded",
            Change::Evicted { .. } => "evicted",
            Change::Decided { .. } => "decided",
            Change::Expired { .. } => "expired",
            Change::Removed { .. } => "removed",
        }
    }

    /// Status the record holds after the change, if it still exists.
    pub fn status(&self) -> Option<Status> {
        match self {
            Change::Created { .. } => Some(Status::Pending),
            Change::Superseded { .. } => Some(Status::Cancelled),
            Change::Decided { status, .. } => Some(*status),
            Change::Expired { .. } => Some(Status::Expired),
            Change::Evicted { .. } | Change::Removed { .. } => None,
        }
    }
}

/// Observer hook. Called while the registry is still locked, so
/// implementations must not block or call back into the registry.
pub trait ChangeSink: Send + Sync {
    fn publish(&self, change: Change);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ChangeSink for NoopSink {
    fn publish(&self, _change: Change) {}
}
