use serde::Serialize;

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatusRecord {
    pub ceiling: usize,
    /// Sessions currently running a request.
    pub in_use: usize,
    /// Open sessions waiting for work.
    pub free: usize,
    /// Logical requests waiting for a session.
    pub pending: usize,
    /// Sessions opened over the pool's lifetime.
    pub created: usize,
}

/// Advisory telemetry published by a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    Open { ceiling: usize },
    Debug(String),
    Status(PoolStatusRecord),
    Error(String),
}
