//! Pending Request Table
//!
//! One entry per in-flight call. Entries leave the table exactly once,
//! through [`PendingTable::settle`], [`PendingTable::reject_all`] or
//! [`PendingTable::sweep_stale`]; a second removal finds nothing and is a
//! no-op. Recently settled ids are remembered so late duplicates can be
//! recognised.

use super::error::TransportError;
use super::matcher::PendingView;
use super::timeout::{ProgressiveTimeout, TimeoutStep};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Completion handle for one request
pub type Responder = oneshot::Sender<Result<Value, TransportError>>;

/// One outstanding call
#[derive(Debug)]
pub struct PendingRequest {
    pub command: String,
    pub responder: Responder,
    pub timeout: ProgressiveTimeout,
    pub last_activity: Instant,
}

impl PendingRequest {
    pub fn new(command: impl Into<String>, responder: Responder, timeout: ProgressiveTimeout, now: Instant) -> Self {
        Self {
            command: command.into(),
            responder,
            timeout,
            last_activity: now,
        }
    }

    /// Instant from which the sweep measures idleness
    pub fn idle_since(&self) -> Instant {
        self.last_activity.max(self.timeout.deadline())
    }
}

/// Table of in-flight requests keyed by correlation id
#[derive(Debug)]
pub struct PendingTable {
    entries: HashMap<String, PendingRequest>,
    settled: VecDeque<String>,
    settled_index: HashSet<String>,
    settled_capacity: usize,
}

impl PendingTable {
    /// Create a table remembering up to `settled_capacity` settled ids
    pub fn new(settled_capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            settled: VecDeque::with_capacity(settled_capacity),
            settled_index: HashSet::with_capacity(settled_capacity),
            settled_capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Whether `id` was settled recently and is no longer pending
    pub fn is_settled(&self, id: &str) -> bool {
        self.settled_index.contains(id)
    }

    pub fn insert(&mut self, id: String, request: PendingRequest) {
        self.entries.insert(id, request);
    }

    /// Remove an entry without completing it (its responder is dropped)
    pub fn remove(&mut self, id: &str) -> Option<PendingRequest> {
        let request = self.entries.remove(id)?;
        self.remember(id);
        Some(request)
    }

    /// Complete the request `id` with `outcome`
    ///
    /// Returns `false` when the id is not pending; nothing happens then.
    pub fn settle(&mut self, id: &str, outcome: Result<Value, TransportError>) -> bool {
        match self.remove(id) {
            Some(request) => {
                // The caller may have stopped waiting; that is not an error here
                let _ = request.responder.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Record activity for `id`, pushing its timeout window out
    pub fn touch(&mut self, id: &str, now: Instant) -> bool {
        match self.entries.get_mut(id) {
            Some(request) => {
                request.last_activity = now;
                request.timeout.touch(now);
                true
            }
            None => false,
        }
    }

    /// Advance the timeout state machine of `id`; `None` when not pending
    pub fn poll_timeout(&mut self, id: &str, now: Instant) -> Option<TimeoutStep> {
        self.entries.get_mut(id).map(|request| request.timeout.poll(now))
    }

    /// Reject every pending request, emptying the table
    pub fn reject_all(&mut self, error: impl Fn(&PendingRequest) -> TransportError) -> usize {
        let ids: Vec<String> = self.entries.keys().cloned().collect();
        let mut rejected = 0;
        for id in ids {
            if let Some(request) = self.remove(&id) {
                let err = error(&request);
                let _ = request.responder.send(Err(err));
                rejected += 1;
            }
        }
        rejected
    }

    /// Reject requests idle for longer than `stale_after`
    ///
    /// Idle time counts from the later of the last activity and the current
    /// timeout deadline, so a request whose timeout is still running is never
    /// evicted. What remains are entries nobody polls any more.
    ///
    /// Returns the evicted ids and their commands.
    pub fn sweep_stale(&mut self, now: Instant, stale_after: Duration) -> Vec<(String, String)> {
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, request)| now.saturating_duration_since(request.idle_since()) > stale_after)
            .map(|(id, _)| id.clone())
            .collect();

        let mut evicted = Vec::with_capacity(stale.len());
        for id in stale {
            if let Some(request) = self.remove(&id) {
                let idle = now.saturating_duration_since(request.last_activity);
                let _ = request.responder.send(Err(TransportError::Stale {
                    command: request.command.clone(),
                    idle,
                }));
                evicted.push((id, request.command));
            }
        }
        evicted
    }

    /// Snapshot for the reply matchers
    pub fn views(&self) -> Vec<PendingView<'_>> {
        self.entries
            .iter()
            .map(|(id, request)| PendingView {
                id: id.as_str(),
                command: request.command.as_str(),
                last_activity: request.last_activity,
            })
            .collect()
    }

    fn remember(&mut self, id: &str) {
        if self.settled_capacity == 0 || self.settled_index.contains(id) {
            return;
        }
        if self.settled.len() >= self.settled_capacity {
            if let Some(oldest) = self.settled.pop_front() {
                self.settled_index.remove(&oldest);
            }
        }
        self.settled.push_back(id.to_string());
        self.settled_index.insert(id.to_string());
    }
}

#[cfg(test)]
#[path = "pending_test.rs"]
mod pending_test;
