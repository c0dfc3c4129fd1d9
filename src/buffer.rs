//! Per-service ingestion queues.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::VecDeque;

use crate::config::OverflowPolicy;
use crate::error::AppError;
use crate::models::LogEntry;

/// Longest accepted service name, in characters
pub const MAX_SERVICE_NAME_LEN: usize = 100;

/// Result of a successful enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueReceipt {
    pub accepted: usize,
    /// Oldest entries evicted to make room (drop-oldest policy only)
    pub dropped: usize,
    /// The call created the queue
    pub newly_registered: bool,
}

/// Bounded FIFO queue per service, sharded by service name.
pub struct IngestionBuffer {
    queues: DashMap<String, VecDeque<LogEntry>>,
    capacity: usize,
    policy: OverflowPolicy,
}

/// Trimmed service name, or a validation error
pub fn validate_service_name(service: &str) -> Result<&str, AppError> {
    let name = service.trim();
    if name.is_empty() {
        return Err(AppError::ValidationError("Service name must not be empty".to_string()));
    }
    if name.chars().count() > MAX_SERVICE_NAME_LEN {
        return Err(AppError::ValidationError(format!(
            "Service name longer than {} characters",
            MAX_SERVICE_NAME_LEN
        )));
    }
    Ok(name)
}

impl IngestionBuffer {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            queues: DashMap::new(),
            capacity,
            policy,
        }
    }

    /// Append `entries` to the service's queue in arrival order.
    ///
    /// Nothing is enqueued when the call is rejected. `on_register` runs when
    /// the call creates the queue, while the queue's entry is still locked.
    pub fn enqueue<F>(
        &self,
        service: &str,
        entries: Vec<LogEntry>,
        on_register: F,
    ) -> Result<EnqueueReceipt, AppError>
    where
        F: FnOnce(&str),
    {
        let name = validate_service_name(service)?;
        if entries.is_empty() {
            return Err(AppError::ValidationError("Empty log batch".to_string()));
        }
        if entries.len() > self.capacity {
            return Err(AppError::ValidationError(format!(
                "Batch of {} entries exceeds queue capacity {}",
                entries.len(),
                self.capacity
            )));
        }

        let mut newly_registered = false;
        let mut queue = self.queues.entry(name.to_string()).or_insert_with(|| {
            on_register(name);
            newly_registered = true;
            VecDeque::new()
        });

        let overflow = (queue.len() + entries.len()).saturating_sub(self.capacity);
        let mut dropped = 0;
        if overflow > 0 {
            match self.policy {
                OverflowPolicy::Reject => {
                    return Err(AppError::QueueFull {
                        service: name.to_string(),
                        capacity: self.capacity,
                    });
                }
                OverflowPolicy::DropOldest => {
                    queue.drain(..overflow);
                    dropped = overflow;
                }
            }
        }

        let accepted = entries.len();
        queue.extend(entries);

        Ok(EnqueueReceipt {
            accepted,
            dropped,
            newly_registered,
        })
    }

    /// Pop up to `max` entries from the front of the service's queue
    pub fn drain(&self, service: &str, max: usize) -> Vec<LogEntry> {
        match self.queues.get_mut(service) {
            Some(mut queue) => {
                let n = queue.len().min(max);
                queue.drain(..n).collect()
            }
            None => Vec::new(),
        }
    }

    pub fn depth(&self, service: &str) -> usize {
        self.queues.get(service).map(|q| q.len()).unwrap_or(0)
    }

    pub fn total_depth(&self) -> usize {
        self.queues.iter().map(|q| q.len()).sum()
    }

    /// Create an empty queue; returns false when it already existed.
    ///
    /// `on_register` runs on creation, under the entry lock.
    pub fn register<F: FnOnce(&str)>(&self, service: &str, on_register: F) -> bool {
        let mut created = false;
        self.queues.entry(service.to_string()).or_insert_with(|| {
            on_register(service);
            created = true;
            VecDeque::new()
        });
        created
    }

    /// Drop the queue and everything in it; returns the number of discarded entries.
    ///
    /// `on_remove` always runs, under the entry lock, so state tied to the
    /// queue goes away atomically with it.
    pub fn unregister<F: FnOnce(&str)>(&self, service: &str, on_remove: F) -> Option<usize> {
        let entry = self.queues.entry(service.to_string());
        on_remove(service);
        match entry {
            Entry::Occupied(queue) => Some(queue.remove().len()),
            Entry::Vacant(_) => None,
        }
    }

    pub fn contains(&self, service: &str) -> bool {
        self.queues.contains_key(service)
    }

    /// Registered services, sorted
    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
