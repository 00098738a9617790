//! Out-of-band request queue: priority first, then FIFO by enqueue time

use crate::routing::types::{ExecuteOptions, McpRequestContext, Response};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tokio::sync::oneshot;

/// A request waiting for the drain loop
#[derive(Debug)]
pub struct QueuedRequest {
    pub method: String,
    pub params: Value,
    pub context: McpRequestContext,
    pub options: ExecuteOptions,
    pub priority: i32,
    pub enqueued_at: DateTime<Utc>,
    sequence: u64,
    pub responder: oneshot::Sender<Response>,
}

impl PartialEq for QueuedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for QueuedRequest {}

impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedRequest {
    // Max-heap: higher priority first, then lower sequence first
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Bounded priority queue
#[derive(Debug)]
pub struct RequestQueue {
    heap: BinaryHeap<QueuedRequest>,
    max_size: usize,
    next_sequence: u64,
    closed: bool,
}

/// Why a request was not queued
#[derive(Debug)]
pub enum Rejected {
    Full(oneshot::Sender<Response>),
    Closed(oneshot::Sender<Response>),
}

impl RequestQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            heap: BinaryHeap::new(),
            max_size,
            next_sequence: 0,
            closed: false,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn push(
        &mut self,
        method: &str,
        params: Value,
        context: McpRequestContext,
        options: ExecuteOptions,
        priority: i32,
        now: DateTime<Utc>,
        responder: oneshot::Sender<Response>,
    ) -> std::result::Result<(), Rejected> {
        if self.closed {
            return Err(Rejected::Closed(responder));
        }
        if self.heap.len() >= self.max_size {
            return Err(Rejected::Full(responder));
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(QueuedRequest {
            method: method.to_string(),
            params,
            context,
            options,
            priority,
            enqueued_at: now,
            sequence,
            responder,
        });
        Ok(())
    }

    /// Remove up to `batch_size` requests in service order
    pub fn drain_batch(&mut self, batch_size: usize) -> Vec<QueuedRequest> {
        let mut batch = Vec::with_capacity(batch_size.min(self.heap.len()));
        while batch.len() < batch_size {
            match self.heap.pop() {
                Some(request) => batch.push(request),
                None => break,
            }
        }
        batch
    }

    /// Stop accepting new work; queued requests remain drainable
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}
