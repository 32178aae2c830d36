//! Admission queue: priority first, arrival sequence second.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use conduit_core::{Event, HubError};
use tokio::sync::oneshot;

use crate::report::DeliveryReport;

pub(crate) type ReportSender = oneshot::Sender<Result<DeliveryReport, HubError>>;

/// An event waiting for dispatch.
pub(crate) struct Queued {
    pub event: Event,
    pub sequence: u64,
    /// Present when the producer awaits the delivery report.
    pub reply: Option<ReportSender>,
}

impl Queued {
    /// Tell an awaiting producer its event will never be dispatched.
    pub fn drop_undelivered(self) {
        if let Some(reply) = self.reply {
            let _ = reply.send(Err(HubError::Dropped {
                event_id: self.event.id.to_string(),
            }));
        }
    }
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    // BinaryHeap pops the greatest element: higher priority wins, then the
    // lower (earlier) sequence number.
    fn cmp(&self, other: &Self) -> Ordering {
        self.event
            .priority
            .cmp(&other.event.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Bounded priority queue. Sequence numbers are assigned under the same
/// guard that admits the event, so they are strictly increasing in
/// admission order.
pub(crate) struct AdmissionQueue {
    heap: BinaryHeap<Queued>,
    capacity: usize,
    next_sequence: u64,
}

impl AdmissionQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::new(),
            capacity,
            next_sequence: 0,
        }
    }

    pub fn admit(&mut self, event: Event, reply: Option<ReportSender>) -> Result<u64, HubError> {
        if self.heap.len() >= self.capacity {
            return Err(HubError::QueueFull {
                capacity: self.capacity,
            });
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(Queued {
            event,
            sequence,
            reply,
        });
        Ok(sequence)
    }

    pub fn pop(&mut self) -> Option<Queued> {
        self.heap.pop()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn drain(&mut self) -> Vec<Queued> {
        self.heap.drain().collect()
    }
}
