//! Per-workflow ordered event bus.
//!
//! One `broadcast` channel per workflow, same shape as the host's
//! `EventBus`/`StreamHub`, with a bounded ring buffer plus an append-only
//! durable log for persistent events so a subscriber that reconnects after
//! the ring evicted its requested `seq` can still replay from the log.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use orc_types::event::{EventDraft, WorkflowEvent};
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventBusError {
    #[error("workflow {0} has no active event channel")]
    UnknownWorkflow(String),
    #[error("requested seq {requested} predates the retained window (earliest retained {earliest})")]
    SeqEvicted { requested: u64, earliest: u64 },
}

#[derive(Debug, Clone)]
pub struct EventBusConfig {
    pub ring_size: usize,
    pub heartbeat_interval: Duration,
    pub subscriber_lag_threshold: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            ring_size: 256,
            heartbeat_interval: Duration::from_secs(15),
            subscriber_lag_threshold: 512,
        }
    }
}

struct WorkflowChannel {
    tx: broadcast::Sender<WorkflowEvent>,
    ring: VecDeque<WorkflowEvent>,
    ring_capacity: usize,
    /// Append-only record of persistent events (spec §4.2). Stands in for
    /// the durable log a real deployment would back with a relational
    /// store; out of scope here per the narrow-repository-interface rule.
    durable_log: Vec<WorkflowEvent>,
    next_seq: u64,
    last_activity: Instant,
    closed: bool,
}

impl WorkflowChannel {
    fn new(ring_capacity: usize, broadcast_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(broadcast_capacity);
        Self {
            tx,
            ring: VecDeque::with_capacity(ring_capacity),
            ring_capacity,
            durable_log: Vec::new(),
            next_seq: 1,
            last_activity: Instant::now(),
            closed: false,
        }
    }

    fn earliest_ring_seq(&self) -> Option<u64> {
        self.ring.front().map(|event| event.seq)
    }
}

/// A replayed backlog followed by a live feed. `backlog` is delivered first
/// and in order; `live` continues from wherever the bus is once the backlog
/// is drained, so callers should buffer or interleave carefully if strict
/// ordering across the seam matters to them.
#[derive(Debug)]
pub struct EventStream {
    pub backlog: Vec<WorkflowEvent>,
    pub live: broadcast::Receiver<WorkflowEvent>,
}

pub struct EventBus {
    config: EventBusConfig,
    channels: RwLock<HashMap<String, WorkflowChannel>>,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        Self {
            config,
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Publishes an event, assigning it the next dense `seq` for this
    /// workflow. Creates the channel lazily on first publish.
    pub async fn publish(&self, workflow_id: &str, draft: EventDraft) -> WorkflowEvent {
        let mut channels = self.channels.write().await;
        let channel = channels
            .entry(workflow_id.to_string())
            .or_insert_with(|| WorkflowChannel::new(self.config.ring_size, self.config.ring_size.max(16)));

        let event = draft.into_event(workflow_id, channel.next_seq);
        channel.next_seq += 1;
        channel.last_activity = Instant::now();

        if event.persistent {
            channel.durable_log.push(event.clone());
        }
        if channel.ring.len() == channel.ring_capacity {
            channel.ring.pop_front();
        }
        channel.ring.push_back(event.clone());

        // A lagging/detached subscriber surfaces as `RecvError::Lagged` on
        // its next `recv`; reconnecting with `from_seq = last_delivered_seq
        // + 1` is the caller's responsibility, matching broadcast's own
        // backpressure semantics instead of us tracking per-subscriber lag.
        let _ = channel.tx.send(event.clone());
        event
    }

    /// Subscribes to a workflow's stream, optionally replaying from
    /// `from_seq` onward using the ring buffer or, if evicted, the durable
    /// log.
    pub async fn subscribe(
        &self,
        workflow_id: &str,
        from_seq: Option<u64>,
    ) -> Result<EventStream, EventBusError> {
        let mut channels = self.channels.write().await;
        let channel = channels
            .entry(workflow_id.to_string())
            .or_insert_with(|| WorkflowChannel::new(self.config.ring_size, self.config.ring_size.max(16)));

        let live = channel.tx.subscribe();
        let backlog = match from_seq {
            None => Vec::new(),
            Some(from) => {
                if let Some(earliest_ring) = channel.earliest_ring_seq() {
                    if from >= earliest_ring {
                        channel
                            .ring
                            .iter()
                            .filter(|event| event.seq >= from)
                            .cloned()
                            .collect()
                    } else {
                        let earliest_log = channel.durable_log.first().map(|event| event.seq);
                        match earliest_log {
                            Some(earliest) if from >= earliest => channel
                                .durable_log
                                .iter()
                                .filter(|event| event.seq >= from)
                                .cloned()
                                .collect(),
                            Some(earliest) => {
                                return Err(EventBusError::SeqEvicted { requested: from, earliest })
                            }
                            None => Vec::new(),
                        }
                    }
                } else {
                    Vec::new()
                }
            }
        };

        Ok(EventStream { backlog, live })
    }

    /// Marks a workflow closed; late publishes are still accepted (the
    /// workflow may emit a terminal event after requesting close) but no
    /// new heartbeats are due.
    pub async fn close(&self, workflow_id: &str) {
        if let Some(channel) = self.channels.write().await.get_mut(workflow_id) {
            channel.closed = true;
        }
    }

    /// Returns a heartbeat draft if the workflow has been idle past the
    /// configured interval, so intermediaries relaying the stream don't
    /// drop the connection. Callers are expected to poll this and publish
    /// the result themselves.
    pub async fn heartbeat_due(&self, workflow_id: &str) -> bool {
        let channels = self.channels.read().await;
        match channels.get(workflow_id) {
            Some(channel) if !channel.closed => {
                channel.last_activity.elapsed() >= self.config.heartbeat_interval
            }
            _ => false,
        }
    }

    pub async fn last_seq(&self, workflow_id: &str) -> Option<u64> {
        self.channels
            .read()
            .await
            .get(workflow_id)
            .map(|channel| channel.next_seq.saturating_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orc_types::event::EventType;

    fn draft(event_type: EventType) -> EventDraft {
        EventDraft::new(event_type)
    }

    #[tokio::test]
    async fn seq_is_monotone_and_dense_per_workflow() {
        let bus = EventBus::new(EventBusConfig::default());
        let e1 = bus.publish("wf-1", draft(EventType::WorkflowStarted)).await;
        let e2 = bus.publish("wf-1", draft(EventType::AgentStarted)).await;
        let e3 = bus.publish("wf-1", draft(EventType::WorkflowCompleted)).await;
        assert_eq!([e1.seq, e2.seq, e3.seq], [1, 2, 3]);
    }

    #[tokio::test]
    async fn independent_workflows_do_not_share_sequence() {
        let bus = EventBus::new(EventBusConfig::default());
        bus.publish("wf-1", draft(EventType::WorkflowStarted)).await;
        let first_of_other = bus.publish("wf-2", draft(EventType::WorkflowStarted)).await;
        assert_eq!(first_of_other.seq, 1);
    }

    #[tokio::test]
    async fn subscribe_from_seq_replays_ring_contents() {
        let bus = EventBus::new(EventBusConfig::default());
        for _ in 0..5 {
            bus.publish("wf-1", draft(EventType::AgentProgress)).await;
        }
        let stream = bus.subscribe("wf-1", Some(3)).await.unwrap();
        let seqs: Vec<u64> = stream.backlog.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn evicted_ring_falls_back_to_durable_log_for_persistent_events() {
        let bus = EventBus::new(EventBusConfig {
            ring_size: 2,
            ..EventBusConfig::default()
        });
        // Persistent events so the durable log retains them past ring eviction.
        bus.publish("wf-1", draft(EventType::WorkflowStarted)).await;
        bus.publish("wf-1", draft(EventType::AgentStarted)).await;
        bus.publish("wf-1", draft(EventType::AgentCompleted)).await;
        bus.publish("wf-1", draft(EventType::WorkflowCompleted)).await;

        // Ring (capacity 2) now only holds seq 3 and 4; seq 1 was evicted.
        let stream = bus.subscribe("wf-1", Some(1)).await.unwrap();
        let seqs: Vec<u64> = stream.backlog.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn seq_evicted_from_both_ring_and_log_is_an_error() {
        let bus = EventBus::new(EventBusConfig {
            ring_size: 1,
            ..EventBusConfig::default()
        });
        // Ephemeral events never reach the durable log.
        for _ in 0..3 {
            bus.publish("wf-1", draft(EventType::AgentProgress)).await;
        }
        let err = bus.subscribe("wf-1", Some(1)).await.unwrap_err();
        assert!(matches!(err, EventBusError::SeqEvicted { .. }));
    }

    #[tokio::test]
    async fn heartbeat_due_after_interval_elapses() {
        let bus = EventBus::new(EventBusConfig {
            heartbeat_interval: Duration::from_millis(1),
            ..EventBusConfig::default()
        });
        bus.publish("wf-1", draft(EventType::WorkflowStarted)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(bus.heartbeat_due("wf-1").await);
    }
}
