//! In-process partitioned log with consumer-group semantics.
//!
//! Good enough to run the whole pipeline without a broker:
//!
//! - topics are created on first use with a fixed partition count
//! - keyed records are routed with the Kafka partitioner
//! - each group tracks members, a generation and committed offsets
//! - partitions are assigned round-robin over the sorted member list
//! - a membership change bumps the generation, ending every open session
//!
//! Sessions resume from the group's committed offsets, so anything delivered
//! but not marked before a rebalance is delivered again.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use super::{
    ConsumedRecord, ConsumerGroup, GroupSession, LogError, LogProducer, OutboundRecord,
    RecordPosition, compute_partition,
};

pub const DEFAULT_PARTITIONS: i32 = 3;

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Option<Vec<u8>>,
    payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct GroupState {
    generation: u64,
    members: BTreeSet<u64>,
    /// Next offset to read, per (topic, partition).
    committed: HashMap<(String, i32), i64>,
}

#[derive(Debug, Default)]
struct State {
    topics: HashMap<String, Vec<Vec<StoredRecord>>>,
    groups: HashMap<String, GroupState>,
    failing_joins: usize,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<State>,
    changed: watch::Sender<u64>,
    partitions: i32,
    next_member: AtomicU64,
}

/// Shared handle; clones see the same topics and groups.
#[derive(Debug, Clone)]
pub struct InMemoryLog {
    inner: Arc<Inner>,
}

impl Default for InMemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> LogError {
    LogError::Consume("log state poisoned".to_string())
}

impl InMemoryLog {
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_PARTITIONS)
    }

    /// Auto-created topics get `partitions` partitions.
    pub fn with_partitions(partitions: i32) -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                changed,
                partitions: partitions.max(1),
                next_member: AtomicU64::new(1),
            }),
        }
    }

    /// New member handle for `group_id`. Membership starts on `join`.
    pub fn consumer_group(&self, group_id: impl Into<String>) -> InMemoryConsumerGroup {
        InMemoryConsumerGroup {
            log: self.clone(),
            group_id: group_id.into(),
            member_id: self.inner.next_member.fetch_add(1, Ordering::SeqCst),
            closed: AtomicBool::new(false),
        }
    }

    /// Create `topic` with an explicit partition count. No-op if it exists.
    pub fn create_topic(&self, topic: &str, partitions: i32) {
        if let Ok(mut state) = self.lock() {
            state
                .topics
                .entry(topic.to_string())
                .or_insert_with(|| vec![Vec::new(); partitions.max(1) as usize]);
        }
    }

    /// Append raw bytes to a specific partition, bypassing the partitioner.
    pub fn append_raw(
        &self,
        topic: &str,
        partition: i32,
        key: Option<&[u8]>,
        payload: Vec<u8>,
    ) -> Result<RecordPosition, LogError> {
        let position = {
            let mut state = self.lock()?;
            let partitions = self.topic_mut(&mut state, topic);
            let log = partitions
                .get_mut(partition as usize)
                .ok_or_else(|| LogError::Publish(format!("{topic} has no partition {partition}")))?;
            log.push(StoredRecord {
                key: key.map(<[u8]>::to_vec),
                payload,
            });
            RecordPosition {
                partition,
                offset: log.len() as i64 - 1,
            }
        };
        self.notify();
        Ok(position)
    }

    /// Every record in `topic`, partition by partition.
    pub fn records(&self, topic: &str) -> Vec<ConsumedRecord> {
        let Ok(state) = self.lock() else {
            return Vec::new();
        };
        let Some(partitions) = state.topics.get(topic) else {
            return Vec::new();
        };

        partitions
            .iter()
            .enumerate()
            .flat_map(|(p, log)| {
                log.iter().enumerate().map(move |(offset, r)| ConsumedRecord {
                    topic: topic.to_string(),
                    partition: p as i32,
                    offset: offset as i64,
                    key: r.key.clone(),
                    payload: r.payload.clone(),
                })
            })
            .collect()
    }

    /// Next offset `group_id` will read from `topic`/`partition`, if committed.
    pub fn committed_offset(&self, group_id: &str, topic: &str, partition: i32) -> Option<i64> {
        let state = self.lock().ok()?;
        state
            .groups
            .get(group_id)?
            .committed
            .get(&(topic.to_string(), partition))
            .copied()
    }

    /// Sum of committed offsets across all partitions of `topic`.
    pub fn committed_total(&self, group_id: &str, topic: &str) -> i64 {
        let Ok(state) = self.lock() else {
            return 0;
        };
        state
            .groups
            .get(group_id)
            .map(|g| {
                g.committed
                    .iter()
                    .filter(|((t, _), _)| t == topic)
                    .map(|(_, offset)| *offset)
                    .sum()
            })
            .unwrap_or(0)
    }

    pub fn member_count(&self, group_id: &str) -> usize {
        self.lock()
            .ok()
            .and_then(|s| s.groups.get(group_id).map(|g| g.members.len()))
            .unwrap_or(0)
    }

    /// Make the next `n` joins (any group) fail with a connection error.
    pub fn fail_next_joins(&self, n: usize) {
        if let Ok(mut state) = self.lock() {
            state.failing_joins = n;
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, LogError> {
        self.inner.state.lock().map_err(|_| poisoned())
    }

    fn topic_mut<'s>(&self, state: &'s mut State, topic: &str) -> &'s mut Vec<Vec<StoredRecord>> {
        let partitions = self.inner.partitions as usize;
        state
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); partitions])
    }

    fn notify(&self) {
        self.inner.changed.send_modify(|v| *v = v.wrapping_add(1));
    }
}

#[async_trait]
impl LogProducer for InMemoryLog {
    async fn send(&self, record: OutboundRecord) -> Result<RecordPosition, LogError> {
        let partition = {
            let mut state = self.lock()?;
            let count = self.topic_mut(&mut state, &record.topic).len() as i32;
            compute_partition(&record.key, count)
        };
        self.append_raw(&record.topic, partition, Some(&record.key), record.payload)
    }

    async fn flush(&self) -> Result<(), LogError> {
        Ok(())
    }
}

/// One member of a consumer group on an [`InMemoryLog`].
#[derive(Debug)]
pub struct InMemoryConsumerGroup {
    log: InMemoryLog,
    group_id: String,
    member_id: u64,
    closed: AtomicBool,
}

impl InMemoryConsumerGroup {
    pub fn member_id(&self) -> u64 {
        self.member_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConsumerGroup for InMemoryConsumerGroup {
    fn group_id(&self) -> &str {
        &self.group_id
    }

    async fn join(&self, topic: &str) -> Result<Box<dyn GroupSession>, LogError> {
        if self.is_closed() {
            return Err(LogError::Closed);
        }

        let (generation, rebalanced) = {
            let mut state = self.log.lock()?;
            if state.failing_joins > 0 {
                state.failing_joins -= 1;
                return Err(LogError::Connection("broker unavailable".to_string()));
            }

            self.log.topic_mut(&mut state, topic);
            let group = state.groups.entry(self.group_id.clone()).or_default();
            let rebalanced = group.members.insert(self.member_id);
            if rebalanced {
                group.generation += 1;
            }
            (group.generation, rebalanced)
        };

        if rebalanced {
            debug!(group = %self.group_id, member = self.member_id, generation, "member joined");
            self.log.notify();
        }

        Ok(Box::new(InMemorySession {
            log: self.log.clone(),
            changes: self.log.inner.changed.subscribe(),
            group_id: self.group_id.clone(),
            member_id: self.member_id,
            topic: topic.to_string(),
            generation,
            cursors: HashMap::new(),
            next_slot: 0,
        }))
    }

    async fn close(&self) -> Result<(), LogError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let left = {
            let mut state = self.log.lock()?;
            let Some(group) = state.groups.get_mut(&self.group_id) else {
                return Ok(());
            };
            let left = group.members.remove(&self.member_id);
            if left {
                group.generation += 1;
            }
            left
        };

        if left {
            debug!(group = %self.group_id, member = self.member_id, "member left");
            self.log.notify();
        }
        Ok(())
    }
}

struct InMemorySession {
    log: InMemoryLog,
    changes: watch::Receiver<u64>,
    group_id: String,
    member_id: u64,
    topic: String,
    generation: u64,
    /// Fetch position per assigned partition.
    cursors: HashMap<i32, i64>,
    next_slot: usize,
}

enum Poll {
    Ready(ConsumedRecord),
    Idle,
    Ended,
}

impl InMemorySession {
    fn poll(&mut self) -> Result<Poll, LogError> {
        let state = self.log.lock()?;
        let Some(group) = state.groups.get(&self.group_id) else {
            return Ok(Poll::Ended);
        };
        if group.generation != self.generation || !group.members.contains(&self.member_id) {
            return Ok(Poll::Ended);
        }
        let Some(partitions) = state.topics.get(&self.topic) else {
            return Ok(Poll::Idle);
        };

        let rank = group
            .members
            .iter()
            .position(|m| *m == self.member_id)
            .unwrap_or_default();
        let members = group.members.len();
        let assigned: Vec<i32> = (0..partitions.len())
            .filter(|p| p % members == rank)
            .map(|p| p as i32)
            .collect();
        if assigned.is_empty() {
            return Ok(Poll::Idle);
        }

        for step in 0..assigned.len() {
            let partition = assigned[(self.next_slot + step) % assigned.len()];
            let cursor = *self.cursors.entry(partition).or_insert_with(|| {
                group
                    .committed
                    .get(&(self.topic.clone(), partition))
                    .copied()
                    .unwrap_or(0)
            });

            if let Some(stored) = partitions[partition as usize].get(cursor as usize) {
                self.cursors.insert(partition, cursor + 1);
                self.next_slot = (self.next_slot + step + 1) % assigned.len();
                return Ok(Poll::Ready(ConsumedRecord {
                    topic: self.topic.clone(),
                    partition,
                    offset: cursor,
                    key: stored.key.clone(),
                    payload: stored.payload.clone(),
                }));
            }
        }

        Ok(Poll::Idle)
    }
}

#[async_trait]
impl GroupSession for InMemorySession {
    async fn next_record(&mut self) -> Option<Result<ConsumedRecord, LogError>> {
        loop {
            // Observe the version before polling so a concurrent append wakes us.
            self.changes.borrow_and_update();

            match self.poll() {
                Ok(Poll::Ready(record)) => return Some(Ok(record)),
                Ok(Poll::Ended) => return None,
                Ok(Poll::Idle) => {}
                Err(e) => return Some(Err(e)),
            }

            if self.changes.changed().await.is_err() {
                return None;
            }
        }
    }

    fn mark_consumed(&mut self, record: &ConsumedRecord) -> Result<(), LogError> {
        let mut state = self.log.lock()?;
        let group = state.groups.entry(self.group_id.clone()).or_default();
        let next = record.offset + 1;
        let committed = group
            .committed
            .entry((record.topic.clone(), record.partition))
            .or_insert(0);
        *committed = (*committed).max(next);
        Ok(())
    }
}
