//! Consumer group runner.
//!
//! ```text
//! Idle → Joining → Consuming ─┐
//!          ▲                  │ rebalance / session error
//!          └──────────────────┘
//! (any) → Draining → Closed     on cancellation or SIGINT/SIGTERM
//! ```
//!
//! Every record is handled the same way: decode the envelope, resolve the
//! writer schema, decode the payload, map to a [`DomainEvent`], hand it to the
//! sink. A failure at any step is logged with replay context and the record is
//! skipped. The offset is marked either way, so one bad record never stalls a
//! partition.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use eventline_events::{DomainEvent, EventMapper, EventSink};

use super::shutdown::signal_if;
use crate::codec;
use crate::log::{ConsumedRecord, ConsumerGroup, GroupSession, LogError};
use crate::schema::SchemaResolver;

pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(250);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunnerState {
    Idle,
    Joining,
    Consuming,
    Draining,
    Closed,
}

impl core::fmt::Display for RunnerState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            RunnerState::Idle => "idle",
            RunnerState::Joining => "joining",
            RunnerState::Consuming => "consuming",
            RunnerState::Draining => "draining",
            RunnerState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("runner already started")]
    AlreadyStarted,

    #[error("closing consumer group failed: {0}")]
    Close(LogError),

    #[error("runner task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub topic: String,
    /// Race SIGINT/SIGTERM against the cancellation token.
    pub listen_for_signals: bool,
    /// Cooldown after the first failed join; doubles up to `max_backoff`.
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RunnerConfig {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            listen_for_signals: true,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }

    pub fn without_signals(mut self) -> Self {
        self.listen_for_signals = false;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }
}

/// Counters since the runner was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunnerStats {
    pub received: u64,
    pub delivered: u64,
    pub malformed: u64,
    pub undecodable: u64,
    pub unmapped: u64,
    pub sink_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    delivered: AtomicU64,
    malformed: AtomicU64,
    undecodable: AtomicU64,
    unmapped: AtomicU64,
    sink_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RunnerStats {
        RunnerStats {
            received: self.received.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            undecodable: self.undecodable.load(Ordering::Relaxed),
            unmapped: self.unmapped.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
        }
    }
}

enum SessionEnd {
    Cancelled,
    /// Generation ended; `processed` records were handled in it.
    Rebalanced { processed: u64 },
    Failed,
}

pub struct ConsumerGroupRunner {
    group: Arc<dyn ConsumerGroup>,
    resolver: Arc<SchemaResolver>,
    mapper: EventMapper,
    sink: Arc<dyn EventSink>,
    config: RunnerConfig,
    state: watch::Sender<RunnerState>,
    counters: Counters,
    started: AtomicBool,
    closed: AtomicBool,
}

impl core::fmt::Debug for ConsumerGroupRunner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConsumerGroupRunner")
            .field("group", &self.group.group_id())
            .field("topic", &self.config.topic)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ConsumerGroupRunner {
    pub fn new(
        group: Arc<dyn ConsumerGroup>,
        resolver: Arc<SchemaResolver>,
        mapper: EventMapper,
        sink: Arc<dyn EventSink>,
        config: RunnerConfig,
    ) -> Self {
        let (state, _) = watch::channel(RunnerState::Idle);
        Self {
            group,
            resolver,
            mapper,
            sink,
            config,
            state,
            counters: Counters::default(),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> RunnerState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<RunnerState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> RunnerStats {
        self.counters.snapshot()
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run until `cancel` fires (or a termination signal arrives, if enabled),
    /// then drain and close the group.
    ///
    /// Returns only once the group is closed. A runner can be started once.
    pub async fn start(&self, cancel: CancellationToken) -> Result<(), ConsumerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ConsumerError::AlreadyStarted);
        }

        let stop = cancel.child_token();
        let membership = self.membership_loop(stop.clone());
        tokio::pin!(membership);

        let finished = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(group = self.group.group_id(), "consumer cancelled");
                false
            }
            signal = signal_if(self.config.listen_for_signals) => {
                info!(group = self.group.group_id(), signal, "termination signal received");
                false
            }
            _ = &mut membership => true,
        };

        self.set_state(RunnerState::Draining);
        stop.cancel();
        if !finished {
            // Lets the in-flight record finish; the loop then sees `stop`.
            membership.await;
        }

        let closed = self.close_group().await;
        self.set_state(RunnerState::Closed);
        info!(group = self.group.group_id(), stats = ?self.stats(), "consumer closed");
        closed
    }

    /// Start on a background task.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> RunnerHandle {
        let token = cancel.clone();
        let join = tokio::spawn(async move { self.start(token).await });
        RunnerHandle { cancel, join }
    }

    async fn close_group(&self) -> Result<(), ConsumerError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.group.close().await.map_err(ConsumerError::Close)
    }

    fn set_state(&self, next: RunnerState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(group = self.group.group_id(), from = %previous, to = %next, "runner state");
        }
    }

    async fn membership_loop(&self, stop: CancellationToken) {
        let topic = self.config.topic.as_str();
        let mut backoff = self.config.initial_backoff;
        let mut empty_sessions = 0u32;

        loop {
            if stop.is_cancelled() {
                return;
            }
            self.set_state(RunnerState::Joining);

            let joined = tokio::select! {
                biased;
                _ = stop.cancelled() => return,
                joined = self.group.join(topic) => joined,
            };

            let end = match joined {
                Ok(session) => {
                    info!(group = self.group.group_id(), topic, "joined consumer group");
                    self.set_state(RunnerState::Consuming);
                    self.consume_session(session, &stop).await
                }
                Err(LogError::Closed) => {
                    info!(group = self.group.group_id(), "consumer group closed; leaving");
                    return;
                }
                Err(err) => {
                    warn!(group = self.group.group_id(), topic, error = %err, "join failed");
                    SessionEnd::Failed
                }
            };

            let cooldown = match end {
                SessionEnd::Cancelled => return,
                SessionEnd::Rebalanced { processed } if processed > 0 => {
                    empty_sessions = 0;
                    backoff = self.config.initial_backoff;
                    None
                }
                // A generation that ends before delivering anything twice in a
                // row is churn, not progress.
                SessionEnd::Rebalanced { .. } => {
                    empty_sessions += 1;
                    (empty_sessions > 1).then_some(self.config.initial_backoff)
                }
                SessionEnd::Failed => {
                    let wait = backoff;
                    backoff = (backoff * 2).min(self.config.max_backoff);
                    Some(wait)
                }
            };

            match cooldown {
                Some(wait) => {
                    debug!(group = self.group.group_id(), wait_ms = wait.as_millis() as u64, "rejoin cooldown");
                    tokio::select! {
                        biased;
                        _ = stop.cancelled() => return,
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
                None => debug!(group = self.group.group_id(), "rebalanced; rejoining"),
            }
        }
    }

    async fn consume_session(
        &self,
        mut session: Box<dyn GroupSession>,
        stop: &CancellationToken,
    ) -> SessionEnd {
        let mut processed = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = stop.cancelled() => return SessionEnd::Cancelled,
                next = session.next_record() => next,
            };

            let record = match next {
                Some(Ok(record)) => record,
                Some(Err(err)) => {
                    error!(group = self.group.group_id(), error = %err, "consume failed; rejoining");
                    return SessionEnd::Failed;
                }
                None => return SessionEnd::Rebalanced { processed },
            };

            self.process(&record).await;
            processed += 1;

            if let Err(err) = session.mark_consumed(&record) {
                warn!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    error = %err,
                    "failed to mark offset"
                );
            }
        }
    }

    async fn process(&self, record: &ConsumedRecord) {
        Counters::bump(&self.counters.received);
        let raw_len = record.payload.len();

        let (schema_id, payload) = match codec::decode(&record.payload) {
            Ok(parts) => parts,
            Err(err) => {
                Counters::bump(&self.counters.malformed);
                warn!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    raw_len,
                    error = %err,
                    "skipping malformed envelope"
                );
                return;
            }
        };

        let native = match self.resolver.decode_payload(schema_id, payload).await {
            Ok(native) => native,
            Err(err) => {
                Counters::bump(&self.counters.undecodable);
                warn!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    raw_len,
                    schema_id,
                    error = %err,
                    "skipping undecodable record"
                );
                return;
            }
        };

        let event = match self.mapper.map(&native) {
            Ok(event) => event,
            Err(err) => {
                Counters::bump(&self.counters.unmapped);
                warn!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    raw_len,
                    schema_id,
                    error = %err,
                    "skipping unmappable record"
                );
                return;
            }
        };

        self.deliver(record, &event).await;
    }

    async fn deliver(&self, record: &ConsumedRecord, event: &DomainEvent) {
        match self.sink.deliver(event).await {
            Ok(()) => {
                Counters::bump(&self.counters.delivered);
                debug!(
                    partition = record.partition,
                    offset = record.offset,
                    event_id = %event.id(),
                    event_type = event.event_type(),
                    "event delivered"
                );
            }
            Err(err) => {
                Counters::bump(&self.counters.sink_failures);
                error!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    event_id = %event.id(),
                    sink = self.sink.name(),
                    error = %err,
                    "sink delivery failed; offset still committed"
                );
            }
        }
    }
}

/// Handle to a runner started with [`ConsumerGroupRunner::spawn`].
#[derive(Debug)]
pub struct RunnerHandle {
    cancel: CancellationToken,
    join: JoinHandle<Result<(), ConsumerError>>,
}

impl RunnerHandle {
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Request shutdown and wait for the runner to close.
    pub async fn shutdown(self) -> Result<(), ConsumerError> {
        self.cancel.cancel();
        self.wait().await
    }

    /// Wait for the runner to stop on its own (signal or external cancel).
    pub async fn wait(self) -> Result<(), ConsumerError> {
        self.join
            .await
            .map_err(|e| ConsumerError::Task(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{InMemoryLog, LogProducer, OutboundRecord};
    use crate::schema::fixtures::NOTIFICATION_V1;
    use crate::schema::{InMemorySchemaRegistry, SchemaHandle};
    use eventline_events::NativeRecord;
    use eventline_events::testing::{FailingSink, RecordingSink};

    const TOPIC: &str = "notifications";

    struct Fixture {
        log: InMemoryLog,
        resolver: Arc<SchemaResolver>,
        schema: SchemaHandle,
    }

    async fn fixture() -> Fixture {
        let registry = Arc::new(InMemorySchemaRegistry::new());
        let resolver = Arc::new(SchemaResolver::new(registry));
        let schema = resolver
            .register_or_reuse("notifications-value", NOTIFICATION_V1)
            .await
            .unwrap();
        Fixture {
            log: InMemoryLog::with_partitions(1),
            resolver,
            schema,
        }
    }

    impl Fixture {
        fn runner(&self, sink: Arc<dyn EventSink>) -> Arc<ConsumerGroupRunner> {
            Arc::new(ConsumerGroupRunner::new(
                Arc::new(self.log.consumer_group("g")),
                self.resolver.clone(),
                EventMapper::default(),
                sink,
                RunnerConfig::new(TOPIC)
                    .without_signals()
                    .with_backoff(Duration::from_millis(10), Duration::from_millis(40)),
            ))
        }

        async fn publish(&self, id: &str) {
            let record = NativeRecord::new()
                .with("id", id)
                .with("type", "CREATED")
                .with("timestamp", 1_000_i64);
            let bytes = self.schema.encode(&record).unwrap();
            self.log
                .send(OutboundRecord::new(TOPIC, id.as_bytes(), bytes))
                .await
                .unwrap();
        }
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met in time");
    }

    #[tokio::test]
    async fn already_cancelled_never_joins() {
        let fx = fixture().await;
        let runner = fx.runner(Arc::new(RecordingSink::new()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), runner.start(cancel))
            .await
            .expect("returns promptly")
            .unwrap();

        assert_eq!(runner.state(), RunnerState::Closed);
        assert_eq!(fx.log.member_count("g"), 0);
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let fx = fixture().await;
        let runner = fx.runner(Arc::new(RecordingSink::new()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        runner.start(cancel.clone()).await.unwrap();
        assert!(matches!(runner.start(cancel).await, Err(ConsumerError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn delivers_and_walks_state_machine() {
        let fx = fixture().await;
        let sink = Arc::new(RecordingSink::new());
        let runner = fx.runner(sink.clone());
        let mut states = runner.subscribe_state();

        let handle = runner.clone().spawn(CancellationToken::new());
        fx.publish("o1").await;

        eventually(|| sink.ids() == vec!["o1".to_string()]).await;
        assert_eq!(runner.state(), RunnerState::Consuming);
        assert!(states.has_changed().unwrap());

        handle.shutdown().await.unwrap();
        assert_eq!(runner.state(), RunnerState::Closed);
        assert_eq!(fx.log.committed_offset("g", TOPIC, 0), Some(1));
        assert_eq!(fx.log.member_count("g"), 0);
    }

    #[tokio::test]
    async fn sink_failure_still_marks_offset() {
        let fx = fixture().await;
        let runner = fx.runner(Arc::new(FailingSink::new("down")));
        let handle = runner.clone().spawn(CancellationToken::new());

        fx.publish("o1").await;
        fx.publish("o2").await;

        eventually(|| runner.stats().sink_failures == 2).await;
        handle.shutdown().await.unwrap();

        assert_eq!(fx.log.committed_offset("g", TOPIC, 0), Some(2));
        assert_eq!(runner.stats().delivered, 0);
    }

    #[tokio::test]
    async fn retries_join_until_the_broker_answers() {
        let fx = fixture().await;
        fx.log.fail_next_joins(3);
        let sink = Arc::new(RecordingSink::new());
        let runner = fx.runner(sink.clone());
        let handle = runner.clone().spawn(CancellationToken::new());

        fx.publish("o1").await;
        eventually(|| sink.ids().len() == 1).await;
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn cancel_during_join_cooldown() {
        let fx = fixture().await;
        fx.log.fail_next_joins(usize::MAX);
        let runner = fx.runner(Arc::new(RecordingSink::new()));
        let handle = runner.clone().spawn(CancellationToken::new());

        tokio::time::sleep(Duration::from_millis(30)).await;
        tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
            .await
            .expect("drains promptly")
            .unwrap();
        assert_eq!(runner.state(), RunnerState::Closed);
    }

    #[tokio::test]
    async fn externally_closed_group_ends_the_loop() {
        let fx = fixture().await;
        let group = Arc::new(fx.log.consumer_group("g"));
        group.close().await.unwrap();

        let runner = ConsumerGroupRunner::new(
            group,
            fx.resolver.clone(),
            EventMapper::default(),
            Arc::new(RecordingSink::new()),
            RunnerConfig::new(TOPIC).without_signals(),
        );

        tokio::time::timeout(Duration::from_secs(1), runner.start(CancellationToken::new()))
            .await
            .expect("loop ends on its own")
            .unwrap();
        assert_eq!(runner.state(), RunnerState::Closed);
    }

    #[test]
    fn backoff_max_never_below_initial() {
        let config = RunnerConfig::new("t").with_backoff(Duration::from_secs(2), Duration::from_secs(1));
        assert_eq!(config.max_backoff, Duration::from_secs(2));
        assert!(RunnerConfig::new("t").listen_for_signals);
    }
}
