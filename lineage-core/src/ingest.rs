use crate::backend::CommitEvent;
use crate::throttle::LosslessThrottle;
use graph::{GraphSnapshot, GraphStore};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Where the pipeline is within a fetch cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    Idle,
    Receiving { received: usize },
    Complete { len: usize },
}

/// Applies framed commit events to the graph store and publishes throttled
/// snapshots to subscribers.
///
/// A cycle works on a copy of the last complete store, so an aborted cycle
/// leaves the complete store untouched.
pub struct IngestionPipeline {
    /// Result of the last complete cycle
    store: GraphStore,
    /// Cycle in flight
    working: Option<GraphStore>,
    state: IngestState,
    throttle: LosslessThrottle<u64>,
    publisher: watch::Sender<Arc<GraphSnapshot>>,
}

impl IngestionPipeline {
    pub fn new(interval: Duration) -> Self {
        let (publisher, _) = watch::channel(Arc::new(GraphSnapshot::default()));
        Self {
            store: GraphStore::new(),
            working: None,
            state: IngestState::Idle,
            throttle: LosslessThrottle::new(interval),
            publisher,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<GraphSnapshot>> {
        self.publisher.subscribe()
    }

    /// Last published snapshot
    pub fn snapshot(&self) -> Arc<GraphSnapshot> {
        self.publisher.borrow().clone()
    }

    pub fn state(&self) -> IngestState {
        self.state
    }

    /// Store of the last complete cycle
    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn apply(&mut self, event: CommitEvent, now: Instant) {
        match event {
            CommitEvent::Start => {
                if matches!(self.state, IngestState::Receiving { .. }) {
                    tracing::debug!("restarting unfinished fetch cycle");
                }
                self.working = Some(self.store.clone());
                self.state = IngestState::Receiving { received: 0 };
            }
            CommitEvent::Update(record) => {
                let received = match self.state {
                    IngestState::Receiving { received } => received,
                    _ => {
                        tracing::warn!(id = %record.id, "commit update outside of a fetch cycle");
                        self.working = None;
                        0
                    }
                };
                let working = self.working.get_or_insert_with(|| self.store.clone());
                working.upsert_at(received, record);
                self.state = IngestState::Receiving {
                    received: received + 1,
                };
                self.notify(now);
            }
            CommitEvent::End => {
                let IngestState::Receiving { received } = self.state else {
                    tracing::warn!("fetch cycle end without a start");
                    return;
                };
                let mut working = self.working.take().unwrap_or_else(|| self.store.clone());
                working.truncate(received);
                self.store = working;
                self.state = IngestState::Complete { len: received };
                tracing::debug!(commits = received, "fetch cycle complete");
                self.notify(now);
            }
        }
    }

    /// Give up on the cycle in flight and show the last complete store again
    pub fn abort(&mut self, reason: &str) {
        if let IngestState::Receiving { received } = self.state {
            tracing::warn!(received, reason, "fetch cycle aborted");
        }
        self.working = None;
        self.state = IngestState::Idle;
        self.throttle.discard();
        self.publish();
    }

    /// Forget all commits, e.g. when another repository is opened
    pub fn reset(&mut self) {
        self.store = GraphStore::new();
        self.working = None;
        self.state = IngestState::Idle;
        self.throttle.discard();
        self.publish();
    }

    /// Publish the coalesced trailing snapshot if it is due
    pub fn poll(&mut self, now: Instant) {
        if self.throttle.poll(now).is_some() {
            self.publish();
        }
    }

    /// When `poll` has something to publish
    pub fn deadline(&self) -> Option<Instant> {
        self.throttle.deadline()
    }

    fn current(&self) -> &GraphStore {
        self.working.as_ref().unwrap_or(&self.store)
    }

    fn notify(&mut self, now: Instant) {
        let revision = self.current().revision();
        if self.throttle.offer(now, revision).is_some() {
            self.publish();
        }
    }

    fn publish(&self) {
        let snapshot = Arc::new(self.current().snapshot());
        tracing::trace!(revision = snapshot.revision(), commits = snapshot.len(), "publishing snapshot");
        self.publisher.send_replace(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph::CommitRecord;
    use pretty_assertions::assert_eq;

    const WINDOW: Duration = Duration::from_millis(30);

    fn update(id: &str, parents: &[&str], time: i64) -> CommitEvent {
        CommitEvent::Update(CommitRecord::new(
            id,
            parents.iter().map(|p| p.to_string()).collect(),
            time,
        ))
    }

    fn ids(snapshot: &GraphSnapshot) -> Vec<&str> {
        snapshot.order().iter().map(String::as_str).collect()
    }

    fn cycle(pipeline: &mut IngestionPipeline, events: Vec<CommitEvent>, now: Instant) {
        pipeline.apply(CommitEvent::Start, now);
        for event in events {
            pipeline.apply(event, now);
        }
        pipeline.apply(CommitEvent::End, now);
    }

    #[test]
    fn burst_is_published_once_window_elapses() {
        let mut pipeline = IngestionPipeline::new(WINDOW);
        let rx = pipeline.subscribe();
        let start = Instant::now();

        pipeline.apply(CommitEvent::Start, start);
        pipeline.apply(update("a", &["b"], 3), start);
        assert_eq!(ids(&rx.borrow()), vec!["a"]);

        for (offset, event) in [update("b", &["c"], 2), update("c", &[], 1)].into_iter().enumerate() {
            pipeline.apply(event, start + Duration::from_millis(offset as u64 + 1));
        }
        assert_eq!(ids(&rx.borrow()), vec!["a"]);
        assert_eq!(pipeline.deadline(), Some(start + WINDOW));

        pipeline.poll(start + WINDOW);
        assert_eq!(ids(&rx.borrow()), vec!["a", "b", "c"]);
        assert_eq!(pipeline.state(), IngestState::Receiving { received: 3 });
        assert_eq!(pipeline.deadline(), None);
    }

    #[test]
    fn final_state_survives_throttling() {
        let mut pipeline = IngestionPipeline::new(WINDOW);
        let start = Instant::now();
        cycle(
            &mut pipeline,
            vec![update("a", &["b"], 2), update("b", &[], 1)],
            start,
        );

        // the end of the cycle is still pending behind the first update
        pipeline.poll(start + WINDOW);
        let snapshot = pipeline.snapshot();
        assert_eq!(ids(&snapshot), vec!["a", "b"]);
        assert_eq!(snapshot.revision(), pipeline.store().revision());
        assert_eq!(pipeline.state(), IngestState::Complete { len: 2 });
    }

    #[test]
    fn end_truncates_shrunk_history() {
        let mut pipeline = IngestionPipeline::new(Duration::ZERO);
        let now = Instant::now();
        cycle(
            &mut pipeline,
            vec![update("x", &["a"], 3), update("a", &["b"], 2), update("b", &[], 1)],
            now,
        );
        cycle(&mut pipeline, vec![update("a", &["b"], 2), update("b", &[], 1)], now);

        let snapshot = pipeline.snapshot();
        assert_eq!(ids(&snapshot), vec!["a", "b"]);
        assert!(snapshot.get("x").is_none());
        assert_eq!(snapshot.get("a").unwrap().descendant_ids, Vec::<String>::new());
    }

    #[test]
    fn replay_yields_identical_snapshot() {
        let mut pipeline = IngestionPipeline::new(Duration::ZERO);
        let now = Instant::now();
        let events = vec![
            update("m", &["a", "b"], 4),
            update("a", &["r"], 3),
            update("b", &["r"], 2),
            update("r", &[], 1),
        ];
        cycle(&mut pipeline, events.clone(), now);
        let first = pipeline.snapshot();
        cycle(&mut pipeline, events, now);
        let second = pipeline.snapshot();

        assert_eq!(first.order(), second.order());
        assert_eq!(first.lookup(), second.lookup());
    }

    #[test]
    fn abort_restores_last_complete_snapshot() {
        let mut pipeline = IngestionPipeline::new(Duration::ZERO);
        let rx = pipeline.subscribe();
        let now = Instant::now();
        cycle(&mut pipeline, vec![update("a", &[], 1)], now);
        let complete = pipeline.snapshot();

        pipeline.apply(CommitEvent::Start, now);
        pipeline.apply(update("b", &["a"], 2), now);
        assert_eq!(ids(&rx.borrow()), vec!["b"]);

        pipeline.abort("backend went away");
        assert_eq!(pipeline.state(), IngestState::Idle);
        assert_eq!(ids(&rx.borrow()), vec!["a"]);
        assert_eq!(rx.borrow().revision(), complete.revision());
        assert!(pipeline.store().get("b").is_none());
        assert!(pipeline.store().get("a").unwrap().descendant_ids.is_empty());
    }

    #[test]
    fn restart_discards_unfinished_cycle() {
        let mut pipeline = IngestionPipeline::new(Duration::ZERO);
        let now = Instant::now();

        pipeline.apply(CommitEvent::Start, now);
        pipeline.apply(update("a", &["b"], 2), now);
        pipeline.apply(update("b", &[], 1), now);
        cycle(&mut pipeline, vec![update("b", &[], 1)], now);

        let snapshot = pipeline.snapshot();
        assert_eq!(ids(&snapshot), vec!["b"]);
        assert!(snapshot.get("a").is_none());
        assert!(snapshot.get("b").unwrap().descendant_ids.is_empty());
        assert_eq!(pipeline.state(), IngestState::Complete { len: 1 });
    }

    #[test]
    fn update_without_start_opens_a_cycle() {
        let mut pipeline = IngestionPipeline::new(Duration::ZERO);
        let now = Instant::now();
        pipeline.apply(update("a", &[], 1), now);
        assert_eq!(pipeline.state(), IngestState::Receiving { received: 1 });

        pipeline.apply(CommitEvent::End, now);
        assert_eq!(pipeline.state(), IngestState::Complete { len: 1 });
        // a stray end changes nothing
        pipeline.apply(CommitEvent::End, now);
        assert_eq!(pipeline.state(), IngestState::Complete { len: 1 });
    }

    #[test]
    fn reset_publishes_empty_graph() {
        let mut pipeline = IngestionPipeline::new(Duration::ZERO);
        let rx = pipeline.subscribe();
        cycle(&mut pipeline, vec![update("a", &[], 1)], Instant::now());
        pipeline.reset();
        assert!(rx.borrow().is_empty());
        assert!(pipeline.store().is_empty());
    }
}
