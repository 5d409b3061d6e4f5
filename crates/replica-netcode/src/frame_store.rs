//! Frame buffering and resimulation
//!
//! The client never trusts its own working tree across ticks. Every tick
//! it starts over from the last authoritative snapshot and replays every
//! frame the server has not acknowledged yet, in id order:
//!
//! ```text
//! snapshot ──▶ frame 4 ──▶ frame 5 ──▶ frame 6 ──▶ predicted tree
//!              (replayed)  (replayed)  (new)
//! ```
//!
//! When a snapshot arrives with `highestProcessedMessage = 5`, frames 4 and
//! 5 are pruned and the next tick replays frame 6 onward on top of the new
//! truth. No explicit rollback or diffing is needed.

use crate::{AuthoritativeSnapshot, Frame, IdSequence, InputQueue, InputRecord};
use replica_core::{SessionId, StateMutator, StateTree};
use std::collections::VecDeque;
use tracing::{debug, trace};

/// What an authoritative snapshot did to the buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckReport {
    /// Frames removed from the buffer
    pub pruned_frames: usize,
    /// Unacknowledged inputs moved back to the pending queue
    pub salvaged_inputs: usize,
    /// Acknowledged inputs dropped from pending input and surviving frames
    pub dropped_inputs: usize,
    /// The snapshot was older than one already applied and was ignored
    pub stale: bool,
}

/// Client-side frame buffer for one session
#[derive(Debug)]
pub struct FrameStore {
    session: SessionId,
    ids: IdSequence,
    /// Last authoritative tree; the restart point for every replay
    authoritative: StateTree,
    /// Buffered frames, ascending by id
    frames: VecDeque<Frame>,
    /// Inputs captured since the last frame was opened
    pending: InputQueue,
    /// Highest input id the server has acknowledged
    highest_acknowledged: u64,
}

impl FrameStore {
    /// Create a store starting from an initial authoritative tree
    pub fn new(session: SessionId, snapshot: StateTree, ids: IdSequence) -> Self {
        Self {
            session,
            ids,
            authoritative: snapshot,
            frames: VecDeque::new(),
            pending: InputQueue::new(),
            highest_acknowledged: 0,
        }
    }

    /// The session this store predicts
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// The id sequence shared with input capture
    pub fn ids(&self) -> &IdSequence {
        &self.ids
    }

    /// Queue an input for the next frame
    pub fn capture_input(&mut self, record: InputRecord) {
        trace!(session = %self.session, id = record.id, "input captured");
        self.pending.push(record);
    }

    /// Open a new frame carrying every pending input
    pub fn begin_tick(&mut self, delta: f64) -> &Frame {
        let frame = Frame::new(self.ids.next_id(), delta, self.pending.drain());
        trace!(
            session = %self.session,
            id = frame.id,
            inputs = frame.input.len(),
            "frame opened"
        );
        self.frames.push_back(frame);
        let last = self.frames.len() - 1;
        &self.frames[last]
    }

    /// Fold the buffered frames over a copy of the authoritative tree
    ///
    /// `step` receives the tree produced so far and the next frame, and
    /// returns the tree after that frame. The result depends only on the
    /// snapshot, the buffered frames and `step`.
    pub fn replay<F>(&self, step: F) -> StateTree
    where
        F: FnMut(StateTree, &Frame) -> StateTree,
    {
        self.frames.iter().fold(self.authoritative.clone(), step)
    }

    /// Open a frame for this tick, then rebuild the working tree
    ///
    /// The mutator's tree for this session is reset to the authoritative
    /// snapshot and every buffered frame is replayed through `run_hooks`,
    /// which receives the frame's inputs and delta and writes its results
    /// through the mutator.
    pub fn process<F>(&mut self, mutator: &mut StateMutator, delta: f64, mut run_hooks: F)
    where
        F: FnMut(&mut StateMutator, &[InputRecord], f64),
    {
        self.begin_tick(delta);

        let session = self.session;
        let predicted = self.replay(|tree, frame| {
            mutator.replace(session, tree);
            run_hooks(mutator, &frame.input, frame.delta);
            mutator.state(session).cloned().unwrap_or_default()
        });
        mutator.replace(session, predicted);

        debug!(
            session = %session,
            frames = self.frames.len(),
            delta,
            "resimulated from authoritative snapshot"
        );
    }

    /// Adopt a new authoritative tree and prune what it acknowledges
    ///
    /// The tree replaces the current snapshot outright. Frames with an id at
    /// or below `highest_processed_message` are pruned; their inputs above
    /// the marker are put back at the front of the pending queue. Inputs at
    /// or below the marker are already part of the snapshot and are dropped
    /// wherever they are still queued.
    ///
    /// A snapshot whose marker is lower than one already applied arrived
    /// out of order and is ignored.
    pub fn on_authoritative_snapshot(
        &mut self,
        snapshot: StateTree,
        highest_processed_message: u64,
    ) -> AckReport {
        if highest_processed_message < self.highest_acknowledged {
            debug!(
                session = %self.session,
                highest_processed_message,
                highest_acknowledged = self.highest_acknowledged,
                "ignoring stale snapshot"
            );
            return AckReport {
                stale: true,
                ..AckReport::default()
            };
        }

        self.authoritative = snapshot;
        self.highest_acknowledged = highest_processed_message;
        let marker = highest_processed_message;

        let mut report = AckReport::default();
        let mut salvaged = Vec::new();
        while let Some(frame) = self.frames.front() {
            if !frame.is_acknowledged(marker) {
                break;
            }
            if let Some(frame) = self.frames.pop_front() {
                report.pruned_frames += 1;
                for record in frame.input {
                    if record.id > marker {
                        salvaged.push(record);
                    } else {
                        report.dropped_inputs += 1;
                    }
                }
            }
        }

        for frame in &mut self.frames {
            let before = frame.input.len();
            frame.input.retain(|record| record.id > marker);
            report.dropped_inputs += before - frame.input.len();
        }
        report.dropped_inputs += self.pending.acknowledge(marker);

        report.salvaged_inputs = salvaged.len();
        self.pending.requeue_front(salvaged);

        if report.pruned_frames > 0 || report.salvaged_inputs > 0 {
            debug!(
                session = %self.session,
                marker,
                pruned = report.pruned_frames,
                salvaged = report.salvaged_inputs,
                remaining = self.frames.len(),
                "pruned acknowledged frames"
            );
        }
        report
    }

    /// Adopt an inbound snapshot message
    pub fn apply_snapshot(&mut self, message: AuthoritativeSnapshot) -> AckReport {
        self.on_authoritative_snapshot(message.game_state, message.highest_processed_message)
    }

    /// The most recently opened frame
    pub fn current(&self) -> Option<&Frame> {
        self.frames.back()
    }

    /// Buffered frames, oldest first
    pub fn frames(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }

    /// Number of buffered frames
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Check if no frames are buffered
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Inputs waiting for the next frame
    pub fn pending_input(&self) -> &InputQueue {
        &self.pending
    }

    /// Ids of every input the server has not acknowledged yet
    pub fn unacknowledged_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .frames
            .iter()
            .flat_map(|frame| frame.input.iter().map(|record| record.id))
            .chain(self.pending.ids())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Highest input id acknowledged so far
    pub fn highest_acknowledged(&self) -> u64 {
        self.highest_acknowledged
    }

    /// The current authoritative tree
    pub fn authoritative(&self) -> &StateTree {
        &self.authoritative
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SaveRef;
    use replica_core::{Merger, Path, Value};

    const SESSION: SessionId = SessionId(1);

    fn setup(initial: StateTree) -> (FrameStore, StateMutator) {
        let mut mutator = StateMutator::new(Merger::new());
        mutator.insert_session(SESSION, initial.clone());
        (FrameStore::new(SESSION, initial, IdSequence::new()), mutator)
    }

    fn count(mutator: &StateMutator) -> i64 {
        mutator
            .get(SESSION, &Path::parse("count").unwrap())
            .and_then(Value::as_int)
            .unwrap_or_default()
    }

    /// On-tick logic: `count += 1000`, plus `count += n` for each input `{add: n}`
    fn run_hooks(mutator: &mut StateMutator, input: &[InputRecord], _delta: f64) {
        for record in input {
            let add = record.raw_data.get("add").and_then(Value::as_int).unwrap_or(0);
            let next = count(mutator) + add;
            mutator.apply(SESSION, ("count", next));
        }
        let next = count(mutator) + 1000;
        mutator.apply(SESSION, ("count", next));
    }

    /// Input-only logic, no per-tick drift
    fn run_inputs(mutator: &mut StateMutator, input: &[InputRecord], _delta: f64) {
        for record in input {
            let add = record.raw_data.get("add").and_then(Value::as_int).unwrap_or(0);
            let next = count(mutator) + add;
            mutator.apply(SESSION, ("count", next));
        }
    }

    fn input(id: u64, add: i64) -> InputRecord {
        InputRecord::new(id, "p1", Value::map([("add", add)]), SaveRef::new(SESSION, "arena"))
    }

    #[test]
    fn test_process_resimulates_every_tick() {
        let (mut store, mut mutator) = setup(StateTree::from_entries([("count", 0)]));

        store.process(&mut mutator, 0.1, run_hooks);
        assert_eq!(store.current().map(|f| f.id), Some(1));
        assert_eq!(count(&mutator), 1000);

        store.process(&mut mutator, 0.1, run_hooks);
        assert_eq!(store.current().map(|f| f.id), Some(2));
        assert_eq!(count(&mutator), 2000);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_replays_on_top_of_new_truth() {
        let (mut store, mut mutator) = setup(StateTree::from_entries([("count", 0)]));
        for _ in 0..4 {
            store.process(&mut mutator, 0.1, run_hooks);
        }
        assert_eq!(count(&mutator), 4000);

        let report = store.on_authoritative_snapshot(StateTree::from_entries([("count", 100)]), 3);
        assert_eq!(report.pruned_frames, 3);
        assert_eq!(store.len(), 1);

        store.process(&mut mutator, 0.1, run_hooks);
        let since_ack = store.frames().filter(|f| f.id > 3).count() as i64;
        assert_eq!(since_ack, 2);
        assert_eq!(count(&mutator), 100 + 1000 * since_ack);
    }

    #[test]
    fn test_predicted_input_applied_on_snapshot() {
        let (mut store, mut mutator) = setup(StateTree::from_entries([("count", 0)]));
        for _ in 0..3 {
            store.process(&mut mutator, 0.1, run_inputs);
        }
        let id = store.ids().next_id();
        assert_eq!(id, 4);
        store.capture_input(input(id, 1));
        store.process(&mut mutator, 0.1, run_inputs);
        assert_eq!(count(&mutator), 1);

        store.on_authoritative_snapshot(StateTree::from_entries([("count", 100)]), 3);
        store.process(&mut mutator, 0.1, run_inputs);
        assert_eq!(count(&mutator), 101);
    }

    #[test]
    fn test_replay_is_idempotent() {
        let (mut store, mut mutator) = setup(StateTree::from_entries([("count", 0)]));
        store.capture_input(input(50, 7));
        store.process(&mut mutator, 0.1, run_inputs);
        let first = mutator.state(SESSION).cloned().unwrap();

        store.process(&mut mutator, 0.1, run_inputs);
        let second = mutator.state(SESSION).cloned().unwrap();
        assert_eq!(first, second);
        assert_eq!(count(&mutator), 7);

        let pure = |tree: StateTree, frame: &Frame| {
            let mut scratch = StateMutator::default();
            scratch.insert_session(SESSION, tree);
            run_inputs(&mut scratch, &frame.input, frame.delta);
            scratch.state(SESSION).cloned().unwrap_or_default()
        };
        assert_eq!(store.replay(pure), store.replay(pure));
        assert_eq!(store.replay(pure), second);
    }

    #[test]
    fn test_authoritative_snapshot_untouched_by_replay() {
        let initial = StateTree::from_entries([("count", 0)]);
        let (mut store, mut mutator) = setup(initial.clone());
        store.process(&mut mutator, 0.1, run_hooks);
        store.process(&mut mutator, 0.1, run_hooks);
        assert_eq!(store.authoritative(), &initial);
    }

    #[test]
    fn test_pruning_is_monotonic() {
        let (mut store, mut mutator) = setup(StateTree::from_entries([("count", 0)]));
        for _ in 0..6 {
            store.begin_tick(0.016);
        }
        store.process(&mut mutator, 0.016, run_inputs);

        let mut sizes = vec![store.len()];
        for marker in [0, 2, 2, 5, 5, 7] {
            store.on_authoritative_snapshot(StateTree::new(), marker);
            sizes.push(store.len());
        }
        assert!(sizes.windows(2).all(|pair| pair[1] <= pair[0]), "{:?}", sizes);
        assert!(store.is_empty());
    }

    #[test]
    fn test_stale_snapshot_ignored() {
        let (mut store, _) = setup(StateTree::from_entries([("count", 0)]));
        for _ in 0..4 {
            store.begin_tick(0.1);
        }
        store.on_authoritative_snapshot(StateTree::from_entries([("count", 30)]), 3);
        let report = store.on_authoritative_snapshot(StateTree::from_entries([("count", 10)]), 2);

        assert!(report.stale);
        assert_eq!(store.len(), 1);
        assert_eq!(store.highest_acknowledged(), 3);
        assert_eq!(
            store.authoritative(),
            &StateTree::from_entries([("count", 30)])
        );

        let again = store.on_authoritative_snapshot(StateTree::from_entries([("count", 40)]), 3);
        assert!(!again.stale);
        assert_eq!(again.pruned_frames, 0);
        assert_eq!(
            store.authoritative(),
            &StateTree::from_entries([("count", 40)])
        );
    }

    #[test]
    fn test_unacknowledged_input_salvaged() {
        let (mut store, _) = setup(StateTree::new());
        store.capture_input(input(10, 1));
        store.capture_input(input(11, 1));
        store.begin_tick(0.1);
        store.capture_input(input(12, 1));

        let report = store.on_authoritative_snapshot(StateTree::new(), 1);
        assert_eq!(report.pruned_frames, 1);
        assert_eq!(report.salvaged_inputs, 2);
        assert_eq!(
            store.pending_input().ids().collect::<Vec<_>>(),
            vec![10, 11, 12]
        );

        let frame = store.begin_tick(0.1);
        assert_eq!(frame.input.len(), 3);
    }

    #[test]
    fn test_acknowledged_input_dropped() {
        let (mut store, _) = setup(StateTree::new());
        let ids = store.ids().clone();
        store.capture_input(input(ids.next_id(), 1));
        store.begin_tick(0.1);
        store.capture_input(input(ids.next_id(), 1));
        store.capture_input(input(ids.next_id(), 1));
        assert_eq!(store.unacknowledged_ids(), vec![1, 3, 4]);

        let report = store.on_authoritative_snapshot(StateTree::new(), 3);
        assert_eq!(report.pruned_frames, 1);
        assert_eq!(report.salvaged_inputs, 0);
        assert_eq!(report.dropped_inputs, 2);
        assert_eq!(store.unacknowledged_ids(), vec![4]);
    }

    #[test]
    fn test_apply_snapshot_message() {
        let (mut store, _) = setup(StateTree::new());
        store.begin_tick(0.1);
        let message = AuthoritativeSnapshot::new(7, StateTree::from_entries([("count", 5)]), 1);
        let report = store.apply_snapshot(message);
        assert_eq!(report.pruned_frames, 1);
        assert!(store.current().is_none());
    }
}
