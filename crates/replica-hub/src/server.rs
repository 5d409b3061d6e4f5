//! Fixed-timestep authoritative loop
//!
//! The server samples the clock every time its timer fires and adds the
//! elapsed time to an accumulator. While the accumulator holds at least
//! one frame length, it runs one authoritative step for every session and
//! subtracts a frame length. Steps are never skipped: if the loop falls
//! behind, it runs back-to-back steps until it has caught up.
//!
//! One step, per session:
//! 1. skip the session if `session.paused`
//! 2. drain queued input through the input handlers and fold the newest
//!    input id or frame marker into `highest_processed_message`
//! 3. before-tick hooks
//! 4. on-tick hooks, unless `session.waitingForPlayers`
//! 5. after-tick hooks
//! 6. advance the tracker generation

use crate::session::{self, SessionFlags};
use crate::{Error, HookPipeline, Result, SchedulerConfig, Stage, TickContext};
use indexmap::IndexMap;
use replica_core::{MergeReport, Patch, SessionId, StateMutator, StateTree, Tracker};
use replica_netcode::{AuthoritativeSnapshot, InputMessage, InputQueue, InputRecord, SaveRef};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

#[derive(Debug)]
struct ServerSession {
    mode: String,
    inputs: InputQueue,
    /// Newest frame marker received, folded in at the next step
    frame_marker: u64,
    highest_processed_message: u64,
}

/// Authoritative scheduler for many concurrent sessions
#[derive(Debug)]
pub struct ServerLoop {
    config: SchedulerConfig,
    frame_length: Duration,
    mutator: StateMutator,
    tracker: Tracker,
    pipeline: HookPipeline,
    sessions: IndexMap<SessionId, ServerSession>,
    /// Last clock sample; `None` while stopped
    t0: Option<Instant>,
    accumulator: Duration,
    steps_run: u64,
    snapshots_sent: u64,
}

impl ServerLoop {
    /// Wire a loop from its collaborators
    pub fn new(config: SchedulerConfig, pipeline: HookPipeline, tracker: Tracker) -> Result<Self> {
        config.validate()?;
        let mutator = StateMutator::new(config.merger()?);
        Ok(Self {
            frame_length: config.frame_length(),
            config,
            mutator,
            tracker,
            pipeline,
            sessions: IndexMap::new(),
            t0: None,
            accumulator: Duration::ZERO,
            steps_run: 0,
            snapshots_sent: 0,
        })
    }

    /// Register a session with its initial tree
    ///
    /// The `session` namespace is filled in with the id and mode.
    pub fn add_session(&mut self, session: SessionId, mode: impl Into<String>, initial: StateTree) {
        let mode = mode.into();
        self.mutator
            .insert_session(session, session::stamp(initial, session, &mode));
        info!(%session, %mode, "session added");
        self.sessions.insert(
            session,
            ServerSession {
                mode,
                inputs: InputQueue::new(),
                frame_marker: 0,
                highest_processed_message: 0,
            },
        );
    }

    /// Drop a session, returning its final tree
    pub fn remove_session(&mut self, session: SessionId) -> Result<StateTree> {
        self.sessions
            .shift_remove(&session)
            .ok_or(Error::SessionNotFound(session))?;
        self.tracker.forget(session);
        info!(%session, "session removed");
        self.mutator
            .remove_session(session)
            .ok_or(Error::SessionNotFound(session))
    }

    /// Queue an input for the next step of its session
    pub fn enqueue_input(&mut self, record: InputRecord) -> Result<()> {
        let session = record.save.id;
        let entry = self
            .sessions
            .get_mut(&session)
            .ok_or(Error::SessionNotFound(session))?;
        trace!(%session, id = record.id, "input queued");
        entry.inputs.push(record);
        Ok(())
    }

    /// Queue an inbound input message from a client bound to `session`
    ///
    /// Frame markers run no input handlers; the next step folds their id
    /// into `highest_processed_message` alongside any drained input.
    pub fn receive_input(&mut self, session: SessionId, message: InputMessage) -> Result<()> {
        let entry = self
            .sessions
            .get_mut(&session)
            .ok_or(Error::SessionNotFound(session))?;
        if message.is_frame_marker() {
            trace!(%session, id = message.id, "frame marker received");
            entry.frame_marker = entry.frame_marker.max(message.id);
            return Ok(());
        }
        let mode = entry.mode.clone();
        self.enqueue_input(InputRecord::new(
            message.id,
            message.player_id,
            message.raw_data,
            SaveRef::new(session, mode),
        ))
    }

    /// Apply a patch from outside the tick, e.g. pausing a session
    pub fn apply(&mut self, session: SessionId, patch: impl Into<Patch>) -> MergeReport {
        self.mutator.apply(session, patch)
    }

    /// Pause or resume a session
    pub fn set_paused(&mut self, session: SessionId, paused: bool) -> MergeReport {
        self.apply(session, SessionFlags::pause_patch(paused))
    }

    /// Start sampling the clock from `now`
    pub fn start(&mut self, now: Instant) {
        self.t0 = Some(now);
        self.accumulator = Duration::ZERO;
        info!(frame_length = ?self.frame_length, sessions = self.sessions.len(), "server loop started");
    }

    /// Stop the loop, clearing the clock sample and accumulator
    pub fn stop(&mut self) {
        self.t0 = None;
        self.accumulator = Duration::ZERO;
        info!(steps_run = self.steps_run, "server loop stopped");
    }

    /// Check if the loop has been started
    pub fn is_running(&self) -> bool {
        self.t0.is_some()
    }

    /// Handle one timer firing
    ///
    /// Returns the number of authoritative steps run. Does nothing while
    /// stopped.
    pub fn on_timer(&mut self, now: Instant) -> u32 {
        let Some(t0) = self.t0 else {
            return 0;
        };
        self.accumulator += now.saturating_duration_since(t0);
        self.t0 = Some(now);

        let mut steps = 0u32;
        while self.accumulator >= self.frame_length {
            self.step();
            self.accumulator -= self.frame_length;
            steps += 1;
        }

        if steps >= self.config.overrun_warn_steps {
            warn!(
                steps,
                frame_length = ?self.frame_length,
                "server loop fell behind, ran catch-up steps"
            );
        }
        steps
    }

    /// Run one authoritative step of one frame length for every session
    pub fn step(&mut self) {
        let delta = self.frame_length.as_secs_f64();
        self.mutator.poll_deferred();

        for (&session, entry) in &mut self.sessions {
            let flags = SessionFlags::of(self.mutator.state(session));
            if flags.paused {
                trace!(%session, "paused, skipping step");
                continue;
            }

            let ctx = TickContext {
                session,
                mode: &entry.mode,
                delta,
            };

            let inputs = entry.inputs.drain();
            let newest = inputs
                .iter()
                .map(|record| record.id)
                .fold(std::mem::take(&mut entry.frame_marker), u64::max);
            entry.highest_processed_message = entry.highest_processed_message.max(newest);
            let mut report = self.pipeline.run_inputs(&mut self.mutator, &inputs, &ctx);

            report.absorb(self.pipeline.run(Stage::BeforeTick, &mut self.mutator, &ctx));
            if SessionFlags::of(self.mutator.state(session)).waiting_for_players {
                trace!(%session, "waiting for players, skipping on-tick hooks");
            } else {
                report.absorb(self.pipeline.run(Stage::OnTick, &mut self.mutator, &ctx));
            }
            report.absorb(self.pipeline.run(Stage::AfterTick, &mut self.mutator, &ctx));

            if let Some(state) = self.mutator.state(session) {
                self.tracker.advance(session, state);
            }
            debug!(
                %session,
                inputs = inputs.len(),
                applied = report.applied,
                rejected = report.rejected,
                "authoritative step"
            );
        }
        self.steps_run += 1;
    }

    /// Build the outbound snapshot of a session
    pub fn snapshot(&mut self, session: SessionId) -> Result<AuthoritativeSnapshot> {
        let entry = self
            .sessions
            .get(&session)
            .ok_or(Error::SessionNotFound(session))?;
        let state = self
            .mutator
            .state(session)
            .cloned()
            .ok_or(Error::SessionNotFound(session))?;
        self.snapshots_sent += 1;
        Ok(AuthoritativeSnapshot::new(
            self.snapshots_sent,
            state,
            entry.highest_processed_message,
        ))
    }

    /// Newest input id folded into a session's tree
    pub fn highest_processed_message(&self, session: SessionId) -> Option<u64> {
        self.sessions
            .get(&session)
            .map(|entry| entry.highest_processed_message)
    }

    /// The loop configuration
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Session trees
    pub fn mutator(&self) -> &StateMutator {
        &self.mutator
    }

    /// The tracker observing every session
    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// Mutable tracker access, for registering subscriptions
    pub fn tracker_mut(&mut self) -> &mut Tracker {
        &mut self.tracker
    }

    /// Mutable pipeline access, for registering hooks
    pub fn pipeline_mut(&mut self) -> &mut HookPipeline {
        &mut self.pipeline
    }

    /// Number of registered sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Total authoritative steps run
    pub fn steps_run(&self) -> u64 {
        self.steps_run
    }

    /// Time banked toward the next step
    pub fn accumulator(&self) -> Duration {
        self.accumulator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replica_core::{Path, Value};
    use std::cell::RefCell;
    use std::rc::Rc;

    const ARENA: SessionId = SessionId(1);
    const DUEL: SessionId = SessionId(2);

    fn config(step_ms: u64) -> SchedulerConfig {
        SchedulerConfig {
            server_step_ms: step_ms,
            ..SchedulerConfig::default()
        }
    }

    fn count(server: &ServerLoop, session: SessionId) -> i64 {
        server
            .mutator()
            .state(session)
            .and_then(|state| state.get(&Path::parse("count").unwrap()))
            .and_then(Value::as_int)
            .unwrap_or_default()
    }

    fn counting_pipeline() -> HookPipeline {
        let mut pipeline = HookPipeline::new();
        pipeline.on_tick("*", |state: &StateTree, _: &TickContext<'_>| {
            let count = state.as_value().get("count").and_then(Value::as_int).unwrap_or(0);
            Some(Patch::set("count", count + 1))
        });
        pipeline
    }

    fn server(step_ms: u64, pipeline: HookPipeline) -> ServerLoop {
        let mut server = ServerLoop::new(config(step_ms), pipeline, Tracker::new()).unwrap();
        server.add_session(ARENA, "arena", StateTree::from_entries([("count", 0)]));
        server
    }

    #[test]
    fn test_accumulator_runs_whole_steps() {
        let deltas = Rc::new(RefCell::new(Vec::new()));
        let seen = deltas.clone();
        let mut pipeline = HookPipeline::new();
        pipeline.on_tick("*", move |_: &StateTree, ctx: &TickContext<'_>| {
            seen.borrow_mut().push(ctx.delta);
            None
        });
        let mut server = server(1000, pipeline);

        let t0 = Instant::now();
        server.start(t0);
        let steps = server.on_timer(t0 + Duration::from_millis(5000));

        assert_eq!(steps, 5);
        assert_eq!(*deltas.borrow(), vec![1.0; 5]);
        assert_eq!(server.accumulator(), Duration::ZERO);
    }

    #[test]
    fn test_remainder_carried_to_next_firing() {
        let mut server = server(45, counting_pipeline());
        let t0 = Instant::now();
        server.start(t0);

        assert_eq!(server.on_timer(t0 + Duration::from_millis(30)), 0);
        assert_eq!(server.accumulator(), Duration::from_millis(30));
        assert_eq!(server.on_timer(t0 + Duration::from_millis(60)), 1);
        assert_eq!(server.accumulator(), Duration::from_millis(15));
        assert_eq!(count(&server, ARENA), 1);
    }

    #[test]
    fn test_stopped_loop_does_nothing() {
        let mut server = server(10, counting_pipeline());
        assert_eq!(server.on_timer(Instant::now()), 0);

        let t0 = Instant::now();
        server.start(t0);
        server.on_timer(t0 + Duration::from_millis(25));
        server.stop();
        assert!(!server.is_running());
        assert_eq!(server.accumulator(), Duration::ZERO);
        assert_eq!(server.on_timer(t0 + Duration::from_secs(10)), 0);
        assert_eq!(server.steps_run(), 2);
    }

    #[test]
    fn test_paused_and_waiting_sessions() {
        let mut server = server(10, counting_pipeline());
        server.add_session(DUEL, "duel", StateTree::from_entries([("count", 0)]));

        server.set_paused(ARENA, true);
        server.step();
        assert_eq!(count(&server, ARENA), 0);
        assert_eq!(count(&server, DUEL), 1);

        server.set_paused(ARENA, false);
        server.apply(DUEL, SessionFlags::waiting_patch(true));
        server.step();
        assert_eq!(count(&server, ARENA), 1);
        assert_eq!(count(&server, DUEL), 1);
    }

    #[test]
    fn test_hooks_filtered_by_mode() {
        let mut pipeline = HookPipeline::new();
        pipeline.on_tick("duel", |_: &StateTree, _: &TickContext<'_>| Some(Patch::set("duel", true)));
        let mut server = server(10, pipeline);
        server.add_session(DUEL, "duel", StateTree::new());
        server.step();

        let duel = Path::parse("duel").unwrap();
        assert!(server.mutator().state(ARENA).unwrap().get(&duel).is_none());
        assert_eq!(
            server.mutator().state(DUEL).unwrap().get(&duel),
            Some(&Value::Bool(true))
        );
    }

    #[test]
    fn test_input_handled_while_waiting() {
        let mut pipeline = counting_pipeline();
        pipeline.on_input("*", |_: &StateTree, input: &InputRecord, _: &TickContext<'_>| {
            let ready = input.raw_data.get("ready").and_then(Value::as_bool)?;
            Some(SessionFlags::waiting_patch(!ready))
        });
        let mut server = server(10, pipeline);
        server.apply(ARENA, SessionFlags::waiting_patch(true));

        server.step();
        assert_eq!(count(&server, ARENA), 0);

        server
            .receive_input(
                ARENA,
                InputMessage {
                    id: 3,
                    player_id: "p1".into(),
                    raw_data: Value::map([("ready", true)]),
                    pending_acks: vec![3],
                },
            )
            .unwrap();
        server.step();
        assert_eq!(count(&server, ARENA), 1);
        assert_eq!(server.highest_processed_message(ARENA), Some(3));

        let snapshot = server.snapshot(ARENA).unwrap();
        assert_eq!(snapshot.highest_processed_message, 3);
        assert_eq!(snapshot.id, 1);
    }

    #[test]
    fn test_session_id_protected() {
        let mut server = server(10, HookPipeline::new());
        server.apply(ARENA, Patch::set("session.id", 99));
        let id = Path::parse("session.id").unwrap();
        assert_eq!(
            server.mutator().state(ARENA).unwrap().get(&id),
            Some(&Value::Int(1))
        );
    }

    #[test]
    fn test_tracker_advanced_after_hooks() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        let mut server = server(10, counting_pipeline());
        server.add_session(DUEL, "duel", StateTree::from_entries([("count", 10)]));
        server.tracker_mut().on_change_of(
            Path::parse("count").unwrap(),
            move |session: SessionId, current: &Value, _: Option<&Value>, _: &Value| {
                log.borrow_mut().push((session, current.clone()));
            },
            Value::Null,
        );

        server.step();
        server.step();
        assert_eq!(
            *seen.borrow(),
            vec![
                (ARENA, Value::Int(1)),
                (DUEL, Value::Int(11)),
                (ARENA, Value::Int(2)),
                (DUEL, Value::Int(12)),
            ]
        );
    }

    #[test]
    fn test_frame_marker_acknowledged_without_running_handlers() {
        let handled = Rc::new(RefCell::new(0));
        let calls = handled.clone();
        let mut pipeline = HookPipeline::new();
        pipeline.on_input("*", move |_: &StateTree, _: &InputRecord, _: &TickContext<'_>| {
            *calls.borrow_mut() += 1;
            None
        });
        let mut server = server(10, pipeline);

        server
            .receive_input(ARENA, InputMessage::frame_marker(4, Vec::new()))
            .unwrap();
        server
            .receive_input(ARENA, InputMessage::frame_marker(6, Vec::new()))
            .unwrap();
        assert_eq!(server.highest_processed_message(ARENA), Some(0));

        server.step();
        assert_eq!(*handled.borrow(), 0);
        assert_eq!(server.highest_processed_message(ARENA), Some(6));

        server.set_paused(ARENA, true);
        server
            .receive_input(ARENA, InputMessage::frame_marker(9, Vec::new()))
            .unwrap();
        server.step();
        assert_eq!(server.highest_processed_message(ARENA), Some(6));
        server.set_paused(ARENA, false);
        server.step();
        assert_eq!(server.highest_processed_message(ARENA), Some(9));
    }

    #[test]
    fn test_unknown_session_errors() {
        let mut server = server(10, HookPipeline::new());
        let record = InputRecord::new(1, "p1", Value::Null, SaveRef::new(SessionId(9), "arena"));
        assert!(matches!(
            server.enqueue_input(record),
            Err(Error::SessionNotFound(SessionId(9)))
        ));
        assert!(server.snapshot(SessionId(9)).is_err());
        assert!(server.remove_session(ARENA).is_ok());
        assert_eq!(server.session_count(), 0);
    }

    #[test]
    fn test_deferred_patch_applied_next_step() {
        let mut server = server(10, HookPipeline::new());
        let (resolver, deferred) = replica_core::Deferred::channel();
        server.apply(ARENA, deferred);
        resolver.resolve(("count", 40));
        assert_eq!(count(&server, ARENA), 0);

        server.step();
        assert_eq!(count(&server, ARENA), 40);
    }
}
