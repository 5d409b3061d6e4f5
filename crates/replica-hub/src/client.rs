//! Variable-timestep predicting loop
//!
//! The client ticks once per timer firing with whatever time actually
//! elapsed. With prediction on, every tick rebuilds the session tree from
//! the last authoritative snapshot by replaying all unacknowledged frames
//! through the same hooks the server runs. With prediction off, the tree
//! simply mirrors the latest snapshot.
//!
//! Every predicted tick also queues a frame marker carrying the new frame's
//! id. The caller sends it to the server with [`ClientLoop::take_outbound`];
//! the server echoes the newest marker back as `highestProcessedMessage`,
//! which is what lets an idle client prune its frames.

use crate::session::{self, SessionFlags};
use crate::{HookPipeline, Result, SchedulerConfig, Stage, TickContext};
use replica_core::{SessionId, StateMutator, StateTree, Tracker, Value};
use replica_netcode::{
    AckReport, AuthoritativeSnapshot, FrameStore, IdSequence, InputMessage, InputRecord, SaveRef,
};
use std::time::Instant;
use tracing::{debug, info, trace};

/// Client scheduler for the one session this client plays
#[derive(Debug)]
pub struct ClientLoop {
    session: SessionId,
    mode: String,
    prediction: bool,
    mutator: StateMutator,
    tracker: Tracker,
    pipeline: HookPipeline,
    store: FrameStore,
    /// Frame markers waiting to be sent
    outbound: Vec<InputMessage>,
    /// Time of the previous tick; `None` while stopped
    prior_step: Option<Instant>,
    ticks_run: u64,
}

impl ClientLoop {
    /// Wire a loop from its collaborators
    ///
    /// `initial` is both the first working tree and the first authoritative
    /// snapshot.
    pub fn new(
        config: &SchedulerConfig,
        session: SessionId,
        mode: impl Into<String>,
        initial: StateTree,
        pipeline: HookPipeline,
        tracker: Tracker,
    ) -> Result<Self> {
        config.validate()?;
        let mode = mode.into();
        let initial = session::stamp(initial, session, &mode);
        let mut mutator = StateMutator::new(config.merger()?);
        mutator.insert_session(session, initial.clone());
        Ok(Self {
            session,
            mode,
            prediction: config.client_prediction,
            mutator,
            tracker,
            pipeline,
            store: FrameStore::new(session, initial, IdSequence::new()),
            outbound: Vec::new(),
            prior_step: None,
            ticks_run: 0,
        })
    }

    /// Start measuring deltas from `now`
    pub fn start(&mut self, now: Instant) {
        self.prior_step = Some(now);
        info!(session = %self.session, prediction = self.prediction, "client loop started");
    }

    /// Stop the loop
    pub fn stop(&mut self) {
        self.prior_step = None;
        info!(session = %self.session, ticks_run = self.ticks_run, "client loop stopped");
    }

    /// Check if the loop has been started
    pub fn is_running(&self) -> bool {
        self.prior_step.is_some()
    }

    /// Handle one timer firing
    ///
    /// Returns false if nothing was simulated: the loop is stopped or the
    /// session is paused. A paused tick only moves the delta origin, so no
    /// backlog builds up while paused.
    pub fn on_timer(&mut self, now: Instant) -> bool {
        let Some(prior) = self.prior_step else {
            return false;
        };
        let delta = now.saturating_duration_since(prior).as_secs_f64();
        self.prior_step = Some(now);

        if SessionFlags::of(self.mutator.state(self.session)).paused {
            trace!(session = %self.session, "paused, skipping tick");
            return false;
        }

        self.mutator.poll_deferred();
        if self.prediction {
            self.predict(delta);
        } else {
            self.mutator
                .replace(self.session, self.store.authoritative().clone());
        }

        if let Some(state) = self.mutator.state(self.session) {
            self.tracker.advance(self.session, state);
        }
        self.ticks_run += 1;
        true
    }

    fn predict(&mut self, delta: f64) {
        let session = self.session;
        let mode = self.mode.as_str();
        let pipeline = &mut self.pipeline;
        let ctx = TickContext {
            session,
            mode,
            delta,
        };

        pipeline.run(Stage::BeforeTick, &mut self.mutator, &ctx);
        self.store
            .process(&mut self.mutator, delta, |mutator, input, frame_delta| {
                let ctx = TickContext {
                    session,
                    mode,
                    delta: frame_delta,
                };
                pipeline.run_inputs(mutator, input, &ctx);
                if !SessionFlags::of(mutator.state(session)).waiting_for_players {
                    pipeline.run(Stage::OnTick, mutator, &ctx);
                }
            });
        pipeline.run(Stage::AfterTick, &mut self.mutator, &ctx);

        if let Some(frame) = self.store.current() {
            let marker = InputMessage::frame_marker(frame.id, self.store.unacknowledged_ids());
            self.outbound.push(marker);
        }
    }

    /// Take the frame markers queued since the last call, oldest first
    pub fn take_outbound(&mut self) -> Vec<InputMessage> {
        std::mem::take(&mut self.outbound)
    }

    /// Capture a local input
    ///
    /// The record is queued for the next frame and the outbound message is
    /// returned for the caller to send. Its `pendingAcks` lists every input
    /// still awaiting acknowledgement, this one included.
    pub fn capture(&mut self, player_id: impl Into<String>, raw_data: impl Into<Value>) -> InputMessage {
        let record = InputRecord::new(
            self.store.ids().next_id(),
            player_id,
            raw_data,
            SaveRef::new(self.session, self.mode.clone()),
        );
        let message = InputMessage::from_record(&record, Vec::new());
        self.store.capture_input(record);
        InputMessage {
            pending_acks: self.store.unacknowledged_ids(),
            ..message
        }
    }

    /// Adopt an authoritative snapshot from the server
    pub fn on_snapshot(&mut self, snapshot: AuthoritativeSnapshot) -> AckReport {
        debug!(
            session = %self.session,
            id = snapshot.id,
            highest_processed_message = snapshot.highest_processed_message,
            "authoritative snapshot received"
        );
        self.store.apply_snapshot(snapshot)
    }

    /// The session this client plays
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// The working (predicted) tree
    pub fn state(&self) -> Option<&StateTree> {
        self.mutator.state(self.session)
    }

    /// The frame buffer
    pub fn frame_store(&self) -> &FrameStore {
        &self.store
    }

    /// The tracker observing the working tree
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

    /// Ticks simulated so far
    pub fn ticks_run(&self) -> u64 {
        self.ticks_run
    }
}
