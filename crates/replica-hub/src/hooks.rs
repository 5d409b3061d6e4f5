//! Ordered hook pipeline
//!
//! Game logic plugs into a tick as hooks. Each hook belongs to one
//! [`Stage`], applies to a [`ModeFilter`], sees the session tree as it is
//! at that moment and may hand back a [`Patch`]. The patch is merged
//! before the next hook runs, so later hooks observe earlier ones.
//!
//! Input handlers are separate: they run once per [`InputRecord`] at the
//! start of a step, ahead of the before-tick hooks.

use replica_core::{MergeReport, Patch, SessionId, StateMutator, StateTree};
use replica_netcode::InputRecord;
use std::fmt;
use tracing::trace;

/// Where in a tick a hook runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Before game logic, e.g. applying input
    BeforeTick,
    /// Game logic; skipped while waiting for players
    OnTick,
    /// After game logic, e.g. cleanup
    AfterTick,
}

/// Which game modes a hook applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeFilter {
    /// Every mode (`"*"`)
    Any,
    /// One named mode
    Only(String),
}

impl ModeFilter {
    /// Check whether a session's mode passes the filter
    pub fn matches(&self, mode: &str) -> bool {
        match self {
            ModeFilter::Any => true,
            ModeFilter::Only(only) => only == mode,
        }
    }
}

impl From<&str> for ModeFilter {
    fn from(mode: &str) -> Self {
        if mode == "*" {
            ModeFilter::Any
        } else {
            ModeFilter::Only(mode.to_string())
        }
    }
}

impl From<String> for ModeFilter {
    fn from(mode: String) -> Self {
        ModeFilter::from(mode.as_str())
    }
}

/// What a hook knows about the tick it runs in
#[derive(Debug, Clone, Copy)]
pub struct TickContext<'a> {
    /// Session being simulated
    pub session: SessionId,
    /// Game mode of that session
    pub mode: &'a str,
    /// Seconds simulated by this step
    pub delta: f64,
}

/// A unit of per-tick game logic
pub trait Hook {
    /// Run against the current tree and optionally return a patch
    fn run(&mut self, state: &StateTree, ctx: &TickContext<'_>) -> Option<Patch>;
}

impl<F> Hook for F
where
    F: FnMut(&StateTree, &TickContext<'_>) -> Option<Patch>,
{
    fn run(&mut self, state: &StateTree, ctx: &TickContext<'_>) -> Option<Patch> {
        self(state, ctx)
    }
}

/// Turns one captured input into a patch
pub trait InputHandler {
    /// Handle one input record
    fn handle(&mut self, state: &StateTree, input: &InputRecord, ctx: &TickContext<'_>) -> Option<Patch>;
}

impl<F> InputHandler for F
where
    F: FnMut(&StateTree, &InputRecord, &TickContext<'_>) -> Option<Patch>,
{
    fn handle(&mut self, state: &StateTree, input: &InputRecord, ctx: &TickContext<'_>) -> Option<Patch> {
        self(state, input, ctx)
    }
}

struct Registered<T: ?Sized> {
    mode: ModeFilter,
    inner: Box<T>,
}

/// Hooks and input handlers in registration order
#[derive(Default)]
pub struct HookPipeline {
    hooks: Vec<(Stage, Registered<dyn Hook>)>,
    input_handlers: Vec<Registered<dyn InputHandler>>,
}

impl HookPipeline {
    /// Create an empty pipeline
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook object
    pub fn add_hook(&mut self, stage: Stage, mode: impl Into<ModeFilter>, hook: Box<dyn Hook>) -> &mut Self {
        self.hooks.push((
            stage,
            Registered {
                mode: mode.into(),
                inner: hook,
            },
        ));
        self
    }

    /// Register a closure at a stage
    pub fn register<F>(&mut self, stage: Stage, mode: impl Into<ModeFilter>, hook: F) -> &mut Self
    where
        F: FnMut(&StateTree, &TickContext<'_>) -> Option<Patch> + 'static,
    {
        self.add_hook(stage, mode, Box::new(hook))
    }

    /// Register a before-tick closure
    pub fn before_tick<F>(&mut self, mode: impl Into<ModeFilter>, hook: F) -> &mut Self
    where
        F: FnMut(&StateTree, &TickContext<'_>) -> Option<Patch> + 'static,
    {
        self.register(Stage::BeforeTick, mode, hook)
    }

    /// Register an on-tick closure
    pub fn on_tick<F>(&mut self, mode: impl Into<ModeFilter>, hook: F) -> &mut Self
    where
        F: FnMut(&StateTree, &TickContext<'_>) -> Option<Patch> + 'static,
    {
        self.register(Stage::OnTick, mode, hook)
    }

    /// Register an after-tick closure
    pub fn after_tick<F>(&mut self, mode: impl Into<ModeFilter>, hook: F) -> &mut Self
    where
        F: FnMut(&StateTree, &TickContext<'_>) -> Option<Patch> + 'static,
    {
        self.register(Stage::AfterTick, mode, hook)
    }

    /// Register an input handler closure
    pub fn on_input<F>(&mut self, mode: impl Into<ModeFilter>, handler: F) -> &mut Self
    where
        F: FnMut(&StateTree, &InputRecord, &TickContext<'_>) -> Option<Patch> + 'static,
    {
        self.input_handlers.push(Registered {
            mode: mode.into(),
            inner: Box::new(handler),
        });
        self
    }

    /// Number of hooks registered at a stage
    pub fn hook_count(&self, stage: Stage) -> usize {
        self.hooks.iter().filter(|(s, _)| *s == stage).count()
    }

    /// Number of input handlers
    pub fn input_handler_count(&self) -> usize {
        self.input_handlers.len()
    }

    /// Run every hook of a stage that applies to the session's mode
    ///
    /// Each returned patch is merged before the next hook runs. Stops early
    /// if the session disappears from the mutator.
    pub fn run(&mut self, stage: Stage, mutator: &mut StateMutator, ctx: &TickContext<'_>) -> MergeReport {
        let mut report = MergeReport::default();
        for (hook_stage, hook) in &mut self.hooks {
            if *hook_stage != stage || !hook.mode.matches(ctx.mode) {
                continue;
            }
            let Some(state) = mutator.state(ctx.session) else {
                break;
            };
            let patch = hook.inner.run(state, ctx);
            report.absorb(mutator.apply_opt(ctx.session, patch));
        }
        trace!(session = %ctx.session, ?stage, applied = report.applied, "stage complete");
        report
    }

    /// Feed each input record through every matching input handler, in order
    pub fn run_inputs(
        &mut self,
        mutator: &mut StateMutator,
        inputs: &[InputRecord],
        ctx: &TickContext<'_>,
    ) -> MergeReport {
        let mut report = MergeReport::default();
        for input in inputs {
            for handler in &mut self.input_handlers {
                if !handler.mode.matches(ctx.mode) {
                    continue;
                }
                let Some(state) = mutator.state(ctx.session) else {
                    return report;
                };
                let patch = handler.inner.handle(state, input, ctx);
                report.absorb(mutator.apply_opt(ctx.session, patch));
            }
        }
        if !inputs.is_empty() {
            trace!(session = %ctx.session, inputs = inputs.len(), applied = report.applied, "inputs handled");
        }
        report
    }
}

impl fmt::Debug for HookPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookPipeline")
            .field("before_tick", &self.hook_count(Stage::BeforeTick))
            .field("on_tick", &self.hook_count(Stage::OnTick))
            .field("after_tick", &self.hook_count(Stage::AfterTick))
            .field("input_handlers", &self.input_handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replica_core::{Path, Value};
    use replica_netcode::SaveRef;

    const SESSION: SessionId = SessionId(1);

    fn setup() -> StateMutator {
        let mut mutator = StateMutator::default();
        mutator.insert_session(SESSION, StateTree::from_entries([("count", 0)]));
        mutator
    }

    fn count(state: &StateTree) -> i64 {
        state
            .get(&Path::parse("count").unwrap())
            .and_then(Value::as_int)
            .unwrap_or_default()
    }

    fn ctx(mode: &str) -> TickContext<'_> {
        TickContext {
            session: SESSION,
            mode,
            delta: 0.5,
        }
    }

    #[test]
    fn test_mode_filter() {
        assert_eq!(ModeFilter::from("*"), ModeFilter::Any);
        assert!(ModeFilter::Any.matches("arena"));
        assert!(ModeFilter::from("arena").matches("arena"));
        assert!(!ModeFilter::from("arena").matches("duel"));
    }

    #[test]
    fn test_later_hooks_see_earlier_patches() {
        let mut mutator = setup();
        let mut pipeline = HookPipeline::new();
        pipeline
            .on_tick("*", |state: &StateTree, _: &TickContext<'_>| {
                Some(Patch::set("count", count(state) + 1))
            })
            .on_tick("*", |state: &StateTree, _: &TickContext<'_>| {
                Some(Patch::set("count", count(state) * 10))
            });

        let report = pipeline.run(Stage::OnTick, &mut mutator, &ctx("arena"));
        assert_eq!(report.applied, 2);
        assert_eq!(count(mutator.state(SESSION).unwrap()), 10);
    }

    #[test]
    fn test_stage_and_mode_filtering() {
        let mut mutator = setup();
        let mut pipeline = HookPipeline::new();
        pipeline
            .before_tick("*", |_: &StateTree, _: &TickContext<'_>| Some(Patch::set("before", true)))
            .on_tick("duel", |_: &StateTree, _: &TickContext<'_>| Some(Patch::set("duel", true)))
            .on_tick("arena", |_: &StateTree, ctx: &TickContext<'_>| Some(Patch::set("delta", ctx.delta)));

        pipeline.run(Stage::OnTick, &mut mutator, &ctx("arena"));
        let state = mutator.state(SESSION).unwrap().as_value();
        assert_eq!(state.get("delta"), Some(&Value::Float(0.5)));
        assert_eq!(state.get("duel"), None);
        assert_eq!(state.get("before"), None);
        assert_eq!(pipeline.hook_count(Stage::OnTick), 2);
    }

    #[test]
    fn test_none_result_is_noop() {
        let mut mutator = setup();
        let before = mutator.state(SESSION).cloned().unwrap();
        let mut pipeline = HookPipeline::new();
        pipeline.after_tick("*", |_: &StateTree, _: &TickContext<'_>| None);

        let report = pipeline.run(Stage::AfterTick, &mut mutator, &ctx("arena"));
        assert!(!report.changed());
        assert!(mutator.state(SESSION).unwrap().shares_root_with(&before));
    }

    #[test]
    fn test_inputs_run_in_order() {
        let mut mutator = setup();
        let mut pipeline = HookPipeline::new();
        pipeline.on_input(
            "*",
            |state: &StateTree, input: &InputRecord, _: &TickContext<'_>| {
                let add = input.raw_data.get("add").and_then(Value::as_int)?;
                Some(Patch::set("count", count(state) * 10 + add))
            },
        );

        let inputs: Vec<InputRecord> = [1, 2, 3]
            .into_iter()
            .map(|add| {
                InputRecord::new(add as u64, "p1", Value::map([("add", add)]), SaveRef::new(SESSION, "arena"))
            })
            .collect();
        let report = pipeline.run_inputs(&mut mutator, &inputs, &ctx("arena"));
        assert_eq!(report.applied, 3);
        assert_eq!(count(mutator.state(SESSION).unwrap()), 123);
    }

    #[test]
    fn test_struct_hook() {
        struct Counter {
            runs: i64,
        }

        impl Hook for Counter {
            fn run(&mut self, _state: &StateTree, _ctx: &TickContext<'_>) -> Option<Patch> {
                self.runs += 1;
                Some(Patch::set("runs", self.runs))
            }
        }

        let mut mutator = setup();
        let mut pipeline = HookPipeline::new();
        pipeline.add_hook(Stage::AfterTick, "*", Box::new(Counter { runs: 0 }));
        pipeline.run(Stage::AfterTick, &mut mutator, &ctx("arena"));
        pipeline.run(Stage::AfterTick, &mut mutator, &ctx("arena"));
        assert_eq!(
            mutator.state(SESSION).unwrap().as_value().get("runs"),
            Some(&Value::Int(2))
        );
    }
}
