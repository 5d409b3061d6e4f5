//! Generational change detection
//!
//! The tracker keeps two generations of every session's tree, `previous`
//! and `current`. [`Tracker::advance`] shifts them along once per tick and
//! then walks the subscription list, in registration order, invoking each
//! callback whose focus changed between the two generations.
//!
//! Subscription kinds:
//!
//! - [`Tracker::on_change_of`] fires when the focused value differs
//! - [`Tracker::on_change_to`] also requires a condition on the new value
//! - [`Tracker::on_element_added`], [`Tracker::on_element_changed`] and
//!   [`Tracker::on_element_removed`] treat the focus as a keyed collection:
//!   a list of maps carrying an `id`, or a map keyed by id
//!
//! On the very first generation of a session there is nothing to compare
//! against, so every value subscription fires and every element counts as
//! added. A subscription registered before a session's first generation
//! therefore gets its initial notification one tick later, on that first
//! [`Tracker::advance`], and still only once.
//!
//! Subscriptions are shared by every session the tracker sees; callbacks
//! receive the [`SessionId`] whose tree changed.

use crate::{Path, Result, SessionId, StateTree, Value};
use indexmap::IndexMap;
use std::fmt;
use tracing::trace;

/// Callback for value subscriptions: `(session, current, prior, data)`
///
/// `current` is `Null` when the focus resolves to nothing. `prior` is
/// `None` on the first generation and at registration time.
pub type ChangeCallback = Box<dyn FnMut(SessionId, &Value, Option<&Value>, &Value)>;

/// Callback for element subscriptions: `(session, id, current, prior, data)`
pub type ElementCallback = Box<dyn FnMut(SessionId, &Value, Option<&Value>, Option<&Value>, &Value)>;

/// Lens closure deriving a value from a whole tree
pub type LensFn = Box<dyn Fn(&StateTree) -> Option<Value>>;

/// What part of the tree a subscription watches
pub enum Focus {
    /// A value at a fixed path
    Path(Path),
    /// A value computed from the whole tree
    Lens(LensFn),
}

impl Focus {
    /// Parse a dot-separated path focus
    pub fn path(raw: &str) -> Result<Self> {
        Ok(Focus::Path(Path::parse(raw)?))
    }

    /// Create a lens focus
    pub fn lens<F>(lens: F) -> Self
    where
        F: Fn(&StateTree) -> Option<Value> + 'static,
    {
        Focus::Lens(Box::new(lens))
    }

    /// Resolve the focus against a tree
    pub fn resolve(&self, tree: &StateTree) -> Option<Value> {
        match self {
            Focus::Path(path) => tree.get(path).cloned(),
            Focus::Lens(lens) => lens(tree),
        }
    }
}

impl From<Path> for Focus {
    fn from(path: Path) -> Self {
        Focus::Path(path)
    }
}

impl fmt::Debug for Focus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Focus::Path(path) => write!(f, "Path({})", path),
            Focus::Lens(_) => write!(f, "Lens"),
        }
    }
}

/// Gate for [`Tracker::on_change_to`]
pub enum Condition {
    /// The new value must equal this literal
    Equals(Value),
    /// The new value must satisfy this predicate
    Predicate(Box<dyn Fn(&Value) -> bool>),
}

impl Condition {
    /// Require equality with a literal
    pub fn equals(value: impl Into<Value>) -> Self {
        Condition::Equals(value.into())
    }

    /// Require a predicate to hold
    pub fn when<F>(predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + 'static,
    {
        Condition::Predicate(Box::new(predicate))
    }

    /// Test a value
    pub fn holds(&self, value: &Value) -> bool {
        match self {
            Condition::Equals(expected) => expected == value,
            Condition::Predicate(predicate) => predicate(value),
        }
    }
}

enum Watch {
    Change(ChangeCallback),
    ChangeTo(Condition, ChangeCallback),
    Added(ElementCallback),
    Changed(ElementCallback),
    Removed(ElementCallback),
}

impl Watch {
    fn name(&self) -> &'static str {
        match self {
            Watch::Change(_) => "change_of",
            Watch::ChangeTo(..) => "change_to",
            Watch::Added(_) => "element_added",
            Watch::Changed(_) => "element_changed",
            Watch::Removed(_) => "element_removed",
        }
    }
}

struct Subscription {
    focus: Focus,
    watch: Watch,
    data: Value,
}

impl Subscription {
    /// Evaluate against a generation pair; `previous` is `None` on the
    /// first generation of a session.
    fn evaluate(&mut self, session: SessionId, previous: Option<&StateTree>, current: &StateTree) {
        let now = self.focus.resolve(current);
        let before = previous.map(|tree| self.focus.resolve(tree));
        let changed = match &before {
            None => true,
            Some(before) => *before != now,
        };
        let prior = before.as_ref().and_then(Option::as_ref);
        let shown = now.as_ref().unwrap_or(&Value::Null);

        match &mut self.watch {
            Watch::Change(callback) => {
                if changed {
                    callback(session, shown, prior, &self.data);
                }
            }
            Watch::ChangeTo(condition, callback) => {
                if changed && condition.holds(shown) {
                    callback(session, shown, prior, &self.data);
                }
            }
            Watch::Added(callback) => {
                let now = elements(now.as_ref());
                let before = elements(prior);
                for (id, element) in &now {
                    if find(&before, id).is_none() {
                        callback(session, id, Some(element), None, &self.data);
                    }
                }
            }
            Watch::Changed(callback) => {
                let now = elements(now.as_ref());
                let before = elements(prior);
                for (id, element) in &now {
                    if let Some(old) = find(&before, id) {
                        if old != element {
                            callback(session, id, Some(element), Some(old), &self.data);
                        }
                    }
                }
            }
            Watch::Removed(callback) => {
                let now = elements(now.as_ref());
                let before = elements(prior);
                for (id, element) in &before {
                    if find(&now, id).is_none() {
                        callback(session, id, None, Some(element), &self.data);
                    }
                }
            }
        }
    }

    /// Fire the registration-time notification, if this kind has one
    fn fire_initial(&mut self, session: SessionId, current: &StateTree) {
        let now = self.focus.resolve(current);
        let shown = now.as_ref().unwrap_or(&Value::Null);
        match &mut self.watch {
            Watch::Change(callback) => callback(session, shown, None, &self.data),
            Watch::ChangeTo(condition, callback) => {
                if condition.holds(shown) {
                    callback(session, shown, None, &self.data);
                }
            }
            Watch::Added(callback) => {
                for (id, element) in &elements(now.as_ref()) {
                    callback(session, id, Some(element), None, &self.data);
                }
            }
            Watch::Changed(_) | Watch::Removed(_) => {}
        }
    }
}

/// Split a keyed collection into `(id, element)` pairs
///
/// Lists yield their map elements that carry an `id`; maps yield their
/// entries keyed by the map key.
fn elements(value: Option<&Value>) -> Vec<(Value, Value)> {
    match value {
        Some(Value::List(items)) => items
            .iter()
            .filter_map(|item| item.element_id().map(|id| (id.clone(), item.clone())))
            .collect(),
        Some(Value::Map(map)) => map
            .iter()
            .map(|(key, item)| (Value::String(key.clone()), item.clone()))
            .collect(),
        _ => Vec::new(),
    }
}

fn find<'a>(elements: &'a [(Value, Value)], id: &Value) -> Option<&'a Value> {
    elements
        .iter()
        .find(|(candidate, _)| candidate == id)
        .map(|(_, element)| element)
}

#[derive(Debug, Default, Clone)]
struct Generations {
    previous: Option<StateTree>,
    current: Option<StateTree>,
}

/// Generational diff engine invoking observers on state changes
#[derive(Default)]
pub struct Tracker {
    sessions: IndexMap<SessionId, Generations>,
    subscriptions: Vec<Subscription>,
}

impl Tracker {
    /// Create a tracker with no subscriptions
    pub fn new() -> Self {
        Self::default()
    }

    /// Shift generations for a session and notify observers
    ///
    /// `previous` takes the old `current`, and `current` becomes a copy of
    /// `live`. Every subscription is evaluated exactly once.
    pub fn advance(&mut self, session: SessionId, live: &StateTree) {
        let generations = self.sessions.entry(session).or_default();
        generations.previous = generations.current.take();
        generations.current = Some(live.clone());

        let Generations { previous, current } = &*generations;
        let Some(current) = current else {
            return;
        };
        if let Some(previous) = previous {
            if previous.shares_root_with(current) {
                trace!(%session, "generation unchanged, skipping observers");
                return;
            }
        }
        for subscription in &mut self.subscriptions {
            trace!(%session, kind = subscription.watch.name(), focus = ?subscription.focus, "evaluating");
            subscription.evaluate(session, previous.as_ref(), current);
        }
    }

    /// Drop both generations of a session
    pub fn forget(&mut self, session: SessionId) {
        self.sessions.shift_remove(&session);
    }

    /// The current generation of a session
    pub fn current(&self, session: SessionId) -> Option<&StateTree> {
        self.sessions.get(&session)?.current.as_ref()
    }

    /// The previous generation of a session
    pub fn previous(&self, session: SessionId) -> Option<&StateTree> {
        self.sessions.get(&session)?.previous.as_ref()
    }

    /// Number of registered subscriptions
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Watch a value; fires with `(session, current, prior, data)` whenever
    /// it changes
    ///
    /// Also fires once right away for every session that already has a
    /// current generation. A session the tracker has not seen yet gets its
    /// first notification on its first [`advance`](Tracker::advance).
    pub fn on_change_of<F>(&mut self, focus: impl Into<Focus>, callback: F, data: impl Into<Value>)
    where
        F: FnMut(SessionId, &Value, Option<&Value>, &Value) + 'static,
    {
        self.register(focus.into(), Watch::Change(Box::new(callback)), data.into());
    }

    /// Watch a value; fires when it changes and the condition holds
    ///
    /// Also fires right away for every advanced session where the
    /// condition already holds.
    pub fn on_change_to<F>(
        &mut self,
        focus: impl Into<Focus>,
        condition: impl Into<Condition>,
        callback: F,
        data: impl Into<Value>,
    ) where
        F: FnMut(SessionId, &Value, Option<&Value>, &Value) + 'static,
    {
        self.register(
            focus.into(),
            Watch::ChangeTo(condition.into(), Box::new(callback)),
            data.into(),
        );
    }

    /// Watch a keyed collection for new elements
    ///
    /// Every element present at registration is replayed once, right away,
    /// for every session that has already been advanced.
    pub fn on_element_added<F>(&mut self, focus: impl Into<Focus>, callback: F, data: impl Into<Value>)
    where
        F: FnMut(SessionId, &Value, Option<&Value>, Option<&Value>, &Value) + 'static,
    {
        self.register(focus.into(), Watch::Added(Box::new(callback)), data.into());
    }

    /// Watch a keyed collection for elements whose payload changed
    pub fn on_element_changed<F>(
        &mut self,
        focus: impl Into<Focus>,
        callback: F,
        data: impl Into<Value>,
    ) where
        F: FnMut(SessionId, &Value, Option<&Value>, Option<&Value>, &Value) + 'static,
    {
        self.register(focus.into(), Watch::Changed(Box::new(callback)), data.into());
    }

    /// Watch a keyed collection for elements that disappeared
    pub fn on_element_removed<F>(
        &mut self,
        focus: impl Into<Focus>,
        callback: F,
        data: impl Into<Value>,
    ) where
        F: FnMut(SessionId, &Value, Option<&Value>, Option<&Value>, &Value) + 'static,
    {
        self.register(focus.into(), Watch::Removed(Box::new(callback)), data.into());
    }

    fn register(&mut self, focus: Focus, watch: Watch, data: Value) {
        let mut subscription = Subscription { focus, watch, data };
        for (&session, generations) in &self.sessions {
            if let Some(current) = &generations.current {
                subscription.fire_initial(session, current);
            }
        }
        self.subscriptions.push(subscription);
    }
}

impl fmt::Debug for Tracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("sessions", &self.sessions.len())
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

impl From<Value> for Condition {
    fn from(value: Value) -> Self {
        Condition::Equals(value)
    }
}

impl From<bool> for Condition {
    fn from(value: bool) -> Self {
        Condition::Equals(Value::Bool(value))
    }
}

impl From<i64> for Condition {
    fn from(value: i64) -> Self {
        Condition::Equals(Value::Int(value))
    }
}

impl From<&str> for Condition {
    fn from(value: &str) -> Self {
        Condition::Equals(Value::from(value))
    }
}
