//! Replica Hub - tick scheduling for server and client
//!
//! This crate drives time forward. Game logic is plugged in as hooks on a
//! [`HookPipeline`]; the loops decide when and with what delta those hooks
//! run, and feed the results to the tracker.
//!
//! - [`ServerLoop`]: fixed-timestep accumulator over many sessions
//! - [`ClientLoop`]: variable-timestep loop driving resimulation
//! - [`driver`]: tokio timers feeding either loop
//!
//! # Example
//!
//! ```
//! use replica_core::{Patch, SessionId, StateTree, Tracker, Value};
//! use replica_hub::{HookPipeline, SchedulerConfig, ServerLoop, TickContext};
//! use std::time::{Duration, Instant};
//!
//! let mut pipeline = HookPipeline::new();
//! pipeline.on_tick("*", |state: &StateTree, _: &TickContext<'_>| {
//!     let count = state.as_value().get("count").and_then(Value::as_int).unwrap_or(0);
//!     Some(Patch::set("count", count + 1))
//! });
//!
//! let config = SchedulerConfig::from_ron_str("(server_step_ms: 1000)").unwrap();
//! let mut server = ServerLoop::new(config, pipeline, Tracker::new()).unwrap();
//! server.add_session(SessionId::new(1), "arena", StateTree::from_entries([("count", 0)]));
//!
//! let t0 = Instant::now();
//! server.start(t0);
//! assert_eq!(server.on_timer(t0 + Duration::from_millis(5000)), 5);
//! ```

mod client;
mod config;
pub mod driver;
mod error;
mod hooks;
mod server;
pub mod session;

pub use client::ClientLoop;
pub use config::SchedulerConfig;
pub use error::{Error, Result};
pub use hooks::{Hook, HookPipeline, InputHandler, ModeFilter, Stage, TickContext};
pub use server::ServerLoop;
pub use session::SessionFlags;
