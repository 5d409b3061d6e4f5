//! Scheduler configuration - step lengths, timer periods and merge policy
//!
//! Loaded from RON. Every field has a default, so a config file only needs
//! to name what it changes:
//!
//! ```ron
//! (
//!     server_step_ms: 50,
//!     client_prediction: false,
//! )
//! ```

use crate::{Error, Result};
use replica_core::{Merger, Path};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing and merge settings shared by the server and client loops
///
/// # Example
///
/// ```
/// use replica_hub::SchedulerConfig;
/// use std::time::Duration;
///
/// let config = SchedulerConfig::from_ron_str("(server_step_ms: 1000)").unwrap();
/// assert_eq!(config.frame_length(), Duration::from_secs(1));
/// assert!(config.client_prediction);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Fixed length of one authoritative server step
    pub server_step_ms: u64,
    /// How often the server timer samples the clock
    pub server_timer_ms: u64,
    /// How often the client timer fires
    pub client_tick_ms: u64,
    /// Run hooks locally and resimulate on the client
    pub client_prediction: bool,
    /// Steps run by one server timer firing before a catch-up warning
    pub overrun_warn_steps: u32,
    /// Identity fields no patch may overwrite
    pub protected_paths: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            server_step_ms: 45,
            server_timer_ms: 15,
            client_tick_ms: 16,
            client_prediction: true,
            overrun_warn_steps: 8,
            protected_paths: vec!["session.id".to_string()],
        }
    }
}

impl SchedulerConfig {
    /// Parse and validate a RON config
    pub fn from_ron_str(content: &str) -> Result<Self> {
        let config: SchedulerConfig = ron::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a RON config file
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_ron_str(&content)
    }

    /// Check that the periods are usable
    ///
    /// A zero step would make the server accumulator loop forever.
    pub fn validate(&self) -> Result<()> {
        if self.server_step_ms == 0 {
            return Err(Error::Config("server_step_ms must be positive".into()));
        }
        if self.server_timer_ms == 0 || self.client_tick_ms == 0 {
            return Err(Error::Config("timer periods must be positive".into()));
        }
        Ok(())
    }

    /// Fixed server step length
    pub fn frame_length(&self) -> Duration {
        Duration::from_millis(self.server_step_ms)
    }

    /// Server timer period
    pub fn server_timer_period(&self) -> Duration {
        Duration::from_millis(self.server_timer_ms)
    }

    /// Client timer period
    pub fn client_tick_period(&self) -> Duration {
        Duration::from_millis(self.client_tick_ms)
    }

    /// Build the merge policy, parsing every protected path
    pub fn merger(&self) -> Result<Merger> {
        let protected = self
            .protected_paths
            .iter()
            .map(|raw| Path::parse(raw))
            .collect::<replica_core::Result<Vec<_>>>()?;
        Ok(Merger::with_protected(protected))
    }
}
