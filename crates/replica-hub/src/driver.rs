//! Timer drivers for the loops
//!
//! The loops themselves take the current time as an argument; these
//! drivers feed them from a tokio interval until a shutdown signal is
//! observed. Both run on the calling task: one firing is handled to
//! completion before the next one is awaited.

use crate::{ClientLoop, ServerLoop};
use tokio::sync::watch;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Drive a server loop until `shutdown` turns true or its sender drops
///
/// `after_timer` runs after every firing with the number of steps that
/// firing ran; use it to feed input in and push snapshots out. Returns the
/// total number of steps run.
pub async fn run_server<F>(server: &mut ServerLoop, mut shutdown: watch::Receiver<bool>, mut after_timer: F) -> u64
where
    F: FnMut(&mut ServerLoop, u32),
{
    let mut timer = interval(server.config().server_timer_period());
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // The first tick completes immediately
    timer.tick().await;
    server.start(Instant::now().into_std());

    loop {
        tokio::select! {
            _ = timer.tick() => {
                let steps = server.on_timer(Instant::now().into_std());
                after_timer(server, steps);
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("server shutdown requested");
                    break;
                }
            }
        }
    }

    server.stop();
    info!(steps_run = server.steps_run(), "server driver exited");
    server.steps_run()
}

/// Drive a client loop until `shutdown` turns true or its sender drops
///
/// `after_tick` runs after every firing with whether a tick was simulated;
/// use it to deliver snapshots and send captured input.
pub async fn run_client<F>(client: &mut ClientLoop, mut shutdown: watch::Receiver<bool>, period: std::time::Duration, mut after_tick: F) -> u64
where
    F: FnMut(&mut ClientLoop, bool),
{
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    timer.tick().await;
    client.start(Instant::now().into_std());

    loop {
        tokio::select! {
            _ = timer.tick() => {
                let ran = client.on_timer(Instant::now().into_std());
                after_tick(client, ran);
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("client shutdown requested");
                    break;
                }
            }
        }
    }

    client.stop();
    info!(ticks_run = client.ticks_run(), "client driver exited");
    client.ticks_run()
}
