//! Counter sync demo
//!
//! One authoritative server loop and one predicting client loop share a
//! session in a single process. Input and snapshots travel as encoded
//! bytes over in-memory channels. The client sends a frame marker every
//! tick but only reads its inbox every few ticks, so there are always a
//! handful of unacknowledged frames to resimulate.
//!
//! ```text
//! cargo run -p counter_sync -- [config.ron]
//! RUST_LOG=replica_netcode=debug cargo run -p counter_sync
//! ```

use replica_core::{Patch, Path, SessionId, StateTree, Tracker, Value};
use replica_hub::driver::{run_client, run_server};
use replica_hub::{ClientLoop, HookPipeline, SchedulerConfig, ServerLoop, TickContext};
use replica_netcode::{AuthoritativeSnapshot, InputMessage, InputRecord};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const SESSION: SessionId = SessionId(1);
const MODE: &str = "counter";
const RUN_FOR: Duration = Duration::from_secs(2);
/// Client firings between reads of the snapshot inbox
const INBOX_EVERY: u64 = 6;
/// Client firings between simulated key presses
const PRESS_EVERY: u64 = 10;

fn int(state: &StateTree, key: &str) -> i64 {
    state.as_value().get(key).and_then(Value::as_int).unwrap_or(0)
}

/// Same game logic on both sides: input adds to `count`, ticks add to `elapsed`
fn pipeline() -> HookPipeline {
    let mut pipeline = HookPipeline::new();
    pipeline
        .on_input(MODE, |state: &StateTree, input: &InputRecord, _: &TickContext<'_>| {
            let add = input.raw_data.get("add").and_then(Value::as_int)?;
            Some(Patch::set("count", int(state, "count") + add))
        })
        .on_tick(MODE, |state: &StateTree, ctx: &TickContext<'_>| {
            let elapsed = state.as_value().get("elapsed").and_then(Value::as_float).unwrap_or(0.0);
            Some(Patch::set("elapsed", elapsed + ctx.delta))
        });
    pipeline
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> replica_hub::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => SchedulerConfig::load(path)?,
        None => SchedulerConfig::default(),
    };
    info!(?config, "starting");

    let initial = StateTree::from_entries([("count", Value::from(0)), ("elapsed", Value::from(0.0))]);

    let mut server = ServerLoop::new(config.clone(), pipeline(), Tracker::new())?;
    server.add_session(SESSION, MODE, initial.clone());

    let mut tracker = Tracker::new();
    tracker.on_change_of(
        Path::parse("count")?,
        |session: SessionId, current: &Value, prior: Option<&Value>, _: &Value| {
            info!(%session, %current, ?prior, "predicted count changed");
        },
        Value::Null,
    );
    let mut client = ClientLoop::new(&config, SESSION, MODE, initial, pipeline(), tracker)?;

    let (input_tx, mut input_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let (snapshot_tx, mut snapshot_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server_run = run_server(&mut server, shutdown_rx.clone(), |server, steps| {
        while let Ok(bytes) = input_rx.try_recv() {
            let received = InputMessage::decode(&bytes)
                .map_err(replica_hub::Error::from)
                .and_then(|message| server.receive_input(SESSION, message));
            if let Err(e) = received {
                warn!(error = %e, "dropping input");
            }
        }
        if steps == 0 {
            return;
        }
        let encoded = server
            .snapshot(SESSION)
            .and_then(|snapshot| snapshot.encode().map_err(replica_hub::Error::from));
        match encoded {
            Ok(bytes) => {
                let _ = snapshot_tx.send(bytes);
            }
            Err(e) => warn!(error = %e, "could not publish snapshot"),
        }
    });

    let mut firings = 0u64;
    let client_run = run_client(&mut client, shutdown_rx, config.client_tick_period(), |client, _ran| {
        firings += 1;
        if firings % INBOX_EVERY == 0 {
            while let Ok(bytes) = snapshot_rx.try_recv() {
                match AuthoritativeSnapshot::decode(&bytes) {
                    Ok(snapshot) => {
                        client.on_snapshot(snapshot);
                    }
                    Err(e) => warn!(error = %e, "dropping snapshot"),
                }
            }
        }
        let mut outbound = client.take_outbound();
        if firings % PRESS_EVERY == 0 {
            outbound.push(client.capture("player-1", Value::map([("add", 1)])));
        }
        for message in outbound {
            match message.encode() {
                Ok(bytes) => {
                    let _ = input_tx.send(bytes);
                }
                Err(e) => warn!(error = %e, "could not send input"),
            }
        }
    });

    let stop = async {
        tokio::time::sleep(RUN_FOR).await;
        let _ = shutdown_tx.send(true);
    };

    let (steps, ticks, ()) = tokio::join!(server_run, client_run, stop);

    let server_count = server.mutator().state(SESSION).map_or(0, |state| int(state, "count"));
    let client_count = client.state().map_or(0, |state| int(state, "count"));
    info!(
        steps,
        ticks,
        server_count,
        client_count,
        unacknowledged_frames = client.frame_store().len(),
        "finished"
    );
    Ok(())
}
