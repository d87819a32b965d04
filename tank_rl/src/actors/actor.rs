//! Actor threads.
//!
//! Each actor runs one [`RolloutWorker`] on a named thread and checks its
//! command channel between episodes. The thread terminates when:
//! - the shutdown flag is set to true
//! - the stop command is received via [`ActorHandle`]
//! - the transport is closed
//! - the worker returns an unrecoverable error

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};

use super::agent::TankAgent;
use super::rollout::RolloutWorker;
use crate::environment::Environment;
use crate::error::PipelineError;
use crate::messages::{ActorMsg, ActorStats};

/// Sleep between command checks while paused.
const PAUSE_POLL: Duration = Duration::from_millis(10);

/// Handle for controlling a spawned actor thread.
pub struct ActorHandle {
    pub actor_id: usize,
    /// Thread handle; yields the final stats
    pub thread: std::thread::JoinHandle<Result<ActorStats, PipelineError>>,
    /// Channel to receive stats from actor
    pub stats_rx: Receiver<ActorStats>,
    /// Channel to send commands to actor
    pub cmd_tx: Sender<ActorMsg>,
    /// Counter for dropped stats (for diagnostics)
    pub dropped_stats: Arc<AtomicUsize>,
}

impl ActorHandle {
    /// Send stop command to actor.
    ///
    /// Returns `true` if the command was sent successfully.
    pub fn stop(&self) -> bool {
        self.cmd_tx.try_send(ActorMsg::Stop).is_ok()
    }

    pub fn pause(&self) -> bool {
        self.cmd_tx.try_send(ActorMsg::Pause).is_ok()
    }

    pub fn resume(&self) -> bool {
        self.cmd_tx.try_send(ActorMsg::Resume).is_ok()
    }

    pub fn request_stats(&self) -> bool {
        self.cmd_tx.try_send(ActorMsg::RequestStats).is_ok()
    }

    /// Get the oldest buffered stats (non-blocking).
    pub fn get_stats(&self) -> Option<ActorStats> {
        self.stats_rx.try_recv().ok()
    }

    pub fn is_running(&self) -> bool {
        !self.thread.is_finished()
    }

    pub fn get_dropped_stats_count(&self) -> usize {
        self.dropped_stats.load(Ordering::Relaxed)
    }

    /// Wait for actor thread to finish.
    pub fn join(self) -> std::thread::Result<Result<ActorStats, PipelineError>> {
        self.thread.join()
    }
}

/// Run `worker` on thread `tank-actor-<id>`.
pub fn spawn_actor<E, A>(
    mut worker: RolloutWorker<E, A>,
    shutdown: Arc<AtomicBool>,
) -> Result<ActorHandle, PipelineError>
where
    E: Environment + 'static,
    A: TankAgent + 'static,
{
    let actor_id = worker.actor_id();
    let (stats_tx, stats_rx) = crossbeam_channel::bounded(100);
    let (cmd_tx, cmd_rx) = crossbeam_channel::bounded::<ActorMsg>(100);
    let dropped_stats = Arc::new(AtomicUsize::new(0));
    let dropped = dropped_stats.clone();

    let thread = std::thread::Builder::new()
        .name(format!("tank-actor-{actor_id}"))
        .spawn(move || {
            let mut paused = false;

            'outer: loop {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }

                while let Ok(msg) = cmd_rx.try_recv() {
                    match msg {
                        ActorMsg::Stop => break 'outer,
                        ActorMsg::Pause => paused = true,
                        ActorMsg::Resume => paused = false,
                        ActorMsg::RequestStats => {
                            worker.set_paused(paused);
                            if let Err(TrySendError::Full(_)) =
                                stats_tx.try_send(worker.stats().clone())
                            {
                                dropped.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                }

                if paused {
                    std::thread::sleep(PAUSE_POLL);
                    continue;
                }

                match worker.step() {
                    Ok(_) => {}
                    Err(PipelineError::TransportClosed) => {
                        log::info!("transport closed, actor {actor_id} exiting");
                        break;
                    }
                    Err(err) => {
                        log::error!("actor {actor_id} stopped: error={err}");
                        return Err(err);
                    }
                }
            }

            worker.set_paused(paused);
            Ok(worker.stats().clone())
        })
        .map_err(|source| PipelineError::Spawn {
            name: format!("actor-{actor_id}"),
            source,
        })?;

    Ok(ActorHandle {
        actor_id,
        thread,
        stats_rx,
        cmd_tx,
        dropped_stats,
    })
}
