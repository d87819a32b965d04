//! Learner component: accumulate, correct, train, publish.
//!
//! ```text
//!            offer()            step(): pending >= worker_count
//!   Idle ─────────────► Accumulating ─────────────────────────► Training
//!    ▲                                                              │
//!    │        Discarded / Diverged / Recovered                      │
//!    ├──────────────────────────────────────────────────────────────┤
//!    │                                                              ▼
//!    └──────────────────────────── Published ◄────────────────── Publishing
//! ```
//!
//! The model store holds the source of truth. The learner owns a working
//! copy of both networks and writes `"value"` before `"policy"` so that an
//! actor seeing a new policy version always finds a value network at least
//! as new.
//!
//! # Thread Safety and Lifecycle
//!
//! [`spawn_learner`] moves the learner onto a named thread that polls the
//! transport subscription with a timeout. The thread terminates when:
//! - the shutdown flag is set to true
//! - the stop command is received via [`LearnerHandle`]
//! - every publisher is gone and the queue is drained

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use burn::module::AutodiffModule;
use burn::tensor::backend::AutodiffBackend;
use crossbeam_channel::{Receiver, Sender, TrySendError};

use super::staleness::StalenessCorrector;
use super::trainer::{PpoTrainer, TrainOutcome, TrainReport};
use crate::algorithms::advantage::{AdvantageEstimator, EstimatorInput};
use crate::algorithms::gae::normalize_advantages;
use crate::algorithms::vtrace::importance_ratios;
use crate::config::TrainingConfig;
use crate::core::batch::{Batch, VersionedBatch};
use crate::core::model_version::SharedVersionCounter;
use crate::error::PipelineError;
use crate::messages::{LearnerMsg, LearnerStats};
use crate::metrics::{Counter, MetricValue, SharedCounters, SharedSink};
use crate::nn::{GaussianPolicy, ValueFunction};
use crate::store::{snapshot_key, ModelState, SharedStore, POLICY_KEY, VALUE_KEY};
use crate::transport::BatchSubscription;

/// Learner lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LearnerState {
    #[default]
    Idle,
    Accumulating,
    Training,
    Publishing,
}

/// Summary of one published version.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LearnerReport {
    /// Version written to the store
    pub version: u64,
    pub train: TrainReport,
    /// Batches admitted this round
    pub batches: usize,
    /// Batches dropped as stale this round
    pub dropped: usize,
    /// Lag of each admitted batch, freshest first
    pub lags: Vec<u64>,
    pub train_ms: f64,
    pub publish_ms: f64,
}

/// Result of one [`Learner::step`].
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Fewer than `worker_count` batches are buffered.
    Waiting,
    /// Every buffered batch was stale.
    Discarded,
    Published(LearnerReport),
    /// KL exceeded the hard limit; the working copy was rolled back.
    Diverged { kl: f64 },
    /// The canary failed; the working copy was reloaded.
    Recovered,
}

/// Single learner owning the working networks.
pub struct Learner<B, P, V>
where
    B: AutodiffBackend,
    P: GaussianPolicy<B> + AutodiffModule<B>,
    V: ValueFunction<B> + AutodiffModule<B>,
{
    trainer: PpoTrainer<B, P, V>,
    store: SharedStore,
    sink: SharedSink,
    counters: SharedCounters,
    estimator: AdvantageEstimator,
    corrector: StalenessCorrector,
    config: TrainingConfig,
    version: u64,
    published: Option<SharedVersionCounter>,
    state: LearnerState,
    pending: Vec<VersionedBatch>,
}

impl<B, P, V> Learner<B, P, V>
where
    B: AutodiffBackend,
    P: GaussianPolicy<B> + AutodiffModule<B>,
    V: ValueFunction<B> + AutodiffModule<B>,
{
    /// Resume from the store when a policy is present, otherwise publish
    /// the given networks at version 0.
    pub fn new(
        trainer: PpoTrainer<B, P, V>,
        config: &TrainingConfig,
        store: SharedStore,
        sink: SharedSink,
        counters: SharedCounters,
    ) -> Result<Self, PipelineError> {
        config.validate()?;

        let mut learner = Self {
            trainer,
            store,
            sink,
            counters,
            estimator: AdvantageEstimator::from_config(config),
            corrector: StalenessCorrector::from_config(config),
            config: config.clone(),
            version: 0,
            published: None,
            state: LearnerState::Idle,
            pending: Vec::new(),
        };

        if learner.store.get(POLICY_KEY)?.is_some() {
            learner.reload()?;
            log::info!(
                "learner resumed: version={} lr={:.3e}",
                learner.version,
                learner.trainer.controller().lr()
            );
        } else {
            let (policy, value) = learner.trainer.snapshot(0)?;
            learner.write_models(policy, value)?;
            log::info!("learner bootstrapped: version=0");
        }
        Ok(learner)
    }

    /// Mirror every published version into `counter`.
    pub fn with_version_counter(mut self, counter: SharedVersionCounter) -> Self {
        counter.advance_to(self.version);
        self.published = Some(counter);
        self
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn state(&self) -> LearnerState {
        self.state
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn trainer(&self) -> &PpoTrainer<B, P, V> {
        &self.trainer
    }

    #[cfg(test)]
    pub(crate) fn trainer_mut(&mut self) -> &mut PpoTrainer<B, P, V> {
        &mut self.trainer
    }

    /// Buffer one batch for the next round.
    pub fn offer(&mut self, batch: VersionedBatch) {
        self.counters.incr(Counter::BatchesReceived);
        self.pending.push(batch);
        if self.state == LearnerState::Idle {
            self.state = LearnerState::Accumulating;
        }
    }

    /// Train once `worker_count` batches are buffered.
    ///
    /// Never blocks. Store failures during publish or reload are returned;
    /// everything else is resolved into a [`StepOutcome`].
    pub fn step(&mut self) -> Result<StepOutcome, PipelineError> {
        if self.pending.len() < self.config.worker_count {
            return Ok(StepOutcome::Waiting);
        }
        self.state = LearnerState::Training;
        let result = self.run_round();
        self.state = if self.pending.is_empty() {
            LearnerState::Idle
        } else {
            LearnerState::Accumulating
        };
        result
    }

    fn run_round(&mut self) -> Result<StepOutcome, PipelineError> {
        let batches = std::mem::take(&mut self.pending);
        let correction = self.corrector.correct(batches, self.version);

        let dropped = correction.dropped.len();
        for _ in &correction.dropped {
            self.counters.record(Counter::StaleDropped, self.sink.as_ref());
        }
        if correction.admitted.is_empty() {
            log::warn!("round discarded: version={} dropped={dropped}", self.version);
            return Ok(StepOutcome::Discarded);
        }

        let lags = correction.lags();
        let mut prepared = Vec::with_capacity(correction.admitted.len());
        for admitted in correction.admitted {
            let trust = admitted.trust;
            let mut batch = if self.estimator.is_off_policy() {
                self.reestimate(admitted.batch.batch, trust)?
            } else {
                admitted.batch.batch
            };
            if self.config.normalize_advantages {
                batch = normalize_within(batch, trust)?;
            }
            prepared.push(batch);
        }
        let batches = prepared.len();
        let batch = Batch::concat(prepared)?;
        self.counters.add(Counter::BatchesTrained, batches as u64);

        let started = Instant::now();
        let outcome = match self.trainer.train(&batch) {
            Ok(outcome) => outcome,
            Err(err) if err.requires_reload() => {
                log::error!("learner reloading: version={} error={err}", self.version);
                self.counters.record(Counter::ModelReloads, self.sink.as_ref());
                self.reload()?;
                return Ok(StepOutcome::Recovered);
            }
            Err(err) => return Err(err),
        };
        let train_ms = started.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            TrainOutcome::Diverged { kl, report } => {
                self.counters.record(Counter::Divergences, self.sink.as_ref());
                self.record_skipped(&report);
                log::warn!(
                    "policy diverged: version={} kl={kl:.5} kl_max={:.5} epochs={}",
                    self.version,
                    self.config.kl_max,
                    report.epochs_completed
                );
                self.reload()?;
                Ok(StepOutcome::Diverged { kl })
            }
            TrainOutcome::Completed(train) => {
                self.record_skipped(&train);
                let report = LearnerReport {
                    version: self.version,
                    train,
                    batches,
                    dropped,
                    lags,
                    train_ms,
                    publish_ms: 0.0,
                };
                self.publish(report).map(StepOutcome::Published)
            }
        }
    }

    /// Recompute V-trace targets against the current networks, then reapply
    /// the staleness discount.
    fn reestimate(&self, batch: Batch, trust: f32) -> Result<Batch, PipelineError> {
        let (target_log_probs, values) = self.trainer.evaluate(&batch);
        let ratios = importance_ratios(batch.log_probs(), &target_log_probs);
        let input =
            EstimatorInput::new(batch.rewards(), &values, batch.dones()).with_ratios(&ratios);
        let estimates = self.estimator.estimate(&input);
        Ok(batch
            .with_estimates(estimates.advantages, estimates.returns)?
            .scale_advantages(trust))
    }

    fn record_skipped(&self, report: &TrainReport) {
        if report.skipped_minibatches > 0 {
            self.counters
                .add(Counter::MinibatchesSkipped, report.skipped_minibatches as u64);
        }
    }

    fn publish(&mut self, mut report: LearnerReport) -> Result<LearnerReport, PipelineError> {
        self.state = LearnerState::Publishing;
        let started = Instant::now();
        let version = self.version + 1;

        let (policy, value) = self.trainer.snapshot(version)?;
        let interval = self.config.snapshot_interval;
        let archive = interval > 0 && version % interval == 0;
        let snapshot = archive.then(|| ModelState::new(policy.weights.clone(), version));
        self.write_models(policy, value)?;
        if let Some(snapshot) = snapshot {
            self.store.set(&snapshot_key(version), snapshot)?;
        }

        self.version = version;
        if let Some(counter) = &self.published {
            counter.advance_to(version);
        }
        report.version = version;
        report.publish_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.counters.record(Counter::Publishes, self.sink.as_ref());
        self.emit(&report);

        log::info!(
            "published version={version} rows={} batches={} dropped={} kl={:.5} lr={:.3e}",
            report.train.rows,
            report.batches,
            report.dropped,
            report.train.kl,
            report.train.lr
        );
        Ok(report)
    }

    fn write_models(&self, policy: ModelState, value: ModelState) -> Result<(), PipelineError> {
        self.store.set(VALUE_KEY, value)?;
        self.store.set(POLICY_KEY, policy)?;
        Ok(())
    }

    /// Replace the working copy with the last persisted state.
    fn reload(&mut self) -> Result<(), PipelineError> {
        let policy = self.store.require(POLICY_KEY)?;
        let value = self.store.require(VALUE_KEY)?;
        self.trainer.restore(&policy, &value)?;
        self.version = policy.version;

        if let Err(err) = self.trainer.check_health() {
            log::error!("stored model is unhealthy: version={} error={err}", self.version);
            return Err(err);
        }
        Ok(())
    }

    fn emit(&self, report: &LearnerReport) {
        let sink = self.sink.as_ref();
        let train = &report.train;
        sink.emit("learner/version", MetricValue::from(report.version));
        sink.emit("learner/policy_loss", MetricValue::from(train.policy_loss));
        sink.emit("learner/value_loss", MetricValue::from(train.value_loss));
        sink.emit("learner/entropy", MetricValue::from(train.entropy));
        sink.emit("learner/kl", MetricValue::Scalar(train.kl));
        sink.emit("learner/lr", MetricValue::Scalar(train.lr));
        sink.emit("learner/policy_grad_norm", MetricValue::from(train.policy_grad_norm));
        sink.emit("learner/value_grad_norm", MetricValue::from(train.value_grad_norm));
        sink.emit("learner/batch_rows", MetricValue::from(train.rows as u64));
        sink.emit("learner/batches", MetricValue::from(report.batches as u64));
        sink.emit("learner/stale_dropped", MetricValue::from(report.dropped as u64));
        sink.emit(
            "learner/lags",
            MetricValue::Series(report.lags.iter().map(|&lag| lag as f64).collect()),
        );
        sink.emit("learner/train_ms", MetricValue::Scalar(report.train_ms));
        sink.emit("learner/publish_ms", MetricValue::Scalar(report.publish_ms));
    }
}

/// Normalize one admitted batch's advantages, then reapply its trust.
///
/// `batch` arrives with advantages already scaled by `trust`. Normalization
/// is scale-free, so the factor is applied again afterwards; a trust of 0
/// leaves every advantage at 0.
pub(crate) fn normalize_within(batch: Batch, trust: f32) -> Result<Batch, PipelineError> {
    let mut advantages = batch.advantages().to_vec();
    normalize_advantages(&mut advantages);
    let returns = batch.returns().to_vec();
    Ok(batch.with_estimates(advantages, returns)?.scale_advantages(trust))
}

/// Handle to a running learner thread.
///
/// Commands are delivered through a bounded channel and processed on the
/// learner's next poll (within `learner_poll_ms`).
pub struct LearnerHandle {
    /// Thread handle; yields the final stats
    pub thread: std::thread::JoinHandle<Result<LearnerStats, PipelineError>>,
    /// Channel to receive stats from learner
    pub stats_rx: Receiver<LearnerStats>,
    /// Channel to send commands to learner
    pub cmd_tx: Sender<LearnerMsg>,
    /// Counter for dropped stats (for diagnostics)
    pub dropped_stats: Arc<AtomicUsize>,
}

impl LearnerHandle {
    /// Send stop command to learner.
    ///
    /// Returns `true` if the command was sent successfully, `false` if the
    /// channel is full or disconnected.
    pub fn stop(&self) -> bool {
        self.cmd_tx.try_send(LearnerMsg::Stop).is_ok()
    }

    /// Send stop command and wait for learner to finish.
    pub fn stop_and_wait(self) -> std::thread::Result<Result<LearnerStats, PipelineError>> {
        let _ = self.cmd_tx.try_send(LearnerMsg::Stop);
        self.thread.join()
    }

    pub fn pause(&self) -> bool {
        self.cmd_tx.try_send(LearnerMsg::Pause).is_ok()
    }

    pub fn resume(&self) -> bool {
        self.cmd_tx.try_send(LearnerMsg::Resume).is_ok()
    }

    /// Get the oldest buffered stats (non-blocking).
    pub fn get_stats(&self) -> Option<LearnerStats> {
        self.stats_rx.try_recv().ok()
    }

    /// Drain all available stats, oldest first.
    pub fn drain_stats(&self) -> Vec<LearnerStats> {
        self.stats_rx.try_iter().collect()
    }

    /// Ask the learner to send its stats.
    pub fn request_stats(&self) -> bool {
        self.cmd_tx.try_send(LearnerMsg::RequestStats).is_ok()
    }

    pub fn is_running(&self) -> bool {
        !self.thread.is_finished()
    }

    pub fn get_dropped_stats_count(&self) -> usize {
        self.dropped_stats.load(Ordering::Relaxed)
    }

    pub fn join(self) -> std::thread::Result<Result<LearnerStats, PipelineError>> {
        self.thread.join()
    }
}

/// Run `learner` on its own thread, fed by `subscription`.
///
/// Recoverable errors are logged and the loop continues. Any other error
/// stops the thread and is returned from [`LearnerHandle::join`].
pub fn spawn_learner<B, P, V>(
    mut learner: Learner<B, P, V>,
    subscription: BatchSubscription,
    shutdown: Arc<AtomicBool>,
) -> Result<LearnerHandle, PipelineError>
where
    B: AutodiffBackend,
    P: GaussianPolicy<B> + AutodiffModule<B>,
    V: ValueFunction<B> + AutodiffModule<B>,
    Learner<B, P, V>: Send + 'static,
{
    let (stats_tx, stats_rx) = crossbeam_channel::bounded(100);
    let (cmd_tx, cmd_rx) = crossbeam_channel::bounded::<LearnerMsg>(100);
    let dropped_stats = Arc::new(AtomicUsize::new(0));
    let dropped = dropped_stats.clone();
    let poll = learner.config.learner_poll_interval();

    let thread = std::thread::Builder::new()
        .name("tank-learner".to_string())
        .spawn(move || {
            let started = Instant::now();
            let mut stats = LearnerStats::new();
            stats.model_version = learner.version();

            let snapshot = |stats: &mut LearnerStats, learner: &Learner<B, P, V>| {
                stats.model_version = learner.version();
                stats.set_elapsed(
                    started.elapsed().as_secs_f32(),
                    learner.counters.get(Counter::Publishes),
                );
                stats.clone()
            };

            'outer: loop {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }

                while let Ok(msg) = cmd_rx.try_recv() {
                    match msg {
                        LearnerMsg::Stop => break 'outer,
                        LearnerMsg::Pause => stats.paused = true,
                        LearnerMsg::Resume => stats.paused = false,
                        LearnerMsg::RequestStats => {
                            let current = snapshot(&mut stats, &learner);
                            if let Err(TrySendError::Full(_)) = stats_tx.try_send(current) {
                                dropped.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                }

                if stats.paused {
                    std::thread::sleep(poll);
                    continue;
                }

                match subscription.next_timeout(poll) {
                    Ok(Some(batch)) => {
                        learner.offer(batch);
                        for batch in subscription.drain() {
                            learner.offer(batch);
                        }
                    }
                    Ok(None) => continue,
                    Err(PipelineError::TransportClosed) => {
                        log::info!("transport closed, learner exiting");
                        break;
                    }
                    Err(err) => return Err(err),
                }

                match learner.step() {
                    Ok(outcome) => stats.record(&outcome),
                    Err(err) if err.is_recoverable() => {
                        log::warn!("learner step failed: error={err}");
                    }
                    Err(err) => {
                        log::error!("learner stopped: version={} error={err}", learner.version());
                        return Err(err);
                    }
                }
            }

            Ok(snapshot(&mut stats, &learner))
        })
        .map_err(|source| PipelineError::Spawn {
            name: "learner".to_string(),
            source,
        })?;

    Ok(LearnerHandle {
        thread,
        stats_rx,
        cmd_tx,
        dropped_stats,
    })
}
