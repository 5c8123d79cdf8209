//! Worker lifecycle supervisor.
//!
//! Owns the mapping from a [`ManagedTarget`] record to an OS worker process
//! and keeps the record's `status`/`worker_pid` consistent with reality:
//!
//! ```text
//! idle/error --start--> resolving --probe ok--> launching --spawned--> running
//! resolving --unreachable/unsupported--> error
//! launching --spawn failed--> error
//! running --exit--> idle (--restart delay--> start again if auto_restart)
//! any --stop--> stopping --signaled--> idle
//! ```
//!
//! Every check-and-set of a target's status happens under one short
//! transition lock that is never held across an await; each step of an
//! in-flight start re-validates the status it expects after resuming, so a
//! stop or delete that lands mid-start wins.

pub mod probe;
pub mod spawner;

pub use probe::{DiscoveryProbe, ProbeError, StatusPingProbe};
pub use spawner::{OsSpawner, SpawnedWorker, WorkerSpawner};

use crate::records::versions;
use crate::store::{Document, DocumentStore, Filter, Update};
use keepalive_core::events::{FailureNotice, StartOutcome, StartProgress, StateChange};
use keepalive_core::types::{ErrorReason, ManagedTarget, TargetStatus};
use keepalive_core::worker::{LaunchSpec, WorkerExit};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::AbortHandle;

/// Poll interval while waiting for a signaled worker to go away.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Backoff between an unexpected exit and the automatic restart.
    pub restart_delay: Duration,
    /// Upper bound on the discovery probe.
    pub probe_timeout: Duration,
    /// How long a start waits for the previous, signaled worker to exit.
    pub drain_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            restart_delay: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// Progress callback passed to [`Supervisor::start`].
pub type ProgressFn = Box<dyn Fn(StartProgress) + Send + Sync>;

type StateListener = Arc<dyn Fn(&StateChange) + Send + Sync>;
type FailureListener = Arc<dyn Fn(&FailureNotice) + Send + Sync>;

pub struct Supervisor {
    store: Arc<DocumentStore>,
    spawner: Arc<dyn WorkerSpawner>,
    probe: Arc<dyn DiscoveryProbe>,
    config: SupervisorConfig,
    /// Serializes status check-and-set across all targets.
    transitions: Mutex<()>,
    /// Signaled pids per target that may not have exited yet.
    draining: Mutex<HashMap<String, u32>>,
    /// Pending auto-restarts, tagged with the generation that scheduled them.
    restart_timers: Mutex<HashMap<String, (u64, AbortHandle)>>,
    restart_generation: AtomicU64,
    shutting_down: AtomicBool,
    state_listeners: Mutex<Vec<StateListener>>,
    failure_listeners: Mutex<Vec<FailureListener>>,
}

fn status_fields(status: TargetStatus, pid: Option<u32>) -> Document {
    let mut fields = Document::new();
    fields.insert("status".into(), json!(status));
    fields.insert("worker_pid".into(), json!(pid));
    fields
}

impl Supervisor {
    pub fn new(
        store: Arc<DocumentStore>,
        spawner: Arc<dyn WorkerSpawner>,
        probe: Arc<dyn DiscoveryProbe>,
        config: SupervisorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            spawner,
            probe,
            config,
            transitions: Mutex::new(()),
            draining: Mutex::new(HashMap::new()),
            restart_timers: Mutex::new(HashMap::new()),
            restart_generation: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
            state_listeners: Mutex::new(Vec::new()),
            failure_listeners: Mutex::new(Vec::new()),
        })
    }

    /// Subscribe to every persisted status transition.
    pub fn on_state_change(&self, listener: impl Fn(&StateChange) + Send + Sync + 'static) {
        self.state_listeners.lock().push(Arc::new(listener));
    }

    /// Subscribe to unexpected exits of targets with `notify_on_failure` set.
    pub fn on_failure_notification(&self, listener: impl Fn(&FailureNotice) + Send + Sync + 'static) {
        self.failure_listeners.lock().push(Arc::new(listener));
    }

    fn load(&self, target_id: &str) -> Option<ManagedTarget> {
        self.store.find_one_as(&Filter::by_id(target_id))
    }

    fn persist(&self, target_id: &str, changes: Document) -> Option<ManagedTarget> {
        match self.store.update_record(target_id, Update::SetFields(changes)) {
            Ok(target) => Some(target),
            Err(e) => {
                log::warn!("Failed to update target {}: {}", target_id, e);
                None
            }
        }
    }

    fn emit_state(&self, target: &ManagedTarget) {
        let change = StateChange {
            target_id: target.id.clone(),
            owner_id: target.owner_id,
            status: target.status,
        };
        let listeners = self.state_listeners.lock().clone();
        for listener in listeners {
            listener(&change);
        }
    }

    fn emit_failure(&self, notice: &FailureNotice) {
        let listeners = self.failure_listeners.lock().clone();
        for listener in listeners {
            listener(notice);
        }
    }

    /// Bring up a worker for `target_id`.
    ///
    /// Never returns an error: every way a start can end is a [`StartOutcome`].
    pub async fn start(self: &Arc<Self>, target_id: &str, progress: Option<ProgressFn>) -> StartOutcome {
        self.cancel_restart(target_id);
        if self.shutting_down.load(Ordering::SeqCst) {
            return StartOutcome::Cancelled;
        }
        let report = |stage: StartProgress| {
            if let Some(progress) = &progress {
                progress(stage);
            }
        };

        let mut transitions = Vec::new();
        let target = {
            let _guard = self.transitions.lock();
            let Some(target) = self.load(target_id) else {
                return StartOutcome::NotFound;
            };
            if !target.kind.is_supported() {
                log::info!("Refusing to start {}: {:?} targets are no longer supported", target_id, target.kind);
                return StartOutcome::UnsupportedKind;
            }
            let worker_alive = target.worker_pid.is_some_and(|pid| self.spawner.is_alive(pid));
            if target.status == TargetStatus::Running && !worker_alive {
                log::warn!(
                    "Target {} was marked running but pid {:?} is gone, resetting to idle",
                    target_id,
                    target.worker_pid
                );
                transitions.extend(self.persist(target_id, status_fields(TargetStatus::Idle, None)));
            } else if !target.status.accepts_start() || worker_alive {
                return StartOutcome::AlreadyRunning;
            }
            match self.persist(target_id, status_fields(TargetStatus::Resolving, None)) {
                Some(target) => target,
                None => return StartOutcome::NotFound,
            }
        };
        transitions.push(target.clone());
        for changed in &transitions {
            self.emit_state(changed);
        }
        report(StartProgress::Resolving);

        let probed = tokio::time::timeout(
            self.config.probe_timeout,
            self.probe.probe(&target.host, target.port),
        )
        .await;
        let protocol = match probed {
            Ok(Ok(protocol)) => protocol,
            Ok(Err(e)) => {
                log::warn!("Discovery probe for {} failed: {}", target.address(), e);
                return self.fail_start(target_id, ErrorReason::Unreachable, StartOutcome::Unreachable);
            }
            Err(_) => {
                log::warn!(
                    "Discovery probe for {} timed out after {:?}",
                    target.address(),
                    self.config.probe_timeout
                );
                return self.fail_start(target_id, ErrorReason::Unreachable, StartOutcome::Unreachable);
            }
        };

        let family = target.kind.protocol_family();
        let Some(version) = versions::lookup_version(&self.store, family, protocol) else {
            log::info!("{} reports unknown {} protocol {}", target.address(), family, protocol);
            return self.fail_start(
                target_id,
                ErrorReason::UnsupportedVersion,
                StartOutcome::UnsupportedVersion { protocol },
            );
        };

        let target = {
            let _guard = self.transitions.lock();
            if !self.load(target_id).is_some_and(|t| t.status == TargetStatus::Resolving) {
                return StartOutcome::Cancelled;
            }
            let mut changes = status_fields(TargetStatus::Launching, None);
            changes.insert("resolved_version".into(), json!(version.name));
            match self.persist(target_id, changes) {
                Some(target) => target,
                None => return StartOutcome::Cancelled,
            }
        };
        self.emit_state(&target);
        report(StartProgress::Launching { version: version.name.clone() });

        self.wait_for_drain(target_id).await;

        let label = if target.worker_label.is_empty() {
            target.name.clone()
        } else {
            target.worker_label.clone()
        };
        let spec = LaunchSpec {
            target_id: target_id.to_string(),
            host: target.host.clone(),
            port: target.port,
            label,
            version: version.name,
        };

        let (outcome, changed) = {
            let _guard = self.transitions.lock();
            if !self.load(target_id).is_some_and(|t| t.status == TargetStatus::Launching) {
                return StartOutcome::Cancelled;
            }
            match self.spawner.spawn(&spec) {
                Ok(worker) => {
                    let pid = worker.pid;
                    match self.persist(target_id, status_fields(TargetStatus::Running, Some(pid))) {
                        Some(changed) => {
                            self.watch_exit(target_id, worker);
                            (StartOutcome::Started { pid }, Some(changed))
                        }
                        None => {
                            // Record vanished under us; don't leave an orphan behind
                            if let Err(e) = self.spawner.terminate(pid) {
                                log::debug!("Failed to signal orphaned worker {}: {}", pid, e);
                            }
                            (StartOutcome::Cancelled, None)
                        }
                    }
                }
                Err(e) => {
                    log::error!("Failed to spawn worker for {}: {}", target.address(), e);
                    let changed = self.persist(
                        target_id,
                        status_fields(TargetStatus::Error { reason: ErrorReason::SpawnFailed }, None),
                    );
                    (StartOutcome::SpawnFailed, changed)
                }
            }
        };
        if let StartOutcome::Started { pid } = outcome {
            log::info!("Worker for {} ({}) started with pid {}", target.name, target.address(), pid);
        }
        if let Some(changed) = changed {
            self.emit_state(&changed);
        }
        outcome
    }

    /// Move a target that is still `resolving` into `error(reason)`.
    fn fail_start(&self, target_id: &str, reason: ErrorReason, outcome: StartOutcome) -> StartOutcome {
        let changed = {
            let _guard = self.transitions.lock();
            if !self.load(target_id).is_some_and(|t| t.status == TargetStatus::Resolving) {
                return StartOutcome::Cancelled;
            }
            self.persist(target_id, status_fields(TargetStatus::Error { reason }, None))
        };
        match changed {
            Some(changed) => {
                self.emit_state(&changed);
                outcome
            }
            None => StartOutcome::Cancelled,
        }
    }

    /// Wait, bounded by `drain_timeout`, for the worker a previous stop
    /// signaled to exit.
    async fn wait_for_drain(&self, target_id: &str) {
        let Some(pid) = self.draining.lock().get(target_id).copied() else {
            return;
        };
        let deadline = Instant::now() + self.config.drain_timeout;
        while self.spawner.is_alive(pid) {
            if Instant::now() >= deadline {
                log::warn!("Previous worker {} for {} is still alive, launching anyway", pid, target_id);
                break;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
        let mut draining = self.draining.lock();
        if draining.get(target_id) == Some(&pid) {
            draining.remove(target_id);
        }
    }

    fn watch_exit(self: &Arc<Self>, target_id: &str, worker: SpawnedWorker) {
        let supervisor: Weak<Self> = Arc::downgrade(self);
        let target_id = target_id.to_string();
        let pid = worker.pid;
        tokio::spawn(async move {
            let exit = worker.exited.await;
            if let Some(supervisor) = supervisor.upgrade() {
                supervisor.on_exit(&target_id, pid, exit);
            }
        });
    }

    /// React to worker `pid` of `target_id` exiting.
    ///
    /// An exit for a target that is no longer `running` with that pid has
    /// already been handled (a stop got there first) and is ignored.
    pub fn on_exit(self: &Arc<Self>, target_id: &str, pid: u32, exit: WorkerExit) {
        if self.shutting_down.load(Ordering::SeqCst) {
            log::debug!("Worker {} for {} exited during shutdown ({})", pid, target_id, exit);
            return;
        }

        let target = {
            let _guard = self.transitions.lock();
            let Some(current) = self.load(target_id) else {
                log::debug!("Worker {} exited for deleted target {}", pid, target_id);
                return;
            };
            if current.status != TargetStatus::Running || current.worker_pid != Some(pid) {
                log::debug!("Exit of worker {} for {} already handled", pid, target_id);
                return;
            }
            match self.persist(target_id, status_fields(TargetStatus::Idle, None)) {
                Some(target) => target,
                None => return,
            }
        };

        log::info!("Worker for {} ({}) exited: {}", target.name, target.address(), exit);
        self.emit_state(&target);

        if target.notify_on_failure {
            self.emit_failure(&FailureNotice {
                target_id: target.id.clone(),
                owner_id: target.owner_id,
                name: target.name.clone(),
                address: target.address(),
                exit,
                will_restart: target.auto_restart,
            });
        }
        if target.auto_restart {
            self.schedule_restart(target_id);
        }
    }

    fn schedule_restart(self: &Arc<Self>, target_id: &str) {
        let delay = self.config.restart_delay;
        let generation = self.restart_generation.fetch_add(1, Ordering::SeqCst);
        let supervisor = Arc::downgrade(self);
        let id = target_id.to_string();

        // Insert under the lock the timer itself checks, so it can never
        // observe the map before its own entry is there
        let mut timers = self.restart_timers.lock();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(supervisor) = supervisor.upgrade() else {
                return;
            };
            {
                let mut timers = supervisor.restart_timers.lock();
                match timers.get(&id) {
                    Some((current, _)) if *current == generation => {
                        timers.remove(&id);
                    }
                    _ => return,
                }
            }
            let eligible = supervisor
                .load(&id)
                .is_some_and(|t| t.auto_restart && t.status == TargetStatus::Idle);
            if !eligible {
                log::debug!("Skipping restart of {}: no longer eligible", id);
                return;
            }
            log::info!("Restarting worker for {}", id);
            let outcome = supervisor.start(&id, None).await;
            if !outcome.is_started() {
                log::warn!("Automatic restart of {} ended with {:?}", id, outcome);
            }
        });
        log::debug!("Restart of {} scheduled in {:?}", target_id, delay);
        if let Some((_, previous)) = timers.insert(target_id.to_string(), (generation, task.abort_handle())) {
            previous.abort();
        }
    }

    fn cancel_restart(&self, target_id: &str) {
        if let Some((_, handle)) = self.restart_timers.lock().remove(target_id) {
            log::debug!("Cancelled pending restart of {}", target_id);
            handle.abort();
        }
    }

    /// Stop the target's worker and disable auto-restart.
    ///
    /// Signal delivery is best-effort; the record goes to `idle` regardless.
    /// Returns whether a live worker was signaled. Stopping an idle target is
    /// a no-op.
    pub fn stop(&self, target_id: &str) -> bool {
        self.cancel_restart(target_id);

        let mut transitions = Vec::new();
        let mut signaled = false;
        {
            let _guard = self.transitions.lock();
            let Some(current) = self.load(target_id) else {
                return false;
            };
            if current.status == TargetStatus::Idle && current.worker_pid.is_none() && !current.auto_restart {
                return false;
            }

            if let Some(pid) = current.worker_pid {
                let mut changes = status_fields(TargetStatus::Stopping, Some(pid));
                changes.insert("auto_restart".into(), json!(false));
                transitions.extend(self.persist(target_id, changes));

                match self.spawner.terminate(pid) {
                    Ok(()) => {
                        self.draining.lock().insert(target_id.to_string(), pid);
                        signaled = true;
                    }
                    Err(e) => log::debug!("Failed to signal worker {} for {}: {}", pid, target_id, e),
                }
            }

            let mut changes = status_fields(TargetStatus::Idle, None);
            changes.insert("auto_restart".into(), json!(false));
            transitions.extend(self.persist(target_id, changes));
        }

        if signaled {
            log::info!("Stopped worker for {}", target_id);
        }
        for changed in &transitions {
            self.emit_state(changed);
        }
        signaled
    }

    /// Reconcile records left in an active state by a previous run.
    ///
    /// Live orphans are signaled, every such target is reset to `idle`, and
    /// targets with auto-restart get a restart scheduled. Returns the number
    /// of restarts scheduled.
    pub fn recover(self: &Arc<Self>) -> usize {
        let targets: Vec<ManagedTarget> = self.store.read_as();
        let mut resumed = 0;

        for target in targets {
            if !target.status.is_active() && target.worker_pid.is_none() {
                continue;
            }

            let changed = {
                let _guard = self.transitions.lock();
                if let Some(pid) = target.worker_pid {
                    if self.spawner.is_alive(pid) {
                        log::warn!("Signaling orphaned worker {} for {}", pid, target.id);
                        match self.spawner.terminate(pid) {
                            Ok(()) => {
                                self.draining.lock().insert(target.id.clone(), pid);
                            }
                            Err(e) => log::debug!("Failed to signal orphan {}: {}", pid, e),
                        }
                    }
                }
                self.persist(&target.id, status_fields(TargetStatus::Idle, None))
            };
            if let Some(changed) = changed {
                self.emit_state(&changed);
            }

            if target.auto_restart {
                self.schedule_restart(&target.id);
                resumed += 1;
            }
        }

        if resumed > 0 {
            log::info!("Scheduled {} worker restart(s) after boot", resumed);
        }
        resumed
    }

    /// Cancel pending restarts and signal every live worker.
    ///
    /// Records are left as they are so [`Supervisor::recover`] can resume
    /// the same workers on the next boot.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        for (_, (_, handle)) in self.restart_timers.lock().drain() {
            handle.abort();
        }

        let targets: Vec<ManagedTarget> = self.store.read_as();
        let mut signaled = 0;
        for target in targets {
            let Some(pid) = target.worker_pid else {
                continue;
            };
            if !self.spawner.is_alive(pid) {
                continue;
            }
            match self.spawner.terminate(pid) {
                Ok(()) => signaled += 1,
                Err(e) => log::debug!("Failed to signal worker {} on shutdown: {}", pid, e),
            }
        }
        log::info!("Supervisor shut down, signaled {} worker(s)", signaled);
    }
}
