//! Supervisor control loop
//!
//! A single task owns the instance registry. Operator commands arrive on an
//! mpsc channel with oneshot responders; launch completions and timer expiries
//! arrive on an internal channel; terminations arrive from the health monitor.
//! Nothing else mutates instance state.

use crate::config::{DescriptorSet, ProcessDescriptor, Rejection};
use crate::error::{Result, WardenError};
use crate::process::monitor::{ExitOutcome, HealthMonitor, ResourceSampler, TerminationEvent, TerminationStream};
use crate::process::restart::{decide, Crash, RestartDecision};
use crate::process::spawner::{send_signal, Launcher};
use crate::process::types::{AfterStop, InstanceInfo, InstanceKey, InstanceState, LifecycleEvent, ManagedInstance};
use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Requests from a [`SupervisorHandle`](super::SupervisorHandle) to the loop
pub(crate) enum Command {
    Start {
        set: DescriptorSet,
        reply: oneshot::Sender<Result<OperationReport>>,
    },
    Stop {
        name: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Reload {
        set: DescriptorSet,
        reply: oneshot::Sender<Result<OperationReport>>,
    },
    List {
        reply: oneshot::Sender<Vec<InstanceInfo>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Command::Start { .. } => "Start",
            Command::Stop { .. } => "Stop",
            Command::Reload { .. } => "Reload",
            Command::List { .. } => "List",
            Command::Shutdown { .. } => "Shutdown",
        };
        f.write_str(name)
    }
}

/// Messages produced by tasks the loop spawned itself
#[derive(Debug)]
enum Internal {
    Launched {
        key: InstanceKey,
        attempt: u64,
        result: std::result::Result<u32, String>,
    },
    RestartDue {
        key: InstanceKey,
        attempt: u64,
    },
    GraceExpired {
        key: InstanceKey,
        attempt: u64,
    },
}

/// Per-descriptor outcome of a start or reload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationReport {
    /// Names launched for the first time (or relaunched after a stop)
    pub started: Vec<String>,
    /// Names whose instances are being replaced from a changed descriptor
    pub replaced: Vec<String>,
    /// Names whose instance count changed
    pub scaled: Vec<String>,
    pub unchanged: Vec<String>,
    /// Names no longer present and being stopped for removal
    pub removed: Vec<String>,
    pub rejected: Vec<Rejection>,
}

impl OperationReport {
    fn reject(&mut self, name: &str, error: WardenError) {
        self.rejected.push(Rejection {
            name: name.to_string(),
            reason: error.to_string(),
        });
    }
}

/// Stop request waiting for its instances to settle
struct PendingStop {
    keys: Vec<InstanceKey>,
    reply: oneshot::Sender<Result<()>>,
}

pub(crate) struct Supervisor {
    launcher: Launcher,
    monitor: HealthMonitor,
    sampler: ResourceSampler,
    descriptors: BTreeMap<String, Arc<ProcessDescriptor>>,
    instances: BTreeMap<InstanceKey, ManagedInstance>,
    next_attempt: u64,
    internal_tx: mpsc::UnboundedSender<Internal>,
    events: broadcast::Sender<LifecycleEvent>,
    pending_stops: Vec<PendingStop>,
    shutdown_replies: Vec<oneshot::Sender<()>>,
    shutting_down: bool,
}

impl Supervisor {
    /// Spawn the control loop and return its command sender
    pub(crate) fn spawn(
        launcher: Launcher,
        events: broadcast::Sender<LifecycleEvent>,
        command_buffer: usize,
    ) -> mpsc::Sender<Command> {
        let (cmd_tx, cmd_rx) = mpsc::channel(command_buffer);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (monitor, terminations) = HealthMonitor::new();

        let supervisor = Supervisor {
            launcher,
            monitor,
            sampler: ResourceSampler::new(),
            descriptors: BTreeMap::new(),
            instances: BTreeMap::new(),
            next_attempt: 0,
            internal_tx,
            events,
            pending_stops: Vec::new(),
            shutdown_replies: Vec::new(),
            shutting_down: false,
        };

        tokio::spawn(supervisor.run(cmd_rx, internal_rx, terminations));
        cmd_tx
    }

    /// Main event loop.
    ///
    /// Internal events are polled first so a launch completion is always
    /// applied before the termination of the same attempt. The loop exits once
    /// a shutdown was requested (or every handle dropped) and all instances
    /// have settled.
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        mut internal_rx: mpsc::UnboundedReceiver<Internal>,
        mut terminations: TerminationStream,
    ) {
        let mut cmd_closed = false;

        loop {
            if self.shutting_down && self.all_settled() {
                break;
            }

            tokio::select! {
                biased;

                Some(event) = internal_rx.recv() => self.handle_internal(event),

                Some(event) = terminations.next() => self.handle_termination(event),

                maybe_cmd = cmd_rx.recv(), if !cmd_closed => match maybe_cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        info!("All supervisor handles dropped; shutting down");
                        cmd_closed = true;
                        self.begin_shutdown();
                    }
                },
            }
        }

        // Closed before answering so callers observe a gone supervisor
        drop(cmd_rx);
        for reply in self.shutdown_replies.drain(..) {
            let _ = reply.send(());
        }
        info!("Supervisor stopped");
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start { set, reply } => {
                let result = self.refuse_if_shutting_down().map(|_| self.start(set));
                let _ = reply.send(result);
            }
            Command::Stop { name, reply } => self.stop(name, reply),
            Command::Reload { set, reply } => {
                let result = self.refuse_if_shutting_down().map(|_| self.reload(set));
                let _ = reply.send(result);
            }
            Command::List { reply } => {
                let _ = reply.send(self.list());
            }
            Command::Shutdown { reply } => {
                self.shutdown_replies.push(reply);
                self.begin_shutdown();
            }
        }
    }

    fn refuse_if_shutting_down(&self) -> Result<()> {
        if self.shutting_down {
            Err(WardenError::SupervisorGone)
        } else {
            Ok(())
        }
    }

    // ----- operator commands -----

    fn start(&mut self, set: DescriptorSet) -> OperationReport {
        let mut report = OperationReport {
            rejected: set.rejected,
            ..Default::default()
        };

        for descriptor in set.descriptors {
            let name = descriptor.name.clone();
            if self.group_active(&name) {
                report.reject(&name, WardenError::AlreadyRunning(name.clone()));
                continue;
            }

            self.install_group(&descriptor);
            info!("Started {} ({} instance(s))", name, descriptor.instances);
            report.started.push(name);
        }

        report
    }

    fn stop(&mut self, name: String, reply: oneshot::Sender<Result<()>>) {
        let keys = self.keys_of(&name);
        if keys.is_empty() {
            let _ = reply.send(Err(WardenError::ProcessNotFound(name)));
            return;
        }

        info!("Stopping {}", name);
        for key in &keys {
            self.stop_instance(key, AfterStop::Remain);
        }

        self.pending_stops.push(PendingStop { keys, reply });
        self.settle_pending_stops();
    }

    fn reload(&mut self, set: DescriptorSet) -> OperationReport {
        let rejected_names: HashSet<String> = set.rejected.iter().map(|r| r.name.clone()).collect();
        let mut report = OperationReport {
            rejected: set.rejected,
            ..Default::default()
        };

        let incoming: HashSet<String> = set.descriptors.iter().map(|d| d.name.clone()).collect();
        let retired: Vec<String> = self
            .descriptors
            .keys()
            .filter(|name| !incoming.contains(*name) && !rejected_names.contains(*name))
            .cloned()
            .collect();

        for name in retired {
            info!("Removing {}", name);
            self.descriptors.remove(&name);
            for key in self.keys_of(&name) {
                self.stop_instance(&key, AfterStop::Remove);
            }
            report.removed.push(name);
        }

        for descriptor in set.descriptors {
            let name = descriptor.name.clone();
            let current = self.descriptors.get(&name).cloned();

            match current {
                None => {
                    self.install_group(&descriptor);
                    report.started.push(name);
                }
                Some(current) if *current == *descriptor => {
                    debug!("{} unchanged", name);
                    report.unchanged.push(name);
                }
                Some(current) if current.same_launch_spec(&descriptor) => {
                    info!(
                        "Scaling {} from {} to {} instance(s)",
                        name, current.instances, descriptor.instances
                    );
                    self.scale(&descriptor);
                    report.scaled.push(name);
                }
                Some(_) => {
                    info!("Replacing {} from changed descriptor", name);
                    self.replace(&descriptor);
                    report.replaced.push(name);
                }
            }
        }

        report
    }

    /// Only the instance count changed: resize without touching survivors
    fn scale(&mut self, descriptor: &Arc<ProcessDescriptor>) {
        let name = descriptor.name.clone();
        let active = self.group_will_run(&name);
        self.descriptors.insert(name.clone(), descriptor.clone());

        for key in self.keys_of(&name) {
            if key.index >= descriptor.instances {
                self.stop_instance(&key, AfterStop::Remove);
            } else if let Some(instance) = self.instances.get_mut(&key) {
                instance.descriptor = descriptor.clone();
                // Wanted again before an earlier scale-down finished
                if matches!(instance.after_stop, AfterStop::Remove) {
                    instance.after_stop = if active {
                        AfterStop::Replace(descriptor.clone())
                    } else {
                        AfterStop::Remain
                    };
                }
            }
        }

        for index in 0..descriptor.instances {
            let key = InstanceKey::new(name.clone(), index);
            if self.instances.contains_key(&key) {
                continue;
            }
            if active {
                self.launch_fresh(key, descriptor.clone());
            } else {
                let mut instance = ManagedInstance::new(key.clone(), descriptor.clone(), self.next_attempt());
                instance.state = InstanceState::Stopped;
                self.instances.insert(key, instance);
            }
        }
    }

    /// Every instance is stopped gracefully and replaced one for one
    fn replace(&mut self, descriptor: &Arc<ProcessDescriptor>) {
        let name = descriptor.name.clone();
        self.descriptors.insert(name.clone(), descriptor.clone());

        for key in self.keys_of(&name) {
            let after = if key.index < descriptor.instances {
                AfterStop::Replace(descriptor.clone())
            } else {
                AfterStop::Remove
            };
            self.stop_instance(&key, after);
        }

        for index in 0..descriptor.instances {
            let key = InstanceKey::new(name.clone(), index);
            if !self.instances.contains_key(&key) {
                self.launch_fresh(key, descriptor.clone());
            }
        }
    }

    fn list(&mut self) -> Vec<InstanceInfo> {
        let pids: Vec<u32> = self.instances.values().filter_map(|i| i.pid).collect();
        let usage = self.sampler.sample(&pids);

        self.instances
            .values()
            .map(|instance| {
                let mut info = instance.info();
                if let Some((cpu, memory)) = instance.pid.and_then(|pid| usage.get(&pid)) {
                    info.cpu_usage = *cpu;
                    info.memory_usage = *memory;
                }
                info
            })
            .collect()
    }

    fn begin_shutdown(&mut self) {
        if self.shutting_down {
            return;
        }
        info!("Shutting down {} instance(s)", self.instances.len());
        self.shutting_down = true;

        let keys: Vec<InstanceKey> = self.instances.keys().cloned().collect();
        for key in keys {
            self.stop_instance(&key, AfterStop::Remain);
        }
    }

    // ----- internal events -----

    fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::Launched { key, attempt, result } => self.on_launched(key, attempt, result),
            Internal::RestartDue { key, attempt } => self.on_restart_due(key, attempt),
            Internal::GraceExpired { key, attempt } => self.on_grace_expired(key, attempt),
        }
    }

    fn on_launched(&mut self, key: InstanceKey, attempt: u64, result: std::result::Result<u32, String>) {
        let Some(instance) = self.current(&key, attempt) else {
            if let Ok(pid) = result {
                warn!("Launch of {} completed for a retired attempt; killing pid {}", key, pid);
                let mode = self.descriptors.get(&key.name).map(|d| d.exec_mode).unwrap_or_default();
                if let Err(e) = send_signal(pid, mode, Signal::SIGKILL) {
                    warn!("{}", e);
                }
            }
            return;
        };

        match result {
            Ok(pid) => {
                instance.pid = Some(pid);
                instance.started_at = Some(Instant::now());
                instance.started_wall = Some(SystemTime::now());
                let stopping = instance.state == InstanceState::Stopping;
                if !stopping {
                    instance.state = InstanceState::Running;
                }
                self.emit(LifecycleEvent::Launched { key: key.clone(), pid });

                if stopping {
                    self.signal_stop(&key);
                }
            }
            Err(error) => {
                let stopping = instance.state == InstanceState::Stopping;
                self.emit(LifecycleEvent::LaunchFailed {
                    key: key.clone(),
                    error,
                });

                if stopping {
                    self.finish_stop(&key);
                } else {
                    self.handle_crash(&key, Crash {
                        at: Instant::now(),
                        uptime: Duration::ZERO,
                    });
                }
            }
        }
    }

    fn handle_termination(&mut self, event: TerminationEvent) {
        let TerminationEvent { key, attempt, pid, outcome, at, .. } = event;
        let Some(instance) = self.current(&key, attempt) else {
            debug!("Ignoring stale termination of {} (attempt {})", key, attempt);
            return;
        };

        let uptime = instance
            .started_at
            .map_or(Duration::ZERO, |started| at.saturating_duration_since(started));
        let stopping = instance.state == InstanceState::Stopping;
        instance.pid = None;
        instance.last_exit = Some(outcome.clone());
        instance.cancel_grace();

        match outcome {
            ExitOutcome::Lost(reason) => self.emit(LifecycleEvent::MonitorLost {
                key: key.clone(),
                reason,
            }),
            outcome => self.emit(LifecycleEvent::Exited {
                key: key.clone(),
                pid,
                outcome,
            }),
        }

        if stopping {
            self.finish_stop(&key);
        } else {
            self.handle_crash(&key, Crash { at, uptime });
        }
    }

    fn on_restart_due(&mut self, key: InstanceKey, attempt: u64) {
        let Some(instance) = self.current(&key, attempt) else {
            return;
        };
        if instance.state != InstanceState::RestartScheduled {
            return;
        }
        instance.restart_timer = None;
        self.launch(&key);
    }

    fn on_grace_expired(&mut self, key: InstanceKey, attempt: u64) {
        let Some(instance) = self.current(&key, attempt) else {
            return;
        };
        instance.grace_timer = None;
        let (Some(pid), InstanceState::Stopping) = (instance.pid, instance.state) else {
            return;
        };

        let mode = instance.descriptor.exec_mode;
        if let Err(e) = send_signal(pid, mode, Signal::SIGKILL) {
            warn!("{}", e);
        }
        self.emit(LifecycleEvent::Killed { key, pid });
    }

    // ----- transitions -----

    /// Route a crash (or failed launch) through the restart policy
    fn handle_crash(&mut self, key: &InstanceKey, crash: Crash) {
        let Some(instance) = self.instances.get_mut(key) else {
            return;
        };
        instance.state = InstanceState::Crashed;
        instance.started_at = None;

        if self.shutting_down {
            self.finish_stop(key);
            return;
        }

        let policy = instance.descriptor.restart.clone();
        match decide(&policy, &instance.history, &crash) {
            RestartDecision::RestartNow => {
                instance.history.record_restart(&policy, &crash);
                let restarts = instance.restarts();
                self.emit(LifecycleEvent::RestartScheduled {
                    key: key.clone(),
                    delay: Duration::ZERO,
                    restarts,
                });
                self.launch(key);
            }
            RestartDecision::RestartAfter(delay) => {
                instance.history.record_restart(&policy, &crash);
                instance.state = InstanceState::RestartScheduled;
                let restarts = instance.restarts();
                let attempt = instance.attempt;
                let tx = self.internal_tx.clone();
                let timer_key = key.clone();
                instance.restart_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(Internal::RestartDue {
                        key: timer_key,
                        attempt,
                    });
                }));
                self.emit(LifecycleEvent::RestartScheduled {
                    key: key.clone(),
                    delay,
                    restarts,
                });
            }
            RestartDecision::GiveUp(reason) => {
                instance.state = InstanceState::GivenUp;
                self.emit(LifecycleEvent::GivenUp {
                    key: key.clone(),
                    reason: reason.to_string(),
                });
                self.settle_pending_stops();
            }
        }
    }

    /// Begin stopping one instance. `after` decides what happens to the slot
    /// once the process is gone.
    fn stop_instance(&mut self, key: &InstanceKey, after: AfterStop) {
        let Some(instance) = self.instances.get_mut(key) else {
            return;
        };

        match instance.state {
            InstanceState::Running => {
                instance.state = InstanceState::Stopping;
                instance.after_stop = after;
                self.emit(LifecycleEvent::Stopping { key: key.clone() });
                self.signal_stop(key);
            }
            InstanceState::Starting => {
                // Signalled as soon as the launch reports a pid
                instance.state = InstanceState::Stopping;
                instance.after_stop = after;
                self.emit(LifecycleEvent::Stopping { key: key.clone() });
            }
            InstanceState::Stopping => {
                if !matches!(
                    (&instance.after_stop, &after),
                    (AfterStop::Remove, AfterStop::Remain)
                ) {
                    instance.after_stop = after;
                }
            }
            InstanceState::Crashed | InstanceState::RestartScheduled => {
                instance.cancel_restart();
                instance.after_stop = after;
                self.finish_stop(key);
            }
            InstanceState::Stopped | InstanceState::GivenUp => {
                instance.after_stop = after;
                self.finish_stop(key);
            }
        }
    }

    fn signal_stop(&mut self, key: &InstanceKey) {
        let Some(instance) = self.instances.get_mut(key) else {
            return;
        };
        let Some(pid) = instance.pid else {
            return;
        };

        let descriptor = instance.descriptor.clone();
        if let Err(e) = send_signal(pid, descriptor.exec_mode, descriptor.stop_signal) {
            warn!("{}", e);
        }

        let tx = self.internal_tx.clone();
        let timer_key = key.clone();
        let attempt = instance.attempt;
        let grace = descriptor.stop_timeout;
        instance.cancel_grace();
        instance.grace_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = tx.send(Internal::GraceExpired {
                key: timer_key,
                attempt,
            });
        }));
    }

    /// The instance is gone (or never ran); apply its pending `AfterStop`
    fn finish_stop(&mut self, key: &InstanceKey) {
        let Some(instance) = self.instances.get_mut(key) else {
            return;
        };
        instance.cancel_grace();
        instance.cancel_restart();
        instance.pid = None;
        instance.started_at = None;

        let after = std::mem::replace(&mut instance.after_stop, AfterStop::Remain);
        if instance.state != InstanceState::Stopped {
            instance.state = InstanceState::Stopped;
            self.emit(LifecycleEvent::Stopped { key: key.clone() });
        }

        match after {
            AfterStop::Remain => {}
            AfterStop::Replace(descriptor) => {
                if self.shutting_down {
                    debug!("Not replacing {} during shutdown", key);
                } else {
                    self.launch_fresh(key.clone(), descriptor);
                }
            }
            AfterStop::Remove => {
                self.instances.remove(key);
                self.emit(LifecycleEvent::Removed { key: key.clone() });
            }
        }

        self.settle_pending_stops();
    }

    /// Put a brand-new instance (empty history) into `key` and launch it
    fn launch_fresh(&mut self, key: InstanceKey, descriptor: Arc<ProcessDescriptor>) {
        let attempt = self.next_attempt();
        if let Some(mut old) = self.instances.remove(&key) {
            old.cancel_restart();
            old.cancel_grace();
        }
        self.instances
            .insert(key.clone(), ManagedInstance::new(key.clone(), descriptor, attempt));
        self.launch(&key);
    }

    /// Launch the next attempt for an existing slot, keeping its history
    fn launch(&mut self, key: &InstanceKey) {
        let attempt = self.next_attempt();
        let Some(instance) = self.instances.get_mut(key) else {
            return;
        };
        instance.attempt = attempt;
        instance.state = InstanceState::Starting;
        instance.pid = None;
        instance.started_at = None;

        let launcher = self.launcher.clone();
        let monitor = self.monitor.clone();
        let tx = self.internal_tx.clone();
        let descriptor = instance.descriptor.clone();
        let key = key.clone();

        tokio::spawn(async move {
            match launcher.launch(&descriptor, key.index).await {
                Ok(spawned) => {
                    // Launched must be queued before the watcher can report an exit
                    let _ = tx.send(Internal::Launched {
                        key: key.clone(),
                        attempt,
                        result: Ok(spawned.pid),
                    });
                    monitor.watch(key, attempt, spawned.child);
                }
                Err(e) => {
                    let _ = tx.send(Internal::Launched {
                        key,
                        attempt,
                        result: Err(e.to_string()),
                    });
                }
            }
        });
    }

    /// Make `descriptor` the running definition of its name. Settled slots
    /// are dropped and relaunched; slots still stopping launch the new
    /// descriptor once their old process has exited.
    fn install_group(&mut self, descriptor: &Arc<ProcessDescriptor>) {
        let name = descriptor.name.clone();
        self.retire_group(&name);
        self.descriptors.insert(name.clone(), descriptor.clone());

        for index in 0..descriptor.instances {
            let key = InstanceKey::new(name.clone(), index);
            match self.instances.get_mut(&key) {
                Some(instance) => {
                    debug!("{} still stopping; relaunching after exit", key);
                    instance.after_stop = AfterStop::Replace(descriptor.clone());
                }
                None => self.launch_fresh(key, descriptor.clone()),
            }
        }
    }

    /// Drop the settled slots of a name. Slots still stopping stay tracked
    /// so their grace timer can still escalate.
    fn retire_group(&mut self, name: &str) {
        for key in self.keys_of(name) {
            let settled = self
                .instances
                .get(&key)
                .map_or(false, |instance| instance.state.is_terminal());
            if !settled {
                continue;
            }
            if let Some(mut instance) = self.instances.remove(&key) {
                instance.cancel_restart();
                instance.cancel_grace();
            }
        }
    }

    // ----- helpers -----

    fn next_attempt(&mut self) -> u64 {
        self.next_attempt += 1;
        self.next_attempt
    }

    /// The instance at `key`, only if `attempt` is its current attempt
    fn current(&mut self, key: &InstanceKey, attempt: u64) -> Option<&mut ManagedInstance> {
        self.instances
            .get_mut(key)
            .filter(|instance| instance.attempt == attempt)
    }

    fn keys_of(&self, name: &str) -> Vec<InstanceKey> {
        self.instances
            .keys()
            .filter(|key| key.name == name)
            .cloned()
            .collect()
    }

    /// True when any instance of `name` is not settled
    fn group_active(&self, name: &str) -> bool {
        self.instances
            .values()
            .any(|instance| instance.key.name == name && !instance.state.is_terminal())
    }

    /// True when some instance of `name` is running or will run again.
    /// A slot being stopped counts only if a relaunch is pending.
    fn group_will_run(&self, name: &str) -> bool {
        self.instances.values().any(|instance| {
            instance.key.name == name
                && match instance.state {
                    InstanceState::Stopped | InstanceState::GivenUp => false,
                    InstanceState::Stopping => matches!(instance.after_stop, AfterStop::Replace(_)),
                    _ => true,
                }
        })
    }

    fn all_settled(&self) -> bool {
        self.instances.values().all(|instance| instance.state.is_terminal())
    }

    fn settle_pending_stops(&mut self) {
        let instances = &self.instances;
        let settled = |keys: &[InstanceKey]| {
            keys.iter()
                .all(|key| instances.get(key).map_or(true, |i| i.state.is_terminal()))
        };

        let (done, waiting): (Vec<_>, Vec<_>) = self
            .pending_stops
            .drain(..)
            .partition(|pending| settled(&pending.keys));
        self.pending_stops = waiting;

        for pending in done {
            let _ = pending.reply.send(Ok(()));
        }
    }

    fn emit(&self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::LaunchFailed { .. } => error!("{}", event),
            LifecycleEvent::MonitorLost { .. }
            | LifecycleEvent::GivenUp { .. }
            | LifecycleEvent::Killed { .. } => warn!("{}", event),
            _ => info!("{}", event),
        }
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
