//! Device control loop.
//!
//! One cooperative loop owns the lock controller, the update agent and the
//! task table. Each turn waits on whichever comes first: a command datagram,
//! the next due task, a status request or the in-flight update attempt.
//! Nothing here blocks and nothing is mutated from another task.

use crate::actuator::{Actuator, GpioActuator};
use crate::agent::{Attempt, AttemptOutcome, StagingArea, UpdateAgent};
use crate::client::{HttpRegistryClient, RegistryClient};
use crate::command;
use crate::config::{DeviceConfig, UpdateConfig, UpdateMode};
use crate::lock::{LockController, Transition};
use crate::scheduler::TaskTable;
use crate::status::{self, StatusHandle, StatusRequest};
use anyhow::Context;
use latch_common::{DeviceStatus, LockState, UpdateTriggerResponse};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Receive buffer; anything past the command limit is rejected by the decoder.
const DATAGRAM_BUF: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    UpdateCheck,
    ReleaseLatch,
}

/// Why the loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Shutdown,
    /// A new image is staged; the supervisor should restart the device.
    Restart,
}

pub struct Device<A, C> {
    lock: LockController<A>,
    agent: UpdateAgent<C>,
    tasks: TaskTable<Task>,
    in_flight: Option<Attempt>,
    mode: UpdateMode,
    interval: Duration,
    jitter: Duration,
    started: Instant,
}

impl<A: Actuator, C: RegistryClient + 'static> Device<A, C> {
    pub fn new(
        lock: LockController<A>,
        agent: UpdateAgent<C>,
        update: &UpdateConfig,
        now: Instant,
    ) -> Self {
        let mut device = Self {
            lock,
            agent,
            tasks: TaskTable::new(),
            in_flight: None,
            mode: update.mode,
            interval: update.interval(),
            jitter: update.jitter(),
            started: now,
        };
        if device.mode == UpdateMode::Auto {
            let first = device.jittered(Duration::from_secs(update.initial_delay_secs));
            device.tasks.schedule(Task::UpdateCheck, now + first);
            info!("First update check in {:?}", first);
        } else {
            info!("Update checks run only on request");
        }
        device
    }

    pub fn lock_state(&self) -> LockState {
        self.lock.lock_state()
    }

    pub fn unlock_count(&self) -> u64 {
        self.lock.unlock_count()
    }

    pub fn update_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// When the next update check is due, if one is scheduled.
    pub fn update_due_at(&self) -> Option<Instant> {
        self.tasks.due_at(Task::UpdateCheck)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.tasks.next_deadline()
    }

    /// Decode and apply one command datagram.
    pub fn handle_datagram(&mut self, datagram: &[u8], now: Instant) -> Transition {
        let Some(cmd) = command::decode(datagram) else {
            debug!("Ignoring unknown command ({} bytes)", datagram.len());
            return Transition::Unchanged;
        };
        let transition = self.lock.handle(cmd, now);
        match transition {
            Transition::Unlocked { relock_at } => self.tasks.schedule(Task::ReleaseLatch, relock_at),
            Transition::Relocked => self.tasks.cancel(Task::ReleaseLatch),
            Transition::Unchanged => debug!("Command '{}' had no effect", cmd),
        }
        transition
    }

    /// Run every task due at `now`.
    pub fn run_due(&mut self, now: Instant) {
        while let Some(task) = self.tasks.pop_due(now) {
            match task {
                Task::ReleaseLatch => {
                    self.lock.poll(now);
                    if let Some(deadline) = self.lock.relock_deadline() {
                        self.tasks.schedule(Task::ReleaseLatch, deadline);
                    }
                }
                Task::UpdateCheck => {
                    if self.in_flight.is_none() {
                        self.in_flight = Some(self.agent.begin());
                    }
                }
            }
        }
    }

    /// Mark the update check due now.
    pub fn trigger_update(&mut self, now: Instant) -> UpdateTriggerResponse {
        if self.in_flight.is_some() {
            return UpdateTriggerResponse {
                accepted: true,
                message: format!("update check already running ({})", self.agent.phase()),
            };
        }
        self.tasks.schedule(Task::UpdateCheck, now);
        info!("Update check requested");
        UpdateTriggerResponse {
            accepted: true,
            message: "update check scheduled".to_string(),
        }
    }

    pub fn snapshot(&self, now: Instant) -> DeviceStatus {
        let agent = self.agent.status();
        DeviceStatus {
            running_version: self.agent.running_version().to_string(),
            lock_state: self.lock.lock_state(),
            unlock_count: self.lock.unlock_count(),
            uptime_secs: now.saturating_duration_since(self.started).as_secs(),
            connectivity: agent.connectivity,
            registry_reachable: agent.registry_reachable,
            last_update_check: agent.last_check,
            agent_phase: agent.phase,
            last_update_result: agent.last_result,
            last_update_error: agent.last_error,
        }
    }

    /// Record a finished attempt. Returns `Restart` after a successful install.
    pub fn finish_attempt(&mut self, outcome: AttemptOutcome, now: Instant) -> Option<ExitReason> {
        self.in_flight = None;
        self.agent.finish(&outcome);

        if outcome.is_installed() {
            self.lock.force_lock();
            return Some(ExitReason::Restart);
        }
        if self.mode == UpdateMode::Auto {
            let delay = self.jittered(self.interval);
            self.tasks.schedule_by(Task::UpdateCheck, now + delay);
            debug!("Next update check in {:?}", delay);
        }
        None
    }

    /// Drive the in-flight attempt, if any, to completion.
    pub async fn settle_update(&mut self) -> Option<ExitReason> {
        let attempt = self.in_flight.as_mut()?;
        let outcome = attempt.await;
        self.finish_attempt(outcome, Instant::now())
    }

    fn answer(&mut self, request: StatusRequest, now: Instant) {
        match request {
            StatusRequest::Snapshot(reply) => {
                let _ = reply.send(self.snapshot(now));
            }
            StatusRequest::TriggerUpdate(reply) => {
                let _ = reply.send(self.trigger_update(now));
            }
        }
    }

    fn jittered(&self, base: Duration) -> Duration {
        let max = self.jitter.as_millis() as u64;
        if max == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }

    /// Run until `shutdown` resolves or an update is installed.
    ///
    /// The actuator is de-energized before returning either way.
    pub async fn run<F>(
        mut self,
        socket: UdpSocket,
        mut requests: mpsc::Receiver<StatusRequest>,
        shutdown: F,
    ) -> ExitReason
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut buf = [0u8; DATAGRAM_BUF];

        loop {
            let deadline = self.tasks.next_deadline();
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    self.lock.force_lock();
                    return ExitReason::Shutdown;
                }
                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, peer)) => {
                        debug!("Datagram from {} ({} bytes)", peer, len);
                        self.handle_datagram(&buf[..len], Instant::now());
                    }
                    Err(e) => warn!("Command socket receive failed: {}", e),
                },
                _ = sleep_until(deadline) => self.run_due(Instant::now()),
                Some(request) = requests.recv() => self.answer(request, Instant::now()),
                outcome = poll_attempt(&mut self.in_flight) => {
                    if let Some(reason) = self.finish_attempt(outcome, Instant::now()) {
                        info!("Exiting for restart into staged firmware");
                        return reason;
                    }
                }
            }
        }
    }
}

/// Bind both listeners, wire the real actuator and registry client, and run
/// the loop until shutdown or restart.
pub async fn run(config: &DeviceConfig, running_version: &str) -> anyhow::Result<ExitReason> {
    let socket = UdpSocket::bind(&config.command_addr)
        .await
        .with_context(|| format!("failed to bind command socket {}", config.command_addr))?;
    let listener = TcpListener::bind(&config.status_addr)
        .await
        .with_context(|| format!("failed to bind status interface {}", config.status_addr))?;
    info!("Listening for commands on udp://{}", socket.local_addr()?);

    let client = HttpRegistryClient::new(
        &config.update.registry_url,
        running_version,
        config.update.request_timeout(),
    )?;
    let agent = UpdateAgent::new(
        Arc::new(client),
        StagingArea::new(&config.update.staging_dir),
        running_version,
        config.update.attempt_timeout(),
    );
    let lock = LockController::new(GpioActuator::new(config.actuator_gpio.clone()), config.pulse());
    let device = Device::new(lock, agent, &config.update, Instant::now());

    let (handle, requests) = StatusHandle::channel();
    tokio::spawn(async move {
        if let Err(e) = status::serve(listener, handle).await {
            warn!("Status interface stopped: {}", e);
        }
    });

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };
    Ok(device.run(socket, requests, shutdown).await)
}

async fn poll_attempt(in_flight: &mut Option<Attempt>) -> AttemptOutcome {
    match in_flight {
        Some(attempt) => attempt.await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
