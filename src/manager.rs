//! The process supervisor core: process records, the registry that owns
//! them, and the lifecycle operations that start, stop, and group them.
//!
//! The locking discipline mirrors the rest of this library's process
//! handling: a container-level lock guards the registry's maps, a
//! per-record lock guards that record's mutable fields, and the two are
//! never held at the same time. Signaling a child is done directly against
//! its PID (as in [`crate::manager`]'s process-group teardown), not through
//! the owned [`Child`] handle, so `Stop` never has to fight the exit
//! watcher for ownership of it.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use dusa_collection_utils::core::errors::{ErrorArrayItem, Errors};
use dusa_collection_utils::core::logger::LogLevel;
use dusa_collection_utils::core::types::pathtype::PathType;
use dusa_collection_utils::core::types::rwarc::LockWithTimeout;
use dusa_collection_utils::core::types::stringy::Stringy;
use dusa_collection_utils::log;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Notify;

use crate::bus::{Bus, LifecycleEvent};
use crate::timestamp::current_timestamp;

/// Bound on how long a single lock acquisition may wait before giving up.
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Graceful-stop window: `SIGTERM`, then wait this long before `SIGKILL`.
const STOP_GRACE: Duration = Duration::from_secs(10);

/// Minimum line buffer reserved for each stdout/stderr pump.
const PUMP_LINE_CAPACITY: usize = 256 * 1024;

/// Immutable-at-start description of how to spawn a process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    pub name: Stringy,
    pub command: PathType,
    pub args: Vec<String>,
    /// `KEY=VALUE` additions/overrides layered on top of the parent environment.
    pub env: Vec<(String, String)>,
    pub working_dir: Option<PathType>,
    /// Advisory only; never enforced by the supervisor.
    pub port: Option<u16>,
    /// Advisory only; never enforced by the supervisor.
    pub health_check: Option<String>,
}

impl ProcessConfig {
    pub fn new(name: &str, command: PathType, args: Vec<String>) -> Self {
        Self {
            name: Stringy::new(name),
            command,
            args,
            env: Vec::new(),
            working_dir: None,
            port: None,
            health_check: None,
        }
    }
}

/// Lifecycle states of a [`ProcessRecord`]. `Starting`/`Stopping` are
/// reserved for observable transitions; the supervisor itself only ever
/// parks a record in `Stopped`, `Running`, or `Killed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Killed,
}

impl ProcessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Stopped => "stopped",
            ProcessState::Starting => "starting",
            ProcessState::Running => "running",
            ProcessState::Stopping => "stopping",
            ProcessState::Killed => "killed",
        }
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

struct RecordState {
    config: ProcessConfig,
    status: ProcessState,
    pid: u32,
    exit_code: i32,
    start_time: u64,
    /// Rearmed on every `Start`; the exit watcher notifies it once the
    /// terminal state has been recorded, letting `Stop` avoid polling.
    notify: Arc<Notify>,
}

impl RecordState {
    fn new(config: ProcessConfig) -> Self {
        Self {
            config,
            status: ProcessState::Stopped,
            pid: 0,
            exit_code: 0,
            start_time: 0,
            notify: Arc::new(Notify::new()),
        }
    }
}

/// Per-child state plus the mutex guarding it. Cheap to clone — clones
/// share the same underlying lock.
#[derive(Clone)]
pub struct ProcessRecord {
    name: Stringy,
    state: LockWithTimeout<RecordState>,
}

impl ProcessRecord {
    fn new(config: ProcessConfig) -> Self {
        Self {
            name: config.name.clone(),
            state: LockWithTimeout::new(RecordState::new(config)),
        }
    }

    pub fn name(&self) -> &Stringy {
        &self.name
    }
}

/// Registry of process records and groups. Owns everything it creates;
/// records hold no references to each other or to the `Manager`.
#[derive(Clone)]
pub struct Manager {
    inner: LockWithTimeout<ManagerInner>,
}

struct ManagerInner {
    processes: HashMap<Stringy, ProcessRecord>,
    /// First-`Register` order, used by the no-argument `start`/`stop`.
    insertion_order: Vec<Stringy>,
    groups: HashMap<Stringy, Vec<Stringy>>,
    bus: Option<Arc<dyn Bus>>,
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

impl Manager {
    pub fn new() -> Self {
        Self {
            inner: LockWithTimeout::new(ManagerInner {
                processes: HashMap::new(),
                insertion_order: Vec::new(),
                groups: HashMap::new(),
                bus: None,
            }),
        }
    }

    /// Installs or replaces the event bus. Publication is best-effort and
    /// never blocks spawn or stop.
    pub async fn set_bus(&self, bus: Arc<dyn Bus>) -> Result<(), ErrorArrayItem> {
        let mut inner = self.inner.try_write_with_timeout(Some(LOCK_TIMEOUT)).await?;
        inner.bus = Some(bus);
        Ok(())
    }

    /// Idempotent registration. A running record keeps its activation and
    /// only gets a new config; anything else gets a fresh activation.
    pub async fn register(&self, config: ProcessConfig) -> Result<(), ErrorArrayItem> {
        let name = config.name.clone();
        let mut inner = self.inner.try_write_with_timeout(Some(LOCK_TIMEOUT)).await?;

        if let Some(record) = inner.processes.get(&name) {
            let mut state = record.state.try_write_with_timeout(Some(LOCK_TIMEOUT)).await?;
            if state.status == ProcessState::Running {
                state.config = config;
            } else {
                let notify = state.notify.clone();
                *state = RecordState::new(config);
                state.notify = notify;
            }
            return Ok(());
        }

        inner.insertion_order.push(name.clone());
        inner.processes.insert(name, ProcessRecord::new(config));
        Ok(())
    }

    /// Unconditional replace.
    pub async fn add_group(&self, name: &str, members: Vec<Stringy>) -> Result<(), ErrorArrayItem> {
        let mut inner = self.inner.try_write_with_timeout(Some(LOCK_TIMEOUT)).await?;
        inner.groups.insert(Stringy::new(name), members);
        Ok(())
    }

    async fn get_record(&self, name: &str) -> Result<ProcessRecord, ErrorArrayItem> {
        let inner = self.inner.try_read_with_timeout(Some(LOCK_TIMEOUT)).await?;
        inner
            .processes
            .get(&Stringy::new(name))
            .cloned()
            .ok_or_else(|| unknown_process(name))
    }

    async fn bus_handle(&self) -> Option<Arc<dyn Bus>> {
        self.inner
            .try_read_with_timeout(Some(LOCK_TIMEOUT))
            .await
            .ok()
            .and_then(|inner| inner.bus.clone())
    }

    async fn publish(&self, event: LifecycleEvent) {
        if let Some(bus) = self.bus_handle().await {
            if let Err(err) = bus.publish_event(&event).await {
                log!(LogLevel::Warn, "Failed to publish lifecycle event for {}: {}", event.name, err);
            }
        }
    }

    /// Error if unknown. No-op (returns `Ok`) if already running.
    pub async fn start(&self, name: &str) -> Result<(), ErrorArrayItem> {
        let record = self.get_record(name).await?;

        let config = {
            let state = record.state.try_read_with_timeout(Some(LOCK_TIMEOUT)).await?;
            if state.status == ProcessState::Running {
                return Ok(());
            }
            state.config.clone()
        };

        let mut command = Command::new(config.command.to_path_buf());
        command.args(&config.args);
        if let Some(dir) = &config.working_dir {
            command.current_dir(dir.to_path_buf());
        }
        for (key, value) in &config.env {
            command.env(key, value);
        }
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        // Its own process group so `Stop` can signal every descendant, not
        // just the direct child.
        unsafe {
            command.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let mut child = command.spawn().map_err(|err| {
            ErrorArrayItem::new(
                Errors::SupervisedChild,
                format!("start {}: failed to spawn: {}", name, err),
            )
        })?;

        let pid = child.id().ok_or_else(|| {
            ErrorArrayItem::new(
                Errors::SupervisedChild,
                format!("start {}: spawned process has no pid", name),
            )
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let notify = Arc::new(Notify::new());
        let start_time = current_timestamp();

        {
            let mut state = record.state.try_write_with_timeout(Some(LOCK_TIMEOUT)).await?;
            state.status = ProcessState::Running;
            state.pid = pid;
            state.start_time = start_time;
            state.exit_code = 0;
            state.notify = notify.clone();
        }

        if let Some(stdout) = stdout {
            tokio::spawn(pump_output(Stringy::from(name), "stdout", stdout));
        }
        if let Some(stderr) = stderr {
            tokio::spawn(pump_output(Stringy::from(name), "stderr", stderr));
        }

        // Publish before handing the child off to the exit watcher: for a
        // short-lived child the watcher's `stopped` event can otherwise win
        // the race and be observed before this one.
        self.publish(LifecycleEvent::new(name, ProcessState::Running, pid, start_time, 0))
            .await;

        spawn_exit_watcher(self.clone(), record.clone(), child, notify);

        Ok(())
    }

    /// Error if unknown. No-op with no bus event if not running.
    pub async fn stop(&self, name: &str) -> Result<(), ErrorArrayItem> {
        let record = self.get_record(name).await?;

        let (pid, notify) = {
            let state = record.state.try_read_with_timeout(Some(LOCK_TIMEOUT)).await?;
            if state.status != ProcessState::Running {
                return Ok(());
            }
            (state.pid, state.notify.clone())
        };

        send_signal_to_group(pid, libc::SIGTERM)?;

        match tokio::time::timeout(STOP_GRACE, notify.notified()).await {
            // The exit watcher observed the exit in time; it already
            // recorded the terminal state and published the event.
            Ok(_) => Ok(()),
            Err(_) => {
                log!(LogLevel::Warn, "{} ignored SIGTERM for {:?}; sending SIGKILL", name, STOP_GRACE);
                send_signal_to_group(pid, libc::SIGKILL)?;

                let start_time = {
                    let mut state = record.state.try_write_with_timeout(Some(LOCK_TIMEOUT)).await?;
                    if state.status == ProcessState::Running {
                        state.status = ProcessState::Killed;
                        state.exit_code = -1;
                    }
                    state.start_time
                };

                self.publish(LifecycleEvent::new(name, ProcessState::Killed, pid, start_time, -1))
                    .await;
                Ok(())
            }
        }
    }

    pub async fn restart(&self, name: &str) -> Result<(), ErrorArrayItem> {
        self.stop(name).await?;
        self.start(name).await
    }

    /// Members start in declared order; the first failure aborts iteration.
    pub async fn start_group(&self, name: &str) -> Result<(), ErrorArrayItem> {
        let members = self.group_members(name).await?;
        for member in &members {
            self.start(member).await?;
        }
        Ok(())
    }

    /// Members stop in reverse order; failures are logged and iteration
    /// continues so partial shutdowns still make progress.
    pub async fn stop_group(&self, name: &str) -> Result<(), ErrorArrayItem> {
        let members = self.group_members(name).await?;
        for member in members.iter().rev() {
            if let Err(err) = self.stop(member).await {
                log!(LogLevel::Warn, "Failed to stop {} while stopping group {}: {}", member, name, err);
            }
        }
        Ok(())
    }

    async fn group_members(&self, name: &str) -> Result<Vec<Stringy>, ErrorArrayItem> {
        let inner = self.inner.try_read_with_timeout(Some(LOCK_TIMEOUT)).await?;
        inner
            .groups
            .get(&Stringy::new(name))
            .cloned()
            .ok_or_else(|| unknown_group(name))
    }

    /// Starts every registered record in insertion order. Aborts (without
    /// rolling back already-started children) on the first failure.
    pub async fn start_all(&self) -> Result<(), ErrorArrayItem> {
        let names = self.insertion_order().await?;
        for name in &names {
            self.start(name).await?;
        }
        Ok(())
    }

    /// Stops every registered record in reverse insertion order.
    pub async fn stop_all(&self) -> Result<(), ErrorArrayItem> {
        let names = self.insertion_order().await?;
        for name in names.iter().rev() {
            if let Err(err) = self.stop(name).await {
                log!(LogLevel::Warn, "Failed to stop {}: {}", name, err);
            }
        }
        Ok(())
    }

    async fn insertion_order(&self) -> Result<Vec<Stringy>, ErrorArrayItem> {
        let inner = self.inner.try_read_with_timeout(Some(LOCK_TIMEOUT)).await?;
        Ok(inner.insertion_order.clone())
    }

    pub async fn status(&self, name: &str) -> Result<ProcessState, ErrorArrayItem> {
        let record = self.get_record(name).await?;
        let state = record.state.try_read_with_timeout(Some(LOCK_TIMEOUT)).await?;
        Ok(state.status)
    }

    /// A consistent snapshot: each record's state is read once under its
    /// own lock while the container lock is held only to list names.
    pub async fn all_status(&self) -> Result<HashMap<String, String>, ErrorArrayItem> {
        let records: Vec<ProcessRecord> = {
            let inner = self.inner.try_read_with_timeout(Some(LOCK_TIMEOUT)).await?;
            inner.processes.values().cloned().collect()
        };

        let mut out = HashMap::with_capacity(records.len());
        for record in records {
            let state = record.state.try_read_with_timeout(Some(LOCK_TIMEOUT)).await?;
            out.insert(record.name.to_string(), state.status.as_str().to_owned());
        }
        Ok(out)
    }

    /// Returns `(pid, present)`. `present` is false only for a record that
    /// has never been started.
    pub async fn process_pid(&self, name: &str) -> Result<(u32, bool), ErrorArrayItem> {
        let record = self.get_record(name).await?;
        let state = record.state.try_read_with_timeout(Some(LOCK_TIMEOUT)).await?;
        Ok((state.pid, state.pid > 0))
    }

    pub async fn is_running(&self, name: &str) -> bool {
        matches!(self.status(name).await, Ok(ProcessState::Running))
    }
}

fn spawn_exit_watcher(manager: Manager, record: ProcessRecord, mut child: Child, notify: Arc<Notify>) {
    let name = record.name().clone();
    tokio::spawn(async move {
        let status = child.wait().await;
        let exit_code = status.as_ref().ok().and_then(|s| s.code()).unwrap_or(0);

        let snapshot = {
            let mut state = match record.state.try_write_with_timeout(Some(LOCK_TIMEOUT)).await {
                Ok(state) => state,
                Err(err) => {
                    log!(LogLevel::Error, "Exit watcher for {} could not lock record: {}", name, err);
                    notify.notify_waiters();
                    return;
                }
            };

            // Stop's force-kill path may already have finalized this
            // activation; don't overwrite it or double-publish.
            if state.status != ProcessState::Running {
                None
            } else {
                state.status = ProcessState::Stopped;
                state.exit_code = exit_code;
                Some((state.pid, state.start_time))
            }
        };

        notify.notify_waiters();

        if let Some((pid, start_time)) = snapshot {
            manager
                .publish(LifecycleEvent::new(&name, ProcessState::Stopped, pid, start_time, exit_code))
                .await;
        }
    });
}

async fn pump_output<R>(name: Stringy, stream: &'static str, reader: R)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::with_capacity(PUMP_LINE_CAPACITY, reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                log!(LogLevel::Info, "[{}/{}] {}", name, stream, line);
            }
            Ok(None) => break,
            Err(err) => {
                log!(LogLevel::Warn, "Error reading {} for {}: {}", stream, name, err);
                break;
            }
        }
    }
}

fn send_signal_to_group(pid: u32, signal: libc::c_int) -> Result<(), ErrorArrayItem> {
    // A negative pid targets the whole process group (see setpgid(2));
    // every supervised child is its own group leader (`setsid()` at spawn).
    let target = -(pid as i64) as libc::pid_t;
    let result = unsafe { libc::kill(target, signal) };
    if result == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        // Already gone; nothing to do.
        return Ok(());
    }
    Err(ErrorArrayItem::from(err))
}

fn unknown_process(name: &str) -> ErrorArrayItem {
    ErrorArrayItem::new(Errors::GeneralError, format!("unknown process: {}", name))
}

fn unknown_group(name: &str) -> ErrorArrayItem {
    ErrorArrayItem::new(Errors::GeneralError, format!("unknown group: {}", name))
}
