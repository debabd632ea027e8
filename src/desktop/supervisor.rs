//! Desktop runtime process supervision
//!
//! Owns the lifecycle of the spawned runtime process during development:
//! start, debounced or manual restart, log filtering, shutdown, and the
//! interactive operator command channel. Exactly one process handle is
//! live at a time; a restart signals the outgoing process for termination
//! before the incoming spawn begins.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use colored::Colorize;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error};

use crate::error::KilnError;

/// Restart coalescing window for rebuild-triggered restarts
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(200);

/// How long a just-killed process may take to report its exit before a
/// late exit event would be misread as a crash
pub const EXIT_GRACE: Duration = Duration::from_secs(2);

// Known-noisy runtime diagnostics dropped from the forwarded output:
// timestamped platform warnings, low-level console chatter, and audio
// driver noise.
static TIMESTAMPED_NOISE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d+-\d+-\d+ \d+:\d+:\d+\.\d+ Electron(?: Helper)?\[\d+:\d+\] ").unwrap()
});
static CONSOLE_NOISE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\d+:\d+/|\d+\.\d+:ERROR:CONSOLE\(\d+\)\]").unwrap());
static ALSA_NOISE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"ALSA lib [a-z]+\.c:\d+:\([a-z_]+\)").unwrap());

/// Whether a runtime output line is known noise
pub fn is_junk_line(line: &str) -> bool {
    TIMESTAMPED_NOISE.is_match(line)
        || CONSOLE_NOISE.is_match(line)
        || ALSA_NOISE.is_match(line)
}

/// Everything needed to spawn one runtime process
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Compiled main-process entry file
    pub entry_file: PathBuf,

    /// Debug/inspection port passed to the runtime
    pub inspect_port: u16,

    /// Environment exported to the process
    pub env: Vec<(String, String)>,
}

/// Supervisor-owned handle to a spawned runtime process.
///
/// Never shared outside the supervisor; replaced, not mutated, on restart.
pub struct ProcessHandle {
    pid: u32,
    kill_tx: parking_lot::Mutex<Option<oneshot::Sender<()>>>,
    exit_rx: watch::Receiver<bool>,
}

impl ProcessHandle {
    pub fn new(pid: u32, kill_tx: oneshot::Sender<()>, exit_rx: watch::Receiver<bool>) -> Self {
        Self {
            pid,
            kill_tx: parking_lot::Mutex::new(Some(kill_tx)),
            exit_rx,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Request termination; idempotent and non-blocking
    pub fn terminate(&self) {
        if let Some(kill_tx) = self.kill_tx.lock().take() {
            let _ = kill_tx.send(());
        }
    }

    /// Receiver flipping to `true` once the process has exited
    pub fn exit_signal(&self) -> watch::Receiver<bool> {
        self.exit_rx.clone()
    }
}

/// Spawns runtime processes for the supervisor
#[async_trait]
pub trait RuntimeLauncher: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> Result<ProcessHandle>;
}

/// Launcher resolving the runtime binary from the target project's own
/// declared dependency; the tool bundles no runtime itself
pub struct DesktopLauncher {
    root: PathBuf,
    runtime: String,
}

impl DesktopLauncher {
    pub fn new(root: PathBuf, runtime: String) -> Self {
        Self { root, runtime }
    }

    fn resolve_runtime_bin(&self) -> Result<PathBuf> {
        let local = self
            .root
            .join("node_modules")
            .join(".bin")
            .join(&self.runtime);
        if local.is_file() {
            return Ok(local);
        }

        if cfg!(windows) {
            let cmd = self
                .root
                .join("node_modules")
                .join(".bin")
                .join(format!("{}.cmd", self.runtime));
            if cmd.is_file() {
                return Ok(cmd);
            }
        }

        which::which(&self.runtime).map_err(|_| {
            KilnError::Spawn(format!(
                "cannot resolve the '{}' binary from this project's dependencies; \
                 install it with `npm install --save-dev {}` and try again",
                self.runtime, self.runtime
            ))
            .into()
        })
    }
}

#[async_trait]
impl RuntimeLauncher for DesktopLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<ProcessHandle> {
        let bin = self.resolve_runtime_bin()?;
        debug!("spawning runtime: {}", bin.display());

        let mut child = tokio::process::Command::new(&bin)
            .arg(format!("--inspect={}", spec.inspect_port))
            .arg(&spec.entry_file)
            .envs(spec.env.iter().cloned())
            .current_dir(&self.root)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| KilnError::Spawn(format!("{}: {}", bin.display(), err)))?;

        let pid = child.id().unwrap_or_default();

        // Line filters between the process and the operator's terminal
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !is_junk_line(&line) {
                        println!("{}", line);
                    }
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !is_junk_line(&line) {
                        eprintln!("{}", line);
                    }
                }
            });
        }

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (exit_tx, exit_rx) = watch::channel(false);

        tokio::spawn(async move {
            let killed = tokio::select! {
                _ = child.wait() => false,
                _ = kill_rx => true,
            };
            if killed {
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
            let _ = exit_tx.send(true);
        });

        Ok(ProcessHandle::new(pid, kill_tx, exit_rx))
    }
}

/// Supervisor lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    NotStarted,
    Starting,
    Running,
    Restarting,
    Stopped,
}

/// Supervisor settings
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub entry_file: PathBuf,
    pub inspect_port: u16,

    /// Suppress automatic restarts; only the operator `r` command restarts
    pub controlled_restart: bool,

    /// Renderer dev-server port, exported to the runtime process
    pub renderer_port: u16,

    pub debounce_window: Duration,
    pub exit_grace: Duration,
}

impl SupervisorOptions {
    pub fn new(entry_file: PathBuf, renderer_port: u16) -> Self {
        Self {
            entry_file,
            inspect_port: 5858,
            controlled_restart: false,
            renderer_port,
            debounce_window: DEBOUNCE_WINDOW,
            exit_grace: EXIT_GRACE,
        }
    }
}

/// Dev runtime process supervisor
pub struct ProcessSupervisor {
    opts: SupervisorOptions,
    launcher: Arc<dyn RuntimeLauncher>,

    /// The single live handle; `Restarting` briefly holds the outgoing
    /// handle out of this slot while the incoming one spawns
    process: tokio::sync::Mutex<Option<ProcessHandle>>,

    state: parking_lot::Mutex<SupervisorState>,

    /// Debounce generation counter: the single serialization point for
    /// concurrent restart requests from independent watch streams
    debounce_generation: parking_lot::Mutex<u64>,

    /// Set across a supervisor-initiated restart so the killed process's
    /// exit event is not misread as a crash
    expected_exit: AtomicBool,

    /// Set by the operator `q` command
    manual_stop: AtomicBool,
}

impl ProcessSupervisor {
    pub fn new(launcher: Arc<dyn RuntimeLauncher>, opts: SupervisorOptions) -> Arc<Self> {
        Arc::new(Self {
            opts,
            launcher,
            process: tokio::sync::Mutex::new(None),
            state: parking_lot::Mutex::new(SupervisorState::NotStarted),
            debounce_generation: parking_lot::Mutex::new(0),
            expected_exit: AtomicBool::new(false),
            manual_stop: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.lock()
    }

    /// The renderer port is exported under two names for compatibility
    fn launch_spec(&self) -> LaunchSpec {
        let port = self.opts.renderer_port.to_string();
        LaunchSpec {
            entry_file: self.opts.entry_file.clone(),
            inspect_port: self.opts.inspect_port,
            env: vec![
                ("RENDERER_PORT".to_string(), port.clone()),
                ("PORT".to_string(), port),
            ],
        }
    }

    /// Start the runtime process; a no-op when one is already running
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut process = self.process.lock().await;
        if process.is_some() {
            return Ok(());
        }

        *self.state.lock() = SupervisorState::Starting;
        let handle = self.launcher.launch(&self.launch_spec()).await?;
        self.watch_exit(&handle);
        *process = Some(handle);
        *self.state.lock() = SupervisorState::Running;

        Ok(())
    }

    /// Exit handler: an unexpected runtime exit ends the whole dev session
    fn watch_exit(self: &Arc<Self>, handle: &ProcessHandle) {
        let mut exit_rx = handle.exit_signal();
        let supervisor = Arc::clone(self);

        tokio::spawn(async move {
            while !*exit_rx.borrow() {
                if exit_rx.changed().await.is_err() {
                    return;
                }
            }

            if supervisor.manual_stop.load(Ordering::SeqCst)
                || supervisor.expected_exit.load(Ordering::SeqCst)
            {
                return;
            }

            eprintln!("\n{} Runtime process exited, shutting down", "•".dimmed());
            std::process::exit(0);
        });
    }

    /// Request a restart after a successful incremental rebuild.
    ///
    /// Default mode debounces: the pending deadline resets on each call and
    /// only the last request within the window fires, coalescing bursts
    /// from near-simultaneous main and preload rebuilds into one restart.
    /// In controlled-restart mode automatic requests are ignored entirely.
    pub fn request_restart(self: &Arc<Self>) {
        if self.opts.controlled_restart {
            return;
        }

        let generation = {
            let mut current = self.debounce_generation.lock();
            *current += 1;
            *current
        };

        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(supervisor.opts.debounce_window).await;

            // Superseded by a newer request
            if *supervisor.debounce_generation.lock() != generation {
                return;
            }

            if let Err(err) = supervisor.restart().await {
                error!("restart failed: {:#}", err);
            }
        });
    }

    /// Restart the runtime process, or start it when none is running.
    ///
    /// The outgoing process is signaled for termination before the
    /// incoming spawn begins; its OS-level exit may complete later, which
    /// the expected-exit grace window tolerates.
    pub async fn restart(self: &Arc<Self>) -> Result<()> {
        let mut process = self.process.lock().await;

        let Some(outgoing) = process.take() else {
            drop(process);
            return self.start().await;
        };

        *self.state.lock() = SupervisorState::Restarting;
        self.expected_exit.store(true, Ordering::SeqCst);

        debug!("restarting runtime (pid {})", outgoing.pid());
        outgoing.terminate();

        let incoming = self.launcher.launch(&self.launch_spec()).await?;
        self.watch_exit(&incoming);
        *process = Some(incoming);
        *self.state.lock() = SupervisorState::Running;

        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(supervisor.opts.exit_grace).await;
            supervisor.expected_exit.store(false, Ordering::SeqCst);
        });

        Ok(())
    }

    /// Graceful shutdown requested by the operator
    pub async fn stop(&self) {
        self.manual_stop.store(true, Ordering::SeqCst);

        let mut process = self.process.lock().await;
        if let Some(handle) = process.take() {
            handle.terminate();
        }
        *self.state.lock() = SupervisorState::Stopped;
    }

    fn print_help(&self) {
        let restart_hint = if self.opts.controlled_restart {
            "restart the runtime process"
        } else {
            "(controlled restart disabled)"
        };

        eprintln!("Available commands:");
        eprintln!("  {} + enter  {}", "r".cyan(), restart_hint);
        eprintln!("  {} + enter  quit", "q".cyan());
        eprintln!("  {} + enter  show this help", "h".cyan());
    }

    /// Handle one operator input line; returns whether to keep serving
    pub async fn handle_command(self: &Arc<Self>, input: &str) -> Result<OperatorAction> {
        match input.trim() {
            "q" => {
                self.stop().await;
                Ok(OperatorAction::Quit)
            }
            "h" => {
                self.print_help();
                Ok(OperatorAction::Continue)
            }
            "r" => {
                if self.opts.controlled_restart {
                    self.restart().await?;
                } else {
                    eprintln!(
                        "controlled restart is disabled; enable desktop.controlled_restart to use manual restarts"
                    );
                }
                Ok(OperatorAction::Continue)
            }
            // Unrecognized input is ignored
            _ => Ok(OperatorAction::Continue),
        }
    }

    /// Read line-buffered operator input until quit. With no interactive
    /// stdin the supervisor keeps serving the watch builds.
    pub async fn interactive_loop(self: &Arc<Self>) -> Result<()> {
        self.print_help();

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            if self.handle_command(&line).await? == OperatorAction::Quit {
                return Ok(());
            }
        }

        // stdin closed (non-interactive run): stay alive for the watches
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// Outcome of one operator command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorAction {
    Continue,
    Quit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    /// Launcher that fabricates process handles and records every spawn
    struct FakeLauncher {
        specs: parking_lot::Mutex<Vec<LaunchSpec>>,
        next_pid: AtomicU32,
    }

    impl FakeLauncher {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                specs: parking_lot::Mutex::new(Vec::new()),
                next_pid: AtomicU32::new(100),
            })
        }

        fn spawn_count(&self) -> usize {
            self.specs.lock().len()
        }
    }

    #[async_trait]
    impl RuntimeLauncher for FakeLauncher {
        async fn launch(&self, spec: &LaunchSpec) -> Result<ProcessHandle> {
            self.specs.lock().push(spec.clone());

            let (kill_tx, kill_rx) = oneshot::channel::<()>();
            let (exit_tx, exit_rx) = watch::channel(false);
            tokio::spawn(async move {
                let _ = kill_rx.await;
                let _ = exit_tx.send(true);
            });

            Ok(ProcessHandle::new(
                self.next_pid.fetch_add(1, Ordering::SeqCst),
                kill_tx,
                exit_rx,
            ))
        }
    }

    fn options(controlled: bool) -> SupervisorOptions {
        SupervisorOptions {
            entry_file: PathBuf::from("/tmp/app/dist/desktop/main/main.js"),
            inspect_port: 5858,
            controlled_restart: controlled,
            renderer_port: 5173,
            debounce_window: Duration::from_millis(30),
            exit_grace: Duration::from_millis(300),
        }
    }

    #[tokio::test]
    async fn test_renderer_port_exported_under_both_names_before_start() {
        let launcher = FakeLauncher::new();
        let supervisor = ProcessSupervisor::new(launcher.clone(), options(false));

        supervisor.start().await.unwrap();

        let specs = launcher.specs.lock();
        assert_eq!(specs.len(), 1);

        let env = &specs[0].env;
        assert!(env.contains(&("RENDERER_PORT".to_string(), "5173".to_string())));
        assert!(env.contains(&("PORT".to_string(), "5173".to_string())));
    }

    #[tokio::test]
    async fn test_start_is_idempotent_while_running() {
        let launcher = FakeLauncher::new();
        let supervisor = ProcessSupervisor::new(launcher.clone(), options(false));

        supervisor.start().await.unwrap();
        supervisor.start().await.unwrap();

        assert_eq!(launcher.spawn_count(), 1);
        assert_eq!(supervisor.state(), SupervisorState::Running);
    }

    #[tokio::test]
    async fn test_burst_of_restart_requests_coalesces_to_one() {
        let launcher = FakeLauncher::new();
        let supervisor = ProcessSupervisor::new(launcher.clone(), options(false));

        for _ in 0..5 {
            supervisor.request_restart();
        }

        tokio::time::sleep(Duration::from_millis(150)).await;

        // No process was running, so the one coalesced restart starts one
        assert_eq!(launcher.spawn_count(), 1);
    }

    #[tokio::test]
    async fn test_controlled_mode_ignores_automatic_requests() {
        let launcher = FakeLauncher::new();
        let supervisor = ProcessSupervisor::new(launcher.clone(), options(true));

        for _ in 0..5 {
            supervisor.request_restart();
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(launcher.spawn_count(), 0);

        // One operator command, one restart
        let action = supervisor.handle_command("r").await.unwrap();
        assert_eq!(action, OperatorAction::Continue);
        assert_eq!(launcher.spawn_count(), 1);
    }

    #[tokio::test]
    async fn test_manual_restart_hint_in_default_mode() {
        let launcher = FakeLauncher::new();
        let supervisor = ProcessSupervisor::new(launcher.clone(), options(false));
        supervisor.start().await.unwrap();

        // `r` only reports that controlled restart is disabled
        supervisor.handle_command("r").await.unwrap();
        assert_eq!(launcher.spawn_count(), 1);
    }

    #[tokio::test]
    async fn test_restart_replaces_the_handle() {
        let launcher = FakeLauncher::new();
        let supervisor = ProcessSupervisor::new(launcher.clone(), options(false));

        supervisor.start().await.unwrap();
        let first_pid = supervisor.process.lock().await.as_ref().unwrap().pid();

        supervisor.restart().await.unwrap();
        let second_pid = supervisor.process.lock().await.as_ref().unwrap().pid();

        assert_ne!(first_pid, second_pid);
        assert_eq!(launcher.spawn_count(), 2);
        assert_eq!(supervisor.state(), SupervisorState::Running);
    }

    #[tokio::test]
    async fn test_quit_command_stops_the_process() {
        let launcher = FakeLauncher::new();
        let supervisor = ProcessSupervisor::new(launcher.clone(), options(false));

        supervisor.start().await.unwrap();
        let action = supervisor.handle_command("q").await.unwrap();

        assert_eq!(action, OperatorAction::Quit);
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
        assert!(supervisor.process.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_unrecognized_input_is_ignored() {
        let launcher = FakeLauncher::new();
        let supervisor = ProcessSupervisor::new(launcher.clone(), options(false));

        let action = supervisor.handle_command("xyz").await.unwrap();
        assert_eq!(action, OperatorAction::Continue);
        assert_eq!(launcher.spawn_count(), 0);
    }

    #[test]
    fn test_junk_filter_drops_known_noise() {
        assert!(is_junk_line(
            "2024-03-01 10:22:33.123 Electron[4242:1] Warning: something platform specific"
        ));
        assert!(is_junk_line(
            "2024-03-01 10:22:33.123 Electron Helper[4242:1] noisy"
        ));
        assert!(is_junk_line(
            "[4242:0301/102233.123:ERROR:gpu_init.cc(42)] Passthrough is not supported"
        ));
        assert!(is_junk_line("1709288553.123:ERROR:CONSOLE(1)] noisy"));
        assert!(is_junk_line(
            "ALSA lib pcm.c:8526:(snd_pcm_recover) underrun occurred"
        ));

        assert!(!is_junk_line("app ready, window shown"));
        assert!(!is_junk_line("renderer connected on port 5173"));
    }
}
