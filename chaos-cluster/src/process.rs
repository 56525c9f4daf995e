//! A single server process and its lifecycle.

use crate::error::{ClusterError, Result};
use crate::launcher::{LaunchSpec, Launcher};
use chaos_types::{LifecycleState, NodeId};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Child;

/// Lines of captured output included in startup errors.
const LOG_TAIL_LINES: usize = 20;

/// One node of the cluster: its launch parameters, state and OS handle.
#[derive(Debug)]
pub struct ServerProcess {
    id: NodeId,
    spec: LaunchSpec,
    state: LifecycleState,
    child: Option<Child>,
    /// Captured stdout/stderr of the executable.
    output_log: PathBuf,
    /// Number of times this node has been spawned.
    spawns: u32,
}

impl ServerProcess {
    /// Create a node in the Stopped state.
    pub fn new(id: NodeId, spec: LaunchSpec, output_log: PathBuf) -> Self {
        Self {
            id,
            spec,
            state: LifecycleState::Stopped,
            child: None,
            output_log,
            spawns: 0,
        }
    }

    /// Node id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Launch parameters.
    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// OS process id, while a process exists.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    /// Path of the captured stdout/stderr log.
    pub fn output_log(&self) -> &Path {
        &self.output_log
    }

    /// How many times the node has been spawned (1 + restarts).
    pub fn spawns(&self) -> u32 {
        self.spawns
    }

    fn transition(&mut self, next: LifecycleState) -> Result<()> {
        self.state = self
            .state
            .transition(next)
            .map_err(|source| ClusterError::Transition {
                node: self.id,
                source,
            })?;
        Ok(())
    }

    /// Spawn the executable. Stopped/Killed → Starting.
    pub(crate) fn spawn(&mut self, launcher: &dyn Launcher) -> Result<()> {
        self.transition(LifecycleState::Starting)?;

        if let Some(dir) = self.spec.data_dir() {
            std::fs::create_dir_all(dir)?;
        }
        let out = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.output_log)?;
        let err = out.try_clone()?;

        let mut cmd = launcher.command(&self.spec);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::from(out))
            .stderr(Stdio::from(err))
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| ClusterError::Spawn {
            node: self.id,
            source,
        })?;
        tracing::info!(
            "Spawned {} (pid {:?}) on {}",
            self.id,
            child.id(),
            self.spec.primary_addr()
        );
        self.child = Some(child);
        self.spawns += 1;
        Ok(())
    }

    /// Exit status if the process has already exited.
    pub(crate) fn exited(&mut self) -> Result<Option<ExitStatus>> {
        match self.child.as_mut() {
            Some(child) => Ok(child.try_wait()?),
            None => Ok(None),
        }
    }

    /// Health probe passed. Starting → Running.
    pub(crate) fn mark_running(&mut self) -> Result<()> {
        self.transition(LifecycleState::Running)
    }

    /// Kill the process, wait for the OS to reap it, then wait `settle`.
    /// Starting/Running → Killed.
    ///
    /// The state only moves to Killed once the process is confirmed gone; a
    /// failed kill leaves the node in its previous state.
    pub(crate) async fn kill(&mut self, settle: Duration) -> Result<()> {
        if !self.state.can_transition_to(LifecycleState::Killed) {
            return self.transition(LifecycleState::Killed);
        }

        if let Some(child) = self.child.as_mut() {
            let already_exited = child.try_wait().map_err(|source| ClusterError::Kill {
                node: self.id,
                source,
            })?;
            match already_exited {
                Some(status) => {
                    tracing::info!("{} had already exited ({})", self.id, status);
                }
                None => {
                    tracing::info!("Killing {} (pid {:?})", self.id, child.id());
                    child.kill().await.map_err(|source| ClusterError::Kill {
                        node: self.id,
                        source,
                    })?;
                }
            }
        }
        self.child = None;
        self.transition(LifecycleState::Killed)?;

        tokio::time::sleep(settle).await;
        Ok(())
    }

    /// Best-effort tail of the captured output, followed by the server log.
    pub fn log_tail(&self) -> String {
        let mut tail = tail_lines(&self.output_log, LOG_TAIL_LINES);
        let server_log = tail_lines(self.spec.log_file(), LOG_TAIL_LINES);
        if !server_log.is_empty() {
            if !tail.is_empty() {
                tail.push('\n');
            }
            tail.push_str(&server_log);
        }
        tail
    }
}

fn tail_lines(path: &Path, n: usize) -> String {
    let content = std::fs::read_to_string(path).unwrap_or_default();
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}
