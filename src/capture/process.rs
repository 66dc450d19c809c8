use anyhow::{anyhow, Context, Result};
use std::{
    process::Stdio,
    time::Duration,
};
use tokio::{
    process::{Child, Command},
    sync::mpsc,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Signals from the native recorder's watcher, consumed by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    NativeExited { code: Option<i32> },
    NativeFailed { error: String },
}

/// How a supervised child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessEnd {
    /// Exited before anyone asked it to.
    Exited(Option<i32>),
    /// Honoured the interrupt within the stop timeout.
    Interrupted(Option<i32>),
    Killed,
    Lost,
}

/// A child process owned by a watcher task.
///
/// An exit nobody asked for is reported on the lifecycle inbox, when one is
/// attached. [`ManagedProcess::stop`] interrupts the child, waits up to the
/// stop timeout and kills it if it is still around.
pub struct ManagedProcess {
    label: String,
    stop_token: CancellationToken,
    handle: Option<JoinHandle<ProcessEnd>>,
}

impl ManagedProcess {
    pub fn spawn(
        label: impl Into<String>,
        mut command: Command,
        inbox: Option<mpsc::UnboundedSender<LifecycleEvent>>,
        stop_timeout: Duration,
    ) -> Result<Self> {
        let label = label.into();
        // Own process group: a terminal Ctrl-C must not reach the child
        // before we decide to stop it.
        #[cfg(unix)]
        command.process_group(0);

        let child = command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {label}"))?;

        log_info!("{label} started (pid {:?})", child.id());

        let stop_token = CancellationToken::new();
        let handle = tokio::spawn(watch(
            label.clone(),
            child,
            inbox,
            stop_token.clone(),
            stop_timeout,
        ));

        Ok(Self {
            label,
            stop_token,
            handle: Some(handle),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_alive(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Bounded by the stop timeout plus the time a kill takes to land.
    pub async fn stop(mut self) -> Result<ProcessEnd> {
        self.stop_token.cancel();
        let handle = self
            .handle
            .take()
            .ok_or_else(|| anyhow!("{} already stopped", self.label))?;
        handle
            .await
            .with_context(|| format!("{} watcher failed to join", self.label))
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        self.stop_token.cancel();
    }
}

async fn watch(
    label: String,
    mut child: Child,
    inbox: Option<mpsc::UnboundedSender<LifecycleEvent>>,
    stop_token: CancellationToken,
    stop_timeout: Duration,
) -> ProcessEnd {
    tokio::select! {
        status = child.wait() => {
            let (end, event) = match status {
                Ok(status) => {
                    log_warn!("{label} exited on its own with {status}");
                    (
                        ProcessEnd::Exited(status.code()),
                        LifecycleEvent::NativeExited { code: status.code() },
                    )
                }
                Err(err) => {
                    log_warn!("{label} could not be waited on: {err}");
                    (
                        ProcessEnd::Lost,
                        LifecycleEvent::NativeFailed { error: err.to_string() },
                    )
                }
            };
            if let Some(inbox) = inbox {
                let _ = inbox.send(event);
            }
            end
        }
        _ = stop_token.cancelled() => graceful_stop(&label, &mut child, stop_timeout).await,
    }
}

async fn graceful_stop(label: &str, child: &mut Child, stop_timeout: Duration) -> ProcessEnd {
    if !send_interrupt(child) {
        log_debug!("{label}: interrupt unavailable, killing");
        return force_kill(label, child).await;
    }

    match tokio::time::timeout(stop_timeout, child.wait()).await {
        Ok(Ok(status)) => {
            log_info!("{label} stopped with {status}");
            ProcessEnd::Interrupted(status.code())
        }
        Ok(Err(err)) => {
            log_warn!("{label} wait failed after interrupt: {err}");
            force_kill(label, child).await
        }
        Err(_) => {
            log_warn!(
                "{label} ignored interrupt for {}s, killing",
                stop_timeout.as_secs_f32()
            );
            force_kill(label, child).await
        }
    }
}

async fn force_kill(label: &str, child: &mut Child) -> ProcessEnd {
    match child.kill().await {
        Ok(()) => ProcessEnd::Killed,
        Err(err) => {
            log_warn!("failed to kill {label}: {err}");
            ProcessEnd::Lost
        }
    }
}

#[cfg(unix)]
fn send_interrupt(child: &Child) -> bool {
    let Some(pid) = child.id() else {
        return false;
    };
    // SAFETY: plain signal delivery to a pid we spawned and still own.
    unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) == 0 }
}

#[cfg(not(unix))]
fn send_interrupt(_child: &Child) -> bool {
    false
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        command
    }

    #[tokio::test]
    async fn unsolicited_exit_reaches_inbox() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let process =
            ManagedProcess::spawn("native", sh("exit 3"), Some(tx), Duration::from_secs(1))
                .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, LifecycleEvent::NativeExited { code: Some(3) });
        assert_eq!(process.stop().await.unwrap(), ProcessEnd::Exited(Some(3)));
    }

    #[tokio::test]
    async fn interrupt_stops_cooperative_child_without_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let process = ManagedProcess::spawn(
            "native",
            sh("trap 'exit 0' INT; while true; do sleep 0.05; done"),
            Some(tx),
            Duration::from_secs(5),
        )
        .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(process.is_alive());

        let end = process.stop().await.unwrap();
        assert_eq!(end, ProcessEnd::Interrupted(Some(0)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn hung_child_is_killed_after_timeout() {
        let process = ManagedProcess::spawn(
            "native",
            sh("trap '' INT; while true; do sleep 0.05; done"),
            None,
            Duration::from_millis(500),
        )
        .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = Instant::now();
        let end = process.stop().await.unwrap();
        assert_eq!(end, ProcessEnd::Killed);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let result = ManagedProcess::spawn(
            "native",
            Command::new("/nonexistent/flowcap-native-tool"),
            None,
            Duration::from_secs(1),
        );
        assert!(result.is_err());
    }
}
