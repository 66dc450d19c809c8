use anyhow::{Context, Result};
use std::process::Stdio;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
    sync::mpsc,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use super::interpreter::{EventInterpreter, Gesture};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Spawn the raw event stream and forward every completed gesture.
///
/// Fails only if the child cannot be started. The returned task ends when the
/// stream closes, the receiver goes away or `cancel_token` fires.
pub fn spawn_event_listener(
    mut command: Command,
    mut interpreter: EventInterpreter,
    gestures: mpsc::UnboundedSender<Gesture>,
    cancel_token: CancellationToken,
) -> Result<JoinHandle<()>> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .context("failed to spawn device event stream")?;

    let stdout = child
        .stdout
        .take()
        .context("device event stream has no stdout")?;

    let handle = tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();

        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Some(gesture) = interpreter.feed_line(&line) {
                            log_debug!("gesture detected: {:?}", gesture);
                            if gestures.send(gesture).is_err() {
                                break;
                            }
                        }
                    }
                    Ok(None) => {
                        log_warn!("device event stream closed");
                        break;
                    }
                    Err(err) => {
                        log_warn!("device event stream read failed: {err}");
                        break;
                    }
                },
                _ = cancel_token.cancelled() => {
                    log_info!("event listener shutting down");
                    break;
                }
            }
        }

        let _ = child.start_kill();
        let _ = child.wait().await;
    });

    Ok(handle)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::models::Point;
    use crate::settings::GestureSettings;

    #[tokio::test]
    async fn forwards_gestures_from_child_stdout() {
        let script = "printf '%s\\n' \
            '[ 1.000000] /dev/input/event1: EV_ABS ABS_MT_POSITION_X 0000000a' \
            '[ 1.000000] /dev/input/event1: EV_ABS ABS_MT_POSITION_Y 00000014' \
            '[ 1.000000] /dev/input/event1: EV_KEY BTN_TOUCH DOWN' \
            '[ 1.000000] /dev/input/event1: EV_SYN SYN_REPORT 00000000' \
            '[ 1.050000] /dev/input/event1: EV_KEY BTN_TOUCH UP' \
            '[ 2.000000] /dev/input/event0: EV_KEY KEY_BACK DOWN'";
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_event_listener(
            command,
            EventInterpreter::new(GestureSettings::default()),
            tx,
            CancellationToken::new(),
        )
        .unwrap();

        handle.await.unwrap();

        assert_eq!(
            rx.recv().await,
            Some(Gesture::Tap {
                at: Point::new(10, 20)
            })
        );
        assert_eq!(rx.recv().await, Some(Gesture::Back));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = spawn_event_listener(
            Command::new("/definitely/not/a/real/getevent"),
            EventInterpreter::new(GestureSettings::default()),
            tx,
            CancellationToken::new(),
        );
        assert!(result.is_err());
    }
}
