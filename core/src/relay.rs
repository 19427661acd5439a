//! Output relay: drains the child's merged output into the host log sink
//!
//! One relay task exists per child lifetime. It merges the child's piped
//! stdout and stderr line by line and forwards every line to the host's
//! logger under the fixed `frpc` target. The relay is fire-and-forget
//! relative to the control operations and ends on its own when both
//! streams reach EOF (the child exited or was killed and its pipes
//! closed).

use std::pin::Pin;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A boxed async reader handed over from a managed process
pub type OutputStream = Pin<Box<dyn AsyncRead + Send + Unpin>>;

/// Spawn the relay task for a child's output streams
///
/// Missing streams (not piped, or already taken) are treated as
/// immediately exhausted.
pub fn spawn_relay(
    name: &str,
    stdout: Option<OutputStream>,
    stderr: Option<OutputStream>,
) -> JoinHandle<()> {
    let name = name.to_string();
    let stdout = stdout.unwrap_or_else(empty_stream);
    let stderr = stderr.unwrap_or_else(empty_stream);

    tokio::spawn(async move {
        let mut out_lines = BufReader::new(stdout).lines();
        let mut err_lines = BufReader::new(stderr).lines();
        let mut out_done = false;
        let mut err_done = false;

        while !(out_done && err_done) {
            tokio::select! {
                line = out_lines.next_line(), if !out_done => {
                    match line {
                        Ok(Some(line)) => info!(target: "frpc", "{}", line),
                        Ok(None) => out_done = true,
                        Err(e) => {
                            warn!("Error reading '{}' stdout: {}", name, e);
                            out_done = true;
                        }
                    }
                }
                line = err_lines.next_line(), if !err_done => {
                    match line {
                        Ok(Some(line)) => info!(target: "frpc", "{}", line),
                        Ok(None) => err_done = true,
                        Err(e) => {
                            warn!("Error reading '{}' stderr: {}", name, e);
                            err_done = true;
                        }
                    }
                }
            }
        }

        debug!("Output relay for '{}' finished", name);
    })
}

fn empty_stream() -> OutputStream {
    Box::pin(tokio::io::empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn relay_finishes_when_streams_close() {
        let (mut writer, reader) = tokio::io::duplex(256);
        let stdout: OutputStream = Box::pin(reader);

        let handle = spawn_relay("frpc", Some(stdout), None);

        writer.write_all(b"line one\nline two\n").await.unwrap();
        drop(writer);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("relay should finish on EOF")
            .expect("relay task should not panic");
    }

    #[tokio::test]
    async fn relay_with_no_streams_finishes_immediately() {
        let handle = spawn_relay("frpc", None, None);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("relay should finish immediately")
            .expect("relay task should not panic");
    }

    #[tokio::test]
    async fn relay_merges_both_streams() {
        let (mut out_writer, out_reader) = tokio::io::duplex(256);
        let (mut err_writer, err_reader) = tokio::io::duplex(256);

        let handle = spawn_relay(
            "frpc",
            Some(Box::pin(out_reader)),
            Some(Box::pin(err_reader)),
        );

        out_writer.write_all(b"out\n").await.unwrap();
        err_writer.write_all(b"err\n").await.unwrap();
        drop(out_writer);
        drop(err_writer);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("relay should finish when both streams close")
            .expect("relay task should not panic");
    }
}
