//! Blocking text sources read on dedicated threads.
//!
//! Terminal and clipboard reads block, so each runs on its own OS thread and
//! hands text to the async side through a channel.

use std::io::BufRead;
use std::thread;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Forward operator lines from stdin.
///
/// Start one per process: a blocked terminal read cannot be interrupted, so
/// a second reader would steal lines from the first. The thread stops at end
/// of input or once the receiver is dropped.
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();

    let spawned = thread::Builder::new()
        .name("portico-stdin".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(error = %e, "Failed to read operator input");
                        break;
                    }
                };
                if tx.send(line).is_err() {
                    break;
                }
            }
            debug!("Operator input closed");
        });
    if let Err(e) = spawned {
        warn!(error = %e, "Failed to start operator input thread");
    }

    rx
}

/// Publish the clipboard's text every `interval`.
///
/// The receiver always holds the most recent text; the router compares it
/// with what it saw last. The thread exits when every receiver is dropped or
/// when no clipboard is available.
pub fn spawn_clipboard_poller(interval: Duration) -> watch::Receiver<String> {
    let (tx, rx) = watch::channel(String::new());

    let spawned = thread::Builder::new()
        .name("portico-clipboard".into())
        .spawn(move || {
            let mut clipboard = match arboard::Clipboard::new() {
                Ok(clipboard) => clipboard,
                Err(e) => {
                    warn!(error = %e, "Clipboard unavailable; codes must be entered manually");
                    return;
                }
            };

            while !tx.is_closed() {
                match clipboard.get_text() {
                    Ok(text) => {
                        tx.send_if_modified(|current| {
                            if *current == text {
                                false
                            } else {
                                *current = text;
                                true
                            }
                        });
                    }
                    // Empty or non-text clipboards are not observations.
                    Err(arboard::Error::ContentNotAvailable) => {}
                    Err(e) => debug!(error = %e, "Clipboard read failed"),
                }
                thread::sleep(interval);
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "Failed to start clipboard thread");
    }

    rx
}

/// Lend `source` to a consumer until `stop` fires or the consumer drops
/// its receiver.
///
/// The handle resolves to `source` so the next prompt or run reads from it.
/// Lines not yet forwarded stay in `source`.
pub fn lend_lines(
    mut source: mpsc::UnboundedReceiver<String>,
    stop: CancellationToken,
) -> (
    mpsc::UnboundedReceiver<String>,
    JoinHandle<mpsc::UnboundedReceiver<String>>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                () = stop.cancelled() => break,
                () = tx.closed() => break,
                line = source.recv() => match line {
                    Some(line) => {
                        if let Err(mpsc::error::SendError(line)) = tx.send(line) {
                            debug!(%line, "Operator line dropped after the router stopped");
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
        source
    });
    (rx, handle)
}

/// Feed operator lines from any async reader, e.g. a test script.
pub fn spawn_line_reader<R>(reader: R) -> mpsc::UnboundedReceiver<String>
where
    R: tokio::io::AsyncBufRead + Unpin + Send + 'static,
{
    use tokio::io::AsyncBufReadExt;

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = reader.lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}
