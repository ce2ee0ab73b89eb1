//! Line sources for interactive sessions.
//!
//! Interactive reads must stay cancellable: a session waiting on the terminal
//! has to return as soon as its cancellation token fires, not after the next
//! line arrives.

use async_trait::async_trait;
use std::io::{self, BufRead};
use tokio::io::{AsyncBufRead, Lines};
use tokio::sync::mpsc;

/// Yields input lines without their trailing line break.
#[async_trait]
pub trait LineSource: Send {
    /// Returns the next line, or `None` at end of input.
    async fn next_line(&mut self) -> io::Result<Option<String>>;
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> LineSource for Lines<R> {
    async fn next_line(&mut self) -> io::Result<Option<String>> {
        Lines::next_line(self).await
    }
}

/// Process stdin as a [`LineSource`].
///
/// Lines are read on a dedicated thread started by the first read. The thread
/// is never joined, so a read still blocked on the terminal holds up neither
/// cancellation nor runtime shutdown.
#[derive(Debug, Default)]
pub struct StdinLines {
    lines: Option<mpsc::UnboundedReceiver<io::Result<String>>>,
}

impl StdinLines {
    pub fn new() -> Self {
        Self::default()
    }

    fn spawn_reader() -> io::Result<mpsc::UnboundedReceiver<io::Result<String>>> {
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::Builder::new().name("abllama-stdin".to_string()).spawn(move || {
            for line in io::stdin().lock().lines() {
                let failed = line.is_err();
                if tx.send(line).is_err() || failed {
                    break;
                }
            }
        })?;
        Ok(rx)
    }
}

#[async_trait]
impl LineSource for StdinLines {
    async fn next_line(&mut self) -> io::Result<Option<String>> {
        if self.lines.is_none() {
            self.lines = Some(Self::spawn_reader()?);
        }
        match self.lines.as_mut() {
            Some(lines) => lines.recv().await.transpose(),
            None => Ok(None),
        }
    }
}
