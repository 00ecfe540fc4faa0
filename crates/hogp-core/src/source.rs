//! Input event sources

use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::mpsc;
use tracing::warn;

use crate::event::InputEvent;

/// Ordered stream of physical input events
#[async_trait::async_trait]
pub trait InputEventSource: Send {
    /// Next event, or `None` once the source is closed
    async fn next_event(&mut self) -> Option<InputEvent>;
}

// ----------------------------------------------------------------------------
// Channel Source
// ----------------------------------------------------------------------------

/// Source fed through a tokio mpsc channel
#[derive(Debug)]
pub struct ChannelEventSource {
    rx: mpsc::Receiver<InputEvent>,
}

impl ChannelEventSource {
    pub fn new(rx: mpsc::Receiver<InputEvent>) -> Self {
        Self { rx }
    }

    /// Create a sender and the source it feeds
    pub fn channel(buffer: usize) -> (mpsc::Sender<InputEvent>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self::new(rx))
    }
}

#[async_trait::async_trait]
impl InputEventSource for ChannelEventSource {
    async fn next_event(&mut self) -> Option<InputEvent> {
        self.rx.recv().await
    }
}

// ----------------------------------------------------------------------------
// JSON Lines Source
// ----------------------------------------------------------------------------

/// Source reading one JSON-encoded [`InputEvent`] per line
///
/// Blank lines are ignored; lines that fail to parse are logged and skipped.
pub struct JsonLinesSource<R> {
    lines: Lines<R>,
    line_number: usize,
}

impl<R: AsyncBufRead + Unpin + Send> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_number: 0,
        }
    }
}

#[async_trait::async_trait]
impl<R: AsyncBufRead + Unpin + Send> InputEventSource for JsonLinesSource<R> {
    async fn next_event(&mut self) -> Option<InputEvent> {
        loop {
            let line = match self.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(e) => {
                    warn!("Input stream failed after line {}: {}", self.line_number, e);
                    return None;
                }
            };
            self.line_number += 1;

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<InputEvent>(line) {
                Ok(event) => return Some(event),
                Err(e) => warn!("Skipping input line {}: {}", self.line_number, e),
            }
        }
    }
}
