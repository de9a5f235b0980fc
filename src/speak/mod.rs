//! Spoken-output sink.
//!
//! Appends one newline-terminated line per speech segment to a named pipe
//! (or any writable path) consumed by an external text-to-speech reader
//! process. Output is best-effort: if the sink is unavailable the segment
//! is dropped with a log, never failing the turn. Text history capture does
//! not depend on this sink.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use tracing::{debug, warn};

#[derive(Clone)]
pub struct SpeechSink {
    path: PathBuf,
    interrupt_signal: String,
}

impl SpeechSink {
    pub fn new(path: PathBuf, interrupt_signal: String) -> Self {
        Self {
            path,
            interrupt_signal,
        }
    }

    /// Append one spoken line. Failures drop the segment.
    pub fn speak(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.write_line(text);
    }

    /// Tell the reader to halt playback (barge-in).
    pub fn interrupt(&self) {
        debug!("Sending playback interrupt");
        self.write_line(&self.interrupt_signal);
    }

    fn write_line(&self, line: &str) {
        match OpenOptions::new().append(true).open(&self.path) {
            Ok(mut f) => {
                if let Err(e) = writeln!(f, "{line}") {
                    warn!("Speech sink write failed: {e}; dropping segment");
                }
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    "Speech sink unavailable: {e}; dropping segment"
                );
            }
        }
    }
}
