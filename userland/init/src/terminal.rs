//! The host terminal as the machine's console.

use kernel::Console;
use log::debug;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

/// How often the reader checks whether the shell drained the last keys.
const DRAIN_POLL: Duration = Duration::from_millis(20);

/// Writes go to standard output; keys come from a reader thread on
/// standard input.
pub struct Terminal {
    keys: Receiver<u8>,
    queued: Arc<AtomicUsize>,
    out: io::Stdout,
}

impl Terminal {
    /// Start reading standard input. The returned receiver gets a message
    /// once input has ended and every key has been consumed.
    pub fn spawn() -> io::Result<(Self, Receiver<()>)> {
        let (tx, rx) = mpsc::channel();
        let (closed_tx, closed_rx) = mpsc::channel();
        let queued = Arc::new(AtomicUsize::new(0));
        {
            let queued = Arc::clone(&queued);
            thread::Builder::new()
                .name("keyboard".into())
                .spawn(move || {
                    read_keys(&tx, &queued);
                    let _ = closed_tx.send(());
                })?;
        }
        let terminal = Self {
            keys: rx,
            queued,
            out: io::stdout(),
        };
        Ok((terminal, closed_rx))
    }
}

fn read_keys(tx: &Sender<u8>, queued: &AtomicUsize) {
    for byte in io::stdin().lock().bytes() {
        let Ok(byte) = byte else { break };
        queued.fetch_add(1, Ordering::AcqRel);
        if tx.send(byte).is_err() {
            return;
        }
    }
    while queued.load(Ordering::Acquire) > 0 {
        thread::sleep(DRAIN_POLL);
    }
    debug!("standard input closed");
}

impl Console for Terminal {
    fn write(&mut self, bytes: &[u8]) {
        let _ = self.out.write_all(bytes);
        let _ = self.out.flush();
    }

    fn restore_text_mode(&mut self) {}

    fn poll_input(&mut self) -> Option<u8> {
        let key = self.keys.try_recv().ok()?;
        self.queued.fetch_sub(1, Ordering::AcqRel);
        Some(key)
    }
}
