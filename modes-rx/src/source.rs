//! Sample source: file or stdin to a rolling window of I/Q bytes.
//!
//! The producer owns the rolling window. Every fill carries the trailing
//! `WINDOW_CARRY` bytes of the previous window to the front so a frame
//! straddling two fills stays detectable, then hands a copy of the whole
//! window to the decoder over a bounded channel. Ownership transfer
//! replaces the mutex + ready-flag pattern: the consumer works on its
//! window while the producer fills the next one, and the channel bound
//! provides backpressure.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Sender, TrySendError};
use tracing::{debug, warn};

use modes_core::demod::{DATA_LEN, WINDOW_CARRY, WINDOW_LEN};

/// Windows in flight between producer and consumer.
pub const CHANNEL_DEPTH: usize = 4;

/// File-backed sample producer.
pub struct FileSource {
    path: PathBuf,
    /// Extra replays of the file after the first pass.
    loops: u64,
    /// Sleep one second per window, mimicking a 2 Ms/s device.
    throttle: bool,
}

enum Input {
    File(File),
    Stdin(io::Stdin),
}

impl Read for Input {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Input::File(f) => f.read(buf),
            Input::Stdin(s) => s.read(buf),
        }
    }
}

impl FileSource {
    pub fn new(path: &Path, loops: u64, throttle: bool) -> Self {
        FileSource {
            path: path.to_path_buf(),
            loops,
            throttle,
        }
    }

    fn is_stdin(&self) -> bool {
        self.path.as_os_str() == "-"
    }

    fn open(&self) -> io::Result<Input> {
        if self.is_stdin() {
            Ok(Input::Stdin(io::stdin()))
        } else {
            Ok(Input::File(File::open(&self.path)?))
        }
    }

    /// Run the producer until the input is exhausted or `exit` is set.
    ///
    /// Blocks the calling thread; spawn via [`spawn`].
    pub fn run(&self, tx: Sender<Vec<u8>>, exit: Arc<AtomicBool>) -> io::Result<()> {
        // The window starts as silence so the first carry is harmless.
        let mut window = vec![127u8; WINDOW_LEN];
        let mut loops_left = self.loops;

        if loops_left > 0 && self.is_stdin() {
            warn!("--loop is not supported for stdin");
            loops_left = 0;
        }

        let mut input = self.open()?;

        loop {
            if exit.load(Ordering::Relaxed) {
                return Ok(());
            }

            if self.throttle {
                thread::sleep(Duration::from_secs(1));
            }

            // Keep the tail of the previous window for straddling frames.
            window.copy_within(DATA_LEN.., 0);

            let mut filled = 0usize;
            let mut eof = false;
            while filled < DATA_LEN {
                match input.read(&mut window[WINDOW_CARRY + filled..]) {
                    Ok(0) => {
                        eof = true;
                        break;
                    }
                    Ok(n) => filled += n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            }

            // Not enough data to fill the window: pad with silence.
            if filled < DATA_LEN {
                window[WINDOW_CARRY + filled..].fill(127);
            }

            if filled > 0 && !self.send_window(&tx, &window, &exit)? {
                return Ok(());
            }

            if eof {
                if loops_left == 0 {
                    return Ok(());
                }
                loops_left -= 1;
                debug!(loops_left, "replaying input file");
                input = self.open()?;
            }
        }
    }

    /// Blocking send that still honours the exit flag.
    ///
    /// Returns false when the producer should stop (consumer gone).
    fn send_window(
        &self,
        tx: &Sender<Vec<u8>>,
        window: &[u8],
        exit: &AtomicBool,
    ) -> io::Result<bool> {
        let mut out = window.to_vec();
        loop {
            match tx.try_send(out) {
                Ok(()) => return Ok(true),
                Err(TrySendError::Full(back)) => {
                    if exit.load(Ordering::Relaxed) {
                        return Ok(true);
                    }
                    out = back;
                    thread::sleep(Duration::from_millis(5));
                }
                Err(TrySendError::Disconnected(_)) => {
                    // Consumer is gone: normal shutdown.
                    return Ok(false);
                }
            }
        }
    }
}

/// Filter long runs of near-silence out of an I/Q stream.
///
/// Sample pairs with both amplitudes below `level` are dropped once more
/// than `4 * PREAMBLE_US` of them occur in a row, which shrinks recordings
/// without cutting into real frames.
pub fn strip_filter(
    mut input: impl Read,
    mut output: impl io::Write,
    level: i32,
) -> io::Result<()> {
    const KEEP: u64 = 4 * modes_core::demod::PREAMBLE_US as u64;

    let mut pair = [0u8; 2];
    let mut quiet_run = 0u64;

    loop {
        match input.read_exact(&mut pair) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return output.flush(),
            Err(e) => return Err(e),
        }

        let i = (pair[0] as i32 - 127).abs();
        let q = (pair[1] as i32 - 127).abs();
        if i < level && q < level {
            quiet_run += 1;
            if quiet_run > KEEP {
                continue;
            }
        } else {
            quiet_run = 0;
        }

        output.write_all(&pair)?;
    }
}

/// Spawn the producer on its own thread.
pub fn spawn(
    source: FileSource,
    tx: Sender<Vec<u8>>,
    exit: Arc<AtomicBool>,
) -> thread::JoinHandle<io::Result<()>> {
    thread::Builder::new()
        .name("sample-source".into())
        .spawn(move || source.run(tx, exit))
        .expect("spawn sample source thread")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
