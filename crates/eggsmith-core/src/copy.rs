//! Fixed-block file copy with fractional progress reporting.

use crate::error::{EggsmithError, EggsmithResult};
use log::{debug, info, warn};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;
pub const DEFAULT_THROTTLE: Duration = Duration::from_millis(10);

/// Count of completed transfers for the session. Only ever increases.
#[derive(Debug, Default)]
pub struct CopyTally {
    completed: AtomicU64,
}

impl CopyTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    fn increment(&self) -> u64 {
        self.completed.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub bytes_total: u64,
    pub blocks: u64,
}

/// Copies one file in constant-size blocks.
///
/// `fast == false` sleeps for `throttle` after each block so progress visibly
/// animates; that delay is the only difference between the two modes.
#[derive(Debug, Clone)]
pub struct ChunkedCopier {
    block_size: usize,
    throttle: Duration,
}

impl Default for ChunkedCopier {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE, DEFAULT_THROTTLE)
    }
}

impl ChunkedCopier {
    pub fn new(block_size: usize, throttle: Duration) -> Self {
        Self {
            block_size: block_size.max(1),
            throttle,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Copy `source` to the file path `destination`.
    ///
    /// `on_progress` receives `bytes_written / total` after every block and
    /// ends on exactly `1.0`. On failure the partial destination is removed
    /// and `tally` is left untouched.
    pub fn copy(
        &self,
        source: &Path,
        destination: &Path,
        fast: bool,
        tally: &CopyTally,
        on_progress: &mut dyn FnMut(f64),
    ) -> EggsmithResult<TransferReport> {
        let failed = |reason: String| EggsmithError::TransferFailed {
            artifact: source.to_path_buf(),
            destination: destination.to_path_buf(),
            reason,
        };

        if same_file(source, destination) {
            return Err(failed("source and destination are the same file".into()));
        }

        let total = fs::metadata(source)
            .map_err(|err| failed(format!("cannot stat source: {err}")))?
            .len();
        info!(
            "copying {} -> {} ({total} bytes, {} mode)",
            source.display(),
            destination.display(),
            if fast { "fast" } else { "throttled" }
        );

        let mut created = false;
        match self.transfer(source, destination, total, fast, &mut created, on_progress) {
            Ok(blocks) => {
                let count = tally.increment();
                debug!("copy tally now {count}");
                Ok(TransferReport {
                    source: source.to_path_buf(),
                    destination: destination.to_path_buf(),
                    bytes_total: total,
                    blocks,
                })
            }
            Err(reason) => {
                if created {
                    if let Err(err) = fs::remove_file(destination) {
                        warn!(
                            "could not remove partial copy {}: {err}",
                            destination.display()
                        );
                    }
                }
                Err(failed(reason))
            }
        }
    }

    fn transfer(
        &self,
        source: &Path,
        destination: &Path,
        total: u64,
        fast: bool,
        created: &mut bool,
        on_progress: &mut dyn FnMut(f64),
    ) -> Result<u64, String> {
        let mut reader = File::open(source).map_err(|err| format!("cannot open source: {err}"))?;
        let existed = destination.exists();
        let mut writer =
            File::create(destination).map_err(|err| format!("cannot create destination: {err}"))?;
        *created = !existed;

        if total == 0 {
            on_progress(1.0);
            return Ok(0);
        }

        let mut buf = vec![0u8; self.block_size];
        let mut written: u64 = 0;
        let mut blocks: u64 = 0;
        loop {
            let n = read_block(&mut reader, &mut buf).map_err(|err| format!("read failed: {err}"))?;
            if n == 0 {
                break;
            }
            writer
                .write_all(&buf[..n])
                .map_err(|err| format!("write failed: {err}"))?;
            written += n as u64;
            blocks += 1;
            if written > total {
                return Err(format!("source grew during copy (expected {total} bytes)"));
            }
            on_progress(written as f64 / total as f64);
            if !fast && !self.throttle.is_zero() {
                thread::sleep(self.throttle);
            }
        }

        if written != total {
            return Err(format!(
                "size mismatch: copied {written} of {total} bytes"
            ));
        }
        writer
            .sync_all()
            .map_err(|err| format!("flush failed: {err}"))?;
        Ok(blocks)
    }
}

/// Fill `buf` unless EOF arrives first, so every block except the last is full.
fn read_block(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
