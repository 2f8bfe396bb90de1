//! Device reader - exclusive access to the keypad and event classification

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use evdev::{Device, EventStream, InputEvent, InputEventKind, Key};
use tokio_util::sync::CancellationToken;

use super::{is_relevant, key_name};

/// Consecutive short reads tolerated before the device is considered broken
pub const DEFAULT_MAX_ERROR_STREAK: u32 = 100;

/// Key event values as reported by the kernel
const KEY_PRESS: i32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("could not open input device {path:?}: {source}")]
    Unavailable { path: PathBuf, source: io::Error },
    #[error("input device {path:?} is grabbed by another process")]
    Busy { path: PathBuf },
    #[error("could not get exclusive access to {path:?}: {source}")]
    GrabFailed { path: PathBuf, source: io::Error },
}

/// One attempt at reading a device record, before classification
#[derive(Debug)]
pub enum RawRead {
    Record(InputEvent),
    /// Transient failure; no record was produced
    Short,
    /// End of stream, e.g. the device was unplugged
    Closed,
    Failed(io::Error),
}

impl RawRead {
    /// Lift the result of a stream read into a `RawRead`
    pub fn from_io(result: io::Result<InputEvent>) -> Self {
        match result {
            Ok(ev) => RawRead::Record(ev),
            Err(e) => match e.kind() {
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock => RawRead::Short,
                io::ErrorKind::UnexpectedEof => RawRead::Closed,
                _ if e.raw_os_error() == Some(libc::ENODEV) => RawRead::Closed,
                _ => RawRead::Failed(e),
            },
        }
    }
}

/// Result of reading one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A press of a relevant key
    Key(Key),
    /// Nothing actionable (release, repeat, irrelevant code, short read)
    Ignored,
    /// The device must be closed and reacquired
    Error,
}

/// Turns raw reads into outcomes and tracks the short-read streak
#[derive(Debug)]
pub struct ReadClassifier {
    error_streak: u32,
    max_error_streak: u32,
}

impl ReadClassifier {
    pub fn new(max_error_streak: u32) -> Self {
        Self {
            error_streak: 0,
            max_error_streak: max_error_streak.max(1),
        }
    }

    /// Number of short reads since the last classified record
    pub fn error_streak(&self) -> u32 {
        self.error_streak
    }

    pub fn reset(&mut self) {
        self.error_streak = 0;
    }

    pub fn classify(&mut self, raw: RawRead) -> ReadOutcome {
        let ev = match raw {
            RawRead::Record(ev) => ev,
            RawRead::Short => {
                self.error_streak += 1;
                if self.error_streak >= self.max_error_streak {
                    log::error!(
                        "Too many device read errors in a row ({})",
                        self.error_streak
                    );
                    return ReadOutcome::Error;
                }
                log::trace!("Short device read (streak {})", self.error_streak);
                return ReadOutcome::Ignored;
            }
            RawRead::Closed => {
                log::warn!("Input device closed");
                return ReadOutcome::Error;
            }
            RawRead::Failed(e) => {
                log::warn!("Input device read error: {}", e);
                return ReadOutcome::Error;
            }
        };

        self.error_streak = 0;

        // Only presses count; releases and auto-repeat are dropped here
        let InputEventKind::Key(key) = ev.kind() else {
            return ReadOutcome::Ignored;
        };
        if ev.value() != KEY_PRESS || !is_relevant(key) {
            return ReadOutcome::Ignored;
        }

        log::debug!(
            "type {:5} | code {:5} | value {:10} ({})",
            ev.event_type().0,
            ev.code(),
            ev.value(),
            key_name(key)
        );
        ReadOutcome::Key(key)
    }
}

/// Owns the keypad device while it is open
pub struct DeviceReader {
    path: PathBuf,
    /// Device found by `wait_until_available`, not yet grabbed
    pending: Option<Device>,
    stream: Option<EventStream>,
    classifier: ReadClassifier,
    /// Failed opens during the current or last availability wait
    wait_attempts: u64,
}

impl DeviceReader {
    pub fn new(path: impl Into<PathBuf>, max_error_streak: u32) -> Self {
        Self {
            path: path.into(),
            pending: None,
            stream: None,
            classifier: ReadClassifier::new(max_error_streak),
            wait_attempts: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Poll for the device node until it can be opened.
    ///
    /// Returns false if cancelled first. The opened device is kept for the
    /// next `open()` call.
    pub async fn wait_until_available(
        &mut self,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> bool {
        if self.pending.is_some() || self.stream.is_some() {
            return true;
        }

        log::info!("Checking for input device availability: {:?}", self.path);
        self.wait_attempts = 0;
        loop {
            match Device::open(&self.path) {
                Ok(device) => {
                    log::info!(
                        "Input device is now available: {} ({}) after {} failed attempt(s)",
                        self.path.display(),
                        device.name().unwrap_or("Unknown"),
                        self.wait_attempts
                    );
                    self.pending = Some(device);
                    return true;
                }
                Err(e) => {
                    self.wait_attempts += 1;
                    if self.wait_attempts == 1 {
                        log::info!(
                            "Input device not available ({}), retrying every {}s",
                            e,
                            interval.as_secs()
                        );
                    } else {
                        log::trace!("Input device still not available: {}", e);
                    }
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// Grab the device for exclusive use and start reading from it
    pub fn open(&mut self) -> Result<(), DeviceError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let mut device = match self.pending.take() {
            Some(device) => device,
            None => Device::open(&self.path).map_err(|source| DeviceError::Unavailable {
                path: self.path.clone(),
                source,
            })?,
        };

        device.grab().map_err(|source| {
            if source.raw_os_error() == Some(libc::EBUSY) {
                DeviceError::Busy {
                    path: self.path.clone(),
                }
            } else {
                DeviceError::GrabFailed {
                    path: self.path.clone(),
                    source,
                }
            }
        })?;

        // The grab is held by the file description, so it moves with the device
        let stream = device
            .into_event_stream()
            .map_err(|source| DeviceError::Unavailable {
                path: self.path.clone(),
                source,
            })?;

        self.classifier.reset();
        self.stream = Some(stream);
        log::info!("Capturing input device events on {}", self.path.display());
        Ok(())
    }

    /// Release the grab and the descriptor. Safe to call when already closed.
    pub fn close(&mut self) {
        self.pending = None;
        if self.stream.take().is_some() {
            // Closing the descriptor drops the EVIOCGRAB lock with it
            log::info!("Released input device {}", self.path.display());
        }
    }

    /// Wait for the next record and classify it
    pub async fn read_event(&mut self) -> ReadOutcome {
        let Some(stream) = self.stream.as_mut() else {
            log::warn!("read_event called without an open device");
            return ReadOutcome::Error;
        };
        let raw = RawRead::from_io(stream.next_event().await);
        self.classifier.classify(raw)
    }
}

impl Drop for DeviceReader {
    fn drop(&mut self) {
        self.close();
    }
}
