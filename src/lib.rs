pub mod effects;
pub mod keypad;
pub mod launcher;
pub mod settings;
pub mod state_machine;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use effects::{CommandEffectRunner, EffectRunner};
use keypad::{DeviceReader, ReadOutcome};
use settings::{Bindings, Settings};
use state_machine::MatchController;

/// Everything the daemon mutates, owned by the single control loop
pub struct Daemon<R: EffectRunner> {
    reader: DeviceReader,
    controller: MatchController,
    runner: R,
    retry_interval: Duration,
}

enum LoopEvent {
    Cancelled,
    Read(ReadOutcome),
}

impl<R: EffectRunner> Daemon<R> {
    pub fn new(settings: &Settings, bindings: &Bindings, runner: R) -> Self {
        Self {
            reader: DeviceReader::new(&settings.device, settings.max_read_error_streak),
            controller: bindings.controller(),
            runner,
            retry_interval: settings.retry_interval(),
        }
    }

    pub fn controller(&self) -> &MatchController {
        &self.controller
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Apply one read outcome. Returns false when the device has to be
    /// closed and reacquired.
    pub fn handle(&mut self, outcome: ReadOutcome) -> bool {
        match outcome {
            ReadOutcome::Key(key) => {
                for effect in self.controller.feed(key) {
                    self.runner.run(effect);
                }
                true
            }
            ReadOutcome::Ignored => true,
            ReadOutcome::Error => false,
        }
    }

    /// Run until cancelled. Device failures never end the loop; they lead
    /// back to waiting for the device.
    pub async fn run(&mut self, cancel: CancellationToken) {
        log::info!("Daemon loop started");

        'device: loop {
            if !self
                .reader
                .wait_until_available(self.retry_interval, &cancel)
                .await
            {
                break;
            }

            if let Err(e) = self.reader.open() {
                log::warn!("{}", e);
                self.reader.close();
                // Back off so a device held by someone else is not hammered
                let cancelled = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => true,
                    _ = tokio::time::sleep(self.retry_interval) => false,
                };
                if cancelled {
                    break;
                }
                continue;
            }

            loop {
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => LoopEvent::Cancelled,
                    outcome = self.reader.read_event() => LoopEvent::Read(outcome),
                };
                match event {
                    LoopEvent::Cancelled => break 'device,
                    LoopEvent::Read(outcome) => {
                        if !self.handle(outcome) {
                            break;
                        }
                    }
                }
            }

            log::warn!("Lost input device, reacquiring");
            self.reader.close();
        }

        self.reader.close();
        log::info!("Daemon loop ended");
    }
}

fn log_bindings(settings: &Settings, bindings: &Bindings) {
    log::info!(
        "Device {}, {} pairing(s), feedback {}",
        settings.device.display(),
        bindings.pairings().len(),
        if bindings.feedback_enabled() { "on" } else { "off" }
    );
    for pairing in bindings.pairings() {
        log::info!(
            "  {} ({}) -> {}",
            pairing.sequence_id,
            pairing.sequence,
            pairing.command
        );
    }
}

/// Cancel `token` on SIGINT or SIGTERM
fn spawn_signal_watcher(token: CancellationToken) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = terminate.recv() => log::info!("SIGTERM received, shutting down"),
            _ = interrupt.recv() => log::info!("SIGINT received, shutting down"),
            _ = token.cancelled() => return,
        }
        token.cancel();
    });
    Ok(())
}

/// Run the daemon with the real device and detached command launches.
///
/// Must be driven by a current-thread runtime: commands are launched with
/// fork, which is only sound from a single-threaded process.
pub async fn run(settings: Settings, bindings: Bindings) -> std::io::Result<()> {
    log_bindings(&settings, &bindings);

    let cancel = CancellationToken::new();
    spawn_signal_watcher(cancel.clone())?;

    let runner = CommandEffectRunner::new(Arc::new(bindings.clone()));
    let mut daemon = Daemon::new(&settings, &bindings, runner);
    daemon.run(cancel).await;
    Ok(())
}
