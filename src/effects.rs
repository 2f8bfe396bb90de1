//! Effect runner for padmacro
//!
//! Executes the effects produced by the match controller. Feedback triggers
//! are ordinary commands, so they go through the same detached launcher as
//! the commands bound to sequences. Launch failures are logged here and go
//! no further: the controller never learns whether a command started.

use std::sync::Arc;

use crate::launcher::{launch_detached, CommandSpec, LaunchError};
use crate::settings::Bindings;
use crate::state_machine::Effect;

/// Trait for running effects.
pub trait EffectRunner {
    fn run(&self, effect: Effect);
}

/// Starts a command. Split out so the runner can be tested without forking.
pub trait Launcher {
    fn launch(&self, spec: &CommandSpec) -> Result<(), LaunchError>;
}

/// The real thing: double-fork detached launch
pub struct DetachedLauncher;

impl Launcher for DetachedLauncher {
    fn launch(&self, spec: &CommandSpec) -> Result<(), LaunchError> {
        launch_detached(spec)
    }
}

/// Runs effects by launching the configured commands
pub struct CommandEffectRunner<L: Launcher = DetachedLauncher> {
    bindings: Arc<Bindings>,
    launcher: L,
}

impl CommandEffectRunner<DetachedLauncher> {
    pub fn new(bindings: Arc<Bindings>) -> Self {
        Self::with_launcher(bindings, DetachedLauncher)
    }
}

impl<L: Launcher> CommandEffectRunner<L> {
    pub fn with_launcher(bindings: Arc<Bindings>, launcher: L) -> Self {
        Self { bindings, launcher }
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    fn run_command(&self, id: &str, quiet: bool) {
        let Some(spec) = self.bindings.command(id) else {
            // Bindings are validated at startup, so this is a logic error
            log::error!("Command {:?} is not configured", id);
            return;
        };

        if quiet {
            log::debug!("Executing \"{}\"", spec);
        } else {
            log::info!("Executing \"{}\"", spec);
        }

        if let Err(e) = self.launcher.launch(spec) {
            log::error!("Command {:?} failed to launch: {}", id, e);
        }
    }
}

impl<L: Launcher> EffectRunner for CommandEffectRunner<L> {
    fn run(&self, effect: Effect) {
        match effect {
            Effect::Feedback(feedback) => {
                match self.bindings.feedback_command(feedback) {
                    Some(id) => self.run_command(id, true),
                    None => log::trace!("Feedback {} disabled", feedback.as_str()),
                }
            }
            Effect::Launch { pairing, command } => {
                log::debug!("Dispatching pairing {} -> {}", pairing, command);
                let quiet = self.bindings.is_feedback_command(&command);
                self.run_command(&command, quiet);
            }
        }
    }
}
