//! Static configuration: commands, key sequences and the pairings between them
//!
//! Settings live in `~/.config/padmacro/config.json`. They are read once at
//! startup and resolved into immutable `Bindings`; nothing is editable while
//! the daemon runs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::keypad::reader::DEFAULT_MAX_ERROR_STREAK;
use crate::keypad::{KeySequence, SequenceMatcher, SequenceParseError};
use crate::launcher::{check_executable, is_executable, CommandSpec};
use crate::state_machine::{Feedback, MatchController, PairingTarget};

const CONFIG_DIR_NAME: &str = "padmacro";
const SETTINGS_FILE_NAME: &str = "config.json";
const DEFAULT_DEVICE: &str = "/dev/input/by-id/usb-04f3_0104-event-kbd";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file {path:?} not found")]
    NotFound { path: PathBuf },
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("sequence {id:?} is invalid: {source}")]
    InvalidSequence {
        id: String,
        source: SequenceParseError,
    },
    #[error("command {id:?} is invalid: {reason}")]
    InvalidCommand { id: String, reason: String },
    #[error("pairing #{index} references unknown sequence {id:?}")]
    UnknownSequence { index: usize, id: String },
    #[error("pairing #{index} references unknown command {id:?}")]
    UnknownCommand { index: usize, id: String },
    #[error("{trigger} feedback references unknown command {id:?}")]
    UnknownFeedbackCommand { trigger: &'static str, id: String },
}

/// Associates a sequence with the command it triggers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingSettings {
    pub sequence: String,
    pub command: String,
}

impl PairingSettings {
    fn new(sequence: &str, command: &str) -> Self {
        Self {
            sequence: sequence.to_string(),
            command: command.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackSettings {
    /// When disabled, feedback triggers do nothing.
    pub enabled: bool,
    /// Command run when a sequence is accepted or aborted.
    pub acknowledge: String,
    /// Command run when Enter matched nothing.
    pub reject: String,
    /// Command run for every collected digit.
    pub keystroke: String,
}

impl Default for FeedbackSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            acknowledge: "beep-ack".to_string(),
            reject: "beep-nak".to_string(),
            keystroke: "beep-key".to_string(),
        }
    }
}

impl FeedbackSettings {
    fn command_for(&self, feedback: Feedback) -> &str {
        match feedback {
            Feedback::Acknowledge => &self.acknowledge,
            Feedback::Reject => &self.reject,
            Feedback::Keystroke => &self.keystroke,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Input device node of the keypad.
    pub device: PathBuf,

    /// Seconds between attempts to open an absent device.
    pub retry_interval_secs: u64,

    /// Consecutive short reads after which the device is reopened.
    pub max_read_error_streak: u32,

    /// Command id -> program to run.
    pub commands: BTreeMap<String, CommandSpec>,

    /// Sequence id -> digits, e.g. "004".
    pub sequences: BTreeMap<String, String>,

    /// Which sequence runs which command, in dispatch order.
    pub pairings: Vec<PairingSettings>,

    pub feedback: FeedbackSettings,
}

impl Default for Settings {
    fn default() -> Self {
        let beep = |args: &[&str]| CommandSpec::new("/usr/bin/beep", args);
        let commands = BTreeMap::from([
            (
                "beep-ack".to_string(),
                beep(&["-f", "880", "-n", "-f", "1760"]),
            ),
            (
                "beep-nak".to_string(),
                beep(&["-f", "1760", "-n", "-f", "880"]),
            ),
            ("beep-key".to_string(), beep(&["-f", "960", "-l", "80"])),
            ("ls".to_string(), CommandSpec::new("/bin/ls", &["-lh"])),
        ]);
        let sequences = [
            ("ks001", "001"),
            ("ks002", "002"),
            ("ks003", "003"),
            ("ks004", "004"),
            ("ks005", "004"),
            ("ks006", "006"),
        ]
        .into_iter()
        .map(|(id, digits)| (id.to_string(), digits.to_string()))
        .collect();

        Self {
            device: PathBuf::from(DEFAULT_DEVICE),
            retry_interval_secs: 5,
            max_read_error_streak: DEFAULT_MAX_ERROR_STREAK,
            commands,
            sequences,
            pairings: vec![
                PairingSettings::new("ks001", "beep-ack"),
                PairingSettings::new("ks002", "beep-nak"),
                PairingSettings::new("ks003", "beep-key"),
                PairingSettings::new("ks004", "ls"),
            ],
            feedback: FeedbackSettings::default(),
        }
    }
}

impl Settings {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs.max(1))
    }

    /// Validate the tables and resolve identifiers into `Bindings`
    pub fn resolve(&self) -> Result<Bindings, ConfigError> {
        for (id, spec) in &self.commands {
            check_executable(&spec.path).map_err(|reason| ConfigError::InvalidCommand {
                id: id.clone(),
                reason,
            })?;
            if !is_executable(&spec.path) {
                log::warn!(
                    "Settings: command {:?} points at {:?}, which is not executable (yet?)",
                    id,
                    spec.path
                );
            }
        }

        let mut sequences = BTreeMap::new();
        for (id, digits) in &self.sequences {
            let sequence =
                digits
                    .parse::<KeySequence>()
                    .map_err(|source| ConfigError::InvalidSequence {
                        id: id.clone(),
                        source,
                    })?;
            sequences.insert(id.as_str(), sequence);
        }

        let mut pairings = Vec::with_capacity(self.pairings.len());
        for (index, pairing) in self.pairings.iter().enumerate() {
            let sequence = sequences.get(pairing.sequence.as_str()).ok_or_else(|| {
                ConfigError::UnknownSequence {
                    index,
                    id: pairing.sequence.clone(),
                }
            })?;
            if !self.commands.contains_key(&pairing.command) {
                return Err(ConfigError::UnknownCommand {
                    index,
                    id: pairing.command.clone(),
                });
            }
            pairings.push(Pairing {
                sequence_id: pairing.sequence.clone(),
                sequence: sequence.clone(),
                command: pairing.command.clone(),
            });
        }
        if pairings.is_empty() {
            log::warn!("Settings: no pairings configured, every sequence will be rejected");
        }

        let feedback = if self.feedback.enabled {
            for trigger in [Feedback::Acknowledge, Feedback::Reject, Feedback::Keystroke] {
                let id = self.feedback.command_for(trigger);
                if !self.commands.contains_key(id) {
                    return Err(ConfigError::UnknownFeedbackCommand {
                        trigger: trigger.as_str(),
                        id: id.to_string(),
                    });
                }
            }
            Some(self.feedback.clone())
        } else {
            None
        };

        Ok(Bindings {
            commands: self.commands.clone(),
            pairings,
            feedback,
        })
    }
}

/// A resolved (sequence, command) pairing
#[derive(Debug, Clone)]
pub struct Pairing {
    pub sequence_id: String,
    pub sequence: KeySequence,
    pub command: String,
}

/// Immutable, validated tables the daemon runs with
#[derive(Debug, Clone)]
pub struct Bindings {
    commands: BTreeMap<String, CommandSpec>,
    pairings: Vec<Pairing>,
    feedback: Option<FeedbackSettings>,
}

impl Bindings {
    pub fn command(&self, id: &str) -> Option<&CommandSpec> {
        self.commands.get(id)
    }

    pub fn pairings(&self) -> &[Pairing] {
        &self.pairings
    }

    pub fn feedback_enabled(&self) -> bool {
        self.feedback.is_some()
    }

    /// Command id bound to a feedback trigger, if feedback is enabled
    pub fn feedback_command(&self, feedback: Feedback) -> Option<&str> {
        self.feedback.as_ref().map(|f| f.command_for(feedback))
    }

    pub fn is_feedback_command(&self, id: &str) -> bool {
        [Feedback::Acknowledge, Feedback::Reject, Feedback::Keystroke]
            .into_iter()
            .any(|fb| self.feedback_command(fb) == Some(id))
    }

    /// Build a fresh controller over the pairing table
    pub fn controller(&self) -> MatchController {
        let sequences = self.pairings.iter().map(|p| p.sequence.clone()).collect();
        let targets = self
            .pairings
            .iter()
            .map(|p| PairingTarget {
                command: p.command.clone(),
                is_feedback: self.is_feedback_command(&p.command),
            })
            .collect();
        MatchController::new(SequenceMatcher::new(sequences), targets)
    }
}

/// Returns: ~/.config/padmacro/config.json
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
        .join(SETTINGS_FILE_NAME)
}

/// Load settings from `path`, or from the default location when `None`.
///
/// A missing file at the default location means "use the built-in table";
/// a missing file that was asked for explicitly is an error.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let (path, explicit) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (default_settings_path(), false),
    };

    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if explicit {
                return Err(ConfigError::NotFound { path });
            }
            log::info!("Settings: {:?} not found, using built-in defaults", path);
            return Ok(Settings::default());
        }
        Err(source) => return Err(ConfigError::Read { path, source }),
    };

    let settings = serde_json::from_str::<Settings>(&contents)
        .map_err(|source| ConfigError::Parse { path: path.clone(), source })?;
    log::info!("Settings: loaded {:?}", path);
    Ok(settings)
}
