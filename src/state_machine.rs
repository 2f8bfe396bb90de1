//! Match controller for padmacro
//!
//! A small automaton that drives the sequence matcher. Each call to `step()`
//! applies one row of the transition table and returns the next flow
//! decision plus the effects to run; nothing here touches processes or
//! devices directly.
//!
//! ```text
//! Init ──► Collect ──Enter──► Execute ──► Reset ──► Collect
//!             │  ▲                                    ▲
//!             │  └── digit (advance, keystroke)        │
//!             └──Backspace (acknowledge) ──► Reset ────┘
//! ```

use evdev::Key;

use crate::keypad::{key_name, PadKey, SequenceMatcher};

/// Phase of the match cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum State {
    #[default]
    Init,
    Collect,
    Reset,
    Execute,
}

/// Whether the controller has more bookkeeping to do before the next key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Re-enter the table without waiting for input
    Chain,
    /// Input exhausted; go back to reading the device
    Halt,
}

/// Feedback triggers, routed to commands by the effect runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feedback {
    Acknowledge,
    Reject,
    Keystroke,
}

impl Feedback {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feedback::Acknowledge => "acknowledge",
            Feedback::Reject => "reject",
            Feedback::Keystroke => "keystroke",
        }
    }
}

/// Effects to be executed after a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Feedback(Feedback),
    /// Run the command of a completed pairing
    Launch { pairing: usize, command: String },
}

/// One pairing as the controller sees it: which command it launches and
/// whether that command is itself one of the feedback commands
#[derive(Debug, Clone)]
pub struct PairingTarget {
    pub command: String,
    pub is_feedback: bool,
}

pub struct MatchController {
    state: State,
    matcher: SequenceMatcher,
    targets: Vec<PairingTarget>,
}

impl MatchController {
    /// `targets[i]` belongs to the i-th sequence of `matcher`
    pub fn new(matcher: SequenceMatcher, targets: Vec<PairingTarget>) -> Self {
        debug_assert_eq!(matcher.cursors().len(), targets.len());
        Self {
            state: State::default(),
            matcher,
            targets,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn matcher(&self) -> &SequenceMatcher {
        &self.matcher
    }

    /// Feed one classified key and run the automaton until it halts
    pub fn feed(&mut self, key: Key) -> Vec<Effect> {
        let mut pending = Some(key);
        let mut effects = Vec::new();
        loop {
            let (flow, mut step_effects) = self.step(&mut pending);
            effects.append(&mut step_effects);
            if flow == Flow::Halt {
                break;
            }
        }
        effects
    }

    /// Apply one transition.
    ///
    /// `pending` is the single-slot key buffer. Every branch except `Init`
    /// leaves it empty, so a key is consumed exactly once per cycle.
    pub fn step(&mut self, pending: &mut Option<Key>) -> (Flow, Vec<Effect>) {
        let from = self.state;
        let (next, flow, effects) = match self.state {
            State::Init => {
                // Keep the key: it is the first one of the first sequence
                self.matcher.reset();
                (State::Collect, Flow::Chain, vec![])
            }
            State::Collect => match pending.take() {
                None => (State::Collect, Flow::Halt, vec![]),
                Some(key) => match PadKey::from_key(key) {
                    Some(PadKey::Confirm) => (State::Execute, Flow::Chain, vec![]),
                    Some(PadKey::Abort) => (
                        State::Reset,
                        Flow::Chain,
                        vec![Effect::Feedback(Feedback::Acknowledge)],
                    ),
                    _ => {
                        self.matcher.advance(key);
                        log::debug!(
                            "Collected {} ({} of {} sequences still matching)",
                            key_name(key),
                            self.matcher.alive(),
                            self.targets.len()
                        );
                        (
                            State::Collect,
                            Flow::Halt,
                            vec![Effect::Feedback(Feedback::Keystroke)],
                        )
                    }
                },
            },
            State::Execute => {
                *pending = None;
                (State::Reset, Flow::Chain, self.execute())
            }
            State::Reset => {
                *pending = None;
                self.matcher.reset();
                (State::Collect, Flow::Chain, vec![])
            }
        };

        if from != next {
            log::trace!("Match state: {:?} -> {:?}", from, next);
        }
        self.state = next;
        (flow, effects)
    }

    fn execute(&self) -> Vec<Effect> {
        let completed = self.matcher.drain_completed();
        let Some(&first) = completed.first() else {
            log::info!("No sequence matched");
            return vec![Effect::Feedback(Feedback::Reject)];
        };

        let mut effects = Vec::with_capacity(completed.len() + 1);
        // A pairing bound to a feedback sound is its own acknowledgement
        if !self.targets[first].is_feedback {
            effects.push(Effect::Feedback(Feedback::Acknowledge));
        }
        for pairing in completed {
            let command = self.targets[pairing].command.clone();
            log::info!("Sequence {} matched, command {}", pairing, command);
            effects.push(Effect::Launch { pairing, command });
        }
        effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypad::{Cursor, KeySequence};

    fn controller(table: &[(&str, &str, bool)]) -> MatchController {
        let sequences = table
            .iter()
            .map(|(s, _, _)| s.parse::<KeySequence>().unwrap())
            .collect();
        let targets = table
            .iter()
            .map(|(_, c, fb)| PairingTarget {
                command: c.to_string(),
                is_feedback: *fb,
            })
            .collect();
        MatchController::new(SequenceMatcher::new(sequences), targets)
    }

    fn digits(s: &str) -> Vec<Key> {
        s.parse::<KeySequence>().unwrap().keys().to_vec()
    }

    fn feed_all(ctl: &mut MatchController, keys: &[Key]) -> Vec<Effect> {
        keys.iter().flat_map(|k| ctl.feed(*k)).collect()
    }

    fn launches(effects: &[Effect]) -> Vec<&str> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Launch { command, .. } => Some(command.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn init_preserves_first_key() {
        let mut ctl = controller(&[("4", "ls", false)]);
        assert_eq!(ctl.state(), State::Init);

        let effects = ctl.feed(Key::KEY_KP4);
        assert_eq!(ctl.state(), State::Collect);
        assert_eq!(effects, vec![Effect::Feedback(Feedback::Keystroke)]);
        assert_eq!(ctl.matcher().cursors(), &[Cursor::At(1)]);
    }

    #[test]
    fn digits_then_enter_launches_command() {
        let mut ctl = controller(&[("004", "ls", false)]);
        let mut keys = digits("004");
        keys.push(Key::KEY_KPENTER);
        let effects = feed_all(&mut ctl, &keys);

        assert_eq!(launches(&effects), vec!["ls"]);
        assert_eq!(
            effects.iter().filter(|e| **e == Effect::Feedback(Feedback::Acknowledge)).count(),
            1
        );
        assert_eq!(ctl.state(), State::Collect);
        assert!(ctl.matcher().is_pristine());
    }

    #[test]
    fn enter_without_match_rejects() {
        let mut ctl = controller(&[("004", "ls", false)]);
        let mut keys = digits("005");
        keys.push(Key::KEY_KPENTER);
        let effects = feed_all(&mut ctl, &keys);

        assert!(launches(&effects).is_empty());
        assert_eq!(effects.last(), Some(&Effect::Feedback(Feedback::Reject)));
        assert!(ctl.matcher().is_pristine());
    }

    #[test]
    fn shared_sequence_dispatches_in_table_order() {
        let mut ctl = controller(&[("001", "a", false), ("004", "x", false), ("001", "b", false)]);
        let mut keys = digits("001");
        keys.push(Key::KEY_KPENTER);
        let effects = feed_all(&mut ctl, &keys);

        assert_eq!(launches(&effects), vec!["a", "b"]);
        // Acknowledge comes once, before the first launch
        let enter_effects = &effects[3..];
        assert_eq!(enter_effects[0], Effect::Feedback(Feedback::Acknowledge));
        assert_eq!(enter_effects.len(), 3);
    }

    #[test]
    fn feedback_pairing_is_not_double_acknowledged() {
        let mut ctl = controller(&[("001", "beep-ack", true)]);
        let mut keys = digits("001");
        keys.push(Key::KEY_KPENTER);
        let effects = feed_all(&mut ctl, &keys);

        assert_eq!(launches(&effects), vec!["beep-ack"]);
        assert!(!effects.contains(&Effect::Feedback(Feedback::Acknowledge)));
    }

    #[test]
    fn abort_restores_initial_state() {
        let mut ctl = controller(&[("001", "a", false), ("002", "b", false)]);
        feed_all(&mut ctl, &digits("00"));
        assert!(!ctl.matcher().is_pristine());

        let effects = ctl.feed(Key::KEY_BACKSPACE);
        assert_eq!(effects, vec![Effect::Feedback(Feedback::Acknowledge)]);
        assert_eq!(ctl.state(), State::Collect);
        assert!(ctl.matcher().is_pristine());

        // A full sequence after abort works as if freshly started
        let mut keys = digits("002");
        keys.push(Key::KEY_KPENTER);
        assert_eq!(launches(&feed_all(&mut ctl, &keys)), vec!["b"]);
    }

    #[test]
    fn abort_clears_failed_cursors() {
        let mut ctl = controller(&[("12", "a", false)]);
        feed_all(&mut ctl, &digits("9"));
        assert_eq!(ctl.matcher().cursors(), &[Cursor::Failed]);
        ctl.feed(Key::KEY_BACKSPACE);
        assert!(ctl.matcher().is_pristine());
    }

    #[test]
    fn each_key_is_consumed_once() {
        let mut ctl = controller(&[("11", "a", false)]);
        // One keystroke effect per digit, no matter how many steps chained
        let effects = feed_all(&mut ctl, &digits("1"));
        assert_eq!(effects, vec![Effect::Feedback(Feedback::Keystroke)]);
        assert_eq!(ctl.matcher().cursors(), &[Cursor::At(1)]);
    }

    #[test]
    fn step_flow_per_state() {
        let mut ctl = controller(&[("1", "a", false)]);
        let mut pending = Some(Key::KEY_KP1);

        assert_eq!(ctl.step(&mut pending).0, Flow::Chain); // Init
        assert_eq!(pending, Some(Key::KEY_KP1));
        assert_eq!(ctl.step(&mut pending).0, Flow::Halt); // Collect digit
        assert_eq!(pending, None);
        assert_eq!(ctl.step(&mut pending).0, Flow::Halt); // Collect, nothing pending

        pending = Some(Key::KEY_KPENTER);
        assert_eq!(ctl.step(&mut pending).0, Flow::Chain); // Collect -> Execute
        assert_eq!(ctl.state(), State::Execute);
        let (flow, effects) = ctl.step(&mut pending);
        assert_eq!(flow, Flow::Chain);
        assert_eq!(launches(&effects), vec!["a"]);
        assert_eq!(ctl.state(), State::Reset);
        assert_eq!(ctl.step(&mut pending).0, Flow::Chain);
        assert_eq!(ctl.state(), State::Collect);
    }
}
