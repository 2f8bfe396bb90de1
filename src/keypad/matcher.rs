//! Parallel multi-sequence matching over a live key stream

use evdev::Key;

use super::KeySequence;

/// Progress of one pairing through its sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    /// Index of the next expected key; equal to the sequence length once complete
    At(usize),
    /// The input diverged from the sequence since the last reset
    Failed,
}

/// Matches every configured sequence independently against the same keys.
///
/// Each pairing has its own cursor, so sequences sharing a prefix (or being
/// identical) are all in flight at once. The configured set is small, so a
/// linear scan per key is all that is needed.
pub struct SequenceMatcher {
    sequences: Vec<KeySequence>,
    cursors: Vec<Cursor>,
}

impl SequenceMatcher {
    /// Create a matcher with one cursor per sequence, in table order
    pub fn new(sequences: Vec<KeySequence>) -> Self {
        let cursors = vec![Cursor::At(0); sequences.len()];
        Self { sequences, cursors }
    }

    /// Put every cursor back at the first key of its sequence
    pub fn reset(&mut self) {
        self.cursors.fill(Cursor::At(0));
    }

    /// Apply one key to every cursor that has not failed yet
    pub fn advance(&mut self, key: Key) {
        for (cursor, sequence) in self.cursors.iter_mut().zip(&self.sequences) {
            if let Cursor::At(pos) = *cursor {
                // A key past the end of a complete sequence is a mismatch too
                *cursor = if sequence.expected(pos) == Some(key) {
                    Cursor::At(pos + 1)
                } else {
                    Cursor::Failed
                };
            }
        }
    }

    /// Indices of the pairings whose sequence is fully matched, in table order.
    ///
    /// Cursors are left untouched; the caller consumes completions by calling
    /// `reset()`.
    pub fn drain_completed(&self) -> Vec<usize> {
        self.cursors
            .iter()
            .zip(&self.sequences)
            .enumerate()
            .filter_map(|(i, (cursor, sequence))| match cursor {
                Cursor::At(pos) if *pos == sequence.len() => Some(i),
                _ => None,
            })
            .collect()
    }

    pub fn cursors(&self) -> &[Cursor] {
        &self.cursors
    }

    /// True when no key has been applied since the last reset
    pub fn is_pristine(&self) -> bool {
        self.cursors.iter().all(|c| *c == Cursor::At(0))
    }

    /// Number of pairings still able to complete
    pub fn alive(&self) -> usize {
        self.cursors
            .iter()
            .filter(|c| matches!(c, Cursor::At(_)))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(s: &str) -> KeySequence {
        s.parse().unwrap()
    }

    fn feed(matcher: &mut SequenceMatcher, digits: &str) {
        for key in seq(digits).keys() {
            matcher.advance(*key);
        }
    }

    #[test]
    fn test_exact_sequence_completes() {
        let mut matcher = SequenceMatcher::new(vec![seq("004")]);
        feed(&mut matcher, "004");
        assert_eq!(matcher.drain_completed(), vec![0]);
    }

    #[test]
    fn test_partial_sequence_does_not_complete() {
        let mut matcher = SequenceMatcher::new(vec![seq("004")]);
        feed(&mut matcher, "00");
        assert!(matcher.drain_completed().is_empty());
        assert_eq!(matcher.cursors(), &[Cursor::At(2)]);
    }

    #[test]
    fn test_extra_key_fails_completed_sequence() {
        let mut matcher = SequenceMatcher::new(vec![seq("004")]);
        feed(&mut matcher, "0044");
        assert!(matcher.drain_completed().is_empty());
        assert_eq!(matcher.cursors(), &[Cursor::Failed]);
    }

    #[test]
    fn test_failure_is_sticky_until_reset() {
        let mut matcher = SequenceMatcher::new(vec![seq("01")]);
        // Wrong first key, then the full sequence: stays failed
        feed(&mut matcher, "501");
        assert!(matcher.drain_completed().is_empty());

        matcher.reset();
        assert!(matcher.is_pristine());
        feed(&mut matcher, "01");
        assert_eq!(matcher.drain_completed(), vec![0]);
    }

    #[test]
    fn test_disjoint_sequences_do_not_interfere() {
        let mut matcher = SequenceMatcher::new(vec![seq("123"), seq("456")]);
        feed(&mut matcher, "123");
        assert_eq!(matcher.drain_completed(), vec![0]);
        // The other pairing failed on the very first key and went no further
        assert_eq!(matcher.cursors()[1], Cursor::Failed);
    }

    #[test]
    fn test_shared_prefix_both_in_flight() {
        let mut matcher = SequenceMatcher::new(vec![seq("001"), seq("002"), seq("00")]);
        feed(&mut matcher, "00");
        assert_eq!(
            matcher.cursors(),
            &[Cursor::At(2), Cursor::At(2), Cursor::At(2)]
        );
        assert_eq!(matcher.alive(), 3);
        assert_eq!(matcher.drain_completed(), vec![2]);

        matcher.advance(Key::KEY_KP2);
        assert_eq!(matcher.drain_completed(), vec![1]);
        assert_eq!(matcher.alive(), 1);
    }

    #[test]
    fn test_identical_sequences_complete_in_table_order() {
        let mut matcher = SequenceMatcher::new(vec![seq("001"), seq("004"), seq("001")]);
        feed(&mut matcher, "001");
        assert_eq!(matcher.drain_completed(), vec![0, 2]);
    }

    #[test]
    fn test_drain_does_not_mutate() {
        let mut matcher = SequenceMatcher::new(vec![seq("7")]);
        feed(&mut matcher, "7");
        assert_eq!(matcher.drain_completed(), vec![0]);
        assert_eq!(matcher.drain_completed(), vec![0]);
    }
}
