//! Held-key tracking for the keyboard report

use std::collections::VecDeque;

use smallvec::SmallVec;

use crate::report::{KeyboardReport, Modifiers, MAX_KEYS};

/// Modifier bitmask plus the set of held keys
///
/// At most [`MAX_KEYS`] keys are reported. Keys pressed beyond that are held
/// in a FIFO and promoted, oldest first, as reported keys are released.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyState {
    modifiers: Modifiers,
    /// Reported keys, kept ascending
    active: SmallVec<[u8; MAX_KEYS]>,
    /// Held but unreported keys, in press order
    pending: VecDeque<u8>,
}

impl KeyState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a key press. Returns whether the state changed.
    pub fn press(&mut self, usage: u8) -> bool {
        if let Some(bit) = Modifiers::from_usage(usage as u16) {
            let before = self.modifiers;
            self.modifiers.insert(bit);
            return before != self.modifiers;
        }

        if self.is_held(usage) {
            return false;
        }

        if self.active.len() < MAX_KEYS {
            self.insert_active(usage);
        } else {
            self.pending.push_back(usage);
        }
        true
    }

    /// Record a key release. Returns whether the state changed.
    pub fn release(&mut self, usage: u8) -> bool {
        if let Some(bit) = Modifiers::from_usage(usage as u16) {
            let before = self.modifiers;
            self.modifiers.remove(bit);
            return before != self.modifiers;
        }

        if let Some(pos) = self.active.iter().position(|key| *key == usage) {
            self.active.remove(pos);
            if let Some(promoted) = self.pending.pop_front() {
                self.insert_active(promoted);
            }
            return true;
        }

        if let Some(pos) = self.pending.iter().position(|key| *key == usage) {
            self.pending.remove(pos);
            return true;
        }

        false
    }

    pub fn is_held(&self, usage: u8) -> bool {
        self.active.contains(&usage) || self.pending.contains(&usage)
    }

    pub fn modifiers(&self) -> Modifiers {
        self.modifiers
    }

    /// Reported keys, ascending
    pub fn keys(&self) -> &[u8] {
        &self.active
    }

    pub fn pending(&self) -> impl Iterator<Item = u8> + '_ {
        self.pending.iter().copied()
    }

    pub fn is_idle(&self) -> bool {
        self.modifiers.is_empty() && self.active.is_empty() && self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Current keyboard report, keys ascending with trailing zero padding
    pub fn report(&self) -> KeyboardReport {
        let mut keys = [0u8; MAX_KEYS];
        keys[..self.active.len()].copy_from_slice(&self.active);
        KeyboardReport {
            modifiers: self.modifiers,
            keys,
        }
    }

    fn insert_active(&mut self, usage: u8) {
        let pos = self.active.partition_point(|key| *key < usage);
        self.active.insert(pos, usage);
    }
}
