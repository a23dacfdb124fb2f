//! Operator control surface: discrete signals consumed between frames.

use std::collections::BTreeMap;

use crossbeam_channel::{Receiver, TryRecvError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorSignal {
    /// End the processing loop.
    Quit,
    /// Discard the set and re-detect on the most recent frame.
    Reinitialize,
    /// Drop the set and return to the empty state.
    Reset,
}

impl OperatorSignal {
    /// Maps a key or line of operator input to a signal (`q`, `n`, `r`).
    pub fn from_key(input: &str) -> Option<Self> {
        match input.trim() {
            "q" | "quit" => Some(Self::Quit),
            "n" | "reinit" | "reinitialize" => Some(Self::Reinitialize),
            "r" | "reset" => Some(Self::Reset),
            _ => None,
        }
    }
}

/// Whether the run loop should keep going after a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Stop,
}

/// Anything that can hand over pending operator signals.
///
/// `drain` is called once after every completed frame and must not block.
pub trait SignalSource {
    fn drain(&mut self, completed_frame: u64) -> Vec<OperatorSignal>;
}

impl SignalSource for Receiver<OperatorSignal> {
    fn drain(&mut self, _completed_frame: u64) -> Vec<OperatorSignal> {
        let mut signals = Vec::new();
        loop {
            match self.try_recv() {
                Ok(signal) => signals.push(signal),
                // A hung-up sender just means no more input.
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        signals
    }
}

impl SignalSource for Vec<Box<dyn SignalSource>> {
    fn drain(&mut self, completed_frame: u64) -> Vec<OperatorSignal> {
        self.iter_mut()
            .flat_map(|source| source.drain(completed_frame))
            .collect()
    }
}

/// No operator attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSignals;

impl SignalSource for NoSignals {
    fn drain(&mut self, _completed_frame: u64) -> Vec<OperatorSignal> {
        Vec::new()
    }
}

/// Signals keyed by the frame index after which they fire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptedSignals {
    script: BTreeMap<u64, Vec<OperatorSignal>>,
}

impl ScriptedSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, after_frame: u64, signal: OperatorSignal) -> Self {
        self.push(after_frame, signal);
        self
    }

    pub fn push(&mut self, after_frame: u64, signal: OperatorSignal) {
        self.script.entry(after_frame).or_default().push(signal);
    }

    pub fn is_empty(&self) -> bool {
        self.script.is_empty()
    }
}

impl FromIterator<(u64, OperatorSignal)> for ScriptedSignals {
    fn from_iter<I: IntoIterator<Item = (u64, OperatorSignal)>>(iter: I) -> Self {
        let mut scripted = Self::new();
        for (frame, signal) in iter {
            scripted.push(frame, signal);
        }
        scripted
    }
}

impl SignalSource for ScriptedSignals {
    fn drain(&mut self, completed_frame: u64) -> Vec<OperatorSignal> {
        // Entries for frames already passed fire late rather than never.
        let later = self.script.split_off(&(completed_frame + 1));
        let due = std::mem::replace(&mut self.script, later);
        due.into_values().flatten().collect()
    }
}
