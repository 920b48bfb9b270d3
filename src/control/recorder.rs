use std::sync::Arc;
use serde::{Deserialize, Serialize};

use crate::error::{RecorderError, ReplayError};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RecordedAction {
    Move { m1: i32, m2: i32, m3: i32, m4: i32 },
    Wait { seconds: f64 },
}

/**
 * Longest single wait a track may contain, in seconds.
 */
pub const MAX_WAIT_SECONDS: f64 = 3600.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplayOutcome {
    Completed { moves: usize },
    Cancelled { moves: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecorderStatus {
    Idle,
    Recording,
    Replaying,
}

#[derive(Debug)]
enum RecorderMode {
    Idle,
    Recording { pending: Vec<RecordedAction> },
    Replaying,
}

/// Owns the single Track. Timing is not captured: only explicit waits model delay.
#[derive(Debug)]
pub struct Recorder {
    mode: RecorderMode,
    track: Arc<[RecordedAction]>,
}

impl Recorder {
    pub fn new() -> Self {
        Recorder {
            mode: RecorderMode::Idle,
            track: Arc::from(Vec::<RecordedAction>::new()),
        }
    }

    pub fn status(&self) -> RecorderStatus {
        match self.mode {
            RecorderMode::Idle => RecorderStatus::Idle,
            RecorderMode::Recording { .. } => RecorderStatus::Recording,
            RecorderMode::Replaying => RecorderStatus::Replaying,
        }
    }

    /// The frozen track, or what has been captured so far while recording.
    pub fn track(&self) -> Vec<RecordedAction> {
        match &self.mode {
            RecorderMode::Recording { pending } => pending.clone(),
            _ => self.track.to_vec(),
        }
    }

    /// Returns true when a new recording was started.
    pub fn start(&mut self) -> Result<bool, RecorderError> {
        match self.mode {
            RecorderMode::Recording { .. } => Ok(false),
            RecorderMode::Replaying => Err(RecorderError::ReplayInProgress),
            RecorderMode::Idle => {
                self.track = Arc::from(Vec::<RecordedAction>::new());
                self.mode = RecorderMode::Recording { pending: Vec::new() };
                Ok(true)
            },
        }
    }

    /// Returns the number of frozen actions, or `None` if nothing was being recorded.
    pub fn stop(&mut self) -> Option<usize> {
        match std::mem::replace(&mut self.mode, RecorderMode::Idle) {
            RecorderMode::Recording { pending } => {
                let len = pending.len();
                self.track = Arc::from(pending);
                Some(len)
            },
            other => {
                self.mode = other;
                None
            },
        }
    }

    fn push(&mut self, action: RecordedAction) -> Result<(), RecorderError> {
        match &mut self.mode {
            RecorderMode::Recording { pending } => {
                pending.push(action);
                Ok(())
            },
            RecorderMode::Replaying => Err(RecorderError::ReplayInProgress),
            RecorderMode::Idle => Err(RecorderError::NotRecording),
        }
    }

    pub fn record_move(&mut self, m: [i32; 4]) -> Result<(), RecorderError> {
        let [m1, m2, m3, m4] = m;
        self.push(RecordedAction::Move { m1, m2, m3, m4 })
    }

    pub fn record_wait(&mut self, seconds: f64) -> Result<(), RecorderError> {
        if !seconds.is_finite() || seconds <= 0.0 || seconds > MAX_WAIT_SECONDS {
            return Err(RecorderError::InvalidWait { seconds });
        }
        self.push(RecordedAction::Wait { seconds })
    }

    pub fn begin_replay(&mut self, times: u32) -> Result<ReplayCursor, ReplayError> {
        match self.mode {
            RecorderMode::Idle => {},
            RecorderMode::Recording { .. } | RecorderMode::Replaying => return Err(ReplayError::Busy),
        }

        if times == 0 || self.track.is_empty() {
            return Err(ReplayError::NothingToReplay);
        }

        self.mode = RecorderMode::Replaying;
        Ok(ReplayCursor {
            track: self.track.clone(),
            times,
            pass: 0,
            index: 0,
        })
    }

    pub fn finish_replay(&mut self) {
        if let RecorderMode::Replaying = self.mode {
            self.mode = RecorderMode::Idle;
        }
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Recorder::new()
    }
}

/// Walks the frozen track `times` times in order.
#[derive(Debug, Clone)]
pub struct ReplayCursor {
    track: Arc<[RecordedAction]>,
    times: u32,
    pass: u32,
    index: usize,
}

impl ReplayCursor {
    /// Zero based pass of the action returned last.
    pub fn pass(&self) -> u32 {
        self.pass
    }

    pub fn times(&self) -> u32 {
        self.times
    }
}

impl Iterator for ReplayCursor {
    type Item = RecordedAction;

    fn next(&mut self) -> Option<RecordedAction> {
        if self.index == self.track.len() {
            if self.pass + 1 >= self.times {
                return None;
            }
            self.pass += 1;
            self.index = 0;
        }

        let action = self.track.get(self.index).copied();
        self.index += 1;
        action
    }
}
