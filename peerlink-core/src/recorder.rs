//! Voice recording buffer: a start/stop toggle accumulating audio chunks in order.

use std::sync::{Mutex, MutexGuard};

use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct RecorderState {
    recording: bool,
    /// Bumped by every `start`; capture tasks tag their chunks with it.
    generation: u64,
    chunks: Vec<Vec<u8>>,
}

/// Shared between the capture task (pushes chunks) and the caller (start/stop/send).
#[derive(Debug, Default)]
pub struct VoiceRecorder {
    state: Mutex<RecorderState>,
}

impl VoiceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RecorderState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Begin a new recording, discarding the previous one. Returns the recording's generation.
    pub fn start(&self) -> Result<u64> {
        let mut state = self.lock();
        if state.recording {
            return Err(Error::AlreadyRecording);
        }
        state.recording = true;
        state.generation += 1;
        state.chunks.clear();
        Ok(state.generation)
    }

    /// Stop recording. Recorded chunks stay available for sending.
    pub fn stop(&self) -> Result<()> {
        let mut state = self.lock();
        if !state.recording {
            return Err(Error::NotRecording);
        }
        state.recording = false;
        Ok(())
    }

    /// Append a chunk captured for recording `generation`. Returns false, dropping the chunk,
    /// once that recording has stopped or a newer one has started.
    pub fn push(&self, generation: u64, chunk: Vec<u8>) -> bool {
        let mut state = self.lock();
        if !state.recording || state.generation != generation {
            return false;
        }
        state.chunks.push(chunk);
        true
    }

    /// Stop recording `generation` if it is still the one running. Returns true if it was.
    pub fn abort(&self, generation: u64) -> bool {
        let mut state = self.lock();
        if !state.recording || state.generation != generation {
            return false;
        }
        state.recording = false;
        true
    }

    pub fn is_recording(&self) -> bool {
        self.lock().recording
    }

    /// Copy of the recorded chunks, in capture order.
    pub fn chunks(&self) -> Vec<Vec<u8>> {
        self.lock().chunks.clone()
    }

    pub fn chunk_count(&self) -> usize {
        self.lock().chunks.len()
    }
}
