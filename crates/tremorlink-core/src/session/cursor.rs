//! Replay cursor
//!
//! Walks the sample indices of a replay window, wrapping when looping, and
//! maps each sample onto a session timeline that keeps increasing across
//! loop passes and restarts.

use std::sync::Arc;

use crate::signal::{ReplayWindow, SignalBundle, SignalError, WindowIndices};

/// One sample drawn from the cursor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CursorSample {
    /// Index into the source bundle
    pub index: usize,
    /// Timestamp in the source bundle
    pub source_time: f64,
    /// Timestamp on the session timeline
    pub time: f64,
}

#[derive(Debug, Clone)]
pub struct ReplayCursor {
    bundle: Arc<SignalBundle>,
    window: ReplayWindow,
    indices: WindowIndices,
    looping: bool,
    index: usize,
    /// Session time at which the current pass began
    offset: f64,
    /// At least one sample of the current pass has been drawn
    pass_in_progress: bool,
    exhausted: bool,
    passes: u64,
}

impl ReplayCursor {
    /// Position a cursor at the start of `window`
    pub fn new(
        bundle: Arc<SignalBundle>,
        window: ReplayWindow,
        looping: bool,
    ) -> Result<Self, SignalError> {
        let indices = window.indices(&bundle)?;
        Ok(Self {
            bundle,
            window,
            indices,
            looping,
            index: indices.start,
            offset: 0.0,
            pass_in_progress: false,
            exhausted: false,
            passes: 0,
        })
    }

    /// Continue the session timeline from `offset` seconds
    pub fn with_offset(mut self, offset: f64) -> Self {
        self.offset = offset;
        self
    }

    /// Draw the next sample, or `None` once a non-looping window is done
    pub fn next_sample(&mut self) -> Option<CursorSample> {
        if self.exhausted {
            return None;
        }

        let index = self.index;
        let source_time = *self.bundle.time.get(index)?;
        let time = self.offset + (source_time - self.window.start_time);

        self.index += 1;
        self.pass_in_progress = true;

        if self.index >= self.indices.end {
            self.offset += self.window.duration();
            self.pass_in_progress = false;
            self.passes += 1;
            if self.looping {
                self.index = self.indices.start;
            } else {
                self.exhausted = true;
            }
        }

        Some(CursorSample {
            index,
            source_time,
            time,
        })
    }

    /// End the current pass early. A partially streamed pass still advances
    /// the timeline by a full window so a restart never repeats timestamps.
    pub fn finish_pass(&mut self) {
        if self.pass_in_progress {
            self.offset += self.window.duration();
            self.pass_in_progress = false;
            self.passes += 1;
        }
        self.index = self.indices.start;
    }

    /// Back to the start of the window with a zero offset
    pub fn reset(&mut self) {
        self.index = self.indices.start;
        self.offset = 0.0;
        self.pass_in_progress = false;
        self.exhausted = false;
        self.passes = 0;
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    /// Session time the next pass starts at
    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Completed passes over the window
    pub fn passes(&self) -> u64 {
        self.passes
    }

    pub fn window(&self) -> ReplayWindow {
        self.window
    }

    pub fn indices(&self) -> WindowIndices {
        self.indices
    }

    /// Samples left in the current pass
    pub fn remaining_in_pass(&self) -> usize {
        if self.exhausted {
            0
        } else {
            self.indices.end - self.index
        }
    }
}
