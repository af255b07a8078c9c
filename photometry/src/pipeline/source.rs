//! Seams to the frame source and the log writer.

use std::collections::VecDeque;

use crate::dispatcher::DetectorResults;
use crate::frame::Frame;

#[derive(Debug)]
pub enum FrameEvent {
    Frame(Frame),
    /// No new frame yet; ask again later.
    Pending,
    End,
}

/// Yields calibrated frames in increasing frame-number order.
pub trait FrameSource {
    fn next_frame(&mut self) -> anyhow::Result<FrameEvent>;
}

/// Replays a fixed list of events, then reports the end of the stream.
#[derive(Debug, Default)]
pub struct VecFrameSource {
    events: VecDeque<FrameEvent>,
}

impl VecFrameSource {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self::from_events(frames.into_iter().map(FrameEvent::Frame).collect())
    }

    pub fn from_events(events: Vec<FrameEvent>) -> Self {
        Self {
            events: events.into(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.events.len()
    }
}

impl FrameSource for VecFrameSource {
    fn next_frame(&mut self) -> anyhow::Result<FrameEvent> {
        Ok(self.events.pop_front().unwrap_or(FrameEvent::End))
    }
}

/// Everything published for one processed frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameResults {
    pub number: u64,
    pub timestamp: f64,
    /// Canonical detector order.
    pub detectors: Vec<DetectorResults>,
    pub alerts: Vec<String>,
}

impl FrameResults {
    pub fn result_count(&self) -> usize {
        self.detectors.iter().map(|d| d.results.len()).sum()
    }

    /// True when every result of the frame is valid.
    pub fn all_valid(&self) -> bool {
        self.detectors
            .iter()
            .flat_map(|d| &d.results)
            .all(|r| r.is_valid())
    }
}

/// Receives the results of every processed frame, in frame order.
pub trait LogWriter {
    fn write(&mut self, results: &FrameResults) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryLog {
    pub frames: Vec<FrameResults>,
}

impl LogWriter for MemoryLog {
    fn write(&mut self, results: &FrameResults) -> anyhow::Result<()> {
        self.frames.push(results.clone());
        Ok(())
    }
}
