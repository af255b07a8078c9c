//! Frame loop: skip checks, per-detector dispatch, publication.

mod source;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use strum_macros::Display;

use crate::aperture::{validate_set, ApertureMap};
use crate::config::ReduceConfig;
use crate::dispatcher::Dispatcher;
use crate::error::ReduceError;
use crate::frame::Frame;
use crate::lightcurve::LightCurveBuffer;
use crate::store::Store;

pub use source::{FrameEvent, FrameResults, FrameSource, LogWriter, MemoryLog, VecFrameSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SkipReason {
    NotGoodTime,
    Blank,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Processed(FrameResults),
    Skipped { number: u64, reason: SkipReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
#[strum(serialize_all = "snake_case")]
pub enum StopReason {
    #[default]
    EndOfStream,
    /// The source stayed pending for longer than the configured wait.
    GaveUp,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    pub processed: usize,
    pub skipped: usize,
    pub alerts: usize,
    pub stop: StopReason,
}

/// Owns all state of one reduction run.
pub struct Reducer {
    config: ReduceConfig,
    apertures: ApertureMap,
    store: Store,
    lightcurves: LightCurveBuffer,
    dispatcher: Dispatcher,
    last_frame: Option<u64>,
    tzero: Option<f64>,
}

impl Reducer {
    pub fn new(config: ReduceConfig, apertures: ApertureMap) -> Result<Self, ReduceError> {
        config.validate()?;
        for (detector, set) in &apertures {
            validate_set(detector, set)?;
        }
        let count: usize = apertures.values().map(|set| set.len()).sum();
        if count == 0 {
            return Err(ReduceError::Setup("no apertures defined".to_string()));
        }

        let dispatcher = Dispatcher::new(config.dispatch.workers)?;
        tracing::info!(
            "Reducer ready: {} apertures on {} detectors, {} workers, {} extraction",
            count,
            apertures.len(),
            dispatcher.workers(),
            config.extraction.method
        );
        Ok(Self {
            lightcurves: LightCurveBuffer::new(&config.lightcurve),
            config,
            apertures,
            store: Store::new(),
            dispatcher,
            last_frame: None,
            tzero: None,
        })
    }

    pub fn config(&self) -> &ReduceConfig {
        &self.config
    }

    pub fn apertures(&self) -> &ApertureMap {
        &self.apertures
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn lightcurves(&self) -> &LightCurveBuffer {
        &self.lightcurves
    }

    /// Timestamp of the first processed frame.
    pub fn tzero(&self) -> Option<f64> {
        self.tzero
    }

    /// Processes one frame end to end. Results are only published once every
    /// detector has completed or failed.
    ///
    /// # Panics
    /// If frame numbers do not strictly increase.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<FrameOutcome, ReduceError> {
        if let Some(last) = self.last_frame {
            assert!(
                frame.number > last,
                "frame {} arrived after frame {last}",
                frame.number
            );
        }
        self.last_frame = Some(frame.number);

        let skip = if !frame.good_time {
            Some(SkipReason::NotGoodTime)
        } else if frame.blank {
            Some(SkipReason::Blank)
        } else {
            None
        };
        if let Some(reason) = skip {
            tracing::info!("Frame {}: skipped ({reason})", frame.number);
            return Ok(FrameOutcome::Skipped {
                number: frame.number,
                reason,
            });
        }

        if self.tzero.is_none() {
            self.initial_checks(frame)?;
            self.tzero = Some(frame.timestamp);
            tracing::info!("Frame {}: first frame, tzero = {:.6}", frame.number, frame.timestamp);
        }

        let merged = self
            .dispatcher
            .dispatch(frame, &mut self.apertures, &mut self.store, &self.config);
        let results = FrameResults {
            number: frame.number,
            timestamp: frame.timestamp,
            detectors: merged.detectors,
            alerts: merged.alerts,
        };
        self.lightcurves.add_frame(frame.timestamp, &results.detectors);

        for alert in &results.alerts {
            tracing::warn!("Frame {}: {alert}", frame.number);
        }
        tracing::info!(
            "Frame {}: {:.6}, {} results, {}",
            frame.number,
            frame.timestamp,
            results.result_count(),
            if results.all_valid() { "OK" } else { "NOK" }
        );
        Ok(FrameOutcome::Processed(results))
    }

    /// Every detector with apertures must be in the frame, and every fitted
    /// aperture must lie in one of its windows.
    fn initial_checks(&self, frame: &Frame) -> Result<(), ReduceError> {
        for (name, set) in &self.apertures {
            if set.is_empty() {
                continue;
            }
            let detector = frame.detector(name).ok_or_else(|| {
                ReduceError::Setup(format!(
                    "detector {name} has apertures but is missing from frame {}",
                    frame.number
                ))
            })?;
            for (id, ap) in set.iter().filter(|(_, ap)| !ap.is_linked()) {
                if detector.enclosing(ap.pos.x, ap.pos.y).is_none() {
                    return Err(ReduceError::Setup(format!(
                        "aperture {id} of detector {name} at ({:.1}, {:.1}) lies in no window",
                        ap.pos.x, ap.pos.y
                    )));
                }
            }
        }
        Ok(())
    }

    /// Reduces frames until the source ends, stays pending for too long, or
    /// `cancel` is set. Cancellation is checked between frames.
    pub fn run<S, L>(
        &mut self,
        source: &mut S,
        log: &mut L,
        cancel: &AtomicBool,
    ) -> Result<RunSummary, ReduceError>
    where
        S: FrameSource + ?Sized,
        L: LogWriter + ?Sized,
    {
        let poll = self.config.wait.poll_interval();
        let max_wait = self.config.wait.max_wait();
        let mut waited = Duration::ZERO;
        let mut summary = RunSummary::default();

        summary.stop = loop {
            if cancel.load(Ordering::Relaxed) {
                break StopReason::Cancelled;
            }
            let frame = match source.next_frame().map_err(ReduceError::Source)? {
                FrameEvent::End => break StopReason::EndOfStream,
                FrameEvent::Pending => {
                    if waited >= max_wait {
                        tracing::warn!("No new frame for {:.1}s, giving up", waited.as_secs_f64());
                        break StopReason::GaveUp;
                    }
                    std::thread::sleep(poll);
                    waited += poll;
                    continue;
                }
                FrameEvent::Frame(frame) => frame,
            };
            waited = Duration::ZERO;

            match self.process_frame(&frame)? {
                FrameOutcome::Processed(results) => {
                    summary.processed += 1;
                    summary.alerts += results.alerts.len();
                    log.write(&results).map_err(ReduceError::Log)?;
                }
                FrameOutcome::Skipped { .. } => summary.skipped += 1,
            }
        };

        tracing::info!(
            "Run finished ({}): {} frames processed, {} skipped, {} alerts",
            summary.stop,
            summary.processed,
            summary.skipped,
            summary.alerts
        );
        Ok(summary)
    }
}
