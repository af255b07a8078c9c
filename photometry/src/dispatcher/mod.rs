//! Per-detector fan-out within one frame.
//!
//! Every job owns a copy of its detector's apertures and store entry and
//! borrows the immutable frame data. Nothing is written back until all jobs
//! of the frame have returned; the merge then walks the frame's canonical
//! detector order. A job that fails or panics is reported as a failed
//! detector and leaves the authoritative state for that detector untouched.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use common::parallel;
use rayon::ThreadPool;

use crate::aperture::{ApertureMap, ApertureSet};
use crate::config::ReduceConfig;
use crate::extraction::{ExtractionResult, Extractor};
use crate::flags::QualityFlags;
use crate::frame::{Detector, Frame};
use crate::store::{DetectorStore, Store};
use crate::tracker::Tracker;

/// Inputs of one detector for one frame.
pub struct DetectorJob<'a> {
    pub detector: &'a Detector,
    pub apertures: ApertureSet,
    pub store: DetectorStore,
}

/// What a worker hands back for a successfully processed detector.
#[derive(Debug)]
pub struct ProcessedDetector {
    pub apertures: ApertureSet,
    pub store: DetectorStore,
    pub results: Vec<ExtractionResult>,
    pub alerts: Vec<String>,
}

/// Results of one detector, as published for the frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorResults {
    pub detector: String,
    pub results: Vec<ExtractionResult>,
    pub failed: bool,
}

#[derive(Debug, Default)]
pub struct MergedFrame {
    pub detectors: Vec<DetectorResults>,
    pub alerts: Vec<String>,
}

/// Tracks then extracts every aperture of one detector.
pub fn process_detector(job: DetectorJob<'_>, config: &ReduceConfig) -> anyhow::Result<ProcessedDetector> {
    let DetectorJob {
        detector,
        mut apertures,
        mut store,
    } = job;
    if let Some((name, _)) = detector.windows.iter().find(|(_, w)| w.has_non_finite()) {
        anyhow::bail!("window {name} holds non-finite pixel values");
    }

    let noise = config.noise.for_detector(&detector.name);
    let outcomes = Tracker::new(detector, &config.tracking, noise).track(&mut apertures, &mut store);
    let results = Extractor::new(detector, &config.extraction, noise, &store, &config.tracking)
        .extract(&apertures, &outcomes);
    let alerts: Vec<String> = outcomes.into_iter().filter_map(|o| o.alert).collect();

    tracing::debug!(
        "Detector {}: {} apertures, {} alerts",
        detector.name,
        results.len(),
        alerts.len()
    );
    Ok(ProcessedDetector {
        apertures,
        store,
        results,
        alerts,
    })
}

pub struct Dispatcher {
    pool: Option<ThreadPool>,
    workers: usize,
}

impl Dispatcher {
    /// 0 or 1 workers run every detector on the caller's thread.
    pub fn new(workers: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = parallel::build_pool(workers, "detector")?;
        Ok(Self {
            pool,
            workers: workers.max(1),
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn dispatch(
        &self,
        frame: &Frame,
        apertures: &mut ApertureMap,
        store: &mut Store,
        config: &ReduceConfig,
    ) -> MergedFrame {
        self.dispatch_with(frame, apertures, store, |job| process_detector(job, config))
    }

    /// Runs `process` once per frame detector that has apertures and merges
    /// the outcomes into `apertures` and `store`.
    pub fn dispatch_with<F>(
        &self,
        frame: &Frame,
        apertures: &mut ApertureMap,
        store: &mut Store,
        process: F,
    ) -> MergedFrame
    where
        F: Fn(DetectorJob<'_>) -> anyhow::Result<ProcessedDetector> + Sync + Send,
    {
        let jobs: Vec<DetectorJob<'_>> = frame
            .detectors
            .iter()
            .filter_map(|detector| {
                let set = apertures.get(&detector.name)?;
                Some(DetectorJob {
                    detector,
                    apertures: set.clone(),
                    store: store.snapshot(&detector.name),
                })
            })
            .collect();

        let outcomes = parallel::ordered_map(self.pool.as_ref(), jobs, |job| {
            let name = job.detector.name.clone();
            let outcome = match panic::catch_unwind(AssertUnwindSafe(|| process(job))) {
                Ok(Ok(done)) => Ok(done),
                Ok(Err(err)) => Err(format!("{err:#}")),
                Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref()))),
            };
            (name, outcome)
        });

        let mut merged = MergedFrame::default();
        for (name, outcome) in outcomes {
            match outcome {
                Ok(done) => {
                    apertures.insert(name.clone(), done.apertures);
                    store.replace(&name, done.store);
                    merged.alerts.extend(done.alerts);
                    merged.detectors.push(DetectorResults {
                        detector: name,
                        results: done.results,
                        failed: false,
                    });
                }
                Err(reason) => {
                    tracing::error!("Detector {name}: processing failed: {reason}");
                    let results = apertures
                        .get(&name)
                        .map(|set| failed_results(set))
                        .unwrap_or_default();
                    merged
                        .alerts
                        .push(format!("detector {name}: processing failed: {reason}"));
                    merged.detectors.push(DetectorResults {
                        detector: name,
                        results,
                        failed: true,
                    });
                }
            }
        }
        merged
    }
}

fn failed_results(set: &ApertureSet) -> Vec<ExtractionResult> {
    set.iter()
        .map(|(&id, ap)| ExtractionResult::invalid(id, ap, QualityFlags::DETECTOR_FAILED))
        .collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests;
