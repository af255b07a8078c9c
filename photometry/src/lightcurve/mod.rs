//! Light curves kept in memory for live display.
//!
//! Each series keeps a time window: appending a point evicts from the oldest
//! end until the span between the oldest and newest point fits the window.
//! Nothing here affects what has already been handed to the log writer.
//! Transmission series normalise by the highest flux seen since the run
//! started, so eviction does not change their scale.

use std::collections::vec_deque;
use std::collections::VecDeque;

use crate::aperture::ApertureId;
use crate::config::{LightCurveConfig, Quantity, SeriesDef};
use crate::dispatcher::DetectorResults;
use crate::extraction::ExtractionResult;
use crate::flags::QualityFlags;

const MINUTES_PER_DAY: f64 = 1440.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesPoint {
    /// MJD of the frame, in days.
    pub time: f64,
    pub value: f64,
    pub error: f64,
    pub flags: QualityFlags,
}

impl SeriesPoint {
    fn invalid(time: f64, flags: QualityFlags) -> Self {
        Self {
            time,
            value: 0.0,
            error: f64::INFINITY,
            flags: flags | QualityFlags::INVALID,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TimeSeries {
    def: SeriesDef,
    points: VecDeque<SeriesPoint>,
    /// Retained span in days; `None` keeps everything.
    keep: Option<f64>,
    /// Highest valid flux so far, for transmission series.
    peak: Option<f64>,
}

impl TimeSeries {
    pub fn new(def: SeriesDef, keep: Option<f64>) -> Self {
        Self {
            def,
            points: VecDeque::new(),
            keep,
            peak: None,
        }
    }

    pub fn def(&self) -> &SeriesDef {
        &self.def
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// Appends a point, then evicts old points that fall out of the window.
    pub fn push(&mut self, point: SeriesPoint) {
        self.points.push_back(point);
        let Some(keep) = self.keep else {
            return;
        };
        while let Some(oldest) = self.points.front() {
            if point.time - oldest.time <= keep {
                break;
            }
            self.points.pop_front();
        }
    }

    /// Oldest first. Can be called any number of times.
    pub fn points(&self) -> vec_deque::Iter<'_, SeriesPoint> {
        self.points.iter()
    }

    pub fn latest(&self) -> Option<&SeriesPoint> {
        self.points.back()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Time between the oldest and newest retained point.
    pub fn span(&self) -> f64 {
        match (self.points.front(), self.points.back()) {
            (Some(first), Some(last)) => last.time - first.time,
            _ => 0.0,
        }
    }

    /// Running maximum behind a transmission series.
    pub fn peak(&self) -> Option<f64> {
        self.peak
    }

    fn point(&mut self, time: f64, frame: &[DetectorResults]) -> Option<SeriesPoint> {
        let target = find_result(frame, &self.def.detector, self.def.target)?;
        let point = match self.def.comparison {
            Some(comparison) => {
                let comparison = find_result(frame, &self.def.detector, comparison)?;
                ratio_point(time, target, comparison)
            }
            None => single_point(time, target, self.def.quantity, &mut self.peak),
        };
        Some(point)
    }
}

fn find_result<'a>(frame: &'a [DetectorResults], detector: &str, id: u32) -> Option<&'a ExtractionResult> {
    frame
        .iter()
        .find(|d| d.detector == detector)?
        .results
        .iter()
        .find(|r| r.id == ApertureId(id))
}

fn single_point(
    time: f64,
    result: &ExtractionResult,
    quantity: Quantity,
    peak: &mut Option<f64>,
) -> SeriesPoint {
    if !result.is_valid() {
        return SeriesPoint::invalid(time, result.flags);
    }
    let (value, error) = match quantity {
        Quantity::Flux => (result.flux, result.flux_err),
        Quantity::X => (result.pos.x, 0.0),
        Quantity::Y => (result.pos.y, 0.0),
        Quantity::Fwhm => (result.fwhm, 0.0),
        Quantity::Transmission => {
            if result.flux <= 0.0 {
                return SeriesPoint::invalid(time, result.flags);
            }
            let max = peak.map_or(result.flux, |p| p.max(result.flux));
            *peak = Some(max);
            (result.flux / max, result.flux_err / max)
        }
    };
    SeriesPoint {
        time,
        value,
        error,
        flags: result.flags,
    }
}

fn ratio_point(time: f64, target: &ExtractionResult, comparison: &ExtractionResult) -> SeriesPoint {
    let flags = target.flags | comparison.flags;
    if !target.is_valid() || !comparison.is_valid() || comparison.flux == 0.0 {
        return SeriesPoint::invalid(time, flags);
    }
    let ratio = target.flux / comparison.flux;
    // |r| sqrt((σt/ft)² + (σc/fc)²), written to stay finite when ft = 0.
    let error = (target.flux_err.powi(2) + (ratio * comparison.flux_err).powi(2)).sqrt()
        / comparison.flux.abs();
    SeriesPoint {
        time,
        value: ratio,
        error,
        flags,
    }
}

/// All light-curve series of a run.
///
/// Without configured series, one flux series per aperture is created the
/// first time the aperture shows up, named `<detector>/<id>`.
#[derive(Debug, Clone)]
pub struct LightCurveBuffer {
    keep: Option<f64>,
    automatic: bool,
    series: Vec<TimeSeries>,
}

impl LightCurveBuffer {
    pub fn new(config: &LightCurveConfig) -> Self {
        let keep = (config.keep_minutes > 0.0).then(|| config.keep_minutes / MINUTES_PER_DAY);
        Self {
            keep,
            automatic: config.series.is_empty(),
            series: config
                .series
                .iter()
                .map(|def| TimeSeries::new(def.clone(), keep))
                .collect(),
        }
    }

    /// Retained span in days, `None` when unlimited.
    pub fn keep_days(&self) -> Option<f64> {
        self.keep
    }

    /// Adds one frame's results. Series whose apertures are absent from the
    /// frame get no point.
    pub fn add_frame(&mut self, time: f64, frame: &[DetectorResults]) {
        if self.automatic {
            self.add_missing_series(frame);
        }
        for series in self.series.iter_mut() {
            if let Some(point) = series.point(time, frame) {
                series.push(point);
            }
        }
    }

    fn add_missing_series(&mut self, frame: &[DetectorResults]) {
        for detector in frame {
            for result in &detector.results {
                let name = format!("{}/{}", detector.detector, result.id);
                if self.by_name(&name).is_some() {
                    continue;
                }
                let def = SeriesDef {
                    name,
                    detector: detector.detector.clone(),
                    target: result.id.0,
                    comparison: None,
                    quantity: Quantity::Flux,
                };
                self.series.push(TimeSeries::new(def, self.keep));
            }
        }
    }

    pub fn series(&self) -> &[TimeSeries] {
        &self.series
    }

    pub fn by_name(&self, name: &str) -> Option<&TimeSeries> {
        self.series.iter().find(|s| s.name() == name)
    }
}
