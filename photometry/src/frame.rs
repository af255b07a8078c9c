//! Frame model: detectors made of binned windows.
//!
//! Coordinates are unbinned detector pixels with pixel centres on integers,
//! so the centre of binned pixel `ix` of a window sits at
//! `llx + xbin * ix + (xbin - 1) / 2`.

use common::{Buffer2, Clash, Group};

/// A rectangular, possibly binned, readout region of one detector.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    llx: usize,
    lly: usize,
    xbin: usize,
    ybin: usize,
    data: Buffer2<f32>,
    /// Pre-calibration counts used for saturation checks.
    raw: Option<Buffer2<f32>>,
}

impl Window {
    pub fn new(llx: usize, lly: usize, xbin: usize, ybin: usize, data: Buffer2<f32>) -> Self {
        assert!(xbin > 0 && ybin > 0, "binning factors must be positive");
        Self {
            llx,
            lly,
            xbin,
            ybin,
            data,
            raw: None,
        }
    }

    pub fn with_raw(mut self, raw: Buffer2<f32>) -> Self {
        assert_eq!(
            (raw.width(), raw.height()),
            (self.data.width(), self.data.height()),
            "raw counts must match the window dimensions"
        );
        self.raw = Some(raw);
        self
    }

    #[inline]
    pub fn nx(&self) -> usize {
        self.data.width()
    }

    #[inline]
    pub fn ny(&self) -> usize {
        self.data.height()
    }

    pub fn llx(&self) -> usize {
        self.llx
    }

    pub fn lly(&self) -> usize {
        self.lly
    }

    pub fn xbin(&self) -> usize {
        self.xbin
    }

    pub fn ybin(&self) -> usize {
        self.ybin
    }

    pub fn data(&self) -> &Buffer2<f32> {
        &self.data
    }

    /// Raw counts when available, the calibrated data otherwise.
    pub fn raw(&self) -> &Buffer2<f32> {
        self.raw.as_ref().unwrap_or(&self.data)
    }

    /// Area of one binned pixel in unbinned pixels.
    #[inline]
    pub fn pixel_area(&self) -> f64 {
        (self.xbin * self.ybin) as f64
    }

    /// Detector X of the centre of binned column `ix`.
    #[inline]
    pub fn x(&self, ix: usize) -> f64 {
        (self.llx + self.xbin * ix) as f64 + (self.xbin as f64 - 1.0) / 2.0
    }

    /// Detector Y of the centre of binned row `iy`.
    #[inline]
    pub fn y(&self, iy: usize) -> f64 {
        (self.lly + self.ybin * iy) as f64 + (self.ybin as f64 - 1.0) / 2.0
    }

    /// Continuous binned column index of detector X.
    fn column(&self, x: f64) -> f64 {
        (x - self.llx as f64 - (self.xbin as f64 - 1.0) / 2.0) / self.xbin as f64
    }

    fn row(&self, y: f64) -> f64 {
        (y - self.lly as f64 - (self.ybin as f64 - 1.0) / 2.0) / self.ybin as f64
    }

    fn xlo(&self) -> f64 {
        self.llx as f64 - 0.5
    }

    fn xhi(&self) -> f64 {
        (self.llx + self.xbin * self.nx()) as f64 - 0.5
    }

    fn ylo(&self) -> f64 {
        self.lly as f64 - 0.5
    }

    fn yhi(&self) -> f64 {
        (self.lly + self.ybin * self.ny()) as f64 - 0.5
    }

    /// Whether the detector position lies inside the window's outer edge.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x > self.xlo() && x < self.xhi() && y > self.ylo() && y < self.yhi()
    }

    /// Distance from the position to the nearest window edge, negative outside.
    pub fn distance(&self, x: f64, y: f64) -> f64 {
        (x - self.xlo())
            .min(self.xhi() - x)
            .min(y - self.ylo())
            .min(self.yhi() - y)
    }

    /// Sub-window holding every pixel whose centre lies in `[x1, x2] × [y1, y2]`.
    pub fn crop(&self, x1: f64, x2: f64, y1: f64, y2: f64) -> Option<Window> {
        let ix1 = self.column(x1).ceil().max(0.0);
        let ix2 = self.column(x2).floor();
        let iy1 = self.row(y1).ceil().max(0.0);
        let iy2 = self.row(y2).floor();
        if ix2 < ix1 || iy2 < iy1 {
            return None;
        }
        let (ix1, ix2, iy1, iy2) = (ix1 as usize, ix2 as usize, iy1 as usize, iy2 as usize);

        let data = self.data.crop(ix1, ix2, iy1, iy2)?;
        let raw = match &self.raw {
            Some(raw) => Some(raw.crop(ix1, ix2, iy1, iy2)?),
            None => None,
        };
        Some(Window {
            llx: self.llx + self.xbin * ix1,
            lly: self.lly + self.ybin * iy1,
            xbin: self.xbin,
            ybin: self.ybin,
            data,
            raw,
        })
    }

    /// Iterates `(x, y, value)` over every pixel, rows bottom to top.
    pub fn pixels(&self) -> impl Iterator<Item = (f64, f64, f64)> + '_ {
        self.data.rows().enumerate().flat_map(move |(iy, row)| {
            let y = self.y(iy);
            row.iter()
                .enumerate()
                .map(move |(ix, &value)| (self.x(ix), y, value as f64))
        })
    }

    /// Like [`Window::pixels`], with the raw count appended.
    pub fn pixels_with_raw(&self) -> impl Iterator<Item = (f64, f64, f64, f64)> + '_ {
        self.pixels()
            .zip(self.raw().iter())
            .map(|((x, y, value), &raw)| (x, y, value, raw as f64))
    }

    pub fn has_non_finite(&self) -> bool {
        self.data.iter().any(|v| !v.is_finite())
    }

    /// Median pixel value, `None` for an empty window.
    pub fn median(&self) -> Option<f64> {
        let mut values: Vec<f64> = self.data.iter().map(|&v| v as f64).collect();
        crate::stats::median_mut(&mut values)
    }
}

impl Clash for Window {
    fn clash(&self, other: &Self) -> Option<String> {
        let x_overlap = self.xlo() < other.xhi() && other.xlo() < self.xhi();
        let y_overlap = self.ylo() < other.yhi() && other.ylo() < self.yhi();
        (x_overlap && y_overlap).then(|| {
            format!(
                "windows at ({}, {}) and ({}, {}) overlap",
                self.llx, self.lly, other.llx, other.lly
            )
        })
    }
}

/// One detector of a frame: a set of non-overlapping named windows.
#[derive(Debug, Clone)]
pub struct Detector {
    pub name: String,
    pub windows: Group<String, Window>,
}

impl Detector {
    pub fn new(name: impl Into<String>, windows: Group<String, Window>) -> Self {
        Self {
            name: name.into(),
            windows,
        }
    }

    /// Detector with a single window named `"1"`.
    pub fn single(name: impl Into<String>, window: Window) -> Self {
        let mut windows = Group::new();
        windows
            .insert("1".to_string(), window)
            .unwrap_or_else(|_| unreachable!("an empty group accepts any window"));
        Self::new(name, windows)
    }

    /// The window containing the position, if any.
    pub fn enclosing(&self, x: f64, y: f64) -> Option<(&String, &Window)> {
        self.windows.iter().find(|(_, window)| window.contains(x, y))
    }

    pub fn window(&self, name: &str) -> Option<&Window> {
        self.windows.get(&name.to_string())
    }
}

/// One multi-detector exposure.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Sequence number, strictly increasing within a run.
    pub number: u64,
    /// Mid-exposure time, MJD.
    pub timestamp: f64,
    /// False when the timestamp is unreliable; such frames are skipped.
    pub good_time: bool,
    /// Blank frames (e.g. read-out junk) are skipped.
    pub blank: bool,
    /// Detectors in canonical order.
    pub detectors: Vec<Detector>,
}

impl Frame {
    pub fn new(number: u64, timestamp: f64, detectors: Vec<Detector>) -> Self {
        Self {
            number,
            timestamp,
            good_time: true,
            blank: false,
            detectors,
        }
    }

    pub fn detector(&self, name: &str) -> Option<&Detector> {
        self.detectors.iter().find(|det| det.name == name)
    }
}
