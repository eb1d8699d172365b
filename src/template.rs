//! Rate templates, i.e., fixed-duration multi-channel firing-rate patterns, and the library holding them.
//!
//! # Examples
//!
//! ```rust
//! use rusty_patterns::template::{BarTemplates, PatternLibrary, RateBounds, TemplateGenerator};
//!
//! // All 8 bars (4 vertical then 4 horizontal) of a 4x4 grid, 50 ms long at 1 ms resolution
//! let rates = RateBounds::new(0.0, 75.0);
//! let bars = BarTemplates::build(4, 4, &[], rates, 50e-3, 1e-3).unwrap();
//! assert_eq!(bars.num_patterns(), 8);
//! assert_eq!(bars.num_channels(), 16);
//! assert_eq!(bars.length(), 50);
//!
//! // Register the templates under IDs 1 to 8
//! let ids: Vec<usize> = (1..=8).collect();
//! let library = PatternLibrary::from_generator(&bars, &ids, 1e-3).unwrap();
//! assert_eq!(library.length(3), Some(50));
//! ```
use log::{debug, warn};
use rand::distributions::{Distribution, Uniform};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::PatternError;
use crate::process::RateProcess;
use crate::utils::num_steps;

/// A (channels x time steps) matrix of firing rates in Hz.
pub type RateMatrix = Vec<Vec<f64>>;

/// Low (background) and high (active) firing rates in Hz.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateBounds {
    pub low: f64,
    pub high: f64,
}

impl RateBounds {
    pub fn new(low: f64, high: f64) -> Self {
        RateBounds { low, high }
    }

    /// Returns an error unless 0 <= low <= high and both are finite.
    pub fn validate(&self) -> Result<(), PatternError> {
        if !(self.low.is_finite() && self.high.is_finite()) || self.low < 0.0 || self.low > self.high {
            return Err(PatternError::InvalidParameter(format!(
                "The rates must satisfy 0 <= low <= high, got low={} and high={}.",
                self.low, self.high
            )));
        }
        Ok(())
    }

    /// The rate associated with an on (true) or off (false) pixel.
    fn of(&self, on: bool) -> f64 {
        if on {
            self.high
        } else {
            self.low
        }
    }
}

/// The common capabilities of all template generators.
pub trait TemplateGenerator {
    /// Returns the number of channels of every template.
    fn num_channels(&self) -> usize;

    /// Returns the length of every template, in time steps.
    fn length(&self) -> usize;

    /// Returns the rate matrices of all templates.
    fn patterns(&self) -> &[RateMatrix];

    /// Returns mutable access to the rate matrices of all templates.
    fn patterns_mut(&mut self) -> &mut [RateMatrix];

    /// Returns the number of templates.
    fn num_patterns(&self) -> usize {
        self.patterns().len()
    }

    /// Clamp all template rates to [min_rate, max_rate].
    fn limit_rates(&mut self, min_rate: f64, max_rate: f64) {
        self.patterns_mut()
            .iter_mut()
            .flat_map(|pattern| pattern.iter_mut())
            .flat_map(|channel| channel.iter_mut())
            .for_each(|rate| *rate = rate.max(min_rate).min(max_rate));
    }
}

fn check_common(length: f64, dt: f64, rates: &RateBounds) -> Result<usize, PatternError> {
    if !(dt > 0.0) {
        return Err(PatternError::InvalidParameter(
            "The time step must be positive.".to_string(),
        ));
    }
    rates.validate()?;
    let length = num_steps(length, dt);
    if length == 0 {
        return Err(PatternError::InvalidParameter(
            "The pattern length must cover at least one time step.".to_string(),
        ));
    }
    Ok(length)
}

/// Build a rate matrix from a spatial mask, constant in time.
fn masked_rates(mask: &[bool], rates: &RateBounds, length: usize) -> RateMatrix {
    mask.iter().map(|on| vec![rates.of(*on); length]).collect()
}

/// Bars on a (width x height) grid, flattened row-major into channels.
/// Bar `i < height` is the vertical bar on column `i`, bar `height <= i < height + width` the horizontal bar on row `i - height`.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct BarTemplates {
    width: usize,
    height: usize,
    bars: Vec<usize>,
    rates: RateBounds,
    length: usize,
    masks: Vec<Vec<bool>>,
    patterns: Vec<RateMatrix>,
}

impl BarTemplates {
    /// Create the requested bars; an empty list of bars means all of them.
    pub fn build(
        width: usize,
        height: usize,
        bars: &[usize],
        rates: RateBounds,
        length: f64,
        dt: f64,
    ) -> Result<Self, PatternError> {
        let length = check_common(length, dt, &rates)?;
        if width == 0 || height == 0 {
            return Err(PatternError::InvalidParameter(
                "The bar grid must have a positive width and height.".to_string(),
            ));
        }

        let bars: Vec<usize> = if bars.is_empty() {
            (0..width + height).collect()
        } else {
            bars.to_vec()
        };

        let masks = bars
            .iter()
            .map(|&bar| {
                if bar >= width + height {
                    return Err(PatternError::InvalidParameter(format!(
                        "Bar {} does not exist on a {}x{} grid.",
                        bar, width, height
                    )));
                }
                Ok((0..width * height)
                    .map(|channel| {
                        let (row, col) = (channel / height, channel % height);
                        if bar < height {
                            col == bar
                        } else {
                            row == bar - height
                        }
                    })
                    .collect::<Vec<bool>>())
            })
            .collect::<Result<Vec<_>, _>>()?;

        let patterns = masks
            .iter()
            .map(|mask| masked_rates(mask, &rates, length))
            .collect();

        debug!(
            "Created {} bar templates on a {}x{} grid ({} steps each)",
            bars.len(),
            width,
            height,
            length
        );

        Ok(BarTemplates {
            width,
            height,
            bars,
            rates,
            length,
            masks,
            patterns,
        })
    }

    /// Returns the (width, height) shape of the grid.
    pub fn shape(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Returns the binary masks of the templates.
    pub fn masks(&self) -> &[Vec<bool>] {
        &self.masks
    }

    pub fn bars(&self) -> &[usize] {
        &self.bars
    }

    pub fn rates(&self) -> RateBounds {
        self.rates
    }
}

impl TemplateGenerator for BarTemplates {
    fn num_channels(&self) -> usize {
        self.width * self.height
    }

    fn length(&self) -> usize {
        self.length
    }

    fn patterns(&self) -> &[RateMatrix] {
        &self.patterns
    }

    fn patterns_mut(&mut self) -> &mut [RateMatrix] {
        &mut self.patterns
    }
}

/// A centered vertical bar rotated clockwise by each requested angle (in degrees), with nearest-pixel rounding.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct OrientedBarTemplates {
    width: usize,
    height: usize,
    bar_width: usize,
    angles: Vec<f64>,
    rates: RateBounds,
    length: usize,
    masks: Vec<Vec<bool>>,
    patterns: Vec<RateMatrix>,
}

impl OrientedBarTemplates {
    pub fn build(
        width: usize,
        height: usize,
        bar_width: usize,
        angles: &[f64],
        rates: RateBounds,
        length: f64,
        dt: f64,
    ) -> Result<Self, PatternError> {
        let length = check_common(length, dt, &rates)?;
        if width == 0 || height == 0 {
            return Err(PatternError::InvalidParameter(
                "The bar grid must have a positive width and height.".to_string(),
            ));
        }
        if let Some(angle) = angles.iter().find(|a| !(0.0..=360.0).contains(*a)) {
            return Err(PatternError::InvalidParameter(format!(
                "Angles must lie in [0, 360], got {}.",
                angle
            )));
        }

        // Columns [first, first + bar_width) of the unrotated bar.
        let first = (height as f64 / 2.0 - bar_width as f64 / 2.0).max(0.0) as usize;
        let last = (first + bar_width).min(height);
        let upright = |row: f64, col: f64| -> bool {
            let (row, col) = (row.round(), col.round());
            row >= 0.0
                && row < width as f64
                && col >= 0.0
                && col < height as f64
                && (col as usize) >= first
                && (col as usize) < last
        };

        let (center_row, center_col) = ((width as f64 - 1.0) / 2.0, (height as f64 - 1.0) / 2.0);
        let masks: Vec<Vec<bool>> = angles
            .iter()
            .map(|angle| {
                let (sin, cos) = angle.to_radians().sin_cos();
                (0..width * height)
                    .map(|channel| {
                        let dy = (channel / height) as f64 - center_row;
                        let dx = (channel % height) as f64 - center_col;
                        // pull back each output pixel into the unrotated frame
                        upright(center_row + dy * cos + dx * sin, center_col + dx * cos - dy * sin)
                    })
                    .collect()
            })
            .collect();

        let patterns = masks
            .iter()
            .map(|mask| masked_rates(mask, &rates, length))
            .collect();

        debug!(
            "Created {} oriented bar templates on a {}x{} grid ({} steps each)",
            angles.len(),
            width,
            height,
            length
        );

        Ok(OrientedBarTemplates {
            width,
            height,
            bar_width,
            angles: angles.to_vec(),
            rates,
            length,
            masks,
            patterns,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn masks(&self) -> &[Vec<bool>] {
        &self.masks
    }

    pub fn angles(&self) -> &[f64] {
        &self.angles
    }

    pub fn bar_width(&self) -> usize {
        self.bar_width
    }
}

impl TemplateGenerator for OrientedBarTemplates {
    fn num_channels(&self) -> usize {
        self.width * self.height
    }

    fn length(&self) -> usize {
        self.length
    }

    fn patterns(&self) -> &[RateMatrix] {
        &self.patterns
    }

    fn patterns_mut(&mut self) -> &mut [RateMatrix] {
        &mut self.patterns
    }
}

/// Templates whose rates vary over time, channel by channel.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SpatioTemporalTemplates {
    num_channels: usize,
    length: usize,
    patterns: Vec<RateMatrix>,
}

impl SpatioTemporalTemplates {
    /// Each rate is drawn independently from the discrete uniform distribution on [low, high].
    pub fn uniform<R: Rng + ?Sized>(
        num_channels: usize,
        num_patterns: usize,
        rates: RateBounds,
        length: f64,
        dt: f64,
        rng: &mut R,
    ) -> Result<Self, PatternError> {
        let length = check_common(length, dt, &rates)?;
        let (low, high) = (rates.low.ceil() as i64, rates.high.floor() as i64);
        if low > high {
            return Err(PatternError::InvalidParameter(format!(
                "No integer rate lies in [{}, {}].",
                rates.low, rates.high
            )));
        }
        let uniform = Uniform::new_inclusive(low, high);

        let patterns = (0..num_patterns)
            .map(|_| {
                (0..num_channels)
                    .map(|_| (0..length).map(|_| uniform.sample(rng) as f64).collect())
                    .collect()
            })
            .collect();

        debug!(
            "Created {} uniform spatio-temporal templates ({} channels, {} steps)",
            num_patterns, num_channels, length
        );

        Ok(SpatioTemporalTemplates {
            num_channels,
            length,
            patterns,
        })
    }

    /// Each channel of each template is an independent realization of the provided process.
    pub fn from_process<P: RateProcess, R: Rng + ?Sized>(
        num_channels: usize,
        num_patterns: usize,
        rates: RateBounds,
        length: f64,
        dt: f64,
        process: &P,
        rng: &mut R,
    ) -> Result<Self, PatternError> {
        let length = check_common(length, dt, &rates)?;

        let patterns = (0..num_patterns)
            .map(|_| {
                (0..num_channels)
                    .map(|_| process.create(length, rng))
                    .collect::<RateMatrix>()
            })
            .collect::<Vec<_>>();

        if let Some(bad) = patterns
            .iter()
            .flat_map(|pattern| pattern.iter())
            .find(|channel| channel.len() != length)
        {
            return Err(PatternError::InvariantViolation(format!(
                "The rate process returned {} values instead of {}.",
                bad.len(),
                length
            )));
        }

        debug!(
            "Created {} process-driven spatio-temporal templates ({} channels, {} steps)",
            num_patterns, num_channels, length
        );

        Ok(SpatioTemporalTemplates {
            num_channels,
            length,
            patterns,
        })
    }

    /// Use externally computed rates, array(patterns, channels, time steps).
    /// Returns an error if the matrices do not share the same shape or contain negative rates.
    pub fn from_rates(patterns: Vec<RateMatrix>) -> Result<Self, PatternError> {
        let num_channels = patterns.first().map_or(0, |pattern| pattern.len());
        let length = patterns
            .first()
            .and_then(|pattern| pattern.first())
            .map_or(0, |channel| channel.len());

        for pattern in patterns.iter() {
            if pattern.len() != num_channels || pattern.iter().any(|channel| channel.len() != length) {
                return Err(PatternError::InvariantViolation(format!(
                    "All templates must be {}x{} rate matrices.",
                    num_channels, length
                )));
            }
            if pattern.iter().flatten().any(|rate| !(*rate >= 0.0)) {
                return Err(PatternError::InvariantViolation(
                    "Template rates must be non-negative.".to_string(),
                ));
            }
        }

        Ok(SpatioTemporalTemplates {
            num_channels,
            length,
            patterns,
        })
    }
}

impl TemplateGenerator for SpatioTemporalTemplates {
    fn num_channels(&self) -> usize {
        self.num_channels
    }

    fn length(&self) -> usize {
        self.length
    }

    fn patterns(&self) -> &[RateMatrix] {
        &self.patterns
    }

    fn patterns_mut(&mut self) -> &mut [RateMatrix] {
        &mut self.patterns
    }
}

/// An immutable rate template registered under an ID (>= 1).
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct PatternTemplate {
    id: usize,
    rates: RateMatrix,
}

impl PatternTemplate {
    /// Returns an error if the ID is zero, the rate matrix is ragged or holds negative rates.
    pub fn build(id: usize, rates: RateMatrix) -> Result<Self, PatternError> {
        if id == 0 {
            return Err(PatternError::InvalidParameter(
                "Pattern IDs start at 1.".to_string(),
            ));
        }
        let length = rates.first().map_or(0, |channel| channel.len());
        if rates.iter().any(|channel| channel.len() != length) {
            return Err(PatternError::InvariantViolation(format!(
                "The rate matrix of pattern {} is ragged.",
                id
            )));
        }
        if rates.iter().flatten().any(|rate| !(*rate >= 0.0)) {
            return Err(PatternError::InvariantViolation(format!(
                "The rates of pattern {} must be non-negative.",
                id
            )));
        }
        Ok(PatternTemplate { id, rates })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn num_channels(&self) -> usize {
        self.rates.len()
    }

    /// Returns the length of the template, in time steps.
    pub fn length(&self) -> usize {
        self.rates.first().map_or(0, |channel| channel.len())
    }

    pub fn rates(&self) -> &RateMatrix {
        &self.rates
    }
}

/// Container of templates indexed by ID.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct PatternLibrary {
    dt: f64,
    templates: BTreeMap<usize, PatternTemplate>,
}

impl PatternLibrary {
    /// Create an empty library working at the given time step.
    pub fn new(dt: f64) -> Self {
        PatternLibrary {
            dt,
            templates: BTreeMap::new(),
        }
    }

    /// Create a library holding the templates of a generator under the given IDs.
    pub fn from_generator<G: TemplateGenerator + ?Sized>(
        generator: &G,
        ids: &[usize],
        dt: f64,
    ) -> Result<Self, PatternError> {
        let mut library = PatternLibrary::new(dt);
        library.add_patterns(generator.patterns(), ids)?;
        Ok(library)
    }

    /// Register each rate matrix under the ID at the same position.
    /// IDs already present are kept untouched.
    /// Returns an error if there are fewer IDs than patterns or if the channel counts disagree, in which case nothing is registered.
    pub fn add_patterns(&mut self, patterns: &[RateMatrix], ids: &[usize]) -> Result<(), PatternError> {
        if ids.len() < patterns.len() {
            return Err(PatternError::InvariantViolation(format!(
                "{} patterns but only {} IDs.",
                patterns.len(),
                ids.len()
            )));
        }

        // nothing is registered unless every new pattern is valid
        let mut accepted: Vec<PatternTemplate> = Vec::with_capacity(patterns.len());
        for (rates, &id) in patterns.iter().zip(ids.iter()) {
            if self.templates.contains_key(&id) || accepted.iter().any(|template| template.id() == id) {
                warn!("Pattern {} is already registered, keeping the first one", id);
                continue;
            }
            let template = PatternTemplate::build(id, rates.clone())?;
            let expected = self
                .num_channels()
                .or_else(|| accepted.first().map(|first| first.num_channels()));
            if let Some(num_channels) = expected {
                if template.num_channels() != num_channels {
                    return Err(PatternError::InvariantViolation(format!(
                        "Pattern {} has {} channels instead of {}.",
                        id,
                        template.num_channels(),
                        num_channels
                    )));
                }
            }
            accepted.push(template);
        }

        self.templates
            .extend(accepted.into_iter().map(|template| (template.id(), template)));
        Ok(())
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Returns the registered IDs in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.templates.keys().copied()
    }

    pub fn get(&self, id: usize) -> Option<&PatternTemplate> {
        self.templates.get(&id)
    }

    pub fn contains(&self, id: usize) -> bool {
        self.templates.contains_key(&id)
    }

    /// Returns the length (in time steps) of the template with the given ID.
    pub fn length(&self, id: usize) -> Option<usize> {
        self.templates.get(&id).map(|template| template.length())
    }

    /// Returns the length of every template, by ID.
    pub fn lengths(&self) -> BTreeMap<usize, usize> {
        self.templates
            .iter()
            .map(|(id, template)| (*id, template.length()))
            .collect()
    }

    /// Returns the channel count shared by all templates, if any template is registered.
    pub fn num_channels(&self) -> Option<usize> {
        self.templates.values().next().map(|template| template.num_channels())
    }

    pub fn num_patterns(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
