//! Settings of a synthetic data set, deserialized from JSON and validated before use.
//!
//! Unknown keys are rejected and optional keys take documented defaults.
//!
//! # Examples
//!
//! ```rust
//! use rusty_patterns::config::DataSettings;
//!
//! let settings = DataSettings::from_json(
//!     r#"{
//!         "patterns": {"class": "bars", "width": 8, "height": 8},
//!         "pattern_ids": [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16],
//!         "rates": {"low": 0.0, "high": 75.0},
//!         "pattern_length": 0.05,
//!         "max_overlap": 3,
//!         "mixing_distribution": [0.9, 0.9, 0.9],
//!         "combine": "nonlinear",
//!         "fill_noise_rate": 3.0
//!     }"#,
//! )
//! .unwrap();
//!
//! assert_eq!(settings.num_channels(), 64);
//! assert_eq!(settings.num_patterns(), 16);
//! assert_eq!(settings.combine_precision, 5.0);
//! ```
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::PatternError;
use crate::scheduler::{OnOffPeriods, Scheduler};
use crate::template::RateBounds;
use crate::train::CombineRule;
use crate::utils::num_steps;
use crate::DEFAULT_DT;

fn default_dt() -> f64 {
    DEFAULT_DT
}

fn default_on_off_periods() -> OnOffPeriods {
    OnOffPeriods::Fixed(1.0, 0.0)
}

fn default_precision() -> f64 {
    5.0
}

/// Parameters of the Ornstein-Uhlenbeck process driving spatio-temporal templates.
/// The rates are `scale * exp(u)` where `u` is the process.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OuSettings {
    pub mean: f64,
    pub theta: f64,
    pub sigma: f64,
    pub scale: f64,
}

impl Default for OuSettings {
    fn default() -> Self {
        OuSettings {
            mean: 0.0,
            theta: 5.0,
            sigma: 0.5,
            scale: 1.5,
        }
    }
}

/// The template family, tagged by `class`.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "snake_case", deny_unknown_fields)]
pub enum PatternClass {
    /// Row and column bars of a (width x height) grid; no bars means all of them.
    Bars {
        width: usize,
        height: usize,
        #[serde(default)]
        bars: Vec<usize>,
    },
    /// A centered bar rotated by each angle (degrees).
    OrientedBars {
        width: usize,
        height: usize,
        bar_width: usize,
        angles: Vec<f64>,
    },
    /// Time-varying rates drawn from an Ornstein-Uhlenbeck process.
    SpatioTemporal {
        num_channels: usize,
        num_patterns: usize,
        #[serde(default)]
        process: OuSettings,
    },
}

/// How overlapping patterns combine their rates.
#[derive(Debug, PartialEq, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombineFunction {
    #[default]
    Linear,
    Nonlinear,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataSettings {
    /// Time step in seconds, shared with the simulation.
    #[serde(default = "default_dt")]
    pub dt: f64,
    pub patterns: PatternClass,
    /// IDs given to the templates, in generation order.
    pub pattern_ids: Vec<usize>,
    pub rates: RateBounds,
    /// Template length in seconds.
    pub pattern_length: f64,
    /// Maximum number of simultaneous patterns.
    pub max_overlap: usize,
    /// Probability of each of the `max_overlap` slots to hold a pattern.
    pub mixing_distribution: Vec<f64>,
    #[serde(default = "default_on_off_periods")]
    pub on_off_periods: OnOffPeriods,
    #[serde(default)]
    pub combine: CombineFunction,
    #[serde(default = "default_precision")]
    pub combine_precision: f64,
    /// Noise rate (Hz) added for each missing pattern out of `max_overlap`.
    #[serde(default)]
    pub fill_noise_rate: f64,
    /// Noise rate (Hz) added whenever no pattern is present.
    #[serde(default)]
    pub inbetween_noise_rate: f64,
}

fn invalid<S: Into<String>>(message: S) -> PatternError {
    PatternError::InvalidConfiguration(message.into())
}

impl DataSettings {
    /// Parse and validate settings from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, PatternError> {
        let settings: DataSettings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check the consistency of the settings.
    pub fn validate(&self) -> Result<(), PatternError> {
        if !(self.dt > 0.0) {
            return Err(invalid("The time step must be positive."));
        }
        self.rates
            .validate()
            .map_err(|e| invalid(e.to_string()))?;
        if num_steps(self.pattern_length, self.dt) == 0 {
            return Err(invalid("The pattern length must cover at least one time step."));
        }

        if self.mixing_distribution.len() != self.max_overlap {
            return Err(invalid(format!(
                "Expected {} mixing probabilities (max overlap), got {}.",
                self.max_overlap,
                self.mixing_distribution.len()
            )));
        }
        if self.mixing_distribution.iter().any(|p| !(0.0..=1.0).contains(p)) {
            return Err(invalid("Mixing probabilities must lie in [0, 1]."));
        }
        self.on_off_periods.validate()?;

        if self.combine == CombineFunction::Nonlinear
            && !(self.combine_precision.is_finite() && self.combine_precision > 0.0)
        {
            return Err(invalid(format!(
                "The combination precision must be positive, got {}.",
                self.combine_precision
            )));
        }
        if !(self.fill_noise_rate >= 0.0 && self.inbetween_noise_rate >= 0.0) {
            return Err(invalid("Noise rates must be non-negative."));
        }

        match &self.patterns {
            PatternClass::Bars { width, height, bars } => {
                if *width == 0 || *height == 0 {
                    return Err(invalid("The bar grid must have a positive width and height."));
                }
                if let Some(bar) = bars.iter().find(|bar| **bar >= width + height) {
                    return Err(invalid(format!("Bar {} does not exist on a {}x{} grid.", bar, width, height)));
                }
            }
            PatternClass::OrientedBars {
                width,
                height,
                bar_width,
                angles,
            } => {
                if *width == 0 || *height == 0 || *bar_width == 0 {
                    return Err(invalid("The grid and the bar must have a positive size."));
                }
                if angles.iter().any(|a| !(0.0..=360.0).contains(a)) {
                    return Err(invalid("Angles must lie in [0, 360]."));
                }
            }
            PatternClass::SpatioTemporal {
                num_channels,
                num_patterns,
                process,
            } => {
                if *num_channels == 0 || *num_patterns == 0 {
                    return Err(invalid("At least one channel and one pattern are required."));
                }
                if !(process.sigma >= 0.0 && process.scale > 0.0) {
                    return Err(invalid("The process requires a non-negative sigma and a positive scale."));
                }
            }
        }

        if self.pattern_ids.len() < self.num_patterns() {
            return Err(invalid(format!(
                "{} patterns but only {} IDs.",
                self.num_patterns(),
                self.pattern_ids.len()
            )));
        }
        if self.pattern_ids.contains(&0) {
            return Err(invalid("Pattern IDs start at 1."));
        }
        if self.pattern_ids.iter().collect::<HashSet<_>>().len() != self.pattern_ids.len() {
            return Err(invalid("Pattern IDs must be unique."));
        }

        Ok(())
    }

    /// Returns the number of input channels.
    pub fn num_channels(&self) -> usize {
        match &self.patterns {
            PatternClass::Bars { width, height, .. } | PatternClass::OrientedBars { width, height, .. } => {
                width * height
            }
            PatternClass::SpatioTemporal { num_channels, .. } => *num_channels,
        }
    }

    /// Returns the number of generated templates.
    pub fn num_patterns(&self) -> usize {
        match &self.patterns {
            PatternClass::Bars { width, height, bars } => {
                if bars.is_empty() {
                    width + height
                } else {
                    bars.len()
                }
            }
            PatternClass::OrientedBars { angles, .. } => angles.len(),
            PatternClass::SpatioTemporal { num_patterns, .. } => *num_patterns,
        }
    }

    /// Returns the (width, height) grid of image-like templates.
    pub fn pattern_shape(&self) -> Option<(usize, usize)> {
        match &self.patterns {
            PatternClass::Bars { width, height, .. } | PatternClass::OrientedBars { width, height, .. } => {
                Some((*width, *height))
            }
            PatternClass::SpatioTemporal { .. } => None,
        }
    }

    /// Returns the IDs actually given to templates.
    pub fn used_ids(&self) -> &[usize] {
        &self.pattern_ids[..self.num_patterns().min(self.pattern_ids.len())]
    }

    pub fn combine_rule(&self) -> CombineRule {
        match self.combine {
            CombineFunction::Linear => CombineRule::Linear,
            CombineFunction::Nonlinear => CombineRule::Nonlinear {
                rates: self.rates,
                precision: self.combine_precision,
            },
        }
    }

    pub fn scheduler(&self) -> Result<Scheduler, PatternError> {
        Scheduler::build(self.dt, self.mixing_distribution.clone(), self.on_off_periods)
    }
}
