//! Postsynaptic potential (PSP) kernels, used to turn spikes into continuous traces.
//!
//! Every kernel is sampled at the simulation step and starts one step after the triggering spike,
//! i.e., there is no zero-delay sample.
//!
//! # Examples
//!
//! ```rust
//! use rusty_patterns::psp::{create_psp_shape, PspKind, PspShape, PspSpec};
//!
//! let spec = PspSpec::new(PspShape::Rectangular, 0.01, 1.0, PspKind::Renewal);
//! let kernel = create_psp_shape(&spec, 1e-3).unwrap();
//! assert_eq!(kernel, vec![1.0; 10]);
//! ```
use serde::{Deserialize, Serialize};
use std::f64::consts::{E, PI};

use crate::error::PatternError;
use crate::utils::num_steps;

/// Total support of the fixed alpha and plateau kernels, in seconds.
const FIXED_KERNEL_SUPPORT: f64 = 60e-3;

const ALPHA_TAU: f64 = 17e-3;
const ALPHA_ROOT_LOW: f64 = 0.2231961;
const ALPHA_ROOT_HIGH: f64 = 2.67835;

const PLATEAU_RISE: f64 = 7e-3;
const PLATEAU_FALL: f64 = 18e-3;
const PLATEAU_TAU: f64 = 30e-3;
const PLATEAU_GAIN: f64 = 1.03;

/// The shape of a kernel, tagged by `shape` when (de)serialized.
/// Unknown shape names fall back to the rectangular kernel.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum PspShape {
    DoubleExp { t_rise: f64, t_fall: f64 },
    Alpha,
    Plateau,
    #[serde(other)]
    Rectangular,
}

/// How overlapping kernel instances combine.
#[derive(Debug, PartialEq, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PspKind {
    /// Pointwise maximum, the potentials do not summate.
    #[default]
    Renewal,
    /// Pointwise sum.
    Additive,
}

/// A kernel description: shape, considered duration (s), peak value and combination semantics.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct PspSpec {
    #[serde(flatten)]
    pub shape: PspShape,
    pub duration: f64,
    pub max_value: f64,
    #[serde(default)]
    pub kind: PspKind,
}

impl PspSpec {
    pub fn new(shape: PspShape, duration: f64, max_value: f64, kind: PspKind) -> Self {
        PspSpec {
            shape,
            duration,
            max_value,
            kind,
        }
    }
}

/// Sample the kernel described by `spec` at step `dt`.
/// Returns an error if the step is not positive, the duration is negative or the double exponential time constants are invalid.
pub fn create_psp_shape(spec: &PspSpec, dt: f64) -> Result<Vec<f64>, PatternError> {
    if !(dt > 0.0) {
        return Err(PatternError::InvalidParameter(
            "The PSP time step must be positive.".to_string(),
        ));
    }
    if !(spec.duration >= 0.0) {
        return Err(PatternError::InvalidParameter(format!(
            "The PSP duration must be non-negative, got {}.",
            spec.duration
        )));
    }

    match spec.shape {
        PspShape::Rectangular => Ok(rectangular(spec.duration, spec.max_value, dt)),
        PspShape::DoubleExp { t_rise, t_fall } => {
            double_exponential(t_rise, t_fall, spec.duration, spec.max_value, dt)
        }
        PspShape::Alpha => Ok(alpha(spec.duration, spec.max_value, dt)),
        PspShape::Plateau => Ok(plateau(spec.duration, spec.max_value, dt)),
    }
}

/// Constant `max_value` during ceil(duration / dt) steps.
pub fn rectangular(duration: f64, max_value: f64, dt: f64) -> Vec<f64> {
    vec![max_value; num_steps(duration, dt)]
}

/// Difference of two decaying exponentials, exp(-t/t_fall) - exp(-t/t_rise), scaled so that its continuous peak is `max_value`.
/// Both time constants are rounded up to whole steps, which must satisfy rise < fall.
pub fn double_exponential(
    t_rise: f64,
    t_fall: f64,
    duration: f64,
    max_value: f64,
    dt: f64,
) -> Result<Vec<f64>, PatternError> {
    let rise = (t_rise / dt).ceil();
    let fall = (t_fall / dt).ceil();
    if !(rise > 0.0 && rise < fall && fall.is_finite()) {
        return Err(PatternError::InvalidParameter(format!(
            "The double exponential PSP requires 0 < t_rise < t_fall (in steps), got {} and {}.",
            rise, fall
        )));
    }

    let t_max = rise * fall * (rise / fall).ln() / (rise - fall);
    let peak = (-t_max / fall).exp() - (-t_max / rise).exp();

    // the sample at i = 0 is exactly zero
    Ok((1..=num_steps(duration, dt))
        .map(|i| {
            let i = i as f64;
            ((-i / fall).exp() - (-i / rise).exp()) / peak * max_value
        })
        .collect())
}

/// Normalize a kernel to a unit maximum and pad it with zeros up to the fixed support.
fn normalize_and_pad(mut kernel: Vec<f64>, dt: f64) -> Vec<f64> {
    let max = kernel.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max > 0.0 {
        kernel.iter_mut().for_each(|v| *v /= max);
    }
    let support = num_steps(FIXED_KERNEL_SUPPORT, dt);
    if kernel.len() < support {
        kernel.resize(support, 0.0);
    }
    kernel
}

/// Copy `kernel[skip..skip + length]`, zero-padded up to `length` samples.
fn window(kernel: &[f64], skip: usize, length: usize) -> Vec<f64> {
    let mut out: Vec<f64> = kernel.iter().skip(skip).take(length).cloned().collect();
    out.resize(length, 0.0);
    out
}

/// The upper half of a fixed alpha function, i.e., the part between its two roots.
pub fn alpha(duration: f64, max_value: f64, dt: f64) -> Vec<f64> {
    let span = num_steps((ALPHA_ROOT_HIGH - ALPHA_ROOT_LOW) * ALPHA_TAU, dt);
    let kernel = (0..span)
        .map(|i| {
            let x = i as f64 * dt / ALPHA_TAU + ALPHA_ROOT_LOW;
            2.3 * (E * x * (-x).exp() - 0.5)
        })
        .collect();
    let kernel = normalize_and_pad(kernel, dt);

    window(&kernel, 1, num_steps(duration, dt))
        .into_iter()
        .map(|v| (v * max_value).max(0.0))
        .collect()
}

/// A smoothed rectangle: a sine rise, a flat top and a reversed sine fall.
pub fn plateau(duration: f64, max_value: f64, dt: f64) -> Vec<f64> {
    let rise = (0..num_steps(PLATEAU_RISE, dt)).map(|i| (PI / 2.0 * i as f64 * dt / PLATEAU_RISE).sin());
    let top = (0..num_steps(PLATEAU_TAU - (PLATEAU_RISE + 0.5 * PLATEAU_FALL), dt)).map(|_| 1.0);
    let fall: Vec<f64> = (0..num_steps(PLATEAU_FALL, dt))
        .map(|i| {
            let x = i as f64 * dt / PLATEAU_FALL;
            x - (2.0 * PI * x).sin() / (2.0 * PI)
        })
        .rev()
        .collect();

    let kernel = rise
        .chain(top)
        .chain(fall)
        .map(|v| PLATEAU_GAIN * v)
        .collect();
    let kernel = normalize_and_pad(kernel, dt);

    window(&kernel, 0, num_steps(duration, dt))
        .into_iter()
        .map(|v| v * max_value)
        .collect()
}
