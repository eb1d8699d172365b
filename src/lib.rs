//! This crate provides tools for synthesizing spike trains made of overlapping, unsynchronized rate patterns, and
//! for scoring how well a population of detector neurons recovers those patterns.
//!
//! # Generating Data
//!
//! ```rust
//! use rand::SeedableRng;
//! use rand_chacha::ChaCha8Rng;
//! use rusty_patterns::scheduler::{OnOffPeriods, Scheduler};
//! use rusty_patterns::template::{BarTemplates, PatternLibrary, RateBounds};
//! use rusty_patterns::train::{CombineRule, Train};
//!
//! // The 16 bars of an 8x8 grid, 50 ms long
//! let bars = BarTemplates::build(8, 8, &[], RateBounds::new(0.0, 75.0), 50e-3, 1e-3).unwrap();
//! let ids: Vec<usize> = (1..=16).collect();
//! let library = PatternLibrary::from_generator(&bars, &ids, 1e-3).unwrap();
//!
//! // Up to 3 simultaneous bars during 5 seconds
//! let mut rng = ChaCha8Rng::seed_from_u64(42);
//! let scheduler = Scheduler::build(1e-3, vec![0.9, 0.9, 0.9], OnOffPeriods::Fixed(1.0, 0.0)).unwrap();
//! let distribution = scheduler.schedule(&library, &ids, 5.0, 0, &mut rng).unwrap();
//!
//! // Combine the rates, fill the missing patterns with noise and draw the spikes
//! let mut train = Train::build(&library).unwrap();
//! train.add_occurrences(&distribution, 0.0, 5.0);
//! train
//!     .combine(&library, &CombineRule::Nonlinear { rates: RateBounds::new(0.0, 75.0), precision: 5.0 })
//!     .unwrap();
//! train.add_fill_noise(3, 3.0, false, false, &mut rng).unwrap();
//! train.generate_spikes(&mut rng, true).unwrap();
//!
//! assert_eq!(train.spikes().len(), 64);
//! ```
//!
//! # Evaluating Detectors
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use rusty_patterns::analysis::{group_by_specialization, map_neurons_to_patterns, specialized_neurons};
//! use rusty_patterns::distribution::PatternDistribution;
//! use rusty_patterns::measure::{f1_measure, precision_table};
//!
//! let distribution = PatternDistribution::from(BTreeMap::from([(1, vec![0, 200]), (2, vec![100])]));
//! let lengths = BTreeMap::from([(1, 50), (2, 50)]);
//! // output spikes of three neurons, in time steps
//! let spikes = vec![vec![10, 210], vec![120, 130], vec![]];
//!
//! let table = precision_table(&distribution, &lengths, &spikes, 300, 0).unwrap();
//! let (specialized, _) = specialized_neurons(&table, 0.5, 0.5, &[0, 1, 2]);
//! let groups = group_by_specialization(&map_neurons_to_patterns(&table, 0.3), &specialized);
//!
//! let scores = f1_measure(&distribution, &lengths, &spikes, 300, 0, &groups).unwrap();
//! assert!(scores.iter().all(|score| score.f1 == 1.0));
//! ```
pub mod analysis;
pub mod config;
pub mod distribution;
pub mod error;
pub mod generate;
pub mod measure;
pub mod process;
pub mod psp;
pub mod scheduler;
pub mod template;
pub mod trace;
pub mod train;
pub mod utils;

/// Default simulation time step, in seconds.
pub const DEFAULT_DT: f64 = 1e-3;
/// Minimum number of neurons (or channels) to consider parallel processing.
pub const MIN_PARALLEL_NEURONS: usize = 100;
