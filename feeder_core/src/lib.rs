#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Feeding control engine (hardware-agnostic).
//!
//! This crate is the control core of the feed dispenser: a non-blocking
//! motor actuation FSM and the feeding state machine that sequences a
//! multi-phase dispense attempt against a load-cell weight source. All
//! hardware interactions go through `feeder_traits::WeightSensor` and
//! `feeder_traits::RelayLine`.
//!
//! ## Architecture
//!
//! - **Motor FSM**: relay ownership, continuous and pulsed drive (`motor`)
//! - **Engine**: trigger handling, adaptive pulse-and-weigh, settle cycles,
//!   timeout/cooldown enforcement (`engine`)
//! - **Configuration**: validated runtime tunables (`config`, `builder`)
//! - **Status**: feeding states, triggers, results (`status`)
//!
//! ## Fixed-Point Arithmetic
//!
//! The control path operates in integer **grams** (1 g = 0.001 kg) using
//! `i32` for deterministic comparisons. See `util::quantize_kg_to_g`.

pub mod builder;
pub mod config;
pub mod conversions;
pub mod engine;
pub mod error;
pub mod mocks;
pub mod motor;
pub mod status;
pub mod util;

pub use builder::{Feeder, FeedingEngineBuilder, build_engine};
pub use config::FeedingCfg;
pub use engine::FeedingEngine;
pub use error::BuildError;
pub use motor::{MotorFsm, MotorState, PulseTiming};
pub use status::{FeedingOutcome, FeedingResult, FeedingState, FeedingTrigger};
