//! Track kinematics.
//!
//! Converts a tracked trajectory into the eight CASA kinematic parameters
//! and a motility class. Pure and synchronous; callers run it off the async
//! executor.

pub mod calculator;
pub mod path;

pub use calculator::{CalculatorSettings, KinematicsCalculator};
