//! Automation for a lab vector network analyzer.
//!
//! A [`SessionController`] drives the instrument over a half-duplex
//! command/acknowledge protocol, the [`Sequencer`] walks it through a range
//! of calibration states, and the per-band datasets it stores are stitched
//! back into one continuous spectrum with [`stitch::stitch`].

pub mod config;
pub mod dataset;
mod frequency;
mod network;
pub mod ordering;
pub mod result;
pub mod sequencer;
pub mod session;
pub mod stitch;
pub mod touchstone;
pub mod transport;

use ndarray::prelude::{Array2, Array3};
use num::complex::Complex;

pub use frequency::{FreqUnit, Frequency};
pub use network::Network;
pub use sequencer::{MeasurementPlan, Sequencer};
pub use session::{SessionController, SessionState, Timing};
pub use stitch::FrequencySegment;

type CxArray2 = Array2<Complex<f64>>;
type CxArray3 = Array3<Complex<f64>>;
