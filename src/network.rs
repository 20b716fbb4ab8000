use std::path::Path;

use ndarray::prelude::*;
use num::complex::Complex;

use crate::frequency::Frequency;
use crate::result::{ParseError, StitchError};
use crate::touchstone::Touchstone;
use crate::{CxArray2, CxArray3};

/// An N-port network sampled over a frequency band.
///
/// `s` has shape `(npoints, nports, nports)` and `z0` has shape
/// `(npoints, nports)`.
#[derive(Debug, PartialEq, Clone)]
pub struct Network {
    f: Frequency,
    s: CxArray3,
    z0: CxArray2,
}

impl Network {
    pub fn new(f: Frequency, s: CxArray3, z0: CxArray2) -> Self {
        Network { f, s, z0 }
    }

    /// Builds a network with the same reference impedance on every port.
    pub fn with_uniform_z0(f: Frequency, s: CxArray3, z0: f64) -> Self {
        let (npoints, nports, _) = s.dim();
        let z0 = Array::from_elem((npoints, nports), Complex::new(z0, 0.));
        Network { f, s, z0 }
    }

    /// Loads an S-parameter Touchstone file. Other parameter types are
    /// rejected rather than read as S.
    pub fn from_snp(file: &Path) -> Result<Self, ParseError> {
        let touchstone = Touchstone::new(file)?;
        touchstone.require_s_params()?;
        let s = touchstone.s_params();
        let ports = touchstone.port_impedances();
        let z0 = Array::from_shape_fn((s.dim().0, ports.len()), |(_, p)| Complex::new(ports[p], 0.));
        Ok(Network::new(Frequency::from(touchstone.freqs()), s, z0))
    }

    pub fn frequency(&self) -> &Frequency {
        &self.f
    }

    pub fn s(&self) -> &CxArray3 {
        &self.s
    }

    pub fn z0(&self) -> &CxArray2 {
        &self.z0
    }

    pub fn nports(&self) -> usize {
        self.s.dim().1
    }

    pub fn len(&self) -> usize {
        self.f.len()
    }

    pub fn is_empty(&self) -> bool {
        self.f.is_empty()
    }

    /// Joins `upper` on top of this network along the frequency axis.
    ///
    /// Samples are concatenated as-is, so a shared edge frequency appears
    /// twice. `upper` must not start below the last point of `self`.
    pub fn stitch(&self, upper: &Network) -> Result<Network, StitchError> {
        if self.nports() != upper.nports() {
            return Err(StitchError::PortMismatch {
                lower: self.nports(),
                upper: upper.nports(),
            });
        }
        if !self.is_empty() && !upper.is_empty() && upper.f.start() < self.f.stop() {
            return Err(StitchError::Overlap {
                lower_stop: self.f.stop(),
                upper_start: upper.f.start(),
            });
        }
        Ok(Network {
            f: self.f.concat(&upper.f),
            s: ndarray::concatenate![Axis(0), self.s, upper.s],
            z0: ndarray::concatenate![Axis(0), self.z0, upper.z0],
        })
    }
}
