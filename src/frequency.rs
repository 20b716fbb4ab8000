use std::ops::Mul;
use std::str::FromStr;

use ndarray::prelude::*;

use crate::result::ParseError;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum FreqUnit {
    Hz,
    KHz,
    MHz,
    GHz,
    THz,
}

impl FromStr for FreqUnit {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use FreqUnit::*;
        match s.to_ascii_lowercase().as_str() {
            "hz" => Ok(Hz),
            "khz" => Ok(KHz),
            "mhz" => Ok(MHz),
            "ghz" => Ok(GHz),
            "thz" => Ok(THz),
            other => Err(ParseError::Syntax {
                line: 0,
                message: format!("unknown frequency unit {:?}", other),
            }),
        }
    }
}

impl Mul<f64> for FreqUnit {
    type Output = f64;

    fn mul(self, rhs: f64) -> f64 {
        use FreqUnit::*;
        match self {
            Hz => rhs,
            KHz => 1e3 * rhs,
            MHz => 1e6 * rhs,
            GHz => 1e9 * rhs,
            THz => 1e12 * rhs,
        }
    }
}

/// Represents a frequency band. Points are always held in Hz.
#[derive(PartialEq, Debug, Clone)]
pub struct Frequency {
    f: Array1<f64>,
    start: f64,
    stop: f64,
    npoints: usize,
}

impl From<Vec<f64>> for Frequency {
    fn from(freqs: Vec<f64>) -> Self {
        Frequency::from(Array::from_vec(freqs))
    }
}

impl From<Array1<f64>> for Frequency {
    fn from(f: Array1<f64>) -> Self {
        Frequency {
            start: f.first().copied().unwrap_or(0.),
            stop: f.last().copied().unwrap_or(0.),
            npoints: f.len(),
            f,
        }
    }
}

impl Frequency {
    pub fn new(start: f64, stop: f64, npoints: Option<usize>, unit: Option<FreqUnit>) -> Self {
        let n = npoints.unwrap_or(0);
        let unit = unit.unwrap_or(FreqUnit::Hz);
        Frequency::from(Array::linspace(unit * start, unit * stop, n))
    }

    pub fn points(&self) -> ArrayView1<f64> {
        self.f.view()
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn stop(&self) -> f64 {
        self.stop
    }

    pub fn len(&self) -> usize {
        self.npoints
    }

    pub fn is_empty(&self) -> bool {
        self.npoints == 0
    }

    /// Appends `upper` after this band.
    pub fn concat(&self, upper: &Frequency) -> Frequency {
        let f = ndarray::concatenate![Axis(0), self.f, upper.f];
        Frequency::from(f)
    }
}
