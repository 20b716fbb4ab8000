use std::fmt;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use num::Complex;

use crate::frequency::FreqUnit;
use crate::network::Network;
use crate::result::ParseError;
use crate::CxArray3;

#[derive(PartialEq, Debug, Default)]
enum TouchstoneVersion {
    #[default]
    One,
    Two,
}

#[derive(PartialEq, Debug)]
enum ParamType {
    S,
    Y,
    Z,
    G,
    H,
}

impl FromStr for ParamType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use ParamType::*;
        match s {
            "s" | "S" => Ok(S),
            "y" | "Y" => Ok(Y),
            "z" | "Z" => Ok(Z),
            "g" | "G" => Ok(G),
            "h" | "H" => Ok(H),
            _ => Err(syntax(0, format!("unknown parameter type {:?}", s))),
        }
    }
}

#[derive(PartialEq, Debug)]
enum ParamFormat {
    DBAngle,
    MagAngle,
    RealImag,
}

impl FromStr for ParamFormat {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use ParamFormat::*;
        match s {
            "db" | "DB" => Ok(DBAngle),
            "ma" | "MA" => Ok(MagAngle),
            "ri" | "RI" => Ok(RealImag),
            _ => Err(syntax(0, format!("unknown data format {:?}", s))),
        }
    }
}

impl ParamFormat {
    fn to_complex(&self, a: f64, b: f64) -> Complex<f64> {
        match self {
            ParamFormat::RealImag => Complex::new(a, b),
            ParamFormat::MagAngle => Complex::from_polar(a, b.to_radians()),
            ParamFormat::DBAngle => Complex::from_polar(10f64.powf(a / 20.), b.to_radians()),
        }
    }
}

#[derive(Debug)]
struct TouchstoneOptions {
    unit: FreqUnit,
    param_type: ParamType,
    param_format: ParamFormat,
    resistance: f64,
}

impl Default for TouchstoneOptions {
    fn default() -> Self {
        TouchstoneOptions {
            unit: FreqUnit::GHz,
            param_type: ParamType::S,
            param_format: ParamFormat::MagAngle,
            resistance: 50.,
        }
    }
}

/// A parsed Touchstone (`.sNp`) file. Frequencies are scaled to Hz and
/// parameters converted to complex values on load.
#[derive(Default)]
pub struct Touchstone {
    filename: String,
    version: TouchstoneVersion,
    comments: Vec<String>,
    num_ports: Option<usize>,
    freqs: Vec<f64>,
    num_freq_points: Option<usize>,
    reference: Option<Vec<f64>>,
    options: TouchstoneOptions,
    s_params: CxArray3,
    rank: usize,
}

fn syntax(line: usize, message: String) -> ParseError {
    ParseError::Syntax { line, message }
}

/// Reads `N` out of an `sNp` extension.
fn rank_from_path(path: &Path) -> Result<usize, ParseError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    if extension.starts_with('s') && extension.ends_with('p') && extension.len() > 2 {
        extension[1..extension.len() - 1]
            .parse::<usize>()
            .map_err(|_| ParseError::Extension(extension.clone()))
    } else {
        Err(ParseError::Extension(extension))
    }
}

impl Touchstone {
    pub fn freqs(&self) -> Vec<f64> {
        self.freqs.clone()
    }

    pub fn s_params(&self) -> CxArray3 {
        self.s_params.clone()
    }

    pub fn resistance(&self) -> f64 {
        self.options.resistance
    }

    /// Reference impedance per port: the `[Reference]` line when present,
    /// else the option line resistance on every port.
    pub fn port_impedances(&self) -> Vec<f64> {
        match &self.reference {
            Some(reference) => reference.clone(),
            None => vec![self.options.resistance; self.rank],
        }
    }

    /// Fails unless the file holds scattering parameters.
    pub fn require_s_params(&self) -> Result<(), ParseError> {
        match self.options.param_type {
            ParamType::S => Ok(()),
            ref other => Err(ParseError::Unsupported(format!("{:?}", other))),
        }
    }

    pub fn new(path: &Path) -> Result<Self, ParseError> {
        let contents = fs::read_to_string(path)?;
        let mut touchstone = Touchstone::parse(&contents, rank_from_path(path)?)?;
        touchstone.filename = path.display().to_string();
        Ok(touchstone)
    }

    pub fn parse(contents: &str, rank: usize) -> Result<Self, ParseError> {
        let mut touchstone = Touchstone {
            rank,
            ..Touchstone::default()
        };
        let mut options_read = false;
        let mut two_port_21_12 = true;
        let mut values: Vec<f64> = vec![];
        let mut lines = contents.lines().enumerate();

        while let Some((index, raw)) = lines.next() {
            let number = index + 1;
            let mut line = raw.to_lowercase();

            if let Some(idx) = raw.find('!') {
                if !options_read {
                    touchstone.comments.push(raw[idx + 1..].trim().to_owned());
                }
                line = raw[..idx].to_lowercase();
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(rest) = line.strip_prefix("[version]") {
                if rest.trim() == "2.0" {
                    touchstone.version = TouchstoneVersion::Two;
                }
            } else if let Some(rest) = line.strip_prefix("[reference]") {
                let mut rest = rest.trim().to_owned();
                if rest.is_empty() {
                    rest = lines.next().map(|(_, l)| l.trim().to_owned()).unwrap_or_default();
                }
                let reference = rest
                    .split_whitespace()
                    .map(|r| r.parse::<f64>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| syntax(number, e.to_string()))?;
                touchstone.reference = Some(reference);
            } else if let Some(rest) = line.strip_prefix("[number of ports]") {
                touchstone.num_ports = rest.trim().parse::<usize>().ok();
            } else if let Some(rest) = line.strip_prefix("[number of frequencies]") {
                touchstone.num_freq_points = rest.trim().parse::<usize>().ok();
            } else if let Some(rest) = line.strip_prefix("[two-port data order]") {
                two_port_21_12 = rest.trim() == "21_12";
            } else if line.starts_with("[noise data]") || line.starts_with("[end]") {
                break;
            } else if line.starts_with('[') {
                // [network data] and keywords that do not change the layout
                continue;
            } else if line.starts_with('#') {
                parse_options_line(line, &mut touchstone.options)
                    .map_err(|_| syntax(number, format!("bad option line {:?}", line)))?;
                options_read = true;
            } else {
                let chunked = line
                    .split_whitespace()
                    .map(|v| v.parse::<f64>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| syntax(number, e.to_string()))?;
                // Version 1 two-port files append noise parameters as 5-column rows
                if touchstone.rank == 2 && chunked.len() == 5 {
                    break;
                }
                values.extend(chunked);
            }
        }

        touchstone.assemble(values, two_port_21_12)?;
        touchstone.check_keywords()?;
        Ok(touchstone)
    }

    /// Cross-checks the version 2 keywords against the parsed data.
    fn check_keywords(&self) -> Result<(), ParseError> {
        if self.version == TouchstoneVersion::Two && self.num_ports.is_none() {
            return Err(syntax(0, "[number of ports] is required in version 2.0".to_owned()));
        }
        let declared = [
            ("[number of ports]", self.num_ports, self.rank),
            ("[number of frequencies]", self.num_freq_points, self.freqs.len()),
            ("[reference]", self.reference.as_ref().map(Vec::len), self.rank),
        ];
        for (keyword, declared, found) in declared {
            match declared {
                Some(declared) if declared != found => {
                    return Err(ParseError::Mismatch {
                        keyword,
                        declared,
                        found,
                    })
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn assemble(&mut self, values: Vec<f64>, two_port_21_12: bool) -> Result<(), ParseError> {
        let rank = self.rank;
        let width = 1 + 2 * rank * rank;
        if rank == 0 || values.len() % width != 0 {
            return Err(ParseError::Shape { rank });
        }
        let npoints = values.len() / width;
        let unit = self.options.unit;
        let mut s = CxArray3::zeros((npoints, rank, rank));
        self.freqs = Vec::with_capacity(npoints);

        for (point, row) in values.chunks(width).enumerate() {
            self.freqs.push(unit * row[0]);
            for (k, pair) in row[1..].chunks(2).enumerate() {
                let (i, j) = if rank == 2 && two_port_21_12 {
                    (k % rank, k / rank)
                } else {
                    (k / rank, k % rank)
                };
                s[[point, i, j]] = self.options.param_format.to_complex(pair[0], pair[1]);
            }
        }
        self.s_params = s;
        Ok(())
    }
}

fn parse_options_line(line: &str, options: &mut TouchstoneOptions) -> Result<(), ParseError> {
    let split_line: Vec<&str> = line.trim_start_matches('#').split_whitespace().collect();
    for (index, entry) in split_line.iter().enumerate() {
        if entry.ends_with("hz") {
            options.unit = entry.parse()?;
        } else if matches!(*entry, "db" | "ma" | "ri") {
            options.param_format = entry.parse()?;
        } else if matches!(*entry, "s" | "y" | "z" | "h" | "g") {
            options.param_type = entry.parse()?;
        } else if *entry == "r" {
            options.resistance = split_line
                .get(index + 1)
                .and_then(|r| r.parse::<f64>().ok())
                .ok_or_else(|| syntax(0, "missing reference resistance".to_owned()))?;
        }
    }
    Ok(())
}

/// Writes `network` as a version 1 Touchstone file in Hz / S / RI format.
pub fn write_snp(network: &Network, path: &Path) -> Result<(), ParseError> {
    let rank = network.nports();
    let resistance = network.z0().first().map(|z| z.re).unwrap_or(50.);
    let mut out = String::new();
    // Writing into a String cannot fail
    let _ = writeln!(out, "! {}-port network, {} points", rank, network.len());
    let _ = writeln!(out, "# Hz S RI R {}", resistance);

    let s = network.s();
    for (point, f) in network.frequency().points().iter().enumerate() {
        let _ = write!(out, "{}", f);
        for k in 0..rank * rank {
            let (i, j) = if rank == 2 {
                (k % rank, k / rank)
            } else {
                (k / rank, k % rank)
            };
            if rank > 2 && k > 0 && k % 4 == 0 {
                out.push('\n');
            }
            let value = s[[point, i, j]];
            let _ = write!(out, " {} {}", value.re, value.im);
        }
        out.push('\n');
    }
    fs::write(path, out)?;
    Ok(())
}

impl fmt::Debug for Touchstone {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Touchstone")
            .field("filename", &self.filename)
            .field("version", &self.version)
            .field("options", &self.options)
            .field("num_ports", &self.num_ports)
            .field("num_freq_points", &self.num_freq_points)
            .field("reference", &self.reference)
            .field("rank", &self.rank)
            .field("freqs", &self.freqs.len())
            .field("s_params", &self.s_params.shape())
            .field("comments", &self.comments)
            .finish()
    }
}
