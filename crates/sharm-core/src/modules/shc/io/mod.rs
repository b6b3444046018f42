//! Coefficient file formats.
//!
//! `gfc` (ICGEM), `mtx`, `tbl`, `dov` and the native binary dump. All text
//! formats except `gfc` start with a metadata line `nmax mu r`.

mod bin;
mod gfc;
mod text;

pub use bin::{read_bin, write_bin};
pub use gfc::{GfcErrors, GfcFormat, GfcHeader, epoch_fraction, read_gfc, read_gfc_header, read_gfc_nmax};
pub use text::{read_dov, read_mtx, read_tbl, write_dov, write_mtx, write_tbl};

use super::Shc;
use crate::domain::{HarmError, HarmResult};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};

/// Significant digits written by default; enough for exact `f64` round trips.
pub const DEFAULT_DIGITS: usize = 17;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShcFormat {
    Gfc,
    Mtx,
    Tbl,
    Dov,
    Bin,
}

impl ShcFormat {
    pub const ALL: [ShcFormat; 5] = [Self::Gfc, Self::Mtx, Self::Tbl, Self::Dov, Self::Bin];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gfc => "gfc",
            Self::Mtx => "mtx",
            Self::Tbl => "tbl",
            Self::Dov => "dov",
            Self::Bin => "bin",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|format| format.as_str().eq_ignore_ascii_case(name))
    }

    const fn patterns(self) -> &'static [&'static str] {
        match self {
            Self::Gfc => &["*.gfc", "*.GFC"],
            Self::Mtx => &["*.mtx"],
            Self::Tbl => &["*.tbl", "*.txt"],
            Self::Dov => &["*.dov"],
            Self::Bin => &["*.bin", "*.shc"],
        }
    }

    /// Guesses the format from the file name.
    pub fn detect(path: impl AsRef<Path>) -> Option<Self> {
        let file_name = path.as_ref().file_name()?;
        let (set, owners) = format_globs().ok()?;
        set.matches(file_name).first().map(|index| owners[*index])
    }
}

fn format_globs() -> Result<(GlobSet, Vec<ShcFormat>), globset::Error> {
    let mut builder = GlobSetBuilder::new();
    let mut owners = Vec::new();
    for format in ShcFormat::ALL {
        for pattern in format.patterns() {
            builder.add(Glob::new(pattern)?);
            owners.push(format);
        }
    }
    Ok((builder.build()?, owners))
}

/// Ordering of `tbl`/`dov` writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteOrder {
    /// Orders in the outer loop, degrees varying fastest.
    #[default]
    N,
    /// Degrees in the outer loop, orders varying fastest.
    M,
}

#[derive(Debug, thiserror::Error)]
pub enum IoFormatError {
    #[error("failed to open '{}': {source}", path.display())]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("'{}' line {line}: {message}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },
    #[error("'{}': {message}", path.display())]
    Content { path: PathBuf, message: String },
}

impl From<IoFormatError> for HarmError {
    fn from(error: IoFormatError) -> Self {
        HarmError::io("IO.SHC_FILE", error.to_string())
    }
}

/// Reads a coefficient file of any format. `nmax = None` reads everything;
/// `epoch` (`yyyymmdd[.hhmm]`) evaluates time-variable `gfc` models.
pub fn read(
    path: impl AsRef<Path>,
    format: ShcFormat,
    nmax: Option<usize>,
    epoch: Option<&str>,
) -> HarmResult<Shc> {
    let path = path.as_ref();
    let shc = match format {
        ShcFormat::Gfc => read_gfc(path, nmax, epoch),
        ShcFormat::Mtx => read_mtx(path, nmax),
        ShcFormat::Tbl => read_tbl(path, nmax),
        ShcFormat::Dov => read_dov(path, nmax),
        ShcFormat::Bin => read_bin(path, nmax),
    };
    let shc = crate::propagate!(shc, "shc::io::read")?;
    tracing::info!(
        path = %path.display(),
        format = format.as_str(),
        nmax = shc.nmax(),
        "read spherical harmonic coefficients"
    );
    Ok(shc)
}

/// Writes `shc` up to degree `nmax`. `gfc` output is not supported.
pub fn write(
    shc: &Shc,
    nmax: usize,
    path: impl AsRef<Path>,
    format: ShcFormat,
    order: WriteOrder,
    digits: usize,
) -> HarmResult<()> {
    let path = path.as_ref();
    let result = match format {
        ShcFormat::Gfc => Err(HarmError::invalid_argument(
            "INPUT.SHC_FORMAT",
            "writing gfc files is not supported",
        )),
        ShcFormat::Mtx => write_mtx(shc, nmax, path, digits),
        ShcFormat::Tbl => write_tbl(shc, nmax, path, order, digits),
        ShcFormat::Dov => write_dov(shc, nmax, path, order, digits),
        ShcFormat::Bin => write_bin(shc, nmax, path),
    };
    crate::propagate!(result, "shc::io::write")?;
    tracing::info!(
        path = %path.display(),
        format = format.as_str(),
        nmax,
        "wrote spherical harmonic coefficients"
    );
    Ok(())
}

pub(super) fn check_writable(shc: &Shc, nmax: usize) -> HarmResult<()> {
    if shc.is_distributed() {
        return Err(HarmError::invalid_argument(
            "INPUT.SHC_DISTRIBUTED",
            "gather a distributed store before writing it",
        ));
    }
    if nmax > shc.nmax() {
        return Err(HarmError::invalid_argument(
            "INPUT.NMAX",
            format!(
                "not enough coefficients to write up to degree {nmax} (store nmax = {})",
                shc.nmax()
            ),
        ));
    }
    Ok(())
}

pub(super) fn target_nmax(requested: Option<usize>, file_nmax: usize, path: &Path) -> HarmResult<usize> {
    match requested {
        Some(nmax) if nmax > file_nmax => Err(HarmError::invalid_argument(
            "INPUT.NMAX",
            format!(
                "cannot read up to degree {nmax} because '{}' ends at degree {file_nmax}",
                path.display()
            ),
        )),
        Some(nmax) => Ok(nmax),
        None => Ok(file_nmax),
    }
}

pub(super) fn format_real(value: f64, digits: usize) -> String {
    format!("{:.*e}", digits.max(1) - 1, value)
}

pub(super) fn parse_real(token: &str, path: &Path, line: usize, what: &str) -> Result<f64, IoFormatError> {
    // Fortran exponents ("1.0D-05") are common in published models.
    token
        .replace(['D', 'd'], "e")
        .parse::<f64>()
        .map_err(|_| IoFormatError::Parse {
            path: path.to_path_buf(),
            line,
            message: format!("cannot convert {what} '{token}' to a real number"),
        })
}

pub(super) fn parse_index(token: &str, path: &Path, line: usize, what: &str) -> Result<usize, IoFormatError> {
    token.parse::<usize>().map_err(|_| IoFormatError::Parse {
        path: path.to_path_buf(),
        line,
        message: format!("cannot convert {what} '{token}' to a non-negative integer"),
    })
}

/// Parses the `nmax mu r` metadata line.
pub(super) fn parse_metadata(
    first_line: Option<&str>,
    path: &Path,
) -> Result<(usize, f64, f64), IoFormatError> {
    let Some(line) = first_line else {
        return Err(IoFormatError::Content {
            path: path.to_path_buf(),
            message: "missing the metadata line 'nmax mu r'".to_string(),
        });
    };
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 3 {
        return Err(IoFormatError::Parse {
            path: path.to_path_buf(),
            line: 1,
            message: "the metadata line must hold 'nmax mu r'".to_string(),
        });
    }
    Ok((
        parse_index(tokens[0], path, 1, "maximum degree")?,
        parse_real(tokens[1], path, 1, "scaling constant")?,
        parse_real(tokens[2], path, 1, "reference radius")?,
    ))
}

pub(super) fn metadata_line(nmax: usize, mu: f64, r: f64, digits: usize) -> String {
    format!("{nmax} {} {}\n", format_real(mu, digits), format_real(r, digits))
}

pub(super) fn read_to_string(path: &Path) -> Result<String, IoFormatError> {
    std::fs::read_to_string(path).map_err(|source| IoFormatError::Open {
        path: path.to_path_buf(),
        source,
    })
}

pub(super) fn write_string(path: &Path, contents: &str) -> Result<(), IoFormatError> {
    std::fs::write(path, contents).map_err(|source| IoFormatError::Write {
        path: path.to_path_buf(),
        source,
    })
}
