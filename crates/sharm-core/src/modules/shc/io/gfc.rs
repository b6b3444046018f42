//! ICGEM `gfc` reader, static and time-variable (`icgem1.0`, `icgem2.0`).

use super::{IoFormatError, parse_index, parse_real, read_to_string, target_nmax};
use crate::common::constants::PI2;
use crate::domain::{HarmError, HarmResult};
use crate::modules::shc::Shc;
use std::path::Path;

const END_OF_HEAD: &str = "end_of_head";
const BEGIN_OF_HEAD: &str = "begin_of_head";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GfcErrors {
    No,
    Calibrated,
    Formal,
    CalibratedAndFormal,
}

impl GfcErrors {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "no" => Some(Self::No),
            "calibrated" => Some(Self::Calibrated),
            "formal" => Some(Self::Formal),
            "calibrated_and_formal" => Some(Self::CalibratedAndFormal),
            _ => None,
        }
    }

    /// Number of standard-deviation columns after `C S`.
    fn sigma_columns(self) -> usize {
        match self {
            Self::No => 0,
            Self::Calibrated | Self::Formal => 2,
            Self::CalibratedAndFormal => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GfcFormat {
    Icgem1,
    Icgem2,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GfcHeader {
    pub nmax: usize,
    pub mu: f64,
    pub r: f64,
    pub errors: GfcErrors,
    pub format: GfcFormat,
    /// Zero-based index of the `end_of_head` line.
    pub data_start: usize,
}

/// Reads only the header and returns the model's maximum degree.
pub fn read_gfc_nmax(path: impl AsRef<Path>) -> HarmResult<usize> {
    Ok(read_gfc_header(path)?.nmax)
}

pub fn read_gfc_header(path: impl AsRef<Path>) -> HarmResult<GfcHeader> {
    let path = path.as_ref();
    let contents = read_to_string(path)?;
    Ok(parse_header(&contents, path)?)
}

fn parse_header(contents: &str, path: &Path) -> Result<GfcHeader, IoFormatError> {
    let content_error = |message: String| IoFormatError::Content {
        path: path.to_path_buf(),
        message,
    };
    let mut nmax = None;
    let mut mu = None;
    let mut r = None;
    let mut errors = None;
    let mut format = GfcFormat::Icgem1;

    for (index, line) in contents.lines().enumerate() {
        let line_no = index + 1;
        let mut tokens = line.split_whitespace();
        let Some(key) = tokens.next() else {
            continue;
        };
        if key == END_OF_HEAD {
            let missing = [
                ("max_degree", nmax.is_none()),
                ("earth_gravity_constant", mu.is_none()),
                ("radius", r.is_none()),
                ("errors", errors.is_none()),
            ]
            .into_iter()
            .find_map(|(name, missing)| missing.then_some(name));
            if let Some(name) = missing {
                return Err(content_error(format!(
                    "the header ends before the '{name}' keyword"
                )));
            }
            return Ok(GfcHeader {
                nmax: nmax.unwrap_or_default(),
                mu: mu.unwrap_or_default(),
                r: r.unwrap_or_default(),
                errors: errors.unwrap_or(GfcErrors::No),
                format,
                data_start: index,
            });
        }
        if key == BEGIN_OF_HEAD {
            continue;
        }
        let Some(value) = tokens.next() else {
            continue;
        };
        match key {
            "max_degree" => nmax = Some(parse_index(value, path, line_no, "max_degree")?),
            "earth_gravity_constant" => {
                mu = Some(parse_real(value, path, line_no, "earth_gravity_constant")?)
            }
            "radius" => r = Some(parse_real(value, path, line_no, "radius")?),
            "errors" => {
                errors = Some(GfcErrors::parse(value).ok_or_else(|| IoFormatError::Parse {
                    path: path.to_path_buf(),
                    line: line_no,
                    message: format!("unsupported value '{value}' of the 'errors' keyword"),
                })?)
            }
            "norm" if value != "fully_normalized" => {
                return Err(IoFormatError::Parse {
                    path: path.to_path_buf(),
                    line: line_no,
                    message: format!("unsupported value '{value}' of the 'norm' keyword"),
                });
            }
            "format" => {
                format = match value {
                    "icgem1.0" => GfcFormat::Icgem1,
                    "icgem2.0" => GfcFormat::Icgem2,
                    _ => {
                        return Err(IoFormatError::Parse {
                            path: path.to_path_buf(),
                            line: line_no,
                            message: format!(
                                "unsupported value '{value}' of the 'format' keyword"
                            ),
                        });
                    }
                };
            }
            _ => {}
        }
    }
    Err(content_error(format!(
        "the '{END_OF_HEAD}' keyword was not found"
    )))
}

/// Converts `yyyymmdd` or `yyyymmdd.hhmm` into a fractional year.
pub fn epoch_fraction(date: &str) -> HarmResult<f64> {
    const MONTH_DAYS: [u32; 13] = [0, 31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    const CUMULATIVE_DAYS: [f64; 13] = [
        0.0, 0.0, 31.0, 59.0, 90.0, 120.0, 151.0, 181.0, 212.0, 243.0, 273.0, 304.0, 334.0,
    ];
    let invalid = |message: String| HarmError::invalid_argument("INPUT.EPOCH", message);
    let date = date.trim();
    let bad_format = || {
        invalid(format!(
            "wrong epoch '{date}'; supported formats are 'yyyyMMdd' and 'yyyyMMdd.hhmm'"
        ))
    };
    if date.starts_with('-') {
        return Err(invalid(format!("negative epoch '{date}'")));
    }
    if date.len() < 8 || !date.is_ascii() {
        return Err(bad_format());
    }
    let field = |range: std::ops::Range<usize>| -> HarmResult<u32> {
        date[range].parse::<u32>().map_err(|_| bad_format())
    };
    let year = field(0..4)?;
    let month = field(4..6)?;
    let day = field(6..8)?;
    let leap = year % 400 == 0 || (year % 4 == 0 && year % 100 != 0);
    if !(1..=12).contains(&month) {
        return Err(invalid(format!("invalid month {month:02} in epoch '{date}'")));
    }
    let month_days = MONTH_DAYS[month as usize] + u32::from(leap && month == 2);
    if day < 1 || day > month_days {
        return Err(invalid(format!("invalid day {day:02} in epoch '{date}'")));
    }

    let (mut hour, mut minute) = (0, 0);
    if date.len() > 8 {
        if date.len() != 13 || &date[8..9] != "." {
            return Err(bad_format());
        }
        hour = field(9..11)?;
        minute = field(11..13)?;
        if hour > 24 || minute > 60 || (hour == 24 && minute == 60) {
            return Err(invalid(format!(
                "invalid time {hour:02}:{minute:02} in epoch '{date}'"
            )));
        }
    }

    let mut day_of_year = f64::from(day) + CUMULATIVE_DAYS[month as usize] - 1.0;
    if leap && month > 2 {
        day_of_year += 1.0;
    }
    let days_in_year = if leap { 366.0 } else { 365.0 };
    Ok(f64::from(year)
        + (day_of_year + (f64::from(hour) + f64::from(minute) / 60.0) / 24.0) / days_in_year)
}

/// Reads a `gfc` model up to `nmax` (the file's maximum degree by default).
///
/// Time-variable terms are evaluated at `epoch`. `icgem2.0` files require an
/// epoch; for `icgem1.0` files without one the trend and periodic terms are
/// evaluated at their reference epochs.
pub fn read_gfc(path: impl AsRef<Path>, nmax: Option<usize>, epoch: Option<&str>) -> HarmResult<Shc> {
    let path = path.as_ref();
    let contents = read_to_string(path)?;
    let header = parse_header(&contents, path)?;
    let nmax = target_nmax(nmax, header.nmax, path)?;
    if header.format == GfcFormat::Icgem2 && epoch.is_none() {
        return Err(HarmError::invalid_argument(
            "INPUT.EPOCH",
            "an epoch is required for gfc files of the icgem2.0 format",
        ));
    }
    let t = epoch.map(epoch_fraction).transpose()?;
    let mut shc = Shc::calloc(nmax, header.mu, header.r)?;

    let sigmas = header.errors.sigma_columns();
    let icgem2 = header.format == GfcFormat::Icgem2;
    let parse_error = |line: usize, message: String| IoFormatError::Parse {
        path: path.to_path_buf(),
        line,
        message,
    };
    // Reference epoch and (n, m) of the last `gfct` line in icgem1.0 files.
    let mut reference: Option<(usize, usize, f64)> = None;
    let mut skipped = 0usize;

    for (index, line) in contents.lines().enumerate().skip(header.data_start + 1) {
        let line_no = index + 1;
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(&key) = tokens.first() else {
            continue;
        };
        let required = match key {
            "gfc" if sigmas == 0 => 4,
            "gfc" => 5 + sigmas,
            "gfct" => 6 + sigmas + usize::from(icgem2),
            "trnd" | "dot" => 5 + sigmas + if icgem2 { 2 } else { 0 },
            "asin" | "acos" => 6 + sigmas + if icgem2 { 2 } else { 0 },
            _ => continue,
        };
        if tokens.len() < required {
            return Err(parse_error(
                line_no,
                format!("incorrect number of entries in '{}'", line.trim()),
            )
            .into());
        }

        let n = parse_index(tokens[1], path, line_no, "degree")?;
        if n > nmax {
            skipped += 1;
            continue;
        }
        let m = parse_index(tokens[2], path, line_no, "order")?;
        if m > n {
            return Err(parse_error(line_no, format!("order {m} exceeds degree {n}")).into());
        }
        let mut cnm = parse_real(tokens[3], path, line_no, "C coefficient")?;
        let mut snm = if m == 0 || tokens.len() < 5 {
            0.0
        } else {
            parse_real(tokens[4], path, line_no, "S coefficient")?
        };

        let epoch_at = |column: usize| -> HarmResult<f64> { epoch_fraction(tokens[column]) };
        match key {
            "gfc" => {}
            "gfct" => {
                let t0 = epoch_at(5 + sigmas)?;
                if icgem2 {
                    let t1 = epoch_at(6 + sigmas)?;
                    if !t.is_some_and(|t| t >= t0 && t < t1) {
                        continue;
                    }
                }
                reference = Some((n, m, t0));
            }
            "trnd" | "dot" | "asin" | "acos" => {
                let t0 = if icgem2 {
                    let t0 = epoch_at(5 + sigmas)?;
                    let t1 = epoch_at(6 + sigmas)?;
                    if !t.is_some_and(|t| t >= t0 && t < t1) {
                        continue;
                    }
                    t0
                } else {
                    match reference {
                        Some((n_ref, m_ref, t0)) if n_ref == n && m_ref == m => t0,
                        _ => {
                            return Err(parse_error(
                                line_no,
                                format!(
                                    "'{key}' coefficients of degree {n} and order {m} do not follow their 'gfct' line"
                                ),
                            )
                            .into());
                        }
                    }
                };
                let dt = t.unwrap_or(t0) - t0;
                let factor = if key == "trnd" || key == "dot" {
                    dt
                } else {
                    let period_column = if icgem2 { 7 + sigmas } else { 5 + sigmas };
                    let period = parse_real(tokens[period_column], path, line_no, "period")?;
                    let phase = PI2 / period * dt;
                    if key == "asin" { phase.sin() } else { phase.cos() }
                };
                cnm *= factor;
                snm *= factor;
            }
            _ => continue,
        }

        let (c_old, s_old) = shc.coeffs(n, m).unwrap_or((0.0, 0.0));
        shc.set_coeffs(n, m, c_old + cnm, s_old + snm)?;
    }

    if skipped > 0 {
        tracing::debug!(skipped, nmax, "skipped gfc lines above the requested degree");
    }
    Ok(shc)
}

#[cfg(test)]
mod tests {
    use super::{epoch_fraction, read_gfc, read_gfc_nmax};
    use crate::numerics::assert_scalar_close;
    use std::fs;
    use tempfile::TempDir;

    const STATIC_MODEL: &str = "\
product_type              gravity_field
modelname                 TEST
earth_gravity_constant    3.986004415E+14
radius                    6.378136300E+06
max_degree                3
norm                      fully_normalized
errors                    formal

key    L    M         C                  S                sigma C    sigma S
end_of_head ==================================================================
gfc    0    0  1.000000000000E+00  0.000000000000E+00  0.0  0.0
gfc    1    0  0.000000000000E+00  0.000000000000E+00  0.0  0.0
gfc    1    1  0.000000000000E+00  0.000000000000E+00  0.0  0.0
gfc    2    0 -4.841651437908E-04  0.000000000000E+00  1.0E-12  0.0
gfc    2    1 -2.066155090741E-10  1.384413891380E-09  1.0E-12  1.0E-12
gfc    2    2  2.439383573283E-06 -1.400273703859E-06  1.0E-12  1.0E-12
gfc    3    0  9.571612070334E-07  0.000000000000E+00  1.0E-12  0.0
gfc    3    3  7.213217571215E-07  1.414349261929E-06  1.0E-12  1.0E-12
";

    fn write(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).expect("model should be written");
        path
    }

    #[test]
    fn header_query_reports_nmax_without_reading_data() {
        let dir = TempDir::new().expect("tempdir");
        let path = write(&dir, "model.gfc", STATIC_MODEL);
        assert_eq!(read_gfc_nmax(&path).expect("nmax"), 3);
    }

    #[test]
    fn static_model_is_read_and_truncated() {
        let dir = TempDir::new().expect("tempdir");
        let path = write(&dir, "model.gfc", STATIC_MODEL);
        let shc = read_gfc(&path, None, None).expect("read");
        assert_eq!(shc.nmax(), 3);
        assert_eq!(shc.mu(), 3.986004415e14);
        assert_eq!(shc.r(), 6.3781363e6);
        assert_eq!(shc.coeffs(2, 2), Some((2.439383573283e-6, -1.400273703859e-6)));
        assert_eq!(shc.coeffs(3, 1), Some((0.0, 0.0)));

        let truncated = read_gfc(&path, Some(2), None).expect("read truncated");
        assert_eq!(truncated.nmax(), 2);
        assert_eq!(truncated.coeffs(2, 0), Some((-4.841651437908e-4, 0.0)));

        let error = read_gfc(&path, Some(4), None).expect_err("nmax above file must fail");
        assert_eq!(error.code(), "INPUT.NMAX");
    }

    #[test]
    fn missing_keywords_and_bad_norm_are_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let no_radius = STATIC_MODEL.replace("radius                    6.378136300E+06\n", "");
        let path = write(&dir, "a.gfc", &no_radius);
        let error = read_gfc(&path, None, None).expect_err("missing radius");
        assert!(error.message().contains("radius"));

        let bad_norm = STATIC_MODEL.replace("fully_normalized", "unnormalized");
        let path = write(&dir, "b.gfc", &bad_norm);
        assert!(read_gfc_nmax(&path).is_err());
    }

    #[test]
    fn icgem1_trend_and_annual_terms_follow_epoch() {
        let model = "\
earth_gravity_constant 1.0
radius 1.0
max_degree 2
errors no
format icgem1.0
end_of_head
gfc  0 0 1.0 0.0
gfct 2 1 1.0 2.0 20000101
trnd 2 1 0.5 -0.5
acos 2 1 0.25 0.0 1.0
asin 2 1 0.0 0.5 1.0
";
        let dir = TempDir::new().expect("tempdir");
        let path = write(&dir, "tvg.gfc", model);

        let at_reference = read_gfc(&path, None, None).expect("read");
        // trend * 0, cos(0) = 1, sin(0) = 0
        assert_eq!(at_reference.coeffs(2, 1), Some((1.25, 2.0)));

        let t0 = epoch_fraction("20000101").expect("epoch");
        let t = epoch_fraction("20010101").expect("epoch");
        let dt = t - t0;
        let shc = read_gfc(&path, None, Some("20010101")).expect("read");
        let phase = std::f64::consts::TAU * dt;
        let (c, s) = shc.coeffs(2, 1).expect("coefficients");
        assert_scalar_close("C21", 1.0 + 0.5 * dt + 0.25 * phase.cos(), c, 1.0e-12, 0.0);
        assert_scalar_close("S21", 2.0 - 0.5 * dt + 0.5 * phase.sin(), s, 1.0e-12, 0.0);
    }

    #[test]
    fn icgem2_terms_are_selected_by_validity_interval() {
        let model = "\
earth_gravity_constant 1.0
radius 1.0
max_degree 1
errors no
format icgem2.0
end_of_head
gfct 1 0 1.0 0.0 20000101 20100101
gfct 1 0 3.0 0.0 20100101 20200101
trnd 1 0 1.0 0.0 20100101 20200101
";
        let dir = TempDir::new().expect("tempdir");
        let path = write(&dir, "tvg2.gfc", model);
        assert!(read_gfc(&path, None, None).is_err());

        let early = read_gfc(&path, None, Some("20050101")).expect("read");
        assert_eq!(early.coeffs(1, 0), Some((1.0, 0.0)));

        let late = read_gfc(&path, None, Some("20110101")).expect("read");
        let dt = epoch_fraction("20110101").expect("epoch") - epoch_fraction("20100101").expect("epoch");
        let (c, _) = late.coeffs(1, 0).expect("coefficients");
        assert_scalar_close("C10", 3.0 + dt, c, 1.0e-12, 0.0);
    }

    #[test]
    fn epoch_fraction_handles_leap_years_and_time() {
        assert_eq!(epoch_fraction("20000101").expect("epoch"), 2000.0);
        let mid = epoch_fraction("20000301.1200").expect("epoch");
        assert_scalar_close("epoch", 2000.0 + (60.0 + 0.5) / 366.0, mid, 1.0e-12, 0.0);
        assert!(epoch_fraction("20010229").is_err());
        assert!(epoch_fraction("2001013").is_err());
        assert!(epoch_fraction("20010101.2460").is_err());
        assert!(epoch_fraction("-20010101").is_err());
    }
}
