//! Plain-text formats sharing the `nmax mu r` metadata line.
//!
//! * `mtx`: an `(nmax + 1) x (nmax + 1)` matrix, `C_{row,col}` on and below
//!   the diagonal, `S_{col,row+1}` above it.
//! * `tbl`: one `n m C S` line per coefficient pair.
//! * `dov`: one `n m value` line per coefficient, `S` under a negative order.

use super::{
    IoFormatError, WriteOrder, check_writable, format_real, metadata_line, parse_index,
    parse_metadata, parse_real, read_to_string, target_nmax, write_string,
};
use crate::domain::HarmResult;
use crate::modules::shc::Shc;
use std::fmt::Write as _;
use std::path::Path;

/// Non-blank data lines after the metadata line, with 1-based line numbers.
fn data_lines(contents: &str) -> (Option<&str>, impl Iterator<Item = (usize, &str)>) {
    let mut lines = contents
        .lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line))
        .filter(|(_, line)| !line.trim().is_empty());
    let metadata = lines.next().map(|(_, line)| line);
    (metadata, lines)
}

fn entry_count_error(path: &Path, line: usize, expected: usize, found: usize) -> IoFormatError {
    IoFormatError::Parse {
        path: path.to_path_buf(),
        line,
        message: format!("expected {expected} entries, found {found}"),
    }
}

fn degree_order(
    n_token: &str,
    m_token: &str,
    path: &Path,
    line: usize,
) -> Result<(usize, usize), IoFormatError> {
    let n = parse_index(n_token, path, line, "degree")?;
    let m = parse_index(m_token, path, line, "order")?;
    if m > n {
        return Err(IoFormatError::Parse {
            path: path.to_path_buf(),
            line,
            message: format!("order {m} exceeds degree {n}"),
        });
    }
    Ok((n, m))
}

pub fn read_mtx(path: impl AsRef<Path>, nmax: Option<usize>) -> HarmResult<Shc> {
    let path = path.as_ref();
    let contents = read_to_string(path)?;
    let (metadata, lines) = data_lines(&contents);
    let (nmax_file, mu, r) = parse_metadata(metadata, path)?;
    let nmax = target_nmax(nmax, nmax_file, path)?;
    let mut shc = Shc::calloc(nmax, mu, r)?;

    let mut rows = 0;
    for (row, (line_no, line)) in lines.enumerate() {
        if row > nmax_file {
            return Err(IoFormatError::Content {
                path: path.to_path_buf(),
                message: format!("more than {} matrix rows", nmax_file + 1),
            }
            .into());
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() != nmax_file + 1 {
            return Err(entry_count_error(path, line_no, nmax_file + 1, tokens.len()).into());
        }
        for (col, token) in tokens.into_iter().enumerate() {
            let value = parse_real(token, path, line_no, "coefficient")?;
            if row >= col {
                if row <= nmax {
                    let (_, s) = shc.coeffs(row, col).unwrap_or_default();
                    shc.set_coeffs(row, col, value, s)?;
                }
            } else if col <= nmax {
                let (c, _) = shc.coeffs(col, row + 1).unwrap_or_default();
                shc.set_coeffs(col, row + 1, c, value)?;
            }
        }
        rows += 1;
    }
    if rows != nmax_file + 1 {
        return Err(IoFormatError::Content {
            path: path.to_path_buf(),
            message: format!("found {rows} matrix rows, expected {}", nmax_file + 1),
        }
        .into());
    }
    Ok(shc)
}

pub fn write_mtx(shc: &Shc, nmax: usize, path: impl AsRef<Path>, digits: usize) -> HarmResult<()> {
    check_writable(shc, nmax)?;
    let mut out = metadata_line(nmax, shc.mu(), shc.r(), digits);
    for row in 0..=nmax {
        for col in 0..=nmax {
            let value = if row >= col {
                shc.coeffs(row, col).map(|(c, _)| c)
            } else {
                shc.coeffs(col, row + 1).map(|(_, s)| s)
            };
            if col > 0 {
                out.push(' ');
            }
            out.push_str(&format_real(value.unwrap_or_default(), digits));
        }
        out.push('\n');
    }
    Ok(write_string(path.as_ref(), &out)?)
}

pub fn read_tbl(path: impl AsRef<Path>, nmax: Option<usize>) -> HarmResult<Shc> {
    let path = path.as_ref();
    let contents = read_to_string(path)?;
    let (metadata, lines) = data_lines(&contents);
    let (nmax_file, mu, r) = parse_metadata(metadata, path)?;
    let nmax = target_nmax(nmax, nmax_file, path)?;
    let mut shc = Shc::calloc(nmax, mu, r)?;

    for (line_no, line) in lines {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 4 {
            return Err(entry_count_error(path, line_no, 4, tokens.len()).into());
        }
        let (n, m) = degree_order(tokens[0], tokens[1], path, line_no)?;
        if n > nmax {
            continue;
        }
        let c = parse_real(tokens[2], path, line_no, "C coefficient")?;
        let s = parse_real(tokens[3], path, line_no, "S coefficient")?;
        shc.set_coeffs(n, m, c, s)?;
    }
    Ok(shc)
}

/// `(n, m)` pairs of a store of degree `nmax` in the requested order.
fn ordered_pairs(nmax: usize, order: WriteOrder) -> Vec<(usize, usize)> {
    match order {
        WriteOrder::N => (0..=nmax)
            .flat_map(|m| (m..=nmax).map(move |n| (n, m)))
            .collect(),
        WriteOrder::M => (0..=nmax)
            .flat_map(|n| (0..=n).map(move |m| (n, m)))
            .collect(),
    }
}

pub fn write_tbl(
    shc: &Shc,
    nmax: usize,
    path: impl AsRef<Path>,
    order: WriteOrder,
    digits: usize,
) -> HarmResult<()> {
    check_writable(shc, nmax)?;
    let mut out = metadata_line(nmax, shc.mu(), shc.r(), digits);
    for (n, m) in ordered_pairs(nmax, order) {
        let (c, s) = shc.coeffs(n, m).unwrap_or_default();
        let _ = writeln!(
            out,
            "{n} {m} {} {}",
            format_real(c, digits),
            format_real(s, digits)
        );
    }
    Ok(write_string(path.as_ref(), &out)?)
}

pub fn read_dov(path: impl AsRef<Path>, nmax: Option<usize>) -> HarmResult<Shc> {
    let path = path.as_ref();
    let contents = read_to_string(path)?;
    let (metadata, lines) = data_lines(&contents);
    let (nmax_file, mu, r) = parse_metadata(metadata, path)?;
    let nmax = target_nmax(nmax, nmax_file, path)?;
    let mut shc = Shc::calloc(nmax, mu, r)?;

    for (line_no, line) in lines {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 3 {
            return Err(entry_count_error(path, line_no, 3, tokens.len()).into());
        }
        let (m_token, sine) = match tokens[1].strip_prefix('-') {
            Some(rest) => (rest, true),
            None => (tokens[1], false),
        };
        let (n, m) = degree_order(tokens[0], m_token, path, line_no)?;
        if n > nmax {
            continue;
        }
        let value = parse_real(tokens[2], path, line_no, "coefficient")?;
        let (c, s) = shc.coeffs(n, m).unwrap_or_default();
        if sine {
            shc.set_coeffs(n, m, c, value)?;
        } else {
            shc.set_coeffs(n, m, value, s)?;
        }
    }
    Ok(shc)
}

/// Writes `C` lines for every pair and `S` lines (negative order) for `m > 0`.
pub fn write_dov(
    shc: &Shc,
    nmax: usize,
    path: impl AsRef<Path>,
    order: WriteOrder,
    digits: usize,
) -> HarmResult<()> {
    check_writable(shc, nmax)?;
    let mut out = metadata_line(nmax, shc.mu(), shc.r(), digits);
    for (n, m) in ordered_pairs(nmax, order) {
        let (c, s) = shc.coeffs(n, m).unwrap_or_default();
        let _ = writeln!(out, "{n} {m} {}", format_real(c, digits));
        if m > 0 {
            let _ = writeln!(out, "{n} -{m} {}", format_real(s, digits));
        }
    }
    Ok(write_string(path.as_ref(), &out)?)
}
