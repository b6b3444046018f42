//! Native binary dump: `nmax` (u64), `mu`, `r`, then the `C` coefficients
//! order by order (degrees `m..=nmax`), then the `S` coefficients in the same
//! layout. All values little-endian.

use super::{IoFormatError, check_writable, target_nmax};
use crate::domain::HarmResult;
use crate::modules::shc::{Shc, coefficient_count, order_count};
use std::path::Path;

const WORD: usize = 8;

pub fn write_bin(shc: &Shc, nmax: usize, path: impl AsRef<Path>) -> HarmResult<()> {
    let path = path.as_ref();
    check_writable(shc, nmax)?;
    let mut bytes = Vec::with_capacity(WORD * (3 + 2 * coefficient_count(nmax)));
    bytes.extend_from_slice(&(nmax as u64).to_le_bytes());
    bytes.extend_from_slice(&shc.mu().to_le_bytes());
    bytes.extend_from_slice(&shc.r().to_le_bytes());
    for sine in [false, true] {
        for m in 0..=nmax {
            let order = if sine { shc.s_order(m) } else { shc.c_order(m) };
            let values = order.map(|values| &values[..order_count(nmax, m)]).unwrap_or_default();
            for value in values {
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }
    }
    std::fs::write(path, bytes).map_err(|source| IoFormatError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

struct WordReader<'a> {
    bytes: &'a [u8],
    position: usize,
    path: &'a Path,
}

impl WordReader<'_> {
    fn next(&mut self) -> Result<[u8; WORD], IoFormatError> {
        let word = self
            .bytes
            .get(self.position..self.position + WORD)
            .and_then(|slice| <[u8; WORD]>::try_from(slice).ok())
            .ok_or_else(|| IoFormatError::Content {
                path: self.path.to_path_buf(),
                message: format!("file ends unexpectedly at byte {}", self.position),
            })?;
        self.position += WORD;
        Ok(word)
    }

    fn next_f64(&mut self) -> Result<f64, IoFormatError> {
        Ok(f64::from_le_bytes(self.next()?))
    }

    fn skip(&mut self, words: usize) {
        self.position += words * WORD;
    }
}

pub fn read_bin(path: impl AsRef<Path>, nmax: Option<usize>) -> HarmResult<Shc> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|source| IoFormatError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = WordReader {
        bytes: &bytes,
        position: 0,
        path,
    };
    let nmax_file = u64::from_le_bytes(reader.next()?);
    let nmax_file = usize::try_from(nmax_file).map_err(|_| IoFormatError::Content {
        path: path.to_path_buf(),
        message: format!("maximum degree {nmax_file} does not fit this platform"),
    })?;
    let expected = nmax_file
        .checked_add(1)
        .and_then(|n| n.checked_mul(nmax_file + 2))
        .map(|count| WORD * (3 + count));
    if expected != Some(bytes.len()) {
        return Err(IoFormatError::Content {
            path: path.to_path_buf(),
            message: format!(
                "file holds {} bytes, which does not match maximum degree {nmax_file}",
                bytes.len()
            ),
        }
        .into());
    }
    let mu = reader.next_f64()?;
    let r = reader.next_f64()?;
    let nmax = target_nmax(nmax, nmax_file, path)?;
    let mut shc = Shc::calloc(nmax, mu, r)?;

    for sine in [false, true] {
        for m in 0..=nmax_file {
            if m > nmax {
                reader.skip(order_count(nmax_file, m));
                continue;
            }
            for n in m..=nmax_file {
                let value = reader.next_f64()?;
                if n > nmax {
                    continue;
                }
                let (c, s) = shc.coeffs(n, m).unwrap_or_default();
                if sine {
                    shc.set_coeffs(n, m, c, value)?;
                } else {
                    shc.set_coeffs(n, m, value, s)?;
                }
            }
        }
    }
    Ok(shc)
}
