//! Spherical harmonic coefficient store.
//!
//! Coefficients live in two flat arenas (`c`, `s`) ordered by harmonic order
//! and, within an order, by degree: `c[base(m) + (n - m)]` holds `C_nm`. A
//! non-distributed store covers all orders `0..=nmax`; a distributed store
//! holds only the order chunks owned by the local rank, each chunk stored
//! contiguously.

pub mod io;
mod ops;

use super::comm::{SharedCommunicator, agree, check_all_equal};
use crate::domain::{HarmError, HarmResult};
use std::fmt;

const NOT_LOCAL: usize = usize::MAX;

/// Contiguous, inclusive range of harmonic orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OrderChunk {
    pub mfirst: usize,
    pub mlast: usize,
}

impl OrderChunk {
    pub const fn new(mfirst: usize, mlast: usize) -> Self {
        Self { mfirst, mlast }
    }

    pub fn contains(&self, m: usize) -> bool {
        (self.mfirst..=self.mlast).contains(&m)
    }
}

/// Number of coefficients of order `m` up to degree `nmax`.
pub const fn order_count(nmax: usize, m: usize) -> usize {
    nmax + 1 - m
}

/// Number of `C` (or `S`) coefficients of a store of degree `nmax`.
pub const fn coefficient_count(nmax: usize) -> usize {
    (nmax + 1) * (nmax + 2) / 2
}

/// Number of coefficients of orders `mfirst..=mlast`.
pub fn chunk_count(nmax: usize, mfirst: usize, mlast: usize) -> usize {
    (mfirst..=mlast).map(|m| order_count(nmax, m)).sum()
}

/// Offset of order `m` in a non-distributed arena.
pub const fn order_offset(nmax: usize, m: usize) -> usize {
    m * (nmax + 1) - m * m.saturating_sub(1) / 2
}

#[derive(Clone)]
pub struct Shc {
    nmax: usize,
    mu: f64,
    r: f64,
    c: Vec<f64>,
    s: Vec<f64>,
    chunks: Vec<OrderChunk>,
    bases: Vec<usize>,
    comm: Option<SharedCommunicator>,
}

impl fmt::Debug for Shc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shc")
            .field("nmax", &self.nmax)
            .field("mu", &self.mu)
            .field("r", &self.r)
            .field("chunks", &self.chunks)
            .field("distributed", &self.is_distributed())
            .finish()
    }
}

impl Shc {
    /// Store for degrees `0..=nmax`. Safe Rust has no uninitialized arenas, so
    /// this is zero-filled like [`Shc::calloc`].
    pub fn malloc(nmax: usize, mu: f64, r: f64) -> HarmResult<Self> {
        Self::calloc(nmax, mu, r)
    }

    pub fn calloc(nmax: usize, mu: f64, r: f64) -> HarmResult<Self> {
        validate_scalars(mu, r)?;
        let count = coefficient_count(nmax);
        Ok(Self::from_parts(
            nmax,
            mu,
            r,
            zeroed(count)?,
            zeroed(count)?,
            vec![OrderChunk::new(0, nmax)],
            None,
        ))
    }

    /// Wraps caller buffers without copying; [`Shc::into_buffers`] hands them
    /// back. Both buffers must hold `coefficient_count(nmax)` values in the
    /// order-major layout.
    pub fn init(nmax: usize, mu: f64, r: f64, c: Vec<f64>, s: Vec<f64>) -> HarmResult<Self> {
        validate_scalars(mu, r)?;
        let count = coefficient_count(nmax);
        check_buffer_len("c", c.len(), count)?;
        check_buffer_len("s", s.len(), count)?;
        Ok(Self::from_parts(
            nmax,
            mu,
            r,
            c,
            s,
            vec![OrderChunk::new(0, nmax)],
            None,
        ))
    }

    /// Collective. Zero-filled distributed store holding `chunks` locally.
    pub fn calloc_distributed(
        nmax: usize,
        mu: f64,
        r: f64,
        chunks: &[OrderChunk],
        comm: SharedCommunicator,
    ) -> HarmResult<Self> {
        let local = validate_scalars(mu, r)
            .and_then(|()| check_chunk_orders(nmax, chunks, false))
            .and_then(|()| {
                let count = chunks
                    .iter()
                    .map(|chunk| chunk_count(nmax, chunk.mfirst, chunk.mlast))
                    .sum();
                Ok((zeroed(count)?, zeroed(count)?))
            });
        let (c, s) = crate::propagate!(agree(comm.as_ref(), local), "Shc::calloc_distributed")?;
        let shc = Self::from_parts(nmax, mu, r, c, s, chunks.to_vec(), Some(comm));
        crate::propagate!(shc.check_distribution(), "Shc::calloc_distributed")?;
        Ok(shc)
    }

    /// Collective. Distributed store wrapping caller buffers that hold the
    /// local chunks back to back.
    pub fn init_distributed(
        nmax: usize,
        mu: f64,
        r: f64,
        chunks: &[OrderChunk],
        c: Vec<f64>,
        s: Vec<f64>,
        comm: SharedCommunicator,
    ) -> HarmResult<Self> {
        let local = validate_scalars(mu, r)
            .and_then(|()| check_chunk_orders(nmax, chunks, false))
            .and_then(|()| {
                let count = chunks
                    .iter()
                    .map(|chunk| chunk_count(nmax, chunk.mfirst, chunk.mlast))
                    .sum();
                check_buffer_len("c", c.len(), count)?;
                check_buffer_len("s", s.len(), count)
            });
        crate::propagate!(agree(comm.as_ref(), local), "Shc::init_distributed")?;
        let shc = Self::from_parts(nmax, mu, r, c, s, chunks.to_vec(), Some(comm));
        crate::propagate!(shc.check_distribution(), "Shc::init_distributed")?;
        Ok(shc)
    }

    /// Collective. Distributed copy of a full store, keeping only `chunks`.
    pub fn distribute_from(
        full: &Shc,
        chunks: &[OrderChunk],
        comm: SharedCommunicator,
    ) -> HarmResult<Self> {
        let local = if full.is_distributed() {
            Err(HarmError::invalid_argument(
                "INPUT.SHC_DISTRIBUTED",
                "the source store must not be distributed",
            ))
        } else {
            Ok(())
        };
        crate::propagate!(agree(comm.as_ref(), local), "Shc::distribute_from")?;
        let mut shc = Self::calloc_distributed(full.nmax, full.mu, full.r, chunks, comm)?;
        for chunk in chunks {
            for m in chunk.mfirst..=chunk.mlast {
                if let (Some((c, s)), Some(src_c), Some(src_s)) =
                    (shc.order_mut(m), full.c_order(m), full.s_order(m))
                {
                    c.copy_from_slice(src_c);
                    s.copy_from_slice(src_s);
                }
            }
        }
        Ok(shc)
    }

    fn from_parts(
        nmax: usize,
        mu: f64,
        r: f64,
        c: Vec<f64>,
        s: Vec<f64>,
        chunks: Vec<OrderChunk>,
        comm: Option<SharedCommunicator>,
    ) -> Self {
        let mut bases = vec![NOT_LOCAL; nmax + 1];
        let mut base = 0;
        for chunk in &chunks {
            for m in chunk.mfirst..=chunk.mlast {
                bases[m] = base;
                base += order_count(nmax, m);
            }
        }
        Self {
            nmax,
            mu,
            r,
            c,
            s,
            chunks,
            bases,
            comm,
        }
    }

    pub fn into_buffers(self) -> (Vec<f64>, Vec<f64>) {
        (self.c, self.s)
    }

    pub fn nmax(&self) -> usize {
        self.nmax
    }

    pub fn mu(&self) -> f64 {
        self.mu
    }

    pub fn r(&self) -> f64 {
        self.r
    }

    pub fn nc(&self) -> usize {
        coefficient_count(self.nmax)
    }

    pub fn local_nc(&self) -> usize {
        self.c.len()
    }

    pub fn is_distributed(&self) -> bool {
        self.comm.is_some()
    }

    pub fn comm(&self) -> Option<&SharedCommunicator> {
        self.comm.as_ref()
    }

    pub fn chunks(&self) -> &[OrderChunk] {
        &self.chunks
    }

    pub fn has_order(&self, m: usize) -> bool {
        m <= self.nmax && self.bases[m] != NOT_LOCAL
    }

    pub fn chunk_of(&self, m: usize) -> Option<OrderChunk> {
        self.chunks.iter().copied().find(|chunk| chunk.contains(m))
    }

    pub fn c_order(&self, m: usize) -> Option<&[f64]> {
        self.order_range(m).map(|range| &self.c[range])
    }

    pub fn s_order(&self, m: usize) -> Option<&[f64]> {
        self.order_range(m).map(|range| &self.s[range])
    }

    pub fn order_mut(&mut self, m: usize) -> Option<(&mut [f64], &mut [f64])> {
        let range = self.order_range(m)?;
        Some((&mut self.c[range.clone()], &mut self.s[range]))
    }

    /// Coefficients of orders `mfirst..=mlast`, which must lie in one local chunk.
    pub fn range(&self, mfirst: usize, mlast: usize) -> Option<(&[f64], &[f64])> {
        let span = self.span(mfirst, mlast)?;
        Some((&self.c[span.clone()], &self.s[span]))
    }

    pub fn range_mut(&mut self, mfirst: usize, mlast: usize) -> Option<(&mut [f64], &mut [f64])> {
        let span = self.span(mfirst, mlast)?;
        Some((&mut self.c[span.clone()], &mut self.s[span]))
    }

    /// `(C_nm, S_nm)` if order `m` is stored locally.
    pub fn coeffs(&self, n: usize, m: usize) -> Option<(f64, f64)> {
        if n > self.nmax || m > n || !self.has_order(m) {
            return None;
        }
        let index = self.bases[m] + (n - m);
        Some((self.c[index], self.s[index]))
    }

    pub fn set_coeffs(&mut self, n: usize, m: usize, c: f64, s: f64) -> HarmResult<()> {
        if n > self.nmax || m > n {
            return Err(HarmError::invalid_argument(
                "INPUT.SHC_INDEX",
                format!("degree {n} and order {m} outside 0 <= m <= n <= {}", self.nmax),
            ));
        }
        if !self.has_order(m) {
            return Err(HarmError::invalid_argument(
                "INPUT.SHC_INDEX",
                format!("order {m} is not stored on this process"),
            ));
        }
        let index = self.bases[m] + (n - m);
        self.c[index] = c;
        self.s[index] = if m == 0 { 0.0 } else { s };
        Ok(())
    }

    pub fn reset_coeffs(&mut self) {
        self.c.fill(0.0);
        self.s.fill(0.0);
    }

    pub(crate) fn set_scaling(&mut self, mu: f64, r: f64) {
        self.mu = mu;
        self.r = r;
    }

    /// Collective for distributed stores. Full non-distributed copy on every rank.
    pub fn gather(&self) -> HarmResult<Shc> {
        let mut full = Self::calloc(self.nmax, self.mu, self.r)?;
        for m in 0..=self.nmax {
            if let (Some(c), Some(s)) = (self.c_order(m), self.s_order(m)) {
                let base = order_offset(self.nmax, m);
                let len = order_count(self.nmax, m);
                full.c[base..base + len].copy_from_slice(c);
                full.s[base..base + len].copy_from_slice(s);
            }
        }
        if let Some(comm) = &self.comm {
            comm.all_reduce_sum_f64(&mut full.c);
            comm.all_reduce_sum_f64(&mut full.s);
        }
        Ok(full)
    }

    /// Copy truncated to degree `nmax`. Non-distributed stores only.
    pub fn truncated(&self, nmax: usize) -> HarmResult<Shc> {
        if self.is_distributed() {
            return Err(HarmError::invalid_argument(
                "INPUT.SHC_DISTRIBUTED",
                "truncation of a distributed store is not supported",
            ));
        }
        let mut out = Self::calloc(nmax, self.mu, self.r)?;
        for m in 0..=nmax.min(self.nmax) {
            for n in m..=nmax.min(self.nmax) {
                if let Some((c, s)) = self.coeffs(n, m) {
                    out.set_coeffs(n, m, c, s)?;
                }
            }
        }
        Ok(out)
    }

    fn order_range(&self, m: usize) -> Option<std::ops::Range<usize>> {
        if !self.has_order(m) {
            return None;
        }
        let base = self.bases[m];
        Some(base..base + order_count(self.nmax, m))
    }

    fn span(&self, mfirst: usize, mlast: usize) -> Option<std::ops::Range<usize>> {
        let chunk = self.chunk_of(mfirst)?;
        if mlast < mfirst || !chunk.contains(mlast) {
            return None;
        }
        let start = self.bases[mfirst];
        Some(start..start + chunk_count(self.nmax, mfirst, mlast))
    }

    /// Collective. Cross-rank validation of a distributed store; a no-op for
    /// local stores.
    pub fn check_distribution(&self) -> HarmResult<()> {
        let Some(comm) = &self.comm else {
            return Ok(());
        };
        check_all_equal(
            comm.as_ref(),
            &[self.nmax as u64, self.mu.to_bits(), self.r.to_bits()],
            "nmax, mu and r",
        )?;

        let counts = comm.all_gather_u64(&[self.chunks.len() as u64]);
        let widest = counts.iter().copied().max().unwrap_or(0) as usize;
        if widest == 0 {
            return Err(HarmError::invalid_argument(
                "INPUT.SHC_CHUNKS",
                "the number of chunks summed over all processes cannot be zero",
            ));
        }
        let mut padded = vec![u64::MAX; 2 * widest];
        for (slot, chunk) in padded.chunks_exact_mut(2).zip(&self.chunks) {
            slot[0] = chunk.mfirst as u64;
            slot[1] = chunk.mlast as u64;
        }
        let gathered = comm.all_gather_u64(&padded);
        let all: Vec<OrderChunk> = gathered
            .chunks_exact(2)
            .filter(|pair| pair[0] != u64::MAX)
            .map(|pair| OrderChunk::new(pair[0] as usize, pair[1] as usize))
            .collect();
        check_chunk_orders(self.nmax, &all, true)?;

        let total = comm.all_reduce_sum_u64(self.local_nc() as u64);
        if total as usize != self.nc() {
            return Err(HarmError::invalid_argument(
                "INPUT.SHC_CHUNKS",
                format!(
                    "local coefficient counts sum to {total} across processes, expected {}",
                    self.nc()
                ),
            ));
        }
        Ok(())
    }
}

fn validate_scalars(mu: f64, r: f64) -> HarmResult<()> {
    if !(r.is_finite() && r > 0.0) {
        return Err(HarmError::invalid_argument(
            "INPUT.SHC_RADIUS",
            format!("reference radius must be positive and finite, got {r}"),
        ));
    }
    if !mu.is_finite() {
        return Err(HarmError::invalid_argument(
            "INPUT.SHC_MU",
            format!("scaling constant must be finite, got {mu}"),
        ));
    }
    Ok(())
}

fn check_buffer_len(name: &str, actual: usize, expected: usize) -> HarmResult<()> {
    if actual != expected {
        return Err(HarmError::invalid_argument(
            "INPUT.SHC_BUFFER",
            format!("buffer '{name}' holds {actual} values, expected {expected}"),
        ));
    }
    Ok(())
}

fn zeroed(count: usize) -> HarmResult<Vec<f64>> {
    let mut buffer = Vec::new();
    buffer.try_reserve_exact(count)?;
    buffer.resize(count, 0.0);
    Ok(buffer)
}

/// Checks a chunk list: orders within `0..=nmax`, `mfirst <= mlast`, no
/// overlaps. With `check_gaps` the chunks must also cover `0..=nmax`.
pub fn check_chunk_orders(nmax: usize, chunks: &[OrderChunk], check_gaps: bool) -> HarmResult<()> {
    for chunk in chunks {
        if chunk.mfirst > nmax || chunk.mlast > nmax {
            return Err(HarmError::invalid_argument(
                "INPUT.SHC_CHUNKS",
                format!(
                    "chunk {}..={} exceeds nmax = {nmax}",
                    chunk.mfirst, chunk.mlast
                ),
            ));
        }
        if chunk.mfirst > chunk.mlast {
            return Err(HarmError::invalid_argument(
                "INPUT.SHC_CHUNKS",
                format!(
                    "chunk minimum order {} is larger than its maximum order {}",
                    chunk.mfirst, chunk.mlast
                ),
            ));
        }
    }

    let mut sorted = chunks.to_vec();
    sorted.sort_by_key(|chunk| chunk.mfirst);
    for pair in sorted.windows(2) {
        if pair[1].mfirst <= pair[0].mlast {
            return Err(HarmError::invalid_argument(
                "INPUT.SHC_CHUNKS",
                format!(
                    "chunks {}..={} and {}..={} overlap",
                    pair[0].mfirst, pair[0].mlast, pair[1].mfirst, pair[1].mlast
                ),
            ));
        }
    }

    if check_gaps {
        let mut next = 0;
        for chunk in &sorted {
            if chunk.mfirst != next {
                return Err(HarmError::invalid_argument(
                    "INPUT.SHC_CHUNKS",
                    format!("orders {next}..{} are not owned by any process", chunk.mfirst),
                ));
            }
            next = chunk.mlast + 1;
        }
        if next != nmax + 1 {
            return Err(HarmError::invalid_argument(
                "INPUT.SHC_CHUNKS",
                format!("orders {next}..={nmax} are not owned by any process"),
            ));
        }
    }
    Ok(())
}

/// Order chunks for `rank` out of `size` processes with `nchunk` chunks per
/// process, balanced by coefficient count and assigned cyclically. Ranks may
/// receive fewer chunks when `nmax + 1 < size * nchunk`.
pub fn distribute_orders(nmax: usize, rank: usize, size: usize, nchunk: usize) -> Vec<OrderChunk> {
    let pieces = (size.max(1) * nchunk.max(1)).min(nmax + 1);
    let total = coefficient_count(nmax);
    let mut all = Vec::with_capacity(pieces);
    let mut mfirst = 0;
    let mut accumulated = 0;
    for piece in 0..pieces {
        let remaining_pieces = pieces - piece;
        if remaining_pieces == 1 {
            all.push(OrderChunk::new(mfirst, nmax));
            break;
        }
        let target = (total * (piece + 1)).div_ceil(pieces);
        let mut mlast = mfirst;
        accumulated += order_count(nmax, mlast);
        // Leave at least one order for each remaining piece.
        while accumulated < target && nmax - mlast > remaining_pieces - 1 {
            mlast += 1;
            accumulated += order_count(nmax, mlast);
        }
        all.push(OrderChunk::new(mfirst, mlast));
        mfirst = mlast + 1;
    }
    all.into_iter()
        .enumerate()
        .filter(|(index, _)| index % size.max(1) == rank)
        .map(|(_, chunk)| chunk)
        .collect()
}
