//! Coefficient blocks: dense, rank-local copies of a contiguous order range
//! of a (possibly distributed) coefficient store.
//!
//! Synthesis walks orders upwards and calls [`CoefficientBlock::fetch`] each
//! time it leaves the current block; the rank owning the next order
//! broadcasts as many orders as fit into the block. Analysis uses
//! [`CoefficientBlock::open`] and [`CoefficientBlock::commit`], which sum the
//! partial contributions of every rank onto the owning rank. All three are
//! collective over the communicator.

use crate::common::constants::MAX_MESSAGE_COUNT;
use crate::domain::{HarmError, HarmResult};
use crate::modules::comm::Communicator;
use crate::modules::shc::{Shc, chunk_count, order_count};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Idle,
    Holding,
    Done,
}

#[derive(Debug)]
pub struct CoefficientBlock {
    nmax: usize,
    capacity: usize,
    c: Vec<f64>,
    s: Vec<f64>,
    mfirst: usize,
    mlast: usize,
    root: usize,
    state: BlockState,
    message_limit: usize,
}

impl CoefficientBlock {
    /// Block for orders of a sweep up to degree `nmax`. The buffer holds
    /// `multiplier * (nmax + 1)` coefficients, always at least one order.
    pub fn new(nmax: usize, multiplier: usize) -> HarmResult<Self> {
        let capacity = multiplier.max(1) * (nmax + 1);
        let mut c = Vec::new();
        c.try_reserve_exact(capacity)?;
        c.resize(capacity, 0.0);
        let s = c.clone();
        Ok(Self {
            nmax,
            capacity,
            c,
            s,
            mfirst: 0,
            mlast: 0,
            root: 0,
            state: BlockState::Idle,
            message_limit: MAX_MESSAGE_COUNT,
        })
    }

    #[cfg(test)]
    pub(crate) fn with_message_limit(mut self, limit: usize) -> Self {
        self.message_limit = limit.max(1);
        self
    }

    pub fn nmax(&self) -> usize {
        self.nmax
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn state(&self) -> BlockState {
        self.state
    }

    pub fn mfirst(&self) -> usize {
        self.mfirst
    }

    pub fn mlast(&self) -> usize {
        self.mlast
    }

    pub fn root(&self) -> usize {
        self.root
    }

    pub fn is_done(&self) -> bool {
        self.state == BlockState::Done
    }

    /// True when order `m` is currently loaded.
    pub fn holds(&self, m: usize) -> bool {
        self.state == BlockState::Holding && (self.mfirst..=self.mlast).contains(&m)
    }

    fn offset(&self, m: usize) -> usize {
        chunk_count(self.nmax, self.mfirst, m) - order_count(self.nmax, m)
    }

    /// `C` and `S` of order `m`, degrees `m..=nmax`.
    pub fn order(&self, m: usize) -> Option<(&[f64], &[f64])> {
        if !self.holds(m) {
            return None;
        }
        let start = self.offset(m);
        let end = start + order_count(self.nmax, m);
        Some((&self.c[start..end], &self.s[start..end]))
    }

    pub fn order_mut(&mut self, m: usize) -> Option<(&mut [f64], &mut [f64])> {
        if !self.holds(m) {
            return None;
        }
        let start = self.offset(m);
        let end = start + order_count(self.nmax, m);
        Some((&mut self.c[start..end], &mut self.s[start..end]))
    }

    fn used(&self) -> usize {
        chunk_count(self.nmax, self.mfirst, self.mlast)
    }

    /// Collective. Finds the single rank owning order `m` and the last order
    /// of the new block; every rank receives the same answer or the same
    /// failure.
    fn locate(&mut self, comm: &dyn Communicator, shc: &Shc, m: usize) -> HarmResult<()> {
        if m > self.nmax {
            return Err(HarmError::invalid_argument(
                "INPUT.BLOCK_ORDER",
                format!("order {m} exceeds the block degree {}", self.nmax),
            ));
        }
        let claims = comm.all_gather_u64(&[u64::from(shc.has_order(m))]);
        let owners: Vec<usize> = claims
            .iter()
            .enumerate()
            .filter_map(|(rank, claim)| (*claim != 0).then_some(rank))
            .collect();
        let [root] = owners[..] else {
            return Err(HarmError::distributed(
                "MPI.ORDER_OWNER",
                format!(
                    "order {m} must be owned by exactly one process, claimed by {owners:?}"
                ),
            ));
        };

        let mut mlast = [0u64];
        if comm.rank() == root {
            let chunk_end = shc.chunk_of(m).map_or(m, |chunk| chunk.mlast);
            let mut last = m;
            let mut used = order_count(self.nmax, m);
            while last < chunk_end.min(self.nmax) {
                let next = order_count(self.nmax, last + 1);
                if used + next > self.capacity {
                    break;
                }
                used += next;
                last += 1;
            }
            mlast[0] = last as u64;
        }
        comm.broadcast_u64(&mut mlast, root);

        self.mfirst = m;
        self.mlast = mlast[0] as usize;
        self.root = root;
        self.state = BlockState::Holding;
        trace!(
            mfirst = self.mfirst,
            mlast = self.mlast,
            root = self.root,
            "coefficient block moved"
        );
        Ok(())
    }

    /// Collective. Loads orders starting at `m` from the owning rank.
    pub fn fetch(&mut self, comm: &dyn Communicator, shc: &Shc, m: usize) -> HarmResult<()> {
        self.locate(comm, shc, m)?;
        let used = self.used();
        if comm.rank() == self.root {
            let mut position = 0;
            for order in self.mfirst..=self.mlast {
                let len = order_count(self.nmax, order);
                if let (Some(c), Some(s)) = (shc.c_order(order), shc.s_order(order)) {
                    self.c[position..position + len].copy_from_slice(&c[..len]);
                    self.s[position..position + len].copy_from_slice(&s[..len]);
                }
                position += len;
            }
        }
        for range in pieces(used, self.message_limit) {
            comm.broadcast_f64(&mut self.c[range.clone()], self.root);
            comm.broadcast_f64(&mut self.s[range], self.root);
        }
        Ok(())
    }

    /// Collective. Starts an empty block at order `m` for accumulation.
    pub fn open(&mut self, comm: &dyn Communicator, shc: &Shc, m: usize) -> HarmResult<()> {
        self.locate(comm, shc, m)?;
        let used = self.used();
        self.c[..used].fill(0.0);
        self.s[..used].fill(0.0);
        Ok(())
    }

    /// Collective. Sums the block over all ranks onto the owning rank and
    /// adds the result into its store.
    pub fn commit(&mut self, comm: &dyn Communicator, shc: &mut Shc) -> HarmResult<()> {
        if self.state != BlockState::Holding {
            return Ok(());
        }
        let used = self.used();
        for range in pieces(used, self.message_limit) {
            comm.reduce_sum_f64(&mut self.c[range.clone()], self.root);
            comm.reduce_sum_f64(&mut self.s[range], self.root);
        }
        let mut failure = None;
        if comm.rank() == self.root {
            let mut position = 0;
            for order in self.mfirst..=self.mlast {
                let len = order_count(self.nmax, order);
                match shc.order_mut(order) {
                    Some((c, s)) => {
                        for (target, value) in c.iter_mut().zip(&self.c[position..position + len]) {
                            *target += value;
                        }
                        if order > 0 {
                            for (target, value) in
                                s.iter_mut().zip(&self.s[position..position + len])
                            {
                                *target += value;
                            }
                        }
                    }
                    None => {
                        failure = Some(HarmError::distributed(
                            "MPI.ORDER_OWNER",
                            format!("order {order} vanished from its owning process"),
                        ));
                        break;
                    }
                }
                position += len;
            }
        }
        self.c[..used].fill(0.0);
        self.s[..used].fill(0.0);
        trace!(mfirst = self.mfirst, mlast = self.mlast, root = self.root, "coefficient block committed");
        self.state = if self.mlast >= self.nmax {
            BlockState::Done
        } else {
            BlockState::Idle
        };
        failure.map_or(Ok(()), Err)
    }

    /// Marks the sweep as finished once the last order has been used.
    pub fn finish(&mut self) {
        self.state = BlockState::Done;
        trace!(nmax = self.nmax, "coefficient block done");
    }
}

/// Splits `0..len` into consecutive ranges of at most `limit` elements.
pub(crate) fn pieces(len: usize, limit: usize) -> impl Iterator<Item = std::ops::Range<usize>> {
    let limit = limit.max(1);
    (0..len.div_ceil(limit)).map(move |index| {
        let start = index * limit;
        start..(start + limit).min(len)
    })
}

#[cfg(test)]
mod tests {
    use super::{BlockState, CoefficientBlock, pieces};
    use crate::domain::HarmErrorKind;
    use crate::modules::comm::{LocalCluster, SingleProcess};
    use crate::modules::shc::{OrderChunk, Shc, distribute_orders};

    fn filled(nmax: usize) -> Shc {
        let mut shc = Shc::calloc(nmax, 1.0, 1.0).expect("calloc");
        for n in 0..=nmax {
            for m in 0..=n {
                shc.set_coeffs(n, m, (10 * n + m) as f64, -((10 * n + m) as f64))
                    .expect("set");
            }
        }
        shc
    }

    #[test]
    fn pieces_cover_the_buffer() {
        let ranges: Vec<_> = pieces(7, 3).collect();
        assert_eq!(ranges, vec![0..3, 3..6, 6..7]);
        assert_eq!(pieces(0, 3).count(), 0);
    }

    #[test]
    fn fetch_walks_orders_within_capacity() {
        let shc = filled(5);
        let mut block = CoefficientBlock::new(4, 1).expect("block");
        assert_eq!(block.capacity(), 5);
        block.fetch(&SingleProcess, &shc, 0).expect("fetch");
        assert_eq!((block.mfirst(), block.mlast()), (0, 0));
        block.fetch(&SingleProcess, &shc, 1).expect("fetch");
        assert_eq!((block.mfirst(), block.mlast()), (1, 1));
        block.fetch(&SingleProcess, &shc, 2).expect("fetch");
        assert_eq!((block.mfirst(), block.mlast()), (2, 3));
        let (c, s) = block.order(3).expect("order 3");
        assert_eq!(c, &[33.0, 43.0]);
        assert_eq!(s, &[-33.0, -43.0]);
        assert!(block.order(1).is_none());
    }

    #[test]
    fn distributed_fetch_matches_local_values() {
        let nmax = 9;
        let results = LocalCluster::run(3, move |comm| {
            let full = filled(nmax);
            let chunks = distribute_orders(nmax, comm.rank(), comm.size(), 2);
            let shc = Shc::distribute_from(&full, &chunks, comm.clone()).expect("distribute");
            let mut block = CoefficientBlock::new(nmax, 2)
                .expect("block")
                .with_message_limit(4);
            let mut seen = Vec::new();
            for m in 0..=nmax {
                if !block.holds(m) {
                    block.fetch(comm.as_ref(), &shc, m).expect("fetch");
                }
                let (c, _) = block.order(m).expect("order");
                seen.push(c.to_vec());
            }
            seen
        });
        let full = filled(nmax);
        for seen in results {
            for (m, c) in seen.iter().enumerate() {
                assert_eq!(c.as_slice(), full.c_order(m).expect("order"));
            }
        }
    }

    #[test]
    fn commit_sums_contributions_onto_the_owner() {
        let nmax = 4;
        let results = LocalCluster::run(2, move |comm| {
            let chunks = if comm.rank() == 0 {
                vec![OrderChunk::new(0, 1)]
            } else {
                vec![OrderChunk::new(2, 4)]
            };
            let mut shc =
                Shc::calloc_distributed(nmax, 1.0, 1.0, &chunks, comm.clone()).expect("calloc");
            let mut block = CoefficientBlock::new(nmax, 3).expect("block");
            for m in 0..=nmax {
                if !block.holds(m) {
                    block.commit(comm.as_ref(), &mut shc).expect("commit");
                    block.open(comm.as_ref(), &shc, m).expect("open");
                }
                let (c, s) = block.order_mut(m).expect("order");
                c[0] += 1.0;
                s[0] += 2.0;
            }
            block.commit(comm.as_ref(), &mut shc).expect("commit");
            assert_eq!(block.state(), BlockState::Done);
            shc.gather().expect("gather")
        });
        for shc in results {
            for m in 0..=nmax {
                let (c, s) = shc.coeffs(m, m).expect("coeffs");
                assert_eq!(c, 2.0);
                assert_eq!(s, if m == 0 { 0.0 } else { 4.0 });
            }
        }
    }

    #[test]
    fn duplicate_owners_fail_on_every_rank() {
        let results = LocalCluster::run(2, |comm| {
            // Local stores claim every order on both ranks.
            let shc = filled(3);
            let mut block = CoefficientBlock::new(3, 1).expect("block");
            block.fetch(comm.as_ref(), &shc, 0)
        });
        for result in results {
            let error = result.expect_err("two owners");
            assert_eq!(error.kind(), HarmErrorKind::DistributedConsistency);
            assert_eq!(error.code(), "MPI.ORDER_OWNER");
        }
    }

    #[test]
    fn orders_beyond_the_block_degree_are_rejected() {
        let shc = filled(3);
        let mut block = CoefficientBlock::new(2, 1).expect("block");
        let error = block
            .fetch(&SingleProcess, &shc, 3)
            .expect_err("order 3 is outside the block");
        assert_eq!(error.kind(), HarmErrorKind::InvalidArgument);
    }
}
