//! Message-passing seam for distributed coefficient and grid handling.
//!
//! Every collective in the crate goes through [`Communicator`]. Three backends
//! exist: [`SingleProcess`] (size one, every collective is the identity),
//! [`LocalCluster`] (ranks simulated by threads sharing a mailbox) and, with the
//! `mpi` feature, `MpiCommunicator`.

use crate::domain::{HarmError, HarmResult};
use std::sync::{Arc, Barrier, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub trait Communicator: Send + Sync {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    fn barrier(&self);
    fn broadcast_f64(&self, buffer: &mut [f64], root: usize);
    fn broadcast_u64(&self, buffer: &mut [u64], root: usize);
    /// Rank-major concatenation of `local` from every rank. All ranks must pass
    /// slices of equal length.
    fn all_gather_u64(&self, local: &[u64]) -> Vec<u64>;
    /// Element-wise sum into `buffer` on `root`; other ranks keep their input.
    fn reduce_sum_f64(&self, buffer: &mut [f64], root: usize);
    fn all_reduce_sum_f64(&self, buffer: &mut [f64]);

    fn all_reduce_or(&self, flag: bool) -> bool {
        self.all_gather_u64(&[u64::from(flag)])
            .iter()
            .any(|value| *value != 0)
    }

    fn all_reduce_sum_u64(&self, value: u64) -> u64 {
        self.all_gather_u64(&[value]).iter().sum()
    }
}

pub type SharedCommunicator = Arc<dyn Communicator>;

/// Size-one communicator.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl Communicator for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) {}

    fn broadcast_f64(&self, _buffer: &mut [f64], _root: usize) {}

    fn broadcast_u64(&self, _buffer: &mut [u64], _root: usize) {}

    fn all_gather_u64(&self, local: &[u64]) -> Vec<u64> {
        local.to_vec()
    }

    fn reduce_sum_f64(&self, _buffer: &mut [f64], _root: usize) {}

    fn all_reduce_sum_f64(&self, _buffer: &mut [f64]) {}
}

#[derive(Debug, Clone, Default)]
enum Payload {
    #[default]
    Empty,
    F64(Vec<f64>),
    U64(Vec<u64>),
}

#[derive(Debug)]
struct Mailbox {
    slots: Mutex<Vec<Payload>>,
    barrier: Barrier,
}

impl Mailbox {
    fn slots(&self) -> MutexGuard<'_, Vec<Payload>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// One rank of a [`LocalCluster`].
#[derive(Debug, Clone)]
pub struct LocalRank {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
}

impl LocalRank {
    fn exchange(&self, payload: Payload) -> Vec<Payload> {
        self.mailbox.slots()[self.rank] = payload;
        self.mailbox.barrier.wait();
        let all = self.mailbox.slots().clone();
        self.mailbox.barrier.wait();
        all
    }

    fn sum_f64(all: &[Payload], len: usize) -> Vec<f64> {
        // Rank order keeps the result identical on every rank.
        let mut sum = vec![0.0; len];
        for payload in all {
            if let Payload::F64(values) = payload {
                for (total, value) in sum.iter_mut().zip(values) {
                    *total += value;
                }
            }
        }
        sum
    }
}

impl Communicator for LocalRank {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) {
        self.mailbox.barrier.wait();
    }

    fn broadcast_f64(&self, buffer: &mut [f64], root: usize) {
        let payload = if self.rank == root {
            Payload::F64(buffer.to_vec())
        } else {
            Payload::Empty
        };
        let all = self.exchange(payload);
        if let Some(Payload::F64(values)) = all.get(root) {
            buffer.copy_from_slice(values);
        }
    }

    fn broadcast_u64(&self, buffer: &mut [u64], root: usize) {
        let payload = if self.rank == root {
            Payload::U64(buffer.to_vec())
        } else {
            Payload::Empty
        };
        let all = self.exchange(payload);
        if let Some(Payload::U64(values)) = all.get(root) {
            buffer.copy_from_slice(values);
        }
    }

    fn all_gather_u64(&self, local: &[u64]) -> Vec<u64> {
        self.exchange(Payload::U64(local.to_vec()))
            .into_iter()
            .flat_map(|payload| match payload {
                Payload::U64(values) => values,
                _ => Vec::new(),
            })
            .collect()
    }

    fn reduce_sum_f64(&self, buffer: &mut [f64], root: usize) {
        let all = self.exchange(Payload::F64(buffer.to_vec()));
        if self.rank == root {
            buffer.copy_from_slice(&Self::sum_f64(&all, buffer.len()));
        }
    }

    fn all_reduce_sum_f64(&self, buffer: &mut [f64]) {
        let all = self.exchange(Payload::F64(buffer.to_vec()));
        buffer.copy_from_slice(&Self::sum_f64(&all, buffer.len()));
    }
}

/// Runs `size` simulated ranks on scoped threads.
#[derive(Debug, Clone, Copy)]
pub struct LocalCluster;

impl LocalCluster {
    /// Calls `body` once per rank and returns the results in rank order.
    pub fn run<T, F>(size: usize, body: F) -> Vec<T>
    where
        T: Send,
        F: Fn(SharedCommunicator) -> T + Sync,
    {
        let size = size.max(1);
        let mailbox = Arc::new(Mailbox {
            slots: Mutex::new(vec![Payload::Empty; size]),
            barrier: Barrier::new(size),
        });
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..size)
                .map(|rank| {
                    let comm: SharedCommunicator = Arc::new(LocalRank {
                        rank,
                        size,
                        mailbox: Arc::clone(&mailbox),
                    });
                    let body = &body;
                    scope.spawn(move || body(comm))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
                })
                .collect()
        })
    }
}

#[cfg(feature = "mpi")]
pub use mpi_backend::MpiCommunicator;

#[cfg(feature = "mpi")]
mod mpi_backend {
    use super::Communicator;
    use mpi::collective::SystemOperation;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    /// World communicator. `mpi::initialize()` must have been called and the
    /// universe kept alive for as long as this value is used.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct MpiCommunicator;

    impl Communicator for MpiCommunicator {
        fn rank(&self) -> usize {
            SimpleCommunicator::world().rank() as usize
        }

        fn size(&self) -> usize {
            SimpleCommunicator::world().size() as usize
        }

        fn barrier(&self) {
            SimpleCommunicator::world().barrier();
        }

        fn broadcast_f64(&self, buffer: &mut [f64], root: usize) {
            let world = SimpleCommunicator::world();
            world.process_at_rank(root as i32).broadcast_into(buffer);
        }

        fn broadcast_u64(&self, buffer: &mut [u64], root: usize) {
            let world = SimpleCommunicator::world();
            world.process_at_rank(root as i32).broadcast_into(buffer);
        }

        fn all_gather_u64(&self, local: &[u64]) -> Vec<u64> {
            let world = SimpleCommunicator::world();
            let mut gathered = vec![0u64; local.len() * world.size() as usize];
            world.all_gather_into(local, &mut gathered[..]);
            gathered
        }

        fn reduce_sum_f64(&self, buffer: &mut [f64], root: usize) {
            let world = SimpleCommunicator::world();
            let root_process = world.process_at_rank(root as i32);
            let send = buffer.to_vec();
            if world.rank() as usize == root {
                root_process.reduce_into_root(&send[..], buffer, SystemOperation::sum());
            } else {
                root_process.reduce_into(&send[..], SystemOperation::sum());
            }
        }

        fn all_reduce_sum_f64(&self, buffer: &mut [f64]) {
            let world = SimpleCommunicator::world();
            let send = buffer.to_vec();
            world.all_reduce_into(&send[..], buffer, SystemOperation::sum());
        }
    }
}

/// Makes every rank fail when any rank failed, so later collectives stay
/// paired. The failing rank keeps its own error.
pub fn agree<T>(comm: &dyn Communicator, local: HarmResult<T>) -> HarmResult<T> {
    let flags = comm.all_gather_u64(&[u64::from(local.is_err())]);
    let failing: Vec<usize> = flags
        .iter()
        .enumerate()
        .filter_map(|(rank, flag)| (*flag != 0).then_some(rank))
        .collect();
    match local {
        Err(error) => Err(error),
        Ok(_) if !failing.is_empty() => Err(HarmError::distributed(
            "MPI.PEER_FAILURE",
            format!("process(es) {failing:?} reported an error"),
        )),
        Ok(value) => Ok(value),
    }
}

/// Collective. Fails on every rank unless `local` is identical on all ranks.
pub fn check_all_equal(comm: &dyn Communicator, local: &[u64], what: &str) -> HarmResult<()> {
    let gathered = comm.all_gather_u64(local);
    if gathered.chunks_exact(local.len().max(1)).all(|values| values == local) {
        return Ok(());
    }
    Err(HarmError::distributed(
        "MPI.NOT_EQUAL",
        format!("{what} must be equal on all processes"),
    ))
}

/// Barrier-synchronized section executed by one designated worker.
///
/// Workers of a team share a value behind a lock. [`SingleWriter::exclusive`]
/// lines the team up, lets the writer mutate the value (typically through a
/// collective call) and releases everyone once the writer is done.
#[derive(Debug)]
pub struct SingleWriter<S> {
    state: RwLock<S>,
    barrier: Barrier,
    writer: usize,
}

impl<S> SingleWriter<S> {
    pub fn new(workers: usize, state: S) -> Self {
        Self {
            state: RwLock::new(state),
            barrier: Barrier::new(workers.max(1)),
            writer: 0,
        }
    }

    pub fn is_writer(&self, worker: usize) -> bool {
        worker == self.writer
    }

    pub fn exclusive<F>(&self, worker: usize, f: F)
    where
        F: FnOnce(&mut S),
    {
        self.barrier.wait();
        if self.is_writer(worker) {
            f(&mut self.write());
        }
        self.barrier.wait();
    }

    pub fn read(&self) -> RwLockReadGuard<'_, S> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, S> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn into_inner(self) -> S {
        self.state
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::{Communicator, LocalCluster, SingleProcess, SingleWriter, agree};
    use crate::domain::{HarmError, HarmErrorKind};

    #[test]
    fn single_process_collectives_are_identity() {
        let comm = SingleProcess;
        let mut values = [1.0, 2.0];
        comm.reduce_sum_f64(&mut values, 0);
        comm.all_reduce_sum_f64(&mut values);
        assert_eq!(values, [1.0, 2.0]);
        assert_eq!(comm.all_gather_u64(&[7]), vec![7]);
        assert!(comm.all_reduce_or(true));
    }

    #[test]
    fn local_cluster_collectives_match_across_ranks() {
        let results = LocalCluster::run(3, |comm| {
            let rank = comm.rank();
            let mut bcast = [rank as f64; 2];
            comm.broadcast_f64(&mut bcast, 2);

            let mut reduced = [rank as f64 + 1.0];
            comm.reduce_sum_f64(&mut reduced, 1);

            let mut all = [1.0, rank as f64];
            comm.all_reduce_sum_f64(&mut all);

            let gathered = comm.all_gather_u64(&[rank as u64, 10]);
            (bcast, reduced[0], all, gathered)
        });

        for (rank, (bcast, reduced, all, gathered)) in results.iter().enumerate() {
            assert_eq!(*bcast, [2.0, 2.0]);
            if rank == 1 {
                assert_eq!(*reduced, 6.0);
            } else {
                assert_eq!(*reduced, rank as f64 + 1.0);
            }
            assert_eq!(*all, [3.0, 3.0]);
            assert_eq!(*gathered, vec![0, 10, 1, 10, 2, 10]);
        }
    }

    #[test]
    fn agree_fails_every_rank_when_one_fails() {
        let results = LocalCluster::run(3, |comm| {
            let local = if comm.rank() == 1 {
                Err(HarmError::invalid_argument("INPUT.TEST", "bad input"))
            } else {
                Ok(comm.rank())
            };
            agree(comm.as_ref(), local)
        });
        assert_eq!(
            results[1].as_ref().map_err(HarmError::code),
            Err("INPUT.TEST")
        );
        for rank in [0, 2] {
            let error = results[rank].as_ref().expect_err("peer failure must propagate");
            assert_eq!(error.kind(), HarmErrorKind::DistributedConsistency);
        }
    }

    #[test]
    fn single_writer_publishes_to_all_workers() {
        let team = SingleWriter::new(4, 0usize);
        let seen: Vec<usize> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|worker| {
                    let team = &team;
                    scope.spawn(move || {
                        let mut observed = 0;
                        for step in 1..=3 {
                            team.exclusive(worker, |value| *value += step);
                            observed = *team.read();
                        }
                        observed
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("worker should finish"))
                .collect()
        });
        assert_eq!(seen, vec![6; 4]);
        assert_eq!(team.into_inner(), 6);
    }
}
