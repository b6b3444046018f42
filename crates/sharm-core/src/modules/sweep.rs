//! Order sweep shared by synthesis and analysis.
//!
//! Orders `0..=nmax` are visited strictly increasing. At every order one
//! worker of the team moves the coefficient block (a collective call when the
//! store is distributed) while the others wait; afterwards every worker runs
//! its own rows against the order. Rows are dealt to workers cyclically so
//! rows near the poles, which carry fewer significant orders, spread evenly.

use crate::domain::{HarmError, HarmResult};
use crate::modules::block::CoefficientBlock;
use crate::modules::comm::{Communicator, SingleWriter};
use crate::modules::leg::{LegendreTables, OrderRecursion};
use crate::modules::shc::Shc;
use std::sync::{Mutex, MutexGuard};

/// Per-row state fed with the coefficients of one order at a time.
pub(crate) trait SynthesisRow: Send {
    fn add_order(&mut self, rec: &OrderRecursion, tables: &LegendreTables, c: &[f64], s: &[f64]);
}

/// Per-row state adding its contribution to the coefficients of one order.
pub(crate) trait AnalysisRow: Send {
    fn add_order(
        &mut self,
        rec: &OrderRecursion,
        tables: &LegendreTables,
        c: &mut [f64],
        s: &mut [f64],
    );
}

pub(crate) struct Sweep<'a> {
    pub comm: &'a dyn Communicator,
    pub nmax: usize,
    pub multiplier: usize,
    pub workers: usize,
}

fn split_cyclic<W>(rows: Vec<W>, workers: usize) -> Vec<Vec<(usize, W)>> {
    let mut parts: Vec<Vec<(usize, W)>> = (0..workers).map(|_| Vec::new()).collect();
    for (index, row) in rows.into_iter().enumerate() {
        parts[index % workers].push((index, row));
    }
    parts
}

fn merge_cyclic<W>(parts: Vec<Vec<(usize, W)>>) -> Vec<W> {
    let mut all: Vec<(usize, W)> = parts.into_iter().flatten().collect();
    all.sort_by_key(|(index, _)| *index);
    all.into_iter().map(|(_, row)| row).collect()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct SynthesisState {
    block: CoefficientBlock,
    rec: Option<OrderRecursion>,
    failure: Option<HarmError>,
}

struct AnalysisState<'s> {
    block: CoefficientBlock,
    shc: &'s mut Shc,
    rec: Option<OrderRecursion>,
    failure: Option<HarmError>,
}

#[derive(Default)]
struct Partial {
    c: Vec<f64>,
    s: Vec<f64>,
}

impl Sweep<'_> {
    fn team_size(&self, rows: usize) -> usize {
        self.workers.clamp(1, rows.max(1))
    }

    /// Collective. Feeds every order of `shc` up to `self.nmax` to all rows.
    pub(crate) fn synthesize<W: SynthesisRow>(&self, shc: &Shc, rows: Vec<W>) -> HarmResult<Vec<W>> {
        let tables = LegendreTables::new(self.nmax);
        let workers = self.team_size(rows.len());
        let team = SingleWriter::new(
            workers,
            SynthesisState {
                block: CoefficientBlock::new(self.nmax, self.multiplier)?,
                rec: None,
                failure: None,
            },
        );
        let mut parts = split_cyclic(rows, workers);
        std::thread::scope(|scope| {
            for (worker, part) in parts.iter_mut().enumerate() {
                let (team, tables) = (&team, &tables);
                scope.spawn(move || self.synthesis_worker(worker, team, tables, shc, part));
            }
        });
        let mut state = team.into_inner();
        if let Some(error) = state.failure.take() {
            return Err(error);
        }
        state.block.finish();
        Ok(merge_cyclic(parts))
    }

    fn synthesis_worker<W: SynthesisRow>(
        &self,
        worker: usize,
        team: &SingleWriter<SynthesisState>,
        tables: &LegendreTables,
        shc: &Shc,
        rows: &mut [(usize, W)],
    ) {
        for m in 0..=self.nmax {
            team.exclusive(worker, |state| {
                if state.failure.is_some() {
                    return;
                }
                if !state.block.holds(m) {
                    if let Err(error) = state.block.fetch(self.comm, shc, m) {
                        state.failure = Some(error);
                        return;
                    }
                }
                state.rec = Some(tables.order(m));
            });
            let state = team.read();
            if state.failure.is_some() {
                break;
            }
            let (Some(rec), Some((c, s))) = (state.rec.as_ref(), state.block.order(m)) else {
                break;
            };
            for (_, row) in rows.iter_mut() {
                row.add_order(rec, tables, c, s);
            }
        }
    }

    /// Collective. Adds the contributions of all rows into `shc`, order by
    /// order, summing over ranks onto the owner of each order.
    pub(crate) fn analyze<W: AnalysisRow>(&self, shc: &mut Shc, rows: Vec<W>) -> HarmResult<()> {
        let tables = LegendreTables::new(self.nmax);
        let workers = self.team_size(rows.len());
        let team = SingleWriter::new(
            workers,
            AnalysisState {
                block: CoefficientBlock::new(self.nmax, self.multiplier)?,
                shc,
                rec: None,
                failure: None,
            },
        );
        let partials: Vec<Mutex<Partial>> = (0..workers).map(|_| Mutex::default()).collect();
        let mut parts = split_cyclic(rows, workers);
        std::thread::scope(|scope| {
            for (worker, part) in parts.iter_mut().enumerate() {
                let (team, tables, partials) = (&team, &tables, &partials);
                scope.spawn(move || self.analysis_worker(worker, team, tables, partials, part));
            }
        });
        let mut state = team.into_inner();
        match state.failure.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Adds the per-worker partial sums of order `m` into the block, in worker
    /// order so repeated runs give identical sums.
    fn flush(state: &mut AnalysisState<'_>, partials: &[Mutex<Partial>], m: usize) {
        let Some((c, s)) = state.block.order_mut(m) else {
            return;
        };
        for partial in partials {
            let partial = lock(partial);
            for (target, value) in c.iter_mut().zip(&partial.c) {
                *target += value;
            }
            for (target, value) in s.iter_mut().zip(&partial.s) {
                *target += value;
            }
        }
    }

    fn analysis_worker<W: AnalysisRow>(
        &self,
        worker: usize,
        team: &SingleWriter<AnalysisState<'_>>,
        tables: &LegendreTables,
        partials: &[Mutex<Partial>],
        rows: &mut [(usize, W)],
    ) {
        let comm = self.comm;
        for m in 0..=self.nmax {
            team.exclusive(worker, |state| {
                if state.failure.is_some() {
                    return;
                }
                if m > 0 {
                    Self::flush(state, partials, m - 1);
                }
                if !state.block.holds(m) {
                    let moved = state
                        .block
                        .commit(comm, state.shc)
                        .and_then(|()| state.block.open(comm, state.shc, m));
                    if let Err(error) = moved {
                        state.failure = Some(error);
                        return;
                    }
                }
                state.rec = Some(tables.order(m));
                let len = self.nmax + 1 - m;
                for partial in partials {
                    let mut partial = lock(partial);
                    partial.c.clear();
                    partial.c.resize(len, 0.0);
                    partial.s.clear();
                    partial.s.resize(len, 0.0);
                }
            });
            let state = team.read();
            if state.failure.is_some() {
                break;
            }
            let Some(rec) = state.rec.as_ref() else {
                break;
            };
            let mut partial = lock(&partials[worker]);
            let Partial { c, s } = &mut *partial;
            for (_, row) in rows.iter_mut() {
                row.add_order(rec, tables, c, s);
            }
        }

        team.exclusive(worker, |state| {
            if state.failure.is_some() {
                return;
            }
            Self::flush(state, partials, self.nmax);
            match state.block.commit(comm, state.shc) {
                Ok(()) => state.block.finish(),
                Err(error) => state.failure = Some(error),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::{AnalysisRow, Sweep, SynthesisRow, merge_cyclic, split_cyclic};
    use crate::modules::comm::{LocalCluster, SingleProcess};
    use crate::modules::leg::{LegendreTables, OrderRecursion};
    use crate::modules::shc::{Shc, distribute_orders};

    /// Sums `C_nm` of every order it sees.
    struct Summer {
        total: f64,
        orders: Vec<usize>,
    }

    impl SynthesisRow for Summer {
        fn add_order(&mut self, rec: &OrderRecursion, _: &LegendreTables, c: &[f64], _: &[f64]) {
            self.orders.push(rec.m());
            self.total += c.iter().sum::<f64>();
        }
    }

    /// Adds one to `C_nm` and two to `S_nm` of every degree.
    struct Counter;

    impl AnalysisRow for Counter {
        fn add_order(
            &mut self,
            _: &OrderRecursion,
            _: &LegendreTables,
            c: &mut [f64],
            s: &mut [f64],
        ) {
            c.iter_mut().for_each(|value| *value += 1.0);
            s.iter_mut().for_each(|value| *value += 2.0);
        }
    }

    fn ones(nmax: usize) -> Shc {
        let mut shc = Shc::calloc(nmax, 1.0, 1.0).expect("calloc");
        for n in 0..=nmax {
            for m in 0..=n {
                shc.set_coeffs(n, m, 1.0, 1.0).expect("set");
            }
        }
        shc
    }

    #[test]
    fn cyclic_split_round_trips() {
        let parts = split_cyclic((0..7).collect::<Vec<_>>(), 3);
        assert_eq!(parts[1].iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![1, 4]);
        assert_eq!(merge_cyclic(parts), (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn every_row_sees_every_order_once() {
        let nmax = 6;
        let shc = ones(nmax);
        let sweep = Sweep {
            comm: &SingleProcess,
            nmax,
            multiplier: 1,
            workers: 3,
        };
        let rows: Vec<Summer> = (0..5)
            .map(|_| Summer {
                total: 0.0,
                orders: Vec::new(),
            })
            .collect();
        let rows = sweep.synthesize(&shc, rows).expect("sweep");
        assert_eq!(rows.len(), 5);
        for row in rows {
            assert_eq!(row.orders, (0..=nmax).collect::<Vec<_>>());
            assert_eq!(row.total, 28.0);
        }
    }

    #[test]
    fn distributed_analysis_sums_over_ranks_and_rows() {
        let nmax = 5;
        let results = LocalCluster::run(3, move |comm| {
            let chunks = distribute_orders(nmax, comm.rank(), comm.size(), 1);
            let mut shc =
                Shc::calloc_distributed(nmax, 1.0, 1.0, &chunks, comm.clone()).expect("calloc");
            let sweep = Sweep {
                comm: comm.as_ref(),
                nmax,
                multiplier: 1,
                workers: 2,
            };
            sweep
                .analyze(&mut shc, vec![Counter, Counter])
                .expect("analysis");
            shc.gather().expect("gather")
        });
        for shc in results {
            for n in 0..=nmax {
                for m in 0..=n {
                    let (c, s) = shc.coeffs(n, m).expect("coeffs");
                    assert_eq!(c, 6.0);
                    assert_eq!(s, if m == 0 { 0.0 } else { 12.0 });
                }
            }
        }
    }

    #[test]
    fn ranks_without_rows_still_take_part() {
        let nmax = 4;
        let results = LocalCluster::run(2, move |comm| {
            let chunks = distribute_orders(nmax, comm.rank(), comm.size(), 2);
            let full = ones(nmax);
            let shc = Shc::distribute_from(&full, &chunks, comm.clone()).expect("distribute");
            let sweep = Sweep {
                comm: comm.as_ref(),
                nmax,
                multiplier: 2,
                workers: 4,
            };
            let rows = if comm.rank() == 0 {
                vec![Summer {
                    total: 0.0,
                    orders: Vec::new(),
                }]
            } else {
                Vec::new()
            };
            sweep
                .synthesize(&shc, rows)
                .expect("sweep")
                .iter()
                .map(|row| row.total)
                .collect::<Vec<_>>()
        });
        assert_eq!(results[0], vec![15.0]);
        assert!(results[1].is_empty());
    }
}
