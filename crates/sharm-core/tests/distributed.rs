mod common;

use common::assert_scalar_close;
use sharm_core::common::SessionConfig;
use sharm_core::domain::HarmErrorKind;
use sharm_core::modules::crd::{PointKind, PointSet, RowChunk};
use sharm_core::modules::shc::{Shc, distribute_orders};
use sharm_core::modules::{CellSet, LocalCluster, Session, sha, shs};

fn model(nmax: usize) -> Shc {
    let mut shc = Shc::calloc(nmax, 1.5, 1.0).expect("store should be allocated");
    for n in 0..=nmax {
        for m in 0..=n {
            let decay = 1.0 / (n + 1) as f64;
            let c = decay * (0.5 * n as f64 - 0.8 * m as f64 + 0.3).sin();
            let s = if m == 0 { 0.0 } else { decay * (1.4 * n as f64 + 0.2 * m as f64).cos() };
            shc.set_coeffs(n, m, c, s).expect("coefficient should be set");
        }
    }
    shc
}

fn session(comm: sharm_core::modules::SharedCommunicator, multiplier: usize) -> Session {
    Session::distributed(SessionConfig::default().with_block_multiplier(multiplier), comm)
        .expect("session should be valid")
}

/// Local rows of each rank checked against the matching rows of a full
/// single-process synthesis.
fn assert_rows_match(full: &PointSet, reference: &[f64], lat: &[f64], values: &[f64]) {
    let width = full.row_width();
    assert_eq!(values.len(), lat.len() * width);
    let scale = reference.iter().fold(1.0_f64, |acc, v| acc.max(v.abs()));
    for (row, latitude) in lat.iter().enumerate() {
        let global = full
            .lat()
            .iter()
            .position(|other| other.to_bits() == latitude.to_bits())
            .expect("local latitude should belong to the full grid");
        let expected = &reference[global * width..(global + 1) * width];
        let actual = &values[row * width..(row + 1) * width];
        for (a, b) in actual.iter().zip(expected) {
            assert_scalar_close(&format!("row {global}"), *b, *a, 1.0e-13 * scale, 0.0);
        }
    }
}

#[test]
fn distributed_synthesis_matches_single_process() {
    let nmax = 8;
    let shc = model(nmax);
    let full = PointSet::gl(nmax, 1.3).expect("grid should be built");
    let reference = shs::point(&full, &shc, nmax, &Session::default()).expect("reference");

    // 9 rows with the equator at row 4.
    let partitions: Vec<Vec<RowChunk>> = vec![
        vec![
            RowChunk { local_0_start: 0, local_nlat: 4 },
            RowChunk { local_0_start: 2, local_nlat: 4 },
            RowChunk { local_0_start: 4, local_nlat: 1 },
        ],
        vec![
            RowChunk { local_0_start: 0, local_nlat: 9 },
            RowChunk { local_0_start: 0, local_nlat: 0 },
        ],
    ];
    for chunks in &partitions {
        for multiplier in [1, 3] {
            for nchunk in [1, 2] {
                let results = LocalCluster::run(chunks.len(), |comm| {
                    let rank = comm.rank();
                    let size = comm.size();
                    let session = session(comm.clone(), multiplier);
                    let grid = PointSet::quadrature_chunk(
                        PointKind::GaussLegendre,
                        nmax,
                        1.3,
                        chunks[rank],
                        comm.clone(),
                    )
                    .expect("chunk should be valid");
                    let orders = distribute_orders(nmax, rank, size, nchunk);
                    let local = Shc::distribute_from(&shc, &orders, comm.clone())
                        .expect("store should be distributed");
                    let values = shs::point(&grid, &local, nmax, &session).expect("synthesis");
                    (grid.lat().to_vec(), values)
                });
                for (lat, values) in &results {
                    assert_rows_match(&full, &reference, lat, values);
                }
            }
        }
    }
}

#[test]
fn distributed_analysis_recovers_coefficients() {
    let nmax = 8;
    let shc = model(nmax);
    let full = PointSet::gl(nmax, 1.0).expect("grid should be built");
    let reference = shs::point(&full, &shc, nmax, &Session::default()).expect("reference");
    let width = full.row_width();
    let chunks = [
        RowChunk { local_0_start: 0, local_nlat: 4 },
        RowChunk { local_0_start: 2, local_nlat: 4 },
        RowChunk { local_0_start: 4, local_nlat: 1 },
    ];

    let results = LocalCluster::run(3, |comm| {
        let session = session(comm.clone(), 2);
        let grid = PointSet::gl_chunk(nmax, 1.0, chunks[comm.rank()], comm.clone())
            .expect("chunk should be valid");
        let values: Vec<f64> = grid
            .lat()
            .iter()
            .flat_map(|latitude| {
                let global = full
                    .lat()
                    .iter()
                    .position(|other| other.to_bits() == latitude.to_bits())
                    .expect("local latitude should belong to the full grid");
                reference[global * width..(global + 1) * width].to_vec()
            })
            .collect();
        let local = sha::point(&grid, &values, nmax, shc.mu(), shc.r(), &session)
            .expect("analysis should succeed");
        assert!(local.is_distributed());
        local.gather().expect("gather should succeed")
    });
    for back in results {
        for n in 0..=nmax {
            for m in 0..=n {
                let (c0, s0) = shc.coeffs(n, m).expect("coefficient");
                let (c1, s1) = back.coeffs(n, m).expect("coefficient");
                assert_scalar_close(&format!("C{n},{m}"), c0, c1, 1.0e-12, 0.0);
                assert_scalar_close(&format!("S{n},{m}"), s0, s1, 1.0e-12, 0.0);
            }
        }
    }
}

#[test]
fn distributed_cell_synthesis_matches_single_process() {
    let nmax = 6;
    let shc = model(nmax);
    let full = CellSet::global_grid(8, 12, 1.0).expect("cells should be built");
    let reference = shs::cell(&full, &shc, nmax, &Session::default()).expect("reference");
    let width = full.row_width();

    let results = LocalCluster::run(2, |comm| {
        let rank = comm.rank();
        let rows = if rank == 0 { 0..5 } else { 5..8 };
        let cells = CellSet::grid_chunk(
            full.latmin()[rows.clone()].to_vec(),
            full.latmax()[rows.clone()].to_vec(),
            full.lonmin().to_vec(),
            full.lonmax().to_vec(),
            vec![1.0; rows.len()],
            8,
            rows.start,
            comm.clone(),
        )
        .expect("chunk should be valid");
        let orders = distribute_orders(nmax, rank, comm.size(), 1);
        let local = Shc::distribute_from(&shc, &orders, comm.clone()).expect("distribute");
        let values = shs::cell(&cells, &local, nmax, &session(comm.clone(), 4)).expect("cells");
        (rows, values)
    });
    for (rows, values) in results {
        let expected = &reference[rows.start * width..rows.end * width];
        for (k, (a, b)) in values.iter().zip(expected).enumerate() {
            assert_scalar_close(&format!("cell {k}"), *b, *a, 1.0e-12, 1.0e-12);
        }
    }
}

#[test]
fn mixing_local_and_distributed_inputs_fails_everywhere() {
    let nmax = 4;
    let shc = model(nmax);
    let results = LocalCluster::run(2, |comm| {
        let session = session(comm.clone(), 4);
        let grid = PointSet::gl(nmax, 1.0).expect("grid should be built");
        shs::point(&grid, &shc, nmax, &session)
            .expect_err("a local grid in a distributed session must fail")
            .kind()
    });
    assert!(
        results
            .iter()
            .all(|kind| *kind == HarmErrorKind::DistributedConsistency)
    );
}

#[test]
fn one_failing_rank_fails_every_rank() {
    let nmax = 4;
    let shc = model(nmax);
    let results = LocalCluster::run(2, |comm| {
        let rank = comm.rank();
        let session = session(comm.clone(), 4);
        let grid = PointSet::gl_chunk(
            nmax,
            1.0,
            if rank == 0 {
                RowChunk { local_0_start: 0, local_nlat: 5 }
            } else {
                RowChunk { local_0_start: 0, local_nlat: 0 }
            },
            comm.clone(),
        )
        .expect("chunk should be valid");
        let orders = distribute_orders(nmax, rank, comm.size(), 1);
        let local = Shc::distribute_from(&shc, &orders, comm.clone()).expect("distribute");
        // Only rank 1 asks for too high a degree.
        let degree = if rank == 1 { nmax + 1 } else { nmax };
        shs::point(&grid, &local, degree, &session).is_err()
    });
    assert_eq!(results, vec![true, true]);
}
