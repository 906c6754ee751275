use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use linear::{LinearSolverOptions, LinearSystem, SerialCommunicator, SystemSolver};
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{coo::CooMatrix, csr::CsrMatrix};

/// Three equations per cell on an `m × m` five-point stencil, without wells.
fn grid_system(m: usize) -> LinearSystem {
    let n = m * m;
    let bs = 3;
    let mut coo = CooMatrix::new(n * bs, n * bs);
    for j in 0..m {
        for i in 0..m {
            let c = j * m + i;
            let mut neighbours = Vec::new();
            if i > 0 {
                neighbours.push(c - 1);
            }
            if i + 1 < m {
                neighbours.push(c + 1);
            }
            if j > 0 {
                neighbours.push(c - m);
            }
            if j + 1 < m {
                neighbours.push(c + m);
            }
            for e in 0..bs {
                coo.push(e * n + c, e * n + c, 4.5 + e as f64);
                coo.push(e * n + c, ((e + 1) % bs) * n + c, 0.2);
                for &nb in &neighbours {
                    coo.push(e * n + c, e * n + nb, -1.0);
                }
            }
        }
    }
    let rhs = DVector::from_fn(n * bs, |i, _| ((i % 13) as f64) - 6.0);
    LinearSystem::from_parts(
        n,
        bs,
        CsrMatrix::from(&coo),
        CsrMatrix::zeros(n * bs, 0),
        CsrMatrix::zeros(0, n * bs),
        DMatrix::zeros(0, 0),
        rhs,
        DVector::zeros(0),
    )
    .unwrap()
}

fn bench_solve(sys: &LinearSystem, opts: &LinearSolverOptions) {
    let comm = Arc::new(SerialCommunicator::new(sys.num_cells()));
    let mut solver = SystemSolver::new(opts.clone(), comm);
    solver.solve(sys).unwrap();
}

fn criterion_benchmark(c: &mut Criterion) {
    for m in [20, 40] {
        let sys = grid_system(m);
        let cpr = LinearSolverOptions::default();
        let ilu = LinearSolverOptions {
            use_amg: false,
            ..Default::default()
        };
        c.bench_function(&format!("CPR bicgstab {m}x{m}"), |b| {
            b.iter(|| bench_solve(black_box(&sys), &cpr))
        });
        c.bench_function(&format!("ILU0 bicgstab {m}x{m}"), |b| {
            b.iter(|| bench_solve(black_box(&sys), &ilu))
        });
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
