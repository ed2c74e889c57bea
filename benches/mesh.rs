//! Criterion benches: mesh construction, derived quantities, and the flip
//! fixed point on structured grids.

use covolume::prelude::*;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn grid(nx: usize, ny: usize) -> (Vec<Point<2>>, Vec<[usize; 3]>) {
    let mut nodes = Vec::with_capacity(nx * ny);
    for j in 0..ny {
        for i in 0..nx {
            nodes.push(Point::new([i as f64, j as f64]));
        }
    }
    let id = |i: usize, j: usize| j * nx + i;
    let mut cells = Vec::new();
    for j in 0..ny - 1 {
        for i in 0..nx - 1 {
            cells.push([id(i, j), id(i + 1, j), id(i + 1, j + 1)]);
            cells.push([id(i, j), id(i + 1, j + 1), id(i, j + 1)]);
        }
    }
    (nodes, cells)
}

fn bench_construction(c: &mut Criterion) {
    let (nodes, cells) = grid(64, 64);
    c.bench_function("construct 64x64 grid", |b| {
        b.iter(|| {
            let mesh = TriMesh::new(black_box(nodes.clone()), black_box(cells.clone())).unwrap();
            black_box(mesh.num_cells())
        });
    });
}

fn bench_control_volumes(c: &mut Criterion) {
    let (nodes, cells) = grid(64, 64);
    c.bench_function("control volumes 64x64 grid", |b| {
        b.iter_with_setup(
            || TriMesh::new(nodes.clone(), cells.clone()).unwrap(),
            |mut mesh| {
                let total: f64 = mesh.control_volumes().iter().sum();
                black_box(total)
            },
        );
    });
}

fn bench_flip_until_delaunay(c: &mut Criterion) {
    // Displace a band of interior nodes to seed violations.
    let (mut nodes, cells) = grid(32, 32);
    for j in 1..31 {
        for i in 1..31 {
            if (i + j) % 3 == 0 {
                nodes[j * 32 + i] = nodes[j * 32 + i] + [0.3, -0.3];
            }
        }
    }
    c.bench_function("flip_until_delaunay 32x32 perturbed grid", |b| {
        b.iter_with_setup(
            || TriMesh::new(nodes.clone(), cells.clone()).unwrap(),
            |mut mesh| {
                mesh.flip_until_delaunay().unwrap();
                black_box(mesh.num_cells())
            },
        );
    });
}

criterion_group!(
    benches,
    bench_construction,
    bench_control_volumes,
    bench_flip_until_delaunay
);
criterion_main!(benches);
