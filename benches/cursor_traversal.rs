// Cursor traversal benchmarks: sequential insert, point lookup, and
// forward scan through the public connection/session surface.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use archengine_core::conn::Connection;
use tempfile::TempDir;

fn populated_table(n: u32) -> (std::sync::Arc<Connection>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let conn = Connection::open(temp_dir.path(), "create=true").unwrap();
    let mut session = conn.open_session();
    session.create("table:bench", "").unwrap();

    session.begin_transaction("").unwrap();
    {
        let mut cursor = session.open_cursor("table:bench", "").unwrap();
        for i in 0..n {
            cursor.set_key(format!("key-{i:08}").into_bytes());
            cursor.set_value(format!("value-{i}").into_bytes());
            cursor.insert().unwrap();
        }
    }
    session.commit_transaction("").unwrap();

    (conn, temp_dir)
}

fn bench_sequential_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequential_insert");

    for n in [100u32, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::new("insert", n), &n, |b, &n| {
            b.iter(|| {
                let temp_dir = TempDir::new().unwrap();
                let conn = Connection::open(temp_dir.path(), "create=true").unwrap();
                let mut session = conn.open_session();
                session.create("table:bench", "").unwrap();

                session.begin_transaction("").unwrap();
                {
                    let mut cursor = session.open_cursor("table:bench", "").unwrap();
                    for i in 0..n {
                        cursor.set_key(black_box(format!("key-{i:08}").into_bytes()));
                        cursor.set_value(format!("value-{i}").into_bytes());
                        cursor.insert().unwrap();
                    }
                }
                session.commit_transaction("").unwrap();
            });
        });
    }

    group.finish();
}

fn bench_point_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("point_lookup");

    for n in [100u32, 1_000, 10_000] {
        let (conn, _temp) = populated_table(n);
        let session = conn.open_session();

        group.bench_with_input(BenchmarkId::new("search", n), &n, |b, &n| {
            let mut cursor = session.open_cursor("table:bench", "").unwrap();
            b.iter(|| {
                let key = format!("key-{:08}", n / 2);
                cursor.set_key(black_box(key.into_bytes()));
                cursor.search().unwrap();
                black_box(cursor.value());
            });
        });
    }

    group.finish();
}

fn bench_forward_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("forward_scan");

    for n in [100u32, 1_000, 10_000] {
        let (conn, _temp) = populated_table(n);
        let session = conn.open_session();

        group.bench_with_input(BenchmarkId::new("scan_all", n), &n, |b, _| {
            b.iter(|| {
                let mut cursor = session.open_cursor("table:bench", "").unwrap();
                let mut count = 0u32;
                while cursor.next().is_ok() {
                    black_box(cursor.key());
                    count += 1;
                }
                black_box(count);
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_sequential_insert,
    bench_point_lookup,
    bench_forward_scan
);
criterion_main!(benches);
