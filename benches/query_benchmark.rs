//! Benchmarks for k2gravity lookup performance.
//!
//! Run with: cargo bench
//!
//! This benchmark suite measures:
//! - Gravity lookups (hit and miss) with a warm plan
//! - Lookups across many clients sharing plans
//! - Bulk scan throughput

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use k2gravity::{Client, GravityConfig, GravityDb, ListCategory, NoRegex};
use rusqlite::{params, Connection};
use std::path::Path;
use tempfile::TempDir;

/// Create a gravity database with `domain_count` gravity entries.
fn generate_database(dir: &Path, domain_count: usize) -> GravityConfig {
    let path = dir.join("gravity.db");
    let mut conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE vw_gravity (domain TEXT NOT NULL, group_id INTEGER NOT NULL, id INTEGER NOT NULL);
         CREATE INDEX idx_gravity ON vw_gravity (domain, group_id);
         CREATE TABLE vw_blacklist (domain TEXT NOT NULL, group_id INTEGER NOT NULL, id INTEGER NOT NULL);
         CREATE TABLE vw_whitelist (domain TEXT NOT NULL, group_id INTEGER NOT NULL, id INTEGER NOT NULL);
         CREATE TABLE domain_audit (id INTEGER PRIMARY KEY AUTOINCREMENT, domain TEXT UNIQUE NOT NULL);
         CREATE TABLE client (id INTEGER PRIMARY KEY AUTOINCREMENT, ip TEXT NOT NULL UNIQUE);
         CREATE TABLE client_by_group (client_id INTEGER NOT NULL, group_id INTEGER NOT NULL);",
    )
    .unwrap();

    let tx = conn.transaction().unwrap();
    {
        let mut stmt = tx
            .prepare("INSERT INTO vw_gravity (domain, group_id, id) VALUES (?1, 0, ?2);")
            .unwrap();
        for i in 0..domain_count {
            stmt.execute(params![format!("domain{}.example.com", i), i as i64])
                .unwrap();
        }
    }
    tx.commit().unwrap();

    GravityConfig::with_database(path)
}

fn bench_gravity_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("gravity_lookup");
    group.throughput(Throughput::Elements(1));

    for size in [1_000, 100_000] {
        let dir = TempDir::new().unwrap();
        let mut db = GravityDb::new(generate_database(dir.path(), size));
        let client = Client::new(0, "192.168.1.10");
        db.prepare_client(&client).unwrap();

        group.bench_with_input(BenchmarkId::new("hit", size), &size, |b, &size| {
            let domain = format!("domain{}.example.com", size / 2);
            b.iter(|| black_box(db.in_gravity(black_box(&domain), &client)))
        });

        group.bench_with_input(BenchmarkId::new("miss", size), &size, |b, _| {
            b.iter(|| black_box(db.in_gravity(black_box("not-listed.example.org"), &client)))
        });
    }

    group.finish();
}

fn bench_many_clients(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let mut db = GravityDb::new(generate_database(dir.path(), 10_000));
    let clients: Vec<Client> = (0..64)
        .map(|id| Client::new(id, format!("10.0.{}.{}", id / 250, id % 250 + 1)))
        .collect();
    db.prepare_clients(&clients).unwrap();

    c.bench_function("decision_64_clients", |b| {
        let mut i = 0usize;
        b.iter(|| {
            let client = &clients[i % clients.len()];
            i += 1;
            let domain = "domain42.example.com";
            let blocked = !db.in_whitelist(domain, client, &NoRegex)
                && (db.in_blacklist(domain, client) || db.in_gravity(domain, client));
            black_box(blocked)
        })
    });
}

fn bench_scan(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let mut db = GravityDb::new(generate_database(dir.path(), 10_000));

    let mut group = c.benchmark_group("scan");
    group.throughput(Throughput::Elements(10_000));
    group.bench_function("read_gravity", |b| {
        b.iter(|| black_box(db.read_list(ListCategory::Gravity).unwrap().len()))
    });
    group.finish();
}

criterion_group!(benches, bench_gravity_lookup, bench_many_clients, bench_scan);
criterion_main!(benches);
