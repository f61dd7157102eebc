//! Export and import throughput for catalogs of growing size.
//!
//! Run with: `cargo bench --bench marshal_benchmark`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mpw::{
    export, import, Algorithm, Catalog, ConflictPolicy, ExportOptions, MasterKey, ResultType,
    SiteRecord, UserProfile, VaultFormat,
};

fn catalog(master: &MasterKey, size: usize) -> Vec<SiteRecord> {
    (0..size)
        .map(|index| {
            if index % 4 == 0 {
                let mut site =
                    SiteRecord::new(format!("stored-{}.example", index), ResultType::Personal, Algorithm::V3).unwrap();
                site.set_content(master, "a stored secret").unwrap();
                site
            } else {
                SiteRecord::new(format!("site-{}.example", index), ResultType::Long, Algorithm::V3).unwrap()
            }
        })
        .collect()
}

fn bench_marshal(c: &mut Criterion) {
    let master = MasterKey::from_bytes(Algorithm::V3, &[0x42; 64]).unwrap();
    let profile = UserProfile::new("Robert Lee Mitchell");

    for format in [VaultFormat::Flat, VaultFormat::Json] {
        let mut group = c.benchmark_group(format!("marshal_{}", format));
        for size in [10usize, 100, 1000] {
            let records = catalog(&master, size);
            let options = ExportOptions {
                format,
                reveal: false,
            };
            let text = export(&profile, &records, &master, &options).unwrap();

            group.throughput(Throughput::Elements(size as u64));
            group.bench_with_input(BenchmarkId::new("export", size), &records, |b, records| {
                b.iter(|| export(&profile, black_box(records), &master, &options).unwrap());
            });
            group.bench_with_input(BenchmarkId::new("import", size), &text, |b, text| {
                b.iter(|| {
                    let mut catalog = Catalog::new();
                    import(&mut catalog, black_box(text), &master, ConflictPolicy::default()).unwrap()
                });
            });
        }
        group.finish();
    }
}

criterion_group!(benches, bench_marshal);
criterion_main!(benches);
