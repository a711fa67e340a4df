use cramfile::{compress, decode_record, decompress, encode_record, Env, Job};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

fn wide_env(vars: usize) -> Env {
    (0..vars)
        .map(|i| {
            (
                format!("VAR_{:05}", i).into_bytes(),
                format!("value-{}", i).into_bytes(),
            )
        })
        .collect()
}

fn bench_decompress(c: &mut Criterion) {
    // A realistic sub-job: most of a 1000-variable environment shared with
    // the base, a few dozen changed, a handful removed.
    let base = wide_env(1000);
    let mut modified = base.clone();
    for pair in modified.iter_mut().step_by(37) {
        pair.1 = b"changed".to_vec();
    }
    modified.retain(|(k, _)| !k.ends_with(b"7"));
    let (subtracted, changed) = compress(&base, &modified);

    c.bench_function("decompress_1000_vars", |b| {
        b.iter(|| decompress(&base, &subtracted, &changed))
    });
}

fn bench_record_codec(c: &mut Criterion) {
    let base = wide_env(1000);
    let first = Job::new(
        64,
        "/scratch/run/base",
        vec![b"app".to_vec(), b"--input".to_vec(), b"data.0".to_vec()],
        base.clone(),
    );

    let mut env = base.clone();
    env.truncate(900);
    env.push((b"ZZ_EXTRA".to_vec(), b"1".to_vec()));
    let job = Job::new(
        64,
        "/scratch/run/17",
        vec![b"app".to_vec(), b"--input".to_vec(), b"data.17".to_vec()],
        env,
    );

    let record = encode_record(&job, Some(&first.env)).unwrap();

    c.bench_function("encode_delta_record", |b| {
        b.iter(|| encode_record(&job, Some(&first.env)).unwrap())
    });

    c.bench_function("decode_delta_record", |b| {
        b.iter_batched(
            || record.clone(),
            |r| decode_record(&r, Some(&first.env)).unwrap(),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_decompress, bench_record_codec);
criterion_main!(benches);
