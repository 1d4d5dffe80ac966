use pg_mail::mime::{EnvelopeOptions, MimeEncoder};

use criterion::*;

// Chunk sizes are deliberately not multiples of the transform buffer.
fn bench_envelope(input: &[u8], chunk: usize) -> usize {
    let mut encoder = MimeEncoder::new(EnvelopeOptions {
        boundary: Some("bench".to_string()),
        ..Default::default()
    });

    let mut len = encoder.start().len();
    for c in input.chunks(chunk) {
        len += encoder.transform(c).len();
    }
    len += encoder.flush().len();

    len
}

fn rand_vec(length: usize) -> Vec<u8> {
    (0..length).map(|_| rand::random::<u8>()).collect()
}

fn bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("throughput-envelope");
    group.sample_size(10);

    for blen in [10, 14, 18, 22, 26] {
        let input = rand_vec(1 << blen);
        group.throughput(Throughput::Bytes(input.len() as u64));

        for chunk in [1000, 65536 + 16] {
            group.bench_function(
                format!("envelope {} KiB, chunks of {chunk}", input.len() / 1024),
                |b| b.iter(|| bench_envelope(black_box(&input), chunk)),
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench);
criterion_main!(benches);
