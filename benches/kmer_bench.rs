use criterion::{black_box, criterion_group, criterion_main, Criterion};
use readkmer::Kmer;
use std::hash::Hasher;

fn random_seqs(num: usize, len: usize) -> Vec<Vec<u8>> {
    let mut state = 0x9e3779b97f4a7c15u64;
    (0..num)
        .map(|_| {
            (0..len)
                .map(|_| {
                    state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                    b"ACGT"[(state >> 33) as usize % 4]
                })
                .collect()
        })
        .collect()
}

fn bench_canonical(c: &mut Criterion) {
    let seqs = random_seqs(1000, 31);
    let kmers: Vec<Kmer> = seqs.iter().map(|s| Kmer::from_seq(s).unwrap()).collect();
    c.bench_function("canonical_31", |b| {
        b.iter(|| {
            for kmer in &kmers {
                black_box(kmer.canonical(31));
            }
        })
    });

    let seqs = random_seqs(1000, 75);
    let kmers: Vec<Kmer> = seqs.iter().map(|s| Kmer::from_seq(s).unwrap()).collect();
    c.bench_function("canonical_75", |b| {
        b.iter(|| {
            for kmer in &kmers {
                black_box(kmer.canonical(75));
            }
        })
    });
}

fn bench_hash(c: &mut Criterion) {
    let seqs = random_seqs(1000, 31);
    let kmers: Vec<Kmer> = seqs.iter().map(|s| Kmer::from_seq(s).unwrap()).collect();

    c.bench_function("seahash_31", |b| {
        b.iter(|| {
            for kmer in &kmers {
                black_box(kmer.hash());
            }
        })
    });

    c.bench_function("twox_hash_31", |b| {
        b.iter(|| {
            for kmer in &kmers {
                let mut hasher = twox_hash::XxHash64::with_seed(0);
                hasher.write(bytemuck::cast_slice(kmer.words()));
                black_box(hasher.finish());
            }
        })
    });
}

criterion_group!(benches, bench_canonical, bench_hash);
criterion_main!(benches);
