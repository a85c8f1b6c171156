//! Decode-throughput benchmark over a lossless loopback channel.

extern crate criterion;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use floppyfs::mfm::{Decoder, Encoder, PulseCodes};
use floppyfs::storage::{Flux, Sector, Track, SECTORS_PER_TRACK, SECTOR_SIZE};

const LOOPBACK: PulseCodes = PulseCodes {
    short: 46,
    medium: 69,
    long: 92,
};

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("mfm decode");

    let mut track = Track::new(40, 0);
    for i in 0..SECTORS_PER_TRACK as u8 {
        let mut s = Sector::at(40, 0, i + 1);
        for (j, b) in s.data.as_mut_slice().iter_mut().enumerate() {
            *b = (j as u8).wrapping_mul(i + 1);
        }
        s.valid = true;
        *track.slot_mut(i + 1).unwrap() = s;
    }

    let mut codes = vec![0u8; 131_072];
    let n = {
        let mut enc = Encoder::with_codes(&mut codes, LOOPBACK);
        enc.encode_track(&track)
    };

    group.throughput(Throughput::Bytes((SECTORS_PER_TRACK * SECTOR_SIZE) as u64));
    group.bench_function("full track", |b| {
        b.iter(|| {
            let mut dec = Decoder::new();
            let mut sectors = 0;
            for &code in codes[..n].iter() {
                if let Some(s) = dec.feed(Flux { delta: code as u16, index: false }) {
                    if s.valid {
                        sectors += 1;
                    }
                }
            }
            assert_eq!(SECTORS_PER_TRACK, sectors);
        })
    });

    group.finish();
}

criterion_group!(benches, bench_decode);
criterion_main!(benches);
