use std::net::SocketAddr;
use std::time::{Duration, Instant};

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use coap_core::codec;
use coap_core::dedup::InboundDeduplicator;
use coap_core::message::{Code, Message, OptionNumber, Options, Token, Type};

fn sample_message() -> Message {
    let mut options = Options::new();
    options.insert(OptionNumber::URI_PATH, b"sensors".to_vec());
    options.insert(OptionNumber::URI_PATH, b"temperature".to_vec());
    options.insert(OptionNumber::CONTENT_FORMAT, vec![0]);
    Message::new(Type::Con, Code::GET, 0x1234, Token::from_slice(&[1, 2, 3, 4]))
        .with_options(options)
        .with_payload(vec![0u8; 64])
}

fn benchmark_encode(c: &mut Criterion) {
    let msg = sample_message();
    c.bench_function("codec_encode", |b| {
        b.iter(|| black_box(codec::encode(black_box(&msg))))
    });
}

fn benchmark_decode(c: &mut Criterion) {
    let bytes = codec::encode(&sample_message());
    c.bench_function("codec_decode", |b| {
        b.iter(|| black_box(codec::decode(black_box(&bytes)).unwrap()))
    });
}

fn benchmark_dedup_lookup(c: &mut Criterion) {
    let remote: SocketAddr = "127.0.0.1:5683".parse().unwrap();
    let mut dedup = InboundDeduplicator::new(Duration::from_secs(247));
    let now = Instant::now();
    for mid in 0..1000u16 {
        dedup.check_and_insert(remote, mid, now);
    }

    c.bench_function("dedup_duplicate_lookup", |b| {
        b.iter(|| black_box(dedup.check_and_insert(black_box(remote), black_box(500), now)))
    });
}

criterion_group!(benches, benchmark_encode, benchmark_decode, benchmark_dedup_lookup);
criterion_main!(benches);
