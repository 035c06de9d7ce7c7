//! Benchmarks for the barcode line codec and the discovery parser.
//!
//! Run benchmarks with:
//! ```sh
//! cargo bench --bench codec_bench
//! ```

use bytes::BytesMut;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use scanbridge_core::Barcode;
use scanbridge_protocol::{BarcodeCodec, parse_response};
use std::hint::black_box;
use tokio_util::codec::{Decoder, Encoder};

fn wire_lines(count: usize) -> BytesMut {
    let mut codec = BarcodeCodec::new();
    let mut buffer = BytesMut::new();
    for n in 0..count {
        let barcode = Barcode::normalize(format!("LOT{n:06}-A").as_bytes()).unwrap();
        codec.encode(barcode, &mut buffer).unwrap();
    }
    buffer
}

fn bench_decode_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_batch");

    for batch_size in [10, 100, 1000] {
        group.throughput(Throughput::Elements(batch_size as u64));
        let encoded = wire_lines(batch_size).freeze();

        group.bench_with_input(BenchmarkId::from_parameter(batch_size), &batch_size, |b, _| {
            b.iter(|| {
                let mut codec = BarcodeCodec::new();
                let mut buffer = BytesMut::from(&encoded[..]);
                let mut count = 0;
                while let Ok(Some(_)) = codec.decode(&mut buffer) {
                    count += 1;
                }
                black_box(count);
            });
        });
    }

    group.finish();
}

/// Lines arriving a few bytes at a time, as they do from a slow scanner.
fn bench_decode_chunked(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_chunked");
    let encoded = wire_lines(50).freeze();
    group.throughput(Throughput::Elements(50));

    for chunk_size in [4, 16, 64] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("chunk_{chunk_size}_bytes")),
            &chunk_size,
            |b, &size| {
                b.iter(|| {
                    let mut codec = BarcodeCodec::new();
                    let mut buffer = BytesMut::new();
                    let mut count = 0;
                    for chunk in encoded.chunks(size) {
                        buffer.extend_from_slice(chunk);
                        while let Ok(Some(_)) = codec.decode(&mut buffer) {
                            count += 1;
                        }
                    }
                    black_box(count);
                });
            },
        );
    }

    group.finish();
}

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize");
    group.throughput(Throughput::Elements(1));

    group.bench_function("plain", |b| {
        b.iter(|| black_box(Barcode::normalize(black_box(b"  0123456789ABCDEF\r\n"))));
    });
    group.bench_function("escaped", |b| {
        b.iter(|| black_box(Barcode::normalize(black_box(b"<A&B>\"quoted\"'x'\r\n"))));
    });

    group.finish();
}

fn bench_discovery_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("discovery_parse");
    group.throughput(Throughput::Elements(1));

    let mut fields = vec!["."; 25];
    fields[5] = "00:11:22:33:44:55";
    fields[6] = "192.168.188.20";
    fields[14] = "2001";
    fields[15] = "2003";
    fields[17] = "Line 4 bottom";
    fields[19] = "model=MicroHAWK ID-40";
    fields[22] = "serial=A1B2C3";
    fields[23] = "firmware=1.2.3";
    fields[24] = "weblink=http://192.168.188.20>";
    let response = fields.join(",");

    group.bench_function("candidate", |b| {
        b.iter(|| black_box(parse_response(black_box(response.as_bytes()))));
    });
    group.bench_function("own_query", |b| {
        b.iter(|| black_box(parse_response(black_box(scanbridge_protocol::discovery_query()))));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_decode_batch,
    bench_decode_chunked,
    bench_normalize,
    bench_discovery_parse,
);

criterion_main!(benches);
