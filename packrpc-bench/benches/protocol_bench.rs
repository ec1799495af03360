//! Frame encoding/decoding benchmarks.

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use packrpc_protocol::frame::Frame;
use packrpc_protocol::message::{Request, Response};
use packrpc_protocol::{CodecConfig, Decoder, Encoder, TextEncoding, Value};
use packrpc_server::{MethodError, MethodTable, RpcHandler};

fn create_test_request(payload_size: usize) -> Request {
    Request::new(1, "store").with_params(vec![
        Value::from("bench-key"),
        Value::from("x".repeat(payload_size)),
        Value::from(42),
    ])
}

fn create_test_response(payload_size: usize) -> Response {
    Response::ok(
        1,
        Value::Map(vec![
            (Value::from("stored"), Value::from(true)),
            (Value::from("data"), Value::from("x".repeat(payload_size))),
            (Value::from("offset"), Value::from(12345678)),
        ]),
    )
}

fn bench_request_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_encode");
    let encoder = Encoder::default();

    for size in [100, 1000, 10000] {
        let request = create_test_request(size);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &request, |b, request| {
            b.iter(|| black_box(encoder.encode_request(request).unwrap()));
        });
    }

    group.finish();
}

fn bench_request_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_decode");
    let encoder = Encoder::default();

    for size in [100, 1000, 10000] {
        let encoded = encoder.encode_request(&create_test_request(size)).unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            b.iter(|| {
                let mut buf = BytesMut::from(&encoded[..]);
                let frame = Frame::decode(&mut buf, TextEncoding::Utf8).unwrap().unwrap();
                black_box(Request::from_value(frame.value).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_response_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("response_encode");

    let configs = [
        ("utf8", CodecConfig::default()),
        (
            "latin1",
            CodecConfig {
                pack_encoding: TextEncoding::Latin1,
                ..CodecConfig::default()
            },
        ),
    ];

    for (name, config) in configs {
        let encoder = Encoder::new(config);
        let response = create_test_response(1000);
        group.bench_function(name, |b| {
            b.iter(|| black_box(encoder.encode_response(&response).unwrap()));
        });
    }

    group.finish();
}

fn bench_streaming_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("streaming_decode");
    let encoder = Encoder::default();

    let mut stream = Vec::new();
    for id in 0..100u64 {
        let request = Request::new(id, "sum").with_params(vec![Value::from(id), Value::from(1)]);
        stream.extend_from_slice(&encoder.encode_request(&request).unwrap());
    }

    group.throughput(Throughput::Elements(100));
    for chunk in [1, 64, 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(chunk), &chunk, |b, &chunk| {
            b.iter(|| {
                let mut decoder = Decoder::new();
                let mut frames = 0;
                for piece in stream.chunks(chunk) {
                    decoder.extend(piece);
                    while decoder.decode_frame().unwrap().is_some() {
                        frames += 1;
                    }
                }
                black_box(frames)
            });
        });
    }

    group.finish();
}

fn bench_dispatch(c: &mut Criterion) {
    let table = MethodTable::new();
    table
        .register("sum", |a: i64, b: i64| Ok::<_, MethodError>(a + b))
        .unwrap();
    let handler = RpcHandler::new(table);
    let encoder = Encoder::default();
    let encoded = encoder
        .encode_request(&Request::new(1, "sum").with_params(vec![Value::from(2), Value::from(3)]))
        .unwrap();

    c.bench_function("dispatch_sum", |b| {
        b.iter(|| {
            let mut buf = BytesMut::from(&encoded[..]);
            let frame = Frame::decode(&mut buf, TextEncoding::Utf8).unwrap().unwrap();
            black_box(futures::executor::block_on(handler.handle(frame)))
        });
    });
}

criterion_group!(
    benches,
    bench_request_encode,
    bench_request_decode,
    bench_response_encode,
    bench_streaming_decode,
    bench_dispatch,
);
criterion_main!(benches);
