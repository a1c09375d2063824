//! Encode/decode throughput for the packet codec.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use wipd::packet::types::query::{QueryRequest, QueryResponse, WeatherAnswer};
use wipd::packet::{DataFlags, Frame};

fn bench_encode(c: &mut Criterion) {
    let flags = DataFlags::new(true, true, true, true, false);
    let request = QueryRequest::new(1234, 130_000, flags, 0);

    c.bench_function("encode_query_request", |b| {
        b.iter(|| black_box(&request).encode().unwrap())
    });

    let answer = WeatherAnswer {
        weather_code: Some(100),
        temperature_c: Some(25),
        pop: Some(30),
        alerts: vec!["大雨警報".to_string(), "洪水注意報".to_string()],
        disasters: vec![],
    };
    let response = QueryResponse::for_request(request.frame(), &answer).unwrap();
    c.bench_function("encode_query_response_with_alerts", |b| {
        b.iter(|| black_box(&response).encode().unwrap())
    });
}

fn bench_decode(c: &mut Criterion) {
    let flags = DataFlags::new(true, true, true, true, false);
    let request = QueryRequest::new(1234, 130_000, flags, 0);
    let request_wire = request.encode().unwrap();

    c.bench_function("decode_query_request", |b| {
        b.iter(|| Frame::decode(black_box(&request_wire)).unwrap())
    });

    let answer = WeatherAnswer {
        weather_code: Some(100),
        temperature_c: Some(25),
        pop: Some(30),
        alerts: vec!["大雨警報".to_string()],
        disasters: vec!["土砂災害警戒".to_string()],
    };
    let response_wire = QueryResponse::for_request(request.frame(), &answer)
        .unwrap()
        .encode()
        .unwrap();
    c.bench_function("decode_query_response_with_ext", |b| {
        b.iter(|| Frame::decode(black_box(&response_wire)).unwrap())
    });
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
