use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tether_engine::{Runtime, RuntimeConfig};
use tether_native::Reflect;
use tether_sdk::{Bridge, IntoNative, NativeType, NativeValue, TypeTag};

#[derive(Debug, Clone, Reflect)]
struct Inner {
    int: i32,
    label: String,
}

#[derive(Debug, Clone, Reflect)]
struct Record {
    id: u32,
    score: f64,
    tags: Vec<String>,
    inner: Inner,
    note: Option<String>,
}

fn record() -> Record {
    Record {
        id: 42,
        score: 0.75,
        tags: vec!["a".to_string(), "bb".to_string(), "ccc".to_string()],
        inner: Inner {
            int: -7,
            label: "inner".to_string(),
        },
        note: None,
    }
}

fn bench_struct(c: &mut Criterion) {
    let rt = Runtime::with_config(RuntimeConfig::default());
    let bridge = Bridge::new();
    let ty = Record::type_tag();
    let native = record().into_native();

    c.bench_function("encode_struct", |b| {
        b.iter(|| {
            rt.with_scope(|rt| {
                bridge.codec(rt).encode(black_box(&native), &ty).unwrap();
            })
        });
    });

    let host = bridge.codec(&rt).encode(&native, &ty).unwrap();
    c.bench_function("decode_struct", |b| {
        b.iter(|| bridge.codec(&rt).decode(black_box(host), &ty).unwrap());
    });
}

fn bench_arrays(c: &mut Criterion) {
    let rt = Runtime::with_config(RuntimeConfig::default());
    let bridge = Bridge::new();
    let ty = TypeTag::array(TypeTag::I32);
    let mut group = c.benchmark_group("arrays");

    for len in [16usize, 256, 4096] {
        let native = NativeValue::Array((0..len as i32).map(NativeValue::I32).collect());
        group.throughput(Throughput::Elements(len as u64));

        group.bench_with_input(BenchmarkId::new("encode", len), &native, |b, native| {
            b.iter(|| {
                rt.with_scope(|rt| {
                    bridge.codec(rt).encode(black_box(native), &ty).unwrap();
                })
            });
        });

        let host = bridge.codec(&rt).encode(&native, &ty).unwrap();
        group.bench_with_input(BenchmarkId::new("decode", len), &host, |b, host| {
            b.iter(|| bridge.codec(&rt).decode(black_box(*host), &ty).unwrap());
        });
    }

    group.finish();
}

fn bench_strings(c: &mut Criterion) {
    let rt = Runtime::with_config(RuntimeConfig::default());
    let bridge = Bridge::new();
    let mut group = c.benchmark_group("strings");

    for len in [8usize, 1024] {
        let text = "é".repeat(len);
        let native = NativeValue::string(text.as_str());
        let host = bridge.codec(&rt).encode(&native, &TypeTag::String).unwrap();
        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_with_input(BenchmarkId::new("decode", len), &host, |b, host| {
            b.iter(|| bridge.codec(&rt).decode(black_box(*host), &TypeTag::String).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, bench_struct, bench_arrays, bench_strings);
criterion_main!(benches);
