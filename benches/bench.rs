use criterion::{criterion_group, criterion_main, Criterion};

use daytrack_core::config::RouteConfig;
use daytrack_core::directions_codec;
use daytrack_core::gps_processor::Point;
use daytrack_core::route::{Route, RoutePoint};
use daytrack_core::route_engine::plan_chunk;

// a day of driving around, one point every ~60m
fn day_of_points() -> Vec<Point> {
    (0..5000)
        .map(|i| {
            let t = i as f64 / 200.;
            Point::new(31.2304 + t.sin() * 0.05, 121.4737 + i as f64 * 0.0005)
        })
        .collect()
}

fn chunk_planning(c: &mut Criterion) {
    let points = day_of_points();
    let config = RouteConfig::default();
    c.bench_function("plan_chunks_for_a_day", |b| {
        b.iter(|| {
            let mut cursor = 0;
            let mut chunks = 0;
            while cursor + 1 < points.len() {
                let chunk = plan_chunk(&points, cursor, &config);
                cursor = *chunk.last().unwrap();
                chunks += 1;
            }
            std::hint::black_box(chunks)
        });
    });
}

fn cache_codec(c: &mut Criterion) {
    let route = Route::new(
        day_of_points()
            .into_iter()
            .map(|point| RoutePoint {
                point,
                distance_m: 120.,
                polyline: Some("_p~iF~ps|U_ulLnnqC_mqNvxq`@".to_string()),
                label: Some("Some Street 42".to_string()),
                selected: false,
            })
            .collect(),
    )
    .unwrap();
    let document = directions_codec::encode_to_string(&route).unwrap();

    c.bench_function("encode_route", |b| {
        b.iter(|| std::hint::black_box(directions_codec::encode_to_string(&route).unwrap()));
    });
    c.bench_function("decode_route", |b| {
        b.iter(|| std::hint::black_box(directions_codec::decode(&document).unwrap()));
    });
}

criterion_group!(benches, chunk_planning, cache_codec);
criterion_main!(benches);
