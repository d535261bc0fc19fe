use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgba};
use serde_json::{json, Value};
use transformations::{
    CancellationToken, Coordinator, LogEvent, LogSink, RequestContext, RustCodec,
};

/// Discards events so the benchmark measures pixel work only.
struct NullSink;

#[async_trait::async_trait]
impl LogSink for NullSink {
    async fn log(&self, _event: &LogEvent) -> transformations::Result<()> {
        Ok(())
    }
}

fn create_test_image(size: u32) -> Vec<u8> {
    let image = ImageBuffer::from_fn(size, size, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8, 255])
    });
    let mut bytes = std::io::Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(image)
        .write_to(&mut bytes, ImageFormat::Png)
        .unwrap();
    bytes.into_inner()
}

fn bench_pipelines(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let coordinator = Coordinator::new(Arc::new(RustCodec::new()), Arc::new(NullSink));
    let ctx = RequestContext::default();

    let cases: Vec<(&str, Value)> = vec![
        (
            "resize",
            json!({ "type": "resize", "params": { "width": 128, "height": 128 } }),
        ),
        ("rotate_45", json!({ "type": "rotate", "params": { "angle": 45 } })),
        (
            "pipeline",
            json!({ "operations": [
                { "type": "crop", "params": { "width": 200, "height": 150 } },
                { "type": "filter", "params": { "filterType": "sharpen" } },
                { "type": "format", "params": { "format": "jpeg" } }
            ] }),
        ),
    ];

    let mut group = c.benchmark_group("pipeline_processing");
    for size in [256u32, 1024] {
        let input = create_test_image(size);
        for (name, body) in &cases {
            group.bench_with_input(BenchmarkId::new(*name, size), &input, |b, input| {
                b.iter(|| {
                    let output = runtime
                        .block_on(coordinator.process(
                            body,
                            input.clone(),
                            &ctx,
                            &CancellationToken::new(),
                        ))
                        .unwrap();
                    black_box(output.bytes.len())
                })
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_pipelines);
criterion_main!(benches);
