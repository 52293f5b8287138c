//! Benchmarks for the streaming path: SSE parsing and frame relay.
//!
//! Run with: cargo bench --bench relay_bench

use chat_gateway::api::models::Message;
use chat_gateway::provider::sse::SseParser;
use chat_gateway::provider::{CanonicalChunk, ChunkStream, FinishReason};
use chat_gateway::services::aggregator::{relay, RelayContext};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use futures::StreamExt;

fn upstream_body(events: usize) -> Vec<u8> {
    let mut body = String::new();
    for i in 0..events {
        body.push_str(&format!(
            "data: {{\"choices\":[{{\"index\":0,\"delta\":{{\"content\":\"token {}\"}},\"finish_reason\":null}}]}}\n\n",
            i
        ));
    }
    body.push_str("data: [DONE]\n\n");
    body.into_bytes()
}

fn bench_sse_parser(c: &mut Criterion) {
    let mut group = c.benchmark_group("sse_parser");

    for events in [10, 100, 1000].iter() {
        let body = upstream_body(*events);
        group.throughput(Throughput::Bytes(body.len() as u64));

        group.bench_function(format!("{}_events_single_read", events), |b| {
            b.iter(|| {
                let mut parser = SseParser::new();
                black_box(parser.feed(&body).unwrap());
            });
        });

        // Network reads rarely line up with event boundaries.
        group.bench_function(format!("{}_events_split_reads", events), |b| {
            b.iter(|| {
                let mut parser = SseParser::new();
                let mut count = 0;
                for piece in body.chunks(37) {
                    count += parser.feed(piece).unwrap().len();
                }
                black_box(count);
            });
        });
    }

    group.finish();
}

fn chunk_stream(chunks: usize) -> ChunkStream {
    let mut items: Vec<_> = (0..chunks)
        .map(|i| Ok(CanonicalChunk::content(format!("token {} ", i))))
        .collect();
    items.push(Ok(CanonicalChunk::finished(FinishReason::Stop)));
    Box::pin(futures::stream::iter(items))
}

fn bench_relay(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let mut group = c.benchmark_group("relay");

    for chunks in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*chunks as u64));
        group.bench_function(format!("{}_chunks", chunks), |b| {
            b.iter(|| {
                runtime.block_on(async {
                    let ctx = RelayContext::new("gpt-4", "openai", vec![Message::user("Hi")]);
                    let (frames, outcome) = relay(chunk_stream(*chunks), ctx);
                    let bytes: usize = frames.map(|f| f.to_bytes().len()).collect::<Vec<_>>().await.iter().sum();
                    black_box((bytes, outcome.await.ok()));
                })
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_sse_parser, bench_relay);
criterion_main!(benches);
