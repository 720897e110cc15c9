use bytes::{Bytes, BytesMut};
use criterion::{Criterion, criterion_group, criterion_main};
use http::{HeaderMap, HeaderValue, header};
use partflow_multipart::codec::{EventDecoder, FrameEncoder, FrameItem};
use std::hint::black_box;
use tokio_util::codec::{Decoder, Encoder};

fn build_message(parts: usize, content_len: usize) -> Bytes {
    let mut encoder = FrameEncoder::new("bench-boundary");
    let mut dst = BytesMut::new();
    let content = Bytes::from(vec![b'x'; content_len]);

    for i in 0..parts {
        let mut headers = HeaderMap::new();
        let disposition = format!("form-data; name=\"field-{i}\"");
        headers.insert(header::CONTENT_DISPOSITION, HeaderValue::from_str(&disposition).unwrap());
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));

        encoder.encode(FrameItem::<Bytes>::PartHead(headers), &mut dst).unwrap();
        encoder.encode(FrameItem::Content(content.clone()), &mut dst).unwrap();
    }
    encoder.encode(FrameItem::<Bytes>::Eof, &mut dst).unwrap();

    dst.freeze()
}

fn drain_events(message: &Bytes) -> usize {
    let mut decoder = EventDecoder::new("bench-boundary").unwrap();
    let mut buf = BytesMut::from(&message[..]);
    let mut events = 0;
    while let Some(event) = decoder.decode(&mut buf).unwrap() {
        black_box(&event);
        events += 1;
    }
    decoder.finish().unwrap();
    events
}

fn bench_decode(c: &mut Criterion) {
    let small = build_message(4, 64);
    let large = build_message(16, 64 * 1024);

    c.bench_function("decode_small_parts", |b| b.iter(|| drain_events(black_box(&small))));
    c.bench_function("decode_large_parts", |b| b.iter(|| drain_events(black_box(&large))));
}

fn bench_encode(c: &mut Criterion) {
    c.bench_function("encode_framing", |b| b.iter(|| black_box(build_message(16, 1024))));
}

criterion_group!(benches, bench_decode, bench_encode);
criterion_main!(benches);
