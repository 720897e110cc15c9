//! Encode a few parts, then stream them back out of the decoder.
//!
//! ```bash
//! cargo run --example roundtrip
//! ```

use bytes::Bytes;
use futures::{StreamExt, stream};
use http::{HeaderMap, HeaderValue, header};
use partflow_multipart::protocol::Part;
use partflow_multipart::{decode, encode};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let parts = vec![
        form_part("greeting", b"hello multipart"),
        form_part("payload", b"a second, binary-ish part \x00\x01\x02"),
    ];

    let encoded = encode("example-boundary", stream::iter(parts));

    let mut decoded = decode("example-boundary", encoded);
    while let Some(part) = decoded.next().await {
        let part = part.expect("round trip produces valid framing");
        let name = part.name().unwrap_or_else(|| "<unnamed>".to_string());
        let bytes = part.into_bytes().await.expect("collect part content");
        info!(name, len = bytes.len(), "decoded part");
    }
}

fn form_part(name: &str, content: &'static [u8]) -> Part {
    let mut headers = HeaderMap::new();
    let disposition = format!("form-data; name=\"{name}\"");
    headers.insert(header::CONTENT_DISPOSITION, HeaderValue::from_str(&disposition).expect("ascii name"));
    Part::from_bytes(headers, Bytes::from_static(content))
}
