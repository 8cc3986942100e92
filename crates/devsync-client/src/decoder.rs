//! Newline-delimited JSON decoding for streamed watch responses.

use std::marker::PhantomData;

use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A single line that could not be decoded.
#[derive(Debug, thiserror::Error)]
#[error("line {line}: {source}")]
pub struct LineError {
    /// 1-based line number within the stream.
    pub line: u64,
    /// The offending line, lossily decoded.
    pub content: String,
    #[source]
    pub source: serde_json::Error,
}

/// Incremental decoder for `\n`-delimited JSON records.
///
/// The buffer only ever holds the bytes after the last newline seen. Bytes
/// are buffered raw, so multi-byte characters split across chunks decode
/// correctly once the line completes. Each byte is searched for a newline
/// once, however many chunks a line arrives in.
#[derive(Debug)]
pub struct StreamDecoder<T> {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to contain no newline.
    scanned: usize,
    lines: u64,
    _record: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> StreamDecoder<T> {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            lines: 0,
            _record: PhantomData,
        }
    }

    /// Append `bytes` and decode every line they complete, in order.
    ///
    /// A malformed line yields one `Err` and decoding carries on with the
    /// next line.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<std::result::Result<T, LineError>> {
        self.buffer.extend_from_slice(bytes);

        let mut records = Vec::new();
        let mut start = 0;
        let mut search = self.scanned;
        while let Some(offset) = self.buffer[search..].iter().position(|&b| b == b'\n') {
            let end = search + offset;
            self.lines += 1;
            if let Some(record) = decode_line(self.lines, &self.buffer[start..end]) {
                records.push(record);
            }
            start = end + 1;
            search = start;
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();

        records
    }

    /// Signal end of stream and decode an unterminated final line, if any.
    pub fn finish(&mut self) -> Option<std::result::Result<T, LineError>> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        self.lines += 1;
        decode_line(self.lines, &rest)
    }

    /// Bytes held back waiting for a newline.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }
}

impl<T: DeserializeOwned> Default for StreamDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_line<T: DeserializeOwned>(
    number: u64,
    line: &[u8],
) -> Option<std::result::Result<T, LineError>> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    if line.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    Some(serde_json::from_slice(line).map_err(|source| LineError {
        line: number,
        content: String::from_utf8_lossy(line).into_owned(),
        source,
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Watch records
// ─────────────────────────────────────────────────────────────────────────────

/// Type tag of a watch record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
    Bookmark,
    Error,
}

/// One record of a streamed watch: `{type, object}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent {
    #[serde(rename = "type")]
    pub kind: WatchEventType,
    pub object: serde_json::Value,
}

/// Decode a chunked byte stream into watch records.
///
/// Malformed lines are logged and skipped. A transport error is yielded once
/// and ends the stream.
pub fn watch_events<S, B>(chunks: S) -> impl Stream<Item = Result<WatchEvent>>
where
    S: Stream<Item = std::result::Result<B, reqwest::Error>>,
    B: AsRef<[u8]>,
{
    async_stream::stream! {
        let mut decoder = StreamDecoder::<WatchEvent>::new();
        futures::pin_mut!(chunks);

        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(bytes) => {
                    for record in decoder.feed(bytes.as_ref()) {
                        match record {
                            Ok(event) => yield Ok(event),
                            Err(e) => tracing::warn!(line = e.line, error = %e.source, "skipping malformed watch record"),
                        }
                    }
                }
                Err(e) => {
                    yield Err(Error::Network(e));
                    return;
                }
            }
        }

        match decoder.finish() {
            Some(Ok(event)) => yield Ok(event),
            Some(Err(e)) => tracing::warn!(line = e.line, error = %e.source, "skipping malformed trailing watch record"),
            None => {}
        }
        tracing::debug!("watch stream terminated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_EVENTS: &str = concat!(
        r#"{"type":"ADDED","object":{"metadata":{"name":"ws1"}}}"#,
        "\n",
        r#"{"type":"MODIFIED","object":{"metadata":{"name":"ws1"}}}"#,
        "\n",
    );

    fn decode_all(chunks: &[&[u8]]) -> Vec<WatchEvent> {
        let mut decoder = StreamDecoder::<WatchEvent>::new();
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend(decoder.feed(chunk).into_iter().map(|r| r.unwrap()));
        }
        out
    }

    #[test]
    fn test_record_split_mid_line() {
        let mut decoder = StreamDecoder::<WatchEvent>::new();

        let first = decoder.feed(br#"{"type":"ADDED","object":{"metadata":{"name":"ws1"}}}
{"type":"MOD"#);
        assert_eq!(first.len(), 1);
        assert_eq!(decoder.pending(), br#"{"type":"MOD"#);

        let second = decoder.feed(
            br#"IFIED","object":{"metadata":{"name":"ws1"}}}
"#,
        );
        assert_eq!(second.len(), 1);
        assert!(decoder.pending().is_empty());

        let events: Vec<WatchEvent> = first.into_iter().chain(second).map(|r| r.unwrap()).collect();
        assert_eq!(events[0].kind, WatchEventType::Added);
        assert_eq!(events[1].kind, WatchEventType::Modified);
        for event in &events {
            assert_eq!(event.object["metadata"]["name"], "ws1");
        }
    }

    #[test]
    fn test_reassembly_at_every_split_point() {
        let bytes = TWO_EVENTS.as_bytes();
        let whole = decode_all(&[bytes]);
        assert_eq!(whole.len(), 2);

        for split in 0..=bytes.len() {
            let (a, b) = bytes.split_at(split);
            let pieces = decode_all(&[a, b]);
            let kinds: Vec<_> = pieces.iter().map(|e| e.kind).collect();
            assert_eq!(kinds, vec![WatchEventType::Added, WatchEventType::Modified], "split at {}", split);
        }

        let bytewise: Vec<&[u8]> = bytes.chunks(1).collect();
        assert_eq!(decode_all(&bytewise).len(), 2);
    }

    #[test]
    fn test_long_line_in_small_chunks() {
        let name = "x".repeat(64 * 1024);
        let line = format!("{{\"name\":\"{}\"}}\n{{\"name\":\"tail\"}}\n", name);
        let mut decoder = StreamDecoder::<serde_json::Value>::new();
        let mut records = Vec::new();

        for chunk in line.as_bytes().chunks(7) {
            records.extend(decoder.feed(chunk));
            assert_eq!(decoder.scanned, decoder.pending().len());
        }

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].as_ref().unwrap()["name"].as_str().unwrap().len(), name.len());
        assert_eq!(records[1].as_ref().unwrap()["name"], "tail");
        assert!(decoder.pending().is_empty());
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_malformed_line_is_isolated() {
        let mut decoder = StreamDecoder::<serde_json::Value>::new();
        let records = decoder.feed(b"{\"a\":1}\n{not json\n{\"b\":2}\n");

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].as_ref().unwrap()["a"], 1);
        let err = records[1].as_ref().unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.content, "{not json");
        assert_eq!(records[2].as_ref().unwrap()["b"], 2);

        // Still usable after the failure.
        let more = decoder.feed(b"{\"c\":3}\n");
        assert_eq!(more[0].as_ref().unwrap()["c"], 3);
    }

    #[test]
    fn test_blank_lines_and_crlf() {
        let mut decoder = StreamDecoder::<serde_json::Value>::new();
        let records = decoder.feed(b"\n  \n{\"a\":1}\r\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].as_ref().unwrap()["a"], 1);
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let line = "{\"name\":\"wörkspace\"}\n".as_bytes();
        let split = line.iter().position(|&b| b == 0xc3).unwrap() + 1;

        let mut decoder = StreamDecoder::<serde_json::Value>::new();
        assert!(decoder.feed(&line[..split]).is_empty());
        let records = decoder.feed(&line[split..]);
        assert_eq!(records[0].as_ref().unwrap()["name"], "wörkspace");
    }

    #[test]
    fn test_finish_flushes_unterminated_line() {
        let mut decoder = StreamDecoder::<serde_json::Value>::new();
        assert!(decoder.feed(b"{\"a\":1}").is_empty());
        let last = decoder.finish().unwrap().unwrap();
        assert_eq!(last["a"], 1);
        assert!(decoder.finish().is_none());
    }

    #[tokio::test]
    async fn test_watch_events_skips_bad_lines() {
        let chunks: Vec<std::result::Result<Vec<u8>, reqwest::Error>> = vec![
            Ok(br#"{"type":"ADDED","object":{}}"#.to_vec()),
            Ok(b"\ngarbage\n".to_vec()),
            Ok(br#"{"type":"DELETED","object":{}}"#.to_vec()),
        ];

        let events: Vec<_> = watch_events(futures::stream::iter(chunks)).collect().await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].as_ref().unwrap().kind, WatchEventType::Added);
        assert_eq!(events[1].as_ref().unwrap().kind, WatchEventType::Deleted);
    }
}
