use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, StreamExt, stream};
use serde_json::Value;
use snafu::ResultExt;

use super::error::{DecodeError, DecodeResult, MalformedEventSnafu};

/// Newline framing for a JSON-lines body.
///
/// Bytes are buffered only until the next `\n`; each complete non-blank line is
/// parsed into one record. UTF-8 is validated per line, so multi-byte
/// characters split across chunks decode correctly.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to hold no `\n`.
    scanned: usize,
    line_number: usize,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Returns the next complete record, or `None` when more bytes are needed.
    pub fn next_record(&mut self) -> Option<DecodeResult<Value>> {
        while let Some(offset) = self.buffer[self.scanned..]
            .iter()
            .position(|byte| *byte == b'\n')
        {
            let newline = self.scanned + offset;
            let line = self.buffer.drain(..=newline).collect::<Vec<_>>();
            self.scanned = 0;
            self.line_number += 1;
            if let Some(record) = parse_line(&line[..newline], self.line_number) {
                return Some(record);
            }
        }

        self.scanned = self.buffer.len();
        None
    }

    /// Flushes a final record that arrived without a trailing newline.
    pub fn finish(&mut self) -> Option<DecodeResult<Value>> {
        if self.buffer.is_empty() {
            return None;
        }

        let line = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        self.line_number += 1;
        parse_line(&line, self.line_number)
    }

    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }
}

fn parse_line(line: &[u8], line_number: usize) -> Option<DecodeResult<Value>> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    if line.iter().all(u8::is_ascii_whitespace) {
        return None;
    }

    Some(
        serde_json::from_slice::<Value>(line).context(MalformedEventSnafu {
            stage: "decode-json-line",
            line_number,
            line: String::from_utf8_lossy(line).into_owned(),
        }),
    )
}

struct DecodeState<S> {
    bytes: Pin<Box<S>>,
    decoder: LineDecoder,
    exhausted: bool,
}

/// Lazily decodes a byte stream into JSON records in arrival order.
///
/// A malformed line yields an error item but does not end the sequence; the
/// caller decides whether to abort. A transport error ends it.
pub fn decode_records<S, E>(bytes: S) -> impl Stream<Item = DecodeResult<Value>>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    let state = DecodeState {
        bytes: Box::pin(bytes),
        decoder: LineDecoder::new(),
        exhausted: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(record) = state.decoder.next_record() {
                return Some((record, state));
            }
            if state.exhausted {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => state.decoder.push(&chunk),
                Some(Err(source)) => {
                    state.exhausted = true;
                    tracing::warn!(
                        pending_bytes = state.decoder.pending_bytes(),
                        error = %source,
                        "response body failed mid-stream"
                    );
                    state.decoder = LineDecoder::new();
                    return Some((
                        Err(DecodeError::Transport {
                            stage: "decode-read-chunk",
                            source: Box::new(source),
                        }),
                        state,
                    ));
                }
                None => {
                    state.exhausted = true;
                    if let Some(record) = state.decoder.finish() {
                        return Some((record, state));
                    }
                    return None;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::io;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<Bytes, io::Error>> + use<> {
        let owned = parts
            .iter()
            .map(|part| Ok(Bytes::copy_from_slice(part.as_bytes())))
            .collect::<Vec<_>>();
        stream::iter(owned)
    }

    #[tokio::test]
    async fn records_split_across_chunks_are_reassembled() {
        let records = decode_records(chunks(&["{\"a\":", "1}\n{\"b\"", ":2}\n"]))
            .collect::<Vec<_>>()
            .await;

        let values = records
            .into_iter()
            .map(|record| record.unwrap())
            .collect::<Vec<_>>();
        assert_eq!(values, vec![json!({ "a": 1 }), json!({ "b": 2 })]);
    }

    #[tokio::test]
    async fn final_line_without_newline_is_flushed() {
        let records = decode_records(chunks(&["{\"a\":1}\n{\"error\":\"boom\"}"]))
            .collect::<Vec<_>>()
            .await;

        assert_eq!(records.len(), 2);
        assert_eq!(records[1].as_ref().unwrap(), &json!({ "error": "boom" }));
    }

    #[tokio::test]
    async fn malformed_line_does_not_end_the_sequence() {
        let records = decode_records(chunks(&["{\"a\":1}\n", "not json\n", "\r\n", "{\"b\":2}\r\n"]))
            .collect::<Vec<_>>()
            .await;

        assert_eq!(records.len(), 3);
        match &records[1] {
            Err(DecodeError::MalformedEvent {
                line_number, line, ..
            }) => {
                assert_eq!(*line_number, 2);
                assert_eq!(line, "not json");
            }
            other => panic!("expected malformed event, got {other:?}"),
        }
        assert_eq!(records[2].as_ref().unwrap(), &json!({ "b": 2 }));
    }

    #[tokio::test]
    async fn multibyte_characters_survive_chunk_boundaries() {
        let encoded = "{\"content\":\"caf\u{e9}\"}\n".as_bytes();
        let split = encoded.len() - 4;

        let parts: Vec<Result<Bytes, io::Error>> = vec![
            Ok(Bytes::copy_from_slice(&encoded[..split])),
            Ok(Bytes::copy_from_slice(&encoded[split..])),
        ];

        let records = decode_records(stream::iter(parts)).collect::<Vec<_>>().await;

        assert_eq!(records[0].as_ref().unwrap(), &json!({ "content": "caf\u{e9}" }));
    }

    #[tokio::test]
    async fn transport_error_ends_the_sequence() {
        let parts: Vec<Result<Bytes, io::Error>> = vec![
            Ok(Bytes::from_static(b"{\"a\":1}\n{\"partial\"")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
            Ok(Bytes::from_static(b"{\"never\":true}\n")),
        ];

        let records = decode_records(stream::iter(parts)).collect::<Vec<_>>().await;

        assert_eq!(records.len(), 2);
        assert!(matches!(records[1], Err(DecodeError::Transport { .. })));
    }

    #[test]
    fn blank_lines_are_skipped() {
        let mut decoder = LineDecoder::new();
        decoder.push(b"\n  \n{\"x\":true}\n");

        assert_eq!(decoder.next_record().unwrap().unwrap(), json!({ "x": true }));
        assert!(decoder.next_record().is_none());
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn line_fed_byte_by_byte_is_decoded_once_complete() {
        let mut decoder = LineDecoder::new();
        let input = b"{\"content\":\"a long answer\"}\n{\"n\":2}\n";
        let first_newline = input.iter().position(|byte| *byte == b'\n').unwrap();
        let mut records = Vec::new();

        for (index, byte) in input.iter().enumerate() {
            decoder.push(std::slice::from_ref(byte));
            if let Some(record) = decoder.next_record() {
                records.push((index, record.unwrap()));
            }
        }

        assert_eq!(
            records,
            vec![
                (first_newline, json!({ "content": "a long answer" })),
                (input.len() - 1, json!({ "n": 2 })),
            ]
        );
        assert_eq!(decoder.pending_bytes(), 0);
        assert!(decoder.finish().is_none());
    }
}
