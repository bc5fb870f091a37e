//! Stream decoder: turns a chunked response body into content deltas.
//!
//! Chunks rarely line up with protocol lines, so the decoder keeps the
//! trailing partial line in a byte buffer across reads and only hands
//! complete lines to the wire adapter. Lines the adapter cannot parse are
//! skipped; streaming is best-effort and one bad line must not end a turn.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Display;
use std::pin::Pin;

use futures::{Stream, StreamExt};
use kiln_core::{CancellationToken, DeltaStream, EngineError, Result, StreamDelta, ToolCall};
use tracing::trace;

use crate::wire::{DecodedLine, ToolCallFragment, WireAdapter};

/// Accumulates a streamed tool call whose pieces arrive across lines.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn absorb(&mut self, fragment: ToolCallFragment) {
        if let Some(id) = fragment.id {
            self.id = id;
        }
        if let Some(name) = fragment.name {
            self.name = name;
        }
        if let Some(args) = fragment.arguments {
            self.arguments.push_str(&args);
        }
    }

    fn into_tool_call(self, index: u32) -> ToolCall {
        let id = if self.id.is_empty() {
            format!("call_{index}")
        } else {
            self.id
        };
        ToolCall::new(id, self.name, self.arguments)
    }
}

/// Pull-based decoder over any stream of byte chunks.
pub struct StreamDecoder<S> {
    adapter: WireAdapter,
    upstream: Option<Pin<Box<S>>>,
    cancel: CancellationToken,
    buffer: Vec<u8>,
    ready: VecDeque<StreamDelta>,
    tool_calls: BTreeMap<u32, ToolCallAccumulator>,
    finished: bool,
}

impl<S, B, E> StreamDecoder<S>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    pub fn new(adapter: WireAdapter, upstream: S, cancel: CancellationToken) -> Self {
        Self {
            adapter,
            upstream: Some(Box::pin(upstream)),
            cancel,
            buffer: Vec::new(),
            ready: VecDeque::new(),
            tool_calls: BTreeMap::new(),
            finished: false,
        }
    }

    /// The next delta, `Ok(None)` once the stream has completed.
    ///
    /// Cancellation is checked before and after every upstream read and
    /// surfaces as `Cancelled`, never as a decode problem.
    pub async fn next_delta(&mut self) -> Result<Option<StreamDelta>> {
        loop {
            if self.cancel.is_cancelled() {
                self.upstream = None;
                return Err(EngineError::Cancelled);
            }

            if let Some(delta) = self.ready.pop_front() {
                return Ok(Some(delta));
            }

            if self.finished {
                return Ok(None);
            }

            if let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=line_end).collect();
                self.decode(&line);
                continue;
            }

            let Some(upstream) = self.upstream.as_mut() else {
                // Upstream exhausted: flush a final unterminated line
                let rest = std::mem::take(&mut self.buffer);
                self.decode(&rest);
                self.finish();
                continue;
            };

            let chunk = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                chunk = upstream.next() => Some(chunk),
            };

            // Also covers the token winning the race above
            if self.cancel.is_cancelled() {
                self.upstream = None;
                return Err(EngineError::Cancelled);
            }

            match chunk {
                Some(Some(Ok(bytes))) => self.buffer.extend_from_slice(bytes.as_ref()),
                Some(Some(Err(e))) => {
                    self.upstream = None;
                    self.finished = true;
                    return Err(EngineError::Network(format!(
                        "response stream interrupted: {e}"
                    )));
                }
                Some(None) | None => self.upstream = None,
            }
        }
    }

    fn decode(&mut self, raw: &[u8]) {
        if self.finished {
            return;
        }

        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return;
        }

        let Some(decoded) = self.adapter.decode_line(line) else {
            trace!(provider = %self.adapter.kind(), line = %line, "Skipping undecodable stream line");
            return;
        };

        let DecodedLine {
            content,
            tool_calls,
            fragments,
            done,
        } = decoded;

        for fragment in fragments {
            self.tool_calls.entry(fragment.index).or_default().absorb(fragment);
        }

        if !content.is_empty() || !tool_calls.is_empty() {
            self.ready.push_back(StreamDelta { content, tool_calls });
        }

        if done {
            self.finish();
        }
    }

    /// Stop reading and release any accumulated tool calls as a last delta.
    fn finish(&mut self) {
        self.finished = true;
        self.upstream = None;
        self.buffer.clear();

        let tool_calls: Vec<ToolCall> = std::mem::take(&mut self.tool_calls)
            .into_iter()
            .map(|(index, acc)| acc.into_tool_call(index))
            .collect();
        if !tool_calls.is_empty() {
            self.ready.push_back(StreamDelta {
                content: String::new(),
                tool_calls,
            });
        }
    }
}

impl<S, B, E> StreamDecoder<S>
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    /// Adapt the decoder into a boxed stream. The stream ends after the
    /// completion signal or after the first error.
    pub fn into_stream(self) -> DeltaStream {
        futures::stream::unfold(Some(self), |state| async move {
            let mut decoder = state?;
            match decoder.next_delta().await {
                Ok(Some(delta)) => Some((Ok(delta), Some(decoder))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::ProviderKind;

    type Chunk = std::result::Result<Vec<u8>, std::io::Error>;

    fn chunks(parts: &[&str]) -> Vec<Chunk> {
        parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect()
    }

    fn decoder(
        kind: ProviderKind,
        parts: &[&str],
    ) -> StreamDecoder<futures::stream::Iter<std::vec::IntoIter<Chunk>>> {
        StreamDecoder::new(
            WireAdapter::for_kind(kind),
            futures::stream::iter(chunks(parts)),
            CancellationToken::new(),
        )
    }

    async fn collect_text(mut decoder: StreamDecoder<impl Stream<Item = Chunk>>) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(delta) = decoder.next_delta().await.unwrap() {
            out.push(delta.content);
        }
        out
    }

    #[tokio::test]
    async fn ndjson_hello() {
        let deltas = collect_text(decoder(
            ProviderKind::Ndjson,
            &[
                "{\"message\":{\"content\":\"Hel\"},\"done\":false}\n{\"message\":{\"content\":\"lo\"},\"done\":true}",
            ],
        ))
        .await;
        assert_eq!(deltas, vec!["Hel", "lo"]);
        assert_eq!(deltas.concat(), "Hello");
    }

    #[tokio::test]
    async fn sse_hi_then_end() {
        let deltas = collect_text(decoder(
            ProviderKind::OpenAiCompat,
            &[
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\ndata: [DONE]\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n",
            ],
        ))
        .await;
        assert_eq!(deltas, vec!["Hi"]);
    }

    #[tokio::test]
    async fn lines_split_across_chunks_are_reassembled() {
        let deltas = collect_text(decoder(
            ProviderKind::Ndjson,
            &[
                "{\"message\":{\"con",
                "tent\":\"fn \"},\"done\":false}\n{\"mess",
                "age\":{\"content\":\"main\"},\"done\":false}\r\n",
                "{\"message\":{\"content\":\"()\"},\"done\":true}\n",
            ],
        ))
        .await;
        assert_eq!(deltas.concat(), "fn main()");
    }

    #[tokio::test]
    async fn multibyte_text_split_mid_character() {
        let line = "{\"message\":{\"content\":\"héllo\"},\"done\":true}\n".as_bytes();
        // Split inside the two-byte 'é'
        let split = line.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let parts: Vec<Chunk> = vec![Ok(line[..split].to_vec()), Ok(line[split..].to_vec())];
        let decoder = StreamDecoder::new(
            WireAdapter::for_kind(ProviderKind::Ndjson),
            futures::stream::iter(parts),
            CancellationToken::new(),
        );
        assert_eq!(collect_text(decoder).await, vec!["héllo"]);
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let deltas = collect_text(decoder(
            ProviderKind::Ndjson,
            &[
                "{\"message\":{\"content\":\"a\"},\"done\":false}\n",
                "{not json}\n",
                "{\"message\":{\"content\":\"b\"},\"done\":false}\n",
                "\n",
                "{\"message\":{\"content\":\"c\"},\"done\":true}\n",
            ],
        ))
        .await;
        assert_eq!(deltas.concat(), "abc");
    }

    #[tokio::test]
    async fn leftover_partial_line_is_flushed_at_end() {
        let deltas = collect_text(decoder(
            ProviderKind::Ndjson,
            &[
                "{\"message\":{\"content\":\"x\"},\"done\":false}\n",
                "{\"message\":{\"content\":\"y\"},\"done\":false}",
            ],
        ))
        .await;
        assert_eq!(deltas, vec!["x", "y"]);
    }

    #[tokio::test]
    async fn leftover_garbage_is_skipped_at_end() {
        let deltas = collect_text(decoder(
            ProviderKind::Ndjson,
            &["{\"message\":{\"content\":\"x\"},\"done\":false}\n{\"message\":"],
        ))
        .await;
        assert_eq!(deltas, vec!["x"]);
    }

    #[tokio::test]
    async fn sse_tool_call_fragments_are_joined() {
        let mut decoder = decoder(
            ProviderKind::OpenAiCompat,
            &[
                "data: {\"choices\":[{\"delta\":{\"content\":\"Creating\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_a\",\"function\":{\"name\":\"create_file\",\"arguments\":\"{\\\"file_path\\\":\"}}]}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\"x.rs\\\"}\"}}]}}]}\n\n",
                "data: [DONE]\n\n",
            ],
        );

        let first = decoder.next_delta().await.unwrap().unwrap();
        assert_eq!(first.content, "Creating");

        let last = decoder.next_delta().await.unwrap().unwrap();
        assert_eq!(last.tool_calls.len(), 1);
        assert_eq!(last.tool_calls[0].id, "call_a");
        assert_eq!(last.tool_calls[0].arguments, "{\"file_path\":\"x.rs\"}");

        assert!(decoder.next_delta().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn body_error_is_a_network_error() {
        let parts: Vec<Chunk> = vec![
            Ok(b"{\"message\":{\"content\":\"a\"},\"done\":false}\n".to_vec()),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ];
        let mut decoder = StreamDecoder::new(
            WireAdapter::for_kind(ProviderKind::Ndjson),
            futures::stream::iter(parts),
            CancellationToken::new(),
        );
        assert_eq!(decoder.next_delta().await.unwrap().unwrap().content, "a");
        assert!(matches!(decoder.next_delta().await, Err(EngineError::Network(_))));
    }

    #[tokio::test]
    async fn cancel_mid_stream_keeps_only_earlier_deltas() {
        let cancel = CancellationToken::new();
        let upstream = futures::stream::iter(chunks(&[
            "{\"message\":{\"content\":\"one\"},\"done\":false}\n",
        ]))
        .chain(futures::stream::pending());
        let mut decoder = StreamDecoder::new(
            WireAdapter::for_kind(ProviderKind::Ndjson),
            upstream,
            cancel.clone(),
        );

        assert_eq!(decoder.next_delta().await.unwrap().unwrap().content, "one");

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            trigger.cancel();
        });

        // Blocked on the pending upstream until the token fires
        assert_eq!(decoder.next_delta().await, Err(EngineError::Cancelled));
        assert_eq!(decoder.next_delta().await, Err(EngineError::Cancelled));
    }

    #[tokio::test]
    async fn cancelled_before_first_read() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut decoder = StreamDecoder::new(
            WireAdapter::for_kind(ProviderKind::Ndjson),
            futures::stream::iter(chunks(&["{\"message\":{\"content\":\"a\"},\"done\":true}\n"])),
            cancel,
        );
        assert_eq!(decoder.next_delta().await, Err(EngineError::Cancelled));
    }

    #[tokio::test]
    async fn into_stream_ends_after_completion() {
        let stream = decoder(
            ProviderKind::Ndjson,
            &["{\"message\":{\"content\":\"a\"},\"done\":false}\n{\"done\":true}\n"],
        )
        .into_stream();
        let items: Vec<Result<StreamDelta>> = stream.collect().await;
        assert_eq!(items, vec![Ok(StreamDelta::text("a"))]);
    }
}
