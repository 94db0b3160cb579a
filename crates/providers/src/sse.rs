//! Shared SSE streaming infrastructure for all provider adapters.
//!
//! Every provider follows the same pattern: receive a `reqwest::Response`,
//! buffer chunks, split on `\n\n`, extract `data:` payloads, and feed each
//! payload to a provider-specific parser that returns `Vec<Result<ProviderEvent>>`.

use crate::traits::CancelSignal;
use crate::util::from_reqwest;
use muxd_domain::error::Result;
use muxd_domain::stream::{BoxStream, ProviderErrorKind, ProviderEvent};

/// Extract complete `data:` payloads from an SSE buffer.
///
/// SSE events are delimited by `\n\n`. The buffer is drained in-place:
/// consumed bytes are removed and any trailing partial event remains for
/// the next call.
pub(crate) fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let mut data_lines = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2);

        for line in block.lines() {
            let line = line.trim();
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    data_lines.push(data.to_string());
                }
            }
        }
    }

    data_lines
}

/// Build a [`BoxStream`] from an SSE `reqwest::Response` and a provider-specific
/// parser closure. The closure receives each `data:` payload string and
/// returns zero or more events; it is `FnMut` since Anthropic needs mutable
/// state across calls to assemble streamed tool-call arguments.
///
/// Polls `cancel` between chunks and emits a terminal `error(canceled)`
/// rather than silently dropping the connection, so the Loop's turn
/// algorithm (spec §4.4 step 4) sees an explicit event to act on.
pub(crate) fn sse_response_stream<F>(
    response: reqwest::Response,
    cancel: CancelSignal,
    mut parse_data: F,
) -> BoxStream<'static, Result<ProviderEvent>>
where
    F: FnMut(&str) -> Vec<Result<ProviderEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();

        loop {
            if cancel.is_cancelled() {
                yield Ok(ProviderEvent::Error {
                    kind: ProviderErrorKind::Canceled,
                    retry_after_ms: None,
                    message: "canceled".into(),
                });
                break;
            }

            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    for data in drain_data_lines(&mut buffer) {
                        for event in parse_data(&data) {
                            yield event;
                        }
                    }
                }
                Ok(None) => {
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                        for data in drain_data_lines(&mut buffer) {
                            for event in parse_data(&data) {
                                yield event;
                            }
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(from_reqwest(e));
                    break;
                }
            }
        }
    };

    Box::pin(stream)
}
