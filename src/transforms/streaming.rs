//! SSE stream rewriting.
//!
//! Rewrites `data:` lines in flight so the `prompt_cache_key` echoed by the
//! upstream matches the caller-declared key. Chunks accumulate in a
//! carry-over buffer and are processed one complete line at a time; only the
//! undelimited tail is held between chunks, so no more than a single line is
//! ever buffered.

use async_stream::stream;
use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use serde_json::Value;

use crate::constants::{CACHE_KEY_FIELD, SSE_DONE};

/// Rewrite the cache key inside an SSE body as chunks arrive.
///
/// Lines that are not `data:` lines, the `[DONE]` sentinel, and payloads
/// that fail to parse all pass through byte-for-byte. Upstream read errors
/// end the stream with an error; the pending fragment is dropped with it.
pub fn rewrite_sse_stream(
    body: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
    cache_key: String,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send {
    stream! {
        use futures_util::StreamExt;

        let mut body = std::pin::pin!(body);
        let mut buffer = BytesMut::new();

        while let Some(chunk_result) = body.next().await {
            let chunk = match chunk_result {
                Ok(c) => c,
                Err(e) => {
                    yield Err(std::io::Error::other(e));
                    return;
                }
            };

            buffer.extend_from_slice(&chunk);

            // Split on raw 0x0A: multi-byte UTF-8 scalars never contain it,
            // so chunks that cut a code point apart reassemble correctly.
            let mut output = BytesMut::new();
            while let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') {
                let line = buffer.split_to(newline_pos + 1);
                output.extend_from_slice(&rewrite_line(&line[..line.len() - 1], &cache_key));
                output.extend_from_slice(b"\n");
            }

            if !output.is_empty() {
                yield Ok(output.freeze());
            }
        }

        // Trailing fragment with no terminator: rewritten when possible,
        // emitted without adding one.
        if !buffer.is_empty() {
            yield Ok(rewrite_line(&buffer, &cache_key));
        }
    }
}

/// Rewrite one line (terminator excluded), preserving a trailing `\r`.
fn rewrite_line(line: &[u8], cache_key: &str) -> Bytes {
    let (content, crlf) = match line.last() {
        Some(b'\r') => (&line[..line.len() - 1], true),
        _ => (line, false),
    };

    let rewritten = std::str::from_utf8(content)
        .ok()
        .and_then(|text| rewrite_data_line(text, cache_key));

    match rewritten {
        Some(mut text) => {
            if crlf {
                text.push('\r');
            }
            Bytes::from(text)
        }
        None => Bytes::copy_from_slice(line),
    }
}

/// Rewrite a single `data:` line. Returns the replacement text when a
/// mutation applies, `None` to pass the original through.
fn rewrite_data_line(line: &str, cache_key: &str) -> Option<String> {
    let payload = line.strip_prefix("data:")?.trim_start();
    if payload.is_empty() || payload == SSE_DONE {
        return None;
    }

    let mut event: Value = serde_json::from_str(payload).ok()?;
    if !set_cache_key(&mut event, cache_key) {
        return None;
    }

    Some(format!("data: {}", serde_json::to_string(&event).ok()?))
}

/// Prefer a `response` envelope object; fall back to an existing top-level
/// field. Events carrying neither stay untouched.
fn set_cache_key(event: &mut Value, cache_key: &str) -> bool {
    let Some(obj) = event.as_object_mut() else {
        return false;
    };

    if let Some(Value::Object(response)) = obj.get_mut("response") {
        response.insert(
            CACHE_KEY_FIELD.to_string(),
            Value::String(cache_key.to_string()),
        );
        return true;
    }

    if obj.contains_key(CACHE_KEY_FIELD) {
        obj.insert(
            CACHE_KEY_FIELD.to_string(),
            Value::String(cache_key.to_string()),
        );
        return true;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{StreamExt, stream};

    fn chunked(parts: Vec<Bytes>) -> impl Stream<Item = Result<Bytes, reqwest::Error>> + Send {
        let parts: Vec<Result<Bytes, reqwest::Error>> = parts.into_iter().map(Ok).collect();
        stream::iter(parts)
    }

    async fn run(parts: &[&str], key: &str) -> String {
        let parts = parts
            .iter()
            .map(|p| Bytes::copy_from_slice(p.as_bytes()))
            .collect();
        run_bytes(parts, key).await
    }

    async fn run_bytes(parts: Vec<Bytes>, key: &str) -> String {
        let mut out = Vec::new();
        let mut stream = std::pin::pin!(rewrite_sse_stream(chunked(parts), key.to_string()));
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        String::from_utf8(out).unwrap()
    }

    fn data_payload(line: &str) -> Value {
        serde_json::from_str(line.strip_prefix("data: ").unwrap()).unwrap()
    }

    #[tokio::test]
    async fn rewrites_line_split_across_chunks() {
        let out = run(
            &[
                "data: {\"type\":\"response.completed\",\"resp",
                "onse\":{\"prompt_cache_key\":null}}\n\n",
            ],
            "declared-7",
        )
        .await;

        let mut lines = out.split('\n');
        let event = data_payload(lines.next().unwrap());
        assert_eq!(event["response"]["prompt_cache_key"], "declared-7");
        assert_eq!(event["type"], "response.completed");
        // Blank separator line survives
        assert_eq!(lines.next(), Some(""));
        assert_eq!(lines.next(), Some(""));
        assert_eq!(lines.next(), None);
    }

    #[tokio::test]
    async fn done_sentinel_is_untouched() {
        let out = run(&["data: [DONE]\n\n"], "key").await;
        assert_eq!(out, "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn crlf_terminators_are_preserved() {
        let out = run(&["data: {\"prompt_cache_key\":\"old\"}\r\n"], "new").await;
        assert!(out.ends_with("\r\n"));
        let event = data_payload(out.trim_end());
        assert_eq!(event["prompt_cache_key"], "new");
    }

    #[tokio::test]
    async fn non_data_lines_pass_through() {
        let input = "event: response.created\nretry: 500\n: comment\n\n";
        assert_eq!(run(&[input], "key").await, input);
    }

    #[tokio::test]
    async fn malformed_json_passes_through() {
        let input = "data: {broken\n";
        assert_eq!(run(&[input], "key").await, input);
    }

    #[tokio::test]
    async fn empty_data_line_passes_through() {
        assert_eq!(run(&["data:\n"], "key").await, "data:\n");
    }

    #[tokio::test]
    async fn events_without_a_key_slot_pass_through() {
        let input = "data: {\"type\":\"response.output_text.delta\",\"delta\":\"hi\"}\n";
        assert_eq!(run(&[input], "key").await, input);
    }

    #[tokio::test]
    async fn top_level_key_is_overwritten_when_present() {
        let out = run(&["data: {\"id\":\"r1\",\"prompt_cache_key\":\"old\"}\n"], "new").await;
        let event = data_payload(out.trim_end());
        assert_eq!(event["prompt_cache_key"], "new");
        assert_eq!(event["id"], "r1");
    }

    #[tokio::test]
    async fn response_envelope_gains_key_even_when_absent() {
        let out = run(&["data: {\"response\":{\"id\":\"r1\"}}\n"], "new").await;
        let event = data_payload(out.trim_end());
        assert_eq!(event["response"]["prompt_cache_key"], "new");
    }

    #[tokio::test]
    async fn trailing_fragment_is_rewritten_without_adding_newline() {
        let out = run(&["data: {\"prompt_cache_key\":\"old\"}"], "new").await;
        assert!(!out.ends_with('\n'));
        let event = data_payload(&out);
        assert_eq!(event["prompt_cache_key"], "new");
    }

    #[tokio::test]
    async fn incomplete_trailing_fragment_is_flushed_verbatim() {
        let out = run(&["data: {\"half", ""], "key").await;
        assert_eq!(out, "data: {\"half");
    }

    #[tokio::test]
    async fn multibyte_chars_survive_arbitrary_chunk_cuts() {
        let line = "data: {\"prompt_cache_key\":\"ключ\",\"note\":\"caché\"}\n";
        let split = (1..line.len())
            .find(|&i| !line.is_char_boundary(i))
            .unwrap();
        let bytes = line.as_bytes();
        let out = run_bytes(
            vec![
                Bytes::copy_from_slice(&bytes[..split]),
                Bytes::copy_from_slice(&bytes[split..]),
            ],
            "fresh",
        )
        .await;

        let event = data_payload(out.trim_end());
        assert_eq!(event["prompt_cache_key"], "fresh");
        assert_eq!(event["note"], "caché");
    }

    #[tokio::test]
    async fn multiple_lines_in_one_chunk_stay_ordered() {
        let out = run(
            &["data: {\"prompt_cache_key\":\"a\"}\ndata: [DONE]\n"],
            "z",
        )
        .await;

        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(data_payload(lines[0])["prompt_cache_key"], "z");
        assert_eq!(lines[1], "data: [DONE]");
    }
}
