//! Per-flow transcript buffer.
//!
//! Everything the user should see while a block is installed lands here:
//! lines written by tasks, spinner progress, and raw output chunks from
//! child processes. Each append is forwarded to the flow's event sink as a
//! `log` event so a live viewer sees the same bytes the buffer holds.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::events::{EventSink, FlowEvent};

const SPINNER_START: &str = "-";
const SPINNER_SUCCEED: &str = "✔";
const SPINNER_FAIL: &str = "✖";

struct Inner {
    id: String,
    log: Mutex<String>,
    /// Text of the spinner currently running, if any.
    spinner: Mutex<Option<String>>,
    sink: EventSink,
}

/// Append-only log shared by every task of one flow. Cheap to clone.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger").field("id", &self.inner.id).finish()
    }
}

impl Logger {
    pub fn new(id: impl Into<String>, sink: EventSink) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: id.into(),
                log: Mutex::new(String::new()),
                spinner: Mutex::new(None),
                sink,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Append one line. Empty input is ignored.
    pub fn append_log(&self, data: &str) {
        if data.is_empty() {
            return;
        }
        self.emit(format!("{data}\n"));
    }

    /// Append process output exactly as received, partial lines included.
    pub fn write_chunk(&self, data: &str) {
        if data.is_empty() {
            return;
        }
        self.emit(data.to_string());
    }

    fn emit(&self, data: String) {
        tracing::debug!(flow = %self.inner.id, "{}", data.trim_end());
        self.inner.log.lock().push_str(&data);
        self.inner.sink.send(FlowEvent::Log {
            id: self.inner.id.clone(),
            data,
        });
    }

    pub fn clear(&self) {
        self.inner.log.lock().clear();
    }

    pub fn get_log(&self) -> String {
        self.inner.log.lock().clone()
    }

    // -----------------------------------------------------------------------
    // Spinner-style progress
    // -----------------------------------------------------------------------

    pub fn start(&self, text: &str) {
        *self.inner.spinner.lock() = Some(text.to_string());
        self.write_chunk(&format!("{SPINNER_START} {text}\n"));
    }

    /// Finish the running spinner as succeeded. `info` replaces its text.
    pub fn succeed(&self, info: Option<&str>) {
        self.stop_spinner(SPINNER_SUCCEED, info);
    }

    pub fn fail(&self, info: Option<&str>) {
        self.stop_spinner(SPINNER_FAIL, info);
    }

    fn stop_spinner(&self, symbol: &str, info: Option<&str>) {
        let running = self.inner.spinner.lock().take();
        let Some(text) = info.map(str::to_string).or(running) else {
            return;
        };
        self.write_chunk(&format!("{symbol} {text}\n"));
    }

    /// Capture for one child-process output stream.
    pub fn capture(&self) -> OutputCapture {
        OutputCapture {
            logger: self.clone(),
            chunker: Utf8Chunker::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Process output capture
// ---------------------------------------------------------------------------

/// Feeds raw bytes from a process pipe into a [`Logger`].
///
/// Reads can split multi-byte characters; the trailing fragment is held
/// back until the next read completes it.
pub struct OutputCapture {
    logger: Logger,
    chunker: Utf8Chunker,
}

impl OutputCapture {
    pub fn push(&mut self, bytes: &[u8]) {
        let text = self.chunker.push(bytes);
        self.logger.write_chunk(&text);
    }

    /// Flush whatever is left at EOF.
    pub fn finish(&mut self) {
        let text = self.chunker.flush();
        self.logger.write_chunk(&text);
    }
}

/// Splits a byte stream on UTF-8 character boundaries.
#[derive(Default)]
struct Utf8Chunker {
    /// Incomplete bytes from the previous read (at most 3).
    remainder: Vec<u8>,
}

impl Utf8Chunker {
    fn push(&mut self, new_bytes: &[u8]) -> String {
        let mut combined = std::mem::take(&mut self.remainder);
        combined.extend_from_slice(new_bytes);

        let mut out = String::with_capacity(combined.len());
        let mut rest = combined.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&rest[..valid]));
                    match e.error_len() {
                        // Incomplete sequence at the end: keep it for next read
                        None => {
                            self.remainder.extend_from_slice(&rest[valid..]);
                            break;
                        }
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &rest[valid + bad..];
                        }
                    }
                }
            }
        }
        out
    }

    fn flush(&mut self) -> String {
        if self.remainder.is_empty() {
            return String::new();
        }
        let remaining = std::mem::take(&mut self.remainder);
        String::from_utf8_lossy(&remaining).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;

    fn logged(events: &mut events::EventStream) -> Vec<String> {
        events
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                FlowEvent::Log { data, .. } => Some(data),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_append_log_adds_newline_and_emits() {
        let (sink, mut events) = events::channel();
        let logger = Logger::new("f1", sink);
        logger.append_log("📦  Start generate files");
        assert_eq!(logger.get_log(), "📦  Start generate files\n");
        assert_eq!(logged(&mut events), vec!["📦  Start generate files\n"]);
    }

    #[test]
    fn test_append_log_ignores_empty() {
        let (sink, mut events) = events::channel();
        let logger = Logger::new("f1", sink);
        logger.append_log("");
        assert_eq!(logger.get_log(), "");
        assert!(events.drain().is_empty());
    }

    #[test]
    fn test_chunks_are_kept_verbatim() {
        let logger = Logger::new("f1", EventSink::detached());
        logger.write_chunk("Cloning into 'umi-bl");
        logger.write_chunk("ocks'...\n");
        assert_eq!(logger.get_log(), "Cloning into 'umi-blocks'...\n");
    }

    #[test]
    fn test_clear_resets_buffer() {
        let logger = Logger::new("f1", EventSink::detached());
        logger.append_log("something");
        logger.clear();
        assert_eq!(logger.get_log(), "");
    }

    #[test]
    fn test_clones_share_buffer() {
        let logger = Logger::new("f1", EventSink::detached());
        let other = logger.clone();
        other.append_log("from clone");
        assert_eq!(logger.get_log(), "from clone\n");
        assert_eq!(other.id(), "f1");
    }

    #[test]
    fn test_spinner_lines() {
        let logger = Logger::new("f1", EventSink::detached());
        logger.start("clone repo");
        logger.succeed(None);
        logger.start("install");
        logger.fail(Some("install failed"));
        // No running spinner: nothing to finish
        logger.succeed(None);
        assert_eq!(
            logger.get_log(),
            "- clone repo\n✔ clone repo\n- install\n✖ install failed\n"
        );
    }

    #[test]
    fn test_capture_rejoins_split_characters() {
        let logger = Logger::new("f1", EventSink::detached());
        let mut capture = logger.capture();
        let euro = "€".as_bytes();
        let mut first = b"cost ".to_vec();
        first.push(euro[0]);
        capture.push(&first);
        assert_eq!(logger.get_log(), "cost ");
        capture.push(&euro[1..]);
        capture.finish();
        assert_eq!(logger.get_log(), "cost €");
    }

    #[test]
    fn test_chunker_split_4byte_emoji() {
        let mut buf = Utf8Chunker::default();
        let bytes = "🦀".as_bytes();
        assert_eq!(buf.push(&bytes[..2]), "");
        assert_eq!(buf.remainder.len(), 2);
        assert_eq!(buf.push(&bytes[2..]), "🦀");
        assert!(buf.remainder.is_empty());
    }

    #[test]
    fn test_chunker_replaces_invalid_bytes() {
        let mut buf = Utf8Chunker::default();
        assert_eq!(buf.push(&[b'a', 0xFF, b'b']), "a\u{FFFD}b");
    }

    #[test]
    fn test_chunker_flush_incomplete() {
        let mut buf = Utf8Chunker::default();
        assert_eq!(buf.push(&[0xE2]), "");
        assert_eq!(buf.flush(), "\u{FFFD}");
        assert_eq!(buf.flush(), "");
    }
}
