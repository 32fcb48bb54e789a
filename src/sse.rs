use crate::error::RelayError;

/// Longest line the parser buffers while waiting for its terminator.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// Incremental parser for the upstream's SSE byte stream.
///
/// Bytes arrive in arbitrary chunk boundaries (possibly splitting UTF-8
/// sequences); only complete lines are decoded. The upstream writes one JSON
/// document per `data:` line, so every `data:` line is dispatched as its own
/// frame, tagged with the most recent `event:` name. A blank line resets the
/// event name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
    /// Stream byte offset of the start of the `data:` line.
    pub offset: u64,
}

#[derive(Debug)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    /// Bytes of complete lines consumed so far.
    consumed: u64,
    max_line: usize,
}

impl Default for SseParser {
    fn default() -> Self {
        Self::with_max_line(DEFAULT_MAX_LINE_BYTES)
    }
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: Vec::new(),
            event: None,
            consumed: 0,
            max_line,
        }
    }

    pub fn bytes_consumed(&self) -> u64 {
        self.consumed
    }

    /// Bytes buffered while waiting for a line terminator.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Fails once the unterminated line exceeds the configured maximum.
    pub fn check_pending(&self) -> Result<(), RelayError> {
        if self.buffer.len() > self.max_line {
            return Err(RelayError::UpstreamProtocol(format!(
                "unterminated SSE line longer than {} bytes at byte {}",
                self.max_line, self.consumed
            )));
        }
        Ok(())
    }

    /// Feed a chunk and return the frames completed by it.
    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut out = Vec::new();
        let mut start = 0;
        while let Some(rel) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            let end = start + rel;
            let line = decode_line(&self.buffer[start..end]);
            let offset = self.consumed;
            self.consumed += (end - start + 1) as u64;
            self.process_line(&line, offset, &mut out);
            start = end + 1;
        }
        self.buffer.drain(..start);
        out
    }

    /// Flush a trailing line without terminator at end of stream.
    pub fn finish(&mut self) -> Vec<SseFrame> {
        let mut out = Vec::new();
        if self.buffer.is_empty() {
            return out;
        }
        let rest = std::mem::take(&mut self.buffer);
        let line = decode_line(&rest);
        let offset = self.consumed;
        self.consumed += rest.len() as u64;
        self.process_line(&line, offset, &mut out);
        out
    }

    fn process_line(&mut self, line: &str, offset: u64, out: &mut Vec<SseFrame>) {
        if line.is_empty() {
            self.event = None;
            return;
        }
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.trim().to_string()),
            "data" => out.push(SseFrame {
                event: self.event.clone(),
                data: value.to_string(),
                offset,
            }),
            // id / retry carry nothing the relay needs
            _ => {}
        }
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
