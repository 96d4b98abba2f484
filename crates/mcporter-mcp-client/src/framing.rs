//! Message framing for stdio transports: newline-delimited JSON, with
//! `Content-Length` framed messages accepted as well.

use std::sync::Arc;
use tokio::sync::Mutex;

const MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;
const MAX_HEADER_SIZE: usize = 8 * 1024;

/// Partial reads waiting to form a complete message.
#[derive(Debug, Default)]
pub struct ReadBuffer {
    buffer: Vec<u8>,
}

pub type SharedReadBuffer = Arc<Mutex<ReadBuffer>>;

impl ReadBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedReadBuffer {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn append(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Pops the next complete message, if one is buffered.
    pub fn next_message(&mut self) -> Option<Vec<u8>> {
        extract_message(&mut self.buffer)
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

fn extract_message(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    loop {
        let leading = buffer
            .iter()
            .take_while(|b| matches!(b, b'\n' | b'\r'))
            .count();
        buffer.drain(..leading);

        if buffer.is_empty() {
            return None;
        }

        if starts_with_content_length(buffer) {
            let Some((header_end, delimiter_len)) = find_header_end(buffer) else {
                if buffer.len() > MAX_HEADER_SIZE {
                    tracing::warn!(buffered = buffer.len(), "unterminated Content-Length header, discarding");
                    buffer.clear();
                }
                return None;
            };
            let body_start = header_end + delimiter_len;

            let headers = String::from_utf8_lossy(&buffer[..header_end]);
            let content_length = headers.lines().find_map(|line| {
                line.to_ascii_lowercase()
                    .strip_prefix("content-length:")
                    .and_then(|rest| rest.trim().parse::<usize>().ok())
            });
            let Some(content_length) = content_length else {
                tracing::warn!(headers = %headers.trim(), "malformed Content-Length header, skipping");
                buffer.drain(..body_start);
                continue;
            };

            if content_length > MAX_MESSAGE_SIZE {
                tracing::warn!(content_length, "message exceeds size limit, discarding buffer");
                buffer.clear();
                return None;
            }
            if buffer.len() < body_start + content_length {
                return None;
            }

            let body = buffer[body_start..body_start + content_length].to_vec();
            buffer.drain(..body_start + content_length);
            return Some(body);
        }

        let Some(newline_pos) = buffer.iter().position(|b| *b == b'\n') else {
            if buffer.len() > MAX_MESSAGE_SIZE {
                tracing::warn!(buffered = buffer.len(), "unterminated message exceeds size limit, discarding");
                buffer.clear();
            }
            return None;
        };
        let mut line = buffer[..newline_pos].to_vec();
        buffer.drain(..=newline_pos);

        while matches!(line.last(), Some(b'\r')) {
            line.pop();
        }

        if line.is_empty() {
            continue;
        }

        return Some(line);
    }
}

fn starts_with_content_length(buffer: &[u8]) -> bool {
    let prefix = b"content-length:";
    buffer.len() >= prefix.len()
        && buffer[..prefix.len()]
            .iter()
            .zip(prefix.iter())
            .all(|(a, b)| a.to_ascii_lowercase() == *b)
}

fn find_header_end(buffer: &[u8]) -> Option<(usize, usize)> {
    if let Some(pos) = find_subsequence(buffer, b"\r\n\r\n") {
        return Some((pos, 4));
    }
    find_subsequence(buffer, b"\n\n").map(|pos| (pos, 2))
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
