//! Head/tail output truncation.

use std::borrow::Cow;
use std::collections::VecDeque;

/// Default per-stream cap, in characters.
pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 500_000;

const MAX_UTF8_WIDTH: usize = 4;

/// Truncate `s` to at most `max_chars` characters of original content.
///
/// The first and last `max_chars / 2` characters are kept and the middle is
/// replaced with a marker stating how many characters were elided. Works on
/// character boundaries, so multi-byte UTF-8 is never split.
pub fn truncate_middle(s: &str, max_chars: usize) -> Cow<'_, str> {
    // Byte length bounds char count from above.
    if s.len() <= max_chars {
        return Cow::Borrowed(s);
    }
    let total = s.chars().count();
    if total <= max_chars {
        return Cow::Borrowed(s);
    }

    let head = max_chars / 2;
    let tail = max_chars - head;
    let elided = total - head - tail;

    let head_end = byte_offset(s, head);
    let tail_start = byte_offset(s, total - tail);

    let mut out = String::with_capacity(head_end + (s.len() - tail_start) + 64);
    out.push_str(&s[..head_end]);
    out.push_str(&elision_marker(elided));
    out.push_str(&s[tail_start..]);
    Cow::Owned(out)
}

fn elision_marker(elided: usize) -> String {
    format!("\n\n... [{elided} characters truncated] ...\n\n")
}

/// Byte offset of the `n`th character (or the string length).
fn byte_offset(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map(|(i, _)| i).unwrap_or(s.len())
}

/// Streaming capture that keeps at most the head and tail an eventual
/// [`truncate_middle`] would keep.
///
/// Bytes between the two windows are counted and discarded as they arrive,
/// so memory stays bounded by the cap however much a process writes.
#[derive(Debug)]
pub(crate) struct OutputCapture {
    max_chars: usize,
    head: Vec<u8>,
    head_limit: usize,
    tail: VecDeque<u8>,
    tail_limit: usize,
    total_chars: usize,
    overflowed: bool,
}

impl OutputCapture {
    pub(crate) fn new(max_chars: usize) -> Self {
        let head_chars = max_chars / 2;
        let tail_chars = max_chars - head_chars;
        Self {
            max_chars,
            head: Vec::new(),
            head_limit: head_chars * MAX_UTF8_WIDTH,
            tail: VecDeque::new(),
            tail_limit: tail_chars * MAX_UTF8_WIDTH,
            total_chars: 0,
            overflowed: false,
        }
    }

    /// Append a chunk read from the stream.
    pub(crate) fn push(&mut self, mut chunk: &[u8]) {
        self.total_chars += count_chars(chunk);

        let room = self.head_limit.saturating_sub(self.head.len());
        if room > 0 {
            let take = room.min(chunk.len());
            self.head.extend_from_slice(&chunk[..take]);
            chunk = &chunk[take..];
        }
        if chunk.is_empty() {
            return;
        }

        if chunk.len() >= self.tail_limit {
            self.overflowed |= !self.tail.is_empty() || chunk.len() > self.tail_limit;
            self.tail.clear();
            chunk = &chunk[chunk.len() - self.tail_limit..];
        } else {
            let excess = (self.tail.len() + chunk.len()).saturating_sub(self.tail_limit);
            if excess > 0 {
                self.overflowed = true;
                self.tail.drain(..excess);
            }
        }
        self.tail.extend(chunk);
    }

    /// Bytes currently held.
    pub(crate) fn buffered_len(&self) -> usize {
        self.head.len() + self.tail.len()
    }

    /// Decode the capture, eliding the middle if the cap was exceeded.
    pub(crate) fn finish(self) -> String {
        let mut bytes = self.head;
        if !self.overflowed {
            bytes.extend(self.tail);
            let text = String::from_utf8_lossy(&bytes);
            return truncate_middle(&text, self.max_chars).into_owned();
        }

        let head_chars = self.max_chars / 2;
        let tail_chars = self.max_chars - head_chars;

        let head = String::from_utf8_lossy(&bytes);
        let head_end = byte_offset(&head, head_chars);

        // The tail window may open inside a multi-byte character.
        let tail_bytes: Vec<u8> = self
            .tail
            .into_iter()
            .skip_while(|b| is_continuation(*b))
            .collect();
        let tail = String::from_utf8_lossy(&tail_bytes);
        let tail_len = tail.chars().count();
        let tail_start = byte_offset(&tail, tail_len.saturating_sub(tail_chars));

        let elided = self.total_chars.saturating_sub(head_chars + tail_chars);
        let mut out = String::with_capacity(head_end + (tail.len() - tail_start) + 64);
        out.push_str(&head[..head_end]);
        out.push_str(&elision_marker(elided));
        out.push_str(&tail[tail_start..]);
        out
    }
}

fn is_continuation(byte: u8) -> bool {
    byte & 0xC0 == 0x80
}

/// Characters in `bytes`, counted by their leading bytes.
fn count_chars(bytes: &[u8]) -> usize {
    bytes.iter().filter(|b| !is_continuation(**b)).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_output_untouched() {
        let out = truncate_middle("hello", 10);
        assert!(matches!(out, Cow::Borrowed("hello")));
    }

    #[test]
    fn test_exact_limit_untouched() {
        assert_eq!(truncate_middle("abcdef", 6), "abcdef");
    }

    #[test]
    fn test_large_output_keeps_prefix_and_suffix() {
        let original: String = (0..2_000_000u32)
            .map(|i| char::from(b'a' + (i % 26) as u8))
            .collect();

        let out = truncate_middle(&original, DEFAULT_MAX_OUTPUT_CHARS);

        assert!(out.len() < original.len());
        assert!(out.contains("[1500000 characters truncated]"));
        let keep = DEFAULT_MAX_OUTPUT_CHARS / 2;
        assert!(out.starts_with(&original[..keep]));
        assert!(out.ends_with(&original[original.len() - keep..]));
    }

    #[test]
    fn test_multibyte_boundaries() {
        let original = "é".repeat(100);
        let out = truncate_middle(&original, 10);
        assert!(out.starts_with("ééééé\n"));
        assert!(out.ends_with("\nééééé"));
        assert!(out.contains("[90 characters truncated]"));
    }

    fn capture_all(max_chars: usize, chunks: &[&[u8]]) -> String {
        let mut capture = OutputCapture::new(max_chars);
        for chunk in chunks {
            capture.push(chunk);
        }
        capture.finish()
    }

    #[test]
    fn test_capture_under_cap_matches_input() {
        assert_eq!(capture_all(100, &[b"hello ", b"world"]), "hello world");
        assert_eq!(capture_all(100, &[]), "");
    }

    #[test]
    fn test_capture_agrees_with_truncate_middle() {
        let original: String = (0..10_000u32)
            .map(|i| char::from(b'a' + (i % 26) as u8))
            .collect();
        let chunks: Vec<&[u8]> = original.as_bytes().chunks(777).collect();
        assert_eq!(capture_all(1000, &chunks), truncate_middle(&original, 1000));
    }

    #[test]
    fn test_capture_multibyte_split_across_chunks() {
        let original = "é".repeat(1000);
        let chunks: Vec<&[u8]> = original.as_bytes().chunks(3).collect();
        let out = capture_all(10, &chunks);
        assert!(out.starts_with("ééééé\n"));
        assert!(out.ends_with("\nééééé"));
        assert!(out.contains("[990 characters truncated]"));
    }

    #[test]
    fn test_capture_memory_bounded_for_huge_stream() {
        let max_chars = 1000;
        let chunk = vec![b'x'; 64 * 1024];
        let mut capture = OutputCapture::new(max_chars);
        // 320 MiB total.
        for _ in 0..5120 {
            capture.push(&chunk);
            assert!(capture.buffered_len() <= max_chars * MAX_UTF8_WIDTH);
        }
        let out = capture.finish();

        let total = 5120 * 64 * 1024;
        assert!(out.contains(&format!("[{} characters truncated]", total - max_chars)));
        assert!(out.starts_with(&"x".repeat(500)));
        assert!(out.ends_with(&"x".repeat(500)));
        assert!(out.len() < 1100);
    }
}
