use proptest::prelude::*;

use pty_mux::{ScrollbackBuffer, Utf8StreamDecoder};

// --- Scrollback ---

/// What the buffer must hold after `input`: the newest `max_lines`
/// terminated lines plus any unterminated tail.
fn expected_contents(input: &str, max_lines: usize) -> String {
    let mut terminated: Vec<&str> = input.split_inclusive('\n').collect();
    let tail = match terminated.last() {
        Some(last) if !last.ends_with('\n') => terminated.pop().unwrap_or_default(),
        _ => "",
    };
    let keep = terminated.len().min(max_lines);
    let mut out = terminated[terminated.len() - keep..].concat();
    out.push_str(tail);
    out
}

fn arb_chunks() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(r"[a\n\r\x1b]{0,8}", 0..24)
}

proptest! {
    #[test]
    fn line_cap_holds_after_every_write(max_lines in 0usize..6, chunks in arb_chunks()) {
        let mut buf = ScrollbackBuffer::new(max_lines);
        let mut written = String::new();
        for chunk in &chunks {
            buf.write(chunk);
            written.push_str(chunk);

            prop_assert!(buf.line_count() <= max_lines);
            prop_assert_eq!(buf.contents(), expected_contents(&written, max_lines));
        }
    }

    #[test]
    fn clear_empties_any_buffer(max_lines in 0usize..6, chunks in arb_chunks()) {
        let mut buf = ScrollbackBuffer::new(max_lines);
        for chunk in &chunks {
            buf.write(chunk);
        }
        buf.clear();
        prop_assert!(buf.is_empty());
        prop_assert_eq!(buf.line_count(), 0);
        prop_assert_eq!(buf.contents(), "");
    }
}

// --- Streaming UTF-8 decode ---

proptest! {
    #[test]
    fn decode_is_split_invariant(text in "\\PC{0,32}", cut in any::<prop::sample::Index>()) {
        let bytes = text.as_bytes();
        let at = cut.index(bytes.len() + 1);

        let mut decoder = Utf8StreamDecoder::new();
        let mut out = decoder.decode(&bytes[..at]);
        out.push_str(&decoder.decode(&bytes[at..]));
        out.push_str(&decoder.finish());

        prop_assert_eq!(out, text);
    }
}
