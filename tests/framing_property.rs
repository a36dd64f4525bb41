// tests/framing_property.rs

use proptest::prelude::*;

use conrun::supervise::LineFramer;

// Strategy: printable-ish content with embedded newlines, no CR (carriage
// return handling is covered by unit tests).
fn content_strategy() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(
        prop_oneof![
            4 => 0x20u8..0x7f,
            1 => Just(b'\n'),
        ],
        0..512,
    )
}

/// Reference framing: every `\n`-separated segment, with the final segment
/// flushed only when it is non-empty at end of stream.
fn reference_lines(content: &[u8]) -> Vec<String> {
    if content.is_empty() {
        return Vec::new();
    }
    let mut lines: Vec<String> = content
        .split(|b| *b == b'\n')
        .map(|seg| String::from_utf8_lossy(seg).into_owned())
        .collect();
    if content.last() == Some(&b'\n') {
        lines.pop();
    }
    lines
}

fn frame(content: &[u8], cuts: &[usize]) -> Vec<String> {
    let mut framer = LineFramer::new();
    let mut out = Vec::new();
    let mut start = 0;
    let mut points: Vec<usize> = cuts
        .iter()
        .map(|c| if content.is_empty() { 0 } else { c % content.len() })
        .collect();
    points.sort_unstable();
    for point in points {
        if point > start {
            out.extend(framer.push(&content[start..point]));
            start = point;
        }
    }
    out.extend(framer.push(&content[start..]));
    out.extend(framer.finish());
    out
}

proptest! {
    // Framed output must not depend on how the byte stream was chunked.
    #[test]
    fn chunking_never_changes_framed_lines(
        content in content_strategy(),
        cuts in proptest::collection::vec(any::<usize>(), 0..8),
    ) {
        let whole = frame(&content, &[]);
        let chunked = frame(&content, &cuts);
        prop_assert_eq!(&chunked, &whole);
        prop_assert_eq!(whole, reference_lines(&content));
    }

    // Reassembling framed lines with newlines restored reproduces the
    // original content, modulo one missing trailing newline.
    #[test]
    fn lines_partition_the_stream(content in content_strategy()) {
        let lines = frame(&content, &[]);
        let mut rebuilt = lines.join("\n").into_bytes();
        if content.last() == Some(&b'\n') {
            rebuilt.push(b'\n');
        }
        prop_assert_eq!(rebuilt, content);
    }
}
