//! Text diff patches in the diff-match-patch exchange format.
//!
//! Parses the `@@ -l,n +l,n @@` hunk format and applies it to a string.
//! Hunk context is matched around the expected position rather than trusted
//! blindly: if the surrounding text has drifted, the nearest exact context
//! match within a bounded window is used, and when none exists the patch
//! fails instead of corrupting the text. Positions are measured in chars.

use crate::types::PatchError;

/// How far from the expected position a hunk's context may be found.
const MATCH_DISTANCE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineOp {
    Context,
    Delete,
    Insert,
}

#[derive(Debug, Clone)]
struct Hunk {
    start1: usize,
    len1: usize,
    start2: usize,
    lines: Vec<(LineOp, String)>,
}

#[derive(Debug, Clone)]
pub struct TextPatch {
    hunks: Vec<Hunk>,
}

/// Parse the serialized patch text into hunks.
pub fn parse(input: &str) -> Result<TextPatch, PatchError> {
    let malformed = |why: &str| PatchError::MalformedTextPatch(why.to_owned());
    let mut hunks = Vec::new();
    let mut lines = input.split('\n').peekable();
    while let Some(line) = lines.next() {
        if line.is_empty() {
            continue;
        }
        let header = line
            .strip_prefix("@@ -")
            .and_then(|rest| rest.strip_suffix(" @@"))
            .ok_or_else(|| malformed("expected hunk header"))?;
        let (old_range, new_range) = header
            .split_once(" +")
            .ok_or_else(|| malformed("expected `+` range in hunk header"))?;
        let (start1, len1) = parse_range(old_range).ok_or_else(|| malformed("bad old range"))?;
        let (start2, _len2) = parse_range(new_range).ok_or_else(|| malformed("bad new range"))?;
        let mut body = Vec::new();
        while let Some(next) = lines.peek() {
            if next.starts_with("@@") {
                break;
            }
            let next = lines.next().unwrap_or_default();
            if next.is_empty() {
                continue;
            }
            let (marker, content) = next.split_at(1);
            let op = match marker {
                " " => LineOp::Context,
                "-" => LineOp::Delete,
                "+" => LineOp::Insert,
                _ => return Err(malformed("unknown line marker")),
            };
            body.push((op, percent_decode(content)?));
        }
        hunks.push(Hunk {
            start1,
            len1,
            start2,
            lines: body,
        });
    }
    if hunks.is_empty() {
        return Err(malformed("no hunks"));
    }
    Ok(TextPatch { hunks })
}

/// `a,b` ranges use 1-based starts for non-zero lengths, matching the
/// diff-match-patch text format. Returns 0-based (start, len).
fn parse_range(range: &str) -> Option<(usize, usize)> {
    match range.split_once(',') {
        Some((start, len)) => {
            let start: usize = start.parse().ok()?;
            let len: usize = len.parse().ok()?;
            if len == 0 {
                Some((start, 0))
            } else {
                Some((start.checked_sub(1)?, len))
            }
        }
        None => {
            let start: usize = range.parse().ok()?;
            Some((start.checked_sub(1)?, 1))
        }
    }
}

fn percent_decode(input: &str) -> Result<String, PatchError> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes
                .get(i + 1..i + 3)
                .and_then(|h| std::str::from_utf8(h).ok())
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| PatchError::MalformedTextPatch("bad percent escape".into()))?;
            out.push(hex);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out)
        .map_err(|_| PatchError::MalformedTextPatch("escape decodes to invalid utf-8".into()))
}

/// Apply the patch to `text`. `None` means the context could not be located
/// within tolerance (the text has diverged).
pub fn apply(patch: &TextPatch, text: &str) -> Option<String> {
    let mut chars: Vec<char> = text.chars().collect();
    let mut delta: i64 = 0;
    for hunk in &patch.hunks {
        let old: Vec<char> = hunk
            .lines
            .iter()
            .filter(|(op, _)| matches!(op, LineOp::Context | LineOp::Delete))
            .flat_map(|(_, s)| s.chars())
            .collect();
        let new: Vec<char> = hunk
            .lines
            .iter()
            .filter(|(op, _)| matches!(op, LineOp::Context | LineOp::Insert))
            .flat_map(|(_, s)| s.chars())
            .collect();
        let expected = (hunk.start2 as i64 + delta).clamp(0, chars.len() as i64) as usize;
        let loc = if old.is_empty() {
            // Pure insertion with no context anchors at the expected spot.
            expected.min(chars.len())
        } else {
            find_nearest(&chars, &old, expected)?
        };
        debug_assert!(old.is_empty() || hunk.len1 == old.len());
        chars.splice(loc..loc + old.len(), new.iter().copied());
        delta = loc as i64 - hunk.start1 as i64;
    }
    Some(chars.iter().collect())
}

/// Exact occurrence of `needle` in `haystack` closest to `expected`, or
/// `None` when there is no occurrence within [`MATCH_DISTANCE`].
fn find_nearest(haystack: &[char], needle: &[char], expected: usize) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    let mut best: Option<usize> = None;
    for start in 0..=haystack.len() - needle.len() {
        if &haystack[start..start + needle.len()] == needle {
            let dist = start.abs_diff(expected);
            if dist > MATCH_DISTANCE {
                continue;
            }
            match best {
                Some(prev) if prev.abs_diff(expected) <= dist => {}
                _ => best = Some(start),
            }
        }
    }
    best
}
