//! Sentence-boundary chunking of a long-form script into segments that fit
//! the fusion provider's hard 120s duration cap. A
//! direct port of `chunking_service.py`'s `split_script_into_segments`:
//! sentence-ish split on `.`/`!`/`?`, greedy-pack sentences into a segment
//! until the target duration is reached, flush early if the next sentence
//! would blow the hard cap.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::LongformLimits;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Splits on whitespace that follows a sentence-ending `.`/`!`/`?`. The
/// Python original expresses this as a lookbehind (`(?<=[.!?])\s+`), which
/// the `regex` crate's RE2-derived engine cannot compile; splitting by hand
/// on char boundaries gives the same result without backtracking.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0usize;
    let bytes = text.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'.' || b == b'!' || b == b'?' {
            let mut j = i + 1;
            let ws_start = j;
            while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                j += 1;
            }
            if j > ws_start {
                parts.push(&text[start..i + 1]);
                start = j;
                i = j;
                continue;
            }
        }
        i += 1;
    }
    parts.push(&text[start..]);
    parts
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptChunk {
    pub index: usize,
    pub text: String,
    pub duration_sec: u32,
}

fn estimate_duration_seconds(text: &str, wpm: u32) -> u32 {
    let words = WHITESPACE.split(text.trim()).filter(|w| !w.is_empty()).count();
    if words == 0 {
        return 0;
    }
    let sec = (words as f64 * 60.0 / wpm as f64).round() as u32;
    sec.max(1)
}

/// Splits `script_text` into segments per `limits`. Mirrors the Python
/// original's guardrails: target and cap are both clamped into `[10, 120]`
/// with cap never below target, and the provider hard cap (120s) wins over
/// any larger configured cap.
pub fn split_script_into_segments(script_text: &str, limits: &LongformLimits) -> Vec<ScriptChunk> {
    let s = script_text.trim();
    if s.is_empty() {
        return Vec::new();
    }
    let normalized = WHITESPACE.replace_all(s, " ").to_string();

    let parts: Vec<&str> = split_sentences(&normalized)
        .into_iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() {
        return Vec::new();
    }

    let mut cap = limits.max_segment_seconds.max(10);
    let mut target = limits.target_segment_seconds.max(10);
    if cap < target {
        cap = target;
    }
    cap = cap.min(limits.provider_hard_cap_seconds);
    target = target.min(cap);

    let mut chunks: Vec<ScriptChunk> = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    let flush = |current: &mut Vec<&str>, chunks: &mut Vec<ScriptChunk>| {
        if current.is_empty() {
            return;
        }
        let text = current.join(" ");
        let dur = estimate_duration_seconds(&text, limits.words_per_minute).clamp(1, cap);
        chunks.push(ScriptChunk {
            index: chunks.len(),
            text,
            duration_sec: dur,
        });
        current.clear();
    };

    for sentence in parts {
        let sentence_sec = estimate_duration_seconds(sentence, limits.words_per_minute).max(1);
        let current_sec = if current.is_empty() {
            0
        } else {
            estimate_duration_seconds(&current.join(" "), limits.words_per_minute)
        };

        if !current.is_empty() && current_sec + sentence_sec > cap {
            flush(&mut current, &mut chunks);
        }

        current.push(sentence);
        let new_sec = estimate_duration_seconds(&current.join(" "), limits.words_per_minute);

        if new_sec >= target {
            flush(&mut current, &mut chunks);
        }
    }
    flush(&mut current, &mut chunks);

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_script_yields_no_segments() {
        let limits = LongformLimits::default();
        assert!(split_script_into_segments("", &limits).is_empty());
        assert!(split_script_into_segments("   ", &limits).is_empty());
    }

    #[test]
    fn single_sentence_becomes_one_segment() {
        let limits = LongformLimits::default();
        let chunks = split_script_into_segments("Hello there.", &limits);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn long_script_packs_into_multiple_segments_under_cap() {
        let limits = LongformLimits::default();
        let sentence = "The quick brown fox jumps over the lazy dog again and again. ";
        let script = sentence.repeat(80);
        let chunks = split_script_into_segments(&script, &limits);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.duration_sec <= limits.provider_hard_cap_seconds);
        }
    }

    #[test]
    fn segment_indices_are_sequential() {
        let limits = LongformLimits::default();
        let script = "One. Two. Three. Four. Five.".repeat(20);
        let chunks = split_script_into_segments(&script, &limits);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
        }
    }
}
