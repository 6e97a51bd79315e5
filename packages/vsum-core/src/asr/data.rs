use serde::{Deserialize, Serialize};

/// One transcript utterance with millisecond timestamps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AsrDataSeg {
    pub text: String,
    pub start_time: i64,
    pub end_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_text: Option<String>,
}

impl AsrDataSeg {
    pub fn new(text: impl Into<String>, start_time: i64, end_time: i64) -> Self {
        Self { text: text.into(), start_time, end_time, translated_text: None }
    }
}

/// The canonical in-memory transcript representation shared by every
/// ASR engine implementation and persisted verbatim as `asr.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AsrData {
    pub segments: Vec<AsrDataSeg>,
}

impl AsrData {
    pub fn new(mut segments: Vec<AsrDataSeg>) -> Self {
        segments.retain(|s| !s.text.trim().is_empty());
        segments.sort_by_key(|s| s.start_time);
        Self { segments }
    }

    pub fn has_data(&self) -> bool {
        !self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// True when 80%+ of segments look like individual words rather
    /// than sentences: <=2 characters for mostly-CJK text, a single
    /// whitespace-delimited token otherwise.
    pub fn is_word_timestamp(&self) -> bool {
        if self.segments.is_empty() {
            return false;
        }
        let word_like = self
            .segments
            .iter()
            .filter(|seg| is_word_level_segment(&seg.text))
            .count();
        (word_like as f64) / (self.segments.len() as f64) >= 0.8
    }

    pub fn total_chars(&self) -> usize {
        self.segments.iter().map(|s| s.text.chars().count()).sum()
    }

    pub fn full_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn duration_ms(&self) -> i64 {
        self.segments.last().map(|s| s.end_time).unwrap_or(0)
            - self.segments.first().map(|s| s.start_time).unwrap_or(0)
    }
}

fn is_mainly_cjk(text: &str) -> bool {
    let total = text.chars().filter(|c| !c.is_whitespace()).count();
    if total == 0 {
        return false;
    }
    let cjk = text
        .chars()
        .filter(|c| {
            let cp = *c as u32;
            (0x4e00..=0x9fff).contains(&cp)
                || (0x3040..=0x30ff).contains(&cp)
                || (0xac00..=0xd7af).contains(&cp)
        })
        .count();
    (cjk as f64) / (total as f64) > 0.5
}

fn is_word_level_segment(text: &str) -> bool {
    let trimmed = text.trim();
    if is_mainly_cjk(trimmed) {
        return trimmed.chars().count() <= 2;
    }
    trimmed.split_whitespace().count() == 1
}

/// Rough token estimate used to derive `tokens_per_minute`: CJK text is
/// counted per character, other scripts per whitespace-delimited word.
pub fn estimate_token_count(text: &str) -> u64 {
    let mut count = 0u64;
    for word in text.split_whitespace() {
        if is_mainly_cjk(word) {
            count += word.chars().count() as u64;
        } else {
            count += 1;
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_blank_segments_and_sorts_by_start() {
        let data = AsrData::new(vec![
            AsrDataSeg::new("b", 1000, 2000),
            AsrDataSeg::new("  ", 500, 900),
            AsrDataSeg::new("a", 0, 900),
        ]);
        assert_eq!(data.len(), 2);
        assert_eq!(data.segments[0].text, "a");
        assert_eq!(data.segments[1].text, "b");
    }

    #[test]
    fn detects_word_level_timestamps() {
        let word_level = AsrData::new(vec![
            AsrDataSeg::new("hello", 0, 100),
            AsrDataSeg::new("world", 100, 200),
            AsrDataSeg::new("foo", 200, 300),
        ]);
        assert!(word_level.is_word_timestamp());

        let sentence_level = AsrData::new(vec![
            AsrDataSeg::new("hello there world", 0, 1000),
            AsrDataSeg::new("this is a sentence", 1000, 2000),
        ]);
        assert!(!sentence_level.is_word_timestamp());
    }

    #[test]
    fn cjk_word_level_allows_up_to_two_chars() {
        let data = AsrData::new(vec![
            AsrDataSeg::new("你好", 0, 100),
            AsrDataSeg::new("世界", 100, 200),
        ]);
        assert!(data.is_word_timestamp());
    }

    #[test]
    fn token_estimate_counts_cjk_by_char_and_latin_by_word() {
        assert_eq!(estimate_token_count("hello world"), 2);
        assert_eq!(estimate_token_count("你好世界"), 4);
    }

    #[test]
    fn round_trips_through_json() {
        let data = AsrData::new(vec![AsrDataSeg::new("hi", 0, 500)]);
        let json = serde_json::to_string(&data).unwrap();
        let back: AsrData = serde_json::from_str(&json).unwrap();
        assert_eq!(data, back);
    }
}
