//! Merges per-chunk ASR results for long audio split into overlapping
//! windows. Ported from the sliding-window best-alignment strategy
//! popularized by Groq's API cookbook: find the alignment position
//! that maximizes text-similarity matches in the overlap region, then
//! cut both sequences at the midpoint of that alignment.

use crate::asr::data::{AsrData, AsrDataSeg};

pub struct ChunkMerger {
    min_match_count: usize,
    fuzzy_threshold: f64,
}

impl Default for ChunkMerger {
    fn default() -> Self {
        Self { min_match_count: 2, fuzzy_threshold: 0.7 }
    }
}

impl ChunkMerger {
    pub fn new(min_match_count: usize, fuzzy_threshold: f64) -> Self {
        Self { min_match_count, fuzzy_threshold }
    }

    /// Merges `chunks` (each with segment timestamps relative to its
    /// own start) into one continuous `AsrData`. `chunk_offsets`, when
    /// given, are absolute millisecond offsets per chunk; otherwise
    /// they are inferred from `overlap_duration_ms`.
    pub fn merge_chunks(
        &self,
        chunks: Vec<AsrData>,
        chunk_offsets: Option<Vec<i64>>,
        overlap_duration_ms: i64,
    ) -> Result<AsrData, String> {
        if chunks.is_empty() {
            return Err("chunks must not be empty".to_string());
        }
        if chunks.len() == 1 {
            return Ok(chunks.into_iter().next().unwrap());
        }

        let is_word_level = chunks.iter().any(|c| c.is_word_timestamp());

        let offsets = match chunk_offsets {
            Some(o) => o,
            None => Self::infer_chunk_offsets(&chunks, overlap_duration_ms),
        };
        if offsets.len() != chunks.len() {
            return Err(format!(
                "chunk count ({}) does not match offset count ({})",
                chunks.len(),
                offsets.len()
            ));
        }

        let adjusted: Vec<Vec<AsrDataSeg>> = chunks
            .iter()
            .zip(offsets.iter())
            .map(|(chunk, offset)| Self::adjust_timestamps(&chunk.segments, *offset))
            .collect();

        let mut merged = adjusted[0].clone();
        for next in &adjusted[1..] {
            merged = self.merge_two_sequences(merged, next.clone(), overlap_duration_ms, is_word_level);
        }

        Ok(AsrData::new(merged))
    }

    fn merge_two_sequences(
        &self,
        left: Vec<AsrDataSeg>,
        right: Vec<AsrDataSeg>,
        overlap_duration_ms: i64,
        is_word_level: bool,
    ) -> Vec<AsrDataSeg> {
        if left.is_empty() {
            return right;
        }
        if right.is_empty() {
            return left;
        }

        let left_len = left.len();
        let left_overlap = Self::extract_overlap_segments(&left, true, overlap_duration_ms);
        let right_overlap = Self::extract_overlap_segments(&right, false, overlap_duration_ms);

        if left_overlap.is_empty() || right_overlap.is_empty() {
            let mut out = left;
            out.extend(right);
            return out;
        }

        match self.find_best_alignment(&left_overlap, &right_overlap, is_word_level) {
            None => {
                // No confident alignment: fall back to the first left
                // segment that ends before the right chunk starts.
                let right_start = right[0].start_time;
                let mut split_idx = left_len;
                for i in (0..left_len).rev() {
                    if left[i].end_time <= right_start {
                        split_idx = i + 1;
                        break;
                    }
                }
                let mut out = left[..split_idx].to_vec();
                out.extend(right);
                out
            }
            Some((left_start_idx, left_end_idx, right_start_idx, right_end_idx, _matches)) => {
                let left_mid = (left_start_idx + left_end_idx) / 2;
                let right_mid = (right_start_idx + right_end_idx) / 2;
                let left_overlap_offset = left_len - left_overlap.len();
                let left_cut = left_overlap_offset + left_mid;

                let mut out = left[..left_cut].to_vec();
                out.extend(right[right_mid..].to_vec());
                out
            }
        }
    }

    fn find_best_alignment(
        &self,
        left: &[AsrDataSeg],
        right: &[AsrDataSeg],
        is_word_level: bool,
    ) -> Option<(usize, usize, usize, usize, usize)> {
        let left_len = left.len();
        let right_len = right.len();

        let mut best_score = 0.0_f64;
        let mut best: Option<(usize, usize, usize, usize, usize)> = None;

        for i in 1..=(left_len + right_len) {
            let epsilon = i as f64 / 10000.0;

            let left_start = left_len.saturating_sub(i);
            let left_end = (left_len + right_len).saturating_sub(i).min(left_len);
            let right_start = i.saturating_sub(left_len);
            let right_end = i.min(right_len);

            let left_slice = &left[left_start..left_end];
            let right_slice = &right[right_start..right_end];
            if left_slice.len() != right_slice.len() {
                continue;
            }

            let matches = left_slice
                .iter()
                .zip(right_slice.iter())
                .filter(|(l, r)| {
                    if is_word_level {
                        l.text == r.text
                    } else {
                        text_similarity(&l.text, &r.text) > self.fuzzy_threshold
                    }
                })
                .count();

            let score = matches as f64 / i as f64 + epsilon;

            if matches >= self.min_match_count && score > best_score {
                best_score = score;
                best = Some((left_start, left_end, right_start, right_end, matches));
            }
        }

        best
    }

    fn adjust_timestamps(segments: &[AsrDataSeg], offset: i64) -> Vec<AsrDataSeg> {
        segments
            .iter()
            .map(|s| AsrDataSeg {
                text: s.text.clone(),
                start_time: s.start_time + offset,
                end_time: s.end_time + offset,
                translated_text: s.translated_text.clone(),
            })
            .collect()
    }

    fn extract_overlap_segments(
        segments: &[AsrDataSeg],
        from_end: bool,
        duration_ms: i64,
    ) -> Vec<AsrDataSeg> {
        if segments.is_empty() {
            return Vec::new();
        }

        if from_end {
            let threshold = segments.last().unwrap().end_time - duration_ms;
            let mut overlap = Vec::new();
            for seg in segments.iter().rev() {
                if seg.start_time >= threshold {
                    overlap.insert(0, seg.clone());
                } else {
                    break;
                }
            }
            overlap
        } else {
            let threshold = segments[0].start_time + duration_ms;
            let mut overlap = Vec::new();
            for seg in segments {
                if seg.end_time <= threshold {
                    overlap.push(seg.clone());
                } else {
                    break;
                }
            }
            overlap
        }
    }

    fn infer_chunk_offsets(chunks: &[AsrData], overlap_duration_ms: i64) -> Vec<i64> {
        let mut offsets = vec![0i64];
        for i in 1..chunks.len() {
            let prev = &chunks[i - 1];
            let next_offset = match prev.segments.last() {
                Some(last) => offsets[i - 1] + last.end_time - overlap_duration_ms,
                None => offsets[i - 1],
            };
            offsets.push(next_offset.max(offsets[i - 1]));
        }
        offsets
    }
}

/// Myers-style ratio: `2 * matching_chars / (len(a) + len(b))`, using a
/// longest-common-subsequence count as the matching-chars estimate.
fn text_similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let lcs = lcs_len(&a, &b);
    (2 * lcs) as f64 / (a.len() + b.len()) as f64
}

fn lcs_len(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb { prev[j] + 1 } else { prev[j + 1].max(curr[j]) };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(text: &str, start: i64, end: i64) -> AsrDataSeg {
        AsrDataSeg::new(text, start, end)
    }

    #[test]
    fn single_chunk_passes_through_unchanged() {
        let data = AsrData::new(vec![seg("hello", 0, 100)]);
        let merged = ChunkMerger::default()
            .merge_chunks(vec![data.clone()], None, 10_000)
            .unwrap();
        assert_eq!(merged, data);
    }

    #[test]
    fn empty_chunk_list_is_rejected() {
        assert!(ChunkMerger::default().merge_chunks(vec![], None, 10_000).is_err());
    }

    #[test]
    fn aligns_overlapping_sentence_chunks_by_fuzzy_match() {
        // left chunk ends with a sentence that the right chunk repeats
        // (as would happen with a 10s audio overlap window).
        let left = AsrData::new(vec![
            seg("the quick brown fox", 0, 2000),
            seg("jumps over the lazy dog", 2000, 4000),
        ]);
        let right = AsrData::new(vec![
            seg("jumps over the lazy dog", 0, 2000),
            seg("and runs away quickly", 2000, 4000),
        ]);
        let merged = ChunkMerger::default()
            .merge_chunks(vec![left, right], Some(vec![0, 3000]), 5000)
            .unwrap();
        // the duplicated sentence must not appear twice
        let texts: Vec<&str> = merged.segments.iter().map(|s| s.text.as_str()).collect();
        let dup_count = texts.iter().filter(|t| t.contains("jumps over")).count();
        assert_eq!(dup_count, 1);
    }

    #[test]
    fn falls_back_to_time_boundary_when_no_alignment_found() {
        let left = AsrData::new(vec![seg("alpha", 0, 1000), seg("beta", 1000, 2000)]);
        let right = AsrData::new(vec![seg("gamma", 0, 1000), seg("delta", 1000, 2000)]);
        let merged = ChunkMerger::default()
            .merge_chunks(vec![left, right], Some(vec![0, 1500]), 5000)
            .unwrap();
        // no shared text: both sides are fully present, no segment lost
        assert!(merged.segments.iter().any(|s| s.text == "alpha"));
        assert!(merged.segments.iter().any(|s| s.text == "gamma"));
    }

    #[test]
    fn word_level_merge_uses_exact_match() {
        let left = AsrData::new(vec![seg("hello", 0, 300), seg("world", 300, 600)]);
        let right = AsrData::new(vec![seg("world", 0, 300), seg("again", 300, 600)]);
        let merged = ChunkMerger::default()
            .merge_chunks(vec![left, right], Some(vec![0, 400]), 1000)
            .unwrap();
        let count = merged.segments.iter().filter(|s| s.text == "world").count();
        assert_eq!(count, 1);
    }
}
