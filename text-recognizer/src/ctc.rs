//! CTC decoding over recognition model logits.
//!
//! The model emits `[N, T, C]` or `[N, C, T]` floats where class 0 is the
//! CTC blank. Both decoders run off a flat slice plus a resolved layout so
//! there is a single code path for either axis order.

use std::collections::HashMap;

use crate::error::{RecognitionError, Result};

pub const BLANK_INDEX: usize = 0;

/// Resolved output geometry for one decode call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CtcLayout {
    pub batch: usize,
    pub timesteps: usize,
    pub classes: usize,
    pub classes_first: bool,
}

impl CtcLayout {
    pub fn row_len(&self) -> usize {
        self.timesteps * self.classes
    }

    #[inline]
    fn value(&self, row: &[f32], t: usize, c: usize) -> f32 {
        if self.classes_first {
            row[c * self.timesteps + t]
        } else {
            row[t * self.classes + c]
        }
    }
}

/// Raw and collapsed output of the greedy decoder for one batch row.
#[derive(Debug, Clone, Default)]
pub struct DecodedSequence {
    /// Argmax class per timestep, length T.
    pub indices: Vec<usize>,
    /// Probability of that class per timestep.
    pub probs: Vec<f32>,
    /// Indices after removing repeats and blanks.
    pub collapsed: Vec<usize>,
    /// First-timestep probability of each collapsed run.
    pub collapsed_probs: Vec<f32>,
}

/// One beam-search hypothesis.
#[derive(Debug, Clone)]
pub struct BeamCandidate {
    pub sequence: Vec<usize>,
    /// Last emitted non-blank class; `None` after a blank.
    pub last_char: Option<usize>,
    pub log_prob: f32,
    pub char_probs: Vec<f32>,
}

impl BeamCandidate {
    fn root() -> Self {
        Self {
            sequence: Vec::new(),
            last_char: None,
            log_prob: 0.0,
            char_probs: Vec::new(),
        }
    }
}

/// Winning hypothesis of a beam search.
#[derive(Debug, Clone)]
pub struct BeamSearchResult {
    pub sequence: Vec<usize>,
    pub log_prob: f32,
    pub char_probs: Vec<f32>,
}

/// Work out which axis carries the classes.
///
/// Trailing size-1 dimensions beyond rank 3 are collapsed first. When
/// exactly one of the two remaining axes matches `charset_len + 1` that
/// axis is the class axis; otherwise the caller's `classes_first` hint is
/// trusted.
pub fn resolve_layout(
    shape: &[usize],
    charset_len: usize,
    classes_first: bool,
) -> Result<CtcLayout> {
    let mut dims: Vec<usize> = shape.to_vec();
    while dims.len() > 3 && dims.last() == Some(&1) {
        dims.pop();
    }
    if dims.len() != 3 {
        return Err(RecognitionError::Decode(format!(
            "expected a rank-3 output, got shape {shape:?}"
        )));
    }
    let (batch, a, b) = (dims[0], dims[1], dims[2]);
    if batch == 0 || a == 0 || b == 0 {
        return Err(RecognitionError::Decode(format!(
            "degenerate output shape {shape:?}"
        )));
    }

    let expected = charset_len + 1;
    let classes_first = match (a == expected, b == expected) {
        (true, false) => true,
        (false, true) => false,
        _ => classes_first,
    };
    let (timesteps, classes) = if classes_first { (b, a) } else { (a, b) };
    Ok(CtcLayout {
        batch,
        timesteps,
        classes,
        classes_first,
    })
}

/// Greedy decode of a single batch row (`row.len() == T * C`).
pub fn greedy_decode_row(row: &[f32], layout: &CtcLayout) -> DecodedSequence {
    let mut indices = Vec::with_capacity(layout.timesteps);
    let mut probs = Vec::with_capacity(layout.timesteps);
    let mut values = vec![0.0f32; layout.classes];

    for t in 0..layout.timesteps {
        for (c, v) in values.iter_mut().enumerate() {
            *v = layout.value(row, t, c);
        }
        let best = argmax(&values);
        let prob = if is_probability_row(&values) {
            values[best]
        } else {
            softmax_at(&values, best)
        };
        indices.push(best);
        probs.push(prob);
    }

    let (collapsed, collapsed_probs) = collapse(&indices, &probs);
    DecodedSequence {
        indices,
        probs,
        collapsed,
        collapsed_probs,
    }
}

/// Greedy decode of every batch row.
pub fn greedy_decode(data: &[f32], layout: &CtcLayout) -> Result<Vec<DecodedSequence>> {
    check_data_len(data, layout)?;
    let row_len = layout.row_len();
    Ok((0..layout.batch)
        .map(|n| greedy_decode_row(&data[n * row_len..(n + 1) * row_len], layout))
        .collect())
}

/// Remove consecutive duplicates, then remove blanks.
///
/// The probability carried over for a collapsed run is the one at the run's
/// first timestep.
pub fn collapse(indices: &[usize], probs: &[f32]) -> (Vec<usize>, Vec<f32>) {
    let mut out = Vec::new();
    let mut out_probs = Vec::new();
    let mut prev = None;
    for (i, &idx) in indices.iter().enumerate() {
        if prev == Some(idx) {
            continue;
        }
        prev = Some(idx);
        if idx != BLANK_INDEX {
            out.push(idx);
            out_probs.push(probs.get(i).copied().unwrap_or(0.0));
        }
    }
    (out, out_probs)
}

/// Beam-search decode of a single batch row.
pub fn beam_search_row(
    row: &[f32],
    layout: &CtcLayout,
    beam_width: usize,
) -> Result<BeamSearchResult> {
    if beam_width == 0 {
        return Err(RecognitionError::Decode("beam width must be >= 1".into()));
    }

    let mut beam = vec![BeamCandidate::root()];
    let mut values = vec![0.0f32; layout.classes];
    let mut log_probs = vec![0.0f32; layout.classes];

    for t in 0..layout.timesteps {
        for (c, v) in values.iter_mut().enumerate() {
            *v = layout.value(row, t, c);
        }
        row_log_probs(&values, &mut log_probs);

        // Extend every candidate with every class, merging hypotheses that
        // agree on (sequence, last_char) by log-sum-exp.
        let mut merged: Vec<BeamCandidate> = Vec::with_capacity(beam.len() * layout.classes);
        let mut slots: HashMap<(Vec<usize>, Option<usize>), usize> = HashMap::new();

        for candidate in &beam {
            for c in 0..layout.classes {
                let log_p = candidate.log_prob + log_probs[c];
                let extension = if c == BLANK_INDEX {
                    BeamCandidate {
                        sequence: candidate.sequence.clone(),
                        last_char: None,
                        log_prob: log_p,
                        char_probs: candidate.char_probs.clone(),
                    }
                } else if candidate.last_char == Some(c) {
                    BeamCandidate {
                        sequence: candidate.sequence.clone(),
                        last_char: Some(c),
                        log_prob: log_p,
                        char_probs: candidate.char_probs.clone(),
                    }
                } else {
                    let mut sequence = candidate.sequence.clone();
                    sequence.push(c);
                    let mut char_probs = candidate.char_probs.clone();
                    char_probs.push(log_probs[c].exp());
                    BeamCandidate {
                        sequence,
                        last_char: Some(c),
                        log_prob: log_p,
                        char_probs,
                    }
                };

                let key = (extension.sequence.clone(), extension.last_char);
                match slots.get(&key) {
                    Some(&i) => {
                        let existing = &mut merged[i];
                        if extension.log_prob > existing.log_prob {
                            existing.char_probs = extension.char_probs;
                        }
                        existing.log_prob = log_add_exp(existing.log_prob, extension.log_prob);
                    }
                    None => {
                        slots.insert(key, merged.len());
                        merged.push(extension);
                    }
                }
            }
        }

        // Stable sort keeps arrival order on equal log-probability.
        merged.sort_by(|a, b| b.log_prob.total_cmp(&a.log_prob));
        merged.truncate(beam_width);
        beam = merged;
    }

    let best = beam
        .into_iter()
        .next()
        .ok_or_else(|| RecognitionError::Decode("beam search produced no candidates".into()))?;
    Ok(BeamSearchResult {
        sequence: best.sequence,
        log_prob: best.log_prob,
        char_probs: best.char_probs,
    })
}

/// Beam-search decode of every batch row.
pub fn beam_search_decode(
    data: &[f32],
    layout: &CtcLayout,
    beam_width: usize,
) -> Result<Vec<BeamSearchResult>> {
    check_data_len(data, layout)?;
    let row_len = layout.row_len();
    (0..layout.batch)
        .map(|n| beam_search_row(&data[n * row_len..(n + 1) * row_len], layout, beam_width))
        .collect()
}

/// Mean per-character probability; empty input decodes with confidence 0.
pub fn sequence_confidence(char_probs: &[f32]) -> f32 {
    if char_probs.is_empty() {
        return 0.0;
    }
    char_probs.iter().sum::<f32>() / char_probs.len() as f32
}

/// Summed log-probability of the greedy path, for cross-checking beam
/// results.
pub fn greedy_path_log_prob(seq: &DecodedSequence) -> f32 {
    seq.probs.iter().map(|&p| p.max(f32::MIN_POSITIVE).ln()).sum()
}

fn check_data_len(data: &[f32], layout: &CtcLayout) -> Result<()> {
    let expected = layout.batch * layout.row_len();
    if data.len() != expected {
        return Err(RecognitionError::Decode(format!(
            "output has {} values, layout {layout:?} needs {expected}",
            data.len()
        )));
    }
    Ok(())
}

fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    let mut best_v = f32::NEG_INFINITY;
    for (i, &v) in values.iter().enumerate() {
        if v > best_v {
            best_v = v;
            best = i;
        }
    }
    best
}

/// A row that already sums to one inside the unit interval is taken as
/// softmax output; anything else is treated as raw logits.
fn is_probability_row(values: &[f32]) -> bool {
    let mut sum = 0.0f32;
    for &v in values {
        if !(-0.05..=1.05).contains(&v) {
            return false;
        }
        sum += v;
    }
    (sum - 1.0).abs() <= 0.05
}

fn softmax_at(values: &[f32], index: usize) -> f32 {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let sum: f32 = values.iter().map(|&v| (v - max).exp()).sum();
    if sum == 0.0 {
        return 0.0;
    }
    (values[index] - max).exp() / sum
}

fn row_log_probs(values: &[f32], out: &mut [f32]) {
    if is_probability_row(values) {
        for (o, &v) in out.iter_mut().zip(values) {
            *o = v.max(f32::MIN_POSITIVE).ln();
        }
        return;
    }
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let log_sum = values
        .iter()
        .map(|&v| (v - max).exp())
        .sum::<f32>()
        .ln();
    for (o, &v) in out.iter_mut().zip(values) {
        *o = v - max - log_sum;
    }
}

fn log_add_exp(a: f32, b: f32) -> f32 {
    if a == f32::NEG_INFINITY {
        return b;
    }
    if b == f32::NEG_INFINITY {
        return a;
    }
    let m = a.max(b);
    m + ((a - m).exp() + (b - m).exp()).ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    // T=4 timesteps, C=4 classes; argmaxes 1,1,0,2 with probabilities
    // 0.9, 0.8, 0.9, 0.7. Rows are valid probability vectors.
    fn s1_rows() -> Vec<[f32; 4]> {
        vec![
            [0.05, 0.9, 0.03, 0.02],
            [0.1, 0.8, 0.05, 0.05],
            [0.9, 0.04, 0.03, 0.03],
            [0.1, 0.1, 0.7, 0.1],
        ]
    }

    fn time_major(rows: &[[f32; 4]]) -> Vec<f32> {
        rows.iter().flatten().copied().collect()
    }

    fn class_major(rows: &[[f32; 4]]) -> Vec<f32> {
        let mut out = Vec::with_capacity(rows.len() * 4);
        for c in 0..4 {
            for row in rows {
                out.push(row[c]);
            }
        }
        out
    }

    #[test]
    fn layout_detected_by_charset_size() {
        // 3 timesteps, 5 classes, charset of 4 tokens.
        let layout = resolve_layout(&[1, 3, 5], 4, true).unwrap();
        assert!(!layout.classes_first);
        assert_eq!((layout.timesteps, layout.classes), (3, 5));

        let layout = resolve_layout(&[1, 5, 3], 4, false).unwrap();
        assert!(layout.classes_first);
        assert_eq!((layout.timesteps, layout.classes), (3, 5));
    }

    #[test]
    fn ambiguous_layout_trusts_the_hint() {
        let layout = resolve_layout(&[1, 4, 4], 2, false).unwrap();
        assert!(!layout.classes_first);
        let layout = resolve_layout(&[1, 4, 4], 2, true).unwrap();
        assert!(layout.classes_first);
    }

    #[test]
    fn trailing_unit_dims_are_collapsed() {
        let layout = resolve_layout(&[2, 6, 5, 1, 1], 4, false).unwrap();
        assert_eq!(layout.batch, 2);
        assert_eq!((layout.timesteps, layout.classes), (6, 5));
    }

    #[test]
    fn bad_shapes_are_rejected() {
        assert!(resolve_layout(&[4, 5], 4, false).is_err());
        assert!(resolve_layout(&[1, 0, 5], 4, false).is_err());
    }

    #[test]
    fn greedy_time_major() {
        // S1: text indices collapse to [1, 2] at confidence 0.8.
        let data = time_major(&s1_rows());
        let layout = resolve_layout(&[1, 4, 4], 2, false).unwrap();
        let decoded = greedy_decode(&data, &layout).unwrap().remove(0);

        assert_eq!(decoded.indices, vec![1, 1, 0, 2]);
        assert_eq!(decoded.collapsed, vec![1, 2]);
        assert!((decoded.collapsed_probs[0] - 0.9).abs() < 1e-5);
        assert!((decoded.collapsed_probs[1] - 0.7).abs() < 1e-5);
        let confidence = sequence_confidence(&decoded.collapsed_probs);
        assert!((confidence - 0.8).abs() < 1e-5);
    }

    #[test]
    fn greedy_class_major_matches_time_major() {
        // S2: same data in [N, C, T] order decodes identically.
        let data = class_major(&s1_rows());
        let layout = resolve_layout(&[1, 4, 4], 2, true).unwrap();
        let decoded = greedy_decode(&data, &layout).unwrap().remove(0);

        assert_eq!(decoded.collapsed, vec![1, 2]);
        let confidence = sequence_confidence(&decoded.collapsed_probs);
        assert!((confidence - 0.8).abs() < 1e-5);
    }

    #[test]
    fn greedy_on_logits_uses_softmax() {
        // One timestep of raw logits; probability must come from softmax.
        let data = vec![1.0, 3.0, 1.0];
        let layout = CtcLayout {
            batch: 1,
            timesteps: 1,
            classes: 3,
            classes_first: false,
        };
        let decoded = greedy_decode(&data, &layout).unwrap().remove(0);
        assert_eq!(decoded.indices, vec![1]);
        let expected = (3.0f32 - 3.0).exp() / ((1.0f32 - 3.0).exp() * 2.0 + 1.0);
        assert!((decoded.probs[0] - expected).abs() < 1e-5);
    }

    #[test]
    fn greedy_length_invariants() {
        let data = time_major(&s1_rows());
        let layout = resolve_layout(&[1, 4, 4], 2, false).unwrap();
        let decoded = greedy_decode(&data, &layout).unwrap().remove(0);
        assert_eq!(decoded.indices.len(), layout.timesteps);
        assert!(decoded.collapsed.len() <= layout.timesteps);
    }

    #[test]
    fn all_blank_stream_collapses_to_empty() {
        let rows = [[0.9f32, 0.05, 0.05], [0.8, 0.1, 0.1], [0.7, 0.2, 0.1]];
        let data: Vec<f32> = rows.iter().flatten().copied().collect();
        let layout = CtcLayout {
            batch: 1,
            timesteps: 3,
            classes: 3,
            classes_first: false,
        };
        let decoded = greedy_decode(&data, &layout).unwrap().remove(0);
        assert!(decoded.collapsed.is_empty());
        assert_eq!(sequence_confidence(&decoded.collapsed_probs), 0.0);
    }

    #[test]
    fn collapse_is_idempotent() {
        let indices = vec![1, 1, 0, 2, 2, 2, 0, 0, 1];
        let probs = vec![0.9, 0.8, 0.9, 0.7, 0.6, 0.5, 0.9, 0.9, 0.4];
        let (once, once_probs) = collapse(&indices, &probs);
        let (twice, twice_probs) = collapse(&once, &once_probs);
        assert_eq!(once, vec![1, 2, 1]);
        assert_eq!(once_probs, vec![0.9, 0.7, 0.4]);
        assert_eq!(once, twice);
        assert_eq!(once_probs, twice_probs);
    }

    #[test]
    fn beam_matches_or_beats_greedy() {
        // S3: greedy picks blank then class 3; beam accumulates more mass.
        let rows = [[0.4f32, 0.3, 0.2, 0.1], [0.1, 0.2, 0.3, 0.4]];
        let data: Vec<f32> = rows.iter().flatten().copied().collect();
        let layout = resolve_layout(&[1, 2, 4], 3, false).unwrap();

        let greedy = greedy_decode(&data, &layout).unwrap().remove(0);
        assert_eq!(greedy.collapsed, vec![3]);

        let beam = beam_search_row(&data, &layout, 5).unwrap();
        assert_eq!(beam.sequence, vec![3]);
        assert!(beam.log_prob >= greedy_path_log_prob(&greedy) - 1e-5);

        // Winning hypothesis ([3], last = 3) merges the blank-then-3 and
        // 3-then-3 paths: 0.4*0.4 + 0.1*0.4 = 0.20.
        assert!((beam.log_prob - 0.20f32.ln()).abs() < 1e-4);
    }

    #[test]
    fn beam_invariant_holds_for_every_width() {
        let data = time_major(&s1_rows());
        let layout = resolve_layout(&[1, 4, 4], 2, false).unwrap();
        let greedy = greedy_decode(&data, &layout).unwrap().remove(0);
        let greedy_lp = greedy_path_log_prob(&greedy);

        for width in 1..=8 {
            let beam = beam_search_row(&data, &layout, width).unwrap();
            assert!(beam.sequence.len() <= layout.timesteps);
            assert!(
                beam.log_prob >= greedy_lp - 1e-4,
                "width {width}: {} < {greedy_lp}",
                beam.log_prob
            );
        }
    }

    #[test]
    fn beam_is_deterministic() {
        let data = time_major(&s1_rows());
        let layout = resolve_layout(&[1, 4, 4], 2, false).unwrap();
        let a = beam_search_row(&data, &layout, 4).unwrap();
        let b = beam_search_row(&data, &layout, 4).unwrap();
        assert_eq!(a.sequence, b.sequence);
        assert_eq!(a.log_prob, b.log_prob);
        assert_eq!(a.char_probs, b.char_probs);
    }

    #[test]
    fn beam_emits_repeated_char_across_blank() {
        // class 1, blank, class 1 must decode as two characters.
        let rows = [[0.1f32, 0.9], [0.9, 0.1], [0.1, 0.9]];
        let data: Vec<f32> = rows.iter().flatten().copied().collect();
        let layout = CtcLayout {
            batch: 1,
            timesteps: 3,
            classes: 2,
            classes_first: false,
        };
        let beam = beam_search_row(&data, &layout, 4).unwrap();
        assert_eq!(beam.sequence, vec![1, 1]);
        assert_eq!(beam.char_probs.len(), 2);
    }

    #[test]
    fn beam_rejects_zero_width() {
        let layout = CtcLayout {
            batch: 1,
            timesteps: 1,
            classes: 2,
            classes_first: false,
        };
        assert!(beam_search_row(&[0.5, 0.5], &layout, 0).is_err());
    }

    #[test]
    fn batch_rows_decode_independently() {
        let mut data = time_major(&s1_rows());
        data.extend(time_major(&s1_rows()));
        let layout = resolve_layout(&[2, 4, 4], 2, false).unwrap();

        let decoded = greedy_decode(&data, &layout).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].collapsed, decoded[1].collapsed);

        let beams = beam_search_decode(&data, &layout, 3).unwrap();
        assert_eq!(beams.len(), 2);
        assert_eq!(beams[0].sequence, beams[1].sequence);
    }

    #[test]
    fn confidence_is_mean_of_char_probs() {
        assert_eq!(sequence_confidence(&[]), 0.0);
        assert!((sequence_confidence(&[0.5, 1.0]) - 0.75).abs() < 1e-6);
    }
}
