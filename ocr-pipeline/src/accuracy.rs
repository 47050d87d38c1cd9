//! Recognition accuracy metrics for validation runs.

use unicode_segmentation::UnicodeSegmentation;

/// Character and word error rates against a ground-truth transcript.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccuracyReport {
    /// Grapheme-level edit distance / ground-truth length.
    pub cer: f64,
    /// Word-level edit distance / ground-truth word count.
    pub wer: f64,
}

impl AccuracyReport {
    pub fn compare(ground_truth: &str, predicted: &str) -> Self {
        let gt_chars: Vec<&str> = ground_truth.graphemes(true).collect();
        let pred_chars: Vec<&str> = predicted.graphemes(true).collect();
        let gt_words: Vec<&str> = ground_truth.split_whitespace().collect();
        let pred_words: Vec<&str> = predicted.split_whitespace().collect();

        Self {
            cer: error_rate(&gt_chars, &pred_chars),
            wer: error_rate(&gt_words, &pred_words),
        }
    }

    pub fn within(&self, max_cer: f64, max_wer: f64) -> bool {
        self.cer <= max_cer && self.wer <= max_wer
    }
}

/// Mean and worst-case rates over a set of samples.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchReport {
    pub samples: usize,
    pub mean_cer: f64,
    pub mean_wer: f64,
    pub max_cer: f64,
    pub max_wer: f64,
}

impl BatchReport {
    pub fn compare<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut report = Self::default();
        let mut total_cer = 0.0;
        let mut total_wer = 0.0;
        for (ground_truth, predicted) in pairs {
            let sample = AccuracyReport::compare(ground_truth, predicted);
            total_cer += sample.cer;
            total_wer += sample.wer;
            report.max_cer = report.max_cer.max(sample.cer);
            report.max_wer = report.max_wer.max(sample.wer);
            report.samples += 1;
        }
        if report.samples > 0 {
            report.mean_cer = total_cer / report.samples as f64;
            report.mean_wer = total_wer / report.samples as f64;
        }
        report
    }
}

fn error_rate<T: Eq>(ground_truth: &[T], predicted: &[T]) -> f64 {
    if ground_truth.is_empty() {
        return if predicted.is_empty() { 0.0 } else { 1.0 };
    }
    levenshtein(ground_truth, predicted) as f64 / ground_truth.len() as f64
}

/// Edit distance with a rolling single-row table.
fn levenshtein<T: Eq>(a: &[T], b: &[T]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, item_a) in a.iter().enumerate() {
        let mut previous_diagonal = row[0];
        row[0] = i + 1;
        for (j, item_b) in b.iter().enumerate() {
            let cost = usize::from(item_a != item_b);
            let next = (previous_diagonal + cost)
                .min(row[j] + 1)
                .min(row[j + 1] + 1);
            previous_diagonal = row[j + 1];
            row[j + 1] = next;
        }
    }
    row[b.len()]
}
