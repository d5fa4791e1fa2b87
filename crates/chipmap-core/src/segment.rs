use serde::{Deserialize, Serialize};


/// Spectral bands in payload and record order.
pub const BAND_NAMES: [&str; 7] = ["blue", "green", "red", "nir", "swir1", "swir2", "thermal"];
pub const N_BANDS: usize = BAND_NAMES.len();

/// Per-band regression fit attached to a change segment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BandFit {
    #[serde(default)]
    pub magnitude: f32,
    #[serde(default)]
    pub rmse: f32,
    #[serde(default)]
    pub intercept: f32,
    #[serde(default)]
    pub coefficients: Vec<f32>,
}

/// One fitted temporal segment of a single pixel.
///
/// Days are ordinal (0001-01-01 = 1). `break_day <= 0` means the segment runs
/// to the end of the observed series. Change segments fill `magnitudes` and
/// `bands`; classification segments fill `class_probabilities` and the
/// parallel `class_labels`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Segment {
    pub start_day: i64,
    pub end_day: i64,
    pub break_day: i64,
    /// A break is confirmed when this equals 1.
    pub change_probability: f32,
    /// Curve QA category.
    pub quality: u8,
    pub observation_count: u32,
    /// Magnitude of change at the break, one value per band.
    pub magnitudes: Vec<f32>,
    pub bands: Vec<BandFit>,
    pub class_probabilities: Vec<f32>,
    pub class_labels: Vec<u8>,
}

impl Segment {
    pub fn new(start_day: i64, end_day: i64) -> Self {
        debug_assert!(start_day <= end_day, "segment starts after it ends");
        Self { start_day, end_day, ..Self::default() }
    }

    pub fn with_break(mut self, break_day: i64, change_probability: f32) -> Self {
        self.break_day = break_day;
        self.change_probability = change_probability;
        self
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_magnitudes(mut self, magnitudes: Vec<f32>) -> Self {
        self.magnitudes = magnitudes;
        self
    }

    /// Attach class weights. Labels default to `0..n` when `labels` is empty.
    pub fn with_classes(mut self, probabilities: Vec<f32>, labels: Vec<u8>) -> Self {
        self.class_labels = if labels.is_empty() {
            (0..probabilities.len()).map(|i| i as u8).collect()
        } else {
            labels
        };
        self.class_probabilities = probabilities;
        self
    }

    #[inline]
    pub fn contains(&self, day: i64) -> bool {
        self.start_day <= day && day <= self.end_day
    }

    #[inline]
    pub fn has_break(&self) -> bool {
        self.break_day > 0
    }

    #[inline]
    pub fn is_confirmed_break(&self) -> bool {
        self.change_probability >= 1.0
    }

    /// Label and weight of the most probable class.
    pub fn dominant_class(&self) -> Option<(u8, f32)> {
        self.ranked_class(0)
    }

    /// Label and weight of the second most probable class.
    pub fn secondary_class(&self) -> Option<(u8, f32)> {
        self.ranked_class(1)
    }

    /// Class at `rank` (0 = most probable). Equal weights keep label order.
    fn ranked_class(&self, rank: usize) -> Option<(u8, f32)> {
        let probs = &self.class_probabilities;
        let mut order: Vec<usize> = (0..probs.len().min(self.class_labels.len())).collect();
        order.sort_by(|&a, &b| {
            probs[b]
                .partial_cmp(&probs[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        order.get(rank).map(|&i| (self.class_labels[i], probs[i]))
    }
}

/// Stable sort by `start_day`; segments starting together keep payload order.
pub fn sort_segments(segments: &mut [Segment]) {
    segments.sort_by_key(|s| s.start_day);
}

/// Count neighbouring segments that overlap in time. Overlap is tolerated,
/// only reported.
pub fn count_overlaps(segments: &[Segment]) -> usize {
    segments
        .windows(2)
        .filter(|pair| pair[1].start_day <= pair[0].end_day)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dominant_and_secondary_follow_probabilities() {
        let s = Segment::new(1, 10).with_classes(vec![0.1, 0.6, 0.3], vec![]);
        assert_eq!(s.dominant_class(), Some((1, 0.6)));
        assert_eq!(s.secondary_class(), Some((2, 0.3)));
    }

    #[test]
    fn ties_resolve_to_earliest_label() {
        let s = Segment::new(1, 10).with_classes(vec![0.4, 0.4, 0.2], vec![5, 7, 3]);
        assert_eq!(s.dominant_class().map(|c| c.0), Some(5));
        assert_eq!(s.secondary_class().map(|c| c.0), Some(7));
    }

    #[test]
    fn single_class_has_no_secondary() {
        let s = Segment::new(1, 10).with_classes(vec![1.0], vec![4]);
        assert_eq!(s.dominant_class(), Some((4, 1.0)));
        assert_eq!(s.secondary_class(), None);
    }

    #[test]
    fn sort_is_stable_on_equal_starts() {
        let mut segs = vec![
            Segment::new(50, 60).with_quality(1),
            Segment::new(10, 20).with_quality(2),
            Segment::new(50, 55).with_quality(3),
        ];
        sort_segments(&mut segs);
        let q: Vec<u8> = segs.iter().map(|s| s.quality).collect();
        assert_eq!(q, vec![2, 1, 3]);
    }

    #[test]
    fn overlaps_are_counted_not_rejected() {
        let segs = vec![Segment::new(1, 100), Segment::new(90, 200), Segment::new(300, 400)];
        assert_eq!(count_overlaps(&segs), 1);
    }
}
