//! Point-in-time evaluators, one per product.
//!
//! Every function takes the pixel's segments sorted by `start_day` and an
//! ordinal query day. A query day ≤ 0 short-circuits to the product's zero
//! value. Segments are walked in time order and the first match wins.
//!
//! Classification products distinguish three positions of the query day:
//! inside a segment, inside a gap (after the previous segment's end and
//! before the next segment's start, including before the first segment), and
//! past the last segment.

use chrono::Datelike;

use crate::dates::{self, SERIES_EPOCH};
use crate::segment::Segment;

/// Class reported for a query day that falls between two segments.
pub const TRANSITION_CLASS: u8 = 9;

/// Confidence reported inside a gap: certain that a transition is under way.
const GAP_CONFIDENCE: u8 = 100;

/// Secondary confidence with no covering segment. Differs from the primary
/// sentinel (0); downstream consumers read it as-is.
const NO_SECONDARY_CONFIDENCE: u8 = 1;

enum Position<'a> {
    Within(&'a Segment),
    Gap,
    Outside,
}

fn locate(segments: &[Segment], day: i64) -> Position<'_> {
    let mut prev_end = 0;
    for s in segments {
        if s.contains(day) {
            return Position::Within(s);
        }
        if prev_end < day && day < s.start_day {
            return Position::Gap;
        }
        prev_end = s.end_day;
    }
    Position::Outside
}

/// First segment whose break falls in the query day's calendar year.
fn break_in_year(segments: &[Segment], day: i64) -> Option<(&Segment, chrono::NaiveDate)> {
    let year = dates::year_of(day)?;
    segments
        .iter()
        .filter(|s| s.has_break())
        .find_map(|s| {
            let date = dates::from_ordinal(s.break_day)?;
            (date.year() == year).then_some((s, date))
        })
}

/// Smallest positive `day - d` over `candidates`, 0 if there is none.
fn min_positive_distance(day: i64, candidates: impl Iterator<Item = i64>) -> u32 {
    candidates
        .map(|d| day - d)
        .filter(|&diff| diff > 0)
        .min()
        .map_or(0, |diff| u32::try_from(diff).unwrap_or(u32::MAX))
}

fn percent(p: f32) -> u8 {
    (p * 100.0).round().clamp(0.0, 255.0) as u8
}

// ── Change products ───────────────────────────────────────────────────────────

/// Day of year of a break occurring in the query year, else 0.
pub fn change_date(segments: &[Segment], day: i64) -> u16 {
    if day <= 0 {
        return 0;
    }
    break_in_year(segments, day).map_or(0, |(_, date)| date.ordinal() as u16)
}

/// Norm of the break magnitudes in the query year. The first and last bands
/// are left out of the norm.
pub fn change_magnitude(segments: &[Segment], day: i64) -> f32 {
    if day <= 0 {
        return 0.0;
    }
    break_in_year(segments, day).map_or(0.0, |(s, _)| {
        let m = &s.magnitudes;
        let interior = if m.len() > 2 { &m[1..m.len() - 1] } else { &[][..] };
        interior.iter().map(|v| v * v).sum::<f32>().sqrt()
    })
}

/// Curve QA of the segment covering the query day.
pub fn quality(segments: &[Segment], day: i64) -> u8 {
    if day <= 0 {
        return 0;
    }
    segments.iter().find(|s| s.contains(day)).map_or(0, |s| s.quality)
}

/// Days since the nearest earlier segment boundary (or the series epoch).
/// A pixel without segments has no length.
pub fn segment_length(segments: &[Segment], day: i64) -> u32 {
    if day <= 0 || segments.is_empty() {
        return 0;
    }
    let bounds = segments.iter().flat_map(|s| [s.start_day, s.end_day]);
    min_positive_distance(day, std::iter::once(SERIES_EPOCH).chain(bounds))
}

/// Days since the most recent confirmed break. Segments without a confirmed
/// break contribute the query day itself, i.e. a distance of zero.
pub fn last_change(segments: &[Segment], day: i64) -> u32 {
    if day <= 0 {
        return 0;
    }
    let breaks = segments
        .iter()
        .map(|s| if s.is_confirmed_break() { s.break_day } else { day });
    min_positive_distance(day, breaks)
}

// ── Classification products ──────────────────────────────────────────────────

pub fn class_primary(segments: &[Segment], day: i64) -> u8 {
    if day <= 0 {
        return 0;
    }
    match locate(segments, day) {
        Position::Within(s) => s.dominant_class().map_or(0, |(label, _)| label),
        Position::Gap => TRANSITION_CLASS,
        Position::Outside => 0,
    }
}

pub fn class_secondary(segments: &[Segment], day: i64) -> u8 {
    if day <= 0 {
        return 0;
    }
    match locate(segments, day) {
        Position::Within(s) => s.secondary_class().map_or(0, |(label, _)| label),
        Position::Gap => TRANSITION_CLASS,
        Position::Outside => 0,
    }
}

pub fn confidence_primary(segments: &[Segment], day: i64) -> u8 {
    if day <= 0 {
        return 0;
    }
    match locate(segments, day) {
        Position::Within(s) => s.dominant_class().map_or(0, |(_, p)| percent(p)),
        Position::Gap => GAP_CONFIDENCE,
        Position::Outside => 0,
    }
}

pub fn confidence_secondary(segments: &[Segment], day: i64) -> u8 {
    if day <= 0 {
        return 0;
    }
    match locate(segments, day) {
        Position::Within(s) => s
            .secondary_class()
            .map_or(NO_SECONDARY_CONFIDENCE, |(_, p)| percent(p)),
        Position::Gap => GAP_CONFIDENCE,
        Position::Outside => NO_SECONDARY_CONFIDENCE,
    }
}

/// Class transition code for the query year.
///
/// The first segment whose calendar-year span contains the query year decides.
/// If it ends that year the code pairs its dominant class with the next
/// segment's (0 after the last segment); otherwise the class is paired with
/// itself. Codes are decimal concatenations: 4 → 2 is 42, 3 → end is 30.
pub fn from_to(segments: &[Segment], day: i64) -> u32 {
    if day <= 0 {
        return 0;
    }
    let Some(year) = dates::year_of(day) else {
        return 0;
    };

    for (i, s) in segments.iter().enumerate() {
        let (Some(first), Some(last)) = (dates::year_of(s.start_day), dates::year_of(s.end_day)) else {
            continue;
        };
        if year < first || year > last {
            continue;
        }

        let current = s.dominant_class().map_or(0, |(label, _)| label);
        let next = if last == year {
            segments
                .get(i + 1)
                .and_then(Segment::dominant_class)
                .map_or(0, |(label, _)| label)
        } else {
            current
        };
        return pair_code(current, next);
    }
    0
}

fn pair_code(from: u8, to: u8) -> u32 {
    let digits = if to == 0 { 1 } else { to.ilog10() + 1 };
    u32::from(from) * 10u32.pow(digits) + u32::from(to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::{mid_year, ordinal};
    use approx::assert_abs_diff_eq;

    fn day(y: i32, m: u32, d: u32) -> i64 {
        ordinal(y, m, d).unwrap()
    }

    fn change_fixture() -> Vec<Segment> {
        vec![
            Segment::new(day(1985, 1, 10), day(1995, 6, 1))
                .with_break(day(1995, 6, 20), 1.0)
                .with_quality(8)
                .with_magnitudes(vec![100.0, 3.0, 4.0, 0.0, 0.0, 0.0, 100.0]),
            Segment::new(day(1995, 7, 5), day(2010, 12, 1))
                .with_quality(14),
        ]
    }

    fn class_fixture() -> Vec<Segment> {
        vec![
            Segment::new(day(1985, 1, 1), day(1990, 12, 31))
                .with_classes(vec![0.0, 0.0, 0.0, 0.0, 0.7, 0.25, 0.05], vec![]),
            Segment::new(day(1993, 1, 1), day(2000, 12, 31))
                .with_classes(vec![0.0, 0.55, 0.45], vec![]),
        ]
    }

    #[test]
    fn non_positive_query_returns_zero_values() {
        let change = change_fixture();
        let class = class_fixture();
        for q in [0, -1, -730_000] {
            assert_eq!(change_date(&change, q), 0);
            assert_eq!(change_magnitude(&change, q), 0.0);
            assert_eq!(quality(&change, q), 0);
            assert_eq!(segment_length(&change, q), 0);
            assert_eq!(last_change(&change, q), 0);
            assert_eq!(class_primary(&class, q), 0);
            assert_eq!(class_secondary(&class, q), 0);
            assert_eq!(confidence_primary(&class, q), 0);
            assert_eq!(confidence_secondary(&class, q), 0);
            assert_eq!(from_to(&class, q), 0);
        }
    }

    #[test]
    fn empty_pixel_gives_no_match_values() {
        let q = mid_year(2000).unwrap();
        assert_eq!(change_date(&[], q), 0);
        assert_eq!(change_magnitude(&[], q), 0.0);
        assert_eq!(quality(&[], q), 0);
        assert_eq!(last_change(&[], q), 0);
        assert_eq!(class_primary(&[], q), 0);
        assert_eq!(class_secondary(&[], q), 0);
        assert_eq!(confidence_primary(&[], q), 0);
        assert_eq!(confidence_secondary(&[], q), 1);
        assert_eq!(from_to(&[], q), 0);
        assert_eq!(segment_length(&[], q), 0);
    }

    #[test]
    fn series_epoch_bounds_segment_length() {
        let segs = vec![Segment::new(day(2005, 1, 1), day(2010, 1, 1))];
        let q = mid_year(2000).unwrap();
        assert_eq!(segment_length(&segs, q), (q - SERIES_EPOCH) as u32);
    }

    #[test]
    fn change_date_matches_only_the_break_year() {
        let segs = vec![Segment::new(100, 200).with_break(150, 1.0)];
        // Ordinal 150 is 0001-05-30, day 150 of year 1.
        let july = ordinal(1, 7, 1).unwrap();
        assert_eq!(change_date(&segs, july), 150);
        assert_eq!(change_date(&segs, ordinal(2, 7, 1).unwrap()), 0);
    }

    #[test]
    fn change_date_reports_day_of_year() {
        let segs = change_fixture();
        assert_eq!(change_date(&segs, mid_year(1995).unwrap()), 171);
        assert_eq!(change_date(&segs, mid_year(1996).unwrap()), 0);
    }

    #[test]
    fn magnitude_excludes_first_and_last_band() {
        let segs = change_fixture();
        assert_abs_diff_eq!(change_magnitude(&segs, mid_year(1995).unwrap()), 5.0, epsilon = 1e-6);
        assert_eq!(change_magnitude(&segs, mid_year(1990).unwrap()), 0.0);
    }

    #[test]
    fn quality_comes_from_covering_segment() {
        let segs = change_fixture();
        assert_eq!(quality(&segs, mid_year(1990).unwrap()), 8);
        assert_eq!(quality(&segs, mid_year(2000).unwrap()), 14);
        // 1995-07-01 sits between the two segments.
        assert_eq!(quality(&segs, mid_year(1995).unwrap()), 0);
        assert_eq!(quality(&segs, mid_year(2012).unwrap()), 0);
    }

    #[test]
    fn segment_length_measures_from_latest_boundary() {
        let segs = change_fixture();
        let q = mid_year(2000).unwrap();
        assert_eq!(segment_length(&segs, q), (q - day(1995, 7, 5)) as u32);
    }

    #[test]
    fn segment_length_is_monotonic_past_all_boundaries() {
        let segs = change_fixture();
        let mut prev = 0;
        for year in 2011..2030 {
            let v = segment_length(&segs, mid_year(year).unwrap());
            assert!(v >= prev, "segment length decreased in {year}");
            prev = v;
        }
    }

    #[test]
    fn last_change_counts_from_confirmed_breaks_only() {
        let segs = change_fixture();
        let q = mid_year(2000).unwrap();
        assert_eq!(last_change(&segs, q), (q - day(1995, 6, 20)) as u32);

        let unconfirmed = vec![Segment::new(day(1985, 1, 1), day(1990, 1, 1)).with_break(day(1990, 2, 1), 0.5)];
        assert_eq!(last_change(&unconfirmed, q), 0);
    }

    #[test]
    fn two_breaks_in_one_year_report_the_earlier() {
        let segs = vec![
            Segment::new(day(1990, 1, 1), day(1995, 3, 1))
                .with_break(day(1995, 3, 1), 1.0)
                .with_magnitudes(vec![9.0, 3.0, 4.0, 9.0]),
            Segment::new(day(1995, 3, 2), day(1995, 10, 1))
                .with_break(day(1995, 10, 1), 1.0)
                .with_magnitudes(vec![9.0, 6.0, 8.0, 9.0]),
        ];
        let q = mid_year(1995).unwrap();
        assert_eq!(change_date(&segs, q), 60);
        assert_abs_diff_eq!(change_magnitude(&segs, q), 5.0, epsilon = 1e-6);
    }

    #[test]
    fn overlapping_segments_resolve_to_the_earlier_start() {
        let mut first = Segment::new(100, 300).with_classes(vec![0.0, 0.0, 0.0, 0.0, 0.9], vec![]);
        first.quality = 1;
        let mut second = Segment::new(200, 400).with_classes(vec![0.0, 0.0, 0.8], vec![]);
        second.quality = 2;
        let segs = vec![first, second];

        assert_eq!(quality(&segs, 250), 1);
        assert_eq!(class_primary(&segs, 250), 4);
        assert_eq!(confidence_primary(&segs, 250), 90);
        // Past the first segment only the second one covers the day.
        assert_eq!(quality(&segs, 350), 2);
        assert_eq!(class_primary(&segs, 350), 2);
    }

    #[test]
    fn gap_yields_transition_for_class_products() {
        let segs = class_fixture();
        let gap = mid_year(1991).unwrap();
        assert_eq!(class_primary(&segs, gap), TRANSITION_CLASS);
        assert_eq!(class_secondary(&segs, gap), TRANSITION_CLASS);
        assert_eq!(confidence_primary(&segs, gap), 100);
        assert_eq!(confidence_secondary(&segs, gap), 100);

        // Change products fall through to their no-match value in a gap.
        let change = vec![
            Segment::new(day(1985, 1, 1), day(1990, 12, 31))
                .with_break(day(1990, 12, 31), 1.0)
                .with_magnitudes(vec![0.0, 3.0, 4.0, 0.0]),
            Segment::new(day(1993, 1, 1), day(2000, 12, 31)),
        ];
        assert_eq!(change_date(&change, gap), 0);
        assert_eq!(change_magnitude(&change, gap), 0.0);
        assert_eq!(change_date(&change, mid_year(1990).unwrap()), 365);
    }

    #[test]
    fn before_first_segment_is_a_gap() {
        let segs = class_fixture();
        assert_eq!(class_primary(&segs, mid_year(1984).unwrap()), TRANSITION_CLASS);
    }

    #[test]
    fn past_last_segment_is_no_match() {
        let segs = class_fixture();
        let q = mid_year(2005).unwrap();
        assert_eq!(class_primary(&segs, q), 0);
        assert_eq!(confidence_primary(&segs, q), 0);
        assert_eq!(confidence_secondary(&segs, q), 1);
    }

    #[test]
    fn class_values_inside_segments() {
        let segs = class_fixture();
        let q = mid_year(1988).unwrap();
        assert_eq!(class_primary(&segs, q), 4);
        assert_eq!(class_secondary(&segs, q), 5);
        assert_eq!(confidence_primary(&segs, q), 70);
        assert_eq!(confidence_secondary(&segs, q), 25);

        let q = mid_year(1997).unwrap();
        assert_eq!(class_primary(&segs, q), 1);
        assert_eq!(confidence_secondary(&segs, q), 45);
    }

    #[test]
    fn from_to_pairs_classes_across_a_break_year() {
        let segs = vec![
            Segment::new(day(1985, 1, 1), day(1990, 8, 1)).with_classes(vec![0.0, 0.0, 0.0, 0.0, 0.9], vec![]),
            Segment::new(day(1990, 9, 1), day(2000, 1, 1)).with_classes(vec![0.0, 0.0, 0.8], vec![]),
        ];
        assert_eq!(from_to(&segs, mid_year(1987).unwrap()), 44);
        assert_eq!(from_to(&segs, mid_year(1990).unwrap()), 42);
        assert_eq!(from_to(&segs, mid_year(1995).unwrap()), 22);
        assert_eq!(from_to(&segs, mid_year(2000).unwrap()), 20);
        assert_eq!(from_to(&segs, mid_year(2001).unwrap()), 0);
    }

    #[test]
    fn pair_code_concatenates_digits() {
        assert_eq!(pair_code(4, 2), 42);
        assert_eq!(pair_code(3, 0), 30);
        assert_eq!(pair_code(1, 12), 112);
        assert_eq!(pair_code(0, 5), 5);
    }
}
