//! 品牌评分策略
//!
//! Pure functions: identical `(rank, sentiment)` inputs always give the same
//! score and grade.

use crate::models::{Grade, ParsedFields};

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 100.0;

/// Score for one parsed answer. Ranks outside 1..=10 count as not mentioned.
pub fn cell_score(fields: &ParsedFields) -> f64 {
    let sentiment = fields.sentiment.clamp(-1.0, 1.0);
    let rank = fields.rank;
    let base = match rank {
        1..=3 => 90.0 + 3.0 * f64::from(3 - rank),
        4..=6 => 70.0 + 3.0 * f64::from(6 - rank),
        7..=10 => 50.0 + 2.0 * f64::from(10 - rank),
        _ => 30.0,
    };
    (base + 10.0 * sentiment).clamp(MIN_SCORE, MAX_SCORE)
}

/// Mean of the per-cell scores, unrounded. `None` without samples; zero is a
/// real score and never stands in for missing data.
pub fn brand_score<'a, I>(samples: I) -> Option<f64>
where
    I: IntoIterator<Item = &'a ParsedFields>,
{
    let mut total = 0.0;
    let mut count = 0usize;
    for fields in samples {
        total += cell_score(fields);
        count += 1;
    }
    if count == 0 {
        return None;
    }
    Some((total / count as f64).clamp(MIN_SCORE, MAX_SCORE))
}

/// Display score (one decimal) and the grade of the unrounded mean, so
/// rounding never lifts a brand into the next band.
pub fn rate<'a, I>(samples: I) -> Option<(f64, Grade)>
where
    I: IntoIterator<Item = &'a ParsedFields>,
{
    brand_score(samples).map(|score| (round1(score), grade(score)))
}

pub fn grade(score: f64) -> Grade {
    Grade::from_score(score)
}

pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub(crate) fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(rank: i32, sentiment: f64) -> ParsedFields {
        ParsedFields {
            brand_mentioned: rank != -1,
            rank,
            sentiment,
            cited_sources: Vec::new(),
        }
    }

    #[test]
    fn test_rank_bands() {
        assert_eq!(cell_score(&fields(1, 0.0)), 96.0);
        assert_eq!(cell_score(&fields(3, 0.0)), 90.0);
        assert_eq!(cell_score(&fields(4, 0.0)), 76.0);
        assert_eq!(cell_score(&fields(6, 0.0)), 70.0);
        assert_eq!(cell_score(&fields(7, 0.0)), 56.0);
        assert_eq!(cell_score(&fields(10, 0.0)), 50.0);
        assert_eq!(cell_score(&fields(-1, 0.0)), 30.0);
    }

    #[test]
    fn test_sentiment_and_clamping() {
        // 90 + 3*2 + 5 = 101
        assert_eq!(cell_score(&fields(1, 0.5)), 100.0);
        assert_eq!(cell_score(&fields(-1, -1.0)), 20.0);
        assert_eq!(cell_score(&fields(5, -0.5)), 68.0);
        // out-of-range sentiment is clamped before weighting
        assert_eq!(cell_score(&fields(-1, 9.0)), 40.0);
        assert_eq!(cell_score(&fields(0, 0.0)), 30.0);
    }

    #[test]
    fn test_brand_score_average_and_grade() {
        let samples = [fields(1, 0.5), fields(6, 0.0)];
        let (score, grade) = rate(samples.iter()).unwrap();
        assert_eq!(score, 85.0);
        assert_eq!(grade, Grade::A);

        assert_eq!(rate(samples.iter()), Some((score, grade)));
    }

    #[test]
    fn test_brand_score_without_samples() {
        assert_eq!(brand_score(std::iter::empty()), None);
        // a genuinely low score is still reported
        let score = brand_score([fields(-1, -1.0)].iter()).unwrap();
        assert_eq!(score, 20.0);
        assert_eq!(grade(score), Grade::D);
    }

    #[test]
    fn test_rounding() {
        let samples = [fields(2, 0.33), fields(2, 0.0), fields(2, 0.0)];
        // (96.3 + 93 + 93) / 3 = 94.1000..
        assert_eq!(rate(samples.iter()).unwrap().0, 94.1);
    }

    #[test]
    fn test_grade_uses_unrounded_score() {
        // 90 - 0.04 = 89.96, shown as 90.0 but still below the A+ band
        let samples = [fields(3, -0.004)];
        assert!(brand_score(samples.iter()).unwrap() < 90.0);
        let (score, grade) = rate(samples.iter()).unwrap();
        assert_eq!(score, 90.0);
        assert_eq!(grade, Grade::A);
    }
}
