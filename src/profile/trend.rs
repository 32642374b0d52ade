use super::types::{TrendDirection, TrendPoint};

/// Number of most recent observations considered.
const WINDOW: usize = 3;
/// Minimum change in half-window averages that counts as movement.
const THRESHOLD: f64 = 0.1;

pub fn direction(points: &[TrendPoint]) -> TrendDirection {
    let values: Vec<f64> = points.iter().map(|p| p.value).collect();
    direction_of(&values)
}

/// Compare the average of the older half of the recent window with the newer half.
pub fn direction_of(values: &[f64]) -> TrendDirection {
    if values.len() < 2 {
        return TrendDirection::Stable;
    }

    let recent = &values[values.len().saturating_sub(WINDOW)..];
    let mid = (recent.len() / 2).max(1);
    let (older, newer) = recent.split_at(mid);

    let diff = mean(newer) - mean(older);
    if diff > THRESHOLD {
        TrendDirection::Improving
    } else if diff < -THRESHOLD {
        TrendDirection::Declining
    } else {
        TrendDirection::Stable
    }
}

/// Combined account trend: inverted issue-volume trend, or the sentiment
/// trend when issue volume is flat.
pub fn overall(issue_trend: TrendDirection, sentiment_trend: TrendDirection) -> TrendDirection {
    match issue_trend {
        TrendDirection::Improving => TrendDirection::Declining,
        TrendDirection::Declining => TrendDirection::Improving,
        TrendDirection::Stable => sentiment_trend,
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_series_is_stable() {
        assert_eq!(direction_of(&[]), TrendDirection::Stable);
        assert_eq!(direction_of(&[1.0]), TrendDirection::Stable);
    }

    #[test]
    fn test_increasing_and_decreasing() {
        assert_eq!(direction_of(&[0.0, 0.5, 1.0]), TrendDirection::Improving);
        assert_eq!(direction_of(&[1.0, 0.5, 0.0]), TrendDirection::Declining);
        assert_eq!(direction_of(&[0.0, 1.0]), TrendDirection::Improving);
    }

    #[test]
    fn test_constant_is_stable() {
        assert_eq!(direction_of(&[0.5, 0.5, 0.5, 0.5]), TrendDirection::Stable);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        assert_eq!(direction_of(&[1.0, 1.05]), TrendDirection::Stable);
        assert_eq!(direction_of(&[1.0, 1.2]), TrendDirection::Improving);
    }

    #[test]
    fn test_only_last_three_points_count() {
        // Older history is ignored: window is [5, 5, 5].
        assert_eq!(direction_of(&[0.0, 0.0, 5.0, 5.0, 5.0]), TrendDirection::Stable);
        // Window [5, 0, 0]: older half is [5], newer half is [0, 0].
        assert_eq!(direction_of(&[9.0, 5.0, 0.0, 0.0]), TrendDirection::Declining);
    }

    #[test]
    fn test_deterministic() {
        let series = [2.0, 7.0, 3.0, 8.0];
        assert_eq!(direction_of(&series), direction_of(&series));
    }

    #[test]
    fn test_overall_inverts_issue_trend() {
        use TrendDirection::*;
        assert_eq!(overall(Improving, Improving), Declining);
        assert_eq!(overall(Declining, Declining), Improving);
        assert_eq!(overall(Stable, Declining), Declining);
        assert_eq!(overall(Stable, Improving), Improving);
        assert_eq!(overall(Stable, Stable), Stable);
    }

    #[test]
    fn test_direction_reads_point_values() {
        let points: Vec<TrendPoint> = [1.0, 0.0]
            .iter()
            .map(|v| TrendPoint {
                date: "2025-01-01".into(),
                value: *v,
                label: None,
                call_id: None,
            })
            .collect();
        assert_eq!(direction(&points), TrendDirection::Declining);
    }
}
