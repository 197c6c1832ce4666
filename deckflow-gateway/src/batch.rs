//! Batch planning.

use std::ops::Range;

/// Split `units` sub-requests into consecutive batches.
///
/// At or below `threshold` everything is one batch; above it, batches of
/// `batch_size` units each (the last may be shorter).
pub fn plan_batches(units: usize, threshold: usize, batch_size: usize) -> Vec<Range<usize>> {
    if units == 0 {
        return Vec::new();
    }
    if units <= threshold {
        return vec![0..units];
    }
    let size = batch_size.max(1);
    (0..units)
        .step_by(size)
        .map(|start| start..(start + size).min(units))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_jobs_are_one_batch() {
        assert_eq!(plan_batches(35, 35, 5), vec![0..35]);
        assert_eq!(plan_batches(1, 35, 5), vec![0..1]);
        assert!(plan_batches(0, 35, 5).is_empty());
    }

    #[test]
    fn test_large_jobs_are_split() {
        let batches = plan_batches(50, 35, 5);
        assert_eq!(batches.len(), 10);
        assert_eq!(batches[0], 0..5);
        assert_eq!(batches[9], 45..50);

        let batches = plan_batches(37, 35, 5);
        assert_eq!(batches.last(), Some(&(35..37)));
        assert_eq!(batches.iter().map(|b| b.len()).sum::<usize>(), 37);
    }
}
