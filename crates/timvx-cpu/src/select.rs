//! Index partitioning and box overlap shared by the selection kernels.
//!
//! The selection kernels never move scores around. They permute a list
//! of indices into a score buffer, so the ordering predicate is always
//! expressed over index values.

/// Partition `indices[left..=right]` around the value at `left`.
///
/// `ahead(a, b)` tells whether the element indexed by `a` may stay ahead
/// of the one indexed by `b`; for any pair at least one direction must
/// hold or the scan never advances. On return the pivot sits at the
/// returned position with everything ahead of it on its left. An empty
/// or single-element range returns `left` untouched.
pub fn partition<F>(indices: &mut [usize], left: usize, right: usize, ahead: &F) -> usize
where
    F: Fn(usize, usize) -> bool,
{
    if left >= right {
        return left;
    }
    let key = indices[left];
    let (mut low, mut high) = (left, right);
    while low < high {
        while low < high && ahead(key, indices[high]) {
            high -= 1;
        }
        indices[low] = indices[high];
        while low < high && ahead(indices[low], key) {
            low += 1;
        }
        indices[high] = indices[low];
    }
    indices[low] = key;
    low
}

/// Sort `indices[left..=right]` by repeated partitioning.
pub fn sort_range<F>(indices: &mut [usize], left: usize, right: usize, ahead: &F)
where
    F: Fn(usize, usize) -> bool,
{
    let mut pending = vec![(left, right)];
    while let Some((l, r)) = pending.pop() {
        if l >= r {
            continue;
        }
        let p = partition(indices, l, r, ahead);
        if p > l {
            pending.push((l, p - 1));
        }
        pending.push((p + 1, r));
    }
}

/// Sort the first `len` indices by descending `scores`.
pub fn sort_by_score(scores: &[f32], indices: &mut [usize], len: usize) {
    if len == 0 {
        return;
    }
    sort_range(indices, 0, len - 1, &|a, b| scores[a].total_cmp(&scores[b]).is_ge());
}

/// Position (relative to the start of `indices`) of the highest score;
/// the first one wins ties.
pub fn max_position(scores: &[f32], indices: &[usize]) -> usize {
    let mut best = 0;
    for (i, &idx) in indices.iter().enumerate().skip(1) {
        if scores[indices[best]] < scores[idx] {
            best = i;
        }
    }
    best
}

/// Intersection over union of two `[x1, y1, x2, y2]` boxes.
///
/// A degenerate union yields 0.
pub fn iou_xyxy(a: &[f32], b: &[f32]) -> f32 {
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    let w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = w * h;
    let union = area_a + area_b - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_places_pivot() {
        let data = [3.0f32, 9.0, 1.0, 7.0, 5.0];
        let mut idx: Vec<usize> = (0..data.len()).collect();
        let p = partition(&mut idx, 0, 4, &|a, b| data[a] >= data[b]);
        assert_eq!(p, 3);
        assert_eq!(idx[p], 0);
        assert!(idx[..p].iter().all(|&i| data[i] >= 3.0));
        assert!(idx[p + 1..].iter().all(|&i| data[i] <= 3.0));
    }

    #[test]
    fn partition_empty_range() {
        let mut idx = vec![0, 1];
        assert_eq!(partition(&mut idx, 1, 1, &|_, _| true), 1);
        assert_eq!(partition(&mut idx, 2, 1, &|_, _| true), 2);
        assert_eq!(idx, vec![0, 1]);
    }

    #[test]
    fn sort_descending() {
        let data = [0.5f32, 2.0, -1.0, 2.0, 8.0, 0.0];
        let mut idx: Vec<usize> = (0..data.len()).collect();
        sort_by_score(&data, &mut idx, data.len());
        let sorted: Vec<f32> = idx.iter().map(|&i| data[i]).collect();
        assert_eq!(sorted, vec![8.0, 2.0, 2.0, 0.5, 0.0, -1.0]);
    }

    #[test]
    fn sort_prefix_only() {
        let data = [1.0f32, 3.0, 2.0, 9.0];
        let mut idx: Vec<usize> = (0..4).collect();
        sort_by_score(&data, &mut idx, 3);
        assert_eq!(idx, vec![1, 2, 0, 3]);
        sort_by_score(&data, &mut idx, 0);
        assert_eq!(idx, vec![1, 2, 0, 3]);
    }

    #[test]
    fn nan_scores_terminate() {
        let data = [f32::NAN, 1.0, f32::NAN, -3.0];
        let mut idx: Vec<usize> = (0..4).collect();
        sort_by_score(&data, &mut idx, 4);
        assert_eq!(&idx[2..], &[1, 3]);
    }

    #[test]
    fn max_first_wins_ties() {
        let data = [1.0f32, 4.0, 4.0, 2.0];
        assert_eq!(max_position(&data, &[0, 1, 2, 3]), 1);
        assert_eq!(max_position(&data, &[3, 2, 1]), 1);
    }

    #[test]
    fn iou_cases() {
        let a = [0.0, 0.0, 2.0, 2.0];
        assert_eq!(iou_xyxy(&a, &a), 1.0);
        assert_eq!(iou_xyxy(&a, &[2.0, 2.0, 3.0, 3.0]), 0.0);
        let half = iou_xyxy(&a, &[1.0, 0.0, 3.0, 2.0]);
        assert!((half - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(iou_xyxy(&[0.0; 4], &[0.0; 4]), 0.0);
    }
}
