//! Turning sparse per-bucket speeds into a full, non-increasing profile.

/// Lowest speed extrapolation may produce (km/h).
pub const EXTRAP_MIN_SPEED: i64 = 10;
/// Highest speed extrapolation may produce (km/h).
pub const EXTRAP_MAX_SPEED: i64 = 140;

/// Representative speed of one bucket and the number of observations behind it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bucket {
    pub speed: f64,
    pub weight: usize,
}

impl Bucket {
    pub fn new(speed: f64, weight: usize) -> Self {
        Self { speed, weight }
    }
}

/// Fills every bucket from the populated ones.
///
/// Populated values are first made non-increasing with weighted
/// pool-adjacent-violators and rounded. Gaps between populated buckets are
/// interpolated linearly; the ends are extrapolated along the nearest slope,
/// clamped to [`EXTRAP_MIN_SPEED`, `EXTRAP_MAX_SPEED`] without crossing the
/// nearest measured value. Returns `None` when no bucket is populated.
pub fn fill_buckets(buckets: &[Option<Bucket>]) -> Option<Vec<i64>> {
    let populated: Vec<(usize, Bucket)> = buckets
        .iter()
        .enumerate()
        .filter_map(|(i, b)| b.filter(|b| b.weight > 0 && b.speed.is_finite()).map(|b| (i, b)))
        .collect();
    if populated.is_empty() {
        return None;
    }

    let pooled = pool_adjacent_violators(&populated.iter().map(|(_, b)| *b).collect::<Vec<_>>());

    let mut speeds: Vec<Option<i64>> = vec![None; buckets.len()];
    for ((i, _), v) in populated.iter().zip(&pooled) {
        speeds[*i] = Some(v.round() as i64);
    }

    let indexes: Vec<usize> = populated.iter().map(|(i, _)| *i).collect();
    let (first, last) = (indexes[0], indexes[indexes.len() - 1]);

    if indexes.len() == 1 {
        let flat = speeds[first].unwrap_or_default();
        return Some(vec![flat; buckets.len()]);
    }

    for pair in indexes.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let (va, vb) = (value(&speeds, a), value(&speeds, b));
        for (i, slot) in speeds.iter_mut().enumerate().take(b).skip(a + 1) {
            let t = (i - a) as f64 / (b - a) as f64;
            *slot = Some((va as f64 + (vb as f64 - va as f64) * t).round() as i64);
        }
    }

    let head = value(&speeds, first);
    let slope = value(&speeds, first + 1).saturating_sub(head);
    for j in 0..first {
        let v = head.saturating_sub(((first - j) as i64).saturating_mul(slope));
        speeds[j] = Some(v.min(EXTRAP_MAX_SPEED).max(head));
    }

    let tail = value(&speeds, last);
    let slope = tail.saturating_sub(value(&speeds, last - 1));
    for (j, slot) in speeds.iter_mut().enumerate().skip(last + 1) {
        let v = tail.saturating_add(((j - last) as i64).saturating_mul(slope));
        *slot = Some(v.max(EXTRAP_MIN_SPEED).min(tail));
    }

    Some(speeds.into_iter().map(Option::unwrap_or_default).collect())
}

fn value(speeds: &[Option<i64>], i: usize) -> i64 {
    speeds[i].unwrap_or_default()
}

/// Weighted isotonic regression for a non-increasing sequence.
fn pool_adjacent_violators(points: &[Bucket]) -> Vec<f64> {
    // (weighted sum, total weight, number of points)
    let mut blocks: Vec<(f64, f64, usize)> = Vec::with_capacity(points.len());
    for p in points {
        let w = p.weight as f64;
        blocks.push((p.speed * w, w, 1));
        while blocks.len() >= 2 {
            let (s1, w1, _) = blocks[blocks.len() - 2];
            let (s2, w2, _) = blocks[blocks.len() - 1];
            if s1 / w1 >= s2 / w2 {
                break;
            }
            if let Some((s, w, n)) = blocks.pop() {
                if let Some(prev) = blocks.last_mut() {
                    prev.0 += s;
                    prev.1 += w;
                    prev.2 += n;
                }
            }
        }
    }

    blocks
        .into_iter()
        .flat_map(|(s, w, n)| std::iter::repeat_n(s / w, n))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unweighted(values: &[Option<i64>]) -> Vec<Option<Bucket>> {
        values
            .iter()
            .map(|v| v.map(|s| Bucket::new(s as f64, 1)))
            .collect()
    }

    fn fill(values: &[Option<i64>]) -> Vec<i64> {
        fill_buckets(&unweighted(values)).unwrap()
    }

    fn assert_non_increasing(v: &[i64]) {
        assert!(v.windows(2).all(|w| w[0] >= w[1]), "not non-increasing: {v:?}");
    }

    // French rural/suburban/urban profiles with every class widened to 8 buckets.
    #[test]
    fn test_reference_profiles() {
        let cases: [([Option<i64>; 8], [i64; 8]); 12] = [
            (
                [None, None, Some(55), Some(45), None, Some(30), None, None],
                [75, 65, 55, 45, 38, 30, 22, 14],
            ),
            (
                [Some(40), Some(31), Some(25), Some(24), None, None, None, None],
                [40, 31, 25, 24, 23, 22, 21, 20],
            ),
            (
                [Some(90), None, None, None, None, None, None, Some(13)],
                [90, 79, 68, 57, 46, 35, 24, 13],
            ),
            (
                [Some(37), Some(32), Some(27), Some(20), Some(19), None, None, None],
                [37, 32, 27, 20, 19, 18, 17, 16],
            ),
            (
                [None, None, None, None, None, Some(20), Some(15), Some(10)],
                [45, 40, 35, 30, 25, 20, 15, 10],
            ),
            (
                [Some(32), Some(27), Some(22), Some(17), Some(16), Some(16), Some(14), None],
                [32, 27, 22, 17, 16, 16, 14, 12],
            ),
            (
                [Some(72), Some(67), None, Some(57), Some(53), None, None, None],
                [72, 67, 62, 57, 53, 49, 45, 41],
            ),
            (
                [None, Some(73), Some(43), Some(41), None, None, None, None],
                [103, 73, 43, 41, 39, 37, 35, 33],
            ),
            (
                [None, Some(43), Some(32), Some(21), Some(19), None, None, None],
                [54, 43, 32, 21, 19, 17, 15, 13],
            ),
            // Rising data gets pooled instead of skipped.
            (
                [Some(50), Some(62), None, Some(35), Some(30), None, None, None],
                [56, 56, 46, 35, 30, 25, 20, 15],
            ),
            (
                [None, None, Some(23), Some(59), None, None, None, None],
                [41, 41, 41, 41, 41, 41, 41, 41],
            ),
            // A single measurement is extended flat.
            (
                [None, None, None, None, Some(45), None, None, None],
                [45, 45, 45, 45, 45, 45, 45, 45],
            ),
        ];

        for (input, expected) in cases {
            assert_eq!(fill(&input), expected.to_vec(), "input {input:?}");
        }
    }

    #[test]
    fn test_empty_is_none() {
        assert_eq!(fill_buckets(&[None; 8]), None);
        assert_eq!(fill_buckets(&[Some(Bucket::new(30.0, 0)); 8]), None);
    }

    #[test]
    fn test_pav_respects_weights() {
        let buckets = [
            Some(Bucket::new(30.0, 1)),
            Some(Bucket::new(50.0, 3)),
            None,
            Some(Bucket::new(20.0, 1)),
            None,
            None,
            None,
            None,
        ];
        let speeds = fill_buckets(&buckets).unwrap();
        assert_eq!(speeds, vec![45, 45, 33, 20, 10, 10, 10, 10]);
    }

    #[test]
    fn test_extrapolation_never_crosses_measured_value() {
        let buckets = [
            None,
            None,
            Some(Bucket::new(150.0, 3)),
            Some(Bucket::new(100.0, 1)),
            None,
            None,
            None,
            Some(Bucket::new(5.0, 1)),
        ];
        let speeds = fill_buckets(&buckets).unwrap();
        assert_eq!(speeds, vec![150, 150, 150, 100, 76, 53, 29, 5]);
        assert_non_increasing(&speeds);
    }

    #[test]
    fn test_extreme_speeds_do_not_overflow() {
        let buckets = [
            None,
            Some(Bucket::new(1e300, 1)),
            Some(Bucket::new(0.0, 1)),
            None,
            None,
            None,
            None,
            None,
        ];
        let speeds = fill_buckets(&buckets).unwrap();
        assert_eq!(speeds[0], i64::MAX);
        assert_eq!(speeds[7], 0);
        assert_non_increasing(&speeds);
    }

    #[test]
    fn test_increasing_input_becomes_flat() {
        let input: Vec<Option<i64>> = (1..=8).map(|i| Some(i * 10)).collect();
        let speeds = fill(&input);
        assert_eq!(speeds, vec![45; 8]);
    }

    #[test]
    fn test_any_pattern_is_non_increasing() {
        // Deterministic pseudo-random patterns.
        let mut state = 0x2545_f491_u64;
        for _ in 0..200 {
            let mut buckets = Vec::new();
            for _ in 0..8 {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                let present = state % 3 != 0;
                let speed = 5.0 + (state % 150) as f64;
                let weight = 1 + (state % 7) as usize;
                buckets.push(present.then(|| Bucket::new(speed, weight)));
            }
            if let Some(speeds) = fill_buckets(&buckets) {
                assert_eq!(speeds.len(), 8);
                assert_non_increasing(&speeds);
            }
        }
    }
}
