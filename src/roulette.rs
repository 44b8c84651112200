//! Weighted random choice.

use rand::Rng;

/// Pick an index with probability proportional to its weight.
///
/// With `higher_is_better == false` the weights are inverted against their
/// maximum first. Negative weights shift the whole set up to zero; a zero or
/// non-finite total falls back to a uniform pick. Returns `None` only for an
/// empty slice.
pub fn roulette<R: Rng>(weights: &[f64], higher_is_better: bool, rng: &mut R) -> Option<usize> {
    if weights.is_empty() {
        return None;
    }
    let mut adjusted: Vec<f64> = if higher_is_better {
        weights.to_vec()
    } else {
        let max = weights.iter().copied().fold(f64::MIN, f64::max);
        weights.iter().map(|w| max - w).collect()
    };

    let min = adjusted.iter().copied().fold(f64::MAX, f64::min);
    if min < 0.0 {
        for w in &mut adjusted {
            *w -= min;
        }
    }

    let total: f64 = adjusted.iter().sum();
    if !(total.is_finite() && total > 0.0) {
        return Some(rng.random_range(0..weights.len()));
    }

    let r = rng.random::<f64>();
    let mut cumulative = 0.0;
    for (i, w) in adjusted.iter().enumerate() {
        cumulative += w / total;
        if r < cumulative {
            return Some(i);
        }
    }
    Some(adjusted.len() - 1)
}

/// Pick an operator index from adaptive weights.
///
/// Operators are visited in ascending weight order along the cumulative
/// distribution.
pub fn select_operator<R: Rng>(weights: &[f64], rng: &mut R) -> usize {
    let mut order: Vec<usize> = (0..weights.len()).collect();
    order.sort_by(|&a, &b| weights[a].total_cmp(&weights[b]));

    let total: f64 = weights.iter().filter(|w| w.is_finite() && **w > 0.0).sum();
    if total <= 0.0 {
        return rng.random_range(0..weights.len().max(1));
    }

    let r = rng.random::<f64>();
    let mut cumulative = 0.0;
    for &i in &order {
        if weights[i].is_finite() && weights[i] > 0.0 {
            cumulative += weights[i] / total;
        }
        if r < cumulative {
            return i;
        }
    }
    order.last().copied().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn frequencies(draw: impl Fn(&mut StdRng) -> usize, n: usize, len: usize) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(7);
        let mut counts = vec![0usize; len];
        for _ in 0..n {
            counts[draw(&mut rng)] += 1;
        }
        counts.iter().map(|&c| c as f64 / n as f64).collect()
    }

    #[test]
    fn test_roulette_frequencies_follow_weights() {
        let weights = [10.0, 20.0, 70.0];
        let freq = frequencies(|rng| roulette(&weights, true, rng).unwrap(), 100_000, 3);
        assert!((freq[0] - 0.1).abs() < 0.01, "{freq:?}");
        assert!((freq[1] - 0.2).abs() < 0.01, "{freq:?}");
        assert!((freq[2] - 0.7).abs() < 0.01, "{freq:?}");
    }

    #[test]
    fn test_operator_selection_frequencies_follow_weights() {
        let weights = [70.0, 10.0, 20.0];
        let freq = frequencies(|rng| select_operator(&weights, rng), 100_000, 3);
        assert!((freq[0] - 0.7).abs() < 0.01, "{freq:?}");
        assert!((freq[1] - 0.1).abs() < 0.01, "{freq:?}");
        assert!((freq[2] - 0.2).abs() < 0.01, "{freq:?}");
    }

    #[test]
    fn test_lower_is_better_never_picks_the_maximum() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..1000 {
            assert_ne!(roulette(&[1.0, 5.0, 2.0], false, &mut rng), Some(1));
        }
    }

    #[test]
    fn test_degenerate_weights_fall_back_to_uniform() {
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(roulette(&[], true, &mut rng), None);
        let picks: Vec<usize> = (0..200)
            .filter_map(|_| roulette(&[0.0, 0.0], true, &mut rng))
            .collect();
        assert!(picks.contains(&0) && picks.contains(&1));
        // Negative weights are shifted, so the smallest never wins.
        for _ in 0..200 {
            assert_ne!(roulette(&[-5.0, -1.0, 3.0], true, &mut rng), Some(0));
        }
    }
}
