//! Temperature-adjusted weighted random selection.
//!
//! Every peer request is dispatched through this chooser. Temperature biases
//! the draw: hot values pull every weight toward the average (more
//! exploration), cold values push them apart (more exploitation of the
//! heavy peers).

use rand::Rng;

/// A selectable peer and its current weight, kept within `[1, 100]`.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedPeer {
    pub id: String,
    pub weight: f64,
}

impl WeightedPeer {
    pub fn new(id: impl Into<String>, weight: f64) -> Self {
        WeightedPeer {
            id: id.into(),
            weight,
        }
    }
}

/// Upper bound on rejected draws across one `choose_weighted` call.
const MAX_RETRIES: usize = 100;

/// Draws up to `count` distinct ids with probability proportional to the
/// temperature-adjusted weight
/// `urgency = max(0, w + T * influence * (avg - w))` where `T` maps
/// `temperature` from `[0, 100]` onto `[-1, 1]`.
///
/// Returns an empty vector when every urgency is zero.
pub fn choose_weighted<R: Rng>(
    rng: &mut R,
    table: &[WeightedPeer],
    count: usize,
    temperature: f64,
    influence: f64,
) -> Vec<String> {
    let t = (temperature.clamp(0.0, 100.0) - 50.0) / 50.0;
    let mut chosen: Vec<String> = Vec::with_capacity(count.min(table.len()));
    let mut retries = 0usize;

    while chosen.len() < count && retries <= MAX_RETRIES {
        // Distinctness: each draw happens over the not-yet-chosen subset,
        // with urgencies recomputed against that subset's average.
        let remaining: Vec<&WeightedPeer> = table
            .iter()
            .filter(|p| !chosen.iter().any(|c| c == &p.id))
            .collect();
        if remaining.is_empty() {
            break;
        }

        let avg = remaining.iter().map(|p| p.weight).sum::<f64>() / remaining.len() as f64;
        let urgencies: Vec<f64> = remaining
            .iter()
            .map(|p| (p.weight + t * influence * (avg - p.weight)).max(0.0))
            .collect();
        let total: f64 = urgencies.iter().sum();
        if total <= 0.0 {
            break;
        }

        let mut draw = rng.gen_range(0.0..total);
        let mut picked = None;
        for (peer, urgency) in remaining.iter().zip(urgencies.iter()) {
            if draw < *urgency {
                picked = Some(peer.id.clone());
                break;
            }
            draw -= urgency;
        }

        match picked {
            Some(id) => chosen.push(id),
            // Floating point edge: the draw fell past the last bucket.
            None => retries += 1,
        }
    }

    chosen
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn table() -> Vec<WeightedPeer> {
        vec![
            WeightedPeer::new("a", 1.0),
            WeightedPeer::new("b", 1.0),
            WeightedPeer::new("c", 98.0),
        ]
    }

    #[test]
    fn draws_are_distinct_and_bounded_by_count() {
        let mut rng = StdRng::seed_from_u64(7);
        for count in 0..=5 {
            let picks = choose_weighted(&mut rng, &table(), count, 50.0, 2.0);
            assert!(picks.len() <= count.min(3));
            let mut dedup = picks.clone();
            dedup.sort();
            dedup.dedup();
            assert_eq!(dedup.len(), picks.len());
        }
    }

    #[test]
    fn empty_table_yields_nothing() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!(choose_weighted(&mut rng, &[], 3, 50.0, 2.0).is_empty());
    }

    #[test]
    fn all_zero_urgencies_yield_nothing() {
        let mut rng = StdRng::seed_from_u64(7);
        let table = vec![WeightedPeer::new("a", 0.0), WeightedPeer::new("b", 0.0)];
        assert!(choose_weighted(&mut rng, &table, 2, 50.0, 2.0).is_empty());
    }

    /// At neutral temperature the empirical distribution tracks the raw
    /// weights: with weights (1, 1, 98), "c" lands within 0.98 ± 0.01 over a
    /// million draws.
    #[test]
    fn neutral_temperature_matches_raw_weights() {
        let mut rng = StdRng::seed_from_u64(42);
        let table = table();
        let trials = 1_000_000usize;
        let mut c_hits = 0usize;
        for _ in 0..trials {
            let picks = choose_weighted(&mut rng, &table, 1, 50.0, 2.0);
            if picks == vec!["c".to_string()] {
                c_hits += 1;
            }
        }
        let freq = c_hits as f64 / trials as f64;
        assert!((freq - 0.98).abs() < 0.01, "frequency was {freq}");
    }

    /// Full heat maps T to +1, pulling every urgency onto the average: all
    /// ids become equally likely regardless of weight.
    #[test]
    fn hot_temperature_flattens_the_distribution() {
        let mut rng = StdRng::seed_from_u64(42);
        let table = table();
        let trials = 100_000usize;
        let mut counts = [0usize; 3];
        for _ in 0..trials {
            let picks = choose_weighted(&mut rng, &table, 1, 100.0, 1.0);
            match picks[0].as_str() {
                "a" => counts[0] += 1,
                "b" => counts[1] += 1,
                _ => counts[2] += 1,
            }
        }
        for count in counts {
            let freq = count as f64 / trials as f64;
            assert!((freq - 1.0 / 3.0).abs() < 0.02, "frequency was {freq}");
        }
    }

    /// Full cold maps T to -1, pushing weights away from the average:
    /// urgency(light) = 10, urgency(heavy) = 90.
    #[test]
    fn cold_temperature_exaggerates_heavy_weights() {
        let mut rng = StdRng::seed_from_u64(42);
        let table = vec![
            WeightedPeer::new("light", 30.0),
            WeightedPeer::new("heavy", 70.0),
        ];
        let trials = 100_000usize;
        let mut heavy = 0usize;
        for _ in 0..trials {
            if choose_weighted(&mut rng, &table, 1, 0.0, 1.0)[0] == "heavy" {
                heavy += 1;
            }
        }
        let freq = heavy as f64 / trials as f64;
        assert!((freq - 0.9).abs() < 0.01, "frequency was {freq}");
    }
}
