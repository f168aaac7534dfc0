//! Variation and selection operators over `[0, 1]` genomes.
//!
//! All randomness flows through [`GenomeRng`] so a seeded run is fully
//! reproducible.

use std::cmp::Ordering;

use rand::prelude::*;

use crate::schema::Individual;

/// Lower gene bound.
const GENE_LOW: f64 = 0.0;
/// Upper gene bound.
const GENE_HIGH: f64 = 1.0;

/// Random number generator wrapper for genome operations.
pub struct GenomeRng {
    rng: StdRng,
}

impl GenomeRng {
    /// Create from seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Create with random seed.
    pub fn random() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Uniform genome of length `n`.
    pub fn random_genome(&mut self, n: usize) -> Vec<f64> {
        (0..n).map(|_| self.rng.gen_range(GENE_LOW..GENE_HIGH)).collect()
    }

    /// Bernoulli draw with probability `p`.
    pub fn chance(&mut self, p: f64) -> bool {
        self.rng.r#gen::<f64>() < p
    }

    /// Tournament of `size` aspirants drawn with replacement.
    ///
    /// Returns the index of the fittest aspirant. Ties go to the aspirant
    /// drawn first; individuals without a score lose to any scored one.
    pub fn tournament(&mut self, population: &[Individual], size: usize) -> Option<usize> {
        if population.is_empty() {
            return None;
        }

        let mut best = self.rng.gen_range(0..population.len());
        for _ in 1..size {
            let aspirant = self.rng.gen_range(0..population.len());
            if rank(&population[aspirant], &population[best]) == Ordering::Less {
                best = aspirant;
            }
        }
        Some(best)
    }

    /// Select `count` independent copies by repeated tournaments.
    pub fn select(
        &mut self,
        population: &[Individual],
        count: usize,
        tournament_size: usize,
    ) -> Vec<Individual> {
        (0..count)
            .filter_map(|_| self.tournament(population, tournament_size))
            .map(|idx| population[idx].clone())
            .collect()
    }

    /// Two-point crossover swapping one contiguous segment in place.
    ///
    /// Returns false (and leaves both untouched) when genomes are shorter than two.
    pub fn two_point_crossover(&mut self, a: &mut Individual, b: &mut Individual) -> bool {
        let size = a.genome().len().min(b.genome().len());
        if size < 2 {
            return false;
        }

        let mut lo = self.rng.gen_range(1..=size);
        let mut hi = self.rng.gen_range(1..size);
        if hi >= lo {
            hi += 1;
        } else {
            std::mem::swap(&mut lo, &mut hi);
        }

        a.modify_genome(|ga| {
            b.modify_genome(|gb| ga[lo..hi].swap_with_slice(&mut gb[lo..hi]));
        });
        true
    }

    /// Polynomial bounded mutation on `[0, 1]`.
    ///
    /// Each gene mutates with probability `gene_rate`; `eta` is the
    /// distribution index (larger keeps offspring closer to the parent).
    /// Fitness is invalidated even when no gene was drawn.
    pub fn polynomial_bounded_mutation(&mut self, ind: &mut Individual, eta: f64, gene_rate: f64) {
        let span = GENE_HIGH - GENE_LOW;
        let mut_pow = 1.0 / (eta + 1.0);

        ind.modify_genome(|genome| {
            for gene in genome.iter_mut() {
                if self.rng.r#gen::<f64>() > gene_rate {
                    continue;
                }

                let x = *gene;
                let delta_1 = (x - GENE_LOW) / span;
                let delta_2 = (GENE_HIGH - x) / span;
                let r = self.rng.r#gen::<f64>();

                let delta_q = if r < 0.5 {
                    let xy = 1.0 - delta_1;
                    let val = 2.0 * r + (1.0 - 2.0 * r) * xy.powf(eta + 1.0);
                    val.powf(mut_pow) - 1.0
                } else {
                    let xy = 1.0 - delta_2;
                    let val = 2.0 * (1.0 - r) + 2.0 * (r - 0.5) * xy.powf(eta + 1.0);
                    1.0 - val.powf(mut_pow)
                };

                *gene = (x + delta_q * span).clamp(GENE_LOW, GENE_HIGH);
            }
        });
    }
}

/// Ordering by fitness, lower score first; unscored individuals last.
fn rank(a: &Individual, b: &Individual) -> Ordering {
    match (a.score(), b.score()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Index of the best individual in a population.
pub fn best_index(population: &[Individual]) -> Option<usize> {
    population
        .iter()
        .enumerate()
        .reduce(|best, current| {
            if rank(current.1, best.1) == Ordering::Less {
                current
            } else {
                best
            }
        })
        .map(|(idx, _)| idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_genome_in_bounds() {
        let mut rng = GenomeRng::new(42);
        let genome = rng.random_genome(64);
        assert_eq!(genome.len(), 64);
        assert!(genome.iter().all(|g| (0.0..=1.0).contains(g)));
    }

    #[test]
    fn test_seeded_rng_is_reproducible() {
        let mut a = GenomeRng::new(7);
        let mut b = GenomeRng::new(7);
        assert_eq!(a.random_genome(10), b.random_genome(10));
        assert_eq!(a.chance(0.5), b.chance(0.5));
        assert_eq!(a.random_genome(3), b.random_genome(3));
    }

    #[test]
    fn test_tournament_prefers_lower_score() {
        let mut rng = GenomeRng::new(1);
        let population = vec![
            Individual::with_score(vec![0.0], 5.0),
            Individual::with_score(vec![0.0], 0.5),
            Individual::with_score(vec![0.0], 3.0),
        ];

        for _ in 0..20 {
            assert_eq!(rng.tournament(&population, 80), Some(1));
        }
        assert_eq!(rng.tournament(&[], 15), None);
    }

    #[test]
    fn test_tournament_unscored_ranks_last() {
        let mut rng = GenomeRng::new(3);
        let mut lost = Individual::new(vec![0.0]);
        lost.mark_unevaluated().unwrap();
        let population = vec![lost, Individual::with_score(vec![0.0], 1e6)];

        for _ in 0..20 {
            assert_eq!(rng.tournament(&population, 64), Some(1));
        }
    }

    #[test]
    fn test_select_copies_keep_fitness() {
        let mut rng = GenomeRng::new(5);
        let population: Vec<Individual> = (0..5)
            .map(|i| Individual::with_score(vec![i as f64 / 10.0; 4], 1.0))
            .collect();

        let offspring = rng.select(&population, 5, 15);
        assert_eq!(offspring.len(), 5);
        assert!(offspring.iter().all(|ind| ind.score() == Some(1.0)));
        assert!(offspring.iter().all(|ind| population.contains(ind)));
    }

    #[test]
    fn test_two_point_crossover_swaps_segment() {
        let mut rng = GenomeRng::new(11);

        for _ in 0..50 {
            let mut a = Individual::with_score(vec![0.0; 6], 1.0);
            let mut b = Individual::with_score(vec![1.0; 6], 2.0);

            assert!(rng.two_point_crossover(&mut a, &mut b));
            assert!(a.needs_evaluation());
            assert!(b.needs_evaluation());

            let swapped: Vec<usize> = (0..6).filter(|&i| a.genome()[i] == 1.0).collect();
            assert!(!swapped.is_empty());
            assert!(swapped.windows(2).all(|w| w[1] == w[0] + 1));
            for i in 0..6 {
                assert_eq!(a.genome()[i] + b.genome()[i], 1.0);
            }
        }
    }

    #[test]
    fn test_crossover_short_genome_is_noop() {
        let mut rng = GenomeRng::new(2);
        let mut a = Individual::with_score(vec![0.2], 1.0);
        let mut b = Individual::with_score(vec![0.8], 2.0);

        assert!(!rng.two_point_crossover(&mut a, &mut b));
        assert_eq!(a.score(), Some(1.0));
        assert_eq!(b.genome(), &[0.8]);
    }

    #[test]
    fn test_mutation_stays_in_bounds() {
        let mut rng = GenomeRng::new(9);
        let mut ind = Individual::with_score(vec![0.0, 0.25, 0.5, 0.75, 1.0], 1.0);
        let before = ind.genome().to_vec();

        for _ in 0..100 {
            rng.polynomial_bounded_mutation(&mut ind, 20.0, 1.0);
            assert!(ind.genome().iter().all(|g| (0.0..=1.0).contains(g)));
        }
        assert!(ind.needs_evaluation());
        assert_ne!(ind.genome(), before.as_slice());
    }

    #[test]
    fn test_mutation_without_gene_draws_still_invalidates() {
        let mut rng = GenomeRng::new(4);
        let mut ind = Individual::with_score(vec![0.3, 0.6], 1.0);

        rng.polynomial_bounded_mutation(&mut ind, 20.0, 0.0);
        assert_eq!(ind.genome(), &[0.3, 0.6]);
        assert!(ind.needs_evaluation());
    }

    #[test]
    fn test_best_index() {
        let mut lost = Individual::new(vec![0.0]);
        lost.mark_unevaluated().unwrap();
        let population = vec![
            lost,
            Individual::with_score(vec![0.0], 2.0),
            Individual::with_score(vec![0.0], 1.0),
            Individual::with_score(vec![0.0], 1.0),
        ];
        assert_eq!(best_index(&population), Some(2));
        assert_eq!(best_index(&[]), None);
    }
}
