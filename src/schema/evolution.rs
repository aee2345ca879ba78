//! Progress and result types produced by an evolution run.

use serde::{Deserialize, Serialize};

use super::Genome;

/// One evaluated generation, as published to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationReport {
    /// Generation index (0-based).
    pub generation: usize,
    /// Evaluated population, in evaluation order.
    pub genomes: Vec<Genome>,
    /// Scores aligned with `genomes`.
    pub scores: Vec<f32>,
}

impl GenerationReport {
    /// Index and score of the best individual.
    pub fn best(&self) -> Option<(usize, f32)> {
        self.scores
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }

    pub fn best_genome(&self) -> Option<&Genome> {
        self.best().and_then(|(i, _)| self.genomes.get(i))
    }
}

/// Summary statistics over one generation's scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ScoreSummary {
    pub max: f32,
    pub mean: f32,
    pub std: f32,
}

impl ScoreSummary {
    pub fn from_scores(scores: &[f32]) -> Self {
        if scores.is_empty() {
            return Self::default();
        }
        let n = scores.len() as f32;
        let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mean = scores.iter().sum::<f32>() / n;
        let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f32>() / n;
        Self {
            max,
            mean,
            std: variance.sqrt(),
        }
    }
}

/// Evolution history for plotting.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EvolutionHistory {
    /// Best score per generation.
    pub best_fitness: Vec<f32>,
    /// Mean score per generation.
    pub avg_fitness: Vec<f32>,
    /// Standard deviation per generation.
    pub fitness_std: Vec<f32>,
}

impl EvolutionHistory {
    pub fn push(&mut self, summary: ScoreSummary) {
        self.best_fitness.push(summary.max);
        self.avg_fitness.push(summary.mean);
        self.fitness_std.push(summary.std);
    }

    pub fn generations(&self) -> usize {
        self.best_fitness.len()
    }
}

/// Statistics from an evolution run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionStats {
    /// Generations fully evaluated.
    pub generations: usize,
    /// Individuals simulated.
    pub total_evaluations: u64,
    /// Best score ever seen.
    pub best_fitness: f32,
    /// Mean score of the last evaluated generation.
    pub final_avg_fitness: f32,
    pub elapsed_seconds: f64,
    pub evaluations_per_second: f64,
    pub stop_reason: StopReason,
    pub history: EvolutionHistory,
}

/// Reason evolution stopped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum StopReason {
    /// Reached the configured generation cap.
    MaxGenerations,
    /// The cancellation flag was set.
    Cancelled,
    /// Population converged (never triggered).
    Converged,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ArrayGenome;

    #[test]
    fn test_score_summary() {
        let summary = ScoreSummary::from_scores(&[1.0, 3.0, 2.0, 2.0]);
        assert_eq!(summary.max, 3.0);
        assert_eq!(summary.mean, 2.0);
        assert!((summary.std - 0.5f32.sqrt()).abs() < 1e-6);

        assert_eq!(ScoreSummary::from_scores(&[]), ScoreSummary::default());
    }

    #[test]
    fn test_report_best() {
        let genome = |v: f32| {
            let mut g = ArrayGenome::zeros(vec!["a-b".to_string()], 1, 1);
            g.cells[0] = v;
            Genome::Array(g)
        };
        let report = GenerationReport {
            generation: 3,
            genomes: vec![genome(0.0), genome(1.0), genome(2.0)],
            scores: vec![0.5, 4.0, 1.0],
        };
        assert_eq!(report.best(), Some((1, 4.0)));
        assert_eq!(report.best_genome(), Some(&genome(1.0)));
    }
}
