//! The generational loop: evaluate, checkpoint, publish, breed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::compute::{FrameObserver, GenerationRunner, ObservedRun, SimulationError};
use crate::physics::RapierWorld;
use crate::schema::{
    BodyTopology, ConfigError, EvolutionConfig, EvolutionHistory, EvolutionStats,
    GenerationReport, Genome, ScoreSummary, StopReason,
};

use super::archive::{CheckpointError, Checkpointer};
use super::dispatch::{Dispatcher, WorkerCommand};
use super::genome::{BreedError, GenomeBreeder, GenomeRng, breeder_for, to_distribution};
use super::mailbox::Mailbox;

/// Errors that abort an evolution run.
#[derive(Debug, thiserror::Error)]
pub enum EvolutionError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Breeding failed: {0}")]
    Breed(#[from] BreedError),
    #[error("Seed genome does not fit this run: {0}")]
    SeedGenome(#[source] BreedError),
    #[error("Simulation failed: {0}")]
    Simulation(#[from] SimulationError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error("Worker for shard {shard} failed: {reason}")]
    Worker { shard: usize, reason: String },
}

/// Evolution engine that runs the search.
pub struct EvolutionEngine<'o> {
    config: EvolutionConfig,
    topology: BodyTopology,
    breeder: Box<dyn GenomeBreeder>,
    rng: GenomeRng,
    dispatcher: Dispatcher,
    seed_genome: Option<Genome>,
    checkpointer: Option<Checkpointer>,
    observer: Option<&'o mut dyn FrameObserver<RapierWorld>>,
    mailbox: Mailbox<GenerationReport>,
    subscribed: bool,
    cancelled: Arc<AtomicBool>,
    population: Vec<Genome>,
    scores: Option<Vec<f32>>,
    history: EvolutionHistory,
    generation: usize,
    best_fitness: f32,
}

impl<'o> EvolutionEngine<'o> {
    /// Validate `config` against `topology` and prepare the engine.
    ///
    /// Fails before any simulation when the configuration is inconsistent,
    /// e.g. a population that does not split evenly across workers.
    pub fn new(config: EvolutionConfig, topology: BodyTopology) -> Result<Self, EvolutionError> {
        config.validate_for(&topology)?;

        let rng = match config.random_seed {
            Some(seed) => GenomeRng::new(seed),
            None => GenomeRng::random(),
        };
        let breeder = breeder_for(&config.encoding, &topology);
        let dispatcher = Dispatcher::new(&config.parallelism)?;
        let checkpointer = config
            .checkpoint_dir
            .as_ref()
            .map(Checkpointer::new)
            .transpose()?;

        Ok(Self {
            config,
            topology,
            breeder,
            rng,
            dispatcher,
            seed_genome: None,
            checkpointer,
            observer: None,
            mailbox: Mailbox::new(),
            subscribed: false,
            cancelled: Arc::new(AtomicBool::new(false)),
            population: Vec::new(),
            scores: None,
            history: EvolutionHistory::default(),
            generation: 0,
            best_fitness: f32::NEG_INFINITY,
        })
    }

    /// Start from copies and offspring of `genome` instead of random genomes.
    ///
    /// The genome must match the configured encoding and the body's joints.
    pub fn with_seed_genome(mut self, genome: Genome) -> Result<Self, EvolutionError> {
        self.breeder
            .check_compatible(&genome)
            .map_err(EvolutionError::SeedGenome)?;
        self.seed_genome = Some(genome);
        Ok(self)
    }

    pub fn with_checkpointer(mut self, checkpointer: Checkpointer) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    /// Watch every simulated frame. Only allowed with sequential evaluation.
    pub fn with_observer(
        mut self,
        observer: &'o mut dyn FrameObserver<RapierWorld>,
    ) -> Result<Self, EvolutionError> {
        if self.config.parallelism.is_parallel() {
            return Err(ConfigError::ObserverWithParallel.into());
        }
        self.observer = Some(observer);
        Ok(self)
    }

    /// Launch process-mode workers with `command` instead of the current executable.
    pub fn with_worker_command(mut self, command: WorkerCommand) -> Self {
        self.dispatcher = self.dispatcher.with_worker_command(command);
        self
    }

    /// Mailbox receiving the latest evaluated generation. Closed when the run ends.
    pub fn subscribe(&mut self) -> Mailbox<GenerationReport> {
        self.subscribed = true;
        self.mailbox.clone()
    }

    /// Get cancellation handle.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn population(&self) -> &[Genome] {
        &self.population
    }

    pub fn history(&self) -> &EvolutionHistory {
        &self.history
    }

    fn seed_mutation_rate(&self) -> f32 {
        self.config
            .population
            .seed_mutation_rate
            .unwrap_or(self.config.population.mutation_rate)
    }

    /// First generation: random genomes, or the seed genome plus offspring bred from it alone.
    pub fn initial_population(&mut self) -> Result<Vec<Genome>, EvolutionError> {
        let size = self.config.population.size;
        let mut population = Vec::with_capacity(size);
        match &self.seed_genome {
            Some(seed) => {
                population.push(seed.clone());
                let rate = self.seed_mutation_rate();
                while population.len() < size {
                    population.push(self.breeder.breed(&mut self.rng, &[seed], &[1.0], rate)?);
                }
            }
            None => {
                for _ in 0..size {
                    population.push(self.breeder.random_genome(&mut self.rng));
                }
            }
        }
        Ok(population)
    }

    /// Next generation from an evaluated one.
    ///
    /// Elites are copied first in score order, then random genomes, then
    /// offspring of the breeding stock (the top fraction of the population)
    /// weighted by normalised score.
    pub fn breed_next(
        &mut self,
        population: &[Genome],
        scores: &[f32],
    ) -> Result<Vec<Genome>, EvolutionError> {
        if population.len() != scores.len() {
            return Err(BreedError::ArgumentMismatch {
                parents: population.len(),
                weights: scores.len(),
            }
            .into());
        }
        if population.is_empty() {
            return Err(BreedError::NoParents.into());
        }
        let settings = &self.config.population;

        let mut order: Vec<usize> = (0..population.len()).collect();
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

        let mut next = Vec::with_capacity(settings.size);
        next.extend(
            order
                .iter()
                .take(settings.elites)
                .map(|&i| population[i].clone()),
        );
        for _ in 0..settings.randoms {
            next.push(self.breeder.random_genome(&mut self.rng));
        }

        let stock_len = ((population.len() as f32 * settings.breeding_fraction).ceil() as usize)
            .clamp(1, population.len());
        let stock: Vec<&Genome> = order[..stock_len].iter().map(|&i| &population[i]).collect();
        let stock_scores: Vec<f32> = order[..stock_len].iter().map(|&i| scores[i]).collect();
        let weights = to_distribution(&stock_scores);

        while next.len() < settings.size {
            next.push(self.breeder.breed(
                &mut self.rng,
                &stock,
                &weights,
                settings.mutation_rate,
            )?);
        }
        next.truncate(settings.size);
        Ok(next)
    }

    /// Convergence is never declared; runs end by cancellation or generation cap.
    fn has_converged(&self) -> bool {
        false
    }

    fn should_stop(&self) -> Option<StopReason> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Some(StopReason::Cancelled);
        }
        if self
            .config
            .population
            .max_generations
            .is_some_and(|max| self.generation >= max)
        {
            return Some(StopReason::MaxGenerations);
        }
        if self.has_converged() {
            return Some(StopReason::Converged);
        }
        None
    }

    fn evaluate(&mut self) -> Result<Vec<f32>, EvolutionError> {
        match &mut self.observer {
            Some(observer) => {
                let runner = GenerationRunner::new(&self.topology, &self.config.simulation);
                Ok(runner.run_observed(
                    &self.population,
                    ObservedRun {
                        observer: &mut **observer,
                        generation: self.generation,
                        previous_scores: self.scores.as_deref(),
                    },
                )?)
            }
            None => self.dispatcher.evaluate(
                &self.topology,
                &self.config.simulation,
                &self.population,
            ),
        }
    }

    fn run_generations(&mut self) -> Result<StopReason, EvolutionError> {
        self.population = self.initial_population()?;
        loop {
            if let Some(reason) = self.should_stop() {
                return Ok(reason);
            }

            let scores = self.evaluate()?;
            let summary = ScoreSummary::from_scores(&scores);
            self.history.push(summary);
            self.best_fitness = self.best_fitness.max(summary.max);
            log::info!(
                "gen: {}, max: {:.4}, mean: {:.4}",
                self.generation,
                summary.max,
                summary.mean
            );

            if let Some(checkpointer) = self.checkpointer.as_mut() {
                checkpointer.record(self.generation, &self.population, &scores)?;
            }

            if self.subscribed {
                self.mailbox.publish(GenerationReport {
                    generation: self.generation,
                    genomes: self.population.clone(),
                    scores: scores.clone(),
                });
            }

            self.generation += 1;
            // The last generation of a capped run is not bred.
            if self.should_stop().is_none() {
                let population = std::mem::take(&mut self.population);
                self.population = self.breed_next(&population, &scores)?;
            }
            self.scores = Some(scores);
        }
    }

    /// Run generations until cancelled or the generation cap is reached.
    ///
    /// On return, whether successful or not, the mailbox is closed and the
    /// cancellation flag is set.
    pub fn run(&mut self) -> Result<EvolutionStats, EvolutionError> {
        let start_time = Instant::now();
        let result = self.run_generations();

        self.mailbox.close();
        self.cancelled.store(true, Ordering::Relaxed);
        let stop_reason = result?;

        let elapsed = start_time.elapsed().as_secs_f64();
        let total_evaluations = self.generation as u64 * self.config.population.size as u64;
        let stats = EvolutionStats {
            generations: self.generation,
            total_evaluations,
            best_fitness: self.best_fitness,
            final_avg_fitness: self.history.avg_fitness.last().copied().unwrap_or(0.0),
            elapsed_seconds: elapsed,
            evaluations_per_second: if elapsed > 0.0 {
                total_evaluations as f64 / elapsed
            } else {
                0.0
            },
            stop_reason,
            history: self.history.clone(),
        };
        log::info!(
            "Evolution stopped after {} generations ({:?}), best score {:.4}",
            stats.generations,
            stats.stop_reason,
            stats.best_fitness
        );
        Ok(stats)
    }
}
