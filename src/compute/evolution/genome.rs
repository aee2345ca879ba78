//! Genome breeding utilities for evolutionary search.
//!
//! Provides random generation, crossover, and mutation for each encoding.

use std::collections::BTreeMap;
use std::ops::Range;

use rand::distributions::{WeightedError, WeightedIndex};
use rand::prelude::*;

use crate::schema::{
    AngleLimits, ArrayEncodingConfig, ArrayGenome, BodyTopology, EncodingConfig, Genome, Harmonic,
    JointWave, SineEncodingConfig, SineGenome,
};

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

    /// Uniform random in bounds.
    pub fn uniform(&mut self, bounds: (f32, f32)) -> f32 {
        if bounds.0 >= bounds.1 {
            return bounds.0;
        }
        self.rng.gen_range(bounds.0..=bounds.1)
    }

    /// Gaussian mutation: add noise to a value.
    pub fn gaussian_mutate(&mut self, value: f32, strength: f32, bounds: (f32, f32)) -> f32 {
        let noise: f32 = self.rng.sample(rand_distr::StandardNormal);
        let mutated = value + noise * strength * (bounds.1 - bounds.0);
        mutated.clamp(bounds.0, bounds.1)
    }

    /// True with probability `p`.
    pub fn chance(&mut self, p: f32) -> bool {
        self.rng.r#gen::<f32>() < p
    }

    /// Uniform integer in `range` (inclusive).
    pub fn range_inclusive(&mut self, lo: usize, hi: usize) -> usize {
        self.rng.gen_range(lo..=hi)
    }

    /// Draw an index from a weighted distribution.
    pub fn pick(&mut self, distribution: &WeightedIndex<f32>) -> usize {
        distribution.sample(&mut self.rng)
    }

    /// Generate next u64 for seeding child RNGs.
    pub fn next_seed(&mut self) -> u64 {
        self.rng.r#gen()
    }
}

/// Breeding failures.
#[derive(Debug, thiserror::Error)]
pub enum BreedError {
    #[error("Got {parents} parents but {weights} weights")]
    ArgumentMismatch { parents: usize, weights: usize },
    #[error("Breeding needs at least one parent")]
    NoParents,
    #[error("Parent {index} cannot be bred by this breeder: {reason}")]
    IncompatibleParents { index: usize, reason: String },
    #[error("Invalid selection weights: {0}")]
    InvalidWeights(#[from] WeightedError),
}

/// Produces random and bred genomes for one encoding.
pub trait GenomeBreeder: Send + Sync {
    /// Every parameter sampled independently within its bounds.
    fn random_genome(&self, rng: &mut GenomeRng) -> Genome;

    /// Structurally valid all-zero genome.
    fn empty_genome(&self) -> Genome;

    /// Cross `parents` (drawn according to `weights`) and mutate the child.
    fn breed(
        &self,
        rng: &mut GenomeRng,
        parents: &[&Genome],
        weights: &[f32],
        mutation_rate: f32,
    ) -> Result<Genome, BreedError>;

    /// Whether `genome` has the encoding and dimensions this breeder produces.
    fn check_compatible(&self, genome: &Genome) -> Result<(), BreedError>;
}

/// Build the breeder for `encoding` over the joints of `topology`.
pub fn breeder_for(encoding: &EncodingConfig, topology: &BodyTopology) -> Box<dyn GenomeBreeder> {
    match encoding {
        EncodingConfig::Array(config) => Box::new(ArrayGenomeBreeder::new(topology, config.clone())),
        EncodingConfig::Sine(config) => Box::new(SineGenomeBreeder::new(topology, config.clone())),
    }
}

/// Turn scores into selection weights: min-max normalise, then divide by the
/// sum. Falls back to uniform weights when all scores are equal.
pub fn to_distribution(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }
    let min = scores.iter().copied().fold(f32::INFINITY, f32::min);
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let uniform = vec![1.0 / scores.len() as f32; scores.len()];
    if !(max > min) {
        return uniform;
    }
    let normalized: Vec<f32> = scores.iter().map(|s| (s - min) / (max - min)).collect();
    let sum: f32 = normalized.iter().sum();
    if sum <= 0.0 || !sum.is_finite() {
        return uniform;
    }
    normalized.into_iter().map(|w| w / sum).collect()
}

fn selection(parents: usize, weights: &[f32]) -> Result<WeightedIndex<f32>, BreedError> {
    if parents != weights.len() {
        return Err(BreedError::ArgumentMismatch {
            parents,
            weights: weights.len(),
        });
    }
    if parents == 0 {
        return Err(BreedError::NoParents);
    }
    Ok(WeightedIndex::new(weights)?)
}

/// Contiguous chunks covering `[0, slots)`, each `min..=max` slots long
/// (the last one may be shorter).
pub(crate) fn crossover_plan(
    rng: &mut GenomeRng,
    slots: usize,
    min_chunk: usize,
    max_chunk: usize,
) -> Vec<Range<usize>> {
    let min_chunk = min_chunk.max(1);
    let max_chunk = max_chunk.max(min_chunk);
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < slots {
        let end = (start + rng.range_inclusive(min_chunk, max_chunk)).min(slots);
        chunks.push(start..end);
        start = end;
    }
    chunks
}

// ============================================================================
// Array encoding
// ============================================================================

/// Breeder for loop-table genomes: chunk-wise crossover along time, then
/// per-cell resampling.
pub struct ArrayGenomeBreeder {
    joints: Vec<String>,
    /// Limits of the joints that can carry an initial pose offset.
    pose_limits: BTreeMap<String, AngleLimits>,
    config: ArrayEncodingConfig,
}

impl ArrayGenomeBreeder {
    pub fn new(topology: &BodyTopology, config: ArrayEncodingConfig) -> Self {
        let pose_limits = topology
            .joints()
            .iter()
            .filter_map(|(id, joint)| joint.limits.map(|l| (id.clone(), l)))
            .collect();
        Self {
            joints: topology.joint_ids().map(str::to_string).collect(),
            pose_limits,
            config,
        }
    }

    fn zeros(&self) -> ArrayGenome {
        ArrayGenome::zeros(
            self.joints.clone(),
            self.config.slots,
            self.config.frames_per_slot,
        )
    }

    fn random_pose(&self, rng: &mut GenomeRng) -> BTreeMap<String, f32> {
        self.pose_limits
            .iter()
            .map(|(id, limits)| (id.clone(), rng.uniform((limits.min, limits.max))))
            .collect()
    }

    fn check<'a>(&self, index: usize, genome: &'a Genome) -> Result<&'a ArrayGenome, BreedError> {
        let incompatible = |reason: String| BreedError::IncompatibleParents { index, reason };
        let Genome::Array(array) = genome else {
            return Err(incompatible(format!(
                "expected an array genome, got {}",
                genome.encoding_name()
            )));
        };
        if array.joints != self.joints || array.slots != self.config.slots {
            return Err(incompatible(format!(
                "expected {} joints x {} slots, got {} x {}",
                self.joints.len(),
                self.config.slots,
                array.joints.len(),
                array.slots
            )));
        }
        array.validate().map_err(|e| incompatible(e.to_string()))?;
        Ok(array)
    }
}

impl GenomeBreeder for ArrayGenomeBreeder {
    fn random_genome(&self, rng: &mut GenomeRng) -> Genome {
        let mut genome = self.zeros();
        for cell in genome.cells.iter_mut() {
            *cell = rng.uniform(self.config.value_bounds);
        }
        if self.config.evolve_initial_pose {
            genome.initial_pose = Some(self.random_pose(rng));
        }
        Genome::Array(genome)
    }

    fn empty_genome(&self) -> Genome {
        Genome::Array(self.zeros())
    }

    fn check_compatible(&self, genome: &Genome) -> Result<(), BreedError> {
        self.check(0, genome).map(|_| ())
    }

    fn breed(
        &self,
        rng: &mut GenomeRng,
        parents: &[&Genome],
        weights: &[f32],
        mutation_rate: f32,
    ) -> Result<Genome, BreedError> {
        let distribution = selection(parents.len(), weights)?;
        let parents = parents
            .iter()
            .enumerate()
            .map(|(i, g)| self.check(i, g))
            .collect::<Result<Vec<_>, _>>()?;

        let mut child = self.zeros();

        for chunk in crossover_plan(
            rng,
            self.config.slots,
            self.config.min_chunk,
            self.config.max_chunk,
        ) {
            let parent = parents[rng.pick(&distribution)];
            for joint in 0..self.joints.len() {
                for slot in chunk.clone() {
                    *child.cell_mut(joint, slot) = parent.cell(joint, slot);
                }
            }
        }

        for cell in child.cells.iter_mut() {
            if rng.chance(mutation_rate) {
                *cell = rng.uniform(self.config.value_bounds);
            }
        }

        if self.config.evolve_initial_pose {
            let mut pose = BTreeMap::new();
            for (id, limits) in &self.pose_limits {
                let parent = parents[rng.pick(&distribution)];
                let inherited = parent
                    .initial_pose
                    .as_ref()
                    .and_then(|p| p.get(id).copied());
                let angle = match inherited {
                    Some(angle) if !rng.chance(mutation_rate) => angle,
                    _ => rng.uniform((limits.min, limits.max)),
                };
                pose.insert(id.clone(), angle);
            }
            child.initial_pose = Some(pose);
        }

        Ok(Genome::Array(child))
    }
}

// ============================================================================
// Sine encoding
// ============================================================================

/// Breeder for wave genomes: independent per-field crossover with Gaussian
/// mutation.
pub struct SineGenomeBreeder {
    /// Joints carrying their own wave.
    genes: Vec<String>,
    /// Mirror joint -> source joint.
    mirrors: BTreeMap<String, String>,
    config: SineEncodingConfig,
}

impl SineGenomeBreeder {
    pub fn new(topology: &BodyTopology, config: SineEncodingConfig) -> Self {
        let mirrors: BTreeMap<String, String> = config
            .mirrors
            .iter()
            .map(|(source, mirror)| (mirror.clone(), source.clone()))
            .collect();
        let genes = topology
            .joint_ids()
            .filter(|id| !mirrors.contains_key(*id))
            .map(str::to_string)
            .collect();
        Self {
            genes,
            mirrors,
            config,
        }
    }

    fn build(&self, mut wave: impl FnMut(&str) -> JointWave) -> Genome {
        Genome::Sine(SineGenome {
            waves: self.genes.iter().map(|id| (id.clone(), wave(id))).collect(),
            mirrors: self.mirrors.clone(),
        })
    }

    fn check<'a>(&self, index: usize, genome: &'a Genome) -> Result<&'a SineGenome, BreedError> {
        let incompatible = |reason: String| BreedError::IncompatibleParents { index, reason };
        let Genome::Sine(sine) = genome else {
            return Err(incompatible(format!(
                "expected a sine genome, got {}",
                genome.encoding_name()
            )));
        };
        for id in &self.genes {
            match sine.waves.get(id) {
                Some(wave) if wave.harmonics.len() == self.config.harmonics => {}
                Some(wave) => {
                    return Err(incompatible(format!(
                        "joint '{}' has {} harmonics, expected {}",
                        id,
                        wave.harmonics.len(),
                        self.config.harmonics
                    )));
                }
                None => return Err(incompatible(format!("missing wave for joint '{id}'"))),
            }
        }
        Ok(sine)
    }
}

impl GenomeBreeder for SineGenomeBreeder {
    fn random_genome(&self, rng: &mut GenomeRng) -> Genome {
        let c = &self.config;
        self.build(|_| JointWave {
            offset: rng.uniform(c.offset_bounds),
            frequency: rng.uniform(c.frequency_bounds),
            harmonics: (0..c.harmonics)
                .map(|_| Harmonic {
                    amplitude: rng.uniform(c.amplitude_bounds),
                    phase: rng.uniform(c.phase_bounds),
                })
                .collect(),
        })
    }

    fn empty_genome(&self) -> Genome {
        self.build(|_| JointWave {
            offset: 0.0,
            frequency: 0.0,
            harmonics: vec![
                Harmonic {
                    amplitude: 0.0,
                    phase: 0.0,
                };
                self.config.harmonics
            ],
        })
    }

    fn check_compatible(&self, genome: &Genome) -> Result<(), BreedError> {
        self.check(0, genome).map(|_| ())
    }

    fn breed(
        &self,
        rng: &mut GenomeRng,
        parents: &[&Genome],
        weights: &[f32],
        mutation_rate: f32,
    ) -> Result<Genome, BreedError> {
        let distribution = selection(parents.len(), weights)?;
        let parents = parents
            .iter()
            .enumerate()
            .map(|(i, g)| self.check(i, g))
            .collect::<Result<Vec<_>, _>>()?;

        let c = &self.config;
        let mut waves = BTreeMap::new();
        for id in &self.genes {
            // One weighted parent draw per field, then an optional perturbation.
            let draw = |rng: &mut GenomeRng, get: &dyn Fn(&JointWave) -> f32, bounds: (f32, f32)| {
                let parent = parents[rng.pick(&distribution)];
                let value = get(&parent.waves[id]);
                if rng.chance(mutation_rate) {
                    rng.gaussian_mutate(value, c.mutation_strength, bounds)
                } else {
                    value
                }
            };
            let offset = draw(rng, &|w: &JointWave| w.offset, c.offset_bounds);
            let frequency = draw(rng, &|w: &JointWave| w.frequency, c.frequency_bounds);
            let harmonics = (0..c.harmonics)
                .map(|k| Harmonic {
                    amplitude: draw(rng, &|w: &JointWave| w.harmonics[k].amplitude, c.amplitude_bounds),
                    phase: draw(rng, &|w: &JointWave| w.harmonics[k].phase, c.phase_bounds),
                })
                .collect();
            waves.insert(
                id.clone(),
                JointWave {
                    offset,
                    frequency,
                    harmonics,
                },
            );
        }

        Ok(Genome::Sine(SineGenome {
            waves,
            mirrors: self.mirrors.clone(),
        }))
    }
}
