//! Configuration types for simulation, encoding and evolution parameters.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::BodyTopology;

// ============================================================================
// Simulation
// ============================================================================

/// Settings shared by every simulated generation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default)]
    pub physics: PhysicsConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
}

/// World, integrator and material parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysicsConfig {
    /// Simulated frames per second; the integrator advances `1 / fps` per frame.
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Vertical gravity (negative is down).
    #[serde(default = "default_gravity")]
    pub gravity: f32,
    /// Constraint solver iterations per step.
    #[serde(default = "default_velocity_iterations")]
    pub velocity_iterations: usize,
    /// Penetration stabilization passes per solver iteration.
    #[serde(default = "default_position_iterations")]
    pub position_iterations: usize,
    #[serde(default = "default_max_motor_torque")]
    pub max_motor_torque: f32,
    #[serde(default = "default_density")]
    pub density: f32,
    #[serde(default = "default_friction")]
    pub friction: f32,
    #[serde(default = "default_restitution")]
    pub restitution: f32,
    /// Whether individuals sharing a world collide with each other.
    #[serde(default)]
    pub agents_collide: bool,
    /// Floor half extents (x, y). The default walking surface is at y = 0.1.
    #[serde(default = "default_floor_half_extents")]
    pub floor_half_extents: (f32, f32),
    /// Floor center (x, y).
    #[serde(default = "default_floor_center")]
    pub floor_center: (f32, f32),
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            gravity: default_gravity(),
            velocity_iterations: default_velocity_iterations(),
            position_iterations: default_position_iterations(),
            max_motor_torque: default_max_motor_torque(),
            density: default_density(),
            friction: default_friction(),
            restitution: default_restitution(),
            agents_collide: false,
            floor_half_extents: default_floor_half_extents(),
            floor_center: default_floor_center(),
        }
    }
}

fn default_fps() -> u32 {
    30
}
fn default_gravity() -> f32 {
    -9.8
}
fn default_velocity_iterations() -> usize {
    8
}
fn default_position_iterations() -> usize {
    2
}
fn default_max_motor_torque() -> f32 {
    500.0
}
fn default_density() -> f32 {
    1.0
}
fn default_friction() -> f32 {
    0.5
}
fn default_restitution() -> f32 {
    0.2
}
fn default_floor_half_extents() -> (f32, f32) {
    (50.0, 0.5)
}
fn default_floor_center() -> (f32, f32) {
    (40.0, -0.4)
}

/// Body parts the fitness evaluator measures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodyMarkers {
    /// Part whose height decides whether the individual has fallen.
    #[serde(default = "default_head_part")]
    pub head: String,
    /// Parts whose mean x is the forward distance.
    #[serde(default = "default_leg_parts")]
    pub legs: (String, String),
    /// Parts whose horizontal separation is the stride length.
    #[serde(default = "default_foot_parts")]
    pub feet: (String, String),
}

impl Default for BodyMarkers {
    fn default() -> Self {
        Self {
            head: default_head_part(),
            legs: default_leg_parts(),
            feet: default_foot_parts(),
        }
    }
}

impl BodyMarkers {
    /// Every part named by the markers, with its role.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("head", self.head.as_str()),
            ("leg", self.legs.0.as_str()),
            ("leg", self.legs.1.as_str()),
            ("foot", self.feet.0.as_str()),
            ("foot", self.feet.1.as_str()),
        ]
        .into_iter()
    }
}

fn default_head_part() -> String {
    "head".to_string()
}
fn default_leg_parts() -> (String, String) {
    ("leg_f".to_string(), "leg_b".to_string())
}
fn default_foot_parts() -> (String, String) {
    ("foot_f".to_string(), "foot_b".to_string())
}

/// Liveness and scoring parameters for individuals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    #[serde(default)]
    pub markers: BodyMarkers,
    /// Multiplier from control signal to motor speed (rad/s).
    #[serde(default = "default_joint_speed")]
    pub joint_speed: f32,
    /// The individual has fallen once the head is below this height.
    #[serde(default = "default_head_min_height")]
    pub head_min_height: f32,
    /// Forward progress smaller than this counts as idle.
    #[serde(default = "default_idle_margin")]
    pub idle_margin: f32,
    /// Consecutive idle frames tolerated before death.
    #[serde(default = "default_idle_max_frames")]
    pub idle_max_frames: u32,
    /// Frames before idle tracking starts.
    #[serde(default = "default_idle_warmup_frames")]
    pub idle_warmup_frames: u64,
    /// Hard cap: every individual dies at this frame.
    #[serde(default = "default_max_frames")]
    pub max_frames: u64,
    /// Feet separation above which strides are penalised.
    #[serde(default = "default_stride_threshold")]
    pub stride_threshold: f32,
    #[serde(default = "default_stride_penalty")]
    pub stride_penalty: f32,
    #[serde(default = "default_head_bob_penalty")]
    pub head_bob_penalty: f32,
    /// Final score is raised to this power.
    #[serde(default = "default_score_exponent")]
    pub score_exponent: f32,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            markers: BodyMarkers::default(),
            joint_speed: default_joint_speed(),
            head_min_height: default_head_min_height(),
            idle_margin: default_idle_margin(),
            idle_max_frames: default_idle_max_frames(),
            idle_warmup_frames: default_idle_warmup_frames(),
            max_frames: default_max_frames(),
            stride_threshold: default_stride_threshold(),
            stride_penalty: default_stride_penalty(),
            head_bob_penalty: default_head_bob_penalty(),
            score_exponent: default_score_exponent(),
        }
    }
}

fn default_joint_speed() -> f32 {
    2.0
}
fn default_head_min_height() -> f32 {
    0.7
}
fn default_idle_margin() -> f32 {
    0.1
}
fn default_idle_max_frames() -> u32 {
    50
}
fn default_idle_warmup_frames() -> u64 {
    30
}
fn default_max_frames() -> u64 {
    1800
}
fn default_stride_threshold() -> f32 {
    1.0
}
fn default_stride_penalty() -> f32 {
    10.0
}
fn default_head_bob_penalty() -> f32 {
    10.0
}
fn default_score_exponent() -> f32 {
    1.0
}

// ============================================================================
// Genome encodings
// ============================================================================

/// Which genome encoding to evolve, with its parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EncodingConfig {
    Array(ArrayEncodingConfig),
    Sine(SineEncodingConfig),
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self::Array(ArrayEncodingConfig::default())
    }
}

/// Loop-table encoding parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrayEncodingConfig {
    /// Time slots in one loop.
    #[serde(default = "default_slots")]
    pub slots: usize,
    #[serde(default = "default_frames_per_slot")]
    pub frames_per_slot: u32,
    /// Shortest crossover chunk, in slots.
    #[serde(default = "default_min_chunk")]
    pub min_chunk: usize,
    /// Longest crossover chunk, in slots.
    #[serde(default = "default_max_chunk")]
    pub max_chunk: usize,
    #[serde(default = "default_cell_bounds")]
    pub value_bounds: (f32, f32),
    /// Sample a starting pose within each joint's limits.
    #[serde(default)]
    pub evolve_initial_pose: bool,
}

impl Default for ArrayEncodingConfig {
    fn default() -> Self {
        Self {
            slots: default_slots(),
            frames_per_slot: default_frames_per_slot(),
            min_chunk: default_min_chunk(),
            max_chunk: default_max_chunk(),
            value_bounds: default_cell_bounds(),
            evolve_initial_pose: false,
        }
    }
}

fn default_slots() -> usize {
    15
}
fn default_frames_per_slot() -> u32 {
    6
}
fn default_min_chunk() -> usize {
    2
}
fn default_max_chunk() -> usize {
    4
}
fn default_cell_bounds() -> (f32, f32) {
    (-1.0, 1.0)
}

/// Sine encoding parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SineEncodingConfig {
    #[serde(default = "default_harmonics")]
    pub harmonics: usize,
    /// `(source joint, mirror joint)` pairs; the mirror replays the negated source.
    #[serde(default)]
    pub mirrors: Vec<(String, String)>,
    #[serde(default = "default_amplitude_bounds")]
    pub amplitude_bounds: (f32, f32),
    #[serde(default = "default_frequency_bounds")]
    pub frequency_bounds: (f32, f32),
    #[serde(default = "default_phase_bounds")]
    pub phase_bounds: (f32, f32),
    #[serde(default = "default_offset_bounds")]
    pub offset_bounds: (f32, f32),
    /// Gaussian mutation scale, relative to each field's range.
    #[serde(default = "default_mutation_strength")]
    pub mutation_strength: f32,
}

impl Default for SineEncodingConfig {
    fn default() -> Self {
        Self {
            harmonics: default_harmonics(),
            mirrors: Vec::new(),
            amplitude_bounds: default_amplitude_bounds(),
            frequency_bounds: default_frequency_bounds(),
            phase_bounds: default_phase_bounds(),
            offset_bounds: default_offset_bounds(),
            mutation_strength: default_mutation_strength(),
        }
    }
}

fn default_harmonics() -> usize {
    1
}
fn default_amplitude_bounds() -> (f32, f32) {
    (0.0, 1.0)
}
fn default_frequency_bounds() -> (f32, f32) {
    (0.0, 1.0)
}
fn default_phase_bounds() -> (f32, f32) {
    (0.0, std::f32::consts::TAU)
}
fn default_offset_bounds() -> (f32, f32) {
    (-1.5, 1.5)
}
fn default_mutation_strength() -> f32 {
    0.05
}

// ============================================================================
// Evolution
// ============================================================================

/// Population and breeding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationConfig {
    #[serde(default = "default_population_size")]
    pub size: usize,
    /// Top genomes carried over unchanged.
    #[serde(default = "default_elites")]
    pub elites: usize,
    /// Fresh random genomes injected each generation.
    #[serde(default = "default_randoms")]
    pub randoms: usize,
    /// Fraction of the sorted population used as breeding stock.
    #[serde(default = "default_breeding_fraction")]
    pub breeding_fraction: f32,
    #[serde(default = "default_mutation_rate")]
    pub mutation_rate: f32,
    /// Mutation rate for genomes bred from a seed genome (defaults to `mutation_rate`).
    #[serde(default)]
    pub seed_mutation_rate: Option<f32>,
    /// Stop after this many generations; run until cancelled when absent.
    #[serde(default)]
    pub max_generations: Option<usize>,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            size: default_population_size(),
            elites: default_elites(),
            randoms: default_randoms(),
            breeding_fraction: default_breeding_fraction(),
            mutation_rate: default_mutation_rate(),
            seed_mutation_rate: None,
            max_generations: None,
        }
    }
}

fn default_population_size() -> usize {
    1024
}
fn default_elites() -> usize {
    4
}
fn default_randoms() -> usize {
    2
}
fn default_breeding_fraction() -> f32 {
    0.3
}
fn default_mutation_rate() -> f32 {
    0.1
}

/// How a generation's fitness evaluation is spread across workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode")]
pub enum Parallelism {
    /// One shard in the calling thread.
    #[default]
    Sequential,
    /// Equal shards on a rayon thread pool.
    Threads { workers: usize },
    /// Equal shards in separate worker processes.
    Processes { workers: usize },
}

impl Parallelism {
    /// Number of shards the population is split into.
    pub fn shards(&self) -> usize {
        match self {
            Parallelism::Sequential => 1,
            Parallelism::Threads { workers } | Parallelism::Processes { workers } => *workers,
        }
    }

    pub fn is_parallel(&self) -> bool {
        !matches!(self, Parallelism::Sequential)
    }
}

/// Top-level configuration for an evolution run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvolutionConfig {
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub encoding: EncodingConfig,
    #[serde(default)]
    pub population: PopulationConfig,
    #[serde(default)]
    pub parallelism: Parallelism,
    /// Directory receiving improved best genomes.
    #[serde(default)]
    pub checkpoint_dir: Option<PathBuf>,
    /// Random seed for reproducibility.
    #[serde(default)]
    pub random_seed: Option<u64>,
}

// ============================================================================
// Validation
// ============================================================================

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Population size must be at least 2")]
    PopulationTooSmall,
    #[error("Population size {population} is not divisible by {workers} workers")]
    PopulationNotDivisible { population: usize, workers: usize },
    #[error("Parallel evaluation needs at least one worker")]
    NoWorkers,
    #[error("Frame observers are not supported with parallel evaluation")]
    ObserverWithParallel,
    #[error("{elites} elites and {randoms} random genomes do not fit a population of {population}")]
    TooManyReserved {
        elites: usize,
        randoms: usize,
        population: usize,
    },
    #[error("Frames per second must be positive")]
    InvalidFps,
    #[error("Invalid rate {name} = {value}, expected a value in [0, 1]")]
    InvalidRate { name: &'static str, value: f32 },
    #[error("Invalid parameter bounds: {0}")]
    InvalidBounds(String),
    #[error("Invalid crossover chunk range [{min}, {max}]")]
    InvalidChunkRange { min: usize, max: usize },
    #[error("Array encoding needs at least one slot")]
    NoSlots,
    #[error("Sine encoding needs at least one harmonic")]
    NoHarmonics,
    #[error("The {role} part '{part}' is not defined by the body")]
    UnknownPart { role: &'static str, part: String },
    #[error("Mirror pair references unknown joint '{0}'")]
    UnknownJoint(String),
    #[error("Joint '{0}' appears in more than one mirror pair")]
    DuplicateMirror(String),
}

fn check_bounds(bounds: (f32, f32), name: &str) -> Result<(), ConfigError> {
    if bounds.0 > bounds.1 || !bounds.0.is_finite() || !bounds.1.is_finite() {
        Err(ConfigError::InvalidBounds(format!(
            "{} min ({}) > max ({})",
            name, bounds.0, bounds.1
        )))
    } else {
        Ok(())
    }
}

fn check_rate(value: f32, name: &'static str) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidRate { name, value })
    }
}

impl SimulationConfig {
    /// Check that the marker parts exist in `topology`.
    pub fn validate(&self, topology: &BodyTopology) -> Result<(), ConfigError> {
        if self.physics.fps == 0 {
            return Err(ConfigError::InvalidFps);
        }
        for (role, part) in self.evaluation.markers.iter() {
            if topology.part(part).is_none() {
                return Err(ConfigError::UnknownPart {
                    role,
                    part: part.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl ArrayEncodingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slots == 0 {
            return Err(ConfigError::NoSlots);
        }
        if self.min_chunk == 0 || self.min_chunk > self.max_chunk {
            return Err(ConfigError::InvalidChunkRange {
                min: self.min_chunk,
                max: self.max_chunk,
            });
        }
        check_bounds(self.value_bounds, "value")
    }
}

impl SineEncodingConfig {
    pub fn validate(&self, topology: &BodyTopology) -> Result<(), ConfigError> {
        if self.harmonics == 0 {
            return Err(ConfigError::NoHarmonics);
        }
        check_bounds(self.amplitude_bounds, "amplitude")?;
        check_bounds(self.frequency_bounds, "frequency")?;
        check_bounds(self.phase_bounds, "phase")?;
        check_bounds(self.offset_bounds, "offset")?;

        let mut seen = std::collections::BTreeSet::new();
        for (source, mirror) in &self.mirrors {
            for joint in [source, mirror] {
                if topology.joint(joint).is_none() {
                    return Err(ConfigError::UnknownJoint(joint.clone()));
                }
            }
            // A source may drive several mirrors, but a mirror has one source
            // and is never itself a source.
            if !seen.insert(mirror.clone()) || self.mirrors.iter().any(|(s, _)| s == mirror) {
                return Err(ConfigError::DuplicateMirror(mirror.clone()));
            }
        }
        Ok(())
    }
}

impl EvolutionConfig {
    /// Validate everything that does not depend on the body.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let population = &self.population;
        if population.size < 2 {
            return Err(ConfigError::PopulationTooSmall);
        }
        if population.elites + population.randoms > population.size {
            return Err(ConfigError::TooManyReserved {
                elites: population.elites,
                randoms: population.randoms,
                population: population.size,
            });
        }
        check_rate(population.breeding_fraction, "breeding_fraction")?;
        check_rate(population.mutation_rate, "mutation_rate")?;
        if let Some(rate) = population.seed_mutation_rate {
            check_rate(rate, "seed_mutation_rate")?;
        }

        if self.parallelism.is_parallel() {
            let workers = self.parallelism.shards();
            if workers == 0 {
                return Err(ConfigError::NoWorkers);
            }
            if population.size % workers != 0 {
                return Err(ConfigError::PopulationNotDivisible {
                    population: population.size,
                    workers,
                });
            }
        }

        if self.simulation.physics.fps == 0 {
            return Err(ConfigError::InvalidFps);
        }
        if let EncodingConfig::Array(array) = &self.encoding {
            array.validate()?;
        }
        Ok(())
    }

    /// Full validation against the body that will be evolved.
    pub fn validate_for(&self, topology: &BodyTopology) -> Result<(), ConfigError> {
        self.validate()?;
        self.simulation.validate(topology)?;
        if let EncodingConfig::Sine(sine) = &self.encoding {
            sine.validate(topology)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::body::tests::two_joint_body;

    fn two_joint_markers() -> BodyMarkers {
        BodyMarkers {
            head: "torso".to_string(),
            legs: ("leg_f".to_string(), "leg_b".to_string()),
            feet: ("leg_f".to_string(), "leg_b".to_string()),
        }
    }

    #[test]
    fn test_default_config_valid() {
        let config = EvolutionConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_population_must_divide_by_workers() {
        let mut config = EvolutionConfig::default();
        config.population.size = 100;
        config.parallelism = Parallelism::Processes { workers: 8 };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PopulationNotDivisible {
                population: 100,
                workers: 8
            })
        ));

        config.parallelism = Parallelism::Threads { workers: 4 };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_reserved_slots_must_fit() {
        let mut config = EvolutionConfig::default();
        config.population.size = 4;
        config.population.elites = 3;
        config.population.randoms = 2;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TooManyReserved { .. })
        ));
    }

    #[test]
    fn test_bundled_biped_fits_defaults() {
        let body =
            BodyTopology::from_json_str(include_str!("../../assets/bodies/biped.json")).unwrap();
        assert_eq!(body.joints().len(), 5);
        assert!(EvolutionConfig::default().validate_for(&body).is_ok());
    }

    #[test]
    fn test_markers_checked_against_body() {
        let body = two_joint_body();
        let mut config = EvolutionConfig::default();
        assert!(matches!(
            config.validate_for(&body),
            Err(ConfigError::UnknownPart { role: "head", .. })
        ));

        config.simulation.evaluation.markers = two_joint_markers();
        assert!(config.validate_for(&body).is_ok());
    }

    #[test]
    fn test_mirror_pairs_checked() {
        let body = two_joint_body();
        let mut sine = SineEncodingConfig {
            mirrors: vec![("torso-leg_f".to_string(), "torso-leg_b".to_string())],
            ..Default::default()
        };
        assert!(sine.validate(&body).is_ok());

        sine.mirrors.push(("torso-leg_b".to_string(), "torso-leg_f".to_string()));
        assert!(matches!(
            sine.validate(&body),
            Err(ConfigError::DuplicateMirror(_))
        ));

        sine.mirrors = vec![("torso-leg_f".to_string(), "torso-arm".to_string())];
        assert!(matches!(
            sine.validate(&body),
            Err(ConfigError::UnknownJoint(_))
        ));
    }

    #[test]
    fn test_serialization_with_defaults() {
        let json = r#"{ "population": { "size": 64 }, "parallelism": { "mode": "Processes", "workers": 4 } }"#;
        let config: EvolutionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.population.size, 64);
        assert_eq!(config.population.elites, 4);
        assert_eq!(config.parallelism, Parallelism::Processes { workers: 4 });
        assert!(matches!(config.encoding, EncodingConfig::Array(_)));
        assert_eq!(config.simulation.physics.fps, 30);
    }
}
