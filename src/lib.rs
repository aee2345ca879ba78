//! Ragdoll Walkers - evolving walking gaits for 2D ragdolls.
//!
//! A body file describes a tree of polygonal parts joined by motorised
//! revolute joints. A genome drives the joint motors frame by frame; a
//! population of genomes is simulated in a shared rigid-body world, scored by
//! how far each ragdoll walks before falling or stalling, and bred into the
//! next generation.
//!
//! # Architecture
//!
//! - `schema`: body topology, genome encodings, configuration and run statistics
//! - `physics`: the narrow physics boundary and its rapier implementation
//! - `compute`: individuals, generation runs, traces and the evolutionary search
//!
//! # Example
//!
//! ```rust,no_run
//! use ragdoll_walkers::{
//!     compute::run_generation,
//!     compute::evolution::{GenomeRng, breeder_for},
//!     schema::{BodyTopology, EvolutionConfig},
//! };
//!
//! let topology = BodyTopology::load("assets/bodies/biped.json")?;
//! let config = EvolutionConfig::default();
//! let breeder = breeder_for(&config.encoding, &topology);
//!
//! let mut rng = GenomeRng::new(42);
//! let genomes: Vec<_> = (0..8).map(|_| breeder.random_genome(&mut rng)).collect();
//! let scores = run_generation(&topology, &genomes, &config.simulation)?;
//! println!("Scores: {:?}", scores);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod compute;
pub mod physics;
pub mod schema;

// Re-export commonly used types
pub use compute::evolution::EvolutionEngine;
pub use compute::{GenerationRunner, run_generation};
pub use schema::{BodyTopology, EvolutionConfig, Genome};
