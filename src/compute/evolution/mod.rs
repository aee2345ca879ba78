//! Evolutionary search over walking gaits.
//!
//! # Overview
//!
//! - **Genome operations** (`genome`): random generation, crossover and mutation per encoding
//! - **Dispatch** (`dispatch`): sequential, threaded or multi-process fitness evaluation
//! - **Mailbox** (`mailbox`): latest-generation feed for monitors
//! - **Checkpoints** (`archive`): persisting and discovering best genomes
//! - **Search** (`search`): the generational loop
//!
//! # Example
//!
//! ```rust,no_run
//! use ragdoll_walkers::compute::evolution::EvolutionEngine;
//! use ragdoll_walkers::schema::{BodyTopology, EvolutionConfig};
//!
//! let topology = BodyTopology::load("assets/bodies/biped.json")?;
//! let mut config = EvolutionConfig::default();
//! config.population.max_generations = Some(10);
//!
//! let mut engine = EvolutionEngine::new(config, topology)?;
//! let stats = engine.run()?;
//! println!("Best score after {} generations: {:.3}", stats.generations, stats.best_fitness);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod archive;
mod dispatch;
mod genome;
mod mailbox;
mod search;

pub use archive::{Checkpoint, CheckpointEntry, CheckpointError, Checkpointer};
pub use dispatch::{
    Dispatcher, ShardRequest, ShardResponse, WORKER_SUBCOMMAND, WorkerCommand, WorkerError,
    serve_shard,
};
pub use genome::{
    ArrayGenomeBreeder, BreedError, GenomeBreeder, GenomeRng, SineGenomeBreeder, breeder_for,
    to_distribution,
};
pub use mailbox::{Mailbox, Received};
pub use search::{EvolutionEngine, EvolutionError};
