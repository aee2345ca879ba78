//! Ragdoll Walkers CLI - evolve, replay and serve worker shards.

use std::error::Error;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use ragdoll_walkers::{
    compute::evolution::{Checkpointer, EvolutionEngine, Received, serve_shard},
    compute::{GenerationRunner, ObservedRun, RecorderConfig, TraceRecorder},
    schema::{BodyTopology, EvolutionConfig, Genome, Parallelism},
};

type CliResult<T> = Result<T, Box<dyn Error>>;

#[derive(Parser, Debug)]
#[command(name = "ragdoll-walkers")]
#[command(about = "Evolve walking gaits for 2D ragdolls")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the genetic algorithm
    Evolve(EvolveArgs),
    /// Score one shard read from stdin (spawned by process-mode evaluation)
    Worker,
    /// Re-simulate checkpointed genomes
    Replay(ReplayArgs),
    /// Print the default configuration as JSON
    ExampleConfig,
}

#[derive(Args, Debug)]
struct EvolveArgs {
    /// Path to the body definition
    #[arg(long, default_value = "assets/bodies/biped.json")]
    body: PathBuf,

    /// JSON configuration file (defaults apply when absent)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Population size (overrides config)
    #[arg(short = 'p', long)]
    population: Option<usize>,

    /// Number of evaluation workers (overrides config)
    #[arg(short = 'j', long)]
    workers: Option<usize>,

    /// Run workers as threads instead of processes
    #[arg(long)]
    threads: bool,

    /// Checkpoint file or directory to seed the first generation from
    #[arg(long)]
    seed_genome: Option<PathBuf>,

    /// Directory receiving improved best genomes (overrides config)
    #[arg(long)]
    checkpoints: Option<PathBuf>,

    /// Stop after this many generations
    #[arg(short = 'g', long)]
    generations: Option<usize>,

    /// Random seed for reproducible runs
    #[arg(long)]
    random_seed: Option<u64>,

    /// Print the best score of each generation as it is published
    #[arg(long)]
    monitor: bool,

    /// Record every frame to a JSON-lines trace (sequential evaluation only)
    #[arg(long)]
    trace: Option<PathBuf>,

    /// Record every Nth frame to the trace
    #[arg(long, default_value_t = 1)]
    frame_skip: u32,
}

#[derive(Args, Debug)]
struct ReplayArgs {
    /// Checkpoint files or directories
    #[arg(required = true)]
    checkpoints: Vec<PathBuf>,

    /// Path to the body definition
    #[arg(long, default_value = "assets/bodies/biped.json")]
    body: PathBuf,

    /// JSON configuration file (only the simulation section is used)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Record the replay to a JSON-lines trace
    #[arg(long)]
    trace: Option<PathBuf>,

    /// Record every Nth frame to the trace
    #[arg(long, default_value_t = 1)]
    frame_skip: u32,

    /// Maximum frames to record (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    max_frames: u64,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Evolve(args) => evolve(args),
        Command::Worker => worker(),
        Command::Replay(args) => replay(args),
        Command::ExampleConfig => print_example_config(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&Path>) -> CliResult<EvolutionConfig> {
    let Some(path) = path else {
        return Ok(EvolutionConfig::default());
    };
    let content = fs::read_to_string(path)
        .map_err(|e| format!("cannot read config {}: {}", path.display(), e))?;
    let config = serde_json::from_str(&content)
        .map_err(|e| format!("cannot parse config {}: {}", path.display(), e))?;
    Ok(config)
}

/// A checkpoint file, or the best checkpoint of a directory.
fn load_seed_genome(path: &Path) -> CliResult<Genome> {
    if path.is_dir() {
        let best = Checkpointer::best_in(path)?
            .ok_or_else(|| format!("no checkpoints in {}", path.display()))?;
        log::info!(
            "Seeding from generation {} (score {:.4})",
            best.generation,
            best.score
        );
        Ok(best.genome)
    } else {
        Ok(Checkpointer::load(path)?.genome)
    }
}

fn evolve(args: EvolveArgs) -> CliResult<()> {
    let topology = BodyTopology::load(&args.body)?;
    let mut config = load_config(args.config.as_deref())?;

    if let Some(size) = args.population {
        config.population.size = size;
    }
    if let Some(workers) = args.workers {
        config.parallelism = if args.threads {
            Parallelism::Threads { workers }
        } else {
            Parallelism::Processes { workers }
        };
    }
    if args.checkpoints.is_some() {
        config.checkpoint_dir = args.checkpoints.clone();
    }
    if args.generations.is_some() {
        config.population.max_generations = args.generations;
    }
    if args.random_seed.is_some() {
        config.random_seed = args.random_seed;
    }

    let seed_genome = args
        .seed_genome
        .as_deref()
        .map(load_seed_genome)
        .transpose()?;

    let mut recorder = args
        .trace
        .as_ref()
        .map(|path| {
            TraceRecorder::create(
                path,
                RecorderConfig {
                    frame_skip: args.frame_skip,
                    ..Default::default()
                },
            )
        })
        .transpose()?;

    log::info!(
        "Evolving {} genomes of {} joints ({:?})",
        config.population.size,
        topology.joints().len(),
        config.parallelism
    );

    let stats = {
        let mut engine = EvolutionEngine::new(config, topology)?;
        if let Some(genome) = seed_genome {
            engine = engine.with_seed_genome(genome)?;
        }
        if let Some(recorder) = recorder.as_mut() {
            engine = engine.with_observer(recorder)?;
        }

        setup_interrupt_handler(engine.cancel_handle())?;

        let monitor = args.monitor.then(|| {
            let mailbox = engine.subscribe();
            thread::spawn(move || {
                loop {
                    match mailbox.recv_timeout(Duration::from_millis(500)) {
                        Received::Value(report) => {
                            if let Some((index, score)) = report.best() {
                                println!(
                                    "generation {:>5}  best {:>10.4}  (individual {})",
                                    report.generation, score, index
                                );
                            }
                        }
                        Received::Timeout => {}
                        Received::Closed => break,
                    }
                }
            })
        });

        let stats = engine.run();
        if let Some(handle) = monitor {
            let _ = handle.join();
        }
        stats?
    };

    if let Some(recorder) = recorder {
        let trace = recorder.finalize()?;
        log::info!("Recorded {} frames", trace.frame_count);
    }

    println!();
    println!("Generations: {}", stats.generations);
    println!("Evaluations: {}", stats.total_evaluations);
    println!("Best score: {:.4}", stats.best_fitness);
    println!("Final mean score: {:.4}", stats.final_avg_fitness);
    println!(
        "Time: {:.1}s ({:.1} evaluations/s)",
        stats.elapsed_seconds, stats.evaluations_per_second
    );
    Ok(())
}

fn setup_interrupt_handler(cancel: Arc<AtomicBool>) -> CliResult<()> {
    let interrupt_count = Arc::new(AtomicUsize::new(0));
    ctrlc::set_handler(move || {
        let count = interrupt_count.fetch_add(1, Ordering::SeqCst);
        cancel.store(true, Ordering::SeqCst);
        if count == 0 {
            eprintln!("\nInterrupt received, stopping after the current generation...");
        } else {
            eprintln!("\nForce quit.");
            std::process::exit(1);
        }
    })?;
    Ok(())
}

/// Interrupts are left to the parent, which stops after the current generation.
fn worker() -> CliResult<()> {
    ctrlc::set_handler(|| log::debug!("Worker ignoring interrupt"))?;
    serve_shard(io::stdin().lock(), io::stdout().lock())?;
    Ok(())
}

fn replay(args: ReplayArgs) -> CliResult<()> {
    let topology = BodyTopology::load(&args.body)?;
    let simulation = load_config(args.config.as_deref())?.simulation;
    simulation.validate(&topology)?;

    let mut checkpoints = Vec::new();
    for path in &args.checkpoints {
        if path.is_dir() {
            for entry in Checkpointer::discover(path)? {
                checkpoints.push(Checkpointer::load(&entry.path)?);
            }
        } else {
            checkpoints.push(Checkpointer::load(path)?);
        }
    }
    if checkpoints.is_empty() {
        return Err("no checkpoints to replay".into());
    }

    let genomes: Vec<Genome> = checkpoints.iter().map(|c| c.genome.clone()).collect();
    let runner = GenerationRunner::new(&topology, &simulation);
    let scores = match &args.trace {
        Some(path) => {
            let mut recorder = TraceRecorder::create(
                path,
                RecorderConfig {
                    frame_skip: args.frame_skip,
                    max_frames: args.max_frames,
                },
            )?;
            let scores = runner.run_observed(
                &genomes,
                ObservedRun {
                    observer: &mut recorder,
                    generation: 0,
                    previous_scores: None,
                },
            )?;
            let trace = recorder.finalize()?;
            log::info!("Recorded {} frames to {}", trace.frame_count, path.display());
            scores
        }
        None => runner.run(&genomes)?,
    };

    println!("{:>10}  {:>10}  {:>10}", "generation", "recorded", "replayed");
    for (checkpoint, score) in checkpoints.iter().zip(&scores) {
        println!(
            "{:>10}  {:>10.4}  {:>10.4}",
            checkpoint.generation, checkpoint.score, score
        );
    }
    Ok(())
}

fn print_example_config() -> CliResult<()> {
    let config = EvolutionConfig::default();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
