//! Fitness evaluation across shards.
//!
//! The population is cut into equal, contiguous shards. Each shard is scored
//! by an independent [`GenerationRunner`] with its own world, and the score
//! vectors are concatenated in shard order. Shards run in the calling thread,
//! on a rayon pool, or in worker processes that speak JSON over stdin/stdout.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::compute::{GenerationRunner, SimulationError};
use crate::schema::{BodyTopology, Genome, Parallelism, SimulationConfig};

use super::search::EvolutionError;

/// Argument that puts the binary into worker mode.
pub const WORKER_SUBCOMMAND: &str = "worker";

/// Everything a worker needs to score one shard.
#[derive(Debug, Serialize, Deserialize)]
pub struct ShardRequest {
    pub topology: BodyTopology,
    pub simulation: SimulationConfig,
    pub genomes: Vec<Genome>,
}

/// A worker's answer.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ShardResponse {
    Scored { scores: Vec<f32> },
    Failed { reason: String },
}

/// Worker-side protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Worker IO failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed shard message: {0}")]
    Protocol(#[from] serde_json::Error),
    #[error(transparent)]
    Simulation(#[from] SimulationError),
}

/// Serve one shard: read a [`ShardRequest`] from `input`, write a
/// [`ShardResponse`] to `output`.
pub fn serve_shard<R: Read, W: Write>(input: R, mut output: W) -> Result<(), WorkerError> {
    let request: ShardRequest = serde_json::from_reader(input)?;
    log::debug!("Worker scoring {} genomes", request.genomes.len());

    let result = GenerationRunner::new(&request.topology, &request.simulation).run(&request.genomes);
    let response = match &result {
        Ok(scores) => ShardResponse::Scored {
            scores: scores.clone(),
        },
        Err(e) => ShardResponse::Failed {
            reason: e.to_string(),
        },
    };
    serde_json::to_writer(&mut output, &response)?;
    output.flush()?;
    result.map(|_| ()).map_err(WorkerError::from)
}

/// How to launch a worker process.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    /// Re-run the current executable in worker mode.
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self {
            program: std::env::current_exe()?,
            args: vec![WORKER_SUBCOMMAND.to_string()],
        })
    }
}

enum Mode {
    Sequential,
    Threads(rayon::ThreadPool),
    Processes(WorkerCommand),
}

/// Scores whole populations according to a [`Parallelism`] setting.
pub struct Dispatcher {
    mode: Mode,
    shards: usize,
}

impl Dispatcher {
    pub fn new(parallelism: &Parallelism) -> Result<Self, EvolutionError> {
        let mode = match parallelism {
            Parallelism::Sequential => Mode::Sequential,
            Parallelism::Threads { workers } => Mode::Threads(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(*workers)
                    .thread_name(|i| format!("shard-{i}"))
                    .build()
                    .map_err(|e| EvolutionError::Worker {
                        shard: 0,
                        reason: e.to_string(),
                    })?,
            ),
            Parallelism::Processes { .. } => {
                let command = WorkerCommand::current_exe().map_err(|e| EvolutionError::Worker {
                    shard: 0,
                    reason: format!("cannot locate worker executable: {e}"),
                })?;
                Mode::Processes(command)
            }
        };
        Ok(Self {
            mode,
            shards: parallelism.shards().max(1),
        })
    }

    /// Use `command` to launch workers (process mode only).
    pub fn with_worker_command(mut self, command: WorkerCommand) -> Self {
        if let Mode::Processes(current) = &mut self.mode {
            *current = command;
        }
        self
    }

    /// Scores for `genomes`, in order.
    pub fn evaluate(
        &self,
        topology: &BodyTopology,
        simulation: &SimulationConfig,
        genomes: &[Genome],
    ) -> Result<Vec<f32>, EvolutionError> {
        if genomes.is_empty() {
            return Ok(Vec::new());
        }
        match &self.mode {
            Mode::Processes(command) => evaluate_in_processes(
                command,
                topology,
                simulation,
                genomes,
                self.shard_len(genomes.len()),
            ),
            _ => self.evaluate_in_process(genomes, |shard| {
                GenerationRunner::new(topology, simulation).run(shard)
            }),
        }
    }

    fn shard_len(&self, population: usize) -> usize {
        population.div_ceil(self.shards).max(1)
    }

    /// Sequential and thread modes, with a pluggable shard scorer.
    pub(crate) fn evaluate_in_process<F>(
        &self,
        genomes: &[Genome],
        score_shard: F,
    ) -> Result<Vec<f32>, EvolutionError>
    where
        F: Fn(&[Genome]) -> Result<Vec<f32>, SimulationError> + Sync,
    {
        match &self.mode {
            Mode::Threads(pool) => {
                let shard_len = self.shard_len(genomes.len());
                let shards: Vec<Vec<f32>> = pool.install(|| {
                    genomes
                        .par_chunks(shard_len)
                        .map(&score_shard)
                        .collect::<Result<_, _>>()
                })?;
                Ok(shards.concat())
            }
            _ => Ok(score_shard(genomes)?),
        }
    }
}

/// Fork-join over worker processes. Every spawned worker is waited on, even
/// after another shard has failed.
fn evaluate_in_processes(
    command: &WorkerCommand,
    topology: &BodyTopology,
    simulation: &SimulationConfig,
    genomes: &[Genome],
    shard_len: usize,
) -> Result<Vec<f32>, EvolutionError> {
    let mut children: Vec<(usize, Result<Child, String>)> = Vec::new();
    for (shard, chunk) in genomes.chunks(shard_len).enumerate() {
        let request = ShardRequest {
            topology: topology.clone(),
            simulation: simulation.clone(),
            genomes: chunk.to_vec(),
        };
        children.push((shard, spawn_worker(command, &request)));
    }

    let mut scores = Vec::with_capacity(genomes.len());
    let mut first_error = None;
    for (shard, child) in children {
        let result = child.and_then(collect_worker);
        match result {
            Ok(shard_scores) if first_error.is_none() => scores.extend(shard_scores),
            Ok(_) => {}
            Err(reason) => {
                log::warn!("Worker for shard {} failed: {}", shard, reason);
                first_error.get_or_insert(EvolutionError::Worker { shard, reason });
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None if scores.len() != genomes.len() => Err(EvolutionError::Worker {
            shard: 0,
            reason: format!("expected {} scores, got {}", genomes.len(), scores.len()),
        }),
        None => Ok(scores),
    }
}

/// Launch a worker in its own process group, so a terminal interrupt reaches
/// only the parent, and hand it the shard.
pub(crate) fn spawn_worker(
    command: &WorkerCommand,
    request: &ShardRequest,
) -> Result<Child, String> {
    let mut process = Command::new(&command.program);
    process
        .args(&command.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        process.process_group(0);
    }
    let mut child = process
        .spawn()
        .map_err(|e| format!("failed to spawn {}: {e}", command.program.display()))?;

    // Dropping stdin after the write closes the pipe so the worker sees EOF.
    let written = match child.stdin.take() {
        Some(mut stdin) => serde_json::to_writer(&mut stdin, request)
            .map_err(|e| format!("failed to send shard: {e}")),
        None => Err("worker stdin unavailable".to_string()),
    };
    if let Err(reason) = written {
        // Still reap the process before reporting.
        let _ = child.wait();
        return Err(reason);
    }
    Ok(child)
}

pub(crate) fn collect_worker(child: Child) -> Result<Vec<f32>, String> {
    let output = child
        .wait_with_output()
        .map_err(|e| format!("failed to wait for worker: {e}"))?;
    let response: Option<ShardResponse> = serde_json::from_slice(&output.stdout).ok();
    match (response, output.status.success()) {
        (Some(ShardResponse::Scored { scores }), true) => Ok(scores),
        (Some(ShardResponse::Failed { reason }), _) => Err(reason),
        (_, _) => Err(format!("worker exited with {}", output.status)),
    }
}
