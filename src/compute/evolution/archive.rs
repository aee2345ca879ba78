//! Checkpoint storage for the best genome of a run.
//!
//! A checkpoint is written only when a generation strictly improves on the
//! best score seen so far. Files are named `gen={generation}_score={score:.4}.json`
//! and created exclusively; an existing file with the same name is left alone.

use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::schema::Genome;

/// A persisted best genome with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub generation: usize,
    pub score: f32,
    pub genome: Genome,
}

/// A checkpoint file found on disk, identified by its name alone.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointEntry {
    pub path: PathBuf,
    pub generation: usize,
    pub score: f32,
}

/// Checkpoint IO errors.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("Checkpoint IO failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Invalid checkpoint {path}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Generation and score count differ ({genomes} genomes, {scores} scores)")]
    LengthMismatch { genomes: usize, scores: usize },
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> CheckpointError + '_ {
    move |source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Writes improved best genomes to a directory.
#[derive(Debug)]
pub struct Checkpointer {
    dir: PathBuf,
    best_score: Option<f32>,
}

impl Checkpointer {
    /// Create the directory if needed. No best score is assumed.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, CheckpointError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(io_error(&dir))?;
        Ok(Self {
            dir,
            best_score: None,
        })
    }

    /// Continue from the best checkpoint already in the directory.
    pub fn resume<P: AsRef<Path>>(dir: P) -> Result<Self, CheckpointError> {
        let mut checkpointer = Self::new(dir)?;
        checkpointer.best_score = Self::discover(&checkpointer.dir)?
            .into_iter()
            .map(|e| e.score)
            .reduce(f32::max);
        Ok(checkpointer)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn best_score(&self) -> Option<f32> {
        self.best_score
    }

    pub fn file_name(generation: usize, score: f32) -> String {
        format!("gen={generation}_score={score:.4}.json")
    }

    /// Inverse of [`file_name`](Self::file_name).
    pub fn parse_file_name(name: &str) -> Option<(usize, f32)> {
        let stem = name.strip_suffix(".json")?;
        let (generation, score) = stem.strip_prefix("gen=")?.split_once("_score=")?;
        Some((generation.parse().ok()?, score.parse().ok()?))
    }

    /// Persist the best genome of a generation if it beats every earlier one.
    ///
    /// Returns the checkpoint path when this call improved the best score.
    pub fn record(
        &mut self,
        generation: usize,
        genomes: &[Genome],
        scores: &[f32],
    ) -> Result<Option<PathBuf>, CheckpointError> {
        if genomes.len() != scores.len() {
            return Err(CheckpointError::LengthMismatch {
                genomes: genomes.len(),
                scores: scores.len(),
            });
        }
        let Some((index, score)) = scores
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, s)| !s.is_nan())
            .max_by(|a, b| a.1.total_cmp(&b.1))
        else {
            return Ok(None);
        };
        if self.best_score.is_some_and(|best| score <= best) {
            return Ok(None);
        }
        self.best_score = Some(score);

        let checkpoint = Checkpoint {
            generation,
            score,
            genome: genomes[index].clone(),
        };
        let path = self.dir.join(Self::file_name(generation, score));
        let file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                log::debug!("Checkpoint {} already exists, skipping", path.display());
                return Ok(Some(path));
            }
            Err(e) => return Err(io_error(&path)(e)),
        };

        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &checkpoint).map_err(|source| {
            CheckpointError::Format {
                path: path.clone(),
                source,
            }
        })?;
        writer.flush().map_err(io_error(&path))?;

        log::info!(
            "New best score {:.4} at generation {}, saved {}",
            score,
            generation,
            path.display()
        );
        Ok(Some(path))
    }

    /// Load one checkpoint file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Checkpoint, CheckpointError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(io_error(path))?;
        serde_json::from_str(&content).map_err(|source| CheckpointError::Format {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Checkpoint files in `dir`, ordered by generation. Unrelated files are ignored.
    pub fn discover<P: AsRef<Path>>(dir: P) -> Result<Vec<CheckpointEntry>, CheckpointError> {
        let dir = dir.as_ref();
        let mut entries = Vec::new();
        for entry in fs::read_dir(dir).map_err(io_error(dir))? {
            let path = entry.map_err(io_error(dir))?.path();
            let parsed = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(Self::parse_file_name);
            if let Some((generation, score)) = parsed {
                entries.push(CheckpointEntry {
                    path,
                    generation,
                    score,
                });
            }
        }
        entries.sort_by(|a, b| {
            a.generation
                .cmp(&b.generation)
                .then(a.score.total_cmp(&b.score))
        });
        Ok(entries)
    }

    /// Highest-scoring checkpoint in `dir`, if any.
    pub fn best_in<P: AsRef<Path>>(dir: P) -> Result<Option<Checkpoint>, CheckpointError> {
        let best = Self::discover(dir)?
            .into_iter()
            .max_by(|a, b| a.score.total_cmp(&b.score));
        best.map(|entry| Self::load(entry.path)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ArrayGenome;

    fn genome(v: f32) -> Genome {
        let mut g = ArrayGenome::zeros(vec!["a-b".to_string()], 2, 1);
        g.cells.fill(v);
        Genome::Array(g)
    }

    #[test]
    fn test_file_name_round_trip() {
        let name = Checkpointer::file_name(12, 3.14159);
        assert_eq!(name, "gen=12_score=3.1416.json");
        assert_eq!(Checkpointer::parse_file_name(&name), Some((12, 3.1416)));
        assert_eq!(Checkpointer::parse_file_name("notes.txt"), None);
        assert_eq!(Checkpointer::parse_file_name("gen=x_score=1.0.json"), None);
    }

    #[test]
    fn test_records_only_strict_improvements() {
        let dir = tempfile::tempdir().unwrap();
        let mut checkpointer = Checkpointer::new(dir.path()).unwrap();

        let first = checkpointer
            .record(0, &[genome(0.0), genome(1.0)], &[1.0, 2.0])
            .unwrap();
        assert!(first.is_some());
        assert_eq!(checkpointer.best_score(), Some(2.0));

        let same = checkpointer.record(1, &[genome(2.0)], &[2.0]).unwrap();
        assert!(same.is_none());
        let worse = checkpointer.record(2, &[genome(3.0)], &[1.5]).unwrap();
        assert!(worse.is_none());
        let better = checkpointer.record(3, &[genome(4.0)], &[2.5]).unwrap();
        assert!(better.is_some());

        let entries = Checkpointer::discover(dir.path()).unwrap();
        let generations: Vec<_> = entries.iter().map(|e| e.generation).collect();
        assert_eq!(generations, vec![0, 3]);

        let loaded = Checkpointer::load(&entries[0].path).unwrap();
        assert_eq!(loaded.genome, genome(1.0));
        assert_eq!(loaded.score, 2.0);

        let best = Checkpointer::best_in(dir.path()).unwrap().unwrap();
        assert_eq!(best.generation, 3);
        assert_eq!(best.genome, genome(4.0));
    }

    #[test]
    fn test_existing_checkpoint_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(Checkpointer::file_name(5, 1.0));
        fs::write(&path, "written by another process").unwrap();

        let mut checkpointer = Checkpointer::new(dir.path()).unwrap();
        let result = checkpointer.record(5, &[genome(1.0)], &[1.0]).unwrap();
        assert_eq!(result, Some(path.clone()));
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "written by another process"
        );
    }

    #[test]
    fn test_resume_picks_up_best_score() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut checkpointer = Checkpointer::new(dir.path()).unwrap();
            checkpointer.record(0, &[genome(1.0)], &[4.0]).unwrap();
        }
        let mut resumed = Checkpointer::resume(dir.path()).unwrap();
        assert_eq!(resumed.best_score(), Some(4.0));
        assert!(resumed.record(1, &[genome(2.0)], &[3.0]).unwrap().is_none());
    }

    #[test]
    fn test_mismatched_lengths_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut checkpointer = Checkpointer::new(dir.path()).unwrap();
        let err = checkpointer.record(0, &[genome(1.0)], &[]).unwrap_err();
        assert!(matches!(err, CheckpointError::LengthMismatch { .. }));
    }
}
