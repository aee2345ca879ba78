//! Frame trace recorder for capturing simulated poses.
//!
//! A trace is a JSON-lines file: one [`TraceRecord::Generation`] line when a
//! generation starts, followed by [`TraceRecord::Frame`] lines holding the
//! pose of every living individual's parts.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::physics::PhysicsWorld;

use super::generation::{FrameObserver, FrameView};

/// Configuration for trace recording.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Record every Nth frame (1 = every frame).
    pub frame_skip: u32,
    /// Maximum frames to record (0 = unlimited).
    pub max_frames: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            frame_skip: 1,
            max_frames: 0,
        }
    }
}

/// Pose of one living individual: part id -> `[x, y, angle]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndividualPose {
    pub index: usize,
    pub parts: BTreeMap<String, [f32; 3]>,
}

/// One line of a trace file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceRecord {
    Generation {
        generation: usize,
        previous_scores: Option<Vec<f32>>,
    },
    Frame {
        generation: usize,
        t: u64,
        fps: u32,
        individuals: Vec<IndividualPose>,
    },
}

/// Observer writing poses to a trace file.
///
/// Usage:
/// ```ignore
/// let mut recorder = TraceRecorder::create("walk.jsonl", Default::default())?;
/// runner.run_observed(&genomes, ObservedRun { observer: &mut recorder, generation: 0, previous_scores: None })?;
/// recorder.finalize()?;
/// ```
pub struct TraceRecorder {
    writer: BufWriter<File>,
    config: RecorderConfig,
    generation: usize,
    frames_written: u64,
    step_counter: u32,
    error: Option<io::Error>,
}

impl TraceRecorder {
    pub fn create<P: AsRef<Path>>(path: P, config: RecorderConfig) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            config,
            generation: 0,
            frames_written: 0,
            step_counter: 0,
            error: None,
        })
    }

    fn write_record(&mut self, record: &TraceRecord) {
        if self.error.is_some() {
            return;
        }
        let result = serde_json::to_writer(&mut self.writer, record)
            .map_err(io::Error::from)
            .and_then(|_| self.writer.write_all(b"\n"));
        if let Err(e) = result {
            log::warn!("Trace recording stopped: {}", e);
            self.error = Some(e);
        }
    }

    /// Get number of frames recorded so far.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Flush the file, surfacing the first write error if one occurred.
    pub fn finalize(mut self) -> io::Result<TraceStats> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.writer.flush()?;
        Ok(TraceStats {
            frame_count: self.frames_written,
        })
    }
}

impl<W: PhysicsWorld> FrameObserver<W> for TraceRecorder {
    fn draw_start(&mut self, scores: Option<&[f32]>, generation: usize) {
        self.generation = generation;
        self.step_counter = 0;
        self.write_record(&TraceRecord::Generation {
            generation,
            previous_scores: scores.map(<[f32]>::to_vec),
        });
    }

    fn draw_loop(&mut self, frame: &FrameView<'_, '_, W>) {
        self.step_counter += 1;
        if self.step_counter < self.config.frame_skip {
            return;
        }
        self.step_counter = 0;

        if self.config.max_frames > 0 && self.frames_written >= self.config.max_frames {
            return;
        }

        let individuals = frame
            .individuals
            .iter()
            .enumerate()
            .filter_map(|(index, individual)| {
                let parts = individual.parts()?;
                let parts = parts
                    .iter()
                    .filter_map(|(id, &body)| {
                        frame
                            .world
                            .body_transform(body)
                            .map(|t| (id.clone(), [t.position.x, t.position.y, t.angle]))
                    })
                    .collect();
                Some(IndividualPose { index, parts })
            })
            .collect();

        self.write_record(&TraceRecord::Frame {
            generation: self.generation,
            t: frame.t,
            fps: frame.fps,
            individuals,
        });
        self.frames_written += 1;
    }
}

/// Statistics from a recording session.
#[derive(Debug, Clone)]
pub struct TraceStats {
    pub frame_count: u64,
}

/// Read every record of a trace file.
pub fn read_trace<P: AsRef<Path>>(path: P) -> io::Result<Vec<TraceRecord>> {
    let reader = BufReader::new(File::open(path)?);
    reader
        .lines()
        .filter(|line| !matches!(line, Ok(l) if l.trim().is_empty()))
        .map(|line| {
            let line = line?;
            serde_json::from_str(&line).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::generation::{GenerationRunner, ObservedRun};
    use crate::compute::individual::tests::{constant_genome, two_joint_evaluation};
    use crate::physics::testing::ScriptedWorld;
    use crate::schema::SimulationConfig;
    use crate::schema::body::tests::two_joint_body;

    #[test]
    fn test_record_and_read_trace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.jsonl");
        let body = two_joint_body();
        let mut config = SimulationConfig {
            evaluation: two_joint_evaluation(),
            ..Default::default()
        };
        config.evaluation.max_frames = 9;

        let mut recorder = TraceRecorder::create(
            &path,
            RecorderConfig {
                frame_skip: 2,
                max_frames: 0,
            },
        )
        .unwrap();
        let genomes = vec![constant_genome(1.0)];
        GenerationRunner::new(&body, &config)
            .run_in(
                ScriptedWorld::new(),
                &genomes,
                Some(ObservedRun {
                    observer: &mut recorder,
                    generation: 2,
                    previous_scores: None,
                }),
            )
            .unwrap();
        let stats = recorder.finalize().unwrap();

        // Frames 0..=9, every second one.
        assert_eq!(stats.frame_count, 5);
        let records = read_trace(&path).unwrap();
        assert_eq!(records.len(), 6);
        assert!(matches!(
            records[0],
            TraceRecord::Generation { generation: 2, .. }
        ));
        let TraceRecord::Frame { t, individuals, .. } = &records[1] else {
            panic!("expected a frame record");
        };
        assert_eq!(*t, 1);
        assert_eq!(individuals.len(), 1);
        assert_eq!(individuals[0].parts.len(), 3);
        // The individual is dead (and absent) on the final frame.
        let TraceRecord::Frame { individuals, .. } = &records[5] else {
            panic!("expected a frame record");
        };
        assert!(individuals.is_empty());
    }

    #[test]
    fn test_max_frames_caps_recording() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.jsonl");
        let body = two_joint_body();
        let mut config = SimulationConfig {
            evaluation: two_joint_evaluation(),
            ..Default::default()
        };
        config.evaluation.max_frames = 30;

        let mut recorder = TraceRecorder::create(
            &path,
            RecorderConfig {
                frame_skip: 1,
                max_frames: 4,
            },
        )
        .unwrap();
        GenerationRunner::new(&body, &config)
            .run_in(
                ScriptedWorld::new(),
                &[constant_genome(1.0)],
                Some(ObservedRun {
                    observer: &mut recorder,
                    generation: 0,
                    previous_scores: None,
                }),
            )
            .unwrap();
        assert_eq!(recorder.finalize().unwrap().frame_count, 4);
    }
}
