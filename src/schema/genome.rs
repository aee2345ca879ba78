//! Genome representations.
//!
//! Every encoding answers one question: given an integer frame index, what
//! control signal should each joint receive? [`Genome::step`] is a pure
//! function of the genome and `t`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Control signal per joint id for a single frame.
pub type ControlSignal = BTreeMap<String, f32>;

/// Structural defects of a genome read from disk or the wire.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenomeShapeError {
    #[error("Array genome has {cells} cells, expected {joints} joints x {slots} slots")]
    CellCount {
        cells: usize,
        joints: usize,
        slots: usize,
    },
    #[error("Array genome advances every 0 frames")]
    ZeroFramesPerSlot,
}

/// An evolvable motion-control policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "encoding")]
pub enum Genome {
    /// Cyclic table of per-joint target velocities.
    Array(ArrayGenome),
    /// Per-joint periodic waves.
    Sine(SineGenome),
}

impl Genome {
    /// Control signal for frame `t`.
    pub fn step(&self, t: u64) -> ControlSignal {
        match self {
            Genome::Array(genome) => genome.step(t),
            Genome::Sine(genome) => genome.step(t),
        }
    }

    /// Optional per-joint starting angle offsets (radians).
    pub fn initial_pose(&self) -> Option<&BTreeMap<String, f32>> {
        match self {
            Genome::Array(genome) => genome.initial_pose.as_ref(),
            Genome::Sine(_) => None,
        }
    }

    /// Check the genome's internal dimensions agree, so [`step`](Self::step)
    /// cannot index out of bounds.
    pub fn validate(&self) -> Result<(), GenomeShapeError> {
        match self {
            Genome::Array(genome) => genome.validate(),
            Genome::Sine(_) => Ok(()),
        }
    }

    /// Short name of the encoding, for logs.
    pub fn encoding_name(&self) -> &'static str {
        match self {
            Genome::Array(_) => "array",
            Genome::Sine(_) => "sine",
        }
    }
}

/// Loop encoding: a `joints x slots` matrix of target angular velocities.
///
/// Cells are stored joint-major: `cells[joint * slots + slot]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayGenome {
    pub joints: Vec<String>,
    pub slots: usize,
    /// How many consecutive frames share one slot.
    pub frames_per_slot: u32,
    pub cells: Vec<f32>,
    #[serde(default)]
    pub initial_pose: Option<BTreeMap<String, f32>>,
}

impl ArrayGenome {
    /// All-zero genome.
    pub fn zeros(joints: Vec<String>, slots: usize, frames_per_slot: u32) -> Self {
        let cells = vec![0.0; joints.len() * slots];
        Self {
            joints,
            slots,
            frames_per_slot,
            cells,
            initial_pose: None,
        }
    }

    pub fn validate(&self) -> Result<(), GenomeShapeError> {
        if self.cells.len() != self.joints.len() * self.slots {
            return Err(GenomeShapeError::CellCount {
                cells: self.cells.len(),
                joints: self.joints.len(),
                slots: self.slots,
            });
        }
        if self.frames_per_slot == 0 {
            return Err(GenomeShapeError::ZeroFramesPerSlot);
        }
        Ok(())
    }

    /// Slot used at frame `t`.
    #[inline]
    pub fn slot_at(&self, t: u64) -> usize {
        if self.slots == 0 {
            return 0;
        }
        ((t / self.frames_per_slot.max(1) as u64) % self.slots as u64) as usize
    }

    #[inline]
    pub fn cell(&self, joint: usize, slot: usize) -> f32 {
        self.cells[joint * self.slots + slot]
    }

    #[inline]
    pub fn cell_mut(&mut self, joint: usize, slot: usize) -> &mut f32 {
        &mut self.cells[joint * self.slots + slot]
    }

    pub fn step(&self, t: u64) -> ControlSignal {
        if self.slots == 0 {
            return self.joints.iter().map(|j| (j.clone(), 0.0)).collect();
        }
        let slot = self.slot_at(t);
        self.joints
            .iter()
            .enumerate()
            .map(|(j, id)| (id.clone(), self.cell(j, slot)))
            .collect()
    }
}

/// One harmonic of a joint wave.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Harmonic {
    pub amplitude: f32,
    pub phase: f32,
}

/// Periodic signal driving one joint.
///
/// `value(t) = offset + sum_k amplitude_k / (k + 1) * sin((k + 1) * frequency * t + phase_k)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointWave {
    pub offset: f32,
    pub frequency: f32,
    pub harmonics: Vec<Harmonic>,
}

impl JointWave {
    pub fn value(&self, t: u64) -> f32 {
        let t = t as f32;
        self.harmonics
            .iter()
            .enumerate()
            .fold(self.offset, |acc, (k, h)| {
                let order = (k + 1) as f32;
                acc + h.amplitude / order * (order * self.frequency * t + h.phase).sin()
            })
    }
}

/// Frequency-domain encoding with optional mirrored joints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SineGenome {
    /// Waves for the joints that carry their own gene.
    pub waves: BTreeMap<String, JointWave>,
    /// Mirror joint id -> source joint id. A mirror outputs the negated source value.
    #[serde(default)]
    pub mirrors: BTreeMap<String, String>,
}

impl SineGenome {
    pub fn step(&self, t: u64) -> ControlSignal {
        let mut signal: ControlSignal = self
            .waves
            .iter()
            .map(|(id, wave)| (id.clone(), wave.value(t)))
            .collect();
        for (mirror, source) in &self.mirrors {
            if let Some(value) = self.waves.get(source).map(|w| w.value(t)) {
                signal.insert(mirror.clone(), -value);
            }
        }
        signal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joints() -> Vec<String> {
        vec!["a-b".to_string(), "a-c".to_string()]
    }

    #[test]
    fn test_validate_rejects_wrong_cell_count() {
        let mut genome = ArrayGenome::zeros(joints(), 3, 2);
        assert_eq!(Genome::Array(genome.clone()).validate(), Ok(()));

        genome.cells.pop();
        assert_eq!(
            Genome::Array(genome.clone()).validate(),
            Err(GenomeShapeError::CellCount {
                cells: 5,
                joints: 2,
                slots: 3
            })
        );

        let mut stalled = ArrayGenome::zeros(joints(), 3, 0);
        stalled.cells.fill(1.0);
        assert_eq!(stalled.validate(), Err(GenomeShapeError::ZeroFramesPerSlot));
    }

    #[test]
    fn test_truncated_cells_from_json_are_caught() {
        let json = r#"{"encoding":"Array","joints":["a-b","a-c"],"slots":2,"frames_per_slot":1,"cells":[0.5]}"#;
        let genome: Genome = serde_json::from_str(json).unwrap();
        assert!(matches!(
            genome.validate(),
            Err(GenomeShapeError::CellCount { cells: 1, .. })
        ));
    }

    #[test]
    fn test_array_step_cycles_slots() {
        let mut genome = ArrayGenome::zeros(joints(), 3, 2);
        for slot in 0..3 {
            *genome.cell_mut(0, slot) = slot as f32;
            *genome.cell_mut(1, slot) = -(slot as f32);
        }
        let expected_slots = [0, 0, 1, 1, 2, 2, 0, 0];
        for (t, slot) in expected_slots.iter().enumerate() {
            let signal = genome.step(t as u64);
            assert_eq!(signal["a-b"], *slot as f32);
            assert_eq!(signal["a-c"], -(*slot as f32));
        }
    }

    #[test]
    fn test_step_is_deterministic() {
        let genome = Genome::Sine(SineGenome {
            waves: BTreeMap::from([(
                "a-b".to_string(),
                JointWave {
                    offset: 0.2,
                    frequency: 0.37,
                    harmonics: vec![
                        Harmonic {
                            amplitude: 0.8,
                            phase: 1.0,
                        },
                        Harmonic {
                            amplitude: 0.4,
                            phase: 2.0,
                        },
                    ],
                },
            )]),
            mirrors: BTreeMap::new(),
        });
        for t in [0, 1, 17, 1000] {
            assert_eq!(genome.step(t), genome.step(t));
        }
    }

    #[test]
    fn test_sine_value_and_mirror() {
        let wave = JointWave {
            offset: 0.0,
            frequency: 0.5,
            harmonics: vec![Harmonic {
                amplitude: 1.0,
                phase: 0.0,
            }],
        };
        let genome = SineGenome {
            waves: BTreeMap::from([("a-b".to_string(), wave)]),
            mirrors: BTreeMap::from([("a-c".to_string(), "a-b".to_string())]),
        };
        let signal = genome.step(3);
        let expected = (0.5f32 * 3.0).sin();
        assert!((signal["a-b"] - expected).abs() < 1e-6);
        assert!((signal["a-c"] + expected).abs() < 1e-6);
    }

    #[test]
    fn test_second_harmonic_is_scaled() {
        let wave = JointWave {
            offset: 1.0,
            frequency: 0.25,
            harmonics: vec![
                Harmonic {
                    amplitude: 0.0,
                    phase: 0.0,
                },
                Harmonic {
                    amplitude: 1.0,
                    phase: 0.5,
                },
            ],
        };
        let expected = 1.0 + 0.5 * (2.0f32 * 0.25 * 4.0 + 0.5).sin();
        assert!((wave.value(4) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_genome_serialization_is_tagged() {
        let genome = Genome::Array(ArrayGenome::zeros(joints(), 2, 1));
        let json = serde_json::to_string(&genome).unwrap();
        assert!(json.contains("\"encoding\":\"Array\""));
        let parsed: Genome = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, genome);
    }
}
