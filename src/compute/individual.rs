//! A simulated agent: one genome driving one ragdoll until it dies.

use std::collections::BTreeMap;

use crate::physics::{PhysicsError, PhysicsWorld};
use crate::schema::{BodyTopology, EvaluationConfig, Genome, GenomeShapeError, PhysicsConfig};

use super::ragdoll::Ragdoll;

/// Errors raised while simulating individuals.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("Physics error: {0}")]
    Physics(#[from] PhysicsError),
    #[error("Malformed genome: {0}")]
    MalformedGenome(#[from] GenomeShapeError),
    #[error("Genome drives joint '{0}' which the body does not have")]
    UnknownJoint(String),
    #[error("The {role} part '{part}' is not defined by the body")]
    MissingPart { role: &'static str, part: String },
    #[error("Body part '{0}' vanished from the world while alive")]
    BodyVanished(String),
}

/// Why an individual stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeathCause {
    /// Head dropped below the minimum height.
    Fell,
    /// No forward progress for too long.
    Idle,
    /// Reached the per-individual frame cap.
    FrameCap,
}

/// Marker parts resolved to physics handles.
struct Markers<B> {
    head: (String, B),
    legs: [(String, B); 2],
    feet: [(String, B); 2],
}

/// One genome embodied in a shared world.
///
/// Alive until the liveness check fails, then dead for good: the score is
/// frozen and the ragdoll's bodies and joints are removed from the world.
pub struct Individual<'g, W: PhysicsWorld> {
    genome: &'g Genome,
    ragdoll: Option<Ragdoll<W>>,
    markers: Markers<W::Body>,
    frames: u64,
    penalties: f32,
    initial_head_y: f32,
    head_bob_total: f32,
    spawn_x: f32,
    max_x_reached: f32,
    idle_frames: u32,
    score: f32,
    death: Option<DeathCause>,
}

impl<'g, W: PhysicsWorld> Individual<'g, W> {
    /// Spawn the body for `genome` in `world`.
    pub fn spawn(
        world: &mut W,
        topology: &BodyTopology,
        genome: &'g Genome,
        physics: &PhysicsConfig,
        evaluation: &EvaluationConfig,
    ) -> Result<Self, SimulationError> {
        genome.validate()?;
        if let Some(joint) = genome
            .step(0)
            .into_keys()
            .find(|id| topology.joint(id).is_none())
        {
            return Err(SimulationError::UnknownJoint(joint));
        }

        let ragdoll = Ragdoll::spawn(world, topology, genome.initial_pose(), physics)?;
        let (markers, initial_head_y, spawn_x) =
            match measure_spawn(world, &ragdoll.parts, evaluation) {
                Ok(measured) => measured,
                Err(e) => {
                    ragdoll.destroy(world);
                    return Err(e);
                }
            };

        Ok(Self {
            genome,
            ragdoll: Some(ragdoll),
            markers,
            frames: 0,
            penalties: 0.0,
            initial_head_y,
            head_bob_total: 0.0,
            spawn_x,
            max_x_reached: spawn_x,
            idle_frames: 0,
            score: 0.0,
            death: None,
        })
    }

    pub fn is_dead(&self) -> bool {
        self.death.is_some()
    }

    pub fn death(&self) -> Option<DeathCause> {
        self.death
    }

    /// Final score; 0 while alive.
    pub fn score(&self) -> f32 {
        self.score
    }

    pub fn genome(&self) -> &Genome {
        self.genome
    }

    /// Frames this individual has been stepped while alive.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Part handles, or `None` once dead.
    pub fn parts(&self) -> Option<&BTreeMap<String, W::Body>> {
        self.ragdoll.as_ref().map(|r| &r.parts)
    }

    /// Advance the individual by one frame at time `t`.
    ///
    /// A dead individual is left untouched. A live one is first checked for
    /// death (scoring it and releasing its body if so), otherwise its metrics
    /// are updated and the genome's signal for `t` is applied to the motors.
    pub fn step(
        &mut self,
        t: u64,
        world: &mut W,
        evaluation: &EvaluationConfig,
    ) -> Result<(), SimulationError> {
        if self.is_dead() {
            return Ok(());
        }

        if let Some(cause) = self.check_liveness(t, world, evaluation)? {
            self.die(cause, world, evaluation)?;
            return Ok(());
        }

        self.update_metrics(t, world, evaluation)?;

        if let Some(ragdoll) = &self.ragdoll {
            for (joint_id, value) in self.genome.step(t) {
                if let Some(&joint) = ragdoll.joints.get(&joint_id) {
                    world.set_motor_speed(joint, value * evaluation.joint_speed);
                }
            }
        }
        self.frames += 1;
        Ok(())
    }

    fn check_liveness(
        &self,
        t: u64,
        world: &W,
        evaluation: &EvaluationConfig,
    ) -> Result<Option<DeathCause>, SimulationError> {
        if position(world, &self.markers.head)?.y < evaluation.head_min_height {
            return Ok(Some(DeathCause::Fell));
        }
        if self.idle_frames > evaluation.idle_max_frames {
            return Ok(Some(DeathCause::Idle));
        }
        if t >= evaluation.max_frames {
            return Ok(Some(DeathCause::FrameCap));
        }
        Ok(None)
    }

    fn update_metrics(
        &mut self,
        t: u64,
        world: &W,
        evaluation: &EvaluationConfig,
    ) -> Result<(), SimulationError> {
        let stride = (position(world, &self.markers.feet[0])?.x
            - position(world, &self.markers.feet[1])?.x)
            .abs();
        if stride > evaluation.stride_threshold {
            self.penalties += (stride - evaluation.stride_threshold) * evaluation.stride_penalty;
        }

        let head_y = position(world, &self.markers.head)?.y;
        self.head_bob_total += (head_y - self.initial_head_y).abs();

        if t > evaluation.idle_warmup_frames {
            let x = average_leg_x(world, &self.markers)?;
            if x < self.max_x_reached + evaluation.idle_margin {
                self.idle_frames += 1;
            } else {
                self.idle_frames = 0;
                self.max_x_reached = x;
            }
        }
        Ok(())
    }

    fn die(
        &mut self,
        cause: DeathCause,
        world: &mut W,
        evaluation: &EvaluationConfig,
    ) -> Result<(), SimulationError> {
        let avg_head_bob = self.head_bob_total / self.frames.max(1) as f32;
        self.penalties += avg_head_bob * evaluation.head_bob_penalty;

        let displacement = average_leg_x(world, &self.markers)? - self.spawn_x;
        self.score = (displacement - self.penalties)
            .max(0.0)
            .powf(evaluation.score_exponent);
        self.death = Some(cause);

        if let Some(ragdoll) = self.ragdoll.take() {
            ragdoll.destroy(world);
        }
        log::trace!(
            "Individual died ({:?}) after {} frames with score {:.4}",
            cause,
            self.frames,
            self.score
        );
        Ok(())
    }
}

fn resolve_markers<B: Copy>(
    parts: &BTreeMap<String, B>,
    evaluation: &EvaluationConfig,
) -> Result<Markers<B>, SimulationError> {
    let resolve = |role: &'static str, id: &str| {
        parts
            .get(id)
            .map(|&handle| (id.to_string(), handle))
            .ok_or_else(|| SimulationError::MissingPart {
                role,
                part: id.to_string(),
            })
    };
    let markers = &evaluation.markers;
    Ok(Markers {
        head: resolve("head", &markers.head)?,
        legs: [
            resolve("leg", &markers.legs.0)?,
            resolve("leg", &markers.legs.1)?,
        ],
        feet: [
            resolve("foot", &markers.feet.0)?,
            resolve("foot", &markers.feet.1)?,
        ],
    })
}

/// Markers plus the spawn head height and mean leg x.
fn measure_spawn<W: PhysicsWorld>(
    world: &W,
    parts: &BTreeMap<String, W::Body>,
    evaluation: &EvaluationConfig,
) -> Result<(Markers<W::Body>, f32, f32), SimulationError> {
    let markers = resolve_markers(parts, evaluation)?;
    let head_y = position(world, &markers.head)?.y;
    let spawn_x = average_leg_x(world, &markers)?;
    Ok((markers, head_y, spawn_x))
}

fn position<W: PhysicsWorld>(
    world: &W,
    (id, body): &(String, W::Body),
) -> Result<crate::schema::Vec2, SimulationError> {
    world
        .body_transform(*body)
        .map(|t| t.position)
        .ok_or_else(|| SimulationError::BodyVanished(id.clone()))
}

fn average_leg_x<W: PhysicsWorld>(
    world: &W,
    markers: &Markers<W::Body>,
) -> Result<f32, SimulationError> {
    Ok((position(world, &markers.legs[0])?.x + position(world, &markers.legs[1])?.x) / 2.0)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::physics::testing::ScriptedWorld;
    use crate::schema::body::tests::two_joint_body;
    use crate::schema::{ArrayGenome, BodyMarkers, Vec2};

    /// Evaluation settings for the two-joint test body (torso doubles as head).
    pub(crate) fn two_joint_evaluation() -> EvaluationConfig {
        EvaluationConfig {
            markers: BodyMarkers {
                head: "torso".to_string(),
                legs: ("leg_f".to_string(), "leg_b".to_string()),
                feet: ("leg_f".to_string(), "leg_b".to_string()),
            },
            max_frames: 300,
            ..Default::default()
        }
    }

    pub(crate) fn constant_genome(value: f32) -> Genome {
        let mut genome = ArrayGenome::zeros(
            vec!["torso-leg_b".to_string(), "torso-leg_f".to_string()],
            1,
            1,
        );
        genome.cells.fill(value);
        Genome::Array(genome)
    }

    #[test]
    fn test_idle_individual_dies_after_budget() {
        let body = two_joint_body();
        let evaluation = two_joint_evaluation();
        let genome = constant_genome(0.0);
        let mut world = ScriptedWorld::new();
        let mut individual =
            Individual::spawn(&mut world, &body, &genome, &PhysicsConfig::default(), &evaluation)
                .unwrap();

        // Idle counting starts after the warm-up; the counter must then
        // exceed the budget, which is detected on the following frame.
        let idle_start = evaluation.idle_warmup_frames + 1;
        let deadline = idle_start + evaluation.idle_max_frames as u64 + 1;
        let mut died_at = None;
        for t in 0..=deadline {
            world.step(1.0 / 30.0, 60, 30);
            individual.step(t, &mut world, &evaluation).unwrap();
            if individual.is_dead() {
                died_at = Some(t);
                break;
            }
        }

        assert_eq!(died_at, Some(deadline));
        assert_eq!(individual.death(), Some(DeathCause::Idle));
        assert_eq!(individual.score(), 0.0);
        assert_eq!(world.body_count(), 0);
    }

    #[test]
    fn test_fallen_individual_dies_on_that_frame() {
        let body = two_joint_body();
        let evaluation = two_joint_evaluation();
        let genome = constant_genome(0.5);
        let mut world = ScriptedWorld::new();
        let mut individual =
            Individual::spawn(&mut world, &body, &genome, &PhysicsConfig::default(), &evaluation)
                .unwrap();
        let parts = individual.parts().unwrap().clone();

        for t in 0..10 {
            world.step(1.0 / 30.0, 60, 30);
            individual.step(t, &mut world, &evaluation).unwrap();
        }
        assert!(!individual.is_dead());

        world.set_body_position(parts["torso"], Vec2::new(0.0, 0.1));
        individual.step(10, &mut world, &evaluation).unwrap();

        assert_eq!(individual.death(), Some(DeathCause::Fell));
        assert!(individual.parts().is_none());
        for body in parts.values() {
            assert!(world.body_transform(*body).is_none());
        }
        assert_eq!(world.joint_count(), 0);
    }

    #[test]
    fn test_dead_individual_is_frozen() {
        let body = two_joint_body();
        let mut evaluation = two_joint_evaluation();
        evaluation.max_frames = 5;
        let genome = constant_genome(1.0);
        let mut world = ScriptedWorld::new();
        let mut individual =
            Individual::spawn(&mut world, &body, &genome, &PhysicsConfig::default(), &evaluation)
                .unwrap();

        for t in 0..=5 {
            world.step(1.0 / 30.0, 60, 30);
            individual.step(t, &mut world, &evaluation).unwrap();
        }
        assert_eq!(individual.death(), Some(DeathCause::FrameCap));
        let score = individual.score();
        assert!(score > 0.0);

        individual.step(6, &mut world, &evaluation).unwrap();
        assert_eq!(individual.score(), score);
        assert_eq!(individual.frames(), 5);
    }

    #[test]
    fn test_unknown_joint_in_genome_is_rejected() {
        let body = two_joint_body();
        let genome = Genome::Array(ArrayGenome::zeros(vec!["torso-arm".to_string()], 1, 1));
        let mut world = ScriptedWorld::new();
        let result = Individual::spawn(
            &mut world,
            &body,
            &genome,
            &PhysicsConfig::default(),
            &two_joint_evaluation(),
        );
        assert!(matches!(result, Err(SimulationError::UnknownJoint(ref id)) if id == "torso-arm"));
    }

    #[test]
    fn test_missing_marker_releases_ragdoll() {
        let body = two_joint_body();
        let mut evaluation = two_joint_evaluation();
        evaluation.markers.head = "head".to_string();
        let genome = constant_genome(0.0);
        let mut world = ScriptedWorld::new();

        let result =
            Individual::spawn(&mut world, &body, &genome, &PhysicsConfig::default(), &evaluation);
        assert!(matches!(
            result,
            Err(SimulationError::MissingPart { role: "head", .. })
        ));
        assert_eq!(world.body_count(), 0);
        assert_eq!(world.joint_count(), 0);
    }

    #[test]
    fn test_malformed_genome_is_rejected_before_spawning() {
        let body = two_joint_body();
        let mut genome = constant_genome(1.0);
        if let Genome::Array(array) = &mut genome {
            array.cells.clear();
        }
        let mut world = ScriptedWorld::new();
        let result = Individual::spawn(
            &mut world,
            &body,
            &genome,
            &PhysicsConfig::default(),
            &two_joint_evaluation(),
        );
        assert!(matches!(
            result,
            Err(SimulationError::MalformedGenome(GenomeShapeError::CellCount { .. }))
        ));
        assert_eq!(world.body_count(), 0);
    }
}
