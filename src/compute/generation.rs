//! Running one cohort of individuals in a shared world.

use crate::physics::{BodyDesc, FLOOR_CATEGORY, PhysicsWorld, RapierWorld};
use crate::schema::{BodyTopology, Genome, PhysicsConfig, SimulationConfig, Vec2};

use super::individual::{Individual, SimulationError};

/// Read-only view of the world handed to observers once per frame.
pub struct FrameView<'a, 'g, W: PhysicsWorld> {
    /// Frame index.
    pub t: u64,
    pub world: &'a W,
    pub individuals: &'a [Individual<'g, W>],
    pub floor: W::Body,
    pub fps: u32,
}

/// Display boundary: notified when a generation starts and after every frame.
pub trait FrameObserver<W: PhysicsWorld> {
    /// Called once the population is spawned, with the previous generation's scores.
    fn draw_start(&mut self, _scores: Option<&[f32]>, _generation: usize) {}

    fn draw_loop(&mut self, frame: &FrameView<'_, '_, W>);
}

/// Observer plus the context passed to [`FrameObserver::draw_start`].
pub struct ObservedRun<'o, W: PhysicsWorld> {
    pub observer: &'o mut dyn FrameObserver<W>,
    pub generation: usize,
    pub previous_scores: Option<&'o [f32]>,
}

/// Simulates a population of genomes to completion.
pub struct GenerationRunner<'a> {
    topology: &'a BodyTopology,
    config: &'a SimulationConfig,
}

impl<'a> GenerationRunner<'a> {
    pub fn new(topology: &'a BodyTopology, config: &'a SimulationConfig) -> Self {
        Self { topology, config }
    }

    /// Scores for `genomes`, in order, using a fresh rapier world.
    pub fn run(&self, genomes: &[Genome]) -> Result<Vec<f32>, SimulationError> {
        self.run_in(self.new_world(), genomes, None)
    }

    /// Like [`run`](Self::run), reporting every frame to an observer.
    pub fn run_observed(
        &self,
        genomes: &[Genome],
        observed: ObservedRun<'_, RapierWorld>,
    ) -> Result<Vec<f32>, SimulationError> {
        self.run_in(self.new_world(), genomes, Some(observed))
    }

    fn new_world(&self) -> RapierWorld {
        RapierWorld::new(self.config.physics.gravity)
    }

    /// Run in a caller-supplied world. The runner owns `world` for the whole
    /// call; individuals only reach it through the runner.
    pub fn run_in<W: PhysicsWorld>(
        &self,
        mut world: W,
        genomes: &[Genome],
        mut observed: Option<ObservedRun<'_, W>>,
    ) -> Result<Vec<f32>, SimulationError> {
        let physics = &self.config.physics;
        let evaluation = &self.config.evaluation;

        let floor = world.create_body(&floor_desc(physics))?;
        let mut population = genomes
            .iter()
            .map(|genome| Individual::spawn(&mut world, self.topology, genome, physics, evaluation))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(run) = observed.as_mut() {
            run.observer.draw_start(run.previous_scores, run.generation);
        }

        let dt = 1.0 / physics.fps as f32;
        let mut t = 0u64;
        while population.iter().any(|p| !p.is_dead()) {
            world.step(dt, physics.velocity_iterations, physics.position_iterations);

            for individual in population.iter_mut() {
                individual.step(t, &mut world, evaluation)?;
            }

            if let Some(run) = observed.as_mut() {
                run.observer.draw_loop(&FrameView {
                    t,
                    world: &world,
                    individuals: &population,
                    floor,
                    fps: physics.fps,
                });
            }
            t += 1;
        }

        log::debug!(
            "Simulated {} individuals for {} frames",
            population.len(),
            t
        );
        Ok(population.iter().map(Individual::score).collect())
    }
}

/// Score `genomes` in a fresh world.
pub fn run_generation(
    topology: &BodyTopology,
    genomes: &[Genome],
    config: &SimulationConfig,
) -> Result<Vec<f32>, SimulationError> {
    GenerationRunner::new(topology, config).run(genomes)
}

fn floor_desc(physics: &PhysicsConfig) -> BodyDesc {
    let (hx, hy) = physics.floor_half_extents;
    let (cx, cy) = physics.floor_center;
    BodyDesc {
        vertices: vec![
            Vec2::new(-hx, hy),
            Vec2::new(hx, hy),
            Vec2::new(hx, -hy),
            Vec2::new(-hx, -hy),
        ],
        position: Vec2::new(cx, cy),
        angle: 0.0,
        dynamic: false,
        category_bits: FLOOR_CATEGORY,
        mask_bits: 0xFFFF,
        density: 0.0,
        friction: physics.friction,
        restitution: physics.restitution,
    }
}
