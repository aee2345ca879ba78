//! [`PhysicsWorld`] implementation backed by `rapier2d`.

use std::num::NonZeroUsize;

use rapier2d::prelude::*;

use super::{BodyDesc, PhysicsError, PhysicsWorld, RevoluteJointDesc, Transform};
use crate::schema::Vec2;

/// Damping gain of the velocity motors; the applied torque is capped by the
/// joint's max motor torque.
const MOTOR_RESPONSE: Real = 100.0;

/// A self-contained rapier pipeline with its body, collider and joint sets.
pub struct RapierWorld {
    pipeline: PhysicsPipeline,
    gravity: Vector<Real>,
    integration_parameters: IntegrationParameters,
    island_manager: IslandManager,
    broad_phase: BroadPhaseBvh,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
}

impl RapierWorld {
    /// Empty world with vertical gravity `gravity`.
    pub fn new(gravity: f32) -> Self {
        Self {
            pipeline: PhysicsPipeline::new(),
            gravity: vector![0.0, gravity],
            integration_parameters: IntegrationParameters::default(),
            island_manager: IslandManager::new(),
            broad_phase: BroadPhaseBvh::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
        }
    }

    /// Number of live rigid bodies.
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// Solver and stabilization iteration counts used by the last step.
    pub fn solver_iterations(&self) -> (usize, usize) {
        (
            usize::from(self.integration_parameters.num_solver_iterations),
            self.integration_parameters
                .num_internal_stabilization_iterations,
        )
    }
}

impl PhysicsWorld for RapierWorld {
    type Body = RigidBodyHandle;
    type Joint = ImpulseJointHandle;

    fn create_body(&mut self, desc: &BodyDesc) -> Result<Self::Body, PhysicsError> {
        if desc.vertices.len() < 3 {
            return Err(PhysicsError::InvalidShape(desc.vertices.len()));
        }
        let points: Vec<Point<Real>> = desc.vertices.iter().map(|v| point![v.x, v.y]).collect();
        let collider = ColliderBuilder::convex_hull(&points)
            .ok_or(PhysicsError::InvalidShape(points.len()))?
            .density(desc.density)
            .friction(desc.friction)
            .restitution(desc.restitution)
            .collision_groups(InteractionGroups::new(
                Group::from_bits_truncate(desc.category_bits as u32),
                Group::from_bits_truncate(desc.mask_bits as u32),
            ))
            .build();

        let builder = if desc.dynamic {
            RigidBodyBuilder::dynamic()
        } else {
            RigidBodyBuilder::fixed()
        };
        // Thin parts driven by strong motors must not tunnel through the floor.
        let body = builder
            .translation(vector![desc.position.x, desc.position.y])
            .rotation(desc.angle)
            .ccd_enabled(desc.dynamic)
            .build();

        let handle = self.bodies.insert(body);
        self.colliders
            .insert_with_parent(collider, handle, &mut self.bodies);
        Ok(handle)
    }

    fn create_revolute_joint(
        &mut self,
        desc: &RevoluteJointDesc<Self::Body>,
    ) -> Result<Self::Joint, PhysicsError> {
        for body in [desc.body_a, desc.body_b] {
            if !self.bodies.contains(body) {
                return Err(PhysicsError::UnknownBody(format!("{body:?}")));
            }
        }

        let mut joint = RevoluteJointBuilder::new()
            .local_anchor1(point![desc.anchor_a.x, desc.anchor_a.y])
            .local_anchor2(point![desc.anchor_b.x, desc.anchor_b.y])
            .contacts_enabled(false);
        if let Some((lower, upper)) = desc.limits {
            joint = joint.limits([lower, upper]);
        }
        if desc.enable_motor {
            joint = joint
                .motor_model(MotorModel::ForceBased)
                .motor_velocity(0.0, MOTOR_RESPONSE)
                .motor_max_force(desc.max_motor_torque);
        }

        Ok(self
            .impulse_joints
            .insert(desc.body_a, desc.body_b, joint, true))
    }

    /// Velocity iterations drive rapier's solver iterations (at least one);
    /// position iterations drive its internal stabilization passes.
    fn step(&mut self, dt: f32, velocity_iterations: usize, position_iterations: usize) {
        let params = &mut self.integration_parameters;
        params.dt = dt;
        params.num_solver_iterations = NonZeroUsize::new(velocity_iterations)
            .unwrap_or(NonZeroUsize::MIN)
            .into();
        params.num_internal_stabilization_iterations = position_iterations;
        self.pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            &(),
            &(),
        );
    }

    fn destroy_joint(&mut self, joint: Self::Joint) {
        self.impulse_joints.remove(joint, true);
    }

    fn destroy_body(&mut self, body: Self::Body) {
        self.bodies.remove(
            body,
            &mut self.island_manager,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            true,
        );
    }

    fn set_motor_speed(&mut self, joint: Self::Joint, speed: f32) {
        if let Some(joint) = self.impulse_joints.get_mut(joint, true) {
            joint
                .data
                .set_motor_velocity(JointAxis::AngX, speed, MOTOR_RESPONSE);
        }
    }

    fn body_transform(&self, body: Self::Body) -> Option<Transform> {
        self.bodies.get(body).map(|b| {
            let t = b.translation();
            Transform {
                position: Vec2::new(t.x, t.y),
                angle: b.rotation().angle(),
            }
        })
    }
}
