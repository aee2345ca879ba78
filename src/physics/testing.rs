//! Deterministic physics double for tests.
//!
//! There is no gravity and no collision. Each step, every joint pushes both
//! of its (dynamic) bodies forward along x by `motor speed * dt`, so a genome
//! that outputs a steady positive signal walks and a silent one stands still.

use std::collections::BTreeMap;

use super::{BodyDesc, PhysicsError, PhysicsWorld, RevoluteJointDesc, Transform};
use crate::schema::Vec2;

#[derive(Debug, Clone)]
struct ScriptedBody {
    transform: Transform,
    dynamic: bool,
}

#[derive(Debug, Clone)]
struct ScriptedJoint {
    body_a: u32,
    body_b: u32,
    speed: f32,
}

#[derive(Debug, Default)]
pub(crate) struct ScriptedWorld {
    bodies: BTreeMap<u32, ScriptedBody>,
    joints: BTreeMap<u32, ScriptedJoint>,
    next_id: u32,
    pub(crate) steps: u64,
    /// Reject joint creation once this many joints exist.
    pub(crate) joint_limit: Option<usize>,
}

impl ScriptedWorld {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Teleport a body.
    pub(crate) fn set_body_position(&mut self, body: u32, position: Vec2) {
        if let Some(b) = self.bodies.get_mut(&body) {
            b.transform.position = position;
        }
    }

    pub(crate) fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub(crate) fn joint_count(&self) -> usize {
        self.joints.len()
    }

    fn next(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }
}

impl PhysicsWorld for ScriptedWorld {
    type Body = u32;
    type Joint = u32;

    fn create_body(&mut self, desc: &BodyDesc) -> Result<u32, PhysicsError> {
        if desc.vertices.len() < 3 {
            return Err(PhysicsError::InvalidShape(desc.vertices.len()));
        }
        let id = self.next();
        self.bodies.insert(
            id,
            ScriptedBody {
                transform: Transform {
                    position: desc.position,
                    angle: desc.angle,
                },
                dynamic: desc.dynamic,
            },
        );
        Ok(id)
    }

    fn create_revolute_joint(&mut self, desc: &RevoluteJointDesc<u32>) -> Result<u32, PhysicsError> {
        for body in [desc.body_a, desc.body_b] {
            if !self.bodies.contains_key(&body) {
                return Err(PhysicsError::UnknownBody(body.to_string()));
            }
        }
        if self.joint_limit.is_some_and(|limit| self.joints.len() >= limit) {
            return Err(PhysicsError::UnknownBody(desc.body_b.to_string()));
        }
        let id = self.next();
        self.joints.insert(
            id,
            ScriptedJoint {
                body_a: desc.body_a,
                body_b: desc.body_b,
                speed: 0.0,
            },
        );
        Ok(id)
    }

    fn step(&mut self, dt: f32, _velocity_iterations: usize, _position_iterations: usize) {
        self.steps += 1;
        for joint in self.joints.values() {
            for id in [joint.body_a, joint.body_b] {
                if let Some(body) = self.bodies.get_mut(&id).filter(|b| b.dynamic) {
                    body.transform.position.x += joint.speed * dt;
                }
            }
        }
    }

    fn destroy_joint(&mut self, joint: u32) {
        self.joints.remove(&joint);
    }

    fn destroy_body(&mut self, body: u32) {
        self.bodies.remove(&body);
        self.joints
            .retain(|_, j| j.body_a != body && j.body_b != body);
    }

    fn set_motor_speed(&mut self, joint: u32, speed: f32) {
        if let Some(j) = self.joints.get_mut(&joint) {
            j.speed = speed;
        }
    }

    fn body_transform(&self, body: u32) -> Option<Transform> {
        self.bodies.get(&body).map(|b| b.transform)
    }
}
