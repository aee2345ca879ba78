//! Narrow rigid-body physics boundary.
//!
//! The simulation core only needs to create bodies and motorised revolute
//! joints, advance the integrator, destroy what it created and read body
//! transforms back. [`PhysicsWorld`] captures exactly that surface;
//! [`RapierWorld`] implements it on top of `rapier2d`.

mod rapier;
#[cfg(test)]
pub(crate) mod testing;

pub use rapier::RapierWorld;

use crate::schema::Vec2;

/// Collision category of ragdoll parts.
pub const AGENT_CATEGORY: u16 = 0x0002;
/// Collision category of the floor.
pub const FLOOR_CATEGORY: u16 = 0x0001;

/// Position and orientation of a body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec2,
    /// Radians, counter-clockwise.
    pub angle: f32,
}

/// Everything needed to create one rigid body with a single convex collider.
#[derive(Debug, Clone)]
pub struct BodyDesc {
    /// Convex polygon in the body's local frame.
    pub vertices: Vec<Vec2>,
    pub position: Vec2,
    pub angle: f32,
    pub dynamic: bool,
    pub category_bits: u16,
    pub mask_bits: u16,
    pub density: f32,
    pub friction: f32,
    pub restitution: f32,
}

/// A motorised revolute joint between two existing bodies.
#[derive(Debug, Clone)]
pub struct RevoluteJointDesc<B> {
    pub body_a: B,
    pub body_b: B,
    /// Anchor in `body_a`'s local frame.
    pub anchor_a: Vec2,
    /// Anchor in `body_b`'s local frame.
    pub anchor_b: Vec2,
    pub enable_motor: bool,
    pub max_motor_torque: f32,
    /// `(lower, upper)` bounds on `angle(body_b) - angle(body_a)`, in radians.
    pub limits: Option<(f32, f32)>,
}

/// Physics backend errors.
#[derive(Debug, thiserror::Error)]
pub enum PhysicsError {
    #[error("Cannot build a convex collider from {0} vertices")]
    InvalidShape(usize),
    #[error("Body {0} does not exist")]
    UnknownBody(String),
}

/// Rigid-body world consumed by the simulation core.
pub trait PhysicsWorld {
    type Body: Copy + Eq + std::fmt::Debug;
    type Joint: Copy + Eq + std::fmt::Debug;

    fn create_body(&mut self, desc: &BodyDesc) -> Result<Self::Body, PhysicsError>;

    fn create_revolute_joint(
        &mut self,
        desc: &RevoluteJointDesc<Self::Body>,
    ) -> Result<Self::Joint, PhysicsError>;

    /// Advance the world by `dt` seconds.
    fn step(&mut self, dt: f32, velocity_iterations: usize, position_iterations: usize);

    fn destroy_joint(&mut self, joint: Self::Joint);

    /// Remove a body with its collider and any joints still attached to it.
    fn destroy_body(&mut self, body: Self::Body);

    /// Set a joint motor's target angular velocity (rad/s).
    fn set_motor_speed(&mut self, joint: Self::Joint, speed: f32);

    /// Current transform, or `None` once the body is destroyed.
    fn body_transform(&self, body: Self::Body) -> Option<Transform>;
}
