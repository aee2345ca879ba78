//! Instantiating a [`BodyTopology`] inside a physics world.

use std::collections::BTreeMap;

use crate::physics::{AGENT_CATEGORY, BodyDesc, PhysicsError, PhysicsWorld, RevoluteJointDesc};
use crate::schema::{BodyTopology, PhysicsConfig, Vec2};

/// World-space placement of one part at spawn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub position: Vec2,
    pub angle: f32,
}

/// Compute spawn placements for every part, root first.
///
/// The root sits at the topology's initial position with angle 0. Each child
/// is positioned so that its joint anchors coincide; limited joints add the
/// pose offset (radians) for that joint, if any, to the child's angle.
pub fn place_parts(
    topology: &BodyTopology,
    pose: Option<&BTreeMap<String, f32>>,
) -> BTreeMap<String, Placement> {
    let mut placed = BTreeMap::new();
    placed.insert(
        topology.root().to_string(),
        Placement {
            position: topology.initial_position(),
            angle: 0.0,
        },
    );

    // Root-first joint order is the worklist: a parent is always placed
    // before any of its children are visited.
    for joint in topology.joints_root_first() {
        let Some(&parent) = placed.get(&joint.parent) else {
            continue;
        };
        let offset = match (joint.limits, pose) {
            (Some(_), Some(pose)) => pose.get(&joint.id).copied().unwrap_or(0.0),
            _ => 0.0,
        };
        let angle = parent.angle + offset;
        let position = parent.position + joint.anchor_parent.rotate(parent.angle)
            - joint.anchor_child.rotate(angle);
        placed.insert(joint.child.clone(), Placement { position, angle });
    }
    placed
}

/// The physical bodies and joints of one spawned ragdoll.
pub struct Ragdoll<W: PhysicsWorld> {
    pub parts: BTreeMap<String, W::Body>,
    pub joints: BTreeMap<String, W::Joint>,
}

impl<W: PhysicsWorld> Ragdoll<W> {
    /// Create every part and joint of `topology` in `world`.
    ///
    /// On failure, whatever was already created is removed again.
    pub fn spawn(
        world: &mut W,
        topology: &BodyTopology,
        pose: Option<&BTreeMap<String, f32>>,
        physics: &PhysicsConfig,
    ) -> Result<Self, PhysicsError> {
        let mut ragdoll = Self {
            parts: BTreeMap::new(),
            joints: BTreeMap::new(),
        };
        match ragdoll.build(world, topology, pose, physics) {
            Ok(()) => Ok(ragdoll),
            Err(e) => {
                ragdoll.destroy(world);
                Err(e)
            }
        }
    }

    fn build(
        &mut self,
        world: &mut W,
        topology: &BodyTopology,
        pose: Option<&BTreeMap<String, f32>>,
        physics: &PhysicsConfig,
    ) -> Result<(), PhysicsError> {
        let mask_bits = if physics.agents_collide {
            0xFFFF
        } else {
            0xFFFF & !AGENT_CATEGORY
        };

        for (id, placement) in &place_parts(topology, pose) {
            let Some(def) = topology.part(id) else {
                continue;
            };
            let body = world.create_body(&BodyDesc {
                vertices: def.vertices.clone(),
                position: placement.position,
                angle: placement.angle,
                dynamic: true,
                category_bits: AGENT_CATEGORY,
                mask_bits,
                density: physics.density,
                friction: physics.friction,
                restitution: physics.restitution,
            })?;
            self.parts.insert(id.clone(), body);
        }

        for joint in topology.joints_root_first() {
            let (Some(&body_a), Some(&body_b)) =
                (self.parts.get(&joint.parent), self.parts.get(&joint.child))
            else {
                return Err(PhysicsError::UnknownBody(joint.id.clone()));
            };
            let handle = world.create_revolute_joint(&RevoluteJointDesc {
                body_a,
                body_b,
                anchor_a: joint.anchor_parent,
                anchor_b: joint.anchor_child,
                enable_motor: true,
                max_motor_torque: physics.max_motor_torque,
                limits: joint.limits.map(|l| (l.min, l.max)),
            })?;
            self.joints.insert(joint.id.clone(), handle);
        }
        Ok(())
    }

    /// Release joints, then bodies.
    pub fn destroy(self, world: &mut W) {
        for joint in self.joints.into_values() {
            world.destroy_joint(joint);
        }
        for body in self.parts.into_values() {
            world.destroy_body(body);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::testing::ScriptedWorld;
    use crate::schema::body::tests::two_joint_body;

    fn approx(a: Vec2, b: Vec2) -> bool {
        (a.x - b.x).abs() < 1e-5 && (a.y - b.y).abs() < 1e-5
    }

    #[test]
    fn test_place_parts_aligns_anchors() {
        let body = two_joint_body();
        let placed = place_parts(&body, None);
        assert_eq!(placed.len(), 3);
        assert_eq!(placed["torso"].position, Vec2::new(0.0, 2.0));
        // torso anchor (0.1, -0.5) meets leg anchor (0, 0.4)
        assert!(approx(placed["leg_f"].position, Vec2::new(0.1, 1.1)));
        assert!(approx(placed["leg_b"].position, Vec2::new(-0.1, 1.1)));
        assert_eq!(placed["leg_f"].angle, 0.0);
    }

    #[test]
    fn test_pose_offset_rotates_child() {
        let body = two_joint_body();
        let angle = std::f32::consts::FRAC_PI_2;
        let pose = BTreeMap::from([("torso-leg_f".to_string(), angle)]);
        let placed = place_parts(&body, Some(&pose));

        let leg = placed["leg_f"];
        assert_eq!(leg.angle, angle);
        // The child anchor rotated by 90 degrees is (-0.4, 0).
        assert!(approx(leg.position, Vec2::new(0.5, 1.5)));
        assert_eq!(placed["leg_b"].angle, 0.0);
    }

    #[test]
    fn test_spawn_and_destroy_release_everything() {
        let body = two_joint_body();
        let mut world = ScriptedWorld::new();
        let ragdoll = Ragdoll::spawn(&mut world, &body, None, &PhysicsConfig::default()).unwrap();
        assert_eq!(ragdoll.parts.len(), 3);
        assert_eq!(ragdoll.joints.len(), 2);
        assert_eq!(world.body_count(), 3);
        assert_eq!(world.joint_count(), 2);

        let leg = ragdoll.parts["leg_f"];
        ragdoll.destroy(&mut world);
        assert_eq!(world.body_count(), 0);
        assert_eq!(world.joint_count(), 0);
        assert!(world.body_transform(leg).is_none());
    }

    #[test]
    fn test_failed_spawn_leaves_world_empty() {
        let body = two_joint_body();
        let mut world = ScriptedWorld::new();
        world.joint_limit = Some(1);

        let result = Ragdoll::spawn(&mut world, &body, None, &PhysicsConfig::default());
        assert!(result.is_err());
        assert_eq!(world.body_count(), 0);
        assert_eq!(world.joint_count(), 0);
    }
}
