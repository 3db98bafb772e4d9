//! Whole-system scenarios driving [`PhysicsSystem`](super::PhysicsSystem)
//! through several steps

mod scenarios;
