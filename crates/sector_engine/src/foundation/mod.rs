//! Foundation: math aliases, the rigid [`math::Transform`] and logging setup
//! shared by the spatial and physics layers

pub mod logging;
pub mod math;
