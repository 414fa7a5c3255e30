//! Ways to run a whole job from one process.

pub mod local;
pub mod sequential;
