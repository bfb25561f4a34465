//! Step definitions for scheduling BDD scenarios.

pub mod world;

mod given;
mod then;
mod when;
