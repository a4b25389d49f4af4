//! Discrete-event simulator of a shared wireless channel for sensor nodes
//! carrying CC2420-style radios.

pub mod common;
pub mod radio;
pub mod simulation;
