//! Subsystem modules for the swarm.

pub mod agents;
pub mod commands;
pub mod comms;
pub mod entities;
pub mod memory;
pub mod runtime;
