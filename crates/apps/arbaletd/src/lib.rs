//! Daemon side of an Arbalet mesh node: configuration files, the scripted
//! backend used for bench runs, and the in-process simulation.

pub mod backend;
pub mod config;
pub mod simulation;
