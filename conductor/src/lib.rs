//! Command-line front end and background-controller supervisor for Conductor.

pub mod cli;
pub mod client;
pub mod common;
pub mod controller;
