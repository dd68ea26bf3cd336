//! Image job processor
//!
//! Accepts a job describing a source image and a list of output commands
//! (resize, crop, flip/rotate plus a target filename), runs every command
//! concurrently against a shared decoded source, and reports a single
//! succeeded/failed outcome for the whole job. Each job keeps an append-only
//! progress log next to its outputs.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
