//! Core domain types: jobs, schedules, callables and host facts.

pub mod callable;
pub mod job;
pub mod schedule;
pub mod system;
pub mod types;
