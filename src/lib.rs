//! Programmatic grader for student Python submissions
//!
//! [`validators::dispatch`] is the engine entry point: it analyses the
//! submission, screens it, runs the exercise's validation strategy and
//! always answers with a [`core::ValidationVerdict`].

pub mod analysis;
pub mod config;
pub mod core;
pub mod engine;
pub mod grader;
pub mod jobs;
pub mod redis_manager;
pub mod rules;
pub mod runner;
pub mod store;
pub mod template;
pub mod validators;

pub use crate::core::{GradeError, ValidationVerdict};
pub use grader::Grader;
pub use validators::{dispatch, Submission};
