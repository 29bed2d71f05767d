//! # surveyq
//!
//! Work-leasing and assignment engine for a survey-operations platform.
//!
//! Routes completed interviews to QC reviewers and respondent contacts to
//! CATI interviewers: one worker per item at a time, under eligibility
//! filters, priority ordering, AC partitioning and lease expiry.

pub mod clock;
pub mod config;
pub mod db;
pub mod eligibility;
pub mod engine;
pub mod error;
pub mod model;
pub mod provider;
pub mod store;
pub mod telemetry;
