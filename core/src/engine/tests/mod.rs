//! Tests for the execution engine
//!
//! Organized by feature area

mod delegation_tests;
mod helpers;
mod kill_tests;
