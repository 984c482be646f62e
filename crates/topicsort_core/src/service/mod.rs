//! Categorization use-case services.
//!
//! # Responsibility
//! - Orchestrate store, oracle and engine calls into use-case level APIs.
//! - Keep transport layers decoupled from storage and oracle details.

pub mod categorize_service;
pub mod coordinator;
pub mod error;
pub mod quick;
