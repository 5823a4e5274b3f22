//! Core use-case services.
//!
//! # Responsibility
//! - Compose repository calls into transactional use cases.
//! - Keep callers away from SQL and raw driver errors.

pub mod signing_keys;
pub mod user_directory;
