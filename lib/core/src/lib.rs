//! Core types shared by every nodeflow crate.
//!
//! This crate provides strongly-typed identifiers and the rootcause-based
//! `Result` alias used at application boundaries.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{
    CredentialId, ExecutionId, Id, IdKind, MessageId, ParseIdError, UserId, WorkflowId,
};
