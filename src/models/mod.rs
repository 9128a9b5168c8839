//! Core data models for the share service.
//!
//! `Share` is the transport value handed to clients, `ShareRecord` is the
//! persisted metadata row, and `Session` carries a caller's ownership record.

pub mod record;
pub mod session;
pub mod share;
