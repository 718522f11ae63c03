//! # Attendance tracker backend
//!
//! Web service for a children's program attendance tracker. The heart of the
//! crate is the bulk-export pipeline: request validation, per-user rate
//! limiting, a pre-flight cardinality check, and a backpressure-aware batched
//! CSV stream with RFC 4180 escaping.

pub mod auth;
pub mod config;
pub mod domain;
pub mod error;
pub mod rest;
pub mod storage;
