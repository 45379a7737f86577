//! # Autodidact Core
//!
//! Shared, runtime-free logic for Autodidact: the content schema, the
//! canonical shapes that generated curricula are normalized into, and the
//! order-index arithmetic used when growing the topic hierarchy.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem dependencies.
//! Persistence and the generative backend live in the `autodidact` crate.

pub mod models;
pub mod ordering;
pub mod payload;
