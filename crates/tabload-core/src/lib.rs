//! # tabload core
//!
//! Runtime-agnostic logic for tabload: the record model, per-dataset
//! normalization, SQL identifier helpers, the [`Destination`](destination::Destination)
//! abstraction, and the batched loader with partial-failure recovery.
//!
//! This crate contains no tokio, sqlx, or filesystem I/O. The database
//! backends live in the `tabload` crate and implement
//! [`Destination`](destination::Destination).

pub mod destination;
pub mod loader;
pub mod models;
pub mod normalize;
pub mod sql;
