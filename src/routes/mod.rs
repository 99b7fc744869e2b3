//! HTTP route handlers.
//!
//! [`health`] serves liveness and cluster info; [`resources`] is the thin
//! list/get/replace/delete surface over the kind registry. [`cluster`] answers
//! namespace and discovery lookups.

pub mod cluster;
pub mod health;
pub mod resources;
