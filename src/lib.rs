//! Read-only HTTP API over air-quality measurements and stations stored in
//! Postgres or Supabase.

pub mod configuration;
pub mod error;
pub mod geometry;
pub mod models;
pub mod routes;
pub mod startup;
pub mod store;
