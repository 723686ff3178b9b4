//! `facturo-api` — HTTP boundary.

pub mod app;
