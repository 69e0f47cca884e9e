//
// lib.rs
// Dicom-Courier-rs
//
// Exposes the crate's modules and re-exports the CLI entry point for both binary and library consumers.
//
// Dicom-Courier-rs contributors - October 2026

pub mod batch;
pub mod builder;
pub mod capture;
pub mod cli;
pub mod client;
pub mod codec;
pub mod config;
pub mod dataset;
pub mod error;
pub mod inspect;
pub mod models;
pub mod queue;
pub mod storage;
pub mod uid;
pub mod web;

pub use cli::{run as run_cli, Cli, Commands};
