//
// main.rs
// Dicom-Courier-rs
//
// Tokio entry point that hands off execution to the CLI layer.
//
// Dicom-Courier-rs contributors - October 2026

use dicom_courier::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::run().await
}
