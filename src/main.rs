#![forbid(unsafe_code)]

//! kerasjs binary: converts `asl_model.keras` into `./public/tfjs_model`.
//!
//! Takes no arguments. Diagnostics go to stderr and are controlled by
//! `RUST_LOG`; stdout carries only the success message.

use kerasjs::config::ConverterConfig;
use kerasjs::pipeline;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    pipeline::convert(&ConverterConfig::default())?;
    println!("Model converted successfully!");
    Ok(())
}
