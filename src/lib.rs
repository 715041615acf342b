#![forbid(unsafe_code)]

//! kerasjs: Keras `.keras` archive to TensorFlow.js layers-model converter.
//!
//! Library entry point exposing the conversion API. The binary (`main.rs`)
//! is a thin wrapper that runs [`pipeline::convert`] with the default paths.

pub mod config;
pub mod error;
pub mod formats;
pub mod h5;
pub mod layers;
pub mod model;
pub mod pipeline;
pub mod topology;
