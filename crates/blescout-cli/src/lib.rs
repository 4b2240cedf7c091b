//! # blescout-cli
//!
//! Command line front end for blescout.
//!
//! This library wires configuration, logging and a scan backend into a
//! running coordinator for the `blescout` binary.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod app;
pub mod logging;
pub mod simulate;
