//! logship-init: the library
//!
//! A minimal init for containers. It runs one command as its only child,
//! forwards every signal it receives to that child, reaps orphaned
//! descendants and streams the child's output over mutual TLS to a
//! collector while mirroring it locally.
//!
//! The binary is implemented with this library, but the library interface is
//! not the focus of the project. **Semver guarantees do _not_ apply to this
//! library.**

#![deny(unsafe_code)]
#![allow(clippy::default_trait_access, clippy::cognitive_complexity)]

#[macro_use]
extern crate log;

pub mod cli;
pub mod config;
pub mod error;
pub mod process;
pub mod relay;
pub mod ringbuffer;
pub mod run;
pub mod shipper;
pub mod signal;

pub use run::run;
