//! # dcc-intercept-layer
//!
//! Runtime error interception for programs built by dcc. Linked into the
//! user's program as a static library, it catches fatal signals and sanitizer
//! reports, records what happened in the environment and hands the process
//! to the external diagnostic tool, then makes sure it terminates.
//!
//! ## Fault-context rules
//! Everything under `fault`, `dispatch` and `escalate` runs inside a signal
//! handler or a sanitizer callback:
//! - log with `dcc_debug!`/`dcc_warn!`, never `eprintln!`
//! - never return into the faulting code; every path ends in `escalate::terminate`
//! - `setenv` and process spawning are used anyway and may misbehave on a
//!   corrupted heap
//!
//! ## Linking
//! Build with the `interpose` feature, plus one way of taking over `main`:
//! - `wrap-main`: link the program with `-Wl,--wrap=main`
//! - `ifdef-main`: compile the program with `-Dmain=__real_main`
//!
//! The constructor lives in `.init_array`, so the archive must be linked with
//! `--whole-archive` unless the exported main pulls it in.

// Allow unsafe FFI functions without safety docs - these are inherently unsafe C ABI
#![allow(clippy::missing_safety_doc)]

// Macros must be defined before modules that use them
#[macro_use]
pub mod macros;

pub mod config;
pub mod dispatch;
pub mod entry;
pub mod error;
pub mod escalate;
pub mod fault;
pub mod identity;
#[cfg(feature = "interpose")]
pub mod interpose;
pub mod poison;
pub mod relay;
pub mod sanitizer;
pub mod signals;
pub mod supervisor;
pub mod tool;

pub use dispatch::{explain_error, FaultHost, LiveHost};
pub use error::{LayerError, Result};
pub use relay::{DiagKey, DiagnosticRecord, EnvRelay, Relay};
pub use sanitizer::{SanitizerApi, UbReport};
