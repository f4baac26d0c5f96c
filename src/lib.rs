//! # Torque DAQ Core Library
//!
//! This crate is the core library of the `torque-daq` application: a
//! headless acquisition controller for Phoenix-series torque transducers.
//! It coordinates one acquisition session with the device — connection
//! lifecycle, the scripted configuration sequence, duplicate result
//! filtering, per-error-code recovery, re-arm sequencing between cycles,
//! and a live buffered view of protocol activity.
//!
//! The byte-level wire protocol is owned by the external transducer library
//! and consumed through the [`device::TransducerLink`] trait; no UI is
//! rendered here. Frontends consume the channels the session exposes
//! (status text, warnings, latest sample, log batches).
//!
//! ## Crate Structure
//!
//! - **`config`**: settings loading and the acquisition parameter snapshot,
//!   with named defaults and fallback parsing for user input.
//! - **`device`**: the `TransducerLink` trait, the typed `DeviceEvent`
//!   stream, and a mock link for tests and the demo binary.
//! - **`session`**: the `SessionManager`, owner of the single active device
//!   session and its lifecycle state machine.
//! - **`acquisition`**: the InitRead sequence with its firmware settle
//!   delays, plus standalone start/stop read.
//! - **`dispatch`**: the per-session event loop routing device events to the
//!   components below.
//! - **`dedup`**: suppression of near-duplicate final results.
//! - **`recovery`**: per-error-code counters and recovery policies.
//! - **`rearm`**: single-flight re-arming of the acquisition sequence.
//! - **`protolog`**: protocol log sink, batched delivery queue, and the
//!   rotation-aware file tailer.
//! - **`status`**: status text publication and throttled warnings.
//! - **`error`**: the `DaqError` taxonomy.

pub mod acquisition;
pub mod config;
pub mod dedup;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod protolog;
pub mod rearm;
pub mod recovery;
pub mod session;
pub mod status;

pub use config::{AcquisitionConfig, Settings};
pub use device::{DeviceEvent, TransducerLink};
pub use error::{AcqResult, DaqError};
pub use session::{SessionManager, SessionState};
