//! # CCD DAQ Core
//!
//! Concurrency core for a GPS-timestamped CCD photometer: a camera worker
//! drives a scientific camera through back-to-back exposures, a timer
//! worker receives trigger timestamps from a GPS-disciplined timer board,
//! and a frame manager pairs each acquired frame with the trigger that
//! initiated its exposure before persisting the result with fully
//! annotated FITS metadata.
//!
//! The on-screen UI, preference store, hardware-vendor camera SDKs beyond
//! the bindings carried here, and the post-processing/preview scripts
//! themselves are external collaborators; this crate specifies and
//! implements only the interfaces they plug into.
//!
//! ## Crate structure
//!
//! - **`config`**: the process-wide `AcquisitionConfig`/`RunMetadata` store,
//!   loaded from TOML plus `DAQ_`-prefixed environment overrides.
//! - **`error`**: the `DaqError` taxonomy shared by every worker.
//! - **`timestamp`**: `TriggerTimestamp`, the GPS wall-clock instant type.
//! - **`frame`**: `CameraFrame` and its geometric transforms.
//! - **`queue`**: the FIFO/condvar primitive every producer-consumer edge
//!   in this crate is built from.
//! - **`camera`**: the `CameraBackend` trait, its three concrete variants
//!   (PVCAM, PICAM, Simulated), and `CameraWorker`.
//! - **`timer`**: the GPS timer wire protocol, its backend trait and
//!   variants, and `TimerWorker`.
//! - **`frame_manager`**: the trigger/frame pairing engine.
//! - **`fits`**: the `FrameEncoder` seam and its `SimpleFitsEncoder`.
//! - **`script_runner`**: coalescing subprocess dispatch for the preview
//!   and reduction scripts.
//! - **`supervisor`**: owns every worker task and drives startup/shutdown.
//! - **`logging`**: the in-memory log ring buffer the UI would read from.
//! - **`console`**: a headless status line standing in for a real UI.

pub mod camera;
pub mod config;
pub mod console;
pub mod error;
pub mod fits;
pub mod frame;
pub mod frame_manager;
pub mod logging;
pub mod queue;
pub mod script_runner;
pub mod supervisor;
pub mod timer;
pub mod timestamp;

pub use error::{DaqError, DaqResult};
