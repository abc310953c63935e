//! Raw FFI bindings to the Photometrics PVCAM SDK.
//!
//! This crate intentionally carries no safe wrapper: [`crate::camera::pvcam`]
//! in the main crate owns all safety invariants and is the only consumer.
//! Without the `pvcam-sdk` feature (and a `PVCAM_SDK_DIR` pointing at an
//! installed SDK) this crate compiles to an empty shim so the workspace
//! builds on machines without the vendor SDK present.

#![allow(non_camel_case_types, non_snake_case, non_upper_case_globals)]

include!(concat!(env!("OUT_DIR"), "/bindings.rs"));
