//! Host-native compatibility layer for Arduino sketches.
//!
//! [`NativeShimProvisioner`] writes a fixed, versioned set of C/C++ sources
//! into a project's library path so sketches written against the Arduino core
//! API link and run on the build host. Sketches that use FastLED get a
//! reduced set ([`ShimMode::FastLed`]) because FastLED declares much of that
//! API itself. [`wrapper`] detects the mode and generates the `main()` entry
//! point that drives a sketch's `setup()` and `loop()`.

#![warn(missing_docs)]

pub mod error;
pub mod provision;
pub mod wrapper;

pub use error::ShimError;
pub use provision::{
    NativeShimProvisioner, ProvisionReport, ShimFile, ShimMode, FASTLED_SHIM_FILES, SHIM_DIR, SHIM_FILES, SHIM_VERSION,
};
pub use wrapper::{detect_shim_mode, sketch_wrapper, uses_fastled, write_sketch_wrapper, WRAPPER_FILE};
