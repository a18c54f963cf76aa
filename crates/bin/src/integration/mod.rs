//! Integration module for the debias CLI.
//!
//! File loading for calibration data, requests and models, plus the
//! on-disk embedding cache location.

pub(crate) mod cache_manager;
pub(crate) mod io;
