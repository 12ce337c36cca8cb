// SPDX-License-Identifier: GPL-3.0-only

//! Frame processing pipelines
//!
//! ```text
//! ┌──────────────┐     ┌───────────────────┐     ┌──────────────────┐
//! │ Frame Source │ ──▶ │  Capture Session  │ ──▶ │  Scan Dispatcher │
//! │ (dual-eye)   │     │  - Fisheye remap  │     │  - BACK region   │
//! │              │     │  - GRAY8 / RGBA   │     │  - FRONT region  │
//! └──────────────┘     └───────────────────┘     └──────────────────┘
//! ```
//!
//! - [`capture`]: Owns the frame source and hands corrected frames to one listener
//! - [`scan`]: Decodes both lens regions of every frame and stops on the first hit

pub mod capture;
pub mod scan;
