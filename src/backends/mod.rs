// SPDX-License-Identifier: GPL-3.0-only

//! Backend abstraction layer for camera capture
//!
//! - [`camera`]: Frame source trait, frame types and source implementations

pub mod camera;
