//! Color math for the ochre brush engine
//!
//! This crate provides the conversions the compositor and brush dynamics
//! rely on:
//! - [`convert`] - HSV/HSL/HCY/RYB conversions and the sRGB power curve
//! - [`spectral`] - RGB to 10-band spectral reflectance and back, used by
//!   the pigment blend modes to mix colors like paint

pub mod convert;
pub mod spectral;

pub use convert::*;
pub use spectral::*;
