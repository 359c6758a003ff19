//! Dynamic-input brush simulator
//!
//! A [`Brush`] turns a time-ordered stream of motion events (position,
//! pressure, tilt, view transform, wall-clock delta) into dabs on a
//! [`ochre_surface::Surface`]. Between each pair of events it interpolates
//! intermediate samples, updates its internal state through low-pass
//! filters, evaluates the per-setting input mappings and emits zero or more
//! dabs.
//!
//! - [`settings`] - the setting/input/state tables
//! - [`mapping`] - piecewise-linear input-to-setting curves
//! - [`smudge`] - smudge buckets and the paint color mixer
//! - [`engine`] - the brush state machine itself
//! - [`load`] - the version-3 JSON settings format

pub mod engine;
pub mod load;
pub mod mapping;
mod math;
pub mod settings;
pub mod smudge;

pub use engine::Brush;
pub use load::BrushLoadError;
pub use mapping::Mapping;
pub use settings::{Input, Setting, State};
