//! Montage Timeline Model
//!
//! Defines the data contracts exchanged between the editor and the export
//! pipeline:
//! - **Clips:** placed source segments with trims, fades, and audio tracks
//! - **Timeline:** the frozen, ordered clip list handed to an export
//! - **Requests:** output geometry, preset, size budget, and quality
//!
//! All times are seconds. The pipeline only ever reads these records.

pub mod clip;
pub mod request;
pub mod timeline;

pub use clip::*;
pub use request::*;
pub use timeline::*;
