//! Container types for structure-from-motion reconstructions.
//!
//! A [`Reconstruction`] is a set of [`View`]s (camera observation instances) and
//! [`Track`]s (reconstructed 3d structure) keyed by stable identifiers. Views and
//! tracks start out unestimated; an SfM pipeline marks them estimated once it has
//! computed a meaningful pose or position for them. Algorithm crates operate on
//! reconstructions purely through this container, so the geometry of one
//! reconstruction can be reconciled with another without knowing how either was
//! built.
//!
//! Identifier values are meaningful across reconstructions: two reconstructions
//! that observed the same scene can assign the same [`ViewId`]/[`TrackId`] to the
//! same underlying entity, which is what allows one reconstruction to be aligned
//! onto another by matching identifiers.

mod camera;
mod point;
mod reconstruction;

pub use camera::*;
pub use nalgebra;
pub use point::*;
pub use reconstruction::*;
