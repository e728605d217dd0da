use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use nalgebra::{Point3, Vector3, Vector4};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// A reconstructed 3d point in homogeneous world coordinates.
///
/// No constraints are put on the stored vector. It is not normalized, and any
/// nonzero multiple of it describes the same euclidean point. A zero `w`
/// component describes a point at infinity, which has a direction but no
/// finite position.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct WorldPoint(pub Vector4<f64>);

impl WorldPoint {
    /// Retrieve the homogeneous vector.
    pub fn homogeneous(self) -> Vector4<f64> {
        self.0
    }

    /// Retrieve the euclidean 3d point by normalizing the homogeneous coordinate.
    ///
    /// This fails for a point at infinity (`w == 0`), which has no finite
    /// euclidean position.
    pub fn euclidean(self) -> Option<Point3<f64>> {
        Point3::from_homogeneous(self.0)
    }

    /// Convert a euclidean 3d point into homogeneous coordinates with `w = 1`.
    pub fn from_euclidean(point: Point3<f64>) -> Self {
        point.to_homogeneous().into()
    }

    /// The direction component of the point, without normalization.
    pub fn direction(self) -> Vector3<f64> {
        self.0.xyz()
    }

    /// Whether this point lies at infinity (`w == 0`).
    pub fn is_at_infinity(self) -> bool {
        self.0.w == 0.0
    }
}
