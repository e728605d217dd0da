use nalgebra::{Point2, Point3, Rotation3, Vector2};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Basic pinhole intrinsics of a camera.
///
/// Intrinsics are carried on the camera so that consumers can verify that
/// operations which move cameras around the world (which are purely extrinsic)
/// never touch them.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CameraIntrinsics {
    pub focals: Vector2<f64>,
    pub principal_point: Point2<f64>,
}

impl CameraIntrinsics {
    /// Creates camera intrinsics that would create an identity intrinsic matrix.
    pub fn identity() -> Self {
        Self {
            focals: Vector2::new(1.0, 1.0),
            principal_point: Point2::new(0.0, 0.0),
        }
    }

    #[must_use]
    pub fn focal(self, focal: f64) -> Self {
        Self {
            focals: Vector2::new(focal, focal),
            ..self
        }
    }

    #[must_use]
    pub fn principal_point(self, principal_point: Point2<f64>) -> Self {
        Self {
            principal_point,
            ..self
        }
    }
}

impl Default for CameraIntrinsics {
    fn default() -> Self {
        Self::identity()
    }
}

/// The pose and intrinsics of one camera.
///
/// `position` is the optical center in world coordinates. `orientation` is the
/// camera-to-world rotation, so a bearing in the camera frame is rotated by
/// `orientation` to obtain its world-frame direction. Both are only meaningful
/// while the owning [`View`](crate::View) is estimated.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Camera {
    pub position: Point3<f64>,
    pub orientation: Rotation3<f64>,
    pub intrinsics: CameraIntrinsics,
}

impl Camera {
    pub fn new(
        position: Point3<f64>,
        orientation: Rotation3<f64>,
        intrinsics: CameraIntrinsics,
    ) -> Self {
        Self {
            position,
            orientation,
            intrinsics,
        }
    }

    /// A camera at the given position with identity orientation and intrinsics.
    pub fn at_position(position: Point3<f64>) -> Self {
        Self {
            position,
            orientation: Rotation3::identity(),
            intrinsics: CameraIntrinsics::identity(),
        }
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::at_position(Point3::origin())
    }
}
