//! Similarity transforms over structure-from-motion reconstructions.
//!
//! Two reconstructions of the same scene generally disagree by a similarity
//! transform: a rotation, a translation, and a uniform scale (7 degrees of
//! freedom), because monocular SfM recovers structure only up to such a
//! transform. This crate provides the two operations needed to reconcile them:
//!
//! * [`transform_reconstruction`] rewrites every estimated camera pose and
//!   every estimated track of a reconstruction through one
//!   [`SimilarityTransform`], so the whole reconstruction is mapped
//!   consistently by the same rigid-plus-scale map.
//! * [`align_reconstructions`] estimates the best-fit similarity between two
//!   reconstructions that share view/track identifiers and snaps the second
//!   onto the first. The estimator is the closed-form absolute-orientation
//!   solution by Umeyama ("Least-squares estimation of transformation
//!   parameters between two point patterns", TPAMI 1991), exposed directly as
//!   [`align_point_clouds`] for callers that already hold matched points.
//!
//! A robust variant, [`align_reconstructions_robust`], runs the estimator
//! inside a sample-consensus loop so a minority of corrupted correspondences
//! cannot skew the alignment.
//!
//! All operations either fully succeed or leave the target reconstruction
//! untouched; there is no partial application.

use core::ops::Mul;
use log::{debug, info};
use rand::Rng;
use recon_core::{
    nalgebra::{Matrix3, Point3, Rotation3, Vector3, Vector4},
    Reconstruction, WorldPoint,
};
use thiserror::Error;

/// The minimum number of correspondences required for a unique similarity.
///
/// Two points leave the rotation about the axis through them unconstrained;
/// three non-collinear points pin down all 7 degrees of freedom.
pub const MIN_CORRESPONDENCES: usize = 3;

/// Relative singular value threshold below which the cross-covariance is
/// considered rank deficient (collinear or coincident correspondences).
const RANK_EPSILON: f64 = 1e-9;

/// Tolerance used by [`SimilarityTransform::from_matrix`] when checking that a
/// raw matrix is orthonormal with determinant +1.
const ORTHONORMALITY_EPSILON: f64 = 1e-9;

/// The number of minimal samples drawn by [`align_reconstructions_robust`].
const CONSENSUS_ITERATIONS: usize = 128;

/// Failure modes of similarity estimation and alignment.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentError {
    /// The transform parameters violate the similarity contract.
    #[error("invalid similarity transform: {0}")]
    InvalidTransform(&'static str),
    /// Fewer than [`MIN_CORRESPONDENCES`] usable correspondences were found.
    #[error("need at least 3 correspondences, found {found} usable")]
    InsufficientCorrespondences {
        /// How many usable correspondences were actually found.
        found: usize,
    },
    /// The correspondences are collinear or coincident, so no unique rotation
    /// can be recovered from them.
    #[error("correspondences are rank deficient; rotation is not unique")]
    DegenerateConfiguration,
}

/// A rotation, translation and uniform scale relating two world frames.
///
/// Applied to a point as `p' = scale * R * p + translation`. The rotation is
/// carried as a [`Rotation3`], so it is proper (orthonormal, determinant +1)
/// by construction; the constructors only need to validate scale, translation
/// and, for [`SimilarityTransform::from_matrix`], a caller-supplied raw matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityTransform {
    rotation: Rotation3<f64>,
    translation: Vector3<f64>,
    scale: f64,
}

impl SimilarityTransform {
    /// Creates a similarity transform, validating that the scale is positive
    /// and that scale and translation are finite.
    pub fn new(
        rotation: Rotation3<f64>,
        translation: Vector3<f64>,
        scale: f64,
    ) -> Result<Self, AlignmentError> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(AlignmentError::InvalidTransform(
                "scale must be finite and positive",
            ));
        }
        if !translation.iter().all(|c| c.is_finite()) {
            return Err(AlignmentError::InvalidTransform(
                "translation must be finite",
            ));
        }
        Ok(Self {
            rotation,
            translation,
            scale,
        })
    }

    /// Creates a similarity transform from a raw rotation matrix, additionally
    /// validating that the matrix is orthonormal with determinant +1.
    ///
    /// Callers holding raw matrices should prefer this fail-fast path over
    /// [`Rotation3::from_matrix_unchecked`]: an improper matrix smuggled into a
    /// transform would silently shear or mirror the whole reconstruction.
    pub fn from_matrix(
        rotation: Matrix3<f64>,
        translation: Vector3<f64>,
        scale: f64,
    ) -> Result<Self, AlignmentError> {
        let orthonormality = (rotation * rotation.transpose() - Matrix3::identity()).norm();
        if orthonormality > ORTHONORMALITY_EPSILON
            || (rotation.determinant() - 1.0).abs() > ORTHONORMALITY_EPSILON
        {
            return Err(AlignmentError::InvalidTransform(
                "rotation matrix must be orthonormal with determinant +1",
            ));
        }
        Self::new(
            Rotation3::from_matrix_unchecked(rotation),
            translation,
            scale,
        )
    }

    /// The identity transform, which maps every point to itself.
    pub fn identity() -> Self {
        Self {
            rotation: Rotation3::identity(),
            translation: Vector3::zeros(),
            scale: 1.0,
        }
    }

    pub fn rotation(&self) -> Rotation3<f64> {
        self.rotation
    }

    pub fn translation(&self) -> Vector3<f64> {
        self.translation
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Maps a euclidean point through the transform.
    pub fn transform_point(&self, point: Point3<f64>) -> Point3<f64> {
        Point3::from(self.scale * (self.rotation * point.coords) + self.translation)
    }

    /// Maps a homogeneous world point through the transform.
    ///
    /// The stored `w` component is preserved rather than renormalized, so
    /// dehomogenizing the result yields the mapped euclidean point. A point at
    /// infinity (`w == 0`) has its direction rotated and scaled only, since
    /// translation cannot affect it.
    pub fn transform_world_point(&self, point: WorldPoint) -> WorldPoint {
        let h = point.homogeneous();
        if h.w == 0.0 {
            let direction = self.scale * (self.rotation * h.xyz());
            WorldPoint(Vector4::new(direction.x, direction.y, direction.z, 0.0))
        } else {
            let mapped = self.transform_point(Point3::from(h.xyz() / h.w));
            WorldPoint(Vector4::new(
                mapped.x * h.w,
                mapped.y * h.w,
                mapped.z * h.w,
                h.w,
            ))
        }
    }

    /// The transform mapping every output of `self` back to its input.
    #[must_use]
    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.inverse();
        let scale = 1.0 / self.scale;
        let translation = -scale * (rotation * self.translation);
        Self {
            rotation,
            translation,
            scale,
        }
    }
}

impl Mul for SimilarityTransform {
    type Output = SimilarityTransform;

    /// Composes two transforms so that `(a * b).transform_point(p)` equals
    /// `a.transform_point(b.transform_point(p))`.
    fn mul(self, rhs: Self) -> Self {
        Self {
            rotation: self.rotation * rhs.rotation,
            translation: self.scale * (self.rotation * rhs.translation) + self.translation,
            scale: self.scale * rhs.scale,
        }
    }
}

/// Applies one similarity transform to an entire reconstruction in place.
///
/// Every estimated track has its homogeneous point mapped through the
/// transform (preserving its stored `w`, see
/// [`SimilarityTransform::transform_world_point`]), and every estimated view
/// has its camera moved to `scale * R * position + translation` with the
/// world-frame orientation composed on the left as `R * orientation`.
/// Intrinsics are extrinsic-invariant and are never touched. Unestimated views
/// and tracks carry no meaningful geometry yet and are silently skipped.
///
/// The transform parameters are read once and each entity is mapped from its
/// own pre-transform state, so the result does not depend on iteration order.
pub fn transform_reconstruction(transform: &SimilarityTransform, reconstruction: &mut Reconstruction) {
    for (_, track) in reconstruction.tracks_mut() {
        if !track.is_estimated {
            continue;
        }
        track.point = transform.transform_world_point(track.point);
    }
    for (_, view) in reconstruction.views_mut() {
        if !view.is_estimated {
            continue;
        }
        view.camera.position = transform.transform_point(view.camera.position);
        view.camera.orientation = transform.rotation() * view.camera.orientation;
    }
}

/// Estimates the least-squares similarity mapping `source` onto `target`.
///
/// Minimizes `Σ ‖scale * R * source[i] + t - target[i]‖²` in closed form
/// (Umeyama 1991): remove the centroids, take the SVD of the cross-covariance
/// for the rotation, recover scale from the variance ratio and translation
/// from the centroid residual. The SVD reflection ambiguity is resolved by
/// forcing determinant +1, so the result is always a proper rotation.
pub fn align_point_clouds(
    source: &[Point3<f64>],
    target: &[Point3<f64>],
) -> Result<SimilarityTransform, AlignmentError> {
    let weights = vec![1.0; source.len()];
    align_point_clouds_weighted(source, target, &weights)
}

/// Weighted variant of [`align_point_clouds`].
///
/// Minimizes `Σ weights[i] * ‖scale * R * source[i] + t - target[i]‖²`.
/// Weights must be non-negative with a positive sum; a zero weight removes the
/// pair from the estimation entirely, while a negative weight is rejected with
/// [`AlignmentError::InvalidTransform`].
pub fn align_point_clouds_weighted(
    source: &[Point3<f64>],
    target: &[Point3<f64>],
    weights: &[f64],
) -> Result<SimilarityTransform, AlignmentError> {
    let n = source.len().min(target.len()).min(weights.len());
    if n < MIN_CORRESPONDENCES || n != source.len().max(target.len()).max(weights.len()) {
        return Err(AlignmentError::InsufficientCorrespondences { found: n });
    }
    if !weights.iter().all(|&w| w >= 0.0) {
        return Err(AlignmentError::InvalidTransform(
            "weights must be non-negative",
        ));
    }
    let weight_sum: f64 = weights.iter().sum();
    if weight_sum <= 0.0 {
        return Err(AlignmentError::DegenerateConfiguration);
    }

    let mut source_centroid = Vector3::zeros();
    let mut target_centroid = Vector3::zeros();
    for ((s, t), &w) in source.iter().zip(target).zip(weights) {
        source_centroid += w * s.coords;
        target_centroid += w * t.coords;
    }
    source_centroid /= weight_sum;
    target_centroid /= weight_sum;

    // Cross-covariance of the centered point sets and the source variance,
    // from which rotation and scale fall out.
    let mut cross_covariance = Matrix3::zeros();
    let mut source_variance = 0.0;
    for ((s, t), &w) in source.iter().zip(target).zip(weights) {
        let ds = s.coords - source_centroid;
        let dt = t.coords - target_centroid;
        cross_covariance += w * dt * ds.transpose();
        source_variance += w * ds.norm_squared();
    }
    cross_covariance /= weight_sum;
    source_variance /= weight_sum;

    if source_variance <= f64::EPSILON {
        // All source points coincide; no rotation or scale is recoverable.
        return Err(AlignmentError::DegenerateConfiguration);
    }

    let svd = cross_covariance.svd(true, true);
    let u = svd.u.ok_or(AlignmentError::DegenerateConfiguration)?;
    let v_t = svd.v_t.ok_or(AlignmentError::DegenerateConfiguration)?;
    let singular_values = svd.singular_values;

    let largest = singular_values.max();
    let rank = singular_values
        .iter()
        .filter(|&&s| s > largest * RANK_EPSILON)
        .count();
    if largest <= 0.0 || rank < 2 {
        // Collinear (rank 1) or coincident (rank 0) correspondences leave the
        // rotation underdetermined.
        return Err(AlignmentError::DegenerateConfiguration);
    }

    // Resolve the reflection ambiguity on the axis of least variance so the
    // recovered rotation is always proper.
    let mut signs = Vector3::repeat(1.0);
    if u.determinant() * v_t.determinant() < 0.0 {
        signs[singular_values.imin()] = -1.0;
    }

    let rotation =
        Rotation3::from_matrix_unchecked(u * Matrix3::from_diagonal(&signs) * v_t);
    let scale = singular_values.dot(&signs) / source_variance;
    let translation = target_centroid - scale * (rotation * source_centroid);
    debug!(
        "estimated similarity from {} correspondences: scale {}, translation {:?}",
        n, scale, translation
    );

    // Valid by construction: rank >= 2 guarantees a positive trace, hence a
    // positive scale.
    Ok(SimilarityTransform {
        rotation,
        translation,
        scale,
    })
}

/// Collects the (reference, target) euclidean point pairs shared by two
/// reconstructions.
///
/// Tracks estimated in both reconstructions contribute their dehomogenized
/// points and views estimated in both contribute their camera centers, all
/// combined into one equally weighted correspondence set. Tracks at infinity
/// have no euclidean position and are excluded.
fn shared_correspondences(
    reference: &Reconstruction,
    target: &Reconstruction,
) -> (Vec<Point3<f64>>, Vec<Point3<f64>>) {
    let mut reference_points = Vec::new();
    let mut target_points = Vec::new();
    for (id, reference_track) in reference.tracks() {
        if !reference_track.is_estimated {
            continue;
        }
        let target_track = match target.track(id) {
            Some(track) if track.is_estimated => track,
            _ => continue,
        };
        if let (Some(rp), Some(tp)) = (
            reference_track.point.euclidean(),
            target_track.point.euclidean(),
        ) {
            reference_points.push(rp);
            target_points.push(tp);
        }
    }
    for (id, reference_view) in reference.views() {
        if !reference_view.is_estimated {
            continue;
        }
        let target_view = match target.view(id) {
            Some(view) if view.is_estimated => view,
            _ => continue,
        };
        reference_points.push(reference_view.camera.position);
        target_points.push(target_view.camera.position);
    }
    (reference_points, target_points)
}

/// Aligns `target` onto `reference` in place.
///
/// Every identifier whose track (or view) is estimated in both reconstructions
/// contributes a correspondence; the least-squares similarity over the
/// combined track-point and camera-center pairs is estimated with
/// [`align_point_clouds`] and applied to `target` with
/// [`transform_reconstruction`]. Returns the estimated transform.
///
/// On any error, including an empty correspondence set, `target` is left
/// completely unmodified.
pub fn align_reconstructions(
    reference: &Reconstruction,
    target: &mut Reconstruction,
) -> Result<SimilarityTransform, AlignmentError> {
    let (reference_points, target_points) = shared_correspondences(reference, target);
    info!(
        "aligning reconstructions sharing {} estimated correspondences",
        reference_points.len()
    );
    if reference_points.len() < MIN_CORRESPONDENCES {
        return Err(AlignmentError::InsufficientCorrespondences {
            found: reference_points.len(),
        });
    }
    let transform = align_point_clouds(&target_points, &reference_points)?;
    transform_reconstruction(&transform, target);
    Ok(transform)
}

/// Robust variant of [`align_reconstructions`] that tolerates corrupted
/// correspondences.
///
/// Draws random minimal samples of [`MIN_CORRESPONDENCES`] pairs, scores each
/// candidate similarity by how many correspondences land within
/// `error_threshold` of their reference position, and refits the best
/// candidate on its full inlier set before applying it. Use this when some
/// shared tracks or views may be badly estimated in either reconstruction.
///
/// Fails with [`AlignmentError::InsufficientCorrespondences`] when no
/// candidate reaches [`MIN_CORRESPONDENCES`] inliers; `target` is left
/// unmodified on any error.
pub fn align_reconstructions_robust<R: Rng>(
    error_threshold: f64,
    reference: &Reconstruction,
    target: &mut Reconstruction,
    rng: &mut R,
) -> Result<SimilarityTransform, AlignmentError> {
    let (reference_points, target_points) = shared_correspondences(reference, target);
    let n = reference_points.len();
    info!(
        "robustly aligning reconstructions sharing {} estimated correspondences",
        n
    );
    if n < MIN_CORRESPONDENCES {
        return Err(AlignmentError::InsufficientCorrespondences { found: n });
    }

    let inliers_of = |transform: &SimilarityTransform| -> Vec<usize> {
        (0..n)
            .filter(|&i| {
                let mapped = transform.transform_point(target_points[i]);
                (mapped - reference_points[i]).norm() <= error_threshold
            })
            .collect()
    };

    let mut best: Option<(Vec<usize>, SimilarityTransform)> = None;
    let mut most_inliers = 0;
    for iteration in 0..CONSENSUS_ITERATIONS {
        let sample = rand::seq::index::sample(rng, n, MIN_CORRESPONDENCES);
        let sample_targets: Vec<Point3<f64>> =
            sample.iter().map(|i| target_points[i]).collect();
        let sample_references: Vec<Point3<f64>> =
            sample.iter().map(|i| reference_points[i]).collect();
        // Degenerate samples are expected occasionally; just draw again.
        let candidate = match align_point_clouds(&sample_targets, &sample_references) {
            Ok(candidate) => candidate,
            Err(_) => continue,
        };
        let inliers = inliers_of(&candidate);
        most_inliers = most_inliers.max(inliers.len());
        if inliers.len() < MIN_CORRESPONDENCES {
            continue;
        }
        if best
            .as_ref()
            .map(|(best_inliers, _)| inliers.len() > best_inliers.len())
            .unwrap_or(true)
        {
            debug!(
                "consensus iteration {}: candidate with {} of {} inliers",
                iteration,
                inliers.len(),
                n
            );
            let saturated = inliers.len() == n;
            best = Some((inliers, candidate));
            if saturated {
                break;
            }
        }
    }

    let (inliers, candidate) = best.ok_or(AlignmentError::InsufficientCorrespondences {
        found: most_inliers,
    })?;

    // Refit on the full inlier set for a minimum-variance estimate. If the
    // inliers turn out rank deficient, fall back to the minimal-sample fit.
    let inlier_targets: Vec<Point3<f64>> = inliers.iter().map(|&i| target_points[i]).collect();
    let inlier_references: Vec<Point3<f64>> =
        inliers.iter().map(|&i| reference_points[i]).collect();
    let transform =
        align_point_clouds(&inlier_targets, &inlier_references).unwrap_or(candidate);
    info!(
        "robust alignment accepted {} of {} correspondences",
        inliers.len(),
        n
    );
    transform_reconstruction(&transform, target);
    Ok(transform)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn example_transform() -> SimilarityTransform {
        SimilarityTransform::new(
            Rotation3::from_euler_angles(0.1, -0.4, 0.25),
            Vector3::new(1.0, -2.0, 0.5),
            1.75,
        )
        .unwrap()
    }

    fn example_points() -> Vec<Point3<f64>> {
        vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 2.0, 0.0),
            Point3::new(-1.0, 0.5, 3.0),
            Point3::new(2.0, -1.0, 1.0),
        ]
    }

    #[test]
    fn rejects_non_positive_or_non_finite_scale() {
        for scale in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let result =
                SimilarityTransform::new(Rotation3::identity(), Vector3::zeros(), scale);
            assert_eq!(
                result,
                Err(AlignmentError::InvalidTransform(
                    "scale must be finite and positive"
                ))
            );
        }
    }

    #[test]
    fn rejects_improper_rotation_matrices() {
        // Scaled matrix: not orthonormal.
        assert!(matches!(
            SimilarityTransform::from_matrix(
                Matrix3::identity() * 2.0,
                Vector3::zeros(),
                1.0
            ),
            Err(AlignmentError::InvalidTransform(_))
        ));
        // Reflection: orthonormal but determinant -1.
        let mirror = Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, -1.0));
        assert!(matches!(
            SimilarityTransform::from_matrix(mirror, Vector3::zeros(), 1.0),
            Err(AlignmentError::InvalidTransform(_))
        ));
        // A genuine rotation passes.
        let rotation = Rotation3::from_euler_angles(0.3, 0.2, 0.1);
        assert!(SimilarityTransform::from_matrix(
            rotation.into_inner(),
            Vector3::new(1.0, 2.0, 3.0),
            0.5
        )
        .is_ok());
    }

    #[test]
    fn inverse_and_composition_cancel() {
        let transform = example_transform();
        let identity = transform * transform.inverse();
        let point = Point3::new(0.3, -1.2, 2.5);
        assert_relative_eq!(
            identity.transform_point(point),
            point,
            epsilon = 1e-12
        );
        assert_relative_eq!(identity.scale(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn umeyama_recovers_exact_similarity() {
        let transform = example_transform();
        let source = example_points();
        let target: Vec<Point3<f64>> =
            source.iter().map(|&p| transform.transform_point(p)).collect();

        let estimated = align_point_clouds(&source, &target).unwrap();
        assert_relative_eq!(estimated.scale(), transform.scale(), epsilon = 1e-10);
        assert_relative_eq!(
            estimated.translation(),
            transform.translation(),
            epsilon = 1e-10
        );
        assert_relative_eq!(estimated.rotation(), transform.rotation(), epsilon = 1e-10);
    }

    #[test]
    fn umeyama_never_returns_a_reflection() {
        // Mirrored targets cannot be reached by any proper similarity, but the
        // estimator must still produce a proper rotation rather than a
        // reflection.
        let source = example_points();
        let target: Vec<Point3<f64>> = source
            .iter()
            .map(|p| Point3::new(p.x, p.y, -p.z))
            .collect();
        let estimated = align_point_clouds(&source, &target).unwrap();
        assert_relative_eq!(
            estimated.rotation().matrix().determinant(),
            1.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn umeyama_rejects_degenerate_configurations() {
        // Collinear.
        let line: Vec<Point3<f64>> =
            (0..5).map(|i| Point3::new(i as f64, 0.0, 0.0)).collect();
        assert_eq!(
            align_point_clouds(&line, &line),
            Err(AlignmentError::DegenerateConfiguration)
        );
        // Coincident.
        let heap = vec![Point3::new(1.0, 1.0, 1.0); 4];
        assert_eq!(
            align_point_clouds(&heap, &heap),
            Err(AlignmentError::DegenerateConfiguration)
        );
        // Too few.
        let pair = vec![Point3::origin(), Point3::new(1.0, 0.0, 0.0)];
        assert_eq!(
            align_point_clouds(&pair, &pair),
            Err(AlignmentError::InsufficientCorrespondences { found: 2 })
        );
    }

    #[test]
    fn zero_weight_removes_an_outlier() {
        let transform = example_transform();
        let source = example_points();
        let mut target: Vec<Point3<f64>> =
            source.iter().map(|&p| transform.transform_point(p)).collect();
        // Corrupt one pair, then weight it out.
        target[2] = Point3::new(100.0, -50.0, 3.0);
        let mut weights = vec![1.0; source.len()];
        weights[2] = 0.0;

        let estimated = align_point_clouds_weighted(&source, &target, &weights).unwrap();
        assert_relative_eq!(estimated.scale(), transform.scale(), epsilon = 1e-10);
        assert_relative_eq!(
            estimated.translation(),
            transform.translation(),
            epsilon = 1e-10
        );
    }

    #[test]
    fn rejects_negative_weights() {
        let source = example_points();
        let mut weights = vec![1.0; source.len()];
        weights[1] = -0.5;
        assert_eq!(
            align_point_clouds_weighted(&source, &source, &weights),
            Err(AlignmentError::InvalidTransform(
                "weights must be non-negative"
            ))
        );
    }

    #[test]
    fn homogeneous_mapping_preserves_stored_w() {
        let transform = example_transform();
        let point = WorldPoint(Vector4::new(2.0, -4.0, 6.0, 2.0));
        let mapped = transform.transform_world_point(point);
        assert_eq!(mapped.homogeneous().w, 2.0);
        assert_relative_eq!(
            mapped.euclidean().unwrap(),
            transform.transform_point(point.euclidean().unwrap()),
            epsilon = 1e-12
        );
    }
}
