//! Face alignment transforms for the crop/warp stage.
//!
//! [`SimilarityTransformEstimator`] fits the five canonical facial points of
//! a detected face onto the 112×112 reference face used by the identity and
//! expression models, then expresses the result as a 4×4 matrix in texture
//! coordinates. The warp stage samples with it: a point in `[0, 1]` of the
//! output crop maps to a point in `[0, 1]` of the input frame.
//!
//! [`InterocularAligner`] is the eye-line alternative: level the eyes,
//! scale to a fixed interocular distance and centre the face.

use nalgebra::{Matrix2x3, Matrix4, Point2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry;
use crate::landmarks::{
    FrameSize, LandmarkError, LandmarkSet, LEFT_IRIS, MOUTH_LEFT, MOUTH_RIGHT, NOSE_TIP,
    RIGHT_IRIS,
};

/// Side length of the reference face space, in pixels.
pub const REFERENCE_SIZE: FrameSize = FrameSize::new(112, 112);

/// Canonical five-point face in [`REFERENCE_SIZE`] pixels:
/// left eye, right eye, nose tip, left mouth corner, right mouth corner.
pub const REFERENCE_FACE: [[f64; 2]; 5] = [
    [38.294_599_53, 51.696_300_51],
    [73.531_799_32, 51.501_399_99],
    [56.025_199_89, 71.736_602_78],
    [41.549_301_15, 92.365_501_4],
    [70.729_900_36, 92.204_101_56],
];

/// Left eye contour used by the interocular aligner (33 is weighted twice).
pub const LEFT_EYE_CONTOUR: [usize; 16] = [
    7, 33, 33, 144, 145, 153, 154, 155, 157, 158, 159, 160, 161, 163, 173, 246,
];
/// Right eye contour used by the interocular aligner (263 is weighted twice).
pub const RIGHT_EYE_CONTOUR: [usize; 16] = [
    249, 263, 263, 373, 374, 380, 381, 382, 384, 385, 386, 387, 388, 390, 398, 466,
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AlignError {
    #[error("singular matrix while composing the {stage} transform")]
    SingularTransform { stage: &'static str },
    #[error(transparent)]
    Landmark(#[from] LandmarkError),
}

/// Row-major homogeneous transform handed to the warp stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transform4x4(pub [f32; 16]);

impl Transform4x4 {
    pub fn identity() -> Self {
        Self::from_matrix(&Matrix4::identity())
    }

    pub fn from_matrix(m: &Matrix4<f64>) -> Self {
        Self(geometry::to_row_major(m))
    }

    pub fn to_matrix(&self) -> Matrix4<f64> {
        geometry::from_row_major(&self.0)
    }

    pub fn as_array(&self) -> &[f32; 16] {
        &self.0
    }

    /// Map an output texture coordinate to an input texture coordinate.
    pub fn apply(&self, u: f64, v: f64) -> (f64, f64) {
        let p = geometry::apply_homogeneous(&self.to_matrix(), Point2::new(u, v));
        (p.x, p.y)
    }

    /// Largest absolute element-wise difference to `other`.
    pub fn max_abs_diff(&self, other: &Transform4x4) -> f32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f32::max)
    }
}

/// Five canonical points of a face in absolute input pixels.
///
/// Eye centres average the iris contours; nose and mouth corners are single
/// landmarks.
pub fn five_points(
    landmarks: &LandmarkSet,
    input: FrameSize,
) -> Result<[Point2<f64>; 5], LandmarkError> {
    let (w, h) = (f64::from(input.width), f64::from(input.height));
    let px = |(x, y): (f64, f64)| Point2::new(x * w, y * h);
    let single = |index: usize| -> Result<Point2<f64>, LandmarkError> {
        let p = landmarks.get(index)?;
        Ok(px((f64::from(p.x), f64::from(p.y))))
    };

    Ok([
        px(landmarks.centroid_xy(&LEFT_IRIS)?),
        px(landmarks.centroid_xy(&RIGHT_IRIS)?),
        single(NOSE_TIP)?,
        single(MOUTH_LEFT)?,
        single(MOUTH_RIGHT)?,
    ])
}

/// Compose a dst→src pixel transform with the texture normalizations:
/// `to_input_texture · transform · to_output_texture⁻¹`.
///
/// Every matrix involved is inverted explicitly; a singular one (e.g. a
/// zero-sized frame) is an error, never an identity fallback.
pub fn compose_normalized(
    dst_to_src: &Matrix4<f64>,
    input: FrameSize,
    output: FrameSize,
) -> Result<Matrix4<f64>, AlignError> {
    let to_input_texture = pixel_to_texture(input, "input normalization")?;
    let to_output_texture = pixel_to_texture(output, "output normalization")?;
    let from_output_texture =
        to_output_texture
            .try_inverse()
            .ok_or(AlignError::SingularTransform {
                stage: "output normalization",
            })?;
    Ok(to_input_texture * dst_to_src * from_output_texture)
}

/// Scale from absolute pixels of `size` into `[0, 1]` texture space.
fn pixel_to_texture(size: FrameSize, stage: &'static str) -> Result<Matrix4<f64>, AlignError> {
    geometry::scale_xy(f64::from(size.width), f64::from(size.height))
        .try_inverse()
        .ok_or(AlignError::SingularTransform { stage })
}

/// Estimates the crop transform aligning a detected face to a reference face.
#[derive(Debug, Clone)]
pub struct SimilarityTransformEstimator {
    reference: [Point2<f64>; 5],
}

impl Default for SimilarityTransformEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl SimilarityTransformEstimator {
    /// Estimator targeting [`REFERENCE_FACE`].
    pub fn new() -> Self {
        Self::with_reference(REFERENCE_FACE)
    }

    pub fn with_reference(reference: [[f64; 2]; 5]) -> Self {
        Self {
            reference: reference.map(|[x, y]| Point2::new(x, y)),
        }
    }

    pub fn reference(&self) -> &[Point2<f64>; 5] {
        &self.reference
    }

    /// Transform for five detected points given in absolute input pixels.
    pub fn estimate(
        &self,
        detected: &[Point2<f64>; 5],
        input: FrameSize,
        output: FrameSize,
    ) -> Result<Transform4x4, AlignError> {
        let src_to_ref = geometry::umeyama(detected, &self.reference).ok_or(
            AlignError::SingularTransform {
                stage: "similarity",
            },
        )?;

        // The sampler walks output pixels, so it needs reference → detected.
        let ref_to_src = geometry::affine_to_homogeneous(&src_to_ref)
            .try_inverse()
            .ok_or(AlignError::SingularTransform {
                stage: "similarity",
            })?;

        let composed = compose_normalized(&ref_to_src, input, output)?;
        Ok(Transform4x4::from_matrix(&composed))
    }

    /// Transform for a normalized landmark set.
    pub fn estimate_from_landmarks(
        &self,
        landmarks: &LandmarkSet,
        input: FrameSize,
        output: FrameSize,
    ) -> Result<Transform4x4, AlignError> {
        let detected = five_points(landmarks, input)?;
        self.estimate(&detected, input, output)
    }
}

/// Eye-line alignment: level the eyes, fix the interocular distance and put
/// the eye midpoint at `face_center` (fractions of `size`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterocularAligner {
    pub desired_distance: f64,
    pub face_center: (f64, f64),
    pub size: FrameSize,
}

impl Default for InterocularAligner {
    fn default() -> Self {
        Self {
            desired_distance: 44.0,
            face_center: (0.5, 0.4),
            size: FrameSize::new(224, 224),
        }
    }
}

impl InterocularAligner {
    /// 2×3 affine matrix (src → dst pixels) for landmarks already expressed
    /// in pixels of a `size`-d crop.
    pub fn align(&self, landmarks_px: &LandmarkSet) -> Result<Matrix2x3<f64>, AlignError> {
        let (lx, ly) = landmarks_px.centroid_xy(&LEFT_EYE_CONTOUR)?;
        let (rx, ry) = landmarks_px.centroid_xy(&RIGHT_EYE_CONTOUR)?;

        let distance = ((rx - lx).powi(2) + (ry - ly).powi(2)).sqrt();
        if distance <= f64::EPSILON {
            return Err(AlignError::SingularTransform {
                stage: "interocular",
            });
        }

        let center = Point2::new(((lx + rx) / 2.0).floor(), ((ly + ry) / 2.0).floor());
        let angle = (ly - ry).atan2(lx - rx).to_degrees() - 180.0;
        let scale = self.desired_distance / distance;

        let mut m = geometry::rotation_about(center, angle, scale);
        let target_x = f64::from(self.size.width) * self.face_center.0;
        let target_y = f64::from(self.size.height) * self.face_center.1;
        m[(0, 2)] += target_x - center.x;
        m[(1, 2)] += target_y - center.y;
        Ok(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::{Landmark, NUM_LANDMARKS_WITH_IRISES};

    /// Helper: a 478-point set whose five canonical points sit at `points`
    /// (normalized). Everything else stays at the origin.
    fn landmarks_with_face(points: [[f64; 2]; 5]) -> LandmarkSet {
        let mut set = vec![Landmark::default(); NUM_LANDMARKS_WITH_IRISES];
        let at = |[x, y]: [f64; 2]| Landmark::new(x as f32, y as f32, 0.0);
        for i in LEFT_IRIS {
            set[i] = at(points[0]);
        }
        for i in RIGHT_IRIS {
            set[i] = at(points[1]);
        }
        set[NOSE_TIP] = at(points[2]);
        set[MOUTH_LEFT] = at(points[3]);
        set[MOUTH_RIGHT] = at(points[4]);
        LandmarkSet::new(set)
    }

    fn normalized_reference() -> [[f64; 2]; 5] {
        REFERENCE_FACE.map(|[x, y]| [x / 112.0, y / 112.0])
    }

    #[test]
    fn test_reference_face_yields_identity() {
        let est = SimilarityTransformEstimator::new();
        let lm = landmarks_with_face(normalized_reference());
        let t = est
            .estimate_from_landmarks(&lm, REFERENCE_SIZE, REFERENCE_SIZE)
            .unwrap();
        assert!(
            t.max_abs_diff(&Transform4x4::identity()) < 1e-4,
            "not identity: {:?}",
            t
        );
    }

    #[test]
    fn test_maps_output_texture_onto_detected_face() {
        // Detected face = reference rotated by 12°, scaled 3x and shifted,
        // inside a 640x480 frame.
        let input = FrameSize::new(640, 480);
        let s = geometry::rotation_about(Point2::new(56.0, 56.0), 12.0, 3.0);
        let mut shifted = s;
        shifted[(0, 2)] += 200.0;
        shifted[(1, 2)] += 100.0;
        let detected: [Point2<f64>; 5] = REFERENCE_FACE
            .map(|[x, y]| geometry::apply_affine(&shifted, Point2::new(x, y)));

        let est = SimilarityTransformEstimator::new();
        let t = est.estimate(&detected, input, REFERENCE_SIZE).unwrap();

        for (r, d) in REFERENCE_FACE.iter().zip(detected.iter()) {
            let (u, v) = t.apply(r[0] / 112.0, r[1] / 112.0);
            assert!((u - d.x / 640.0).abs() < 1e-5, "u {u} vs {}", d.x / 640.0);
            assert!((v - d.y / 480.0).abs() < 1e-5, "v {v} vs {}", d.y / 480.0);
        }
    }

    #[test]
    fn test_normalization_order_matters() {
        let input = FrameSize::new(640, 480);
        let output = FrameSize::new(112, 96);
        let s = geometry::affine_to_homogeneous(&geometry::rotation_about(
            Point2::new(10.0, 10.0),
            7.0,
            1.5,
        ));

        let correct = compose_normalized(&s, input, output).unwrap();

        // Same matrices, normalizations swapped onto the wrong sides.
        let to_in = geometry::scale_xy(640.0, 480.0).try_inverse().unwrap();
        let to_out = geometry::scale_xy(112.0, 96.0).try_inverse().unwrap();
        let swapped = to_out.try_inverse().unwrap() * s * to_in;

        let a = Transform4x4::from_matrix(&correct);
        let b = Transform4x4::from_matrix(&swapped);
        assert!(a.max_abs_diff(&b) > 1e-3);

        // The correct order maps the output texture corner onto the input
        // texture position of the output corner pixel.
        let corner = geometry::apply_homogeneous(&s, Point2::new(112.0, 96.0));
        let (u, v) = a.apply(1.0, 1.0);
        assert!((u - corner.x / 640.0).abs() < 1e-5);
        assert!((v - corner.y / 480.0).abs() < 1e-5);
    }

    #[test]
    fn test_zero_frame_size_is_singular() {
        let est = SimilarityTransformEstimator::new();
        let lm = landmarks_with_face(normalized_reference());
        let err = est
            .estimate_from_landmarks(&lm, FrameSize::new(0, 480), REFERENCE_SIZE)
            .unwrap_err();
        assert!(matches!(err, AlignError::SingularTransform { .. }));

        let err = est
            .estimate_from_landmarks(&lm, FrameSize::new(640, 480), FrameSize::new(112, 0))
            .unwrap_err();
        assert_eq!(
            err,
            AlignError::SingularTransform {
                stage: "output normalization"
            }
        );
    }

    #[test]
    fn test_collapsed_face_is_singular() {
        let est = SimilarityTransformEstimator::new();
        let detected = [Point2::new(10.0, 10.0); 5];
        let err = est
            .estimate(&detected, FrameSize::new(640, 480), REFERENCE_SIZE)
            .unwrap_err();
        assert_eq!(
            err,
            AlignError::SingularTransform {
                stage: "similarity"
            }
        );
    }

    #[test]
    fn test_missing_landmarks() {
        let est = SimilarityTransformEstimator::new();
        let short = LandmarkSet::new(vec![Landmark::default(); 468]);
        let err = est
            .estimate_from_landmarks(&short, FrameSize::new(640, 480), REFERENCE_SIZE)
            .unwrap_err();
        assert!(matches!(
            err,
            AlignError::Landmark(LandmarkError::MissingLandmark { index: 469, .. })
        ));
    }

    #[test]
    fn test_five_points_average_iris() {
        let mut lm = landmarks_with_face(normalized_reference());
        // Spread the left iris around its centre; the mean must not move.
        lm.points[469].x += 0.01;
        lm.points[471].x -= 0.01;
        let pts = five_points(&lm, FrameSize::new(112, 112)).unwrap();
        assert!((pts[0].x - REFERENCE_FACE[0][0]).abs() < 1e-3);
        assert!((pts[2].y - REFERENCE_FACE[2][1]).abs() < 1e-3);
    }

    fn eyes_at(left: (f32, f32), right: (f32, f32)) -> LandmarkSet {
        let mut set = vec![Landmark::default(); NUM_LANDMARKS_WITH_IRISES];
        for i in LEFT_EYE_CONTOUR {
            set[i] = Landmark::new(left.0, left.1, 0.0);
        }
        for i in RIGHT_EYE_CONTOUR {
            set[i] = Landmark::new(right.0, right.1, 0.0);
        }
        LandmarkSet::new(set)
    }

    #[test]
    fn test_interocular_level_eyes() {
        let aligner = InterocularAligner::default();
        let m = aligner.align(&eyes_at((60.0, 100.0), (100.0, 100.0))).unwrap();

        // Eye midpoint lands on the face centre of the 224x224 crop.
        let mid = geometry::apply_affine(&m, Point2::new(80.0, 100.0));
        assert!((mid.x - 112.0).abs() < 1e-9);
        assert!((mid.y - 89.6).abs() < 1e-9);

        // Eyes end up 44 px apart.
        let l = geometry::apply_affine(&m, Point2::new(60.0, 100.0));
        let r = geometry::apply_affine(&m, Point2::new(100.0, 100.0));
        assert!(((r.x - l.x).hypot(r.y - l.y) - 44.0).abs() < 1e-9);
        assert!((l.y - r.y).abs() < 1e-9);
    }

    #[test]
    fn test_interocular_tilted_eyes_levelled() {
        let aligner = InterocularAligner::default();
        let left = (60.0f32, 90.0f32);
        let right = (100.0f32, 110.0f32);
        let m = aligner.align(&eyes_at(left, right)).unwrap();
        let l = geometry::apply_affine(&m, Point2::new(60.0, 90.0));
        let r = geometry::apply_affine(&m, Point2::new(100.0, 110.0));
        assert!((l.y - r.y).abs() < 1e-9);
        assert!(((r.x - l.x).hypot(r.y - l.y) - 44.0).abs() < 1e-9);
    }

    #[test]
    fn test_interocular_coincident_eyes() {
        let aligner = InterocularAligner::default();
        let err = aligner.align(&eyes_at((80.0, 80.0), (80.0, 80.0))).unwrap_err();
        assert!(matches!(err, AlignError::SingularTransform { .. }));
    }
}
