//! Head orientation from standardized landmarks.

use serde::{Deserialize, Serialize};

use crate::landmarks::{LandmarkError, LandmarkSet, NOSE_TIP};

/// Orientation of the face, 0.0 being neutral on both axes.
///
/// `horizontal_align`: positive is right, negative is left.
/// `vertical_align`: positive is down, negative is up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OrientationVector {
    pub horizontal_align: f64,
    pub vertical_align: f64,
}

/// Read the reference landmark's x/y straight into the two axes.
pub fn extract(landmarks: &LandmarkSet) -> Result<OrientationVector, LandmarkError> {
    let reference = landmarks.get(NOSE_TIP)?;
    Ok(OrientationVector {
        horizontal_align: f64::from(reference.x),
        vertical_align: f64::from(reference.y),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::Landmark;

    #[test]
    fn test_reads_reference_landmark() {
        let set = LandmarkSet::new(vec![
            Landmark::new(9.0, 9.0, 9.0),
            Landmark::new(0.25, -0.5, 0.1),
            Landmark::new(7.0, 7.0, 7.0),
        ]);
        let o = extract(&set).unwrap();
        assert_eq!(o.horizontal_align, 0.25);
        assert_eq!(o.vertical_align, -0.5);
    }

    #[test]
    fn test_missing_reference_landmark() {
        let set = LandmarkSet::new(vec![Landmark::default()]);
        assert_eq!(
            extract(&set).unwrap_err(),
            LandmarkError::MissingLandmark { index: 1, len: 1 }
        );
    }
}
