//! `proctor transform`: crop matrices for a single landmark set.

use std::io::Write;

use anyhow::Result;
use proctor_core::alignment::InterocularAligner;
use proctor_core::{FrameSize, GraphOptions, LandmarkSet, SimilarityTransformEstimator};

/// 4×4 texture-space transform mapping crop coordinates into the source frame.
pub fn print_similarity(
    landmarks: &LandmarkSet,
    options: &GraphOptions,
    out: &mut impl Write,
) -> Result<()> {
    let transform = SimilarityTransformEstimator::new().estimate_from_landmarks(
        landmarks,
        options.input_size,
        options.output_size,
    )?;
    for row in transform.as_array().chunks(4) {
        writeln!(
            out,
            "{:>12.6} {:>12.6} {:>12.6} {:>12.6}",
            row[0], row[1], row[2], row[3]
        )?;
    }
    Ok(())
}

/// 2×3 pixel affine from the eye-line aligner.
pub fn print_interocular(
    landmarks: &LandmarkSet,
    input: FrameSize,
    out: &mut impl Write,
) -> Result<()> {
    let m = InterocularAligner::default().align(&landmarks.to_pixels(input))?;
    for r in 0..2 {
        writeln!(
            out,
            "{:>12.6} {:>12.6} {:>12.6}",
            m[(r, 0)],
            m[(r, 1)],
            m[(r, 2)]
        )?;
    }
    Ok(())
}
