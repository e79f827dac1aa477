//! Text annotations describing a [`ProctorResult`] for an overlay renderer.
//!
//! Positions and font heights are normalised to the frame (0.0..=1.0).
//! Nothing here rasterises; a renderer draws the annotations as given.

use serde::{Deserialize, Serialize};

use crate::result::{ExpressionKind, ProctorResult};

/// Horizontal alignment at or beyond which the subject looks right/left.
pub const HORIZONTAL_LIMIT: f64 = 0.3;
/// Vertical alignment at or above which the subject looks down.
pub const LOOK_DOWN: f64 = 0.6;
/// Vertical alignment at or below which the subject looks up.
pub const LOOK_UP: f64 = -0.05;

const EXPRESSION_LINES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const RED: Rgb = Rgb { r: 255, g: 0, b: 0 };
    pub const GREEN: Rgb = Rgb { r: 0, g: 255, b: 0 };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Orientation {
    Left,
    Right,
    Up,
    Down,
    Neutral,
}

impl Orientation {
    pub fn as_str(self) -> &'static str {
        match self {
            Orientation::Left => "Left",
            Orientation::Right => "Right",
            Orientation::Up => "Up",
            Orientation::Down => "Down",
            Orientation::Neutral => "Neutral",
        }
    }
}

pub fn horizontal_label(horizontal_align: f64) -> Orientation {
    if horizontal_align >= HORIZONTAL_LIMIT {
        Orientation::Right
    } else if horizontal_align <= -HORIZONTAL_LIMIT {
        Orientation::Left
    } else {
        Orientation::Neutral
    }
}

pub fn vertical_label(vertical_align: f64) -> Orientation {
    if vertical_align >= LOOK_DOWN {
        Orientation::Down
    } else if vertical_align <= LOOK_UP {
        Orientation::Up
    } else {
        Orientation::Neutral
    }
}

/// One line of text to draw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub text: String,
    /// `None` leaves the colour to the renderer.
    pub color: Option<Rgb>,
    pub thickness: u32,
    pub font_height: f64,
    pub left: f64,
    pub baseline: f64,
}

fn blink(is_blinking: bool, left: f64) -> Annotation {
    Annotation {
        text: if is_blinking { "Blink" } else { "" }.to_string(),
        color: Some(if is_blinking { Rgb::RED } else { Rgb::GREEN }),
        thickness: 3,
        font_height: 0.03,
        left,
        baseline: 0.25,
    }
}

fn orientation(label: Orientation, left: f64) -> Annotation {
    Annotation {
        text: label.as_str().to_string(),
        color: Some(if label == Orientation::Neutral {
            Rgb::GREEN
        } else {
            Rgb::RED
        }),
        thickness: 4,
        font_height: 0.04,
        left,
        baseline: 0.2,
    }
}

/// `"Happy: 87.00"`; unknown labels are shown as they came.
pub fn expression_text(label: &str, score: f32) -> String {
    let name = ExpressionKind::from_label(label).map_or(label, |kind| kind.display_name());
    format!("{name}: {:.2}", f64::from(score) * 100.0)
}

/// Annotations for one result: two blink flags, two orientation labels and
/// the top expressions.
pub fn annotate(result: &ProctorResult) -> Vec<Annotation> {
    let mut out = vec![
        blink(result.is_left_eye_blinking, 0.08),
        blink(result.is_right_eye_blinking, 0.64),
        orientation(horizontal_label(result.horizontal_align), 0.05),
        orientation(vertical_label(result.vertical_align), 0.6),
    ];

    for (i, expr) in result.expressions.iter().take(EXPRESSION_LINES).enumerate() {
        out.push(Annotation {
            text: expression_text(&expr.label, expr.score),
            color: (i == 0).then_some(Rgb::GREEN),
            thickness: 4,
            font_height: 0.02,
            left: 0.05,
            baseline: 0.3 + 0.1 * i as f64,
        });
    }
    out
}
