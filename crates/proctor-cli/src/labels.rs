//! `proctor labels`: overlay text for result records, one line per result.

use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use proctor_core::overlay::{self, Annotation};
use proctor_core::wire::OutputRecord;
use proctor_core::ProctorResult;

/// `33000us  left: Blink  right: -  Right/Neutral  Happy: 87.00 | Sad: 5.00`
pub fn format_result(result: &ProctorResult) -> String {
    let annotations = overlay::annotate(result);
    let text = |a: &Annotation| {
        if a.text.is_empty() {
            "-".to_string()
        } else {
            a.text.clone()
        }
    };
    let expressions: Vec<String> = annotations[4..].iter().map(text).collect();
    format!(
        "{}  left: {}  right: {}  {}/{}  {}",
        result.timestamp,
        text(&annotations[0]),
        text(&annotations[1]),
        annotations[2].text,
        annotations[3].text,
        expressions.join(" | ")
    )
}

/// Print a label line for every result record; other records are skipped.
pub fn run(input: impl BufRead, out: &mut impl Write) -> Result<u64> {
    let mut printed = 0;
    for (n, line) in input.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: OutputRecord = serde_json::from_str(&line)
            .with_context(|| format!("line {} is not an output record", n + 1))?;
        if let OutputRecord::Result(result) = record {
            writeln!(out, "{}", format_result(&result))?;
            printed += 1;
        }
    }
    Ok(printed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proctor_core::wire;
    use proctor_core::{Classification, Timestamp, Transform4x4, EMBEDDING_DIM};
    use std::io::Cursor;

    fn result() -> ProctorResult {
        ProctorResult {
            timestamp: Timestamp(33000),
            is_left_eye_blinking: true,
            is_right_eye_blinking: false,
            horizontal_align: 0.4,
            vertical_align: 0.1,
            facial_activity: 0.0,
            face_movement: 0.0,
            embedding: vec![0.0; EMBEDDING_DIM],
            expressions: vec![
                Classification::new("happy", 0.87),
                Classification::new("sad", 0.05),
            ],
        }
    }

    #[test]
    fn test_format_result() {
        assert_eq!(
            format_result(&result()),
            "33000us  left: Blink  right: -  Right/Neutral  Happy: 87.00 | Sad: 5.00"
        );
    }

    #[test]
    fn test_skips_transform_records() {
        let lines = [
            wire::to_line(&OutputRecord::Transform {
                timestamp: Timestamp(33000),
                matrix: Transform4x4::identity(),
            })
            .unwrap(),
            wire::to_line(&OutputRecord::Result(result())).unwrap(),
        ]
        .join("\n");
        let mut out: Vec<u8> = Vec::new();
        assert_eq!(run(Cursor::new(lines), &mut out).unwrap(), 1);
        assert!(String::from_utf8(out).unwrap().starts_with("33000us  left: Blink"));
    }

    #[test]
    fn test_rejects_garbage() {
        let mut out: Vec<u8> = Vec::new();
        assert!(run(Cursor::new("{}"), &mut out).is_err());
    }
}
