//! Structural pattern extraction: scale ratio, explicit height, version, pose.
//!
//! Patterns run over each normalized path segment with separators folded to
//! spaces, so `Elf_32mm_v2` and `Elf 32 mm v2` read the same.

use crate::model::{Field, FieldValue, WarningCode};
use regex::Regex;
use std::sync::OnceLock;

struct StructuralPatterns {
    scale: Regex,
    height: Regex,
    version: Regex,
    pose: Regex,
}

fn patterns() -> &'static StructuralPatterns {
    static PATTERNS: OnceLock<StructuralPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| StructuralPatterns {
        scale: Regex::new(r"\b1(?::| )(\d{1,3})\b").expect("valid pattern"),
        height: Regex::new(r"\b(\d{2,3}) ?mm\b").expect("valid pattern"),
        version: Regex::new(r"\b(?:v|ver|version) ?(\d{1,3})\b").expect("valid pattern"),
        pose: Regex::new(r"\bpose(?:([0-9]{1,2})| ([a-h]))\b").expect("valid pattern"),
    })
}

/// Every match of one structural sub-field, in path order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructuralMatches {
    pub field: Option<Field>,
    pub values: Vec<FieldValue>,
    /// Matched text pieces, for provenance and token consumption.
    pub tokens: Vec<String>,
}

impl StructuralMatches {
    fn push(&mut self, value: FieldValue, text: &str) {
        self.values.push(value);
        for piece in text.split(' ').filter(|p| !p.is_empty()) {
            if !self.tokens.iter().any(|t| t == piece) {
                self.tokens.push(piece.to_string());
            }
        }
    }

    /// Distinct values, first occurrence order.
    pub fn distinct(&self) -> Vec<FieldValue> {
        let mut out: Vec<FieldValue> = Vec::new();
        for v in &self.values {
            if !out.contains(v) {
                out.push(v.clone());
            }
        }
        out
    }
}

pub const STRUCTURAL_FIELDS: [(Field, WarningCode); 4] = [
    (Field::ScaleRatio, WarningCode::ScaleRatioConflict),
    (Field::HeightMm, WarningCode::HeightMmConflict),
    (Field::VersionNum, WarningCode::VersionConflict),
    (Field::PoseCode, WarningCode::PoseConflict),
];

fn fold_separators(segment: &str) -> String {
    let spaced: String = segment
        .chars()
        .map(|c| if c.is_alphanumeric() || c == ':' { c } else { ' ' })
        .collect();
    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extract every structural match from the normalized segments.
///
/// Returns one [`StructuralMatches`] per entry of [`STRUCTURAL_FIELDS`].
pub fn extract(
    normalized_segments: &[String],
    scale_range: (u32, u32),
) -> [StructuralMatches; 4] {
    let p = patterns();
    let mut out: [StructuralMatches; 4] = Default::default();
    for (slot, (field, _)) in out.iter_mut().zip(STRUCTURAL_FIELDS) {
        slot.field = Some(field);
    }

    for segment in normalized_segments {
        let text = fold_separators(segment);

        for caps in p.scale.captures_iter(&text) {
            if let Ok(n) = caps[1].parse::<u32>() {
                if (scale_range.0..=scale_range.1).contains(&n) {
                    out[0].push(FieldValue::Number(n), &caps[0]);
                }
            }
        }
        for caps in p.height.captures_iter(&text) {
            if let Ok(n) = caps[1].parse::<u32>() {
                out[1].push(FieldValue::Number(n), &caps[0]);
            }
        }
        for caps in p.version.captures_iter(&text) {
            if let Ok(n) = caps[1].parse::<u32>() {
                out[2].push(FieldValue::Number(n), &caps[0]);
            }
        }
        for caps in p.pose.captures_iter(&text) {
            if let Some(code) = caps.get(1).or_else(|| caps.get(2)) {
                out[3].push(FieldValue::text(code.as_str()), &caps[0]);
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(segments: &[&str]) -> [StructuralMatches; 4] {
        let segments: Vec<String> = segments.iter().map(|s| s.to_lowercase()).collect();
        extract(&segments, (4, 120))
    }

    #[test]
    fn patterns_compile() {
        let p = patterns();
        assert!(p.scale.is_match("bust 1:10"));
        assert!(p.height.is_match("32 mm"));
        assert!(p.version.is_match("ver 3"));
        assert!(p.pose.is_match("pose b"));
    }

    #[test]
    fn reads_height_and_version() {
        let m = run(&["ghamakminiatures", "elf_archer_32mm_v2_split_presupported"]);
        assert!(m[0].values.is_empty());
        assert_eq!(m[1].distinct(), vec![FieldValue::Number(32)]);
        assert_eq!(m[2].distinct(), vec![FieldValue::Number(2)]);
        assert_eq!(m[1].tokens, vec!["32mm"]);
    }

    #[test]
    fn scale_ratio_forms() {
        assert_eq!(run(&["bust 1:10"])[0].distinct(), vec![FieldValue::Number(10)]);
        assert_eq!(run(&["bust_1_12"])[0].distinct(), vec![FieldValue::Number(12)]);
        assert_eq!(run(&["bust-1-24"])[0].distinct(), vec![FieldValue::Number(24)]);
        // Out of range denominators are part numbers, not scales.
        assert!(run(&["arm_1_2"])[0].values.is_empty());
    }

    #[test]
    fn version_forms() {
        assert_eq!(run(&["knight_ver3"])[2].distinct(), vec![FieldValue::Number(3)]);
        assert_eq!(run(&["knight version 4"])[2].distinct(), vec![FieldValue::Number(4)]);
        assert!(run(&["vanguard"])[2].values.is_empty());
    }

    #[test]
    fn pose_codes() {
        assert_eq!(run(&["archer_pose2"])[3].distinct(), vec![FieldValue::text("2")]);
        assert_eq!(run(&["archer pose b"])[3].distinct(), vec![FieldValue::text("b")]);
        assert!(run(&["posed_archer"])[3].values.is_empty());
    }

    #[test]
    fn conflicting_matches_are_all_kept() {
        let m = run(&["archer_v1", "archer_v2"]);
        assert_eq!(
            m[2].distinct(),
            vec![FieldValue::Number(1), FieldValue::Number(2)]
        );
    }
}
