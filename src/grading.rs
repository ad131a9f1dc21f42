use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Grade {
    #[serde(rename = "A+")]
    APlus,
    A,
    #[serde(rename = "B+")]
    BPlus,
    B,
    #[serde(rename = "C+")]
    CPlus,
    C,
    D,
    S,
    F,
}

impl Grade {
    pub fn as_str(self) -> &'static str {
        match self {
            Grade::APlus => "A+",
            Grade::A => "A",
            Grade::BPlus => "B+",
            Grade::B => "B",
            Grade::CPlus => "C+",
            Grade::C => "C",
            Grade::D => "D",
            Grade::S => "S",
            Grade::F => "F",
        }
    }
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive lower bounds, highest first. Anything below the last bound is `F`.
const STANDARD_THRESHOLDS: &[(f64, Grade)] = &[
    (75.0, Grade::A),
    (65.0, Grade::B),
    (50.0, Grade::C),
    (35.0, Grade::S),
];

const EXTENDED_THRESHOLDS: &[(f64, Grade)] = &[
    (90.0, Grade::APlus),
    (80.0, Grade::A),
    (70.0, Grade::BPlus),
    (60.0, Grade::B),
    (50.0, Grade::CPlus),
    (40.0, Grade::C),
    (35.0, Grade::D),
];

/// Named grading policy. `Standard` (A/B/C/S/F, pass at 35) is the canonical scale;
/// `Extended` is the plus/minus scale some schools report with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GradeScale {
    #[default]
    Standard,
    Extended,
}

impl GradeScale {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Some(Self::Standard),
            "extended" => Some(Self::Extended),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Extended => "extended",
        }
    }

    fn thresholds(self) -> &'static [(f64, Grade)] {
        match self {
            Self::Standard => STANDARD_THRESHOLDS,
            Self::Extended => EXTENDED_THRESHOLDS,
        }
    }

    /// Map a percentage in `[0, 100]` to a grade. Out-of-range or non-finite input is
    /// a caller error and is rejected, never clamped.
    pub fn classify(self, percentage: f64) -> EngineResult<Grade> {
        if !percentage.is_finite() || !(0.0..=100.0).contains(&percentage) {
            return Err(EngineError::validation_with(
                "percentage must be within 0..=100",
                json!({ "percentage": percentage.to_string() }),
            ));
        }
        let grade = self
            .thresholds()
            .iter()
            .find(|(lower, _)| percentage >= *lower)
            .map(|(_, g)| *g)
            .unwrap_or(Grade::F);
        Ok(grade)
    }
}

/// Classify against the canonical scale.
#[cfg(test)]
pub fn grade(percentage: f64) -> EngineResult<Grade> {
    GradeScale::Standard.classify(percentage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn standard_boundaries_are_inclusive_on_lower_bound() {
        assert_eq!(grade(100.0).unwrap(), Grade::A);
        assert_eq!(grade(75.0).unwrap(), Grade::A);
        assert_eq!(grade(74.999).unwrap(), Grade::B);
        assert_eq!(grade(65.0).unwrap(), Grade::B);
        assert_eq!(grade(64.999).unwrap(), Grade::C);
        assert_eq!(grade(50.0).unwrap(), Grade::C);
        assert_eq!(grade(49.999).unwrap(), Grade::S);
        assert_eq!(grade(35.0).unwrap(), Grade::S);
        assert_eq!(grade(34.999).unwrap(), Grade::F);
        assert_eq!(grade(0.0).unwrap(), Grade::F);
    }

    #[test]
    fn extended_scale_has_its_own_cut_points() {
        let s = GradeScale::Extended;
        assert_eq!(s.classify(90.0).unwrap(), Grade::APlus);
        assert_eq!(s.classify(89.9).unwrap(), Grade::A);
        assert_eq!(s.classify(70.0).unwrap(), Grade::BPlus);
        assert_eq!(s.classify(59.5).unwrap(), Grade::CPlus);
        assert_eq!(s.classify(40.0).unwrap(), Grade::C);
        assert_eq!(s.classify(35.0).unwrap(), Grade::D);
        assert_eq!(s.classify(34.0).unwrap(), Grade::F);
    }

    #[test]
    fn out_of_range_input_is_rejected() {
        for bad in [-0.001, 100.001, f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let e = grade(bad).unwrap_err();
            assert_eq!(e.code(), "validation_error", "input {bad}");
        }
    }

    #[test]
    fn scale_names_parse_case_insensitively() {
        assert_eq!(GradeScale::parse("Extended"), Some(GradeScale::Extended));
        assert_eq!(GradeScale::parse(" standard "), Some(GradeScale::Standard));
        assert_eq!(GradeScale::parse("letters"), None);
    }

    #[test]
    fn grades_serialize_as_letters() {
        assert_eq!(serde_json::to_string(&Grade::APlus).unwrap(), "\"A+\"");
        assert_eq!(serde_json::to_string(&Grade::S).unwrap(), "\"S\"");
    }

    proptest! {
        #[test]
        fn standard_scale_is_total_over_percent_range(p in 0.0f64..=100.0) {
            let g = grade(p).unwrap();
            prop_assert!(matches!(g, Grade::A | Grade::B | Grade::C | Grade::S | Grade::F));
            prop_assert_eq!(grade(p).unwrap(), g);
        }

        #[test]
        fn grades_never_improve_as_percentage_drops(a in 0.0f64..=100.0, b in 0.0f64..=100.0) {
            let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
            let rank = |g: Grade| STANDARD_THRESHOLDS.iter().position(|(_, t)| *t == g).unwrap_or(STANDARD_THRESHOLDS.len());
            prop_assert!(rank(grade(hi).unwrap()) <= rank(grade(lo).unwrap()));
        }
    }
}
