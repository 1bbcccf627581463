//! Grade tables and conversions.
//!
//! Every grade system maps onto one normalized integer scale (roughly
//! "Font grade x 100") so ascents logged in different systems sort together.

use crate::GradeSystem::{self, Font, French, VScale, Yds};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GradeDefinition {
    pub grade: &'static str,
    pub system: GradeSystem,
    pub numeric: i32,
}

const fn g(grade: &'static str, system: GradeSystem, numeric: i32) -> GradeDefinition {
    GradeDefinition {
        grade,
        system,
        numeric,
    }
}

pub const FONT_GRADES: &[GradeDefinition] = &[
    g("3", Font, 300),
    g("4", Font, 400),
    g("4+", Font, 450),
    g("5", Font, 500),
    g("5+", Font, 550),
    g("6A", Font, 600),
    g("6A+", Font, 617),
    g("6B", Font, 633),
    g("6B+", Font, 650),
    g("6C", Font, 667),
    g("6C+", Font, 683),
    g("7A", Font, 700),
    g("7A+", Font, 717),
    g("7B", Font, 733),
    g("7B+", Font, 750),
    g("7C", Font, 767),
    g("7C+", Font, 783),
    g("8A", Font, 800),
    g("8A+", Font, 817),
    g("8B", Font, 833),
    g("8B+", Font, 850),
    g("8C", Font, 867),
    g("8C+", Font, 883),
    g("9A", Font, 900),
];

pub const FRENCH_GRADES: &[GradeDefinition] = &[
    g("4a", French, 400),
    g("4b", French, 433),
    g("4c", French, 467),
    g("5a", French, 500),
    g("5b", French, 533),
    g("5c", French, 567),
    g("6a", French, 600),
    g("6a+", French, 617),
    g("6b", French, 633),
    g("6b+", French, 650),
    g("6c", French, 667),
    g("6c+", French, 683),
    g("7a", French, 700),
    g("7a+", French, 717),
    g("7b", French, 733),
    g("7b+", French, 750),
    g("7c", French, 767),
    g("7c+", French, 783),
    g("8a", French, 800),
    g("8a+", French, 817),
    g("8b", French, 833),
    g("8b+", French, 850),
    g("8c", French, 867),
    g("8c+", French, 883),
    g("9a", French, 900),
    g("9a+", French, 917),
    g("9b", French, 933),
    g("9b+", French, 950),
];

pub const V_SCALE_GRADES: &[GradeDefinition] = &[
    g("VB", VScale, 300),
    g("V0", VScale, 400),
    g("V1", VScale, 500),
    g("V2", VScale, 550),
    g("V3", VScale, 600),
    g("V4", VScale, 650),
    g("V5", VScale, 700),
    g("V6", VScale, 733),
    g("V7", VScale, 767),
    g("V8", VScale, 800),
    g("V9", VScale, 833),
    g("V10", VScale, 850),
    g("V11", VScale, 867),
    g("V12", VScale, 883),
    g("V13", VScale, 900),
    g("V14", VScale, 917),
    g("V15", VScale, 933),
    g("V16", VScale, 950),
    g("V17", VScale, 967),
];

pub const YDS_GRADES: &[GradeDefinition] = &[
    g("5.5", Yds, 400),
    g("5.6", Yds, 433),
    g("5.7", Yds, 467),
    g("5.8", Yds, 500),
    g("5.9", Yds, 533),
    g("5.10a", Yds, 567),
    g("5.10b", Yds, 583),
    g("5.10c", Yds, 600),
    g("5.10d", Yds, 617),
    g("5.11a", Yds, 633),
    g("5.11b", Yds, 650),
    g("5.11c", Yds, 667),
    g("5.11d", Yds, 683),
    g("5.12a", Yds, 700),
    g("5.12b", Yds, 717),
    g("5.12c", Yds, 733),
    g("5.12d", Yds, 750),
    g("5.13a", Yds, 767),
    g("5.13b", Yds, 783),
    g("5.13c", Yds, 800),
    g("5.13d", Yds, 817),
    g("5.14a", Yds, 833),
    g("5.14b", Yds, 850),
    g("5.14c", Yds, 867),
    g("5.14d", Yds, 883),
    g("5.15a", Yds, 900),
    g("5.15b", Yds, 917),
    g("5.15c", Yds, 933),
    g("5.15d", Yds, 950),
];

/// Normalized value used when a vendor difficulty cannot be placed in the table.
pub const FALLBACK_NUMERIC: i32 = 300;

pub fn grades_for_system(system: GradeSystem) -> &'static [GradeDefinition] {
    match system {
        GradeSystem::Font => FONT_GRADES,
        GradeSystem::French => FRENCH_GRADES,
        GradeSystem::VScale => V_SCALE_GRADES,
        GradeSystem::Yds => YDS_GRADES,
    }
}

pub fn grade_to_numeric(grade: &str, system: GradeSystem) -> Option<i32> {
    grades_for_system(system)
        .iter()
        .find(|def| def.grade == grade)
        .map(|def| def.numeric)
}

/// Closest grade at or below `numeric`, or `None` if it is below the whole table.
pub fn numeric_to_grade(numeric: i32, system: GradeSystem) -> Option<&'static str> {
    grades_for_system(system)
        .iter()
        .filter(|def| def.numeric <= numeric)
        .max_by_key(|def| def.numeric)
        .map(|def| def.grade)
}

/// Kilter's continuous difficulty, one V-grade per three points.
const KILTER_DIFFICULTY_TO_V: &[(f64, &str)] = &[
    (1.0, "VB"),
    (4.0, "V0"),
    (7.0, "V1"),
    (10.0, "V2"),
    (13.0, "V3"),
    (16.0, "V4"),
    (19.0, "V5"),
    (22.0, "V6"),
    (25.0, "V7"),
    (28.0, "V8"),
    (31.0, "V9"),
    (34.0, "V10"),
    (37.0, "V11"),
    (40.0, "V12"),
    (43.0, "V13"),
    (46.0, "V14"),
    (49.0, "V15"),
    (52.0, "V16"),
    (55.0, "V17"),
];

/// V-grade whose threshold is the highest one at or below `difficulty`.
pub fn kilter_difficulty_to_v_grade(difficulty: f64) -> &'static str {
    let mut grade = "VB";
    for (threshold, label) in KILTER_DIFFICULTY_TO_V {
        if difficulty >= *threshold {
            grade = *label;
        } else {
            break;
        }
    }
    grade
}

pub fn kilter_difficulty_to_numeric(difficulty: f64) -> i32 {
    grade_to_numeric(kilter_difficulty_to_v_grade(difficulty), GradeSystem::VScale)
        .unwrap_or(FALLBACK_NUMERIC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kilter_thresholds_floor_to_the_lower_grade() {
        assert_eq!(kilter_difficulty_to_v_grade(0.0), "VB");
        assert_eq!(kilter_difficulty_to_v_grade(21.9), "V5");
        assert_eq!(kilter_difficulty_to_v_grade(22.0), "V6");
        assert_eq!(kilter_difficulty_to_v_grade(24.5), "V6");
        assert_eq!(kilter_difficulty_to_v_grade(25.0), "V7");
        assert_eq!(kilter_difficulty_to_v_grade(99.0), "V17");
        assert_eq!(kilter_difficulty_to_v_grade(f64::NAN), "VB");
    }

    #[test]
    fn kilter_numeric_follows_v_scale_table() {
        assert_eq!(kilter_difficulty_to_numeric(23.0), 733);
        assert_eq!(kilter_difficulty_to_numeric(25.0), 767);
        assert_eq!(kilter_difficulty_to_numeric(-4.0), 300);
    }

    #[test]
    fn numeric_to_grade_picks_closest_below() {
        assert_eq!(numeric_to_grade(740, GradeSystem::VScale), Some("V6"));
        assert_eq!(numeric_to_grade(700, GradeSystem::Font), Some("7A"));
        assert_eq!(numeric_to_grade(100, GradeSystem::Yds), None);
    }

    #[test]
    fn grade_to_numeric_is_system_scoped() {
        assert_eq!(grade_to_numeric("7a", GradeSystem::French), Some(700));
        assert_eq!(grade_to_numeric("7a", GradeSystem::Font), None);
    }
}
