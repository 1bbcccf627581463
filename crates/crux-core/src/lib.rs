//! Core domain model for the Crux climbing logbook and its board imports.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod grades;

pub const CRATE_NAME: &str = "crux-core";

/// Returned when a stored or user-supplied label does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

macro_rules! labelled_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $label:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $label)] $variant,)+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($label => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

labelled_enum!(BoardType, "board type", {
    Kilter => "kilter",
    Tension => "tension",
    Moon => "moon",
    Aurora => "aurora",
});

impl BoardType {
    /// Human-facing vendor name used in import notes.
    pub fn display_name(&self) -> &'static str {
        match self {
            BoardType::Kilter => "Kilter",
            BoardType::Tension => "Tension",
            BoardType::Moon => "Moon",
            BoardType::Aurora => "Aurora",
        }
    }
}

labelled_enum!(SessionType, "session type", {
    Bouldering => "bouldering",
    Sport => "sport",
    Mixed => "mixed",
    Training => "training",
});

labelled_enum!(AscentStyle, "ascent style", {
    Flash => "flash",
    Onsight => "onsight",
    Redpoint => "redpoint",
    Repeat => "repeat",
    Attempt => "attempt",
});

labelled_enum!(AscentResult, "ascent result", {
    Send => "send",
    Fall => "fall",
    Project => "project",
});

labelled_enum!(GradeSystem, "grade system", {
    Font => "font",
    French => "french",
    VScale => "v_scale",
    Yds => "yds",
});

/// Persisted link between a user and a board vendor account.
///
/// At most one exists per `(user_id, board_type)`. `last_sync_at == None` means
/// the full vendor history has never been imported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardConnection {
    pub id: Uuid,
    pub user_id: Uuid,
    pub board_type: BoardType,
    pub username: String,
    pub encrypted_password: String,
    pub board_user_id: Option<String>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub sync_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BoardConnection {
    /// Strip the credential ciphertext before handing the connection to a client.
    pub fn view(&self) -> BoardConnectionView {
        BoardConnectionView {
            id: self.id,
            user_id: self.user_id,
            board_type: self.board_type,
            username: self.username.clone(),
            board_user_id: self.board_user_id.clone(),
            last_sync_at: self.last_sync_at,
            sync_enabled: self.sync_enabled,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardConnectionView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub board_type: BoardType,
    pub username: String,
    pub board_user_id: Option<String>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub sync_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBoardConnection {
    pub user_id: Uuid,
    pub board_type: BoardType,
    pub username: String,
    pub encrypted_password: String,
    pub board_user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub date: NaiveDate,
    #[serde(rename = "type")]
    pub session_type: SessionType,
    pub notes: Option<String>,
    pub is_outdoor: bool,
}

/// Ascent fields as written by an importer, before the store assigns ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAscent {
    pub name: Option<String>,
    pub grade: String,
    pub grade_system: GradeSystem,
    pub normalized_grade: i32,
    pub style: AscentStyle,
    pub attempts: i32,
    pub result: AscentResult,
    pub board_type: Option<BoardType>,
    pub board_angle: Option<i32>,
    pub board_climb_uuid: Option<String>,
    pub board_climb_url: Option<String>,
    pub notes: Option<String>,
    pub sort_order: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ascent {
    pub id: Uuid,
    pub session_id: Uuid,
    #[serde(flatten)]
    pub details: NewAscent,
}

/// Natural key of an externally sourced ascent; unique across the dedup ledger.
///
/// `climbed_at` is kept exactly as the vendor reported it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedClimbKey {
    pub user_id: Uuid,
    pub board_type: BoardType,
    pub climb_uuid: String,
    pub angle: i32,
    pub climbed_at: String,
}

/// Dedup ledger row. Written once, alongside the ascent it points to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedClimb {
    pub id: Uuid,
    pub key: ImportedClimbKey,
    pub ascent_id: Uuid,
    pub imported_at: DateTime<Utc>,
}

/// Counters reported back to the caller of one import run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub sessions_created: u32,
    pub ascents_imported: u32,
    pub duplicates_skipped: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_round_trip_through_from_str() {
        for board in BoardType::ALL {
            assert_eq!(board.as_str().parse::<BoardType>().unwrap(), *board);
        }
        assert_eq!("v_scale".parse::<GradeSystem>().unwrap(), GradeSystem::VScale);
        let err = "slab".parse::<SessionType>().unwrap_err();
        assert_eq!(err.to_string(), "unknown session type 'slab'");
    }

    #[test]
    fn import_result_serializes_camel_case() {
        let result = ImportResult {
            sessions_created: 1,
            ascents_imported: 2,
            duplicates_skipped: 3,
        };
        let json = serde_json::to_value(result).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"sessionsCreated": 1, "ascentsImported": 2, "duplicatesSkipped": 3})
        );
    }

    #[test]
    fn connection_view_hides_ciphertext() {
        let now = Utc::now();
        let connection = BoardConnection {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            board_type: BoardType::Kilter,
            username: "climber".into(),
            encrypted_password: "aa:bb:cc".into(),
            board_user_id: None,
            last_sync_at: None,
            sync_enabled: true,
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_string(&connection.view()).unwrap();
        assert!(!json.contains("aa:bb:cc"));
        assert!(json.contains("\"boardType\":\"kilter\""));
    }
}
