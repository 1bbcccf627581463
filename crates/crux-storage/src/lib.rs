//! Persistence for board imports: connection records, the session/ascent
//! domain store and the dedup ledger, plus credential encryption.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use crux_core::{BoardConnection, BoardType, ImportedClimbKey, NewAscent, NewBoardConnection, SessionType};
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod postgres;
pub mod registry;
pub mod vault;

pub use memory::MemoryStore;
pub use postgres::{create_pool, run_migrations, PgStore};
pub use registry::{ConnectionRegistry, RegistryError};
pub use vault::{CredentialVault, VaultError};

pub const CRATE_NAME: &str = "crux-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("ascent already imported: {climb_uuid} @ {angle} on {climbed_at}")]
    DuplicateImport {
        climb_uuid: String,
        angle: i32,
        climbed_at: String,
    },
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    fn duplicate(key: &ImportedClimbKey) -> Self {
        StoreError::DuplicateImport {
            climb_uuid: key.climb_uuid.clone(),
            angle: key.angle,
            climbed_at: key.climbed_at.clone(),
        }
    }
}

/// One new ascent and the ledger key it is imported under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedAscent {
    pub ascent: NewAscent,
    pub key: ImportedClimbKey,
}

/// Everything imported for one calendar date, committed as a single unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayBatch {
    pub user_id: Uuid,
    pub date: NaiveDate,
    pub session_type: SessionType,
    /// Note written only when the session has to be created.
    pub session_note: String,
    pub ascents: Vec<ImportedAscent>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayCommit {
    pub session_id: Uuid,
    pub session_created: bool,
    pub ascent_ids: Vec<Uuid>,
}

#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Fails with [`StoreError::Conflict`] when the user already has a connection
    /// for the same board type.
    async fn insert_connection(
        &self,
        connection: &NewBoardConnection,
    ) -> Result<BoardConnection, StoreError>;

    /// The user's connections, oldest first.
    async fn list_connections(&self, user_id: Uuid) -> Result<Vec<BoardConnection>, StoreError>;

    async fn find_connection(
        &self,
        user_id: Uuid,
        connection_id: Uuid,
    ) -> Result<Option<BoardConnection>, StoreError>;

    async fn find_connection_by_board(
        &self,
        user_id: Uuid,
        board_type: BoardType,
    ) -> Result<Option<BoardConnection>, StoreError>;

    /// Returns whether a row was deleted.
    async fn delete_connection(&self, user_id: Uuid, connection_id: Uuid)
        -> Result<bool, StoreError>;

    async fn update_last_sync(
        &self,
        connection_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn set_board_user_id(
        &self,
        connection_id: Uuid,
        board_user_id: &str,
    ) -> Result<(), StoreError>;

    async fn list_sync_enabled(&self) -> Result<Vec<BoardConnection>, StoreError>;
}

#[async_trait]
pub trait ImportStore: Send + Sync {
    async fn is_imported(&self, key: &ImportedClimbKey) -> Result<bool, StoreError>;

    /// Find or create the day's session, then insert every ascent with its ledger
    /// row. Nothing is persisted unless the whole batch is.
    async fn commit_day(&self, batch: &DayBatch) -> Result<DayCommit, StoreError>;
}
