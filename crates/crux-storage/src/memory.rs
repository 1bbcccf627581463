//! In-process store with the same uniqueness and atomicity rules as Postgres.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crux_core::{
    Ascent, BoardConnection, BoardType, ImportedClimb, ImportedClimbKey, NewBoardConnection,
    Session,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{ConnectionStore, DayBatch, DayCommit, ImportStore, StoreError};

#[derive(Debug, Default)]
struct MemoryState {
    connections: Vec<BoardConnection>,
    sessions: Vec<Session>,
    ascents: Vec<Ascent>,
    ledger: BTreeMap<ImportedClimbKey, ImportedClimb>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sessions(&self) -> Vec<Session> {
        self.state.lock().await.sessions.clone()
    }

    pub async fn ascents(&self) -> Vec<Ascent> {
        self.state.lock().await.ascents.clone()
    }

    pub async fn ledger(&self) -> Vec<ImportedClimb> {
        self.state.lock().await.ledger.values().cloned().collect()
    }

    /// Seed a session directly, as if the user had logged it by hand.
    pub async fn insert_session(&self, session: Session) {
        self.state.lock().await.sessions.push(session);
    }
}

#[async_trait]
impl ImportStore for MemoryStore {
    async fn is_imported(&self, key: &ImportedClimbKey) -> Result<bool, StoreError> {
        Ok(self.state.lock().await.ledger.contains_key(key))
    }

    async fn commit_day(&self, batch: &DayBatch) -> Result<DayCommit, StoreError> {
        let mut state = self.state.lock().await;

        // Validate the whole batch before touching state so a rejected day leaves nothing behind.
        let mut seen = HashSet::new();
        for item in &batch.ascents {
            if state.ledger.contains_key(&item.key) || !seen.insert(&item.key) {
                return Err(StoreError::duplicate(&item.key));
            }
        }

        let existing = state
            .sessions
            .iter()
            .find(|s| {
                s.user_id == batch.user_id
                    && s.date == batch.date
                    && s.session_type == batch.session_type
            })
            .map(|s| s.id);
        let (session_id, session_created) = match existing {
            Some(id) => (id, false),
            None => {
                let id = Uuid::new_v4();
                state.sessions.push(Session {
                    id,
                    user_id: batch.user_id,
                    date: batch.date,
                    session_type: batch.session_type,
                    notes: Some(batch.session_note.clone()),
                    is_outdoor: false,
                });
                (id, true)
            }
        };

        let imported_at = Utc::now();
        let mut ascent_ids = Vec::with_capacity(batch.ascents.len());
        for item in &batch.ascents {
            let ascent_id = Uuid::new_v4();
            state.ascents.push(Ascent {
                id: ascent_id,
                session_id,
                details: item.ascent.clone(),
            });
            state.ledger.insert(
                item.key.clone(),
                ImportedClimb {
                    id: Uuid::new_v4(),
                    key: item.key.clone(),
                    ascent_id,
                    imported_at,
                },
            );
            ascent_ids.push(ascent_id);
        }

        Ok(DayCommit {
            session_id,
            session_created,
            ascent_ids,
        })
    }
}

#[async_trait]
impl ConnectionStore for MemoryStore {
    async fn insert_connection(
        &self,
        connection: &NewBoardConnection,
    ) -> Result<BoardConnection, StoreError> {
        let mut state = self.state.lock().await;
        if state
            .connections
            .iter()
            .any(|c| c.user_id == connection.user_id && c.board_type == connection.board_type)
        {
            return Err(StoreError::Conflict(format!(
                "{} connection already exists",
                connection.board_type
            )));
        }

        let now = Utc::now();
        let stored = BoardConnection {
            id: Uuid::new_v4(),
            user_id: connection.user_id,
            board_type: connection.board_type,
            username: connection.username.clone(),
            encrypted_password: connection.encrypted_password.clone(),
            board_user_id: connection.board_user_id.clone(),
            last_sync_at: None,
            sync_enabled: true,
            created_at: now,
            updated_at: now,
        };
        state.connections.push(stored.clone());
        Ok(stored)
    }

    async fn list_connections(&self, user_id: Uuid) -> Result<Vec<BoardConnection>, StoreError> {
        let state = self.state.lock().await;
        let mut rows: Vec<_> = state
            .connections
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by_key(|c| c.created_at);
        Ok(rows)
    }

    async fn find_connection(
        &self,
        user_id: Uuid,
        connection_id: Uuid,
    ) -> Result<Option<BoardConnection>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .connections
            .iter()
            .find(|c| c.id == connection_id && c.user_id == user_id)
            .cloned())
    }

    async fn find_connection_by_board(
        &self,
        user_id: Uuid,
        board_type: BoardType,
    ) -> Result<Option<BoardConnection>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .connections
            .iter()
            .find(|c| c.user_id == user_id && c.board_type == board_type)
            .cloned())
    }

    async fn delete_connection(
        &self,
        user_id: Uuid,
        connection_id: Uuid,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.connections.len();
        state
            .connections
            .retain(|c| !(c.id == connection_id && c.user_id == user_id));
        Ok(state.connections.len() != before)
    }

    async fn update_last_sync(
        &self,
        connection_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(c) = state.connections.iter_mut().find(|c| c.id == connection_id) {
            c.last_sync_at = Some(at);
            c.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_board_user_id(
        &self,
        connection_id: Uuid,
        board_user_id: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(c) = state.connections.iter_mut().find(|c| c.id == connection_id) {
            c.board_user_id = Some(board_user_id.to_string());
            c.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn list_sync_enabled(&self) -> Result<Vec<BoardConnection>, StoreError> {
        let state = self.state.lock().await;
        let mut rows: Vec<_> = state
            .connections
            .iter()
            .filter(|c| c.sync_enabled)
            .cloned()
            .collect();
        rows.sort_by_key(|c| c.created_at);
        Ok(rows)
    }
}
