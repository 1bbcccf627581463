//! Board connection lifecycle on top of a [`ConnectionStore`] and the vault.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use crux_core::{BoardConnection, BoardConnectionView, BoardType, NewBoardConnection};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::{ConnectionStore, CredentialVault, StoreError, VaultError};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("board connection not found")]
    NotFound,
    #[error("{0} board is already connected")]
    AlreadyConnected(BoardType),
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct ConnectionRegistry {
    store: Arc<dyn ConnectionStore>,
    vault: Arc<CredentialVault>,
}

impl ConnectionRegistry {
    pub fn new(store: Arc<dyn ConnectionStore>, vault: Arc<CredentialVault>) -> Self {
        Self { store, vault }
    }

    /// Store a new connection with its password encrypted. The caller is
    /// expected to have validated the credentials with the vendor first.
    pub async fn connect(
        &self,
        user_id: Uuid,
        board_type: BoardType,
        username: &str,
        password: &str,
        board_user_id: Option<String>,
    ) -> Result<BoardConnectionView, RegistryError> {
        if self
            .store
            .find_connection_by_board(user_id, board_type)
            .await?
            .is_some()
        {
            return Err(RegistryError::AlreadyConnected(board_type));
        }

        let encrypted_password = self.vault.encrypt(password)?;
        let connection = self
            .store
            .insert_connection(&NewBoardConnection {
                user_id,
                board_type,
                username: username.to_string(),
                encrypted_password,
                board_user_id,
            })
            .await
            .map_err(|err| match err {
                StoreError::Conflict(_) => RegistryError::AlreadyConnected(board_type),
                other => RegistryError::Store(other),
            })?;

        info!(%user_id, connection_id = %connection.id, board = %board_type, "board connected");
        Ok(connection.view())
    }

    pub async fn list(&self, user_id: Uuid) -> Result<Vec<BoardConnectionView>, RegistryError> {
        let connections = self.store.list_connections(user_id).await?;
        Ok(connections.iter().map(BoardConnection::view).collect())
    }

    /// Full record, ciphertext included; never hand this to a client.
    pub async fn get(
        &self,
        user_id: Uuid,
        connection_id: Uuid,
    ) -> Result<BoardConnection, RegistryError> {
        self.store
            .find_connection(user_id, connection_id)
            .await?
            .ok_or(RegistryError::NotFound)
    }

    pub async fn disconnect(&self, user_id: Uuid, connection_id: Uuid) -> Result<(), RegistryError> {
        if !self.store.delete_connection(user_id, connection_id).await? {
            return Err(RegistryError::NotFound);
        }
        info!(%user_id, %connection_id, "board disconnected");
        Ok(())
    }

    pub fn decrypted_password(&self, connection: &BoardConnection) -> Result<String, VaultError> {
        self.vault.decrypt(&connection.encrypted_password)
    }

    pub async fn update_last_sync(
        &self,
        connection_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), RegistryError> {
        Ok(self.store.update_last_sync(connection_id, at).await?)
    }

    pub async fn set_board_user_id(
        &self,
        connection_id: Uuid,
        board_user_id: &str,
    ) -> Result<(), RegistryError> {
        Ok(self.store.set_board_user_id(connection_id, board_user_id).await?)
    }

    pub async fn list_sync_enabled(&self) -> Result<Vec<BoardConnection>, RegistryError> {
        Ok(self.store.list_sync_enabled().await?)
    }
}
