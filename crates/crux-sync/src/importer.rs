//! The import engine: pull a connection's vendor history and write whatever the
//! dedup ledger has not seen yet, one transaction per climbing day.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use crux_adapters::{BoardClient, VendorAscentRecord, VendorClimbRecord};
use crux_core::grades::{kilter_difficulty_to_numeric, kilter_difficulty_to_v_grade};
use crux_core::{
    AscentResult, AscentStyle, BoardType, GradeSystem, ImportResult, ImportedClimbKey, NewAscent,
    SessionType,
};
use crux_storage::{ConnectionRegistry, DayBatch, ImportStore, ImportedAscent};
use tokio::sync::Mutex;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::ImportError;

pub struct BoardImporter {
    registry: ConnectionRegistry,
    imports: Arc<dyn ImportStore>,
    client: Arc<dyn BoardClient>,
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

/// A vendor ascent that passed the ledger check.
#[derive(Debug)]
struct Candidate<'a> {
    record: &'a VendorAscentRecord,
    key: ImportedClimbKey,
}

impl BoardImporter {
    pub fn new(
        registry: ConnectionRegistry,
        imports: Arc<dyn ImportStore>,
        client: Arc<dyn BoardClient>,
    ) -> Self {
        Self {
            registry,
            imports,
            client,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn board_type(&self) -> BoardType {
        self.client.board_type()
    }

    async fn connection_lock(&self, connection_id: Uuid) -> Arc<Mutex<()>> {
        let mut map = self.locks.lock().await;
        map.entry(connection_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Forget the lock for `connection_id` once nobody but the map holds it.
    async fn release_lock(&self, connection_id: Uuid, lock: Arc<Mutex<()>>) {
        let mut map = self.locks.lock().await;
        if Arc::strong_count(&lock) == 2 {
            map.remove(&connection_id);
        }
    }

    /// Import everything new for one of `user_id`'s connections.
    ///
    /// Runs for the same connection are serialised. `last_sync_at` only moves
    /// when every day committed.
    pub async fn import_history(
        &self,
        user_id: Uuid,
        connection_id: Uuid,
    ) -> Result<ImportResult, ImportError> {
        let span = info_span!("board_import", %user_id, %connection_id);
        async move {
            let lock = self.connection_lock(connection_id).await;
            let guard = lock.lock().await;
            let result = self.run(user_id, connection_id).await;
            drop(guard);
            self.release_lock(connection_id, lock).await;
            match &result {
                Ok(summary) => info!(
                    sessions_created = summary.sessions_created,
                    ascents_imported = summary.ascents_imported,
                    duplicates_skipped = summary.duplicates_skipped,
                    "board import finished"
                ),
                Err(err) => warn!(code = err.code(), error = %err, "board import failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run(&self, user_id: Uuid, connection_id: Uuid) -> Result<ImportResult, ImportError> {
        let connection = self.registry.get(user_id, connection_id).await?;
        let board_type = self.client.board_type();
        if connection.board_type != board_type {
            return Err(ImportError::UnsupportedBoard(connection.board_type));
        }

        let password = self
            .registry
            .decrypted_password(&connection)
            .map_err(|_| ImportError::TamperedCredential)?;
        let session = self
            .client
            .authenticate(&connection.username, &password)
            .await?;

        let pulled = self
            .client
            .fetch_ascents_and_climbs(&session.token, connection.last_sync_at)
            .await?;
        debug!(
            ascents = pulled.ascents.len(),
            climbs = pulled.climbs.len(),
            since = ?connection.last_sync_at,
            "vendor history fetched"
        );

        let climbs = climb_lookup(&pulled.climbs);
        let mut result = ImportResult::default();

        let mut seen = HashSet::new();
        let mut fresh = Vec::new();
        for record in &pulled.ascents {
            let key = ImportedClimbKey {
                user_id,
                board_type,
                climb_uuid: record.climb_uuid.clone(),
                angle: record.angle,
                climbed_at: record.climbed_at.clone(),
            };
            if self.imports.is_imported(&key).await? || !seen.insert(key.clone()) {
                result.duplicates_skipped += 1;
                continue;
            }
            fresh.push(Candidate { record, key });
        }

        let days = group_by_date(fresh)?;
        let session_note = format!("Imported from {} Board", board_type.display_name());
        for (date, candidates) in days {
            let ascents = candidates
                .into_iter()
                .enumerate()
                .map(|(idx, candidate)| ImportedAscent {
                    ascent: build_ascent(
                        self.client.as_ref(),
                        board_type,
                        candidate.record,
                        &climbs,
                        idx as i32,
                    ),
                    key: candidate.key,
                })
                .collect::<Vec<_>>();
            let imported = ascents.len() as u32;

            let commit = self
                .imports
                .commit_day(&DayBatch {
                    user_id,
                    date,
                    session_type: SessionType::Bouldering,
                    session_note: session_note.clone(),
                    ascents,
                })
                .await
                .inspect_err(|err| warn!(%date, error = %err, "import day rolled back"))?;

            if commit.session_created {
                result.sessions_created += 1;
            }
            result.ascents_imported += imported;
        }

        // Connection writes wait until every day committed.
        if connection.board_user_id.is_none() && session.vendor_user_id != 0 {
            self.registry
                .set_board_user_id(connection.id, &session.vendor_user_id.to_string())
                .await?;
        }
        self.registry
            .update_last_sync(connection.id, Utc::now())
            .await?;
        Ok(result)
    }
}

/// Climb metadata by uuid; a uuid repeated across pages keeps its last record.
fn climb_lookup(climbs: &[VendorClimbRecord]) -> HashMap<&str, &VendorClimbRecord> {
    climbs.iter().map(|c| (c.uuid.as_str(), c)).collect()
}

/// Bucket candidates by the `YYYY-MM-DD` prefix of their vendor timestamp, in
/// ascending date order, preserving fetch order inside each day.
fn group_by_date(
    candidates: Vec<Candidate<'_>>,
) -> Result<BTreeMap<NaiveDate, Vec<Candidate<'_>>>, ImportError> {
    let mut days: BTreeMap<NaiveDate, Vec<Candidate<'_>>> = BTreeMap::new();
    for candidate in candidates {
        let date = climbed_on(&candidate.record.climbed_at)?;
        days.entry(date).or_default().push(candidate);
    }
    Ok(days)
}

fn climbed_on(climbed_at: &str) -> Result<NaiveDate, ImportError> {
    climbed_at
        .get(..10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
        .ok_or_else(|| {
            ImportError::MalformedVendorResponse(format!("unparseable climbed_at '{climbed_at}'"))
        })
}

fn build_ascent(
    client: &dyn BoardClient,
    board_type: BoardType,
    record: &VendorAscentRecord,
    climbs: &HashMap<&str, &VendorClimbRecord>,
    sort_order: i32,
) -> NewAscent {
    let name = climbs
        .get(record.climb_uuid.as_str())
        .map(|climb| climb.name.trim())
        .filter(|name| !name.is_empty())
        .map(str::to_string);
    let style = if record.bid_count <= 1 {
        AscentStyle::Flash
    } else {
        AscentStyle::Redpoint
    };
    let notes = Some(record.comment.trim())
        .filter(|comment| !comment.is_empty())
        .map(str::to_string);

    NewAscent {
        name,
        grade: kilter_difficulty_to_v_grade(record.difficulty).to_string(),
        grade_system: GradeSystem::VScale,
        normalized_grade: kilter_difficulty_to_numeric(record.difficulty),
        style,
        attempts: record.bid_count.clamp(1, i32::MAX as i64) as i32,
        result: AscentResult::Send,
        board_type: Some(board_type),
        board_angle: Some(record.angle),
        board_climb_uuid: Some(record.climb_uuid.clone()),
        board_climb_url: Some(client.climb_url(&record.climb_uuid)),
        notes,
        sort_order,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crux_adapters::{HttpClientConfig, KilterClient};
    use crux_storage::{CredentialVault, MemoryStore};

    fn offline_importer() -> BoardImporter {
        let store = Arc::new(MemoryStore::new());
        let registry =
            ConnectionRegistry::new(store.clone(), Arc::new(CredentialVault::new(&[3u8; 32])));
        let client =
            KilterClient::new("http://127.0.0.1:9".to_string(), HttpClientConfig::default())
                .unwrap();
        BoardImporter::new(registry, store, Arc::new(client))
    }

    #[tokio::test]
    async fn connection_lock_is_shared_then_released_by_the_last_holder() {
        let importer = offline_importer();
        let id = Uuid::new_v4();
        let first = importer.connection_lock(id).await;
        let second = importer.connection_lock(id).await;
        assert!(Arc::ptr_eq(&first, &second));

        importer.release_lock(id, first).await;
        assert_eq!(importer.locks.lock().await.len(), 1);
        importer.release_lock(id, second).await;
        assert!(importer.locks.lock().await.is_empty());
    }

    #[test]
    fn climbed_on_uses_the_raw_prefix() {
        assert_eq!(
            climbed_on("2024-03-01T23:59:59-08:00").unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );
        assert_eq!(
            climbed_on("2024-03-01 10:00:00.000000").unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );
        assert!(matches!(
            climbed_on("yesterday"),
            Err(ImportError::MalformedVendorResponse(_))
        ));
        assert!(climbed_on("2024-13-01 10:00:00").is_err());
    }

    #[test]
    fn climb_lookup_keeps_the_last_record() {
        let climbs = vec![
            VendorClimbRecord {
                uuid: "c1".into(),
                name: "First".into(),
                description: String::new(),
                setter_id: 0,
                layout_id: 1,
                is_draft: false,
                frames_count: 1,
                angle: None,
            },
            VendorClimbRecord {
                uuid: "c1".into(),
                name: "Renamed".into(),
                description: String::new(),
                setter_id: 0,
                layout_id: 1,
                is_draft: false,
                frames_count: 1,
                angle: None,
            },
        ];
        let lookup = climb_lookup(&climbs);
        assert_eq!(lookup["c1"].name, "Renamed");
    }
}
