//! Generic repository façade over the object stores.
//!
//! Operations are parameterized by record type; table selection, key
//! binding, serialization and index-column extraction all come from
//! [`StoreRecord`]. Store contents are opaque JSON documents to the engine,
//! the index columns exist purely for secondary lookups.

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::store::gateway::StoreGateway;
use crate::store::{RecordPatch, StoreDef, StoreKey, StoreRecord};

impl StoreGateway {
    /// Insert a new record. Refuses to overwrite: an existing id yields
    /// [`StoreError::DuplicateKey`] and the stored record stays intact.
    pub async fn add<T: StoreRecord>(&self, record: &T) -> StoreResult<()> {
        let store = T::STORE;
        let key = record.key();
        let doc = encode(record)?;
        let index_values = record.index_values();
        self.with_conn(move |conn| {
            let mut sql = format!("INSERT INTO \"{}\" (id, record", store.name);
            for index in store.indexes {
                sql.push_str(", ");
                sql.push_str(index.name);
            }
            sql.push_str(") VALUES (?1, ?2");
            for i in 0..store.indexes.len() {
                sql.push_str(&format!(", ?{}", i + 3));
            }
            sql.push(')');

            let mut params: Vec<Value> = vec![key.to_sql(), Value::Text(doc)];
            params.extend(index_values.into_iter().map(value_or_null));
            match conn.execute(&sql, params_from_iter(params)) {
                Ok(_) => {
                    debug!(store = store.name, %key, "record added");
                    Ok(())
                }
                Err(err) => Err(map_insert_err(store, key, err)),
            }
        })
        .await
    }

    /// Fetch one record by key. An absent id is `Ok(None)`, never an error.
    pub async fn get<T: StoreRecord>(&self, key: StoreKey) -> StoreResult<Option<T>> {
        let store = T::STORE;
        let doc: Option<String> = self
            .with_conn(move |conn| {
                conn.query_row(
                    &format!("SELECT record FROM \"{}\" WHERE id = ?1", store.name),
                    [key.to_sql()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| operation_failed(store, "get", e))
            })
            .await?;
        doc.map(|d| decode(store, &d)).transpose()
    }

    /// Every record in the store. Order is unspecified; callers that care
    /// sort on a record field.
    pub async fn get_all<T: StoreRecord>(&self) -> StoreResult<Vec<T>> {
        let store = T::STORE;
        let docs = self
            .with_conn(move |conn| fetch_docs(conn, store, "get_all", None))
            .await?;
        docs.iter().map(|d| decode(store, d)).collect()
    }

    /// Atomically read, patch and write back one record, returning the
    /// merged result. The read and the write share one transaction, so two
    /// updates to the same id can never interleave mid-merge; whole updates
    /// still resolve last-writer-wins.
    ///
    /// An absent id fails with [`StoreError::NotFound`].
    pub async fn update<T, P>(&self, key: StoreKey, patch: P) -> StoreResult<T>
    where
        T: StoreRecord + Send + 'static,
        P: RecordPatch<T>,
    {
        let store = T::STORE;
        self.with_conn(move |conn| update_in_txn(conn, store, key, patch))
            .await
    }

    /// Remove a record. Deleting an absent id is a successful no-op, so the
    /// operation is idempotent.
    pub async fn delete<T: StoreRecord>(&self, key: StoreKey) -> StoreResult<()> {
        let store = T::STORE;
        self.with_conn(move |conn| {
            let removed = conn
                .execute(
                    &format!("DELETE FROM \"{}\" WHERE id = ?1", store.name),
                    [key.to_sql()],
                )
                .map_err(|e| operation_failed(store, "delete", e))?;
            if removed > 0 {
                debug!(store = store.name, %key, "record deleted");
            }
            Ok(())
        })
        .await
    }

    /// Every record whose indexed field equals `value`. Asking for an index
    /// the store does not declare is a programming error and reports as
    /// [`StoreError::OperationFailed`].
    pub async fn get_by_index<T: StoreRecord>(
        &self,
        index: &'static str,
        value: &str,
    ) -> StoreResult<Vec<T>> {
        let store = T::STORE;
        if !store.indexes.iter().any(|i| i.name == index) {
            return Err(StoreError::OperationFailed {
                op: "get_by_index",
                message: format!("store '{}' has no index '{}'", store.name, index),
            });
        }
        let value = value.to_string();
        let docs = self
            .with_conn(move |conn| fetch_docs(conn, store, "get_by_index", Some((index, value))))
            .await?;
        docs.iter().map(|d| decode(store, d)).collect()
    }

    /// Record count per object store, for diagnostics.
    pub async fn store_counts(&self) -> StoreResult<Vec<(&'static str, u64)>> {
        self.with_conn(|conn| {
            let mut counts = Vec::with_capacity(crate::store::OBJECT_STORES.len());
            for store in crate::store::OBJECT_STORES {
                let count: i64 = conn
                    .query_row(
                        &format!("SELECT COUNT(*) FROM \"{}\"", store.name),
                        [],
                        |row| row.get(0),
                    )
                    .map_err(|e| operation_failed(store, "count", e))?;
                counts.push((store.name, count as u64));
            }
            Ok(counts)
        })
        .await
    }

    /// Wipe every object store and the blob table in one transaction.
    /// The prefs cache survives; it belongs to the UI shell, not the data.
    pub async fn clear_all_data(&self) -> StoreResult<()> {
        self.with_conn(|conn| {
            let mut sql = String::from("BEGIN;\n");
            for store in crate::store::OBJECT_STORES {
                sql.push_str(&format!("DELETE FROM \"{}\";\n", store.name));
            }
            sql.push_str("DELETE FROM blobs;\nCOMMIT;");
            conn.execute_batch(&sql).map_err(|e| StoreError::OperationFailed {
                op: "clear_all_data",
                message: e.to_string(),
            })?;
            debug!("all stores cleared");
            Ok(())
        })
        .await
    }
}

/// Shared SELECT for full and index-filtered listings.
fn fetch_docs(
    conn: &Connection,
    store: &'static StoreDef,
    op: &'static str,
    filter: Option<(&'static str, String)>,
) -> StoreResult<Vec<String>> {
    let (sql, params) = match filter {
        Some((index, value)) => (
            format!(
                "SELECT record FROM \"{}\" WHERE {} = ?1",
                store.name, index
            ),
            vec![Value::Text(value)],
        ),
        None => (format!("SELECT record FROM \"{}\"", store.name), Vec::new()),
    };
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| operation_failed(store, op, e))?;
    let rows = stmt
        .query_map(params_from_iter(params), |row| row.get::<_, String>(0))
        .map_err(|e| operation_failed(store, op, e))?;
    let mut docs = Vec::new();
    for row in rows {
        docs.push(row.map_err(|e| operation_failed(store, op, e))?);
    }
    Ok(docs)
}

/// Read-patch-write inside one immediate transaction.
fn update_in_txn<T, P>(
    conn: &mut Connection,
    store: &'static StoreDef,
    key: StoreKey,
    patch: P,
) -> StoreResult<T>
where
    T: StoreRecord,
    P: RecordPatch<T>,
{
    let txn = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| operation_failed(store, "update", e))?;

    let doc: Option<String> = txn
        .query_row(
            &format!("SELECT record FROM \"{}\" WHERE id = ?1", store.name),
            [key.to_sql()],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| operation_failed(store, "update", e))?;
    let Some(doc) = doc else {
        // Transaction drops here, rolling back the empty read.
        return Err(StoreError::NotFound {
            store: store.name,
            key,
        });
    };

    let mut record: T = decode(store, &doc)?;
    patch.apply_to(&mut record);
    let merged = encode(&record)?;

    let mut sql = format!("UPDATE \"{}\" SET record = ?1", store.name);
    for (i, index) in store.indexes.iter().enumerate() {
        sql.push_str(&format!(", {} = ?{}", index.name, i + 2));
    }
    sql.push_str(&format!(" WHERE id = ?{}", store.indexes.len() + 2));

    let mut params: Vec<Value> = vec![Value::Text(merged)];
    params.extend(record.index_values().into_iter().map(value_or_null));
    params.push(key.to_sql());
    txn.execute(&sql, params_from_iter(params))
        .map_err(|e| operation_failed(store, "update", e))?;
    txn.commit()
        .map_err(|e| operation_failed(store, "update", e))?;
    debug!(store = store.name, %key, "record updated");
    Ok(record)
}

fn value_or_null(value: Option<String>) -> Value {
    match value {
        Some(v) => Value::Text(v),
        None => Value::Null,
    }
}

/// The engine refuses primary key overwrites; surface that as a duplicate.
fn map_insert_err(store: &'static StoreDef, key: StoreKey, err: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(inner, _) = &err {
        if inner.code == ErrorCode::ConstraintViolation {
            return StoreError::DuplicateKey {
                store: store.name,
                key,
            };
        }
    }
    operation_failed(store, "add", err)
}

fn operation_failed(
    store: &'static StoreDef,
    op: &'static str,
    err: impl std::fmt::Display,
) -> StoreError {
    StoreError::OperationFailed {
        op,
        message: format!("store '{}': {}", store.name, err),
    }
}

fn encode<T: StoreRecord>(record: &T) -> StoreResult<String> {
    serde_json::to_string(record).map_err(|e| StoreError::OperationFailed {
        op: "encode",
        message: format!("store '{}': {}", T::STORE.name, e),
    })
}

fn decode<T: StoreRecord>(store: &StoreDef, doc: &str) -> StoreResult<T> {
    serde_json::from_str(doc).map_err(|e| StoreError::OperationFailed {
        op: "decode",
        message: format!("store '{}': {}", store.name, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        ImageColumn, RowPatch, StoredImage, Submission, SubmissionPatch, SubmissionStatus,
        TableRow, UploadedImage,
    };
    use chrono::Utc;

    async fn open_gateway() -> StoreGateway {
        let gateway = StoreGateway::in_memory();
        gateway.initialize().await.unwrap();
        gateway
    }

    fn submission(id: &str, user: &str, status: SubmissionStatus) -> Submission {
        Submission {
            id: id.into(),
            user_id: user.into(),
            user_name: "Sam".into(),
            row_id: 1,
            inspiration_images: Vec::new(),
            area_images: Vec::new(),
            status,
            progress: None,
            result_image: None,
            submitted_at: Utc::now(),
            priority: None,
        }
    }

    #[tokio::test]
    async fn test_add_then_get_round_trip() {
        let gateway = open_gateway().await;
        let record = submission("s-1", "user-1", SubmissionStatus::Pending);
        gateway.add(&record).await.unwrap();

        let loaded: Option<Submission> = gateway.get(StoreKey::text("s-1")).await.unwrap();
        assert_eq!(loaded, Some(record));

        let absent: Option<Submission> = gateway.get(StoreKey::text("nope")).await.unwrap();
        assert!(absent.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_add_keeps_original() {
        let gateway = open_gateway().await;
        let original = submission("s-1", "user-1", SubmissionStatus::Pending);
        gateway.add(&original).await.unwrap();

        let imposter = submission("s-1", "user-2", SubmissionStatus::Completed);
        let err = gateway.add(&imposter).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { store: "submissions", .. }));

        let stored: Submission = gateway.get(StoreKey::text("s-1")).await.unwrap().unwrap();
        assert_eq!(stored.user_id, "user-1");
        assert_eq!(stored.status, SubmissionStatus::Pending);
    }

    #[tokio::test]
    async fn test_update_merges_and_returns_result() {
        let gateway = open_gateway().await;
        gateway
            .add(&submission("s-1", "user-1", SubmissionStatus::Pending))
            .await
            .unwrap();

        let merged: Submission = gateway
            .update(
                StoreKey::text("s-1"),
                SubmissionPatch::status(SubmissionStatus::InProgress).with_progress(10),
            )
            .await
            .unwrap();
        assert_eq!(merged.status, SubmissionStatus::InProgress);
        assert_eq!(merged.progress, Some(10));
        assert_eq!(merged.user_id, "user-1");

        // The merge is durable, not just returned.
        let stored: Submission = gateway.get(StoreKey::text("s-1")).await.unwrap().unwrap();
        assert_eq!(stored, merged);
    }

    #[tokio::test]
    async fn test_update_missing_record_is_not_found() {
        let gateway = open_gateway().await;
        let err = gateway
            .update::<Submission, _>(
                StoreKey::text("ghost"),
                SubmissionPatch::status(SubmissionStatus::Failed),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { store: "submissions", .. }));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let gateway = open_gateway().await;
        gateway
            .add(&submission("s-1", "user-1", SubmissionStatus::Pending))
            .await
            .unwrap();

        gateway.delete::<Submission>(StoreKey::text("s-1")).await.unwrap();
        let gone: Option<Submission> = gateway.get(StoreKey::text("s-1")).await.unwrap();
        assert!(gone.is_none());

        // Deleting again still succeeds.
        gateway.delete::<Submission>(StoreKey::text("s-1")).await.unwrap();
    }

    #[tokio::test]
    async fn test_get_by_index_filters_and_tracks_updates() {
        let gateway = open_gateway().await;
        gateway
            .add(&submission("s-1", "user-1", SubmissionStatus::Pending))
            .await
            .unwrap();
        gateway
            .add(&submission("s-2", "user-1", SubmissionStatus::Completed))
            .await
            .unwrap();
        gateway
            .add(&submission("s-3", "user-2", SubmissionStatus::Pending))
            .await
            .unwrap();

        let mine: Vec<Submission> = gateway.get_by_index("user_id", "user-1").await.unwrap();
        assert_eq!(mine.len(), 2);

        let pending: Vec<Submission> = gateway.get_by_index("status", "pending").await.unwrap();
        assert_eq!(pending.len(), 2);

        // Updating status moves the record between index buckets.
        let _: Submission = gateway
            .update(
                StoreKey::text("s-1"),
                SubmissionPatch::status(SubmissionStatus::Completed),
            )
            .await
            .unwrap();
        let pending: Vec<Submission> = gateway.get_by_index("status", "pending").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "s-3");
    }

    #[tokio::test]
    async fn test_unknown_index_is_rejected() {
        let gateway = open_gateway().await;
        let err = gateway
            .get_by_index::<Submission>("color", "red")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::OperationFailed { op: "get_by_index", .. }));
    }

    #[tokio::test]
    async fn test_integer_keyed_rows() {
        let gateway = open_gateway().await;
        let row = TableRow::seeded(5, "user-1");
        gateway.add(&row).await.unwrap();

        let loaded: Option<TableRow> = gateway.get(StoreKey::from(5u32)).await.unwrap();
        assert_eq!(loaded.unwrap().id, 5);

        let merged: TableRow = gateway
            .update(
                StoreKey::from(5u32),
                RowPatch::images(
                    ImageColumn::Area,
                    vec![UploadedImage {
                        id: "5-area-0-aaaaaa".into(),
                        name: "rug.png".into(),
                        size: 10,
                        width: None,
                        height: None,
                        uploaded_at: Utc::now(),
                    }],
                ),
            )
            .await
            .unwrap();
        assert_eq!(merged.area_images.len(), 1);
    }

    #[tokio::test]
    async fn test_images_by_submission_index() {
        let gateway = open_gateway().await;
        for (image_id, sub) in [("i-1", "s-1"), ("i-2", "s-1"), ("i-3", "s-2")] {
            let record = StoredImage::new(
                UploadedImage {
                    id: image_id.into(),
                    name: format!("{image_id}.png"),
                    size: 1,
                    width: None,
                    height: None,
                    uploaded_at: Utc::now(),
                },
                sub,
            );
            gateway.add(&record).await.unwrap();
        }

        let of_first: Vec<StoredImage> =
            gateway.get_by_index("submission_id", "s-1").await.unwrap();
        assert_eq!(of_first.len(), 2);
    }

    #[tokio::test]
    async fn test_counts_and_clear() {
        let gateway = open_gateway().await;
        gateway
            .add(&submission("s-1", "user-1", SubmissionStatus::Pending))
            .await
            .unwrap();
        gateway.add(&TableRow::seeded(1, "user-1")).await.unwrap();

        let counts = gateway.store_counts().await.unwrap();
        assert!(counts.contains(&("submissions", 1)));
        assert!(counts.contains(&("userRows", 1)));
        assert!(counts.contains(&("images", 0)));

        gateway.clear_all_data().await.unwrap();
        let counts = gateway.store_counts().await.unwrap();
        assert!(counts.iter().all(|(_, n)| *n == 0));
    }
}
