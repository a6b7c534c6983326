use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use bson::{Bson, Document};
use mongodb::{
    Client, Collection as MongoCollection,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::{ClientOptions, FindOneOptions, FindOptions as MongoFindOptions},
};
use tracing::debug;
use docmapper_core::{
    backend::{DeleteOutcome, DocumentCursor, FindOptions, StoreBackend, StoreBackendBuilder, UpdateOutcome, WriteOptions},
    error::{MapperError, MapperResult, StorageError, StorageErrorKind},
};


/// Server error codes the persister needs to tell apart.
const IMMUTABLE_FIELD: i32 = 66;
const LEGACY_MOD_ON_ID: i32 = 10148;
const DUPLICATE_KEY: i32 = 11000;
const FAILED_TO_PARSE: i32 = 9;

#[derive(Debug)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    /// Name of the database every collection lives in.
    pub fn database(&self) -> &str {
        &self.database
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client
            .database(&self.database)
            .collection(collection_name)
    }

    pub async fn shutdown(self) -> MapperResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}

/// Translates a driver error into a classified storage error.
fn storage_error(err: MongoError) -> MapperError {
    let (code, message) = match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(e)) => (Some(e.code), e.message.clone()),
        ErrorKind::Command(e) => (Some(e.code), e.message.clone()),
        ErrorKind::InsertMany(e) => match e.write_errors.as_ref().and_then(|errors| errors.first()) {
            Some(first) => (Some(first.code), first.message.clone()),
            None => (None, err.to_string()),
        },
        _ => (None, err.to_string()),
    };

    StorageError::new(classify(code, &message), message).into()
}

/// Error kind of a server error code, falling back to the legacy `_id` message.
fn classify(code: Option<i32>, message: &str) -> StorageErrorKind {
    match code {
        Some(IMMUTABLE_FIELD | LEGACY_MOD_ON_ID) => StorageErrorKind::ImmutableIdentifier,
        Some(DUPLICATE_KEY) => StorageErrorKind::DuplicateKey,
        Some(FAILED_TO_PARSE) => StorageErrorKind::InvalidMutation,
        _ if message.contains("Mod on _id not allowed") => StorageErrorKind::ImmutableIdentifier,
        _ => StorageErrorKind::Other,
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    async fn insert_many(&self, documents: Vec<Document>, collection: &str) -> MapperResult<Vec<Bson>> {
        debug!(target: "docmapper::mongodb", collection, count = documents.len(), "insert_many");

        let count = documents.len();
        let result = self
            .get_collection(collection)
            .insert_many(documents)
            .await
            .map_err(storage_error)?;

        Ok(
            (0..count)
                .map(|index| {
                    result
                        .inserted_ids
                        .get(&index)
                        .cloned()
                        .unwrap_or(Bson::Null)
                })
                .collect()
        )
    }

    async fn update_one(
        &self,
        criteria: Document,
        mutation: Document,
        options: WriteOptions,
        collection: &str,
    ) -> MapperResult<UpdateOutcome> {
        debug!(target: "docmapper::mongodb", collection, criteria = %criteria, mutation = %mutation, upsert = options.upsert, "update_one");

        let result = self
            .get_collection(collection)
            .update_one(criteria, mutation)
            .upsert(options.upsert)
            .await
            .map_err(storage_error)?;

        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn delete_one(&self, criteria: Document, collection: &str) -> MapperResult<DeleteOutcome> {
        debug!(target: "docmapper::mongodb", collection, criteria = %criteria, "delete_one");

        let result = self
            .get_collection(collection)
            .delete_one(criteria)
            .await
            .map_err(storage_error)?;

        Ok(DeleteOutcome { deleted: result.deleted_count })
    }

    async fn find_one(
        &self,
        criteria: Document,
        options: FindOptions,
        collection: &str,
    ) -> MapperResult<Option<Document>> {
        let mut find_options = FindOneOptions::default();
        find_options.sort = options.sort;
        find_options.skip = options.skip;

        self.get_collection(collection)
            .find_one(criteria)
            .with_options(find_options)
            .await
            .map_err(storage_error)
    }

    async fn find(
        &self,
        criteria: Document,
        options: FindOptions,
        collection: &str,
    ) -> MapperResult<DocumentCursor> {
        let mut find_options = MongoFindOptions::default();
        find_options.sort = options.sort;
        find_options.limit = options.limit;
        find_options.skip = options.skip;

        Ok(
            self.get_collection(collection)
                .find(criteria)
                .with_options(find_options)
                .await
                .map_err(storage_error)?
                .map_err(storage_error)
                .boxed()
        )
    }
}

pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
        }
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> MapperResult<Self::Backend> {
        Ok(MongoDbStore::new(
            Client::with_options(
                ClientOptions::parse(&self.dsn)
                    .await
                    .map_err(|e| MapperError::Initialization(e.to_string()))?,
            )
            .map_err(|e| MapperError::Initialization(e.to_string()))?,
            self.database,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_codes_map_to_error_kinds() {
        assert_eq!(classify(Some(66), "Performing an update on the path '_id'"), StorageErrorKind::ImmutableIdentifier);
        assert_eq!(classify(Some(10148), ""), StorageErrorKind::ImmutableIdentifier);
        assert_eq!(classify(Some(11000), "E11000 duplicate key"), StorageErrorKind::DuplicateKey);
        assert_eq!(classify(Some(9), "'$set' is empty"), StorageErrorKind::InvalidMutation);
        assert_eq!(classify(Some(2), "bad value"), StorageErrorKind::Other);
    }

    #[test]
    fn legacy_messages_without_a_known_code_still_classify() {
        assert_eq!(classify(None, "Mod on _id not allowed"), StorageErrorKind::ImmutableIdentifier);
        assert_eq!(classify(Some(14), "exception: Mod on _id not allowed"), StorageErrorKind::ImmutableIdentifier);
        assert_eq!(classify(None, "connection reset"), StorageErrorKind::Other);
    }
}
