use std::collections::HashMap;

use bson::doc;
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{FindOptions, IndexOptions};
use mongodb::{Database, IndexModel};
use rocket::futures::TryStreamExt;
use uuid::Uuid;

use crate::data::filter::{self, id_bson};
use crate::resp::problem::Problem;
use crate::schedule::{CancelledSlots, DateWindow};

use super::{problem, to_slots, CancelledSession};

pub static CANCELLATION_COLLECTION_NAME: &str = "cancellations";

const DUPLICATE_KEY: i32 = 11000;

pub(crate) async fn ensure_indexes(db: &Database) -> Result<(), mongodb::error::Error> {
    let unique_slot = IndexModel::builder()
        .keys(doc! { "batch": 1, "date": 1, "start_time": 1 })
        .options(IndexOptions::builder().unique(true).build())
        .build();

    db.collection::<CancelledSession>(CANCELLATION_COLLECTION_NAME)
        .create_index(unique_slot, None)
        .await?;
    Ok(())
}

fn is_duplicate(error: &mongodb::error::Error) -> bool {
    matches!(
        error.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(e)) if e.code == DUPLICATE_KEY
    )
}

pub trait CancellationDbExt {
    async fn create_cancellation(&self, cancellation: &CancelledSession) -> Result<(), Problem>;
    async fn list_cancellations(
        &self,
        batch: Uuid,
        window: Option<&DateWindow>,
    ) -> Result<Vec<CancelledSession>, Problem>;
    async fn cancelled_slots(&self, batch: Uuid) -> Result<CancelledSlots, Problem>;
    /// Cancelled slots of several batches at once, keyed by batch.
    async fn cancelled_slots_for(&self, batches: &[Uuid]) -> Result<HashMap<Uuid, CancelledSlots>, Problem>;
    async fn delete_cancellation(&self, batch: Uuid, id: Uuid) -> Result<Option<CancelledSession>, Problem>;
}

impl CancellationDbExt for Database {
    async fn create_cancellation(&self, cancellation: &CancelledSession) -> Result<(), Problem> {
        match self
            .collection::<CancelledSession>(CANCELLATION_COLLECTION_NAME)
            .insert_one(cancellation, None)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate(&e) => Err(problem::already_cancelled()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_cancellations(
        &self,
        batch: Uuid,
        window: Option<&DateWindow>,
    ) -> Result<Vec<CancelledSession>, Problem> {
        let mut query = filter::by_field("batch", batch);
        if let Some(window) = window {
            query.insert(
                "date",
                doc! {
                    "$gte": bson::to_bson(&window.start)?,
                    "$lte": bson::to_bson(&window.end)?,
                },
            );
        }

        let cursor = self
            .collection::<CancelledSession>(CANCELLATION_COLLECTION_NAME)
            .find(
                query,
                FindOptions::builder()
                    .sort(doc! { "date": 1, "start_time": 1 })
                    .build(),
            )
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn cancelled_slots(&self, batch: Uuid) -> Result<CancelledSlots, Problem> {
        let cancellations = self.list_cancellations(batch, None).await?;
        Ok(to_slots(&cancellations))
    }

    async fn cancelled_slots_for(&self, batches: &[Uuid]) -> Result<HashMap<Uuid, CancelledSlots>, Problem> {
        let mut result: HashMap<Uuid, CancelledSlots> = HashMap::new();
        if batches.is_empty() {
            return Ok(result);
        }

        let ids: Vec<bson::Bson> = batches.iter().copied().map(id_bson).collect();
        let cancellations: Vec<CancelledSession> = self
            .collection::<CancelledSession>(CANCELLATION_COLLECTION_NAME)
            .find(doc! { "batch": { "$in": ids } }, None)
            .await?
            .try_collect()
            .await?;

        for it in cancellations {
            result.entry(it.batch).or_default().insert(it.date, it.start_time);
        }
        Ok(result)
    }

    async fn delete_cancellation(&self, batch: Uuid, id: Uuid) -> Result<Option<CancelledSession>, Problem> {
        let mut query = filter::by_id(id);
        query.insert("batch", id_bson(batch));

        self.collection(CANCELLATION_COLLECTION_NAME)
            .find_one_and_delete(query, None)
            .await
            .map_err(Problem::from)
    }
}
