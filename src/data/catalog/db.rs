use bson::doc;
use mongodb::options::FindOptions;
use mongodb::Database;
use rocket::futures::TryStreamExt;
use uuid::Uuid;

use crate::data::filter;
use crate::resp::problem::{problems, Problem};

use super::{Level, Subject};

pub static SUBJECT_COLLECTION_NAME: &str = "subjects";
pub static LEVEL_COLLECTION_NAME: &str = "levels";

pub trait CatalogDbExt {
    async fn create_subject(&self, subject: &Subject) -> Result<(), Problem>;
    async fn list_subjects(&self) -> Result<Vec<Subject>, Problem>;
    async fn get_subject(&self, id: Uuid) -> Result<Option<Subject>, Problem>;
    async fn update_subject(&self, subject: &Subject) -> Result<bool, Problem>;
    /// Deletes the subject together with its levels.
    async fn delete_subject(&self, id: Uuid) -> Result<Option<Subject>, Problem>;

    async fn create_level(&self, level: &Level) -> Result<(), Problem>;
    async fn list_levels(&self, subject: Uuid) -> Result<Vec<Level>, Problem>;
    async fn get_level(&self, id: Uuid) -> Result<Option<Level>, Problem>;
    async fn require_level(&self, id: Uuid) -> Result<Level, Problem>;
    async fn update_level(&self, level: &Level) -> Result<bool, Problem>;
    async fn delete_level(&self, id: Uuid) -> Result<Option<Level>, Problem>;
}

impl CatalogDbExt for Database {
    async fn create_subject(&self, subject: &Subject) -> Result<(), Problem> {
        self.collection::<Subject>(SUBJECT_COLLECTION_NAME)
            .insert_one(subject, None)
            .await?;
        Ok(())
    }

    async fn list_subjects(&self) -> Result<Vec<Subject>, Problem> {
        let cursor = self
            .collection::<Subject>(SUBJECT_COLLECTION_NAME)
            .find(
                doc! {},
                FindOptions::builder().sort(doc! { "name": 1 }).build(),
            )
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn get_subject(&self, id: Uuid) -> Result<Option<Subject>, Problem> {
        self.collection(SUBJECT_COLLECTION_NAME)
            .find_one(filter::by_id(id), None)
            .await
            .map_err(Problem::from)
    }

    async fn update_subject(&self, subject: &Subject) -> Result<bool, Problem> {
        let result = self
            .collection::<Subject>(SUBJECT_COLLECTION_NAME)
            .replace_one(filter::by_id(subject.id), subject, None)
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn delete_subject(&self, id: Uuid) -> Result<Option<Subject>, Problem> {
        let removed: Option<Subject> = self
            .collection(SUBJECT_COLLECTION_NAME)
            .find_one_and_delete(filter::by_id(id), None)
            .await?;

        if removed.is_some() {
            let levels = self
                .collection::<Level>(LEVEL_COLLECTION_NAME)
                .delete_many(filter::by_field("subject", id), None)
                .await?;
            tracing::info!(
                "Removed subject {} with {} level(s).",
                id,
                levels.deleted_count
            );
        }

        Ok(removed)
    }

    async fn create_level(&self, level: &Level) -> Result<(), Problem> {
        if self.get_subject(level.subject).await?.is_none() {
            return Err(problems::not_found("Subject", level.subject));
        }

        self.collection::<Level>(LEVEL_COLLECTION_NAME)
            .insert_one(level, None)
            .await?;
        Ok(())
    }

    async fn list_levels(&self, subject: Uuid) -> Result<Vec<Level>, Problem> {
        let cursor = self
            .collection::<Level>(LEVEL_COLLECTION_NAME)
            .find(
                filter::by_field("subject", subject),
                FindOptions::builder().sort(doc! { "price": 1 }).build(),
            )
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn get_level(&self, id: Uuid) -> Result<Option<Level>, Problem> {
        self.collection(LEVEL_COLLECTION_NAME)
            .find_one(filter::by_id(id), None)
            .await
            .map_err(Problem::from)
    }

    async fn require_level(&self, id: Uuid) -> Result<Level, Problem> {
        self.get_level(id)
            .await?
            .ok_or_else(|| problems::not_found("Level", id))
    }

    async fn update_level(&self, level: &Level) -> Result<bool, Problem> {
        let result = self
            .collection::<Level>(LEVEL_COLLECTION_NAME)
            .replace_one(filter::by_id(level.id), level, None)
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn delete_level(&self, id: Uuid) -> Result<Option<Level>, Problem> {
        self.collection(LEVEL_COLLECTION_NAME)
            .find_one_and_delete(filter::by_id(id), None)
            .await
            .map_err(Problem::from)
    }
}
