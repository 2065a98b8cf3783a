use mongodb::Database;
use rocket::futures::TryStreamExt;
use serde::de::DeserializeOwned;

use crate::resp::problem::Problem;

pub mod assignment;
pub mod batch;
pub mod catalog;
pub mod filter;
pub mod session;
pub mod subscription;
pub mod user;
pub mod uuid_str;

/// Collects a typed query into a vector, skipping documents that no longer
/// deserialize instead of failing the whole listing.
pub async fn collect_lenient<T>(cursor: mongodb::Cursor<bson::Document>) -> Result<Vec<T>, Problem>
where
    T: DeserializeOwned,
{
    let documents: Vec<bson::Document> = cursor.try_collect().await?;

    Ok(documents
        .into_iter()
        .filter_map(|doc| match bson::from_document::<T>(doc) {
            Ok(it) => Some(it),
            Err(e) => {
                tracing::warn!(
                    "Unable to deserialize {} document: {}",
                    std::any::type_name::<T>(),
                    e
                );
                None
            }
        })
        .collect())
}

/// Makes sure the unique indexes the data layer relies on exist.
pub async fn ensure_indexes(db: &Database) -> Result<(), mongodb::error::Error> {
    user::db::ensure_indexes(db).await?;
    session::db::ensure_indexes(db).await?;
    subscription::db::ensure_indexes(db).await?;
    Ok(())
}
