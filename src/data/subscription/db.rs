use bson::{doc, Document};
use chrono::{DateTime, Utc};
use mongodb::options::{FindOneAndUpdateOptions, IndexOptions, ReturnDocument};
use mongodb::{Database, IndexModel};
use rocket::futures::TryStreamExt;
use uuid::Uuid;

use crate::data::filter;
use crate::middleware::paging::PageState;
use crate::resp::problem::Problem;

use super::{PaymentStatus, Revenue, Subscription};

pub static SUBSCRIPTION_COLLECTION_NAME: &str = "subscriptions";

pub(crate) async fn ensure_indexes(db: &Database) -> Result<(), mongodb::error::Error> {
    let unique_order = IndexModel::builder()
        .keys(doc! { "order_id": 1 })
        .options(IndexOptions::builder().unique(true).build())
        .build();

    db.collection::<Subscription>(SUBSCRIPTION_COLLECTION_NAME)
        .create_index(unique_order, None)
        .await?;
    Ok(())
}

pub trait SubscriptionDbExt {
    async fn create_subscription(&self, subscription: &Subscription) -> Result<(), Problem>;
    async fn find_subscription_by_order(&self, order_id: &str) -> Result<Option<Subscription>, Problem>;
    /// Marks a pending subscription paid. Returns `None` when the order is
    /// unknown or was already settled.
    async fn mark_subscription_paid(
        &self,
        order_id: &str,
        payment_id: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<Option<Subscription>, Problem>;
    async fn mark_subscription_failed(&self, order_id: &str) -> Result<(), Problem>;
    async fn set_subscription_batch(&self, id: Uuid, batch: Uuid) -> Result<(), Problem>;
    async fn list_subscriptions(&self, student: Option<Uuid>, page: PageState) -> Result<Vec<Subscription>, Problem>;
    async fn count_paid_subscriptions(&self) -> Result<u64, Problem>;
    async fn revenue_by_currency(&self) -> Result<Vec<Revenue>, Problem>;
}

impl SubscriptionDbExt for Database {
    async fn create_subscription(&self, subscription: &Subscription) -> Result<(), Problem> {
        self.collection::<Subscription>(SUBSCRIPTION_COLLECTION_NAME)
            .insert_one(subscription, None)
            .await?;
        Ok(())
    }

    async fn find_subscription_by_order(&self, order_id: &str) -> Result<Option<Subscription>, Problem> {
        self.collection(SUBSCRIPTION_COLLECTION_NAME)
            .find_one(doc! { "order_id": order_id }, None)
            .await
            .map_err(Problem::from)
    }

    async fn mark_subscription_paid(
        &self,
        order_id: &str,
        payment_id: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<Option<Subscription>, Problem> {
        self.collection::<Subscription>(SUBSCRIPTION_COLLECTION_NAME)
            .find_one_and_update(
                doc! { "order_id": order_id, "status": { "$ne": PaymentStatus::Paid } },
                doc! {
                    "$set": {
                        "status": PaymentStatus::Paid,
                        "payment_id": payment_id,
                        "paid_at": bson::to_bson(&paid_at)?,
                    }
                },
                FindOneAndUpdateOptions::builder()
                    .return_document(ReturnDocument::After)
                    .build(),
            )
            .await
            .map_err(Problem::from)
    }

    async fn mark_subscription_failed(&self, order_id: &str) -> Result<(), Problem> {
        self.collection::<Subscription>(SUBSCRIPTION_COLLECTION_NAME)
            .update_one(
                doc! { "order_id": order_id, "status": PaymentStatus::Pending },
                doc! { "$set": { "status": PaymentStatus::Failed } },
                None,
            )
            .await?;
        Ok(())
    }

    async fn set_subscription_batch(&self, id: Uuid, batch: Uuid) -> Result<(), Problem> {
        self.collection::<Subscription>(SUBSCRIPTION_COLLECTION_NAME)
            .update_one(
                filter::by_id(id),
                doc! { "$set": { "batch": filter::id_bson(batch) } },
                None,
            )
            .await?;
        Ok(())
    }

    async fn list_subscriptions(&self, student: Option<Uuid>, page: PageState) -> Result<Vec<Subscription>, Problem> {
        let query = match student {
            Some(student) => filter::by_field("student", student),
            None => doc! {},
        };

        let cursor = self
            .collection::<Subscription>(SUBSCRIPTION_COLLECTION_NAME)
            .find(query, page.find_options(doc! { "created": -1 }))
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn count_paid_subscriptions(&self) -> Result<u64, Problem> {
        self.collection::<Subscription>(SUBSCRIPTION_COLLECTION_NAME)
            .count_documents(doc! { "status": PaymentStatus::Paid }, None)
            .await
            .map_err(Problem::from)
    }

    async fn revenue_by_currency(&self) -> Result<Vec<Revenue>, Problem> {
        let pipeline = vec![
            doc! { "$match": { "status": PaymentStatus::Paid } },
            doc! {
                "$group": {
                    "_id": "$currency",
                    "total": { "$sum": "$amount" },
                    "payments": { "$sum": 1 },
                }
            },
            doc! { "$sort": { "_id": 1 } },
        ];

        let groups: Vec<Document> = self
            .collection::<Subscription>(SUBSCRIPTION_COLLECTION_NAME)
            .aggregate(pipeline, None)
            .await?
            .try_collect()
            .await?;

        Ok(groups
            .into_iter()
            .map(|group| Revenue {
                currency: group.get_str("_id").unwrap_or_default().to_string(),
                total: numeric(&group, "total"),
                payments: numeric(&group, "payments").max(0) as u64,
            })
            .collect())
    }
}

/// `$sum` yields Int32 or Int64 depending on magnitude.
fn numeric(doc: &Document, key: &str) -> i64 {
    match doc.get(key) {
        Some(bson::Bson::Int32(it)) => i64::from(*it),
        Some(bson::Bson::Int64(it)) => *it,
        Some(bson::Bson::Double(it)) => *it as i64,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_read_any_integer_width() {
        let group = doc! { "_id": "INR", "total": 150_00_i64, "payments": 3_i32, "odd": "x" };
        assert_eq!(numeric(&group, "total"), 150_00);
        assert_eq!(numeric(&group, "payments"), 3);
        assert_eq!(numeric(&group, "odd"), 0);
        assert_eq!(numeric(&group, "missing"), 0);
    }
}
