use bson::{doc, Bson, Document};
use chrono::NaiveDate;
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument};
use mongodb::Database;
use rocket::futures::TryStreamExt;
use uuid::Uuid;

use crate::data::assignment::db::ASSIGNMENT_COLLECTION_NAME;
use crate::data::collect_lenient;
use crate::data::filter::{self, id_bson};
use crate::data::session::db::CANCELLATION_COLLECTION_NAME;
use crate::middleware::paging::PageState;
use crate::resp::problem::{problems, Problem};
use crate::schedule::DateWindow;

use super::{AttendanceRecord, Batch, Lecture, Note};

pub static BATCH_COLLECTION_NAME: &str = "batches";

/// Which batches a caller gets to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchScope {
    All,
    Teacher(Uuid),
    Student(Uuid),
}

impl BatchScope {
    fn filter(self) -> Document {
        match self {
            BatchScope::All => doc! {},
            BatchScope::Teacher(id) => filter::by_field("teacher", id),
            BatchScope::Student(id) => filter::by_field("students", id),
        }
    }
}

/// Outcome of an enrollment attempt.
#[derive(Debug, Clone)]
pub enum Enrollment {
    Enrolled(Batch),
    AlreadyEnrolled(Batch),
    Full,
}

fn date_bson(date: NaiveDate) -> Result<Bson, Problem> {
    Ok(bson::to_bson(&date)?)
}

fn return_after() -> FindOneAndUpdateOptions {
    FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::After)
        .build()
}

impl Enrollment {
    /// Outcome for a batch the enrollment update didn't match: either the
    /// student is on the roster already or there was no free seat.
    pub fn unchanged(batch: Batch, student: Uuid) -> Enrollment {
        if batch.is_student(student) {
            Enrollment::AlreadyEnrolled(batch)
        } else {
            Enrollment::Full
        }
    }
}

/// Pipeline stage recomputing `current_students` from the roster.
fn count_students() -> Document {
    doc! { "$set": { "current_students": { "$size": { "$ifNull": ["$students", []] } } } }
}

/// Matches the batch only while `student` isn't enrolled and a seat is free,
/// so capacity is checked against the stored roster in the same write.
fn enroll_filter(id: Uuid, student: Uuid) -> Document {
    let mut query = filter::by_id(id);
    query.insert("students", doc! { "$ne": id_bson(student) });
    query.insert(
        "$expr",
        doc! {
            "$or": [
                { "$eq": [{ "$ifNull": ["$max_students", 0] }, 0] },
                { "$lt": [{ "$size": { "$ifNull": ["$students", []] } }, "$max_students"] },
            ]
        },
    );
    query
}

fn enroll_update(student: Uuid) -> Vec<Document> {
    vec![
        doc! {
            "$set": {
                "students": {
                    "$concatArrays": [
                        { "$ifNull": ["$students", []] },
                        { "$literal": [id_bson(student)] },
                    ]
                }
            }
        },
        count_students(),
    ]
}

fn remove_update(student: Uuid) -> Vec<Document> {
    vec![
        doc! {
            "$set": {
                "students": {
                    "$filter": {
                        "input": { "$ifNull": ["$students", []] },
                        "cond": { "$ne": ["$$this", id_bson(student)] },
                    }
                }
            }
        },
        count_students(),
    ]
}

pub trait BatchDbExt {
    async fn create_batch(&self, batch: &Batch) -> Result<(), Problem>;
    async fn get_batch(&self, id: Uuid) -> Result<Option<Batch>, Problem>;
    async fn require_batch(&self, id: Uuid) -> Result<Batch, Problem>;
    async fn list_batches(&self, scope: BatchScope, page: PageState) -> Result<Vec<Batch>, Problem>;
    /// Batches in scope whose active dates overlap `window`.
    async fn list_batches_in_window(
        &self,
        scope: BatchScope,
        window: &DateWindow,
    ) -> Result<Vec<Batch>, Problem>;
    /// Stores the batch settings, leaving roster, notes and attendance alone.
    async fn update_batch_settings(&self, batch: &Batch) -> Result<Option<Batch>, Problem>;
    /// Deletes the batch with its cancellations and assignments.
    async fn delete_batch(&self, id: Uuid) -> Result<Option<Batch>, Problem>;

    async fn enroll_student(&self, id: Uuid, student: Uuid) -> Result<Enrollment, Problem>;
    async fn remove_student(&self, id: Uuid, student: Uuid) -> Result<Option<Batch>, Problem>;

    async fn add_note(&self, id: Uuid, note: &Note) -> Result<Option<Batch>, Problem>;
    async fn add_lecture(&self, id: Uuid, lecture: &Lecture) -> Result<Option<Batch>, Problem>;
    async fn set_meeting_link(&self, id: Uuid, link: Option<String>) -> Result<Option<Batch>, Problem>;
    /// Stores attendance for one session, replacing an earlier record of the
    /// same session.
    async fn record_attendance(
        &self,
        id: Uuid,
        record: &AttendanceRecord,
    ) -> Result<Option<Batch>, Problem>;

    async fn count_batches(&self) -> Result<u64, Problem>;
}

impl BatchDbExt for Database {
    async fn create_batch(&self, batch: &Batch) -> Result<(), Problem> {
        self.collection::<Batch>(BATCH_COLLECTION_NAME)
            .insert_one(batch, None)
            .await?;
        Ok(())
    }

    async fn get_batch(&self, id: Uuid) -> Result<Option<Batch>, Problem> {
        self.collection(BATCH_COLLECTION_NAME)
            .find_one(filter::by_id(id), None)
            .await
            .map_err(Problem::from)
    }

    async fn require_batch(&self, id: Uuid) -> Result<Batch, Problem> {
        self.get_batch(id)
            .await?
            .ok_or_else(|| problems::not_found("Batch", id))
    }

    async fn list_batches(&self, scope: BatchScope, page: PageState) -> Result<Vec<Batch>, Problem> {
        let cursor = self
            .collection::<Document>(BATCH_COLLECTION_NAME)
            .find(scope.filter(), page.find_options(doc! { "start_date": -1 }))
            .await?;
        collect_lenient(cursor).await
    }

    async fn list_batches_in_window(
        &self,
        scope: BatchScope,
        window: &DateWindow,
    ) -> Result<Vec<Batch>, Problem> {
        let mut query = scope.filter();
        query.insert("start_date", doc! { "$lte": date_bson(window.end)? });
        query.insert("end_date", doc! { "$gte": date_bson(window.start)? });

        let cursor = self
            .collection::<Batch>(BATCH_COLLECTION_NAME)
            .find(query, FindOptions::builder().sort(doc! { "start_date": 1 }).build())
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn update_batch_settings(&self, batch: &Batch) -> Result<Option<Batch>, Problem> {
        let update = doc! {
            "$set": {
                "name": batch.name.clone(),
                "start_date": date_bson(batch.start_date)?,
                "end_date": date_bson(batch.end_date)?,
                "schedule": bson::to_bson(&batch.schedule)?,
                "teacher": batch.teacher.map(id_bson),
                "max_students": batch.max_students.map(i64::from),
            }
        };

        self.collection::<Batch>(BATCH_COLLECTION_NAME)
            .find_one_and_update(filter::by_id(batch.id), update, return_after())
            .await
            .map_err(Problem::from)
    }

    async fn delete_batch(&self, id: Uuid) -> Result<Option<Batch>, Problem> {
        let removed: Option<Batch> = self
            .collection(BATCH_COLLECTION_NAME)
            .find_one_and_delete(filter::by_id(id), None)
            .await?;

        if removed.is_some() {
            let cancellations = self
                .collection::<Document>(CANCELLATION_COLLECTION_NAME)
                .delete_many(filter::by_field("batch", id), None)
                .await?;
            let assignments = self
                .collection::<Document>(ASSIGNMENT_COLLECTION_NAME)
                .delete_many(filter::by_field("batch", id), None)
                .await?;
            tracing::info!(
                "Removed batch {} with {} cancellation(s) and {} assignment(s).",
                id,
                cancellations.deleted_count,
                assignments.deleted_count
            );
        }

        Ok(removed)
    }

    async fn enroll_student(&self, id: Uuid, student: Uuid) -> Result<Enrollment, Problem> {
        let updated: Option<Batch> = self
            .collection(BATCH_COLLECTION_NAME)
            .find_one_and_update(enroll_filter(id, student), enroll_update(student), return_after())
            .await?;
        if let Some(batch) = updated {
            tracing::info!("Enrolled student {} into batch {}.", student, id);
            return Ok(Enrollment::Enrolled(batch));
        }

        let batch = self.require_batch(id).await?;
        Ok(Enrollment::unchanged(batch, student))
    }

    async fn remove_student(&self, id: Uuid, student: Uuid) -> Result<Option<Batch>, Problem> {
        self.collection::<Batch>(BATCH_COLLECTION_NAME)
            .find_one_and_update(filter::by_id(id), remove_update(student), return_after())
            .await
            .map_err(Problem::from)
    }

    async fn add_note(&self, id: Uuid, note: &Note) -> Result<Option<Batch>, Problem> {
        self.collection::<Batch>(BATCH_COLLECTION_NAME)
            .find_one_and_update(
                filter::by_id(id),
                doc! { "$push": { "notes": bson::to_bson(note)? } },
                return_after(),
            )
            .await
            .map_err(Problem::from)
    }

    async fn add_lecture(&self, id: Uuid, lecture: &Lecture) -> Result<Option<Batch>, Problem> {
        self.collection::<Batch>(BATCH_COLLECTION_NAME)
            .find_one_and_update(
                filter::by_id(id),
                doc! { "$push": { "lectures": bson::to_bson(lecture)? } },
                return_after(),
            )
            .await
            .map_err(Problem::from)
    }

    async fn set_meeting_link(&self, id: Uuid, link: Option<String>) -> Result<Option<Batch>, Problem> {
        self.collection::<Batch>(BATCH_COLLECTION_NAME)
            .find_one_and_update(
                filter::by_id(id),
                doc! { "$set": { "meeting_link": link } },
                return_after(),
            )
            .await
            .map_err(Problem::from)
    }

    async fn record_attendance(
        &self,
        id: Uuid,
        record: &AttendanceRecord,
    ) -> Result<Option<Batch>, Problem> {
        let date = date_bson(record.date)?;
        let start_time = bson::to_bson(&record.start_time)?;

        let update = vec![doc! {
            "$set": {
                "attendance": {
                    "$concatArrays": [
                        {
                            "$filter": {
                                "input": { "$ifNull": ["$attendance", []] },
                                "cond": {
                                    "$not": [{
                                        "$and": [
                                            { "$eq": ["$$this.date", date] },
                                            { "$eq": ["$$this.start_time", start_time] },
                                        ]
                                    }]
                                },
                            }
                        },
                        { "$literal": [bson::to_bson(record)?] },
                    ]
                }
            }
        }];

        self.collection::<Batch>(BATCH_COLLECTION_NAME)
            .find_one_and_update(filter::by_id(id), update, return_after())
            .await
            .map_err(Problem::from)
    }

    async fn count_batches(&self) -> Result<u64, Problem> {
        self.collection::<Batch>(BATCH_COLLECTION_NAME)
            .count_documents(doc! {}, None)
            .await
            .map_err(Problem::from)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime, Utc, Weekday};

    use super::*;
    use crate::data::catalog::Level;
    use crate::schedule::ScheduleEntry;

    fn batch_of(students: Vec<Uuid>) -> Batch {
        let level = Level {
            id: Uuid::new_v4(),
            subject: Uuid::new_v4(),
            name: "Violin 1".to_string(),
            description: String::new(),
            price: 50_00,
            currency: "INR".to_string(),
            duration_weeks: 8,
            schedule: vec![ScheduleEntry::new(
                Weekday::Wed,
                NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            )],
            created: Utc::now(),
        };
        let start = NaiveDate::from_ymd_opt(2024, 3, 6).unwrap();
        let mut batch = Batch::personal(&level, students[0], "Mia", start).unwrap();
        batch.current_students = students.len() as u32;
        batch.students = students;
        batch
    }

    #[test]
    fn roster_updates_recompute_the_count_last() {
        let student = Uuid::new_v4();
        let recount = count_students();
        assert_eq!(
            recount,
            doc! { "$set": { "current_students": { "$size": { "$ifNull": ["$students", []] } } } }
        );

        for update in [enroll_update(student), remove_update(student)] {
            assert_eq!(update.len(), 2);
            assert!(update[0].get_document("$set").unwrap().contains_key("students"));
            assert_eq!(update[1], recount, "count follows the roster change in the same write");
        }
    }

    #[test]
    fn enrollment_appends_once_and_respects_capacity() {
        let (batch, student) = (Uuid::new_v4(), Uuid::new_v4());
        let query = enroll_filter(batch, student);

        assert_eq!(query.get("_id"), Some(&id_bson(batch)));
        assert_eq!(
            query.get_document("students").unwrap(),
            &doc! { "$ne": id_bson(student) },
            "an enrolled student never matches, so the roster can't hold duplicates"
        );

        let capacity = query.get_document("$expr").unwrap().get_array("$or").unwrap();
        assert_eq!(capacity.len(), 2);
        assert_eq!(
            capacity[0].as_document().unwrap(),
            &doc! { "$eq": [{ "$ifNull": ["$max_students", 0] }, 0] }
        );
        assert_eq!(
            capacity[1].as_document().unwrap(),
            &doc! { "$lt": [{ "$size": { "$ifNull": ["$students", []] } }, "$max_students"] }
        );

        let appended = enroll_update(student)[0]
            .get_document("$set")
            .and_then(|it| it.get_document("students"))
            .and_then(|it| it.get_array("$concatArrays"))
            .unwrap()[1]
            .clone();
        assert_eq!(appended, Bson::Document(doc! { "$literal": [id_bson(student)] }));
    }

    #[test]
    fn removal_filters_out_only_that_student() {
        let student = Uuid::new_v4();
        let cond = remove_update(student)[0]
            .get_document("$set")
            .and_then(|it| it.get_document("students"))
            .and_then(|it| it.get_document("$filter"))
            .and_then(|it| it.get_document("cond"))
            .unwrap()
            .clone();
        assert_eq!(cond, doc! { "$ne": ["$$this", id_bson(student)] });
    }

    #[test]
    fn enrolling_again_is_idempotent() {
        let student = Uuid::new_v4();
        let batch = batch_of(vec![student]);

        match Enrollment::unchanged(batch, student) {
            Enrollment::AlreadyEnrolled(batch) => {
                assert_eq!(batch.students, vec![student]);
                assert_eq!(batch.current_students, 1);
            }
            other => panic!("expected an existing enrollment, got {:?}", other),
        }

        let full = batch_of(vec![student]);
        assert!(matches!(Enrollment::unchanged(full, Uuid::new_v4()), Enrollment::Full));
    }
}
