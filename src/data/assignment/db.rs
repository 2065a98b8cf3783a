use bson::{doc, Document};
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument};
use mongodb::Database;
use rocket::futures::TryStreamExt;
use uuid::Uuid;

use crate::data::filter::{self, id_bson};
use crate::resp::problem::{problems, Problem};

use super::{Assignment, Feedback, Submission};

pub static ASSIGNMENT_COLLECTION_NAME: &str = "assignments";

/// Replaces the student's submission in one write. The feedback thread is
/// read from the stored submission, so replies added concurrently survive.
fn submission_update(submission: &Submission) -> Result<Vec<Document>, Problem> {
    let student = id_bson(submission.student);
    let mut fresh = bson::to_document(submission)?;
    fresh.remove("feedback");

    Ok(vec![doc! {
        "$set": {
            "submissions": {
                "$let": {
                    "vars": {
                        "previous": {
                            "$filter": {
                                "input": { "$ifNull": ["$submissions", []] },
                                "cond": { "$eq": ["$$this.student", student.clone()] },
                            }
                        }
                    },
                    "in": {
                        "$concatArrays": [
                            {
                                "$filter": {
                                    "input": { "$ifNull": ["$submissions", []] },
                                    "cond": { "$ne": ["$$this.student", student] },
                                }
                            },
                            [{
                                "$mergeObjects": [
                                    { "$literal": fresh },
                                    {
                                        "feedback": {
                                            "$ifNull": [
                                                { "$arrayElemAt": ["$$previous.feedback", 0] },
                                                [],
                                            ]
                                        }
                                    },
                                ]
                            }],
                        ]
                    }
                }
            }
        }
    }])
}

pub trait AssignmentDbExt {
    async fn create_assignment(&self, assignment: &Assignment) -> Result<(), Problem>;
    async fn list_assignments(&self, batch: Uuid) -> Result<Vec<Assignment>, Problem>;
    async fn get_assignment(&self, id: Uuid) -> Result<Option<Assignment>, Problem>;
    async fn require_assignment(&self, id: Uuid) -> Result<Assignment, Problem>;
    async fn delete_assignment(&self, id: Uuid) -> Result<Option<Assignment>, Problem>;

    /// Stores `submission`, replacing the student's previous one.
    async fn put_submission(&self, id: Uuid, submission: &Submission) -> Result<Option<Assignment>, Problem> {
        self.collection::<Assignment>(ASSIGNMENT_COLLECTION_NAME)
            .find_one_and_update(
                filter::by_id(id),
                submission_update(submission)?,
                FindOneAndUpdateOptions::builder()
                    .return_document(ReturnDocument::After)
                    .build(),
            )
            .await
            .map_err(Problem::from)
    }

    async fn add_feedback(
        &self,
        id: Uuid,
        student: Uuid,
        feedback: &Feedback,
    ) -> Result<Option<Assignment>, Problem> {
        let mut query = filter::by_id(id);
        query.insert("submissions.student", id_bson(student));

        self.collection::<Assignment>(ASSIGNMENT_COLLECTION_NAME)
            .find_one_and_update(
                query,
                doc! { "$push": { "submissions.$[sub].feedback": bson::to_bson(feedback)? } },
                FindOneAndUpdateOptions::builder()
                    .array_filters(vec![doc! { "sub.student": id_bson(student) }])
                    .return_document(ReturnDocument::After)
                    .build(),
            )
            .await
            .map_err(Problem::from)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn stage_submissions(update: &[Document]) -> &Document {
        update[0]
            .get_document("$set")
            .and_then(|it| it.get_document("submissions"))
            .and_then(|it| it.get_document("$let"))
            .expect("submission pipeline sets submissions with $let")
    }

    #[test]
    fn resubmission_takes_feedback_from_stored_document() {
        let submission = Submission {
            student: Uuid::new_v4(),
            content: "take 2".to_string(),
            attachment_url: None,
            submitted_at: Utc::now(),
            late: false,
            feedback: vec![],
        };

        let update = submission_update(&submission).unwrap();
        assert_eq!(update.len(), 1);

        let replace = stage_submissions(&update);
        let merged = replace
            .get_document("in")
            .and_then(|it| it.get_array("$concatArrays"))
            .unwrap()[1]
            .as_array()
            .unwrap()[0]
            .as_document()
            .unwrap()
            .get_array("$mergeObjects")
            .unwrap()
            .clone();

        let fresh = merged[0].as_document().unwrap().get_document("$literal").unwrap();
        assert_eq!(fresh.get_str("content").unwrap(), "take 2");
        assert!(!fresh.contains_key("feedback"), "sent copy must not overwrite the thread");

        let kept = merged[1].as_document().unwrap().get_document("feedback").unwrap();
        let source = kept.get_array("$ifNull").unwrap()[0].as_document().unwrap();
        assert_eq!(
            source.get_array("$arrayElemAt").unwrap()[0].as_str(),
            Some("$$previous.feedback")
        );
        assert_eq!(
            replace
                .get_document("vars")
                .and_then(|it| it.get_document("previous"))
                .and_then(|it| it.get_document("$filter"))
                .and_then(|it| it.get_document("cond"))
                .and_then(|it| it.get_array("$eq"))
                .unwrap()[1],
            id_bson(submission.student)
        );
    }
}
