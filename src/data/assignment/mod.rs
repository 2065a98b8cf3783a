use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::resp::jwt::{auth_problem, UserRoleToken};
use crate::resp::problem::{problems, Problem};
use crate::role::Role;

pub mod db;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Feedback {
    #[serde(with = "crate::data::uuid_str")]
    pub id: Uuid,
    #[serde(with = "crate::data::uuid_str")]
    pub author: Uuid,
    pub author_role: Role,
    pub text: String,
    #[serde(default)]
    pub grade: Option<String>,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Submission {
    #[serde(with = "crate::data::uuid_str")]
    pub student: Uuid,
    pub content: String,
    #[serde(default)]
    pub attachment_url: Option<String>,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub late: bool,
    /// Feedback thread, oldest first. Survives resubmission.
    #[serde(default)]
    pub feedback: Vec<Feedback>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Assignment {
    #[serde(rename = "_id", with = "crate::data::uuid_str")]
    pub id: Uuid,
    #[serde(with = "crate::data::uuid_str")]
    pub batch: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub due_date: DateTime<Utc>,
    #[serde(with = "crate::data::uuid_str")]
    pub created_by: Uuid,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub submissions: Vec<Submission>,
}

impl Assignment {
    pub fn submission(&self, student: Uuid) -> Option<&Submission> {
        self.submissions.iter().find(|it| it.student == student)
    }

    /// Students only get to see their own submission.
    pub fn view_for(mut self, auth: &UserRoleToken, manages_batch: bool) -> Assignment {
        if !manages_batch {
            self.submissions.retain(|it| it.student == auth.user);
        }
        self
    }

    /// Builds the submission replacing any earlier one by the same student.
    /// Feedback already given stays attached.
    pub fn resubmit(&self, student: Uuid, data: SubmissionData, now: DateTime<Utc>) -> Result<Submission, Problem> {
        let content = data.content.trim().to_string();
        let attachment_url = data
            .attachment_url
            .map(|it| it.trim().to_string())
            .filter(|it| !it.is_empty());
        if content.is_empty() && attachment_url.is_none() {
            return Err(problems::bad_request(
                "Bad submission.",
                "Submission needs content or an attachment.",
            ));
        }

        let feedback = self
            .submission(student)
            .map(|it| it.feedback.clone())
            .unwrap_or_default();

        Ok(Submission {
            student,
            content,
            attachment_url,
            submitted_at: now,
            late: now > self.due_date,
            feedback,
        })
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AssignmentData {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub due_date: DateTime<Utc>,
}

impl AssignmentData {
    pub fn into_assignment(self, batch: Uuid, created_by: Uuid) -> Result<Assignment, Problem> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(problems::bad_request("Bad assignment.", "Assignment title can't be empty."));
        }
        Ok(Assignment {
            id: Uuid::new_v4(),
            batch,
            title,
            description: self.description.trim().to_string(),
            due_date: self.due_date,
            created_by,
            created: Utc::now(),
            submissions: vec![],
        })
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SubmissionData {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachment_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct FeedbackData {
    pub text: String,
    #[serde(default)]
    pub grade: Option<String>,
}

impl FeedbackData {
    /// Staff may grade; the submitting student may only reply.
    pub fn into_feedback(
        self,
        auth: &UserRoleToken,
        manages_batch: bool,
        student: Uuid,
    ) -> Result<Feedback, Problem> {
        if !manages_batch && auth.user != student {
            return Err(auth_problem(
                "Not authorized: only staff and the submitting student can comment.",
            ));
        }
        let text = self.text.trim().to_string();
        if text.is_empty() {
            return Err(problems::bad_request("Bad feedback.", "Feedback can't be empty."));
        }
        let grade = self
            .grade
            .map(|it| it.trim().to_string())
            .filter(|it| !it.is_empty());
        if grade.is_some() && !manages_batch {
            return Err(auth_problem("Not authorized: students can't grade submissions."));
        }

        Ok(Feedback {
            id: Uuid::new_v4(),
            author: auth.user,
            author_role: auth.role,
            text,
            grade,
            created: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn assignment() -> Assignment {
        AssignmentData {
            title: " Scales ".to_string(),
            description: "C major, two octaves".to_string(),
            due_date: Utc.with_ymd_and_hms(2024, 3, 10, 18, 0, 0).unwrap(),
        }
        .into_assignment(Uuid::new_v4(), Uuid::new_v4())
        .unwrap()
    }

    fn submission(content: &str) -> SubmissionData {
        SubmissionData {
            content: content.to_string(),
            attachment_url: None,
        }
    }

    #[test]
    fn title_is_required() {
        let data = AssignmentData {
            title: "  ".to_string(),
            description: String::new(),
            due_date: Utc::now(),
        };
        assert!(data.into_assignment(Uuid::new_v4(), Uuid::new_v4()).is_err());
        assert_eq!(assignment().title, "Scales");
    }

    #[test]
    fn late_submissions_are_flagged() {
        let assignment = assignment();
        let student = Uuid::new_v4();

        let on_time = assignment
            .resubmit(student, submission("done"), assignment.due_date - Duration::hours(1))
            .unwrap();
        assert!(!on_time.late);

        let late = assignment
            .resubmit(student, submission("done"), assignment.due_date + Duration::minutes(1))
            .unwrap();
        assert!(late.late);
    }

    #[test]
    fn empty_submission_is_rejected() {
        let assignment = assignment();
        let result = assignment.resubmit(Uuid::new_v4(), submission("   "), Utc::now());
        assert_eq!(result.unwrap_err().title, "Bad submission.");

        let attachment_only = SubmissionData {
            content: String::new(),
            attachment_url: Some("https://files.example.com/take1.mp3".to_string()),
        };
        assert!(assignment.resubmit(Uuid::new_v4(), attachment_only, Utc::now()).is_ok());
    }

    #[test]
    fn resubmission_keeps_feedback() {
        let mut assignment = assignment();
        let student = Uuid::new_v4();
        let teacher = UserRoleToken::for_user(Uuid::new_v4(), Role::Teacher);

        let mut first = assignment.resubmit(student, submission("take 1"), Utc::now()).unwrap();
        first.feedback.push(
            FeedbackData {
                text: "Watch the tempo".to_string(),
                grade: Some("B".to_string()),
            }
            .into_feedback(&teacher, true, student)
            .unwrap(),
        );
        assignment.submissions.push(first);

        let second = assignment.resubmit(student, submission("take 2"), Utc::now()).unwrap();
        assert_eq!(second.content, "take 2");
        assert_eq!(second.feedback.len(), 1);
        assert_eq!(second.feedback[0].grade.as_deref(), Some("B"));
    }

    #[test]
    fn feedback_permissions() {
        let student = UserRoleToken::for_user(Uuid::new_v4(), Role::Student);
        let classmate = UserRoleToken::for_user(Uuid::new_v4(), Role::Student);
        let reply = || FeedbackData {
            text: "Thanks!".to_string(),
            grade: None,
        };

        let own = reply().into_feedback(&student, false, student.user).unwrap();
        assert_eq!(own.author_role, Role::Student);

        let other = reply().into_feedback(&classmate, false, student.user);
        assert_eq!(other.unwrap_err().status, rocket::http::Status::Unauthorized);

        let self_graded = FeedbackData {
            text: "I did great".to_string(),
            grade: Some("A".to_string()),
        }
        .into_feedback(&student, false, student.user);
        assert!(self_graded.is_err());
    }

    #[test]
    fn students_see_only_their_submission() {
        let mut assignment = assignment();
        let student = UserRoleToken::for_user(Uuid::new_v4(), Role::Student);
        let classmate = Uuid::new_v4();
        for who in [student.user, classmate] {
            let it = assignment.resubmit(who, submission("done"), Utc::now()).unwrap();
            assignment.submissions.push(it);
        }

        let view = assignment.clone().view_for(&student, false);
        assert_eq!(view.submissions.len(), 1);
        assert_eq!(view.submissions[0].student, student.user);

        let staff_view = assignment.view_for(&student, true);
        assert_eq!(staff_view.submissions.len(), 2);
    }
}
