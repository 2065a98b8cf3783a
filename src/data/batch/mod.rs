use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::data::catalog::Level;
use crate::resp::jwt::{auth_problem, UserRoleToken};
use crate::resp::problem::{problems, Problem};
use crate::role::Role;
use crate::schedule::{DateWindow, ScheduleEntry, Scheduled};

pub mod db;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Note {
    #[serde(with = "crate::data::uuid_str")]
    pub id: Uuid,
    #[serde(with = "crate::data::uuid_str")]
    pub author: Uuid,
    pub text: String,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Lecture {
    #[serde(with = "crate::data::uuid_str")]
    pub id: Uuid,
    pub title: String,
    pub url: String,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AttendanceEntry {
    #[serde(with = "crate::data::uuid_str")]
    pub student: Uuid,
    pub present: bool,
}

/// Attendance of one session, identified by its date and start time.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AttendanceRecord {
    #[schema(value_type = String, format = Date)]
    pub date: NaiveDate,
    #[schema(value_type = String, example = "18:30")]
    pub start_time: NaiveTime,
    #[serde(with = "crate::data::uuid_str")]
    pub marked_by: Uuid,
    pub marked_at: DateTime<Utc>,
    pub entries: Vec<AttendanceEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Batch {
    #[serde(rename = "_id", with = "crate::data::uuid_str")]
    pub id: Uuid,
    pub name: String,
    #[serde(with = "crate::data::uuid_str")]
    pub subject: Uuid,
    #[serde(with = "crate::data::uuid_str")]
    pub level: Uuid,
    #[schema(value_type = String, format = Date)]
    pub start_date: NaiveDate,
    #[schema(value_type = String, format = Date)]
    pub end_date: NaiveDate,
    #[serde(default)]
    pub schedule: Vec<ScheduleEntry>,

    #[serde(default, with = "crate::data::uuid_str::vec")]
    pub students: Vec<Uuid>,
    /// Mirrors `students.len()`; every update touching `students` recomputes it.
    #[serde(default)]
    pub current_students: u32,
    #[serde(default)]
    pub max_students: Option<u32>,
    #[serde(default, with = "crate::data::uuid_str::option")]
    pub teacher: Option<Uuid>,
    #[serde(default)]
    pub meeting_link: Option<String>,

    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(default)]
    pub lectures: Vec<Lecture>,
    #[serde(default)]
    pub attendance: Vec<AttendanceRecord>,

    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,
}

impl Scheduled for Batch {
    fn schedule_id(&self) -> Uuid {
        self.id
    }

    fn schedule(&self) -> &[ScheduleEntry] {
        &self.schedule
    }

    fn active_window(&self) -> DateWindow {
        DateWindow {
            start: self.start_date,
            end: self.end_date.max(self.start_date),
        }
    }
}

impl Batch {
    pub fn is_student(&self, user: Uuid) -> bool {
        self.students.contains(&user)
    }

    pub fn is_teacher(&self, user: Uuid) -> bool {
        self.teacher == Some(user)
    }

    pub fn is_full(&self) -> bool {
        match self.max_students {
            Some(max) if max > 0 => self.students.len() as u32 >= max,
            _ => false,
        }
    }

    /// Admins and the assigned teacher manage a batch.
    pub fn can_manage(&self, auth: &UserRoleToken) -> bool {
        auth.role.is_admin() || (auth.role == Role::Teacher && self.is_teacher(auth.user))
    }

    pub fn can_view(&self, auth: &UserRoleToken) -> bool {
        self.can_manage(auth) || self.is_student(auth.user)
    }

    pub fn require_manage(&self, auth: &UserRoleToken) -> Result<(), Problem> {
        if self.can_manage(auth) {
            Ok(())
        } else {
            Err(auth_problem("Not authorized: only the batch teacher or an admin can do this."))
        }
    }

    pub fn require_view(&self, auth: &UserRoleToken) -> Result<(), Problem> {
        if self.can_view(auth) {
            Ok(())
        } else {
            Err(auth_problem("Not authorized: not a member of this batch."))
        }
    }

    /// Shape of the batch as seen by `auth`: students don't see other
    /// students' attendance.
    pub fn view_for(mut self, auth: &UserRoleToken) -> Batch {
        if !self.can_manage(auth) {
            for record in self.attendance.iter_mut() {
                record.entries.retain(|it| it.student == auth.user);
            }
        }
        self
    }

    /// A personal batch for one student following the level's template,
    /// created after a paid checkout without a chosen batch.
    pub fn personal(
        level: &Level,
        student: Uuid,
        student_name: &str,
        start_date: NaiveDate,
    ) -> Result<Batch, Problem> {
        Ok(Batch {
            id: Uuid::new_v4(),
            name: format!("{} - {}", level.name, student_name),
            subject: level.subject,
            level: level.id,
            start_date,
            end_date: default_end_date(start_date, level.duration_weeks)?,
            schedule: level.schedule.clone(),
            students: vec![student],
            current_students: 1,
            max_students: Some(1),
            teacher: None,
            meeting_link: None,
            notes: vec![],
            lectures: vec![],
            attendance: vec![],
            created: Utc::now(),
        })
    }
}

/// Last day of a batch running `weeks` full weeks from `start`.
pub fn default_end_date(start: NaiveDate, weeks: u32) -> Result<NaiveDate, Problem> {
    start
        .checked_add_signed(Duration::weeks(weeks.max(1) as i64) - Duration::days(1))
        .ok_or_else(|| {
            problems::bad_request(
                "Bad batch dates.",
                format!("A batch of {} weeks starting on {} ends past the calendar.", weeks, start),
            )
        })
}

/// Tells a missing field (`None`) apart from an explicit `null` (`Some(None)`).
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn validate_link(what: &str, link: &str) -> Result<(), Problem> {
    let link = link.trim();
    if link.starts_with("https://") || link.starts_with("http://") {
        Ok(())
    } else {
        Err(problems::bad_request(
            format!("Bad {}.", what),
            "Links must be absolute http(s) URLs.",
        ))
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct BatchData {
    pub name: String,
    pub level: Uuid,
    #[schema(value_type = String, format = Date)]
    pub start_date: NaiveDate,
    /// Defaults to the level's duration.
    #[serde(default)]
    #[schema(value_type = Option<String>, format = Date)]
    pub end_date: Option<NaiveDate>,
    /// Defaults to the level's weekly schedule.
    #[serde(default)]
    pub schedule: Option<Vec<ScheduleEntry>>,
    #[serde(default)]
    pub teacher: Option<Uuid>,
    #[serde(default)]
    pub meeting_link: Option<String>,
    #[serde(default)]
    pub max_students: Option<u32>,
}

impl BatchData {
    pub fn into_batch(self, level: &Level) -> Result<Batch, Problem> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(problems::bad_request("Bad batch name.", "Batch name can't be empty."));
        }

        let end_date = match self.end_date {
            Some(it) => it,
            None => default_end_date(self.start_date, level.duration_weeks)?,
        };
        DateWindow::new(self.start_date, end_date)
            .map_err(|e| problems::bad_request("Bad batch dates.", e))?;

        let schedule = self.schedule.unwrap_or_else(|| level.schedule.clone());
        ScheduleEntry::validate_all(&schedule)
            .map_err(|e| problems::bad_request("Bad schedule.", e))?;

        if let Some(link) = &self.meeting_link {
            validate_link("meeting link", link)?;
        }

        Ok(Batch {
            id: Uuid::new_v4(),
            name,
            subject: level.subject,
            level: level.id,
            start_date: self.start_date,
            end_date,
            schedule,
            students: vec![],
            current_students: 0,
            max_students: self.max_students.filter(|it| *it > 0),
            teacher: self.teacher,
            meeting_link: self.meeting_link.map(|it| it.trim().to_string()),
            notes: vec![],
            lectures: vec![],
            attendance: vec![],
            created: Utc::now(),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct BatchUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<String>, format = Date)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    #[schema(value_type = Option<String>, format = Date)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub schedule: Option<Vec<ScheduleEntry>>,
    /// A teacher id assigns the batch, `null` unassigns it.
    #[serde(default, deserialize_with = "nullable")]
    #[schema(value_type = Option<String>, format = Uuid, nullable)]
    pub teacher: Option<Option<Uuid>>,
    #[serde(default)]
    pub max_students: Option<u32>,
}

impl BatchUpdate {
    pub fn apply(self, batch: &mut Batch) -> Result<(), Problem> {
        if let Some(name) = self.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(problems::bad_request("Bad batch name.", "Batch name can't be empty."));
            }
            batch.name = name;
        }
        if let Some(start) = self.start_date {
            batch.start_date = start;
        }
        if let Some(end) = self.end_date {
            batch.end_date = end;
        }
        DateWindow::new(batch.start_date, batch.end_date)
            .map_err(|e| problems::bad_request("Bad batch dates.", e))?;

        if let Some(schedule) = self.schedule {
            ScheduleEntry::validate_all(&schedule)
                .map_err(|e| problems::bad_request("Bad schedule.", e))?;
            batch.schedule = schedule;
        }
        if let Some(teacher) = self.teacher {
            batch.teacher = teacher;
        }
        if let Some(max) = self.max_students {
            if max > 0 && (max as usize) < batch.students.len() {
                return Err(problems::bad_request(
                    "Bad batch capacity.",
                    "Capacity can't be lower than the number of enrolled students.",
                ));
            }
            batch.max_students = Some(max).filter(|it| *it > 0);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct EnrollData {
    pub student: Uuid,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NoteData {
    pub text: String,
}

impl NoteData {
    pub fn into_note(self, author: Uuid) -> Result<Note, Problem> {
        let text = self.text.trim().to_string();
        if text.is_empty() {
            return Err(problems::bad_request("Bad note.", "Note can't be empty."));
        }
        Ok(Note {
            id: Uuid::new_v4(),
            author,
            text,
            created: Utc::now(),
        })
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct LectureData {
    pub title: String,
    pub url: String,
}

impl LectureData {
    pub fn into_lecture(self) -> Result<Lecture, Problem> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(problems::bad_request("Bad lecture.", "Lecture title can't be empty."));
        }
        validate_link("lecture link", &self.url)?;
        Ok(Lecture {
            id: Uuid::new_v4(),
            title,
            url: self.url.trim().to_string(),
            created: Utc::now(),
        })
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct MeetingLinkData {
    #[serde(default)]
    pub meeting_link: Option<String>,
}

impl MeetingLinkData {
    pub fn validated(self) -> Result<Option<String>, Problem> {
        match self.meeting_link.map(|it| it.trim().to_string()) {
            Some(link) if link.is_empty() => Ok(None),
            Some(link) => validate_link("meeting link", &link).map(|_| Some(link)),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AttendanceData {
    #[schema(value_type = String, format = Date)]
    pub date: NaiveDate,
    #[schema(value_type = String, example = "18:30")]
    pub start_time: NaiveTime,
    pub entries: Vec<AttendanceEntry>,
}

impl AttendanceData {
    /// Checks the entries against the batch roster and builds the record.
    pub fn into_record(self, batch: &Batch, marked_by: Uuid) -> Result<AttendanceRecord, Problem> {
        let mut entries: Vec<AttendanceEntry> = Vec::with_capacity(self.entries.len());
        for entry in self.entries {
            if !batch.is_student(entry.student) {
                return Err(problems::bad_request(
                    "Bad attendance.",
                    format!("{} isn't enrolled in this batch.", entry.student),
                ));
            }
            // last mark for a student wins
            entries.retain(|it| it.student != entry.student);
            entries.push(entry);
        }

        Ok(AttendanceRecord {
            date: self.date,
            start_time: self.start_time,
            marked_by,
            marked_at: Utc::now(),
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    fn level() -> Level {
        Level {
            id: Uuid::new_v4(),
            subject: Uuid::new_v4(),
            name: "Guitar Basics".to_string(),
            description: String::new(),
            price: 100_00,
            currency: "INR".to_string(),
            duration_weeks: 4,
            schedule: vec![ScheduleEntry::new(
                Weekday::Tue,
                NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            )],
            created: Utc::now(),
        }
    }

    fn batch_data(start: NaiveDate) -> BatchData {
        BatchData {
            name: "Evening guitar".to_string(),
            level: Uuid::nil(),
            start_date: start,
            end_date: None,
            schedule: None,
            teacher: None,
            meeting_link: None,
            max_students: None,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn token(role: Role) -> UserRoleToken {
        UserRoleToken::for_user(Uuid::new_v4(), role)
    }

    #[test]
    fn new_batch_defaults_from_level() {
        let level = level();
        let batch = batch_data(date(2024, 3, 4)).into_batch(&level).unwrap();

        assert_eq!(batch.end_date, date(2024, 3, 31));
        assert_eq!(batch.schedule, level.schedule);
        assert_eq!(batch.subject, level.subject);
        assert_eq!(batch.current_students, 0);
    }

    #[test]
    fn new_batch_rejects_inverted_dates_and_bad_links() {
        let level = level();
        let inverted = BatchData {
            end_date: Some(date(2024, 3, 1)),
            ..batch_data(date(2024, 3, 4))
        };
        assert_eq!(inverted.into_batch(&level).unwrap_err().title, "Bad batch dates.");

        let link = BatchData {
            meeting_link: Some("zoom.example/room".to_string()),
            ..batch_data(date(2024, 3, 4))
        };
        assert_eq!(link.into_batch(&level).unwrap_err().title, "Bad meeting link.");
    }

    #[test]
    fn access_rules() {
        let mut batch = batch_data(date(2024, 3, 4)).into_batch(&level()).unwrap();
        let admin = token(Role::Admin);
        let teacher = token(Role::Teacher);
        let other_teacher = token(Role::Teacher);
        let student = token(Role::Student);
        let outsider = token(Role::Student);
        batch.teacher = Some(teacher.user);
        batch.students.push(student.user);

        assert!(batch.can_manage(&admin));
        assert!(batch.can_manage(&teacher));
        assert!(!batch.can_manage(&other_teacher));
        assert!(!batch.can_manage(&student));

        assert!(batch.can_view(&student));
        assert!(batch.require_view(&outsider).is_err());
        assert!(batch.require_manage(&other_teacher).is_err());
    }

    #[test]
    fn students_only_see_their_attendance() {
        let mut batch = batch_data(date(2024, 3, 4)).into_batch(&level()).unwrap();
        let student = token(Role::Student);
        let classmate = Uuid::new_v4();
        batch.students = vec![student.user, classmate];

        let record = AttendanceData {
            date: date(2024, 3, 5),
            start_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            entries: vec![
                AttendanceEntry { student: student.user, present: true },
                AttendanceEntry { student: classmate, present: false },
            ],
        }
        .into_record(&batch, Uuid::new_v4())
        .unwrap();
        batch.attendance.push(record);

        let view = batch.clone().view_for(&student);
        assert_eq!(view.attendance[0].entries.len(), 1);
        assert_eq!(view.attendance[0].entries[0].student, student.user);

        let admin_view = batch.view_for(&token(Role::Admin));
        assert_eq!(admin_view.attendance[0].entries.len(), 2);
    }

    #[test]
    fn attendance_rejects_strangers_and_dedupes() {
        let mut batch = batch_data(date(2024, 3, 4)).into_batch(&level()).unwrap();
        let student = Uuid::new_v4();
        batch.students = vec![student];
        let start = NaiveTime::from_hms_opt(17, 0, 0).unwrap();

        let stranger = AttendanceData {
            date: date(2024, 3, 5),
            start_time: start,
            entries: vec![AttendanceEntry { student: Uuid::new_v4(), present: true }],
        };
        assert!(stranger.into_record(&batch, Uuid::new_v4()).is_err());

        let twice = AttendanceData {
            date: date(2024, 3, 5),
            start_time: start,
            entries: vec![
                AttendanceEntry { student, present: false },
                AttendanceEntry { student, present: true },
            ],
        };
        let record = twice.into_record(&batch, Uuid::new_v4()).unwrap();
        assert_eq!(record.entries, vec![AttendanceEntry { student, present: true }]);
    }

    #[test]
    fn update_keeps_capacity_above_roster() {
        let mut batch = batch_data(date(2024, 3, 4)).into_batch(&level()).unwrap();
        batch.students = vec![Uuid::new_v4(), Uuid::new_v4()];

        let shrink = BatchUpdate {
            max_students: Some(1),
            ..Default::default()
        };
        assert!(shrink.apply(&mut batch).is_err());

        let unlimited = BatchUpdate {
            max_students: Some(0),
            name: Some("Renamed".to_string()),
            ..Default::default()
        };
        unlimited.apply(&mut batch).unwrap();
        assert_eq!(batch.max_students, None);
        assert_eq!(batch.name, "Renamed");
        assert!(!batch.is_full());
    }

    #[test]
    fn personal_batch_has_single_seat() {
        let level = level();
        let student = Uuid::new_v4();
        let batch = Batch::personal(&level, student, "Ana", date(2024, 3, 5)).unwrap();

        assert_eq!(batch.students, vec![student]);
        assert_eq!(batch.current_students, 1);
        assert!(batch.is_full());
        assert_eq!(batch.end_date, date(2024, 4, 1));
        assert_eq!(batch.name, "Guitar Basics - Ana");
    }

    #[test]
    fn meeting_link_can_be_cleared() {
        let clear = MeetingLinkData { meeting_link: Some("  ".to_string()) };
        assert_eq!(clear.validated().unwrap(), None);

        let set = MeetingLinkData {
            meeting_link: Some(" https://meet.example.com/abc ".to_string()),
        };
        assert_eq!(set.validated().unwrap().as_deref(), Some("https://meet.example.com/abc"));
    }

    #[test]
    fn end_date_past_the_calendar_is_rejected() {
        assert_eq!(default_end_date(date(2024, 3, 4), 1).unwrap(), date(2024, 3, 10));
        assert_eq!(default_end_date(date(2024, 3, 4), 0).unwrap(), date(2024, 3, 10));

        let problem = default_end_date(date(2024, 3, 4), 20_000_000).unwrap_err();
        assert_eq!(problem.status.code, 400);

        let mut huge = level();
        huge.duration_weeks = u32::MAX;
        assert!(batch_data(date(2024, 3, 4)).into_batch(&huge).is_err());
        assert!(Batch::personal(&huge, Uuid::new_v4(), "Ana", date(2024, 3, 5)).is_err());
    }

    #[test]
    fn teacher_can_be_unassigned() {
        let mut batch = batch_data(date(2024, 3, 4)).into_batch(&level()).unwrap();
        let teacher = Uuid::new_v4();

        let assign: BatchUpdate =
            serde_json::from_str(&format!(r#"{{"teacher":"{}"}}"#, teacher)).unwrap();
        assign.apply(&mut batch).unwrap();
        assert_eq!(batch.teacher, Some(teacher));

        let rename: BatchUpdate = serde_json::from_str(r#"{"name":"Morning guitar"}"#).unwrap();
        assert_eq!(rename.teacher, None);
        rename.apply(&mut batch).unwrap();
        assert_eq!(batch.teacher, Some(teacher), "missing field keeps the teacher");

        let unassign: BatchUpdate = serde_json::from_str(r#"{"teacher":null}"#).unwrap();
        assert_eq!(unassign.teacher, Some(None));
        unassign.apply(&mut batch).unwrap();
        assert_eq!(batch.teacher, None);
    }
}
