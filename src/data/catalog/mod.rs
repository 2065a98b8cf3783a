use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::resp::problem::{problems, Problem};
use crate::schedule::ScheduleEntry;

pub mod db;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Subject {
    #[serde(rename = "_id", with = "crate::data::uuid_str")]
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,
}

/// A priced offering under a [`Subject`] with the weekly schedule new
/// batches start from.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Level {
    #[serde(rename = "_id", with = "crate::data::uuid_str")]
    pub id: Uuid,
    #[serde(with = "crate::data::uuid_str")]
    pub subject: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Price in the currency's minor unit.
    pub price: i64,
    pub currency: String,
    pub duration_weeks: u32,
    #[serde(default)]
    pub schedule: Vec<ScheduleEntry>,
    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SubjectData {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl SubjectData {
    pub fn validate(&self) -> Result<(), Problem> {
        validate_name("Subject", &self.name)
    }

    pub fn into_subject(self) -> Subject {
        Subject {
            id: Uuid::new_v4(),
            name: self.name.trim().to_string(),
            description: self.description,
            created: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct LevelData {
    pub subject: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: i64,
    #[serde(default)]
    pub currency: Option<String>,
    pub duration_weeks: u32,
    #[serde(default)]
    pub schedule: Vec<ScheduleEntry>,
}

impl LevelData {
    /// Ten years.
    pub const MAX_DURATION_WEEKS: u32 = 520;

    pub fn validate(&self) -> Result<(), Problem> {
        validate_name("Level", &self.name)?;
        if self.price <= 0 {
            return Err(problems::bad_request(
                "Bad level price.",
                "Price must be a positive amount.",
            ));
        }
        if self.duration_weeks == 0 || self.duration_weeks > Self::MAX_DURATION_WEEKS {
            return Err(problems::bad_request(
                "Bad level duration.",
                format!(
                    "A level lasts between 1 and {} weeks.",
                    Self::MAX_DURATION_WEEKS
                ),
            ));
        }
        ScheduleEntry::validate_all(&self.schedule)
            .map_err(|e| problems::bad_request("Bad schedule.", e))
    }

    pub fn into_level(self, default_currency: &str) -> Level {
        Level {
            id: Uuid::new_v4(),
            subject: self.subject,
            name: self.name.trim().to_string(),
            description: self.description,
            price: self.price,
            currency: self
                .currency
                .map(|it| it.trim().to_uppercase())
                .filter(|it| !it.is_empty())
                .unwrap_or_else(|| default_currency.to_string()),
            duration_weeks: self.duration_weeks,
            schedule: self.schedule,
            created: Utc::now(),
        }
    }
}

fn validate_name(what: &str, name: &str) -> Result<(), Problem> {
    let len = name.trim().chars().count();
    if len == 0 || len > 100 {
        return Err(problems::bad_request(
            format!("Bad {} name.", what.to_lowercase()),
            format!("{} name must be between 1 and 100 characters.", what),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, Weekday};

    fn level_data() -> LevelData {
        LevelData {
            subject: Uuid::new_v4(),
            name: " Grade 1 ".to_string(),
            description: String::new(),
            price: 250_000,
            currency: None,
            duration_weeks: 12,
            schedule: vec![ScheduleEntry::new(
                Weekday::Sat,
                NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
            )],
        }
    }

    #[test]
    fn level_validation() {
        assert!(level_data().validate().is_ok());

        let free = LevelData { price: 0, ..level_data() };
        assert_eq!(free.validate().unwrap_err().title, "Bad level price.");

        let endless = LevelData { duration_weeks: 0, ..level_data() };
        assert_eq!(endless.validate().unwrap_err().title, "Bad level duration.");
        let decades = LevelData { duration_weeks: 20_000_000, ..level_data() };
        assert_eq!(decades.validate().unwrap_err().title, "Bad level duration.");
        let longest = LevelData { duration_weeks: LevelData::MAX_DURATION_WEEKS, ..level_data() };
        assert!(longest.validate().is_ok());

        let mut inverted = level_data();
        inverted.schedule[0].end_time = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        assert_eq!(inverted.validate().unwrap_err().title, "Bad schedule.");

        let unnamed = LevelData { name: "  ".to_string(), ..level_data() };
        assert_eq!(unnamed.validate().unwrap_err().title, "Bad level name.");
    }

    #[test]
    fn level_currency_defaults_from_config() {
        let level = level_data().into_level("INR");
        assert_eq!(level.currency, "INR");
        assert_eq!(level.name, "Grade 1");

        let usd = LevelData {
            currency: Some("usd".to_string()),
            ..level_data()
        };
        assert_eq!(usd.into_level("INR").currency, "USD");
    }

    #[test]
    fn subject_json_exposes_id() {
        let subject = SubjectData {
            name: "Piano".to_string(),
            description: String::new(),
        }
        .into_subject();

        let json = serde_json::to_value(&subject).unwrap();
        assert_eq!(json["_id"], subject.id.to_string());
        let back: Subject = serde_json::from_value(json).unwrap();
        assert_eq!(back.id, subject.id);
    }
}
