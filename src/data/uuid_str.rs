//! Stores [`Uuid`] values as hyphenated strings.
//!
//! The driver serializes documents in non human-readable mode, which would
//! otherwise turn a plain `Uuid` into generic binary while query filters use
//! strings. Every id field of a stored document goes through here.

use serde::{Deserialize, Deserializer, Serializer};
use uuid::Uuid;

pub fn serialize<S: Serializer>(id: &Uuid, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&id.hyphenated().to_string())
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Uuid, D::Error> {
    let raw = String::deserialize(deserializer)?;
    Uuid::parse_str(&raw).map_err(serde::de::Error::custom)
}

pub mod option {
    use super::*;

    pub fn serialize<S: Serializer>(id: &Option<Uuid>, serializer: S) -> Result<S::Ok, S::Error> {
        match id {
            Some(id) => serializer.serialize_some(&id.hyphenated().to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Uuid>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|raw| Uuid::parse_str(&raw).map_err(serde::de::Error::custom))
            .transpose()
    }
}

pub mod vec {
    use super::*;
    use serde::ser::SerializeSeq;

    pub fn serialize<S: Serializer>(ids: &[Uuid], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(ids.len()))?;
        for id in ids {
            seq.serialize_element(&id.hyphenated().to_string())?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Uuid>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|raw| Uuid::parse_str(raw).map_err(serde::de::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ids {
        #[serde(with = "super")]
        one: Uuid,
        #[serde(default, with = "super::option")]
        maybe: Option<Uuid>,
        #[serde(default, with = "super::vec")]
        many: Vec<Uuid>,
    }

    #[test]
    fn ids_are_strings_in_raw_bson() {
        let ids = Ids {
            one: Uuid::new_v4(),
            maybe: None,
            many: vec![Uuid::new_v4()],
        };

        let raw = bson::to_raw_document_buf(&ids).expect("serializable");
        let doc: bson::Document = raw.to_document().expect("valid document");
        assert_eq!(doc.get_str("one").unwrap(), ids.one.to_string());
        assert_eq!(
            doc.get_array("many").unwrap()[0].as_str(),
            Some(ids.many[0].to_string().as_str())
        );

        let back: Ids = bson::from_slice(raw.as_bytes()).expect("deserializable");
        assert_eq!(back, ids);
    }
}
