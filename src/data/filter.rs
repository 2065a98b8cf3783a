use bson::{doc, Document};
use uuid::Uuid;

#[inline]
pub fn id_bson(id: Uuid) -> bson::Bson {
    bson::Bson::String(id.hyphenated().to_string())
}

#[inline]
pub fn by_id(id: Uuid) -> Document {
    doc! { "_id": id_bson(id) }
}

#[inline]
pub fn by_ids(ids: &[Uuid]) -> Document {
    let ids: Vec<bson::Bson> = ids.iter().copied().map(id_bson).collect();
    doc! { "_id": { "$in": ids } }
}

#[inline]
pub fn by_email(email: impl AsRef<str>) -> Document {
    doc! { "email": email.as_ref().trim().to_lowercase() }
}

#[inline]
pub fn by_field(field: &str, id: Uuid) -> Document {
    let mut filter = Document::new();
    filter.insert(field, id_bson(id));
    filter
}
