use std::collections::BTreeMap;

use bson::doc;
use mongodb::options::{FindOneAndUpdateOptions, IndexOptions, ReturnDocument};
use mongodb::{Database, IndexModel};
use uuid::Uuid;

use crate::data::{collect_lenient, filter};
use crate::middleware::paging::PageState;
use crate::resp::problem::Problem;
use crate::role::Role;

use super::{normalize_email, problem, Otp, SignupData, User};

pub static USER_COLLECTION_NAME: &str = "user";

pub(crate) async fn ensure_indexes(db: &Database) -> Result<(), mongodb::error::Error> {
    let unique_email = IndexModel::builder()
        .keys(doc! { "email": 1 })
        .options(IndexOptions::builder().unique(true).build())
        .build();

    db.collection::<User>(USER_COLLECTION_NAME)
        .create_index(unique_email, None)
        .await?;
    Ok(())
}

pub trait UserDbExt {
    /// Stores a new, unverified user carrying a fresh OTP.
    async fn create_user(&self, signup: &SignupData, role: Role, otp: Otp) -> Result<User, Problem>;

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, Problem>;
    async fn find_user_by_email(&self, email: impl AsRef<str>) -> Result<Option<User>, Problem>;
    async fn list_users(&self, role: Option<Role>, page: PageState) -> Result<Vec<User>, Problem>;

    async fn set_user_role(&self, id: Uuid, role: Role) -> Result<Option<User>, Problem>;
    async fn set_user_otp(&self, id: Uuid, otp: Otp) -> Result<(), Problem>;
    async fn mark_user_verified(&self, id: Uuid) -> Result<Option<User>, Problem>;

    async fn delete_user(&self, id: Uuid) -> Result<Option<User>, Problem>;
    async fn count_users_by_role(&self) -> Result<BTreeMap<Role, u64>, Problem>;
}

impl UserDbExt for Database {
    async fn create_user(&self, signup: &SignupData, role: Role, otp: Otp) -> Result<User, Problem> {
        if self.find_user_by_email(&signup.email).await?.is_some() {
            return Err(problem::bad_email(
                normalize_email(&signup.email),
                "Email already registered.",
            ));
        }

        let mut user = User::new(signup, role);
        user.otp = Some(otp);

        self.collection::<User>(USER_COLLECTION_NAME)
            .insert_one(&user, None)
            .await?;

        Ok(user)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, Problem> {
        self.collection(USER_COLLECTION_NAME)
            .find_one(filter::by_id(id), None)
            .await
            .map_err(Problem::from)
    }

    async fn find_user_by_email(&self, email: impl AsRef<str>) -> Result<Option<User>, Problem> {
        self.collection(USER_COLLECTION_NAME)
            .find_one(filter::by_email(email), None)
            .await
            .map_err(Problem::from)
    }

    async fn list_users(&self, role: Option<Role>, page: PageState) -> Result<Vec<User>, Problem> {
        let query = match role {
            Some(role) => doc! { "role": role },
            None => doc! {},
        };

        let cursor = self
            .collection::<bson::Document>(USER_COLLECTION_NAME)
            .find(query, page.find_options(doc! { "created": -1 }))
            .await?;

        collect_lenient(cursor).await
    }

    async fn set_user_role(&self, id: Uuid, role: Role) -> Result<Option<User>, Problem> {
        self.collection::<User>(USER_COLLECTION_NAME)
            .find_one_and_update(
                filter::by_id(id),
                doc! { "$set": { "role": role } },
                FindOneAndUpdateOptions::builder()
                    .return_document(ReturnDocument::After)
                    .build(),
            )
            .await
            .map_err(Problem::from)
    }

    async fn set_user_otp(&self, id: Uuid, otp: Otp) -> Result<(), Problem> {
        self.collection::<User>(USER_COLLECTION_NAME)
            .update_one(
                filter::by_id(id),
                doc! { "$set": { "otp": bson::to_bson(&otp)? } },
                None,
            )
            .await?;
        Ok(())
    }

    async fn mark_user_verified(&self, id: Uuid) -> Result<Option<User>, Problem> {
        self.collection::<User>(USER_COLLECTION_NAME)
            .find_one_and_update(
                filter::by_id(id),
                doc! { "$set": { "verified": true }, "$unset": { "otp": "" } },
                FindOneAndUpdateOptions::builder()
                    .return_document(ReturnDocument::After)
                    .build(),
            )
            .await
            .map_err(Problem::from)
    }

    async fn delete_user(&self, id: Uuid) -> Result<Option<User>, Problem> {
        self.collection(USER_COLLECTION_NAME)
            .find_one_and_delete(filter::by_id(id), None)
            .await
            .map_err(Problem::from)
    }

    async fn count_users_by_role(&self) -> Result<BTreeMap<Role, u64>, Problem> {
        let users = self.collection::<User>(USER_COLLECTION_NAME);

        let mut counts = BTreeMap::new();
        for role in [Role::Student, Role::Teacher, Role::Admin] {
            let count = users.count_documents(doc! { "role": role }, None).await?;
            counts.insert(role, count);
        }
        Ok(counts)
    }
}
