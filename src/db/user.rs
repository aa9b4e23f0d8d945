use std::{collections::BTreeSet, error::Error as StdError};

use argon2::{
    password_hash::{
        rand_core::OsRng, PasswordHasher as _, PasswordVerifier as _,
        SaltString,
    },
    Argon2,
};
use derive_more::Display;
use enum_utils::TryFromRepr;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio_postgres::{
    types::{
        accepts, private::BytesMut, to_sql_checked, FromSql, IsNull, ToSql,
        Type,
    },
    Error,
};
use uuid::Uuid;

use super::Client;

#[derive(Clone, Debug)]
pub struct User {
    pub id: Id,
    pub name: String,
    pub email: String,
    pub password_hash: PasswordHash,
    pub enabled: bool,
    pub registered: OffsetDateTime,
    roles: BTreeSet<Role>,
}

impl User {
    pub fn new(
        id: Id,
        name: String,
        email: String,
        password_hash: PasswordHash,
        enabled: bool,
        registered: OffsetDateTime,
        roles: impl IntoIterator<Item = Role>,
    ) -> Self {
        let mut user = Self {
            id,
            name,
            email,
            password_hash,
            enabled,
            registered,
            roles: BTreeSet::new(),
        };
        user.set_roles(roles);
        user
    }

    /// Creates an enabled [`User`] registered at the current moment.
    pub fn registered_now(
        id: Id,
        name: String,
        email: String,
        password_hash: PasswordHash,
        roles: impl IntoIterator<Item = Role>,
    ) -> Self {
        Self::new(
            id,
            name,
            email,
            password_hash,
            true,
            OffsetDateTime::now_utc(),
            roles,
        )
    }

    pub fn roles(&self) -> &BTreeSet<Role> {
        &self.roles
    }

    /// Replaces the role set with the distinct values of `roles`.
    ///
    /// An empty input yields an empty set.
    pub fn set_roles(&mut self, roles: impl IntoIterator<Item = Role>) {
        self.roles = roles.into_iter().collect();
    }
}

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Display, Eq, Hash, PartialEq,
    Serialize,
)]
pub struct Id(Uuid);

impl Id {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl From<u128> for Id {
    fn from(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }
}

impl FromSql<'_> for Id {
    accepts!(UUID);

    fn from_sql(
        ty: &Type,
        raw: &[u8],
    ) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        Uuid::from_sql(ty, raw).map(Self)
    }
}

impl ToSql for Id {
    accepts!(UUID);

    to_sql_checked!();

    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn StdError + Sync + Send>> {
        self.0.to_sql(ty, out)
    }
}

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, TryFromRepr, PartialEq,
    PartialOrd, Serialize,
)]
#[repr(u8)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Votes for a restaurant of the day.
    User = 1,

    /// Manages accounts: assigns roles, enables and disables users.
    Admin = 2,
}

impl FromSql<'_> for Role {
    accepts!(INT2);

    fn from_sql(
        ty: &Type,
        raw: &[u8],
    ) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        let repr = i16::from_sql(ty, raw)?;
        let repr = u8::try_from(repr)?;
        let role = Self::try_from(repr).map_err(|_| "invalid role")?;
        Ok(role)
    }
}

impl ToSql for Role {
    accepts!(INT2);

    to_sql_checked!();

    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn StdError + Sync + Send>> {
        let repr = i16::from((*self) as u8);
        repr.to_sql(ty, out)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PasswordHash(String);

impl PasswordHash {
    pub fn generate(
        secret: &str,
    ) -> Result<Self, argon2::password_hash::Error> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(secret.as_bytes(), &salt)
            .map(|hash| Self(hash.to_string()))
    }

    pub fn verify(&self, secret: &str) -> bool {
        argon2::password_hash::PasswordHash::new(&self.0)
            .map(|hash| {
                Argon2::default()
                    .verify_password(secret.as_bytes(), &hash)
                    .is_ok()
            })
            .unwrap_or(false)
    }
}

impl FromSql<'_> for PasswordHash {
    accepts!(TEXT);

    fn from_sql(
        ty: &Type,
        raw: &[u8],
    ) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        String::from_sql(ty, raw).map(Self)
    }
}

impl ToSql for PasswordHash {
    accepts!(TEXT);

    to_sql_checked!();

    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn StdError + Sync + Send>> {
        self.0.to_sql(ty, out)
    }
}

impl Client {
    pub async fn get_user_by_id(&self, id: Id) -> Result<Option<User>, Error> {
        const SQL: &str = "\
            SELECT id, name, email, password_hash, enabled, registered, \
                   ARRAY(SELECT role \
                         FROM user_roles \
                         WHERE user_id = users.id) AS roles \
            FROM users \
            WHERE id = $1 \
            LIMIT 1";
        Ok(self.0.query_opt(SQL, &[&id]).await?.map(|row| User {
            id: row.get("id"),
            name: row.get("name"),
            email: row.get("email"),
            password_hash: row.get("password_hash"),
            enabled: row.get("enabled"),
            registered: row.get("registered"),
            roles: row.get::<_, Vec<Role>>("roles").into_iter().collect(),
        }))
    }

    pub async fn get_user_by_email(
        &self,
        email: &str,
    ) -> Result<Option<User>, Error> {
        const SQL: &str = "\
            SELECT id, name, email, password_hash, enabled, registered, \
                   ARRAY(SELECT role \
                         FROM user_roles \
                         WHERE user_id = users.id) AS roles \
            FROM users \
            WHERE email = $1 \
            LIMIT 1";
        Ok(self.0.query_opt(SQL, &[&email]).await?.map(|row| User {
            id: row.get("id"),
            name: row.get("name"),
            email: row.get("email"),
            password_hash: row.get("password_hash"),
            enabled: row.get("enabled"),
            registered: row.get("registered"),
            roles: row.get::<_, Vec<Role>>("roles").into_iter().collect(),
        }))
    }

    pub async fn write_user(&self, user: &User) -> Result<(), Error> {
        // `registered` is set once at creation, so the conflict branch
        // leaves it untouched.
        const UPSERT_SQL: &str = "\
            INSERT INTO users (id, name, email, password_hash, \
                               enabled, registered) \
            VALUES ($1, $2, $3, $4, $5, $6) \
            ON CONFLICT (id) DO UPDATE \
            SET name = EXCLUDED.name, \
                email = EXCLUDED.email, \
                password_hash = EXCLUDED.password_hash, \
                enabled = EXCLUDED.enabled";
        const DELETE_ROLES_SQL: &str = "\
            DELETE FROM user_roles \
            WHERE user_id = $1";
        const INSERT_ROLES_SQL: &str = "\
            INSERT INTO user_roles (user_id, role) \
            SELECT $1, unnest($2::INT2[])";

        self.0
            .execute(
                UPSERT_SQL,
                &[
                    &user.id,
                    &user.name,
                    &user.email,
                    &user.password_hash,
                    &user.enabled,
                    &user.registered,
                ],
            )
            .await?;
        self.0.execute(DELETE_ROLES_SQL, &[&user.id]).await?;

        let roles = user.roles.iter().copied().collect::<Vec<_>>();
        self.0
            .execute(INSERT_ROLES_SQL, &[&user.id, &roles])
            .await
            .map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_with_roles(roles: Vec<Role>) -> User {
        User::new(
            Id::from(1),
            "Alice".to_string(),
            "alice@restaurant.test".to_string(),
            PasswordHash::generate("password").unwrap(),
            true,
            OffsetDateTime::UNIX_EPOCH,
            roles,
        )
    }

    #[test]
    fn normalizes_empty_roles_to_empty_set() {
        let user = user_with_roles(vec![]);
        assert!(user.roles().is_empty());
    }

    #[test]
    fn deduplicates_roles() {
        let user =
            user_with_roles(vec![Role::Admin, Role::Admin, Role::User]);
        assert_eq!(
            *user.roles(),
            BTreeSet::from([Role::User, Role::Admin]),
        );
    }

    #[test]
    fn set_roles_replaces_previous_set() {
        let mut user = user_with_roles(vec![Role::User]);
        user.set_roles([Role::Admin]);
        assert_eq!(*user.roles(), BTreeSet::from([Role::Admin]));
    }

    #[test]
    fn cloned_user_keeps_fields_and_roles() {
        let user = user_with_roles(vec![Role::User, Role::Admin]);
        let copy = user.clone();
        assert_eq!(copy.id, user.id);
        assert_eq!(copy.name, user.name);
        assert_eq!(copy.email, user.email);
        assert_eq!(copy.password_hash, user.password_hash);
        assert_eq!(copy.enabled, user.enabled);
        assert_eq!(copy.registered, user.registered);
        assert_eq!(copy.roles(), user.roles());
    }

    #[test]
    fn registers_enabled_user_at_current_moment() {
        let before = OffsetDateTime::now_utc();
        let user = User::registered_now(
            Id::new(),
            "Alice".to_string(),
            "alice@restaurant.test".to_string(),
            PasswordHash::generate("password").unwrap(),
            [Role::User],
        );
        let after = OffsetDateTime::now_utc();
        assert!(user.enabled);
        assert!(user.registered >= before);
        assert!(user.registered <= after);
    }

    #[test]
    fn verifies_generated_password_hash() {
        let hash = PasswordHash::generate("password").unwrap();
        assert!(hash.verify("password"));
        assert!(!hash.verify("p4ssword"));
    }
}
