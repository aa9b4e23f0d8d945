use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::api;

pub use crate::db::user::{Id, PasswordHash, Role};

/// Outbound representation of a user.
///
/// Carries no password and embeds the vote history newest first.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct User {
    pub id: Id,
    pub name: String,
    pub email: String,
    pub enabled: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub registered: OffsetDateTime,
    pub roles: BTreeSet<Role>,
    pub votes: Vec<api::Vote>,
}
