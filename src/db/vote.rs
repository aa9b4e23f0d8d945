use std::{error::Error as StdError, time::Duration};

use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime, Time};
use tokio_postgres::{
    types::{
        accepts, private::BytesMut, to_sql_checked, FromSql, IsNull, ToSql,
        Type,
    },
    Error,
};
use uuid::Uuid;

use super::{restaurant, user, Client};

/// A user's meal choice on a given date.
///
/// At most one vote per user per day exists; a repeated vote on the same
/// day replaces the previous choice in place.
#[derive(Clone, Debug)]
pub struct Vote {
    pub id: Id,
    pub user: user::Id,
    pub restaurant: restaurant::Id,
    pub date: Date,
}

/// Whether a vote for the day of `at` may still be replaced at `at`.
///
/// `deadline` is a duration since midnight UTC.
pub fn change_allowed(at: OffsetDateTime, deadline: Duration) -> bool {
    let since_midnight = at.time() - Time::MIDNIGHT;
    since_midnight.whole_seconds() < deadline.as_secs() as i64
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
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

impl Client {
    pub async fn get_votes_by_user(
        &self,
        user: user::Id,
    ) -> Result<Vec<Vote>, Error> {
        const SQL: &str = "\
            SELECT id, user_id, restaurant_id, vote_date \
            FROM votes \
            WHERE user_id = $1 \
            ORDER BY vote_date DESC";
        Ok(self
            .0
            .query(SQL, &[&user])
            .await?
            .into_iter()
            .map(|row| Vote {
                id: row.get("id"),
                user: row.get("user_id"),
                restaurant: row.get("restaurant_id"),
                date: row.get("vote_date"),
            })
            .collect())
    }

    pub async fn get_vote_by_user_on(
        &self,
        user: user::Id,
        date: Date,
    ) -> Result<Option<Vote>, Error> {
        const SQL: &str = "\
            SELECT id, user_id, restaurant_id, vote_date \
            FROM votes \
            WHERE user_id = $1 \
              AND vote_date = $2 \
            LIMIT 1";
        Ok(self.0.query_opt(SQL, &[&user, &date]).await?.map(|row| {
            Vote {
                id: row.get("id"),
                user: row.get("user_id"),
                restaurant: row.get("restaurant_id"),
                date: row.get("vote_date"),
            }
        }))
    }

    pub async fn write_vote(&self, vote: &Vote) -> Result<(), Error> {
        const SQL: &str = "\
            INSERT INTO votes (id, user_id, restaurant_id, vote_date) \
            VALUES ($1, $2, $3, $4) \
            ON CONFLICT (user_id, vote_date) DO UPDATE \
            SET restaurant_id = EXCLUDED.restaurant_id";

        self.0
            .execute(
                SQL,
                &[&vote.id, &vote.user, &vote.restaurant, &vote.date],
            )
            .await
            .map(drop)
    }
}
