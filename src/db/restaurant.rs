use std::{collections::HashMap, error::Error as StdError};

use serde::{Deserialize, Serialize};
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
pub struct Restaurant {
    pub id: Id,
    pub name: String,
}

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize,
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

impl Client {
    pub async fn get_restaurant_by_id(
        &self,
        id: Id,
    ) -> Result<Option<Restaurant>, Error> {
        const SQL: &str = "\
            SELECT id, name \
            FROM restaurants \
            WHERE id = $1 \
            LIMIT 1";
        Ok(self.0.query_opt(SQL, &[&id]).await?.map(|row| Restaurant {
            id: row.get("id"),
            name: row.get("name"),
        }))
    }

    pub async fn get_restaurants_by_ids(
        &self,
        ids: &[Id],
    ) -> Result<HashMap<Id, Restaurant>, Error> {
        const SQL: &str = "\
            SELECT id, name \
            FROM restaurants \
            WHERE id IN (SELECT unnest($1::UUID[])) \
            LIMIT $2";

        let limit = i64::try_from(ids.len()).unwrap();

        Ok(self
            .0
            .query(SQL, &[&ids, &limit])
            .await?
            .into_iter()
            .map(|row| {
                let id = row.get("id");
                let restaurant = Restaurant {
                    id,
                    name: row.get("name"),
                };
                (id, restaurant)
            })
            .collect())
    }

    pub async fn list_restaurants(&self) -> Result<Vec<Restaurant>, Error> {
        const SQL: &str = "\
            SELECT id, name \
            FROM restaurants \
            ORDER BY name";
        Ok(self
            .0
            .query(SQL, &[])
            .await?
            .into_iter()
            .map(|row| Restaurant {
                id: row.get("id"),
                name: row.get("name"),
            })
            .collect())
    }
}
