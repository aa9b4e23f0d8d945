use serde::{Deserialize, Serialize};
use time::Date;

use crate::api;

pub use crate::db::vote::Id;

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Vote {
    pub id: Id,
    pub date: Date,
    pub restaurant: api::Restaurant,
}
