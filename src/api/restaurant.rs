use serde::{Deserialize, Serialize};

pub use crate::db::restaurant::Id;

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Restaurant {
    pub id: Id,
    pub name: String,
}
