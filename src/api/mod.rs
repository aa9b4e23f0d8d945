pub mod restaurant;
pub mod user;
pub mod vote;

pub use self::{restaurant::Restaurant, user::User, vote::Vote};
