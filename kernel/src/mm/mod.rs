pub mod user;

pub use user::{copy_from_user, copy_to_user};
