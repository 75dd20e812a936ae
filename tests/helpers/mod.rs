pub mod builders;
pub mod db;

pub use builders::{HolderBuilder, ResourceBuilder};
pub use db::{authorizer, rule, seed_role, TestDb};
