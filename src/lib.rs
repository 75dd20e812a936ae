//! Gatekeep - canonical permission engine
//!
//! Roles with inheritance, content-addressed minterm and permission stores,
//! and an evaluator that decides whether a holder satisfies a permission.

pub mod authz;
pub mod entities;
pub mod errors;
pub mod settings;
pub mod storage;
