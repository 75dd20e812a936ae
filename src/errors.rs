use miette::Diagnostic;
use thiserror::Error;

use crate::authz::errors::AuthzError;

#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error("Database error: {0}")]
    #[diagnostic(code(gatekeep::db))]
    Db(#[from] sea_orm::DbErr),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Authz(#[from] AuthzError),

    #[error("Bad request: {0}")]
    #[diagnostic(code(gatekeep::bad_request))]
    BadRequest(String),
}
