//! Shared pieces of the minterm and permission canonical stores.

use std::collections::BTreeSet;

use base64ct::Encoding;
use sea_orm::sea_query::{Expr, Func};
use sea_orm::{ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QuerySelect};
use sha2::{Digest, Sha256};

/// Deterministic digest of a member set, stored under a UNIQUE index so that
/// concurrent writers of identical content converge on a single row.
pub(crate) fn content_hash(tag: &str, members: &BTreeSet<i32>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tag.as_bytes());
    for id in members {
        hasher.update(b":");
        hasher.update(id.to_string().as_bytes());
    }
    base64ct::Base64UrlUnpadded::encode_string(&hasher.finalize())
}

/// Set-equality lookup over a mapping table by aggregate counting.
///
/// An owner matches when it has exactly `|members|` mapping rows and all of
/// them point into `members`. With `only`, the test is restricted to that
/// owner id.
pub(crate) async fn find_by_members<E, C>(
    conn: &C,
    owner: E::Column,
    member: E::Column,
    members: &BTreeSet<i32>,
    only: Option<i32>,
) -> Result<Option<i32>, DbErr>
where
    E: EntityTrait,
    C: ConnectionTrait,
{
    if members.is_empty() {
        return Ok(None);
    }
    let n = members.len() as i64;

    let mut query = E::find()
        .select_only()
        .column(owner)
        .group_by(owner)
        .having(Expr::expr(Func::count(Expr::col(member))).eq(n))
        .having(
            Expr::expr(Func::sum(
                Expr::case(Expr::col(member).is_in(members.iter().copied()), 1).finally(0),
            ))
            .eq(n),
        );

    if let Some(id) = only {
        query = query.filter(owner.eq(id));
    }

    query.into_tuple::<i32>().one(conn).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_order_independent() {
        let a: BTreeSet<i32> = [3, 1, 2].into_iter().collect();
        let b: BTreeSet<i32> = [2, 3, 1].into_iter().collect();
        assert_eq!(content_hash("minterm", &a), content_hash("minterm", &b));
    }

    #[test]
    fn test_content_hash_separates_tags_and_members() {
        let s: BTreeSet<i32> = [1, 2].into_iter().collect();
        let t: BTreeSet<i32> = [12].into_iter().collect();
        assert_ne!(content_hash("minterm", &s), content_hash("permission", &s));
        assert_ne!(content_hash("minterm", &s), content_hash("minterm", &t));
        assert_eq!(content_hash("minterm", &s).len(), 43);
    }
}
