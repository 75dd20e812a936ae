use std::collections::{HashMap, HashSet};
use std::path::Path;

use sea_orm::{ConnectionTrait, TransactionTrait};

use crate::authz::errors::AuthzError;
use crate::authz::policy::parse_kdl_document;
use crate::authz::registry::PermissionRegistry;
use crate::authz::roles::{add_inheritance, normalize_key, resolve_or_create_role};
use crate::authz::types::*;

/// Load role definitions from a single `.kdl` file, or from every `.kdl`
/// file in a directory, and merge them.
pub fn load_definitions(path: &Path) -> Result<ParsedDefinitions, AuthzError> {
    let files = if path.is_dir() {
        let mut entries: Vec<_> = std::fs::read_dir(path)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|ext| ext == "kdl").unwrap_or(false))
            .collect();
        entries.sort();
        entries
    } else if path.is_file() {
        vec![path.to_path_buf()]
    } else {
        return Err(AuthzError::InvalidDefinitions(format!(
            "definitions path `{}` does not exist",
            path.display()
        )));
    };

    let mut all_parsed = Vec::new();
    for file in &files {
        let contents =
            std::fs::read_to_string(file).map_err(|source| AuthzError::DefinitionsLoadError {
                path: file.display().to_string(),
                source,
            })?;
        all_parsed.push(parse_kdl_document(&contents)?);
    }

    let defs = merge_definitions(all_parsed)?;

    tracing::info!(
        files = files.len(),
        roles = defs.roles.len(),
        kinds = defs.kinds.len(),
        "Loaded role definitions"
    );

    Ok(defs)
}

/// Merge parsed files. Later role definitions replace earlier ones with the
/// same key; inheritance cycles within the definitions are rejected.
pub fn merge_definitions(parsed: Vec<ParsedDefinitions>) -> Result<ParsedDefinitions, AuthzError> {
    let mut roles: HashMap<String, RoleDef> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    let mut kinds = Vec::new();

    for p in parsed {
        for role in p.roles {
            let key = normalize_key(&role.name);
            let role = RoleDef {
                name: key.clone(),
                includes: role.includes.iter().map(|r| normalize_key(r)).collect(),
            };
            if roles.insert(key.clone(), role).is_none() {
                order.push(key);
            }
        }
        kinds.extend(p.kinds);
    }

    check_role_cycles(&roles)?;

    Ok(ParsedDefinitions {
        roles: order.iter().filter_map(|k| roles.remove(k)).collect(),
        kinds,
    })
}

pub fn build_registry(defs: &ParsedDefinitions) -> Result<PermissionRegistry, AuthzError> {
    let mut registry = PermissionRegistry::new();
    for kind in &defs.kinds {
        registry.register(kind.clone())?;
    }
    Ok(registry)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub roles: usize,
    pub edges_added: usize,
}

/// Create the defined roles and inheritance edges that do not exist yet.
/// Existing rows are left alone, so syncing twice is a no-op.
pub async fn sync_definitions<C>(conn: &C, defs: &ParsedDefinitions) -> Result<SyncReport, AuthzError>
where
    C: ConnectionTrait + TransactionTrait,
{
    let txn = conn.begin().await?;
    let mut report = SyncReport::default();

    for role in &defs.roles {
        resolve_or_create_role(&txn, &role.name).await?;
        report.roles += 1;
    }
    for role in &defs.roles {
        for included in &role.includes {
            resolve_or_create_role(&txn, included).await?;
            if add_inheritance(&txn, &role.name, included).await? {
                report.edges_added += 1;
            }
        }
    }

    txn.commit().await?;
    tracing::info!(
        roles = report.roles,
        edges_added = report.edges_added,
        "Synced role definitions"
    );
    Ok(report)
}

/// Check for cycles in role inheritance using DFS.
fn check_role_cycles(roles: &HashMap<String, RoleDef>) -> Result<(), AuthzError> {
    let mut visited = HashSet::new();
    let mut in_stack = HashSet::new();

    for name in roles.keys() {
        if !visited.contains(name) {
            dfs_cycle_check(name, roles, &mut visited, &mut in_stack)?;
        }
    }
    Ok(())
}

fn dfs_cycle_check(
    name: &str,
    roles: &HashMap<String, RoleDef>,
    visited: &mut HashSet<String>,
    in_stack: &mut HashSet<String>,
) -> Result<(), AuthzError> {
    visited.insert(name.to_string());
    in_stack.insert(name.to_string());

    if let Some(role) = roles.get(name) {
        for included in &role.includes {
            if in_stack.contains(included.as_str()) {
                return Err(AuthzError::CyclicRoleInheritance(format!(
                    "{name} -> {included}"
                )));
            }
            if !visited.contains(included.as_str()) {
                dfs_cycle_check(included, roles, visited, in_stack)?;
            }
        }
    }

    in_stack.remove(name);
    Ok(())
}
