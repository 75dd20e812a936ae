use crate::authz::errors::AuthzError;
use crate::authz::types::*;
use kdl::KdlDocument;

/// Parse a KDL document string into role and permission-kind definitions.
pub fn parse_kdl_document(source: &str) -> Result<ParsedDefinitions, AuthzError> {
    let doc: KdlDocument = source
        .parse()
        .map_err(|e: kdl::KdlError| AuthzError::KdlParse(e.to_string()))?;

    let mut defs = ParsedDefinitions::default();

    for node in doc.nodes() {
        match node.name().value() {
            "role" => {
                let name = first_string_arg(node).ok_or_else(|| {
                    AuthzError::InvalidDefinitions(
                        "role node requires a string argument (e.g. role \"editor\")".into(),
                    )
                })?;

                let mut includes = Vec::new();

                if let Some(children) = node.children() {
                    for child in children.nodes() {
                        match child.name().value() {
                            "includes" => {
                                includes = dash_list(child);
                            }
                            other => {
                                return Err(AuthzError::InvalidDefinitions(format!(
                                    "unexpected child `{other}` in role `{name}` (expected `includes`)"
                                )));
                            }
                        }
                    }
                }

                defs.roles.push(RoleDef { name, includes });
            }
            "kind" => {
                let key = first_string_arg(node).ok_or_else(|| {
                    AuthzError::InvalidDefinitions(
                        "kind node requires a string argument (e.g. kind \"resource.read\")"
                            .into(),
                    )
                })?;

                let description = node
                    .get("description")
                    .and_then(|v| v.as_string())
                    .map(|s| s.to_string());

                let mut default_roles = Vec::new();

                if let Some(children) = node.children() {
                    for child in children.nodes() {
                        match child.name().value() {
                            "roles" => {
                                default_roles = dash_list(child);
                            }
                            other => {
                                return Err(AuthzError::InvalidDefinitions(format!(
                                    "unexpected child `{other}` in kind `{key}` (expected `roles`)"
                                )));
                            }
                        }
                    }
                }

                defs.kinds.push(PermissionKind {
                    key,
                    description,
                    default_roles,
                });
            }
            other => {
                tracing::warn!("ignoring unknown top-level KDL node `{other}`");
            }
        }
    }

    Ok(defs)
}

/// Extract the first string argument from a KDL node.
fn first_string_arg(node: &kdl::KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

/// Extract dash-list children: nodes named "-" whose first argument is a string.
/// Example KDL:
/// ```kdl
/// includes {
///     - "user"
///     - "auditor"
/// }
/// ```
fn dash_list(node: &kdl::KdlNode) -> Vec<String> {
    let Some(children) = node.children() else {
        return Vec::new();
    };
    children
        .nodes()
        .iter()
        .filter(|n| n.name().value() == "-")
        .filter_map(first_string_arg)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_role_with_includes() {
        let kdl = r#"
role "auditor"

role "editor" {
    includes {
        - "user"
        - "auditor"
    }
}
"#;
        let defs = parse_kdl_document(kdl).unwrap();
        assert_eq!(defs.roles.len(), 2);
        assert_eq!(defs.roles[0].name, "auditor");
        assert!(defs.roles[0].includes.is_empty());

        let editor = &defs.roles[1];
        assert_eq!(editor.name, "editor");
        assert_eq!(editor.includes, vec!["user", "auditor"]);
    }

    #[test]
    fn test_parse_kind() {
        let kdl = r#"
kind "resource.read" description="Read a resource" {
    roles {
        - "anonymous"
    }
}

kind "resource.edit"
"#;
        let defs = parse_kdl_document(kdl).unwrap();
        assert_eq!(defs.kinds.len(), 2);
        let read = &defs.kinds[0];
        assert_eq!(read.key, "resource.read");
        assert_eq!(read.description.as_deref(), Some("Read a resource"));
        assert_eq!(read.default_roles, vec!["anonymous"]);

        let edit = &defs.kinds[1];
        assert!(edit.description.is_none());
        assert!(edit.default_roles.is_empty());
    }

    #[test]
    fn test_unknown_top_level_node_ignored() {
        let kdl = r#"
resource "vm"
role "viewer"
"#;
        let defs = parse_kdl_document(kdl).unwrap();
        assert_eq!(defs.roles.len(), 1);
    }

    #[test]
    fn test_parse_role_without_name() {
        let err = parse_kdl_document("role").unwrap_err();
        assert!(matches!(err, AuthzError::InvalidDefinitions(_)));
    }

    #[test]
    fn test_parse_unexpected_role_child() {
        let kdl = r#"
role "editor" {
    permissions {
        - "vm:start"
    }
}
"#;
        let err = parse_kdl_document(kdl).unwrap_err();
        assert!(matches!(err, AuthzError::InvalidDefinitions(_)));
    }

    #[test]
    fn test_parse_invalid_kdl() {
        let err = parse_kdl_document("role \"unterminated").unwrap_err();
        assert!(matches!(err, AuthzError::KdlParse(_)));
    }
}
