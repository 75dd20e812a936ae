use std::path::PathBuf;
use std::sync::Arc;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, Subcommand};
use gatekeep::authz::errors::AuthzError;
use gatekeep::authz::loader::{build_registry, load_definitions, sync_definitions};
use gatekeep::authz::types::{Action, PermissionHolder, Principal};
use gatekeep::authz::{legacy, roles, Authorizer};
use gatekeep::settings::Settings;
use gatekeep::storage;
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "gatekeep",
    version,
    about = "Canonical permission engine administration"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or upgrade the schema, then sync the configured definitions.
    Init,

    /// Sync roles and inheritance edges from a KDL definitions file or directory.
    SyncRoles {
        /// Overrides `authz.definitions_path`
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Manage roles.
    #[command(subcommand)]
    Role(RoleCommand),

    /// Print the effective roles of a holder.
    Effective {
        #[command(flatten)]
        holder: HolderArgs,

        #[arg(long)]
        json: bool,
    },

    /// Check a holder against a permission id or a resource.
    Check {
        #[command(flatten)]
        holder: HolderArgs,

        #[arg(long, conflicts_with = "resource", required_unless_present = "resource")]
        permission: Option<i32>,

        #[arg(long, requires = "action")]
        resource: Option<String>,

        /// `read` or `edit`
        #[arg(long)]
        action: Option<Action>,
    },

    /// Convert legacy comma-separated group columns into permissions.
    UpgradeLegacy,

    /// Delete permissions and minterms nothing references.
    ///
    /// Run while no other writer is connected: a minterm or permission that
    /// a concurrent writer just looked up can be removed under it.
    Reap,
}

#[derive(Subcommand, Debug)]
enum RoleCommand {
    /// Create a role.
    Add { key: String },

    /// Make `role` inherit `inherited`.
    Inherit {
        role: String,
        inherited: String,

        /// Remove the edge instead
        #[arg(long)]
        revoke: bool,
    },

    /// Delete an unreferenced role.
    Remove { key: String },

    /// List roles and what they inherit.
    List {
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Args, Debug)]
struct HolderArgs {
    /// Directly assigned role keys, comma separated
    #[arg(long, value_delimiter = ',')]
    roles: Vec<String>,

    /// Treat the holder as disabled
    #[arg(long)]
    disabled: bool,
}

impl HolderArgs {
    fn principal(&self) -> Principal {
        let principal = Principal::new("cli", self.roles.iter().cloned());
        if self.disabled {
            principal.disabled()
        } else {
            principal
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = Settings::load(&cli.config)?;
    tracing::debug!(?settings, "Loaded configuration");

    // init storage (database)
    let db = storage::init(&settings.database).await?;

    let registry = match &settings.authz.definitions_path {
        Some(path) => build_registry(&load_definitions(path)?)?,
        None => Default::default(),
    };
    let authz = Authorizer::new(db, &settings.authz).with_registry(Arc::new(registry));

    match cli.command {
        Command::Init => {
            if let Some(path) = &settings.authz.definitions_path {
                sync(&authz, path).await?;
            }
            println!("database ready");
        }
        Command::SyncRoles { path } => {
            let path = path
                .or_else(|| settings.authz.definitions_path.clone())
                .ok_or_else(|| {
                    AuthzError::InvalidDefinitions(
                        "no definitions path given and `authz.definitions_path` is unset".into(),
                    )
                })?;
            sync(&authz, &path).await?;
        }
        Command::Role(cmd) => run_role(&authz, cmd).await?,
        Command::Effective { holder, json } => {
            let principal = holder.principal();
            let effective = authz
                .effective_roles(Some(&principal as &dyn PermissionHolder))
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&effective).into_diagnostic()?);
            } else {
                for role in effective {
                    println!("{}", role.key);
                }
            }
        }
        Command::Check {
            holder,
            permission,
            resource,
            action,
        } => {
            let principal = holder.principal();
            let holder = Some(&principal as &dyn PermissionHolder);
            let outcome = match (permission, resource.zip(action)) {
                (Some(id), _) => authz.authorize(holder, id).await,
                (None, Some((name, action))) => {
                    authz.authorize_resource(holder, &name, action).await
                }
                (None, None) => Cli::command()
                    .error(
                        ErrorKind::MissingRequiredArgument,
                        "pass --permission, or --resource with --action",
                    )
                    .exit(),
            };
            match outcome {
                Ok(()) => println!("allowed"),
                Err(AuthzError::Forbidden) => {
                    println!("forbidden");
                    std::process::exit(1);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Command::UpgradeLegacy => {
            let report = legacy::upgrade_legacy_resources(authz.db()).await?;
            println!(
                "converted {} resources, skipped {}",
                report.converted,
                report.skipped.len()
            );
            for name in &report.skipped {
                println!("  skipped: {name}");
            }
        }
        Command::Reap => {
            let report = storage::reap_unreferenced(authz.db()).await?;
            println!(
                "removed {} permissions and {} minterms",
                report.permissions, report.minterms
            );
        }
    }

    Ok(())
}

async fn sync(authz: &Authorizer, path: &std::path::Path) -> Result<()> {
    let defs = load_definitions(path)?;
    let report = sync_definitions(authz.db(), &defs).await?;
    authz.permissions_changed().await;
    println!(
        "synced {} roles, {} new inheritance edges",
        report.roles, report.edges_added
    );
    Ok(())
}

async fn run_role(authz: &Authorizer, cmd: RoleCommand) -> Result<()> {
    match cmd {
        RoleCommand::Add { key } => {
            let role = authz.create_role(&key).await?;
            println!("created {role}");
        }
        RoleCommand::Inherit {
            role,
            inherited,
            revoke,
        } => {
            let changed = if revoke {
                authz.remove_inheritance(&role, &inherited).await?
            } else {
                authz.add_inheritance(&role, &inherited).await?
            };
            if !changed {
                println!("no change");
            }
        }
        RoleCommand::Remove { key } => {
            authz.delete_role(&key).await?;
            println!("deleted {key}");
        }
        RoleCommand::List { json } => {
            let graph = authz.role_graph().await?;
            let mut all: Vec<_> = roles::all_roles(authz.db()).await?.into_values().collect();
            all.sort();
            let inherits = |id| {
                graph
                    .inherited_by(id)
                    .iter()
                    .filter_map(|i| graph.role(*i).map(|r| r.key.as_str()))
                    .collect::<Vec<_>>()
            };
            if json {
                let listing: Vec<_> = all
                    .iter()
                    .map(|r| {
                        serde_json::json!({ "id": r.id, "key": r.key, "inherits": inherits(r.id) })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&listing).into_diagnostic()?);
            } else {
                for r in &all {
                    let inherited = inherits(r.id);
                    if inherited.is_empty() {
                        println!("{r}");
                    } else {
                        println!("{r} -> {}", inherited.join(", "));
                    }
                }
            }
        }
    }
    Ok(())
}
