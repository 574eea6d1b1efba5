//! orgclone command line
//!
//! `catalog` lists the migratable kinds, `plan` prints kind tiers for a
//! config, `preflight` simulates a run against an inventory snapshot.

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use orgclone_catalog::{tiers, Catalog, PhaseSelection};
use orgclone_engine::{
    EngineConfig, InventorySnapshot, Migration, RunSelection, SnapshotDestination, SnapshotSource, SuperUser,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    let config = Arg::new("config")
        .long("config")
        .short('c')
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("Engine config (.toml, .yaml or .json)");

    Command::new("orgclone")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Migrate organization configuration between tenants")
        .subcommand_required(true)
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("catalog")
                .about("List resource kinds and their dependencies")
                .arg(
                    Arg::new("nac")
                        .long("nac")
                        .action(ArgAction::SetTrue)
                        .help("Include access assurance kinds"),
                )
                .arg(
                    Arg::new("user-macs")
                        .long("user-macs")
                        .action(ArgAction::SetTrue)
                        .help("Include endpoint identities (with --nac)"),
                ),
        )
        .subcommand(
            Command::new("plan")
                .about("Print the kind tiers a run would follow")
                .arg(config.clone()),
        )
        .subcommand(
            Command::new("preflight")
                .about("Simulate a run against an inventory snapshot")
                .arg(config)
                .arg(
                    Arg::new("selection")
                        .long("selection")
                        .short('s')
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Site and template selection"),
                )
                .arg(
                    Arg::new("snapshot")
                        .long("snapshot")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Inventory snapshot (.json)"),
                )
                .arg(
                    Arg::new("super-users")
                        .long("super-users")
                        .value_name("LIST")
                        .help("Administrators to invite: comma-separated 'email' or 'email:first:last'"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.compact().with_target(false).init();
    }
}

fn path<'a>(args: &'a ArgMatches, name: &str) -> Result<&'a PathBuf> {
    args.get_one::<PathBuf>(name)
        .with_context(|| format!("missing --{name}"))
}

fn print_catalog(args: &ArgMatches) -> Result<ExitCode> {
    let phases = PhaseSelection {
        nac: args.get_flag("nac"),
        user_macs: args.get_flag("user-macs"),
    };
    let catalog = Catalog::standard();
    for kind in catalog.participating(phases) {
        let descriptor = catalog.descriptor(kind)?;
        let depends: Vec<&str> = descriptor.depends_on.iter().map(|k| k.as_str()).collect();
        println!(
            "{:<24} {:<5} {:<11} {:<9} {}",
            kind.as_str(),
            format!("{:?}", descriptor.scope).to_lowercase(),
            format!("{:?}", descriptor.cardinality).to_lowercase(),
            format!("{:?}", descriptor.phase).to_lowercase(),
            if depends.is_empty() { "-".to_string() } else { depends.join(", ") }
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn print_plan(args: &ArgMatches) -> Result<ExitCode> {
    let config = EngineConfig::from_file(path(args, "config")?)?;
    let catalog = Catalog::standard();
    let kinds = catalog.participating(config.phases());
    for (index, tier) in tiers(catalog, &kinds)?.iter().enumerate() {
        let names: Vec<&str> = tier.iter().map(|k| k.as_str()).collect();
        println!("tier {index}: {}", names.join(", "));
    }
    Ok(ExitCode::SUCCESS)
}

async fn preflight(args: &ArgMatches) -> Result<ExitCode> {
    let config = EngineConfig::from_file(path(args, "config")?)?;
    let mut selection = RunSelection::from_file(path(args, "selection")?)?;
    if let Some(raw) = args.get_one::<String>("super-users") {
        selection.super_users.extend(SuperUser::parse_list(raw)?);
    }
    let snapshot_path = path(args, "snapshot")?;
    let snapshot = Arc::new(
        InventorySnapshot::from_file(snapshot_path)
            .with_context(|| format!("loading snapshot {}", snapshot_path.display()))?,
    );
    info!(
        sites = selection.sites.len(),
        super_users = selection.super_users.len(),
        "running preflight"
    );

    let migration = Migration::new(
        config,
        selection,
        Arc::new(SnapshotSource::new(snapshot.clone())),
        Arc::new(SnapshotDestination::new(snapshot)),
    )?;
    let report = migration.preflight().await?;

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.generate_text());
    }

    Ok(if report.summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    match matches.subcommand() {
        Some(("catalog", args)) => print_catalog(args),
        Some(("plan", args)) => print_plan(args),
        Some(("preflight", args)) => preflight(args).await,
        _ => Ok(ExitCode::from(2)),
    }
}
