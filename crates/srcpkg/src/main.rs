use clap::{Parser, Subcommand};
use colored::Colorize;
use env_logger::Env;
use srcpkg_core::gateway::Hosts;
use srcpkg_core::resolve::ResolveOptions;
use srcpkg_core::sync::SyncReport;

mod add;
mod install;
mod remove;
mod update;

#[derive(Parser)]
#[command(name = "srcpkg")]
#[command(about = "Package manager for git-hosted source packages", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(short = 'd', long = "debug", global = true, hide = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install the packages declared in srcpkg.config.json
    #[command(alias = "i")]
    Install(install::InstallArgs),

    /// Add a package to the project
    Add(add::AddArgs),

    /// Update a package to a newer version
    #[command(alias = "up")]
    Update(update::UpdateArgs),

    /// Remove a package from the project
    #[command(alias = "rm")]
    Remove(remove::RemoveArgs),
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{} {e}", "Error:".red());
        for cause in e.chain().skip(1) {
            eprintln!("  {cause}");
        }
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Default level depends on --debug; RUST_LOG overrides either.
    let env = if cli.debug {
        Env::default().default_filter_or("debug")
    } else {
        Env::default().default_filter_or("error")
    };
    env_logger::Builder::from_env(env).init();

    match cli.command {
        Commands::Install(args) => install::execute(args),
        Commands::Add(args) => add::execute(args),
        Commands::Update(args) => update::execute(args),
        Commands::Remove(args) => remove::execute(args),
    }
}

/// Token for private repositories, from `SRCPKG_TOKEN` or `GITHUB_TOKEN`.
fn token_from_env() -> Option<String> {
    for name in ["SRCPKG_TOKEN", "GITHUB_TOKEN"] {
        if let Ok(token) = std::env::var(name)
            && !token.trim().is_empty()
        {
            log::debug!("Using access token from {name}");
            return Some(token);
        }
    }
    None
}

pub(crate) fn options(force: bool) -> ResolveOptions {
    ResolveOptions {
        force,
        token: token_from_env(),
    }
}

pub(crate) fn hosts() -> anyhow::Result<Hosts> {
    Ok(Hosts::github()?)
}

pub(crate) fn print_report(report: &SyncReport) {
    for name in &report.installed {
        println!("  {} {}", "+".green(), name);
    }
    for name in &report.updated {
        println!("  {} {}", "~".yellow(), name);
    }
    for name in &report.removed {
        println!("  {} {}", "-".red(), name);
    }
    if report.is_noop() {
        println!("{}", "All packages are up to date.".green());
    } else {
        println!(
            "{}",
            format!(
                "{} installed, {} updated, {} removed ({} downloaded)",
                report.installed.len(),
                report.updated.len(),
                report.removed.len(),
                report.downloads
            )
            .green()
        );
    }
}
