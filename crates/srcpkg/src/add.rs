use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use colored::Colorize;

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Repository URL or alias, e.g. github.com/acme/util
    pub package: String,

    /// Version constraint (defaults to ^<latest stable release>)
    pub constraint: Option<String>,

    /// Path to the project (defaults to current directory)
    #[arg(long, default_value = ".")]
    pub path: PathBuf,

    /// Allow sub-dependencies to cross major versions
    #[arg(long)]
    pub force: bool,
}

pub fn execute(args: AddArgs) -> Result<()> {
    let hosts = crate::hosts()?;
    println!("{} {}", "Adding".cyan(), args.package.bold());
    let report = srcpkg_core::ops::add(
        &hosts,
        &args.path,
        &args.package,
        args.constraint.as_deref(),
        &crate::options(args.force),
    )?;
    crate::print_report(&report);
    Ok(())
}
