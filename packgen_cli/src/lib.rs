#![allow(missing_docs)]

mod generate;
mod helpers;
mod info;

use anyhow::Result;
use clap::Parser;
use enum_dispatch::enum_dispatch;
use std::process::ExitCode;

#[derive(Parser)]
pub struct GlobalConfiguration {
    /// Print per-iteration progress.
    #[arg(long)]
    pub verbose: bool,
}

#[enum_dispatch]
pub trait Subcommand {
    fn run(&self, cfg: &GlobalConfiguration) -> Result<ExitCode>;
}

#[enum_dispatch(Subcommand)]
#[derive(Parser)]
pub enum SubcommandEnum {
    Generate(generate::Opts),
    Info(info::Opts),
}

#[derive(Parser)]
#[command(
    arg_required_else_help = true,
    author,
    about = "Generate and inspect hard-sphere packings",
    disable_help_subcommand = true,
    name = "packgen",
    version
)]
pub struct Opts {
    #[command(flatten)]
    pub configuration: GlobalConfiguration,
    #[command(subcommand)]
    pub subcommand: SubcommandEnum,
}
