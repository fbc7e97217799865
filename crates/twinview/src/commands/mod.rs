//! Command dispatch: bridges CLI args -> engine calls -> output formatting.

pub mod central;
pub mod cloud;
pub mod config_cmd;
pub mod device;
pub mod provision;
pub mod serve;

use crate::cli::{Command, GlobalOpts};
use crate::config::Context;
use crate::error::CliError;

/// Dispatch a network-bound command to its handler.
pub async fn dispatch(cmd: Command, ctx: &Context, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::CentralTwin => central::handle(ctx, global).await,
        Command::CloudTwin(args) => cloud::handle(ctx, args, global).await,
        Command::Provision(args) => provision::handle(ctx, &args, global).await,
        Command::Device(args) => device::handle(ctx, args, global).await,
        Command::Serve(args) => serve::handle(ctx, &args, global).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => unreachable!(),
    }
}
