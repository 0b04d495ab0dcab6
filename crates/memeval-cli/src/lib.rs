mod agents;
mod args;
mod run;

use anyhow::Result;

pub use args::{AgentKind, Cli, Commands, RunArgs};

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run(args) => run::handle(args),
    }
}
