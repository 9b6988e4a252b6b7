use anyhow::Result;
use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};
use clap_complete::generate;
use std::ffi::{OsStr, OsString};
use std::process::ExitCode;

use gce_runner::{
    actions,
    commands::{self, ActionCommand},
    config::{CreateArgs, GcpArgs, RunContext},
};

#[derive(Parser)]
#[command(
    name = "gce-runner",
    version,
    about = "Provision ephemeral GCE VMs as self-hosted GitHub Actions runners",
    long_about = "gce-runner creates a Compute Engine VM, installs and registers an ephemeral\n\
                  GitHub Actions runner on it, and waits until the runner is live. Run it again\n\
                  with `delete` when the job is done. Every flag also reads the matching\n\
                  INPUT_* variable so the binary can run directly as a pipeline step."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the runner VM and wait until its agent is registered
    Create {
        #[command(flatten)]
        gcp: GcpArgs,

        #[command(flatten)]
        create: CreateArgs,
    },

    /// Delete the runner VM
    Delete {
        #[command(flatten)]
        gcp: GcpArgs,

        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Show the runner VM's status and labels
    Status {
        #[command(flatten)]
        gcp: GcpArgs,
    },

    /// Run as a pipeline step: dispatch on the `command` input (create | delete)
    Action {
        #[arg(long, env = "INPUT_COMMAND")]
        command: String,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Inputs for `action` with command=create, read from the environment.
#[derive(Parser)]
#[command(name = "gce-runner")]
struct ActionCreate {
    #[command(flatten)]
    gcp: GcpArgs,

    #[command(flatten)]
    create: CreateArgs,
}

/// Inputs for `action` with command=delete, read from the environment.
#[derive(Parser)]
#[command(name = "gce-runner")]
struct ActionDelete {
    #[command(flatten)]
    gcp: GcpArgs,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cmd = ["create", "delete", "status"]
        .into_iter()
        .fold(Cli::command(), |cmd, name| cmd.mut_subcommand(name, |sub| ignore_blank_env(sub, &env_var)));
    let cli = Cli::from_arg_matches(&cmd.get_matches()).unwrap_or_else(|e| e.exit());

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            actions::error(format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let ctx = RunContext::from_env();

    match cli.command {
        Commands::Create { gcp, create } => commands::create::run(&gcp, &create, &ctx).await?,
        Commands::Delete { gcp, yes } => commands::delete::run(&gcp, &ctx, yes)?,
        Commands::Status { gcp } => commands::status::run(&gcp, &ctx)?,
        Commands::Action { command } => match command.parse::<ActionCommand>()? {
            ActionCommand::Create => {
                let inputs = parse_env_inputs::<ActionCreate>()?;
                commands::create::run(&inputs.gcp, &inputs.create, &ctx).await?
            }
            ActionCommand::Delete => {
                let inputs = parse_env_inputs::<ActionDelete>()?;
                commands::delete::run(&inputs.gcp, &ctx, true)?
            }
        },
        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "gce-runner", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// The host sets an empty `INPUT_*` for every input a workflow leaves out.
/// Drop those env bindings so defaults apply instead of parse errors.
fn ignore_blank_env(cmd: clap::Command, lookup: &dyn Fn(&OsStr) -> Option<OsString>) -> clap::Command {
    cmd.mut_args(|arg| {
        let blank = arg
            .get_env()
            .and_then(|name| lookup(name))
            .is_some_and(|value| value.to_string_lossy().trim().is_empty());
        if blank { arg.env(None::<&'static str>) } else { arg }
    })
}

fn env_var(name: &OsStr) -> Option<OsString> {
    std::env::var_os(name)
}

/// Parse an input group from the environment alone, as the `action` step does.
fn parse_env_inputs<T: CommandFactory + FromArgMatches>() -> Result<T> {
    let cmd = ignore_blank_env(T::command(), &env_var);
    let matches = cmd.try_get_matches_from(["gce-runner"])?;
    Ok(T::from_arg_matches(&matches)?)
}
