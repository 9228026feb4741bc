use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "stackwire", version, about = "Stackwire CLI")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a stack file and report errors and warnings.
    Check {
        #[arg(default_value = "stack.yaml")]
        stack: PathBuf,
    },

    /// Print the tiered execution order and the grants it will issue.
    Plan {
        #[arg(default_value = "stack.yaml")]
        stack: PathBuf,

        /// Print the plan as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Apply a stack against the local simulated control plane.
    ///
    /// Re-running after a failure resumes from the first unapplied step.
    Apply {
        #[arg(default_value = "stack.yaml")]
        stack: PathBuf,

        /// State file (overrides deployment.state_file)
        #[arg(long)]
        state: Option<PathBuf>,

        /// Nodes of one tier applied at once (overrides deployment.concurrency)
        #[arg(long, env = "STACKWIRE_CONCURRENCY")]
        concurrency: Option<usize>,
    },

    /// Print output bindings recorded in a state file.
    Outputs {
        /// Stack file used to locate the default state file
        #[arg(default_value = "stack.yaml")]
        stack: PathBuf,

        /// State file to read instead of the stack's default
        #[arg(long)]
        state: Option<PathBuf>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Print the OpenAPI documents handed to the agent runtime.
    Schema {
        #[arg(default_value = "stack.yaml")]
        stack: PathBuf,

        #[arg(long)]
        agent: String,

        /// Only this action group
        #[arg(long)]
        group: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries command output; logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Check { stack } => commands::check::run(&stack)?,
        Command::Plan { stack, json } => commands::plan::run(&stack, json)?,
        Command::Apply {
            stack,
            state,
            concurrency,
        } => commands::apply::run(&stack, state, concurrency).await?,
        Command::Outputs { stack, state, json } => {
            commands::outputs::run(&stack, state.as_deref(), json)?
        }
        Command::Schema {
            stack,
            agent,
            group,
        } => commands::schema::run(&stack, &agent, group.as_deref())?,
    }

    Ok(())
}
