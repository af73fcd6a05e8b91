use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use agent_relay::{
    DataEntry, PREVIEW_CHARS, PipelineState, Problem, RelayConfig, Runner, Stage, StateObserver,
    UreqTransport, truncate,
};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "agent-relay")]
#[command(version, about = "Plan a team of agents for a problem, then run them in sequence")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file (TOML, or JSON when it ends in .json)
    #[arg(short, long, global = true, default_value = "agent-relay.toml")]
    config: PathBuf,

    /// Model to use instead of the configured one
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Upper bound on planned agents (clamped to 2..=6)
    #[arg(long, global = true)]
    max_agents: Option<i64>,

    /// Enable debug logging and echo the architect's raw output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// List the demo problems in the config
    List,

    /// Run the architect only and print the plan and suggested inputs
    Plan {
        #[command(flatten)]
        problem: ProblemArgs,
    },

    /// Plan, then execute every agent, streaming output to stdout
    Run {
        #[command(flatten)]
        problem: ProblemArgs,

        /// Attach a file as input (repeatable)
        #[arg(long = "upload", value_name = "FILE")]
        uploads: Vec<PathBuf>,

        /// Free-form notes passed to every agent
        #[arg(long)]
        notes: Option<String>,

        /// Do not use the architect's suggested inputs
        #[arg(long)]
        skip_suggested: bool,
    },
}

#[derive(Args)]
struct ProblemArgs {
    /// Index of a demo from `list`
    #[arg(required_unless_present = "problem", conflicts_with = "problem")]
    demo: Option<usize>,

    /// A custom problem statement
    #[arg(short, long)]
    problem: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "agent_relay=debug"
    } else {
        "agent_relay=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = load_config(&cli.config)?.with_env();
    if let Some(model) = cli.model {
        config.defaults.model = model;
    }
    if let Some(max) = cli.max_agents {
        config.defaults.max_agents = max;
    }

    match cli.command {
        Command::List => {
            if config.demos.is_empty() {
                eprintln!("no demos in {}", cli.config.display());
            }
            for (index, demo) in config.demos.iter().enumerate() {
                println!("{index:>3}  {}", demo.title);
                if !demo.body.is_empty() {
                    println!("     {}", demo.body);
                }
            }
        }
        Command::Plan { problem } => {
            let problem = resolve_problem(&config, &problem)?;
            let mut runner = build_runner(&config, cli.verbose);
            runner.select(problem)?;
            runner.plan()?;
            print_plan(runner.state());
        }
        Command::Run {
            problem,
            uploads,
            notes,
            skip_suggested,
        } => {
            let problem = resolve_problem(&config, &problem)?;
            let uploads = uploads
                .iter()
                .map(PathBuf::as_path)
                .map(read_upload)
                .collect::<Result<Vec<_>>>()?;

            let mut runner = build_runner(&config, cli.verbose);
            runner.select(problem)?;
            runner.plan()?;
            if cli.verbose {
                print_plan(runner.state());
            }

            runner.inputs_mut(|inputs| {
                if skip_suggested {
                    inputs.deselect_all();
                }
                for upload in uploads {
                    inputs.add_upload(upload);
                }
                if let Some(notes) = notes {
                    inputs.set_notes(notes);
                }
            })?;

            let executions = runner.execute()?;
            println!();
            eprintln!("{} agents finished", executions.len());
        }
    }
    Ok(())
}

fn load_config(path: &Path) -> Result<RelayConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        return Ok(RelayConfig::default());
    }
    Ok(RelayConfig::load(path)?)
}

fn build_runner(config: &RelayConfig, verbose: bool) -> Runner<UreqTransport> {
    let transport = UreqTransport::new(config.endpoint.connect_timeout());
    Runner::new(transport, config.settings())
        .with_tracing()
        .observe(StreamPrinter::new(io::stdout(), io::stderr(), verbose))
}

fn resolve_problem(config: &RelayConfig, args: &ProblemArgs) -> Result<Problem> {
    if let Some(text) = &args.problem {
        return Ok(Problem::custom(text)?);
    }
    let index = args.demo.context("pass a demo index or --problem")?;
    let demo = config.demo(index).with_context(|| {
        format!(
            "no demo at index {index} ({} configured, see `agent-relay list`)",
            config.demos.len()
        )
    })?;
    Ok(Problem::from_demo(demo))
}

fn read_upload(path: &Path) -> Result<DataEntry> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read upload {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(DataEntry::upload(name, content))
}

fn print_plan(state: &PipelineState) {
    println!("Plan ({} agents)", state.plan.len());
    for (index, agent) in state.plan.iter().enumerate() {
        println!("{}. {}", index + 1, agent.name);
        println!("   instruction: {}", agent.system_instruction);
        println!("   task: {}", agent.initial_task);
    }

    println!();
    println!("Suggested inputs");
    for entry in &state.inputs.suggested {
        let mark = if state.inputs.is_selected(&entry.id) { 'x' } else { ' ' };
        println!("[{mark}] {} [{}]", entry.title, entry.kind);
        println!("{}", truncate(&entry.content, PREVIEW_CHARS));
        println!();
    }
}

/// Writes streamed text as it arrives: agent output to `out` under a
/// header per agent, architect output to `log` when echoing is on.
struct StreamPrinter<O, E> {
    out: O,
    log: E,
    echo_architect: bool,
    architect_len: usize,
    agent: Option<usize>,
    agent_len: usize,
}

impl<O: Write, E: Write> StreamPrinter<O, E> {
    fn new(out: O, log: E, echo_architect: bool) -> Self {
        Self {
            out,
            log,
            echo_architect,
            architect_len: 0,
            agent: None,
            agent_len: 0,
        }
    }

    fn render(&mut self, state: &PipelineState) -> io::Result<()> {
        if state.stage == Stage::Architect && self.echo_architect {
            let buffer = &state.architect_buffer;
            if buffer.len() < self.architect_len {
                self.architect_len = 0;
            }
            if let Some(fresh) = buffer.get(self.architect_len..) {
                write!(self.log, "{fresh}")?;
            }
            self.architect_len = buffer.len();
        }

        if state.running != self.agent {
            self.agent = state.running;
            self.agent_len = 0;
            if let (Some(index), Some(exec)) = (state.running, state.running_execution()) {
                writeln!(self.out, "\n## {}. {}\n", index + 1, exec.name)?;
            }
        }

        if let Some(exec) = state.running_execution() {
            if let Some(fresh) = exec.text.get(self.agent_len..) {
                write!(self.out, "{fresh}")?;
                self.out.flush()?;
            }
            self.agent_len = exec.text.len();
        }
        Ok(())
    }
}

impl<O: Write, E: Write> StateObserver for StreamPrinter<O, E> {
    fn on_state(&mut self, state: &PipelineState) {
        if let Err(e) = self.render(state) {
            tracing::warn!(error = %e, "failed to write streamed output");
        }
    }
}
