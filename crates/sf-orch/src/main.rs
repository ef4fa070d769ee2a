use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sf_core::{
    has_errors, HostConfig, RepoConfig, RuntimeKind, ServiceConfig, ServiceSpec, StateStore,
    Validate, DEFAULT_BASE_BRANCH,
};
use sf_orch::{
    Orchestrator, PromptRequest, ServiceAction, SshConnector, StartRequest, UpRequest,
};
use sf_remote::ExecOptions;

const STATE_DIR_ENV: &str = "SF_STATE_DIR";
const DEFAULT_STATE_DIR: &str = ".sf";
const DEFAULT_LLM: &str = "claude";

#[derive(Parser)]
#[command(name = "sf")]
#[command(version, about = "Feature worktrees and LLM sessions across remote hosts")]
struct Cli {
    /// State directory (defaults to ~/.sf)
    #[arg(long, global = true, env = STATE_DIR_ENV)]
    state_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log remote commands instead of running them
    #[arg(long, global = true)]
    dry_run: bool,

    /// Accept host keys of hosts not yet in known_hosts
    #[arg(long, global = true)]
    accept_new_hostkeys: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the state directory and an empty config
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Manage hosts
    Host {
        #[command(subcommand)]
        action: HostAction,
    },
    /// Manage repositories
    Repo {
        #[command(subcommand)]
        action: RepoAction,
    },
    /// Manage features and their worktrees
    Feature {
        #[command(subcommand)]
        action: FeatureAction,
    },
    /// Manage LLM sessions
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Run a feature's services
    Services {
        #[command(subcommand)]
        action: ServicesAction,
    },
    /// Check that hosts have the tools sessions need
    Bootstrap {
        /// Comma-separated host names
        #[arg(long, value_delimiter = ',', required = true)]
        hosts: Vec<String>,
        /// LLM CLIs to check (repeatable)
        #[arg(long = "llm", default_values_t = [String::from("claude"), String::from("codex")])]
        llms: Vec<String>,
        /// Print reports as JSON
        #[arg(long)]
        json: bool,
    },
    /// Export or import the whole state
    State {
        #[command(subcommand)]
        action: StateAction,
    },
    /// Register host and repo, sync and start a session in one step
    Up(UpArgs),
    /// Summarize the local state
    Doctor,
}

#[derive(Subcommand)]
enum HostAction {
    Add {
        name: String,
        /// ssh target: user@host
        target: String,
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Environment variable KEY=VALUE (repeatable)
        #[arg(long = "env", value_parser = parse_key_value)]
        env: Vec<(String, String)>,
        /// Directory holding anchors and worktrees
        #[arg(long)]
        workspace_root: Option<String>,
    },
    List,
}

#[derive(Subcommand)]
enum RepoAction {
    Add {
        name: String,
        url: String,
        #[arg(long, default_value = DEFAULT_BASE_BRANCH)]
        base: String,
        /// Subdirectory sessions start in
        #[arg(long)]
        anchor_subdir: Option<String>,
    },
    List,
}

#[derive(Subcommand)]
enum FeatureAction {
    New {
        name: String,
        /// Base branch; defaults to each repo's base
        #[arg(long)]
        base: Option<String>,
    },
    List,
    Attach {
        feature: String,
        repo: String,
        /// Comma-separated host names
        #[arg(long, value_delimiter = ',', required = true)]
        hosts: Vec<String>,
        #[arg(long)]
        subdir: Option<String>,
        #[command(flatten)]
        service: ServiceArgs,
    },
    Sync {
        feature: String,
        #[arg(long)]
        repo: Option<String>,
    },
    Destroy {
        feature: String,
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Args)]
struct ServiceArgs {
    /// docker_compose, podman_compose or script
    #[arg(long)]
    runtime: Option<RuntimeKind>,
    /// Compose file passed with -f
    #[arg(long)]
    compose_file: Option<String>,
    /// Script runtime command ACTION=COMMAND (repeatable)
    #[arg(long = "service-cmd", value_parser = parse_key_value)]
    commands: Vec<(String, String)>,
}

impl ServiceArgs {
    fn into_config(self) -> Result<Option<ServiceConfig>> {
        if self.runtime.is_none() && self.compose_file.is_none() && self.commands.is_empty() {
            return Ok(None);
        }
        let spec = ServiceSpec {
            runtime: self.runtime.unwrap_or_default(),
            file: self.compose_file,
            commands: (!self.commands.is_empty())
                .then(|| self.commands.into_iter().collect::<BTreeMap<_, _>>()),
        };
        Ok(Some(ServiceConfig::try_from(spec)?))
    }
}

#[derive(Subcommand)]
enum SessionAction {
    Start {
        feature: String,
        repo: String,
        #[arg(long, default_value = DEFAULT_LLM)]
        llm: String,
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        subdir: Option<String>,
        /// Command to run instead of the LLM's chat CLI
        #[arg(long)]
        command: Option<String>,
    },
    Stop {
        feature: String,
        repo: String,
        #[arg(long, default_value = DEFAULT_LLM)]
        llm: String,
        #[arg(long)]
        host: Option<String>,
    },
    Status,
    Prompt(PromptArgs),
}

#[derive(Args)]
struct PromptArgs {
    feature: String,
    repo: String,
    #[arg(long, default_value = DEFAULT_LLM)]
    llm: String,
    #[arg(long)]
    host: Option<String>,
    #[command(flatten)]
    content: PromptContent,
}

#[derive(Args)]
struct PromptContent {
    /// Local file sent ahead of the worktree files
    #[arg(long)]
    prompt_file: Option<PathBuf>,
    /// Worktree glob to include (repeatable)
    #[arg(long)]
    include: Vec<String>,
    /// Worktree glob to exclude (repeatable)
    #[arg(long)]
    exclude: Vec<String>,
    /// Byte cap for the file section
    #[arg(long)]
    max_bytes: Option<usize>,
}

impl PromptContent {
    fn requested(&self) -> bool {
        self.prompt_file.is_some()
            || !self.include.is_empty()
            || !self.exclude.is_empty()
            || self.max_bytes.is_some()
    }

    fn into_request(
        self,
        feature: String,
        repo: String,
        llm: String,
        host: Option<String>,
    ) -> PromptRequest {
        PromptRequest {
            feature,
            repo,
            llm,
            prompt_file: self.prompt_file,
            include: self.include,
            exclude: self.exclude,
            max_bytes: self.max_bytes,
            host,
        }
    }
}

#[derive(Subcommand)]
enum ServicesAction {
    Up(ServiceTarget),
    Down {
        #[command(flatten)]
        target: ServiceTarget,
        /// Remove named volumes
        #[arg(long)]
        volumes: bool,
    },
    Ps(ServiceTarget),
}

#[derive(Args)]
struct ServiceTarget {
    feature: String,
    repo: String,
    #[arg(long)]
    host: Option<String>,
}

#[derive(Subcommand)]
enum StateAction {
    Export {
        path: PathBuf,
    },
    Import {
        path: PathBuf,
        /// Drop existing features and config first
        #[arg(long)]
        replace: bool,
    },
}

#[derive(Args)]
struct UpArgs {
    /// name=user@host
    #[arg(long, value_parser = parse_key_value)]
    host: (String, String),
    /// name=git-url
    #[arg(long, value_parser = parse_key_value)]
    repo: (String, String),
    #[arg(long)]
    feature: String,
    #[arg(long, default_value = DEFAULT_LLM)]
    llm: String,
    /// Feature base branch
    #[arg(long)]
    base: Option<String>,
    /// Repository base branch (defaults to --base)
    #[arg(long)]
    repo_base: Option<String>,
    /// Send a prompt after starting the session
    #[arg(long)]
    prompt: bool,
    #[command(flatten)]
    content: PromptContent,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    let (key, value) = (key.trim(), value.trim());
    if key.is_empty() || value.is_empty() {
        return Err(format!("expected NAME=VALUE, got '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn resolve_state_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path),
        None => dirs::home_dir()
            .map(|home| home.join(DEFAULT_STATE_DIR))
            .context("cannot determine home directory; pass --state-dir"),
    }
}

fn init_logging(verbose: u8) {
    let log_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let store = StateStore::new(resolve_state_dir(cli.state_dir)?);
    let options = ExecOptions::from_env(cli.dry_run, cli.accept_new_hostkeys);
    let orch = Orchestrator::new(store, SshConnector { options });

    match cli.command {
        Commands::Init { force } => {
            orch.store().init(force)?;
            println!("Initialized Session Forge state at {}", orch.store().root().display());
        }
        Commands::Host { action } => run_host(&orch, action)?,
        Commands::Repo { action } => run_repo(&orch, action)?,
        Commands::Feature { action } => run_feature(&orch, action)?,
        Commands::Session { action } => run_session(&orch, action)?,
        Commands::Services { action } => run_services(&orch, action)?,
        Commands::Bootstrap { hosts, llms, json } => {
            let reports = orch.bootstrap(&hosts, &llms)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
                return Ok(());
            }
            for report in &reports {
                println!("Bootstrapping host {}", report.host);
                for check in &report.checks {
                    let status = if check.ok { "ok" } else { "missing" };
                    println!(" - {} {status}: {}", check.label, check.output);
                }
            }
        }
        Commands::State { action } => match action {
            StateAction::Export { path } => {
                let snapshot = orch.store().export_state(&path)?;
                println!(
                    "Exported {} feature(s) to {}",
                    snapshot.features.len(),
                    path.display()
                );
            }
            StateAction::Import { path, replace } => {
                let snapshot = orch.store().import_state(&path, replace)?;
                println!(
                    "Imported {} host(s), {} repo(s), {} feature(s) from {}",
                    snapshot.config.hosts.len(),
                    snapshot.config.repos.len(),
                    snapshot.features.len(),
                    path.display()
                );
            }
        },
        Commands::Up(args) => run_up(&orch, args, cli.dry_run)?,
        Commands::Doctor => {
            let store = orch.store();
            let config = store.load_config()?;
            let features = store.list_features()?;
            println!("Config path: {}", store.config_path().display());
            println!(
                "Features: {}",
                if features.is_empty() {
                    "-".to_string()
                } else {
                    features.join(", ")
                }
            );
            println!("Hosts: {}", config.hosts.len());
            println!("Repos: {}", config.repos.len());
            let issues = config.validate();
            for issue in &issues {
                println!("{:?} {}: {}", issue.level, issue.code, issue.message);
            }
            if has_errors(&issues) {
                bail!("configuration has errors");
            }
        }
    }
    Ok(())
}

fn run_host(orch: &Orchestrator<SshConnector>, action: HostAction) -> Result<()> {
    match action {
        HostAction::Add {
            name,
            target,
            tags,
            env,
            workspace_root,
        } => {
            let mut host = HostConfig::new(&name, &target);
            host.tags = tags;
            host.env = env.into_iter().collect();
            host.workspace_root = workspace_root;
            orch.add_host(host)?;
            println!("Saved host {name} -> {target}");
        }
        HostAction::List => {
            let config = orch.store().load_config()?;
            if config.hosts.is_empty() {
                println!("No hosts configured. Use 'sf host add'.");
            }
            for host in config.hosts.values() {
                let env = host
                    .env
                    .iter()
                    .map(|(key, value)| format!("{key}={value}"))
                    .collect::<Vec<_>>()
                    .join(",");
                println!(
                    "{:<16} {:<28} tags={} env={}",
                    host.name,
                    host.target,
                    host.tags.join(","),
                    env
                );
            }
        }
    }
    Ok(())
}

fn run_repo(orch: &Orchestrator<SshConnector>, action: RepoAction) -> Result<()> {
    match action {
        RepoAction::Add {
            name,
            url,
            base,
            anchor_subdir,
        } => {
            let mut repo = RepoConfig::new(&name, &url);
            repo.base = base;
            repo.anchor_subdir = anchor_subdir;
            orch.add_repo(repo)?;
            println!("Saved repo {name} -> {url}");
        }
        RepoAction::List => {
            let config = orch.store().load_config()?;
            if config.repos.is_empty() {
                println!("No repos configured. Use 'sf repo add'.");
            }
            for repo in config.repos.values() {
                println!(
                    "{:<16} {:<40} base={} subdir={}",
                    repo.name,
                    repo.url,
                    repo.base,
                    repo.anchor_subdir.as_deref().unwrap_or("-")
                );
            }
        }
    }
    Ok(())
}

fn run_feature(orch: &Orchestrator<SshConnector>, action: FeatureAction) -> Result<()> {
    match action {
        FeatureAction::New { name, base } => {
            let feature = orch.create_feature(&name, base)?;
            match feature.base.as_deref() {
                Some(base) => println!("Created feature {name} with base {base}"),
                None => println!("Created feature {name}"),
            }
        }
        FeatureAction::List => {
            let names = orch.store().list_features()?;
            if names.is_empty() {
                println!("No features defined. Use 'sf feature new'.");
            }
            for name in names {
                let feature = orch.store().load_feature(&name)?;
                let repos = feature
                    .repos
                    .iter()
                    .map(|attachment| format!("{}@{}", attachment.repo, attachment.hosts.join(",")))
                    .collect::<Vec<_>>();
                println!(
                    "{:<20} base={} repos={}",
                    feature.name,
                    feature.base.as_deref().unwrap_or("-"),
                    if repos.is_empty() {
                        "-".to_string()
                    } else {
                        repos.join(", ")
                    }
                );
            }
        }
        FeatureAction::Attach {
            feature,
            repo,
            hosts,
            subdir,
            service,
        } => {
            let hosts: Vec<String> = hosts
                .into_iter()
                .map(|host| host.trim().to_string())
                .filter(|host| !host.is_empty())
                .collect();
            let attachment =
                orch.attach_repo(&feature, &repo, hosts, subdir, service.into_config()?)?;
            println!(
                "Attached repo {repo} to feature {feature} on hosts {}",
                attachment.hosts.join(", ")
            );
        }
        FeatureAction::Sync { feature, repo } => {
            for entry in orch.sync_feature(&feature, repo.as_deref())? {
                println!(
                    "Synced feature {feature} repo {} on host {}\n - worktree ready at {}",
                    entry.repo, entry.host, entry.worktree
                );
            }
        }
        FeatureAction::Destroy { feature, yes } => {
            if !yes {
                bail!("Pass --yes to confirm destroying the feature");
            }
            for entry in orch.destroy_feature(&feature)? {
                println!(
                    "Removed worktree for repo {} on host {}",
                    entry.repo, entry.host
                );
            }
            println!("Destroyed feature {feature}");
        }
    }
    Ok(())
}

fn run_session(orch: &Orchestrator<SshConnector>, action: SessionAction) -> Result<()> {
    match action {
        SessionAction::Start {
            feature,
            repo,
            llm,
            host,
            subdir,
            command,
        } => {
            let summary = orch.start_session(StartRequest {
                feature,
                repo,
                llm,
                host,
                subdir,
                command,
            })?;
            println!(
                "Started session {} on host {} (cwd={})",
                summary.session, summary.host, summary.cwd
            );
        }
        SessionAction::Stop {
            feature,
            repo,
            llm,
            host,
        } => {
            let summary = orch.stop_session(&feature, &repo, &llm, host.as_deref())?;
            println!("Stopped session {} on {}", summary.session, summary.host);
        }
        SessionAction::Status => {
            let status = orch.session_status()?;
            if status.is_empty() {
                println!("No hosts configured");
            }
            for host in status {
                let sessions = if host.sessions.is_empty() {
                    "-".to_string()
                } else {
                    host.sessions.join(", ")
                };
                println!("{:<16} {sessions}", host.host);
            }
        }
        SessionAction::Prompt(args) => {
            let request = args
                .content
                .into_request(args.feature, args.repo, args.llm, args.host);
            let summary = orch.send_prompt(request)?;
            println!(
                "Sent prompt ({} bytes) to session {} on {}",
                summary.bytes, summary.session, summary.host
            );
        }
    }
    Ok(())
}

fn run_services(orch: &Orchestrator<SshConnector>, action: ServicesAction) -> Result<()> {
    let (target, action) = match action {
        ServicesAction::Up(target) => (target, ServiceAction::Up { detach: true }),
        ServicesAction::Down { target, volumes } => (target, ServiceAction::Down { volumes }),
        ServicesAction::Ps(target) => (target, ServiceAction::Ps),
    };
    let outcomes = orch.services(&target.feature, &target.repo, action, target.host.as_deref())?;
    for outcome in outcomes {
        println!("[{}] {} {action}", outcome.host, outcome.repo);
        let output = outcome.result.stdout.trim_end();
        if !output.is_empty() {
            println!("{output}");
        }
    }
    Ok(())
}

fn run_up(orch: &Orchestrator<SshConnector>, args: UpArgs, dry_run: bool) -> Result<()> {
    let (host, target) = args.host;
    let (repo, url) = args.repo;
    let wants_prompt = args.prompt || args.content.requested();
    let prompt = if wants_prompt && dry_run {
        println!("Skipping prompt delivery due to --dry-run");
        None
    } else if wants_prompt {
        Some(args.content.into_request(
            args.feature.clone(),
            repo.clone(),
            args.llm.clone(),
            Some(host.clone()),
        ))
    } else {
        None
    };

    let summary = orch.up(
        UpRequest {
            host,
            target,
            repo,
            url,
            feature: args.feature,
            llm: args.llm,
            base: args.base,
            repo_base: args.repo_base,
        },
        prompt,
    )?;
    for entry in &summary.synced {
        println!(
            "Synced {} on {} -> {}",
            entry.repo, entry.host, entry.worktree
        );
    }
    println!(
        "Session {} ready on {} (cwd={})",
        summary.session.session, summary.session.host, summary.session.cwd
    );
    if let Some(prompt) = summary.prompt {
        println!("Prompt delivered to LLM session ({} bytes)", prompt.bytes);
    }
    Ok(())
}
