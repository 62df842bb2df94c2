use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use aiden_agent::{build_ryan, AgentRegistry, CheckpointStore, RyanDeps};
use aiden_core::config::AppConfig;
use aiden_core::event::{types, EventBus, EventSink};
use aiden_core::types::Decision;
use aiden_llm::TaskModelRouter;
use aiden_orchestrator::{EventLogger, OrchestrationEngine};
use aiden_store::{DocumentIndex, Store};

#[derive(Parser)]
#[command(name = "aiden", version, about = "Multi-phase agent pipeline with human review")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "aiden.toml", env = "AIDEN_CONFIG")]
    config: PathBuf,

    /// Print per-node events while agents run
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage projects
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },
    /// Manage project documents
    Document {
        #[command(subcommand)]
        action: DocumentAction,
    },
    /// Work through human reviews
    Review {
        #[command(subcommand)]
        action: ReviewAction,
    },
    /// Inspect and approve deliverables
    Deliverable {
        #[command(subcommand)]
        action: DeliverableAction,
    },
    /// Show an execution and its latest checkpoint
    State {
        execution_id: String,
    },
    /// Pick up a running execution whose process stopped
    Recover {
        execution_id: String,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum ProjectAction {
    /// Create a project with its four phases
    Create {
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// List projects
    List {
        /// Include archived projects
        #[arg(long)]
        all: bool,
    },
    /// Show a project with its phases and deliverables
    Show { project_id: String },
    /// Start (or pick back up) a project
    Start { project_id: String },
    /// Pause an active project
    Pause { project_id: String },
    /// Archive a project
    Archive { project_id: String },
}

#[derive(Subcommand)]
enum DocumentAction {
    /// Add and index a document
    Add {
        project_id: String,
        file: PathBuf,
        /// Document type; the analysis phase reads `dev_request`
        #[arg(long, default_value = "dev_request")]
        doc_type: String,
    },
    /// List a project's documents
    List { project_id: String },
}

#[derive(Subcommand)]
enum ReviewAction {
    /// List open reviews
    List {
        /// Only reviews of this project (any status)
        #[arg(long)]
        project: Option<String>,
    },
    /// Show a review with its content
    Show { review_id: String },
    /// Assign a pending review to yourself
    Claim {
        review_id: String,
        #[arg(long)]
        reviewer: String,
    },
    /// Decide a review and resume the waiting agent
    Decide {
        review_id: String,
        /// approved, rejected or revision_requested
        decision: Decision,
        #[arg(long)]
        feedback: Option<String>,
        /// JSON object of requirement edits, or @path to a JSON file
        #[arg(long)]
        edits: Option<String>,
        #[arg(long, env = "AIDEN_REVIEWER")]
        by: Option<String>,
    },
    /// List open reviews past their deadline
    Overdue,
}

#[derive(Subcommand)]
enum DeliverableAction {
    /// List a project's deliverables
    List { project_id: String },
    /// Print a deliverable's content
    Show {
        deliverable_id: String,
        /// Version to print (defaults to the current one)
        #[arg(long)]
        version: Option<u32>,
    },
    /// Mark a deliverable approved
    Approve { deliverable_id: String },
}

/// Everything a command needs, wired from config.
struct Runtime {
    engine: OrchestrationEngine,
    bus: EventBus,
    logger: Option<(CancellationToken, JoinHandle<()>)>,
}

impl Runtime {
    fn build(config: &AppConfig) -> anyhow::Result<Self> {
        let store = Arc::new(Store::open(&config.database_path())?);
        let checkpoints = Arc::new(CheckpointStore::open(&config.checkpoints_path())?);
        let bus = EventBus::new(config.events.capacity);
        let events: Arc<dyn EventSink> = Arc::new(bus.clone());

        let models = Arc::new(TaskModelRouter::from_config(config)?);
        let retriever = Arc::new(DocumentIndex::new(store.clone()));
        let ryan = build_ryan(RyanDeps::from_config(retriever, models, config), checkpoints)?
            .with_events(events.clone());

        let mut agents = AgentRegistry::new();
        agents.register(Arc::new(ryan));
        let engine = OrchestrationEngine::new(store, agents, events, config)?;

        let logger = config.event_log_dir().map(|dir| {
            let cancel = CancellationToken::new();
            let handle = tokio::spawn(EventLogger::new(dir).run(bus.subscribe_all(), cancel.clone()));
            (cancel, handle)
        });

        Ok(Self {
            engine,
            bus,
            logger,
        })
    }

    async fn shutdown(self) {
        if let Some((cancel, handle)) = self.logger {
            cancel.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "Event logger task failed");
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("aiden=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "aiden", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config)?;
    if let Commands::Config = &cli.command {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let runtime = Runtime::build(&config)?;
    let result = run(&runtime, cli.command, cli.verbose).await;
    runtime.shutdown().await;
    result
}

async fn run(runtime: &Runtime, command: Commands, verbose: bool) -> anyhow::Result<()> {
    let engine = &runtime.engine;
    match command {
        Commands::Project { action } => match action {
            ProjectAction::Create { name, description } => {
                let project = engine.create_project(&name, description, serde_json::json!({}))?;
                println!("Created project {} ({})", project.id, project.name);
            }
            ProjectAction::List { all } => {
                let projects = engine.list_projects(all)?;
                if projects.is_empty() {
                    println!("No projects.");
                }
                for p in projects {
                    println!(
                        "  {}  {:<12} {:<12} {}",
                        p.id,
                        p.status,
                        p.current_phase.map(|ph| ph.to_string()).unwrap_or_else(|| "-".into()),
                        p.name
                    );
                }
            }
            ProjectAction::Show { project_id } => {
                print_json(&engine.get_project(&project_id)?)?;
            }
            ProjectAction::Start { project_id } => {
                let watcher = watch_events(&runtime.bus, &project_id, verbose);
                let result = engine.start_project(&project_id).await;
                watcher.abort();
                result?;
                print_progress(engine, &project_id)?;
            }
            ProjectAction::Pause { project_id } => {
                let project = engine.pause_project(&project_id)?;
                println!("Paused project {} during {}", project.id, phase_label(&project));
            }
            ProjectAction::Archive { project_id } => {
                engine.archive_project(&project_id)?;
                println!("Archived project {}", project_id);
            }
        },
        Commands::Document { action } => match action {
            DocumentAction::Add {
                project_id,
                file,
                doc_type,
            } => {
                let content = std::fs::read_to_string(&file)?;
                let filename = file
                    .file_name()
                    .map(|f| f.to_string_lossy().into_owned())
                    .unwrap_or_else(|| file.display().to_string());
                let document = engine.add_document(&project_id, &doc_type, &filename, &content)?;
                println!("Added {} as {} ({})", filename, document.doc_type, document.id);
            }
            DocumentAction::List { project_id } => {
                for d in engine.list_documents(&project_id)? {
                    println!(
                        "  {}  {:<14} {:<24} {}",
                        d.id,
                        d.doc_type,
                        d.filename,
                        d.created_at.format("%Y-%m-%d %H:%M")
                    );
                }
            }
        },
        Commands::Review { action } => match action {
            ReviewAction::List { project } => {
                let reviews = match project {
                    Some(project_id) => engine.list_project_reviews(&project_id)?,
                    None => engine.list_pending_reviews()?,
                };
                if reviews.is_empty() {
                    println!("No reviews.");
                }
                for r in reviews {
                    println!(
                        "  {}  {:<26} {:<18} {}",
                        r.id,
                        r.review_type,
                        r.status,
                        r.content_snapshot
                            .get("message")
                            .and_then(|m| m.as_str())
                            .unwrap_or_default()
                    );
                }
            }
            ReviewAction::Show { review_id } => {
                print_json(&engine.hitl().get_review(&review_id)?)?;
            }
            ReviewAction::Claim {
                review_id,
                reviewer,
            } => {
                let review = engine.hitl().claim_review(&review_id, &reviewer)?;
                println!("Review {} claimed by {}", review.id, reviewer);
            }
            ReviewAction::Decide {
                review_id,
                decision,
                feedback,
                edits,
                by,
            } => {
                let edits = edits.map(|raw| parse_edits(&raw)).transpose()?;
                let project_id = review_project(engine, &review_id)?;
                let watcher = watch_events(&runtime.bus, &project_id, verbose);
                let result = engine
                    .handle_hitl_response(&review_id, decision, feedback, edits, by)
                    .await;
                watcher.abort();
                result?;
                print_progress(engine, &project_id)?;
            }
            ReviewAction::Overdue => {
                for r in engine.hitl().list_overdue(chrono::Utc::now())? {
                    println!(
                        "  {}  {:<26} due {}",
                        r.id,
                        r.review_type,
                        r.deadline_at
                            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
                            .unwrap_or_default()
                    );
                }
            }
        },
        Commands::Deliverable { action } => match action {
            DeliverableAction::List { project_id } => {
                for d in engine.list_deliverables(&project_id)? {
                    println!(
                        "  {}  {:<20} v{:<3} {:<9} {}",
                        d.id, d.deliverable_type, d.current_version, d.status, d.title
                    );
                }
            }
            DeliverableAction::Show {
                deliverable_id,
                version,
            } => {
                let (deliverable, versions) = engine.deliverable_versions(&deliverable_id)?;
                let wanted = version.unwrap_or(deliverable.current_version);
                let Some(v) = versions.iter().find(|v| v.version_number == wanted) else {
                    anyhow::bail!("{} has no version {}", deliverable_id, wanted);
                };
                println!("{}", v.content);
            }
            DeliverableAction::Approve { deliverable_id } => {
                let d = engine.approve_deliverable(&deliverable_id)?;
                println!("Approved {} v{}", d.title, d.current_version);
            }
        },
        Commands::State { execution_id } => {
            print_json(&engine.get_execution_state(&execution_id)?)?;
        }
        Commands::Recover { execution_id } => {
            let view = engine.get_execution_state(&execution_id)?;
            let project_id = project_of_execution(engine, &view.execution.phase_id)?;
            let watcher = watch_events(&runtime.bus, &project_id, verbose);
            let result = engine.recover_execution(&execution_id).await;
            watcher.abort();
            result?;
            print_progress(engine, &project_id)?;
        }
        Commands::Config | Commands::Completions { .. } => {}
    }
    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }
    let home_config = dirs_home().map(|h| h.join(".aiden").join("config.toml"));
    match home_config {
        Some(path) if path.exists() => {
            info!(path = %path.display(), "Loading config from home directory");
            Ok(AppConfig::load(&path)?)
        }
        _ => {
            warn!(path = %path.display(), "No config file found, using defaults");
            Ok(AppConfig::default())
        }
    }
}

/// Print lifecycle events for one project while a command runs.
fn watch_events(bus: &EventBus, project_id: &str, verbose: bool) -> JoinHandle<()> {
    let mut events = bus.subscribe(project_id);
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let node_event = event.event_type == types::NODE_ENTER || event.event_type == types::NODE_EXIT;
            if node_event && !verbose {
                continue;
            }
            let detail = match event.event_type.as_str() {
                types::PHASE_STARTED | types::PHASE_COMPLETED => {
                    event.data["phase_type"].as_str().unwrap_or_default().to_string()
                }
                types::HITL_REQUESTED => event.data["content_snapshot_summary"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
                types::HITL_RESOLVED => event.data["decision"].as_str().unwrap_or_default().to_string(),
                types::AGENT_ERROR => event.data["error"].as_str().unwrap_or_default().to_string(),
                types::NODE_ENTER | types::NODE_EXIT => event.data["node_name"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
                _ => String::new(),
            };
            eprintln!("  [{}] {}", event.event_type, detail);
        }
    })
}

fn print_progress(engine: &OrchestrationEngine, project_id: &str) -> anyhow::Result<()> {
    let overview = engine.get_project(project_id)?;
    println!(
        "Project {} is {} ({})",
        overview.project.id,
        overview.project.status,
        phase_label(&overview.project)
    );
    for phase in &overview.phases {
        println!("  {:<12} {}", phase.phase_type.to_string(), phase.status);
    }
    let open: Vec<_> = engine
        .list_project_reviews(project_id)?
        .into_iter()
        .filter(|r| !r.status.is_terminal())
        .collect();
    for r in open {
        println!("Waiting on review {} ({})", r.id, r.review_type);
    }
    Ok(())
}

fn phase_label(project: &aiden_core::types::Project) -> String {
    project
        .current_phase
        .map(|p| p.to_string())
        .unwrap_or_else(|| "not started".to_string())
}

fn review_project(engine: &OrchestrationEngine, review_id: &str) -> anyhow::Result<String> {
    let review = engine.hitl().get_review(review_id)?;
    let Some(execution_id) = review.execution_id else {
        anyhow::bail!("review {} is not attached to an execution", review_id);
    };
    let view = engine.get_execution_state(&execution_id)?;
    project_of_execution(engine, &view.execution.phase_id)
}

fn project_of_execution(engine: &OrchestrationEngine, phase_id: &str) -> anyhow::Result<String> {
    let phase = engine.store().unit_of_work(|uow| uow.get_phase(phase_id))?;
    Ok(phase.project_id)
}

fn parse_edits(raw: &str) -> anyhow::Result<serde_json::Value> {
    let text = match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)?,
        None => raw.to_string(),
    };
    let value: serde_json::Value = serde_json::from_str(&text)?;
    if !value.is_object() {
        anyhow::bail!("edits must be a JSON object keyed by requirement id");
    }
    Ok(value)
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
