use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use base64::Engine as _;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pitchlens_core::config::{AppConfig, CheckpointBackend};
use pitchlens_core::event::EventBus;
use pitchlens_core::traits::{ContentIndex, SearchProvider, StructuredExtractor};
use pitchlens_core::types::{GraphEvent, RunId};

use pitchlens_agent::models::{CompanyOverview, SlideRecord};
use pitchlens_agent::workflows::{market_research, qa, repo_research, slide_analysis, supervisor};
use pitchlens_agent::{
    CheckpointStore, Collaborators, MarketResearchState, MemoryCheckpointStore, QaState,
    RepoResearchState, RunInput, RunState, SlideAnalysisState, SqliteCheckpointStore,
    SupervisorReport, SupervisorState,
};
use pitchlens_memory::SqliteContentIndex;
use pitchlens_tools::{HttpFetcher, TavilySearch, ToolRegistry};

#[derive(Parser)]
#[command(name = "pitchlens", version, about = "Pitch deck analysis from the command line")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "pitchlens.toml")]
    config: PathBuf,

    /// Print workflow progress to stderr
    #[arg(long, global = true)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Full analysis: deck summary, scorecard, market and repository research
    Analyze {
        /// Slide images, or directories of slide images, in deck order
        #[arg(required = true)]
        slides: Vec<PathBuf>,
        /// Run ID (auto-generated if not provided)
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Slide extraction, summary and scorecard only
    Deck {
        #[arg(required = true)]
        slides: Vec<PathBuf>,
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Market research from a company overview JSON file ("-" for stdin)
    Market { overview: PathBuf },
    /// List the repositories on a code-hosting page
    Repo { url: String },
    /// Ask a question about analysed decks
    Ask {
        /// Conversation thread; answers a pending clarification when one exists
        #[arg(long)]
        thread: Option<String>,
        #[arg(trailing_var_arg = true, required = true)]
        question: Vec<String>,
    },
    /// Show current configuration
    Config,
    /// Print a workflow graph as a Mermaid diagram
    Graph {
        #[arg(value_enum)]
        workflow: Workflow,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Workflow {
    Supervisor,
    SlideAnalysis,
    MarketResearch,
    RepoResearch,
    Qa,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("pitchlens=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "pitchlens", &mut io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config)?;

    if let Commands::Config = &cli.command {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let events = Arc::new(EventBus::default());
    if cli.progress {
        spawn_progress_printer(&events);
    }
    let collab = build_collaborators(&config, events.clone())?;

    match cli.command {
        Commands::Analyze { slides, run_id } => {
            let slides = load_slides(&slides)?;
            let checkpointer = open_checkpointer::<SupervisorState>(&config)?;
            let graph = supervisor::build(&collab, checkpointer)?;
            let run_id = run_id.map(|s| RunId::from_str(&s)).unwrap_or_default();
            info!(run_id = %run_id, slides = slides.len(), "Analyzing pitch deck");

            match graph
                .ainvoke(RunInput::Fresh(SupervisorState::new(slides)), Some(run_id))
                .await
            {
                Ok(state) => print_json(&SupervisorReport::from(&state))?,
                Err(e) => fail(&e.to_string()),
            }
        }
        Commands::Deck { slides, run_id } => {
            let slides = load_slides(&slides)?;
            let checkpointer = open_checkpointer::<SlideAnalysisState>(&config)?;
            let graph = slide_analysis::build(&collab, checkpointer)?;
            let run_id = run_id.map(|s| RunId::from_str(&s)).unwrap_or_default();

            let state = graph
                .ainvoke(RunInput::Fresh(SlideAnalysisState::new(slides)), Some(run_id))
                .await?;
            exit_on_error(&state);
            print_json(&DeckOutput {
                summary: &state.summary,
                scorecard: &state.scorecard,
            })?;
        }
        Commands::Market { overview } => {
            let overview: CompanyOverview = serde_json::from_str(&read_input(&overview)?)
                .context("company overview is not valid JSON")?;
            let checkpointer = open_checkpointer::<MarketResearchState>(&config)?;
            let graph = market_research::build(&collab, checkpointer)?;

            let state = graph
                .ainvoke(RunInput::Fresh(MarketResearchState::new(overview)), None)
                .await?;
            exit_on_error(&state);
            print_json(&MarketOutput {
                sector: &state.sector,
                market_size: &state.market_size,
                competitors: &state.competitors,
            })?;
        }
        Commands::Repo { url } => {
            let checkpointer = open_checkpointer::<RepoResearchState>(&config)?;
            let graph = repo_research::build(&collab, checkpointer)?;

            let state = graph
                .ainvoke(RunInput::Fresh(RepoResearchState::new(url)), None)
                .await?;
            exit_on_error(&state);
            print_json(&state.repositories.unwrap_or_default())?;
        }
        Commands::Ask { thread, question } => {
            let text = question.join(" ");
            // Threads outlive the process, so Q&A always checkpoints to disk.
            let store: Arc<dyn CheckpointStore<QaState>> =
                Arc::new(SqliteCheckpointStore::open(&config.checkpoint_path())?);
            let graph = qa::build(&collab, Some(store))?;
            let thread = thread.map(|s| RunId::from_str(&s)).unwrap_or_default();

            let state = qa::ask(&graph, &thread, text).await?;
            exit_on_error(&state);
            match (&state.pending_clarification, &state.answer) {
                (Some(prompt), _) => {
                    println!("{}", prompt);
                    eprintln!("(reply with: pitchlens ask --thread {} <answer>)", thread);
                }
                (None, Some(answer)) => println!("{}", answer),
                (None, None) => println!("No answer."),
            }
        }
        Commands::Graph { workflow } => {
            let mermaid = match workflow {
                Workflow::Supervisor => supervisor::build(&collab, None)?.to_mermaid(),
                Workflow::SlideAnalysis => slide_analysis::build(&collab, None)?.to_mermaid(),
                Workflow::MarketResearch => market_research::build(&collab, None)?.to_mermaid(),
                Workflow::RepoResearch => repo_research::build(&collab, None)?.to_mermaid(),
                Workflow::Qa => qa::build(&collab, None)?.to_mermaid(),
            };
            println!("{}", mermaid);
        }
        Commands::Config | Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(())
}

#[derive(Serialize)]
struct DeckOutput<'a, S, C> {
    summary: &'a Option<S>,
    scorecard: &'a Option<C>,
}

#[derive(Serialize)]
struct MarketOutput<'a, S, M, C> {
    sector: &'a Option<S>,
    market_size: &'a Option<M>,
    competitors: &'a Option<C>,
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }

    // Check for config in common locations
    if let Some(home_config) = dirs_home().map(|h| h.join(".pitchlens").join("config.toml")) {
        if home_config.exists() {
            info!(path = %home_config.display(), "Loading config from home directory");
            return Ok(AppConfig::load(&home_config)?);
        }
    }

    warn!("No config file found, reading settings from the environment");
    AppConfig::from_env().context("Set OPENAI_API_KEY or create pitchlens.toml")
}

fn build_collaborators(config: &AppConfig, events: Arc<EventBus>) -> anyhow::Result<Collaborators> {
    let workspace = config.workspace_dir();
    std::fs::create_dir_all(&workspace).ok();

    let extractor: Arc<dyn StructuredExtractor> = Arc::new(pitchlens_llm::create_retrying_extractor(
        &config.model,
        &config.fallback_models,
    ));
    let vision: Arc<dyn StructuredExtractor> = match &config.vision_model {
        Some(model) => Arc::new(pitchlens_llm::create_retrying_extractor(
            model,
            &config.fallback_models,
        )),
        None => extractor.clone(),
    };

    let tools = match &config.search {
        Some(search) if search.provider == "tavily" => {
            let provider: Arc<dyn SearchProvider> = Arc::new(TavilySearch::new(&search.api_key));
            info!(provider = %search.provider, "Web search enabled");
            ToolRegistry::for_research(provider, search.max_results)
        }
        Some(search) => bail!("unsupported search provider: {}", search.provider),
        None => {
            warn!("No [search] section configured; market research runs without web search");
            ToolRegistry::new()
        }
    };

    let fetcher = Arc::new(HttpFetcher::new(&config.fetch)?);

    let mut collab = Collaborators::new(extractor, Arc::new(tools), fetcher)
        .with_vision(vision)
        .with_workflow_config(&config.workflow)
        .with_events(events);

    if config.index.enabled {
        let path = config.index_path();
        match SqliteContentIndex::open(&path) {
            Ok(index) => {
                let index: Arc<dyn ContentIndex> = Arc::new(index);
                collab = collab.with_index(index);
            }
            Err(e) => error!(path = %path.display(), error = %e, "Failed to open content index"),
        }
    }

    Ok(collab)
}

fn open_checkpointer<S: RunState>(
    config: &AppConfig,
) -> anyhow::Result<Option<Arc<dyn CheckpointStore<S>>>> {
    let store: Arc<dyn CheckpointStore<S>> = match config.checkpoint.backend {
        CheckpointBackend::Memory => Arc::new(MemoryCheckpointStore::<S>::new()),
        CheckpointBackend::Sqlite => Arc::new(SqliteCheckpointStore::open(&config.checkpoint_path())?),
    };
    Ok(Some(store))
}

/// Read slide images as data URLs. Directories contribute their image files
/// in name order.
fn load_slides(paths: &[PathBuf]) -> anyhow::Result<Vec<SlideRecord>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(path)
                .with_context(|| format!("cannot read {}", path.display()))?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| image_mime(p).is_some())
                .collect();
            entries.sort();
            files.extend(entries);
        } else {
            files.push(path.clone());
        }
    }

    files
        .iter()
        .map(|path| {
            let mime = image_mime(path)
                .with_context(|| format!("not a slide image: {}", path.display()))?;
            let bytes = std::fs::read(path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
            Ok(SlideRecord::new(format!("data:{};base64,{}", mime, encoded)))
        })
        .collect()
}

fn image_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

fn read_input(path: &Path) -> anyhow::Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))
}

fn spawn_progress_printer(events: &EventBus) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event {
                GraphEvent::RunStarted { graph, resumed, .. } => {
                    let verb = if resumed { "resuming" } else { "starting" };
                    eprintln!("[{}] {}", graph, verb);
                }
                GraphEvent::StageStarted { graph, stage, .. } => {
                    eprintln!("[{}] {} ...", graph, stage);
                }
                GraphEvent::StageCompleted {
                    graph,
                    stage,
                    elapsed_ms,
                    ..
                } => eprintln!("[{}] {} done ({} ms)", graph, stage, elapsed_ms),
                GraphEvent::RunSuspended { graph, stage, .. } => {
                    eprintln!("[{}] waiting for a reply at {}", graph, stage);
                }
                GraphEvent::RunHalted { graph, .. } => eprintln!("[{}] halted", graph),
                GraphEvent::RunCompleted { graph, steps, .. } => {
                    eprintln!("[{}] finished in {} steps", graph, steps);
                }
            }
        }
    });
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_on_error<S: RunState>(state: &S) {
    if let Some(message) = state.error() {
        fail(message);
    }
}

/// Log the precise failure and show the user which step broke.
fn fail(message: &str) -> ! {
    error!(error = %message, "Workflow failed");
    eprintln!("{}", coarse_message(message));
    std::process::exit(1);
}

fn coarse_message(message: &str) -> String {
    match message.split_once(" failed:") {
        Some((step, _)) => format!("{} failed. Set RUST_LOG=pitchlens=debug for details.", step),
        None => "Analysis failed. Set RUST_LOG=pitchlens=debug for details.".to_string(),
    }
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
