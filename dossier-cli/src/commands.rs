//! Subcommand handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::Utc;
use tracing::{info, warn};

use dossier_core::config::{DossierConfig, user_config_path, workspace_config_path};
use dossier_core::remote::{PromptRefiner, ResearchService};
use dossier_core::store::JobStore;
use dossier_core::{
    ErrorKind, ExecutionEngine, FileStorage, JobHandle, OpenAiClient, PromptConfig, Research,
    ResearchDepth, ResearchPatch, ResearchStatus, SharedStore,
};
use dossier_export::{DirectorySink, DocumentSink, ExportFormat, ExportOptions};

use crate::render;

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Turn a research goal into a detailed research prompt
    Refine {
        #[command(flatten)]
        brief: Brief,
    },
    /// Create a pending research job
    New {
        #[command(flatten)]
        brief: Brief,
        /// Research prompt to submit (defaults to the goal)
        #[arg(short, long, conflicts_with = "refine")]
        prompt: Option<String>,
        /// Write the prompt with the refinement model first
        #[arg(long)]
        refine: bool,
        /// Start the job right away
        #[arg(long)]
        run: bool,
    },
    /// Start a pending job and follow it until it finishes
    Run {
        /// Job id or unique prefix (defaults to the newest pending job)
        id: Option<String>,
    },
    /// Re-attach to jobs left running by an earlier session
    Resume {
        /// Job id or unique prefix (defaults to every running job)
        id: Option<String>,
    },
    /// List research history, newest first
    List {
        /// Only show jobs with this status
        #[arg(short, long)]
        status: Option<String>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show one job
    Show {
        id: String,
        /// Print the whole report
        #[arg(long)]
        full: bool,
        /// Print the stored record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Cancel a running job
    Cancel { id: String },
    /// Reset a failed job to pending
    Retry {
        id: String,
        /// Start the job again right away
        #[arg(long)]
        run: bool,
    },
    /// Remove a job from history
    Delete { id: String },
    /// Export a completed job
    Export {
        id: String,
        /// markdown, pdf, docx, a comma-separated list, or "all"
        #[arg(short, long, default_value = "markdown")]
        format: String,
        /// Output directory (defaults to the configured export path)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Leave out the research process section
        #[arg(long)]
        no_thought_process: bool,
        /// Leave out the sources section
        #[arg(long)]
        no_sources: bool,
        /// Put the files in a dated folder per job
        #[arg(long)]
        group: bool,
    },
    /// Show or change stored settings
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// What to research.
#[derive(clap::Args, Debug)]
pub struct Brief {
    /// The research goal
    goal: String,
    /// What the research should cover
    #[arg(long, default_value = "")]
    scope: String,
    /// Constraints on sources, timeframe or format
    #[arg(long, default_value = "")]
    constraints: String,
    /// low, medium or high
    #[arg(long, default_value = "medium")]
    depth: ResearchDepth,
    /// Research model (defaults to the stored or configured model)
    #[arg(short, long)]
    model: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
pub enum SettingsAction {
    /// Print stored settings
    Show,
    /// Change stored settings
    Set {
        /// Directory exports are written to, relative to the workspace
        #[arg(long)]
        export_path: Option<String>,
        /// Default research model for new jobs
        #[arg(long, conflicts_with = "clear_model")]
        model: Option<String>,
        /// Forget the default research model
        #[arg(long)]
        clear_model: bool,
    },
}

#[derive(clap::Subcommand, Debug)]
pub enum ConfigAction {
    /// Write a default configuration file into the workspace
    Init,
    /// Print the effective configuration
    Show,
    /// Print configuration and data file locations
    Path,
}

pub async fn handle_command(
    command: Commands,
    config: DossierConfig,
    workspace: &Path,
) -> anyhow::Result<()> {
    match command {
        Commands::Config { action } => handle_config(action, &config, workspace),
        Commands::Refine { brief } => {
            let refined = refine(&config, &brief).await?;
            println!("{refined}");
            Ok(())
        }
        Commands::New {
            brief,
            prompt,
            refine: use_refiner,
            run,
        } => {
            let store = open_store(&config);
            let prompt = match prompt {
                Some(prompt) => prompt,
                None if use_refiner => refine(&config, &brief).await?,
                None => brief.goal.clone(),
            };
            let model = research_model(&config, &store, brief.model.as_deref()).await;
            let research = Research::from_goal(&brief.goal, prompt, model);
            let id = research.id.clone();
            store.lock().await.add(research)?;
            println!("Created research job {id}");
            if run {
                let engine = engine(&config, store)?;
                follow(&engine, engine.start(&id).await?).await?;
            }
            Ok(())
        }
        Commands::Run { id } => {
            let store = open_store(&config);
            let id = match id {
                Some(arg) => resolve_id(&store, &arg).await?,
                None => newest_with_status(&store, ResearchStatus::Pending)
                    .await
                    .context("No pending research job to run")?,
            };
            let engine = engine(&config, store)?;
            follow(&engine, engine.start(&id).await?).await
        }
        Commands::Resume { id } => handle_resume(&config, id).await,
        Commands::List { status, json } => {
            let store = open_store(&config);
            let status = status.map(|s| parse_status(&s)).transpose()?;
            let store = store.lock().await;
            let jobs: Vec<&Research> = store
                .history()
                .iter()
                .filter(|r| status.is_none_or(|s| r.status == s))
                .collect();
            if json {
                println!("{}", serde_json::to_string_pretty(&jobs)?);
            } else if jobs.is_empty() {
                println!("No research jobs yet. Create one with `dossier new <goal>`.");
            } else {
                print!("{}", render::history_table(&jobs));
            }
            Ok(())
        }
        Commands::Show { id, full, json } => {
            let store = open_store(&config);
            let id = resolve_id(&store, &id).await?;
            let store = store.lock().await;
            let research = store
                .get(&id)
                .with_context(|| format!("Research job {id} disappeared"))?;
            if json {
                println!("{}", serde_json::to_string_pretty(research)?);
            } else {
                print!("{}", render::job_details(research, full));
            }
            Ok(())
        }
        Commands::Cancel { id } => {
            let store = open_store(&config);
            let id = resolve_id(&store, &id).await?;
            // Polling for this job, if any, lives in another process; it
            // stops on its next poll once it sees the record is no longer running.
            let patch = ResearchPatch::Cancel {
                completed_at: Utc::now(),
            };
            store.lock().await.update(&id, patch)?;
            info!(job_id = %id, "Research job cancelled");
            println!("Cancelled research job {id}");
            Ok(())
        }
        Commands::Retry { id, run } => {
            let store = open_store(&config);
            let id = resolve_id(&store, &id).await?;
            store.lock().await.update(&id, ResearchPatch::Retry)?;
            println!("Research job {id} is pending again");
            if run {
                let engine = engine(&config, store)?;
                follow(&engine, engine.start(&id).await?).await?;
            }
            Ok(())
        }
        Commands::Delete { id } => {
            let store = open_store(&config);
            let id = resolve_id(&store, &id).await?;
            if let Some(removed) = store.lock().await.remove(&id) {
                if removed.status == ResearchStatus::Running {
                    warn!(job_id = %id, "Deleted a running job; the remote request keeps running");
                }
                println!("Deleted research job {id}");
            }
            Ok(())
        }
        Commands::Export {
            id,
            format,
            output,
            no_thought_process,
            no_sources,
            group,
        } => {
            let store = open_store(&config);
            let id = resolve_id(&store, &id).await?;
            let research = store
                .lock()
                .await
                .get(&id)
                .cloned()
                .with_context(|| format!("Research job {id} disappeared"))?;
            let formats = parse_formats(&format)?;
            let options = ExportOptions {
                include_thought_process: config.export.include_thought_process
                    && !no_thought_process,
                include_sources: config.export.include_sources && !no_sources,
            };
            let root = match output.or_else(|| config.export.output_dir.clone()) {
                Some(dir) => dir,
                None => workspace.join(&store.lock().await.settings().default_export_path),
            };
            let sink = DirectorySink::new(root).grouped(group || config.export.group_by_job);
            for format in formats {
                let artifact = dossier_export::export(&research, format, options)?;
                let written = sink.write(&artifact)?;
                println!("Wrote {written}");
            }
            Ok(())
        }
        Commands::Settings { action } => {
            let store = open_store(&config);
            let mut store = store.lock().await;
            match action.unwrap_or(SettingsAction::Show) {
                SettingsAction::Show => {}
                SettingsAction::Set {
                    export_path,
                    model,
                    clear_model,
                } => {
                    let mut settings = store.settings().clone();
                    if let Some(path) = export_path {
                        settings.default_export_path = path;
                    }
                    if model.is_some() || clear_model {
                        settings.default_model = model;
                    }
                    store.update_settings(settings);
                }
            }
            println!("{}", serde_json::to_string_pretty(store.settings())?);
            Ok(())
        }
    }
}

fn handle_config(action: ConfigAction, config: &DossierConfig, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = workspace_config_path(workspace);
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }
            if let Some(dir) = config_path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            std::fs::write(&config_path, DossierConfig::default().to_toml()?)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let mut shown = config.clone();
            if shown.api.api_key.is_some() {
                shown.api.api_key = Some("<redacted>".into());
            }
            print!("{}", shown.to_toml()?);
            Ok(())
        }
        ConfigAction::Path => {
            if let Some(user) = user_config_path() {
                println!("user config:      {}", user.display());
            }
            println!(
                "workspace config: {}",
                workspace_config_path(workspace).display()
            );
            println!(
                "history:          {}",
                config.data_dir().join(FileStorage::DEFAULT_FILE_NAME).display()
            );
            println!("logs:             {}", config.data_dir().join("logs").display());
            Ok(())
        }
    }
}

async fn handle_resume(config: &DossierConfig, id: Option<String>) -> anyhow::Result<()> {
    let store = open_store(config);
    let ids = match id {
        Some(arg) => vec![resolve_id(&store, &arg).await?],
        None => store
            .lock()
            .await
            .running()
            .iter()
            .map(|r| r.id.clone())
            .collect(),
    };
    if ids.is_empty() {
        println!("No running research jobs to resume.");
        return Ok(());
    }

    let engine = engine(config, store)?;
    let mut handles = Vec::new();
    for id in &ids {
        match engine.resume(id).await {
            Ok(handle) => handles.push(handle),
            Err(e) => eprintln!("Cannot resume {}: {e}", render::short_id(id)),
        }
    }
    let mut failures = 0;
    for handle in handles {
        if let Err(e) = follow(&engine, handle).await {
            eprintln!("{e}");
            failures += 1;
        }
    }
    if failures > 0 {
        bail!("{failures} resumed job(s) did not complete");
    }
    Ok(())
}

fn open_store(config: &DossierConfig) -> SharedStore {
    let storage = FileStorage::in_dir(&config.data_dir());
    JobStore::open(storage).into_shared()
}

fn client(config: &DossierConfig) -> anyhow::Result<Arc<OpenAiClient>> {
    let client = OpenAiClient::new(&config.api, &config.research)
        .with_context(|| format!("Set {} or api.api_key in the configuration", config.api.api_key_env))?;
    Ok(Arc::new(client))
}

fn engine(config: &DossierConfig, store: SharedStore) -> anyhow::Result<ExecutionEngine> {
    let remote: Arc<dyn ResearchService> = client(config)?;
    Ok(ExecutionEngine::new(store, remote, config.engine_config()))
}

async fn refine(config: &DossierConfig, brief: &Brief) -> anyhow::Result<String> {
    let refiner: Arc<dyn PromptRefiner> = client(config)?;
    let request = PromptConfig {
        goal: brief.goal.clone(),
        scope: brief.scope.clone(),
        constraints: brief.constraints.clone(),
        depth: brief.depth,
        model: config.research.refine_model.clone(),
        max_tokens: None,
    };
    info!(model = %request.model, depth = %request.depth, "Refining research prompt");
    Ok(refiner.refine(&request).await?)
}

/// Explicit model, else the stored default, else the configured one.
async fn research_model(config: &DossierConfig, store: &SharedStore, explicit: Option<&str>) -> String {
    if let Some(model) = explicit {
        return model.to_string();
    }
    store
        .lock()
        .await
        .settings()
        .default_model
        .clone()
        .unwrap_or_else(|| config.research.model.clone())
}

/// Print progress until the job finishes. Ctrl-C cancels the job.
/// What a Ctrl-C press means while a job is followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Cancel,
    Exit,
}

#[derive(Debug, Default)]
struct Interrupts {
    pressed: u32,
}

impl Interrupts {
    /// The first press cancels the job, any later press exits.
    fn press(&mut self) -> Interrupt {
        self.pressed += 1;
        if self.pressed == 1 {
            Interrupt::Cancel
        } else {
            Interrupt::Exit
        }
    }
}

async fn follow(engine: &ExecutionEngine, handle: JobHandle) -> anyhow::Result<()> {
    let id = handle.id().to_string();
    println!("Research job {} is running. Press Ctrl-C to cancel.", render::short_id(&id));
    let mut events = handle.subscribe();
    let wait = handle.wait();
    tokio::pin!(wait);
    let mut interrupts = Interrupts::default();

    let outcome = loop {
        tokio::select! {
            biased;
            Some(event) = events.recv() => println!("{}", render::progress_line(&event)),
            outcome = &mut wait => break outcome,
            _ = tokio::signal::ctrl_c() => match interrupts.press() {
                Interrupt::Cancel => {
                    eprintln!("Cancelling... press Ctrl-C again to exit immediately.");
                    if let Err(e) = engine.cancel(&id).await {
                        warn!(job_id = %id, error = %e, "Cancel failed");
                    }
                }
                Interrupt::Exit => {
                    warn!(job_id = %id, "Interrupted again, not waiting for the job to stop");
                    bail!("Interrupted");
                }
            },
        }
    };

    match outcome {
        Ok(research) => {
            let cost = research
                .cost
                .as_ref()
                .map(|c| dossier_core::cost::format_cost(c.total_cost))
                .unwrap_or_default();
            println!("Research job {} completed ({cost}).", render::short_id(&id));
            println!("Export it with `dossier export {} --format pdf`.", render::short_id(&id));
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::Cancelled => {
            println!("Research job {} cancelled.", render::short_id(&id));
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Accept a full job id or an unambiguous prefix of one.
async fn resolve_id(store: &SharedStore, arg: &str) -> anyhow::Result<String> {
    let store = store.lock().await;
    if store.get(arg).is_some() {
        return Ok(arg.to_string());
    }
    let matches: Vec<&Research> = store
        .history()
        .iter()
        .filter(|r| r.id.starts_with(arg))
        .collect();
    match matches.as_slice() {
        [one] => Ok(one.id.clone()),
        [] => bail!("No research job matches '{arg}'"),
        many => bail!("'{arg}' matches {} research jobs; use a longer prefix", many.len()),
    }
}

async fn newest_with_status(store: &SharedStore, status: ResearchStatus) -> Option<String> {
    store
        .lock()
        .await
        .history()
        .iter()
        .find(|r| r.status == status)
        .map(|r| r.id.clone())
}

fn parse_status(value: &str) -> anyhow::Result<ResearchStatus> {
    Ok(match value.to_ascii_lowercase().as_str() {
        "pending" => ResearchStatus::Pending,
        "running" => ResearchStatus::Running,
        "completed" => ResearchStatus::Completed,
        "error" | "failed" => ResearchStatus::Error,
        other => bail!("Unknown status '{other}', expected pending, running, completed or error"),
    })
}

fn parse_formats(value: &str) -> anyhow::Result<Vec<ExportFormat>> {
    if value.trim().eq_ignore_ascii_case("all") {
        return Ok(ExportFormat::ALL.to_vec());
    }
    let mut formats = Vec::new();
    for name in value.split(',').filter(|s| !s.trim().is_empty()) {
        let format: ExportFormat = name.parse()?;
        if !formats.contains(&format) {
            formats.push(format);
        }
    }
    if formats.is_empty() {
        bail!("No export format given");
    }
    Ok(formats)
}
