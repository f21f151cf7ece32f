mod catalog;
mod checker;
mod config;
mod index;
mod language;
mod oracle;
mod output;
mod pipeline;
mod project;
mod project_config;
mod runner;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::catalog::{CatalogProvider, SourceCatalog};
use crate::checker::CommandChecker;
use crate::config::Config;
use crate::index::{MemoryIndex, SemanticIndex};
use crate::language::{slash_path, Language};
use crate::oracle::{BoundedOracle, LanguageOracle, OllamaClient};
use crate::output::{OutputWriter, RunSummary};
use crate::pipeline::model::ModulePathRef;
use crate::pipeline::{PipelineEnv, PipelineSettings};
use crate::project::build_tree;
use crate::project_config::ProjectConfig;
use crate::runner::{CancelFlag, Runner};

/// Exit code for configuration errors caught before any pipeline starts.
const FATAL_EXIT: u8 = 2;

#[derive(Parser)]
#[command(name = "pbtgen")]
#[command(version)]
#[command(about = "Generate property-based tests from cross-function context with a local LLM")]
struct Cli {
    /// Root of the project under test
    #[arg(long, default_value = ".")]
    project_dir: PathBuf,

    /// Directory receiving generated test modules
    #[arg(long, default_value = "pbt_tests")]
    output_dir: PathBuf,

    /// Comma-separated dotted paths of functions, classes, or modules (default: all)
    #[arg(long, value_delimiter = ',')]
    functions: Vec<String>,

    /// Maximum candidate files per function
    #[arg(long)]
    top_n: Option<usize>,

    /// Repair attempts after the first draft
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Concurrent per-function pipelines
    #[arg(long)]
    workers: Option<usize>,

    /// Exit 0 even when some functions end FAILED
    #[arg(long)]
    lenient: bool,

    /// Skip the semantic index; retrieval then finds nothing
    #[arg(long)]
    no_retrieval: bool,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(top_n) = self.top_n {
            config.pipeline.top_n = top_n;
        }
        if let Some(max_attempts) = self.max_attempts {
            config.pipeline.max_attempts = max_attempts;
        }
        if let Some(workers) = self.workers {
            config.pipeline.workers = workers;
        }
        if self.lenient {
            config.pipeline.strict = false;
        }
        if self.no_retrieval {
            config.embedding.enabled = false;
        }
    }

    fn targets(&self) -> Result<Vec<ModulePathRef>> {
        self.functions
            .iter()
            .map(|raw| raw.trim())
            .filter(|raw| !raw.is_empty())
            .map(|raw| {
                ModulePathRef::parse(raw)
                    .with_context(|| format!("Invalid function path {:?} in --functions", raw))
            })
            .collect()
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            init_logging("info");
            tracing::error!("{:#}", e);
            return ExitCode::from(FATAL_EXIT);
        }
    };
    init_logging(&config.general.log_level);

    let config_path = cli.config.clone().or_else(Config::default_config_path);
    tracing::info!(
        "Config path: {}",
        config_path
            .as_ref()
            .filter(|p| p.exists())
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none, using defaults)".to_string())
    );

    match run(cli, config).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::from(FATAL_EXIT)
        }
    }
}

/// Everything up to dispatch fails fatally; after that only per-function
/// outcomes decide the exit code.
async fn run(cli: Cli, mut config: Config) -> Result<u8> {
    cli.apply_overrides(&mut config);
    config.validate()?;
    let settings = PipelineSettings::from_config(&config.pipeline)?;

    let project_root = cli
        .project_dir
        .canonicalize()
        .with_context(|| format!("Project directory {:?} does not exist", cli.project_dir))?;
    if !project_root.is_dir() {
        anyhow::bail!("Project directory {:?} is not a directory", project_root);
    }
    let targets = cli.targets()?;
    let mut project_config = ProjectConfig::load(&project_root)?;

    let writer = Arc::new(OutputWriter::new(cli.output_dir.clone()));
    writer.prepare()?;
    tracing::info!("Writing tests to {}", writer.dir().display());
    if let Some(rel) = output_within(&project_root, writer.dir())? {
        tracing::debug!("Excluding output directory {} from the project", rel);
        project_config.exclude_dir(&rel);
    }

    let language = Language::detect(&project_root).unwrap_or_else(|| {
        tracing::warn!(
            "No Python project marker found in {}, scanning for Python sources anyway",
            project_root.display()
        );
        Language::Python
    });

    let (catalog, scope) = SourceCatalog::new(language, project_config.clone())
        .catalog_scope(&project_root, &targets)?;
    if catalog.is_empty() {
        tracing::warn!("No {} functions found under {}", language, project_root.display());
    }
    for skipped in &scope.skipped {
        tracing::warn!("No catalogued function matches {}, skipping", skipped);
    }
    let catalog = Arc::new(catalog);

    let tree = build_tree(
        &project_root,
        &project_config,
        config.pipeline.max_tree_depth,
        config.pipeline.max_tree_entries,
    )?;
    if tree.truncated {
        tracing::warn!("Project tree truncated to {} entries", tree.entries);
    }

    let ollama = Arc::new(OllamaClient::for_generation(&config.llm));
    tracing::info!("Generation model: {}", ollama.model());
    if !ollama.is_available().await {
        tracing::warn!(
            "Ollama is not reachable at {}; oracle stages will degrade and synthesis will fail",
            config.llm.url
        );
    }
    // Selection and retrieval query the oracle concurrently within a pipeline.
    let oracle: Arc<dyn LanguageOracle> =
        Arc::new(BoundedOracle::new(ollama, config.pipeline.workers));

    let index: Arc<dyn SemanticIndex> = if config.embedding.enabled {
        let embedder = Arc::new(OllamaClient::for_embedding(&config.embedding));
        Arc::new(
            MemoryIndex::build_or_empty(embedder, &catalog, settings.max_source_snippet_chars).await,
        )
    } else {
        tracing::info!("Retrieval disabled");
        Arc::new(MemoryIndex::empty())
    };

    let checker = Arc::new(CommandChecker::new(
        &config.checker,
        &project_root,
        python_path(&project_root, &project_config),
    ));

    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    tracing::info!(
        "Generating tests for {} function(s) with {} worker(s)",
        scope.targets.len(),
        config.pipeline.workers
    );

    let env = PipelineEnv {
        oracle,
        index,
        checker,
        catalog,
        tree: Arc::new(tree),
        project_root,
        settings,
        cancel,
    };
    let runner = Runner::new(env, Arc::clone(&writer), config.pipeline.workers);
    let results = runner.run(scope.targets).await;
    tracing::info!(
        "Finished {} of {} dispatched pipeline(s)",
        runner.progress().finished.load(Ordering::SeqCst),
        runner.progress().started.load(Ordering::SeqCst)
    );

    let summary = RunSummary::new(&results, &scope.skipped);
    match writer.write_report(&summary) {
        Ok(path) => tracing::info!("Report written to {}", path.display()),
        Err(e) => tracing::error!("{:#}", e),
    }
    print!("{}", summary.render());

    Ok(summary.exit_code(config.pipeline.strict) as u8)
}

/// The output directory relative to the project root, when it lies strictly
/// inside it. Generated tests there must never be catalogued as targets.
fn output_within(project_root: &Path, output_dir: &Path) -> Result<Option<String>> {
    let output_dir = output_dir
        .canonicalize()
        .with_context(|| format!("Output directory {:?} does not exist", output_dir))?;
    Ok(output_dir
        .strip_prefix(project_root)
        .ok()
        .map(slash_path)
        .filter(|rel| !rel.is_empty()))
}

/// Import roots for the checker: the project root and each existing source root.
fn python_path(project_root: &Path, project_config: &ProjectConfig) -> Vec<PathBuf> {
    std::iter::once(project_root.to_path_buf())
        .chain(
            project_config
                .source_roots
                .iter()
                .map(|root| project_root.join(root))
                .filter(|dir| dir.is_dir()),
        )
        .collect()
}
