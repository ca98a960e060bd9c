//! rfpanalyst - Main CLI Entry Point

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rfpanalyst::{
    cli::{Args, Commands},
    config::Config,
    export::ReportBundle,
    ingest::{mime_for_path, PlainTextExtractor, SourceDocument},
    logging::{init_tracing, Verbosity},
    model::{EmbeddingModel, GenerationModel, HashingEmbedder, OllamaClient, RetryManager, RetryingModel},
    pipeline::{
        catalog, ExecutorSettings, Pipeline, PipelineSession, RunParams, StageCache, StageExecutor, StageRun,
    },
    rag::Chunker,
};

/// Everything one command needs to execute stages
struct Runtime {
    pipeline: Arc<Pipeline>,
    executor: StageExecutor,
    embedder: Arc<dyn EmbeddingModel>,
    chunker: Chunker,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let verbosity = args.verbosity();
    init_tracing(verbosity)?;

    match &args.command {
        Commands::Config { init } => show_config(args.config.as_deref(), *init),
        Commands::Stages => list_stages(),
        Commands::Run {
            file,
            stages,
            run_id,
            out,
            offline,
        } => {
            let config = load_config(args.config.as_deref())?;
            run(&config, verbosity, file, stages, RunParams::new(*run_id), out.as_deref(), *offline).await
        }
        Commands::Refine {
            file,
            stage,
            lock,
            instruction,
            run_id,
            out,
            offline,
        } => {
            let config = load_config(args.config.as_deref())?;
            refine(
                &config,
                verbosity,
                file,
                stage,
                lock,
                instruction,
                RunParams::new(*run_id),
                out.as_deref(),
                *offline,
            )
            .await
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    Config::load(path).context("Failed to load configuration")
}

fn show_config(path: Option<&Path>, init: bool) -> Result<()> {
    if init {
        let target = match path {
            Some(p) => p.to_path_buf(),
            None => Config::default_path()?,
        };
        Config::default()
            .save(&target)
            .with_context(|| format!("Failed to write {}", target.display()))?;
        println!("{} {}", "✓ Wrote default configuration to".green(), target.display());
        return Ok(());
    }

    let config = load_config(path)?;
    let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
    println!("{}", "Current configuration".bold());
    println!("{}", rendered);
    Ok(())
}

fn list_stages() -> Result<()> {
    let pipeline = catalog::default_pipeline()?;
    println!("{}", "Pipeline stages (execution order)".bold());
    for stage in pipeline.stages() {
        let deps = if stage.depends_on.is_empty() {
            "-".to_string()
        } else {
            stage.depends_on.join(", ")
        };
        println!(
            "  {:<10} {:<14} depends on: {:<18} retrieval: {:<6} temperature: {:.1}",
            stage.name.cyan(),
            stage.title,
            deps,
            stage.strategy,
            stage.temperature
        );
    }
    Ok(())
}

async fn build_runtime(config: &Config, offline: bool) -> Result<Runtime> {
    let client = OllamaClient::from_config(config).context("Failed to create Ollama client")?;
    if !client.health_check().await? {
        anyhow::bail!(
            "Ollama is not reachable at {}. Start it with: ollama serve",
            client.base_url()
        );
    }

    let retry = RetryManager::from_config(&config.retry);
    let generator: Arc<dyn GenerationModel> = Arc::new(RetryingModel::new(client.clone(), retry.clone()));
    let embedder: Arc<dyn EmbeddingModel> = if offline {
        Arc::new(HashingEmbedder::new())
    } else {
        Arc::new(RetryingModel::new(client, retry))
    };

    let cache = match config.cache_dir() {
        Some(dir) => StageCache::persistent(&dir)
            .with_context(|| format!("Failed to open stage cache at {}", dir.display()))?,
        None => StageCache::in_memory(),
    };

    let pipeline = Arc::new(catalog::default_pipeline()?);
    let executor = StageExecutor::new(
        pipeline.clone(),
        generator,
        Arc::new(cache),
        ExecutorSettings::from_config(config),
    )?
    .with_condenser(catalog::condenser(&config.map_reduce)?);

    Ok(Runtime {
        pipeline,
        executor,
        embedder,
        chunker: Chunker::from_config(&config.chunking),
    })
}

fn read_document(path: &Path) -> Result<SourceDocument> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let document = SourceDocument::from_bytes(&PlainTextExtractor, name, &bytes, mime_for_path(path))
        .with_context(|| format!("Failed to extract text from {}", path.display()))?;
    Ok(document)
}

fn spinner(verbosity: Verbosity, message: &str) -> ProgressBar {
    if !verbosity.show_progress() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

async fn ingest(runtime: &Runtime, verbosity: Verbosity, file: &Path) -> Result<PipelineSession> {
    let document = read_document(file)?;
    let pb = spinner(verbosity, &format!("Indexing {}", document.name));
    let session = PipelineSession::ingest(document, &runtime.chunker, runtime.embedder.clone())
        .await
        .context("Failed to index document")?;
    pb.finish_and_clear();
    Ok(session)
}

#[allow(clippy::too_many_arguments)]
async fn run(
    config: &Config,
    verbosity: Verbosity,
    file: &Path,
    stages: &[String],
    params: RunParams,
    out: Option<&Path>,
    offline: bool,
) -> Result<()> {
    let runtime = build_runtime(config, offline).await?;
    let mut session = ingest(&runtime, verbosity, file).await?;

    let targets: Vec<String> = if stages.is_empty() {
        runtime.pipeline.stages().iter().map(|s| s.name.clone()).collect()
    } else {
        for stage in stages {
            runtime.pipeline.stage(stage)?;
        }
        stages.to_vec()
    };

    let mut produced: Vec<StageRun> = Vec::new();
    for target in &targets {
        for stage in runtime.pipeline.plan_for(target)? {
            if produced.iter().any(|run| run.stage == stage) {
                continue;
            }
            let pb = spinner(verbosity, &format!("Generating {}", stage));
            let run = runtime
                .executor
                .run_stage(&mut session, stage, &params)
                .await
                .with_context(|| format!("Stage '{}' failed", stage))?;
            pb.finish_and_clear();
            report_run(&run);
            produced.push(run);
        }
    }

    match out {
        Some(dir) => write_outputs(dir, &runtime, &session, &produced)?,
        None => {
            for run in &produced {
                print_stage(&runtime, run)?;
            }
        }
    }

    let stats = runtime.executor.cache().stats();
    println!(
        "{} hits: {}, misses: {}, hit ratio: {:.0}%",
        "Cache".bold(),
        stats.hits,
        stats.misses,
        stats.hit_ratio() * 100.0
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn refine(
    config: &Config,
    verbosity: Verbosity,
    file: &Path,
    stage: &str,
    lock: &[usize],
    instruction: &str,
    params: RunParams,
    out: Option<&Path>,
    offline: bool,
) -> Result<()> {
    let runtime = build_runtime(config, offline).await?;
    let mut session = ingest(&runtime, verbosity, file).await?;

    for run in runtime.executor.run_through(&mut session, stage, &params).await? {
        report_run(&run);
    }

    for &ordinal in lock {
        session
            .set_item_lock(&runtime.pipeline, stage, ordinal, true)
            .with_context(|| format!("Cannot lock item {} of '{}'", ordinal, stage))?;
    }

    let pb = spinner(verbosity, &format!("Refining {}", stage));
    let refinement = runtime
        .executor
        .refine_stage(&mut session, stage, instruction)
        .await
        .with_context(|| format!("Refinement of '{}' failed", stage))?;
    pb.finish_and_clear();

    println!(
        "{} regenerated items {:?}, locked items {:?}",
        "✓".green(),
        refinement.regenerated,
        lock
    );
    if !refinement.padded.is_empty() {
        println!(
            "{} the model returned too few items; kept {:?} unchanged",
            "⚠".yellow(),
            refinement.padded
        );
    }

    let title = &runtime.pipeline.stage(stage)?.title;
    match out {
        Some(dir) => {
            std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
            let path = dir.join(format!("{}.md", stage));
            write_markdown(&path, title, &refinement.result.content)?;
            println!("{} {}", "Wrote".green(), path.display());
        }
        None => {
            println!("\n{}\n", format!("# {}", title).bold());
            println!("{}", refinement.result.content);
        }
    }
    Ok(())
}

fn report_run(run: &StageRun) {
    let source = if run.cache_hit { "cached".dimmed() } else { "generated".green() };
    println!(
        "{} {:<10} {} ({} ms)",
        "✓".green(),
        run.stage,
        source,
        run.elapsed.as_millis()
    );
}

fn print_stage(runtime: &Runtime, run: &StageRun) -> Result<()> {
    let title = &runtime.pipeline.stage(&run.stage)?.title;
    println!("\n{}\n", format!("# {}", title).bold());
    println!("{}", run.result.content);
    Ok(())
}

fn write_markdown(path: &Path, title: &str, content: &str) -> Result<()> {
    std::fs::write(path, format!("# {}\n\n{}\n", title, content))
        .with_context(|| format!("Failed to write {}", path.display()))
}

fn write_outputs(dir: &Path, runtime: &Runtime, session: &PipelineSession, produced: &[StageRun]) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    for run in produced {
        let title = &runtime.pipeline.stage(&run.stage)?.title;
        let path = dir.join(format!("{}.md", run.stage));
        write_markdown(&path, title, &run.result.content)?;
        println!("{} {}", "Wrote".green(), path.display());
    }

    let bundle = ReportBundle::from_session(session, &runtime.pipeline)?;
    let path = dir.join("bundle.json");
    std::fs::write(&path, bundle.to_json()?).with_context(|| format!("Failed to write {}", path.display()))?;
    println!("{} {}", "Wrote".green(), path.display());
    Ok(())
}
