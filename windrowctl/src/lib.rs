use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use windrow_core::browser::{BrowserLauncher, BrowserSurfaceFactory, FailureLog, resolve_model};
use windrow_core::{
    BatchOrchestrator, BatchStats, Checkpoint, CompletedTarget, ConfigBundle, CountBound,
    HarvestStore, ProgressStore, RecordWriter, Retriever, Target, TargetRunRecord,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] windrow_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("harvest error: {0}")]
    Harvest(#[from] windrow_core::HarvestError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("authentication failed")]
    Authentication,
    #[error("required resource missing: {0}")]
    MissingResource(String),
    #[error("harvest incomplete: {abandoned} abandoned, {failed} failed")]
    Incomplete { abandoned: usize, failed: usize },
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Windrow harvest command-line interface", long_about = None)]
pub struct Cli {
    /// Diretório contendo browser.toml e harvest.toml
    #[arg(long, default_value = "configs")]
    pub config_dir: PathBuf,
    /// Caminho alternativo para o banco windrow.sqlite
    #[arg(long)]
    pub db: Option<PathBuf>,
    /// Diretório override para registros e downloads
    #[arg(long)]
    pub output: Option<PathBuf>,
    /// Token para autenticação local (se WINDROWCTL_TOKEN estiver definido)
    #[arg(long)]
    pub token: Option<String>,
    /// Formato de saída
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Colhe a janela de itens de um ou mais alvos
    Harvest(HarvestArgs),
    /// Exibe o progresso persistido no banco
    Status(StatusArgs),
    /// Gera script de autocompletar para o shell informado
    Completions(CompletionsArgs),
}

#[derive(Args, Debug, Clone)]
pub struct HarvestArgs {
    /// URLs raiz dos alvos a colher
    #[arg(value_name = "URL")]
    pub urls: Vec<String>,
    /// Arquivo com uma URL de alvo por linha (linhas com # são ignoradas)
    #[arg(long, value_name = "ARQUIVO")]
    pub targets_file: Option<PathBuf>,
    /// Número máximo de itens da janela por alvo
    #[arg(short = 'm', long)]
    pub max: Option<usize>,
    /// Colhe apenas metadados, sem baixar arquivos de mídia
    #[arg(long)]
    pub metadata_only: bool,
    /// Habilita logs detalhados da execução
    #[arg(long)]
    pub debug: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    /// Limite de execuções recentes exibidas
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}

#[derive(Args, Debug, Clone)]
pub struct CompletionsArgs {
    /// Shell alvo
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}

pub fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions(args) = &cli.command {
        write_completions(args.shell);
        return Ok(());
    }

    enforce_token(&cli)?;
    let context = AppContext::new(&cli)?;

    match &cli.command {
        Commands::Harvest(args) => {
            init_tracing(args.debug);
            let stats = context.harvest(args)?;
            let abandoned = stats.targets_abandoned;
            let failed = stats.targets_failed;
            render(&stats, cli.format)?;
            if abandoned + failed > 0 {
                return Err(AppError::Incomplete { abandoned, failed });
            }
        }
        Commands::Status(args) => {
            let report = context.gather_status(args)?;
            render(&report, cli.format)?;
        }
        Commands::Completions(_) => {}
    }

    Ok(())
}

fn enforce_token(cli: &Cli) -> Result<()> {
    if let Ok(expected) = std::env::var("WINDROWCTL_TOKEN") {
        match &cli.token {
            Some(provided) if provided == &expected => Ok(()),
            _ => Err(AppError::Authentication),
        }
    } else {
        Ok(())
    }
}

fn write_completions(shell: clap_complete::Shell) {
    let mut command = Cli::command();
    let name = command.get_name().to_string();
    clap_complete::generate(shell, &mut command, name, &mut std::io::stdout());
}

fn init_tracing(debug: bool) {
    let default = if debug {
        "windrow_core=debug,windrowctl=debug"
    } else {
        "windrow_core=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => println!("{}", value.display()),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    bundle: ConfigBundle,
    db_path: PathBuf,
    output_dir: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let bundle = ConfigBundle::from_directory(&cli.config_dir)?;

        let output_dir = cli
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from(&bundle.harvest.storage.output_dir));
        let db_path = cli
            .db
            .clone()
            .unwrap_or_else(|| bundle.harvest.resolve_path(&bundle.harvest.storage.db_path));

        Ok(Self {
            bundle,
            db_path,
            output_dir,
        })
    }

    fn harvest(&self, args: &HarvestArgs) -> Result<BatchStats> {
        let targets = collect_targets(args)?;
        if targets.is_empty() {
            return Err(AppError::MissingResource(
                "Nenhuma URL de alvo informada (argumentos ou --targets-file)".to_string(),
            ));
        }

        let model = resolve_model(&self.bundle.harvest.site.page_model).ok_or_else(|| {
            AppError::MissingResource(format!(
                "Modelo de página desconhecido: {}",
                self.bundle.harvest.site.page_model
            ))
        })?;

        if let Some(parent) = self.db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let store = HarvestStore::builder().path(&self.db_path).build()?;
        store.initialize()?;
        let progress: Arc<dyn ProgressStore> = Arc::new(store);

        let failure_log = FailureLog::new(
            self.bundle
                .harvest
                .resolve_path(&self.bundle.browser.observability.failure_log),
        )?;

        let launcher = BrowserLauncher::new(self.bundle.browser.clone());
        let factory = Arc::new(BrowserSurfaceFactory::new(launcher, Arc::clone(&model)));
        let writer = Arc::new(RecordWriter::new(&self.output_dir));
        let retriever = if args.metadata_only {
            None
        } else {
            Some(Arc::new(Retriever::new(&self.bundle.harvest.downloads)?))
        };

        let mut orchestrator = BatchOrchestrator::new(
            factory,
            model,
            progress,
            writer,
            retriever,
            Some(Arc::new(failure_log)),
            self.bundle.harvest.clone(),
        );

        let runtime = tokio::runtime::Runtime::new()?;
        let stats = runtime.block_on(orchestrator.run(&targets));
        Ok(stats)
    }

    fn gather_status(&self, args: &StatusArgs) -> Result<StatusReport> {
        let mut report = StatusReport {
            db_path: self.db_path.display().to_string(),
            in_progress: Vec::new(),
            completed: Vec::new(),
            recent_runs: Vec::new(),
        };
        if !self.db_path.exists() {
            return Ok(report);
        }

        let store = HarvestStore::builder()
            .path(&self.db_path)
            .read_only(true)
            .build()?;
        report.in_progress = store.checkpoints()?;
        report.completed = store.completed_targets()?;
        report.recent_runs = store.recent_runs(args.limit)?;
        Ok(report)
    }
}

fn collect_targets(args: &HarvestArgs) -> Result<Vec<Target>> {
    let mut urls = args.urls.clone();
    if let Some(path) = &args.targets_file {
        urls.extend(read_targets_file(path)?);
    }
    let bound = CountBound::from_limit(args.max);
    Ok(urls
        .into_iter()
        .map(|url| Target::new(url, bound))
        .collect())
}

fn read_targets_file(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToString::to_string)
        .collect())
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub db_path: String,
    pub in_progress: Vec<Checkpoint>,
    pub completed: Vec<CompletedTarget>,
    pub recent_runs: Vec<TargetRunRecord>,
}

impl DisplayFallback for StatusReport {
    fn display(&self) -> String {
        let mut lines = vec![format!("Banco: {}", self.db_path)];
        if self.in_progress.is_empty() {
            lines.push("Nenhum alvo em andamento".to_string());
        } else {
            lines.push("Em andamento:".to_string());
            for checkpoint in &self.in_progress {
                lines.push(format!(
                    "  - {} índice={} ({})",
                    checkpoint.target_id, checkpoint.last_completed_index, checkpoint.root_url
                ));
            }
        }
        if !self.completed.is_empty() {
            lines.push("Concluídos:".to_string());
            for target in &self.completed {
                lines.push(format!(
                    "  - {} itens={} em {}",
                    target.target_id, target.items_harvested, target.completed_at
                ));
            }
        }
        if !self.recent_runs.is_empty() {
            lines.push("Execuções recentes:".to_string());
            for run in &self.recent_runs {
                lines.push(format!(
                    "  - #{} {} {} processados={} falhas={}",
                    run.id, run.target_id, run.outcome, run.items_processed, run.items_failed
                ));
            }
        }
        lines.join("\n")
    }
}

impl DisplayFallback for BatchStats {
    fn display(&self) -> String {
        let mut lines = vec![
            format!("Execução {}", self.run_id),
            format!(
                "Alvos: {} concluídos, {} abandonados, {} com falha, {} pulados (de {})",
                self.targets_completed,
                self.targets_abandoned,
                self.targets_failed,
                self.targets_skipped,
                self.targets_total
            ),
            format!(
                "Itens: {} processados, {} com metadados, {} falhas, {} downloads",
                self.items_processed, self.items_succeeded, self.items_failed,
                self.downloads_succeeded
            ),
            format!("Duração: {}s", self.duration_secs),
        ];
        if !self.errors.is_empty() {
            lines.push("Erros:".to_string());
            for error in &self.errors {
                lines.push(format!("  - {error}"));
            }
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn prepare_test_context() -> Result<(TempDir, AppContext)> {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let configs_dir = root.join("configs");
        fs::create_dir_all(&configs_dir).unwrap();
        fs::copy("../configs/browser.toml", configs_dir.join("browser.toml")).unwrap();
        fs::copy("../configs/harvest.toml", configs_dir.join("harvest.toml")).unwrap();

        let output_dir = root.join("harvest");
        fs::create_dir_all(&output_dir).unwrap();
        let db_path = output_dir.join("windrow.sqlite");

        let store = HarvestStore::builder().path(&db_path).build().unwrap();
        store.initialize().unwrap();
        store
            .save_checkpoint(&Checkpoint {
                target_id: "clip-11223344".into(),
                root_url: "https://sora.example.com/p/clip".into(),
                last_completed_index: 4,
                updated_at: Utc::now(),
            })
            .unwrap();
        store
            .mark_completed(&CompletedTarget {
                target_id: "done-55667788".into(),
                root_url: "https://sora.example.com/p/done".into(),
                items_harvested: 12,
                completed_at: Utc::now(),
            })
            .unwrap();
        store
            .record_run("done-55667788", "completed", 12, 0, None)
            .unwrap();

        let cli = Cli {
            config_dir: configs_dir,
            db: Some(db_path),
            output: Some(output_dir),
            token: None,
            format: OutputFormat::Json,
            command: Commands::Status(StatusArgs { limit: 10 }),
        };
        let context = AppContext::new(&cli)?;
        Ok((temp, context))
    }

    #[test]
    fn status_reports_store_contents() {
        let (_temp, context) = prepare_test_context().unwrap();
        let report = context.gather_status(&StatusArgs { limit: 10 }).unwrap();
        assert_eq!(report.in_progress.len(), 1);
        assert_eq!(report.in_progress[0].last_completed_index, 4);
        assert_eq!(report.completed.len(), 1);
        assert_eq!(report.recent_runs.len(), 1);
        assert_eq!(report.recent_runs[0].outcome, "completed");
    }

    #[test]
    fn status_without_database_is_empty() {
        let (_temp, mut context) = prepare_test_context().unwrap();
        context.db_path = context.db_path.with_file_name("ausente.sqlite");
        let report = context.gather_status(&StatusArgs { limit: 10 }).unwrap();
        assert!(report.in_progress.is_empty());
        assert!(report.completed.is_empty());
    }

    #[test]
    fn targets_file_skips_blanks_and_comments() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("targets.txt");
        fs::write(
            &path,
            "https://sora.example.com/p/a\n\n# pausado\nhttps://sora.example.com/p/b\n",
        )
        .unwrap();

        let urls = read_targets_file(&path).unwrap();
        assert_eq!(
            urls,
            vec![
                "https://sora.example.com/p/a".to_string(),
                "https://sora.example.com/p/b".to_string()
            ]
        );
    }

    #[test]
    fn harvest_requires_targets() {
        let (_temp, context) = prepare_test_context().unwrap();
        let args = HarvestArgs {
            urls: Vec::new(),
            targets_file: None,
            max: None,
            metadata_only: true,
            debug: false,
        };
        let result = context.harvest(&args);
        assert!(matches!(result, Err(AppError::MissingResource(_))));
    }
}
