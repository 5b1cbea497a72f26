use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};
use ztopo_config::{AppConfig, ConfigError, WorkflowChoice};
use ztopo_core::document::{Document, EntityStore};
use ztopo_engine::action::ActionRegistry;
use ztopo_engine::errors::EngineError;
use ztopo_engine::session::{SessionOptions, TickControl, TopologySession};
use ztopo_engine::workflow::Workflow;

mod demo;
mod report;

use report::RunReport;

#[derive(Debug, Default)]
struct CliArgs {
    config: Option<PathBuf>,
    workflow: Option<WorkflowChoice>,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    check_only: bool,
    no_recursive: bool,
    json: bool,
}

#[derive(Debug, Error)]
enum AppError {
    #[error("读取文档 {path:?} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析文档 {path:?} 失败: {source}")]
    Document {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("序列化输出失败: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

fn main() {
    let cli = parse_args();
    let mut config = load_configuration(cli.config.clone());
    if let Some(workflow) = cli.workflow {
        config.session.workflow = workflow;
    }
    if cli.no_recursive {
        config.session.recursive_fix = false;
    }
    init_logging(&config);
    info!("启动 ztopo 拓扑检查");

    if let Err(err) = run(&config, &cli) {
        error!(error = %err, "拓扑处理失败");
        std::process::exit(1);
    }
}

fn parse_args() -> CliArgs {
    let mut args = std::env::args().skip(1);
    let mut cli = CliArgs::default();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => cli.config = Some(PathBuf::from(required_value(&mut args, "--config"))),
            "--output" => cli.output = Some(PathBuf::from(required_value(&mut args, "--output"))),
            "--workflow" => {
                let value = required_value(&mut args, "--workflow");
                cli.workflow = Some(match value.as_str() {
                    "line" => WorkflowChoice::Line,
                    "polygon" => WorkflowChoice::Polygon,
                    "annotation" => WorkflowChoice::Annotation,
                    other => {
                        eprintln!("未知工作流：{other}（可选 line / polygon / annotation）");
                        std::process::exit(1);
                    }
                });
            }
            "--check-only" => cli.check_only = true,
            "--no-recursive" => cli.no_recursive = true,
            "--json" => cli.json = true,
            other if other.starts_with("--") => {
                eprintln!("未知参数：{other}");
                std::process::exit(1);
            }
            path => cli.input = Some(PathBuf::from(path)),
        }
    }
    cli
}

fn required_value(args: &mut impl Iterator<Item = String>, flag: &str) -> String {
    match args.next() {
        Some(value) => value,
        None => {
            eprintln!("`{flag}` 需要提供参数值");
            std::process::exit(1);
        }
    }
}

fn run(config: &AppConfig, cli: &CliArgs) -> Result<(), AppError> {
    let mut document = match &cli.input {
        Some(path) => load_document(path)?,
        None => {
            info!("未指定输入文档，使用内置示例");
            demo::sample_document(config.session.workflow)
        }
    };

    let workflow = match config.session.workflow {
        WorkflowChoice::Line => Workflow::line_cleanup(),
        WorkflowChoice::Polygon => Workflow::polygon_topology(),
        WorkflowChoice::Annotation => Workflow::annotation_check(),
    };
    let options = SessionOptions {
        tolerances: config.tolerances,
        expected_winding: config.session.expected_winding,
        max_fix_iterations: config.session.max_fix_iterations,
    };
    let mut session = TopologySession::new(&workflow, ActionRegistry::new(), options)?;

    let entities_before = document.len();
    let ids = document.entity_ids();
    let counts = session.check(&document, &ids)?;
    info!(results = counts.total(), pending = counts.pending, "首次检查完成");
    let found = session.groups();

    let summary = if cli.check_only {
        Default::default()
    } else {
        session.fix_all(&mut document, config.session.recursive_fix, &mut |progress| {
            debug!(
                iteration = progress.iteration,
                class = %progress.class,
                result = progress.result.get(),
                status = ?progress.status,
                done = progress.done,
                total = progress.total,
                "修复进度"
            );
            TickControl::Continue
        })?
    };
    for event in session.drain_events() {
        debug!(?event, "会话事件");
    }

    let report = RunReport::new(&session, &found, entities_before, document.len(), summary);
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        report.print();
    }

    if let Some(path) = &cli.output {
        let content = serde_json::to_string_pretty(&document)?;
        fs::write(path, content).map_err(|source| AppError::Io {
            path: path.clone(),
            source,
        })?;
        info!(path = %path.display(), "已写出修复后的文档");
    }
    Ok(())
}

fn load_document(path: &Path) -> Result<Document, AppError> {
    let content = fs::read_to_string(path).map_err(|source| AppError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let document: Document =
        serde_json::from_str(&content).map_err(|source| AppError::Document {
            path: path.to_path_buf(),
            source,
        })?;
    info!(path = %path.display(), entities = document.len(), "已加载文档");
    Ok(document)
}

fn load_configuration(override_path: Option<PathBuf>) -> AppConfig {
    match override_path {
        Some(path) => AppConfig::from_file(&path).unwrap_or_else(|err| {
            warn!(path = %path.display(), error = %err, "加载指定配置失败，使用默认配置");
            AppConfig::default()
        }),
        None => match AppConfig::discover() {
            Ok(cfg) => cfg,
            Err(err) => {
                match &err {
                    ConfigError::Io { path, .. } | ConfigError::Parse { path, .. } => {
                        warn!(path = %path.display(), error = %err, "加载默认配置失败，使用内建默认值");
                    }
                    ConfigError::Context { .. } | ConfigError::Invalid { .. } => {
                        warn!(error = %err, "加载默认配置失败，使用内建默认值");
                    }
                }
                AppConfig::default()
            }
        },
    }
}

fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_new(config.logging.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter);
    if subscriber.try_init().is_err() {
        // 已初始化，忽略
    }
}
