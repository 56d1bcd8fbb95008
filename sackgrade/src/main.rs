use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Builder;
use env_logger::Env;
use log::{error, info, Level};
use std::io::{Read, Write};

use sackgrade::color_utils::{colors, init_color_config, symbols};
use sackgrade::config::{DetectBase64Command, DetectCommand, DetectConfig, GlobalArgs};
use sackgrade::image_input::decode_base64_image;
use sackgrade::model_access::{
    CliModelInfo, ModelLocations, OnnxArtifactLoader, DEFAULT_META_PATH, DEFAULT_MODEL_PATH,
};
use sackgrade::onnx_session::determine_optimal_device;
use sackgrade::processing::{run_detection, BatchReport};
use sackgrade::{DetectionResponse, Detector};

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Classify sack color and grade for image files
    Detect(DetectCommand),

    /// Classify a base64-encoded image and print the result as JSON
    DetectBase64(DetectBase64Command),

    /// Show version information
    Version,
}

#[derive(Parser)]
#[command(name = "sackgrade")]
#[command(about = "Sack color and grade classifier for harvest intake images")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

fn get_log_level_from_verbosity(
    verbosity: clap_verbosity_flag::Verbosity<clap_verbosity_flag::ErrorLevel>,
) -> log::LevelFilter {
    // -q is indistinguishable from the default through log_level_filter alone
    if verbosity.is_silent() {
        return log::LevelFilter::Error;
    }

    match verbosity.log_level_filter() {
        log::LevelFilter::Off => log::LevelFilter::Off,       // -qq
        log::LevelFilter::Error => log::LevelFilter::Warn,    // default
        log::LevelFilter::Warn => log::LevelFilter::Info,     // -v
        log::LevelFilter::Info => log::LevelFilter::Debug,    // -vv
        log::LevelFilter::Debug | log::LevelFilter::Trace => log::LevelFilter::Trace,
    }
}

fn init_logging(global: &GlobalArgs) {
    // Honor RUST_LOG unless -v/-q was given
    let use_env = !global.verbosity.is_present() && std::env::var_os("RUST_LOG").is_some();

    let mut logger = if use_env {
        Builder::from_env(Env::default())
    } else {
        let mut b = Builder::new();
        b.filter_level(get_log_level_from_verbosity(global.verbosity.clone()));
        b
    };

    logger
        .format(|buf, record| {
            let level_str = match record.level() {
                Level::Error => colors::error_level("ERROR"),
                Level::Warn => colors::warning_level("WARN"),
                Level::Info => colors::info_level("INFO"),
                Level::Debug => colors::debug_level("DEBUG"),
                Level::Trace => colors::trace_level("TRACE"),
            };
            writeln!(buf, "[{}] {}", level_str, record.args())
        })
        .init();
}

fn print_report(report: &BatchReport, as_json: bool) -> Result<()> {
    let mut stdout = std::io::stdout().lock();

    if as_json {
        serde_json::to_writer_pretty(&mut stdout, report)?;
        writeln!(stdout)?;
        return Ok(());
    }

    for entry in &report.entries {
        match (&entry.result, &entry.error) {
            (Some(response), _) => writeln!(
                stdout,
                "{}\t{}\t{}\t{:.2}%",
                entry.image,
                response.sack_color,
                response.result.grade_label,
                response.result.confidence_percent
            )?,
            (None, error) => writeln!(
                stdout,
                "{}\terror\t{}",
                entry.image,
                error.as_deref().unwrap_or("unknown error")
            )?,
        }
    }

    if report.total > 1 {
        let grades: Vec<String> = report
            .grade_breakdown
            .iter()
            .map(|(grade, count)| format!("{grade}={count}"))
            .collect();
        writeln!(
            stdout,
            "# {} of {} classified | grades: {} | avg confidence: {}",
            report.successful,
            report.total,
            if grades.is_empty() { "-".to_string() } else { grades.join(", ") },
            report
                .average_confidence
                .map(|c| format!("{c:.2}%"))
                .unwrap_or_else(|| "-".to_string())
        )?;
    }
    Ok(())
}

fn read_payload(input: &str) -> Result<String> {
    if input == "-" {
        let mut payload = String::new();
        std::io::stdin()
            .read_to_string(&mut payload)
            .context("Failed to read base64 payload from stdin")?;
        Ok(payload)
    } else {
        std::fs::read_to_string(input)
            .with_context(|| format!("Failed to read base64 payload from {input}"))
    }
}

fn run_detect_base64(global: &GlobalArgs, cmd: DetectBase64Command) -> Result<DetectionResponse> {
    let payload = read_payload(&cmd.input)?;
    let image = decode_base64_image(&payload)?;

    let device = determine_optimal_device(&global.device);
    let cli_model: CliModelInfo = cmd.model.into();
    let locations = ModelLocations::resolve(&cli_model);
    let detector = Detector::new(OnnxArtifactLoader::new(locations, device.device));

    Ok(detector.predict(&image)?.into())
}

fn main() {
    let cli = Cli::parse();

    init_color_config(cli.global.no_color);
    init_logging(&cli.global);

    match cli.command {
        Some(Commands::Detect(detect_cmd)) => {
            let sources_desc = if detect_cmd.sources.len() == 1 {
                detect_cmd.sources[0].clone()
            } else {
                format!("{} inputs", detect_cmd.sources.len())
            };
            info!(
                "{} Sack detection: {} | device: {}",
                symbols::detection_start(),
                sources_desc,
                cli.global.device
            );

            let config = DetectConfig::from_args(cli.global.clone(), detect_cmd);
            let as_json = config.json_report;
            let outcome = run_detection(config).and_then(|report| print_report(&report, as_json));
            if let Err(e) = outcome {
                error!("{} Detection failed: {e:#}", symbols::operation_failed());
                std::process::exit(1);
            }
        }
        Some(Commands::DetectBase64(cmd)) => {
            let outcome = run_detect_base64(&cli.global, cmd).and_then(|response| {
                println!("{}", serde_json::to_string_pretty(&response)?);
                Ok(())
            });
            if let Err(e) = outcome {
                error!("{} Detection failed: {e:#}", symbols::operation_failed());
                std::process::exit(1);
            }
        }
        Some(Commands::Version) => {
            println!("sackgrade v{}", env!("CARGO_PKG_VERSION"));
            println!("Default model: {DEFAULT_MODEL_PATH}");
            println!("Default label metadata: {DEFAULT_META_PATH}");
            println!("Repository: {}", env!("CARGO_PKG_REPOSITORY"));
        }
        None => {
            use clap::CommandFactory;
            let mut cmd = Cli::command();
            if let Err(e) = cmd.print_help() {
                error!("Failed to print help: {e}");
            }
        }
    }
}
