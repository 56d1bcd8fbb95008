//! Configuration layer separating CLI arguments from the internal configuration used by
//! batch processing.
//!
//! - `GlobalArgs`: flags shared by every command
//! - `BaseModelConfig`: the internal view of those flags
//! - per-command `*Command` (clap) and `*Config` (internal, serializable into metadata)

use clap::{Args, Parser};
use clap_verbosity_flag::Verbosity;
use serde::Serialize;

use crate::model_access::CliModelInfo;

/// Global CLI arguments that apply to all sackgrade commands
#[derive(Parser, Debug, Clone)]
pub struct GlobalArgs {
    /// Global output directory (overrides default placement next to input)
    #[arg(long, global = true)]
    pub output_dir: Option<String>,

    /// Create metadata output file(s)
    #[arg(long, global = true)]
    pub metadata: bool,

    /// Verbosity level (-q/--quiet, -v/-vv/-vvv/-vvvv for info/debug/trace)
    #[command(flatten)]
    pub verbosity: Verbosity,

    /// Use permissive mode: record failed images and keep going instead of stopping
    #[arg(long, global = true)]
    pub permissive: bool,

    /// Device to use for inference (auto, cpu)
    #[arg(long, default_value = "auto", global = true)]
    pub device: String,

    /// Disable colored output (also respects NO_COLOR and SACKGRADE_NO_COLOR env vars)
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// Model location overrides shared by the detection commands
#[derive(Args, Debug, Clone, Default)]
pub struct ModelArgs {
    /// Path to the ONNX sack classifier (overrides SACKGRADE_MODEL_PATH)
    #[arg(long)]
    pub model_path: Option<String>,

    /// Path to the JSON label metadata (overrides SACKGRADE_META_PATH)
    #[arg(long)]
    pub meta_path: Option<String>,

    /// Expected MD5 checksum of the model file (overrides SACKGRADE_MODEL_CHECKSUM)
    #[arg(long)]
    pub model_checksum: Option<String>,
}

impl From<ModelArgs> for CliModelInfo {
    fn from(args: ModelArgs) -> Self {
        Self {
            model_path: args.model_path,
            meta_path: args.meta_path,
            model_checksum: args.model_checksum,
        }
    }
}

/// Base configuration common to all commands
#[derive(Debug, Clone, Serialize)]
pub struct BaseModelConfig {
    /// Input sources (images, directories, or glob patterns)
    pub sources: Vec<String>,
    pub device: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
    pub skip_metadata: bool,
    /// Stop at the first failed image. Opposite of `--permissive`.
    pub strict: bool,
}

impl From<GlobalArgs> for BaseModelConfig {
    fn from(global: GlobalArgs) -> Self {
        Self {
            sources: Vec::new(), // filled in by the command
            device: global.device,
            output_dir: global.output_dir,
            skip_metadata: !global.metadata,
            strict: !global.permissive,
        }
    }
}

/// CLI command for classifying sack images on disk
#[derive(Parser, Debug, Clone)]
pub struct DetectCommand {
    /// Path(s) to input images or directories. Supports glob patterns like *.jpg
    #[arg(value_name = "IMAGES_OR_DIRS", required = true)]
    pub sources: Vec<String>,

    /// Print the batch report as JSON on stdout
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub model: ModelArgs,
}

/// CLI command for classifying a base64-encoded image
#[derive(Parser, Debug, Clone)]
pub struct DetectBase64Command {
    /// File holding the base64 payload (optionally a data URL), or '-' for stdin
    #[arg(value_name = "PAYLOAD_FILE", default_value = "-")]
    pub input: String,

    #[command(flatten)]
    pub model: ModelArgs,
}

/// Internal configuration for detection runs
#[derive(Debug, Clone, Serialize)]
pub struct DetectConfig {
    #[serde(skip)]
    pub base: BaseModelConfig,
    pub json_report: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_checksum: Option<String>,
}

impl DetectConfig {
    /// Create configuration from global args and command-specific args
    pub fn from_args(global: GlobalArgs, cmd: DetectCommand) -> Self {
        let mut base: BaseModelConfig = global.into();
        base.sources = cmd.sources;

        Self {
            base,
            json_report: cmd.json,
            model_path: cmd.model.model_path,
            meta_path: cmd.model.meta_path,
            model_checksum: cmd.model.model_checksum,
        }
    }

    pub fn cli_model_info(&self) -> CliModelInfo {
        CliModelInfo {
            model_path: self.model_path.clone(),
            meta_path: self.meta_path.clone(),
            model_checksum: self.model_checksum.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn global(permissive: bool, metadata: bool, output_dir: Option<&str>) -> GlobalArgs {
        GlobalArgs {
            output_dir: output_dir.map(str::to_string),
            metadata,
            verbosity: Verbosity::new(0, 0),
            permissive,
            device: "auto".to_string(),
            no_color: false,
        }
    }

    #[test]
    fn test_global_args_conversion() {
        let config: BaseModelConfig = global(true, false, Some("/tmp")).into();

        assert!(config.sources.is_empty());
        assert_eq!(config.device, "auto");
        assert_eq!(config.output_dir, Some("/tmp".to_string()));
        assert!(config.skip_metadata);
        assert!(!config.strict);
    }

    #[test]
    fn test_detect_command_conversion() {
        let cmd = DetectCommand {
            sources: vec!["gudang/*.jpg".to_string()],
            json: true,
            model: ModelArgs {
                model_path: Some("/models/svm.onnx".to_string()),
                meta_path: None,
                model_checksum: None,
            },
        };

        let config = DetectConfig::from_args(global(false, true, None), cmd);

        assert_eq!(config.base.sources, vec!["gudang/*.jpg"]);
        assert!(config.base.strict);
        assert!(!config.base.skip_metadata);
        assert!(config.json_report);

        let info = config.cli_model_info();
        assert_eq!(info.model_path.as_deref(), Some("/models/svm.onnx"));
        assert_eq!(info.meta_path, None);
    }

    #[test]
    fn test_config_serialization_skips_unset_overrides() {
        let cmd = DetectCommand {
            sources: vec!["a.jpg".to_string()],
            json: false,
            model: ModelArgs::default(),
        };
        let config = DetectConfig::from_args(global(false, false, None), cmd);

        let value = toml::Value::try_from(&config).unwrap();
        let table = value.as_table().unwrap();
        assert_eq!(table.get("json_report"), Some(&toml::Value::Boolean(false)));
        assert!(!table.contains_key("model_path"));
        assert!(!table.contains_key("base"));
    }

    #[test]
    fn test_cli_parses_detect_base64_default_stdin() {
        #[derive(Parser)]
        struct Wrapper {
            #[command(flatten)]
            cmd: DetectBase64Command,
        }

        let parsed = Wrapper::parse_from(["sackgrade", "--meta-path", "meta.json"]);
        assert_eq!(parsed.cmd.input, "-");
        assert_eq!(parsed.cmd.model.meta_path.as_deref(), Some("meta.json"));
    }
}
