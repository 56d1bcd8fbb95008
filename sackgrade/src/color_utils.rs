//! Conditional terminal styling for log output.
//!
//! Colors and status symbols are disabled by any of:
//! - the `--no-color` flag
//! - `NO_COLOR` (https://no-color.org/)
//! - `SACKGRADE_NO_COLOR`
//! - `TERM=dumb`
//! - stderr not being a TTY

use colored::ColoredString;
use std::io::{stderr, IsTerminal};
use std::sync::OnceLock;

pub const NO_COLOR_ENV: &str = "SACKGRADE_NO_COLOR";

static COLOR_CONFIG: OnceLock<ColorConfig> = OnceLock::new();

fn should_disable_colors_from_env() -> bool {
    !std::env::var("NO_COLOR").unwrap_or_default().is_empty()
        || !std::env::var(NO_COLOR_ENV).unwrap_or_default().is_empty()
        || std::env::var("TERM").unwrap_or_default() == "dumb"
        || !stderr().is_terminal()
}

#[derive(Debug, Clone)]
struct ColorConfig {
    colors_enabled: bool,
}

impl ColorConfig {
    fn new(no_color_flag: bool) -> Self {
        Self {
            colors_enabled: !no_color_flag && !should_disable_colors_from_env(),
        }
    }
}

/// Fix the color decision for the rest of the process. Call once, after argument parsing.
pub fn init_color_config(no_color_flag: bool) {
    if COLOR_CONFIG.set(ColorConfig::new(no_color_flag)).is_err() {
        log::debug!("Color configuration already initialized");
    }
}

fn colors_enabled() -> bool {
    COLOR_CONFIG
        .get()
        .map(|config| config.colors_enabled)
        .unwrap_or_else(|| !should_disable_colors_from_env())
}

/// Apply `color_fn` only when colors are enabled for stderr.
pub fn maybe_color_stderr<F>(text: &str, color_fn: F) -> String
where
    F: FnOnce(&str) -> ColoredString,
{
    if colors_enabled() {
        color_fn(text).to_string()
    } else {
        text.to_string()
    }
}

pub mod colors {
    use super::maybe_color_stderr;
    use colored::Colorize;

    pub fn error_level(text: &str) -> String {
        maybe_color_stderr(text, |s| s.red().bold())
    }

    pub fn warning_level(text: &str) -> String {
        maybe_color_stderr(text, |s| s.yellow())
    }

    pub fn info_level(text: &str) -> String {
        maybe_color_stderr(text, |s| s.green())
    }

    pub fn debug_level(text: &str) -> String {
        maybe_color_stderr(text, |s| s.blue())
    }

    pub fn trace_level(text: &str) -> String {
        maybe_color_stderr(text, |s| s.magenta())
    }
}

/// Status symbols, with plain-text fallbacks when colors are off.
pub mod symbols {
    use super::colors_enabled;

    fn pick(fancy: &'static str, plain: &'static str) -> &'static str {
        if colors_enabled() {
            fancy
        } else {
            plain
        }
    }

    pub fn model_loaded() -> &'static str {
        pick("✅", "  ")
    }

    /// Start of a sack detection run
    pub fn detection_start() -> &'static str {
        pick("🔍", "")
    }

    pub fn operation_failed() -> &'static str {
        pick("❌", "[FAILED]")
    }

    /// Technical setup and configuration
    pub fn system_setup() -> &'static str {
        pick("⚙️ ", "")
    }

    pub fn resources_found() -> &'static str {
        pick("🎯", "")
    }

    pub fn checking() -> &'static str {
        pick("🔍", "")
    }

    pub fn completed_successfully() -> &'static str {
        pick("✅", "[SUCCESS]")
    }

    /// Some images succeeded, some failed
    pub fn completed_partially_successfully() -> &'static str {
        pick("⚠️ ", "[PARTIAL-SUCCESS]")
    }

    pub fn warning() -> &'static str {
        pick("⚠️ ", "")
    }
}

/// Progress bars that only appear on an interactive stderr
pub mod progress {
    use crate::progress::add_progress_bar;

    use super::colors_enabled;
    use indicatif::{ProgressBar, ProgressStyle};
    use std::io::{stderr, IsTerminal};

    /// Progress bar for a batch of `total` images, or `None` for single images and
    /// non-interactive stderr.
    pub fn create_batch_progress_bar(total: usize) -> Option<ProgressBar> {
        if total <= 1 || !stderr().is_terminal() {
            return None;
        }

        let pb = ProgressBar::new(total as u64);
        add_progress_bar(pb.clone());
        let (template, chars) = if colors_enabled() {
            (
                "[{elapsed_precise}] [{bar:30.green/black}] {pos}/{len} ({percent}%) {msg}",
                "█▓▒░",
            )
        } else {
            (
                "[{elapsed_precise}] [{bar:30}] {pos}/{len} ({percent}%) {msg}",
                "#> ",
            )
        };
        let style = ProgressStyle::default_bar()
            .template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars(chars);

        pb.set_style(style);
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        Some(pb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_color_config_respects_no_color_flag() {
        assert!(!ColorConfig::new(true).colors_enabled);
    }

    #[test]
    #[serial]
    fn test_color_config_respects_no_color_env() {
        std::env::set_var("NO_COLOR", "1");
        assert!(!ColorConfig::new(false).colors_enabled);
        std::env::remove_var("NO_COLOR");
    }

    #[test]
    #[serial]
    fn test_color_config_respects_sackgrade_no_color() {
        std::env::set_var(NO_COLOR_ENV, "1");
        assert!(!ColorConfig::new(false).colors_enabled);
        std::env::remove_var(NO_COLOR_ENV);
    }

    #[test]
    #[serial]
    fn test_color_config_respects_term_dumb() {
        let previous = std::env::var("TERM").ok();
        std::env::set_var("TERM", "dumb");
        assert!(!ColorConfig::new(false).colors_enabled);
        match previous {
            Some(term) => std::env::set_var("TERM", term),
            None => std::env::remove_var("TERM"),
        }
    }

    #[test]
    fn test_plain_output_when_colors_disabled() {
        use colored::Colorize;

        COLOR_CONFIG
            .set(ColorConfig {
                colors_enabled: false,
            })
            .ok();

        if !colors_enabled() {
            assert_eq!(maybe_color_stderr("test", |s| s.red()), "test");
            assert_eq!(symbols::operation_failed(), "[FAILED]");
            assert_eq!(symbols::completed_successfully(), "[SUCCESS]");
            for symbol in [
                symbols::model_loaded(),
                symbols::system_setup(),
                symbols::checking(),
                symbols::completed_successfully(),
                symbols::warning(),
            ] {
                assert!(symbol.is_ascii(), "{symbol:?}");
            }
        }
    }
}
