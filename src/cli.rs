use std::fmt::Display;
use std::io::Write;
use std::path::PathBuf;

use clap::builder::styling::{AnsiColor, Color, Style, Styles};
use clap::{Args, ColorChoice, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::aot::{Generator, Shell, generate};
use clap_complete_nushell::Nushell;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use topic_atlas_local_embedder::DeviceKind;
use tracing::{info, warn};
use tracing_indicatif::indicatif_println;

use crate::chart::ScatterChart;
use crate::config::{EmbedOptions, PipelineConfig, ReduceOptions, TopicOptions};
use crate::embed::bert::BertEmbedder;
use crate::extract::{self, ExtractFields, Extracted};
use crate::io_utils::{write_chart, write_json_output};
use crate::pipeline::Pipeline;
use crate::{AppResult, loader};

const STYLES: Styles = Styles::styled()
    .header(Style::new().bold())
    .usage(Style::new().bold())
    .error(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Red))))
    .literal(
        Style::new()
            .bold()
            .fg_color(Some(Color::Ansi(AnsiColor::Green))),
    )
    .placeholder(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Yellow))))
    .valid(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Cyan))))
    .invalid(Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightRed))))
    .context(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Magenta))))
    .context_value(
        Style::new()
            .bold()
            .fg_color(Some(Color::Ansi(AnsiColor::Cyan))),
    );

/// Long-form CLI description shown in `--help`.
const LONG_ABOUT: &str = "Topic Atlas - Map a JSON document collection by topic

For every document this tool:
- embeds its text with a local BERT-style sentence encoder (downloaded from \x1b]8;;https://huggingface.co\x1b\\\x1b[4;36mHugging Face\x1b[24;39m\x1b]8;;\x1b\\ on first use)
- assigns it a topic by density clustering the embeddings (HDBSCAN)
- places it on a 2D map (UMAP or PCA)

The result is written as a JSON table (text, topic, label, x, y) and an interactive HTML scatter chart.";

/// Topic Atlas - Map a JSON document collection by topic.
#[derive(Parser, Debug, Clone)]
#[command(author, version, propagate_version = true, about, long_about = Some(LONG_ABOUT), styles = STYLES)]
pub struct Cli {
    /// Color choice for the output
    #[arg(long, default_value_t = ColorChoice::Auto)]
    pub color: ColorChoice,

    /// Subcommand to run
    #[command(subcommand)]
    pub cmd: Cmd,
}

/// Top-level commands supported by the CLI.
#[derive(Subcommand, Debug, Clone)]
pub enum Cmd {
    /// Embed, cluster and map a document collection
    ///
    /// Writes the topic table as JSON and the chart as a standalone HTML page
    Run {
        #[command(flatten)]
        args: RunArgs,
        #[command(flatten)]
        verbosity: Verbosity<InfoLevel>,
    },

    /// Print the compute device that `--device auto` would select
    Device {
        #[command(flatten)]
        verbosity: Verbosity<InfoLevel>,
    },

    /// Generate shell completion for a given shell
    Completion {
        /// Output file to write the completion script to
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// The shell to generate the completion for
        #[arg(value_enum)]
        shell: CompletionShell,

        #[command(flatten)]
        verbosity: Verbosity<InfoLevel>,
    },
}

/// Inputs, outputs and option bundles of a pipeline run.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// JSON file holding the document collection
    pub input: PathBuf,

    /// Top-level key whose value is the document array
    #[arg(short, long)]
    pub mask: Option<String>,

    /// Document field holding the text to embed
    #[arg(long, default_value = "content")]
    pub text_field: String,

    /// Document field holding the label
    #[arg(long, default_value = "title")]
    pub label_field: String,

    /// Highlight documents whose label is exactly this value
    #[arg(short, long)]
    pub label: Option<String>,

    /// Output file for the topic table
    /// If not provided, prints to stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output file for per-document topic ids and membership probabilities
    #[arg(long)]
    pub assignments: Option<PathBuf>,

    /// Output file for the HTML chart
    #[arg(long, default_value = "topics.html")]
    pub chart: PathBuf,

    /// Chart title
    #[arg(long, default_value = "Topic map")]
    pub title: String,

    /// JSON file with `embed`, `topics` and `reduce` sections
    ///
    /// When given (or when `config.json` exists in the config directory) it replaces the
    /// option flags below
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub embed: EmbedOptions,

    #[command(flatten)]
    pub topics: TopicOptions,

    #[command(flatten)]
    pub reduce: ReduceOptions,
}

/// Supported completion targets for shell auto-completion.
#[derive(ValueEnum, Clone, Debug)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
    Nushell,
}

impl Display for CompletionShell {
    /// Render the canonical shell name string.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CompletionShell::Bash => "bash",
            CompletionShell::Zsh => "zsh",
            CompletionShell::Fish => "fish",
            CompletionShell::PowerShell => "powershell",
            CompletionShell::Elvish => "elvish",
            CompletionShell::Nushell => "nushell",
        };
        write!(f, "{}", s)
    }
}

impl Generator for &CompletionShell {
    fn generate(&self, cmd: &clap::builder::Command, buf: &mut dyn Write) {
        match self {
            CompletionShell::Bash => Shell::Bash.generate(cmd, buf),
            CompletionShell::Zsh => Shell::Zsh.generate(cmd, buf),
            CompletionShell::Fish => Shell::Fish.generate(cmd, buf),
            CompletionShell::PowerShell => Shell::PowerShell.generate(cmd, buf),
            CompletionShell::Elvish => Shell::Elvish.generate(cmd, buf),
            CompletionShell::Nushell => Nushell.generate(cmd, buf),
        }
    }

    fn file_name(&self, name: &str) -> String {
        match self {
            CompletionShell::Bash => Shell::Bash.file_name(name),
            CompletionShell::Zsh => Shell::Zsh.file_name(name),
            CompletionShell::Fish => Shell::Fish.file_name(name),
            CompletionShell::PowerShell => Shell::PowerShell.file_name(name),
            CompletionShell::Elvish => Shell::Elvish.file_name(name),
            CompletionShell::Nushell => Nushell.file_name(name),
        }
    }
}

/// Helper trait for accessing verbosity flags on commands.
pub trait GetVerbosity {
    fn get_verbosity(&self) -> &Verbosity<InfoLevel>;
}

impl GetVerbosity for Cmd {
    fn get_verbosity(&self) -> &Verbosity<InfoLevel> {
        match self {
            Cmd::Run { verbosity, .. } => verbosity,
            Cmd::Device { verbosity } => verbosity,
            Cmd::Completion { verbosity, .. } => verbosity,
        }
    }
}

impl Cmd {
    /// Execute the chosen top-level command.
    #[tracing::instrument(name = "Running command", level = "info", skip(self))]
    pub async fn run(&self) -> AppResult<()> {
        match self {
            Cmd::Run { args, .. } => args.run().await,
            Cmd::Device { .. } => {
                indicatif_println!("{}", DeviceKind::probe());
                Ok(())
            }
            Cmd::Completion { shell, output, .. } => {
                let mut cmd = Cli::command();
                if let Some(output_path) = output {
                    let mut file = std::fs::OpenOptions::new()
                        .write(true)
                        .truncate(true)
                        .create(true)
                        .open(output_path)?;
                    generate(shell, &mut cmd, "topic-atlas", &mut file);
                    info!(
                        "Generated completion script for {} at {}",
                        shell,
                        output_path.display()
                    );
                } else {
                    generate(shell, &mut cmd, "topic-atlas", &mut std::io::stdout());
                }
                Ok(())
            }
        }
    }
}

impl RunArgs {
    pub fn fields(&self) -> ExtractFields {
        ExtractFields {
            text: self.text_field.clone(),
            label: self.label_field.clone(),
        }
    }

    /// Option bundles from `--config`, then the default config file, then the flags.
    pub async fn resolve_config(&self) -> AppResult<PipelineConfig> {
        if let Some(path) = &self.config {
            return PipelineConfig::from_file(path).await;
        }
        let default_path = PipelineConfig::default_path()?;
        if tokio::fs::try_exists(&default_path).await.unwrap_or(false) {
            info!("Using options from {}", default_path.display());
            return PipelineConfig::from_file(&default_path).await;
        }
        let config = PipelineConfig {
            embed: self.embed.clone(),
            topics: self.topics.clone(),
            reduce: self.reduce.clone(),
        };
        config.validate()?;
        Ok(config)
    }

    #[tracing::instrument(name = "Mapping documents", level = "info", skip(self))]
    pub async fn run(&self) -> AppResult<()> {
        let config = self.resolve_config().await?;

        let collection = loader::load(&self.input, self.mask.as_deref()).await?;
        let Extracted { texts, labels } = extract::extract(&collection, &self.fields())?;
        drop(collection);

        let embedder = BertEmbedder::load(&config.embed, config.embed.device.resolve()).await?;
        info!("Embedding with {} on {}", config.embed.model, embedder.device());

        let pipeline = Pipeline::new(config);
        let output =
            tokio::task::spawn_blocking(move || pipeline.run(&embedder, &texts, &labels)).await??;

        let chart = ScatterChart::new(self.title.clone())
            .view(&output.table, self.label.as_deref())?;
        if let Some(label) = &self.label
            && chart.highlight().is_none()
        {
            warn!("Label {:?} matched no document", label);
        }

        match &self.output {
            Some(path) => write_json_output(path, &output.table).await?,
            None => {
                indicatif_println!("{}", serde_json::to_string_pretty(&output.table)?);
            }
        }
        if let Some(path) = &self.assignments {
            write_json_output(path, &output.assignments).await?;
        }
        write_chart(&self.chart, &chart).await?;
        Ok(())
    }
}
