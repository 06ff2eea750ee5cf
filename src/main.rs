//! # pdf-notes CLI (`pdfnotes`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pdfnotes init` | Create the SQLite database and schema |
//! | `pdfnotes watch` | Follow the PDF viewer and record page views until Ctrl-C |
//! | `pdfnotes stats` | Print document, page, view, note and concept counts |
//! | `pdfnotes documents` | List tracked documents |
//! | `pdfnotes notes <path> <page>` | Show notes and concepts for a page |
//! | `pdfnotes directive list\|add\|default` | Manage note directives |
//! | `pdfnotes sanitize [file]` | Run the text sanitizer over a file or stdin |
//! | `pdfnotes health` | Check the note service |
//! | `pdfnotes completions <shell>` | Print shell completions |

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};

use pdf_notes::{config, directives, extract, logging, migrate, notes, show, stats, watch};

/// pdf-notes — reading history and AI notes for the PDF viewer.
#[derive(Parser)]
#[command(name = "pdfnotes", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `<config dir>/pdf-notes/config.toml` when that file
    /// exists, built-in defaults otherwise.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it again keeps all data.
    Init,

    /// Watch the viewer and record page views.
    ///
    /// Polling starts when the viewer is launched or brought to the front
    /// and stops when it quits or loses focus.
    Watch,

    /// Show aggregate reading statistics.
    Stats,

    /// List tracked documents, most recently read first.
    Documents,

    /// Show the notes stored for a page.
    Notes {
        /// Document path as recorded by the watcher.
        path: String,

        /// 1-indexed page number.
        page: u32,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Manage note directives.
    Directive {
        #[command(subcommand)]
        action: DirectiveAction,
    },

    /// Sanitize text from a file (or stdin) and print the result.
    Sanitize {
        /// Input file; reads stdin when omitted.
        file: Option<PathBuf>,
    },

    /// Check that the note service is reachable.
    Health,

    /// Print shell completions.
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum DirectiveAction {
    /// List directives; the default is marked with `*`.
    List,
    /// Add a directive.
    Add {
        name: String,
        /// Template text.
        #[arg(long, conflicts_with = "file")]
        template: Option<String>,
        /// Read the template from a file.
        #[arg(long)]
        file: Option<PathBuf>,
        /// Make it the default directive.
        #[arg(long)]
        default: bool,
    },
    /// Make an existing directive the default.
    Default { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Commands that don't require config
    match &cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "pdfnotes", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Sanitize { file } => {
            let raw = read_input(file.as_deref())?;
            println!("{}", extract::sanitize(&raw));
            return Ok(());
        }
        _ => {}
    }

    let cfg = config::resolve_config(cli.config.as_deref())?;
    logging::init_logging(&cfg.logging)?;

    match cli.command {
        Commands::Init => {
            let pool = pdf_notes::db::connect(&cfg).await?;
            migrate::ensure_schema(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
            println!("  path: {}", cfg.db.path.display());
        }
        Commands::Watch => {
            watch::run_watch(&cfg).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Documents => {
            stats::run_documents(&cfg).await?;
        }
        Commands::Notes { path, page, json } => {
            show::run_notes(&cfg, &path, page, json).await?;
        }
        Commands::Directive { action } => match action {
            DirectiveAction::List => directives::run_list(&cfg).await?,
            DirectiveAction::Add {
                name,
                template,
                file,
                default,
            } => directives::run_add(&cfg, &name, template, file.as_deref(), default).await?,
            DirectiveAction::Default { name } => directives::run_set_default(&cfg, &name).await?,
        },
        Commands::Health => {
            let service = notes::HttpNoteService::new(&cfg.notes)?;
            let health = service
                .health()
                .await
                .with_context(|| format!("Note service unreachable at {}", service.base_url()))?;
            println!("status:  {}", health.status);
            if let Some(model) = health.model {
                println!("model:   {}", model);
            }
            if let Some(version) = health.version {
                println!("version: {}", version);
            }
        }
        Commands::Completions { .. } | Commands::Sanitize { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}

fn read_input(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
        None => {
            let mut bytes = Vec::new();
            std::io::stdin().read_to_end(&mut bytes)?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
    }
}
