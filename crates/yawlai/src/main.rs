//! yawlai command line entry point

#[cfg(feature = "cli")]
mod cli {
    use std::path::PathBuf;
    use std::sync::Arc;

    use anyhow::Context;
    use clap::{Parser, Subcommand};
    use yawlai::{
        telemetry, ChatSessionStore, Config, Database, FileStorage, ImportFileKind, KeywordImporter,
        SessionStorage,
    };

    #[derive(Parser)]
    #[command(name = "yawlai")]
    #[command(version, about = "YawlAI chat server and admin tools", long_about = None)]
    struct Cli {
        #[command(subcommand)]
        command: Option<Commands>,
    }

    #[derive(Subcommand)]
    enum Commands {
        /// Run the HTTP server (default)
        Serve,

        /// Bulk import keywords from a CSV or Excel file
        Import {
            /// Path to the file
            file: PathBuf,

            /// File type; guessed from the extension when omitted
            #[arg(long)]
            kind: Option<ImportFileKind>,
        },

        /// Inspect saved chat sessions
        History {
            #[command(subcommand)]
            action: HistoryAction,
        },
    }

    #[derive(Subcommand)]
    enum HistoryAction {
        /// List sessions, most recent first
        List,
        /// Print one session's messages
        Show { id: String },
        /// Export one session, or all of them, as JSON
        Export { id: Option<String> },
        /// Delete one session
        Delete { id: String },
        /// Delete every session
        Clear,
    }

    pub async fn run() -> anyhow::Result<()> {
        telemetry::init_tracing();
        let cli = Cli::parse();
        let cfg = Config::from_env()?;

        match cli.command.unwrap_or(Commands::Serve) {
            Commands::Serve => yawlai::run_server(cfg).await,
            Commands::Import { file, kind } => import(&cfg, &file, kind),
            Commands::History { action } => history(&cfg, action),
        }
    }

    fn import(cfg: &Config, file: &PathBuf, kind: Option<ImportFileKind>) -> anyhow::Result<()> {
        let kind = match kind {
            Some(kind) => kind,
            None => file
                .to_str()
                .and_then(ImportFileKind::from_filename)
                .with_context(|| format!("Cannot tell the file type of {}; pass --kind", file.display()))?,
        };
        let bytes = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;

        let database = Database::new(&cfg.database_path)?;
        let report = KeywordImporter::new(&database.keywords)
            .with_batch_size(cfg.import_batch_size)
            .import_keywords(&bytes, kind)?;

        println!(
            "Imported {} keywords ({} skipped as duplicates, {} failed, {} total)",
            report.inserted, report.skipped, report.failed, report.total
        );
        for error in &report.errors {
            println!("  - {}", error);
        }
        Ok(())
    }

    fn history(cfg: &Config, action: HistoryAction) -> anyhow::Result<()> {
        let storage: Arc<dyn SessionStorage> = Arc::new(FileStorage::new(&cfg.history_dir)?);
        let store = ChatSessionStore::with_max_sessions(Some(storage), cfg.max_chat_sessions);

        match action {
            HistoryAction::List => {
                let sessions = store.get_sessions();
                if sessions.is_empty() {
                    println!("No saved sessions in {}", cfg.history_dir.display());
                }
                for session in sessions {
                    println!(
                        "{}  {}  {} messages  {}",
                        session.id,
                        session.updated_at.format("%Y-%m-%d %H:%M"),
                        session.messages.len(),
                        session.title
                    );
                }
            }
            HistoryAction::Show { id } => {
                let session = store
                    .get_session(&id)
                    .with_context(|| format!("Session {} not found", id))?;
                println!("# {}", session.title);
                for message in &session.messages {
                    println!("\n[{:?} @ {}]\n{}", message.role, message.timestamp.to_rfc3339(), message.content);
                }
            }
            HistoryAction::Export { id: Some(id) } => {
                let json = store
                    .export_session(&id)
                    .with_context(|| format!("Session {} not found", id))?;
                println!("{}", json);
            }
            HistoryAction::Export { id: None } => println!("{}", store.export_all_sessions()),
            HistoryAction::Delete { id } => {
                if store.delete_session(&id)? {
                    println!("Deleted session {}", id);
                } else {
                    anyhow::bail!("Session {} not found", id);
                }
            }
            HistoryAction::Clear => {
                store.clear_all_sessions()?;
                println!("Cleared all sessions");
            }
        }
        Ok(())
    }
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::run().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
