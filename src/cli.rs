use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use crate::config::EmbedderKind;

/// Corpus directory used when `--dir` is not given.
pub const DEFAULT_CORPUS_DIR: &str = "data";

#[derive(Debug, Parser)]
#[command(
    name = "curatex",
    about = "Ask questions about curated news with hybrid retrieval"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Embedding backend (colbert or hashing)
    #[arg(long, global = true)]
    pub embedder: Option<EmbedderKind>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build or load the indexes for a corpus directory
    Setup(SetupArgs),
    /// Copy news files into the corpus and set it up
    Ingest(IngestArgs),
    /// Answer a single question
    Ask(AskArgs),
    /// Interactive question loop with conversation memory
    Chat(ChatArgs),
    /// Show fused retrieval results without generating an answer
    Search(SearchArgs),
    /// Manage persisted settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show configuration and index status
    Status(StatusArgs),
    /// Start MCP server for AI agent integration
    Mcp(McpArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

#[derive(Debug, Parser)]
pub struct CorpusArgs {
    /// Directory holding the .txt news documents
    #[arg(short, long, default_value = DEFAULT_CORPUS_DIR)]
    pub dir: PathBuf,
}

// -- Setup --

#[derive(Debug, Parser)]
pub struct SetupArgs {
    #[command(flatten)]
    pub corpus: CorpusArgs,

    /// Output the setup report as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Ingest --

#[derive(Debug, Parser)]
pub struct IngestArgs {
    /// Text files to add to the corpus
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    #[command(flatten)]
    pub corpus: CorpusArgs,

    /// Output the setup report as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Ask --

#[derive(Debug, Parser)]
pub struct AskArgs {
    /// The question
    pub question: String,

    #[command(flatten)]
    pub corpus: CorpusArgs,

    /// Print the retrieved sources after the answer
    #[arg(long)]
    pub sources: bool,

    /// Output the answer and sources as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Chat --

#[derive(Debug, Parser)]
pub struct ChatArgs {
    #[command(flatten)]
    pub corpus: CorpusArgs,

    /// Print the retrieved sources after each answer
    #[arg(long)]
    pub sources: bool,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    #[command(flatten)]
    pub corpus: CorpusArgs,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Config --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Persist a setting
    Set {
        /// Setting name (see `config list --all`)
        key: String,
        value: String,
    },
    /// Print a setting's stored value
    Get { key: String },
    /// Remove a stored setting (revert to default)
    Unset { key: String },
    /// List stored settings
    List {
        /// Include every known key with its effective value
        #[arg(long)]
        all: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- MCP --

#[derive(Debug, Parser)]
pub struct McpArgs {
    #[command(flatten)]
    pub corpus: CorpusArgs,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "curatex",
            &mut std::io::stdout(),
        );
    }
}
