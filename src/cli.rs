use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use docfinder::FileType;

#[derive(Debug, Parser)]
#[command(
    name = "docfinder",
    about = "Index local documents and search them by meaning, keywords and file name"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Override the ColBERT model ID or local model path
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Stage files or directories for indexing
    Add(AddArgs),
    /// Unstage files or directories
    Rm(RmArgs),
    /// Show staged files
    Status(JsonArgs),
    /// Index staged files, scan roots or specific paths
    Index(IndexArgs),
    /// Search indexed documents
    Search(SearchArgs),
    /// Show index statistics
    Stats(JsonArgs),
    /// Remove every file from the index (staging and settings are kept)
    Clear,
    /// Remove one file from the index
    RemoveFile {
        /// Path of the indexed file
        path: PathBuf,
    },
    /// Print the extracted text of a file
    Show(ShowArgs),
    /// Read and change settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Check that the metadata and vector stores agree
    Verify(JsonArgs),
    /// Remove orphan vectors and drop damaged files
    Repair,
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Staging --

#[derive(Debug, Parser)]
pub struct AddArgs {
    /// Files or directories to stage
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Parser)]
pub struct RmArgs {
    /// Files or directories to unstage
    #[arg(required_unless_present = "all")]
    pub paths: Vec<PathBuf>,

    /// Unstage everything
    #[arg(long, conflicts_with = "paths")]
    pub all: bool,
}

#[derive(Debug, Parser)]
pub struct JsonArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Index --

#[derive(Debug, Parser)]
pub struct IndexArgs {
    /// Walk the configured scan roots instead of the staged files
    #[arg(long, conflicts_with = "path")]
    pub full: bool,

    /// Index only these files or directories
    #[arg(long)]
    pub path: Vec<PathBuf>,

    /// Skip files larger than this many megabytes
    #[arg(long)]
    pub max_file_size_mb: Option<u64>,

    /// Chunk size in characters
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Output the run summary as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Number of results to return (defaults to the max_results setting)
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Only return files of this type (pdf, excel, word, csv, text, code, data)
    #[arg(short = 't', long = "type")]
    pub file_type: Option<FileType>,

    /// Minimum semantic similarity (defaults to the similarity_threshold setting)
    #[arg(long)]
    pub threshold: Option<f32>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,

    /// Output only file paths (one per line)
    #[arg(long, conflicts_with = "json")]
    pub files: bool,
}

// -- Show --

#[derive(Debug, Parser)]
pub struct ShowArgs {
    /// File to show
    pub path: PathBuf,

    /// First line to print (1-based)
    #[arg(long, default_value = "1")]
    pub from: usize,

    /// Maximum number of lines to print
    #[arg(short = 'l', long)]
    pub lines: Option<usize>,

    /// Prefix lines with their numbers
    #[arg(long)]
    pub line_numbers: bool,
}

// -- Config --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the value of a setting
    Get {
        key: String,
    },
    /// Store a setting
    Set {
        key: String,
        value: String,
    },
    /// Revert a setting to its default
    Unset {
        key: String,
    },
    /// List every setting with its current value
    List(JsonArgs),
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
            "docfinder",
            &mut std::io::stdout(),
        );
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn parse_search_defaults() {
        let cli = Cli::parse_from(["docfinder", "search", "hello"]);
        match cli.command {
            Command::Search(args) => {
                assert_eq!(args.query, "hello");
                assert_eq!(args.count, None);
                assert_eq!(args.file_type, None);
                assert_eq!(args.threshold, None);
                assert!(!args.json);
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn parse_search_type_filter() {
        let cli = Cli::parse_from([
            "docfinder", "search", "budget", "--type", "excel", "-n", "3",
        ]);
        match cli.command {
            Command::Search(args) => {
                assert_eq!(args.file_type, Some(FileType::Excel));
                assert_eq!(args.count, Some(3));
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn parse_index_paths() {
        let cli = Cli::parse_from([
            "docfinder", "index", "--path", "a", "--path", "b", "--chunk-size", "500",
        ]);
        match cli.command {
            Command::Index(args) => {
                assert!(!args.full);
                assert_eq!(args.path, vec![PathBuf::from("a"), PathBuf::from("b")]);
                assert_eq!(args.chunk_size, Some(500));
            }
            _ => panic!("expected index command"),
        }
    }

    #[test]
    fn full_conflicts_with_path() {
        assert!(
            Cli::try_parse_from(["docfinder", "index", "--full", "--path", "a"])
                .is_err()
        );
    }

    #[test]
    fn rm_requires_paths_or_all() {
        assert!(Cli::try_parse_from(["docfinder", "rm"]).is_err());
        let cli = Cli::parse_from(["docfinder", "rm", "--all"]);
        assert!(matches!(cli.command, Command::Rm(RmArgs { all: true, .. })));
    }

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }
}
