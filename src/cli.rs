use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    #[clap(long, global = true, help = "Manifest file (default: tree.md, see settings)")]
    pub manifest: Option<PathBuf>,
    #[clap(long = "cache-dir", global = true, help = "Local staging cache (default: videos/)")]
    pub cache_dir: Option<PathBuf>,
    #[clap(short, long, global = true, help = "Debug logging, also written to ~/.sharemirror/logs")]
    pub verbose: bool,
    #[clap(subcommand)]
    pub command: Commands,
}

/// Options shared by the modes that transfer files.
#[derive(Args, Debug, Clone, Default)]
pub struct TransferArgs {
    #[clap(help = "Public listing URL (overrides MIRROR_SOURCE_URL)")]
    pub source: Option<String>,
    #[clap(help = "Destination folder on the storage account, e.g. /Videos/Mirror (overrides MIRROR_DEST_PATH)")]
    pub dest: Option<String>,
    #[clap(long, help = "Only process files in this folder, e.g. \"Отец\"")]
    pub folder: Option<String>,
    #[clap(long, help = "Process at most N pending files")]
    pub limit: Option<usize>,
    #[clap(long, help = "Process only the first pending file (same as --limit 1)")]
    pub test: bool,
    #[clap(long = "dry-run", help = "Show what would be transferred, change nothing remotely")]
    pub dry_run: bool,
    #[clap(long = "extension-workaround", help = "Upload as <name>.txt, then rename into place")]
    pub extension_workaround: bool,
}

impl TransferArgs {
    pub fn limit(&self) -> Option<usize> {
        if self.test { Some(1) } else { self.limit }
    }

    /// A lone absolute path is the destination, not the source: lets
    /// `sm replay /Videos --upload-only` work without a URL.
    pub fn positionals(&self) -> (Option<String>, Option<String>) {
        match (&self.source, &self.dest) {
            (Some(s), None) if s.starts_with('/') => (None, Some(s.clone())),
            (s, d) => (s.clone(), d.clone()),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[clap(about = "Discover the remote tree, update the manifest, then transfer pending files", display_order = 1)]
    Run(TransferArgs),
    #[clap(about = "Discover the remote tree and write the manifest only", display_order = 2)]
    Discover {
        #[clap(help = "Public listing URL (overrides MIRROR_SOURCE_URL)")]
        source: Option<String>,
    },
    #[clap(about = "Transfer pending files listed in an existing manifest, without discovery", display_order = 3)]
    Replay {
        #[clap(flatten)]
        args: TransferArgs,
        #[clap(long = "upload-only", help = "Skip downloading; publish what is already in the cache")]
        upload_only: bool,
    },
    #[clap(about = "Show manifest progress and files waiting in the cache", display_order = 4)]
    Status {
        #[clap(long, help = "Only count files in this folder")]
        folder: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_accepts_destination_alone() {
        let cli = Cli::parse_from(["sm", "replay", "/Videos", "--upload-only", "--test"]);
        match cli.command {
            Commands::Replay { args, upload_only } => {
                assert!(upload_only);
                assert_eq!(args.limit(), Some(1));
                assert_eq!(args.positionals(), (None, Some("/Videos".to_string())));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "sm", "run", "https://share.example/d/x", "/Videos", "--folder", "Отец", "-v",
            "--manifest", "m.md",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.manifest, Some(PathBuf::from("m.md")));
        let Commands::Run(args) = cli.command else { panic!("expected run") };
        assert_eq!(args.folder.as_deref(), Some("Отец"));
        assert_eq!(args.positionals().1.as_deref(), Some("/Videos"));
    }
}
