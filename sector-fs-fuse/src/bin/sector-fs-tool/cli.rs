use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(about = "Build and inspect sector-fs disk images")]
pub struct Cli {
    /// Disk image file
    #[arg(long, short, default_value = "fs.img")]
    pub image: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create an empty file system, overwriting the image
    Format {
        /// Number of sectors, a multiple of 8
        #[arg(long, short, default_value_t = 1024)]
        sectors: usize,

        /// Initial capacity of the root directory
        #[arg(long, short, default_value_t = 10)]
        dir_entries: usize,
    },

    /// Copy host files into a directory of the image
    Put {
        /// Host files
        #[arg(required = true)]
        sources: Vec<PathBuf>,

        /// Target directory inside the image, `/`-separated
        #[arg(long, short)]
        dir: Option<String>,
    },

    /// Print a file of the image
    Cat { path: String },

    /// Create a directory
    Mkdir { path: String },

    /// List a directory tree
    Ls { path: Option<String> },

    /// Remove a file
    Rm { path: String },

    /// Dump bitmap, root directory and file headers
    Dump,
}
