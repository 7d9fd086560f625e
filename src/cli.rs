use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum AnimalAction {
    /// Merge animals from a CSV file (matched by desertion_no)
    Import {
        /// Path to a CSV with the animals.csv header
        path: PathBuf,
    },
    /// Print all animals
    List {},
}

#[derive(Subcommand, Debug, Clone)]
pub enum UserAction {
    /// Create a user
    Add {
        /// Display name
        name: String,
    },
    /// Print all users
    List {},
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start petmatch as a service.
    Daemon {},

    /// Manage shelter animals
    Animal {
        #[clap(subcommand)]
        action: AnimalAction,
    },

    /// Manage users
    User {
        #[clap(subcommand)]
        action: UserAction,
    },

    /// Record that a user viewed an animal's details
    Interest {
        user_id: u64,
        animal_id: String,

        /// Seconds spent on the detail view
        #[clap(short, long)]
        dwell: Option<u32>,
    },

    /// Like (or unlike) an animal
    Like {
        user_id: u64,
        animal_id: String,

        /// Clear the like instead
        #[clap(long, default_value = "false")]
        unlike: bool,
    },

    /// Generate the embedding of one animal
    Embed { animal_id: String },

    /// Generate embeddings for every animal
    EmbedAll {},

    /// Rebuild a user's preference vector from their interests and likes
    Recompute { user_id: u64 },

    /// Recommend animals for a user
    Recommend {
        user_id: u64,

        /// Number of animals (defaults to recommend.default_top_n)
        #[clap(short, long)]
        top: Option<usize>,
    },

    /// Describe a user's preference in plain words
    Summary { user_id: u64 },

    /// Print a user's stored preference vector (base64)
    Preference { user_id: u64 },
}
