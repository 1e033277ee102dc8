use std::path::PathBuf;

use clap::{Parser, Subcommand};
use image_ferry::{EventHandler, Transfer};

#[derive(Parser, Debug)]
struct Args {
    /// Registry address, like `127.0.0.1:5000`.
    registry: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Push a local image archive.
    Push {
        /// Path of the archive to push.
        archive: PathBuf,
    },

    /// Pull an image into a local archive.
    Pull {
        repository: String,

        tag: String,

        /// Target path to write the archive.
        target: PathBuf,
    },

    /// Delete an image and its layers.
    Delete { repository: String, tag: String },
}

struct Logger;

impl EventHandler for Logger {
    fn registry_request(&self, method: &str, url: &str) {
        println!("{method} {url}");
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let transfer = Transfer::new(&args.registry).event_handler(Logger);

    match args.command {
        Command::Push { archive } => transfer.push(&archive)?,

        Command::Pull {
            repository,
            tag,
            target,
        } => transfer.pull(&repository, &tag, &target)?,

        Command::Delete { repository, tag } => transfer.delete(&repository, &tag)?,
    }

    Ok(())
}
