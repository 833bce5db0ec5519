use clap::Parser;
use std::error::Error;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;

mod shell;

use shell::Shell;

/// Command shell for the flatfs logical filesystem simulator.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Run commands from a script file instead of stdin
    script: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let stdout = io::stdout();
    let mut shell = Shell::new(stdout.lock());

    match cli.script {
        Some(path) => shell.run(BufReader::new(File::open(path)?))?,
        None => shell.run(io::stdin().lock())?,
    }

    Ok(())
}
