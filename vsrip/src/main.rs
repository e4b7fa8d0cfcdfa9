//! Batch front end for the `vobsubrip` library: load a parameter file,
//! run one indexing job, and dump the raw subtitle stream next to the
//! configured output path.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::exit;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{unbounded, Sender};
use log::debug;
use vobsubrip::{Callback, RipOutput, Ripper, SECTOR_SIZE};

#[derive(Debug, Parser)]
#[command(
    name = "vsrip",
    about = "Rips DVD subtitle streams in batch mode",
    version
)]
struct Args {
    /// Parameter file describing the rip job.
    params: PathBuf,

    /// Suppress the progress display.
    #[arg(short, long)]
    quiet: bool,
}

/// Prints job messages and coarse progress on stderr, and reports the
/// final verdict back over a channel.
struct Console {
    quiet: bool,
    progress_shown: bool,
    done: Sender<bool>,
}

impl Callback for Console {
    fn on_message(&mut self, text: &str) {
        if self.progress_shown {
            eprintln!();
            self.progress_shown = false;
        }
        eprintln!("{}", text);
    }

    fn on_progress(&mut self, fraction: f64) {
        if self.quiet {
            return;
        }
        eprint!("\rIndexing... {:3.0}%", fraction * 100.0);
        let _ = io::stderr().flush();
        self.progress_shown = fraction < 1.0;
    }

    fn on_finished(&mut self, succeeded: bool) {
        if self.progress_shown {
            eprintln!();
        }
        let _ = self.done.send(succeeded);
    }
}

/// Write the raw stream and print one summary line per non-empty
/// track.
fn save_output(ripper: &Ripper, output: &RipOutput) -> Result<()> {
    let base = ripper
        .output_path()
        .unwrap_or_else(|| PathBuf::from("vsrip-out"));
    let sub_path = base.with_extension("sub");
    fs::write(&sub_path, &output.stream)
        .with_context(|| format!("could not write {}", sub_path.display()))?;
    println!(
        "Wrote {} ({} sectors).",
        sub_path.display(),
        output.stream.len() / SECTOR_SIZE
    );
    for (i, track) in output.tracks.iter().enumerate() {
        let count = track.subpos.iter().filter(|sp| sp.valid).count();
        if count > 0 {
            println!("Stream {:02}: {} ({} subtitles)", i, track.name, count);
        }
    }
    Ok(())
}

fn run(args: &Args) -> Result<bool> {
    let ripper = Ripper::new();
    let (done, finished) = unbounded();
    ripper.set_callback(Box::new(Console {
        quiet: args.quiet,
        progress_shown: false,
        done,
    }));
    ripper.load_params(&args.params)?;
    ripper.index()?;
    let succeeded = finished
        .recv()
        .context("the worker thread went away before finishing")?;

    let config = ripper.config();
    if config.beep {
        eprint!("\x07");
        let _ = io::stderr().flush();
    }
    if succeeded {
        if let Some(output) = ripper.take_output() {
            save_output(&ripper, &output)?;
        }
    }
    if !succeeded && config.close_ignore_errors {
        debug!("job failed, but CLOSEIGNOREERRORS is set");
        return Ok(true);
    }
    Ok(succeeded)
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    match run(&args) {
        Ok(true) => {}
        Ok(false) => exit(1),
        Err(err) => {
            eprintln!("Error: {:#}", err);
            exit(1);
        }
    }
}
