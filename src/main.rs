//! DICOM Pixel Blackout CLI Tool
//!
//! A command-line utility for rendering DICOM frames and blacking out
//! regions of their pixel data.

use clap::Parser;
use medimg_blackout::cli::{run, Cli};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
