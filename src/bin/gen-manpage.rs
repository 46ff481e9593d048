//! Man page generator for periflash
//!
//! Usage: cargo run --bin gen-manpage -- [output-dir]

use clap::CommandFactory;
use std::fs;
use std::path::PathBuf;

#[path = "../cli.rs"]
mod cli;

fn main() -> std::io::Result<()> {
    let output_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("man"));
    fs::create_dir_all(&output_dir)?;

    let man = clap_mangen::Man::new(cli::Cli::command());
    let mut buffer = Vec::new();
    man.render(&mut buffer)?;

    let output_path = output_dir.join("periflash.1");
    fs::write(&output_path, &buffer)?;

    println!("Man page generated at: {}", output_path.display());
    println!("View with:    man -l {}", output_path.display());
    println!("Install with: sudo cp {} /usr/local/share/man/man1/", output_path.display());

    Ok(())
}
