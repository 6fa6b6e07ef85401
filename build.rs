//! Build script generating manual pages from the CLI definitions.

use std::{
    fs,
    path::{Path, PathBuf},
};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli.rs"]
mod cli;

fn render(cmd: clap::Command, out_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let name = format!("{}.1", cmd.get_name());
    let mut buf: Vec<u8> = Vec::new();
    Man::new(cmd).render(&mut buf)?;
    fs::write(out_dir.join(name), buf)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=src/cli.rs");

    let out_dir = PathBuf::from("target/generated-man");
    fs::create_dir_all(&out_dir)?;

    render(cli::RouterCli::command(), &out_dir)?;
    render(cli::NodeCli::command(), &out_dir)?;

    Ok(())
}
