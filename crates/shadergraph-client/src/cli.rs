use clap::{Parser, Subcommand};

use crate::project_config::RenderOverrides;

#[derive(Parser, Debug)]
#[command(name = "shadergraph", version, about = "shadergraph - declarative multi-pass shader graphs")]
pub struct CliArgs {
    /// Subcommand (check, render, watch)
    #[command(subcommand)]
    pub command: Command,

    /// Project document (path or http(s) URL); overrides shadergraph.yaml
    #[arg(long, global = true)]
    pub project: Option<String>,

    /// Graph to use; defaults to "main" or the first declared graph
    #[arg(long, global = true)]
    pub graph: Option<String>,

    /// Record per-pass debug info and log it after each frame
    #[arg(long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load the project, build graphs and print their execution plans
    Check {
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
        /// Build every graph instead of one
        #[arg(long)]
        all: bool,
    },
    /// Render frames headlessly and write the last one as PNG
    Render {
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
        /// Number of frames to render
        #[arg(long)]
        frames: Option<u32>,
        /// Fixed time step is 1/fps seconds
        #[arg(long)]
        fps: Option<f32>,
        /// Output PNG path
        #[arg(long, short)]
        output: Option<String>,
    },
    /// Re-check the project whenever a file under its directory changes
    Watch,
}

impl Command {
    /// Render flags as config overrides; empty for other subcommands.
    pub fn render_overrides(&self) -> RenderOverrides {
        match self {
            Command::Render {
                width,
                height,
                frames,
                fps,
                output,
            } => RenderOverrides {
                width: *width,
                height: *height,
                frames: *frames,
                fps: *fps,
                output: output.clone(),
            },
            _ => RenderOverrides::default(),
        }
    }
}
