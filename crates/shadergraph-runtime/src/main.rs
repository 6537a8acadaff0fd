use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use clap::Parser;
use shadergraph_client::cli::{CliArgs, Command};
use shadergraph_client::headless::{self, HeadlessError};
use shadergraph_client::project::{LoadSlot, LoadTicket};
use shadergraph_client::project_config::{self, ConfigError, RenderConfig};
use shadergraph_client::resolver::{has_scheme, DefaultResolver, FsResolver};
use shadergraph_client::shadergraph_core::Graph;
use shadergraph_client::watcher;

/// Project location, graph and render settings after merging
/// `shadergraph.yaml` with the command line.
struct Settings {
    url: String,
    watch_dir: Option<PathBuf>,
    graph: Option<String>,
    render: RenderConfig,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = CliArgs::parse();
    tracing::info!("shadergraph v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: CliArgs) -> Result<(), Box<dyn Error>> {
    let settings = resolve_settings(&args)?;
    let resolver = DefaultResolver::new();

    match &args.command {
        // shadergraph check [--json] [--all]
        Command::Check { json, all } => {
            let (_, graphs) = pollster::block_on(headless::check_project(
                &settings.url,
                settings.graph.as_deref(),
                *all,
                &resolver,
            ))?;
            print_plans(&graphs, *json)?;
        }

        // shadergraph render [--width W --height H --frames N --fps F -o out.png]
        Command::Render { .. } => {
            let render = settings.render.with_overrides(&args.command.render_overrides());
            let project = pollster::block_on(shadergraph_client::load_project(&settings.url, &resolver))?;
            let graph = headless::graph_name(&project, settings.graph.as_deref())?.to_string();
            pollster::block_on(headless::render_to_png(&project, &graph, &render, &resolver, args.debug))?;
            println!("{}", render.output);
        }

        // shadergraph watch
        Command::Watch => {
            let dir = settings
                .watch_dir
                .clone()
                .ok_or("watch needs a project on the local file system")?;
            watch(&settings, &dir)?;
        }
    }
    Ok(())
}

fn resolve_settings(args: &CliArgs) -> Result<Settings, ConfigError> {
    let cwd = std::env::current_dir().map_err(ConfigError::Io)?;
    let found = match project_config::discover(&cwd) {
        Ok(found) => Some(found),
        Err(ConfigError::NotFound) if args.project.is_some() => None,
        Err(e) => return Err(e),
    };
    let (location, graph, render) = match (&args.project, found) {
        (Some(project), found) => {
            let (graph, render) = found
                .map(|(_, config)| (config.graph, config.render))
                .unwrap_or_default();
            (project.clone(), graph, render)
        }
        (None, Some((path, config))) => {
            tracing::info!("Using {}", path.display());
            (config.project_location(&path), config.graph, config.render)
        }
        (None, None) => return Err(ConfigError::NotFound),
    };

    let (url, watch_dir) = if has_scheme(&location) {
        (location, None)
    } else {
        let path = Path::new(&location);
        let absolute = if path.is_absolute() { path.to_path_buf() } else { cwd.join(path) };
        let dir = absolute.parent().map(Path::to_path_buf);
        (FsResolver::url_for(&absolute), dir)
    };

    Ok(Settings {
        url,
        watch_dir,
        graph: args.graph.clone().or(graph),
        render,
    })
}

fn print_plans(graphs: &[(String, Graph)], json: bool) -> Result<(), serde_json::Error> {
    if json {
        let mut map = serde_json::Map::new();
        for (name, graph) in graphs {
            map.insert(name.clone(), serde_json::to_value(graph)?);
        }
        println!("{}", serde_json::to_string_pretty(&serde_json::Value::Object(map))?);
    } else {
        for (name, graph) in graphs {
            print!("{}", headless::describe(name, graph));
        }
    }
    Ok(())
}

enum WatchMsg {
    Changed(Vec<PathBuf>),
    Checked(LoadTicket, Result<Vec<(String, Graph)>, HeadlessError>),
}

/// Re-checks the project on every change. Checks run on worker threads; a
/// check that finishes after a newer one was started is discarded.
fn watch(settings: &Settings, dir: &Path) -> Result<(), Box<dyn Error>> {
    let (_watcher, events) = watcher::start_watching(dir)?;
    let (tx, rx) = mpsc::channel();

    let forward = tx.clone();
    std::thread::spawn(move || {
        while let Some(batch) = watcher::next_batch(&events, Duration::from_millis(150)) {
            if forward.send(WatchMsg::Changed(batch)).is_err() {
                break;
            }
        }
    });

    let mut slot: LoadSlot<Vec<(String, Graph)>> = LoadSlot::new();
    spawn_check(&mut slot, settings, &tx);
    while let Ok(msg) = rx.recv() {
        match msg {
            WatchMsg::Changed(paths) => {
                tracing::debug!("{} file(s) changed, re-checking", paths.len());
                spawn_check(&mut slot, settings, &tx);
            }
            WatchMsg::Checked(ticket, Ok(graphs)) => {
                let summary: Vec<String> = graphs
                    .iter()
                    .map(|(name, g)| format!("{} ({} passes)", name, g.passes.len()))
                    .collect();
                if slot.complete(ticket, graphs) {
                    println!("ok: {}", summary.join(", "));
                }
            }
            WatchMsg::Checked(ticket, Err(e)) => {
                if slot.is_current(ticket) {
                    eprintln!("Error: {}", e);
                }
            }
        }
    }
    Ok(())
}

fn spawn_check(slot: &mut LoadSlot<Vec<(String, Graph)>>, settings: &Settings, tx: &mpsc::Sender<WatchMsg>) {
    let ticket = slot.begin();
    let url = settings.url.clone();
    let graph = settings.graph.clone();
    let tx = tx.clone();
    std::thread::spawn(move || {
        let resolver = DefaultResolver::new();
        let all = graph.is_none();
        let result = pollster::block_on(headless::check_project(&url, graph.as_deref(), all, &resolver))
            .map(|(_, graphs)| graphs);
        let _ = tx.send(WatchMsg::Checked(ticket, result));
    });
}
