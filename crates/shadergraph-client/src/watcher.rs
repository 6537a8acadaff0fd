use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

/// Extensions of files a project can pull in.
const PROJECT_EXTENSIONS: &[&str] = &["json", "glsl", "frag", "vert", "fs", "yaml", "png", "jpg", "jpeg"];

/// Events sent from the watcher thread to the main loop.
#[derive(Debug)]
pub enum WatchEvent {
    ProjectChanged(PathBuf),
}

pub fn is_project_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| PROJECT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Creates a file watcher on the given directory and returns a receiver
/// for project change events. The watcher must be kept alive.
pub fn start_watching(
    watch_dir: &Path,
) -> Result<(RecommendedWatcher, mpsc::Receiver<WatchEvent>), notify::Error> {
    let (tx, rx) = mpsc::channel();

    let mut watcher =
        notify::recommended_watcher(move |result: Result<Event, notify::Error>| match result {
            Ok(event) => match event.kind {
                EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_) => {
                    for path in event.paths.iter().filter(|p| is_project_file(p)) {
                        tracing::info!("Project file changed: {:?}", path);
                        let _ = tx.send(WatchEvent::ProjectChanged(path.clone()));
                    }
                }
                _ => {}
            },
            Err(e) => {
                tracing::error!("File watcher error: {:?}", e);
            }
        })?;

    watcher.watch(watch_dir, RecursiveMode::Recursive)?;
    tracing::info!("File watcher started on: {:?}", watch_dir);

    Ok((watcher, rx))
}

/// Blocks for the next event, then collects whatever else arrives within
/// `quiet`. Editors tend to emit several events per save. `None` once the
/// watcher is gone.
pub fn next_batch(rx: &mpsc::Receiver<WatchEvent>, quiet: Duration) -> Option<Vec<PathBuf>> {
    let WatchEvent::ProjectChanged(first) = rx.recv().ok()?;
    let mut paths = vec![first];
    while let Ok(WatchEvent::ProjectChanged(path)) = rx.recv_timeout(quiet) {
        if !paths.contains(&path) {
            paths.push(path);
        }
    }
    Some(paths)
}
