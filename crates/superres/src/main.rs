use std::io::BufRead;
use std::path::PathBuf;
use std::thread;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use sequencer::JobOutcome;
use superres::{LogNotifier, Project, RenderControl};

#[derive(Parser)]
#[command(author, version, about = "Render a scene in tiles and merge them into one image")]
struct Arguments {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the tile plan as JSON.
    Plan(ProjectArguments),
    /// Render every tile of the job. Enter stops after the current tile,
    /// `cancel` cancels.
    Render(ProjectArguments),
    /// Merge rendered tiles into the output image.
    Merge(ProjectArguments),
    /// Add one camera per tile to the scene.
    SplitCamera(ProjectArguments),
}

#[derive(Args)]
struct ProjectArguments {
    /// Scene JSON file; tiles and output are written next to it.
    #[arg(long, short = 's', value_parser)]
    scene: PathBuf,
    /// Job settings JSON file.
    #[arg(long, value_parser)]
    settings: Option<PathBuf>,
}

impl ProjectArguments {
    fn open(&self) -> Result<Project> {
        Project::open(&self.scene, self.settings.as_deref())
            .with_context(|| format!("open project {}", self.scene.display()))
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let arguments = Arguments::parse();
    let notifier = LogNotifier;

    match arguments.command {
        Command::Plan(project) => {
            let tiles = project.open()?.plan().context("plan tiles")?;
            let json = serde_json::to_string_pretty(&tiles).context("serialize tile plan")?;
            println!("{json}");
        }
        Command::Render(project) => {
            let mut project = project.open()?;
            let outcome = project
                .render_with_control(&notifier, watch_stdin)
                .context("render tiles")?;
            match outcome {
                JobOutcome::Finished { tiles_done, .. } => {
                    println!("rendered {tiles_done} tiles");
                }
                JobOutcome::Cancelled {
                    tiles_done,
                    tiles_total,
                } => {
                    println!("cancelled after {tiles_done} of {tiles_total} tiles");
                }
            }
        }
        Command::Merge(project) => {
            let output = project.open()?.merge(&notifier).context("merge tiles")?;
            println!("{}", output.display());
        }
        Command::SplitCamera(project) => {
            let names = project
                .open()?
                .split_camera(&notifier)
                .context("split camera")?;
            for name in names {
                println!("{name}");
            }
        }
    }
    Ok(())
}

/// Turns lines typed while rendering into stop requests.
fn watch_stdin(control: RenderControl) {
    let spawned = thread::Builder::new()
        .name("superres-stdin".to_owned())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                let sent = match line.trim() {
                    "cancel" | "c" => control.cancel(),
                    _ => control.stop(),
                };
                if !sent {
                    break;
                }
                log::info!("stop requested, finishing the current tile");
            }
        });
    if let Err(error) = spawned {
        log::warn!("render cannot be stopped from the terminal: {error}");
    }
}
