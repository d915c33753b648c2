use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::debug;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};
use tokio::io::{AsyncBufReadExt, BufReader};

use scriptbook::browse::{display_name, is_openable, parent_path, tab_title};
use scriptbook::settings::{load_settings, save_settings, settings_path};
use scriptbook::{
    cells, DirEntry, DocumentSnapshot, ExecutionOutcome, HttpSession, NotebookError, Settings,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Run cell-delimited Python scripts on a notebook server")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Override the HTTP server URL
    #[arg(long, global = true)]
    server_url: Option<String>,

    /// Override the push channel URL
    #[arg(long, global = true)]
    channel_url: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List a directory on the server
    Ls {
        /// Directory to list (default: workspace root)
        #[arg(default_value = "")]
        path: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Print a file from the server without opening it
    Cat { path: String },

    /// Show how a local script splits into cells
    Cells {
        file: PathBuf,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Open a script on a fresh kernel and run cells
    Run {
        path: String,

        /// Cell index to run; repeat to run several in order
        #[arg(long = "cell", short = 'c')]
        cells: Vec<usize>,

        /// Run the whole script as one program
        #[arg(long, conflicts_with = "cells")]
        all: bool,

        /// Shut the kernel down afterwards
        #[arg(long)]
        shutdown: bool,
    },

    /// Upload local *.py files into the server workspace
    Push { dir: PathBuf },

    /// Show the effective settings
    Config {
        /// Write the effective settings to the settings file
        #[arg(long)]
        save: bool,
    },

    /// Interactive session
    Shell,
}

#[derive(Tabled)]
struct EntryRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "PATH")]
    path: String,
    #[tabled(rename = "OPENABLE")]
    openable: String,
}

impl From<&DirEntry> for EntryRow {
    fn from(entry: &DirEntry) -> Self {
        EntryRow {
            name: display_name(entry),
            path: entry.path.clone(),
            openable: if !entry.is_dir && is_openable(&entry.path) {
                "yes".to_string()
            } else {
                "-".to_string()
            },
        }
    }
}

#[derive(Tabled)]
struct CellRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "EXEC")]
    execution: String,
    #[tabled(rename = "SOURCE")]
    source: String,
    #[tabled(rename = "OUTPUT")]
    output: String,
}

#[derive(Serialize)]
struct SplitCell<'a> {
    index: usize,
    source: &'a str,
}

/// Shorten multi-line text to its first line for table display.
fn first_line(text: &str, max_len: usize) -> String {
    let mut lines = text.lines();
    let first = lines.next().unwrap_or("");
    let more = lines.next().is_some();
    let mut shown: String = first.chars().take(max_len).collect();
    if more || first.chars().count() > max_len {
        shown.push_str("...");
    }
    shown
}

fn effective_settings(cli: &Cli) -> Settings {
    let mut settings = load_settings();
    if let Some(url) = &cli.server_url {
        settings.server_url = url.clone();
    }
    if let Some(url) = &cli.channel_url {
        settings.channel_url = url.clone();
    }
    settings
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    let settings = effective_settings(&cli);
    debug!("[settings] Using {:?}", settings);

    match cli.command {
        Commands::Ls { path, json } => {
            let session = HttpSession::from_settings(&settings)?;
            let entries = session.list_dir(&path).await?;
            print_entries(&entries, json)?;
        }
        Commands::Cat { path } => {
            let session = HttpSession::from_settings(&settings)?;
            print!("{}", session.read_file(&path).await?);
        }
        Commands::Cells { file, json } => split_local(&file, json)?,
        Commands::Run {
            path,
            cells,
            all,
            shutdown,
        } => {
            let session = HttpSession::from_settings(&settings)?;
            run_script(&session, &path, &cells, all).await?;
            if shutdown {
                session.shutdown_active().await?;
            }
        }
        Commands::Push { dir } => {
            let session = HttpSession::from_settings(&settings)?;
            let count = session.push_sources(&dir).await?;
            println!("Pushed {} files from {}", count, dir.display());
        }
        Commands::Config { save } => {
            settings.validate()?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
            if save {
                save_settings(&settings)?;
                println!("Saved to {}", settings_path().display());
            }
        }
        Commands::Shell => {
            let session = HttpSession::from_settings(&settings)?;
            Shell::new(session).run().await?;
        }
    }

    Ok(())
}

fn print_entries(entries: &[DirEntry], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(entries)?);
    } else if entries.is_empty() {
        println!("Empty directory.");
    } else {
        let rows: Vec<EntryRow> = entries.iter().map(EntryRow::from).collect();
        println!("{}", Table::new(rows).with(Style::rounded()));
    }
    Ok(())
}

fn split_local(file: &Path, json: bool) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let sources = cells::split(&text);
    if json {
        let cells: Vec<SplitCell<'_>> = sources
            .iter()
            .enumerate()
            .map(|(index, source)| SplitCell { index, source })
            .collect();
        println!("{}", serde_json::to_string_pretty(&cells)?);
        return Ok(());
    }
    println!(
        "{} markers, {} cells",
        cells::count_markers(&text),
        sources.len()
    );
    for (index, source) in sources.iter().enumerate() {
        println!("{} [{}]", cells::CELL_MARKER, index);
        println!("{}", source);
    }
    Ok(())
}

fn print_snapshot(snapshot: &DocumentSnapshot) {
    let rows: Vec<CellRow> = snapshot
        .cells
        .iter()
        .enumerate()
        .map(|(index, cell)| CellRow {
            index,
            execution: cell
                .execution_count
                .map(|n| format!("[{}]", n))
                .unwrap_or_else(|| "[ ]".to_string()),
            source: first_line(&cell.source, 40),
            output: cell
                .output
                .as_deref()
                .map(|out| first_line(out, 40))
                .unwrap_or_default(),
        })
        .collect();
    let marker = if snapshot.dirty { " *" } else { "" };
    println!("{}{} (kernel {})", tab_title(&snapshot.path), marker, snapshot.kernel_id);
    println!("{}", Table::new(rows).with(Style::rounded()));
}

fn print_outcome(outcome: &ExecutionOutcome) {
    match outcome {
        ExecutionOutcome::Executed {
            execution_count,
            output,
            ..
        } => {
            let text = output.render();
            if text.is_empty() {
                println!("[{}]", execution_count);
            } else {
                println!("[{}] {}", execution_count, text);
            }
        }
        ExecutionOutcome::Stale { target } => {
            println!("Discarded a stale result for {}", target.path);
        }
        ExecutionOutcome::Skipped => println!("Nothing to run."),
    }
}

/// Print execute failures the way a cell shows them; pass others through.
fn report(result: Result<ExecutionOutcome, NotebookError>) -> Result<()> {
    match result {
        Ok(outcome) => print_outcome(&outcome),
        Err(e @ NotebookError::Execute { .. }) => println!("{}", e),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn run_script(session: &HttpSession, path: &str, indices: &[usize], all: bool) -> Result<()> {
    session.open_file(path).await?;
    let sources: Vec<String> = session
        .active_snapshot()
        .map(|snapshot| snapshot.cells.into_iter().map(|c| c.source).collect())
        .unwrap_or_default();

    if all || indices.is_empty() {
        report(session.run_all(&sources).await)?;
    } else {
        for &idx in indices {
            let Some(source) = sources.get(idx) else {
                bail!("cell {} out of range ({} cells)", idx, sources.len());
            };
            report(session.run_cell(idx, source).await)?;
        }
    }
    if let Some(snapshot) = session.active_snapshot() {
        print_snapshot(&snapshot);
    }
    Ok(())
}

/// Line-oriented front end. Keeps the text the user has typed for each
/// open document, which is what runs and saves operate on.
struct Shell {
    session: HttpSession,
    views: HashMap<String, Vec<String>>,
    cwd: String,
}

const SHELL_HELP: &str = "\
commands:
  ls [PATH]            list a directory (closes open documents)
  cd PATH | cd ..      change the listing directory
  open PATH            open a script or focus its tab
  tabs                 list open documents
  focus PATH           switch to an open document
  show [--json]        show the active document
  edit N TEXT          replace cell N's visible text (\\n for newlines)
  add                  append an empty cell
  run N                run cell N
  runall               run all cells as one program
  save                 save the active document
  stop                 shut down the active kernel and close the document
  quit                 leave the shell";

impl Shell {
    fn new(session: HttpSession) -> Self {
        Self {
            session,
            views: HashMap::new(),
            cwd: String::new(),
        }
    }

    async fn run(mut self) -> Result<()> {
        println!("{}", SHELL_HELP);
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print_prompt(&self.cwd);
            let Some(line) = lines.next_line().await? else {
                break;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if matches!(line, "quit" | "exit") {
                break;
            }
            if let Err(e) = self.dispatch(line).await {
                eprintln!("error: {:#}", e);
            }
        }
        self.session.clear_all().await;
        Ok(())
    }

    async fn dispatch(&mut self, line: &str) -> Result<()> {
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        match command {
            "help" => println!("{}", SHELL_HELP),
            "ls" => {
                let path = if rest.is_empty() { self.cwd.clone() } else { rest.to_string() };
                let entries = self.session.list_dir(&path).await?;
                self.views.clear();
                print_entries(&entries, false)?;
            }
            "cd" => {
                self.cwd = match rest {
                    ".." => parent_path(&self.cwd).to_string(),
                    "" | "/" => String::new(),
                    path => path.trim_end_matches('/').to_string(),
                };
            }
            "open" => {
                if !is_openable(rest) {
                    bail!("only .py files can be opened");
                }
                let outcome = self.session.open_file(rest).await?;
                let snapshot = self.active()?;
                self.views
                    .entry(snapshot.path.clone())
                    .or_insert_with(|| snapshot.cells.iter().map(|c| c.source.clone()).collect());
                println!("{:?} {}", outcome, snapshot.path);
            }
            "tabs" => {
                let active = self.session.active_path().ok();
                for path in self.session.tabs() {
                    let mark = if active.as_deref() == Some(path.as_str()) { "*" } else { " " };
                    println!("{} {}", mark, path);
                }
            }
            "focus" => self.session.focus(rest)?,
            "show" => {
                let snapshot = self.active()?;
                if rest == "--json" {
                    println!("{}", serde_json::to_string_pretty(&snapshot)?);
                } else {
                    print_snapshot(&snapshot);
                }
            }
            "edit" => {
                let (idx, text) = rest.split_once(' ').unwrap_or((rest, ""));
                let idx: usize = idx.parse().context("edit takes a cell index")?;
                let view = self.view_mut()?;
                let len = view.len();
                let cell = view
                    .get_mut(idx)
                    .ok_or(NotebookError::CellOutOfRange { index: idx, len })?;
                *cell = text.replace("\\n", "\n");
            }
            "add" => {
                self.session.insert_cell()?;
                self.view_mut()?.push(String::new());
            }
            "run" => {
                let idx: usize = rest.parse().context("run takes a cell index")?;
                let source = self
                    .view_mut()?
                    .get(idx)
                    .cloned()
                    .unwrap_or_default();
                report(self.session.run_cell(idx, &source).await)?;
            }
            "runall" => {
                let sources = self.view_mut()?.clone();
                report(self.session.run_all(&sources).await)?;
            }
            "save" => {
                let sources = self.view_mut()?.clone();
                self.session.save(&sources).await?;
                println!("Saved {}", self.session.active_path()?);
            }
            "stop" => {
                let path = self.session.active_path()?;
                self.session.shutdown_active().await?;
                self.views.remove(&path);
                println!("Closed {}", path);
            }
            other => bail!("unknown command {:?}; try help", other),
        }
        Ok(())
    }

    fn active(&self) -> Result<DocumentSnapshot> {
        self.session
            .active_snapshot()
            .ok_or_else(|| NotebookError::NoActiveDocument.into())
    }

    /// Visible sources of the active document, seeded from the document.
    fn view_mut(&mut self) -> Result<&mut Vec<String>> {
        let snapshot = self.active()?;
        Ok(self
            .views
            .entry(snapshot.path)
            .or_insert_with(|| snapshot.cells.into_iter().map(|c| c.source).collect()))
    }
}

fn print_prompt(cwd: &str) {
    use std::io::Write;
    print!("scriptbook:/{}> ", cwd);
    let _ = std::io::stdout().flush();
}
