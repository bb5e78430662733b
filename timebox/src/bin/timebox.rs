// timebox - run a timed session for one task of a Markdown TODO file
//
// Usage: timebox <FILE> [--task <prefix>] [--no-git]

use anyhow::{anyhow, Context, Result};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::thread;
use timebox_lib::clock::{Clock, SystemClock};
use timebox_lib::config::Config;
use timebox_lib::git::{CommitWatcher, GitCli};
use timebox_lib::render::StatusLine;
use timebox_lib::rewrite::{format_elapsed, Completion};
use timebox_lib::session::{SessionEngine, SessionEvent};
use timebox_lib::shutdown::SignalGuard;
use timebox_lib::state::{FileStateStore, StateStore};
use timebox_lib::tracker::{complete_in_file, load_tasks, next_task, TaskTracker};
use tokio::sync::mpsc;

fn print_help() {
    println!(
        r#"timebox - timed sessions for Markdown TODO items

USAGE:
    timebox <FILE> [OPTIONS]

OPTIONS:
    --task, -t <prefix>   Pick the first unchecked task starting with <prefix>
    --no-git              Do not collect commits made during the session
    --help, -h            Show this help

COMMANDS (type and press enter while a session runs):
    p        pause
    r        resume
    d        done (also an empty line)
    q        quit without completing

ENVIRONMENT:
    TIMEBOX_DIR            Ledger directory (default ~/.timebox)
    TIMEBOX_GIT_POLL_SECS  Commit poll interval in seconds (default 5)
    TIMEBOX_NO_GIT         Set to 1 to disable commit collection
    RUST_LOG               Log filter (default warn)

TASK FORMAT:
    - [ ] Write report @1h30m
    - [ ] Standup @[10:00-10:15]"#
    );
}

struct Args {
    file: PathBuf,
    task_key: Option<String>,
    no_git: bool,
}

/// Returns None when help was requested
fn parse_args(args: &[String]) -> Result<Option<Args>> {
    let mut file: Option<PathBuf> = None;
    let mut task_key: Option<String> = None;
    let mut no_git = false;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => return Ok(None),
            "--task" | "-t" => {
                i += 1;
                let key = args
                    .get(i)
                    .ok_or_else(|| anyhow!("--task requires a description prefix"))?;
                task_key = Some(key.clone());
            }
            "--no-git" => no_git = true,
            other if other.starts_with('-') => return Err(anyhow!("Unknown option: {}", other)),
            other => {
                if file.is_some() {
                    return Err(anyhow!("Unexpected argument: {}", other));
                }
                file = Some(PathBuf::from(other));
            }
        }
        i += 1;
    }

    let file = file.ok_or_else(|| anyhow!("Missing TODO file argument"))?;
    Ok(Some(Args {
        file,
        task_key,
        no_git,
    }))
}

#[derive(Debug, Clone, Copy)]
enum UserCommand {
    Pause,
    Resume,
    Done,
    Quit,
}

fn parse_command(line: &str) -> Option<UserCommand> {
    match line.trim() {
        "p" => Some(UserCommand::Pause),
        "r" => Some(UserCommand::Resume),
        "" | "d" => Some(UserCommand::Done),
        "q" => Some(UserCommand::Quit),
        _ => None,
    }
}

/// Forward stdin lines as commands until EOF
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<UserCommand> {
    let (tx, rx) = mpsc::unbounded_channel();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            match parse_command(&line) {
                Some(cmd) => {
                    if tx.send(cmd).is_err() {
                        break;
                    }
                }
                None => eprintln!("\nUnknown command {:?} (p, r, d, q)", line.trim()),
            }
        }
    });
    rx
}

async fn recv_opt<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

enum Outcome {
    Completed,
    Stopped,
}

fn draw(text: &str) {
    let mut stdout = io::stdout();
    let _ = write!(stdout, "{}", text);
    let _ = stdout.flush();
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let raw: Vec<String> = std::env::args().skip(1).collect();
    let Some(args) = parse_args(&raw).inspect_err(|_| print_help())? else {
        print_help();
        return Ok(());
    };

    let mut config = Config::from_env();
    if args.no_git {
        config.git_enabled = false;
    }
    config
        .ensure_dirs()
        .with_context(|| format!("Failed to create {}", config.state_dir().display()))?;

    let entries = load_tasks(&args.file)?;
    let entry = next_task(&entries, args.task_key.as_deref()).ok_or_else(|| {
        anyhow!(
            "No unchecked task with a timebox found in {}",
            args.file.display()
        )
    })?;
    let task = entry.task.clone();
    let target = task
        .timebox_spec()
        .with_context(|| format!("Task \"{}\"", task.description))?
        .resolve_local();
    let hash = task.hash();

    let store: Arc<dyn StateStore> = Arc::new(FileStateStore::from_config(&config));
    let tracker = Arc::new(StdMutex::new(
        TaskTracker::open(store).context("Failed to load ledger")?,
    ));
    let state = tracker
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .state_for(&hash);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let engine = SessionEngine::new(Arc::clone(&clock), target, state, config.tick_interval);
    let mut events = engine
        .take_events()
        .context("Session event stream already taken")?;
    let signals = SignalGuard::install(engine.clone(), Arc::clone(&tracker))
        .context("Failed to install signal handlers")?;

    let record = |engine: &SessionEngine| -> Result<()> {
        tracker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .record(engine.snapshot())
            .context("Failed to save ledger")
    };

    engine.start();
    record(&engine)?;
    println!("Working on: {} {}", task.description, task.timebox);

    let since = engine.snapshot().created_at().unwrap_or_else(|| clock.now());
    let mut watcher = config.git_enabled.then(|| {
        let mut watcher = CommitWatcher::new(Arc::new(GitCli::new()), Arc::clone(&clock));
        watcher.start(since, config.git_poll_interval);
        watcher
    });
    let mut commit_rx = watcher.as_mut().and_then(|w| w.commits());
    let mut error_rx = watcher.as_mut().and_then(|w| w.errors());
    let mut commands = Some(spawn_stdin_reader());
    let mut commits: Vec<String> = Vec::new();
    let mut status = StatusLine::for_terminal();

    let outcome = loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(SessionEvent::Tick { .. }) => {
                    draw(&status.render(&task.description, &engine, false));
                }
                Some(SessionEvent::Paused) => {
                    record(&engine)?;
                    draw(&status.render(&task.description, &engine, true));
                }
                Some(SessionEvent::Resumed) => {
                    record(&engine)?;
                    draw(&status.render(&task.description, &engine, false));
                }
                Some(SessionEvent::Completed) => break Outcome::Completed,
                Some(SessionEvent::Stopped) | None => break Outcome::Stopped,
            },
            cmd = recv_opt(&mut commands) => match cmd {
                Some(UserCommand::Pause) => { engine.pause(); }
                Some(UserCommand::Resume) => { engine.resume(); }
                Some(UserCommand::Done) => { engine.complete(); }
                Some(UserCommand::Quit) => { engine.stop(); }
                // stdin closed; keep running until the timer ends
                None => commands = None,
            },
            commit = recv_opt(&mut commit_rx) => match commit {
                Some(commit) => commits.push(commit),
                None => commit_rx = None,
            },
            err = recv_opt(&mut error_rx) => match err {
                Some(err) => log::warn!("Commit watcher: {}", err),
                None => error_rx = None,
            },
        }
    };

    draw(&status.clear());
    let elapsed = engine.total_elapsed();
    record(&engine)?;

    // Signals keep flushing the ledger through the final poll and rewrite
    let result = match outcome {
        Outcome::Stopped => {
            if let Some(watcher) = &watcher {
                watcher.stop();
            }
            println!(
                "Stopped \"{}\" after {}; time kept for next run",
                task.description,
                format_elapsed(elapsed)
            );
            Ok(())
        }
        Outcome::Completed => {
            if let Some(watcher) = watcher.take() {
                watcher.stop();
                match watcher.poll_once().await {
                    Ok(fresh) => commits.extend(fresh),
                    Err(e) => log::warn!("Final commit poll failed: {}", e),
                }
            }
            if let Some(rx) = commit_rx.as_mut() {
                while let Ok(commit) = rx.try_recv() {
                    commits.push(commit);
                }
            }

            let completion = Completion {
                task_hash: hash,
                elapsed,
                commits,
            };
            let mut tracker = tracker
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match complete_in_file(&mut tracker, &args.file, &completion) {
                Ok(_) => {
                    println!(
                        "Completed \"{}\" in {} ({} commit(s))",
                        task.description,
                        format_elapsed(elapsed),
                        completion.commits.len()
                    );
                    Ok(())
                }
                Err(e) if e.is_task_missing() => {
                    eprintln!(
                        "Task \"{}\" is no longer in {}; time kept in the ledger",
                        task.description,
                        args.file.display()
                    );
                    Ok(())
                }
                Err(e) => Err(e).context("Failed to update TODO file"),
            }
        }
    };
    signals.stop();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args() {
        let parsed = parse_args(&args(&["todo.md", "--task", "write", "--no-git"]))
            .unwrap()
            .unwrap();
        assert_eq!(parsed.file, PathBuf::from("todo.md"));
        assert_eq!(parsed.task_key.as_deref(), Some("write"));
        assert!(parsed.no_git);

        assert!(parse_args(&args(&["--help"])).unwrap().is_none());
        assert!(parse_args(&args(&[])).is_err());
        assert!(parse_args(&args(&["a.md", "b.md"])).is_err());
        assert!(parse_args(&args(&["a.md", "--task"])).is_err());
        assert!(parse_args(&args(&["a.md", "--bogus"])).is_err());
    }

    #[test]
    fn test_parse_command() {
        assert!(matches!(parse_command("p"), Some(UserCommand::Pause)));
        assert!(matches!(parse_command(" r "), Some(UserCommand::Resume)));
        assert!(matches!(parse_command(""), Some(UserCommand::Done)));
        assert!(matches!(parse_command("d"), Some(UserCommand::Done)));
        assert!(matches!(parse_command("q"), Some(UserCommand::Quit)));
        assert!(parse_command("x").is_none());
    }
}
