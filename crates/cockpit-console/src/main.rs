use std::io::BufRead;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use crossbeam_channel::{Receiver, TryRecvError};

use cockpit_console::audio::{AutoplayPolicy, ScopeFeed};
use cockpit_console::command::HELP;
use cockpit_console::web::WebSystem;
use cockpit_console::{CommandOutcome, Console, ConsoleCommand, ConsoleConfig};

/// ~60Hz console frame.
const FRAME: Duration = Duration::from_millis(16);

#[derive(Default)]
struct Args {
    config: Option<PathBuf>,
    no_web: bool,
    allow_autoplay: bool,
    write_config: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter.next().context("--config needs a path")?;
                args.config = Some(PathBuf::from(path));
            }
            "--no-web" => args.no_web = true,
            "--allow-autoplay" => args.allow_autoplay = true,
            "--write-config" => args.write_config = true,
            "--help" | "-h" => {
                println!(
                    "usage: cockpit-console [--config <path>] [--no-web] [--allow-autoplay] [--write-config]"
                );
                std::process::exit(0);
            }
            other => bail!("unknown argument '{other}'"),
        }
    }
    Ok(args)
}

fn spawn_stdin_reader() -> Result<Receiver<String>> {
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::Builder::new()
        .name("cockpit-stdin".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("failed to spawn stdin reader")?;
    Ok(rx)
}

/// Apply one command. Returns `false` on quit.
fn run_command(console: &mut Console, command: ConsoleCommand) -> bool {
    // Any operator or HUD input counts as a user gesture
    console.gesture();
    match console.apply(command) {
        CommandOutcome::Continue => true,
        CommandOutcome::Reply(text) => {
            println!("{text}");
            true
        }
        CommandOutcome::Quit => false,
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = parse_args()?;
    let mut config = match args.config {
        Some(ref path) => ConsoleConfig::load_from(path),
        None => ConsoleConfig::load(),
    };
    if args.write_config {
        match args.config {
            Some(ref path) => config.save_to(path),
            None => config.save(),
        }
    }
    if args.allow_autoplay {
        config.autoplay = AutoplayPolicy::Allowed;
    }
    if args.no_web {
        config.web.enabled = false;
    }

    let mut console = Console::new(&config);
    let mut web = WebSystem::new(config.web.clone());
    let mut scope = ScopeFeed::new(config.analyser.sanitized().fft_size / 2);
    let lines = spawn_stdin_reader()?;
    let mut stdin_open = true;

    println!("{HELP}");
    let start = Instant::now();
    let mut last_toast = 0u64;

    'frames: loop {
        while stdin_open {
            match lines.try_recv() {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match line.parse::<ConsoleCommand>() {
                        Ok(command) => {
                            if !run_command(&mut console, command) {
                                break 'frames;
                            }
                        }
                        Err(e) => println!("{e}. {HELP}"),
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    stdin_open = false;
                    if !web.is_running() {
                        break 'frames;
                    }
                    log::info!("stdin closed, continuing with HUD commands only");
                }
            }
        }

        for command in web.update() {
            if !run_command(&mut console, command) {
                break 'frames;
            }
        }

        console.update();

        let state = console.store().snapshot();
        for toast in state.toasts.iter().filter(move |t| t.id > last_toast) {
            println!("[{:?}] {}", toast.level, toast.text);
            last_toast = toast.id;
        }

        let frame = scope.frame(&console.runtime().registry, start.elapsed().as_secs_f64());
        web.broadcast_audio(&frame, &scope);
        web.update_latest_state(&state);

        thread::sleep(FRAME);
    }

    log::info!("Shutting down");
    console.stop();
    console.settle(Duration::from_secs(2));
    Ok(())
}
