//! # Retune - Headless Real-Time Pitch Correction Host
//!
//! Runs the pitch correction engine between the default input and output
//! devices and takes commands on stdin.
//!
//! ## Architecture
//! - **Audio Threads**: CPAL input/output callbacks; the engine runs inside
//!   the output callback
//! - **Stdin Thread**: Parses command lines and forwards them over a channel
//! - **Main Thread**: Applies commands through the engine handle and logs
//!   telemetry on a timer
//!
//! ## Usage
//! `retune-host [preset.json]`, then type `help` for commands.

mod audio;

use std::io::BufRead;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use crossbeam_channel::{Receiver, select, tick, unbounded};
use retune_core::{CorrectionMode, Engine, EngineConfig, EngineHandle, EngineParams, Preset};

const TARGET_SAMPLE_RATE: u32 = 44_100;
const TELEMETRY_INTERVAL: Duration = Duration::from_millis(500);

const HELP: &str = "\
commands:
  mode classic|modern     correction character
  speed <0-100>           retune speed (0 = instant)
  humanize <0-100>        pitch jitter amount
  formant <-12..12>       formant shift in semitones
  mix <0-100>             wet percentage
  key <key> [scale...]    e.g. `key A major`, `key F# minor pentatonic`
  bypass on|off
  save <path>             write current settings as a preset
  status                  print settings and meters
  quit";

/// A parsed stdin command.
#[derive(Debug, Clone, PartialEq)]
enum Command {
    Mode(CorrectionMode),
    Speed(f32),
    Humanize(f32),
    Formant(f32),
    Mix(f32),
    Key { key: String, scale: String },
    Bypass(bool),
    Save(String),
    Status,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Result<Command> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        bail!("empty command");
    };
    let rest: Vec<&str> = words.collect();
    let number = || -> Result<f32> {
        rest.first()
            .ok_or_else(|| anyhow!("`{verb}` needs a value"))?
            .parse::<f32>()
            .with_context(|| format!("`{verb}` needs a number"))
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "mode" => match rest.first().map(|m| m.to_ascii_lowercase()).as_deref() {
            Some("classic") => Command::Mode(CorrectionMode::Classic),
            Some("modern") => Command::Mode(CorrectionMode::Modern),
            _ => bail!("mode must be `classic` or `modern`"),
        },
        "speed" => Command::Speed(number()?),
        "humanize" => Command::Humanize(number()?),
        "formant" => Command::Formant(number()?),
        "mix" => Command::Mix(number()?),
        "key" => {
            let key = rest.first().ok_or_else(|| anyhow!("`key` needs a key name"))?;
            let scale = if rest.len() > 1 { rest[1..].join(" ") } else { "chromatic".to_string() };
            Command::Key {
                key: key.to_string(),
                scale,
            }
        }
        "bypass" => match rest.first().copied() {
            Some("on") => Command::Bypass(true),
            Some("off") => Command::Bypass(false),
            _ => bail!("bypass must be `on` or `off`"),
        },
        "save" => Command::Save(
            rest.first()
                .ok_or_else(|| anyhow!("`save` needs a path"))?
                .to_string(),
        ),
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => bail!("unknown command `{other}`, type `help`"),
    };
    Ok(command)
}

/// Spawns the stdin reader. The channel closes on EOF.
fn spawn_command_reader() -> Receiver<Command> {
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match parse_command(&line) {
                Ok(command) => {
                    if tx.send(command).is_err() {
                        break;
                    }
                }
                Err(e) => log::warn!("{e:#}"),
            }
        }
        log::debug!("stdin closed");
    });
    rx
}

/// Applies one command. Returns `false` when the host should exit.
fn apply_command(handle: &EngineHandle, command: Command) -> bool {
    match command {
        Command::Mode(mode) => handle.set_correction_mode(mode),
        Command::Speed(v) => handle.set_retune_speed(v),
        Command::Humanize(v) => handle.set_humanize(v),
        Command::Formant(v) => handle.set_formant_shift(v),
        Command::Mix(v) => handle.set_mix(v),
        Command::Key { key, scale } => {
            if let Err(e) = handle.set_key_and_scale_by_name(&key, &scale) {
                log::error!("`key {key} {scale}`: {e}");
            }
            log_status(handle);
        }
        Command::Bypass(on) => handle.set_bypass(on),
        Command::Save(path) => {
            let preset = Preset::new(preset_name(&path), handle.params());
            match preset.save(&path) {
                Ok(()) => log::info!("saved preset to {path}"),
                Err(e) => log::error!("could not save preset: {e}"),
            }
        }
        Command::Status => log_status(handle),
        Command::Help => println!("{HELP}"),
        Command::Quit => return false,
    }
    true
}

fn preset_name(path: &str) -> String {
    std::path::Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "preset".to_string())
}

fn log_status(handle: &EngineHandle) {
    let params = handle.params();
    log::info!(
        "{:?} | key {} {} | speed {:.0} | humanize {:.0} | formant {:+.1} | mix {:.0}{}",
        params.mode,
        params.key,
        params.scale.name(),
        params.retune_speed,
        params.humanize,
        params.formant_shift,
        params.mix,
        if params.bypass { " | BYPASS" } else { "" }
    );
}

fn log_telemetry(handle: &mut EngineHandle) {
    let history = handle.pitch_history_snapshot();
    let voiced = history.iter().filter(|s| s.input_hz > 0.0).count();

    match (handle.detected_note(), handle.corrected_note()) {
        (Some(detected), Some(target)) => log::info!(
            "in {:7.2} Hz ({detected}) -> {:7.2} Hz ({target}) | err {:+5.1} c | ratio {:.4} | lvl {:.2}/{:.2} | voiced {}/{}",
            handle.detected_frequency(),
            handle.corrected_frequency(),
            handle.pitch_error_cents(),
            handle.current_ratio(),
            handle.input_level(),
            handle.output_level(),
            voiced,
            history.len()
        ),
        _ => log::debug!(
            "unvoiced | lvl {:.2}/{:.2}",
            handle.input_level(),
            handle.output_level()
        ),
    }
}

fn load_params(path: Option<&str>) -> Result<EngineParams> {
    let Some(path) = path else {
        return Ok(EngineParams::default());
    };
    let preset = Preset::load(path).with_context(|| format!("loading preset {path}"))?;
    log::info!("loaded preset \"{}\" from {path}", preset.name);
    Ok(preset.params)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let preset_path = std::env::args().nth(1);
    let params = load_params(preset_path.as_deref())?;

    let setup = audio::negotiate(TARGET_SAMPLE_RATE)?;
    let (engine, mut handle) = Engine::with_params(setup.sample_rate, EngineConfig::default(), &params)?;
    log::info!("engine latency: {} samples", engine.latency());

    let streams = audio::start(setup, engine)?;
    log::info!("running, type `help` for commands");
    log_status(&handle);

    let commands = spawn_command_reader();
    let ticker = tick(TELEMETRY_INTERVAL);
    let mut faults = 0;
    let mut xruns = 0;

    loop {
        select! {
            recv(commands) -> msg => match msg {
                Ok(command) => {
                    if !apply_command(&handle, command) {
                        break;
                    }
                }
                Err(_) => {
                    log::info!("stdin closed, shutting down");
                    break;
                }
            },
            recv(ticker) -> _ => {
                log_telemetry(&mut handle);

                let now = handle.fault_count();
                if now != faults {
                    log::warn!("{} engine fault(s), blocks passed through dry", now - faults);
                    faults = now;
                }
                let now = streams.xruns.load(std::sync::atomic::Ordering::Relaxed);
                if now != xruns {
                    log::warn!("{} buffer under/overrun(s)", now - xruns);
                    xruns = now;
                }
            },
        }
    }

    streams.pause();
    // Let the callbacks finish their current block before the streams drop.
    thread::sleep(Duration::from_millis(50));
    drop(streams);
    Ok(())
}
