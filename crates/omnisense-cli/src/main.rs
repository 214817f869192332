//! `omnisense-cli` – OmniSense command line interface.
//!
//! This binary is the ignition switch for the obstacle-fusion stack.  It:
//!
//! 1. Loads `~/.omnisense/config.toml`, running a short **first-run wizard**
//!    when the file is absent.
//! 2. Installs structured logging (and OTLP export when configured).
//! 3. Wires the configured sensors and motor controller into a
//!    [`FusionLoop`] and starts it together with the WebSocket bridge.
//! 4. Drops the operator into an **interactive console** (or, with
//!    `--headless`, just waits).
//! 5. On `/quit`, Ctrl-C or SIGTERM raises the shutdown flag; the loop
//!    finishes its cycle and sends a final STOP before the process exits.

mod config;
mod repl;
mod wiring;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use colored::Colorize;
use omnisense_middleware::{EventBus, WsBridge};
use omnisense_runtime::{FusionLoop, init_tracing};
use tracing::{error, info, warn};

fn main() {
    let headless = std::env::args().skip(1).any(|a| a == "--headless");

    let fallback: fn() -> config::Config = if headless {
        config::Config::default
    } else {
        run_first_run_wizard
    };
    let cfg = match config::load_or_else(fallback) {
        Ok(cfg) => cfg,
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    // ── Structured logging ────────────────────────────────────────────────
    let _guard = init_tracing(&cfg.logging);

    print_banner();

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Shutdown requested – stopping the robot …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; use /quit to stop");
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start the async runtime");
            std::process::exit(1);
        }
    };

    // ── Fusion loop ───────────────────────────────────────────────────────
    let bus = Arc::new(EventBus::default());
    let fusion = match wiring::build_loop(&cfg, Arc::clone(&bus)) {
        Ok(fusion) => fusion,
        Err(e) => {
            println!("{}: {}", "Hardware setup failed".red(), e);
            std::process::exit(1);
        }
    };
    let commands = fusion.command_sender();
    print_hardware_summary(&cfg, &fusion);

    let board: repl::StatusBoard = Arc::default();
    runtime.spawn(repl::watch_bus(Arc::clone(&bus), Arc::clone(&board)));
    let loop_task = runtime.spawn(fusion.run(Arc::clone(&shutdown)));

    // ── WebSocket bridge ──────────────────────────────────────────────────
    if cfg.bridge.enabled {
        let bridge = WsBridge::new(Arc::clone(&bus), commands.clone()).with_port(cfg.bridge.port);
        println!(
            "  Snapshot bridge on {}",
            format!("ws://0.0.0.0:{}", cfg.bridge.port).bold()
        );
        runtime.spawn(async move {
            if let Err(e) = bridge.run().await {
                error!(error = %e, "snapshot bridge stopped");
            }
        });
    }

    // ── Operator console ──────────────────────────────────────────────────
    if headless {
        info!("running headless; send SIGINT or SIGTERM to stop");
        while !shutdown.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(100));
        }
    } else {
        println!();
        println!("  Type {} for a list of commands.\n", "/help".bold().cyan());
        repl::run(Arc::clone(&shutdown), commands, board);
        shutdown.store(true, Ordering::SeqCst);
    }

    match runtime.block_on(loop_task) {
        Ok(cycles) => println!("  {} Stopped after {} cycles.", "✓".green().bold(), cycles),
        Err(e) => error!(error = %e, "fusion loop task failed"),
    }
    runtime.shutdown_timeout(Duration::from_millis(500));
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> config::Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║     OmniSense First-Run Wizard       ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set up OmniSense.\n");

    let mut cfg = config::Config::default();

    println!("  Which motor controller should be driven?");
    println!("    1) Simulated controller  (default)");
    println!("    2) Serial controller");
    if prompt_line("  Enter choice [1]: ", "1") == "2" {
        cfg.actuator.driver = config::ActuatorDriver::Serial;
        let port = prompt_line("  Serial device (leave empty to /connect later): ", "");
        cfg.actuator.port = (!port.is_empty()).then_some(port);
    }

    let port_str = prompt_line(
        &format!("  Snapshot bridge WebSocket port [{}]: ", cfg.bridge.port),
        &cfg.bridge.port.to_string(),
    );
    if let Ok(p) = port_str.parse::<u16>() {
        cfg.bridge.port = p;
    }

    let speed_str = prompt_line(
        &format!("  Autonomous base speed [{}]: ", cfg.navigator.base_speed),
        &cfg.navigator.base_speed.to_string(),
    );
    if let Ok(s) = speed_str.parse::<u32>() {
        cfg.navigator.base_speed = s.min(cfg.fusion.max_speed);
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ____                  _ ____                      "#.bold().cyan());
    println!("{}", r#"  / __ \____ ___  ____  (_) __/___  ____  ________   "#.bold().cyan());
    println!("{}", r#" / / / / __ `__ \/ __ \/ /\ \/ _ \/ __ \/ ___/ _ \  "#.bold().cyan());
    println!("{}", r#"/ /_/ / / / / / / / / / /___/  __/ / / (__  )  __/  "#.bold().cyan());
    println!("{}", r#"\____/_/ /_/ /_/_/ /_/_//____/\___/_/ /_/____/\___/ "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "OmniSense".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Dual depth-sensor obstacle fusion");
    println!();
}

fn print_hardware_summary(cfg: &config::Config, fusion: &FusionLoop) {
    for sensor in &cfg.sensors {
        let role = sensor
            .resolved_role()
            .map(|r| r.to_string())
            .unwrap_or_else(|_| "?".to_string());
        println!(
            "  Sensor {} ({}, {:?})",
            sensor.id.bold(),
            role.yellow(),
            sensor.driver
        );
    }
    println!(
        "  Motor controller: {:?}{}",
        cfg.actuator.driver,
        cfg.actuator
            .port
            .as_deref()
            .map(|p| format!(" on {p}"))
            .unwrap_or_default()
    );
    println!(
        "  Mode: {}",
        if fusion.is_autonomous() {
            "autonomous".green()
        } else {
            "manual".yellow()
        }
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::{BufRead, Write};
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
