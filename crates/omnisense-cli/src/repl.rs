//! REPL – the operator console.
//!
//! Supported slash-commands:
//!   /auto on [speed]       – enable autonomous navigation
//!   /auto off              – back to manual control (sends STOP)
//!   /speed <n>             – set the autonomous base speed
//!   /move <dir> [speed]    – manual drive (forward, backward, left, right, rotate, stop)
//!   /raw <m1> <m2> <m3>    – manual drive with raw wheel values
//!   /connect <port>        – attach the motor controller
//!   /ports                 – list serial ports a controller could use
//!   /status                – print the latest snapshot
//!   /schema                – print the JSON Schema of bridge commands
//!   /quit | /exit          – stop the robot and exit

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use colored::Colorize;
use omnisense_middleware::{EventBus, Topic};
use omnisense_types::{Direction, EventPayload, OperatorCommand, Snapshot, command_schema};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;

/// What the console knows about the running loop.
#[derive(Debug, Default)]
pub struct Board {
    pub snapshot: Option<Snapshot>,
    /// Last reply to a port listing.
    pub ports: Option<Vec<String>>,
    /// Port of the attached controller as last acknowledged.
    pub link: Option<String>,
}

pub type StatusBoard = Arc<Mutex<Board>>;

fn board_guard(board: &StatusBoard) -> MutexGuard<'_, Board> {
    board.lock().unwrap_or_else(|p| p.into_inner())
}

/// Keep `board` updated from the snapshot and status lanes.  Runs until the
/// bus is dropped.
pub async fn watch_bus(bus: Arc<EventBus>, board: StatusBoard) {
    let mut snapshots = bus.subscribe_to(Topic::Snapshots);
    let mut status = bus.subscribe_to(Topic::Status);
    loop {
        let res = tokio::select! {
            res = snapshots.recv() => res,
            res = status.recv() => res,
        };
        let event = match res {
            Ok(event) => event,
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        };
        let mut slot = board_guard(&board);
        match event.payload {
            EventPayload::Snapshot(snapshot) => slot.snapshot = Some(*snapshot),
            EventPayload::PortsList { ports } => slot.ports = Some(ports),
            EventPayload::SerialStatus { connected, port } => {
                slot.link = if connected { port } else { None };
            }
            _ => {}
        }
    }
}

/// One parsed console line.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleAction {
    Send(OperatorCommand),
    Ports,
    Status,
    Schema,
    Help,
    Quit,
}

/// Parse one console line.  The error is a message for the operator.
pub fn parse_line(line: &str) -> Result<ConsoleAction, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Err("empty command".to_string());
    };
    let args: Vec<&str> = words.collect();

    let action = match (head, args.as_slice()) {
        ("/help", []) => ConsoleAction::Help,
        ("/status", []) => ConsoleAction::Status,
        ("/ports", []) => ConsoleAction::Ports,
        ("/schema", []) => ConsoleAction::Schema,
        ("/quit" | "/exit", []) => ConsoleAction::Quit,
        ("/auto", ["on"]) => ConsoleAction::Send(OperatorCommand::SetAutonomous {
            enabled: true,
            speed: None,
        }),
        ("/auto", ["on", speed]) => ConsoleAction::Send(OperatorCommand::SetAutonomous {
            enabled: true,
            speed: Some(speed_arg(speed)?),
        }),
        ("/auto", ["off"]) => ConsoleAction::Send(OperatorCommand::SetAutonomous {
            enabled: false,
            speed: None,
        }),
        ("/speed", [speed]) => ConsoleAction::Send(OperatorCommand::SetAutonomousSpeed {
            speed: speed_arg(speed)?,
        }),
        ("/move", [dir, rest @ ..]) if rest.len() <= 1 => {
            let direction: Direction = dir.parse().map_err(|e| format!("{e}"))?;
            let speed = match rest {
                [speed] => speed_arg(speed)?,
                _ => 150,
            };
            ConsoleAction::Send(OperatorCommand::Move { direction, speed })
        }
        ("/raw", [m1, m2, m3]) => ConsoleAction::Send(OperatorCommand::MoveRaw {
            m1: wheel_arg(m1)?,
            m2: wheel_arg(m2)?,
            m3: wheel_arg(m3)?,
        }),
        ("/connect", [port]) => ConsoleAction::Send(OperatorCommand::ConnectSerial {
            port: port.to_string(),
        }),
        _ => return Err(format!("unknown command '{}'", line.trim())),
    };
    Ok(action)
}

fn speed_arg(s: &str) -> Result<u32, String> {
    s.parse().map_err(|_| format!("'{s}' is not a speed"))
}

fn wheel_arg(s: &str) -> Result<i32, String> {
    s.parse().map_err(|_| format!("'{s}' is not a wheel value"))
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits.  Ctrl-C and
/// Ctrl-D at the prompt raise it.
pub fn run(shutdown: Arc<AtomicBool>, commands: mpsc::Sender<OperatorCommand>, board: StatusBoard) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("{}: {}", "Console unavailable".red(), e);
            return;
        }
    };

    while !shutdown.load(Ordering::SeqCst) {
        let line = match editor.readline(&format!("{} ", "omnisense>".bold().cyan())) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => {
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(line.as_str());

        match parse_line(&line) {
            Ok(ConsoleAction::Send(cmd)) => {
                if commands.blocking_send(cmd).is_err() {
                    println!("{}", "Fusion loop is not running.".red());
                    break;
                }
                println!("  {}", "✓ sent".green());
            }
            Ok(ConsoleAction::Ports) => cmd_ports(&commands, &board),
            Ok(ConsoleAction::Status) => cmd_status(&board),
            Ok(ConsoleAction::Schema) => cmd_schema(),
            Ok(ConsoleAction::Help) => cmd_help(),
            Ok(ConsoleAction::Quit) => {
                println!("{}", "Stopping the robot.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Err(msg) => println!(
                "{} {}. Type {} for available commands.",
                "Error:".red(),
                msg.yellow(),
                "/help".bold()
            ),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "OmniSense Commands".bold().underline());
    println!("  {}  – enable autonomous navigation", "/auto on [speed]".bold().cyan());
    println!("  {}         – manual control, robot stops", "/auto off".bold().cyan());
    println!("  {}        – set the autonomous base speed", "/speed <n>".bold().cyan());
    println!("  {} – manual drive", "/move <dir> [speed]".bold().cyan());
    println!("  {}  – raw wheel values", "/raw <m1> <m2> <m3>".bold().cyan());
    println!("  {}    – attach the motor controller", "/connect <port>".bold().cyan());
    println!("  {}            – list serial ports", "/ports".bold().cyan());
    println!("  {}           – latest snapshot", "/status".bold().cyan());
    println!("  {}           – bridge command schema", "/schema".bold().cyan());
    println!("  {}     – stop and exit", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_ports(commands: &mpsc::Sender<OperatorCommand>, board: &StatusBoard) {
    board_guard(board).ports = None;
    if commands.blocking_send(OperatorCommand::ListPorts).is_err() {
        println!("{}", "Fusion loop is not running.".red());
        return;
    }
    let deadline = Instant::now() + Duration::from_secs(1);
    while Instant::now() < deadline {
        if let Some(ports) = board_guard(board).ports.take() {
            if ports.is_empty() {
                println!("  {}", "No serial ports found.".dimmed());
            }
            for port in ports {
                println!("  {}", port.bold());
            }
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    println!("  {}", "No reply from the fusion loop.".yellow());
}

fn cmd_status(board: &StatusBoard) {
    let guard = board_guard(board);
    if let Some(port) = &guard.link {
        println!("  Serial port  : {}", port.bold());
    }
    let Some(snap) = guard.snapshot.as_ref() else {
        println!("  {}", "No snapshot yet.".dimmed());
        return;
    };

    let on_off = |b: bool| if b { "yes".green() } else { "no".yellow() };
    println!("{}", format!("Cycle {}", snap.cycle).bold().underline());
    println!("  Cycle time   : {:.1} ms", snap.cycle_time_ms);
    println!("  Autonomous   : {}", on_off(snap.mode.autonomous));
    println!("  Controller   : {}", on_off(snap.mode.actuator_connected));
    println!("  Moving       : {}", on_off(snap.mode.robot_moving));

    let decision = &snap.navigation_decision;
    println!(
        "  Decision     : {} @ {}",
        decision.direction.to_string().bold(),
        decision.speed
    );
    if let Some(d) = &decision.diagnostics {
        println!(
            "  Fused        : L {:.2} m  C {:.2} m  R {:.2} m  ({:?}, {:?})",
            d.distances.left, d.distances.center, d.distances.right, d.mode, d.state
        );
        if d.safe_stop {
            println!("  {}", "SAFE STOP: sensor failures".red().bold());
        }
    }
    for (id, report) in &snap.obstacle_reports {
        let mark = |blocked: bool| if blocked { "■".red() } else { "□".green() };
        println!(
            "  {:<12} : {} {} {}",
            id,
            mark(report.left.blocked),
            mark(report.center.blocked),
            mark(report.right.blocked)
        );
    }
    println!("  Tracks       : {}", snap.tracked_objects.len());
    for obj in &snap.tracked_objects {
        println!(
            "    #{} {} at ({:.0}, {:.0}) px, {:.2} m",
            obj.id, obj.sensor, obj.centroid.x, obj.centroid.y, obj.depth_m
        );
    }
}

fn cmd_schema() {
    match serde_json::to_string_pretty(&command_schema()) {
        Ok(json) => println!("{json}"),
        Err(e) => println!("{}: {}", "Schema error".red(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send(line: &str) -> OperatorCommand {
        match parse_line(line) {
            Ok(ConsoleAction::Send(cmd)) => cmd,
            other => panic!("expected a command for {line:?}, got {other:?}"),
        }
    }

    #[test]
    fn auto_variants() {
        assert_eq!(
            send("/auto on"),
            OperatorCommand::SetAutonomous {
                enabled: true,
                speed: None
            }
        );
        assert_eq!(
            send("/auto on 120"),
            OperatorCommand::SetAutonomous {
                enabled: true,
                speed: Some(120)
            }
        );
        assert_eq!(
            send("  /auto   off "),
            OperatorCommand::SetAutonomous {
                enabled: false,
                speed: None
            }
        );
        assert!(parse_line("/auto maybe").is_err());
    }

    #[test]
    fn move_defaults_speed() {
        assert_eq!(
            send("/move forward"),
            OperatorCommand::Move {
                direction: Direction::Forward,
                speed: 150
            }
        );
        assert_eq!(
            send("/move rotate_right 60"),
            OperatorCommand::Move {
                direction: Direction::Rotate,
                speed: 60
            }
        );
        assert!(parse_line("/move sideways").is_err());
        assert!(parse_line("/move left fast").is_err());
    }

    #[test]
    fn raw_speed_and_connect() {
        assert_eq!(send("/raw 10 -20 30"), OperatorCommand::MoveRaw { m1: 10, m2: -20, m3: 30 });
        assert!(parse_line("/raw 1 2").is_err());
        assert_eq!(send("/speed 90"), OperatorCommand::SetAutonomousSpeed { speed: 90 });
        assert!(parse_line("/speed -5").is_err());
        assert_eq!(
            send("/connect /dev/ttyACM0"),
            OperatorCommand::ConnectSerial {
                port: "/dev/ttyACM0".to_string()
            }
        );
    }

    #[test]
    fn local_actions() {
        assert_eq!(parse_line("/status"), Ok(ConsoleAction::Status));
        assert_eq!(parse_line("/ports"), Ok(ConsoleAction::Ports));
        assert_eq!(parse_line("/schema"), Ok(ConsoleAction::Schema));
        assert_eq!(parse_line("/help"), Ok(ConsoleAction::Help));
        assert_eq!(parse_line("/exit"), Ok(ConsoleAction::Quit));
        assert!(parse_line("/start").is_err());
        assert!(parse_line("").is_err());
    }

    #[tokio::test]
    async fn board_tracks_the_latest_snapshot() {
        use omnisense_hal::sim::{SimRegistry, SimScene};
        use omnisense_runtime::{FusionLoop, LoopConfig};
        use omnisense_types::SensorRole;

        let bus = Arc::new(EventBus::default());
        let board: StatusBoard = Arc::default();
        tokio::spawn(watch_bus(Arc::clone(&bus), Arc::clone(&board)));
        while bus.subscriber_count(Topic::Snapshots) == 0 {
            tokio::task::yield_now().await;
        }

        let (hardware, _handles) = SimRegistry::builder()
            .with_sensor("floor", SensorRole::Floor, SimScene::open())
            .build();
        let mut fusion = FusionLoop::new(LoopConfig::default(), hardware, Arc::clone(&bus));
        fusion.run_cycle().await;
        fusion.run_cycle().await;

        for _ in 0..100 {
            let cycle = board.lock().unwrap().snapshot.as_ref().map(|s| s.cycle);
            if cycle == Some(2) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("status board never saw cycle 2");
    }

    #[tokio::test]
    async fn board_records_ports_and_link() {
        let bus = Arc::new(EventBus::default());
        let board: StatusBoard = Arc::default();
        tokio::spawn(watch_bus(Arc::clone(&bus), Arc::clone(&board)));
        while bus.subscriber_count(Topic::Status) == 0 {
            tokio::task::yield_now().await;
        }

        let ports = vec!["/dev/ttyACM0".to_string()];
        bus.publish_status("test", EventPayload::PortsList { ports });
        bus.publish_status(
            "test",
            EventPayload::SerialStatus {
                connected: true,
                port: Some("/dev/ttyACM0".to_string()),
            },
        );

        for _ in 0..100 {
            {
                let b = board.lock().unwrap();
                if b.ports.is_some() && b.link.is_some() {
                    assert_eq!(b.ports.as_deref(), Some(&["/dev/ttyACM0".to_string()][..]));
                    assert_eq!(b.link.as_deref(), Some("/dev/ttyACM0"));
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("status board never saw the port list");
    }
}
