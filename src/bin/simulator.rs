use clap::{App, Arg};
use colored::*;
use obc::comm::{CommStats, FrameType, BEACON_REQUEST_COMMAND};
use obc::config::MissionConfig;
use obc::mission::{shared, Shared};
use obc::obc::{Obc, ObcDevices};
use obc::devices::{PowerControl, ScrubbingStatus};
use obc::simulation::{
    SimulatedAdcs, SimulatedAntenna, SimulatedClock, SimulatedEps, SimulatedFram, SimulatedTransceiver,
};
use obc::state::SystemState;
use obc::tasks::Beacon;
use obc::transport::StdDelay;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time;
use tracing::{debug, error, info, warn, Level};

const DEFAULT_PORT: &str = "8080";
const DEFAULT_TIME_STEP_S: &str = "10";
const DEFAULT_INTERVAL_MS: &str = "1000";
const STATE_BROADCAST_BUFFER_SIZE: usize = 256;

type SimulatedObc = Obc<SimulatedTransceiver, StdDelay>;

/// Any command byte other than the beacon request asks for a reboot.
const REBOOT_COMMAND: u8 = 0x01;

/// Requests accepted from TCP clients, one JSON object per line.
#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
enum GroundCommand {
    SendBeacon,
    Reboot,
    OpenSail,
    SetTime { seconds: u64 },
    Uplink {
        #[serde(with = "serde_bytes")]
        frame: Vec<u8>,
    },
}

#[derive(Serialize)]
struct StateSnapshot<'a> {
    cycle: u64,
    state: &'a SystemState,
    executed: &'a [&'static str],
    request: FrameType,
    downlinked_frames: usize,
    comm: &'a CommStats,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("obc-simulator")
        .version("0.1.0")
        .author("Space Systems Engineering Team")
        .about("🛰️  On-board computer mission loop running against simulated hardware")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Mission configuration (JSON)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("cycles")
                .short("n")
                .long("cycles")
                .value_name("COUNT")
                .help("Number of mission cycles to run, 0 runs until interrupted")
                .takes_value(true)
                .default_value("0")
                .validator(|v| v.parse::<u64>().map(|_| ()).map_err(|_| "Cycle count must be a number".into())),
        )
        .arg(
            Arg::with_name("time-step")
                .short("t")
                .long("time-step")
                .value_name("SECONDS")
                .help("Mission time advanced per cycle")
                .takes_value(true)
                .default_value(DEFAULT_TIME_STEP_S)
                .validator(|v| v.parse::<u64>().map(|_| ()).map_err(|_| "Time step must be a number".into())),
        )
        .arg(
            Arg::with_name("interval")
                .short("i")
                .long("interval")
                .value_name("MILLISECONDS")
                .help("Wall-clock time between cycles")
                .takes_value(true)
                .default_value(DEFAULT_INTERVAL_MS)
                .validator(|v| match v.parse::<u64>() {
                    Ok(0) | Err(_) => Err("Interval must be a positive number".into()),
                    Ok(_) => Ok(()),
                }),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("TCP port for state streaming and ground commands")
                .takes_value(true)
                .default_value(DEFAULT_PORT),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Log every executed action"),
        )
        .get_matches();

    if matches.is_present("verbose") {
        tracing_subscriber::fmt().with_max_level(Level::DEBUG).init();
    } else {
        tracing_subscriber::fmt::init();
    }

    let config = match matches.value_of("config") {
        Some(path) => MissionConfig::load(path)?,
        None => MissionConfig::default(),
    };
    let cycles: u64 = matches.value_of("cycles").unwrap_or("0").parse()?;
    let time_step = Duration::from_secs(matches.value_of("time-step").unwrap_or(DEFAULT_TIME_STEP_S).parse()?);
    let interval_ms: u64 = matches.value_of("interval").unwrap_or(DEFAULT_INTERVAL_MS).parse()?;
    let port: u16 = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse()?;

    println!("{}", "🛰️  OBC Mission Simulator".bright_cyan().bold());
    println!("{}", "=========================".bright_cyan());
    println!("  cycle period : {} ms", config.cycle_period_ms);
    println!("  time step    : {} s", time_step.as_secs());
    println!("  state stream : 127.0.0.1:{}", port);

    let clock = SimulatedClock::default();
    let rtc = SimulatedClock::default();
    let transceiver = SimulatedTransceiver::new();
    let eps = SimulatedEps::new();
    let power: Shared<dyn PowerControl> = shared(eps.clone());

    let devices = ObcDevices {
        comm_bus: transceiver.clone(),
        comm_delay: StdDelay,
        clock: Box::new(clock.clone()),
        rtc: Some(Box::new(rtc.clone())),
        antenna: Box::new(SimulatedAntenna::new()),
        adcs: shared(SimulatedAdcs::new()),
        power,
        storage: Box::new(SimulatedFram::new()),
        scrubbing: Arc::new(ScrubbingStatus::new()),
    };
    let mut obc = Obc::new(devices, &config)?;

    let (state_tx, _) = broadcast::channel(STATE_BROADCAST_BUFFER_SIZE);
    let (command_tx, mut command_rx) = mpsc::unbounded_channel();

    let tcp_state_tx = state_tx.clone();
    let tcp_server = tokio::spawn(async move {
        if let Err(e) = start_tcp_server(port, tcp_state_tx, command_tx).await {
            error!("TCP server error: {}", e);
        }
    });

    let mut interval = time::interval(Duration::from_millis(interval_ms));

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }

        while let Ok(command) = command_rx.try_recv() {
            apply_ground_command(&obc, &transceiver, &config, command);
        }

        clock.advance(time_step);
        rtc.advance(time_step);
        let (report, request) = obc.step();

        let downlinked = transceiver.transmit_all();
        for frame in &downlinked {
            match Beacon::decode(frame) {
                Ok(beacon) => info!(
                    callsign = %String::from_utf8_lossy(&beacon.callsign),
                    timestamp_ms = beacon.timestamp_ms,
                    "📡 beacon downlinked"
                ),
                Err(e) => warn!("undecodable downlink frame: {}", e),
            }
        }

        let json = {
            let comm = obc.comm();
            let snapshot = StateSnapshot {
                cycle: report.cycle,
                state: obc.state(),
                executed: &report.executed,
                request,
                downlinked_frames: downlinked.len(),
                comm: comm.stats(),
            };
            serde_json::to_string(&snapshot)?
        };

        if state_tx.send(json).is_err() {
            debug!("no clients connected");
        }

        if !report.executed.is_empty() {
            info!(cycle = report.cycle, actions = ?report.executed.as_slice(), "cycle");
        }

        if cycles != 0 && report.cycle >= cycles {
            break;
        }
    }

    tcp_server.abort();
    println!("{}", format!("🚀 Simulator stopped after {} cycles", obc.cycle_count()).bright_green());

    Ok(())
}

fn apply_ground_command(
    obc: &SimulatedObc,
    transceiver: &SimulatedTransceiver,
    config: &MissionConfig,
    command: GroundCommand,
) {
    info!("📨 ground command: {:?}", command);
    match command {
        GroundCommand::SendBeacon => transceiver.uplink_command(config.security_code, BEACON_REQUEST_COMMAND),
        GroundCommand::Reboot => transceiver.uplink_command(config.security_code, REBOOT_COMMAND),
        GroundCommand::Uplink { frame } => transceiver.uplink(&frame),
        GroundCommand::OpenSail => {
            if !obc.request_sail_deploy() {
                warn!("sail opening in progress, request held for the next update");
            }
        }
        GroundCommand::SetTime { seconds } => {
            if !obc.set_time(Duration::from_secs(seconds)) {
                warn!("time change rejected");
            }
        }
    }
}

async fn start_tcp_server(
    port: u16,
    state_tx: broadcast::Sender<String>,
    command_tx: mpsc::UnboundedSender<GroundCommand>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    info!("🌐 TCP server listening on port {}", port);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("🔗 New client connected: {}", addr);
                let state_rx = state_tx.subscribe();
                let client_commands = command_tx.clone();

                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, state_rx, client_commands).await {
                        warn!("Client {} error: {}", addr, e);
                    }
                    info!("🔌 Client {} disconnected", addr);
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    mut state_rx: broadcast::Receiver<String>,
    command_tx: mpsc::UnboundedSender<GroundCommand>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (reader, mut writer) = stream.into_split();

    let streaming = tokio::spawn(async move {
        while let Ok(snapshot) = state_rx.recv().await {
            if let Err(e) = writer.write_all(snapshot.as_bytes()).await {
                warn!("Failed to send state: {}", e);
                break;
            }
            if let Err(e) = writer.write_all(b"\n").await {
                warn!("Failed to send state newline: {}", e);
                break;
            }
        }
    });

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<GroundCommand>(trimmed) {
            Ok(command) => {
                if command_tx.send(command).is_err() {
                    break;
                }
            }
            Err(e) => warn!("Failed to parse command: {}", e),
        }
    }

    streaming.abort();
    Ok(())
}
