use clap::{App, Arg};
use pmusim::canbus::CanErrorSeverity;
use pmusim::channel::{BusId, InputId, MotorId, OutputId};
use pmusim::inputs::PullConfig;
use pmusim::motors::{MotorMode, MotorPreset};
use pmusim::protection::TempSensor;
use pmusim::{PmuEmulator, Scenario};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio::time;
use tracing::{error, info, warn};

const DEFAULT_PORT: u16 = 9000;
const DEFAULT_TICK_MS: u32 = 1;
const SNAPSHOT_BROADCAST_BUFFER: usize = 64;
const SNAPSHOT_PERIOD_MS: u64 = 1000;

/// Newline-delimited JSON command surface over the emulator's API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum SimCommand {
    // Inputs.
    SetRaw { channel: usize, value: u16 },
    SetVoltage { channel: usize, volts: f32 },
    SetFrequency { channel: usize, hz: f32 },
    SetNoise { channel: usize, enabled: bool, amplitude: u16 },
    SetState { channel: usize, state: bool },
    Configure { channel: usize, inverted: bool, pull_up: bool, pull_down: bool, debounce_ms: u32 },
    Toggle { channel: usize },
    Pulse { channel: usize, duration_ms: u32 },
    SetAllDigital { mask: u32 },
    // Power outputs.
    SetDuty { channel: usize, duty: u16 },
    SetLoad { channel: usize, ohms: f32 },
    InjectOutputFault { channel: usize, flags: u8 },
    ClearOutputFault { channel: usize },
    SetOutputEnabled { channel: usize, enabled: bool },
    ConfigureSoftStart { channel: usize, soft_start_ms: u32 },
    ConfigureInrush { channel: usize, multiplier: f32, duration_ms: u32 },
    // Motor bridges.
    SetMotorMode { channel: usize, mode: MotorMode, duty: u16 },
    SetMotorTarget { channel: usize, position: u16 },
    SetMotorPosition { channel: usize, position: u16 },
    SetMotorPreset { channel: usize, preset: MotorPreset },
    SetLoadTorque { channel: usize, torque_nm: f32 },
    InjectMotorFault { channel: usize, flags: u8 },
    ClearMotorFault { channel: usize },
    // CAN.
    InjectMessage { bus: usize, id: u32, data: Vec<u8>, extended: bool },
    InjectFd { bus: usize, id: u32, data: Vec<u8>, extended: bool },
    AddPeriodicMessage { bus: usize, id: u32, data: Vec<u8>, extended: bool, interval_ms: u32 },
    RemovePeriodicMessage { bus: usize, index: usize },
    SetBusOnline { bus: usize, online: bool },
    SimulateError { bus: usize, severity: CanErrorSeverity },
    // Protection.
    SetBattery { millivolts: u16 },
    SetTemperature { sensor: TempSensor, celsius: f32 },
    InjectProtectionFault { flags: u16 },
    ClearProtectionFaults,
    SetAutoFaults { enabled: bool },
    // Lifecycle.
    SetPaused { paused: bool },
    SetTimeScale { scale: f32 },
    Reset,
    GetSnapshot,
    ApplyScenario { scenario: Box<Scenario> },
    CaptureScenario,
    DrainEvents,
}

#[derive(Debug, Serialize)]
struct SimResponse {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
}

impl SimResponse {
    fn done() -> Self {
        Self { ok: true, error: None, data: None }
    }

    fn with_data(data: serde_json::Value) -> Self {
        Self { ok: true, error: None, data: Some(data) }
    }

    fn err(message: impl ToString) -> Self {
        Self { ok: false, error: Some(message.to_string()), data: None }
    }
}

fn apply_command(emulator: &mut PmuEmulator, command: SimCommand) -> SimResponse {
    use SimCommand::*;

    macro_rules! run {
        ($expr:expr) => {
            match $expr {
                Ok(()) => SimResponse::done(),
                Err(e) => SimResponse::err(e),
            }
        };
    }

    match command {
        SetRaw { channel, value } => match InputId::new(channel) {
            Ok(id) => {
                emulator.set_input_raw(id, value);
                SimResponse::done()
            }
            Err(e) => SimResponse::err(e),
        },
        SetVoltage { channel, volts } => match InputId::new(channel) {
            Ok(id) => {
                emulator.set_input_voltage(id, volts);
                SimResponse::done()
            }
            Err(e) => SimResponse::err(e),
        },
        SetFrequency { channel, hz } => match InputId::new(channel) {
            Ok(id) => {
                emulator.set_input_frequency(id, hz);
                SimResponse::done()
            }
            Err(e) => SimResponse::err(e),
        },
        SetNoise { channel, enabled, amplitude } => match InputId::new(channel) {
            Ok(id) => {
                emulator.set_input_noise(id, enabled, amplitude);
                SimResponse::done()
            }
            Err(e) => SimResponse::err(e),
        },
        SetState { channel, state } => match InputId::new(channel) {
            Ok(id) => {
                emulator.set_digital_state(id, state);
                SimResponse::done()
            }
            Err(e) => SimResponse::err(e),
        },
        Configure { channel, inverted, pull_up, pull_down, debounce_ms } => {
            match InputId::new(channel) {
                Ok(id) => {
                    let pull = if pull_up {
                        PullConfig::Up
                    } else if pull_down {
                        PullConfig::Down
                    } else {
                        PullConfig::None
                    };
                    emulator.configure_digital(id, inverted, pull, debounce_ms);
                    SimResponse::done()
                }
                Err(e) => SimResponse::err(e),
            }
        }
        Toggle { channel } => match InputId::new(channel) {
            Ok(id) => {
                emulator.toggle_digital(id);
                SimResponse::done()
            }
            Err(e) => SimResponse::err(e),
        },
        Pulse { channel, duration_ms } => match InputId::new(channel) {
            Ok(id) => {
                emulator.pulse_digital(id, duration_ms);
                SimResponse::done()
            }
            Err(e) => SimResponse::err(e),
        },
        SetAllDigital { mask } => {
            emulator.set_digital_all(mask);
            SimResponse::done()
        }
        SetDuty { channel, duty } => match OutputId::new(channel) {
            Ok(id) => run!(emulator.set_output_duty(id, duty)),
            Err(e) => SimResponse::err(e),
        },
        SetLoad { channel, ohms } => match OutputId::new(channel) {
            Ok(id) => run!(emulator.set_output_load(id, ohms)),
            Err(e) => SimResponse::err(e),
        },
        InjectOutputFault { channel, flags } => match OutputId::new(channel) {
            Ok(id) => {
                emulator.inject_output_fault(id, flags);
                SimResponse::done()
            }
            Err(e) => SimResponse::err(e),
        },
        ClearOutputFault { channel } => match OutputId::new(channel) {
            Ok(id) => {
                emulator.clear_output_fault(id);
                SimResponse::done()
            }
            Err(e) => SimResponse::err(e),
        },
        SetOutputEnabled { channel, enabled } => match OutputId::new(channel) {
            Ok(id) => {
                emulator.set_output_enabled(id, enabled);
                SimResponse::done()
            }
            Err(e) => SimResponse::err(e),
        },
        ConfigureSoftStart { channel, soft_start_ms } => match OutputId::new(channel) {
            Ok(id) => {
                emulator.configure_output_soft_start(id, soft_start_ms);
                SimResponse::done()
            }
            Err(e) => SimResponse::err(e),
        },
        ConfigureInrush { channel, multiplier, duration_ms } => match OutputId::new(channel) {
            Ok(id) => {
                emulator.configure_output_inrush(id, multiplier, duration_ms);
                SimResponse::done()
            }
            Err(e) => SimResponse::err(e),
        },
        SetMotorMode { channel, mode, duty } => match MotorId::new(channel) {
            Ok(id) => run!(emulator.set_motor_mode(id, mode, duty)),
            Err(e) => SimResponse::err(e),
        },
        SetMotorTarget { channel, position } => match MotorId::new(channel) {
            Ok(id) => run!(emulator.set_motor_target(id, position)),
            Err(e) => SimResponse::err(e),
        },
        SetMotorPosition { channel, position } => match MotorId::new(channel) {
            Ok(id) => run!(emulator.set_motor_position(id, position)),
            Err(e) => SimResponse::err(e),
        },
        SetMotorPreset { channel, preset } => match MotorId::new(channel) {
            Ok(id) => {
                emulator.set_motor_preset(id, preset);
                SimResponse::done()
            }
            Err(e) => SimResponse::err(e),
        },
        SetLoadTorque { channel, torque_nm } => match MotorId::new(channel) {
            Ok(id) => {
                emulator.set_motor_load_torque(id, torque_nm);
                SimResponse::done()
            }
            Err(e) => SimResponse::err(e),
        },
        InjectMotorFault { channel, flags } => match MotorId::new(channel) {
            Ok(id) => {
                emulator.inject_motor_fault(id, flags);
                SimResponse::done()
            }
            Err(e) => SimResponse::err(e),
        },
        ClearMotorFault { channel } => match MotorId::new(channel) {
            Ok(id) => {
                emulator.clear_motor_fault(id);
                SimResponse::done()
            }
            Err(e) => SimResponse::err(e),
        },
        InjectMessage { bus, id, data, extended } => match BusId::new(bus) {
            Ok(bus) => run!(emulator.inject_can_message(bus, id, &data, extended)),
            Err(e) => SimResponse::err(e),
        },
        InjectFd { bus, id, data, extended } => match BusId::new(bus) {
            Ok(bus) => run!(emulator.inject_can_fd(bus, id, &data, extended)),
            Err(e) => SimResponse::err(e),
        },
        AddPeriodicMessage { bus, id, data, extended, interval_ms } => match BusId::new(bus) {
            Ok(bus) => {
                match emulator.add_periodic_can_message(bus, id, &data, extended, interval_ms) {
                    Ok(slot) => SimResponse::with_data(serde_json::json!({ "slot": slot })),
                    Err(e) => SimResponse::err(e),
                }
            }
            Err(e) => SimResponse::err(e),
        },
        RemovePeriodicMessage { bus, index } => match BusId::new(bus) {
            Ok(bus) => run!(emulator.remove_periodic_can_message(bus, index)),
            Err(e) => SimResponse::err(e),
        },
        SetBusOnline { bus, online } => match BusId::new(bus) {
            Ok(bus) => {
                emulator.set_can_bus_online(bus, online);
                SimResponse::done()
            }
            Err(e) => SimResponse::err(e),
        },
        SimulateError { bus, severity } => match BusId::new(bus) {
            Ok(bus) => {
                emulator.simulate_can_error(bus, severity);
                SimResponse::done()
            }
            Err(e) => SimResponse::err(e),
        },
        SetBattery { millivolts } => {
            emulator.set_battery_voltage(millivolts);
            SimResponse::done()
        }
        SetTemperature { sensor, celsius } => {
            emulator.set_temperature(sensor, celsius);
            SimResponse::done()
        }
        InjectProtectionFault { flags } => {
            emulator.inject_protection_fault(flags);
            SimResponse::done()
        }
        ClearProtectionFaults => {
            emulator.clear_protection_faults();
            SimResponse::done()
        }
        SetAutoFaults { enabled } => {
            emulator.set_auto_faults(enabled);
            SimResponse::done()
        }
        SetPaused { paused } => {
            emulator.set_paused(paused);
            SimResponse::done()
        }
        SetTimeScale { scale } => run!(emulator.set_time_scale(scale)),
        Reset => {
            emulator.reset();
            SimResponse::done()
        }
        GetSnapshot => match serde_json::to_value(emulator.snapshot()) {
            Ok(value) => SimResponse::with_data(value),
            Err(e) => SimResponse::err(e),
        },
        ApplyScenario { scenario } => run!(emulator.apply_scenario(&scenario)),
        CaptureScenario => match serde_json::to_value(emulator.capture_scenario()) {
            Ok(value) => SimResponse::with_data(value),
            Err(e) => SimResponse::err(e),
        },
        DrainEvents => match serde_json::to_value(emulator.drain_events()) {
            Ok(value) => SimResponse::with_data(value),
            Err(e) => SimResponse::err(e),
        },
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("pmusim-simulator")
        .version("0.1.0")
        .about("PMU hardware simulation server")
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("TCP listen port")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("tick-ms")
                .long("tick-ms")
                .value_name("MS")
                .help("Real-time tick period in milliseconds")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("time-scale")
                .long("time-scale")
                .value_name("FACTOR")
                .help("Initial simulation time scale")
                .takes_value(true),
        )
        .get_matches();

    let port: u16 = matches
        .value_of("port")
        .map(str::parse)
        .transpose()?
        .unwrap_or(DEFAULT_PORT);
    let tick_ms: u32 = matches
        .value_of("tick-ms")
        .map(str::parse)
        .transpose()?
        .unwrap_or(DEFAULT_TICK_MS)
        .max(1);

    let emulator = Arc::new(Mutex::new(PmuEmulator::new()));
    if let Some(scale) = matches.value_of("time-scale") {
        let scale: f32 = scale.parse()?;
        emulator.lock().await.set_time_scale(scale)?;
    }

    info!("PMU simulator starting, tick period {} ms", tick_ms);

    let (snapshot_tx, _) = broadcast::channel(SNAPSHOT_BROADCAST_BUFFER);

    // TCP command server.
    let server_emulator = Arc::clone(&emulator);
    let server_snapshot_tx = snapshot_tx.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = run_server(port, server_emulator, server_snapshot_tx).await {
            error!("server error: {}", e);
        }
    });

    // Tick owner: the only task that advances simulated time. Setter
    // calls from client tasks interleave through the same mutex.
    let mut interval = time::interval(Duration::from_millis(tick_ms as u64));
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Burst);
    let mut since_snapshot_ms: u64 = 0;

    loop {
        interval.tick().await;

        let snapshot = {
            let mut emulator = emulator.lock().await;
            emulator.tick(tick_ms);
            since_snapshot_ms += tick_ms as u64;
            if since_snapshot_ms >= SNAPSHOT_PERIOD_MS {
                since_snapshot_ms = 0;
                Some(emulator.snapshot())
            } else {
                None
            }
        };

        if let Some(snapshot) = snapshot {
            if snapshot_tx.receiver_count() > 0 {
                match serde_json::to_string(&snapshot) {
                    Ok(json) => {
                        let _ = snapshot_tx.send(json);
                    }
                    Err(e) => warn!("snapshot serialization failed: {}", e),
                }
            }
        }

        if server.is_finished() {
            break;
        }
    }

    Ok(())
}

async fn run_server(
    port: u16,
    emulator: Arc<Mutex<PmuEmulator>>,
    snapshot_tx: broadcast::Sender<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    info!("listening on 127.0.0.1:{}", port);

    loop {
        let (stream, addr) = listener.accept().await?;
        info!("client connected: {}", addr);
        let client_emulator = Arc::clone(&emulator);
        let client_snapshot_rx = snapshot_tx.subscribe();

        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, client_emulator, client_snapshot_rx).await {
                warn!("client {} error: {}", addr, e);
            }
            info!("client disconnected: {}", addr);
        });
    }
}

async fn handle_client(
    stream: TcpStream,
    emulator: Arc<Mutex<PmuEmulator>>,
    mut snapshot_rx: broadcast::Receiver<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let writer = Arc::new(Mutex::new(writer));

    // Stream snapshots to the client alongside command responses.
    let snapshot_writer = Arc::clone(&writer);
    let snapshot_task = tokio::spawn(async move {
        while let Ok(snapshot) = snapshot_rx.recv().await {
            let mut writer = snapshot_writer.lock().await;
            if writer.write_all(snapshot.as_bytes()).await.is_err()
                || writer.write_all(b"\n").await.is_err()
            {
                break;
            }
        }
    });

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<SimCommand>(trimmed) {
            Ok(command) => {
                let mut emulator = emulator.lock().await;
                apply_command(&mut emulator, command)
            }
            Err(e) => SimResponse::err(format!("invalid command: {e}")),
        };

        let json = serde_json::to_string(&response)?;
        let mut writer = writer.lock().await;
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }

    snapshot_task.abort();
    Ok(())
}
