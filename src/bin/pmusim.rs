use clap::{App, AppSettings, Arg, SubCommand};
use colored::*;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "9000";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("pmusim")
        .version("0.1.0")
        .about("PMU hardware simulator control client")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("host")
                .long("host")
                .value_name("HOST")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true),
        )
        .subcommand(SubCommand::with_name("status").about("Show a state snapshot"))
        .subcommand(SubCommand::with_name("pause").about("Pause simulated time"))
        .subcommand(SubCommand::with_name("resume").about("Resume simulated time"))
        .subcommand(SubCommand::with_name("reset").about("Reset the emulator to defaults"))
        .subcommand(
            SubCommand::with_name("time-scale")
                .about("Set the simulation time scale")
                .arg(Arg::with_name("factor").required(true)),
        )
        .subcommand(
            SubCommand::with_name("battery")
                .about("Set the battery voltage in millivolts")
                .arg(Arg::with_name("millivolts").required(true)),
        )
        .subcommand(
            SubCommand::with_name("input")
                .about("Input emulation")
                .setting(AppSettings::SubcommandRequiredElseHelp)
                .subcommand(
                    SubCommand::with_name("raw")
                        .arg(Arg::with_name("channel").required(true))
                        .arg(Arg::with_name("value").required(true)),
                )
                .subcommand(
                    SubCommand::with_name("voltage")
                        .arg(Arg::with_name("channel").required(true))
                        .arg(Arg::with_name("volts").required(true)),
                )
                .subcommand(
                    SubCommand::with_name("state")
                        .arg(Arg::with_name("channel").required(true))
                        .arg(
                            Arg::with_name("level")
                                .required(true)
                                .possible_values(&["high", "low"]),
                        ),
                )
                .subcommand(
                    SubCommand::with_name("pulse")
                        .arg(Arg::with_name("channel").required(true))
                        .arg(Arg::with_name("duration-ms").required(true)),
                )
                .subcommand(
                    SubCommand::with_name("toggle").arg(Arg::with_name("channel").required(true)),
                ),
        )
        .subcommand(
            SubCommand::with_name("output")
                .about("Power output channels")
                .setting(AppSettings::SubcommandRequiredElseHelp)
                .subcommand(
                    SubCommand::with_name("duty")
                        .arg(Arg::with_name("channel").required(true))
                        .arg(Arg::with_name("duty").required(true)),
                )
                .subcommand(
                    SubCommand::with_name("load")
                        .arg(Arg::with_name("channel").required(true))
                        .arg(Arg::with_name("ohms").required(true)),
                )
                .subcommand(
                    SubCommand::with_name("fault")
                        .arg(Arg::with_name("channel").required(true))
                        .arg(Arg::with_name("flags").required(true)),
                )
                .subcommand(
                    SubCommand::with_name("clear").arg(Arg::with_name("channel").required(true)),
                ),
        )
        .subcommand(
            SubCommand::with_name("motor")
                .about("Motor bridge channels")
                .setting(AppSettings::SubcommandRequiredElseHelp)
                .subcommand(
                    SubCommand::with_name("mode")
                        .arg(Arg::with_name("channel").required(true))
                        .arg(
                            Arg::with_name("mode")
                                .required(true)
                                .possible_values(&["coast", "forward", "reverse", "brake"]),
                        )
                        .arg(Arg::with_name("duty").required(true)),
                )
                .subcommand(
                    SubCommand::with_name("target")
                        .arg(Arg::with_name("channel").required(true))
                        .arg(Arg::with_name("position").required(true)),
                )
                .subcommand(
                    SubCommand::with_name("preset")
                        .arg(Arg::with_name("channel").required(true))
                        .arg(
                            Arg::with_name("preset")
                                .required(true)
                                .possible_values(&["wiper", "valve", "window", "seat"]),
                        ),
                ),
        )
        .subcommand(
            SubCommand::with_name("can")
                .about("CAN injection")
                .setting(AppSettings::SubcommandRequiredElseHelp)
                .subcommand(
                    SubCommand::with_name("inject")
                        .arg(Arg::with_name("bus").required(true))
                        .arg(Arg::with_name("id").required(true))
                        .arg(Arg::with_name("data").help("hex bytes, e.g. deadbeef")),
                )
                .subcommand(
                    SubCommand::with_name("periodic")
                        .arg(Arg::with_name("bus").required(true))
                        .arg(Arg::with_name("id").required(true))
                        .arg(Arg::with_name("interval-ms").required(true))
                        .arg(Arg::with_name("data").help("hex bytes")),
                )
                .subcommand(
                    SubCommand::with_name("online")
                        .arg(Arg::with_name("bus").required(true))
                        .arg(
                            Arg::with_name("state")
                                .required(true)
                                .possible_values(&["on", "off"]),
                        ),
                ),
        )
        .subcommand(
            SubCommand::with_name("scenario")
                .about("Scenario round-trip")
                .setting(AppSettings::SubcommandRequiredElseHelp)
                .subcommand(
                    SubCommand::with_name("save").arg(Arg::with_name("file").required(true)),
                )
                .subcommand(
                    SubCommand::with_name("load").arg(Arg::with_name("file").required(true)),
                ),
        )
        .subcommand(SubCommand::with_name("events").about("Drain queued simulation events"))
        .get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST).to_string();
    let port: u16 = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse()?;

    let command = build_command(&matches)?;
    let response = exchange(&host, port, &command).await?;
    render(&matches, &response)?;
    Ok(())
}

fn parse_hex(data: Option<&str>) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let Some(data) = data else {
        return Ok(Vec::new());
    };
    if data.len() % 2 != 0 {
        return Err("hex data must have an even number of digits".into());
    }
    (0..data.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&data[i..i + 2], 16).map_err(Into::into))
        .collect()
}

fn parse_can_id(id: &str) -> Result<(u32, bool), Box<dyn std::error::Error>> {
    let id = if let Some(hex) = id.strip_prefix("0x") {
        u32::from_str_radix(hex, 16)?
    } else {
        id.parse()?
    };
    Ok((id, id > 0x7FF))
}

fn build_command(matches: &clap::ArgMatches) -> Result<Value, Box<dyn std::error::Error>> {
    let value = match matches.subcommand() {
        ("status", _) => json!({"cmd": "get_snapshot"}),
        ("pause", _) => json!({"cmd": "set_paused", "paused": true}),
        ("resume", _) => json!({"cmd": "set_paused", "paused": false}),
        ("reset", _) => json!({"cmd": "reset"}),
        ("events", _) => json!({"cmd": "drain_events"}),
        ("time-scale", Some(sub)) => {
            let factor: f32 = sub.value_of("factor").unwrap().parse()?;
            json!({"cmd": "set_time_scale", "scale": factor})
        }
        ("battery", Some(sub)) => {
            let millivolts: u16 = sub.value_of("millivolts").unwrap().parse()?;
            json!({"cmd": "set_battery", "millivolts": millivolts})
        }
        ("input", Some(input)) => match input.subcommand() {
            ("raw", Some(sub)) => json!({
                "cmd": "set_raw",
                "channel": sub.value_of("channel").unwrap().parse::<usize>()?,
                "value": sub.value_of("value").unwrap().parse::<u16>()?,
            }),
            ("voltage", Some(sub)) => json!({
                "cmd": "set_voltage",
                "channel": sub.value_of("channel").unwrap().parse::<usize>()?,
                "volts": sub.value_of("volts").unwrap().parse::<f32>()?,
            }),
            ("state", Some(sub)) => json!({
                "cmd": "set_state",
                "channel": sub.value_of("channel").unwrap().parse::<usize>()?,
                "state": sub.value_of("level") == Some("high"),
            }),
            ("pulse", Some(sub)) => json!({
                "cmd": "pulse",
                "channel": sub.value_of("channel").unwrap().parse::<usize>()?,
                "duration_ms": sub.value_of("duration-ms").unwrap().parse::<u32>()?,
            }),
            ("toggle", Some(sub)) => json!({
                "cmd": "toggle",
                "channel": sub.value_of("channel").unwrap().parse::<usize>()?,
            }),
            _ => unreachable!(),
        },
        ("output", Some(output)) => match output.subcommand() {
            ("duty", Some(sub)) => json!({
                "cmd": "set_duty",
                "channel": sub.value_of("channel").unwrap().parse::<usize>()?,
                "duty": sub.value_of("duty").unwrap().parse::<u16>()?,
            }),
            ("load", Some(sub)) => json!({
                "cmd": "set_load",
                "channel": sub.value_of("channel").unwrap().parse::<usize>()?,
                "ohms": sub.value_of("ohms").unwrap().parse::<f32>()?,
            }),
            ("fault", Some(sub)) => json!({
                "cmd": "inject_output_fault",
                "channel": sub.value_of("channel").unwrap().parse::<usize>()?,
                "flags": sub.value_of("flags").unwrap().parse::<u8>()?,
            }),
            ("clear", Some(sub)) => json!({
                "cmd": "clear_output_fault",
                "channel": sub.value_of("channel").unwrap().parse::<usize>()?,
            }),
            _ => unreachable!(),
        },
        ("motor", Some(motor)) => match motor.subcommand() {
            ("mode", Some(sub)) => {
                let mode = match sub.value_of("mode").unwrap() {
                    "coast" => "Coast",
                    "forward" => "Forward",
                    "reverse" => "Reverse",
                    _ => "Brake",
                };
                json!({
                    "cmd": "set_motor_mode",
                    "channel": sub.value_of("channel").unwrap().parse::<usize>()?,
                    "mode": mode,
                    "duty": sub.value_of("duty").unwrap().parse::<u16>()?,
                })
            }
            ("target", Some(sub)) => json!({
                "cmd": "set_motor_target",
                "channel": sub.value_of("channel").unwrap().parse::<usize>()?,
                "position": sub.value_of("position").unwrap().parse::<u16>()?,
            }),
            ("preset", Some(sub)) => {
                let preset = match sub.value_of("preset").unwrap() {
                    "wiper" => "Wiper",
                    "valve" => "Valve",
                    "window" => "Window",
                    _ => "Seat",
                };
                json!({
                    "cmd": "set_motor_preset",
                    "channel": sub.value_of("channel").unwrap().parse::<usize>()?,
                    "preset": preset,
                })
            }
            _ => unreachable!(),
        },
        ("can", Some(can)) => match can.subcommand() {
            ("inject", Some(sub)) => {
                let (id, extended) = parse_can_id(sub.value_of("id").unwrap())?;
                json!({
                    "cmd": "inject_message",
                    "bus": sub.value_of("bus").unwrap().parse::<usize>()?,
                    "id": id,
                    "data": parse_hex(sub.value_of("data"))?,
                    "extended": extended,
                })
            }
            ("periodic", Some(sub)) => {
                let (id, extended) = parse_can_id(sub.value_of("id").unwrap())?;
                json!({
                    "cmd": "add_periodic_message",
                    "bus": sub.value_of("bus").unwrap().parse::<usize>()?,
                    "id": id,
                    "data": parse_hex(sub.value_of("data"))?,
                    "extended": extended,
                    "interval_ms": sub.value_of("interval-ms").unwrap().parse::<u32>()?,
                })
            }
            ("online", Some(sub)) => json!({
                "cmd": "set_bus_online",
                "bus": sub.value_of("bus").unwrap().parse::<usize>()?,
                "online": sub.value_of("state") == Some("on"),
            }),
            _ => unreachable!(),
        },
        ("scenario", Some(scenario)) => match scenario.subcommand() {
            ("save", _) => json!({"cmd": "capture_scenario"}),
            ("load", Some(sub)) => {
                let text = std::fs::read_to_string(sub.value_of("file").unwrap())?;
                let scenario: Value = serde_json::from_str(&text)?;
                json!({"cmd": "apply_scenario", "scenario": scenario})
            }
            _ => unreachable!(),
        },
        _ => unreachable!(),
    };
    Ok(value)
}

/// Sends one command and waits for its response, skipping any snapshot
/// broadcast lines that arrive in between.
async fn exchange(
    host: &str,
    port: u16,
    command: &Value,
) -> Result<Value, Box<dyn std::error::Error>> {
    let stream = TcpStream::connect((host, port)).await?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    writer.write_all(command.to_string().as_bytes()).await?;
    writer.write_all(b"\n").await?;

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Err("connection closed before a response arrived".into());
        }
        let value: Value = serde_json::from_str(line.trim())?;
        if value.get("ok").is_some() {
            return Ok(value);
        }
    }
}

fn render(
    matches: &clap::ArgMatches,
    response: &Value,
) -> Result<(), Box<dyn std::error::Error>> {
    if response["ok"] != Value::Bool(true) {
        let message = response["error"].as_str().unwrap_or("unknown error");
        eprintln!("{} {}", "error:".red().bold(), message);
        std::process::exit(1);
    }

    match matches.subcommand() {
        ("status", _) => render_status(&response["data"]),
        ("scenario", Some(scenario)) => {
            if let ("save", Some(sub)) = scenario.subcommand() {
                let file = sub.value_of("file").unwrap();
                std::fs::write(file, serde_json::to_string_pretty(&response["data"])?)?;
                println!("{} scenario written to {}", "ok:".green().bold(), file);
            } else {
                println!("{} scenario applied", "ok:".green().bold());
            }
        }
        ("events", _) => {
            println!("{}", serde_json::to_string_pretty(&response["data"])?);
        }
        _ => println!("{}", "ok".green().bold()),
    }
    Ok(())
}

fn render_status(data: &Value) {
    println!("{}", "PMU Emulator".bold());
    println!(
        "  time: {} ms (uptime {} s, scale {}, {})",
        data["now_ms"],
        data["uptime_s"],
        data["time_scale"],
        if data["paused"] == Value::Bool(true) {
            "paused".yellow()
        } else {
            "running".green()
        }
    );
    let protection = &data["protection"];
    println!(
        "  battery: {} mV   total current: {} mA   status: {:#06x}",
        protection["battery_mv"],
        protection["total_current_ma"],
        protection["status_bits"].as_u64().unwrap_or(0)
    );

    println!("{}", "Outputs".bold());
    if let Some(outputs) = data["outputs"].as_array() {
        for (index, output) in outputs.iter().enumerate() {
            let state = output["state"].as_str().unwrap_or("?");
            if state == "Off" {
                continue;
            }
            let state_colored = match state {
                "On" | "Pwm" => state.green(),
                "Disabled" => state.yellow(),
                _ => state.red(),
            };
            println!(
                "  ch{:02} {:>12}  duty {:>4}  {:>9} mA  {:>6} C  load {} ohm",
                index,
                state_colored,
                output["duty"],
                output["current_ma"],
                output["temperature_c"],
                output["load_ohm"]
            );
        }
    }

    println!("{}", "Motors".bold());
    if let Some(motors) = data["motors"].as_array() {
        for (index, motor) in motors.iter().enumerate() {
            println!(
                "  m{} {:>8} {:>8}  pos {:>4}  {:>7} A  {:>6} rad/s{}",
                index,
                motor["mode"].as_str().unwrap_or("?"),
                motor["lifecycle"].as_str().unwrap_or("?"),
                motor["position"],
                motor["current_a"],
                motor["omega_rad_s"],
                if motor["stalled"] == Value::Bool(true) {
                    " STALL".red().to_string()
                } else {
                    String::new()
                }
            );
        }
    }

    println!("{}", "CAN".bold());
    if let Some(buses) = data["can"].as_array() {
        for (index, bus) in buses.iter().enumerate() {
            println!(
                "  can{} {:>8}  {}  tx {}",
                index,
                if bus["online"] == Value::Bool(true) {
                    "online".green()
                } else {
                    "offline".red()
                },
                bus["error_state"].as_str().unwrap_or("?"),
                bus["tx_frames"]
            );
        }
    }
}
