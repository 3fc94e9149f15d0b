//! pwmshift remote command sender
//!
//! Builds one command datagram and sends it to a pwmshift instance (or a
//! broadcast address), for scripting and for poking at a running daemon.
//!
//! Usage: cargo run -p pwmshift-send -- [OPTIONS] <COMMAND>

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pwmshift_engine::{color, ColorStep, Pattern, MAX_STEPS};
use pwmshift_protocol::{Command, ProtocolVariant, TargetField, DEFAULT_PORT};
use std::net::UdpSocket;

#[derive(Parser, Debug)]
#[command(name = "pwmshift-send")]
#[command(about = "Send a remote command to pwmshift")]
struct Args {
    /// Address to send to
    #[arg(short, long, default_value_t = format!("127.0.0.1:{DEFAULT_PORT}"))]
    address: String,

    /// Datagram layout: single-id or bitmask
    #[arg(short, long, default_value_t = ProtocolVariant::Bitmask)]
    protocol: ProtocolVariant,

    /// Target id (repeat for several with the bitmask layout, omit for everyone)
    #[arg(short, long = "target")]
    targets: Vec<u8>,

    /// Print the datagram as hex before sending
    #[arg(short, long)]
    dump: bool,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Stop auto mode and switch off
    Off,
    /// Ramp to a static color (levels 0.0 - 1.0)
    Set {
        red: f64,
        green: f64,
        blue: f64,
        /// Ramp duration in ms
        #[arg(short, long, default_value = "1000")]
        ramp: u32,
    },
    /// Cycle through colors
    Pattern {
        /// Ramp duration into each step in ms
        #[arg(short, long, default_value = "1000")]
        ramp: u32,
        /// Step as r,g,b,rest_ms
        #[arg(short, long = "step", value_parser = parse_step, required = true)]
        steps: Vec<ColorStep>,
    },
    /// Leave auto mode and fade back to the static color
    Disable,
}

fn parse_step(s: &str) -> Result<ColorStep, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    let [red, green, blue, rest] = parts.as_slice() else {
        return Err(format!("expected r,g,b,rest_ms, got '{s}'"));
    };

    let level = |text: &str| {
        text.parse::<f64>()
            .map_err(|e| format!("bad level '{text}': {e}"))
    };
    let rest_ms = rest
        .parse::<u32>()
        .map_err(|e| format!("bad rest '{rest}': {e}"))?;

    Ok(ColorStep::new(
        color(level(*red)?, level(*green)?, level(*blue)?),
        rest_ms,
    ))
}

fn build_command(action: &Action) -> Result<Command> {
    let command = match action {
        Action::Off => Command::Off,
        Action::Disable => Command::AutoDisable,
        Action::Set {
            red,
            green,
            blue,
            ramp,
        } => Command::SetLevels {
            ramp_ms: *ramp,
            levels: color(*red, *green, *blue),
        },
        Action::Pattern { ramp, steps } => {
            if steps.len() > MAX_STEPS {
                eprintln!(
                    "Warning: {} steps given, only the first {MAX_STEPS} are sent",
                    steps.len()
                );
            }
            let pattern = Pattern::new(steps.clone())?;
            // Pattern holds at most MAX_STEPS (35)
            #[allow(clippy::cast_possible_truncation)]
            let declared_steps = pattern.len() as u8;
            Command::AutoPattern {
                ramp_ms: *ramp,
                pattern,
                declared_steps,
            }
        }
    };
    Ok(command)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let target = TargetField::from_ids(args.protocol, &args.targets)?;
    let command = build_command(&args.action)?;
    let datagram = command.encode(target);

    if args.dump {
        println!("{}", hex::encode(&datagram));
    }

    let socket = UdpSocket::bind("0.0.0.0:0").context("Failed to bind UDP socket")?;
    socket
        .set_broadcast(true)
        .context("Failed to enable broadcast")?;
    socket
        .send_to(&datagram, &args.address)
        .with_context(|| format!("Failed to send to {}", args.address))?;

    println!(
        "Sent {} ({} bytes) to {}",
        command.code().label(),
        datagram.len(),
        args.address
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_step() {
        let step = parse_step("1, 0.5,0,250").expect("valid step");
        assert_eq!(step, ColorStep::new(color(1.0, 0.5, 0.0), 250));

        assert!(parse_step("1,0,0").is_err());
        assert!(parse_step("1,0,0,fast").is_err());
        assert!(parse_step("red,0,0,10").is_err());
    }

    #[test]
    fn test_args_parse_pattern() {
        let args = Args::try_parse_from([
            "pwmshift-send",
            "--target",
            "2",
            "-t",
            "5",
            "pattern",
            "--ramp",
            "300",
            "--step",
            "1,0,0,100",
            "--step",
            "0,0,1,100",
        ])
        .expect("valid args");

        assert_eq!(args.targets, vec![2, 5]);
        assert_eq!(args.protocol, ProtocolVariant::Bitmask);
        assert_eq!(args.address, "127.0.0.1:6565");

        let command = build_command(&args.action).expect("command");
        let Command::AutoPattern {
            ramp_ms,
            pattern,
            declared_steps,
        } = command
        else {
            panic!("expected a pattern");
        };
        assert_eq!(ramp_ms, 300);
        assert_eq!(declared_steps, 2);
        assert_eq!(pattern.step(1).color, color(0.0, 0.0, 1.0));
    }

    #[test]
    fn test_pattern_requires_steps() {
        assert!(Args::try_parse_from(["pwmshift-send", "pattern"]).is_err());
    }

    #[test]
    fn test_set_datagram_hex() {
        let args = Args::try_parse_from([
            "pwmshift-send",
            "--target",
            "1",
            "set",
            "1",
            "0",
            "0",
            "--ramp",
            "0",
        ])
        .expect("valid args");
        let target = TargetField::from_ids(args.protocol, &args.targets).expect("target");
        let datagram = build_command(&args.action).expect("command").encode(target);

        assert_eq!(hex::encode(datagram), "01010000000000000000000000ff0000");
    }
}
