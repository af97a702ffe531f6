// src/protocol.rs
// Line protocol spoken by the titration controller over the serial link.
use std::fmt;
/// One decoded line from the controller.
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceLine {
    /// Motor speeds plus a conductivity reading.
    Data {
        motor1: i64,
        motor2: i64,
        conductivity: f64,
    },
    /// Conductivity only; the last motor speeds still apply.
    ConductivityOnly(f64),
    /// Motor speeds only; no sample is produced.
    MotorsOnly { motor1: i64, motor2: i64 },
    Stop,
    Unknown(String),
}
/// Decodes a single line. Blank lines yield `None`.
pub fn parse_line(raw: &str) -> Option<DeviceLine> {
    let line = raw.trim();
    if line.is_empty() {
        return None;
    }
    if line.to_lowercase().contains("titration stop") {
        return Some(DeviceLine::Stop);
    }
    if let Some(frame) = parse_keyed(line) {
        return Some(frame);
    }
    if let Some(frame) = parse_comma_separated(line) {
        return Some(frame);
    }
    Some(DeviceLine::Unknown(line.to_string()))
}
// m1=<int> ... m2=<int> ... c=<float>
fn parse_keyed(line: &str) -> Option<DeviceLine> {
    let (motor1, rest) = value_after(line, "m1=")?;
    let (motor2, rest) = value_after(rest, "m2=")?;
    let (conductivity, _) = value_after(rest, "c=")?;
    Some(DeviceLine::Data {
        motor1: motor1.parse().ok()?,
        motor2: motor2.parse().ok()?,
        conductivity: conductivity.parse().ok()?,
    })
}
fn value_after<'a>(line: &'a str, key: &str) -> Option<(&'a str, &'a str)> {
    let start = line.find(key)? + key.len();
    let tail = &line[start..];
    let len = tail
        .char_indices()
        .take_while(|&(i, c)| c.is_ascii_digit() || c == '.' || (i == 0 && (c == '+' || c == '-')))
        .count();
    if len == 0 {
        return None;
    }
    Some((&tail[..len], &tail[len..]))
}
fn parse_comma_separated(line: &str) -> Option<DeviceLine> {
    if !line.contains(',') {
        return None;
    }
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() < 2 {
        return None;
    }
    if parts[0].eq_ignore_ascii_case("c") {
        return parts[1].parse().ok().map(DeviceLine::ConductivityOnly);
    }
    let motor1: i64 = parts[0].parse().ok()?;
    let motor2: i64 = parts[1].parse().ok()?;
    match parts.get(2).and_then(|c| c.parse::<f64>().ok()) {
        Some(conductivity) => Some(DeviceLine::Data {
            motor1,
            motor2,
            conductivity,
        }),
        None => Some(DeviceLine::MotorsOnly { motor1, motor2 }),
    }
}
/// Commands sent from the host to the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostCommand {
    StartTitration { max_speed: u32, increment_ms: u32 },
    EmergencyStop,
}
impl HostCommand {
    /// Newline-terminated wire form.
    pub fn encode(&self) -> String {
        match self {
            HostCommand::StartTitration {
                max_speed,
                increment_ms,
            } => format!("t,{max_speed},{increment_ms}\n"),
            HostCommand::EmergencyStop => "s\n".to_string(),
        }
    }
}
impl fmt::Display for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostCommand::StartTitration {
                max_speed,
                increment_ms,
            } => write!(
                f,
                "start titration (max speed {max_speed}, step every {increment_ms} ms)"
            ),
            HostCommand::EmergencyStop => write!(f, "emergency stop"),
        }
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn keyed_frame() {
        assert_eq!(
            parse_line("m1=120, m2=-4, c=213.75\r\n"),
            Some(DeviceLine::Data {
                motor1: 120,
                motor2: -4,
                conductivity: 213.75
            })
        );
        assert_eq!(
            parse_line("m1=1 m2=2 c=.5"),
            Some(DeviceLine::Data {
                motor1: 1,
                motor2: 2,
                conductivity: 0.5
            })
        );
    }
    #[test]
    fn stop_is_case_insensitive() {
        assert_eq!(parse_line("Titration STOP"), Some(DeviceLine::Stop));
    }
    #[test]
    fn legacy_formats() {
        assert_eq!(
            parse_line("c, 12.5"),
            Some(DeviceLine::ConductivityOnly(12.5))
        );
        assert_eq!(
            parse_line("10,20"),
            Some(DeviceLine::MotorsOnly {
                motor1: 10,
                motor2: 20
            })
        );
        assert_eq!(
            parse_line("10,20,3.5"),
            Some(DeviceLine::Data {
                motor1: 10,
                motor2: 20,
                conductivity: 3.5
            })
        );
    }
    #[test]
    fn blank_and_noise() {
        assert_eq!(parse_line("   "), None);
        assert_eq!(
            parse_line("booting..."),
            Some(DeviceLine::Unknown("booting...".into()))
        );
        assert_eq!(
            parse_line("m1=x, m2=1, c=2"),
            Some(DeviceLine::Unknown("m1=x, m2=1, c=2".into()))
        );
    }
    #[test]
    fn command_encoding() {
        let cmd = HostCommand::StartTitration {
            max_speed: 10000,
            increment_ms: 50,
        };
        assert_eq!(cmd.encode(), "t,10000,50\n");
        assert_eq!(HostCommand::EmergencyStop.encode(), "s\n");
    }
}
