// src/command.rs - Operator commands and their G-code rendering
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Feed rate used for XYZ jogs, mm/min.
pub const JOG_FEEDRATE: u32 = 3000;
/// Feed rate used for extruder jogs, mm/min.
pub const EXTRUDE_FEEDRATE: u32 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Axis {
    X,
    Y,
    Z,
    E,
}

impl Axis {
    pub fn letter(&self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
            Axis::E => 'E',
        }
    }

    pub fn from_letter(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'X' => Some(Axis::X),
            'Y' => Some(Axis::Y),
            'Z' => Some(Axis::Z),
            'E' => Some(Axis::E),
            _ => None,
        }
    }
}

impl FromStr for Axis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.trim().chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Axis::from_letter(c).ok_or_else(|| format!("unknown axis '{}'", s)),
            _ => Err(format!("unknown axis '{}'", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaterTarget {
    Extruder,
    Bed,
}

impl FromStr for HeaterTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "extruder" | "hotend" => Ok(HeaterTarget::Extruder),
            "bed" | "heater_bed" => Ok(HeaterTarget::Bed),
            other => Err(format!("unknown heater '{}'", other)),
        }
    }
}

impl fmt::Display for HeaterTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaterTarget::Extruder => f.write_str("extruder"),
            HeaterTarget::Bed => f.write_str("bed"),
        }
    }
}

/// A request against one printer. Consumed once the transport answers.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Relative jog of a single axis.
    Move { axis: Axis, distance: f64 },
    /// Home the given axes; empty means all.
    Home { axes: Vec<Axis> },
    SetTemperature { target: HeaterTarget, value: f64 },
    Raw { gcode: String },
    EmergencyStop,
}

impl Command {
    /// Parses the `axis` field of a home request: `all`, `X`, `xy`, `X Y Z`.
    pub fn home(axis: &str) -> Result<Self, String> {
        let wanted = axis.trim();
        if wanted.is_empty() || wanted.eq_ignore_ascii_case("all") {
            return Ok(Command::Home { axes: Vec::new() });
        }
        let mut axes = Vec::new();
        for c in wanted.chars().filter(|c| !c.is_whitespace() && *c != ',') {
            match Axis::from_letter(c) {
                Some(Axis::E) | None => return Err(format!("cannot home axis '{}'", c)),
                Some(axis) if !axes.contains(&axis) => axes.push(axis),
                Some(_) => {}
            }
        }
        Ok(Command::Home { axes })
    }

    pub fn set_temperature(target: &str, value: f64) -> Result<Self, String> {
        let target = target.parse::<HeaterTarget>()?;
        if !value.is_finite() || value < 0.0 {
            return Err(format!("invalid temperature {}", value));
        }
        Ok(Command::SetTemperature { target, value })
    }

    pub fn jog(axis: &str, distance: f64) -> Result<Self, String> {
        let axis = axis.parse::<Axis>()?;
        if !distance.is_finite() {
            return Err("invalid distance".to_string());
        }
        Ok(Command::Move { axis, distance })
    }

    pub fn raw(gcode: &str) -> Result<Self, String> {
        if gcode.trim().is_empty() {
            return Err("empty G-code command".to_string());
        }
        Ok(Command::Raw { gcode: gcode.to_string() })
    }

    /// G-code script sent to the firmware for this command.
    pub fn to_gcode(&self) -> String {
        match self {
            Command::Move { axis, distance } => {
                let feed = if *axis == Axis::E { EXTRUDE_FEEDRATE } else { JOG_FEEDRATE };
                format!("G91\nG1 {}{} F{}\nG90", axis.letter(), distance, feed)
            }
            Command::Home { axes } if axes.is_empty() => "G28".to_string(),
            Command::Home { axes } => {
                let letters: Vec<String> = axes.iter().map(|a| a.letter().to_string()).collect();
                format!("G28 {}", letters.join(" "))
            }
            Command::SetTemperature { target: HeaterTarget::Extruder, value } => format!("M104 S{}", value),
            Command::SetTemperature { target: HeaterTarget::Bed, value } => format!("M140 S{}", value),
            Command::Raw { gcode } => gcode.clone(),
            Command::EmergencyStop => "M112".to_string(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Move { axis, distance } => write!(f, "move {}{:+}", axis.letter(), distance),
            Command::Home { axes } if axes.is_empty() => f.write_str("home all"),
            Command::Home { axes } => {
                let letters: String = axes.iter().map(Axis::letter).collect();
                write!(f, "home {}", letters)
            }
            Command::SetTemperature { target, value } => write!(f, "set {} to {}°C", target, value),
            Command::Raw { gcode } => write!(f, "gcode '{}'", gcode.lines().collect::<Vec<_>>().join("; ")),
            Command::EmergencyStop => f.write_str("emergency stop"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn home_all_renders_bare_g28() {
        assert_eq!(Command::home("all").unwrap().to_gcode(), "G28");
        assert_eq!(Command::home("").unwrap().to_gcode(), "G28");
    }

    #[test]
    fn home_axes_dedups_and_orders() {
        let cmd = Command::home("x, Y x").unwrap();
        assert_eq!(cmd, Command::Home { axes: vec![Axis::X, Axis::Y] });
        assert_eq!(cmd.to_gcode(), "G28 X Y");
        assert!(Command::home("E").is_err());
        assert!(Command::home("Q").is_err());
    }

    #[test]
    fn jog_wraps_in_relative_mode() {
        let cmd = Command::jog("X", 10.0).unwrap();
        assert_eq!(cmd.to_gcode(), "G91\nG1 X10 F3000\nG90");
        let extrude = Command::jog("e", -2.5).unwrap();
        assert_eq!(extrude.to_gcode(), "G91\nG1 E-2.5 F300\nG90");
    }

    #[test]
    fn temperature_targets() {
        assert_eq!(Command::set_temperature("extruder", 210.0).unwrap().to_gcode(), "M104 S210");
        assert_eq!(Command::set_temperature("bed", 60.0).unwrap().to_gcode(), "M140 S60");
        assert!(Command::set_temperature("chamber", 40.0).is_err());
        assert!(Command::set_temperature("bed", -5.0).is_err());
    }

    #[test]
    fn raw_rejects_blank() {
        assert!(Command::raw("  \n").is_err());
        assert_eq!(Command::raw("M114").unwrap().to_gcode(), "M114");
    }

    #[test]
    fn display_is_operator_friendly() {
        assert_eq!(Command::jog("Z", -1.0).unwrap().to_string(), "move Z-1");
        assert_eq!(Command::home("XY").unwrap().to_string(), "home XY");
        assert_eq!(Command::raw("G90\nG1 X5").unwrap().to_string(), "gcode 'G90; G1 X5'");
    }
}
