// src/transport/virtual_printer.rs - In-process printer simulator
//
// Interprets the same G-code a physical printer would receive and keeps a
// simple thermal and print-progress model, so virtual printers exercise the
// exact command path physical ones do.
use super::{PrinterTransport, TransportError};
use crate::command::Command;
use crate::gcode::{GCodeLine, parse_script};
use crate::printer::{Position, PrinterState, PrinterStatus};
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

const RESTART_CODES: [&str; 3] = ["FIRMWARE_RESTART", "RESTART", "M999"];

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct BuildVolume {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Default for BuildVolume {
    fn default() -> Self {
        Self { x: 220.0, y: 220.0, z: 250.0 }
    }
}

/// Simulator tuning, shared by every virtual printer.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct VirtualPrinterConfig {
    /// Simulated transport round trip.
    pub latency_ms: u64,
    /// °C per second towards a set target.
    pub heat_rate: f64,
    /// °C per second towards ambient once a heater is off.
    pub cool_rate: f64,
    pub ambient: f64,
    /// Uniform ± jitter on reported temperatures.
    pub thermal_noise: f64,
    /// Percent per second while printing.
    pub print_rate: f64,
    pub build_volume: BuildVolume,
    pub max_extruder_temp: f64,
    pub max_bed_temp: f64,
    pub min_extrude_temp: f64,
}

impl Default for VirtualPrinterConfig {
    fn default() -> Self {
        Self {
            latency_ms: 50,
            heat_rate: 3.0,
            cool_rate: 1.0,
            ambient: 22.0,
            thermal_noise: 0.0,
            print_rate: 0.5,
            build_volume: BuildVolume::default(),
            max_extruder_temp: 300.0,
            max_bed_temp: 120.0,
            min_extrude_temp: 170.0,
        }
    }
}

impl VirtualPrinterConfig {
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }
}

pub struct VirtualPrinter {
    config: VirtualPrinterConfig,
    sim: Mutex<Simulation>,
}

struct Simulation {
    state: PrinterState,
    relative: bool,
    /// Progress to resume from after M25.
    paused_at: Option<f64>,
    last_tick: Instant,
}

impl VirtualPrinter {
    pub fn new(config: VirtualPrinterConfig, status: PrinterStatus) -> Self {
        let mut state = PrinterState::with_status(status);
        state.temperature.extruder = config.ambient;
        state.temperature.bed = config.ambient;
        Self {
            config,
            sim: Mutex::new(Simulation {
                state,
                relative: false,
                paused_at: None,
                last_tick: Instant::now(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Simulation> {
        self.sim.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A switched-off printer only answers a restart, which brings it up idle.
    fn ensure_reachable(&self, script: Option<&str>) -> Result<(), TransportError> {
        if self.lock().state.status != PrinterStatus::Offline {
            return Ok(());
        }
        let restarting = script
            .and_then(|s| parse_script(s).ok())
            .is_some_and(|lines| !lines.is_empty() && lines.iter().all(is_restart));
        if restarting {
            tracing::info!("Virtual printer powered on by restart");
            return Ok(());
        }
        Err(TransportError::Unreachable("virtual printer is switched off".to_string()))
    }
}

fn is_restart(line: &GCodeLine) -> bool {
    RESTART_CODES.iter().any(|code| line.is(code))
}

#[async_trait]
impl PrinterTransport for VirtualPrinter {
    async fn execute(&self, command: &Command) -> Result<PrinterState, TransportError> {
        let script = command.to_gcode();
        self.ensure_reachable(Some(&script))?;
        tokio::time::sleep(self.config.latency()).await;
        let mut sim = self.lock();
        sim.advance(&self.config, Instant::now());
        sim.run(&script, &self.config).map_err(TransportError::Fault)?;
        Ok(sim.observe(&self.config))
    }

    async fn query(&self) -> Result<PrinterState, TransportError> {
        self.ensure_reachable(None)?;
        let mut sim = self.lock();
        sim.advance(&self.config, Instant::now());
        Ok(sim.observe(&self.config))
    }
}

impl Simulation {
    fn advance(&mut self, config: &VirtualPrinterConfig, now: Instant) {
        let dt = now.saturating_duration_since(self.last_tick).as_secs_f64();
        self.last_tick = now;
        let (temperature, target) = (self.state.temperature, self.state.target_temperature);
        self.state.temperature.extruder = approach(temperature.extruder, target.extruder, config, dt);
        self.state.temperature.bed = approach(temperature.bed, target.bed, config, dt);

        if let (PrinterStatus::Printing, Some(progress)) = (self.state.status, self.state.progress) {
            let next = progress + config.print_rate * dt;
            if next >= 100.0 {
                tracing::info!("Virtual print finished");
                self.state = self.state.clone().transition(PrinterStatus::Idle);
            } else {
                self.state.progress = Some(next);
            }
        }
    }

    fn observe(&self, config: &VirtualPrinterConfig) -> PrinterState {
        let mut state = self.state.clone();
        if config.thermal_noise > 0.0 {
            let mut rng = rand::rng();
            let noise = config.thermal_noise;
            state.temperature.extruder += rng.random_range(-noise..=noise);
            state.temperature.bed += rng.random_range(-noise..=noise);
        }
        state.last_update = Some(Utc::now());
        state
    }

    fn run(&mut self, script: &str, config: &VirtualPrinterConfig) -> Result<(), String> {
        let lines = parse_script(script).map_err(|e| e.to_string())?;
        // A rejected script leaves the machine as it found it.
        let (state, relative, paused_at) = (self.state.clone(), self.relative, self.paused_at);
        for line in &lines {
            if let Err(e) = self.run_line(line, config) {
                self.state = state;
                self.relative = relative;
                self.paused_at = paused_at;
                return Err(e);
            }
        }
        Ok(())
    }

    fn run_line(&mut self, line: &GCodeLine, config: &VirtualPrinterConfig) -> Result<(), String> {
        let restart = is_restart(line);
        if self.state.status == PrinterStatus::Error && !restart {
            let reason = self.state.message.clone().unwrap_or_else(|| "shutdown".to_string());
            return Err(format!("Printer is not ready: {}", reason));
        }
        match line.code.as_str() {
            "G90" => self.relative = false,
            "G91" => self.relative = true,
            "G0" | "G1" => self.linear_move(line, config)?,
            "G28" => self.home(line),
            "M104" | "M109" => {
                self.state.target_temperature.extruder = heater_target(line, config.max_extruder_temp, "extruder")?;
            }
            "M140" | "M190" => {
                self.state.target_temperature.bed = heater_target(line, config.max_bed_temp, "heater_bed")?;
            }
            "M24" if self.state.status == PrinterStatus::Paused => {
                let mut state = self.state.clone();
                state.progress = self.paused_at.take();
                self.state = state.transition(PrinterStatus::Printing);
            }
            "M25" if self.state.status == PrinterStatus::Printing => {
                self.paused_at = self.state.progress;
                self.state = self.state.clone().transition(PrinterStatus::Paused);
            }
            "M24" | "M25" => {}
            "M112" => {
                tracing::warn!("Virtual printer emergency stop");
                self.state.target_temperature = Default::default();
                self.state = self.state.clone().fault("Emergency stop");
            }
            _ if restart => {
                self.state.target_temperature = Default::default();
                self.state = self.state.clone().transition(PrinterStatus::Idle);
            }
            "M105" | "M114" | "M400" | "M82" | "M83" | "M84" | "M18" | "M106" | "M107" => {}
            other => return Err(format!("Unknown command:\"{}\"", other)),
        }
        Ok(())
    }

    fn linear_move(&mut self, line: &GCodeLine, config: &VirtualPrinterConfig) -> Result<(), String> {
        if let Some(e) = line.param('E') {
            if e != 0.0 && self.state.temperature.extruder < config.min_extrude_temp {
                return Err("Extrude below minimum temp".to_string());
            }
        }
        let current = self.state.position;
        let resolve = |value: Option<f64>, at: f64| match value {
            Some(v) if self.relative => at + v,
            Some(v) => v,
            None => at,
        };
        let target = Position {
            x: resolve(line.param('X'), current.x),
            y: resolve(line.param('Y'), current.y),
            z: resolve(line.param('Z'), current.z),
        };
        let volume = config.build_volume;
        let inside = |v: f64, max: f64| (0.0..=max).contains(&v);
        if !(inside(target.x, volume.x) && inside(target.y, volume.y) && inside(target.z, volume.z)) {
            return Err(format!("Move out of range: {:.3} {:.3} {:.3}", target.x, target.y, target.z));
        }
        self.state.position = target;
        Ok(())
    }

    fn home(&mut self, line: &GCodeLine) {
        let all = !(line.has('X') || line.has('Y') || line.has('Z'));
        let position = &mut self.state.position;
        if all || line.has('X') {
            position.x = 0.0;
        }
        if all || line.has('Y') {
            position.y = 0.0;
        }
        if all || line.has('Z') {
            position.z = 0.0;
        }
    }
}

fn heater_target(line: &GCodeLine, max: f64, heater: &str) -> Result<f64, String> {
    let target = line.param('S').unwrap_or(0.0);
    if target < 0.0 || target > max {
        return Err(format!("Requested temperature ({:.1}) out of range (0.0:{:.1}) for {}", target, max, heater));
    }
    Ok(target)
}

/// Moves `current` towards the heater goal without overshooting.
fn approach(current: f64, target: f64, config: &VirtualPrinterConfig, dt: f64) -> f64 {
    let goal = if target > 0.0 { target } else { config.ambient };
    let rate = if goal > current { config.heat_rate } else { config.cool_rate };
    let step = rate * dt;
    if (goal - current).abs() <= step {
        goal
    } else if goal > current {
        current + step
    } else {
        current - step
    }
}
