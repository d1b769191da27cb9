use std::io;
use std::io::Stdout;
use std::thread;
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use log::{info, warn, LevelFilter};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::time::interval;
use tui::backend::CrosstermBackend;
use tui::layout::{Alignment, Constraint, Direction, Layout};
use tui::style::{Color, Modifier, Style};
use tui::text::{Span, Spans};
use tui::widgets::{Block, BorderType, Borders, Paragraph};
use tui::Terminal;

use shunt_monitor::calibration::ShuntRating;
use shunt_monitor::monitor::{PollOutcome, SmartShunt};
use shunt_monitor::protection::{AlertLatch, LoadState};
use shunt_monitor::settings::MonitorConfig;
use shunt_monitor::storage::MemoryStore;
use shunt_monitor::telemetry::{BatteryStatus, TelemetryRecord};

use crate::sim_battery::SimBattery;
use crate::sim_power::SimPower;
use crate::sim_radio::SimRadio;

mod sim_battery;
mod sim_power;
mod sim_radio;
mod ui_log;

/// Interrupt line of the sense chip, set by the chip model and by the `a` key
static ALERT: AlertLatch = AlertLatch::new();

const POLL_PERIOD: Duration = Duration::from_millis(250);
/// One real second is one simulated minute
const TIME_SCALE: u64 = 60;
/// Real time the simulated deep sleep lasts
const SLEEP_PLAYBACK: Duration = Duration::from_secs(3);

enum Command {
    LoadUp,
    LoadDown,
    VoltageUp,
    VoltageDown,
    ResetOvercurrent,
    ToggleAlert,
    NextShunt,
    Update,
    Quit,
}

/// Simulated monotonic clock, jumps forward over deep sleep
struct SimClock {
    started: Instant,
    skipped_ms: u64,
}

impl SimClock {
    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64 * TIME_SCALE + self.skipped_ms
    }

    fn skip(&mut self, duration_ms: u32) {
        self.skipped_ms += duration_ms as u64;
    }
}

struct View {
    record: Option<TelemetryRecord>,
    load_state: LoadState,
    rating: ShuntRating,
    alert_enabled: bool,
    alert_limit_a: Option<f32>,
    open_circuit_v: f32,
    load_a: f32,
    frames: u32,
    now_ms: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ui_log::init(LevelFilter::Info)?;

    let config = MonitorConfig::default();
    let store = MemoryStore::create();
    let battery = SimBattery::create(12.8, 5.0, &ALERT);
    let power = SimPower::create();
    let radio = SimRadio::create();

    let (gain, offset_ma) = SimBattery::factory_calibration();
    let mut shunt = boot(config, &battery, &power, &store);
    if let Err(error) = shunt.save_linear_calibration(config.shunt_rating, gain, offset_ma) {
        warn!("Factory calibration not stored: {}", error);
    }

    let (commands_tx, mut commands) = unbounded_channel();
    thread::spawn(move || read_keys(commands_tx));

    enable_raw_mode()?;
    let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))?;
    terminal.clear()?;

    let mut clock = SimClock {
        started: Instant::now(),
        skipped_ms: 0,
    };
    let mut ticker = interval(POLL_PERIOD);
    let mut record = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match shunt.poll(clock.now_ms()) {
                    PollOutcome::Telemetry(latest) => {
                        shunt.publish(&radio, &latest);
                        record = radio.last_received();
                    }
                    PollOutcome::Sleeping => {
                        let sleep_ms = power.take_sleep_request().unwrap_or(config.low_voltage_sleep_ms);
                        info!("Deep sleep for {} s", sleep_ms / 1000);
                        tokio::time::sleep(SLEEP_PLAYBACK).await;
                        clock.skip(sleep_ms);
                        info!("Timer wake-up, restarting");
                        shunt = boot(config, &battery, &power, &store);
                    }
                }
            }
            Some(command) = commands.recv() => {
                match command {
                    Command::LoadUp => battery.change_load(1.0),
                    Command::LoadDown => battery.change_load(-1.0),
                    Command::VoltageUp => battery.change_voltage(0.1),
                    Command::VoltageDown => battery.change_voltage(-0.1),
                    Command::ResetOvercurrent => {
                        if !shunt.reset_overcurrent() {
                            info!("No overcurrent disconnect to reset");
                        }
                    }
                    Command::ToggleAlert => {
                        let enabled = !shunt.alert_enabled();
                        if let Err(error) = shunt.set_alert_enabled(enabled) {
                            warn!("Alert setting not stored: {}", error);
                        }
                    }
                    Command::NextShunt => {
                        let rating = next_rating(shunt.shunt_rating());
                        if let Err(error) = shunt.select_shunt(rating, None) {
                            warn!("Shunt selection not stored: {}", error);
                        }
                    }
                    Command::Update => {
                        shunt.with_update_snapshot(|| info!("Firmware update finished without reboot"));
                    }
                    Command::Quit => break,
                }
            }
        }

        let view = View {
            record: record.clone(),
            load_state: shunt.load_state(),
            rating: shunt.shunt_rating(),
            alert_enabled: shunt.alert_enabled(),
            alert_limit_a: battery.alert_limit_a(),
            open_circuit_v: battery.open_circuit_v(),
            load_a: battery.load_a(),
            frames: radio.frames(),
            now_ms: clock.now_ms(),
        };
        draw_tui(&mut terminal, &view)?;
    }

    disable_raw_mode()?;
    terminal.clear()?;
    Ok(())
}

/// Firmware start, also after every wake-up
fn boot<'a>(
    config: MonitorConfig,
    battery: &'a SimBattery,
    power: &'a SimPower,
    store: &'a MemoryStore,
) -> SmartShunt<'a> {
    let mut shunt = SmartShunt::new(config, battery, battery, power, store, &ALERT);
    shunt.start();
    shunt
}

fn next_rating(rating: ShuntRating) -> ShuntRating {
    let index = ShuntRating::ALL
        .iter()
        .position(|it| *it == rating)
        .unwrap_or(0);
    ShuntRating::ALL[(index + 1) % ShuntRating::ALL.len()]
}

/// Runs on its own thread, `a` raises the alert directly like the interrupt would
fn read_keys(commands: UnboundedSender<Command>) {
    loop {
        let code = match event::read() {
            Ok(Event::Key(key)) => key.code,
            Ok(_) => continue,
            Err(_) => return,
        };
        let command = match code {
            KeyCode::Char('a') => {
                ALERT.signal();
                continue;
            }
            KeyCode::Right => Command::LoadUp,
            KeyCode::Left => Command::LoadDown,
            KeyCode::Up => Command::VoltageUp,
            KeyCode::Down => Command::VoltageDown,
            KeyCode::Char('r') => Command::ResetOvercurrent,
            KeyCode::Char('d') => Command::ToggleAlert,
            KeyCode::Char('s') => Command::NextShunt,
            KeyCode::Char('u') => Command::Update,
            KeyCode::Char('q') | KeyCode::Esc => Command::Quit,
            _ => continue,
        };
        let quit = matches!(command, Command::Quit);
        if commands.send(command).is_err() || quit {
            return;
        }
    }
}

fn status_color(status: BatteryStatus) -> Color {
    match status {
        BatteryStatus::Normal => Color::Green,
        BatteryStatus::Warning => Color::Yellow,
        BatteryStatus::Critical => Color::Red,
        BatteryStatus::Overflow => Color::Magenta,
    }
}

fn draw_tui(terminal: &mut Terminal<CrosstermBackend<Stdout>>, view: &View) -> io::Result<()> {
    terminal.draw(|rect| {
        let size = rect.size();
        let vertical_layout = Layout::default()
            .direction(Direction::Vertical)
            .margin(1)
            .constraints(
                [
                    Constraint::Length(12),
                    Constraint::Min(4),
                    Constraint::Length(3),
                ]
                .as_ref(),
            )
            .split(size);

        let mut lines = vec![];
        match &view.record {
            Some(record) => {
                lines.push(Spans::from(vec![
                    Span::raw("state:     "),
                    Span::styled(
                        format!("{:?}", record.battery_state),
                        Style::default()
                            .fg(status_color(record.battery_state))
                            .add_modifier(Modifier::BOLD),
                    ),
                ]));
                lines.push(Spans::from(format!("voltage:   {:.2} V", record.battery_voltage)));
                lines.push(Spans::from(format!("current:   {:.2} A", record.battery_current)));
                lines.push(Spans::from(format!("power:     {:.1} W", record.battery_power)));
                lines.push(Spans::from(format!(
                    "capacity:  {:.2} Ah ({:.1} %)",
                    record.battery_capacity,
                    record.battery_soc * 100.0
                )));
                lines.push(Spans::from(format!("run flat:  {}", record.run_flat_time.as_str())));
            }
            None => lines.push(Spans::from("waiting for telemetry")),
        }
        lines.push(Spans::from(format!("load:      {:?}", view.load_state)));
        lines.push(Spans::from(format!(
            "shunt:     {}A, alert {} (limit {:?})",
            view.rating.amps(),
            if view.alert_enabled { "on" } else { "off" },
            view.alert_limit_a
        )));
        lines.push(Spans::from(format!(
            "battery:   {:.1} V open circuit, {:.1} A load demand",
            view.open_circuit_v, view.load_a
        )));
        lines.push(Spans::from(format!(
            "frames:    {}, uptime {} min",
            view.frames,
            view.now_ms / 60_000
        )));

        let telemetry_paragraph = Paragraph::new(lines).alignment(Alignment::Left).block(
            Block::default()
                .title("smart shunt")
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded),
        );

        let log_height = vertical_layout[1].height.saturating_sub(2) as usize;
        let log_lines: Vec<Spans> = ui_log::recent(log_height)
            .into_iter()
            .map(Spans::from)
            .collect();
        let log_paragraph = Paragraph::new(log_lines).block(
            Block::default()
                .title("log")
                .borders(Borders::ALL)
                .border_type(BorderType::Plain),
        );

        let help_paragraph = Paragraph::new(Spans::from(
            "←/→ load  ↑/↓ voltage  a alert  r reset  d alert on/off  s shunt  u update  q quit",
        ))
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::TOP));

        rect.render_widget(telemetry_paragraph, vertical_layout[0]);
        rect.render_widget(log_paragraph, vertical_layout[1]);
        rect.render_widget(help_paragraph, vertical_layout[2]);
    })?;
    Ok(())
}
