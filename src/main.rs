use clap::Parser;
use led_strip_controller::domain::color::{LedColor, RgbColor};
use led_strip_controller::domain::favorites::{FavoritesStore, JsonFileStorage};
use led_strip_controller::domain::settings::SettingsService;
use led_strip_controller::infrastructure::bluetooth::btleplug_transport::{
    default_adapter, BtleplugTransport,
};
use led_strip_controller::infrastructure::bluetooth::LedController;
use led_strip_controller::infrastructure::logging::init_logger;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "led_strip_controller")]
#[command(about = "Control ELK-BLEDOM style LED strips over Bluetooth LE")]
struct Cli {
    /// Settings file (defaults to the user config directory)
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Log level override ("trace", "debug", "info", "warn", "error")
    #[arg(short, long)]
    log_level: Option<String>,
}

const HELP: &str = "\
commands:
  scan | stop | devices
  connect <id> | reconnect | disconnect
  color <r> <g> <b> | named <red|blue|green|purple|white>
  brightness <0-100> | up | down | on | off
  fav add <r> <g> <b> | fav rm <r> <g> <b> | fav ls
  show-all on|off | status | help | quit";

#[derive(Debug, PartialEq, Eq)]
enum CliCommand {
    Scan,
    Stop,
    Devices,
    Connect(String),
    Reconnect,
    Disconnect,
    Color(i32, i32, i32),
    Named(LedColor),
    Brightness(i32),
    Up,
    Down,
    Power(bool),
    FavoriteAdd(i32, i32, i32),
    FavoriteRemove(i32, i32, i32),
    FavoriteList,
    ShowAll(bool),
    Status,
    Help,
    Quit,
}

fn parse_rgb(args: &[&str]) -> Result<(i32, i32, i32), String> {
    let values = args
        .iter()
        .map(|a| a.parse::<i32>().map_err(|_| format!("not a number: {}", a)))
        .collect::<Result<Vec<_>, _>>()?;
    match values.as_slice() {
        [r, g, b] => Ok((*r, *g, *b)),
        _ => Err("expected three values: <r> <g> <b>".to_string()),
    }
}

fn parse_switch(arg: Option<&&str>) -> Result<bool, String> {
    match arg.copied() {
        Some("on") => Ok(true),
        Some("off") => Ok(false),
        _ => Err("expected on|off".to_string()),
    }
}

fn parse_command(line: &str) -> Result<CliCommand, String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((&head, args)) = words.split_first() else {
        return Err("empty command".to_string());
    };

    match head {
        "scan" => Ok(CliCommand::Scan),
        "stop" => Ok(CliCommand::Stop),
        "devices" => Ok(CliCommand::Devices),
        "connect" => args
            .first()
            .map(|id| CliCommand::Connect(id.to_string()))
            .ok_or_else(|| "usage: connect <id>".to_string()),
        "reconnect" => Ok(CliCommand::Reconnect),
        "disconnect" => Ok(CliCommand::Disconnect),
        "color" => parse_rgb(args).map(|(r, g, b)| CliCommand::Color(r, g, b)),
        "named" => args
            .first()
            .and_then(|n| LedColor::from_name(n))
            .map(CliCommand::Named)
            .ok_or_else(|| "usage: named <red|blue|green|purple|white>".to_string()),
        "brightness" => args
            .first()
            .and_then(|p| p.parse().ok())
            .map(CliCommand::Brightness)
            .ok_or_else(|| "usage: brightness <0-100>".to_string()),
        "up" => Ok(CliCommand::Up),
        "down" => Ok(CliCommand::Down),
        "on" => Ok(CliCommand::Power(true)),
        "off" => Ok(CliCommand::Power(false)),
        "fav" => match args.split_first() {
            Some((&"add", rgb)) => parse_rgb(rgb).map(|(r, g, b)| CliCommand::FavoriteAdd(r, g, b)),
            Some((&"rm", rgb)) => {
                parse_rgb(rgb).map(|(r, g, b)| CliCommand::FavoriteRemove(r, g, b))
            }
            Some((&"ls", _)) => Ok(CliCommand::FavoriteList),
            _ => Err("usage: fav add|rm <r> <g> <b> | fav ls".to_string()),
        },
        "show-all" => parse_switch(args.first()).map(CliCommand::ShowAll),
        "status" => Ok(CliCommand::Status),
        "help" => Ok(CliCommand::Help),
        "quit" | "exit" => Ok(CliCommand::Quit),
        other => Err(format!("unknown command: {}", other)),
    }
}

fn execute(controller: &LedController, command: CliCommand) -> anyhow::Result<()> {
    match command {
        CliCommand::Scan => controller.start_scanning()?,
        CliCommand::Stop => controller.stop_scanning()?,
        CliCommand::Devices => {
            let devices = controller.discovered_devices();
            if devices.is_empty() {
                println!("no devices found (run `scan` first)");
            }
            for device in devices {
                println!(
                    "{}  {}  RSSI {}",
                    device.id,
                    device.name,
                    device
                        .signal_strength
                        .map(|r| r.to_string())
                        .unwrap_or_else(|| "?".to_string())
                );
            }
        }
        CliCommand::Connect(id) => controller.connect(id.as_str())?,
        CliCommand::Reconnect => controller.reconnect_to_last_known_device()?,
        CliCommand::Disconnect => controller.disconnect()?,
        CliCommand::Color(r, g, b) => controller.set_color(r, g, b)?,
        CliCommand::Named(color) => controller.set_named_color(color)?,
        CliCommand::Brightness(percent) => controller.set_brightness(percent)?,
        CliCommand::Up => controller.increase_brightness()?,
        CliCommand::Down => controller.decrease_brightness()?,
        CliCommand::Power(on) => controller.set_power(on)?,
        CliCommand::FavoriteAdd(r, g, b) => {
            if !controller.add_favorite(RgbColor::new(r, g, b)?)? {
                println!("not added (duplicate or list full)");
            }
        }
        CliCommand::FavoriteRemove(r, g, b) => {
            if !controller.remove_favorite(RgbColor::new(r, g, b)?)? {
                println!("not a favorite");
            }
        }
        CliCommand::FavoriteList => {
            for color in controller.list_favorites()? {
                println!("{}", color);
            }
        }
        CliCommand::ShowAll(show_all) => controller.set_show_all_devices(show_all)?,
        CliCommand::Status => {
            let s = controller.snapshot();
            println!(
                "{} [{:?}] radio={:?} scanning={} device={} brightness={}% color={}",
                s.connection_status_text(),
                s.phase,
                s.radio_state,
                s.is_scanning,
                s.device_name.as_deref().unwrap_or("-"),
                s.current_brightness_percent,
                s.current_color
            );
        }
        CliCommand::Help => println!("{}", HELP),
        CliCommand::Quit => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings_service = match cli.settings {
        Some(path) => SettingsService::from_path(path),
        None => SettingsService::new()?,
    };
    if let Some(level) = cli.log_level {
        settings_service.get_mut().log_settings.level = level;
    }

    let _logging_guard = init_logger(&settings_service.get().log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    tracing::info!("Starting LED Strip Controller");

    let favorites_path = SettingsService::config_dir()?.join("favorites.json");
    let favorites = FavoritesStore::load(Box::new(JsonFileStorage::new(favorites_path)));
    let settings = Arc::new(Mutex::new(settings_service));

    let adapter = default_adapter().await?;
    // The transport reports the adapter's power state on start. PoweredOn
    // reconnects to the saved device or starts a scan.
    let controller = LedController::spawn(settings, favorites, |sink| {
        BtleplugTransport::new(adapter, sink)
    })?;

    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match parse_command(&line) {
            Ok(CliCommand::Quit) => break,
            Ok(command) => {
                if let Err(e) = execute(&controller, command) {
                    println!("error: {}", e);
                }
            }
            Err(e) => println!("{}", e),
        }
    }

    controller.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command("scan"), Ok(CliCommand::Scan));
        assert_eq!(
            parse_command("color 255 0 128"),
            Ok(CliCommand::Color(255, 0, 128))
        );
        assert_eq!(
            parse_command("named purple"),
            Ok(CliCommand::Named(LedColor::Purple))
        );
        assert_eq!(parse_command("brightness 40"), Ok(CliCommand::Brightness(40)));
        assert_eq!(parse_command("off"), Ok(CliCommand::Power(false)));
        assert_eq!(parse_command("show-all on"), Ok(CliCommand::ShowAll(true)));
        assert_eq!(
            parse_command("fav add 1 2 3"),
            Ok(CliCommand::FavoriteAdd(1, 2, 3))
        );
        assert_eq!(parse_command("fav ls"), Ok(CliCommand::FavoriteList));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse_command("color 1 2").is_err());
        assert!(parse_command("color a b c").is_err());
        assert!(parse_command("connect").is_err());
        assert!(parse_command("show-all maybe").is_err());
        assert!(parse_command("dance").is_err());
    }
}
