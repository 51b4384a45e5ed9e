mod config;

use clap::{Parser, Subcommand};
use config::NotifyConfig;
use lametric_core::homeassistant::HomeAssistant;
use lametric_core::notification::{AnimationSpec, NotificationFrame, Sound};
use lametric_core::transport::HttpTransport;
use lametric_core::{
    CaptureBridge, DeviceClient, LametricError, NotificationDispatcher, PlayMp3, PlayTts,
    Priority, ServiceCall, Services, SetpointChange, SetpointDirection, UrlResolver,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

const DEVICE_ID: &str = "default";

#[derive(Parser, Debug)]
#[command(name = "lametric-notify", version, about = "Send notifications, sounds and TTS to a LaMetric device")]
struct Cli {
    /// Device host or base URL (overrides LAMETRIC_HOST)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Device API key (overrides LAMETRIC_API_KEY)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Platform URL the device can reach, used for `/local/...` paths
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play an MP3 URL or platform path on the device
    PlayMp3 {
        text: String,
        url: String,
        #[arg(long)]
        icon: Option<String>,
        #[arg(long)]
        cycles: Option<u32>,
        #[arg(long)]
        critical: bool,
    },
    /// Render a message through the platform TTS engine and play it
    PlayTts {
        message: String,
        #[arg(long)]
        engine: Option<String>,
        #[arg(long)]
        voice: Option<String>,
        #[arg(long)]
        icon: Option<String>,
    },
    /// Step through text frames, one notification each
    Animate {
        #[arg(required = true)]
        frames: Vec<String>,
        #[arg(long, default_value_t = 500)]
        hold_ms: u64,
        #[arg(long, default_value_t = 1)]
        repeat: u32,
        /// Sound for the first frame
        #[arg(long)]
        sound: Option<String>,
    },
    /// Blink a thermostat setpoint change
    Setpoint {
        temperature_c: f64,
        #[arg(long)]
        down: bool,
    },
    /// Run a JSON service call, e.g. '{"service":"dismiss_all"}'
    Call { json: String },
    DismissCurrent,
    DismissAll,
    /// List installed apps
    Apps,
    /// List queued notifications
    Notifications,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info,lametric_core=info,lametric_notify=info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let cli = Cli::parse();

    // Defaults + env + optional TOML overlay, then CLI flags on top
    let mut cfg = NotifyConfig::load();
    if let Some(host) = cli.host {
        cfg.device.host = host;
    }
    if let Some(key) = cli.api_key {
        cfg.device.api_key = key;
    }
    if let Some(url) = cli.base_url {
        cfg.base_url = Some(url);
    }
    if cfg.device.host.is_empty() {
        return Err(LametricError::ConfigError(
            "no device host; set LAMETRIC_HOST or pass --host".to_string(),
        )
        .into());
    }

    let device_transport = Arc::new(HttpTransport::for_device(
        &cfg.device.api_key,
        cfg.device.verify_ssl,
    )?);
    let device = Arc::new(DeviceClient::new(device_transport, cfg.device.host.clone()));

    let hass_transport = Arc::new(HttpTransport::for_home_assistant(
        cfg.hass.token.as_deref().unwrap_or_default(),
        cfg.hass.verify_ssl,
    )?);
    let hass = Arc::new(HomeAssistant::new(hass_transport, cfg.hass_config()));
    let bridge = Arc::new(CaptureBridge::new(
        hass.clone(),
        hass.clone(),
        cfg.capture_config(),
    ));

    let base_url = cfg.base_url.clone().unwrap_or_else(|| cfg.hass.url.clone());
    let dispatcher = Arc::new(NotificationDispatcher::new(
        Arc::clone(&device),
        bridge,
        UrlResolver::new(Some(&base_url)),
        cfg.dispatcher_config(),
    )
    .with_media_source(hass));

    let services = Arc::new(Services::new());
    services.register(DEVICE_ID, Arc::clone(&dispatcher));

    info!(target: "lametric_notify", host = %cfg.device.host, "LaMetric notify starting");

    let call = match cli.command {
        Command::Apps => {
            for app in device.get_apps().await? {
                println!(
                    "{}\t{}",
                    app.package,
                    app.version.as_deref().unwrap_or("-")
                );
            }
            return Ok(());
        }
        Command::Notifications => {
            for n in device.list_notifications().await? {
                println!("{}\t{}", n.id, n.created.as_deref().unwrap_or("-"));
            }
            return Ok(());
        }
        command => service_call(command)?,
    };

    let work = {
        let services = Arc::clone(&services);
        tokio::spawn(async move { services.handle(call).await })
    };

    // Ctrl-C cancels whatever is in flight; the call still reports its outcome
    let stop = {
        let services = Arc::clone(&services);
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                info!(target: "lametric_notify", "Ctrl-C received; cancelling");
                services.shutdown();
            }
        })
    };

    let outcome = work.await?;
    stop.abort();

    match outcome {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Err(e) if e.is_expected() => {
            info!(target: "lametric_notify", reason = %e, "Stopped");
            Ok(())
        }
        Err(e) => {
            error!(target: "lametric_notify", error = %e, "Service call failed");
            Err(e.into())
        }
    }
}

fn service_call(command: Command) -> Result<ServiceCall, LametricError> {
    let device_id = Some(DEVICE_ID.to_string());
    let call = match command {
        Command::PlayMp3 {
            text,
            url,
            icon,
            cycles,
            critical,
        } => ServiceCall::PlayMp3Url {
            device_id,
            request: PlayMp3 {
                text,
                url,
                icon,
                cycles,
                priority: critical.then_some(Priority::Critical),
            },
        },
        Command::PlayTts {
            message,
            engine,
            voice,
            icon,
        } => ServiceCall::PlayTts {
            device_id,
            request: PlayTts {
                message,
                tts_entity_id: engine,
                voice,
                icon,
                priority: None,
            },
        },
        Command::Animate {
            frames,
            hold_ms,
            repeat,
            sound,
        } => {
            let mut frames: Vec<NotificationFrame> =
                frames.into_iter().map(NotificationFrame::text).collect();
            if let (Some(url), Some(first)) = (sound, frames.first_mut()) {
                first.sound = Some(Sound::mp3(url));
            }
            ServiceCall::PlayAnimation {
                device_id,
                spec: AnimationSpec::new(frames, Duration::from_millis(hold_ms), repeat)?,
            }
        }
        Command::Setpoint {
            temperature_c,
            down,
        } => ServiceCall::ShowSetpointChange {
            device_id,
            request: SetpointChange {
                temperature_c,
                direction: if down {
                    SetpointDirection::Down
                } else {
                    SetpointDirection::Up
                },
                arrow_up_icon: None,
                arrow_down_icon: None,
                cycles: None,
                priority: None,
            },
        },
        Command::Call { json } => {
            let mut value: serde_json::Value = serde_json::from_str(&json)?;
            if let Some(obj) = value.as_object_mut() {
                obj.entry("device_id")
                    .or_insert_with(|| serde_json::Value::String(DEVICE_ID.to_string()));
            }
            serde_json::from_value(value)?
        }
        Command::DismissCurrent => ServiceCall::DismissCurrent { device_id },
        Command::DismissAll => ServiceCall::DismissAll { device_id },
        Command::Apps | Command::Notifications => {
            return Err(LametricError::InvalidRequest(
                "not a service call".to_string(),
            ))
        }
    };
    Ok(call)
}
