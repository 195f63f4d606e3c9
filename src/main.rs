mod runtime;
mod settings;

use clap::{Parser, ValueEnum};
use log::{info, warn};
use std::io::{IsTerminal, Write};
use std::net::{IpAddr, TcpStream};
use std::path::PathBuf;
use std::process::ExitCode;

use mobile_bgb_adapter::{
    BridgeHost, ConfigStore, MOBILE_DEFAULT_P2P_PORT, MOBILE_DEFAULT_RELAY_PORT, MOBILE_DNS_PORT,
    MOBILE_RELAY_TOKEN_SIZE, MobileAdapter, MobileAdapterDevice, MobileAddr, MobileConfig,
    PhoneNumbers, RelayToken,
};
use mobile_bgb_core::{ClockMode, HandshakeMode, LinkConfig, SharedClock};

use runtime::{CancelToken, RunError, RunOptions};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Device {
    Blue,
    Yellow,
    Green,
    Red,
}

impl From<Device> for MobileAdapterDevice {
    fn from(value: Device) -> Self {
        match value {
            Device::Blue => MobileAdapterDevice::Blue,
            Device::Yellow => MobileAdapterDevice::Yellow,
            Device::Green => MobileAdapterDevice::Green,
            Device::Red => MobileAdapterDevice::Red,
        }
    }
}

#[derive(Parser, Debug)]
#[command(about = "Bridge a BGB link cable to an emulated Mobile Adapter GB")]
struct Args {
    /// Emulator host
    #[arg(default_value = "127.0.0.1")]
    host: String,

    /// Emulator link port
    #[arg(default_value_t = 8765)]
    port: u16,

    /// Path to the adapter config file
    #[arg(short, long, default_value = "config.bin")]
    config: PathBuf,

    /// Adapter model
    #[arg(long, value_enum)]
    device: Option<Device>,

    /// Report an unmetered connection to the game
    #[arg(long)]
    unmetered: bool,

    /// Primary DNS server
    #[arg(long)]
    dns1: Option<IpAddr>,

    /// Secondary DNS server
    #[arg(long)]
    dns2: Option<IpAddr>,

    /// Port used for both DNS servers
    #[arg(long, default_value_t = MOBILE_DNS_PORT)]
    dns_port: u16,

    /// Port to accept peer-to-peer calls on
    #[arg(long, default_value_t = MOBILE_DEFAULT_P2P_PORT)]
    p2p_port: u16,

    /// Relay server for peer-to-peer calls
    #[arg(long)]
    relay: Option<IpAddr>,

    /// Relay token as 32 hex digits; an empty string clears it
    #[arg(long, value_parser = parse_relay_token)]
    relay_token: Option<RelayToken>,

    /// Link tuning file (TOML)
    #[arg(long)]
    link_settings: Option<PathBuf>,

    /// Wait for the emulator's STATUS reply during the handshake
    #[arg(long)]
    await_status: bool,

    /// Never treat clock jumps as emulator resets
    #[arg(long)]
    clamp_only: bool,
}

fn parse_relay_token(text: &str) -> Result<RelayToken, String> {
    if text.is_empty() {
        return Ok(RelayToken::Clear);
    }
    if text.len() != MOBILE_RELAY_TOKEN_SIZE * 2 || !text.is_ascii() {
        return Err(format!(
            "expected {} hex digits",
            MOBILE_RELAY_TOKEN_SIZE * 2
        ));
    }

    let mut token = [0u8; MOBILE_RELAY_TOKEN_SIZE];
    for (i, byte) in token.iter_mut().enumerate() {
        let pair = &text[i * 2..i * 2 + 2];
        *byte = u8::from_str_radix(pair, 16).map_err(|_| format!("invalid hex digits {pair:?}"))?;
    }
    Ok(RelayToken::Set(token))
}

impl Args {
    fn mobile_config(&self) -> MobileConfig {
        let dns = |ip: Option<IpAddr>| {
            ip.map_or(MobileAddr::None, |ip| {
                MobileAddr::from(ip).with_port(self.dns_port)
            })
        };

        MobileConfig {
            device: self.device.map(Into::into).unwrap_or_default(),
            unmetered: self.unmetered,
            dns1: dns(self.dns1),
            dns2: dns(self.dns2),
            p2p_port: Some(self.p2p_port),
            relay: self.relay.map_or(MobileAddr::None, |ip| {
                MobileAddr::from(ip).with_port(MOBILE_DEFAULT_RELAY_PORT)
            }),
            relay_token: self.relay_token.unwrap_or_default(),
        }
    }

    fn run_options(&self) -> RunOptions {
        let settings = self
            .link_settings
            .as_deref()
            .map(settings::load_from_file)
            .unwrap_or_default();

        let mut link = LinkConfig::new(MobileAdapter::idle_byte());
        link.handshake = settings.handshake.into();
        link.clock = settings.clock_config();
        if self.await_status {
            link.handshake = HandshakeMode::AwaitStatus;
        }
        if self.clamp_only {
            link.clock.mode = ClockMode::ClampOnly;
        }

        RunOptions {
            link,
            poll_interval: settings.poll_interval(),
        }
    }
}

fn set_title(numbers: &PhoneNumbers) {
    let mut stdout = std::io::stdout();
    if !stdout.is_terminal() {
        return;
    }

    #[cfg(unix)]
    let _ = write!(stdout, "\x1b]0;{}\x07", numbers.title());
    #[cfg(not(unix))]
    let _ = writeln!(stdout, "{}", numbers.title());
    let _ = stdout.flush();
}

fn start(args: &Args, cancel: &CancelToken) -> Result<(), RunError> {
    let options = args.run_options();
    let clock = SharedClock::new();

    let store = ConfigStore::open(&args.config).map_err(RunError::Config)?;
    let host = BridgeHost::new(store, clock.clone()).with_number_sink(set_title);
    set_title(host.numbers());

    let mut adapter = MobileAdapter::new(Box::new(host))?;
    adapter.apply_config(&args.mobile_config());

    let addr = format!("{}:{}", args.host, args.port);
    info!("Bridge: connecting to {addr}");
    let stream = TcpStream::connect(&addr).map_err(|source| RunError::Connect {
        addr: addr.clone(),
        source,
    })?;
    if let Err(e) = stream.set_nodelay(true) {
        warn!("Bridge: could not disable Nagle on emulator link: {e}");
    }
    info!("Bridge: connected to {addr}");

    runtime::run(stream, adapter, clock, &options, cancel)
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_token.cancel()) {
        warn!("Bridge: could not install Ctrl+C handler: {e}");
    }

    match start(&args, &cancel) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
