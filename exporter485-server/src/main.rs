//! Command-line exporter serving RS-485 Modbus readings over HTTP

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use exporter485::{
    Collector, DataBits, FlowControl, Modules, Parity, PhysDecodeLevel, RtuLink, SerialSettings,
    StopBits, Timeouts,
};

mod http;

#[derive(Parser)]
#[command(name = "exporter485")]
#[command(about = "Exports readings of RS-485 Modbus devices for pull-based scraping")]
#[command(version)]
struct Cli {
    #[arg(short = 'c', long, default_value = "config.yaml", help = "Configuration file")]
    config_file: PathBuf,

    #[arg(
        short = 'p',
        long,
        default_value_t = 9485,
        value_parser = clap::value_parser!(u16).range(1..),
        help = "HTTP port to listen on"
    )]
    port: u16,

    #[arg(short = 'b', long, default_value = "0.0.0.0", help = "Address to listen on")]
    bind_addr: IpAddr,

    #[arg(short = 'd', long, default_value = "/dev/ttyXRUSB0", help = "RS-485 serial device")]
    device: String,

    #[arg(long, default_value_t = 115200, help = "Serial device baud rate")]
    baud_rate: u32,

    #[arg(long, value_enum, default_value = "N", help = "Serial device parity")]
    parity: ParityArg,

    #[arg(long, value_enum, default_value = "8", help = "Serial device data bits")]
    data_bits: DataBitsArg,

    #[arg(long, value_enum, default_value = "1", help = "Serial device stop bits")]
    stop_bits: StopBitsArg,

    #[arg(long, help = "Dry-run mode, produce fake metrics")]
    dry_run: bool,

    #[arg(long, default_value_t = 500, help = "Time to wait for the first byte of a response")]
    response_timeout_ms: u64,

    #[arg(long, default_value_t = 500, help = "Time to wait for each later byte of a response")]
    byte_timeout_ms: u64,

    #[arg(long, value_enum, default_value = "nothing", help = "Logging of serial traffic")]
    decode: DecodeArg,
}

#[derive(Copy, Clone, ValueEnum)]
enum ParityArg {
    #[value(name = "N")]
    None,
    #[value(name = "E")]
    Even,
    #[value(name = "O")]
    Odd,
}

#[derive(Copy, Clone, ValueEnum)]
enum DataBitsArg {
    #[value(name = "5")]
    Five,
    #[value(name = "6")]
    Six,
    #[value(name = "7")]
    Seven,
    #[value(name = "8")]
    Eight,
}

#[derive(Copy, Clone, ValueEnum)]
enum StopBitsArg {
    #[value(name = "1")]
    One,
    #[value(name = "2")]
    Two,
}

#[derive(Copy, Clone, ValueEnum)]
enum DecodeArg {
    Nothing,
    Length,
    Data,
}

impl Cli {
    fn serial_settings(&self) -> SerialSettings {
        SerialSettings {
            baud_rate: self.baud_rate,
            data_bits: match self.data_bits {
                DataBitsArg::Five => DataBits::Five,
                DataBitsArg::Six => DataBits::Six,
                DataBitsArg::Seven => DataBits::Seven,
                DataBitsArg::Eight => DataBits::Eight,
            },
            flow_control: FlowControl::None,
            stop_bits: match self.stop_bits {
                StopBitsArg::One => StopBits::One,
                StopBitsArg::Two => StopBits::Two,
            },
            parity: match self.parity {
                ParityArg::None => Parity::None,
                ParityArg::Even => Parity::Even,
                ParityArg::Odd => Parity::Odd,
            },
        }
    }

    fn timeouts(&self) -> Timeouts {
        Timeouts::new(
            Duration::from_millis(self.response_timeout_ms),
            Duration::from_millis(self.byte_timeout_ms),
        )
    }

    fn decode_level(&self) -> PhysDecodeLevel {
        match self.decode {
            DecodeArg::Nothing => PhysDecodeLevel::Nothing,
            DecodeArg::Length => PhysDecodeLevel::Length,
            DecodeArg::Data => PhysDecodeLevel::Data,
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    if let Err(ref e) = run(Cli::parse()).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let modules = Modules::load(&cli.config_file)?;
    tracing::info!(
        "loaded {} device classes from {}",
        modules.modules.len(),
        cli.config_file.display()
    );
    for class in &modules.modules {
        if let Err(err) = class.check() {
            tracing::warn!("device class {} cannot be collected: {}", class.name, err);
        }
    }

    let collector = if cli.dry_run {
        tracing::info!("dry-run mode, producing fake metrics");
        Collector::simulated()
    } else {
        let link = RtuLink::open(
            &cli.device,
            cli.serial_settings(),
            cli.timeouts(),
            cli.decode_level(),
        )
        .map_err(|err| format!("connection failed: {}: {}", cli.device, err))?;
        Collector::new(link)
    };

    let addr = SocketAddr::new(cli.bind_addr, cli.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("running exporter485 on {}", addr);

    axum::serve(listener, http::router::<RtuLink>(modules, collector)).await?;
    Ok(())
}
