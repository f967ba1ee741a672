//! chardev - bring a device up, exchange one message, tear it down
//!
//! # Usage
//!
//! ```bash
//! # In-memory namespace
//! chardev "some data"
//!
//! # Publish class/ and dev/ entries under a directory
//! chardev --root /tmp/chardev-root --name chardev "some data"
//! ```

use chardev::{bring_up, DeviceConfig, DeviceHost, FsHost, MemoryHost, OverflowPolicy};
use clap::{Parser, ValueEnum};
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "chardev")]
#[command(about = "Exercise an exclusive single-buffer character device")]
#[command(version)]
struct Args {
    /// Message to write to the device
    #[arg(default_value = "test")]
    message: String,

    /// Directory to publish the device namespace under (in-memory if unset)
    #[arg(short, long)]
    root: Option<String>,

    /// Device node name
    #[arg(short, long, default_value = chardev::config::DEFAULT_DEVICE_NAME)]
    name: String,

    /// Device class name
    #[arg(short, long, default_value = chardev::config::DEFAULT_CLASS_NAME)]
    class: String,

    /// Message buffer size in bytes
    #[arg(long, default_value_t = chardev::config::DEFAULT_CAPACITY)]
    capacity: usize,

    /// What to do with writes that do not fit the buffer
    #[arg(long, value_enum, default_value = "reject")]
    overflow: OverflowArg,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, ValueEnum)]
enum OverflowArg {
    Reject,
    Truncate,
}

impl From<OverflowArg> for OverflowPolicy {
    fn from(arg: OverflowArg) -> Self {
        match arg {
            OverflowArg::Reject => OverflowPolicy::Reject,
            OverflowArg::Truncate => OverflowPolicy::Truncate,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = DeviceConfig {
        device_name: args.name.clone(),
        class_name: args.class.clone(),
        capacity: args.capacity,
        overflow: args.overflow.into(),
    };

    match &args.root {
        Some(root) => exchange(Arc::new(FsHost::open(root)?), config, &args.message),
        None => exchange(Arc::new(MemoryHost::new()), config, &args.message),
    }
}

fn exchange<H: DeviceHost>(
    host: Arc<H>,
    config: DeviceConfig,
    message: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Starting device test code example...");

    let capacity = config.capacity;
    let registered = bring_up(host, config)?;
    println!(
        "Device '{}' registered as {}",
        registered.device().name(),
        registered.identity()
    );

    {
        let mut session = registered.device().open()?;

        let sent = session.write(message.as_bytes())?;
        println!("Sent {} bytes...", sent);

        let mut buf = vec![0u8; capacity];
        let received = session.read(&mut buf)?;
        println!(
            "Incoming message: {}",
            String::from_utf8_lossy(&buf[..received])
        );
    }

    println!("Device opened {} time(s)", registered.device().open_count());
    registered.teardown()?;
    Ok(())
}
