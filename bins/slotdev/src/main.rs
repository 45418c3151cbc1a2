use anyhow::Context;
use slotdev_config::DeviceConfig;
use slotdev_core::{CTL_GET_DATA, Device, InMemoryRegistrar, Metadata, OpenFlags};
use std::thread;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => DeviceConfig::load(path).context("failed to load config")?,
        None => DeviceConfig::default(),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let registrar = InMemoryRegistrar::new();
    let device =
        Device::init(&config, Box::new(registrar.clone())).context("failed to bring device up")?;

    info!(
        name = device.name(),
        number = %device.number(),
        ready_delay = ?config.ready_delay(),
        "waiting for a reader to be let through"
    );

    let start = Instant::now();
    let received = thread::scope(|s| -> anyhow::Result<Vec<u8>> {
        let reader = s.spawn(|| -> anyhow::Result<Vec<u8>> {
            let mut session = device.open(OpenFlags::BLOCKING);
            let mut buf = vec![0u8; config.capacity];
            let mut received = Vec::new();
            loop {
                let n = session.read(&mut buf).context("read failed")?;
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
            }
            Ok(received)
        });

        let mut writer = device.open(OpenFlags::NONBLOCK);
        let count = writer.write(b"hello").context("write failed")?;
        info!(count, "wrote payload");

        let mut meta = Metadata::default();
        writer
            .control(CTL_GET_DATA, Some(&mut meta))
            .context("control request failed")?;
        info!(size = meta.size, length = meta.length, "metadata");

        reader
            .join()
            .map_err(|_| anyhow::anyhow!("reader thread panicked"))?
    })?;

    info!(
        elapsed = ?start.elapsed(),
        payload = %String::from_utf8_lossy(&received),
        "reader done"
    );

    device.shutdown();
    info!(registered = registrar.registered().len(), "exiting");
    Ok(())
}
