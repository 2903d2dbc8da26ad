//! Buffer consumer - opens an exported object by name and reads it
//!
//! Usage:
//! ```bash
//! cargo run -p gembo-core --example consumer -- <name>
//! ```

use gembo_core::{AccessMode, BoManager, ShmDevice, DEFAULT_NAMESPACE};
use std::sync::Arc;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let name: u32 = std::env::args()
        .nth(1)
        .ok_or("usage: consumer <name>")?
        .parse()?;

    let manager = BoManager::new(Arc::new(ShmDevice::new(DEFAULT_NAMESPACE)));
    let bo = manager.open(name)?;
    println!("Opened name {} as handle {} ({} bytes)", name, bo.handle(), bo.size());

    bo.wait_idle()?;
    let guard = bo.mapping(AccessMode::ReadOnly)?;
    // SAFETY: the producer has finished writing before exporting.
    let data = unsafe { guard.as_slice() };
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    println!("Content: {}", String::from_utf8_lossy(&data[..end]));

    Ok(())
}
