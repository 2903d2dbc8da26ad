//! Buffer producer - allocates an object and exports it by name
//!
//! Keeps running so a consumer can open the object.
//!
//! Usage:
//! ```bash
//! cargo run -p gembo-core --example producer
//! ```

use gembo_core::{AccessMode, BoManager, CreateFlags, Domains, ShmDevice, DEFAULT_NAMESPACE};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let manager = BoManager::new(Arc::new(ShmDevice::new(DEFAULT_NAMESPACE)));

    let bo = manager.create(4096, 4096, Domains::GTT, CreateFlags::empty())?;
    let data = b"Hello from producer! This is a shared buffer object.";
    {
        let mut guard = bo.mapping(AccessMode::ReadWrite)?;
        // SAFETY: nobody else knows the name yet.
        let bytes = unsafe { guard.as_mut_slice()? };
        bytes[..data.len()].copy_from_slice(data);
    }

    let name = bo.export_name()?;
    println!("Written {} bytes to handle {}", data.len(), bo.handle());
    println!("Global name: {}", name);
    println!("\nRun: cargo run -p gembo-core --example consumer -- {}", name);
    println!("Press Ctrl+C to exit...");

    loop {
        thread::sleep(Duration::from_secs(1));
    }
}
