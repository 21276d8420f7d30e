// Tioga Engine - display core demo
// Copyright (c) 2026

use anyhow::Result;
use tioga::prelude::*;
use tioga::util::logging;

fn main() -> Result<()> {
    // Initialize logging
    // Set default log level to info
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info,tioga=debug");
    }
    tracing_subscriber::fmt()
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::new(
            "%Y-%m-%d %H:%M:%S".to_string(),
        ))
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_ansi(false)
        .init();

    tioga::elog!(logging::MAIN, "starting display core demo");

    let mut display = Display::connect()?;

    let window = display.create_window(&WindowConfig {
        x: 0,
        y: 0,
        width: 600,
        height: 400,
        title: "tioga".to_string(),
    })?;

    // one pump per frame; the receive inside blocks until the compositor
    // has something for us
    while !display.should_close(window) {
        display.pump()?;
    }

    display.destroy_window(window)?;
    tioga::elog!(logging::MAIN, "window closed, shutting down");

    Ok(())
}
