use crate::config::StreamingSettings;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};
use std::env;
use std::fs;
use std::io;

pub const LOG_FILE: &str = "texture_stream.log";

/// Console plus session log file, filtered by `RUST_LOG`
pub fn init_logging() -> anyhow::Result<()> {
    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let enable_backtrace = env::var("RUST_BACKTRACE").unwrap_or_else(|_| "0".to_string()) == "1";

    // Each run starts a fresh log
    if let Err(e) = fs::remove_file(LOG_FILE) {
        if e.kind() != io::ErrorKind::NotFound {
            eprintln!("Warning: Failed to remove existing {}: {}", LOG_FILE, e);
        }
    }
    let log_file = fs::File::create(LOG_FILE)?;

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new(&log_level).add_directive("slv_texture_stream=debug".parse()?),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_ansi(true)
        )
        .with(fmt::layer()
            .with_writer(log_file)
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false) // No ANSI codes in file
        )
        .try_init()?;

    std::panic::set_hook(Box::new(move |panic_info| {
        tracing::error!("Panic occurred: {}", panic_info);

        if let Some(location) = panic_info.location() {
            tracing::error!(
                "Panic location: {}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            );
        }

        if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            tracing::error!("Panic payload: {}", s);
        }

        if enable_backtrace {
            tracing::error!("Backtrace:\n{:?}", std::backtrace::Backtrace::capture());
        }
    }));

    tracing::info!("Logging initialized with level: {}", log_level);
    tracing::info!("File logging enabled: {} (session-based, cleaned on startup)", LOG_FILE);
    tracing::info!("Backtrace enabled: {}", enable_backtrace);
    Ok(())
}

/// Log system information for debugging
pub fn log_system_info() {
    tracing::info!("=== System Information ===");
    tracing::info!("OS: {}", std::env::consts::OS);
    tracing::info!("Architecture: {}", std::env::consts::ARCH);
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("GPU layer: {}", if cfg!(feature = "wgpu") { "wgpu available" } else { "host memory" });
    tracing::info!("========================");
}

/// Log the streaming budget the scheduler will run with
pub fn log_streaming_settings(settings: &StreamingSettings) {
    tracing::info!("=== Texture Streaming ===");
    tracing::info!("Profile: {:?}", settings.profile);
    tracing::info!(
        "Budget: {} MB bound / {} MB total",
        settings.memory.max_bound_texture_mem_mb,
        settings.memory.max_total_texture_mem_mb
    );
    tracing::info!("Concurrent fetches: {}", settings.fetch.max_concurrent_fetches);
    tracing::info!(
        "Residency: inactive after {}s, evictable after {}s",
        settings.residency.inactive_after_secs,
        settings.residency.deletion_candidate_after_secs
    );
    tracing::info!("Pipeline tester: {}", settings.enable_pipeline_tester);
    tracing::info!("=========================");
}
