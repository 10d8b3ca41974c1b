pub mod cli;
pub mod colors;
pub mod metrics;
pub mod shutdown;

pub fn signal_ready() {
    let _ = std::fs::write("/tmp/ready", "ready");
}

pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let disable_colors = ["1", "true"].contains(
        &std::env::var("DISABLE_COLORS")
            .unwrap_or_default()
            .to_lowercase()
            .as_str(),
    );
    owo_colors::set_override(!disable_colors);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}
