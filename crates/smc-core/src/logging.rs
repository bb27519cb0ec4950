use crate::Result;

/// Initialize tracing for a binary embedding the connector.
///
/// Defaults to info for our crates; `RUST_LOG` overrides it. Calling it twice
/// is harmless.
pub fn init(service_name: &str) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("info,smc=info,smc_core=info,{service_name}=info"))
    });

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(true)
        .try_init();

    Ok(())
}
