//! Tracing / logging initialisation.

use std::collections::HashMap;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log level per component.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    pub level: String,
    /// Override per component: crate name → level
    pub components: HashMap<String, String>,
    /// Emit JSON structured logs (true) or human-readable text (false)
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            components: HashMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// Parse `component=level` overrides, e.g. `arenaindex_evm=debug`.
    pub fn with_overrides(mut self, overrides: &[String]) -> anyhow::Result<Self> {
        for entry in overrides {
            let (component, level) = entry
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("log override '{entry}' is not component=level"))?;
            self.components.insert(component.trim().to_string(), level.trim().to_string());
        }
        Ok(self)
    }

    fn directives(&self) -> String {
        let mut directives = self.level.clone();
        for (component, level) in &self.components {
            directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
        }
        directives
    }
}

/// Initialise tracing once at startup. Logs go to stderr so command output
/// on stdout stays machine-readable.
pub fn init_tracing(config: &LogConfig) {
    let filter = EnvFilter::try_new(config.directives()).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
