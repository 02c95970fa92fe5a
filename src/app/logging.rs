use std::{fs::File, path::Path, str::FromStr, sync::Mutex};

use tracing_subscriber::{layer::SubscriberExt, Layer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Off,
}

impl Level {
    fn as_level_filter(&self) -> tracing_subscriber::filter::LevelFilter {
        match self {
            Self::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
            Self::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
            Self::Info => tracing_subscriber::filter::LevelFilter::INFO,
            Self::Warn => tracing_subscriber::filter::LevelFilter::WARN,
            Self::Error => tracing_subscriber::filter::LevelFilter::ERROR,
            Self::Off => tracing_subscriber::filter::LevelFilter::OFF,
        }
    }
}

impl Default for Level {
    fn default() -> Self {
        Self::Off
    }
}

impl FromStr for Level {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "off" => Ok(Self::Off),
            _ => Err(()),
        }
    }
}

pub fn set_up_logging(level: Level, file: Option<&Path>, json: bool) -> std::io::Result<()> {
    let file_sub = if let Some(path) = file {
        let writer = File::options().create(true).append(true).open(path)?;
        Some(tracing_subscriber::fmt::layer().with_writer(Mutex::new(writer)))
    } else {
        None
    };

    let stderr_sub = if file.is_none() {
        Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
    } else {
        None
    };

    let json_sub = if json {
        Some(tracing_subscriber::fmt::layer().json())
    } else {
        None
    };

    let sub = tracing_subscriber::Registry::default();
    let sub = sub.with(file_sub.with_filter(level.as_level_filter()));
    let sub = sub.with(stderr_sub.with_filter(level.as_level_filter()));
    let sub = sub.with(json_sub);
    tracing::subscriber::set_global_default(sub).unwrap();

    tracing::debug!("logging configured");

    Ok(())
}
