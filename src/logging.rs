use std::{env, path::Path, sync::OnceLock};
use tracing_appender::rolling::{self, RollingFileAppender};
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::SubscriberExt,
    util::SubscriberInitExt,
};

static INITED: OnceLock<()> = OnceLock::new();

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Splits `LOG_FILE` into (directory, file name). A bare file name goes to
/// `log_dir`, or the working directory.
fn file_target(log_file: &str, log_dir: Option<String>) -> (String, String) {
    let p = Path::new(log_file);
    let Some(name) = p.file_name().and_then(|s| s.to_str()) else {
        return (log_dir.unwrap_or_else(|| ".".into()), log_file.to_string());
    };
    let parent = p
        .parent()
        .map(|pp| pp.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty());
    let dir = parent.or(log_dir).unwrap_or_else(|| ".".into());
    (dir, name.to_string())
}

fn appender(dir: &str, file: &str, rotation: &str) -> RollingFileAppender {
    match rotation.to_lowercase().as_str() {
        "daily" => rolling::daily(dir, file),
        "hourly" => rolling::hourly(dir, file),
        "minutely" => rolling::minutely(dir, file),
        _ => rolling::never(dir, file),
    }
}

/// Initialize global tracing subscriber exactly once.
///
/// Env vars:
/// - RUST_LOG: env filter (e.g. "ton_watcher=debug,sqlx=warn")
/// - LOG_FORMAT: "pretty" (default) or "json"
/// - LOG_ANSI: "0" to disable ANSI colors
/// - LOG_FILE: if set, also write JSON logs to this file
/// - LOG_DIR: directory for LOG_FILE when it has no parent component
/// - LOG_ROTATION: never (default), daily, hourly or minutely
pub fn init() {
    if INITED.get().is_some() {
        return;
    }

    let console = fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(env::var("LOG_ANSI").map_or(true, |v| v != "0"));
    let format = env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".into());
    let console = if format.eq_ignore_ascii_case("json") {
        console.json().boxed()
    } else {
        console.pretty().boxed()
    };

    let file_layer = env::var("LOG_FILE")
        .ok()
        .filter(|f| !f.is_empty())
        .map(|f| {
            let (dir, file) = file_target(&f, env::var("LOG_DIR").ok());
            let rotation =
                env::var("LOG_ROTATION").unwrap_or_else(|_| "never".into());
            let target = appender(&dir, &file, &rotation);
            let (writer, guard) = tracing_appender::non_blocking(target);
            // the writer flushes until the guard drops; keep it for the process
            Box::leak(Box::new(guard));
            fmt::layer()
                .with_ansi(false)
                .with_file(true)
                .with_line_number(true)
                .with_target(true)
                .json()
                .with_writer(writer)
                .boxed()
        });

    // another subscriber may already be installed (tests, embedding)
    let _ = Registry::default()
        .with(env_filter())
        .with(console)
        .with(file_layer)
        .try_init();
    let _ = INITED.set(());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_target_resolution() {
        assert_eq!(
            file_target("/var/log/watcher.log", Some("/tmp".into())),
            ("/var/log".to_string(), "watcher.log".to_string())
        );
        assert_eq!(
            file_target("watcher.log", Some("/tmp".into())),
            ("/tmp".to_string(), "watcher.log".to_string())
        );
        assert_eq!(
            file_target("watcher.log", None),
            (".".to_string(), "watcher.log".to_string())
        );
    }
}
