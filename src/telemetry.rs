//! Optional JSON trace logging kept off the terminal so relayed output stays clean.

use crate::config::LogArgs;
use std::env;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use tracing_subscriber::fmt::time::UtcTime;

const TRACE_LOG_ENV: &str = "TERMCHANNEL_TRACE_LOG";

static TRACING_INIT: OnceLock<()> = OnceLock::new();
static LOG_CONTENT_ENABLED: AtomicBool = AtomicBool::new(false);

/// Where trace lines are appended.
pub fn tracing_log_path() -> PathBuf {
    env::var(TRACE_LOG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::temp_dir().join("termchannel_trace.jsonl"))
}

#[inline]
fn tracing_enabled(args: &LogArgs) -> bool {
    args.logs && !args.no_logs
}

/// `--log-content` only counts when the trace log itself is on.
fn content_logging_requested(args: &LogArgs) -> bool {
    tracing_enabled(args) && args.log_content
}

/// Whether payload text (commands, lines) may be written to the trace log.
pub fn content_logging_enabled() -> bool {
    LOG_CONTENT_ENABLED.load(Ordering::Relaxed)
}

fn install_json_subscriber(path: &Path) -> bool {
    let Ok(file) = OpenOptions::new().create(true).append(true).open(path) else {
        return false;
    };
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_timer(UtcTime::rfc_3339())
        .with_writer(file)
        .with_current_span(false)
        .with_span_list(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
    true
}

fn init_tracing_once(args: &LogArgs, once: &OnceLock<()>) {
    // The payload gate follows the latest flags even after the subscriber is installed.
    LOG_CONTENT_ENABLED.store(content_logging_requested(args), Ordering::Relaxed);
    if tracing_enabled(args) {
        once.get_or_init(|| {
            install_json_subscriber(&tracing_log_path());
        });
    }
}

/// Install the global JSON subscriber once, if the flags ask for it.
pub fn init_tracing(args: &LogArgs) {
    init_tracing_once(args, &TRACING_INIT);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::fs;
    use std::sync::Mutex;

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    fn flags(logs: bool, no_logs: bool, log_content: bool) -> LogArgs {
        LogArgs {
            logs,
            no_logs,
            log_content,
        }
    }

    fn scratch_trace_path(label: &str) -> PathBuf {
        let path = env::temp_dir().join(format!(
            "termchannel-trace-{label}-{}.jsonl",
            std::process::id()
        ));
        let _ = fs::remove_file(&path);
        path
    }

    #[rstest]
    #[case::everything_off(flags(false, false, false), false)]
    #[case::content_without_logs(flags(false, false, true), false)]
    #[case::logs_without_content(flags(true, false, false), false)]
    #[case::logs_and_content(flags(true, false, true), true)]
    #[case::no_logs_wins(flags(true, true, true), false)]
    fn log_content_needs_an_enabled_trace_log(#[case] args: LogArgs, #[case] expected: bool) {
        assert_eq!(content_logging_requested(&args), expected);
    }

    #[test]
    fn trace_path_follows_env_then_falls_back_to_temp_dir() {
        let _guard = env_lock().lock().expect("env lock");
        let custom = scratch_trace_path("custom");
        env::set_var(TRACE_LOG_ENV, &custom);
        assert_eq!(tracing_log_path(), custom);

        env::remove_var(TRACE_LOG_ENV);
        assert_eq!(
            tracing_log_path(),
            env::temp_dir().join("termchannel_trace.jsonl")
        );
    }

    #[test]
    fn content_gate_tracks_each_init_call() {
        let _guard = env_lock().lock().expect("env lock");
        let path = scratch_trace_path("gate");
        env::set_var(TRACE_LOG_ENV, &path);
        let once = OnceLock::new();

        init_tracing_once(&flags(true, false, true), &once);
        assert!(content_logging_enabled());
        assert!(path.exists(), "enabled logs open the trace file");

        init_tracing_once(&flags(true, false, false), &once);
        assert!(!content_logging_enabled());

        init_tracing_once(&flags(false, false, true), &once);
        assert!(!content_logging_enabled());

        env::remove_var(TRACE_LOG_ENV);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn disabled_logs_never_touch_the_trace_file() {
        let _guard = env_lock().lock().expect("env lock");
        let path = scratch_trace_path("off");
        env::set_var(TRACE_LOG_ENV, &path);

        init_tracing_once(&flags(true, true, true), &OnceLock::new());
        assert!(!path.exists());
        assert!(!content_logging_enabled());

        env::remove_var(TRACE_LOG_ENV);
    }

    #[test]
    fn unwritable_trace_path_is_reported_not_raised() {
        let missing_dir = scratch_trace_path("no-dir").join("nested").join("trace.jsonl");
        assert!(!install_json_subscriber(&missing_dir));
    }
}
