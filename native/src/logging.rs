use log::{error, info, LevelFilter};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

static CRASH_LOG_PATH: Mutex<Option<PathBuf>> = Mutex::new(None);
static SENTRY_GUARD: Mutex<Option<sentry::ClientInitGuard>> = Mutex::new(None);

/// Initialize Sentry crash reporting with an optional DSN.
/// If DSN is None or empty, Sentry stays disabled.
pub fn init_sentry(dsn: Option<&str>, environment: Option<&str>) -> bool {
    let dsn_value = match dsn {
        Some(d) if !d.is_empty() => d,
        _ => {
            info!("[SENTRY] No DSN provided - Sentry disabled");
            return false;
        }
    };

    let env_cow = environment.map(|e| std::borrow::Cow::Owned(e.to_string()));

    let guard = sentry::init((
        dsn_value,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: env_cow,
            attach_stacktrace: true,
            send_default_pii: false,
            ..Default::default()
        },
    ));

    if guard.is_enabled() {
        let mut guard_lock = SENTRY_GUARD.lock().unwrap();
        *guard_lock = Some(guard);
        info!("[SENTRY] Initialized - Environment: {:?}", environment);
        true
    } else {
        info!("[SENTRY] Failed to initialize");
        false
    }
}

pub fn is_sentry_enabled() -> bool {
    let guard = SENTRY_GUARD.lock().unwrap();
    guard.as_ref().map_or(false, |g| g.is_enabled())
}

/// Shutdown Sentry, ending the session and flushing pending events.
pub fn shutdown_sentry() {
    let mut guard_lock = SENTRY_GUARD.lock().unwrap();
    if let Some(guard) = guard_lock.take() {
        info!("[SENTRY] Shutting down - flushing events");
        drop(guard);
    }
}

/// Initialize env_logger. `RUST_LOG` takes precedence over the default
/// filter.
pub fn init_logger() {
    let mut builder = env_logger::Builder::from_default_env();

    if std::env::var("RUST_LOG").is_err() {
        builder.filter_level(LevelFilter::Warn);
    }

    builder.format(|buf, record| {
        writeln!(
            buf,
            "[{}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        )
    });

    let _ = builder.try_init();
}

/// Cap the log level from the managed layer: 0 trace, 1 debug, 2 info,
/// 3 warn, anything else error.
pub fn set_level_from_code(level: i32) {
    let filter = match level {
        0 => LevelFilter::Trace,
        1 => LevelFilter::Debug,
        2 => LevelFilter::Info,
        3 => LevelFilter::Warn,
        _ => LevelFilter::Error,
    };
    log::set_max_level(filter);
}

/// Initialize crash logging and the panic hook.
pub fn init_crash_logger() {
    let log_dir = if let Some(local_data) = dirs::data_local_dir() {
        local_data.join("gazelink")
    } else {
        PathBuf::from(".")
    };

    let _ = fs::create_dir_all(&log_dir);

    let log_path = log_dir.join("native_crash.log");

    {
        let mut path_guard = CRASH_LOG_PATH.lock().unwrap();
        *path_guard = Some(log_path.clone());
    }

    std::panic::set_hook(Box::new(move |panic_info| {
        let crash_msg = format_panic_message(panic_info);

        if is_sentry_enabled() {
            sentry::capture_message(&crash_msg, sentry::Level::Fatal);
        }

        if let Err(e) = write_crash_log(&crash_msg) {
            error!("[CRASH LOGGER] Failed to write crash log: {}", e);
        }

        error!("\n{}", crash_msg);
    }));

    info!("[CRASH LOGGER] Initialized - Log: {:?}", log_path);
}

fn format_panic_message(panic_info: &std::panic::PanicHookInfo) -> String {
    let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");

    let payload = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic payload".to_string()
    };

    let location = if let Some(location) = panic_info.location() {
        format!(
            "{}:{}:{}",
            location.file(),
            location.line(),
            location.column()
        )
    } else {
        "Unknown location".to_string()
    };

    format!(
        r#"
===== NATIVE BRIDGE PANIC =====
Timestamp: {}
Location: {}
Message: {}
Thread: {:?}

Backtrace:
{:?}

"#,
        timestamp,
        location,
        payload,
        std::thread::current().name().unwrap_or("unnamed"),
        std::backtrace::Backtrace::capture()
    )
}

fn write_crash_log(message: &str) -> std::io::Result<()> {
    let path_guard = CRASH_LOG_PATH.lock().unwrap();
    if let Some(ref log_path) = *path_guard {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        writeln!(file, "{}", message)?;
    }
    Ok(())
}
