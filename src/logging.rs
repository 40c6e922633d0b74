//! Structured logging setup: a root `slog::Logger` backed by an async
//! terminal drain, installed process-wide via `slog-scope`/`slog-stdlog`
//! so library crates that log through the `log` facade (e.g. `kube`) land
//! in the same drain.

use slog::{Drain, Level, Logger};

use crate::config::LoggingOpts;

pub fn build_logger(opts: &LoggingOpts) -> (Logger, slog_scope::GlobalLoggerGuard) {
    let level = if opts.error {
        Level::Error
    } else if opts.debug || opts.verbose >= 2 {
        Level::Trace
    } else if opts.verbose == 1 {
        Level::Debug
    } else {
        Level::Info
    };

    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let drain = slog::LevelFilter(drain, level).fuse();

    let log = Logger::root(
        drain,
        slog::o!("version" => env!("CARGO_PKG_VERSION"), "module" => slog::FnValue(module_and_line)),
    );

    let guard = slog_scope::set_global_logger(log.clone());
    slog_stdlog::init().ok();

    (log, guard)
}

fn module_and_line(record: &slog::Record) -> String {
    format!("{}:{}", record.module(), record.line())
}
