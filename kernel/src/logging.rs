use log::{self, Level, LevelFilter, Log, Metadata, Record};

struct SimpleLogger;

static LOGGER: SimpleLogger = SimpleLogger;

impl Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Debug
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let color = match record.level() {
            Level::Error => 31,
            Level::Warn => 93,
            Level::Info => 34,
            Level::Debug => 32,
            Level::Trace => 36,
        };

        println!(
            "\u{1B}[{}m[{:>5}] {} \u{1B}[0m",
            color,
            record.level(),
            record.args(),
        );
    }

    fn flush(&self) {}
}

pub fn init() {
    log::set_logger(&LOGGER).unwrap();

    log::set_max_level(match option_env!("RUST_LOG") {
        Some("ERROR") | Some("error") => LevelFilter::Error,
        Some("WARN") | Some("warn") => LevelFilter::Warn,
        Some("INFO") | Some("info") => LevelFilter::Info,
        Some("DEBUG") | Some("debug") => LevelFilter::Debug,
        Some("TRACE") | Some("trace") => LevelFilter::Trace,
        Some(_) => LevelFilter::Off,
        None => LevelFilter::Info,
    });
}
