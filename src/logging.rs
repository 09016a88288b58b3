//! Logging init: stdout, plus an optional file holding only the most recent lines.

use std::{
    collections::VecDeque,
    fs, io,
    path::{Path, PathBuf},
    sync::mpsc,
    thread,
};

use tracing_subscriber::{
    EnvFilter,
    filter::LevelFilter,
    fmt::{MakeWriter, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::LogConfig;

const TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// The last `max_lines` log lines, oldest first
#[derive(Debug)]
pub struct LogRing {
    max_lines: usize,
    lines: VecDeque<String>,
}

impl LogRing {
    pub fn new(max_lines: usize) -> Self {
        Self {
            max_lines: max_lines.max(1),
            lines: VecDeque::new(),
        }
    }

    /// Append every line of `text`, dropping the oldest ones past the limit
    pub fn extend(&mut self, text: &str) {
        for line in text.lines().filter(|l| !l.is_empty()) {
            if self.lines.len() == self.max_lines {
                self.lines.pop_front();
            }
            self.lines.push_back(line.to_string());
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

/// Owns the log file. Rewrites it with the current ring after every batch.
fn run_file_sink(path: PathBuf, mut ring: LogRing, rx: mpsc::Receiver<Vec<u8>>) {
    while let Ok(first) = rx.recv() {
        ring.extend(&String::from_utf8_lossy(&first));
        while let Ok(more) = rx.try_recv() {
            ring.extend(&String::from_utf8_lossy(&more));
        }
        if let Err(e) = fs::write(&path, ring.render()) {
            // tracing would loop back into this sink
            eprintln!("failed to write log file {}: {e}", path.display());
        }
    }
}

/// Writer handed to the fmt layer. Each formatted event becomes one message to the sink
pub struct RingFileWriter(mpsc::Sender<Vec<u8>>);

impl io::Write for RingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // a closed sink only loses file output, stdout still has the line
        let _ = self.0.send(buf.to_vec());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct RingFileMakeWriter(mpsc::Sender<Vec<u8>>);

impl<'a> MakeWriter<'a> for RingFileMakeWriter {
    type Writer = RingFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        RingFileWriter(self.0.clone())
    }
}

fn spawn_file_sink(path: &Path, max_lines: usize) -> io::Result<RingFileMakeWriter> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    // carry over what the previous run left behind
    let mut ring = LogRing::new(max_lines);
    match fs::read_to_string(path) {
        Ok(existing) => ring.extend(&existing),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    fs::write(path, ring.render())?;

    let (tx, rx) = mpsc::channel();
    let path = path.to_path_buf();
    thread::Builder::new()
        .name("log-file".to_string())
        .spawn(move || run_file_sink(path, ring, rx))?;
    Ok(RingFileMakeWriter(tx))
}

/// Install the global subscriber. Filter comes from `RUST_LOG`, defaulting to info.
pub fn init_logging(config: &LogConfig) -> color_eyre::Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let stdout_layer =
        tracing_subscriber::fmt::layer().with_timer(ChronoLocal::new(TIME_FORMAT.to_string()));

    let file_layer = match config.log_path() {
        Some(path) => {
            let writer = spawn_file_sink(&path, config.log_max_lines)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
                    .with_ansi(false)
                    .with_writer(writer),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()?;

    if let Some(path) = config.log_path() {
        tracing::info!(
            "Logging to {}, keeping the last {} lines",
            path.display(),
            config.log_max_lines
        );
    }
    Ok(())
}
