//! env_logger setup with an optional size-rotated log file.

use env_logger::{Builder, Env, Target};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const MAX_LOG_BYTES: u64 = 1024 * 1024;
/// Writes between file size checks.
const ROTATE_CHECK_EVERY: u32 = 50;

/// Appends to a file, moving it aside to `<name>.old.<ext>` once it grows
/// past `max_bytes`.
pub struct RotatingFile {
    path: PathBuf,
    file: File,
    max_bytes: u64,
    writes: u32,
}

impl RotatingFile {
    pub fn open(path: &Path) -> io::Result<Self> {
        Self::with_limit(path, MAX_LOG_BYTES)
    }

    pub fn with_limit(path: &Path, max_bytes: u64) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(Self {
            path: path.to_path_buf(),
            file: open_append(path)?,
            max_bytes,
            writes: 0,
        })
    }

    pub fn rotated_path(path: &Path) -> PathBuf {
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("log");
        let name = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{}.old.{}", stem, ext),
            None => format!("{}.old", stem),
        };
        path.with_file_name(name)
    }

    fn rotate_if_needed(&mut self) -> io::Result<()> {
        let len = self.file.metadata()?.len();
        if len <= self.max_bytes {
            return Ok(());
        }
        self.file.flush()?;
        fs::rename(&self.path, Self::rotated_path(&self.path))?;
        self.file = open_append(&self.path)?;
        Ok(())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.writes += 1;
        if self.writes >= ROTATE_CHECK_EVERY {
            self.writes = 0;
            // Logging must keep going even if the move fails.
            let _ = self.rotate_if_needed();
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Mirrors every record to stderr and, when set, the log file.
struct Tee {
    file: Option<RotatingFile>,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = io::stderr().write_all(buf);
        if let Some(file) = self.file.as_mut() {
            file.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = io::stderr().flush();
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// Install the global logger. Defaults to `info`; `RUST_LOG` overrides.
pub fn init(log_file: Option<&Path>) -> io::Result<()> {
    let file = log_file.map(RotatingFile::open).transpose()?;

    Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(buf, "{} {:<5} {}", buf.timestamp_millis(), record.level(), record.args())
        })
        .target(Target::Pipe(Box::new(Tee { file })))
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}
