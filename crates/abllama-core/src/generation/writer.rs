//! Streaming batch output.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Appends one generation per line to `<output>.partial`, flushing after
/// every line, and renames it to `<output>` on [`BatchWriter::finish`].
///
/// The final path therefore only ever holds a complete batch. If the run
/// fails, the `.partial` file keeps what was generated so far.
#[derive(Debug)]
pub struct BatchWriter {
    partial: PathBuf,
    target: PathBuf,
    out: BufWriter<File>,
    lines: usize,
}

impl BatchWriter {
    pub fn create(target: &Path) -> std::io::Result<Self> {
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let partial = partial_path(target);
        let file = File::create(&partial)?;
        Ok(Self { partial, target: target.to_path_buf(), out: BufWriter::new(file), lines: 0 })
    }

    pub fn partial_path(&self) -> &Path {
        &self.partial
    }

    pub fn lines(&self) -> usize {
        self.lines
    }

    /// Writes `text` as a single line. Backslashes are doubled and embedded
    /// line breaks are written as `\n`, so every output line maps back to
    /// exactly one generation.
    pub fn write_line(&mut self, text: &str) -> std::io::Result<()> {
        writeln!(self.out, "{}", escape_line(text))?;
        self.out.flush()?;
        self.lines += 1;
        Ok(())
    }

    /// Syncs the partial file and moves it into place.
    pub fn finish(self) -> std::io::Result<PathBuf> {
        let file = self.out.into_inner().map_err(std::io::IntoInnerError::into_error)?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&self.partial, &self.target)?;
        Ok(self.target)
    }
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().map(std::ffi::OsStr::to_os_string).unwrap_or_default();
    name.push(".partial");
    target.with_file_name(name)
}

fn escape_line(text: &str) -> String {
    text.replace('\\', "\\\\").replace("\r\n", "\\n").replace(['\n', '\r'], "\\n")
}
