//! Sources of raw log lines.
//!
//! A [`LineSource`] opens into a byte reader plus an optional guard that owns
//! any spawned process. The reader is consumed on a separate thread, so the
//! guard stays with the caller and can stop the process on its own.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use anyhow::{Context, Result};

/// Something that produces log lines.
pub trait LineSource {
    /// Short description stored with captures: `adb`, a path, or `stdin`.
    fn label(&self) -> String;

    /// Device serial, when the source is a device.
    fn device(&self) -> Option<String> {
        None
    }

    fn open(&self) -> Result<OpenedSource>;
}

/// An open line source.
pub struct OpenedSource {
    pub reader: Box<dyn BufRead + Send>,
    /// Kills the producing process when dropped.
    pub guard: Option<ChildGuard>,
}

/// Owns a spawned child process and kills it on drop.
#[derive(Debug)]
pub struct ChildGuard(Child);

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Err(e) = self.0.kill() {
            tracing::debug!(error = %e, "child already exited");
        }
        if let Err(e) = self.0.wait() {
            tracing::warn!(error = %e, "failed to reap child process");
        }
    }
}

/// Reads one line, decoding invalid UTF-8 lossily.
///
/// Returns `None` at end of input. The line terminator (`\n` or `\r\n`) is
/// removed. `buf` is scratch space reused between calls.
pub fn read_line_lossy<R: BufRead + ?Sized>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> io::Result<Option<String>> {
    buf.clear();
    if reader.read_until(b'\n', buf)? == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    Ok(Some(String::from_utf8_lossy(buf).into_owned()))
}

/// Lines from a file, or from stdin when the path is `-`.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn is_stdin(&self) -> bool {
        self.path == Path::new("-")
    }
}

impl LineSource for FileSource {
    fn label(&self) -> String {
        if self.is_stdin() {
            "stdin".to_string()
        } else {
            self.path.display().to_string()
        }
    }

    fn open(&self) -> Result<OpenedSource> {
        let reader: Box<dyn BufRead + Send> = if self.is_stdin() {
            Box::new(BufReader::new(io::stdin()))
        } else {
            let file = File::open(&self.path)
                .with_context(|| format!("failed to open {}", self.path.display()))?;
            Box::new(BufReader::new(file))
        };
        Ok(OpenedSource {
            reader,
            guard: None,
        })
    }
}

/// Live logcat output from a device through `adb`.
#[derive(Debug, Clone)]
pub struct AdbSource {
    pub adb_path: PathBuf,
    pub serial: Option<String>,
    /// App to enable analytics debug logging for.
    pub package: Option<String>,
    pub log_tags: Vec<String>,
    /// Run `setprop` before streaming.
    pub setup: bool,
}

impl AdbSource {
    /// `shell setprop` invocations that raise the log level of each tag and
    /// turn on debug mode for the package.
    pub fn setup_args(&self) -> Vec<Vec<String>> {
        let setprop = |key: String, value: &str| {
            vec![
                "shell".to_string(),
                "setprop".to_string(),
                key,
                value.to_string(),
            ]
        };
        let mut commands: Vec<Vec<String>> = self
            .log_tags
            .iter()
            .map(|tag| setprop(format!("log.tag.{tag}"), "VERBOSE"))
            .collect();
        if let Some(package) = &self.package {
            commands.push(setprop(
                "debug.firebase.analytics.app".to_string(),
                package,
            ));
        }
        commands
    }

    /// `logcat` arguments that silence everything except the configured tags.
    pub fn logcat_args(&self) -> Vec<String> {
        let mut args = vec![
            "logcat".to_string(),
            "-v".to_string(),
            "threadtime".to_string(),
            "-s".to_string(),
        ];
        args.extend(self.log_tags.iter().map(|tag| format!("{tag}:V")));
        args
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.adb_path);
        if let Some(serial) = &self.serial {
            command.arg("-s").arg(serial);
        }
        command
    }

    fn run_setup(&self) -> Result<()> {
        for args in self.setup_args() {
            let output = self
                .command()
                .args(&args)
                .stdin(Stdio::null())
                .output()
                .with_context(|| format!("failed to run {}", self.adb_path.display()))?;
            if output.status.success() {
                tracing::debug!(args = ?args, "device property set");
            } else {
                tracing::warn!(
                    args = ?args,
                    status = %output.status,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "adb setprop failed"
                );
            }
        }
        Ok(())
    }
}

impl LineSource for AdbSource {
    fn label(&self) -> String {
        "adb".to_string()
    }

    fn device(&self) -> Option<String> {
        self.serial.clone()
    }

    fn open(&self) -> Result<OpenedSource> {
        if self.setup {
            self.run_setup()?;
        }
        let mut child = self
            .command()
            .args(self.logcat_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("failed to start {} logcat", self.adb_path.display()))?;
        let stdout = child
            .stdout
            .take()
            .context("logcat stdout was not captured")?;
        tracing::info!(pid = child.id(), serial = ?self.serial, "logcat started");
        Ok(OpenedSource {
            reader: Box::new(BufReader::new(stdout)),
            guard: Some(ChildGuard(child)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn adb() -> AdbSource {
        AdbSource {
            adb_path: PathBuf::from("adb"),
            serial: Some("emulator-5554".to_string()),
            package: Some("com.example.shop".to_string()),
            log_tags: vec!["FA".to_string(), "FA-SVC".to_string()],
            setup: true,
        }
    }

    #[test]
    fn test_read_line_lossy_strips_terminators_and_replaces_invalid_utf8() {
        let mut reader = Cursor::new(b"first\r\nsec\xffond\nlast".to_vec());
        let mut buf = Vec::new();

        assert_eq!(
            read_line_lossy(&mut reader, &mut buf).unwrap().as_deref(),
            Some("first")
        );
        assert_eq!(
            read_line_lossy(&mut reader, &mut buf).unwrap().as_deref(),
            Some("sec\u{fffd}ond")
        );
        assert_eq!(
            read_line_lossy(&mut reader, &mut buf).unwrap().as_deref(),
            Some("last")
        );
        assert_eq!(read_line_lossy(&mut reader, &mut buf).unwrap(), None);
    }

    #[test]
    fn test_setup_args_cover_tags_and_package() {
        let args = adb().setup_args();
        assert_eq!(
            args,
            vec![
                vec!["shell", "setprop", "log.tag.FA", "VERBOSE"],
                vec!["shell", "setprop", "log.tag.FA-SVC", "VERBOSE"],
                vec![
                    "shell",
                    "setprop",
                    "debug.firebase.analytics.app",
                    "com.example.shop"
                ],
            ]
        );
    }

    #[test]
    fn test_setup_args_without_package() {
        let source = AdbSource {
            package: None,
            ..adb()
        };
        assert_eq!(source.setup_args().len(), 2);
    }

    #[test]
    fn test_logcat_args_filter_to_tags() {
        assert_eq!(
            adb().logcat_args(),
            vec!["logcat", "-v", "threadtime", "-s", "FA:V", "FA-SVC:V"]
        );
    }

    #[test]
    fn test_file_source_reads_lines() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("capture.log");
        std::fs::write(&path, "a\nb\n").unwrap();

        let source = FileSource::new(&path);
        assert_eq!(source.label(), path.display().to_string());
        let mut opened = source.open().unwrap();
        assert!(opened.guard.is_none());

        let mut buf = Vec::new();
        let mut lines = Vec::new();
        while let Some(line) = read_line_lossy(&mut opened.reader, &mut buf).unwrap() {
            lines.push(line);
        }
        assert_eq!(lines, vec!["a", "b"]);
    }

    #[test]
    fn test_file_source_missing_file_is_an_error() {
        let err = FileSource::new("/nonexistent/capture.log")
            .open()
            .err()
            .unwrap();
        assert!(err.to_string().contains("failed to open"));
    }

    #[test]
    fn test_dash_means_stdin() {
        assert_eq!(FileSource::new("-").label(), "stdin");
    }
}
