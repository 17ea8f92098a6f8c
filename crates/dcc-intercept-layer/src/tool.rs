//! Launching the external diagnostic tool.
//!
//! A path tool is an executable run through `/bin/sh -c`. An embedded tool is
//! an xz tar archive baked into the library: an interpreter reads it from a
//! pipe, unpacks it into a temporary directory and runs one of its scripts.

use std::io::Write;
use std::os::fd::{IntoRawFd, RawFd};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};

use dcc_config::{EmbeddedTool, ToolConfig};
use nix::fcntl::{fcntl, FcntlArg, FdFlag};

use crate::error::{LayerError, Result};

/// Makes a path tool read Valgrind's error stream from stdin.
pub const WATCH_VALGRIND_FLAG: &str = "--watch-stdin-for-valgrind-errors";

/// Python program that unpacks the archive streamed on stdin and runs `script`.
///
/// `bufsize` caps how much of stdin the unpacker buffers, so bytes written
/// after the archive are left for the script.
pub fn unpack_script(script: &str, bufsize: usize) -> String {
    format!(
        "import os,sys,tarfile,tempfile\n\
         with tempfile.TemporaryDirectory() as temp_dir:\n\
         \x20   tarfile.open(fileobj=sys.stdin.buffer, bufsize={}, mode='r|xz').extractall(temp_dir)\n\
         \x20   os.chdir(temp_dir)\n\
         \x20   exec(open('{}').read())\n",
        bufsize.max(1),
        script
    )
}

fn interpreter_command(tool: &EmbeddedTool, script: &str, payload: &[u8]) -> Command {
    let mut cmd = Command::new(&tool.interpreter);
    cmd.arg("-E").arg("-c").arg(unpack_script(script, payload.len()));
    cmd
}

fn spawn_piped(mut cmd: Command) -> Result<(Child, ChildStdin)> {
    let command = format!("{:?}", cmd);
    let mut child = cmd
        .stdin(Stdio::piped())
        .spawn()
        .map_err(|source| LayerError::Spawn { command, source })?;
    let stdin = child.stdin.take().ok_or(LayerError::NoPipe)?;
    Ok((child, stdin))
}

/// Run the tool after a fault and wait for it to finish.
pub fn run_explainer(tool: &ToolConfig, payload: &[u8]) -> Result<ExitStatus> {
    match tool {
        ToolConfig::Path { path } => {
            dcc_debug!("running {}", path.display());
            Command::new("/bin/sh")
                .arg("-c")
                .arg(path)
                .status()
                .map_err(|source| LayerError::Spawn {
                    command: path.display().to_string(),
                    source,
                })
        }
        ToolConfig::Embedded(embedded) => {
            dcc_debug!("running {} {}", embedded.interpreter, embedded.driver_script);
            let cmd = interpreter_command(embedded, &embedded.driver_script, payload);
            let (mut child, mut stdin) = spawn_piped(cmd)?;
            // The tool may exit without reading everything; still wait for it.
            if let Err(e) = stdin.write_all(payload) {
                dcc_debug!("archive write failed: {}", e);
            }
            drop(stdin);
            Ok(child.wait()?)
        }
    }
}

/// Write end of the pipe Valgrind reports its errors into.
#[derive(Debug)]
pub struct Receiver {
    /// Inherited across exec
    pub fd: RawFd,
    pub child: Child,
}

/// Start the Valgrind error watcher and hand back its stdin descriptor.
pub fn open_receiver(tool: &ToolConfig, payload: &[u8]) -> Result<Receiver> {
    let (child, mut stdin) = match tool {
        ToolConfig::Path { path } => {
            let line = format!("{} {}", path.display(), WATCH_VALGRIND_FLAG);
            dcc_debug!("running {}", line);
            let mut cmd = Command::new("/bin/sh");
            cmd.arg("-c").arg(line);
            spawn_piped(cmd)?
        }
        ToolConfig::Embedded(embedded) => {
            dcc_debug!("running {} {}", embedded.interpreter, embedded.watcher_script);
            let (child, mut stdin) = spawn_piped(interpreter_command(
                embedded,
                &embedded.watcher_script,
                payload,
            ))?;
            stdin.write_all(payload)?;
            (child, stdin)
        }
    };
    stdin.flush()?;
    let fd = stdin.into_raw_fd();
    fcntl(fd, FcntlArg::F_SETFD(FdFlag::empty()))?;
    Ok(Receiver { fd, child })
}
