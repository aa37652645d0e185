//! Session targeting the local machine.
//!
//! Commands run through `sh -c`, transfers are plain file reads and writes.
//! Useful for deploying into a local directory and for exercising the sync
//! engine without an SSH server.

use super::{CommandOutput, FileTransfer, OutputChunk, OutputStream, RemoteSession, TransferProtocol};
use crate::utils::errors::Result;
use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;

#[derive(Debug, Default)]
pub struct LocalSession {
    transfer: LocalTransfer,
}

impl LocalSession {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RemoteSession for LocalSession {
    fn describe(&self) -> String {
        "localhost".to_string()
    }

    fn exec_streaming(&mut self, command: &str, on_output: &mut dyn FnMut(OutputChunk)) -> Result<CommandOutput> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let (tx, rx) = mpsc::channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(forward(stdout, OutputStream::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(forward(stderr, OutputStream::Stderr, tx.clone()));
        }
        drop(tx);

        let mut stdout = String::new();
        let mut stderr = String::new();
        for chunk in rx {
            match chunk.stream {
                OutputStream::Stdout => stdout.push_str(&chunk.text),
                OutputStream::Stderr => stderr.push_str(&chunk.text),
            }
            on_output(chunk);
        }

        for reader in readers {
            let _ = reader.join();
        }
        let status = child.wait()?;

        Ok(CommandOutput {
            command: command.to_string(),
            exit_code: status.code().unwrap_or(-1),
            stdout,
            stderr,
        })
    }

    fn transfer(&mut self) -> &mut dyn FileTransfer {
        &mut self.transfer
    }
}

fn forward<R>(mut reader: R, stream: OutputStream, tx: mpsc::Sender<OutputChunk>) -> thread::JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let chunk = OutputChunk {
                        stream,
                        text: String::from_utf8_lossy(&buf[..n]).into_owned(),
                    };
                    if tx.send(chunk).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

#[derive(Debug, Default)]
struct LocalTransfer;

impl FileTransfer for LocalTransfer {
    fn protocol(&self) -> TransferProtocol {
        TransferProtocol::Local
    }

    fn download(&mut self, remote_path: &str) -> Result<Vec<u8>> {
        Ok(std::fs::read(remote_path)?)
    }

    fn upload(&mut self, remote_path: &str, data: &[u8]) -> Result<()> {
        Ok(std::fs::write(remote_path, data)?)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_exec_collects_output_and_status() -> Result<()> {
        let mut session = LocalSession::new();

        let output = session.exec("echo out; echo err >&2; exit 3")?;

        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        Ok(())
    }

    #[test]
    fn test_exec_streaming_relays_chunks() -> Result<()> {
        let mut session = LocalSession::new();
        let mut relayed = String::new();

        let output = session.exec_streaming("printf 'a\\nb\\n'", &mut |chunk| {
            assert_eq!(chunk.stream, OutputStream::Stdout);
            relayed.push_str(&chunk.text);
        })?;

        assert!(output.success());
        assert_eq!(relayed, "a\nb\n");
        Ok(())
    }

    #[test]
    fn test_transfer_round_trip() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("file.bin");
        let path = path.to_str().unwrap();
        let mut session = LocalSession::new();

        session.transfer().upload(path, b"payload")?;
        assert_eq!(session.transfer().download(path)?, b"payload".to_vec());
        assert!(session.transfer().download(&format!("{path}.missing")).is_err());
        Ok(())
    }
}
