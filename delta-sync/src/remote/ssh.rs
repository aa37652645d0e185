//! SSH sessions backed by libssh2.
//!
//! File transfer uses SFTP when the server offers it and falls back to SCP.
//! The choice is made once at connect time.

use super::{Auth, CommandOutput, ConnectionTarget, FileTransfer, OutputChunk, OutputStream, RemoteSession, TransferProtocol};
use crate::utils::errors::{Result, SyncError};
use ssh2::{Channel, Session, Sftp};
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::time::Duration;

/// Sleep between polls when a streaming command produced no output.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// An authenticated SSH session with its transfer channel
pub struct SshSession {
    session: Session,
    description: String,
    transfer: Box<dyn FileTransfer>,
}

impl SshSession {
    /// Connect, authenticate and pick a transfer mechanism.
    pub fn connect(target: &ConnectionTarget) -> Result<Self> {
        let description = target.key().to_string();
        let connectivity = |message: String| SyncError::Connectivity {
            target: description.clone(),
            message,
        };

        let tcp = TcpStream::connect((target.host.as_str(), target.port))
            .map_err(|e| connectivity(e.to_string()))?;
        let mut session = Session::new().map_err(|e| connectivity(e.to_string()))?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| connectivity(format!("SSH handshake failed: {e}")))?;

        let authenticated = match &target.auth {
            Auth::Password(password) => session.userauth_password(&target.username, password),
            Auth::KeyFile { path, passphrase } => {
                session.userauth_pubkey_file(&target.username, None, path, passphrase.as_deref())
            }
        };
        authenticated.map_err(|e| connectivity(format!("SSH authentication failed: {e}")))?;

        if !session.authenticated() {
            return Err(connectivity("SSH authentication failed".to_string()));
        }

        let transfer: Box<dyn FileTransfer> = match session.sftp() {
            Ok(sftp) => Box::new(SftpTransfer { sftp }),
            Err(sftp_error) => {
                tracing::warn!(
                    "SFTP unavailable for {} ({}), using SCP instead",
                    description,
                    sftp_error
                );
                // SCP needs plain session channels
                session.channel_session().map_err(|scp_error| {
                    connectivity(format!(
                        "no file transfer available (SFTP: {sftp_error}; SCP: {scp_error})"
                    ))
                })?;
                Box::new(ScpTransfer { session: session.clone() })
            }
        };

        tracing::info!("Connected to {} via SSH and {}", description, transfer.protocol());

        Ok(Self {
            session,
            description,
            transfer,
        })
    }
}

impl RemoteSession for SshSession {
    fn describe(&self) -> String {
        self.description.clone()
    }

    fn exec_streaming(&mut self, command: &str, on_output: &mut dyn FnMut(OutputChunk)) -> Result<CommandOutput> {
        let mut channel = self.session.channel_session()?;
        channel.exec(command)?;

        self.session.set_blocking(false);
        let pumped = pump_channel(&mut channel, on_output);
        self.session.set_blocking(true);
        let (stdout, stderr) = pumped?;

        channel.wait_close()?;
        let exit_code = channel.exit_status()?;

        Ok(CommandOutput {
            command: command.to_string(),
            exit_code,
            stdout,
            stderr,
        })
    }

    fn transfer(&mut self) -> &mut dyn FileTransfer {
        self.transfer.as_mut()
    }
}

/// Relay stdout and stderr until the remote side closes both.
fn pump_channel(channel: &mut Channel, on_output: &mut dyn FnMut(OutputChunk)) -> Result<(String, String)> {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let mut idle = true;

        if let Some(n) = poll_read(channel, &mut buf)? {
            idle = false;
            stdout.extend_from_slice(&buf[..n]);
            on_output(OutputChunk {
                stream: OutputStream::Stdout,
                text: String::from_utf8_lossy(&buf[..n]).into_owned(),
            });
        }

        if let Some(n) = poll_read(&mut channel.stderr(), &mut buf)? {
            idle = false;
            stderr.extend_from_slice(&buf[..n]);
            on_output(OutputChunk {
                stream: OutputStream::Stderr,
                text: String::from_utf8_lossy(&buf[..n]).into_owned(),
            });
        }

        if idle {
            if channel.eof() {
                break;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    Ok((
        String::from_utf8_lossy(&stdout).into_owned(),
        String::from_utf8_lossy(&stderr).into_owned(),
    ))
}

/// `Some(n)` when data was read, `None` when nothing is available right now.
fn poll_read(reader: &mut impl Read, buf: &mut [u8]) -> Result<Option<usize>> {
    match reader.read(buf) {
        Ok(0) => Ok(None),
        Ok(n) => Ok(Some(n)),
        Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
        Err(e) => Err(e.into()),
    }
}

struct SftpTransfer {
    sftp: Sftp,
}

impl FileTransfer for SftpTransfer {
    fn protocol(&self) -> TransferProtocol {
        TransferProtocol::Sftp
    }

    fn download(&mut self, remote_path: &str) -> Result<Vec<u8>> {
        let mut file = self.sftp.open(Path::new(remote_path))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(data)
    }

    fn upload(&mut self, remote_path: &str, data: &[u8]) -> Result<()> {
        let mut file = self.sftp.create(Path::new(remote_path))?;
        file.write_all(data)?;
        file.flush()?;
        Ok(())
    }
}

struct ScpTransfer {
    session: Session,
}

impl FileTransfer for ScpTransfer {
    fn protocol(&self) -> TransferProtocol {
        TransferProtocol::Scp
    }

    fn download(&mut self, remote_path: &str) -> Result<Vec<u8>> {
        let (mut channel, stat) = self.session.scp_recv(Path::new(remote_path))?;
        let mut data = Vec::with_capacity(stat.size() as usize);
        channel.read_to_end(&mut data)?;
        close_channel(&mut channel)?;
        Ok(data)
    }

    fn upload(&mut self, remote_path: &str, data: &[u8]) -> Result<()> {
        let mut channel = self
            .session
            .scp_send(Path::new(remote_path), 0o644, data.len() as u64, None)?;
        channel.write_all(data)?;
        close_channel(&mut channel)?;
        Ok(())
    }
}

fn close_channel(channel: &mut Channel) -> Result<()> {
    channel.send_eof()?;
    channel.wait_eof()?;
    channel.close()?;
    channel.wait_close()?;
    Ok(())
}
