//! SSH-backed command execution.
//!
//! Remote devices are plain SSH endpoints: the pool configuration names the
//! host and credentials, and every test command is executed through a fresh
//! session channel. Authentication order is private key, then password, then
//! the local SSH agent.

use anyhow::{Context, Result, bail};
use log::{debug, error, warn};
use ssh2::{Channel, Session};
use std::io::Read;
use std::net::TcpStream;
use std::time::{Duration, Instant};

use crate::config::pool_config::SshConfig;
use crate::connection::{CommandOutput, DeviceConnection};

const CONNECT_RETRIES: usize = 3;

/// One authenticated SSH session to a remote device.
pub struct SshConnection {
    session: Session,
    connected: bool,
}

impl SshConnection {
    pub fn connect(config: &SshConfig) -> Result<Self> {
        let host = &config.host;
        let port = config.port;
        let username = &config.username;

        debug!("Opening SSH connection: {username}@{host}:{port}");

        let tcp = Self::connect_with_retry(host, port)?;
        let mut session = Session::new().with_context(|| "failed to create SSH session")?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .with_context(|| format!("SSH handshake with {host}:{port} failed"))?;

        Self::authenticate(&mut session, config)?;

        Ok(SshConnection {
            session,
            connected: true,
        })
    }

    fn connect_with_retry(host: &str, port: u16) -> Result<TcpStream> {
        let mut attempt = 0;
        loop {
            match TcpStream::connect((host, port)) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    attempt += 1;
                    if attempt > CONNECT_RETRIES {
                        return Err(anyhow::Error::from(e)
                            .context(format!("failed to connect to {host}:{port}")));
                    }
                    debug!("Connection to {host}:{port} failed ({e}), retry #{attempt}");
                    std::thread::sleep(Duration::from_secs(1));
                }
            }
        }
    }

    fn authenticate(session: &mut Session, config: &SshConfig) -> Result<()> {
        let username = &config.username;
        if let Some(private_key) = &config.private_key_path {
            debug!("Authenticating with private key {}", private_key.display());
            session
                .userauth_pubkey_file(
                    username,
                    config.public_key_path.as_deref(),
                    private_key,
                    None,
                )
                .with_context(|| format!("key authentication failed: {}", private_key.display()))?;
        } else if let Some(password) = &config.password {
            debug!("Authenticating with password");
            session
                .userauth_password(username, password)
                .with_context(|| "password authentication failed")?;
        } else {
            debug!("Authenticating through SSH agent");
            session
                .userauth_agent(username)
                .with_context(|| "SSH agent authentication failed")?;
        }

        if !session.authenticated() {
            bail!("SSH authentication failed for {username}");
        }
        Ok(())
    }
}

impl DeviceConnection for SshConnection {
    fn execute_command(
        &mut self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput> {
        if !self.connected {
            bail!("SSH connection is closed");
        }

        debug!("Executing SSH command: {command}");

        let mut channel = self
            .session
            .channel_session()
            .with_context(|| "failed to open SSH session channel")?;
        channel
            .exec(command)
            .with_context(|| format!("failed to execute remote command: {command}"))?;
        channel
            .send_eof()
            .with_context(|| "failed to close remote stdin")?;

        let (stdout, stderr) = read_channel_with_timeout(&mut channel, timeout)?;

        let exit_code = channel
            .exit_status()
            .with_context(|| "failed to read remote exit status")?;
        channel
            .wait_close()
            .with_context(|| "failed to close SSH channel")?;

        debug!("SSH command finished: exit_code={exit_code}");

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
        })
    }

    fn teardown(&mut self) -> Result<()> {
        if self.connected {
            self.session
                .disconnect(None, "session finished", None)
                .with_context(|| "failed to disconnect SSH session")?;
            self.connected = false;
        }
        Ok(())
    }
}

impl Drop for SshConnection {
    fn drop(&mut self) {
        if self.connected {
            if let Err(e) = self.session.disconnect(None, "connection dropped", None) {
                error!("Failed to close SSH connection: {e}");
            }
        }
    }
}

/// Reads both output streams until the channel reaches EOF or the timeout
/// elapses.
fn read_channel_with_timeout(
    channel: &mut Channel,
    timeout: Option<Duration>,
) -> Result<(String, String)> {
    let timeout_duration = timeout.unwrap_or(Duration::from_secs(60));
    let start_time = Instant::now();

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut buffer = [0; 4096];
    let mut stderr_buffer = [0; 4096];

    while !channel.eof() {
        if start_time.elapsed() > timeout_duration {
            warn!("SSH command timed out after {timeout_duration:?}");
            break;
        }

        match channel.read(&mut buffer) {
            Ok(n) if n > 0 => stdout.extend_from_slice(&buffer[..n]),
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(anyhow::Error::from(e).context("failed to read remote stdout")),
        }

        match channel.stderr().read(&mut stderr_buffer) {
            Ok(n) if n > 0 => stderr.extend_from_slice(&stderr_buffer[..n]),
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(anyhow::Error::from(e).context("failed to read remote stderr")),
        }

        std::thread::sleep(Duration::from_millis(50));
    }

    Ok((
        String::from_utf8_lossy(&stdout).into_owned(),
        String::from_utf8_lossy(&stderr).into_owned(),
    ))
}
