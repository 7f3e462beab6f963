/// AMI client
///
/// Owns at most one authenticated TCP session to the switch. Every exchange
/// holds the session lock for its whole request/response, so commands never
/// interleave. Any I/O failure drops the session and the next call logs in
/// again.

use anyhow::{bail, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use super::protocol::{build_action, AmiLine, Framer, Progress, ResponseFraming};
use crate::config::Config;
use crate::redact;

/// Outcome of a command. Transport failures never escape as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmiReply {
    /// Raw reply text, which may itself carry `Response: Error`
    Ok(String),
    /// The exchange could not be completed
    Error(String),
}

impl AmiReply {
    pub fn is_ok(&self) -> bool {
        matches!(self, AmiReply::Ok(_))
    }

    pub fn text(&self) -> &str {
        match self {
            AmiReply::Ok(text) | AmiReply::Error(text) => text,
        }
    }

    /// Reply text for the record parsers; transport errors parse as empty
    pub fn body(&self) -> &str {
        match self {
            AmiReply::Ok(text) => text,
            AmiReply::Error(_) => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Ready,
}

#[derive(Debug, Clone)]
pub struct AmiSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub secret: String,
    pub read_timeout: Duration,
}

impl AmiSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            host: config.ami_host.clone(),
            port: config.ami_port,
            username: config.ami_username.clone(),
            secret: config.ami_secret.clone(),
            read_timeout: config.ami_read_timeout(),
        }
    }
}

struct Session {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    last_activity: Instant,
}

struct Inner {
    state: SessionState,
    session: Option<Session>,
}

pub struct AmiClient {
    settings: AmiSettings,
    inner: Mutex<Inner>,
    // Mirrors `state == Ready` for lock-free checks from the scheduler
    connected: AtomicBool,
}

impl AmiClient {
    pub fn new(settings: AmiSettings) -> Self {
        Self {
            settings,
            inner: Mutex::new(Inner {
                state: SessionState::Disconnected,
                session: None,
            }),
            connected: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(AmiSettings::from_config(config))
    }

    /// Whether a logged-in session is currently held
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    /// Time of the last completed exchange on the current session
    pub async fn last_activity(&self) -> Option<Instant> {
        self.inner.lock().await.session.as_ref().map(|s| s.last_activity)
    }

    /// Log in if needed. Reuses a live session.
    pub async fn connect(&self) -> bool {
        let mut inner = self.inner.lock().await;
        self.ensure_session(&mut inner).await
    }

    async fn ensure_session(&self, inner: &mut Inner) -> bool {
        if inner.state == SessionState::Ready && inner.session.is_some() {
            return true;
        }

        inner.state = SessionState::Connecting;
        info!(
            "Connecting to AMI at {}:{}",
            self.settings.host, self.settings.port
        );

        match self.open_session().await {
            Ok(session) => {
                inner.session = Some(session);
                inner.state = SessionState::Ready;
                self.connected.store(true, Ordering::Release);
                info!("AMI login accepted");
                true
            }
            Err(e) => {
                warn!("AMI connect failed: {:#}", e);
                self.invalidate(inner);
                false
            }
        }
    }

    async fn open_session(&self) -> Result<Session> {
        let read_timeout = self.settings.read_timeout;
        let addr = (self.settings.host.as_str(), self.settings.port);

        let stream = timeout(read_timeout, TcpStream::connect(addr))
            .await
            .context("Timed out connecting to AMI")?
            .context("Failed to connect to AMI")?;
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let mut banner = String::new();
        let n = timeout(read_timeout, reader.read_line(&mut banner))
            .await
            .context("Timed out waiting for AMI banner")?
            .context("Failed to read AMI banner")?;
        if n == 0 {
            bail!("AMI closed the connection before sending a banner");
        }
        debug!("AMI banner: {}", banner.trim_end());

        let login = build_action(
            "Login",
            &[
                ("Username", self.settings.username.as_str()),
                ("Secret", self.settings.secret.as_str()),
                ("Events", "off"),
            ],
        );
        trace!("AMI >>\n{}", redact::ami_message(&login));
        writer
            .write_all(login.as_bytes())
            .await
            .context("Failed to send AMI login")?;
        writer.flush().await.context("Failed to send AMI login")?;

        let reply = read_response(&mut reader, ResponseFraming::Simple, read_timeout).await?;
        trace!("AMI <<\n{}", reply);
        if !reply.contains("Success") {
            bail!("AMI login rejected: {}", reply.trim());
        }

        Ok(Session {
            reader,
            writer,
            last_activity: Instant::now(),
        })
    }

    fn invalidate(&self, inner: &mut Inner) {
        inner.session = None;
        inner.state = SessionState::Disconnected;
        self.connected.store(false, Ordering::Release);
    }

    /// Send one action and read its full reply.
    ///
    /// Reconnects first when no session is held. A failed exchange drops the
    /// session and comes back as [`AmiReply::Error`].
    pub async fn send_command(&self, action: &str, params: &[(&str, &str)]) -> AmiReply {
        let mut inner = self.inner.lock().await;
        if !self.ensure_session(&mut inner).await {
            return AmiReply::Error("Error: not connected to AMI".to_string());
        }

        let read_timeout = self.settings.read_timeout;
        let Some(session) = inner.session.as_mut() else {
            return AmiReply::Error("Error: not connected to AMI".to_string());
        };

        match exchange(session, action, params, read_timeout).await {
            Ok(reply) => {
                session.last_activity = Instant::now();
                AmiReply::Ok(reply)
            }
            Err(e) => {
                warn!("AMI action {} failed: {:#}", action, e);
                self.invalidate(&mut inner);
                AmiReply::Error(format!("Error: {:#}", e))
            }
        }
    }

    /// Liveness check. Without a session this is just a login attempt.
    pub async fn ping(&self) -> bool {
        if !self.is_connected() {
            return self.connect().await;
        }
        match self.send_command("Ping", &[]).await {
            AmiReply::Ok(reply) => reply.contains("Pong"),
            AmiReply::Error(_) => false,
        }
    }

    pub async fn sip_peers(&self) -> AmiReply {
        self.send_command("SIPpeers", &[]).await
    }

    pub async fn core_show_channels(&self) -> AmiReply {
        self.send_command("CoreShowChannels", &[]).await
    }

    pub async fn core_show_version(&self) -> AmiReply {
        self.send_command("Command", &[("Command", "core show version")])
            .await
    }

    /// Best-effort logoff, then drop the session
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(mut session) = inner.session.take() {
            let logoff = build_action("Logoff", &[]);
            let write = async {
                session.writer.write_all(logoff.as_bytes()).await?;
                session.writer.shutdown().await
            };
            if let Err(e) = timeout(self.settings.read_timeout, write)
                .await
                .unwrap_or_else(|_| Err(std::io::ErrorKind::TimedOut.into()))
            {
                debug!("AMI logoff not delivered: {}", e);
            }
            info!("Disconnected from AMI");
        }
        self.invalidate(&mut inner);
    }
}

async fn exchange(
    session: &mut Session,
    action: &str,
    params: &[(&str, &str)],
    read_timeout: Duration,
) -> Result<String> {
    let request = build_action(action, params);
    trace!("AMI >>\n{}", redact::ami_message(&request));

    session
        .writer
        .write_all(request.as_bytes())
        .await
        .context("Failed to write AMI action")?;
    session
        .writer
        .flush()
        .await
        .context("Failed to write AMI action")?;

    let framing = ResponseFraming::for_action(action);
    let reply = read_response(&mut session.reader, framing, read_timeout).await?;
    trace!("AMI <<\n{}", reply);
    debug!("AMI {} reply: {} bytes", action, reply.len());
    Ok(reply)
}

/// Read one framed reply, normalising line endings to `\n`.
///
/// Each line read is bounded by `read_timeout`. End of stream before the
/// reply completes is an error.
pub async fn read_response<R>(
    reader: &mut R,
    framing: ResponseFraming,
    read_timeout: Duration,
) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut framer = Framer::new(framing);
    let mut response = String::new();

    loop {
        let mut line = String::new();
        let n = timeout(read_timeout, reader.read_line(&mut line))
            .await
            .context("Timed out waiting for AMI response")?
            .context("Failed to read AMI response")?;
        if n == 0 {
            bail!("AMI connection closed mid-response");
        }

        let line = line.trim_end_matches(['\r', '\n']);
        response.push_str(line);
        response.push('\n');

        if framer.accept(&AmiLine::classify(line)) == Progress::Done {
            return Ok(response);
        }
    }
}
