//! Scripted backend: installs every member that beacons, runs addressing,
//! then streams a color pattern.

use std::time::Duration;

use arbalet_mesh::frame::{self, AddressingKind, FrameAssembler};
use arbalet_mesh::{integrity, Address, Frame, Rgb};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;

const PALETTE: [Rgb; 4] = [
    Rgb::new(255, 0, 0),
    Rgb::new(0, 255, 0),
    Rgb::new(0, 0, 255),
    Rgb::new(255, 255, 255),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendOptions {
    /// Distinct members to install before addressing starts.
    pub members: usize,
    /// COLOR frames to stream once addressing is done.
    pub frames: usize,
    /// Pause between scripted frames.
    pub interval: Duration,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self { members: 1, frames: 100, interval: Duration::from_millis(100) }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("root disconnected after {installed} installs")]
    Disconnected { installed: usize },

    #[error("{0} members do not fit in one-byte slots")]
    TooManyMembers(usize),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionReport {
    /// Installed addresses, in slot order.
    pub installed: Vec<Address>,
    pub colors_sent: usize,
    pub last_sequence: u16,
}

/// Colors of frame `index`: the palette shifted by one member per frame.
pub fn pattern(index: usize, members: usize) -> Vec<Rgb> {
    (0..members).map(|member| PALETTE[(index + member) % PALETTE.len()]).collect()
}

/// Accept one root connection and run a full session on it.
pub async fn serve(
    listener: &TcpListener,
    options: &BackendOptions,
) -> Result<SessionReport, BackendError> {
    let (stream, peer) = listener.accept().await?;
    stream.set_nodelay(true)?;
    log::info!("backend: root connected from <{}>", peer);
    run_session(stream, options).await
}

pub async fn run_session<S>(stream: S, options: &BackendOptions) -> Result<SessionReport, BackendError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if options.members > usize::from(u8::MAX) + 1 {
        return Err(BackendError::TooManyMembers(options.members));
    }
    let mut session = Session { stream, report: SessionReport::default() };

    session.discover(options.members).await?;

    session.send(&Frame::Addressing(AddressingKind::Init)).await?;
    tokio::time::sleep(options.interval).await;
    let installed = session.report.installed.clone();
    for (slot, address) in installed.into_iter().enumerate() {
        session.send(&Frame::Install { address, slot: slot as u8 }).await?;
        tokio::time::sleep(options.interval).await;
    }
    session.send(&Frame::Addressing(AddressingKind::ColorDone)).await?;
    log::info!("backend: addressing done, streaming {} frames", options.frames);

    for index in 0..options.frames {
        tokio::time::sleep(options.interval).await;
        let sequence = session.report.last_sequence.wrapping_add(1);
        let colors = pattern(index, options.members);
        session.send(&Frame::Color { sequence, colors }).await?;
        session.report.last_sequence = sequence;
        session.report.colors_sent += 1;
    }

    Ok(session.report)
}

struct Session<S> {
    stream: S,
    report: SessionReport,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    async fn send(&mut self, frame: &Frame) -> Result<(), BackendError> {
        let mut wire = frame.encode();
        integrity::seal(&mut wire);
        self.stream.write_all(&wire).await?;
        log::debug!("backend: >> {}", frame.frame_type());
        Ok(())
    }

    async fn discover(&mut self, members: usize) -> Result<(), BackendError> {
        let mut assembler = FrameAssembler::new();
        let mut buffer = [0u8; 1024];
        while self.report.installed.len() < members {
            let n = self.stream.read(&mut buffer).await?;
            if n == 0 {
                return Err(BackendError::Disconnected { installed: self.report.installed.len() });
            }
            assembler.push(&buffer[..n]);
            while let Some(record) = assembler.next_frame(0) {
                if let Err(err) = frame::validate(&record, 0) {
                    log::warn!("backend: dropping record: {}", err);
                    continue;
                }
                match Frame::decode(&record) {
                    Ok(Frame::Beacon { sender }) => self.on_beacon(sender, members).await?,
                    Ok(other) => log::debug!("backend: ignoring {}", other.frame_type()),
                    Err(err) => log::warn!("backend: dropping record: {}", err),
                }
            }
        }
        Ok(())
    }

    async fn on_beacon(&mut self, sender: Address, members: usize) -> Result<(), BackendError> {
        if self.report.installed.contains(&sender) {
            log::debug!("backend: {} already installed", sender);
            return Ok(());
        }
        if self.report.installed.len() >= members {
            return Ok(());
        }
        let slot = self.report.installed.len();
        log::info!("backend: installing {} at slot {}", sender, slot);
        self.send(&Frame::Install { address: sender, slot: slot as u8 }).await?;
        self.report.installed.push(sender);
        Ok(())
    }
}
