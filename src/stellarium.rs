//! Stellarium telescope-control bridge.
//!
//! Implements the classic Stellarium telescope protocol: little-endian
//! framed messages, one defined message type (0). Outbound we report the
//! mount's pointing as RA/DEC every 500 ms; inbound goto requests become
//! fixed-sky track commands on the coordinator channel.

use std::error::Error;
use std::f64::consts::{PI, TAU};
use std::fmt::{self, Display, Formatter};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{interval, Duration};
use tracing::{info, warn};

use crate::astro_math;
use crate::telescope_control::{Command, Target, TelescopeHandle};
use crate::util::now_ns;

/// Total length of an outbound position message, including the length
/// field itself.
pub const POSITION_MESSAGE_LEN: i16 = 24;

const RA_GRID: f64 = 4_294_967_296.0; // 2^32
const DEC_GRID: f64 = 1_073_741_824.0; // 2^30

/// Convert RA (fractional seconds of a day) to the wire's 2^32 grid.
pub fn encode_ra(seconds: f64) -> u32 {
    let frac = astro_math::modulo(seconds, 86_400.) / 86_400.;
    ((frac * RA_GRID).round() as u64 % (1u64 << 32)) as u32
}

/// Convert a wire RA value to fractional seconds of a day.
pub fn decode_ra(raw: u32) -> f64 {
    raw as f64 / RA_GRID * 86_400.
}

/// Convert DEC (radians) to the wire's 2^30 * 2/pi grid.
pub fn encode_dec(rad: f64) -> i32 {
    (rad * 2. / PI * DEC_GRID).round() as i32
}

/// Convert a wire DEC value to radians.
pub fn decode_dec(raw: i32) -> f64 {
    raw as f64 / DEC_GRID * PI / 2.
}

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum WireError {
    /// The protocol only defines message type 0.
    UnknownMessageType(i16),
    Truncated { expected: usize, got: usize },
}

impl Display for WireError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            WireError::UnknownMessageType(t) => write!(f, "unknown message type {}", t),
            WireError::Truncated { expected, got } => {
                write!(f, "truncated message: expected {} bytes, got {}", expected, got)
            }
        }
    }
}

impl Error for WireError {}

/// Inbound goto request (message type 0), minus the already-consumed
/// header.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub struct GotoMessage {
    /// Microseconds since the Unix epoch. Unused inbound.
    pub time_us: u64,
    pub ra_raw: u32,
    pub dec_raw: i32,
}

impl GotoMessage {
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        if body.len() < 16 {
            return Err(WireError::Truncated {
                expected: 16,
                got: body.len(),
            });
        }
        Ok(GotoMessage {
            time_us: u64::from_le_bytes(body[0..8].try_into().unwrap()),
            ra_raw: u32::from_le_bytes(body[8..12].try_into().unwrap()),
            dec_raw: i32::from_le_bytes(body[12..16].try_into().unwrap()),
        })
    }

    pub fn ra_radians(&self) -> f64 {
        decode_ra(self.ra_raw) / 86_400. * TAU
    }

    pub fn dec_radians(&self) -> f64 {
        decode_dec(self.dec_raw)
    }
}

/// Outbound position report (message type 0).
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PositionReport {
    pub time_us: u64,
    /// RA as fractional seconds of a day.
    pub ra_seconds: f64,
    /// DEC in radians.
    pub dec: f64,
}

impl PositionReport {
    pub fn encode(&self) -> [u8; POSITION_MESSAGE_LEN as usize] {
        let mut buf = [0u8; POSITION_MESSAGE_LEN as usize];
        buf[0..2].copy_from_slice(&POSITION_MESSAGE_LEN.to_le_bytes());
        buf[2..4].copy_from_slice(&0i16.to_le_bytes());
        buf[4..12].copy_from_slice(&self.time_us.to_le_bytes());
        buf[12..16].copy_from_slice(&encode_ra(self.ra_seconds).to_le_bytes());
        buf[16..20].copy_from_slice(&encode_dec(self.dec).to_le_bytes());
        buf[20..24].copy_from_slice(&0i32.to_le_bytes());
        buf
    }
}

/// Serve the bridge on an already-bound listener.
pub async fn serve(listener: TcpListener, telescope: TelescopeHandle) -> std::io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        info!(%peer, "stellarium connected");
        let handle = telescope.clone();
        tokio::spawn(async move {
            match handle_connection(stream, handle).await {
                Ok(()) => info!(%peer, "stellarium disconnected"),
                Err(e) => info!(%peer, error = %e, "stellarium disconnected"),
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    telescope: TelescopeHandle,
) -> std::io::Result<()> {
    let (mut reader, mut writer) = stream.into_split();

    let report_handle = telescope.clone();
    let reporter = tokio::spawn(async move {
        let mut tick = interval(Duration::from_millis(500));
        loop {
            tick.tick().await;
            let orientation = *report_handle.orientation.borrow();
            let now = chrono::Utc::now();
            let ra = astro_math::hour_angle_to_ra(
                now,
                report_handle.location.longitude,
                orientation.bearing,
            );
            let report = PositionReport {
                time_us: (now_ns() / 1_000) as u64,
                ra_seconds: ra / TAU * 86_400.,
                dec: orientation.dec,
            };
            if writer.write_all(&report.encode()).await.is_err() {
                break;
            }
        }
    });

    let result = receive_targets(&mut reader, &telescope).await;
    reporter.abort();
    result
}

async fn receive_targets(
    reader: &mut OwnedReadHalf,
    telescope: &TelescopeHandle,
) -> std::io::Result<()> {
    loop {
        let mut header = [0u8; 4];
        reader.read_exact(&mut header).await?;
        let length = i16::from_le_bytes([header[0], header[1]]);
        let msg_type = i16::from_le_bytes([header[2], header[3]]);

        if msg_type != 0 {
            warn!(msg_type, "protocol error");
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                WireError::UnknownMessageType(msg_type).to_string(),
            ));
        }

        // The length field counts itself and the type.
        let mut body = vec![0u8; (length.max(4) - 4) as usize];
        reader.read_exact(&mut body).await?;

        let goto = match GotoMessage::decode(&body) {
            Ok(goto) => goto,
            Err(e) => {
                warn!(error = %e, "discarding malformed goto");
                continue;
            }
        };

        let target = Target::FixedSky {
            ra: goto.ra_radians(),
            dec: goto.dec_radians(),
        };
        info!(%target, "stellarium goto");
        if telescope.commands.send(Command::Track(target)).is_err() {
            // Coordinator is gone; no point keeping the socket.
            return Ok(());
        }
    }
}
