//! On-device positioning through a local gpsd daemon.
//!
//! Speaks gpsd's JSON protocol: enable watch mode, then read `TPV` reports.
//! A 3D fix (mode 3) counts as precise, a 2D fix (mode 2) as approximate.

use super::providers::{DevicePositionSource, FixStream};
use super::types::{DesiredAccuracy, DeviceFix, PositionRequest, PositioningError};
use async_trait::async_trait;
use serde::Deserialize;
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

pub const DEFAULT_GPSD_ADDR: &str = "127.0.0.1:2947";

const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true,\"json\":true};\n";

#[derive(Deserialize)]
struct Report {
    class: String,
    #[serde(default)]
    mode: u8,
    lat: Option<f64>,
    lon: Option<f64>,
    eph: Option<f64>,
    epx: Option<f64>,
    epy: Option<f64>,
}

/// Parse one line from gpsd. Only TPV reports carrying a fix yield a value.
fn parse_report(line: &str) -> Option<DeviceFix> {
    let report: Report = serde_json::from_str(line).ok()?;
    if report.class != "TPV" || report.mode < 2 {
        return None;
    }
    let quality = if report.mode >= 3 {
        DesiredAccuracy::Precise
    } else {
        DesiredAccuracy::Approximate
    };
    let accuracy_radius_m = report.eph.or_else(|| match (report.epx, report.epy) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, y) => x.or(y),
    });
    Some(DeviceFix {
        latitude: report.lat?,
        longitude: report.lon?,
        accuracy_radius_m,
        quality,
    })
}

fn satisfies(fix: &DeviceFix, desired: DesiredAccuracy) -> bool {
    match desired {
        DesiredAccuracy::Approximate => true,
        DesiredAccuracy::Precise => fix.quality == DesiredAccuracy::Precise,
    }
}

fn classify_io(e: io::Error) -> PositioningError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => PositioningError::Denied,
        io::ErrorKind::TimedOut => PositioningError::TimedOut,
        _ => PositioningError::Unavailable(format!("gpsd: {}", e)),
    }
}

/// gpsd client.
#[derive(Debug, Clone)]
pub struct GpsdSource {
    addr: String,
}

impl GpsdSource {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    async fn connect(&self) -> Result<Lines<BufReader<TcpStream>>, PositioningError> {
        let mut stream = TcpStream::connect(&self.addr).await.map_err(classify_io)?;
        stream.write_all(WATCH_COMMAND).await.map_err(classify_io)?;
        Ok(BufReader::new(stream).lines())
    }
}

impl Default for GpsdSource {
    fn default() -> Self {
        Self::new(DEFAULT_GPSD_ADDR)
    }
}

#[async_trait]
impl DevicePositionSource for GpsdSource {
    async fn current_position(&self, request: PositionRequest) -> Result<DeviceFix, PositioningError> {
        let mut lines = self.connect().await?;
        loop {
            match lines.next_line().await.map_err(classify_io)? {
                Some(line) => {
                    if let Some(fix) = parse_report(&line) {
                        if satisfies(&fix, request.desired_accuracy) {
                            return Ok(fix);
                        }
                    }
                }
                None => return Err(PositioningError::Unavailable("gpsd closed the connection".into())),
            }
        }
    }

    async fn watch(&self) -> Result<FixStream, PositioningError> {
        let mut lines = self.connect().await?;
        let (tx, rx) = mpsc::channel(16);

        tokio::spawn(async move {
            loop {
                let item = match lines.next_line().await {
                    Ok(Some(line)) => match parse_report(&line) {
                        Some(fix) => Ok(fix),
                        None => continue,
                    },
                    Ok(None) => Err(PositioningError::Unavailable("gpsd closed the connection".into())),
                    Err(e) => Err(classify_io(e)),
                };
                let last = item.is_err();
                if tx.send(item).await.is_err() || last {
                    break;
                }
            }
        });

        Ok(rx)
    }
}
