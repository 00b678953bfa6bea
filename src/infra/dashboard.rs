// ============================================================
// Layer 6 — TensorBoard Dashboard
// ============================================================
// Writes scalars and PNG images into a TensorBoard event file
// (`<exp>/tensorboard/events.out.tfevents.<secs>.<host>`).
//
// Record framing (TFRecord):
//
//   u64  length (LE)
//   u32  masked crc32c(length bytes)
//   [u8] serialized `Event` protobuf
//   u32  masked crc32c(data)
//
// The first event carries `file_version = "brain.Event:2"`.
//
// Reference: tensorflow/core/util/event.proto, summary.proto

use bytes::BytesMut;
use prost::Message;
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("TensorBoard I/O error on '{}': {source}", path.display())]
    Io {
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot encode TensorBoard event: {0}")]
    Encode(#[from] prost::EncodeError),
}

// ─── Protobuf messages ───────────────────────────────────────────────────────
#[derive(Clone, PartialEq, Message)]
struct Event {
    #[prost(double, tag = "1")]
    wall_time:    f64,
    #[prost(int64, tag = "2")]
    step:         i64,
    #[prost(string, optional, tag = "3")]
    file_version: Option<String>,
    #[prost(message, optional, tag = "5")]
    summary:      Option<Summary>,
}

#[derive(Clone, PartialEq, Message)]
struct Summary {
    #[prost(message, repeated, tag = "1")]
    value: Vec<SummaryValue>,
}

#[derive(Clone, PartialEq, Message)]
struct SummaryValue {
    #[prost(string, tag = "1")]
    tag:          String,
    #[prost(float, optional, tag = "2")]
    simple_value: Option<f32>,
    #[prost(message, optional, tag = "4")]
    image:        Option<SummaryImage>,
}

#[derive(Clone, PartialEq, Message)]
struct SummaryImage {
    #[prost(int32, tag = "1")]
    height:               i32,
    #[prost(int32, tag = "2")]
    width:                i32,
    #[prost(int32, tag = "3")]
    colorspace:           i32,
    #[prost(bytes = "vec", tag = "4")]
    encoded_image_string: Vec<u8>,
}

// ─── Writer ──────────────────────────────────────────────────────────────────
pub struct Dashboard {
    path:   PathBuf,
    writer: BufWriter<File>,
}

impl Dashboard {
    pub fn create(dir: &Path) -> Result<Self, DashboardError> {
        fs::create_dir_all(dir).map_err(|source| DashboardError::Io { path: dir.to_path_buf(), source })?;
        let secs = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        // several writers may open the same directory within one second
        let serial = WRITER_COUNT.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!("events.out.tfevents.{secs}.{}.{}.{serial}", hostname(), std::process::id()));
        let file = File::create(&path).map_err(|source| DashboardError::Io { path: path.clone(), source })?;

        let mut dashboard = Self { path, writer: BufWriter::new(file) };
        dashboard.write_event(&Event {
            wall_time:    wall_time(),
            step:         0,
            file_version: Some("brain.Event:2".into()),
            summary:      None,
        })?;
        Ok(dashboard)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<(), DashboardError> {
        let value = SummaryValue { tag: tag.to_string(), simple_value: Some(value as f32), image: None };
        self.write_summary(value, step)
    }

    /// `png` must already be PNG-encoded.
    pub fn add_image(&mut self, tag: &str, png: Vec<u8>, height: u32, width: u32, step: usize) -> Result<(), DashboardError> {
        let image = SummaryImage { height: height as i32, width: width as i32, colorspace: 3, encoded_image_string: png };
        let value = SummaryValue { tag: tag.to_string(), simple_value: None, image: Some(image) };
        self.write_summary(value, step)
    }

    pub fn flush(&mut self) -> Result<(), DashboardError> {
        self.writer.flush().map_err(|source| DashboardError::Io { path: self.path.clone(), source })
    }

    fn write_summary(&mut self, value: SummaryValue, step: usize) -> Result<(), DashboardError> {
        self.write_event(&Event {
            wall_time:    wall_time(),
            step:         step as i64,
            file_version: None,
            summary:      Some(Summary { value: vec![value] }),
        })
    }

    fn write_event(&mut self, event: &Event) -> Result<(), DashboardError> {
        let mut buf = BytesMut::with_capacity(event.encoded_len());
        event.encode(&mut buf)?;
        let record = frame_record(&buf);
        self.writer
            .write_all(&record)
            .map_err(|source| DashboardError::Io { path: self.path.clone(), source })
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

fn frame_record(data: &[u8]) -> Vec<u8> {
    let len = (data.len() as u64).to_le_bytes();
    let mut out = Vec::with_capacity(data.len() + 16);
    out.extend_from_slice(&len);
    out.extend_from_slice(&masked_crc32c(&len).to_le_bytes());
    out.extend_from_slice(data);
    out.extend_from_slice(&masked_crc32c(data).to_le_bytes());
    out
}

fn masked_crc32c(data: &[u8]) -> u32 {
    let crc = crc32c::crc32c(data);
    ((crc >> 15) | (crc << 17)).wrapping_add(0xa282_ead8)
}

fn wall_time() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0)
}

static WRITER_COUNT: AtomicUsize = AtomicUsize::new(0);

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Split a TFRecord stream back into payloads, checking both CRCs.
    fn read_records(bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        let mut pos = 0;
        while pos < bytes.len() {
            let len_bytes: [u8; 8] = bytes[pos..pos + 8].try_into().unwrap();
            let len = u64::from_le_bytes(len_bytes) as usize;
            let len_crc = u32::from_le_bytes(bytes[pos + 8..pos + 12].try_into().unwrap());
            assert_eq!(len_crc, masked_crc32c(&len_bytes));
            let data = &bytes[pos + 12..pos + 12 + len];
            let data_crc = u32::from_le_bytes(bytes[pos + 12 + len..pos + 16 + len].try_into().unwrap());
            assert_eq!(data_crc, masked_crc32c(data));
            out.push(data.to_vec());
            pos += 16 + len;
        }
        out
    }

    #[test]
    fn test_known_crc32c() {
        // CRC-32C check value
        assert_eq!(crc32c::crc32c(b"123456789"), 0xe306_9283);
    }

    #[test]
    fn test_events_decode() {
        let dir = tempfile::tempdir().unwrap();
        let mut dash = Dashboard::create(dir.path()).unwrap();
        dash.add_scalar("train/loss", 0.5, 7).unwrap();
        dash.add_image("val/samples/last_batch/preds", vec![1, 2, 3], 4, 5, 2).unwrap();
        dash.flush().unwrap();

        let bytes = fs::read(dash.path()).unwrap();
        let records = read_records(&bytes);
        assert_eq!(records.len(), 3);

        let first = Event::decode(records[0].as_slice()).unwrap();
        assert_eq!(first.file_version.as_deref(), Some("brain.Event:2"));

        let scalar = Event::decode(records[1].as_slice()).unwrap();
        assert_eq!(scalar.step, 7);
        let summary = scalar.summary.unwrap();
        let value = &summary.value[0];
        assert_eq!(value.tag, "train/loss");
        assert_eq!(value.simple_value, Some(0.5));

        let image = Event::decode(records[2].as_slice()).unwrap();
        let img = image.summary.unwrap().value[0].image.clone().unwrap();
        assert_eq!((img.height, img.width, img.colorspace), (4, 5, 3));
        assert_eq!(img.encoded_image_string, vec![1, 2, 3]);
    }

    #[test]
    fn test_writers_in_same_dir_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let a = Dashboard::create(dir.path()).unwrap();
        let b = Dashboard::create(dir.path()).unwrap();
        assert_ne!(a.path(), b.path());
    }
}
