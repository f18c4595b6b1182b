//! Bag file reading.
//!
//! [`BagParser`] is the seam between ingestion and the bag format: the
//! reconciler only ever asks for a file's [`BagMetadata`]. [`RosBagReader`]
//! implements it for ROS bag format 2.0.
//!
//! The reader makes one sequential pass over the file:
//!
//! ```text
//! #ROSBAG V2.0\n
//! bag header (index_pos, conn_count, chunk_count)
//! chunk { connection*, message* }   index data*     (repeated)
//! connection*  chunk info*                          (index section)
//! ```
//!
//! Uncompressed chunks are opened so message records can be counted and GPS
//! fixes decoded. Compressed chunks are skipped; their counts come from the
//! chunk-info records of the index section.

pub mod record;
pub mod writer;

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::debug;

use bag_catalog_core::models::{BagMetadata, TopicInfo};
use bag_catalog_core::track::GpsTrack;

use crate::error::BagError;
use record::{
    ros_time, Header, RecordReader, Wire, OP_BAG_HEADER, OP_CHUNK, OP_CHUNK_INFO, OP_CONNECTION,
    OP_INDEX_DATA, OP_MSG_DATA,
};

pub const NAV_SAT_FIX: &str = "sensor_msgs/NavSatFix";
pub const STRING_MSG: &str = "std_msgs/String";

/// Extracts structural metadata from a bag file. Read-only.
pub trait BagParser: Send + Sync {
    fn read_metadata(&self, path: &Path) -> Result<BagMetadata, BagError>;
}

/// Reader for ROS bag format 2.0.
#[derive(Debug, Default, Clone, Copy)]
pub struct RosBagReader;

impl BagParser for RosBagReader {
    fn read_metadata(&self, path: &Path) -> Result<BagMetadata, BagError> {
        let file = File::open(path)?;
        read_bag(BufReader::new(file))
    }
}

#[derive(Debug, Clone)]
struct Connection {
    topic: String,
    msg_type: String,
    md5sum: String,
}

struct ChunkInfo {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    counts: Vec<(u32, u32)>,
}

#[derive(Default)]
struct Scan {
    connections: BTreeMap<u32, Connection>,
    chunk_infos: Vec<ChunkInfo>,
    message_counts: BTreeMap<u32, u64>,
    first_message: Option<DateTime<Utc>>,
    last_message: Option<DateTime<Utc>>,
    compressed: bool,
    fixes: BTreeMap<u32, GpsTrack>,
    vehicle: Option<String>,
}

/// Read a complete bag from any seekable source.
pub fn read_bag<R: Read + Seek>(source: R) -> Result<BagMetadata, BagError> {
    let mut reader = RecordReader::new(source);
    let version = reader.read_magic()?;

    let header = reader
        .next_header()?
        .ok_or(BagError::Truncated {
            offset: reader.offset(),
        })?;
    if header.op()? != OP_BAG_HEADER {
        return Err(BagError::Corrupt("first record is not a bag header".into()));
    }
    let index_pos = header.u64("index_pos")?;
    reader.skip_data()?;

    let mut scan = Scan::default();
    while let Some(header) = reader.next_header()? {
        match header.op()? {
            OP_CHUNK => {
                let compression = header.string("compression")?;
                if compression == "none" {
                    let data = reader.read_data()?;
                    scan.read_chunk(&data)?;
                } else {
                    debug!(compression = %compression, "skipping compressed chunk");
                    scan.compressed = true;
                    reader.skip_data()?;
                }
            }
            OP_CONNECTION => {
                let data = reader.read_data()?;
                scan.add_connection(&header, &data)?;
            }
            OP_CHUNK_INFO => {
                let data = reader.read_data()?;
                scan.add_chunk_info(&header, &data)?;
            }
            OP_MSG_DATA => {
                let data = reader.read_data()?;
                scan.add_message(&header, &data)?;
            }
            OP_INDEX_DATA => reader.skip_data()?,
            OP_BAG_HEADER => {
                return Err(BagError::Corrupt("second bag header record".into()));
            }
            other => {
                debug!(op = other, "skipping unknown record");
                reader.skip_data()?;
            }
        }
    }

    Ok(scan.into_metadata(version, index_pos != 0))
}

impl Scan {
    fn read_chunk(&mut self, data: &[u8]) -> Result<(), BagError> {
        let mut inner = RecordReader::new(Cursor::new(data));
        while let Some(header) = inner.next_header()? {
            match header.op()? {
                OP_CONNECTION => {
                    let body = inner.read_data()?;
                    self.add_connection(&header, &body)?;
                }
                OP_MSG_DATA => {
                    let body = inner.read_data()?;
                    self.add_message(&header, &body)?;
                }
                _ => inner.skip_data()?,
            }
        }
        Ok(())
    }

    fn add_connection(&mut self, header: &Header, data: &[u8]) -> Result<(), BagError> {
        let conn = header.u32("conn")?;
        let topic = header.string("topic")?;
        let fields = Header::parse(data)?;
        self.connections.insert(
            conn,
            Connection {
                topic,
                msg_type: fields.string("type")?,
                md5sum: fields.string("md5sum")?,
            },
        );
        Ok(())
    }

    fn add_chunk_info(&mut self, header: &Header, data: &[u8]) -> Result<(), BagError> {
        let count = header.u32("count")? as usize;
        if count > data.len() / 8 {
            return Err(BagError::Corrupt(format!(
                "chunk info claims {} connections in {} bytes",
                count,
                data.len()
            )));
        }
        let mut wire = Wire::new(data);
        let mut counts = Vec::with_capacity(count);
        for _ in 0..count {
            let conn = wire.u32();
            let n = wire.u32();
            match (conn, n) {
                (Some(conn), Some(n)) => counts.push((conn, n)),
                _ => return Err(BagError::Corrupt("chunk info data is too short".into())),
            }
        }
        self.chunk_infos.push(ChunkInfo {
            start: header.time("start_time")?,
            end: header.time("end_time")?,
            counts,
        });
        Ok(())
    }

    fn add_message(&mut self, header: &Header, data: &[u8]) -> Result<(), BagError> {
        let conn = header.u32("conn")?;
        let time = header.time("time")?;
        *self.message_counts.entry(conn).or_default() += 1;
        self.first_message = Some(self.first_message.map_or(time, |t| t.min(time)));
        self.last_message = Some(self.last_message.map_or(time, |t| t.max(time)));

        let Some(connection) = self.connections.get(&conn) else {
            return Ok(());
        };
        if connection.msg_type == NAV_SAT_FIX {
            match decode_nav_sat_fix(data, time) {
                Some(Fix::Valid { lon, lat, time }) => {
                    self.fixes.entry(conn).or_default().push(lon, lat, time)
                }
                Some(Fix::NoFix) => {}
                None => debug!(topic = %connection.topic, "malformed NavSatFix message"),
            }
        } else if connection.msg_type == STRING_MSG && connection.topic.ends_with("vehicle_name")
        {
            if let Some(name) = Wire::new(data).string() {
                self.vehicle = Some(name);
            }
        }
        Ok(())
    }

    fn into_metadata(self, version: String, indexed: bool) -> BagMetadata {
        let (counts, start, end) = if self.chunk_infos.is_empty() {
            (self.message_counts, self.first_message, self.last_message)
        } else {
            let mut counts: BTreeMap<u32, u64> = BTreeMap::new();
            for info in &self.chunk_infos {
                for (conn, n) in &info.counts {
                    *counts.entry(*conn).or_default() += u64::from(*n);
                }
            }
            let start = self.chunk_infos.iter().map(|c| c.start).min();
            let end = self.chunk_infos.iter().map(|c| c.end).max();
            (counts, start, end)
        };

        let mut message_types: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut topics: BTreeMap<String, TopicInfo> = BTreeMap::new();
        for (conn, c) in &self.connections {
            message_types
                .entry(c.msg_type.clone())
                .or_default()
                .insert(c.md5sum.clone());
            let topic = topics.entry(c.topic.clone()).or_insert_with(|| TopicInfo {
                name: c.topic.clone(),
                message_type: c.msg_type.clone(),
                md5sum: c.md5sum.clone(),
                message_count: 0,
                connection_count: 0,
            });
            topic.connection_count += 1;
            topic.message_count += counts.get(conn).copied().unwrap_or(0);
        }

        let duration_secs = match (start, end) {
            (Some(s), Some(e)) => (e - s)
                .num_nanoseconds()
                .map(|n| n as f64 / 1e9)
                .unwrap_or_else(|| (e - s).num_seconds() as f64),
            _ => 0.0,
        };

        BagMetadata {
            version,
            compressed: self.compressed,
            indexed,
            message_count: counts.values().sum(),
            duration_secs,
            start_time: start,
            end_time: end,
            vehicle: self.vehicle,
            message_types,
            topics: topics.into_values().collect(),
            track: GpsTrack::merge(self.fixes.into_values()),
        }
    }
}

enum Fix {
    Valid {
        lon: f64,
        lat: f64,
        time: DateTime<Utc>,
    },
    NoFix,
}

/// Decode the fields of a `sensor_msgs/NavSatFix` up to the longitude.
///
/// The header stamp is used as the fix time unless it is zero, in which case
/// the record time is used.
fn decode_nav_sat_fix(data: &[u8], record_time: DateTime<Utc>) -> Option<Fix> {
    let mut wire = Wire::new(data);
    let _seq = wire.u32()?;
    let secs = wire.u32()?;
    let nsecs = wire.u32()?;
    let _frame_id = wire.string()?;
    let status = wire.i8()?;
    let _service = wire.u16()?;
    let lat = wire.f64()?;
    let lon = wire.f64()?;

    if status < 0
        || !lat.is_finite()
        || !lon.is_finite()
        || !(-90.0..=90.0).contains(&lat)
        || !(-180.0..=180.0).contains(&lon)
    {
        return Some(Fix::NoFix);
    }

    let time = if secs == 0 && nsecs == 0 {
        record_time
    } else {
        ros_time(secs, nsecs).ok()?
    };
    Some(Fix::Valid { lon, lat, time })
}
