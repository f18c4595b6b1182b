//! Minimal ROS bag 2.0 writer.
//!
//! Produces a single uncompressed chunk followed by the index section, which
//! is enough to build fixtures for the reader and the ingestion pipeline.

use std::path::Path;

use chrono::{DateTime, Utc};

use super::record::{
    MAGIC, OP_BAG_HEADER, OP_CHUNK, OP_CHUNK_INFO, OP_CONNECTION, OP_INDEX_DATA, OP_MSG_DATA,
};

pub const NAV_SAT_FIX_MD5: &str = "2d3a8cd499b9b4a0249fb98fd05cfa48";
pub const STRING_MD5: &str = "992ce8a1687cec8c8bd883ec73ca41d1";

const BAG_HEADER_LEN: usize = 4096;

struct ConnectionSpec {
    id: u32,
    topic: String,
    msg_type: String,
    md5sum: String,
}

struct Message {
    conn: u32,
    time: DateTime<Utc>,
    payload: Vec<u8>,
}

pub struct BagWriter {
    connections: Vec<ConnectionSpec>,
    messages: Vec<Message>,
    indexed: bool,
}

impl Default for BagWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl BagWriter {
    pub fn new() -> Self {
        Self {
            connections: Vec::new(),
            messages: Vec::new(),
            indexed: true,
        }
    }

    /// Leave out the index section and write `index_pos = 0`.
    pub fn unindexed(mut self) -> Self {
        self.indexed = false;
        self
    }

    pub fn add_connection(&mut self, topic: &str, msg_type: &str, md5sum: &str) -> u32 {
        let id = self.connections.len() as u32;
        self.connections.push(ConnectionSpec {
            id,
            topic: topic.to_string(),
            msg_type: msg_type.to_string(),
            md5sum: md5sum.to_string(),
        });
        id
    }

    pub fn write_message(&mut self, conn: u32, time: DateTime<Utc>, payload: Vec<u8>) {
        self.messages.push(Message {
            conn,
            time,
            payload,
        });
    }

    pub fn write_nav_sat_fix(&mut self, conn: u32, time: DateTime<Utc>, lat: f64, lon: f64) {
        self.write_message(conn, time, encode_nav_sat_fix(time, 0, lat, lon));
    }

    pub fn write_string(&mut self, conn: u32, time: DateTime<Utc>, value: &str) {
        let mut payload = Vec::with_capacity(4 + value.len());
        payload.extend_from_slice(&(value.len() as u32).to_le_bytes());
        payload.extend_from_slice(value.as_bytes());
        self.write_message(conn, time, payload);
    }

    pub fn write_to(self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.finish())
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.messages.sort_by(|a, b| a.time.cmp(&b.time));

        let mut out = MAGIC.to_vec();
        let header_pos = out.len();
        out.extend(bag_header(0, 0, 0));

        let chunk_count = u32::from(!self.messages.is_empty());
        let mut chunk_pos = 0u64;
        let mut offsets: Vec<(u32, DateTime<Utc>, u32)> = Vec::new();

        if !self.messages.is_empty() {
            let mut chunk = Vec::new();
            for c in &self.connections {
                connection_record(&mut chunk, c);
            }
            for m in &self.messages {
                offsets.push((m.conn, m.time, chunk.len() as u32));
                let mut header = Vec::new();
                field(&mut header, "op", &[OP_MSG_DATA]);
                field(&mut header, "conn", &m.conn.to_le_bytes());
                field(&mut header, "time", &time_bytes(m.time));
                record(&mut chunk, &header, &m.payload);
            }

            chunk_pos = out.len() as u64;
            let mut header = Vec::new();
            field(&mut header, "op", &[OP_CHUNK]);
            field(&mut header, "compression", b"none");
            field(&mut header, "size", &(chunk.len() as u32).to_le_bytes());
            record(&mut out, &header, &chunk);

            for c in &self.connections {
                let entries: Vec<_> = offsets.iter().filter(|(conn, _, _)| *conn == c.id).collect();
                if entries.is_empty() {
                    continue;
                }
                let mut header = Vec::new();
                field(&mut header, "op", &[OP_INDEX_DATA]);
                field(&mut header, "ver", &1u32.to_le_bytes());
                field(&mut header, "conn", &c.id.to_le_bytes());
                field(&mut header, "count", &(entries.len() as u32).to_le_bytes());
                let mut data = Vec::new();
                for (_, time, offset) in entries {
                    data.extend_from_slice(&time_bytes(*time));
                    data.extend_from_slice(&offset.to_le_bytes());
                }
                record(&mut out, &header, &data);
            }
        }

        if !self.indexed {
            return out;
        }

        let index_pos = out.len() as u64;
        for c in &self.connections {
            connection_record(&mut out, c);
        }
        if let (Some(first), Some(last)) = (self.messages.first(), self.messages.last()) {
            let mut per_conn: Vec<(u32, u32)> = Vec::new();
            for c in &self.connections {
                let n = self.messages.iter().filter(|m| m.conn == c.id).count() as u32;
                if n > 0 {
                    per_conn.push((c.id, n));
                }
            }
            let mut header = Vec::new();
            field(&mut header, "op", &[OP_CHUNK_INFO]);
            field(&mut header, "ver", &1u32.to_le_bytes());
            field(&mut header, "chunk_pos", &chunk_pos.to_le_bytes());
            field(&mut header, "start_time", &time_bytes(first.time));
            field(&mut header, "end_time", &time_bytes(last.time));
            field(&mut header, "count", &(per_conn.len() as u32).to_le_bytes());
            let mut data = Vec::new();
            for (conn, n) in per_conn {
                data.extend_from_slice(&conn.to_le_bytes());
                data.extend_from_slice(&n.to_le_bytes());
            }
            record(&mut out, &header, &data);
        }

        let patched = bag_header(index_pos, self.connections.len() as u32, chunk_count);
        out[header_pos..header_pos + BAG_HEADER_LEN].copy_from_slice(&patched);
        out
    }
}

/// Serialize a `sensor_msgs/NavSatFix` with the given status and position.
pub fn encode_nav_sat_fix(time: DateTime<Utc>, status: i8, lat: f64, lon: f64) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&time_bytes(time));
    out.extend_from_slice(&3u32.to_le_bytes());
    out.extend_from_slice(b"gps");
    out.push(status as u8);
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&lat.to_le_bytes());
    out.extend_from_slice(&lon.to_le_bytes());
    out.extend_from_slice(&0f64.to_le_bytes());
    for _ in 0..9 {
        out.extend_from_slice(&0f64.to_le_bytes());
    }
    out.push(0);
    out
}

fn bag_header(index_pos: u64, conn_count: u32, chunk_count: u32) -> Vec<u8> {
    let mut header = Vec::new();
    field(&mut header, "op", &[OP_BAG_HEADER]);
    field(&mut header, "index_pos", &index_pos.to_le_bytes());
    field(&mut header, "conn_count", &conn_count.to_le_bytes());
    field(&mut header, "chunk_count", &chunk_count.to_le_bytes());
    let padding = vec![b' '; BAG_HEADER_LEN - 8 - header.len()];
    let mut out = Vec::with_capacity(BAG_HEADER_LEN);
    record(&mut out, &header, &padding);
    out
}

fn connection_record(out: &mut Vec<u8>, c: &ConnectionSpec) {
    let mut header = Vec::new();
    field(&mut header, "op", &[OP_CONNECTION]);
    field(&mut header, "conn", &c.id.to_le_bytes());
    field(&mut header, "topic", c.topic.as_bytes());
    let mut data = Vec::new();
    field(&mut data, "topic", c.topic.as_bytes());
    field(&mut data, "type", c.msg_type.as_bytes());
    field(&mut data, "md5sum", c.md5sum.as_bytes());
    field(&mut data, "message_definition", b"");
    record(out, &header, &data);
}

fn field(out: &mut Vec<u8>, name: &str, value: &[u8]) {
    out.extend_from_slice(&((name.len() + 1 + value.len()) as u32).to_le_bytes());
    out.extend_from_slice(name.as_bytes());
    out.push(b'=');
    out.extend_from_slice(value);
}

fn record(out: &mut Vec<u8>, header: &[u8], data: &[u8]) {
    out.extend_from_slice(&(header.len() as u32).to_le_bytes());
    out.extend_from_slice(header);
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
}

fn time_bytes(time: DateTime<Utc>) -> [u8; 8] {
    let secs = time.timestamp() as u32;
    let nsecs = time.timestamp_subsec_nanos();
    let mut out = [0u8; 8];
    out[..4].copy_from_slice(&secs.to_le_bytes());
    out[4..].copy_from_slice(&nsecs.to_le_bytes());
    out
}
