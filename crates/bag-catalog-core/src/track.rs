//! GPS tracks extracted from bag files.
//!
//! A track is held as two parallel arrays, `(longitude, latitude)` positions
//! and timestamps, which always have the same length. Bags frequently carry
//! more than one GPS topic; [`GpsTrack::merge`] combines them into a single
//! timestamp-ordered track.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};

use crate::models::TrackPoint;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GpsTrack {
    positions: Vec<[f64; 2]>,
    timestamps: Vec<DateTime<Utc>>,
}

impl GpsTrack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a track from parallel arrays. Fails if their lengths differ.
    pub fn from_parallel(positions: Vec<[f64; 2]>, timestamps: Vec<DateTime<Utc>>) -> Result<Self> {
        if positions.len() != timestamps.len() {
            bail!(
                "GPS track has {} positions but {} timestamps",
                positions.len(),
                timestamps.len()
            );
        }
        let mut track = Self {
            positions,
            timestamps,
        };
        track.sort();
        Ok(track)
    }

    pub fn push(&mut self, longitude: f64, latitude: f64, time: DateTime<Utc>) {
        self.positions.push([longitude, latitude]);
        self.timestamps.push(time);
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[[f64; 2]] {
        &self.positions
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    /// `(longitude, latitude)` of the earliest fix.
    pub fn first_position(&self) -> Option<(f64, f64)> {
        self.positions.first().map(|p| (p[0], p[1]))
    }

    /// Merge several tracks into one ordered by timestamp.
    ///
    /// Fixes with identical timestamp and position (the same fix republished
    /// on two topics) are kept once.
    pub fn merge<I>(tracks: I) -> Self
    where
        I: IntoIterator<Item = GpsTrack>,
    {
        let mut points: Vec<TrackPoint> = tracks.into_iter().flat_map(|t| t.points()).collect();
        points.sort_by(|a, b| a.time.cmp(&b.time));
        points.dedup_by(|b, a| {
            a.time == b.time && a.longitude == b.longitude && a.latitude == b.latitude
        });
        points.into_iter().collect()
    }

    /// The track as individual points, in timestamp order.
    pub fn points(&self) -> Vec<TrackPoint> {
        self.positions
            .iter()
            .zip(&self.timestamps)
            .map(|(p, t)| TrackPoint {
                longitude: p[0],
                latitude: p[1],
                time: *t,
            })
            .collect()
    }

    fn sort(&mut self) {
        if self.timestamps.windows(2).all(|w| w[0] <= w[1]) {
            return;
        }
        let sorted: GpsTrack = {
            let mut points = self.points();
            points.sort_by(|a, b| a.time.cmp(&b.time));
            points.into_iter().collect()
        };
        *self = sorted;
    }
}

impl FromIterator<TrackPoint> for GpsTrack {
    fn from_iter<T: IntoIterator<Item = TrackPoint>>(iter: T) -> Self {
        let mut track = GpsTrack::new();
        for p in iter {
            track.push(p.longitude, p.latitude, p.time);
        }
        track
    }
}
