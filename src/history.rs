//! Sensor-reading → history-sink handoff.
//!
//! The sampling task publishes one [`ReadingRecord`] per successful
//! read into a bounded channel; a drain task forwards records to the
//! [`ReadingSink`] port. The historical log itself (storage format,
//! rotation) lives outside this crate — the sink is the whole contract.
//!
//! ```text
//! ┌──────────────┐  ReadingRecord  ┌──────────────┐
//! │ sampling task│────────────────▶│  drain task  │──▶ ReadingSink
//! └──────────────┘   (bounded)     └──────────────┘
//! ```

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::{info, warn};

use crate::app::ports::ReadingSink;

/// One history entry: the sensor pair plus the controller flags at the
/// time of the read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadingRecord {
    pub temperature: f32,
    pub humidity: f32,
    pub valve_open: bool,
    pub watering: bool,
    pub auto_mode: bool,
}

/// Channel depth. Readings arrive at sampling cadence (seconds apart);
/// a small buffer absorbs a briefly stalled drain task.
const DEPTH: usize = 8;

pub static READINGS: Channel<CriticalSectionRawMutex, ReadingRecord, DEPTH> = Channel::new();

/// Publish a record without blocking. A full channel drops the record —
/// history is best-effort, the control loops must never stall on it.
pub fn publish(record: ReadingRecord) {
    if READINGS.try_send(record).is_err() {
        warn!("history: channel full, dropping reading");
    }
}

/// Long-running drain task: forward every published record to the sink.
pub async fn drain(sink: &mut impl ReadingSink) {
    loop {
        let record = READINGS.receive().await;
        sink.append(&record);
    }
}

/// Sink that forwards history records to the structured log. Used until
/// a real rotating log collaborator is attached.
pub struct LogReadingSink;

impl ReadingSink for LogReadingSink {
    fn append(&mut self, record: &ReadingRecord) {
        info!(
            target: "history",
            "t={:.1} h={:.1} valve_open={} watering={} auto={}",
            record.temperature,
            record.humidity,
            record.valve_open,
            record.watering,
            record.auto_mode
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct VecSink(Vec<ReadingRecord>);

    impl ReadingSink for VecSink {
        fn append(&mut self, record: &ReadingRecord) {
            self.0.push(*record);
        }
    }

    #[test]
    fn publish_then_drain_preserves_order() {
        let rec = |t| ReadingRecord {
            temperature: t,
            humidity: 50.0,
            valve_open: false,
            watering: false,
            auto_mode: true,
        };
        publish(rec(1.0));
        publish(rec(2.0));

        let mut sink = VecSink(Vec::new());
        let mut received = 0;
        while let Ok(record) = READINGS.try_receive() {
            sink.append(&record);
            received += 1;
        }
        assert_eq!(received, 2);
        assert_eq!(sink.0[0].temperature, 1.0);
        assert_eq!(sink.0[1].temperature, 2.0);
    }
}
