use super::status::StatusSnapshot;
use super::Direction;
use crate::settings::DisplayMode;

const SI_BYTE_UNITS: [&str; 8] = ["kB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];
const BINARY_BYTE_UNITS: [&str; 8] = ["KiB", "MiB", "GiB", "TiB", "PiB", "EiB", "ZiB", "YiB"];
const SI_BIT_UNITS: [&str; 8] = ["kb", "Mb", "Gb", "Tb", "Pb", "Eb", "Zb", "Yb"];
const BINARY_BIT_UNITS: [&str; 8] = ["Kib", "Mib", "Gib", "Tib", "Pib", "Eib", "Zib", "Yib"];

/// One accepted or displayed rate, ready for the UI.
#[derive(Debug, Clone, PartialEq)]
pub struct RateUpdate {
    pub direction: Direction,
    pub bytes_per_sec: u64,
    pub formatted: String,
    pub bit_formatted: String,
    pub series: Vec<u64>,
    /// Whether this sample was appended to the series.
    pub appended: bool,
}

#[derive(Debug, Default)]
struct Lane {
    series: Vec<u64>,
    last_end: u64,
    current: Option<u64>,
}

/// Turns cumulative (count, start, end) counters into bytes-per-second samples.
#[derive(Debug)]
pub struct ThroughputSampler {
    download: Lane,
    upload: Lane,
    display: DisplayMode,
}

impl ThroughputSampler {
    pub fn new(display: DisplayMode) -> Self {
        Self {
            download: Lane::default(),
            upload: Lane::default(),
            display,
        }
    }

    fn lane(&self, direction: Direction) -> &Lane {
        match direction {
            Direction::Download => &self.download,
            Direction::Upload => &self.upload,
        }
    }

    fn lane_mut(&mut self, direction: Direction) -> &mut Lane {
        match direction {
            Direction::Download => &mut self.download,
            Direction::Upload => &mut self.upload,
        }
    }

    pub fn set_display(&mut self, display: DisplayMode) {
        self.display = display;
    }

    /// Computes the rate for one counter triple. Timestamps are milliseconds.
    ///
    /// The series only grows when `end_ms` is strictly past the last accepted end, so
    /// repeated or regressing polls refresh the current value without adding a point.
    pub fn ingest(
        &mut self,
        direction: Direction,
        count: u64,
        start_ms: u64,
        end_ms: u64,
    ) -> Option<RateUpdate> {
        let rate = rate_per_second(count, start_ms, end_ms)?;
        let display = self.display;

        let lane = self.lane_mut(direction);
        let appended = end_ms > lane.last_end;
        if appended {
            lane.series.push(rate);
            lane.last_end = end_ms;
        }
        lane.current = Some(rate);

        Some(RateUpdate {
            direction,
            bytes_per_sec: rate,
            formatted: format_byte_rate(rate, display),
            bit_formatted: format_bit_rate(rate, display),
            series: lane.series.clone(),
            appended,
        })
    }

    /// Feeds both directions of a status snapshot independently.
    pub fn ingest_snapshot(&mut self, snapshot: &StatusSnapshot) -> Vec<RateUpdate> {
        [Direction::Download, Direction::Upload]
            .into_iter()
            .filter_map(|direction| {
                let (count, start, end) = snapshot.counters(direction)?;
                self.ingest(direction, count, start, end)
            })
            .collect()
    }

    pub fn series(&self, direction: Direction) -> &[u64] {
        &self.lane(direction).series
    }

    pub fn current(&self, direction: Direction) -> Option<u64> {
        self.lane(direction).current
    }

    pub fn reset(&mut self) {
        self.download = Lane::default();
        self.upload = Lane::default();
    }
}

/// `floor(count / ((end - start) / 1000))`; `None` when the window is empty.
pub fn rate_per_second(count: u64, start_ms: u64, end_ms: u64) -> Option<u64> {
    let elapsed = end_ms.checked_sub(start_ms).filter(|&ms| ms > 0)?;
    let rate = count as u128 * 1000 / elapsed as u128;
    Some(rate.min(u64::MAX as u128) as u64)
}

fn human_size(value: u64, display: DisplayMode, base: &str, units: [[&str; 8]; 2]) -> String {
    let (thresh, units) = match display {
        DisplayMode::Si => (1000.0, units[0]),
        DisplayMode::Binary => (1024.0, units[1]),
    };

    let mut scaled = value as f64;
    if scaled < thresh {
        return format!("{} {}", value, base);
    }

    let mut unit = 0;
    scaled /= thresh;
    while scaled >= thresh && unit < units.len() - 1 {
        scaled /= thresh;
        unit += 1;
    }
    format!("{:.1} {}", scaled, units[unit])
}

pub fn format_bytes(bytes: u64, display: DisplayMode) -> String {
    human_size(bytes, display, "B", [SI_BYTE_UNITS, BINARY_BYTE_UNITS])
}

pub fn format_bits(bits: u64, display: DisplayMode) -> String {
    human_size(bits, display, "b", [SI_BIT_UNITS, BINARY_BIT_UNITS])
}

pub fn format_byte_rate(bytes_per_sec: u64, display: DisplayMode) -> String {
    format!("{}/s", format_bytes(bytes_per_sec, display))
}

pub fn format_bit_rate(bytes_per_sec: u64, display: DisplayMode) -> String {
    format!("{}/s", format_bits(bytes_per_sec.saturating_mul(8), display))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_megabytes_in_one_second() {
        let mut sampler = ThroughputSampler::new(DisplayMode::Si);
        let update = sampler.ingest(Direction::Download, 5_000_000, 0, 1000).unwrap();
        assert_eq!(update.bytes_per_sec, 5_000_000);
        assert_eq!(update.formatted, "5.0 MB/s");
        assert_eq!(update.bit_formatted, "40.0 Mb/s");
    }

    #[test]
    fn rate_floors() {
        assert_eq!(rate_per_second(1000, 0, 3000), Some(333));
        assert_eq!(rate_per_second(10, 500, 500), None);
        assert_eq!(rate_per_second(10, 900, 500), None);
    }

    #[test]
    fn duplicates_and_regressions_do_not_append() {
        let mut sampler = ThroughputSampler::new(DisplayMode::Si);
        let ends = [1000, 1000, 1500, 1200, 1500, 2000, 1999, 2500];
        let mut accepted = 0;
        let mut max_end = 0;
        for end in ends {
            let update = sampler.ingest(Direction::Upload, 4_000, 0, end).unwrap();
            if end > max_end {
                accepted += 1;
                max_end = end;
                assert!(update.appended);
            } else {
                assert!(!update.appended);
            }
        }
        assert_eq!(sampler.series(Direction::Upload).len(), accepted);
        assert_eq!(accepted, 4);
        assert!(sampler.series(Direction::Download).is_empty());
    }

    #[test]
    fn rejected_sample_still_updates_current() {
        let mut sampler = ThroughputSampler::new(DisplayMode::Si);
        sampler.ingest(Direction::Download, 2_000, 0, 1000);
        sampler.ingest(Direction::Download, 9_000, 0, 1000);
        assert_eq!(sampler.current(Direction::Download), Some(9_000));
        assert_eq!(sampler.series(Direction::Download), &[2_000]);
    }

    #[test]
    fn reset_clears_lanes() {
        let mut sampler = ThroughputSampler::new(DisplayMode::Si);
        sampler.ingest(Direction::Download, 2_000, 0, 1000);
        sampler.reset();
        assert!(sampler.series(Direction::Download).is_empty());
        assert!(sampler.current(Direction::Download).is_none());
        assert!(sampler.ingest(Direction::Download, 2_000, 0, 1000).unwrap().appended);
    }

    #[test]
    fn formatting_scales() {
        assert_eq!(format_bytes(999, DisplayMode::Si), "999 B");
        assert_eq!(format_bytes(1000, DisplayMode::Si), "1.0 kB");
        assert_eq!(format_bytes(1000, DisplayMode::Binary), "1000 B");
        assert_eq!(format_bytes(1536, DisplayMode::Binary), "1.5 KiB");
        assert_eq!(format_bytes(3_500_000_000, DisplayMode::Si), "3.5 GB");
        assert_eq!(format_bit_rate(131_072, DisplayMode::Binary), "1.0 Mib/s");
    }
}
