//! Polling loop and CSV output.

use crate::registry::Device;
use anyhow::{Context, Result};
use serde::Serialize;
use std::future::Future;
use std::io::Write;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// One CSV row. A failed read is written as the legacy `-1` sentinel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row<'a> {
    /// Configured device id
    pub device: &'a str,
    /// Seconds since the logger's time offset
    pub elapsed_s: f64,
    /// Dose rate in `unit`, or -1
    pub dose_rate: f64,
    /// Unit symbol
    pub unit: &'static str,
}

/// How long and how often to poll.
#[derive(Debug, Clone, Copy)]
pub struct PollOptions {
    /// Time between the starts of consecutive rounds
    pub interval: Duration,
    /// Stop after this many rounds; `None` polls until shutdown
    pub count: Option<u64>,
}

/// Read every device once, write one row each, and log drained warnings.
///
/// Returns the number of rows whose dose rate is valid.
pub async fn poll_round<W: Write>(devices: &[Device], out: &mut csv::Writer<W>) -> Result<usize> {
    let mut valid = 0;
    for device in devices {
        let reading = device.meter.read_value().await;
        if reading.is_valid() {
            valid += 1;
        }
        let [elapsed_s, dose_rate] = reading.as_array();
        out.serialize(Row {
            device: &device.id,
            elapsed_s,
            dose_rate,
            unit: reading.unit.symbol(),
        })
        .context("Failed to write CSV row")?;

        for warning in device.meter.take_warnings() {
            tracing::warn!(device = %device.id, "{}", warning);
        }
    }
    out.flush().context("Failed to flush CSV output")?;
    Ok(valid)
}

/// Poll at a fixed cadence until `count` rounds are done or `shutdown` resolves.
///
/// `shutdown` is also raced against the round in flight, so a device that
/// never answers cannot hold the loop. An interrupted round is not counted
/// and its rows written so far stay in `out`.
///
/// Returns the number of completed rounds.
pub async fn run_poll<W, F>(
    devices: &[Device],
    out: &mut csv::Writer<W>,
    options: PollOptions,
    shutdown: F,
) -> Result<u64>
where
    W: Write,
    F: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(options.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    let mut rounds = 0u64;
    while options.count.map_or(true, |limit| rounds < limit) {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutdown requested after {} round(s)", rounds);
                break;
            }
            _ = ticker.tick() => {}
        }

        tokio::select! {
            biased;
            _ = &mut shutdown => {
                tracing::info!("Shutdown requested during round {}", rounds + 1);
                break;
            }
            result = poll_round(devices, out) => {
                let valid = result?;
                rounds += 1;
                tracing::debug!(round = rounds, valid, total = devices.len(), "Poll round complete");
            }
        }
    }
    Ok(rounds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use daq_core::capabilities::DoseRateMeter;
    use daq_core::driver::DeviceMetadata;
    use daq_core::error::ReadError;
    use daq_core::reading::{DoseRateUnit, ElapsedClock, WarningLog};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Returns 10, 20, 30, ... and fails every third read.
    struct CountingMeter {
        calls: AtomicU32,
        clock: ElapsedClock,
        warnings: WarningLog,
    }

    #[async_trait]
    impl DoseRateMeter for CountingMeter {
        fn model(&self) -> &'static str {
            "Counting"
        }

        fn unit(&self) -> DoseRateUnit {
            DoseRateUnit::MicroSievertPerHour
        }

        fn verification_string(&self) -> &str {
            "connected"
        }

        fn clock(&self) -> &ElapsedClock {
            &self.clock
        }

        fn warning_log(&self) -> &WarningLog {
            &self.warnings
        }

        async fn is_connected(&self) -> bool {
            true
        }

        async fn read_dose_rate(&self) -> Result<f64, ReadError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n % 3 == 0 {
                Err(ReadError::NoData("skipped".into()))
            } else {
                Ok(f64::from(n) * 10.0)
            }
        }

        async fn close(&self) {}
    }

    fn counting_device(id: &str) -> Device {
        Device {
            id: id.into(),
            driver_name: "Counting Meter",
            meter: Arc::new(CountingMeter {
                calls: AtomicU32::new(0),
                clock: ElapsedClock::with_wall_anchor(100.0, 100.0),
                warnings: WarningLog::new(),
            }),
            metadata: DeviceMetadata::default(),
        }
    }

    /// Never answers.
    struct StuckMeter {
        clock: ElapsedClock,
        warnings: WarningLog,
    }

    #[async_trait]
    impl DoseRateMeter for StuckMeter {
        fn model(&self) -> &'static str {
            "Stuck"
        }

        fn unit(&self) -> DoseRateUnit {
            DoseRateUnit::NanoSievertPerHour
        }

        fn verification_string(&self) -> &str {
            "connected"
        }

        fn clock(&self) -> &ElapsedClock {
            &self.clock
        }

        fn warning_log(&self) -> &WarningLog {
            &self.warnings
        }

        async fn is_connected(&self) -> bool {
            true
        }

        async fn read_dose_rate(&self) -> Result<f64, ReadError> {
            std::future::pending().await
        }

        async fn close(&self) {}
    }

    fn csv_text(out: csv::Writer<Vec<u8>>) -> String {
        String::from_utf8(out.into_inner().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_poll_round_writes_header_and_rows() {
        let devices = vec![counting_device("a"), counting_device("b")];
        let mut out = csv::Writer::from_writer(Vec::new());

        let valid = poll_round(&devices, &mut out).await.unwrap();
        assert_eq!(valid, 2);

        let text = csv_text(out);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "device,elapsed_s,dose_rate,unit");
        assert!(lines[1].starts_with("a,"));
        assert!(lines[1].ends_with(",10.0,µSv/h"));
        assert!(lines[2].starts_with("b,"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_poll_stops_after_count() {
        let devices = vec![counting_device("prm")];
        let mut out = csv::Writer::from_writer(Vec::new());
        let options = PollOptions {
            interval: Duration::from_millis(100),
            count: Some(4),
        };

        let rounds = run_poll(&devices, &mut out, options, std::future::pending())
            .await
            .unwrap();
        assert_eq!(rounds, 4);

        // Third read fails: sentinel row plus a drained warning.
        let text = csv_text(out);
        let values: Vec<&str> = text
            .lines()
            .skip(1)
            .map(|l| l.split(',').nth(2).unwrap())
            .collect();
        assert_eq!(values, vec!["10.0", "20.0", "-1.0", "40.0"]);
        assert!(devices[0].meter.take_warnings().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_poll_stops_on_shutdown() {
        let devices = vec![counting_device("g20")];
        let mut out = csv::Writer::from_writer(Vec::new());
        let options = PollOptions {
            interval: Duration::from_millis(1000),
            count: None,
        };

        let shutdown = tokio::time::sleep(Duration::from_millis(2500));
        let rounds = run_poll(&devices, &mut out, options, shutdown)
            .await
            .unwrap();

        // Ticks at 0, 1000 and 2000 ms.
        assert_eq!(rounds, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_stuck_round() {
        let devices = vec![
            counting_device("prm"),
            Device {
                id: "g20".into(),
                driver_name: "Stuck Meter",
                meter: Arc::new(StuckMeter {
                    clock: ElapsedClock::with_wall_anchor(100.0, 100.0),
                    warnings: WarningLog::new(),
                }),
                metadata: DeviceMetadata::default(),
            },
        ];
        let mut out = csv::Writer::from_writer(Vec::new());
        let options = PollOptions {
            interval: Duration::from_millis(1000),
            count: None,
        };

        let shutdown = tokio::time::sleep(Duration::from_millis(100));
        let rounds = run_poll(&devices, &mut out, options, shutdown)
            .await
            .unwrap();
        assert_eq!(rounds, 0);

        // The row from the device that answered was already written.
        let text = csv_text(out);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("prm,"));
    }
}
