use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::error::AppError;

const ENV_PREFIX: &str = "DETECT";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Image file, directory of images, or the `cam` tag.
    pub input: String,
    pub model: String,
    /// Target device, e.g. `CPU`, `GPU` or `MULTI:CPU,GPU`.
    pub device: String,
    /// Worker count of the throughput-tuned pool.
    pub primary_workers: usize,
    /// Worker count of the latency-tuned pool.
    pub secondary_workers: usize,
    /// Stream count for every device (`"4"`) or per device (`"CPU:4,GPU:2"`).
    pub streams: String,
    pub threads: usize,
    pub confidence_threshold: f32,
    pub raw_output: bool,
    pub loop_input: bool,
    pub headless: bool,
    pub perf_counters: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            input: String::new(),
            model: String::new(),
            device: "CPU".to_string(),
            primary_workers: 4,
            secondary_workers: 1,
            streams: String::new(),
            threads: 0,
            confidence_threshold: 0.5,
            raw_output: false,
            loop_input: false,
            headless: false,
            perf_counters: false,
        }
    }
}

impl Settings {
    /// Layers `DETECT_*` environment variables over an optional settings file.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings: Settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.input.trim().is_empty() {
            return Err(AppError::Configuration("input source is not set".to_string()));
        }
        if self.model.trim().is_empty() {
            return Err(AppError::Configuration("model path is not set".to_string()));
        }
        if self.primary_workers == 0 || self.secondary_workers == 0 {
            return Err(AppError::Configuration(
                "both worker pools need at least one worker".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(AppError::Configuration(format!(
                "confidence threshold {} is outside [0, 1]",
                self.confidence_threshold
            )));
        }
        Ok(())
    }

    /// Builds the throughput profile for the primary pool and the latency
    /// profile for the secondary pool.
    pub fn execution_profiles(&self) -> Result<(ExecutionProfile, ExecutionProfile), AppError> {
        let devices = DeviceSpec::parse(&self.device)?;
        let streams = devices.parse_streams(&self.streams)?;

        let mut throughput = ExecutionProfile::new(ProfileKind::Throughput, &self.device);
        let mut latency = ExecutionProfile::new(ProfileKind::Latency, &self.device);

        for device in &devices.devices {
            match device.as_str() {
                "CPU" => {
                    if self.threads != 0 {
                        throughput.set("CPU_THREADS_NUM", self.threads.to_string());
                    }
                    let bind = if devices.multi && devices.contains("GPU") {
                        "NO"
                    } else {
                        "YES"
                    };
                    throughput.set("CPU_BIND_THREAD", bind);
                    throughput.set("CPU_THROUGHPUT_STREAMS", stream_value(&streams, device));
                    latency.set("CPU_THROUGHPUT_STREAMS", "1");
                }
                "GPU" => {
                    throughput.set("GPU_THROUGHPUT_STREAMS", stream_value(&streams, device));
                    latency.set("GPU_THROUGHPUT_STREAMS", "1");
                    // frees the CPU thread the GPU driver would otherwise spin on
                    if devices.multi && devices.contains("CPU") {
                        throughput.set("GPU_PLUGIN_THROTTLE", "1");
                    }
                }
                _ => {}
            }
        }

        if self.perf_counters {
            throughput.set("PERF_COUNT", "YES");
            latency.set("PERF_COUNT", "YES");
        }

        Ok((throughput, latency))
    }
}

fn stream_value(streams: &BTreeMap<String, u32>, device: &str) -> String {
    streams
        .get(device)
        .map(|count| count.to_string())
        .unwrap_or_else(|| "AUTO".to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileKind {
    Throughput,
    Latency,
}

/// Backend options for one pool.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionProfile {
    pub kind: ProfileKind,
    pub device: String,
    pub options: BTreeMap<String, String>,
}

impl ExecutionProfile {
    pub fn new(kind: ProfileKind, device: &str) -> Self {
        Self {
            kind,
            device: device.to_string(),
            options: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.options.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }
}

/// Device families named by a device string.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSpec {
    pub devices: BTreeSet<String>,
    pub multi: bool,
}

impl DeviceSpec {
    pub fn parse(device: &str) -> Result<Self, AppError> {
        let (multi, list) = match device.split_once(':') {
            Some((prefix, rest)) if prefix == "MULTI" || prefix == "HETERO" => (true, rest),
            _ => (false, device),
        };
        let devices: BTreeSet<String> = list
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| name.split('.').next().unwrap_or(name).to_string())
            .collect();
        if devices.is_empty() {
            return Err(AppError::Configuration(format!(
                "device string '{}' names no device",
                device
            )));
        }
        Ok(Self { devices, multi })
    }

    pub fn contains(&self, device: &str) -> bool {
        self.devices.contains(device)
    }

    pub fn parse_streams(&self, streams: &str) -> Result<BTreeMap<String, u32>, AppError> {
        let streams = streams.trim();
        let mut counts = BTreeMap::new();
        if streams.is_empty() {
            return Ok(counts);
        }
        if !streams.contains(':') {
            let count = parse_count(streams)?;
            for device in &self.devices {
                counts.insert(device.clone(), count);
            }
            return Ok(counts);
        }
        for pair in streams.split(',') {
            let (device, count) = pair.split_once(':').ok_or_else(|| {
                AppError::Configuration(format!("stream entry '{}' is not DEVICE:COUNT", pair))
            })?;
            let device = device.trim();
            if !self.contains(device) {
                return Err(AppError::Configuration(format!(
                    "stream count given for unused device '{}'",
                    device
                )));
            }
            counts.insert(device.to_string(), parse_count(count)?);
        }
        Ok(counts)
    }
}

fn parse_count(value: &str) -> Result<u32, AppError> {
    value
        .trim()
        .parse()
        .map_err(|_| AppError::Configuration(format!("'{}' is not a stream count", value)))
}
