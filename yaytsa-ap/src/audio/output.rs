//! Audio output using cpal
//!
//! The cpal stream is not `Send`, so it is built and owned by a dedicated
//! thread. The mixer talks to that thread through [`ThreadDriver`] commands.
//! A requested device that cannot be found falls back to the default device.

use crate::audio::backend::{AudioBackend, DriverCommand, OutputDriver, ThreadDriver};
use crate::audio::graph::AudioGraph;
use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{mpsc, Arc};
use tracing::{debug, error, info, warn};

/// System audio output
#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    device_name: Option<String>,
    buffer_size: Option<u32>,
}

impl CpalBackend {
    pub fn new(device_name: Option<String>, buffer_size: Option<u32>) -> Self {
        Self {
            device_name,
            buffer_size,
        }
    }

    /// Names of the available output devices
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();
        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }
}

/// Find the requested device, falling back to the default one
fn find_device(device_name: Option<&str>) -> Result<Device> {
    let host = cpal::default_host();

    if let Some(name) = device_name {
        let mut devices = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?;
        if let Some(dev) = devices.find(|d| d.name().ok().as_deref() == Some(name)) {
            info!("Using audio device: {}", name);
            return Ok(dev);
        }
        warn!(
            "Requested device '{}' not found, falling back to default device",
            name
        );
    }

    let dev = host
        .default_output_device()
        .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()))?;
    info!(
        "Using default audio device: {}",
        dev.name().unwrap_or_else(|_| "Unknown".to_string())
    );
    Ok(dev)
}

/// Best config at `sample_rate`, preferring stereo f32
fn config_for_rate(device: &Device, sample_rate: u32) -> Result<Option<(StreamConfig, SampleFormat)>> {
    let supported: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| Error::AudioOutput(format!("Failed to get device configs: {}", e)))?
        .filter(|c| {
            c.min_sample_rate().0 <= sample_rate
                && c.max_sample_rate().0 >= sample_rate
                && matches!(
                    c.sample_format(),
                    SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16
                )
        })
        .collect();

    let score = |c: &cpal::SupportedStreamConfigRange| {
        let format = match c.sample_format() {
            SampleFormat::F32 => 0,
            SampleFormat::I16 => 1,
            _ => 2,
        };
        let channels = if c.channels() == 2 { 0 } else { 1 };
        channels * 10 + format
    };

    Ok(supported
        .into_iter()
        .min_by_key(|c| score(c))
        .map(|c| {
            let format = c.sample_format();
            (c.with_sample_rate(cpal::SampleRate(sample_rate)).config(), format)
        }))
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn negotiate_sample_rate(&self, requested: u32) -> Result<u32> {
        let device = find_device(self.device_name.as_deref())?;
        if config_for_rate(&device, requested)?.is_some() {
            return Ok(requested);
        }
        let default = device
            .default_output_config()
            .map_err(|e| Error::AudioOutput(format!("Failed to get default config: {}", e)))?;
        Ok(default.sample_rate().0)
    }

    fn open(&self, graph: &AudioGraph) -> Result<Box<dyn OutputDriver>> {
        let (command_tx, command_rx) = mpsc::channel();
        let (reply_tx, reply_rx) = mpsc::channel();
        let device_name = self.device_name.clone();
        let buffer_size = self.buffer_size;
        let graph = graph.clone();

        let thread = std::thread::Builder::new()
            .name("yaytsa-cpal-output".to_string())
            .spawn(move || {
                let stream = match build_stream(device_name.as_deref(), buffer_size, graph) {
                    Ok(stream) => {
                        let _ = reply_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = reply_tx.send(Err(e));
                        return;
                    }
                };
                run_stream(stream, command_rx, reply_tx);
            })
            .map_err(|e| Error::AudioOutput(format!("Failed to spawn output thread: {}", e)))?;

        let ready = reply_rx
            .recv()
            .map_err(|_| Error::AudioOutput("output thread exited during setup".to_string()))?;
        ready?;

        Ok(Box::new(ThreadDriver {
            commands: command_tx,
            replies: reply_rx,
            thread: Some(thread),
        }))
    }
}

/// Command loop of the output thread; owns the stream until Close
fn run_stream(
    stream: Stream,
    commands: mpsc::Receiver<DriverCommand>,
    replies: mpsc::Sender<Result<()>>,
) {
    while let Ok(command) = commands.recv() {
        let result = match command {
            DriverCommand::Play => stream
                .play()
                .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e))),
            DriverCommand::Pause => stream
                .pause()
                .map_err(|e| Error::AudioOutput(format!("Failed to pause stream: {}", e))),
            DriverCommand::Close => break,
        };
        let _ = replies.send(result);
    }
    let _ = stream.pause();
    debug!("Output thread exiting");
}

fn build_stream(device_name: Option<&str>, buffer_size: Option<u32>, graph: AudioGraph) -> Result<Stream> {
    let device = find_device(device_name)?;
    let sample_rate = graph.sample_rate();
    let (mut config, format) = config_for_rate(&device, sample_rate)?.ok_or_else(|| {
        Error::AudioOutput(format!("Device does not support {}Hz output", sample_rate))
    })?;

    if let Some(size) = buffer_size {
        config.buffer_size = cpal::BufferSize::Fixed(size);
    }

    debug!(
        "Audio config: sample_rate={}, channels={}, format={:?}, buffer_size={:?}",
        config.sample_rate.0, config.channels, format, config.buffer_size
    );

    let error_count = Arc::new(AtomicU32::new(0));
    let stream = match format {
        SampleFormat::F32 => build_typed::<f32>(&device, &config, graph, error_count, |s| s),
        SampleFormat::I16 => build_typed::<i16>(&device, &config, graph, error_count, |s| {
            (s * i16::MAX as f32) as i16
        }),
        SampleFormat::U16 => build_typed::<u16>(&device, &config, graph, error_count, |s| {
            ((s + 1.0) * 32767.5) as u16
        }),
        other => Err(Error::AudioOutput(format!(
            "Unsupported sample format: {:?}",
            other
        ))),
    }?;

    Ok(stream)
}

/// Build a stream that renders the graph and converts with `convert`
fn build_typed<T>(
    device: &Device,
    config: &StreamConfig,
    graph: AudioGraph,
    error_count: Arc<AtomicU32>,
    convert: fn(f32) -> T,
) -> Result<Stream>
where
    T: cpal::SizedSample + Send + 'static,
{
    let channels = config.channels as usize;
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels.max(1);
                scratch.resize(frames * 2, 0.0);
                graph.render(&mut scratch);

                for (frame, stereo) in data.chunks_mut(channels).zip(scratch.chunks_exact(2)) {
                    let left = stereo[0].clamp(-1.0, 1.0);
                    let right = stereo[1].clamp(-1.0, 1.0);
                    match frame.len() {
                        1 => frame[0] = convert(0.5 * (left + right)),
                        _ => {
                            frame[0] = convert(left);
                            frame[1] = convert(right);
                            for extra in frame.iter_mut().skip(2) {
                                *extra = convert(0.0);
                            }
                        }
                    }
                }
            },
            move |err| {
                let count = error_count.fetch_add(1, Ordering::Relaxed) + 1;
                error!("Audio stream error ({} so far): {}", count, err);
            },
            None,
        )
        .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
}
