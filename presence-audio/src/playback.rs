//! Output drivers: the periodic clock that invokes the render callback.
//!
//! `DeviceOutput` hands the renderer to a cpal output stream; the device's
//! audio thread then calls it once per period. `HeadlessOutput` drives the
//! same renderer from a plain thread paced by the configured frame period,
//! for machines without a sound card and for tests.

use crate::error::AudioError;
use crate::renderer::Renderer;
use crate::stream_buffer::StreamStats;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, Host, SampleRate, StreamConfig, SupportedBufferSize};
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use presence_core::PlaybackConfig;
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Which clock is driving the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Device,
    Headless,
}

/// Running output driver. Dropping it stops playback.
#[derive(Debug)]
pub struct PlaybackHandle {
    kind: OutputKind,
    stats: StreamStats,
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl PlaybackHandle {
    pub fn kind(&self) -> OutputKind {
        self.kind
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().map_or(false, |t| !t.is_finished())
    }

    /// Stop the render clock and wait for the driver thread to exit
    pub fn stop(&mut self) {
        // Dropping the sender wakes the driver thread
        self.stop_tx.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Playback thread panicked");
            }
            info!(kind = ?self.kind, "Playback stopped");
        }
    }
}

impl Drop for PlaybackHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start the output configured by `config`: the headless clock when
/// `headless` is set, the audio device otherwise.
pub fn start_output(config: &PlaybackConfig, renderer: Renderer) -> Result<PlaybackHandle, AudioError> {
    if config.headless {
        HeadlessOutput::start(config, renderer)
    } else {
        DeviceOutput::start(config, renderer)
    }
}

/// Audio device output via cpal
pub struct DeviceOutput;

impl DeviceOutput {
    pub fn start(config: &PlaybackConfig, renderer: Renderer) -> Result<PlaybackHandle, AudioError> {
        config.validate().map_err(AudioError::Config)?;

        let stats = renderer.stats();
        let config = config.clone();
        let (ready_tx, ready_rx) = channel::bounded::<Result<(), AudioError>>(1);
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);

        // cpal streams are not Send, so the stream lives and dies on this thread
        let thread = std::thread::Builder::new()
            .name("presence-playback".to_string())
            .spawn(move || {
                let stream = match Self::build_stream(&config, renderer) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::Stream(format!(
                        "Failed to start stream: {}",
                        e
                    ))));
                    return;
                }

                let _ = ready_tx.send(Ok(()));
                // Blocks until stop() drops the sender
                let _ = stop_rx.recv();
                drop(stream);
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!("Audio playback started");
                Ok(PlaybackHandle {
                    kind: OutputKind::Device,
                    stats,
                    stop_tx: Some(stop_tx),
                    thread: Some(thread),
                })
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(AudioError::Stream("Playback thread exited during setup".to_string()))
            }
        }
    }

    fn build_stream(config: &PlaybackConfig, mut renderer: Renderer) -> Result<cpal::Stream, AudioError> {
        let host = cpal::default_host();
        let device = match config.device_name {
            Some(ref name) => Self::find_device_by_name(&host, name)?
                .ok_or_else(|| AudioError::Device(format!("Output device '{}' not found", name)))?,
            None => host
                .default_output_device()
                .ok_or_else(|| AudioError::Device("No output device available".to_string()))?,
        };

        let device_name = device.name().unwrap_or_else(|_| "<unknown>".to_string());
        let buffer_size = Self::buffer_size_for(&device, config);
        debug!(device = %device_name, ?buffer_size, "Building output stream");

        let stream_config = StreamConfig {
            channels: 1,
            sample_rate: SampleRate(config.sample_rate),
            buffer_size,
        };

        device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    renderer.render(data);
                },
                move |err| {
                    error!("Audio output stream error: {}", err);
                },
                None,
            )
            .map_err(|e| AudioError::Stream(format!("Failed to build stream on '{}': {}", device_name, e)))
    }

    /// Fixed frame size if the device supports it, otherwise the device default
    fn buffer_size_for(device: &Device, config: &PlaybackConfig) -> BufferSize {
        let wanted = config.frame_size as u32;
        let supported = device
            .supported_output_configs()
            .map(|configs| {
                configs.into_iter().any(|c| {
                    c.channels() == 1
                        && c.min_sample_rate().0 <= config.sample_rate
                        && c.max_sample_rate().0 >= config.sample_rate
                        && matches!(c.buffer_size(), SupportedBufferSize::Range { min, max } if *min <= wanted && wanted <= *max)
                })
            })
            .unwrap_or(false);

        if supported {
            BufferSize::Fixed(wanted)
        } else {
            warn!(
                frame_size = config.frame_size,
                "Device does not support the requested frame size, using its default"
            );
            BufferSize::Default
        }
    }

    fn find_device_by_name(host: &Host, name: &str) -> Result<Option<Device>, AudioError> {
        const MAX_DEVICES_TO_CHECK: usize = 100;
        let devices = host
            .output_devices()
            .map_err(|e| AudioError::Device(format!("Failed to enumerate devices: {}", e)))?;

        for device in devices.take(MAX_DEVICES_TO_CHECK) {
            if let Ok(device_name) = device.name() {
                if device_name == name || device_name.contains(name) {
                    return Ok(Some(device));
                }
            }
        }

        Ok(None)
    }
}

/// Render clock without an audio device
pub struct HeadlessOutput;

impl HeadlessOutput {
    /// Render into the void at real-time pace
    pub fn start(config: &PlaybackConfig, renderer: Renderer) -> Result<PlaybackHandle, AudioError> {
        Self::start_with_sink(config, renderer, |_| {})
    }

    /// Render at real-time pace, handing every frame to `sink`
    pub fn start_with_sink<F>(
        config: &PlaybackConfig,
        mut renderer: Renderer,
        mut sink: F,
    ) -> Result<PlaybackHandle, AudioError>
    where
        F: FnMut(&[f32]) + Send + 'static,
    {
        config.validate().map_err(AudioError::Config)?;

        let stats = renderer.stats();
        let period = config.period();
        let frame_size = config.frame_size;
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);

        let thread = std::thread::Builder::new()
            .name("presence-headless".to_string())
            .spawn(move || {
                let mut frame = vec![0.0f32; frame_size];
                let mut next = Instant::now() + period;
                loop {
                    match stop_rx.recv_deadline(next) {
                        Err(RecvTimeoutError::Timeout) => {
                            renderer.render(&mut frame);
                            sink(&frame);

                            next += period;
                            let now = Instant::now();
                            if next < now {
                                // Fell behind; skip ahead rather than burst
                                next = now + period;
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;

        info!(frame_size, period_ms = period.as_millis() as u64, "Headless playback started");

        Ok(PlaybackHandle {
            kind: OutputKind::Headless,
            stats,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }
}
