//! Microphone capture via cpal
//!
//! cpal streams are not `Send`, so each capture stream lives on its own
//! thread and is dropped there when the track is stopped. While it lives the
//! device is held open; samples are not consumed yet.

use super::{LocalStream, LocalTrack, MediaConstraints, MediaDevices, MediaError, TrackKind};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig, SupportedStreamConfigRange};
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use uuid::Uuid;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Sample Rate (48kHz, what Opus expects)
pub const SAMPLE_RATE: u32 = 48000;

/// Mono for voice
pub const CHANNELS: u16 = 1;

// ============================================================================
// DEVICES
// ============================================================================

/// Default input device of the default cpal host
#[derive(Debug, Default, Clone, Copy)]
pub struct MicrophoneDevices;

#[async_trait]
impl MediaDevices for MicrophoneDevices {
    async fn get_user_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<Box<dyn LocalStream>, MediaError> {
        if constraints.video {
            return Err(MediaError::Unsupported("video capture".to_string()));
        }
        if !constraints.audio {
            return Err(MediaError::Unsupported("no track requested".to_string()));
        }

        let microphone = tokio::task::spawn_blocking(Microphone::open)
            .await
            .map_err(|e| MediaError::Stream(e.to_string()))??;

        Ok(Box::new(microphone))
    }
}

// ============================================================================
// MICROPHONE STREAM
// ============================================================================

pub struct Microphone {
    stream_id: String,
    track: LocalTrack,
    stop_tx: Option<std_mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl Microphone {
    /// Opens the default input device and holds it until stopped
    pub fn open() -> Result<Self, MediaError> {
        let stream_id = Uuid::new_v4().to_string();

        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), MediaError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let worker = std::thread::Builder::new()
            .name("microphone".to_string())
            .spawn(move || {
                let stream = match Self::start_capture() {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // Blocks until stop() or the Microphone is dropped
                let _ = stop_rx.recv();
                drop(stream);
                tracing::info!("Microphone capture stopped");
            })
            .map_err(|e| MediaError::Stream(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = worker.join();
                return Err(e);
            }
            Err(_) => return Err(MediaError::Stream("capture thread exited".to_string())),
        }

        Ok(Self {
            track: LocalTrack {
                id: Uuid::new_v4().to_string(),
                stream_id: stream_id.clone(),
                kind: TrackKind::Audio,
            },
            stream_id,
            stop_tx: Some(stop_tx),
            worker: Some(worker),
        })
    }

    fn start_capture() -> Result<cpal::Stream, MediaError> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or(MediaError::NoInputDevice)?;

        let config = Self::find_best_input_config(&device)?;

        tracing::info!(
            "Starting audio capture: {} Hz, {} channels",
            config.sample_rate.0,
            config.channels
        );

        let stream = device
            .build_input_stream(
                &config,
                |_: &[f32], _: &cpal::InputCallbackInfo| {},
                |err| {
                    tracing::error!("Audio capture error: {}", err);
                },
                None,
            )
            .map_err(|e| match e {
                cpal::BuildStreamError::DeviceNotAvailable => MediaError::NoInputDevice,
                other => MediaError::PermissionDenied(other.to_string()),
            })?;

        stream
            .play()
            .map_err(|e| MediaError::Stream(e.to_string()))?;

        Ok(stream)
    }

    fn find_best_input_config(device: &Device) -> Result<StreamConfig, MediaError> {
        let configs = device
            .supported_input_configs()
            .map_err(|e| MediaError::UnsupportedConfig(e.to_string()))?;

        Self::select_best_config(configs.collect())
    }

    /// 48kHz F32 if possible, else the best F32 rate, else whatever comes first
    fn select_best_config(
        configs: Vec<SupportedStreamConfigRange>,
    ) -> Result<StreamConfig, MediaError> {
        let target_rate = cpal::SampleRate(SAMPLE_RATE);

        for config in &configs {
            if config.min_sample_rate() <= target_rate
                && config.max_sample_rate() >= target_rate
                && config.sample_format() == SampleFormat::F32
            {
                return Ok(config.with_sample_rate(target_rate).into());
            }
        }

        for config in &configs {
            if config.sample_format() == SampleFormat::F32 {
                return Ok(config.with_max_sample_rate().into());
            }
        }

        if let Some(config) = configs.first() {
            return Ok(config.with_max_sample_rate().into());
        }

        Err(MediaError::UnsupportedConfig(
            "No suitable audio configuration found".to_string(),
        ))
    }
}

impl LocalStream for Microphone {
    fn id(&self) -> &str {
        &self.stream_id
    }

    fn tracks(&self) -> Vec<LocalTrack> {
        vec![self.track.clone()]
    }

    fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    fn is_active(&self) -> bool {
        self.stop_tx.is_some()
    }
}

impl Drop for Microphone {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Microphone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Microphone")
            .field("stream_id", &self.stream_id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(format: SampleFormat, min: u32, max: u32) -> SupportedStreamConfigRange {
        SupportedStreamConfigRange::new(
            2,
            cpal::SampleRate(min),
            cpal::SampleRate(max),
            cpal::SupportedBufferSize::Unknown,
            format,
        )
    }

    #[test]
    fn test_select_best_config() {
        let config = Microphone::select_best_config(vec![
            range(SampleFormat::I16, 8000, 96000),
            range(SampleFormat::F32, 8000, 96000),
        ])
        .unwrap();
        assert_eq!(config.sample_rate.0, SAMPLE_RATE);

        let config = Microphone::select_best_config(vec![
            range(SampleFormat::I16, 8000, 48000),
            range(SampleFormat::F32, 8000, 44100),
        ])
        .unwrap();
        assert_eq!(config.sample_rate.0, 44100);

        let config = Microphone::select_best_config(vec![range(SampleFormat::I16, 8000, 16000)]).unwrap();
        assert_eq!(config.sample_rate.0, 16000);

        assert!(matches!(
            Microphone::select_best_config(Vec::new()),
            Err(MediaError::UnsupportedConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_video_is_rejected() {
        let devices = MicrophoneDevices;
        let result = devices
            .get_user_media(MediaConstraints {
                audio: true,
                video: true,
            })
            .await;
        assert!(matches!(result, Err(MediaError::Unsupported(_))));
    }
}
