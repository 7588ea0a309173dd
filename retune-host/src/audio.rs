//! # Audio I/O Module
//!
//! Full-duplex audio for the host using CPAL (Cross-Platform Audio Library).
//! The input callback downmixes to mono and queues samples in a lock-free
//! ring; the output callback pulls them, runs the engine in place and writes
//! the result to every output channel.
//!
//! ## Features
//! - Default input and output device selection
//! - f32 stream configuration negotiated to one shared sample rate
//! - SPSC ring between the two callbacks, no locks or allocation per block
//! - Under/overrun counting instead of blocking

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SupportedStreamConfigRange};
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Producer, Split};
use retune_core::Engine;

/// Largest chunk handed to the engine from one output callback pass.
const MAX_CALLBACK_FRAMES: usize = 4096;

/// Silence queued ahead of the first output callback to absorb jitter.
const PREFILL_SAMPLES: usize = 512;

/// Devices and stream configs agreed on before the engine is built.
pub struct AudioSetup {
    input: cpal::Device,
    output: cpal::Device,
    input_config: cpal::StreamConfig,
    output_config: cpal::StreamConfig,
    pub sample_rate: u32,
}

/// Running streams; audio stops when this is dropped.
pub struct AudioStreams {
    input: cpal::Stream,
    output: cpal::Stream,
    pub xruns: Arc<AtomicU64>,
}

impl AudioStreams {
    pub fn pause(&self) {
        if let Err(e) = self.input.pause().and(self.output.pause()) {
            log::warn!("error pausing streams: {e}");
        }
    }
}

/// Picks the default devices and an f32 config they both support near
/// `target_rate`.
///
/// # Returns
/// * `Ok(setup)` - Devices and configs sharing one sample rate
/// * `Err(e)` - No device, or no common f32 format
pub fn negotiate(target_rate: u32) -> Result<AudioSetup> {
    let host = cpal::default_host();
    let input = host
        .default_input_device()
        .ok_or_else(|| anyhow!("No input device available"))?;
    let output = host
        .default_output_device()
        .ok_or_else(|| anyhow!("No output device available"))?;

    log::info!("input device: {}", input.name()?);
    log::info!("output device: {}", output.name()?);

    let output_range = find_supported_config(output.supported_output_configs()?.collect(), target_rate)
        .ok_or_else(|| anyhow!("No suitable f32 output format found"))?;
    let sample_rate = target_rate.clamp(
        output_range.min_sample_rate().0,
        output_range.max_sample_rate().0,
    );

    let input_range = input
        .supported_input_configs()?
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .filter(|c| (c.min_sample_rate().0..=c.max_sample_rate().0).contains(&sample_rate))
        .min_by_key(|c| c.channels())
        .ok_or_else(|| anyhow!("Input device cannot record f32 at {sample_rate} Hz"))?;

    let rate = cpal::SampleRate(sample_rate);
    let output_config: cpal::StreamConfig = output_range.with_sample_rate(rate).into();
    let input_config: cpal::StreamConfig = input_range.with_sample_rate(rate).into();

    log::info!(
        "selected {} Hz, {} input channel(s), {} output channel(s)",
        sample_rate,
        input_config.channels,
        output_config.channels
    );

    Ok(AudioSetup {
        input,
        output,
        input_config,
        output_config,
        sample_rate,
    })
}

/// Starts both streams with `engine` running inside the output callback.
pub fn start(setup: AudioSetup, mut engine: Engine) -> Result<AudioStreams> {
    let sample_rate = setup.sample_rate;
    let in_channels = setup.input_config.channels as usize;
    let out_channels = setup.output_config.channels as usize;

    let ring = HeapRb::<f32>::new(sample_rate as usize);
    let (mut producer, mut consumer) = ring.split();
    producer.push_slice(&[0.0; PREFILL_SAMPLES]);

    let xruns = Arc::new(AtomicU64::new(0));
    let input_xruns = Arc::clone(&xruns);
    let output_xruns = Arc::clone(&xruns);

    let input = setup
        .input
        .build_input_stream(
            &setup.input_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for frame in data.chunks(in_channels) {
                    let mono = frame.iter().sum::<f32>() / in_channels as f32;
                    if producer.try_push(mono).is_err() {
                        input_xruns.fetch_add(1, Ordering::Relaxed);
                        break;
                    }
                }
            },
            |err| log::error!("input stream error: {err}"),
            None,
        )
        .context("building input stream")?;

    let mut mono = vec![0.0f32; MAX_CALLBACK_FRAMES];
    let output = setup
        .output
        .build_output_stream(
            &setup.output_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for chunk in data.chunks_mut(MAX_CALLBACK_FRAMES * out_channels) {
                    let frames = chunk.len() / out_channels;
                    let block = &mut mono[..frames];

                    let received = consumer.pop_slice(block);
                    if received < frames {
                        block[received..].fill(0.0);
                        output_xruns.fetch_add(1, Ordering::Relaxed);
                    }

                    engine.process_block(block, sample_rate);

                    for (frame, &sample) in chunk.chunks_mut(out_channels).zip(block.iter()) {
                        frame.fill(sample);
                    }
                }
            },
            |err| log::error!("output stream error: {err}"),
            None,
        )
        .context("building output stream")?;

    input.play()?;
    output.play()?;

    Ok(AudioStreams {
        input,
        output,
        xruns,
    })
}

/// Finds the f32 configuration whose rate range lies closest to
/// `target_rate`, preferring fewer channels.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .min_by_key(|c| {
            let min = c.min_sample_rate().0;
            let max = c.max_sample_rate().0;
            let distance = if (min..=max).contains(&target_rate) {
                0
            } else {
                min.abs_diff(target_rate).min(max.abs_diff(target_rate))
            };
            (distance, c.channels())
        })
}
