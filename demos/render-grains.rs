//! An example rendering a few seconds of granular playback into a WAV file.

use std::{f32::consts::PI, sync::Arc};

use grainflux::{
    BufferStore, GrainParam, GrainVoice, GrainVoiceOptions, OutputPlane, ParamField, SampleBuffer,
};

// -------------------------------------------------------------------------------------------------

// Render and granular parameter consts (tweak as needed!)

const SAMPLE_RATE: u32 = 44100;
const BLOCK_SIZE: usize = 256;
const RENDER_SECONDS: usize = 6;

/// Output file path
const OUTPUT_PATH: &str = "render-grains.wav";

/// Grain pool size. The voice renders 8 * GRAIN_COUNT output channels.
const GRAIN_COUNT: usize = 16;
/// How often each grain retriggers
const GRAINS_PER_SECOND: f32 = 8.0;
/// Per-trigger playback rate randomization
const RATE_RANDOM: f32 = 0.25;
/// Per-trigger read offset randomization behind the traversal playhead
const DELAY_RANDOM_MS: f32 = 150.0;
/// Base grain amplitude
const AMPLITUDE: f32 = 0.8;

// -------------------------------------------------------------------------------------------------

fn main() -> Result<(), Box<dyn std::error::Error>> {
    simple_logger::SimpleLogger::new().init()?;

    // Create the host-side buffer store with a synthesized source tone and a Hann envelope
    let store = Arc::new(BufferStore::new());

    let source: Vec<f32> = (0..2 * SAMPLE_RATE as usize)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            let vibrato = (2.0 * PI * 5.0 * t).sin() * 3.0;
            (2.0 * PI * 220.0 * t + vibrato).sin() * 0.4 + (2.0 * PI * 331.0 * t).sin() * 0.2
        })
        .collect();
    store.insert("source", SampleBuffer::new(source, 1, SAMPLE_RATE));

    let envelope: Vec<f32> = (0..2048)
        .map(|i| {
            let phase = i as f32 / 2048.0;
            0.5 * (1.0 - (2.0 * PI * phase).cos())
        })
        .collect();
    store.insert("envelope", SampleBuffer::new(envelope, 1, SAMPLE_RATE));

    // Create the voice
    let mut voice = GrainVoice::new(
        Arc::clone(&store),
        SAMPLE_RATE,
        GrainVoiceOptions::default()
            .grain_count(GRAIN_COUNT)
            .sample_buffer("source")
            .envelope_buffer("envelope"),
    )?;

    // Configure grains from the control side: spread the grain clocks evenly across the
    // clock period and randomize rate and read position per trigger
    let handle = voice.handle();
    handle.set_parameter(
        1.0 / GRAIN_COUNT as f32,
        GrainParam::Window,
        ParamField::Offset,
    )?;
    handle.set_parameter(RATE_RANDOM, GrainParam::Rate, ParamField::Random)?;
    handle.set_parameter(DELAY_RANDOM_MS, GrainParam::Delay, ParamField::Random)?;
    handle.set_parameter(AMPLITUDE, GrainParam::Amplitude, ParamField::Base)?;

    // Render block by block, mixing the grain output plane down to mono
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(OUTPUT_PATH, spec)?;

    let mut inputs = vec![vec![0.0f32; BLOCK_SIZE]; voice.input_channel_count()];
    let mut outputs = vec![vec![0.0f32; BLOCK_SIZE]; voice.output_channel_count()];

    let clock_increment = GRAINS_PER_SECOND / SAMPLE_RATE as f32;
    let traversal_increment = 1.0 / (RENDER_SECONDS as f32 * SAMPLE_RATE as f32);
    let mut clock_phase = 0.0f32;
    let mut traversal_phase = 0.0f32;

    let total_blocks = RENDER_SECONDS * SAMPLE_RATE as usize / BLOCK_SIZE;
    for _ in 0..total_blocks {
        // drive the grain clock and traversal phasor inputs
        for frame in 0..BLOCK_SIZE {
            inputs[0][frame] = clock_phase;
            inputs[1][frame] = traversal_phase;
            clock_phase = (clock_phase + clock_increment).fract();
            traversal_phase = (traversal_phase + traversal_increment).fract();
        }

        let input_refs: Vec<&[f32]> = inputs.iter().map(|channel| channel.as_slice()).collect();
        let mut output_refs: Vec<&mut [f32]> = outputs
            .iter_mut()
            .map(|channel| channel.as_mut_slice())
            .collect();
        voice.process(&input_refs, &mut output_refs);

        let output_base = OutputPlane::Output as usize * GRAIN_COUNT;
        for frame in 0..BLOCK_SIZE {
            let mut mixed = 0.0f32;
            for grain in 0..GRAIN_COUNT {
                mixed += outputs[output_base + grain][frame];
            }
            writer.write_sample(mixed / (GRAIN_COUNT as f32).sqrt())?;
        }
    }
    writer.finalize()?;

    println!("Rendered {RENDER_SECONDS} seconds of grains to '{OUTPUT_PATH}'");
    Ok(())
}
