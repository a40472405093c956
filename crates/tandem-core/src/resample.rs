//! Asynchronous sample-rate conversion
//!
//! Bridges drive converters through the [`Asrc`] trait: ask how many input
//! frames the next block needs, then process exactly one block. The converter
//! itself is opaque; [`RubatoFactory`] provides the production implementation
//! on top of rubato's fixed-output resamplers.
//!
//! # Ratio convention
//!
//! `ratio` is a relative consumption ratio on top of the nominal rate pair:
//! input frames consumed per output frame, divided by `input_rate /
//! output_rate`. A ratio of 1.0 runs at exactly the nominal pair, 1.00005
//! consumes 50 ppm more input than nominal.

use rubato::{
    FastFixedOut, PolynomialDegree, Resampler, SincFixedOut, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};
use thiserror::Error;

pub use crate::config::ResamplerQuality;
use crate::config::ResamplerConfig;
use crate::types::AudioBuffer;

/// Largest relative ratio change a converter is constructed to accept
const MAX_RELATIVE_RATIO: f64 = 1.1;

/// Errors from creating or running a converter
#[derive(Error, Debug)]
pub enum AsrcError {
    #[error("Resampler construction failed: {0}")]
    Construction(#[from] rubato::ResamplerConstructionError),

    #[error("Resampling failed: {0}")]
    Process(#[from] rubato::ResampleError),

    #[error("Unsupported converter parameters: {0}")]
    Unsupported(String),

    #[error("Buffer too small: need {needed} frames, have {available}")]
    BufferTooSmall { needed: usize, available: usize },
}

/// Frame counts of one processed block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessedFrames {
    pub frames_used: usize,
    pub frames_generated: usize,
}

/// A running sample-rate converter
///
/// Created on the control thread by an [`AsrcFactory`]; driven from the
/// audio thread. Implementations must not allocate in
/// [`required_input_frames`](Asrc::required_input_frames) or
/// [`process`](Asrc::process).
pub trait Asrc: Send {
    fn num_channels(&self) -> usize;

    /// Largest block the converter was built for
    fn max_output_frames(&self) -> usize;

    /// Most input frames any single block can ask for
    fn max_input_frames(&self) -> usize;

    /// Input frames between the start of the input fed after a reset and
    /// the input frame the first generated output frame carries, at ratio 1.0
    ///
    /// Output frames before that point replay the (silent) filter history.
    fn output_delay(&self) -> usize {
        0
    }

    /// Input frames `process` will consume to generate `output_frames` at `ratio`
    fn required_input_frames(&mut self, output_frames: usize, ratio: f64) -> usize;

    /// Convert one block
    ///
    /// Reads `input_frames` frames from `input` (which must be at least
    /// [`required_input_frames`](Asrc::required_input_frames)) and writes up
    /// to `output_frames` frames into `output`.
    fn process(
        &mut self,
        input: &AudioBuffer,
        input_frames: usize,
        output: &mut AudioBuffer,
        output_frames: usize,
        ratio: f64,
    ) -> Result<ProcessedFrames, AsrcError>;

    /// Drop filter history (after a discontinuity)
    fn reset(&mut self);
}

/// Creates converters for a rate pair
pub trait AsrcFactory: Send + Sync {
    fn create(
        &self,
        num_channels: usize,
        input_rate: u32,
        output_rate: u32,
        max_output_frames: usize,
        quality: ResamplerQuality,
    ) -> Result<Box<dyn Asrc>, AsrcError>;
}

enum Engine {
    Sinc(SincFixedOut<f32>),
    Fast(FastFixedOut<f32>),
}

/// rubato-backed converter (fixed output size per block)
pub struct RubatoAsrc {
    engine: Engine,
    num_channels: usize,
    max_output_frames: usize,
    chunk_size: usize,
    ratio: f64,
    output_delay: usize,
    nominal_step: f64,
}

impl RubatoAsrc {
    fn resampler(&mut self) -> &mut dyn ResamplerControl {
        match &mut self.engine {
            Engine::Sinc(r) => r,
            Engine::Fast(r) => r,
        }
    }

    /// Run one block of a rising ramp through a fresh converter and read
    /// back which input frame the last output landed on
    fn measure_output_delay(&mut self) -> Result<usize, AsrcError> {
        let frames = self.chunk_size;
        let needed = self.resampler().input_frames_next();
        let ramp: Vec<f32> = (0..needed).map(|i| (i + 1) as f32).collect();
        let input = AudioBuffer::from_channels(vec![ramp; self.num_channels]);
        let mut output = AudioBuffer::new(self.num_channels, frames);

        let processed = self.process(&input, needed, &mut output, frames, 1.0);
        self.reset();
        let processed = processed?;
        let Some(&last) = output.channel(0).get(processed.frames_generated.saturating_sub(1)) else {
            return Ok(0);
        };

        // Ramp value v is input frame v - 1
        let expected = (processed.frames_generated as f64 - 1.0) * self.nominal_step;
        let delay = (expected - (last as f64 - 1.0)).round();
        Ok(if delay > 0.0 { delay as usize } else { 0 })
    }

    /// Apply block size and ratio, skipping calls when nothing changed
    fn configure(&mut self, output_frames: usize, ratio: f64) -> Result<(), AsrcError> {
        if output_frames == 0 || output_frames > self.max_output_frames {
            return Err(AsrcError::BufferTooSmall {
                needed: output_frames,
                available: self.max_output_frames,
            });
        }
        if output_frames != self.chunk_size {
            self.resampler().set_chunk_size(output_frames)?;
            self.chunk_size = output_frames;
        }
        if ratio != self.ratio {
            // rubato's ratio is output over input
            self.resampler().set_resample_ratio_relative(1.0 / ratio)?;
            self.ratio = ratio;
        }
        Ok(())
    }
}

/// Object-safe subset of rubato's `Resampler` used here
trait ResamplerControl {
    fn set_chunk_size(&mut self, frames: usize) -> Result<(), rubato::ResampleError>;
    fn set_resample_ratio_relative(&mut self, relative: f64) -> Result<(), rubato::ResampleError>;
    fn input_frames_next(&self) -> usize;
    fn input_frames_max(&self) -> usize;
    fn reset(&mut self);
}

impl<R: Resampler<f32>> ResamplerControl for R {
    fn set_chunk_size(&mut self, frames: usize) -> Result<(), rubato::ResampleError> {
        Resampler::set_chunk_size(self, frames)
    }

    fn set_resample_ratio_relative(&mut self, relative: f64) -> Result<(), rubato::ResampleError> {
        Resampler::set_resample_ratio_relative(self, relative, false)
    }

    fn input_frames_next(&self) -> usize {
        Resampler::input_frames_next(self)
    }

    fn input_frames_max(&self) -> usize {
        Resampler::input_frames_max(self)
    }

    fn reset(&mut self) {
        Resampler::reset(self)
    }
}

impl Asrc for RubatoAsrc {
    fn num_channels(&self) -> usize {
        self.num_channels
    }

    fn max_output_frames(&self) -> usize {
        self.max_output_frames
    }

    fn output_delay(&self) -> usize {
        self.output_delay
    }

    fn max_input_frames(&self) -> usize {
        match &self.engine {
            Engine::Sinc(r) => ResamplerControl::input_frames_max(r),
            Engine::Fast(r) => ResamplerControl::input_frames_max(r),
        }
    }

    fn required_input_frames(&mut self, output_frames: usize, ratio: f64) -> usize {
        match self.configure(output_frames, ratio) {
            Ok(()) => self.resampler().input_frames_next(),
            Err(_) => 0,
        }
    }

    fn process(
        &mut self,
        input: &AudioBuffer,
        input_frames: usize,
        output: &mut AudioBuffer,
        output_frames: usize,
        ratio: f64,
    ) -> Result<ProcessedFrames, AsrcError> {
        self.configure(output_frames, ratio)?;

        let needed = self.resampler().input_frames_next();
        if input_frames < needed || input.capacity() < needed {
            return Err(AsrcError::BufferTooSmall {
                needed,
                available: input_frames.min(input.capacity()),
            });
        }
        if output.capacity() < output_frames {
            return Err(AsrcError::BufferTooSmall {
                needed: output_frames,
                available: output.capacity(),
            });
        }

        let wave_in = input.raw_channels();
        let wave_out = output.raw_channels_mut();
        let (frames_used, frames_generated) = match &mut self.engine {
            Engine::Sinc(r) => r.process_into_buffer(wave_in, wave_out, None)?,
            Engine::Fast(r) => r.process_into_buffer(wave_in, wave_out, None)?,
        };
        output.set_num_frames(frames_generated.min(output_frames));

        Ok(ProcessedFrames {
            frames_used,
            frames_generated,
        })
    }

    fn reset(&mut self) {
        self.resampler().reset();
    }
}

/// Builds [`RubatoAsrc`] converters from [`ResamplerConfig`]
#[derive(Debug, Clone, Default)]
pub struct RubatoFactory {
    config: ResamplerConfig,
}

impl RubatoFactory {
    pub fn new(config: ResamplerConfig) -> Self {
        Self { config }
    }

    fn sinc_parameters(&self) -> SincInterpolationParameters {
        SincInterpolationParameters {
            sinc_len: self.config.sinc_len,
            f_cutoff: self.config.f_cutoff,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: self.config.oversampling_factor,
            window: WindowFunction::BlackmanHarris2,
        }
    }
}

impl AsrcFactory for RubatoFactory {
    fn create(
        &self,
        num_channels: usize,
        input_rate: u32,
        output_rate: u32,
        max_output_frames: usize,
        quality: ResamplerQuality,
    ) -> Result<Box<dyn Asrc>, AsrcError> {
        if num_channels == 0 || input_rate == 0 || output_rate == 0 || max_output_frames == 0 {
            return Err(AsrcError::Unsupported(format!(
                "{} channels, {}Hz -> {}Hz, {} frames",
                num_channels, input_rate, output_rate, max_output_frames
            )));
        }

        let resample_ratio = output_rate as f64 / input_rate as f64;
        let engine = match quality {
            ResamplerQuality::Sinc => Engine::Sinc(SincFixedOut::<f32>::new(
                resample_ratio,
                MAX_RELATIVE_RATIO,
                self.sinc_parameters(),
                max_output_frames,
                num_channels,
            )?),
            ResamplerQuality::Fast => Engine::Fast(FastFixedOut::<f32>::new(
                resample_ratio,
                MAX_RELATIVE_RATIO,
                PolynomialDegree::Cubic,
                max_output_frames,
                num_channels,
            )?),
        };

        let mut asrc = RubatoAsrc {
            engine,
            num_channels,
            max_output_frames,
            chunk_size: max_output_frames,
            ratio: 1.0,
            output_delay: 0,
            nominal_step: input_rate as f64 / output_rate as f64,
        };
        asrc.output_delay = asrc.measure_output_delay()?;

        log::debug!(
            "Created {:?} resampler: {}ch {}Hz -> {}Hz, max {} frames, delay {} frames",
            quality,
            num_channels,
            input_rate,
            output_rate,
            max_output_frames,
            asrc.output_delay
        );

        Ok(Box::new(asrc))
    }
}

/// Scratch capacity for reading `max_output_frames` worth of input
///
/// `ceil(max_output_frames × input_rate / output_rate) + guard`. Converters
/// with filter look-ahead may need more; see [`scratch_capacity`].
pub fn input_capacity(max_output_frames: usize, input_rate: u32, output_rate: u32) -> usize {
    let nominal = (max_output_frames as u64 * input_rate as u64).div_ceil(output_rate.max(1) as u64);
    nominal as usize + crate::types::RESAMPLER_GUARD_FRAMES
}

/// Scratch capacity that covers both the nominal block and `asrc`'s worst case
pub fn scratch_capacity(asrc: &dyn Asrc, max_output_frames: usize, input_rate: u32, output_rate: u32) -> usize {
    input_capacity(max_output_frames, input_rate, output_rate)
        .max(asrc.max_input_frames() + crate::types::RESAMPLER_GUARD_FRAMES)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(channels: usize, frames: usize, rate: f32, freq: f32) -> AudioBuffer {
        let samples: Vec<f32> = (0..frames)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / rate).sin() * 0.5)
            .collect();
        AudioBuffer::from_channels(vec![samples; channels])
    }

    #[test]
    fn test_sinc_generates_exactly_requested_frames() {
        let factory = RubatoFactory::default();
        let mut asrc = factory.create(2, 48000, 44100, 512, ResamplerQuality::Sinc).unwrap();
        let input = sine(2, scratch_capacity(asrc.as_ref(), 512, 48000, 44100), 48000.0, 440.0);
        let mut output = AudioBuffer::new(2, 512);

        for block in [441usize, 512, 256, 441] {
            let needed = asrc.required_input_frames(block, 1.0);
            assert!(needed > 0 && needed <= input.capacity());
            let processed = asrc.process(&input, needed, &mut output, block, 1.0).unwrap();
            assert_eq!(processed.frames_generated, block);
            assert_eq!(processed.frames_used, needed);
            assert_eq!(output.num_frames(), block);
        }
    }

    #[test]
    fn test_fast_drift_ratio_consumes_more_input() {
        let factory = RubatoFactory::default();
        let mut asrc = factory.create(1, 48000, 48000, 480, ResamplerQuality::Fast).unwrap();
        let input = sine(1, scratch_capacity(asrc.as_ref(), 480, 48000, 48000), 48000.0, 1000.0);
        let mut output = AudioBuffer::new(1, 480);

        // Warm up, then compare totals over many blocks
        let mut nominal = 0;
        let mut faster = 0;
        for _ in 0..100 {
            let n = asrc.required_input_frames(480, 1.0);
            nominal += asrc.process(&input, n, &mut output, 480, 1.0).unwrap().frames_used;
        }
        for _ in 0..100 {
            let n = asrc.required_input_frames(480, 1.005);
            faster += asrc.process(&input, n, &mut output, 480, 1.005).unwrap().frames_used;
        }
        assert!(faster > nominal);
        let measured = faster as f64 / nominal as f64;
        assert!((measured - 1.005).abs() < 0.001, "measured {}", measured);
    }

    #[test]
    fn test_fast_output_delay_is_measured() {
        let factory = RubatoFactory::default();
        let mut asrc = factory.create(1, 48000, 48000, 480, ResamplerQuality::Fast).unwrap();
        assert_eq!(asrc.output_delay(), 3);
        assert_eq!(asrc.max_output_frames(), 480);

        // Measuring left the converter freshly reset
        let needed = asrc.required_input_frames(480, 1.0);
        assert_eq!(needed, 484);
        let ramp: Vec<f32> = (0..needed).map(|i| i as f32).collect();
        let input = AudioBuffer::from_channels(vec![ramp]);
        let mut output = AudioBuffer::new(1, 480);
        asrc.process(&input, needed, &mut output, 480, 1.0).unwrap();
        assert_eq!(&output.channel(0)[..3], &[0.0; 3]);
        assert_eq!(output.channel(0)[4], 1.0);
        assert_eq!(output.channel(0)[479], 476.0);
    }

    #[test]
    fn test_sinc_output_delay_covers_filter_half_length() {
        let factory = RubatoFactory::default();
        let asrc = factory.create(2, 48000, 48000, 256, ResamplerQuality::Sinc).unwrap();
        let delay = asrc.output_delay();
        assert!(delay > 0 && delay <= 128, "delay {}", delay);
    }

    #[test]
    fn test_short_input_is_rejected() {
        let factory = RubatoFactory::default();
        let mut asrc = factory.create(1, 44100, 48000, 256, ResamplerQuality::Fast).unwrap();
        let input = AudioBuffer::new(1, 16);
        let mut output = AudioBuffer::new(1, 256);
        let result = asrc.process(&input, 16, &mut output, 256, 1.0);
        assert!(matches!(result, Err(AsrcError::BufferTooSmall { .. })));
    }

    #[test]
    fn test_invalid_parameters_are_unsupported() {
        let factory = RubatoFactory::default();
        assert!(matches!(
            factory.create(0, 48000, 44100, 256, ResamplerQuality::Sinc),
            Err(AsrcError::Unsupported(_))
        ));
    }

    #[test]
    fn test_input_capacity_includes_guard() {
        assert_eq!(input_capacity(441, 48000, 44100), 480 + crate::types::RESAMPLER_GUARD_FRAMES);
        assert_eq!(input_capacity(480, 48000, 48000), 488);
    }
}
