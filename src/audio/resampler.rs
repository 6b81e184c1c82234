use crate::audio::AudioError;
use rubato::{
    Resampler as RubatoResampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType,
    WindowFunction,
};

/// Streaming mono resampler. Input arrives in arbitrary slices; whole 100 ms
/// blocks are converted as they fill and the remainder is carried over.
///
/// The sinc filter's output delay is dropped from the head of the stream and
/// drained by `flush`, so the total output length matches the input duration.
pub struct Resampler {
    inner: Option<SincFixedIn<f32>>,
    ratio: f64,
    chunk_size: usize,
    carry: Vec<f32>,
    /// Leading output frames still to discard
    skip: usize,
    consumed: usize,
    emitted: usize,
}

impl Resampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self, AudioError> {
        let chunk_size = (from_rate as usize / 10).max(1);
        let ratio = to_rate as f64 / from_rate as f64;

        // Same rate: pass samples through untouched.
        let inner = if from_rate == to_rate {
            None
        } else {
            let params = SincInterpolationParameters {
                sinc_len: 256,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 256,
                window: WindowFunction::BlackmanHarris2,
            };
            Some(
                SincFixedIn::<f32>::new(
                    ratio,
                    2.0, // max_resample_ratio_relative
                    params,
                    chunk_size,
                    1, // nbr_channels
                )
                .map_err(|e| AudioError::ResampleFailed(e.to_string()))?,
            )
        };
        let skip = inner.as_ref().map(|r| r.output_delay()).unwrap_or(0);

        Ok(Resampler {
            inner,
            ratio,
            chunk_size,
            carry: Vec::new(),
            skip,
            consumed: 0,
            emitted: 0,
        })
    }

    /// Feed samples and return whatever full blocks are ready.
    pub fn push(&mut self, input: &[f32]) -> Result<Vec<f32>, AudioError> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(input.to_vec());
        };

        self.carry.extend_from_slice(input);
        let mut output = Vec::new();
        while self.carry.len() >= self.chunk_size {
            let block: Vec<f32> = self.carry.drain(..self.chunk_size).collect();
            self.consumed += block.len();
            output.extend(run_block(inner, block)?);
        }
        let output = self.trim_delay(output);
        self.emitted += output.len();
        Ok(output)
    }

    /// Convert the carried remainder and drain the filter with zeros, trimming
    /// the result to the length the input duration calls for.
    pub fn flush(&mut self) -> Result<Vec<f32>, AudioError> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(Vec::new());
        };
        self.consumed += self.carry.len();
        if self.consumed == 0 {
            return Ok(Vec::new());
        }
        let expected = (self.consumed as f64 * self.ratio).round() as usize;
        let wanted = expected.saturating_sub(self.emitted) + self.skip;

        let mut block = std::mem::take(&mut self.carry);
        let mut raw = Vec::new();
        while raw.len() < wanted {
            block.resize(self.chunk_size, 0.0);
            let out = run_block(inner, std::mem::take(&mut block))?;
            if out.is_empty() {
                break;
            }
            raw.extend(out);
        }

        let mut output = self.trim_delay(raw);
        output.truncate(expected.saturating_sub(self.emitted));
        self.emitted += output.len();
        Ok(output)
    }

    fn trim_delay(&mut self, mut output: Vec<f32>) -> Vec<f32> {
        let skip = self.skip.min(output.len());
        output.drain(..skip);
        self.skip -= skip;
        output
    }
}

fn run_block(inner: &mut SincFixedIn<f32>, block: Vec<f32>) -> Result<Vec<f32>, AudioError> {
    let mut waves_out = inner
        .process(&[block], None)
        .map_err(|e| AudioError::ResampleFailed(e.to_string()))?;
    Ok(waves_out.pop().unwrap_or_default())
}

/// Resample a whole mono buffer in one go.
pub fn resample_all(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, AudioError> {
    let mut resampler = Resampler::new(from_rate, to_rate)?;
    let mut output = resampler.push(samples)?;
    output.extend(resampler.flush()?);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_equal_rates_then_samples_pass_through() {
        let mut resampler = Resampler::new(16_000, 16_000).unwrap();

        assert_eq!(resampler.push(&[0.1, 0.2, 0.3]).unwrap(), vec![0.1, 0.2, 0.3]);
        assert!(resampler.flush().unwrap().is_empty());
    }

    #[test]
    fn given_48k_input_when_resampled_to_16k_then_filter_delay_is_drained_on_flush() {
        // Given
        let mut resampler = Resampler::new(48_000, 16_000).unwrap();
        let input = vec![0.5f32; 4_800 * 2 + 1_200];

        // When
        let mut output = resampler.push(&input).unwrap();
        let pushed = output.len();
        output.extend(resampler.flush().unwrap());

        // Then
        assert!(pushed < 3_200, "pushed {pushed}");
        assert_eq!(output.len(), 3_600);
        assert!((output[1_800] - 0.5).abs() < 0.05, "mid sample {}", output[1_800]);
    }

    #[test]
    fn given_clip_when_upsampled_then_length_doubles() {
        let output = resample_all(&vec![0.0f32; 2_400], 24_000, 48_000).unwrap();

        assert_eq!(output.len(), 4_800);
    }

    #[test]
    fn given_empty_stream_when_flushed_then_nothing_is_emitted() {
        let mut resampler = Resampler::new(48_000, 16_000).unwrap();

        assert!(resampler.flush().unwrap().is_empty());
    }
}
