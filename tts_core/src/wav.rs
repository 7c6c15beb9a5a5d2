use std::io::Cursor;

use anyhow::Context;

const I16_MAX_F32: f32 = i16::MAX as f32;

/// Encode mono f32 samples in [-1.0, 1.0] as a 16-bit PCM WAV file.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> anyhow::Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    // 44 byte header + 2 bytes per sample
    let mut cursor = Cursor::new(Vec::<u8>::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).context("wav header")?;
        for &s in samples {
            writer
                .write_sample((s.clamp(-1.0, 1.0) * I16_MAX_F32) as i16)
                .context("wav sample")?;
        }
        writer.finalize().context("wav finalize")?;
    }
    Ok(cursor.into_inner())
}
