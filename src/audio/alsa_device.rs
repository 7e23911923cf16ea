//! ALSA PCM and mixer helpers for the playback backend.

use alsa::mixer::{Mixer, SelemId};
use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result};

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    /// Actual sample rate after negotiation
    pub sample_rate: u32,
    /// Actual number of channels
    pub channels: u32,
    /// Period size in frames
    pub period_size: usize,
}

/// Open a PCM device for S16LE interleaved playback.
pub fn open_playback(device: &str, sample_rate: u32, channels: u32) -> Result<(PCM, AlsaParams)> {
    let pcm = PCM::new(device, Direction::Playback, false)
        .with_context(|| format!("Failed to open PCM device '{}' for Playback", device))?;

    {
        let hwp = HwParams::any(&pcm).with_context(|| "Failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels(channels)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)?;
        pcm.hw_params(&hwp)?;
    }

    let params = {
        let hwp = pcm.hw_params_current()?;
        AlsaParams {
            sample_rate: hwp.get_rate()?,
            channels: hwp.get_channels()?,
            period_size: hwp.get_period_size()? as usize,
        }
    };

    if params.sample_rate != sample_rate {
        log::warn!(
            "ALSA negotiated {} Hz instead of {} Hz; playback pitch will be off",
            params.sample_rate,
            sample_rate
        );
    }

    log::info!(
        "ALSA Playback: device={}, rate={}, channels={}, period_size={}",
        device,
        params.sample_rate,
        params.channels,
        params.period_size,
    );

    Ok((pcm, params))
}

/// Flip the playback switch of a mixer control (e.g. "Master").
///
/// Unmuting also restores the configured `volume` percent.
pub fn set_mixer_mute(card: &str, control: &str, mute: bool, volume: u8) -> Result<()> {
    let mixer = Mixer::new(card, false)
        .with_context(|| format!("Failed to open mixer '{}'", card))?;
    let selem = mixer
        .find_selem(&SelemId::new(control, 0))
        .with_context(|| format!("Mixer control '{}' not found on '{}'", control, card))?;

    if !mute && selem.has_playback_volume() {
        let (min, max) = selem.get_playback_volume_range();
        selem
            .set_playback_volume_all(mixer_level(volume, min, max))
            .with_context(|| format!("Failed to set volume on '{}'", control))?;
    }
    selem
        .set_playback_switch_all(if mute { 0 } else { 1 })
        .with_context(|| format!("Failed to switch '{}'", control))?;
    Ok(())
}

/// Map a 0-100 percentage onto the control's raw range.
fn mixer_level(percent: u8, min: i64, max: i64) -> i64 {
    let percent = i64::from(percent.min(100));
    min + (max - min) * percent / 100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixer_level_scales_into_range() {
        assert_eq!(mixer_level(0, 0, 255), 0);
        assert_eq!(mixer_level(100, 0, 255), 255);
        assert_eq!(mixer_level(50, -100, 100), 0);
        assert_eq!(mixer_level(200, 0, 87), 87);
    }
}
