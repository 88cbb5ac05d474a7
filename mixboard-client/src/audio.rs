//! Tone output through the default audio device.

use std::sync::Arc;

use crate::alert::TonePlayer;

#[cfg(feature = "sound")]
mod rodio_player {
    use std::time::{Duration, Instant};

    use rodio::source::{SineWave, Source};
    use rodio::{OutputStreamBuilder, Sink};
    use tracing::debug;

    use crate::alert::{AlertError, Tone, TonePlayer};

    /// Opens the output stream per alert so an unplugged device does not
    /// poison later alerts.
    #[derive(Debug, Default)]
    pub struct RodioPlayer;

    impl TonePlayer for RodioPlayer {
        fn play(&self, tone: &Tone) -> Result<(), AlertError> {
            let mut stream = OutputStreamBuilder::open_default_stream()
                .map_err(|e| AlertError::Audio(e.to_string()))?;
            stream.log_on_drop(false);
            let sink = Sink::connect_new(stream.mixer());

            let start = Instant::now();
            for offset in tone.offsets {
                let elapsed = start.elapsed();
                if *offset > elapsed {
                    std::thread::sleep(*offset - elapsed);
                }
                sink.append(
                    SineWave::new(tone.frequency_hz)
                        .take_duration(tone.pulse)
                        .amplify(tone.volume),
                );
            }
            sink.sleep_until_end();
            // let the device drain before the stream is dropped
            std::thread::sleep(Duration::from_millis(50));
            debug!(freq = tone.frequency_hz, pulses = tone.offsets.len(), "tone played");
            Ok(())
        }
    }
}

#[cfg(feature = "sound")]
pub use rodio_player::RodioPlayer;

/// Player for this build, if audio support was compiled in.
pub fn default_player() -> Option<Arc<dyn TonePlayer>> {
    #[cfg(feature = "sound")]
    {
        Some(Arc::new(RodioPlayer))
    }
    #[cfg(not(feature = "sound"))]
    {
        tracing::info!("built without the `sound` feature; alert tones disabled");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "sound")]
    #[test]
    fn sound_build_has_a_player() {
        assert!(default_player().is_some());
    }

    #[cfg(not(feature = "sound"))]
    #[test]
    fn silent_build_has_no_player() {
        assert!(default_player().is_none());
    }
}
