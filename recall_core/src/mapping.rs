//! Audio degradation parameters to visual intensities.

use recall_schema::{AudioParameters, VisualParameters};

use crate::config::MappingConfig;
use crate::levels;

fn ratio(value: f64, divisor: f64) -> f64 {
    if divisor == 0.0 || !divisor.is_finite() {
        0.0
    } else {
        levels::non_negative(value / divisor)
    }
}

pub fn map_audio_to_visual(params: &AudioParameters, mapping: &MappingConfig) -> VisualParameters {
    let animation_speed_multiplier = if params.time_stretch > 0.0 {
        levels::bounded(
            1.0 / params.time_stretch,
            mapping.min_animation_speed(),
            mapping.max_animation_speed(),
        )
    } else {
        mapping.max_animation_speed()
    };
    VisualParameters {
        visual_jitter: ratio(params.pitch_instability, mapping.pitch_divisor()),
        visual_complexity: ratio(params.harmonic_count, mapping.harmonic_divisor()),
        corruption_intensity: levels::non_negative(params.noise_level * mapping.noise_scale()),
        animation_speed_multiplier,
        chromatic_aberration_px: levels::non_negative(
            params.harmonic_jitter * mapping.aberration_scale(),
        ),
        visual_grain: ratio(params.granular_size, mapping.grain_divisor()),
    }
}

/// Damp motion-heavy signals for hosts that prefer reduced motion.
pub fn reduce_motion(visual: VisualParameters, scale: f64) -> VisualParameters {
    VisualParameters {
        visual_jitter: visual.visual_jitter * scale,
        chromatic_aberration_px: visual.chromatic_aberration_px * scale,
        animation_speed_multiplier: 1.0 + (visual.animation_speed_multiplier - 1.0) * scale,
        ..visual
    }
}

/// Amplify intensities while audio is unavailable. The animation speed is a
/// rate, not an intensity, and is left alone.
pub fn apply_guidance(visual: VisualParameters, guidance: f64) -> VisualParameters {
    VisualParameters {
        visual_jitter: visual.visual_jitter * guidance,
        visual_complexity: visual.visual_complexity * guidance,
        corruption_intensity: visual.corruption_intensity * guidance,
        chromatic_aberration_px: visual.chromatic_aberration_px * guidance,
        visual_grain: visual.visual_grain * guidance,
        ..visual
    }
}
