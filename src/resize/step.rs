//! Step policy: which step comes next and how big its output is.
//!
//! Step `n` scales the source width by `1 / (n + 1)`, keeping the aspect
//! ratio. Step 0 is the unscaled source. [`next_resize_step`] never returns a
//! step whose width equals the previous one, so a caller that keeps asking
//! for the next step always makes progress and eventually hits
//! [`MmsError::Exhausted`].

use crate::config::ResizeConfig;
use crate::error::{ExhaustedReason, MmsError, Result};

/// Numeric limits for a resize sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeSettings {
    pub max_steps: u32,
    pub min_width: u32,
    pub min_height: u32,
    pub max_pixels: Option<u64>,
}

impl From<&ResizeConfig> for ResizeSettings {
    fn from(cfg: &ResizeConfig) -> Self {
        Self {
            max_steps: cfg.max_steps,
            min_width: cfg.min_width,
            min_height: cfg.min_height,
            max_pixels: cfg.max_pixels,
        }
    }
}

impl Default for ResizeSettings {
    fn default() -> Self {
        Self::from(&ResizeConfig::default())
    }
}

/// One entry of a [`resize_plan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PlannedStep {
    pub step: u32,
    pub width: u32,
    pub height: u32,
}

/// Output dimensions of `step` for a `width` x `height` source.
pub fn scaled_dimensions(width: u32, height: u32, step: u32) -> (u32, u32) {
    if width == 0 {
        return (0, 0);
    }
    let target_w = width / step.saturating_add(1);
    if target_w == 0 {
        return (0, 0);
    }
    (target_w, height_for_width(width, height, target_w))
}

/// Height matching `target_width` at the aspect ratio of `width` x `height`.
///
/// Rounded to nearest, never 0 for a non-zero target.
pub fn height_for_width(width: u32, height: u32, target_width: u32) -> u32 {
    if width == 0 || target_width == 0 {
        return 0;
    }
    let w = u64::from(width);
    let h = (u64::from(height) * u64::from(target_width) + w / 2) / w;
    u32::try_from(h).unwrap_or(u32::MAX).max(1)
}

/// The step to use after `current` for a `width` x `height` source.
pub fn next_resize_step(
    current: u32,
    width: u32,
    height: u32,
    settings: &ResizeSettings,
) -> Result<u32> {
    let prev_width = scaled_dimensions(width, height, current).0;
    let exhausted = |step, reason| MmsError::Exhausted { step, reason };

    let mut step = current
        .checked_add(1)
        .ok_or(exhausted(current, ExhaustedReason::StepLimit))?;

    if let Some(max_pixels) = settings.max_pixels {
        while step <= settings.max_steps {
            let (w, h) = scaled_dimensions(width, height, step);
            if u64::from(w) * u64::from(h) <= max_pixels {
                break;
            }
            step += 1;
        }
    }

    loop {
        if step > settings.max_steps {
            return Err(exhausted(step, ExhaustedReason::StepLimit));
        }
        let (w, h) = scaled_dimensions(width, height, step);
        if w < settings.min_width || h < settings.min_height {
            return Err(exhausted(step, ExhaustedReason::BelowMinimum));
        }
        if w < prev_width {
            return Ok(step);
        }
        step = step
            .checked_add(1)
            .ok_or(exhausted(step, ExhaustedReason::StepLimit))?;
    }
}

/// Every step a caller would go through, in order, until exhaustion.
pub fn resize_plan(width: u32, height: u32, settings: &ResizeSettings) -> Vec<PlannedStep> {
    let mut plan: Vec<PlannedStep> = Vec::new();
    let mut current = 0;
    while let Ok(step) = next_resize_step(current, width, height, settings) {
        let (w, h) = scaled_dimensions(width, height, step);
        debug_assert!(plan.last().is_none_or(|p| w < p.width));
        plan.push(PlannedStep {
            step,
            width: w,
            height: h,
        });
        current = step;
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(max_steps: u32, min: u32) -> ResizeSettings {
        ResizeSettings {
            max_steps,
            min_width: min,
            min_height: min,
            max_pixels: None,
        }
    }

    #[test]
    fn test_scaled_dimensions_keep_aspect() {
        assert_eq!(scaled_dimensions(4000, 3000, 0), (4000, 3000));
        assert_eq!(scaled_dimensions(4000, 3000, 1), (2000, 1500));
        assert_eq!(scaled_dimensions(4000, 3000, 2), (1333, 1000));
        assert_eq!(scaled_dimensions(1000, 1, 3), (250, 1));
        assert_eq!(scaled_dimensions(3, 3, 5), (0, 0));
        assert_eq!(scaled_dimensions(0, 10, 0), (0, 0));
    }

    #[test]
    fn test_first_step_halves_width() {
        let step = next_resize_step(0, 4000, 3000, &settings(8, 16)).unwrap();
        assert_eq!(step, 1);
        assert_eq!(scaled_dimensions(4000, 3000, step).0, 2000);
    }

    #[test]
    fn test_skips_steps_that_would_stall() {
        // 10/4 and 10/5 are both 2, so step 4 must be skipped.
        let plan = resize_plan(10, 10, &settings(20, 1));
        let steps: Vec<u32> = plan.iter().map(|p| p.step).collect();
        let widths: Vec<u32> = plan.iter().map(|p| p.width).collect();
        assert_eq!(steps, vec![1, 2, 3, 5]);
        assert_eq!(widths, vec![5, 3, 2, 1]);
    }

    #[test]
    fn test_plan_is_strictly_decreasing() {
        let plan = resize_plan(4000, 3000, &settings(50, 16));
        assert!(!plan.is_empty());
        for pair in plan.windows(2) {
            assert!(pair[1].width < pair[0].width);
            assert!(pair[1].step > pair[0].step);
        }
        assert!(plan.iter().all(|p| p.width >= 16 && p.height >= 16));
    }

    #[test]
    fn test_step_limit() {
        let s = settings(2, 16);
        assert_eq!(next_resize_step(1, 4000, 3000, &s).unwrap(), 2);
        let err = next_resize_step(2, 4000, 3000, &s).unwrap_err();
        assert!(matches!(
            err,
            MmsError::Exhausted {
                step: 3,
                reason: ExhaustedReason::StepLimit
            }
        ));
    }

    #[test]
    fn test_below_minimum() {
        let err = next_resize_step(0, 100, 20, &settings(8, 16)).unwrap_err();
        assert!(matches!(
            err,
            MmsError::Exhausted {
                reason: ExhaustedReason::BelowMinimum,
                ..
            }
        ));
    }

    #[test]
    fn test_max_pixels_jumps_ahead() {
        let s = ResizeSettings {
            max_pixels: Some(1_000_000),
            ..settings(8, 16)
        };
        let step = next_resize_step(0, 4000, 3000, &s).unwrap();
        assert_eq!(step, 3);
        assert_eq!(scaled_dimensions(4000, 3000, step), (1000, 750));
    }

    #[test]
    fn test_max_pixels_unreachable_hits_limit() {
        let s = ResizeSettings {
            max_pixels: Some(10),
            ..settings(3, 1)
        };
        let err = next_resize_step(0, 4000, 3000, &s).unwrap_err();
        assert!(err.is_exhausted());
    }
}
