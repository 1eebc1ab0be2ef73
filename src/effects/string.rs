//! Reference string effects.

use super::{parse_props, EffectContext, EffectRegistry, StringEffect};
use crate::pixels::PixelTarget;
use rand::Rng;
use serde::Deserialize;

pub fn register_builtins(registry: &mut EffectRegistry) {
    registry.register_string("setColor", |props| Ok(Box::new(SetColor { props: parse_props(props)? })));
    registry.register_string("multiplyAll", |props| Ok(Box::new(MultiplyAll { props: parse_props(props)? })));
    registry.register_string("sparkle", |props| Ok(Box::new(Sparkle { props: parse_props(props)? })));
    registry.register_string("twinkle", |props| Ok(Box::new(Twinkle::new(parse_props(props)?))));
    registry.register_string("rainbowRandom", |props| Ok(Box::new(RainbowRandom { props: parse_props(props)? })));
    registry.register_string("rainbow", |props| Ok(Box::new(Rainbow { props: parse_props(props)? })));
}

pub fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [u8; 3] {
    let h = h.rem_euclid(1.0);
    let h_i = (h * 6.0) as i32;
    let f = h * 6.0 - h_i as f32;
    let p = v * (1.0 - s);
    let q = v * (1.0 - f * s);
    let t = v * (1.0 - (1.0 - f) * s);

    let (r, g, b) = match h_i % 6 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };

    [(r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8]
}

const WHITE: [u8; 3] = [255, 255, 255];

// ---------------------------------------------------------------------------

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SetColorProps {
    pub color: [u8; 3],
}

impl Default for SetColorProps {
    fn default() -> Self {
        Self { color: WHITE }
    }
}

pub struct SetColor {
    props: SetColorProps,
}

impl StringEffect for SetColor {
    fn render(&mut self, target: &mut dyn PixelTarget, _ctx: &EffectContext) -> anyhow::Result<()> {
        let [r, g, b] = self.props.color;
        target.set_all_pixels(r, g, b);
        Ok(())
    }
}

// ---------------------------------------------------------------------------

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct MultiplyAllProps {
    pub multiplier: f32,
}

impl Default for MultiplyAllProps {
    fn default() -> Self {
        Self { multiplier: 0.9 }
    }
}

/// Fades whatever earlier tracks (or earlier frames) left in the buffer.
pub struct MultiplyAll {
    props: MultiplyAllProps,
}

impl StringEffect for MultiplyAll {
    fn render(&mut self, target: &mut dyn PixelTarget, _ctx: &EffectContext) -> anyhow::Result<()> {
        target.multiply_all(self.props.multiplier);
        Ok(())
    }
}

// ---------------------------------------------------------------------------

#[derive(Deserialize, Debug, Clone)]
#[serde(default, rename_all = "camelCase")]
pub struct SparkleProps {
    pub color: [u8; 3],
    pub sparkles_per_frame: u32,
}

impl Default for SparkleProps {
    fn default() -> Self {
        Self {
            color: WHITE,
            sparkles_per_frame: 1,
        }
    }
}

pub struct Sparkle {
    props: SparkleProps,
}

impl StringEffect for Sparkle {
    fn render(&mut self, target: &mut dyn PixelTarget, _ctx: &EffectContext) -> anyhow::Result<()> {
        let count = target.led_count();
        if count == 0 {
            return Ok(());
        }
        let [r, g, b] = self.props.color;
        let mut rng = rand::thread_rng();
        for _ in 0..self.props.sparkles_per_frame {
            let index = rng.gen_range(0..count) as i64;
            target.set_pixel(index, r, g, b);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------

#[derive(Deserialize, Debug, Clone)]
#[serde(default, rename_all = "camelCase")]
pub struct TwinkleProps {
    pub from_color: [u8; 3],
    pub to_color: [u8; 3],
    pub ratio_of_leds_to_apply_to: f32,
    pub speed: f32,
}

impl Default for TwinkleProps {
    fn default() -> Self {
        Self {
            from_color: [0, 0, 0],
            to_color: WHITE,
            ratio_of_leds_to_apply_to: 0.5,
            speed: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct TwinkleLed {
    apply: bool,
    offset: f32,
}

/// Sine blend between two colours on a random subset of LEDs, each with its
/// own phase. The subset is re-drawn whenever the sequence loops.
pub struct Twinkle {
    props: TwinkleProps,
    leds: Vec<TwinkleLed>,
    seeded_for: Option<(u32, u32)>,
}

impl Twinkle {
    pub fn new(props: TwinkleProps) -> Self {
        Self {
            props,
            leds: Vec::new(),
            seeded_for: None,
        }
    }

    fn reseed(&mut self, led_count: u32) {
        let mut rng = rand::thread_rng();
        let ratio = self.props.ratio_of_leds_to_apply_to;
        self.leds = (0..led_count)
            .map(|_| TwinkleLed {
                apply: rng.gen::<f32>() < ratio,
                offset: rng.gen::<f32>(),
            })
            .collect();
    }
}

impl StringEffect for Twinkle {
    fn render(&mut self, target: &mut dyn PixelTarget, ctx: &EffectContext) -> anyhow::Result<()> {
        let led_count = target.led_count();
        let key = (led_count, ctx.loop_count);
        if self.seeded_for != Some(key) {
            self.reseed(led_count);
            self.seeded_for = Some(key);
        }

        let base = (ctx.effect_playback_ratio * self.props.speed).rem_euclid(1.0);
        let from = self.props.from_color;
        let to = self.props.to_color;
        let lerp = |a: u8, b: u8, t: f32| (a as f32 + (b as f32 - a as f32) * t).round() as u8;

        for (i, led) in self.leds.iter().enumerate() {
            if !led.apply {
                continue;
            }
            let phase = (base + led.offset).rem_euclid(1.0);
            let t = (phase * std::f32::consts::TAU).sin() * 0.5 + 0.5;
            target.set_pixel(i as i64, lerp(from[0], to[0], t), lerp(from[1], to[1], t), lerp(from[2], to[2], t));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------

#[derive(Deserialize, Debug, Clone)]
#[serde(default, rename_all = "camelCase")]
pub struct RainbowRandomProps {
    pub delay_ms: u32,
}

impl Default for RainbowRandomProps {
    fn default() -> Self {
        Self { delay_ms: 100 }
    }
}

/// Every LED gets a random colour, refreshed every `delayMs`, rounded to whole frames.
pub struct RainbowRandom {
    props: RainbowRandomProps,
}

impl RainbowRandom {
    fn frames_per_update(&self, frame_ms: f32) -> u32 {
        if frame_ms.is_nan() || frame_ms <= 0.0 {
            return 1;
        }
        ((self.props.delay_ms as f32 / frame_ms).round() as u32).max(1)
    }
}

impl StringEffect for RainbowRandom {
    fn render(&mut self, target: &mut dyn PixelTarget, ctx: &EffectContext) -> anyhow::Result<()> {
        if ctx.effect_frame % self.frames_per_update(ctx.frame_ms) != 0 {
            return Ok(());
        }
        let mut rng = rand::thread_rng();
        for i in 0..target.led_count() as i64 {
            target.set_pixel(i, rng.gen(), rng.gen(), rng.gen());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct RainbowProps {
    /// Hue revolutions per second.
    pub speed: f32,
}

impl Default for RainbowProps {
    fn default() -> Self {
        Self { speed: 0.2 }
    }
}

/// Full hue wheel spread across the string, rotating over time.
pub struct Rainbow {
    props: RainbowProps,
}

impl StringEffect for Rainbow {
    fn render(&mut self, target: &mut dyn PixelTarget, ctx: &EffectContext) -> anyhow::Result<()> {
        let count = target.led_count();
        if count == 0 {
            return Ok(());
        }
        let seconds = ctx.effect_frame as f32 * ctx.frame_ms / 1000.0;
        let shift = seconds * self.props.speed;
        for i in 0..count {
            let [r, g, b] = hsv_to_rgb(shift + i as f32 / count as f32, 1.0, 1.0);
            target.set_pixel(i as i64, r, g, b);
        }
        Ok(())
    }
}
