//! The brush state machine.
//!
//! [`Brush`] owns two kinds of data: settings, constant during a stroke
//! (size, spacing, dynamics, the selected color), and states, mutated
//! while painting (filtered position, speed, smudge colors, the
//! fraction-of-a-dab already travelled). [`Brush::stroke_to`] consumes one
//! motion event, interpolates intermediate simulation steps and emits zero
//! or more dabs onto the surface.

use std::f32::consts::PI;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::{trace, warn};

use ochre_color::{hsl_to_rgb, hsv_to_rgb, rgb_to_hsl, rgb_to_hsv};
use ochre_surface::{DabSpec, Surface};

use crate::mapping::Mapping;
use crate::math::{exp_decay, mod_arith, rand_gauss, smallest_angular_difference};
use crate::settings::{Input, Setting, State};
use crate::smudge::{MixMode, MixParams, SMUDGE_BUCKETS, SmudgeBucket, mix_colors};

/// Safety guard against radii like 1e20 and against rendering overload
/// with unexpected brush dynamics.
pub const ACTUAL_RADIUS_MIN: f32 = 0.2;
pub const ACTUAL_RADIUS_MAX: f32 = 1000.0;

// An event gap longer than this is treated as a new stroke.
const MAX_DTIME: f64 = 5.0;

#[derive(PartialEq, Clone, Copy)]
enum Painted {
    Unknown,
    Yes,
    No,
}

/// The brush engine.
pub struct Brush {
    states: [f32; State::COUNT],
    settings: Vec<Mapping>,
    settings_value: [f32; Setting::COUNT],
    rng: SmallRng,
    random_input: f32,

    // input-length skipping for stable tracking noise
    skip: f32,
    skip_last_x: f32,
    skip_last_y: f32,
    skipped_dtime: f64,

    // cached speed-input curve parameters
    speed_mapping_gamma: [f32; 2],
    speed_mapping_m: [f32; 2],
    speed_mapping_q: [f32; 2],

    reset_requested: bool,

    // stroke splitting (for undo-sized chunks in the caller)
    stroke_total_painting_time: f64,
    stroke_current_idling_time: f64,

    buckets: Box<[SmudgeBucket; SMUDGE_BUCKETS]>,
}

impl Default for Brush {
    fn default() -> Self {
        Self::new()
    }
}

impl Brush {
    /// A brush with all base values at zero and no dynamics.
    pub fn new() -> Self {
        let mut brush = Self {
            states: [0.0; State::COUNT],
            settings: (0..Setting::COUNT).map(|_| Mapping::new(Input::COUNT)).collect(),
            settings_value: [0.0; Setting::COUNT],
            rng: SmallRng::seed_from_u64(1000),
            random_input: 0.0,
            skip: 0.0,
            skip_last_x: 0.0,
            skip_last_y: 0.0,
            skipped_dtime: 0.0,
            speed_mapping_gamma: [0.0; 2],
            speed_mapping_m: [0.0; 2],
            speed_mapping_q: [0.0; 2],
            reset_requested: true,
            stroke_total_painting_time: 0.0,
            stroke_current_idling_time: 0.0,
            buckets: Box::new([SmudgeBucket::default(); SMUDGE_BUCKETS]),
        };
        brush.new_stroke();
        brush.settings_base_values_have_changed();
        brush
    }

    /// Reseed the internal generator, for reproducible strokes.
    pub fn set_seed(&mut self, seed: u64) {
        self.rng = SmallRng::seed_from_u64(seed);
    }

    /// Reset every base value to its built-in default and clear all
    /// dynamics, except the standard pressure-to-opacity ramp.
    pub fn load_defaults(&mut self) {
        for &setting in Setting::ALL {
            let mapping = &mut self.settings[setting as usize];
            for input in 0..Input::COUNT {
                mapping.set_n(input, 0);
            }
            mapping.set_base_value(setting.default_value());
        }
        self.settings[Setting::OpaqueMultiply as usize]
            .set_points(Input::Pressure as usize, vec![[0.0, 0.0], [1.0, 1.0]]);
        self.settings_base_values_have_changed();
    }

    /// Queue a state reset; it takes effect on the next
    /// [`Brush::stroke_to`] call.
    pub fn reset(&mut self) {
        self.reset_requested = true;
    }

    /// Start a new stroke (resets the stroke-splitting timers only).
    pub fn new_stroke(&mut self) {
        self.stroke_current_idling_time = 0.0;
        self.stroke_total_painting_time = 0.0;
    }

    /// Total painting time of the current stroke, in seconds.
    pub fn total_stroke_painting_time(&self) -> f64 {
        self.stroke_total_painting_time
    }

    pub fn base_value(&self, setting: Setting) -> f32 {
        self.settings[setting as usize].base_value()
    }

    pub fn set_base_value(&mut self, setting: Setting, value: f32) {
        self.settings[setting as usize].set_base_value(value);
        self.settings_base_values_have_changed();
    }

    pub fn mapping_n(&self, setting: Setting, input: Input) -> usize {
        self.settings[setting as usize].n(input as usize)
    }

    pub fn set_mapping_n(&mut self, setting: Setting, input: Input, n: usize) {
        self.settings[setting as usize].set_n(input as usize, n);
    }

    pub fn mapping_point(&self, setting: Setting, input: Input, index: usize) -> (f32, f32) {
        self.settings[setting as usize].point(input as usize, index)
    }

    pub fn set_mapping_point(
        &mut self,
        setting: Setting,
        input: Input,
        index: usize,
        x: f32,
        y: f32,
    ) {
        self.settings[setting as usize].set_point(input as usize, index, x, y);
    }

    /// Replace a whole mapping curve at once.
    pub fn set_mapping_points(&mut self, setting: Setting, input: Input, points: Vec<[f32; 2]>) {
        self.settings[setting as usize].set_points(input as usize, points);
    }

    /// True if no input influences the setting.
    pub fn is_constant(&self, setting: Setting) -> bool {
        self.settings[setting as usize].is_constant()
    }

    pub fn inputs_used_n(&self, setting: Setting) -> usize {
        self.settings[setting as usize].inputs_used()
    }

    /// Raw engine state access, for debugging and record/replay.
    pub fn state(&self, state: State) -> f32 {
        self.states[state as usize]
    }

    pub fn set_state(&mut self, state: State, value: f32) {
        self.states[state as usize] = value;
    }

    #[inline]
    fn st(&self, state: State) -> f32 {
        self.states[state as usize]
    }

    #[inline]
    fn set_st(&mut self, state: State, value: f32) {
        self.states[state as usize] = value;
    }

    #[inline]
    fn v(&self, setting: Setting) -> f32 {
        self.settings_value[setting as usize]
    }

    #[inline]
    fn base(&self, setting: Setting) -> f32 {
        self.settings[setting as usize].base_value()
    }

    // Precalculate what does not change dynamically: the curve mapping
    // physical speed to the speed inputs, y = ln(gamma + x) * m + q, with m
    // and q fixed by requiring y(45) = 0.5 and slope 0.015 at x = 45.
    fn settings_base_values_have_changed(&mut self) {
        for i in 0..2 {
            let gamma_setting = if i == 0 { Setting::Speed1Gamma } else { Setting::Speed2Gamma };
            let gamma = self.base(gamma_setting).exp();

            let fix1_x = 45.0f32;
            let fix1_y = 0.5f32;
            let fix2_x = 45.0f32;
            let fix2_dy = 0.015f32;

            let c1 = (fix1_x + gamma).ln();
            let m = fix2_dy * (fix2_x + gamma);
            let q = fix1_y - m * c1;

            self.speed_mapping_gamma[i] = gamma;
            self.speed_mapping_m[i] = m;
            self.speed_mapping_q[i] = q;
        }
    }

    // How many dabs fall between the current position and (x, y, +dt)?
    fn count_dabs_to(&mut self, x: f32, y: f32, dt: f32) -> f32 {
        if self.st(State::ActualRadius) == 0.0 {
            self.set_st(State::ActualRadius, self.base(Setting::RadiusLogarithmic).exp());
        }
        let actual_radius =
            self.st(State::ActualRadius).clamp(ACTUAL_RADIUS_MIN, ACTUAL_RADIUS_MAX);
        self.set_st(State::ActualRadius, actual_radius);

        let base_radius =
            self.base(Setting::RadiusLogarithmic).exp().clamp(ACTUAL_RADIUS_MIN, ACTUAL_RADIUS_MAX);

        let xx = x - self.st(State::X);
        let yy = y - self.st(State::Y);

        let dist = if self.st(State::ActualEllipticalDabRatio) > 1.0 {
            // shared code path with the mask rasterizer's elliptical metric
            let angle_rad = self.st(State::ActualEllipticalDabAngle) / 360.0 * 2.0 * PI;
            let cs = angle_rad.cos();
            let sn = angle_rad.sin();
            let yyr = (yy * cs - xx * sn) * self.st(State::ActualEllipticalDabRatio);
            let xxr = yy * sn + xx * cs;
            (yyr * yyr + xxr * xxr).sqrt()
        } else {
            xx.hypot(yy)
        };

        dist / actual_radius * self.base(Setting::DabsPerActualRadius)
            + dist / base_radius * self.base(Setting::DabsPerBasicRadius)
            + dt * self.base(Setting::DabsPerSecond)
    }

    /// Process one motion event. Returns true if the stroke is finished or
    /// empty.
    #[allow(clippy::too_many_arguments)]
    pub fn stroke_to(
        &mut self,
        surface: &mut dyn Surface,
        x: f32,
        y: f32,
        pressure: f32,
        xtilt: f32,
        ytilt: f32,
        dtime: f64,
        viewzoom: f32,
        viewrotation: f32,
    ) -> bool {
        let mut x = x;
        let mut y = y;
        let mut pressure = pressure;
        let mut viewzoom = viewzoom;
        let mut viewrotation = viewrotation;
        let mut dtime = dtime;

        let mut tilt_ascension = 0.0;
        let mut tilt_declination = 90.0;
        if (xtilt != 0.0 || ytilt != 0.0) && xtilt.is_finite() && ytilt.is_finite() {
            let xtilt = xtilt.clamp(-1.0, 1.0);
            let ytilt = ytilt.clamp(-1.0, 1.0);
            tilt_ascension = 180.0 * (-xtilt).atan2(ytilt) / PI;
            let rad = xtilt.hypot(ytilt);
            tilt_declination = 90.0 - rad * 60.0;
        }

        if pressure <= 0.0 || !pressure.is_finite() {
            pressure = 0.0;
        }
        if !x.is_finite() || !y.is_finite() || x.abs() > 1e10 || y.abs() > 1e10 {
            warn!(x, y, "ignoring stroke_to with insane inputs");
            x = 0.0;
            y = 0.0;
            pressure = 0.0;
            viewzoom = 0.0;
            viewrotation = 0.0;
        }

        if dtime < 0.0 {
            warn!(dtime, "time jumped backwards");
        }
        if dtime <= 0.0 {
            dtime = 0.0001;
        }

        if dtime > 0.100 && pressure > 0.0 && self.st(State::Pressure) == 0.0 {
            // Tablets that don't report motion without pressure would get
            // the pressure smeared over the whole gap; insert a
            // zero-pressure event to pin the interpolation.
            self.stroke_to(surface, x, y, 0.0, 90.0, 0.0, dtime - 0.0001, viewzoom, viewrotation);
            dtime = 0.0001;
        }

        // consume queued input length (tracking noise)
        if self.skip > 0.001 {
            let dist = (self.skip_last_x - x).hypot(self.skip_last_y - y);
            self.skip_last_x = x;
            self.skip_last_y = y;
            self.skipped_dtime += dtime;
            self.skip -= dist;
            dtime = self.skipped_dtime;

            if self.skip > 0.001 && !(dtime > MAX_DTIME || self.reset_requested) {
                return true;
            }

            self.skip = 0.0;
            self.skip_last_x = 0.0;
            self.skip_last_y = 0.0;
            self.skipped_dtime = 0.0;
        }

        // the actual "virtual" cursor position
        {
            if self.base(Setting::TrackingNoise) != 0.0 {
                let base_radius = self.base(Setting::RadiusLogarithmic).exp();
                let noise = base_radius * self.base(Setting::TrackingNoise);
                if noise > 0.001 {
                    // skip some input length so the noise is independent of
                    // the event frequency
                    self.skip = 0.5 * noise;
                    self.skip_last_x = x;
                    self.skip_last_y = y;

                    x += noise * rand_gauss(&mut self.rng);
                    y += noise * rand_gauss(&mut self.rng);
                }
            }

            let fac = 1.0 - exp_decay(self.base(Setting::SlowTracking), 100.0 * dtime as f32);
            x = self.st(State::X) + (x - self.st(State::X)) * fac;
            y = self.st(State::Y) + (y - self.st(State::Y)) * fac;
        }

        // draw many (or zero) dabs to the next position
        let mut dabs_moved = self.st(State::PartialDabs);
        let mut dabs_todo = self.count_dabs_to(x, y, dtime as f32);

        if dtime > MAX_DTIME || self.reset_requested {
            self.reset_requested = false;

            self.skip = 0.0;
            self.skip_last_x = 0.0;
            self.skip_last_y = 0.0;
            self.skipped_dtime = 0.0;

            self.random_input = self.rng.random::<f32>();

            self.states = [0.0; State::COUNT];
            self.set_st(State::X, x);
            self.set_st(State::Y, y);
            self.set_st(State::Pressure, pressure);
            self.set_st(State::ActualX, x);
            self.set_st(State::ActualY, y);
            // start as if the stroke was long finished
            self.set_st(State::Stroke, 1.0);

            return true;
        }

        let mut painted = Painted::Unknown;
        let mut dtime_left = dtime;
        let mut step_dpressure = 0.0;

        while dabs_moved + dabs_todo >= 1.0 {
            // linear interpolation towards the next dab boundary
            let step_ddab = if dabs_moved > 0.0 {
                let step = 1.0 - dabs_moved;
                dabs_moved = 0.0;
                step
            } else {
                1.0
            };
            let frac = step_ddab / dabs_todo;

            let step_dx = frac * (x - self.st(State::X));
            let step_dy = frac * (y - self.st(State::Y));
            step_dpressure = frac * (pressure - self.st(State::Pressure));
            let step_dtime = frac * dtime_left as f32;
            let step_declination = frac * (tilt_declination - self.st(State::Declination));
            let step_ascension =
                frac * smallest_angular_difference(self.st(State::Ascension), tilt_ascension);

            self.update_states_and_setting_values(
                step_ddab,
                step_dx,
                step_dy,
                step_dpressure,
                step_declination,
                step_ascension,
                step_dtime,
                viewzoom,
                viewrotation,
            );
            let painted_now = self.prepare_and_draw_dab(surface);
            if painted_now {
                painted = Painted::Yes;
            } else if painted == Painted::Unknown {
                painted = Painted::No;
            }

            // a fresh random input per dab
            self.random_input = self.rng.random::<f32>();

            dtime_left -= step_dtime as f64;
            dabs_todo = self.count_dabs_to(x, y, dtime_left as f32);
        }

        // "move" the brush to the current time without a dab; the radius
        // can depend on inputs that change much faster than once per dab
        {
            let step_ddab = dabs_todo;
            let step_dx = x - self.st(State::X);
            let step_dy = y - self.st(State::Y);
            step_dpressure = pressure - self.st(State::Pressure);
            let step_declination = tilt_declination - self.st(State::Declination);
            let step_ascension =
                smallest_angular_difference(self.st(State::Ascension), tilt_ascension);
            let step_dtime = dtime_left as f32;

            self.update_states_and_setting_values(
                step_ddab,
                step_dx,
                step_dy,
                step_dpressure,
                step_declination,
                step_ascension,
                step_dtime,
                viewzoom,
                viewrotation,
            );
        }

        self.set_st(State::PartialDabs, dabs_moved + dabs_todo);

        // stroke separation logic
        if painted == Painted::Unknown {
            painted = if self.stroke_current_idling_time > 0.0
                || self.stroke_total_painting_time == 0.0
            {
                Painted::No
            } else {
                // probably still painting (more events than dabs)
                Painted::Yes
            };
        }
        if painted == Painted::Yes {
            self.stroke_total_painting_time += dtime;
            self.stroke_current_idling_time = 0.0;
            // force a stroke split after some time, but not while pressure
            // is being released
            if self.stroke_total_painting_time > (4.0 + 3.0 * pressure) as f64
                && step_dpressure >= 0.0
            {
                return true;
            }
        } else {
            self.stroke_current_idling_time += dtime;
            if self.stroke_total_painting_time == 0.0 {
                // not yet painted; split if a lot of irrelevant motion
                // accumulated
                if self.stroke_current_idling_time > 1.0 {
                    return true;
                }
            } else if self.stroke_total_painting_time + self.stroke_current_idling_time
                > (0.9 + 5.0 * pressure) as f64
            {
                return true;
            }
        }
        false
    }

    // One simulation step, usually once or twice per dab. Integrates the
    // event deltas into the states, derives the input vector, evaluates
    // every setting mapping and updates the filtered states.
    #[allow(clippy::too_many_arguments)]
    fn update_states_and_setting_values(
        &mut self,
        step_ddab: f32,
        step_dx: f32,
        step_dy: f32,
        step_dpressure: f32,
        step_declination: f32,
        step_ascension: f32,
        step_dtime: f32,
        step_viewzoom: f32,
        step_viewrotation: f32,
    ) {
        let mut step_dtime = step_dtime;
        if step_dtime < 0.0 {
            warn!("time is running backwards");
            step_dtime = 0.001;
        } else if step_dtime == 0.0 {
            step_dtime = 0.001;
        }

        self.states[State::X as usize] += step_dx;
        self.states[State::Y as usize] += step_dy;
        self.states[State::Pressure as usize] += step_dpressure;
        self.states[State::Declination as usize] += step_declination;
        self.states[State::Ascension as usize] += step_ascension;

        self.set_st(State::Viewzoom, step_viewzoom);
        self.set_st(
            State::Viewrotation,
            mod_arith(step_viewrotation * 180.0 / PI + 180.0, 360.0) - 180.0,
        );

        // gridmap wrap (evaluated with the setting values of the previous
        // step; the mappings have not run yet)
        let gridmap_scale = self.v(Setting::GridmapScale).exp();
        let gridmap_scale_x = self.v(Setting::GridmapScaleX);
        let gridmap_scale_y = self.v(Setting::GridmapScaleY);
        let span = gridmap_scale * 256.0;
        self.set_st(
            State::GridmapX,
            mod_arith((self.st(State::ActualX) * gridmap_scale_x).abs(), span) / span * 256.0,
        );
        self.set_st(
            State::GridmapY,
            mod_arith((self.st(State::ActualY) * gridmap_scale_y).abs(), span) / span * 256.0,
        );
        if self.st(State::ActualX) < 0.0 {
            self.set_st(State::GridmapX, 256.0 - self.st(State::GridmapX));
        }
        if self.st(State::ActualY) < 0.0 {
            self.set_st(State::GridmapY, 256.0 - self.st(State::GridmapY));
        }

        let base_radius = self.base(Setting::RadiusLogarithmic).exp();

        // first iteration is zero, then flips back and forth; used by the
        // mirrored offsets
        if self.st(State::Flip) == 0.0 {
            self.set_st(State::Flip, 1.0);
        } else {
            self.set_st(State::Flip, -self.st(State::Flip));
        }

        if self.st(State::Pressure) <= 0.0 {
            self.set_st(State::Pressure, 0.0);
        }
        let pressure = self.st(State::Pressure);

        // start / end tracking for the "stroke" input
        if self.st(State::StrokeStarted) == 0.0 {
            if pressure > self.base(Setting::StrokeThreshold) + 0.0001 {
                self.set_st(State::StrokeStarted, 1.0);
                self.set_st(State::Stroke, 0.0);
            }
        } else if pressure <= self.base(Setting::StrokeThreshold) * 0.9 + 0.0001 {
            self.set_st(State::StrokeStarted, 0.0);
        }

        // speed is zoom corrected; distance relates to the brush size
        let norm_dx = step_dx / step_dtime * self.st(State::Viewzoom);
        let norm_dy = step_dy / step_dtime * self.st(State::Viewzoom);
        let norm_speed = norm_dx.hypot(norm_dy);
        let norm_dist = (step_dx / step_dtime / base_radius)
            .hypot(step_dy / step_dtime / base_radius)
            * step_dtime;

        let mut inputs = [0.0f32; Input::COUNT];
        inputs[Input::Pressure as usize] =
            pressure * self.base(Setting::PressureGainLog).exp();
        inputs[Input::Speed1 as usize] = (self.speed_mapping_gamma[0]
            + self.st(State::NormSpeed1Slow))
        .ln()
            * self.speed_mapping_m[0]
            + self.speed_mapping_q[0];
        inputs[Input::Speed2 as usize] = (self.speed_mapping_gamma[1]
            + self.st(State::NormSpeed2Slow))
        .ln()
            * self.speed_mapping_m[1]
            + self.speed_mapping_q[1];
        inputs[Input::Random as usize] = self.random_input;
        inputs[Input::Stroke as usize] = self.st(State::Stroke).min(1.0);
        inputs[Input::Direction as usize] = (self
            .st(State::DirectionDy)
            .atan2(self.st(State::DirectionDx))
            / (2.0 * PI)
            * 360.0
            + self.st(State::Viewrotation)
            + 180.0)
            % 180.0;
        inputs[Input::DirectionAngle as usize] = (self
            .st(State::DirectionAngleDy)
            .atan2(self.st(State::DirectionAngleDx))
            / (2.0 * PI)
            * 360.0
            + 180.0
            + self.st(State::Viewrotation)
            + 180.0)
            % 360.0;
        inputs[Input::TiltDeclination as usize] = self.st(State::Declination);
        inputs[Input::TiltAscension as usize] =
            mod_arith(self.st(State::Ascension) + self.st(State::Viewrotation) + 180.0, 360.0)
                - 180.0;
        inputs[Input::Viewzoom as usize] = self.base(Setting::RadiusLogarithmic)
            - (base_radius * 1.0 / self.st(State::Viewzoom)).ln();
        inputs[Input::AttackAngle as usize] = smallest_angular_difference(
            self.st(State::Ascension),
            mod_arith(
                self.st(State::DirectionAngleDy).atan2(self.st(State::DirectionAngleDx))
                    / (2.0 * PI)
                    * 360.0
                    + 90.0,
                360.0,
            ),
        );
        inputs[Input::BrushRadius as usize] = self.base(Setting::RadiusLogarithmic);
        inputs[Input::GridmapX as usize] = self.st(State::GridmapX).clamp(0.0, 256.0);
        inputs[Input::GridmapY as usize] = self.st(State::GridmapY).clamp(0.0, 256.0);
        inputs[Input::Custom as usize] = self.st(State::CustomInput);

        trace!(
            pressure = inputs[Input::Pressure as usize],
            speed1 = inputs[Input::Speed1 as usize],
            speed2 = inputs[Input::Speed2 as usize],
            stroke = inputs[Input::Stroke as usize],
            direction = inputs[Input::Direction as usize],
            declination = inputs[Input::TiltDeclination as usize],
            ascension = inputs[Input::TiltAscension as usize],
            viewzoom = inputs[Input::Viewzoom as usize],
            custom = inputs[Input::Custom as usize],
            "brush inputs"
        );

        for i in 0..Setting::COUNT {
            self.settings_value[i] = self.settings[i].calculate(&inputs);
        }

        {
            let fac = 1.0 - exp_decay(self.v(Setting::SlowTrackingPerDab), step_ddab);
            self.states[State::ActualX as usize] +=
                (self.st(State::X) - self.st(State::ActualX)) * fac;
            self.states[State::ActualY as usize] +=
                (self.st(State::Y) - self.st(State::ActualY)) * fac;
        }

        {
            // slow speed
            let fac = 1.0 - exp_decay(self.v(Setting::Speed1Slowness), step_dtime);
            self.states[State::NormSpeed1Slow as usize] +=
                (norm_speed - self.st(State::NormSpeed1Slow)) * fac;
            let fac = 1.0 - exp_decay(self.v(Setting::Speed2Slowness), step_dtime);
            self.states[State::NormSpeed2Slow as usize] +=
                (norm_speed - self.st(State::NormSpeed2Slow)) * fac;
        }

        {
            // slow speed, as a vector this time; zero filtering places
            // individual dabs far away, so the time constant gets floored
            let mut time_constant =
                (self.v(Setting::OffsetBySpeedSlowness) * 0.01).exp() - 1.0;
            if time_constant < 0.002 {
                time_constant = 0.002;
            }
            let fac = 1.0 - exp_decay(time_constant, step_dtime);
            self.states[State::NormDxSlow as usize] +=
                (norm_dx - self.st(State::NormDxSlow)) * fac;
            self.states[State::NormDySlow as usize] +=
                (norm_dy - self.st(State::NormDySlow)) * fac;
        }

        {
            // orientation: same kind of lowpass, but over painted distance
            // instead of wall clock time
            let mut dx = step_dx * self.st(State::Viewzoom);
            let mut dy = step_dy * self.st(State::Viewzoom);

            let step_in_dabtime = dx.hypot(dy);
            let fac = 1.0
                - exp_decay((self.v(Setting::DirectionFilter) * 0.5).exp() - 1.0, step_in_dabtime);

            let dx_old = self.st(State::DirectionDx);
            let dy_old = self.st(State::DirectionDy);

            // 360 degree direction
            self.states[State::DirectionAngleDx as usize] +=
                (dx - self.st(State::DirectionAngleDx)) * fac;
            self.states[State::DirectionAngleDy as usize] +=
                (dy - self.st(State::DirectionAngleDy)) * fac;

            // use the opposite vector if it is closer (180 degree turns
            // don't matter for the 180 degree direction input)
            if (dx_old - dx).powi(2) + (dy_old - dy).powi(2)
                > (dx_old + dx).powi(2) + (dy_old + dy).powi(2)
            {
                dx = -dx;
                dy = -dy;
            }
            self.states[State::DirectionDx as usize] +=
                (dx - self.st(State::DirectionDx)) * fac;
            self.states[State::DirectionDy as usize] +=
                (dy - self.st(State::DirectionDy)) * fac;
        }

        {
            let fac = 1.0 - exp_decay(self.v(Setting::CustomInputSlowness), 0.1);
            self.states[State::CustomInput as usize] +=
                (self.v(Setting::CustomInput) - self.st(State::CustomInput)) * fac;
        }

        {
            // stroke length accumulator with hold-and-wrap
            let frequency = (-self.v(Setting::StrokeDurationLogarithmic)).exp();
            self.states[State::Stroke as usize] += norm_dist * frequency;
            if self.st(State::Stroke) < 0.0 {
                self.set_st(State::Stroke, 0.0);
            }
            let wrap = 1.0 + self.v(Setting::StrokeHoldtime);
            if self.st(State::Stroke) > wrap {
                if wrap > 9.9 + 1.0 {
                    // "infinity": hold the stroke somewhere >= 1.0
                    self.set_st(State::Stroke, 1.0);
                } else {
                    self.set_st(State::Stroke, self.st(State::Stroke) % wrap);
                    if self.st(State::Stroke) < 0.0 {
                        self.set_st(State::Stroke, 0.0);
                    }
                }
            }
        }

        let radius = self
            .v(Setting::RadiusLogarithmic)
            .exp()
            .clamp(ACTUAL_RADIUS_MIN, ACTUAL_RADIUS_MAX);
        self.set_st(State::ActualRadius, radius);

        // aspect ratio has to be known here: it affects the dab spacing
        self.set_st(State::ActualEllipticalDabRatio, self.v(Setting::EllipticalDabRatio));
        self.set_st(
            State::ActualEllipticalDabAngle,
            mod_arith(
                self.v(Setting::EllipticalDabAngle) - self.st(State::Viewrotation) + 180.0,
                180.0,
            ) - 180.0,
        );
    }

    // Calculate all dab parameters from the current states and settings,
    // then let the surface do the drawing. Returns true if the surface was
    // modified.
    fn prepare_and_draw_dab(&mut self, surface: &mut dyn Surface) -> bool {
        // two negative opaque factors must not make a positive one
        if self.settings_value[Setting::Opaque as usize] < 0.0 {
            self.settings_value[Setting::Opaque as usize] = 0.0;
        }
        let mut opaque = self.v(Setting::Opaque) * self.v(Setting::OpaqueMultiply);
        opaque = opaque.clamp(0.0, 1.0);
        // an opaque of zero still needs the smudge state updated below

        if self.v(Setting::OpaqueLinearize) != 0.0 {
            // correct the opacity for dab overlap
            let mut dabs_per_pixel = (self.base(Setting::DabsPerActualRadius)
                + self.base(Setting::DabsPerBasicRadius))
                * 2.0;
            if dabs_per_pixel < 1.0 {
                dabs_per_pixel = 1.0;
            }
            dabs_per_pixel = 1.0 + self.base(Setting::OpaqueLinearize) * (dabs_per_pixel - 1.0);

            let alpha = opaque;
            let beta = 1.0 - alpha;
            let beta_dab = beta.powf(1.0 / dabs_per_pixel);
            opaque = 1.0 - beta_dab;
        }

        let mut x = self.st(State::ActualX);
        let mut y = self.st(State::ActualY);

        let base_radius = self.base(Setting::RadiusLogarithmic).exp();
        let offset_mult = self.v(Setting::OffsetMultiplier).exp();

        if self.v(Setting::OffsetX) != 0.0 {
            x += self.v(Setting::OffsetX) * base_radius * offset_mult;
        }
        if self.v(Setting::OffsetY) != 0.0 {
            y += self.v(Setting::OffsetY) * base_radius * offset_mult;
        }

        let direction_angle = self
            .st(State::DirectionAngleDy)
            .atan2(self.st(State::DirectionAngleDx))
            / (2.0 * PI)
            * 360.0;

        // offset to one side of the travel direction
        if self.v(Setting::OffsetAngle) != 0.0 {
            let angle =
                ((direction_angle - 90.0) % 360.0 + self.v(Setting::OffsetAngleAdj)) * PI / 180.0;
            let amount = base_radius * self.v(Setting::OffsetAngle) * offset_mult;
            x += angle.cos() * amount;
            y += angle.sin() * amount;
        }
        // offset to one side of the tilt ascension angle
        if self.v(Setting::OffsetAngleAsc) != 0.0 {
            let angle =
                (self.st(State::Ascension) + self.v(Setting::OffsetAngleAdj)) * PI / 180.0;
            let amount = base_radius * self.v(Setting::OffsetAngleAsc) * offset_mult;
            x += angle.cos() * amount;
            y += angle.sin() * amount;
        }
        // offset mirrored to both sides of the direction
        if self.v(Setting::OffsetAngle2) != 0.0 {
            if self.settings_value[Setting::OffsetAngle2 as usize] < 0.0 {
                self.settings_value[Setting::OffsetAngle2 as usize] = 0.0;
            }
            let angle =
                ((direction_angle - 90.0) % 360.0 + self.v(Setting::OffsetAngleAdj)) * PI / 180.0;
            let amount = base_radius
                * self.v(Setting::OffsetAngle2)
                * offset_mult
                * self.st(State::Flip);
            x += angle.cos() * amount;
            y += angle.sin() * amount;
        }
        // offset mirrored to both sides of the ascension angle
        if self.v(Setting::OffsetAngle2Asc) != 0.0 {
            if self.settings_value[Setting::OffsetAngle2Asc as usize] < 0.0 {
                self.settings_value[Setting::OffsetAngle2Asc as usize] = 0.0;
            }
            let angle =
                (self.st(State::Ascension) + self.v(Setting::OffsetAngleAdj)) * PI / 180.0;
            let amount = base_radius
                * self.st(State::Flip)
                * self.v(Setting::OffsetAngle2Asc)
                * offset_mult;
            x += angle.cos() * amount;
            y += angle.sin() * amount;
        }

        if self.v(Setting::OffsetBySpeed) != 0.0 {
            x += self.st(State::NormDxSlow) * self.v(Setting::OffsetBySpeed) * 0.1
                / self.st(State::Viewzoom);
            y += self.st(State::NormDySlow) * self.v(Setting::OffsetBySpeed) * 0.1
                / self.st(State::Viewzoom);
        }

        if self.v(Setting::OffsetByRandom) != 0.0 {
            let amp = self.v(Setting::OffsetByRandom).max(0.0);
            x += rand_gauss(&mut self.rng) * amp * base_radius;
            y += rand_gauss(&mut self.rng) * amp * base_radius;
        }

        let mut radius = self.st(State::ActualRadius);
        if self.v(Setting::RadiusByRandom) != 0.0 {
            // back to logarithmic radius to add the noise
            let radius_log = self.v(Setting::RadiusLogarithmic)
                + rand_gauss(&mut self.rng) * self.v(Setting::RadiusByRandom);
            radius = radius_log.exp().clamp(ACTUAL_RADIUS_MIN, ACTUAL_RADIUS_MAX);
            let alpha_correction = (self.st(State::ActualRadius) / radius).powi(2);
            if alpha_correction <= 1.0 {
                opaque *= alpha_correction;
            }
        }

        let paint = self.v(Setting::PaintMode).clamp(0.0, 1.0);
        let fallback_rgb = hsv_to_rgb([
            self.base(Setting::ColorH),
            self.base(Setting::ColorS),
            self.base(Setting::ColorV),
        ]);
        let mix_params = MixParams {
            gamma: self.v(Setting::SmudgeGamma),
            normsub: self.v(Setting::SmudgeNormalSub),
            spectral: self.v(Setting::SmudgeSpectral),
            desaturation: self.v(Setting::SmudgeDesaturation),
            darken: self.v(Setting::SmudgeDarken),
        };

        // update the smudge color
        if self.v(Setting::SmudgeLength) < 1.0
            && (self.v(Setting::Smudge) != 0.0
                || !self.settings[Setting::Smudge as usize].is_constant())
            && !(self.v(Setting::SmudgeLock) > 0.0 && self.st(State::StrokeStarted) != 0.0)
        {
            let mut fac = self.v(Setting::SmudgeLength);
            if fac < 0.01 {
                fac = 0.01;
            }
            let px = x.round();
            let py = y.round();

            let bucket_idx =
                (self.v(Setting::SmudgeBucket).round() as i32).clamp(0, 255) as usize;

            // get_color is almost as expensive as a dab, so keep using the
            // previous sample while it is recent enough
            self.buckets[bucket_idx].recentness *= fac;
            let threshold =
                0.5 * fac * 1000.0f32.powf(-self.v(Setting::SmudgeLengthLog)) + 1e-16;
            let sampled = if self.buckets[bucket_idx].recentness < threshold {
                if self.buckets[bucket_idx].recentness == 0.0 {
                    // first initialization of the smudge color
                    fac = 0.0;
                }
                self.buckets[bucket_idx].recentness = 1.0;

                let smudge_radius = (radius * self.v(Setting::SmudgeRadiusLog).exp())
                    .clamp(ACTUAL_RADIUS_MIN, ACTUAL_RADIUS_MAX);
                let color = surface.get_color(px, py, smudge_radius, paint);
                self.buckets[bucket_idx].sampled = color;
                color
            } else {
                self.buckets[bucket_idx].sampled
            };

            let mixed = mix_colors(
                self.buckets[bucket_idx].color,
                sampled,
                fac,
                &mix_params,
                MixMode::SmudgeWithSample,
                fallback_rgb,
            );
            self.buckets[bucket_idx].color = mixed;

            self.set_st(State::SmudgeRa, mixed[0]);
            self.set_st(State::SmudgeGa, mixed[1]);
            self.set_st(State::SmudgeBa, mixed[2]);
            self.set_st(State::SmudgeA, mixed[3]);
            self.set_st(State::LastGetcolorR, sampled[0]);
            self.set_st(State::LastGetcolorG, sampled[1]);
            self.set_st(State::LastGetcolorB, sampled[2]);
            self.set_st(State::LastGetcolorA, sampled[3]);
            self.set_st(
                State::LastGetcolorRecentness,
                self.buckets[bucket_idx].recentness,
            );
        }

        // color part
        let mut color_h = self.base(Setting::ColorH);
        let mut color_s = self.base(Setting::ColorS);
        let mut color_v = self.base(Setting::ColorV);
        let mut eraser_target_alpha = 1.0f32;

        if self.v(Setting::Smudge) > 0.0 {
            // mix the smudge color into the brush color
            let fac = self.v(Setting::Smudge).min(1.0);
            let rgb = hsv_to_rgb([color_h, color_s, color_v]);

            let bucket_idx =
                (self.v(Setting::SmudgeBucket).round() as i32).clamp(0, 255) as usize;

            // a partly transparent smudge color makes the dab erase
            // towards that transparency level
            eraser_target_alpha =
                ((1.0 - fac) + fac * self.buckets[bucket_idx].color[3]).clamp(0.0, 1.0);

            let rgb = if eraser_target_alpha > 0.0 {
                let brush_color = [rgb[0], rgb[1], rgb[2], eraser_target_alpha];
                let mixed = mix_colors(
                    self.buckets[bucket_idx].color,
                    brush_color,
                    fac,
                    &mix_params,
                    MixMode::BrushIntoSmudge,
                    fallback_rgb,
                );
                [mixed[0], mixed[1], mixed[2]]
            } else {
                // only erasing; the color does not matter
                [1.0, 0.0, 0.0]
            };
            let hsv = rgb_to_hsv(rgb);
            color_h = hsv[0];
            color_s = hsv[1];
            color_v = hsv[2];
        }

        if self.v(Setting::Eraser) != 0.0 {
            eraser_target_alpha *= 1.0 - self.v(Setting::Eraser);
        }

        // HSV color change
        color_h += self.v(Setting::ChangeColorH);
        color_s += color_s * color_v * self.v(Setting::ChangeColorHsvS);
        color_v += self.v(Setting::ChangeColorV);

        // HSL color change
        if self.v(Setting::ChangeColorL) != 0.0 || self.v(Setting::ChangeColorHslS) != 0.0 {
            let rgb = hsv_to_rgb([color_h, color_s, color_v]);
            let [h, mut s, mut l] = rgb_to_hsl(rgb);
            l += self.v(Setting::ChangeColorL);
            s += s * (1.0 - l).abs().min(l.abs()) * 2.0 * self.v(Setting::ChangeColorHslS);
            let rgb = hsl_to_rgb([h, s, l]);
            let hsv = rgb_to_hsv(rgb);
            color_h = hsv[0];
            color_s = hsv[1];
            color_v = hsv[2];
        }

        let mut hardness = self.v(Setting::Hardness).clamp(0.0, 1.0);

        // anti-aliasing: soften small hard dabs while keeping the optical
        // radius, so the fadeout is at least ANTI_ALIASING pixels wide
        let current_fadeout_in_pixels = radius * (1.0 - hardness);
        let min_fadeout_in_pixels = self.v(Setting::AntiAliasing);
        if current_fadeout_in_pixels < min_fadeout_in_pixels {
            let current_optical_radius = radius - (1.0 - hardness) * radius / 2.0;
            let hardness_new = (current_optical_radius - min_fadeout_in_pixels / 2.0)
                / (current_optical_radius + min_fadeout_in_pixels / 2.0);
            let radius_new = min_fadeout_in_pixels / (1.0 - hardness_new);
            hardness = hardness_new;
            radius = radius_new;
        }

        // snap to pixel
        let snap_to_pixel = self.v(Setting::SnapToPixel);
        if snap_to_pixel > 0.0 {
            let snapped_x = x.floor() + 0.5;
            let snapped_y = y.floor() + 0.5;
            x += (snapped_x - x) * snap_to_pixel;
            y += (snapped_y - y) * snap_to_pixel;

            let mut snapped_radius = (radius * 2.0).round() / 2.0;
            if snapped_radius < 0.5 {
                snapped_radius = 0.5;
            }
            if snap_to_pixel > 0.9999 {
                // keep neighbour pixels out at exact snapping
                snapped_radius -= 0.0001;
            }
            radius += (snapped_radius - radius) * snap_to_pixel;
        }

        let rgb = hsv_to_rgb([color_h, color_s, color_v]);
        surface.draw_dab(&DabSpec {
            x,
            y,
            radius,
            color: rgb,
            opaque,
            hardness,
            color_a: eraser_target_alpha,
            aspect_ratio: self.st(State::ActualEllipticalDabRatio),
            angle: self.st(State::ActualEllipticalDabAngle),
            lock_alpha: self.v(Setting::LockAlpha),
            colorize: self.v(Setting::Colorize),
            posterize: self.v(Setting::Posterize),
            posterize_num: self.v(Setting::PosterizeNum),
            paint,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{Input, Setting, State};
    use ochre_surface::{FixedTileStore, Rect, TiledSurface};

    fn paintable_brush() -> Brush {
        let mut brush = Brush::new();
        brush.load_defaults();
        brush.set_base_value(Setting::ColorH, 0.0);
        brush.set_base_value(Setting::ColorS, 1.0);
        brush.set_base_value(Setting::ColorV, 1.0);
        brush
    }

    fn stroke_surface() -> TiledSurface<FixedTileStore> {
        TiledSurface::new(FixedTileStore::new(256, 256))
    }

    #[test]
    fn test_first_event_establishes_origin() {
        let mut brush = paintable_brush();
        let mut surface = stroke_surface();
        surface.begin_atomic();
        // reset is pending after construction, so the first event only
        // sets the new origin
        assert!(brush.stroke_to(&mut surface, 100.0, 100.0, 1.0, 0.0, 0.0, 0.1, 1.0, 0.0));
        assert_eq!(brush.state(State::X), 100.0);
        assert_eq!(brush.state(State::Y), 100.0);
        let mut roi = [Rect::ZERO];
        assert_eq!(surface.end_atomic(&mut roi), 0);
    }

    #[test]
    fn test_stroke_paints_along_path() {
        let mut brush = paintable_brush();
        let mut surface = stroke_surface();

        surface.begin_atomic();
        brush.stroke_to(&mut surface, 50.0, 128.0, 1.0, 0.0, 0.0, 0.1, 1.0, 0.0);
        for i in 1..=15 {
            let x = 50.0 + i as f32 * 10.0;
            brush.stroke_to(&mut surface, x, 128.0, 1.0, 0.0, 0.0, 0.05, 1.0, 0.0);
        }
        let mut roi = [Rect::ZERO];
        assert_eq!(surface.end_atomic(&mut roi), 1);
        assert!(!roi[0].is_empty());

        // red ink along the path
        let p = surface.store().pixel(128, 128);
        assert!(p[3] > 20000, "no paint at stroke middle: {p:?}");
        assert!(p[0] > 20000);
        // untouched far away
        assert_eq!(surface.store().pixel(128, 20), [0, 0, 0, 0]);
    }

    #[test]
    fn test_zero_pressure_paints_nothing() {
        let mut brush = paintable_brush();
        let mut surface = stroke_surface();
        surface.begin_atomic();
        brush.stroke_to(&mut surface, 50.0, 50.0, 0.0, 0.0, 0.0, 0.1, 1.0, 0.0);
        for i in 1..=10 {
            brush.stroke_to(&mut surface, 50.0 + i as f32 * 5.0, 50.0, 0.0, 0.0, 0.0, 0.05, 1.0, 0.0);
        }
        let mut roi = [Rect::ZERO];
        surface.end_atomic(&mut roi);
        // the default pressure->opacity curve keeps everything at zero
        assert_eq!(surface.store().pixel(60, 50), [0, 0, 0, 0]);
    }

    #[test]
    fn test_large_dtime_resets_stroke() {
        let mut brush = paintable_brush();
        let mut surface = stroke_surface();
        surface.begin_atomic();
        brush.stroke_to(&mut surface, 10.0, 10.0, 1.0, 0.0, 0.0, 0.1, 1.0, 0.0);
        brush.stroke_to(&mut surface, 20.0, 10.0, 1.0, 0.0, 0.0, 0.05, 1.0, 0.0);
        // a stale event re-establishes the origin without interpolating
        let finished = brush.stroke_to(&mut surface, 200.0, 200.0, 1.0, 0.0, 0.0, 6.0, 1.0, 0.0);
        assert!(finished);
        assert_eq!(brush.state(State::X), 200.0);
        assert_eq!(brush.state(State::Stroke), 1.0);
        let mut roi = [Rect::ZERO];
        surface.end_atomic(&mut roi);
        // nothing was painted between the two positions
        assert_eq!(surface.store().pixel(110, 105), [0, 0, 0, 0]);
    }

    #[test]
    fn test_requested_reset_is_deferred() {
        let mut brush = paintable_brush();
        let mut surface = stroke_surface();
        surface.begin_atomic();
        brush.stroke_to(&mut surface, 10.0, 10.0, 1.0, 0.0, 0.0, 0.1, 1.0, 0.0);
        brush.reset();
        assert!(brush.stroke_to(&mut surface, 90.0, 90.0, 1.0, 0.0, 0.0, 0.05, 1.0, 0.0));
        assert_eq!(brush.state(State::X), 90.0);
        let mut roi = [Rect::ZERO];
        surface.end_atomic(&mut roi);
    }

    #[test]
    fn test_insane_coordinates_sanitized() {
        let mut brush = paintable_brush();
        let mut surface = stroke_surface();
        surface.begin_atomic();
        brush.stroke_to(&mut surface, f32::NAN, 1e20, 1.0, 0.0, 0.0, 0.1, 1.0, 0.0);
        assert!(brush.state(State::X).is_finite());
        let mut roi = [Rect::ZERO];
        surface.end_atomic(&mut roi);
    }

    #[test]
    fn test_radius_clamped() {
        let mut brush = paintable_brush();
        let mut surface = stroke_surface();
        brush.set_base_value(Setting::RadiusLogarithmic, 50.0);
        surface.begin_atomic();
        brush.stroke_to(&mut surface, 10.0, 10.0, 1.0, 0.0, 0.0, 0.1, 1.0, 0.0);
        brush.stroke_to(&mut surface, 30.0, 10.0, 1.0, 0.0, 0.0, 0.05, 1.0, 0.0);
        assert!(brush.state(State::ActualRadius) <= ACTUAL_RADIUS_MAX);
        let mut roi = [Rect::ZERO];
        surface.end_atomic(&mut roi);
    }

    #[test]
    fn test_pressure_mapping_drives_opacity() {
        let mut brush = paintable_brush();
        // opacity follows pressure through the default ramp
        assert!(!brush.is_constant(Setting::OpaqueMultiply));
        assert_eq!(brush.mapping_n(Setting::OpaqueMultiply, Input::Pressure), 2);
        assert_eq!(brush.inputs_used_n(Setting::OpaqueMultiply), 1);
    }

    #[test]
    fn test_speed_mapping_anchor() {
        // y(45) = 0.5 regardless of gamma
        let brush = paintable_brush();
        let y = (brush.speed_mapping_gamma[0] + 45.0).ln() * brush.speed_mapping_m[0]
            + brush.speed_mapping_q[0];
        assert!((y - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_smudge_picks_up_canvas_color() {
        let mut surface = stroke_surface();
        // solid green canvas
        surface.store().fill([0, 1 << 15, 0, 1 << 15]);

        let mut brush = paintable_brush();
        brush.set_base_value(Setting::Smudge, 1.0);
        brush.set_base_value(Setting::SmudgeLength, 0.1);

        surface.begin_atomic();
        brush.stroke_to(&mut surface, 64.0, 64.0, 1.0, 0.0, 0.0, 0.1, 1.0, 0.0);
        for i in 1..=12 {
            brush.stroke_to(&mut surface, 64.0 + i as f32 * 8.0, 64.0, 1.0, 0.0, 0.0, 0.05, 1.0, 0.0);
        }
        let mut roi = [Rect::ZERO];
        surface.end_atomic(&mut roi);

        // the dragged color is the sampled canvas green, not the brush red
        assert!(brush.state(State::SmudgeA) > 0.5);
        assert!(brush.state(State::SmudgeGa) > brush.state(State::SmudgeRa));
    }
}
