//! Setting, input and state tables for the brush engine.
//!
//! Settings are constant during a stroke (size, spacing, dynamics, the
//! selected color); states are what the engine mutates while painting.
//! Each setting is evaluated from its base value plus one mapping per
//! input; the names here double as the keys of the JSON settings format.

macro_rules! settings_table {
    ($(($variant:ident, $cname:literal, $default:expr),)*) => {
        /// A brush setting. The discriminant indexes the mapping and value
        /// arrays of the brush.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum Setting {
            $($variant,)*
        }

        impl Setting {
            pub const ALL: &'static [Setting] = &[$(Setting::$variant,)*];
            pub const COUNT: usize = Self::ALL.len();

            /// The canonical (settings file) name.
            pub fn cname(self) -> &'static str {
                match self {
                    $(Setting::$variant => $cname,)*
                }
            }

            pub fn from_cname(name: &str) -> Option<Setting> {
                match name {
                    $($cname => Some(Setting::$variant),)*
                    _ => None,
                }
            }

            /// Built-in default base value.
            pub fn default_value(self) -> f32 {
                match self {
                    $(Setting::$variant => $default,)*
                }
            }
        }
    };
}

settings_table! {
    (Opaque, "opaque", 1.0),
    (OpaqueMultiply, "opaque_multiply", 0.0),
    (OpaqueLinearize, "opaque_linearize", 0.9),
    (RadiusLogarithmic, "radius_logarithmic", 2.0),
    (Hardness, "hardness", 0.8),
    (AntiAliasing, "anti_aliasing", 0.66),
    (DabsPerBasicRadius, "dabs_per_basic_radius", 0.0),
    (DabsPerActualRadius, "dabs_per_actual_radius", 2.0),
    (DabsPerSecond, "dabs_per_second", 0.0),
    (GridmapScale, "gridmap_scale", 0.0),
    (GridmapScaleX, "gridmap_scale_x", 1.0),
    (GridmapScaleY, "gridmap_scale_y", 1.0),
    (RadiusByRandom, "radius_by_random", 0.0),
    (Speed1Slowness, "speed1_slowness", 0.04),
    (Speed2Slowness, "speed2_slowness", 0.8),
    (Speed1Gamma, "speed1_gamma", 4.0),
    (Speed2Gamma, "speed2_gamma", 8.0),
    (OffsetByRandom, "offset_by_random", 0.0),
    (OffsetX, "offset_x", 0.0),
    (OffsetY, "offset_y", 0.0),
    (OffsetAngle, "offset_angle", 0.0),
    (OffsetAngleAsc, "offset_angle_asc", 0.0),
    (OffsetAngle2, "offset_angle_2", 0.0),
    (OffsetAngle2Asc, "offset_angle_2_asc", 0.0),
    (OffsetAngleAdj, "offset_angle_adj", 0.0),
    (OffsetMultiplier, "offset_multiplier", 0.0),
    (OffsetBySpeed, "offset_by_speed", 0.0),
    (OffsetBySpeedSlowness, "offset_by_speed_slowness", 1.0),
    (SlowTracking, "slow_tracking", 0.0),
    (SlowTrackingPerDab, "slow_tracking_per_dab", 0.0),
    (TrackingNoise, "tracking_noise", 0.0),
    (ColorH, "color_h", 0.0),
    (ColorS, "color_s", 0.0),
    (ColorV, "color_v", 0.0),
    (ChangeColorH, "change_color_h", 0.0),
    (ChangeColorL, "change_color_l", 0.0),
    (ChangeColorHslS, "change_color_hsl_s", 0.0),
    (ChangeColorV, "change_color_v", 0.0),
    (ChangeColorHsvS, "change_color_hsv_s", 0.0),
    (Smudge, "smudge", 0.0),
    (SmudgeLength, "smudge_length", 0.5),
    (SmudgeRadiusLog, "smudge_radius_log", 0.0),
    (SmudgeLengthLog, "smudge_length_log", 0.0),
    (SmudgeGamma, "smudge_gamma", 1.0),
    (SmudgeDesaturation, "smudge_desaturation", 0.0),
    (SmudgeDarken, "smudge_darken", 0.0),
    (SmudgeNormalSub, "smudge_normal_sub", 0.0),
    (SmudgeSpectral, "smudge_spectral", 0.0),
    (SmudgeBucket, "smudge_bucket", 0.0),
    (SmudgeLock, "smudge_lock", 0.0),
    (Eraser, "eraser", 0.0),
    (StrokeThreshold, "stroke_threshold", 0.0),
    (StrokeDurationLogarithmic, "stroke_duration_logarithmic", 4.0),
    (StrokeHoldtime, "stroke_holdtime", 0.0),
    (CustomInput, "custom_input", 0.0),
    (CustomInputSlowness, "custom_input_slowness", 0.0),
    (EllipticalDabRatio, "elliptical_dab_ratio", 1.0),
    (EllipticalDabAngle, "elliptical_dab_angle", 90.0),
    (DirectionFilter, "direction_filter", 2.0),
    (LockAlpha, "lock_alpha", 0.0),
    (Colorize, "colorize", 0.0),
    (PaintMode, "paint_mode", 0.0),
    (Posterize, "posterize", 0.0),
    (PosterizeNum, "posterize_num", 0.05),
    (SnapToPixel, "snap_to_pixel", 0.0),
    (PressureGainLog, "pressure_gain_log", 0.0),
}

macro_rules! inputs_table {
    ($(($variant:ident, $cname:literal),)*) => {
        /// A dynamic input feeding the setting mappings.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum Input {
            $($variant,)*
        }

        impl Input {
            pub const ALL: &'static [Input] = &[$(Input::$variant,)*];
            pub const COUNT: usize = Self::ALL.len();

            pub fn cname(self) -> &'static str {
                match self {
                    $(Input::$variant => $cname,)*
                }
            }

            pub fn from_cname(name: &str) -> Option<Input> {
                match name {
                    $($cname => Some(Input::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

inputs_table! {
    (Pressure, "pressure"),
    (Speed1, "speed1"),
    (Speed2, "speed2"),
    (Random, "random"),
    (Stroke, "stroke"),
    (Direction, "direction"),
    (DirectionAngle, "direction_angle"),
    (TiltDeclination, "tilt_declination"),
    (TiltAscension, "tilt_ascension"),
    (Viewzoom, "viewzoom"),
    (AttackAngle, "attack_angle"),
    (BrushRadius, "brush_radius"),
    (GridmapX, "gridmap_x"),
    (GridmapY, "gridmap_y"),
    (Custom, "custom"),
}

/// Engine state slots, mutated while a stroke is in progress. Exposed by
/// index for record/replay tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    X,
    Y,
    Pressure,
    PartialDabs,
    ActualX,
    ActualY,
    ActualRadius,
    Declination,
    Ascension,
    NormSpeed1Slow,
    NormSpeed2Slow,
    NormDxSlow,
    NormDySlow,
    DirectionDx,
    DirectionDy,
    DirectionAngleDx,
    DirectionAngleDy,
    SmudgeRa,
    SmudgeGa,
    SmudgeBa,
    SmudgeA,
    LastGetcolorR,
    LastGetcolorG,
    LastGetcolorB,
    LastGetcolorA,
    LastGetcolorRecentness,
    Stroke,
    StrokeStarted,
    CustomInput,
    Viewzoom,
    Viewrotation,
    GridmapX,
    GridmapY,
    ActualEllipticalDabRatio,
    ActualEllipticalDabAngle,
    Flip,
    RngSeed,
}

impl State {
    pub const COUNT: usize = State::RngSeed as usize + 1;
}
