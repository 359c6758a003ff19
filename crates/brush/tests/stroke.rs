//! End-to-end strokes: brush dynamics driving the tiled surface.

use ochre_brush::{Brush, Setting};
use ochre_surface::{FixedTileStore, Rect, Surface, TiledSurface};

const ONE: u16 = 1 << 15;

fn surface() -> TiledSurface<FixedTileStore> {
    TiledSurface::new(FixedTileStore::new(300, 150))
}

fn red_brush() -> Brush {
    let mut brush = Brush::new();
    brush.load_defaults();
    brush.set_base_value(Setting::ColorH, 0.0);
    brush.set_base_value(Setting::ColorS, 1.0);
    brush.set_base_value(Setting::ColorV, 1.0);
    brush.set_seed(7);
    brush
}

fn stroke_line(
    brush: &mut Brush,
    surface: &mut TiledSurface<FixedTileStore>,
    from: (f32, f32),
    to: (f32, f32),
    steps: u32,
) {
    brush.stroke_to(surface, from.0, from.1, 1.0, 0.0, 0.0, 0.1, 1.0, 0.0);
    for i in 1..=steps {
        let t = i as f32 / steps as f32;
        let x = from.0 + (to.0 - from.0) * t;
        let y = from.1 + (to.1 - from.1) * t;
        brush.stroke_to(surface, x, y, 1.0, 0.0, 0.0, 1.0 / 30.0, 1.0, 0.0);
    }
}

fn alpha_at(surface: &TiledSurface<FixedTileStore>, x: u32, y: u32) -> u16 {
    surface.store().pixel(x, y)[3]
}

#[test]
fn rectangle_stroke_touches_all_sides() {
    let mut brush = red_brush();
    let mut s = surface();

    s.begin_atomic();
    stroke_line(&mut brush, &mut s, (60.0, 30.0), (240.0, 30.0), 20);
    stroke_line(&mut brush, &mut s, (240.0, 30.0), (240.0, 120.0), 12);
    stroke_line(&mut brush, &mut s, (240.0, 120.0), (60.0, 120.0), 20);
    stroke_line(&mut brush, &mut s, (60.0, 120.0), (60.0, 30.0), 12);
    let mut roi = [Rect::ZERO];
    assert_eq!(s.end_atomic(&mut roi), 1);

    for (x, y) in [(150, 30), (240, 75), (150, 120), (60, 75)] {
        assert!(alpha_at(&s, x, y) > 20000, "edge pixel ({x},{y}) unpainted");
    }
    // interior stays empty
    assert_eq!(alpha_at(&s, 150, 75), 0);

    // everything that was painted is red
    let p = s.store().pixel(150, 30);
    assert!(p[0] > p[1] && p[0] > p[2]);
}

#[test]
fn eraser_brush_clears_painted_area() {
    let mut brush = red_brush();
    let mut s = surface();

    s.begin_atomic();
    stroke_line(&mut brush, &mut s, (60.0, 75.0), (240.0, 75.0), 30);
    let mut roi = [Rect::ZERO];
    s.end_atomic(&mut roi);
    assert!(alpha_at(&s, 150, 75) > 20000);

    let mut eraser = red_brush();
    eraser.set_base_value(Setting::Eraser, 1.0);
    s.begin_atomic();
    stroke_line(&mut eraser, &mut s, (60.0, 75.0), (240.0, 75.0), 30);
    s.end_atomic(&mut roi);

    assert!(alpha_at(&s, 150, 75) < 2000, "eraser left alpha {}", alpha_at(&s, 150, 75));
}

#[test]
fn pigment_stroke_paints() {
    let mut brush = red_brush();
    brush.set_base_value(Setting::PaintMode, 1.0);
    let mut s = surface();

    s.begin_atomic();
    stroke_line(&mut brush, &mut s, (60.0, 75.0), (240.0, 75.0), 30);
    let mut roi = [Rect::ZERO];
    s.end_atomic(&mut roi);

    let p = s.store().pixel(150, 75);
    assert!(p[3] > 20000, "pigment stroke missing: {p:?}");
    assert!(p[0] > p[1]);
    assert!(p[0] <= p[3] && p[1] <= p[3] && p[2] <= p[3] && p[3] <= ONE);
}

#[test]
fn elliptical_brush_strokes_stay_thin() {
    let mut brush = red_brush();
    brush.set_base_value(Setting::EllipticalDabRatio, 4.0);
    brush.set_base_value(Setting::EllipticalDabAngle, 90.0);
    let mut s = surface();

    s.begin_atomic();
    stroke_line(&mut brush, &mut s, (60.0, 75.0), (240.0, 75.0), 30);
    let mut roi = [Rect::ZERO];
    s.end_atomic(&mut roi);

    assert!(alpha_at(&s, 150, 75) > 20000);
    // the minor axis is a quarter of the radius, so 10 pixels off the
    // stroke line nothing is painted
    assert_eq!(alpha_at(&s, 150, 88), 0);
}

#[test]
fn settings_load_then_paint() {
    let mut brush = red_brush();
    brush
        .load_json(
            r#"{
                "version": 3,
                "settings": {
                    "radius_logarithmic": { "base_value": 1.0, "inputs": {} },
                    "opaque": { "base_value": 1.0, "inputs": {} }
                }
            }"#,
        )
        .expect("load");
    let mut s = surface();

    s.begin_atomic();
    stroke_line(&mut brush, &mut s, (60.0, 75.0), (240.0, 75.0), 40);
    let mut roi = [Rect::ZERO];
    s.end_atomic(&mut roi);

    assert!(alpha_at(&s, 150, 75) > 20000);
    // radius e^1 is under 3 pixels, so the stroke is narrow
    assert_eq!(alpha_at(&s, 150, 85), 0);
}
