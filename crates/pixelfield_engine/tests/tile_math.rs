use pixelfield_engine::{
    CHUNK_SIZE, CanvasDescriptor, CanvasInfo, MAX_ZOOM, MIN_ZOOM, Position, Viewport,
    chunk_store::{eligible_lod_levels, visible_chunks},
};

fn bounded_canvas() -> CanvasDescriptor {
    CanvasDescriptor::from_info(CanvasInfo {
        id: 1,
        letter: "w".to_string(),
        title: "Moon".to_string(),
        size: 4096,
        tile_counts: vec![1, 4],
        cooldown_ms: 1000,
        colors: vec!["#CAE3FF".into(), "#FFFFFF".into(), "#000000".into()],
        unset_len: 1,
        locked: false,
        bounds: Some([[-10, -10], [10, 10]]),
    })
    .unwrap()
}

#[test]
fn screen_round_trip_holds_for_integer_coordinates() {
    let mut viewport = Viewport::new(1024, 768);
    viewport.set_zoom(10.0);
    viewport.set_position(-4000.0, 250.5);
    for y in -300..300 {
        let x = y * 7 + 3;
        let (sx, sy) = viewport.to_screen(x as f64, y as f64);
        assert_eq!(viewport.to_logical(sx, sy), Position::new(x, y));
    }
}

#[test]
fn tile_local_offsets_stay_in_range_for_negative_coordinates() {
    for x in -1000..1000 {
        let (ox, oy) = Position::new(x, -x).in_chunk_offset();
        assert!((0..CHUNK_SIZE).contains(&ox));
        assert!((0..CHUNK_SIZE).contains(&oy));
    }
}

#[test]
fn out_of_bounds_tile_is_never_requested() {
    let canvas = bounded_canvas();
    assert!(!canvas.chunk_in_bounds(15, 0));

    // Park the viewport beyond the bounding box edge; the visible set
    // must still be clipped to it.
    let mut viewport = Viewport::new(800, 600);
    viewport.set_zoom(10.0);
    viewport.set_position(15.0 * CHUNK_SIZE as f64, 0.0);
    for (cx, cy) in visible_chunks(&viewport, &canvas) {
        assert!(canvas.chunk_in_bounds(cx, cy), "({cx},{cy}) escaped the bounding box");
    }
}

#[test]
fn zoom_clamp_bounds_every_request() {
    let mut viewport = Viewport::new(800, 600);
    for requested in [-5.0, 0.0, 0.5, 1.0, 10.0, 1e9, f64::INFINITY] {
        viewport.set_zoom(requested);
        assert!(viewport.zoom() >= MIN_ZOOM);
        assert!(viewport.zoom() < MAX_ZOOM);
    }
}

#[test]
fn finest_lod_level_is_always_eligible() {
    let canvas = bounded_canvas();
    for zoom in [1.0, 33.0, 500.0, 1023.0] {
        let mut viewport = Viewport::new(800, 600);
        viewport.set_zoom(zoom);
        let eligible = eligible_lod_levels(viewport.pixel_size(), &canvas);
        assert!(eligible.contains(&1), "zoom {zoom}");
    }
}
