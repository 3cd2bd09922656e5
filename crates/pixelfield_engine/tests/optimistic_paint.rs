use pixelfield_engine::{CanvasDescriptor, CanvasInfo, Chunk, ChunkStore, Color, MutationTracker, PlaceOutcome, Viewport};

fn earth_canvas() -> CanvasDescriptor {
    CanvasDescriptor::from_info(CanvasInfo {
        id: 0,
        letter: "d".to_string(),
        title: "Earth".to_string(),
        size: 65536,
        tile_counts: vec![1, 4, 16, 64],
        cooldown_ms: 4000,
        colors: vec!["#CAE3FF".into(), "#FFFFFF".into(), "#000000".into(), "#FF0000".into()],
        unset_len: 1,
        locked: false,
        bounds: None,
    })
    .unwrap()
}

#[test]
fn paint_shows_immediately_and_reverts_on_refusal() {
    let canvas = earth_canvas();
    let mut viewport = Viewport::new(800, 600);
    viewport.set_position(0.0, 0.0);
    viewport.set_zoom(10.0);

    let mut store = ChunkStore::new();
    let white = canvas.palette.index_of(Color::from_hex("#FFFFFF").unwrap()).unwrap();
    let red = canvas.palette.index_of(Color::from_hex("#FF0000").unwrap()).unwrap();
    store.insert_chunk((0, 0), Chunk::filled(white));

    let mut tracker = MutationTracker::new();
    let (sx, sy) = viewport.to_screen(5.0, 5.0);
    assert_eq!(viewport.to_logical(sx, sy), pixelfield_engine::Position::new(5, 5));

    // The optimistic write is visible before any authority round trip.
    assert_eq!(tracker.place_local(&mut store, (5, 5), red), PlaceOutcome::Sent);
    assert_eq!(store.get_color_at((5, 5)), Some(red));

    // refusePixel for (5,5) -> deterministic rollback to white.
    assert_eq!(tracker.on_reject(&mut store, (5, 5)), Some(white));
    assert_eq!(store.get_color_at((5, 5)), Some(white));
    assert_eq!(tracker.pending_len(), 0);
}

#[test]
fn confirmation_keeps_the_painted_color() {
    let canvas = earth_canvas();
    let mut store = ChunkStore::new();
    let white = canvas.palette.index_of(Color::from_hex("#FFFFFF").unwrap()).unwrap();
    let black = canvas.palette.index_of(Color::from_hex("#000000").unwrap()).unwrap();
    store.insert_chunk((0, 0), Chunk::filled(white));

    let mut tracker = MutationTracker::new();
    tracker.place_local(&mut store, (12, 34), black);
    assert!(tracker.is_pending((12, 34)));

    assert!(tracker.on_confirm((12, 34)));
    assert!(!tracker.is_pending((12, 34)));
    assert_eq!(store.get_color_at((12, 34)), Some(black));
}

#[test]
fn burst_repaint_rolls_back_to_the_pre_burst_color() {
    let canvas = earth_canvas();
    let mut store = ChunkStore::new();
    let white = canvas.palette.index_of(Color::from_hex("#FFFFFF").unwrap()).unwrap();
    store.insert_chunk((0, 0), Chunk::filled(white));

    let mut tracker = MutationTracker::new();
    tracker.place_local(&mut store, (5, 5), 2);
    tracker.place_local(&mut store, (5, 5), 3);
    tracker.place_local(&mut store, (5, 5), 2);

    assert_eq!(tracker.on_reject(&mut store, (5, 5)), Some(white));
    assert_eq!(store.get_color_at((5, 5)), Some(white));
}

#[test]
fn pending_chunk_survives_cache_pressure() {
    let mut store = ChunkStore::with_capacity(3);
    for cx in 0..3 {
        store.insert_chunk((cx, 0), Chunk::filled(1));
    }
    let mut tracker = MutationTracker::new();
    tracker.place_local(&mut store, (0, 0), 2); // pins chunk (0,0)

    for cx in 3..10 {
        store.insert_chunk((cx, 0), Chunk::filled(1));
        store.enforce_capacity(tracker.pinned_chunks());
    }

    assert!(store.get_color_at((0, 0)).is_some(), "chunk with a pending write must not be evicted");
    assert_eq!(tracker.on_reject(&mut store, (0, 0)), Some(1));
}
