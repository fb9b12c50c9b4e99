use emojigrid::{
    limits::{DEFAULT_COLUMNS, TILE_SIZE},
    plan::{grid_padding, plan_tiles, resolved_columns},
};

#[test]
fn full_hd_at_default_width() {
    let plan = plan_tiles(1920, 1080, DEFAULT_COLUMNS).unwrap();
    assert_eq!((plan.width, plan.height), (1900, 1068));
    assert_eq!((plan.tiles_x, plan.tiles_y), (19, 11));
    assert_eq!(plan.last_row_height, Some(68));
    assert_eq!(plan.transparent_spacing(), 0);

    let partial: Vec<_> = plan.cells.iter().filter(|c| c.is_partial_last_row).collect();
    assert_eq!(partial.len(), 19);
    assert!(partial.iter().all(|c| c.height == 68 && c.source_y == 1000));
}

#[test]
fn four_columns_centre_with_two_fillers_each_side() {
    let plan = plan_tiles(1920, 1080, 4).unwrap();
    assert_eq!(plan.width, 400);
    assert_eq!(plan.columns, 4);
    assert_eq!(plan.padding.left, 2);
    assert_eq!(plan.padding.right, 2);
    assert_eq!(plan.row_len(), DEFAULT_COLUMNS);
    assert_eq!(plan.tile_count() as u32, plan.tiles_x * plan.tiles_y);
}

#[test]
fn every_requested_width_pads_to_default() {
    for requested in 1..=DEFAULT_COLUMNS {
        let plan = plan_tiles(1280, 720, requested).unwrap();
        let resolved = resolved_columns(plan.width);
        assert_eq!(resolved, plan.columns);

        let p = grid_padding(resolved);
        assert_eq!(p.left + p.right, DEFAULT_COLUMNS.saturating_sub(resolved));
        assert!(p.left <= p.right);
        assert_eq!(plan.height % 2, 0);
        assert!(plan.cells.iter().all(|c| c.width == TILE_SIZE));
    }
}

#[test]
fn cells_tile_the_normalized_frame_exactly() {
    let plan = plan_tiles(733, 517, 0).unwrap();
    let covered: u32 = plan.cells.iter().map(|c| c.width * c.height).sum();
    assert_eq!(covered, plan.width * plan.height);
}
