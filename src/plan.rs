//! Tile planning: how a source frame is cut into a grid of 100×100 cells.
//!
//! Planning is pure arithmetic. The planner normalizes the source size, resolves how many
//! columns actually fit and computes the padding that centers a narrow grid inside the
//! fixed default width.

use serde::Serialize;

use crate::{
    error::{EmojiGridError, EmojiGridResult},
    limits::{DEFAULT_COLUMNS, TILE_SIZE},
};

/// Widest normalized source the grid math supports (99 columns).
pub const MAX_PLANNED_WIDTH: u32 = TILE_SIZE * TILE_SIZE - TILE_SIZE;

/// One planned tile region. Immutable once planned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TileCell {
    pub row: u32,
    pub col: u32,
    pub source_x: u32,
    pub source_y: u32,
    pub width: u32,
    pub height: u32,
    pub is_partial_last_row: bool,
}

/// Columns of filler placed around a narrower grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GridPadding {
    pub left: u32,
    pub right: u32,
}

impl GridPadding {
    pub fn total(self) -> u32 {
        self.left + self.right
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TilePlan {
    /// Normalized source width the tiles are cut from.
    pub width: u32,
    /// Normalized source height the tiles are cut from.
    pub height: u32,
    /// Number of 100px columns that actually fit (the resolved width).
    pub columns: u32,
    pub tiles_x: u32,
    pub tiles_y: u32,
    /// Height of the last row when it is shorter than a full tile.
    pub last_row_height: Option<u32>,
    pub padding: GridPadding,
    /// Cells in row-major order.
    pub cells: Vec<TileCell>,
}

impl TilePlan {
    pub fn tile_count(&self) -> usize {
        self.cells.len()
    }

    /// Filler cells per row; zero when the grid is at least the default width.
    pub fn transparent_spacing(&self) -> u32 {
        self.padding.total()
    }

    /// Length of one row of the upload matrix: the default width, or wider grids as-is.
    pub fn row_len(&self) -> u32 {
        self.columns.max(DEFAULT_COLUMNS)
    }

    /// Linear position of a cell in planner order.
    pub fn position(&self, cell: &TileCell) -> usize {
        (cell.row * self.tiles_x + cell.col) as usize
    }
}

/// Rounds the width down to whole tiles and scales the height to match, forcing it even.
pub fn round_dimensions(width: u32, height: u32) -> (u32, u32) {
    let new_width = (width / TILE_SIZE) * TILE_SIZE;
    (new_width, scaled_even_height(width, height, new_width))
}

/// Rescales to `new_width`, keeping the aspect ratio of the (already rounded) input.
///
/// The height is forced even as well; the transcoder rejects odd frame sizes for yuv420.
pub fn rescale_to_width(width: u32, height: u32, new_width: u32) -> (u32, u32) {
    (new_width, scaled_even_height(width, height, new_width))
}

fn scaled_even_height(width: u32, height: u32, new_width: u32) -> u32 {
    if width == 0 {
        return 0;
    }
    let h = (f64::from(height) * (f64::from(new_width) / f64::from(width))) as u32;
    if h % 2 != 0 { h - 1 } else { h }
}

/// Number of whole columns in `width`: divide by the tile size until below it.
pub fn resolved_columns(width: u32) -> u32 {
    let mut i = width;
    while i >= TILE_SIZE {
        i /= TILE_SIZE;
    }
    i
}

/// Padding that centers `columns` inside the default width. The right side takes the odd unit.
pub fn grid_padding(columns: u32) -> GridPadding {
    if columns >= DEFAULT_COLUMNS {
        return GridPadding::default();
    }
    let total = DEFAULT_COLUMNS - columns;
    let left = if total % 2 != 0 {
        (total - 1) / 2
    } else {
        total / 2
    };
    GridPadding {
        left,
        right: total - left,
    }
}

/// Plans the tile grid for a source of `src_width`×`src_height`.
///
/// `requested_columns` is 1..=[`DEFAULT_COLUMNS`]; 0 means "use the default", which keeps
/// the source's own rounded width.
pub fn plan_tiles(
    src_width: u32,
    src_height: u32,
    requested_columns: u32,
) -> EmojiGridResult<TilePlan> {
    if requested_columns > DEFAULT_COLUMNS {
        return Err(EmojiGridError::validation(format!(
            "width must be between 1 and {DEFAULT_COLUMNS}, got {requested_columns}"
        )));
    }
    if src_width < TILE_SIZE {
        return Err(EmojiGridError::validation(format!(
            "source must be at least {TILE_SIZE}px wide, got {src_width}px"
        )));
    }

    let (mut width, mut height) = round_dimensions(src_width, src_height);
    if requested_columns != 0 && requested_columns != DEFAULT_COLUMNS {
        (width, height) = rescale_to_width(width, height, requested_columns * TILE_SIZE);
    }

    if height == 0 {
        return Err(EmojiGridError::validation(format!(
            "source {src_width}x{src_height} is too short to produce a tile row"
        )));
    }
    if width > MAX_PLANNED_WIDTH {
        return Err(EmojiGridError::validation(format!(
            "source is too wide: {width}px normalized, at most {MAX_PLANNED_WIDTH}px supported"
        )));
    }

    let columns = resolved_columns(width);
    let tiles_x = width / TILE_SIZE;
    let remainder = height % TILE_SIZE;
    let tiles_y = height / TILE_SIZE + u32::from(remainder > 0);
    let last_row_height = (remainder > 0).then_some(remainder);

    let mut cells = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for row in 0..tiles_y {
        let is_partial_last_row = row == tiles_y - 1 && remainder > 0;
        for col in 0..tiles_x {
            cells.push(TileCell {
                row,
                col,
                source_x: col * TILE_SIZE,
                source_y: row * TILE_SIZE,
                width: TILE_SIZE,
                height: if is_partial_last_row {
                    remainder
                } else {
                    TILE_SIZE
                },
                is_partial_last_row,
            });
        }
    }

    tracing::debug!(
        width,
        height,
        columns,
        tiles_x,
        tiles_y,
        "planned tile grid"
    );

    Ok(TilePlan {
        width,
        height,
        columns,
        tiles_x,
        tiles_y,
        last_row_height,
        padding: grid_padding(columns),
        cells,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding_truncates_width_and_evens_height() {
        assert_eq!(round_dimensions(1920, 1080), (1900, 1068));
        assert_eq!(round_dimensions(640, 480), (600, 450));
        assert_eq!(round_dimensions(250, 250), (200, 200));
    }

    #[test]
    fn resolved_columns_matches_whole_tiles() {
        assert_eq!(resolved_columns(800), 8);
        assert_eq!(resolved_columns(1900), 19);
        assert_eq!(resolved_columns(100), 1);
        assert_eq!(resolved_columns(9900), 99);
    }

    #[test]
    fn padding_right_side_absorbs_odd_unit() {
        assert_eq!(grid_padding(4), GridPadding { left: 2, right: 2 });
        assert_eq!(grid_padding(5), GridPadding { left: 1, right: 2 });
        assert_eq!(grid_padding(1), GridPadding { left: 3, right: 4 });
        assert_eq!(grid_padding(8), GridPadding::default());
        assert_eq!(grid_padding(19), GridPadding::default());
    }

    #[test]
    fn padding_always_fills_default_width() {
        for columns in 1..=DEFAULT_COLUMNS {
            let p = grid_padding(columns);
            assert_eq!(p.left + p.right, DEFAULT_COLUMNS - columns);
            assert!(p.left <= p.right);
        }
    }

    #[test]
    fn rejects_out_of_range_requests() {
        assert!(plan_tiles(1920, 1080, 9).unwrap_err().is_validation());
        assert!(plan_tiles(99, 1080, 0).unwrap_err().is_validation());
        assert!(plan_tiles(800, 1, 0).unwrap_err().is_validation());
    }

    #[test]
    fn cells_are_row_major_with_partial_last_row() {
        let plan = plan_tiles(400, 250, 0).unwrap();
        assert_eq!((plan.tiles_x, plan.tiles_y), (4, 3));
        assert_eq!(plan.last_row_height, Some(50));
        assert_eq!(plan.tile_count(), 12);

        for (i, cell) in plan.cells.iter().enumerate() {
            assert_eq!(plan.position(cell), i);
        }
        let last = plan.cells.last().unwrap();
        assert_eq!((last.row, last.col), (2, 3));
        assert_eq!((last.source_x, last.source_y), (300, 200));
        assert_eq!(last.height, 50);
        assert!(last.is_partial_last_row);
        assert!(!plan.cells[7].is_partial_last_row);
    }

    #[test]
    fn exact_height_has_no_partial_row() {
        let plan = plan_tiles(300, 200, 0).unwrap();
        assert_eq!(plan.tiles_y, 2);
        assert_eq!(plan.last_row_height, None);
        assert!(plan.cells.iter().all(|c| c.height == TILE_SIZE));
    }
}
