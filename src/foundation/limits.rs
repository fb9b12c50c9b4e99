//! Platform contract constants.
//!
//! These are fixed by the hosting platform and the grid layout; none of them are tunable.

/// Edge length of one tile, in pixels.
pub const TILE_SIZE: u32 = 100;

/// Number of columns a composed message is laid out with.
pub const DEFAULT_COLUMNS: u32 = 8;

/// Maximum stickers accepted by a single pack-creation call.
pub const MAX_STICKERS_IN_BATCH: usize = 50;

/// Maximum stickers a single pack can hold.
pub const MAX_STICKERS_TOTAL: usize = 200;

/// Maximum custom emoji rendered in one outbound message.
pub const MAX_EMOJI_IN_MESSAGE: usize = 100;
