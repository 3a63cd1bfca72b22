//! Responsive tile grid for participant video.
//!
//! `compute_layout` is a pure function of the container size and tile count.
//! `LayoutEngine` remembers the last inputs so each trigger (viewport resize,
//! roster change, screen-share toggle) recomputes exactly once and publishes
//! the result on a `watch` channel.

use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

pub const DEFAULT_MIN_TILE_WIDTH_PX: u32 = 300;
pub const DEFAULT_GAP_PX: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutOptions {
    pub min_tile_width_px: u32,
    pub gap_px: u32,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            min_tile_width_px: DEFAULT_MIN_TILE_WIDTH_PX,
            gap_px: DEFAULT_GAP_PX,
        }
    }
}

/// Grid description derived from the roster and viewport. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LayoutFrame {
    pub columns: u32,
    pub tile_width_px: u32,
    pub tile_height_px: u32,
    pub rows: u32,
    pub overflow_count: u32,
}

/// One participant slot in the grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TileSlot {
    pub participant_id: String,
    /// Hidden tiles keep their media subscription; they are only not drawn.
    pub visible: bool,
}

pub fn compute_layout(
    container_width_px: u32,
    container_height_px: u32,
    total_tiles: u32,
    options: LayoutOptions,
) -> LayoutFrame {
    if total_tiles == 0 {
        return LayoutFrame::default();
    }

    let gap = options.gap_px;
    let possible_columns =
        ((container_width_px + gap) / (options.min_tile_width_px + gap).max(1)).max(1);
    let columns = total_tiles.min(possible_columns);

    let tile_width_px = container_width_px.saturating_sub(gap * (columns - 1)) / columns;
    let tile_height_px = (u64::from(tile_width_px) * 9 / 16) as u32;

    let rows = ((container_height_px + gap) / (tile_height_px + gap).max(1)).max(1);
    let capacity = columns * rows;
    let overflow_count = total_tiles.saturating_sub(capacity);

    LayoutFrame {
        columns,
        tile_width_px,
        tile_height_px,
        rows,
        overflow_count,
    }
}

impl LayoutFrame {
    pub fn capacity(&self) -> u32 {
        self.columns * self.rows
    }

    /// Number of tiles actually drawn. One slot goes to the overflow badge
    /// when anything overflows.
    pub fn visible_tile_count(&self, total_tiles: u32) -> u32 {
        if self.overflow_count > 0 {
            self.capacity().saturating_sub(1)
        } else {
            total_tiles.min(self.capacity())
        }
    }

    /// Count shown on the overflow badge, zero when there is no badge.
    pub fn hidden_count(&self, total_tiles: u32) -> u32 {
        total_tiles.saturating_sub(self.visible_tile_count(total_tiles))
    }

    pub fn tile_slots<'a, I>(&self, participant_ids: I) -> Vec<TileSlot>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let ids: Vec<&str> = participant_ids.into_iter().collect();
        let visible = self.visible_tile_count(ids.len() as u32) as usize;
        ids.into_iter()
            .enumerate()
            .map(|(index, id)| TileSlot {
                participant_id: id.to_string(),
                visible: index < visible,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct LayoutInputs {
    width_px: u32,
    height_px: u32,
    total_tiles: u32,
    screen_share_active: bool,
}

/// Recomputes the grid on every triggering event.
pub struct LayoutEngine {
    options: LayoutOptions,
    inputs: LayoutInputs,
    frame_tx: watch::Sender<LayoutFrame>,
}

impl LayoutEngine {
    pub fn new(options: LayoutOptions) -> Self {
        let (frame_tx, _) = watch::channel(LayoutFrame::default());
        Self {
            options,
            inputs: LayoutInputs::default(),
            frame_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<LayoutFrame> {
        self.frame_tx.subscribe()
    }

    pub fn current(&self) -> LayoutFrame {
        *self.frame_tx.borrow()
    }

    pub fn on_viewport_resized(&mut self, width_px: u32, height_px: u32) -> LayoutFrame {
        self.inputs.width_px = width_px;
        self.inputs.height_px = height_px;
        self.recompute()
    }

    pub fn on_roster_changed(&mut self, total_tiles: usize) -> LayoutFrame {
        self.inputs.total_tiles = total_tiles as u32;
        self.recompute()
    }

    /// The shared screen replaces the sharer's camera inside their own tile,
    /// so the tile count is unchanged; the grid is still recomputed.
    pub fn on_screen_share_toggled(&mut self, active: bool) -> LayoutFrame {
        self.inputs.screen_share_active = active;
        self.recompute()
    }

    pub fn screen_share_active(&self) -> bool {
        self.inputs.screen_share_active
    }

    pub fn total_tiles(&self) -> usize {
        self.inputs.total_tiles as usize
    }

    pub fn clear(&mut self) {
        self.inputs.total_tiles = 0;
        self.inputs.screen_share_active = false;
        self.frame_tx.send_replace(LayoutFrame::default());
    }

    fn recompute(&mut self) -> LayoutFrame {
        let frame = compute_layout(
            self.inputs.width_px,
            self.inputs.height_px,
            self.inputs.total_tiles,
            self.options,
        );
        debug!(
            "Layout recomputed: {} tiles in {}x{} -> {:?}",
            self.inputs.total_tiles, self.inputs.width_px, self.inputs.height_px, frame
        );
        self.frame_tx.send_replace(frame);
        frame
    }
}
