//! Frame compositor.
//!
//! Samples every registered render surface at a fixed rate and blits it into
//! one off-screen frame buffer at the surface's last-known rectangle. The
//! registered set is shared with the sampling task and may change mid-run.
//! The composed buffer is exposed as a `VideoTap`, so the recorder never needs a
//! second screen-capture prompt.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::layout::{compute_layout, LayoutFrame, LayoutOptions};
use crate::transport::{VideoFrame, VideoTap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Rectangles of the visible tiles of `frame`, in row-major order.
pub fn tile_rects(frame: &LayoutFrame, gap_px: u32, total_tiles: u32) -> Vec<Rect> {
    let visible = frame.visible_tile_count(total_tiles);
    if frame.columns == 0 {
        return Vec::new();
    }
    (0..visible)
        .map(|index| {
            let column = index % frame.columns;
            let row = index / frame.columns;
            Rect {
                x: column * (frame.tile_width_px + gap_px),
                y: row * (frame.tile_height_px + gap_px),
                width: frame.tile_width_px,
                height: frame.tile_height_px,
            }
        })
        .collect()
}

pub struct RenderSurface {
    pub participant_id: String,
    pub source: Arc<dyn VideoTap>,
    pub rect: Rect,
}

#[derive(Default)]
pub struct SurfaceRegistry {
    surfaces: Vec<RenderSurface>,
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lays the given tiles out on a `width`x`height` canvas with the same
    /// grid the call view uses. Tiles past the visible capacity are skipped.
    pub fn from_tiles(
        width: u32,
        height: u32,
        tiles: Vec<(String, Arc<dyn VideoTap>)>,
        options: LayoutOptions,
    ) -> Self {
        let total = tiles.len() as u32;
        let frame = compute_layout(width, height, total, options);
        let rects = tile_rects(&frame, options.gap_px, total);

        let mut registry = Self::new();
        for ((participant_id, source), rect) in tiles.into_iter().zip(rects) {
            registry.register(participant_id, source, rect);
        }
        registry
    }

    pub fn register(&mut self, participant_id: String, source: Arc<dyn VideoTap>, rect: Rect) {
        self.surfaces.retain(|s| s.participant_id != participant_id);
        self.surfaces.push(RenderSurface {
            participant_id,
            source,
            rect,
        });
    }

    /// Returns false if the participant had no surface.
    pub fn unregister(&mut self, participant_id: &str) -> bool {
        let before = self.surfaces.len();
        self.surfaces.retain(|s| s.participant_id != participant_id);
        self.surfaces.len() != before
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }
}

/// Published canvases kept around for reuse once readers let go of them.
const RECYCLE_DEPTH: usize = 2;

/// RGBA canvas.
pub struct FrameBuffer {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
    published: VecDeque<Arc<Vec<u8>>>,
}

impl FrameBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            rgba: vec![0; Self::byte_len(width, height)],
            published: VecDeque::with_capacity(RECYCLE_DEPTH + 1),
        }
    }

    fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 4
    }

    pub fn clear(&mut self) {
        for px in self.rgba.chunks_exact_mut(4) {
            px.copy_from_slice(&[0, 0, 0, 255]);
        }
    }

    /// Nearest-neighbour scale of `frame` into `rect`, clipped to the canvas.
    pub fn blit(&mut self, frame: &VideoFrame, rect: Rect) {
        if frame.width == 0 || frame.height == 0 || rect.width == 0 || rect.height == 0 {
            return;
        }
        let x_end = (rect.x + rect.width).min(self.width);
        let y_end = (rect.y + rect.height).min(self.height);

        for y in rect.y..y_end {
            let src_y = ((y - rect.y) as u64 * frame.height as u64 / rect.height as u64) as u32;
            for x in rect.x..x_end {
                let src_x = ((x - rect.x) as u64 * frame.width as u64 / rect.width as u64) as u32;
                if let Some(px) = frame.pixel(src_x, src_y) {
                    let offset = (y as usize * self.width as usize + x as usize) * 4;
                    self.rgba[offset..offset + 4].copy_from_slice(&px);
                }
            }
        }
    }

    pub fn compose(&mut self, registry: &SurfaceRegistry) -> usize {
        self.clear();
        let mut drawn = 0;
        for surface in &registry.surfaces {
            if let Some(frame) = surface.source.latest_frame() {
                self.blit(&frame, surface.rect);
                drawn += 1;
            }
        }
        drawn
    }

    /// Hands the canvas out as a frame and continues on a recycled buffer.
    /// The contents of the new canvas are stale until the next `compose`.
    pub fn take_frame(&mut self) -> VideoFrame {
        let recycled = if self.published.len() >= RECYCLE_DEPTH {
            self.published
                .pop_front()
                .and_then(|oldest| Arc::try_unwrap(oldest).ok())
        } else {
            None
        };
        let next = recycled.unwrap_or_else(|| vec![0; Self::byte_len(self.width, self.height)]);

        let rgba = Arc::new(std::mem::replace(&mut self.rgba, next));
        self.published.push_back(Arc::clone(&rgba));
        VideoFrame {
            width: self.width,
            height: self.height,
            rgba,
        }
    }
}

/// The synthetic stream produced by a running compositor.
#[derive(Clone, Default)]
pub struct ComposedStream {
    latest: Arc<StdMutex<Option<VideoFrame>>>,
}

impl ComposedStream {
    fn publish(&self, frame: Option<VideoFrame>) {
        *self.latest.lock().unwrap_or_else(|p| p.into_inner()) = frame;
    }
}

impl VideoTap for ComposedStream {
    fn latest_frame(&self) -> Option<VideoFrame> {
        self.latest.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

/// The compositor samples whatever this holds on each tick, so tiles can come
/// and go while a recording runs.
type SharedSurfaces = Arc<StdMutex<SurfaceRegistry>>;

pub struct FrameCompositor {
    stream: ComposedStream,
    surfaces: SharedSurfaces,
    width: u32,
    height: u32,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl FrameCompositor {
    pub fn start(registry: SurfaceRegistry, width: u32, height: u32, fps: u32) -> Self {
        let stream = ComposedStream::default();
        let surfaces: SharedSurfaces = Arc::new(StdMutex::new(registry));
        let cancel = CancellationToken::new();
        let period = Duration::from_micros(1_000_000 / u64::from(fps.max(1)));

        info!(
            "Compositor sampling {} surfaces at {}fps into {}x{}",
            lock_surfaces(&surfaces).len(),
            fps,
            width,
            height
        );

        let task = {
            let stream = stream.clone();
            let surfaces = surfaces.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut buffer = FrameBuffer::new(width, height);
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = interval.tick() => {
                            buffer.compose(&lock_surfaces(&surfaces));
                            stream.publish(Some(buffer.take_frame()));
                        }
                    }
                }
                debug!("Compositor loop stopped");
            })
        };

        Self {
            stream,
            surfaces,
            width,
            height,
            cancel,
            task: Some(task),
        }
    }

    pub fn stream(&self) -> Arc<dyn VideoTap> {
        Arc::new(self.stream.clone())
    }

    /// Re-lays the canvas out for a new set of visible tiles. Takes effect on
    /// the next sampled frame. Returns the number of surfaces now drawn.
    pub fn retile(&self, tiles: Vec<(String, Arc<dyn VideoTap>)>, options: LayoutOptions) -> usize {
        let registry = SurfaceRegistry::from_tiles(self.width, self.height, tiles, options);
        let count = registry.len();
        *lock_surfaces(&self.surfaces) = registry;
        debug!("Compositor retiled to {} surfaces", count);
        count
    }

    /// Stops sampling and releases the canvas and the synthetic stream.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.stream.publish(None);
        info!("Compositor released");
    }
}

fn lock_surfaces(surfaces: &SharedSurfaces) -> MutexGuard<'_, SurfaceRegistry> {
    surfaces.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Drop for FrameCompositor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
