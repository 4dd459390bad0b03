//! Screen geometry and the blank cursor
//!
//! Stateless helpers: the screen rectangle, its center (the fallback
//! pointer position), and the invisible cursor substituted while the local
//! pointer is under remote control.

use tracing::{debug, info};
use x11rb::protocol::xproto::Cursor;

use crate::display::DisplayConnection;
use crate::error::Result;

/// Screen rectangle in root-window coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScreenShape {
    /// Left edge
    pub x: i32,
    /// Top edge
    pub y: i32,
    /// Width in pixels
    pub width: i32,
    /// Height in pixels
    pub height: i32,
}

impl ScreenShape {
    /// Shape of the display's default screen
    pub fn of(display: &dyn DisplayConnection) -> Self {
        let (width, height) = display.screen_size();
        Self {
            x: 0,
            y: 0,
            width: width as i32,
            height: height as i32,
        }
    }

    /// Center point, rounding halves down
    pub fn center(&self) -> (i32, i32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }

    /// Whether `(x, y)` lies on the screen
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && y >= self.y && x < self.x + self.width && y < self.y + self.height
    }
}

/// Zeroed 1-bit bitmap data, rows padded to whole bytes
pub fn blank_bitmap(width: u16, height: u16) -> Vec<u8> {
    vec![0u8; (width as usize).div_ceil(8) * height as usize]
}

/// Build a fully transparent cursor at the server's preferred size
///
/// The shape and mask bitmaps are released once the cursor exists.
pub fn create_blank_cursor(display: &dyn DisplayConnection) -> Result<Cursor> {
    let (width, height) = display.query_best_cursor(1, 1)?;
    let data = blank_bitmap(width, height);

    let bitmap = display.create_bitmap(width, height, &data)?;
    let cursor = display.create_pixmap_cursor(bitmap, bitmap);
    display.free_pixmap(bitmap)?;

    let cursor = cursor?;
    debug!("Created {}x{} blank cursor 0x{:x}", width, height, cursor);
    Ok(cursor)
}

/// Recompute the shape and log it
pub fn update_screen_shape(display: &dyn DisplayConnection) -> ScreenShape {
    let shape = ScreenShape::of(display);
    info!(
        "screen shape: {},{} {}x{}",
        shape.x, shape.y, shape.width, shape.height
    );
    shape
}
