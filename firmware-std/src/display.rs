//! Status display thread (SSD1306 OLED, 128x64, I2C).
//!
//! ESP-IDF std version: esp-idf-svc I2C driver + ssd1306 in buffered
//! graphics mode. The rest of the firmware never touches the bus: it
//! pushes whole text pages through a small bounded channel and this
//! thread redraws the panel per page.

use std::sync::mpsc::{Receiver, SyncSender};

use embedded_graphics::mono_font::ascii::FONT_6X10;
use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics::text::Text;
use esp_idf_svc::hal::gpio::IOPin;
use esp_idf_svc::hal::i2c::{I2c, I2cConfig, I2cDriver};
use esp_idf_svc::hal::peripheral::Peripheral;
use esp_idf_svc::hal::units::Hertz;
use ssd1306::mode::BufferedGraphicsMode;
use ssd1306::prelude::*;
use ssd1306::{I2CDisplayInterface, Ssd1306};

use probelog::session::StatusDisplay;

// ── Display geometry ─────────────────────────────────────────────────

const ROW_H: i32 = 12;
const FIRST_BASELINE: i32 = 10;

/// Depth of the page channel; late pages are dropped, not queued up.
pub const TEXT_QUEUE_DEPTH: usize = 10;

// ── Channel-backed StatusDisplay ─────────────────────────────────────

/// Producer half handed to the capture session. Cheap to clone, one per
/// session.
#[derive(Clone)]
pub struct ChannelDisplay {
    tx: SyncSender<String>,
}

impl ChannelDisplay {
    pub fn new(tx: SyncSender<String>) -> Self {
        Self { tx }
    }
}

impl StatusDisplay for ChannelDisplay {
    fn push_text(&self, text: &str) {
        if self.tx.try_send(text.to_owned()).is_err() {
            log::debug!("display queue full, page dropped");
        }
    }
}

// ── Display thread ───────────────────────────────────────────────────

pub fn display_thread(
    i2c: impl Peripheral<P = impl I2c> + 'static,
    sda: impl Peripheral<P = impl IOPin> + 'static,
    scl: impl Peripheral<P = impl IOPin> + 'static,
    rx: Receiver<String>,
    flip: bool,
) {
    log::info!("Display thread starting");

    let config = I2cConfig::new().baudrate(Hertz(400_000));
    let i2c = I2cDriver::new(i2c, sda, scl, &config).unwrap();

    let rotation = if flip {
        DisplayRotation::Rotate180
    } else {
        DisplayRotation::Rotate0
    };
    let interface = I2CDisplayInterface::new(i2c);
    let mut display =
        Ssd1306::new(interface, DisplaySize128x64, rotation).into_buffered_graphics_mode();
    display.init().unwrap();
    log::info!("Display initialized (128x64)");

    while let Ok(page) = rx.recv() {
        draw_page(&mut display, &page);
    }
    log::info!("Display channel closed");
}

fn draw_page<DI, SIZE>(display: &mut Ssd1306<DI, SIZE, BufferedGraphicsMode<SIZE>>, page: &str)
where
    DI: WriteOnlyDataCommand,
    SIZE: DisplaySize,
{
    let style = MonoTextStyle::new(&FONT_6X10, BinaryColor::On);

    display.clear_buffer();
    for (i, line) in page.lines().enumerate() {
        let _ = Text::new(
            line,
            Point::new(0, FIRST_BASELINE + i as i32 * ROW_H),
            style,
        )
        .draw(display);
    }
    if let Err(e) = display.flush() {
        log::warn!("display flush failed: {e:?}");
    }
}
