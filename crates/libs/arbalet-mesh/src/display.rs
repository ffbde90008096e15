use crate::frame::Rgb;

/// Where a node applies its own color.
pub trait ColorSink: Send + Sync {
    fn show(&self, color: Rgb);
}

/// Logs every applied color. Stands in for the LED driver.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ColorSink for LogSink {
    fn show(&self, color: Rgb) {
        log::info!("display: color {}", color);
    }
}
