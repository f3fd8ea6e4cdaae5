//! Rendering collaborators.
//!
//! - `HeadlessDisplay`: renders nothing; exit comes from Ctrl+C or an iteration limit
//! - `WindowDisplay` (feature: display-minifb): a live window with a quit key

use anyhow::{anyhow, Result};

use crate::frame::Frame;

mod headless;
#[cfg(feature = "display-minifb")]
mod window;

pub use headless::HeadlessDisplay;
#[cfg(feature = "display-minifb")]
pub use window::WindowDisplay;

/// Where rendered frames go.
pub trait Display {
    fn show(&mut self, frame: &Frame) -> Result<()>;

    /// Polled once per iteration. True when the user asked to quit.
    fn quit_requested(&mut self) -> bool;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<V: Display + ?Sized> Display for Box<V> {
    fn show(&mut self, frame: &Frame) -> Result<()> {
        (**self).show(frame)
    }

    fn quit_requested(&mut self) -> bool {
        (**self).quit_requested()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisplayMode {
    Headless,
    Window,
}

impl std::str::FromStr for DisplayMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "headless" | "none" => Ok(Self::Headless),
            "window" => Ok(Self::Window),
            other => Err(anyhow!("unknown display mode '{}' (headless|window)", other)),
        }
    }
}

/// Key that ends the loop: a single letter/digit or `esc`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuitKey {
    Char(char),
    Escape,
}

impl Default for QuitKey {
    fn default() -> Self {
        Self::Char('q')
    }
}

impl std::str::FromStr for QuitKey {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("esc") || value.eq_ignore_ascii_case("escape") {
            return Ok(Self::Escape);
        }
        let mut chars = value.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_alphanumeric() => Ok(Self::Char(c.to_ascii_lowercase())),
            _ => Err(anyhow!("quit key must be a single letter/digit or 'esc', got '{}'", value)),
        }
    }
}

/// Open the display for `mode`.
pub fn open_display(mode: DisplayMode, title: &str, quit_key: QuitKey) -> Result<Box<dyn Display>> {
    match mode {
        DisplayMode::Headless => Ok(Box::new(HeadlessDisplay::new())),
        #[cfg(feature = "display-minifb")]
        DisplayMode::Window => Ok(Box::new(WindowDisplay::new(title, quit_key))),
        #[cfg(not(feature = "display-minifb"))]
        DisplayMode::Window => {
            let _ = (title, quit_key);
            Err(anyhow!("window display requires the display-minifb feature"))
        }
    }
}
