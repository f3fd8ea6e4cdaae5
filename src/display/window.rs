use anyhow::{anyhow, Context, Result};
use minifb::{Key, Window, WindowOptions};

use super::{Display, QuitKey};
use crate::frame::Frame;

/// minifb window. Created lazily on the first frame so it matches the capture size.
pub struct WindowDisplay {
    title: String,
    quit_key: QuitKey,
    window: Option<Window>,
    size: (usize, usize),
    argb: Vec<u32>,
}

impl WindowDisplay {
    pub fn new(title: &str, quit_key: QuitKey) -> Self {
        Self {
            title: title.to_string(),
            quit_key,
            window: None,
            size: (0, 0),
            argb: Vec::new(),
        }
    }

    fn ensure_window(&mut self, width: usize, height: usize) -> Result<&mut Window> {
        if self.window.is_none() || self.size != (width, height) {
            let window = Window::new(&self.title, width, height, WindowOptions::default())
                .map_err(|err| anyhow!("open window: {}", err))?;
            self.window = Some(window);
            self.size = (width, height);
        }
        self.window
            .as_mut()
            .context("window missing after creation")
    }
}

impl Display for WindowDisplay {
    fn show(&mut self, frame: &Frame) -> Result<()> {
        let (width, height) = (frame.width() as usize, frame.height() as usize);
        self.argb.clear();
        self.argb.extend(
            frame
                .pixels()
                .chunks_exact(3)
                .map(|px| ((px[0] as u32) << 16) | ((px[1] as u32) << 8) | px[2] as u32),
        );
        let argb = std::mem::take(&mut self.argb);
        let result = self
            .ensure_window(width, height)?
            .update_with_buffer(&argb, width, height)
            .map_err(|err| anyhow!("update window: {}", err));
        self.argb = argb;
        result
    }

    fn quit_requested(&mut self) -> bool {
        let Some(window) = self.window.as_mut() else {
            return false;
        };
        if !window.is_open() {
            return true;
        }
        window.update();
        match self.quit_key {
            QuitKey::Escape => window.is_key_down(Key::Escape),
            QuitKey::Char(c) => key_for(c).is_some_and(|key| window.is_key_down(key)),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.window = None;
        Ok(())
    }
}

fn key_for(c: char) -> Option<Key> {
    let key = match c {
        'a' => Key::A,
        'b' => Key::B,
        'c' => Key::C,
        'd' => Key::D,
        'e' => Key::E,
        'f' => Key::F,
        'g' => Key::G,
        'h' => Key::H,
        'i' => Key::I,
        'j' => Key::J,
        'k' => Key::K,
        'l' => Key::L,
        'm' => Key::M,
        'n' => Key::N,
        'o' => Key::O,
        'p' => Key::P,
        'q' => Key::Q,
        'r' => Key::R,
        's' => Key::S,
        't' => Key::T,
        'u' => Key::U,
        'v' => Key::V,
        'w' => Key::W,
        'x' => Key::X,
        'y' => Key::Y,
        'z' => Key::Z,
        '0' => Key::Key0,
        '1' => Key::Key1,
        '2' => Key::Key2,
        '3' => Key::Key3,
        '4' => Key::Key4,
        '5' => Key::Key5,
        '6' => Key::Key6,
        '7' => Key::Key7,
        '8' => Key::Key8,
        '9' => Key::Key9,
        _ => return None,
    };
    Some(key)
}
